use crate::cec::MAX_MSG_LEN;

/// Bit cursor over a message buffer.
///
/// Bits are addressed MSB first within each byte. Once the cursor reaches
/// [`MAX_MSG_LEN`] it saturates there: reads return 0 and writes are dropped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MsgTransfer {
    /// Bit offset within the current byte, 0 is the MSB.
    bit: u8,
    byte: u8,
    buf: [u8; MAX_MSG_LEN],
}

impl MsgTransfer {
    pub const fn new() -> Self {
        Self {
            bit: 0,
            byte: 0,
            buf: [0; MAX_MSG_LEN],
        }
    }

    pub fn bit(&self) -> u8 {
        self.bit
    }

    pub fn byte(&self) -> u8 {
        self.byte
    }

    pub fn buf(&self) -> &[u8; MAX_MSG_LEN] {
        &self.buf
    }

    pub fn current_bit(&self) -> bool {
        match self.buf.get(self.byte as usize) {
            Some(b) => (b >> (7 - self.bit)) & 1 == 1,
            None => false,
        }
    }

    /// ORs `val` into the current bit. Clearing a bit is not possible, callers start
    /// from a zeroed buffer.
    pub fn set_current_bit(&mut self, val: bool) {
        if !val {
            return;
        }
        if let Some(b) = self.buf.get_mut(self.byte as usize) {
            *b |= 1 << (7 - self.bit);
        }
    }

    pub fn advance_bit(&mut self) {
        if self.bit == 7 {
            if (self.byte as usize) < MAX_MSG_LEN {
                self.bit = 0;
                self.byte += 1;
            }
        } else {
            self.bit += 1;
        }
    }

    /// True exactly when the cursor sits on the first bit after `len` complete bytes.
    pub fn is_end_of_message(&self, len: u8) -> bool {
        self.bit == 0 && self.byte == len
    }

    /// Destination address from the header byte.
    pub fn dest(&self) -> u8 {
        self.buf[0] & 0x0f
    }

    pub fn current_byte(&self) -> u8 {
        self.buf.get(self.byte as usize).copied().unwrap_or(0)
    }

    /// Byte-level variant used by controllers that shift whole bytes.
    pub fn push_byte(&mut self, val: u8) {
        if let Some(b) = self.buf.get_mut(self.byte as usize) {
            *b = val;
            self.byte += 1;
            self.bit = 0;
        }
    }

    pub fn advance_byte(&mut self) {
        if (self.byte as usize) < MAX_MSG_LEN {
            self.byte += 1;
            self.bit = 0;
        }
    }

    /// Moves the cursor back to the first bit, keeping the contents.
    pub fn rewind(&mut self) {
        self.bit = 0;
        self.byte = 0;
    }

    /// Rewinds and zeroes the buffer.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Replaces the contents with `msg`, zero padded, and rewinds.
    pub fn load(&mut self, msg: &[u8]) {
        self.clear();
        let len = msg.len().min(MAX_MSG_LEN);
        self.buf[..len].copy_from_slice(&msg[..len]);
    }

    /// Completed bytes so far.
    pub fn received(&self) -> &[u8] {
        &self.buf[..self.byte as usize]
    }
}
