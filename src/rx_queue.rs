use crate::cec::{CecError, CecMessage, MAX_MSG_LEN};

/// Default RX queue size in bytes.
pub const CEC_RX_BUFFER_SIZE: usize = 20;

/// Ring buffer of received messages, each stored as a length byte followed by the
/// message bytes. One byte stays unused so a full queue can be told from an empty one.
pub struct CecRxQueue<const N: usize = CEC_RX_BUFFER_SIZE> {
    buf: [u8; N],
    read: usize,
    write: usize,
}

impl<const N: usize> Default for CecRxQueue<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> CecRxQueue<N> {
    /// A full-length message plus its length byte and the unused byte must fit.
    const FITS_LONGEST: () = assert!(N >= MAX_MSG_LEN + 2, "RX queue too small");

    pub const fn new() -> Self {
        let () = Self::FITS_LONGEST;
        Self {
            buf: [0; N],
            read: 0,
            write: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    fn used(&self) -> usize {
        (self.write + N - self.read) % N
    }

    fn free(&self) -> usize {
        N - 1 - self.used()
    }

    fn put(&mut self, byte: u8) {
        self.buf[self.write] = byte;
        self.write = (self.write + 1) % N;
    }

    fn take(&mut self) -> u8 {
        let byte = self.buf[self.read];
        self.read = (self.read + 1) % N;
        byte
    }

    pub fn push(&mut self, msg: &[u8]) -> Result<(), CecError> {
        if msg.is_empty() || msg.len() > MAX_MSG_LEN {
            return Err(CecError::InvalidParam);
        }
        if msg.len() + 1 > self.free() {
            return Err(CecError::Overflow);
        }
        self.put(msg.len() as u8);
        for &byte in msg {
            self.put(byte);
        }
        Ok(())
    }

    /// Removes the oldest message. A length byte that cannot be right means the queue
    /// is corrupt; it is flushed and the pop fails.
    pub fn pop(&mut self) -> Result<CecMessage, CecError> {
        if self.is_empty() {
            return Err(CecError::Unavailable);
        }
        let len = self.buf[self.read] as usize;
        if len == 0 || len > MAX_MSG_LEN || len + 1 > self.used() {
            warn!("CEC: corrupt RX queue entry of length {}, flushing", len);
            self.flush();
            return Err(CecError::InvalidParam);
        }
        self.take();
        let mut msg = CecMessage::new();
        for _ in 0..len {
            let byte = self.take();
            // len <= MAX_MSG_LEN, the capacity of msg
            let _ = msg.push(byte);
        }
        Ok(msg)
    }

    pub fn flush(&mut self) {
        self.read = self.write;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_in_order() {
        let mut q: CecRxQueue = CecRxQueue::new();
        assert_eq!(q.pop(), Err(CecError::Unavailable));
        q.push(&[0x04, 0x36]).unwrap();
        q.push(&[0x0f, 0x85]).unwrap();
        assert_eq!(q.pop().unwrap().as_slice(), &[0x04, 0x36]);
        assert_eq!(q.pop().unwrap().as_slice(), &[0x0f, 0x85]);
        assert!(q.is_empty());
        assert_eq!(q.pop(), Err(CecError::Unavailable));
    }

    #[test]
    fn rejects_bad_lengths() {
        let mut q: CecRxQueue = CecRxQueue::new();
        assert_eq!(q.push(&[]), Err(CecError::InvalidParam));
        assert_eq!(q.push(&[0; MAX_MSG_LEN + 1]), Err(CecError::InvalidParam));
        q.push(&[0; MAX_MSG_LEN]).unwrap();
        assert_eq!(q.pop().unwrap().len(), MAX_MSG_LEN);
    }

    #[test]
    fn wraps_around_buffer_end() {
        let mut q: CecRxQueue = CecRxQueue::new();
        for i in 0..50u8 {
            let msg = [i, i.wrapping_mul(7), 0xa5, i ^ 0x5a, 0x11, 0x22, 0x33];
            q.push(&msg).unwrap();
            q.push(&msg[..3]).unwrap();
            assert_eq!(q.pop().unwrap().as_slice(), &msg);
            assert_eq!(q.pop().unwrap().as_slice(), &msg[..3]);
            assert!(q.is_empty());
        }
    }

    #[test]
    fn overflow_after_capacity() {
        for size in 1..=MAX_MSG_LEN {
            let mut q: CecRxQueue = CecRxQueue::new();
            let msg = [0x4f; MAX_MSG_LEN];
            let fits = (CEC_RX_BUFFER_SIZE - 1) / (size + 1);
            for _ in 0..fits {
                q.push(&msg[..size]).unwrap();
            }
            assert_eq!(q.push(&msg[..size]), Err(CecError::Overflow));
            for _ in 0..fits {
                assert_eq!(q.pop().unwrap().len(), size);
            }
            assert!(q.is_empty());
        }
    }

    #[test]
    fn smallest_queue_holds_one_long_message() {
        let mut q: CecRxQueue<{ MAX_MSG_LEN + 2 }> = CecRxQueue::new();
        q.push(&[0x4f; MAX_MSG_LEN]).unwrap();
        assert_eq!(q.push(&[0x4f]), Err(CecError::Overflow));
        assert_eq!(q.pop().unwrap().len(), MAX_MSG_LEN);
        q.push(&[0x4f; MAX_MSG_LEN]).unwrap();
        assert_eq!(q.pop().unwrap().len(), MAX_MSG_LEN);
    }

    #[test]
    fn flush_empties() {
        let mut q: CecRxQueue<64> = CecRxQueue::new();
        q.push(&[1, 2, 3]).unwrap();
        q.push(&[4]).unwrap();
        q.flush();
        assert!(q.is_empty());
        q.push(&[5]).unwrap();
        assert_eq!(q.pop().unwrap().as_slice(), &[5]);
    }

    #[test]
    fn corrupt_length_flushes() {
        let mut q: CecRxQueue = CecRxQueue::new();
        q.push(&[0x04, 0x36]).unwrap();
        q.push(&[0x04, 0x04]).unwrap();
        q.buf[q.read] = (MAX_MSG_LEN + 1) as u8;
        assert_eq!(q.pop(), Err(CecError::InvalidParam));
        assert!(q.is_empty());

        q.push(&[0x04, 0x36]).unwrap();
        q.buf[q.read] = 0;
        assert_eq!(q.pop(), Err(CecError::InvalidParam));
        assert!(q.is_empty());
    }
}
