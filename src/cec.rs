use embassy_time::Duration;
use heapless::Vec;
use num_enum::IntoPrimitive;

use crate::timing::NOMINAL_BIT_PERIOD;

/// Longest CEC message: header, opcode and 14 operand bytes.
pub const MAX_MSG_LEN: usize = 16;
const MAX_CEC_OPERANDS: usize = MAX_MSG_LEN - 2;

pub const BROADCAST_ADDR: u8 = 15;
pub const UNREGISTERED_ADDR: u8 = 15;
/// Logical address of a port that has not been configured yet.
pub const INVALID_ADDR: u8 = 255;

/// Retransmissions after the first attempt before a send is reported failed.
pub const MAX_RESENDS: u8 = 5;

/// A raw CEC message as it travels between drivers, the RX queue and the host.
pub type CecMessage = Vec<u8, MAX_MSG_LEN>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CecError {
    /// The port is disabled or a transfer is already pending.
    Busy,
    /// No received message is waiting.
    Unavailable,
    InvalidParam,
    /// The RX queue has no room for the message.
    Overflow,
    InvalidPort,
}

/// Completion events a driver reports from interrupt context to its port task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskEvent {
    ReceivedData,
    Okay,
    Failed,
}

#[derive(Default, Copy, Clone, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LogicalAddress(pub u8);

impl LogicalAddress {
    pub fn is_broadcast(&self) -> bool {
        self.0 == BROADCAST_ADDR
    }

    pub fn broadcast() -> LogicalAddress {
        LogicalAddress(BROADCAST_ADDR)
    }
}

#[derive(Default, Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CecFrame {
    pub initiator: LogicalAddress,
    pub dest: LogicalAddress,
    pub opcode: Option<u8>,
    pub operands: Option<Vec<u8, MAX_CEC_OPERANDS>>,
}

impl CecFrame {
    /// Splits a raw message into header fields, opcode and operands.
    pub fn parse(msg: &[u8]) -> Option<CecFrame> {
        let (&header, rest) = msg.split_first()?;
        if rest.len() > MAX_CEC_OPERANDS + 1 {
            return None;
        }
        let (opcode, operands) = match rest.split_first() {
            Some((&opcode, operands)) if !operands.is_empty() => {
                (Some(opcode), Some(Vec::from_slice(operands).ok()?))
            }
            Some((&opcode, _)) => (Some(opcode), None),
            None => (None, None),
        };
        Some(CecFrame {
            initiator: LogicalAddress(header >> 4),
            dest: LogicalAddress(header & 0x0f),
            opcode,
            operands,
        })
    }

    pub fn to_message(&self) -> CecMessage {
        let mut msg = CecMessage::new();
        // Capacity is MAX_MSG_LEN and a frame holds at most that many bytes.
        let _ = msg.push((self.initiator.0 << 4) | (self.dest.0 & 0x0f));
        if let Some(opcode) = self.opcode {
            let _ = msg.push(opcode);
        }
        if let Some(operands) = &self.operands {
            let _ = msg.extend_from_slice(operands);
        }
        msg
    }

    pub fn is_polling_message(&self) -> bool {
        self.initiator == self.dest && self.opcode.is_none() && self.operands.is_none()
    }
}

/// Which signal free time an initiator has to observe before driving a start bit.
#[repr(u8)]
#[derive(IntoPrimitive, Clone, Copy, PartialEq, Eq, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalFreeKind {
    Retransmit = 3,
    NewInitiator = 5,
    PresentInitiator = 7,
}

impl SignalFreeKind {
    pub fn select(resends: u8, present_initiator: bool) -> SignalFreeKind {
        if resends > 0 {
            SignalFreeKind::Retransmit
        } else if present_initiator {
            SignalFreeKind::PresentInitiator
        } else {
            SignalFreeKind::NewInitiator
        }
    }

    /// Free time counted from the end of the last bit's low phase, so one nominal
    /// period is already behind us when the counting starts.
    pub fn required_free_duration(&self) -> Duration {
        NOMINAL_BIT_PERIOD * (u8::from(*self) as u32 - 1)
    }
}
