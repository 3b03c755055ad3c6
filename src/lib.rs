#![cfg_attr(not(test), no_std)]

// This must go first so the logging macros are visible to every module below.
mod fmt;

mod cec;
pub mod cec_types;

pub mod bitbang;
pub mod driver;
pub mod host;
pub mod it83xx;
pub mod offline;
pub mod port;
pub mod rx_queue;
pub mod timer;
pub mod timing;
pub mod transfer;

#[cfg(test)]
mod mock;
#[cfg(test)]
mod sim;

pub use cec::CecError;
pub use cec::CecFrame;
pub use cec::CecMessage;
pub use cec::LogicalAddress;
pub use cec::SignalFreeKind;
pub use cec::TaskEvent;
pub use cec::{BROADCAST_ADDR, INVALID_ADDR, MAX_MSG_LEN, MAX_RESENDS, UNREGISTERED_ADDR};

pub use bitbang::BitbangCec;
pub use driver::CecDriver;
pub use it83xx::It83xxCec;
pub use offline::{CecAction, Chipset, OfflinePolicy};
pub use port::{CecPort, CecPorts, MkbpCecEvents, TaskEvents};
pub use rx_queue::CecRxQueue;
pub use timer::{CaptureEdge, CaptureTimer};
pub use transfer::MsgTransfer;
