//! Boundary towards the application processor: the CEC host commands and the
//! event word that tells the AP which port has something for it.

use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::cec::{CecError, CecMessage, BROADCAST_ADDR, INVALID_ADDR, MAX_MSG_LEN};
use crate::driver::CecDriver;
use crate::port::CecPorts;

/// Response codes as the host protocol numbers them.
#[repr(u8)]
#[derive(IntoPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum EcStatus {
    Error = 2,
    InvalidParam = 3,
    Unavailable = 9,
    Busy = 16,
}

#[repr(u8)]
#[derive(TryFromPrimitive, IntoPrimitive, Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CecCommand {
    Enable = 0,
    LogicalAddress = 1,
}

impl<D: CecDriver, const N: usize> CecPorts<D, N> {
    pub fn port_count(&self) -> usize {
        N
    }

    /// Queues `msg` for transmission on `port`.
    pub fn cec_write(&self, port: usize, msg: &[u8]) -> Result<(), EcStatus> {
        let port = self.port(port).map_err(|_| EcStatus::InvalidParam)?;
        if msg.is_empty() || msg.len() > MAX_MSG_LEN {
            return Err(EcStatus::InvalidParam);
        }
        port.with_driver(|d| d.send(msg)).map_err(|e| {
            debug!("CEC: write rejected: {:?}", e);
            EcStatus::Busy
        })
    }

    /// Oldest message the port has received and not yet handed out.
    pub fn cec_read(&self, port: usize) -> Result<CecMessage, EcStatus> {
        let port = self.port(port).map_err(|_| EcStatus::InvalidParam)?;
        port.pop_message().map_err(|_| EcStatus::Unavailable)
    }

    pub fn cec_set(&self, port: usize, cmd: u8, val: u8) -> Result<(), EcStatus> {
        let port = self.port(port).map_err(|_| EcStatus::InvalidParam)?;
        let cmd = CecCommand::try_from(cmd).map_err(|_| EcStatus::InvalidParam)?;
        let res = match cmd {
            CecCommand::Enable => {
                if val > 1 {
                    return Err(EcStatus::InvalidParam);
                }
                port.with_driver(|d| d.set_enable(val == 1))
            }
            CecCommand::LogicalAddress => {
                if val > BROADCAST_ADDR && val != INVALID_ADDR {
                    return Err(EcStatus::InvalidParam);
                }
                port.with_driver(|d| d.set_logical_addr(val))
            }
        };
        res.map_err(driver_error)
    }

    pub fn cec_get(&self, port: usize, cmd: u8) -> Result<u8, EcStatus> {
        let port = self.port(port).map_err(|_| EcStatus::InvalidParam)?;
        let cmd = CecCommand::try_from(cmd).map_err(|_| EcStatus::InvalidParam)?;
        Ok(match cmd {
            CecCommand::Enable => port.with_driver(|d| d.get_enable()) as u8,
            CecCommand::LogicalAddress => port.with_driver(|d| d.get_logical_addr()),
        })
    }

    /// Takes the pending events of the first port that has any, packed into one word.
    pub fn next_event(&self) -> Option<u32> {
        self.iter().enumerate().find_map(|(index, port)| {
            let events = port.take_mkbp_events();
            (!events.is_empty()).then(|| events.pack(index))
        })
    }
}

fn driver_error(e: CecError) -> EcStatus {
    debug!("CEC: driver error {:?}", e);
    EcStatus::Error
}
