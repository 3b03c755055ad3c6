use crate::cec::{CecError, CecMessage};

/// Operations every CEC controller backend offers to its port.
///
/// Implementations are shared between interrupt handlers and the port task, so the
/// port wraps them in a critical-section mutex. None of the methods block.
pub trait CecDriver {
    fn init(&mut self) -> Result<(), CecError>;

    fn get_enable(&self) -> bool;

    /// Idempotent: enabling an enabled port is a no-op.
    fn set_enable(&mut self, enable: bool) -> Result<(), CecError>;

    fn get_logical_addr(&self) -> u8;

    fn set_logical_addr(&mut self, addr: u8) -> Result<(), CecError>;

    /// Queues `msg` for transmission. At most one send may be in flight; completion is
    /// reported as [`TaskEvent::Okay`](crate::TaskEvent::Okay) or
    /// [`TaskEvent::Failed`](crate::TaskEvent::Failed).
    fn send(&mut self, msg: &[u8]) -> Result<(), CecError>;

    /// Hands out the last received message and clears it.
    fn get_received_message(&mut self) -> Result<CecMessage, CecError>;
}

pub(crate) fn check_send_len(msg: &[u8]) -> Result<(), CecError> {
    if msg.is_empty() || msg.len() > crate::MAX_MSG_LEN {
        return Err(CecError::InvalidParam);
    }
    Ok(())
}
