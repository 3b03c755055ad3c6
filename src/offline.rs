//! What to do with received frames while the AP is off and nobody reads the RX queue.

use crate::cec::{CecError, CecFrame};

/// Power state of the application processor, plus the one control the offline
/// policy needs.
pub trait Chipset: Sync {
    fn is_on(&self) -> bool;

    /// Presses the power button on the AP's behalf.
    fn power_button(&self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CecAction {
    PowerButton,
}

/// One entry of a port's offline table: frames carrying `command` trigger `action`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct OfflinePolicy {
    pub command: u8,
    pub action: CecAction,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Offline {
    /// The AP is off; the frame was consumed here.
    Handled,
    /// The AP is on and gets the frame.
    NotHandled,
}

/// Applies `policy` to `msg` if the AP is off.
///
/// Frames without an opcode, or with one the table does not list, are consumed
/// without an action. An empty message is `InvalidParam`.
pub fn process_offline_message(
    chipset: &dyn Chipset,
    policy: Option<&[OfflinePolicy]>,
    msg: &[u8],
) -> Result<Offline, CecError> {
    if chipset.is_on() {
        return Ok(Offline::NotHandled);
    }
    let frame = CecFrame::parse(msg).ok_or(CecError::InvalidParam)?;
    let (Some(policy), Some(opcode)) = (policy, frame.opcode) else {
        return Ok(Offline::Handled);
    };
    if let Some(entry) = policy.iter().find(|p| p.command == opcode) {
        match entry.action {
            CecAction::PowerButton => {
                info!("CEC: opcode {:?} while AP is off, pressing power button", opcode);
                chipset.power_button();
            }
        }
    }
    Ok(Offline::Handled)
}
