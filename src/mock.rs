//! Scriptable driver for port and host-command tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use crate::cec::{CecError, CecMessage, INVALID_ADDR};
use crate::cec_types::CecOpCode;
use crate::driver::CecDriver;
use crate::offline::{CecAction, Chipset, OfflinePolicy};

pub struct MockDriver {
    pub enabled: bool,
    pub addr: u8,
    pub sent: Vec<Vec<u8>>,
    pub inbox: VecDeque<CecMessage>,
    /// Returned by every fallible call while set.
    pub fail: Option<CecError>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: INVALID_ADDR,
            sent: Vec::new(),
            inbox: VecDeque::new(),
            fail: None,
        }
    }
}

impl MockDriver {
    pub fn deliver(&mut self, msg: &[u8]) {
        self.inbox.push_back(CecMessage::from_slice(msg).unwrap());
    }

    fn check(&self) -> Result<(), CecError> {
        match self.fail {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl CecDriver for MockDriver {
    fn init(&mut self) -> Result<(), CecError> {
        self.check()
    }

    fn get_enable(&self) -> bool {
        self.enabled
    }

    fn set_enable(&mut self, enable: bool) -> Result<(), CecError> {
        self.check()?;
        self.enabled = enable;
        Ok(())
    }

    fn get_logical_addr(&self) -> u8 {
        self.addr
    }

    fn set_logical_addr(&mut self, addr: u8) -> Result<(), CecError> {
        self.check()?;
        self.addr = addr;
        Ok(())
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), CecError> {
        self.check()?;
        self.sent.push(msg.to_vec());
        Ok(())
    }

    fn get_received_message(&mut self) -> Result<CecMessage, CecError> {
        self.check()?;
        self.inbox.pop_front().ok_or(CecError::Unavailable)
    }
}

/// AP whose power button turns it on.
#[derive(Default)]
pub struct MockChipset {
    on: AtomicBool,
    pub presses: AtomicU32,
}

impl MockChipset {
    /// A powered-off AP that lives as long as the ports referring to it.
    pub fn leak_off() -> &'static MockChipset {
        Box::leak(Box::default())
    }

    pub fn set_on(&self, on: bool) {
        self.on.store(on, Ordering::SeqCst);
    }
}

impl Chipset for MockChipset {
    fn is_on(&self) -> bool {
        self.on.load(Ordering::SeqCst)
    }

    fn power_button(&self) {
        self.presses.fetch_add(1, Ordering::SeqCst);
        self.set_on(true);
    }
}

pub const VIEW_ON_POLICY: &[OfflinePolicy] = &[
    OfflinePolicy {
        command: CecOpCode::IMAGE_VIEW_ON as u8,
        action: CecAction::PowerButton,
    },
    OfflinePolicy {
        command: CecOpCode::TEXT_VIEW_ON as u8,
        action: CecAction::PowerButton,
    },
];
