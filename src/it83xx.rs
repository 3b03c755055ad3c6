//! CEC driver for controllers that shift whole bytes in hardware (ITE IT83xx style).
//!
//! The peripheral handles bit timing and ACK generation; firmware sees one interrupt per
//! header or data byte plus bus errors, and paces free time with a software timer.

use bitflags::bitflags;
use embassy_time::Duration;

use crate::cec::{CecError, CecMessage, SignalFreeKind, TaskEvent};
use crate::cec::{BROADCAST_ADDR, INVALID_ADDR, MAX_MSG_LEN, MAX_RESENDS, UNREGISTERED_ADDR};
use crate::driver::{check_send_len, CecDriver};
use crate::transfer::MsgTransfer;

bitflags! {
    /// Interrupt status register, write-one-to-clear.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct IntStatus: u8 {
        const BUS_TIMING_ERROR = 1 << 0;
        const ARBITRATION_LOST = 1 << 1;
        const LOW_DRIVE_ERROR = 1 << 2;
        const SHORT_PULSE = 1 << 3;
        /// A data byte went out or came in.
        const DATA_BYTE_DONE = 1 << 4;
        /// A header byte addressed to our logical address, or broadcast, came in.
        const HEADER_RECEIVED = 1 << 5;

        const BUS_ERRORS = Self::BUS_TIMING_ERROR.bits()
            | Self::ARBITRATION_LOST.bits()
            | Self::LOW_DRIVE_ERROR.bits()
            | Self::SHORT_PULSE.bits();
    }
}

bitflags! {
    /// Operation status register.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpStatus: u8 {
        /// ACK bit as seen on the line: set means nobody pulled it low.
        const ACK_BIT = 1 << 0;
        /// EOM bit of the last byte.
        const EOM_BIT = 1 << 1;
    }
}

/// Register-level access the driver needs from the peripheral.
pub trait It83xxRegisters {
    fn init(&mut self);

    fn set_enable(&mut self, enable: bool);

    /// Programs the 4-bit follower address used for header matching and ACKs.
    fn set_logical_addr(&mut self, addr: u8);

    /// Reads and clears the pending interrupt causes.
    fn take_status(&mut self) -> IntStatus;

    fn op_status(&mut self) -> OpStatus;

    fn header(&mut self) -> u8;

    fn data(&mut self) -> u8;

    /// Loads the next byte to shift out together with its EOM bit.
    fn write_data(&mut self, byte: u8, eom: bool);

    /// Starts a frame with the byte loaded by `write_data`.
    fn start_transmit(&mut self);

    /// Arms the software timer that reports [`It83xxCec::free_time_elapsed`].
    fn schedule_free_time(&mut self, after: Duration);

    fn cancel_free_time(&mut self);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Disabled,
    Idle,
    FreeTime,
    Transmitting,
    Receiving,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Event {
    BusError,
    ByteDone,
    HeaderReceived,
    Transmit,
    FreeTimeElapsed,
}

#[derive(Default)]
struct Transmit {
    transfer: MsgTransfer,
    len: u8,
    resends: u8,
    present_initiator: bool,
}

#[derive(Default)]
struct Receive {
    transfer: MsgTransfer,
    received: MsgTransfer,
    received_available: bool,
}

pub struct It83xxCec<R> {
    regs: R,
    state: State,
    addr: u8,
    tx: Transmit,
    rx: Receive,
    event: Option<TaskEvent>,
}

impl<R: It83xxRegisters> It83xxCec<R> {
    pub fn new(regs: R) -> Self {
        Self {
            regs,
            state: State::Disabled,
            addr: UNREGISTERED_ADDR,
            tx: Transmit::default(),
            rx: Receive::default(),
            event: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// CEC interrupt handler.
    pub fn on_interrupt(&mut self) -> Option<TaskEvent> {
        let status = self.regs.take_status();
        if status.intersects(IntStatus::BUS_ERRORS) {
            self.handle(Event::BusError);
        } else {
            if status.contains(IntStatus::HEADER_RECEIVED) {
                self.handle(Event::HeaderReceived);
            }
            if status.contains(IntStatus::DATA_BYTE_DONE) {
                self.handle(Event::ByteDone);
            }
        }
        self.event.take()
    }

    /// Free-time timer handler.
    pub fn free_time_elapsed(&mut self) -> Option<TaskEvent> {
        self.handle(Event::FreeTimeElapsed);
        self.event.take()
    }

    fn handle(&mut self, event: Event) {
        trace!("CEC: {:?} in {:?}", event, self.state);
        match (self.state, event) {
            (State::Disabled, _) => {}
            (_, Event::BusError) => {
                debug!("CEC: bus error in {:?}", self.state);
                self.enter_state(State::Idle);
            }
            (State::Idle, Event::Transmit) => self.enter_state(State::FreeTime),
            (State::FreeTime, Event::FreeTimeElapsed) => self.enter_state(State::Transmitting),
            (State::Idle | State::FreeTime | State::Receiving, Event::HeaderReceived) => {
                self.header_received()
            }
            (State::Transmitting, Event::ByteDone) => self.transmit_done(),
            (State::Receiving, Event::ByteDone) => self.receive_done(),
            _ => {}
        }
    }

    fn enter_state(&mut self, new_state: State) {
        self.state = new_state;
        match new_state {
            State::Disabled => {
                self.regs.cancel_free_time();
                self.tx = Transmit::default();
                self.rx = Receive::default();
            }
            State::Idle => {
                self.regs.cancel_free_time();
                self.tx.transfer.rewind();
                self.rx.transfer.clear();
                if self.tx.len > 0 {
                    self.enter_state(State::FreeTime);
                }
            }
            State::FreeTime => {
                let kind = SignalFreeKind::select(self.tx.resends, self.tx.present_initiator);
                self.regs.schedule_free_time(kind.required_free_duration());
            }
            State::Transmitting => {
                self.tx.present_initiator = true;
                self.tx.transfer.rewind();
                self.load_tx_byte();
                self.regs.start_transmit();
            }
            State::Receiving => {
                self.tx.present_initiator = false;
                self.regs.cancel_free_time();
            }
        }
    }

    fn load_tx_byte(&mut self) {
        let byte = self.tx.transfer.current_byte();
        let eom = self.tx.transfer.byte() + 1 == self.tx.len;
        self.regs.write_data(byte, eom);
    }

    fn transmit_done(&mut self) {
        let mut ack = !self.regs.op_status().contains(OpStatus::ACK_BIT);
        if self.tx.transfer.dest() == BROADCAST_ADDR {
            ack = !ack;
        }
        if ack {
            self.tx.transfer.advance_byte();
            if self.tx.transfer.byte() == self.tx.len {
                self.finish_send(TaskEvent::Okay);
            } else {
                self.load_tx_byte();
            }
        } else if self.tx.resends < MAX_RESENDS {
            self.tx.resends += 1;
            trace!("CEC: no ack, resend {}", self.tx.resends);
            self.enter_state(State::FreeTime);
        } else {
            self.finish_send(TaskEvent::Failed);
        }
    }

    fn finish_send(&mut self, event: TaskEvent) {
        debug!("CEC: send finished {:?} after {} resends", event, self.tx.resends);
        self.tx.len = 0;
        self.tx.resends = 0;
        self.enter_state(State::Idle);
        self.event = Some(event);
    }

    fn header_received(&mut self) {
        let header = self.regs.header();
        let dest = header & 0x0f;
        self.tx.present_initiator = false;
        if dest != self.addr && dest != BROADCAST_ADDR {
            trace!("CEC: header {} not for us", header);
            self.enter_state(State::Idle);
            return;
        }
        self.enter_state(State::Receiving);
        self.rx.transfer.clear();
        self.rx.transfer.push_byte(header);
        if self.regs.op_status().contains(OpStatus::EOM_BIT) {
            self.finish_receive();
        }
    }

    fn receive_done(&mut self) {
        let byte = self.regs.data();
        self.rx.transfer.push_byte(byte);
        if self.regs.op_status().contains(OpStatus::EOM_BIT)
            || self.rx.transfer.byte() as usize >= MAX_MSG_LEN
        {
            self.finish_receive();
        }
    }

    fn finish_receive(&mut self) {
        if self.rx.received_available {
            debug!("CEC: overwriting unread message");
        }
        self.rx.received = self.rx.transfer;
        self.rx.received_available = true;
        self.event = Some(TaskEvent::ReceivedData);
        self.enter_state(State::Idle);
    }

    #[cfg(test)]
    fn regs(&mut self) -> &mut R {
        &mut self.regs
    }
}

impl<R: It83xxRegisters> CecDriver for It83xxCec<R> {
    fn init(&mut self) -> Result<(), CecError> {
        self.regs.init();
        self.addr = UNREGISTERED_ADDR;
        self.regs.set_logical_addr(UNREGISTERED_ADDR);
        Ok(())
    }

    fn get_enable(&self) -> bool {
        self.state != State::Disabled
    }

    fn set_enable(&mut self, enable: bool) -> Result<(), CecError> {
        if enable == self.get_enable() {
            return Ok(());
        }
        if enable {
            self.regs.set_enable(true);
            self.enter_state(State::Idle);
            info!("CEC enabled");
        } else {
            self.regs.set_enable(false);
            self.enter_state(State::Disabled);
            info!("CEC disabled");
        }
        Ok(())
    }

    fn get_logical_addr(&self) -> u8 {
        self.addr
    }

    fn set_logical_addr(&mut self, addr: u8) -> Result<(), CecError> {
        // The follower address register is four bits wide.
        let addr = if addr == INVALID_ADDR {
            UNREGISTERED_ADDR
        } else {
            addr
        };
        self.addr = addr;
        self.regs.set_logical_addr(addr);
        info!("CEC address set to {}", addr);
        Ok(())
    }

    fn send(&mut self, msg: &[u8]) -> Result<(), CecError> {
        check_send_len(msg)?;
        if self.state == State::Disabled || self.tx.len != 0 {
            return Err(CecError::Busy);
        }
        self.tx.transfer.load(msg);
        self.tx.len = msg.len() as u8;
        debug!("CEC send {:?}", msg);
        self.handle(Event::Transmit);
        Ok(())
    }

    fn get_received_message(&mut self) -> Result<CecMessage, CecError> {
        if !self.rx.received_available {
            return Err(CecError::Unavailable);
        }
        self.rx.received_available = false;
        CecMessage::from_slice(self.rx.received.received()).map_err(|_| CecError::Overflow)
    }
}
