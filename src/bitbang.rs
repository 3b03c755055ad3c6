//! Software CEC controller built from an open-drain GPIO and a capture timer.
//!
//! Every interrupt, edge capture or timeout, moves the state machine one step. When a
//! state is entered the line level is applied first and the timer is armed second, so
//! the time the next capture measures starts at the line change.

use core::convert::Infallible;

use embassy_time::Duration;
use embedded_hal_1::digital::{InputPin, OutputPin};

use crate::cec::{CecError, CecMessage, SignalFreeKind, TaskEvent};
use crate::cec::{BROADCAST_ADDR, INVALID_ADDR, MAX_MSG_LEN, MAX_RESENDS};
use crate::driver::{check_send_len, CecDriver};
use crate::timer::{CaptureEdge, CaptureTimer};
use crate::timing::{self, data_high, data_low, data_window, DATA_ONE, DATA_ZERO, START_BIT};
use crate::transfer::MsgTransfer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum State {
    Disabled,
    Idle,
    InitiatorFreeTime,
    InitiatorStartLow,
    InitiatorStartHigh,
    InitiatorHeaderInitLow,
    InitiatorHeaderInitHigh,
    InitiatorHeaderDestLow,
    InitiatorHeaderDestHigh,
    InitiatorDataLow,
    InitiatorDataHigh,
    InitiatorEomLow,
    InitiatorEomHigh,
    InitiatorAckLow,
    InitiatorAckHigh,
    InitiatorAckVerify,
    FollowerStartLow,
    FollowerStartHigh,
    FollowerDebounce,
    FollowerHeaderInitLow,
    FollowerHeaderInitHigh,
    FollowerHeaderDestLow,
    FollowerHeaderDestHigh,
    FollowerEomLow,
    FollowerEomHigh,
    FollowerAckLow,
    FollowerAckVerify,
    FollowerAckFinish,
    FollowerDataLow,
    FollowerDataHigh,
}

impl State {
    /// High phase that follows a follower data low phase.
    fn high_phase(self) -> State {
        match self {
            State::FollowerHeaderInitLow => State::FollowerHeaderInitHigh,
            State::FollowerHeaderDestLow => State::FollowerHeaderDestHigh,
            State::FollowerDataLow => State::FollowerDataHigh,
            other => other,
        }
    }
}

#[derive(Default)]
struct Receive {
    transfer: MsgTransfer,
    eom: bool,
    broadcast_nak: bool,
    /// Length of the low phase of the bit being received.
    low_time: Duration,
    debounce_count: u8,
    received: MsgTransfer,
    received_available: bool,
}

#[derive(Default)]
struct Transmit {
    transfer: MsgTransfer,
    /// Zero when nothing is queued.
    len: u8,
    resends: u8,
    ack: bool,
    /// We were the last node to drive a start bit.
    present_initiator: bool,
}

pub struct BitbangCec<P, T> {
    pin: P,
    timer: T,
    state: State,
    addr: u8,
    rx: Receive,
    tx: Transmit,
    event: Option<TaskEvent>,
}

impl<P, T> BitbangCec<P, T>
where
    P: OutputPin<Error = Infallible> + InputPin<Error = Infallible>,
    T: CaptureTimer,
{
    pub fn new(pin: P, timer: T) -> Self {
        Self {
            pin,
            timer,
            state: State::Disabled,
            addr: INVALID_ADDR,
            rx: Receive::default(),
            tx: Transmit::default(),
            event: None,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    fn line_is_low(&mut self) -> bool {
        match self.pin.is_low() {
            Ok(low) => low,
            Err(e) => match e {},
        }
    }

    fn drive(&mut self, high: bool) {
        let res = if high {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(e) = res {
            match e {}
        }
    }

    fn enter_state(&mut self, new_state: State) {
        use State::*;

        let mut line = None;
        let mut arm: Option<(CaptureEdge, Option<Duration>)> = None;

        self.state = new_state;
        match new_state {
            Disabled => {
                line = Some(true);
                self.rx = Receive::default();
                self.tx = Transmit::default();
            }
            Idle => {
                self.tx.transfer.rewind();
                self.rx.transfer.rewind();
                if self.tx.len > 0 {
                    return self.enter_state(InitiatorFreeTime);
                }
                line = Some(true);
                arm = Some((CaptureEdge::Falling, None));
            }
            InitiatorFreeTime => {
                let kind = SignalFreeKind::select(self.tx.resends, self.tx.present_initiator);
                line = Some(true);
                arm = Some((CaptureEdge::Falling, Some(kind.required_free_duration())));
            }
            InitiatorStartLow => {
                self.tx.present_initiator = true;
                self.tx.transfer.rewind();
                line = Some(false);
                arm = Some((CaptureEdge::None, Some(timing::START_BIT_LOW)));
            }
            InitiatorStartHigh => {
                line = Some(true);
                arm = Some((CaptureEdge::Falling, Some(timing::START_BIT_HIGH)));
            }
            InitiatorHeaderInitLow | InitiatorHeaderDestLow | InitiatorDataLow => {
                line = Some(false);
                arm = Some((CaptureEdge::None, Some(data_low(self.tx.transfer.current_bit()))));
            }
            InitiatorHeaderInitHigh => {
                line = Some(true);
                arm = Some((
                    CaptureEdge::Falling,
                    Some(data_high(self.tx.transfer.current_bit())),
                ));
            }
            InitiatorHeaderDestHigh | InitiatorDataHigh => {
                line = Some(true);
                arm = Some((CaptureEdge::None, Some(data_high(self.tx.transfer.current_bit()))));
            }
            InitiatorEomLow => {
                let eom = self.tx.transfer.is_end_of_message(self.tx.len);
                line = Some(false);
                arm = Some((CaptureEdge::None, Some(data_low(eom))));
            }
            InitiatorEomHigh => {
                let eom = self.tx.transfer.is_end_of_message(self.tx.len);
                line = Some(true);
                arm = Some((CaptureEdge::None, Some(data_high(eom))));
            }
            InitiatorAckLow => {
                line = Some(false);
                arm = Some((CaptureEdge::None, Some(timing::DATA_ONE_LOW)));
            }
            InitiatorAckHigh => {
                line = Some(true);
                arm = Some((CaptureEdge::None, Some(timing::ACK_HIGH_SAMPLE)));
            }
            InitiatorAckVerify => {
                // A follower acknowledges a directly addressed byte by holding the line
                // low; for broadcasts a low line means somebody rejected it.
                let mut ack = self.line_is_low();
                if self.tx.transfer.dest() == BROADCAST_ADDR {
                    ack = !ack;
                }
                self.tx.ack = ack;
                arm = Some((CaptureEdge::None, Some(timing::ACK_SAMPLE_TO_END)));
            }
            FollowerStartLow => {
                self.tx.present_initiator = false;
                self.rx.transfer.clear();
                arm = Some((CaptureEdge::Rising, Some(timing::CAP_START_LOW)));
            }
            FollowerStartHigh => {
                self.rx.debounce_count = 0;
                arm = Some((CaptureEdge::Falling, Some(timing::CAP_START_HIGH)));
            }
            FollowerDebounce => {
                self.timer.debounce_enable();
                let wait = if self.rx.debounce_count >= timing::DEBOUNCE_CUTOFF {
                    timing::DEBOUNCE_WAIT_LONG
                } else {
                    self.rx.debounce_count += 1;
                    timing::DEBOUNCE_WAIT_SHORT
                };
                arm = Some((CaptureEdge::None, Some(wait)));
            }
            FollowerHeaderInitLow | FollowerHeaderDestLow | FollowerEomLow | FollowerDataLow => {
                arm = Some((CaptureEdge::Rising, Some(timing::CAP_DATA_LOW)));
            }
            FollowerHeaderInitHigh | FollowerHeaderDestHigh | FollowerEomHigh
            | FollowerDataHigh => {
                arm = Some((CaptureEdge::Falling, Some(timing::CAP_DATA_HIGH)));
            }
            FollowerAckLow => {
                let dest = self.rx.transfer.dest();
                if dest == self.addr && dest != BROADCAST_ADDR {
                    line = Some(false);
                }
                arm = Some((CaptureEdge::None, Some(timing::NOMINAL_SAMPLE_TIME)));
            }
            FollowerAckVerify => {
                self.rx.broadcast_nak =
                    self.rx.transfer.dest() == BROADCAST_ADDR && self.line_is_low();
                arm = Some((CaptureEdge::None, Some(timing::FOLLOWER_ACK_HOLD)));
            }
            FollowerAckFinish => {
                line = Some(true);
                if self.rx.eom || self.rx.transfer.byte() as usize >= MAX_MSG_LEN {
                    let dest = self.rx.transfer.dest();
                    if dest == self.addr || dest == BROADCAST_ADDR {
                        self.publish_received();
                    }
                    arm = Some((CaptureEdge::None, Some(timing::DATA_ZERO_HIGH)));
                } else {
                    arm = Some((CaptureEdge::Falling, Some(timing::CAP_DATA_HIGH)));
                }
            }
        }

        if let Some(high) = line {
            self.drive(high);
        }
        match arm {
            Some((edge, timeout)) => self.timer.start(edge, timeout),
            None if new_state == Disabled => self.timer.stop(),
            None => {}
        }
    }

    fn publish_received(&mut self) {
        if self.rx.received_available {
            debug!("CEC: overwriting unread message");
        }
        self.rx.received = self.rx.transfer;
        self.rx.received_available = true;
        self.event = Some(TaskEvent::ReceivedData);
    }

    fn finish_send(&mut self, event: TaskEvent) {
        debug!("CEC: send finished {:?} after {} resends", event, self.tx.resends);
        self.tx.len = 0;
        self.tx.resends = 0;
        self.enter_state(State::Idle);
        self.event = Some(event);
    }

    fn on_transmit(&mut self) {
        if self.state == State::Idle {
            self.enter_state(State::InitiatorFreeTime);
        }
    }

    /// Timer expired without the armed edge. Returns the event to post to the port task.
    pub fn on_timeout(&mut self) -> Option<TaskEvent> {
        use State::*;

        match self.state {
            Disabled | Idle => {}
            InitiatorFreeTime => self.enter_state(InitiatorStartLow),
            InitiatorStartLow => self.enter_state(InitiatorStartHigh),
            InitiatorStartHigh => self.enter_state(InitiatorHeaderInitLow),
            InitiatorHeaderInitLow => self.enter_state(InitiatorHeaderInitHigh),
            InitiatorHeaderInitHigh => {
                self.tx.transfer.advance_bit();
                if self.tx.transfer.bit() == 4 {
                    self.enter_state(InitiatorHeaderDestLow);
                } else {
                    self.enter_state(InitiatorHeaderInitLow);
                }
            }
            InitiatorHeaderDestLow => self.enter_state(InitiatorHeaderDestHigh),
            InitiatorHeaderDestHigh => {
                self.tx.transfer.advance_bit();
                if self.tx.transfer.byte() == 1 {
                    self.enter_state(InitiatorEomLow);
                } else {
                    self.enter_state(InitiatorHeaderDestLow);
                }
            }
            InitiatorDataLow => self.enter_state(InitiatorDataHigh),
            InitiatorDataHigh => {
                self.tx.transfer.advance_bit();
                if self.tx.transfer.bit() == 0 {
                    self.enter_state(InitiatorEomLow);
                } else {
                    self.enter_state(InitiatorDataLow);
                }
            }
            InitiatorEomLow => self.enter_state(InitiatorEomHigh),
            InitiatorEomHigh => self.enter_state(InitiatorAckLow),
            InitiatorAckLow => self.enter_state(InitiatorAckHigh),
            InitiatorAckHigh => self.enter_state(InitiatorAckVerify),
            InitiatorAckVerify => {
                if self.tx.ack {
                    if self.tx.transfer.is_end_of_message(self.tx.len) {
                        self.finish_send(TaskEvent::Okay);
                    } else {
                        self.enter_state(InitiatorDataLow);
                    }
                } else if self.tx.resends < MAX_RESENDS {
                    self.tx.resends += 1;
                    trace!("CEC: no ack, resend {}", self.tx.resends);
                    self.enter_state(InitiatorFreeTime);
                } else {
                    self.finish_send(TaskEvent::Failed);
                }
            }
            FollowerAckLow => self.enter_state(FollowerAckVerify),
            FollowerAckVerify => {
                if self.rx.broadcast_nak {
                    self.enter_state(Idle);
                } else {
                    self.enter_state(FollowerAckFinish);
                }
            }
            FollowerDebounce => {
                self.timer.debounce_disable();
                self.enter_state(Idle);
            }
            FollowerStartLow | FollowerStartHigh | FollowerHeaderInitLow
            | FollowerHeaderInitHigh | FollowerHeaderDestLow | FollowerHeaderDestHigh
            | FollowerEomLow | FollowerEomHigh | FollowerAckFinish | FollowerDataLow
            | FollowerDataHigh => {
                if self.state != FollowerAckFinish {
                    trace!("CEC: follower timeout in {:?}", self.state);
                }
                self.enter_state(Idle);
            }
        }
        self.event.take()
    }

    /// The armed edge was seen on the line.
    pub fn on_capture(&mut self) -> Option<TaskEvent> {
        use State::*;

        let t = self.timer.elapsed();
        match self.state {
            Idle => self.enter_state(FollowerStartLow),
            InitiatorFreeTime | InitiatorStartHigh | InitiatorHeaderInitHigh => {
                // Another initiator pulled the line; follow its frame and retry later.
                debug!("CEC: lost arbitration in {:?}", self.state);
                self.tx.transfer.rewind();
                self.enter_state(FollowerStartLow);
            }
            FollowerStartLow => {
                if START_BIT.valid_low(t) {
                    self.rx.low_time = t;
                    self.enter_state(FollowerStartHigh);
                } else if t < timing::DEBOUNCE_LIMIT {
                    self.enter_state(FollowerDebounce);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerStartHigh => {
                if START_BIT.valid_high(self.rx.low_time, t) {
                    self.enter_state(FollowerHeaderInitLow);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerHeaderInitLow | FollowerHeaderDestLow | FollowerDataLow => {
                let bit = if DATA_ZERO.valid_low(t) {
                    false
                } else if DATA_ONE.valid_low(t) {
                    true
                } else {
                    self.enter_state(Idle);
                    return self.event.take();
                };
                self.rx.low_time = t;
                self.rx.transfer.set_current_bit(bit);
                self.enter_state(self.state.high_phase());
            }
            FollowerHeaderInitHigh | FollowerHeaderDestHigh | FollowerDataHigh => {
                let bit = self.rx.transfer.current_bit();
                if !data_window(bit).valid_high(self.rx.low_time, t) {
                    self.enter_state(Idle);
                    return self.event.take();
                }
                self.rx.transfer.advance_bit();
                let next = match self.state {
                    FollowerHeaderInitHigh if self.rx.transfer.bit() == 4 => {
                        FollowerHeaderDestLow
                    }
                    FollowerHeaderInitHigh => FollowerHeaderInitLow,
                    _ if self.rx.transfer.bit() == 0 => FollowerEomLow,
                    FollowerHeaderDestHigh => FollowerHeaderDestLow,
                    _ => FollowerDataLow,
                };
                self.enter_state(next);
            }
            FollowerEomLow => {
                if DATA_ZERO.valid_low(t) {
                    self.rx.eom = false;
                } else if DATA_ONE.valid_low(t) {
                    self.rx.eom = true;
                } else {
                    self.enter_state(Idle);
                    return self.event.take();
                }
                self.rx.low_time = t;
                self.enter_state(FollowerEomHigh);
            }
            FollowerEomHigh => {
                if data_window(self.rx.eom).valid_high(self.rx.low_time, t) {
                    self.enter_state(FollowerAckLow);
                } else {
                    self.enter_state(Idle);
                }
            }
            FollowerAckLow => self.enter_state(FollowerAckFinish),
            FollowerAckFinish => self.enter_state(FollowerDataLow),
            _ => {}
        }
        self.event.take()
    }
}

impl<P, T> CecDriver for BitbangCec<P, T>
where
    P: OutputPin<Error = Infallible> + InputPin<Error = Infallible>,
    T: CaptureTimer,
{
    fn init(&mut self) -> Result<(), CecError> {
        self.addr = INVALID_ADDR;
        self.timer.init();
        self.drive(true);
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
            self.enter_state(State::Idle);
            self.timer.enable();
            info!("CEC enabled");
        } else {
            self.timer.disable();
            self.enter_state(State::Disabled);
            info!("CEC disabled");
        }
        Ok(())
    }

    fn get_logical_addr(&self) -> u8 {
        self.addr
    }

    fn set_logical_addr(&mut self, addr: u8) -> Result<(), CecError> {
        self.addr = addr;
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
        self.on_transmit();
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
