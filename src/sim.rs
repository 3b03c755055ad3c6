//! Discrete-event model of a CEC bus for exercising bit-bang controllers.
//!
//! The line is the wired AND of every node's open-drain output, a scripted external
//! driver and an optional acknowledger. Time is virtual and counted in microseconds.

use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::Rc;

use embassy_time::Duration;
use embedded_hal_1::digital::{ErrorType, InputPin, OutputPin};

use crate::bitbang::{BitbangCec, State};
use crate::cec::TaskEvent;
use crate::driver::CecDriver;
use crate::timer::{CaptureEdge, CaptureTimer};
use crate::timing::{data_low, DATA_ONE_LOW, DATA_ZERO_LOW, NOMINAL_BIT_PERIOD_US};

#[derive(Clone, Copy)]
struct TimerSlot {
    enabled: bool,
    edge: CaptureEdge,
    deadline: Option<u64>,
    started: u64,
    debounce_enables: u32,
    debounce_disables: u32,
}

impl Default for TimerSlot {
    fn default() -> Self {
        Self {
            enabled: false,
            edge: CaptureEdge::None,
            deadline: None,
            started: 0,
            debounce_enables: 0,
            debounce_disables: 0,
        }
    }
}

#[derive(Default)]
struct Bus {
    now: u64,
    released: Vec<bool>,
    external_low: bool,
    ack_low: bool,
    timers: Vec<TimerSlot>,
}

impl Bus {
    fn level(&self) -> bool {
        !self.external_low && !self.ack_low && self.released.iter().all(|r| *r)
    }
}

pub struct SimPin {
    bus: Rc<RefCell<Bus>>,
    node: usize,
}

impl ErrorType for SimPin {
    type Error = Infallible;
}

impl OutputPin for SimPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.bus.borrow_mut().released[self.node] = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.bus.borrow_mut().released[self.node] = true;
        Ok(())
    }
}

impl InputPin for SimPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.bus.borrow().level())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.bus.borrow().level())
    }
}

pub struct SimTimer {
    bus: Rc<RefCell<Bus>>,
    node: usize,
}

impl SimTimer {
    fn with_slot<R>(&self, f: impl FnOnce(u64, &mut TimerSlot) -> R) -> R {
        let mut bus = self.bus.borrow_mut();
        let now = bus.now;
        f(now, &mut bus.timers[self.node])
    }
}

impl CaptureTimer for SimTimer {
    fn enable(&mut self) {
        self.with_slot(|_, s| s.enabled = true);
    }

    fn disable(&mut self) {
        self.with_slot(|_, s| {
            s.enabled = false;
            s.edge = CaptureEdge::None;
            s.deadline = None;
        });
    }

    fn start(&mut self, edge: CaptureEdge, timeout: Option<Duration>) {
        self.with_slot(|now, s| {
            s.edge = edge;
            s.deadline = timeout.map(|t| now + t.as_micros());
            s.started = now;
        });
    }

    fn stop(&mut self) {
        self.with_slot(|_, s| {
            s.edge = CaptureEdge::None;
            s.deadline = None;
        });
    }

    fn elapsed(&mut self) -> Duration {
        self.with_slot(|now, s| Duration::from_micros(now - s.started))
    }

    fn debounce_enable(&mut self) {
        self.with_slot(|_, s| s.debounce_enables += 1);
    }

    fn debounce_disable(&mut self) {
        self.with_slot(|_, s| s.debounce_disables += 1);
    }
}

pub type SimNode = BitbangCec<SimPin, SimTimer>;

enum Wake {
    Timeout(usize),
    AckRelease,
    Script(bool),
}

pub struct Sim {
    bus: Rc<RefCell<Bus>>,
    nodes: Vec<SimNode>,
    level: bool,
    /// External driver transitions, `(time, drive_low)`, kept sorted by time.
    script: Vec<(u64, bool)>,
    mock_ack: bool,
    ack_release: Option<u64>,
    events: Vec<(u64, usize, TaskEvent)>,
    edges: Vec<(u64, bool)>,
    starts: Vec<(u64, usize)>,
}

impl Sim {
    /// One enabled node per logical address.
    pub fn new(addrs: &[u8]) -> Self {
        let bus = Rc::new(RefCell::new(Bus::default()));
        let mut nodes = Vec::new();
        for (node, addr) in addrs.iter().enumerate() {
            {
                let mut b = bus.borrow_mut();
                b.released.push(true);
                b.timers.push(TimerSlot::default());
            }
            let pin = SimPin {
                bus: bus.clone(),
                node,
            };
            let timer = SimTimer {
                bus: bus.clone(),
                node,
            };
            let mut cec = BitbangCec::new(pin, timer);
            cec.init().unwrap();
            cec.set_logical_addr(*addr).unwrap();
            cec.set_enable(true).unwrap();
            nodes.push(cec);
        }
        Sim {
            bus,
            nodes,
            level: true,
            script: Vec::new(),
            mock_ack: false,
            ack_release: None,
            events: Vec::new(),
            edges: Vec::new(),
            starts: Vec::new(),
        }
    }

    /// Acknowledge every byte a node sends, like a follower that is always present.
    pub fn mock_ack(&mut self, on: bool) {
        self.mock_ack = on;
    }

    pub fn now(&self) -> u64 {
        self.bus.borrow().now
    }

    pub fn line_high(&self) -> bool {
        self.bus.borrow().level()
    }

    pub fn node(&self, i: usize) -> &SimNode {
        &self.nodes[i]
    }

    /// Runs `f` against a node at the current time and propagates any line change.
    pub fn with_node<R>(&mut self, i: usize, f: impl FnOnce(&mut SimNode) -> R) -> R {
        let r = f(&mut self.nodes[i]);
        self.settle(Some(i));
        r
    }

    pub fn events_of(&self, node: usize) -> Vec<(u64, TaskEvent)> {
        self.events
            .iter()
            .filter(|e| e.1 == node)
            .map(|e| (e.0, e.2))
            .collect()
    }

    pub fn take_events(&mut self, node: usize) -> Vec<TaskEvent> {
        let mine: Vec<TaskEvent> = self.events.iter().filter(|e| e.1 == node).map(|e| e.2).collect();
        self.events.retain(|e| e.1 != node);
        mine
    }

    /// Times at which `node` started driving a start bit.
    pub fn starts_of(&self, node: usize) -> Vec<u64> {
        self.starts.iter().filter(|s| s.1 == node).map(|s| s.0).collect()
    }

    pub fn debounce_counts(&self, node: usize) -> (u32, u32) {
        let slot = self.bus.borrow().timers[node];
        (slot.debounce_enables, slot.debounce_disables)
    }

    /// Every low pulse seen on the line as `(falling edge time, low time)`.
    pub fn low_pulses(&self) -> Vec<(u64, u64)> {
        self.edges
            .iter()
            .enumerate()
            .filter(|(_, e)| !e.1)
            .filter_map(|(k, fall)| {
                let rise = self.edges[k + 1..].iter().find(|e| e.1)?;
                Some((fall.0, rise.0 - fall.0))
            })
            .collect()
    }

    pub fn low_time_at(&self, t: u64) -> Option<u64> {
        self.low_pulses().into_iter().find(|p| p.0 == t).map(|p| p.1)
    }

    /// Has the external driver hold the line low for `low_us` starting at `at`.
    pub fn pulse(&mut self, at: u64, low_us: u64) {
        self.script.push((at, true));
        self.script.push((at + low_us, false));
        self.script.sort_by_key(|e| e.0);
    }

    /// Scripts a complete frame driven by an external initiator and returns the time
    /// its last bit ends. Bytes listed in `long_ack` get their ACK slot held low as a
    /// follower rejecting a broadcast would.
    pub fn schedule_frame(&mut self, start: u64, msg: &[u8], long_ack: &[usize]) -> u64 {
        let mut t = start;
        self.pulse(t, 3_700);
        t += 4_500;
        for (i, byte) in msg.iter().enumerate() {
            for b in 0..8 {
                let one = byte & (0x80 >> b) != 0;
                self.pulse(t, data_low(one).as_micros());
                t += NOMINAL_BIT_PERIOD_US;
            }
            self.pulse(t, data_low(i + 1 == msg.len()).as_micros());
            t += NOMINAL_BIT_PERIOD_US;
            let ack = if long_ack.contains(&i) {
                DATA_ZERO_LOW
            } else {
                DATA_ONE_LOW
            };
            self.pulse(t, ack.as_micros());
            t += NOMINAL_BIT_PERIOD_US;
        }
        t
    }

    fn next_wake(&self) -> Option<(u64, Wake)> {
        let mut next: Option<(u64, Wake)> = None;
        let mut consider = |t: u64, w: Wake| {
            if next.as_ref().map_or(true, |n| t < n.0) {
                next = Some((t, w));
            }
        };
        {
            let bus = self.bus.borrow();
            for (i, slot) in bus.timers.iter().enumerate() {
                if let (true, Some(d)) = (slot.enabled, slot.deadline) {
                    consider(d, Wake::Timeout(i));
                }
            }
        }
        if let Some(t) = self.ack_release {
            consider(t, Wake::AckRelease);
        }
        if let Some(&(t, low)) = self.script.first() {
            consider(t, Wake::Script(low));
        }
        next
    }

    pub fn run_until(&mut self, end: u64) {
        while let Some((t, wake)) = self.next_wake().filter(|n| n.0 <= end) {
            self.bus.borrow_mut().now = t;
            match wake {
                Wake::Timeout(i) => {
                    {
                        let mut bus = self.bus.borrow_mut();
                        bus.timers[i].deadline = None;
                        bus.timers[i].edge = CaptureEdge::None;
                    }
                    let before = self.nodes[i].state();
                    let event = self.nodes[i].on_timeout();
                    self.after_handler(i, before, event);
                }
                Wake::AckRelease => {
                    self.ack_release = None;
                    self.bus.borrow_mut().ack_low = false;
                    self.settle(None);
                }
                Wake::Script(low) => {
                    self.script.remove(0);
                    self.bus.borrow_mut().external_low = low;
                    self.settle(None);
                }
            }
        }
        let mut bus = self.bus.borrow_mut();
        bus.now = bus.now.max(end);
    }

    fn after_handler(&mut self, i: usize, before: State, event: Option<TaskEvent>) {
        let now = self.now();
        if let Some(event) = event {
            self.events.push((now, i, event));
        }
        if before != State::InitiatorStartLow && self.nodes[i].state() == State::InitiatorStartLow
        {
            self.starts.push((now, i));
        }
        self.settle(Some(i));
    }

    /// Delivers a line change to every node armed for it, except the node that caused it.
    fn settle(&mut self, source: Option<usize>) {
        let level = self.bus.borrow().level();
        if level == self.level {
            return;
        }
        self.level = level;
        let now = self.now();
        self.edges.push((now, level));

        if !level && self.mock_ack {
            if let Some(i) = source {
                if self.nodes[i].state() == State::InitiatorAckLow {
                    self.bus.borrow_mut().ack_low = true;
                    self.ack_release = Some(now + DATA_ZERO_LOW.as_micros());
                }
            }
        }

        let edge = if level {
            CaptureEdge::Rising
        } else {
            CaptureEdge::Falling
        };
        for i in 0..self.nodes.len() {
            if Some(i) == source {
                continue;
            }
            if self.level != level {
                break;
            }
            let armed = {
                let mut bus = self.bus.borrow_mut();
                let slot = &mut bus.timers[i];
                let armed = slot.enabled && slot.edge == edge;
                if armed {
                    slot.edge = CaptureEdge::None;
                    slot.deadline = None;
                }
                armed
            };
            if armed {
                let before = self.nodes[i].state();
                let event = self.nodes[i].on_capture();
                self.after_handler(i, before, event);
            }
        }
    }
}
