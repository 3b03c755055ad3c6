//! Per-port glue between a driver running in interrupt context and the CEC task.
//!
//! Interrupt handlers call into the driver through [`CecPort::on_interrupt`]; any
//! completion they report is latched as a task event and wakes [`CecPort::run`]. The
//! task turns received data into RX queue entries and everything into host events.
//! While the AP is off, received frames go to the port's offline policy instead.

use core::cell::{Cell, RefCell};

use bitflags::bitflags;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;

use crate::cec::{CecError, CecMessage, TaskEvent};
use crate::driver::CecDriver;
use crate::offline::{process_offline_message, Chipset, Offline, OfflinePolicy};
use crate::rx_queue::CecRxQueue;

bitflags! {
    /// Pending work for the CEC task, accumulated from interrupt context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TaskEvents: u8 {
        const RECEIVED_DATA = 1 << 0;
        const OKAY = 1 << 1;
        const FAILED = 1 << 2;
    }
}

impl From<TaskEvent> for TaskEvents {
    fn from(event: TaskEvent) -> Self {
        match event {
            TaskEvent::ReceivedData => TaskEvents::RECEIVED_DATA,
            TaskEvent::Okay => TaskEvents::OKAY,
            TaskEvent::Failed => TaskEvents::FAILED,
        }
    }
}

bitflags! {
    /// Host-visible event bits of one port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MkbpCecEvents: u32 {
        const SEND_OK = 1 << 0;
        const SEND_FAILED = 1 << 1;
        const HAVE_DATA = 1 << 2;
    }
}

impl MkbpCecEvents {
    /// Packs the flags of `port` into one host event word: flags in the low 28 bits,
    /// port number in the top four.
    pub fn pack(self, port: usize) -> u32 {
        (self.bits() & 0x0fff_ffff) | (((port as u32) & 0xf) << 28)
    }
}

type CsMutex<T> = Mutex<CriticalSectionRawMutex, T>;

pub struct CecPort<D> {
    driver: CsMutex<RefCell<D>>,
    task_events: CsMutex<Cell<TaskEvents>>,
    wake: Signal<CriticalSectionRawMutex, ()>,
    rx_queue: CsMutex<RefCell<CecRxQueue>>,
    mkbp_events: CsMutex<Cell<MkbpCecEvents>>,
    host_wake: Signal<CriticalSectionRawMutex, ()>,
    chipset: Option<&'static dyn Chipset>,
    offline_policy: Option<&'static [OfflinePolicy]>,
}

impl<D: CecDriver> CecPort<D> {
    pub const fn new(driver: D) -> Self {
        Self {
            driver: Mutex::new(RefCell::new(driver)),
            task_events: Mutex::new(Cell::new(TaskEvents::empty())),
            wake: Signal::new(),
            rx_queue: Mutex::new(RefCell::new(CecRxQueue::new())),
            mkbp_events: Mutex::new(Cell::new(MkbpCecEvents::empty())),
            host_wake: Signal::new(),
            chipset: None,
            offline_policy: None,
        }
    }

    /// Hands frames received while `chipset` is off to `policy`. Without this every
    /// frame is queued for the AP.
    pub fn with_offline_policy(
        mut self,
        chipset: &'static dyn Chipset,
        policy: Option<&'static [OfflinePolicy]>,
    ) -> Self {
        self.chipset = Some(chipset);
        self.offline_policy = policy;
        self
    }

    /// Runs `f` on the driver inside a critical section.
    pub fn with_driver<R>(&self, f: impl FnOnce(&mut D) -> R) -> R {
        self.driver.lock(|d| f(&mut d.borrow_mut()))
    }

    /// Entry point for interrupt handlers. Whatever event `f` reports is handed to the
    /// task.
    pub fn on_interrupt(&self, f: impl FnOnce(&mut D) -> Option<TaskEvent>) {
        if let Some(event) = self.with_driver(f) {
            self.post_event(event);
        }
    }

    pub fn post_event(&self, event: TaskEvent) {
        self.task_events
            .lock(|e| e.set(e.get() | TaskEvents::from(event)));
        self.wake.signal(());
    }

    fn take_task_events(&self) -> TaskEvents {
        self.task_events.lock(|e| e.replace(TaskEvents::empty()))
    }

    /// Waits until at least one task event is pending and takes all of them.
    pub async fn wait_task_events(&self) -> TaskEvents {
        loop {
            let events = self.take_task_events();
            if !events.is_empty() {
                return events;
            }
            self.wake.wait().await;
        }
    }

    pub fn handle_task_events(&self, events: TaskEvents) {
        if events.contains(TaskEvents::RECEIVED_DATA) {
            match self.with_driver(|d| d.get_received_message()) {
                Ok(msg) => {
                    debug!("CEC: received {:?}", msg.as_slice());
                    if self.is_for_ap(&msg) {
                        self.queue_received(&msg);
                    }
                }
                Err(e) => debug!("CEC: no message to fetch: {:?}", e),
            }
        }
        // Only the latest send result is reported.
        if events.contains(TaskEvents::OKAY) {
            self.set_send_result(MkbpCecEvents::SEND_OK);
        }
        if events.contains(TaskEvents::FAILED) {
            self.set_send_result(MkbpCecEvents::SEND_FAILED);
        }
    }

    fn set_send_result(&self, result: MkbpCecEvents) {
        self.mkbp_events.lock(|e| {
            let others = e.get() - (MkbpCecEvents::SEND_OK | MkbpCecEvents::SEND_FAILED);
            e.set(others | result)
        });
        self.host_wake.signal(());
    }

    fn is_for_ap(&self, msg: &CecMessage) -> bool {
        let Some(chipset) = self.chipset else {
            return true;
        };
        match process_offline_message(chipset, self.offline_policy, msg) {
            Ok(Offline::NotHandled) => true,
            Ok(Offline::Handled) => false,
            Err(e) => {
                debug!("CEC: dropping frame received while off: {:?}", e);
                false
            }
        }
    }

    fn queue_received(&self, msg: &CecMessage) {
        let queued = self.rx_queue.lock(|q| {
            let mut q = q.borrow_mut();
            match q.push(msg) {
                Err(CecError::Overflow) => {
                    // The host fell behind: drop what it has not read, keep the newest.
                    warn!("CEC: RX queue overflow, flushing");
                    q.flush();
                    q.push(msg)
                }
                other => other,
            }
        });
        match queued {
            Ok(()) => self.set_mkbp_event(MkbpCecEvents::HAVE_DATA),
            Err(e) => error!("CEC: failed to queue message: {:?}", e),
        }
    }

    /// Processes one batch of task events.
    pub async fn process_events(&self) {
        let events = self.wait_task_events().await;
        self.handle_task_events(events);
    }

    /// The CEC task body.
    pub async fn run(&self) -> ! {
        loop {
            self.process_events().await;
        }
    }

    fn set_mkbp_event(&self, event: MkbpCecEvents) {
        self.mkbp_events.lock(|e| e.set(e.get() | event));
        self.host_wake.signal(());
    }

    /// Takes the host events accumulated since the last call.
    pub fn take_mkbp_events(&self) -> MkbpCecEvents {
        self.mkbp_events.lock(|e| e.replace(MkbpCecEvents::empty()))
    }

    /// Waits for the next host notification.
    pub async fn wait_host_event(&self) {
        self.host_wake.wait().await
    }

    pub fn pop_message(&self) -> Result<CecMessage, CecError> {
        self.rx_queue.lock(|q| q.borrow_mut().pop())
    }
}

/// Fixed set of ports, addressed by index.
pub struct CecPorts<D, const N: usize> {
    ports: [CecPort<D>; N],
}

impl<D: CecDriver, const N: usize> CecPorts<D, N> {
    pub const fn new(ports: [CecPort<D>; N]) -> Self {
        Self { ports }
    }

    pub fn port(&self, index: usize) -> Result<&CecPort<D>, CecError> {
        self.ports.get(index).ok_or(CecError::InvalidPort)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CecPort<D>> {
        self.ports.iter()
    }
}
