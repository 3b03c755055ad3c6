#![no_std]
#![no_main]

use core::cell::Cell;
use core::future::pending;

use cec_engine::cec_types::CecOpCode;
use cec_engine::{
    BitbangCec, CaptureEdge, CaptureTimer, CecDriver, CecFrame, CecPort, LogicalAddress,
    MkbpCecEvents, TaskEvent,
};
use defmt::*;
use embassy_executor::Spawner;
use embassy_futures::select::{select3, Either3};
use embassy_rp::gpio::{Input, Level, OutputOpenDrain, Pull};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer};
use heapless::Vec;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

const MY_ADDRESS: LogicalAddress = LogicalAddress(4);

type Driver = BitbangCec<OutputOpenDrain<'static>, RpCaptureTimer>;
type Port = CecPort<Driver>;

#[derive(Clone, Copy)]
struct Arm {
    edge: CaptureEdge,
    deadline: Option<Instant>,
    generation: u32,
}

#[derive(Clone, Copy)]
struct CaptureState {
    enabled: bool,
    arm: Option<Arm>,
    started: Instant,
    generation: u32,
}

/// What the driver asked the capture task to watch for.
static CAPTURE: Mutex<CriticalSectionRawMutex, Cell<CaptureState>> =
    Mutex::new(Cell::new(CaptureState {
        enabled: false,
        arm: None,
        started: Instant::from_ticks(0),
        generation: 0,
    }));
static CAPTURE_CHANGED: Signal<CriticalSectionRawMutex, ()> = Signal::new();

static PORT: StaticCell<Port> = StaticCell::new();

fn update_capture(f: impl FnOnce(&mut CaptureState)) {
    CAPTURE.lock(|c| {
        let mut state = c.get();
        f(&mut state);
        c.set(state);
    });
    CAPTURE_CHANGED.signal(());
}

/// Capture timer backed by a GPIO edge wait and an embassy timer, serviced by
/// `capture_task`.
struct RpCaptureTimer;

impl CaptureTimer for RpCaptureTimer {
    fn enable(&mut self) {
        update_capture(|s| s.enabled = true);
    }

    fn disable(&mut self) {
        update_capture(|s| {
            s.enabled = false;
            s.arm = None;
        });
    }

    fn start(&mut self, edge: CaptureEdge, timeout: Option<Duration>) {
        update_capture(|s| {
            s.generation = s.generation.wrapping_add(1);
            s.started = Instant::now();
            s.arm = Some(Arm {
                edge,
                deadline: timeout.map(|t| s.started + t),
                generation: s.generation,
            });
        });
    }

    fn stop(&mut self) {
        update_capture(|s| s.arm = None);
    }

    fn elapsed(&mut self) -> Duration {
        Instant::now() - CAPTURE.lock(|c| c.get().started)
    }
}

/// Disarms `generation` if it is still the current request.
fn claim(generation: u32) -> bool {
    CAPTURE.lock(|c| {
        let mut state = c.get();
        match state.arm {
            Some(arm) if arm.generation == generation => {
                state.arm = None;
                c.set(state);
                true
            }
            _ => false,
        }
    })
}

#[embassy_executor::task]
async fn capture_task(port: &'static Port, mut cec_in: Input<'static>) -> ! {
    loop {
        let state = CAPTURE.lock(|c| c.get());
        let arm = match (state.enabled, state.arm) {
            (true, Some(arm)) => arm,
            _ => {
                CAPTURE_CHANGED.wait().await;
                continue;
            }
        };

        let edge = async {
            match arm.edge {
                CaptureEdge::Falling => cec_in.wait_for_falling_edge().await,
                CaptureEdge::Rising => cec_in.wait_for_rising_edge().await,
                CaptureEdge::None => pending().await,
            }
        };
        let timeout = async {
            match arm.deadline {
                Some(deadline) => Timer::at(deadline).await,
                None => pending().await,
            }
        };

        let handler: fn(&mut Driver) -> Option<TaskEvent> =
            match select3(edge, timeout, CAPTURE_CHANGED.wait()).await {
                Either3::First(()) => Driver::on_capture,
                Either3::Second(()) => Driver::on_timeout,
                Either3::Third(()) => continue,
            };
        if claim(arm.generation) {
            port.on_interrupt(handler);
        }
    }
}

#[embassy_executor::task]
async fn cec_task(port: &'static Port) -> ! {
    port.run().await
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    let p = embassy_rp::init(Default::default());

    // Same line on both pins: PIN_0 drives it open-drain, PIN_1 watches it.
    let cec_out = OutputOpenDrain::new(p.PIN_0, Level::High);
    let cec_in = Input::new(p.PIN_1, Pull::Up);

    let port: &'static Port = PORT.init(CecPort::new(BitbangCec::new(cec_out, RpCaptureTimer)));
    let setup = port.with_driver(|d| {
        d.init()?;
        d.set_logical_addr(MY_ADDRESS.0)?;
        d.set_enable(true)
    });
    if let Err(e) = setup {
        defmt::panic!("CEC setup failed: {}", e);
    }

    unwrap!(spawner.spawn(capture_task(port, cec_in)));
    unwrap!(spawner.spawn(cec_task(port)));

    info!("Listening for messages");
    loop {
        port.wait_host_event().await;
        let events = port.take_mkbp_events();
        if events.contains(MkbpCecEvents::SEND_FAILED) {
            warn!("Send failed");
        }

        while let Ok(msg) = port.pop_message() {
            let Some(frame) = CecFrame::parse(&msg) else {
                continue;
            };
            let op_str = frame
                .opcode
                .map(|opcode| {
                    CecOpCode::try_from(opcode)
                        .map(CecOpCode::name)
                        .unwrap_or("(unknown)")
                })
                .unwrap_or("(None)");
            info!(
                "{} -> {} {} {}",
                frame.initiator,
                frame.dest,
                op_str,
                frame.operands.as_deref().unwrap_or(&[])
            );

            if frame.dest == MY_ADDRESS
                && frame.opcode == Some(CecOpCode::GIVE_DEVICE_VENDOR_ID.into())
            {
                let reply = CecFrame {
                    initiator: MY_ADDRESS,
                    dest: LogicalAddress::broadcast(),
                    opcode: Some(CecOpCode::DEVICE_VENDOR_ID.into()),
                    operands: Vec::from_slice(&[0xAF, 0xFE, 0x42]).ok(),
                };
                if let Err(e) = port.with_driver(|d| d.send(&reply.to_message())) {
                    warn!("Vendor ID reply not sent: {}", e);
                }
            }
        }
    }
}
