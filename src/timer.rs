use embassy_time::Duration;

/// Line edge a capture should fire on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CaptureEdge {
    None,
    Falling,
    Rising,
}

/// Combined edge-capture / one-shot timer that paces the bit-bang driver.
///
/// Each `start` arms a single shot: whichever of the edge or the timeout comes first
/// must be reported to the driver (`on_capture` / `on_timeout`), after which the timer
/// stays quiet until armed again.
pub trait CaptureTimer {
    fn init(&mut self) {}

    fn enable(&mut self);

    fn disable(&mut self);

    /// `timeout == None` waits for the edge only.
    fn start(&mut self, edge: CaptureEdge, timeout: Option<Duration>);

    fn stop(&mut self);

    /// Time since the last `start`.
    fn elapsed(&mut self) -> Duration;

    /// Called when the follower suspects a glitch. Boards that filter in hardware
    /// can tighten their input filter here.
    fn debounce_enable(&mut self) {}

    fn debounce_disable(&mut self) {}
}
