//! CEC bit timings (HDMI 1.4b, CEC 5.2) and the validation windows the bit-bang
//! follower applies to measured pulses. All values are in microseconds.

use embassy_time::Duration;

const fn us(micros: u64) -> Duration {
    Duration::from_micros(micros)
}

pub const NOMINAL_BIT_PERIOD_US: u64 = 2400;
pub const NOMINAL_BIT_PERIOD: Duration = us(NOMINAL_BIT_PERIOD_US);
/// Followers sample a data bit this long after its falling edge.
pub const NOMINAL_SAMPLE_TIME: Duration = us(1050);

pub const START_BIT_LOW: Duration = us(3700);
pub const START_BIT_HIGH: Duration = us(800);
pub const DATA_ZERO_LOW: Duration = us(1500);
pub const DATA_ZERO_HIGH: Duration = us(900);
pub const DATA_ONE_LOW: Duration = us(600);
pub const DATA_ONE_HIGH: Duration = us(1800);

const VALID_TOLERANCE_US: u64 = 100;

/// Lows shorter than this right after a falling edge are treated as glitches.
pub const DEBOUNCE_LIMIT: Duration = us(200);
pub const DEBOUNCE_WAIT_SHORT: Duration = us(100);
pub const DEBOUNCE_WAIT_LONG: Duration = us(500);
/// Number of consecutive glitches after which the long wait is used.
pub const DEBOUNCE_CUTOFF: u8 = 3;

/// Acceptable low time and total bit duration of one bit shape.
#[derive(Clone, Copy, Debug)]
pub struct BitWindow {
    min_low: u64,
    max_low: u64,
    min_duration: u64,
    max_duration: u64,
}

pub const START_BIT: BitWindow = BitWindow {
    min_low: 3500,
    max_low: 3900,
    min_duration: 4300,
    max_duration: 5700,
};

pub const DATA_ZERO: BitWindow = BitWindow {
    min_low: 1300,
    max_low: 1700,
    min_duration: 2050,
    max_duration: 2750,
};

pub const DATA_ONE: BitWindow = BitWindow {
    min_low: 400,
    max_low: 800,
    min_duration: 2050,
    max_duration: 2750,
};

impl BitWindow {
    pub fn valid_low(&self, low: Duration) -> bool {
        let low = low.as_micros();
        low + VALID_TOLERANCE_US >= self.min_low && low <= self.max_low + VALID_TOLERANCE_US
    }

    /// Checks the full bit length, low phase plus the high phase that followed it.
    pub fn valid_high(&self, low: Duration, high: Duration) -> bool {
        let total = low.as_micros() + high.as_micros();
        total + VALID_TOLERANCE_US >= self.min_duration
            && total <= self.max_duration + VALID_TOLERANCE_US
    }
}

pub fn data_window(bit: bool) -> &'static BitWindow {
    if bit {
        &DATA_ONE
    } else {
        &DATA_ZERO
    }
}

pub fn data_low(bit: bool) -> Duration {
    if bit {
        DATA_ONE_LOW
    } else {
        DATA_ZERO_LOW
    }
}

pub fn data_high(bit: bool) -> Duration {
    if bit {
        DATA_ONE_HIGH
    } else {
        DATA_ZERO_HIGH
    }
}

// Follower capture timeouts: the longest a phase may last before the bit is abandoned.
pub const CAP_START_LOW: Duration = us(START_BIT.max_low + VALID_TOLERANCE_US);
pub const CAP_START_HIGH: Duration =
    us(START_BIT.max_duration - START_BIT.min_low + VALID_TOLERANCE_US);
pub const CAP_DATA_LOW: Duration = us(DATA_ZERO.max_low + VALID_TOLERANCE_US);
pub const CAP_DATA_HIGH: Duration =
    us(DATA_ZERO.max_duration - DATA_ONE.min_low + VALID_TOLERANCE_US);

/// Initiator samples the ACK halfway between a driven one and a driven zero.
pub const ACK_HIGH_SAMPLE: Duration =
    us((DATA_ONE_LOW_US + DATA_ZERO_LOW_US) / 2 - DATA_ONE_LOW_US);
/// Rest of the ACK bit after the sample point.
pub const ACK_SAMPLE_TO_END: Duration =
    us(NOMINAL_BIT_PERIOD_US - (DATA_ONE_LOW_US + DATA_ZERO_LOW_US) / 2);
/// Follower holds an ACK low until this point after sampling.
pub const FOLLOWER_ACK_HOLD: Duration = us(DATA_ZERO_LOW_US - 1050);

pub const DATA_ONE_LOW_US: u64 = 600;
pub const DATA_ZERO_LOW_US: u64 = 1500;
