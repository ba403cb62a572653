//! UART frame decoding against an abstract, time-aware signal line.
//!
//! The decoder never touches a simulator directly. It is handed something
//! implementing [`LineProbe`] and suspends on the two waits that trait
//! provides, sampling the line level in between.

pub mod probe;
pub mod uart;

pub use probe::LineProbe;
pub use uart::{decode_frame, FramePhase, FramingError, SamplerState, UartBitSampler};

use serde::{Deserialize, Serialize};
use std::fmt;

/// One simulation time unit.
pub type Ticks = u64;

/// Duration of a single bit cell, in ticks. Always at least one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct BitPeriod(Ticks);

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BitPeriodError {
    #[error("bit period must be at least one tick")]
    Zero,

    #[error("baud rate must be non-zero")]
    ZeroBaud,

    #[error("baud rate {baud} is faster than the {ticks_per_second} ticks/s time base")]
    RateTooHigh { ticks_per_second: u64, baud: u32 },
}

impl BitPeriod {
    pub const MIN: BitPeriod = BitPeriod(1);

    pub const fn new(ticks: Ticks) -> Result<Self, BitPeriodError> {
        if ticks == 0 {
            Err(BitPeriodError::Zero)
        } else {
            Ok(Self(ticks))
        }
    }

    /// Derives the period from a time base and a nominal baud rate,
    /// truncating toward zero.
    pub fn from_baud(ticks_per_second: u64, baud: u32) -> Result<Self, BitPeriodError> {
        if baud == 0 {
            return Err(BitPeriodError::ZeroBaud);
        }
        Self::new(ticks_per_second / u64::from(baud))
            .map_err(|_| BitPeriodError::RateTooHigh { ticks_per_second, baud })
    }

    pub const fn ticks(self) -> Ticks {
        self.0
    }

    /// Offset from the start edge to the middle of the start bit.
    pub const fn half(self) -> Ticks {
        self.0 / 2
    }

    /// Length of a whole frame on the wire (start, data, stop).
    pub const fn frame_ticks(self) -> Ticks {
        self.0.saturating_mul(uart::FRAME_BITS as Ticks)
    }
}

impl TryFrom<u64> for BitPeriod {
    type Error = BitPeriodError;

    fn try_from(ticks: u64) -> Result<Self, Self::Error> {
        Self::new(ticks)
    }
}

impl From<BitPeriod> for u64 {
    fn from(period: BitPeriod) -> Self {
        period.0
    }
}

impl fmt::Display for BitPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ticks", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_period_is_rejected() {
        assert_eq!(BitPeriod::new(0), Err(BitPeriodError::Zero));
        assert_eq!(BitPeriod::new(1).map(BitPeriod::ticks), Ok(1));
    }

    #[test]
    fn period_from_baud_truncates() {
        let period = BitPeriod::from_baud(5_000_000_000_000, 70_000).unwrap();
        assert_eq!(period.ticks(), 71_428_571);
        assert_eq!(period.half(), 35_714_285);

        assert_eq!(BitPeriod::from_baud(1_000, 0), Err(BitPeriodError::ZeroBaud));
        assert_eq!(
            BitPeriod::from_baud(1_000, 9_600),
            Err(BitPeriodError::RateTooHigh { ticks_per_second: 1_000, baud: 9_600 })
        );
    }

    #[test]
    fn period_deserializes_from_plain_integer() {
        let period: BitPeriod = serde_json::from_str("71428").unwrap();
        assert_eq!(period.ticks(), 71_428);
        assert_eq!(serde_json::to_string(&period).unwrap(), "71428");
        assert!(serde_json::from_str::<BitPeriod>("0").is_err());
    }

    #[test]
    fn frame_spans_ten_bits() {
        assert_eq!(BitPeriod::new(7).unwrap().frame_ticks(), 70);
        assert_eq!(BitPeriod::new(u64::MAX).unwrap().frame_ticks(), u64::MAX);
    }
}
