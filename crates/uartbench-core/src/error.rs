use uartbench_decode::{FramingError, Ticks};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SimError {
    #[error("simulation stalled at tick {at}: nothing left to wait for")]
    Stalled { at: Ticks },

    #[error("line driven at tick {at}, before its last transition at tick {last}")]
    NonMonotonicDrive { at: Ticks, last: Ticks },

    #[error("line driven at tick {at}, already in the past (now {now})")]
    DriveInPast { at: Ticks, now: Ticks },
}

/// A [`crate::Simulator::with_timeout`] deadline passed first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out at tick {deadline}")]
pub struct Elapsed {
    pub deadline: Ticks,
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum HarnessError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid expected_hex: {0}")]
    ExpectedHex(#[from] hex::FromHexError),

    #[error("frame {index}: {source}")]
    Framing {
        index: usize,
        #[source]
        source: FramingError,
    },

    #[error("frame {index}: expected {expected:#04x}, decoded {got:#04x}")]
    Mismatch { index: usize, expected: u8, got: u8 },

    #[error("frame {index}: no frame before tick {at}")]
    Timeout { index: usize, at: Ticks },

    #[error("stopped before frame {index}")]
    Stopped { index: usize },

    #[error(transparent)]
    Sim(#[from] SimError),

    #[error("harness thread panicked")]
    Panicked,
}
