//! Mid-bit sampling receiver for 8N1 frames.

use log::{debug, trace};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{BitPeriod, LineProbe};

pub const DATA_BITS: u8 = 8;

/// Start bit, data bits and one stop bit.
pub const FRAME_BITS: u8 = DATA_BITS + 2;

/// Framing bit that can be violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FramePhase {
    Start,
    Stop,
}

impl FramePhase {
    /// Level the line must show at this phase's sample instant.
    pub const fn expected_level(self) -> bool {
        matches!(self, FramePhase::Stop)
    }
}

impl fmt::Display for FramePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FramePhase::Start => "start",
            FramePhase::Stop => "stop",
        })
    }
}

/// The start bit read high or the stop bit read low.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[error("framing error: {phase} bit sampled as {}, expected {}", level(.observed), inverted(.observed))]
pub struct FramingError {
    pub phase: FramePhase,
    pub observed: bool,
}

impl FramingError {
    pub const fn expected(&self) -> bool {
        self.phase.expected_level()
    }
}

fn level(bit: &bool) -> u8 {
    u8::from(*bit)
}

fn inverted(bit: &bool) -> u8 {
    u8::from(!*bit)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplerState {
    Idle,
    WaitingForEdge,
    SampleStart,
    /// Waiting for, or sampling, data bit `n` (LSB first).
    SampleBit(u8),
    SampleStop,
    Done(u8),
    Fault(FramingError),
}

impl SamplerState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SamplerState::Done(_) | SamplerState::Fault(_))
    }
}

/// Decodes one frame per call from a line sampled through a [`LineProbe`].
///
/// Sampling is locked to the start edge: the first sample lands half a bit
/// period after the edge and every later one a whole period after the
/// previous, so all ten sample instants sit in the middle of their cells.
/// A framing violation ends the call at the point it is detected and the
/// partially assembled byte is dropped.
#[derive(Debug, Clone)]
pub struct UartBitSampler {
    bit_period: BitPeriod,
    state: SamplerState,
}

impl UartBitSampler {
    pub fn new(bit_period: BitPeriod) -> Self {
        Self {
            bit_period,
            state: SamplerState::Idle,
        }
    }

    pub fn bit_period(&self) -> BitPeriod {
        self.bit_period
    }

    /// Where the last (or current) decode got to. `Idle` only before the
    /// first call; every call starts over at `WaitingForEdge`. If a decode
    /// future is dropped while suspended this keeps the state it was
    /// suspended in until the next call.
    pub fn state(&self) -> SamplerState {
        self.state
    }

    /// Waits for a start edge and decodes the frame that follows it.
    ///
    /// The line is assumed idle-high when called. Without an edge this never
    /// resolves; bound it with a timeout if the device may stay silent.
    pub async fn decode_frame<P>(&mut self, line: &P) -> Result<u8, FramingError>
    where
        P: LineProbe + ?Sized,
    {
        let period = self.bit_period.ticks();
        self.state = SamplerState::WaitingForEdge;
        line.falling_edge().await;

        self.state = SamplerState::SampleStart;
        line.wait(self.bit_period.half()).await;
        self.check(FramePhase::Start, line.read())?;

        let mut value = 0u8;
        for i in 0..DATA_BITS {
            self.state = SamplerState::SampleBit(i);
            line.wait(period).await;
            let bit = line.read();
            trace!("data bit {i} = {}", u8::from(bit));
            value |= u8::from(bit) << i;
        }

        self.state = SamplerState::SampleStop;
        line.wait(period).await;
        self.check(FramePhase::Stop, line.read())?;

        debug!("decoded frame {value:#04x}");
        self.state = SamplerState::Done(value);
        Ok(value)
    }

    fn check(&mut self, phase: FramePhase, observed: bool) -> Result<(), FramingError> {
        if observed == phase.expected_level() {
            return Ok(());
        }
        let err = FramingError { phase, observed };
        debug!("{err}");
        self.state = SamplerState::Fault(err);
        Err(err)
    }
}

/// One-shot form of [`UartBitSampler::decode_frame`].
pub async fn decode_frame<P>(line: &P, bit_period: BitPeriod) -> Result<u8, FramingError>
where
    P: LineProbe + ?Sized,
{
    UartBitSampler::new(bit_period).decode_frame(line).await
}
