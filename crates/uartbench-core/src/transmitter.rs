//! Stimulus side: drives 8N1 frames onto a [`SimLine`].

use log::trace;
use serde::{Deserialize, Serialize};
use uartbench_decode::uart::{DATA_BITS, FRAME_BITS};
use uartbench_decode::{BitPeriod, Ticks};

use crate::error::SimError;
use crate::line::SimLine;

/// Deliberate corruption of a single frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FrameFault {
    #[default]
    None,
    /// Line returns high half a period after the start edge, where the
    /// receiver samples the start bit. Needs a period of at least two ticks.
    StartGlitch,
    /// Stop cell held low; the line goes back to idle one period later.
    StopLow,
}

/// Writes frames back to back starting at a cursor tick.
#[derive(Debug, Clone)]
pub struct UartTransmitter {
    line: SimLine,
    bit_period: BitPeriod,
    cursor: Ticks,
    idle_bits: u32,
}

impl UartTransmitter {
    pub fn new(line: SimLine, bit_period: BitPeriod, start_at: Ticks) -> Self {
        Self {
            line,
            bit_period,
            cursor: start_at,
            idle_bits: 1,
        }
    }

    /// Idle (high) bit cells inserted after every frame.
    pub fn with_idle_bits(mut self, idle_bits: u32) -> Self {
        self.idle_bits = idle_bits;
        self
    }

    pub fn line(&self) -> &SimLine {
        &self.line
    }

    /// Tick at which the next frame will begin.
    pub fn cursor(&self) -> Ticks {
        self.cursor
    }

    /// Holds the line high for `ticks` before the next frame.
    pub fn idle(&mut self, ticks: Ticks) {
        self.cursor += ticks;
    }

    pub fn send(&mut self, byte: u8) -> Result<Ticks, SimError> {
        self.send_with_fault(byte, FrameFault::None)
    }

    /// Sends every byte in order, returning each frame's start tick.
    pub fn send_all(&mut self, bytes: &[u8]) -> Result<Vec<Ticks>, SimError> {
        bytes.iter().map(|&byte| self.send(byte)).collect()
    }

    /// Drives one frame and returns the tick of its start edge.
    pub fn send_with_fault(&mut self, byte: u8, fault: FrameFault) -> Result<Ticks, SimError> {
        let start = self.cursor;
        let period = self.bit_period.ticks();
        let cell = |n: u8| start + Ticks::from(n) * period;

        self.line.drive(start, false)?;
        if fault == FrameFault::StartGlitch {
            self.line.drive(start + self.bit_period.half().max(1), true)?;
        }
        for i in 0..DATA_BITS {
            self.line.drive(cell(i + 1), (byte >> i) & 1 == 1)?;
        }
        let stop = cell(FRAME_BITS - 1);
        self.line.drive(stop, fault != FrameFault::StopLow)?;
        let end = cell(FRAME_BITS);
        if fault == FrameFault::StopLow {
            self.line.drive(end, true)?;
        }

        trace!("frame {byte:#04x} at tick {start} ({fault:?})");
        self.cursor = end + Ticks::from(self.idle_bits) * period;
        Ok(start)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::Simulator;

    fn transmitter(period: Ticks, start_at: Ticks) -> UartTransmitter {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        UartTransmitter::new(line, BitPeriod::new(period).unwrap(), start_at)
    }

    #[test]
    fn frame_is_lsb_first_between_start_and_stop() {
        let mut tx = transmitter(10, 100);
        assert_eq!(tx.send(0x53), Ok(100));

        let line = tx.line();
        let levels: Vec<bool> = (0..10).map(|n| line.level_at(100 + n * 10 + 5)).collect();
        assert_eq!(
            levels,
            [false, true, true, false, false, true, false, true, false, true]
        );
        assert_eq!(tx.cursor(), 100 + 10 * 10 + 10);
    }

    #[test]
    fn faults_land_on_the_sample_instants() {
        let mut tx = transmitter(10, 0).with_idle_bits(0);
        tx.send_with_fault(0x00, FrameFault::StartGlitch).unwrap();
        let start = tx.send_with_fault(0x00, FrameFault::StopLow).unwrap();

        let line = tx.line();
        assert!(!line.level_at(4));
        assert!(line.level_at(5));
        assert!(!line.level_at(start + 95));
        assert!(line.level_at(start + 100));
    }

    #[test]
    fn send_all_reports_start_ticks() {
        let mut tx = transmitter(4, 8).with_idle_bits(2);
        assert_eq!(tx.send_all(b"ab"), Ok(vec![8, 56]));
    }

    #[test]
    fn idle_pushes_the_next_frame_back() {
        let mut tx = transmitter(10, 0).with_idle_bits(0);
        tx.send(0xff).unwrap();
        tx.idle(35);
        assert_eq!(tx.cursor(), 135);
        assert_eq!(tx.send(0x00), Ok(135));

        let line = tx.line();
        assert!(line.level_at(134));
        assert!(!line.level_at(135));
    }
}
