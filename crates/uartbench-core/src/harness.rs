//! End-to-end bench: a simulated device transmits, the sampler decodes,
//! and every decoded byte is checked against the reference.

use std::ops::ControlFlow;
use std::sync::Arc;

use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uartbench_decode::{BitPeriod, Ticks, UartBitSampler};

use crate::error::HarnessError;
use crate::line::SimLine;
use crate::logbuf::{CaptureLog, Direction};
use crate::sim::Simulator;
use crate::transmitter::{FrameFault, UartTransmitter};

pub const DEFAULT_BIT_PERIOD: Ticks = 71_428;
pub const DEFAULT_EXPECTED: &str = "SERV+Tinytapeout rocks!\n";

/// Corrupts one transmitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjectedFault {
    pub frame: usize,
    pub fault: FrameFault,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    pub bit_period: BitPeriod,
    pub clock_period: Ticks,
    /// Clock cycles the device is held in reset before it may transmit.
    pub reset_cycles: u32,
    /// Idle bit cells the device leaves between frames.
    pub idle_bits: u32,
    /// Reference text the decoded stream must match.
    pub expected: String,
    /// Reference bytes as hex; takes precedence over `expected`.
    pub expected_hex: Option<String>,
    /// What the simulated device sends. Defaults to the reference.
    pub transmit: Option<String>,
    pub inject_fault: Option<InjectedFault>,
    /// Simulated-time budget for the whole run.
    pub timeout: Option<Ticks>,
    pub log_capacity: usize,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            bit_period: BitPeriod::new(DEFAULT_BIT_PERIOD).unwrap_or(BitPeriod::MIN),
            clock_period: 50,
            reset_cycles: 10,
            idle_bits: 2,
            expected: DEFAULT_EXPECTED.to_string(),
            expected_hex: None,
            transmit: None,
            inject_fault: None,
            timeout: None,
            log_capacity: 10_000,
        }
    }
}

impl HarnessConfig {
    pub fn expected_bytes(&self) -> Result<Vec<u8>, HarnessError> {
        match &self.expected_hex {
            Some(text) => {
                let compact: String = text.chars().filter(|c| !c.is_whitespace()).collect();
                Ok(hex::decode(compact)?)
            }
            None => Ok(self.expected.clone().into_bytes()),
        }
    }

    /// Ticks from time zero until the device leaves reset.
    pub fn reset_ticks(&self) -> Ticks {
        self.clock_period.saturating_mul(Ticks::from(self.reset_cycles))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessReport {
    pub decoded: Vec<u8>,
    /// Tick of the last stop-bit sample.
    pub finished_at: Ticks,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HarnessEvent {
    Started { frames: usize },
    Byte { index: usize, value: u8, at: Ticks },
    Failed(HarnessError),
    Finished(HarnessReport),
}

pub struct Harness {
    config: HarnessConfig,
    expected: Vec<u8>,
    transmit: Vec<u8>,
    log: Arc<Mutex<CaptureLog>>,
}

impl Harness {
    pub fn new(config: HarnessConfig) -> Result<Self, HarnessError> {
        let log = Arc::new(Mutex::new(CaptureLog::new(config.log_capacity)));
        Self::with_log(config, log)
    }

    pub fn with_log(config: HarnessConfig, log: Arc<Mutex<CaptureLog>>) -> Result<Self, HarnessError> {
        if config.clock_period == 0 {
            return Err(HarnessError::Config("clock_period must be non-zero".into()));
        }
        let expected = config.expected_bytes()?;
        if expected.is_empty() {
            return Err(HarnessError::Config("nothing to compare: expected is empty".into()));
        }
        let transmit = match &config.transmit {
            Some(text) => text.clone().into_bytes(),
            None => expected.clone(),
        };
        if let Some(injected) = config.inject_fault {
            if injected.frame >= transmit.len() {
                return Err(HarnessError::Config(format!(
                    "inject_fault.frame {} is past the {} transmitted frames",
                    injected.frame,
                    transmit.len()
                )));
            }
        }
        Ok(Self {
            config,
            expected,
            transmit,
            log,
        })
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn expected(&self) -> &[u8] {
        &self.expected
    }

    pub fn log(&self) -> Arc<Mutex<CaptureLog>> {
        self.log.clone()
    }

    /// Runs one simulation. The observer sees every event; returning
    /// `Break` from `Started` or `Byte` stops the run before the next frame.
    pub fn run<F>(&self, mut observer: F) -> Result<HarnessReport, HarnessError>
    where
        F: FnMut(&HarnessEvent) -> ControlFlow<()>,
    {
        let outcome = self.simulate(&mut observer);
        match &outcome {
            Ok(report) => {
                info!(
                    "harness passed: {} frames, done at tick {}",
                    report.decoded.len(),
                    report.finished_at
                );
                let _ = observer(&HarnessEvent::Finished(report.clone()));
            }
            Err(err) => {
                warn!("harness failed: {err}");
                let _ = observer(&HarnessEvent::Failed(err.clone()));
            }
        }
        outcome
    }

    fn simulate<F>(&self, observer: &mut F) -> Result<HarnessReport, HarnessError>
    where
        F: FnMut(&HarnessEvent) -> ControlFlow<()>,
    {
        let config = &self.config;
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        self.drive_device(&line)?;

        info!(
            "harness: {} frames, bit period {}, device out of reset at tick {}",
            self.expected.len(),
            config.bit_period,
            config.reset_ticks()
        );
        let flow = observer(&HarnessEvent::Started {
            frames: self.expected.len(),
        });
        if flow.is_break() {
            return Err(HarnessError::Stopped { index: 0 });
        }

        let mut decoded = Vec::with_capacity(self.expected.len());
        sim.run(async {
            let mut sampler = UartBitSampler::new(config.bit_period);
            for (index, &expected) in self.expected.iter().enumerate() {
                let frame = sampler.decode_frame(&line);
                let result = match config.timeout {
                    Some(budget) => {
                        let remaining = budget.saturating_sub(sim.now());
                        sim.with_timeout(remaining, frame)
                            .await
                            .map_err(|elapsed| HarnessError::Timeout {
                                index,
                                at: elapsed.deadline,
                            })?
                    }
                    None => frame.await,
                };
                let got = result.map_err(|source| HarnessError::Framing { index, source })?;

                let at = sim.now();
                decoded.push(got);
                self.log.lock().push(at, Direction::Rx, vec![got]);
                let flow = observer(&HarnessEvent::Byte {
                    index,
                    value: got,
                    at,
                });

                if got != expected {
                    return Err(HarnessError::Mismatch { index, expected, got });
                }
                if flow.is_break() && index + 1 < self.expected.len() {
                    return Err(HarnessError::Stopped { index: index + 1 });
                }
            }
            Ok::<(), HarnessError>(())
        })??;

        Ok(HarnessReport {
            decoded,
            finished_at: sim.now(),
        })
    }

    /// Holds the line idle through reset, then lays down every frame the
    /// device will send.
    fn drive_device(&self, line: &SimLine) -> Result<(), HarnessError> {
        let config = &self.config;
        let start_at = config.reset_ticks() + config.bit_period.ticks();
        let mut tx = UartTransmitter::new(line.clone(), config.bit_period, start_at)
            .with_idle_bits(config.idle_bits);

        let mut log = self.log.lock();
        for (index, &byte) in self.transmit.iter().enumerate() {
            let fault = match config.inject_fault {
                Some(injected) if injected.frame == index => injected.fault,
                _ => FrameFault::None,
            };
            let at = tx.send_with_fault(byte, fault)?;
            log.push(at, Direction::Tx, vec![byte]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uartbench_decode::FramePhase;

    fn quick(expected: &str) -> HarnessConfig {
        HarnessConfig {
            bit_period: BitPeriod::new(16).unwrap(),
            expected: expected.to_string(),
            ..HarnessConfig::default()
        }
    }

    fn run(config: HarnessConfig) -> (Result<HarnessReport, HarnessError>, Vec<HarnessEvent>) {
        let mut events = Vec::new();
        let result = Harness::new(config).and_then(|h| {
            h.run(|event| {
                events.push(event.clone());
                ControlFlow::Continue(())
            })
        });
        (result, events)
    }

    #[test]
    fn default_config_passes() {
        let (result, events) = run(HarnessConfig::default());
        let report = result.unwrap();
        assert_eq!(report.decoded, DEFAULT_EXPECTED.as_bytes());
        assert_eq!(events.first(), Some(&HarnessEvent::Started { frames: 24 }));
        assert_eq!(events.last(), Some(&HarnessEvent::Finished(report)));
    }

    #[test]
    fn mismatch_names_first_differing_frame() {
        let config = HarnessConfig {
            transmit: Some("Hello".into()),
            ..quick("Help!")
        };
        let (result, _) = run(config);
        assert_eq!(
            result,
            Err(HarnessError::Mismatch {
                index: 3,
                expected: b'p',
                got: b'l'
            })
        );
    }

    #[test]
    fn injected_stop_fault_is_a_framing_error() {
        let config = HarnessConfig {
            inject_fault: Some(InjectedFault {
                frame: 1,
                fault: FrameFault::StopLow,
            }),
            ..quick("abc")
        };
        let (result, events) = run(config);
        match result {
            Err(HarnessError::Framing { index: 1, source }) => {
                assert_eq!(source.phase, FramePhase::Stop)
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert!(matches!(events.last(), Some(HarnessEvent::Failed(_))));
    }

    #[test]
    fn short_transmission_times_out() {
        let config = HarnessConfig {
            transmit: Some("ab".into()),
            timeout: Some(10_000),
            ..quick("abc")
        };
        let (result, _) = run(config);
        assert_eq!(result, Err(HarnessError::Timeout { index: 2, at: 10_000 }));
    }

    #[test]
    fn short_transmission_without_timeout_stalls() {
        let config = HarnessConfig {
            transmit: Some("a".into()),
            ..quick("ab")
        };
        let (result, _) = run(config);
        assert!(matches!(result, Err(HarnessError::Sim(_))));
    }

    #[test]
    fn observer_can_stop_the_run() {
        let harness = Harness::new(quick("xyz")).unwrap();
        let result = harness.run(|event| match event {
            HarnessEvent::Byte { index: 0, .. } => ControlFlow::Break(()),
            _ => ControlFlow::Continue(()),
        });
        assert_eq!(result, Err(HarnessError::Stopped { index: 1 }));
    }

    #[test]
    fn stop_on_start_decodes_nothing() {
        let harness = Harness::new(quick("xyz")).unwrap();
        assert_eq!(harness.config().bit_period.ticks(), 16);
        let mut bytes = 0;
        let result = harness.run(|event| match event {
            HarnessEvent::Started { .. } => ControlFlow::Break(()),
            HarnessEvent::Byte { .. } => {
                bytes += 1;
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Continue(()),
        });
        assert_eq!(result, Err(HarnessError::Stopped { index: 0 }));
        assert_eq!(bytes, 0);
        assert_eq!(harness.log().lock().bytes(Direction::Rx), b"");
    }

    #[test]
    fn expected_hex_overrides_text() {
        let config = HarnessConfig {
            expected_hex: Some("48 69 21 0a".into()),
            ..quick("ignored")
        };
        let harness = Harness::new(config).unwrap();
        assert_eq!(harness.expected(), b"Hi!\n");
        assert!(Harness::new(HarnessConfig {
            expected_hex: Some("4".into()),
            ..HarnessConfig::default()
        })
        .is_err());
    }

    #[test]
    fn config_round_trips_through_json_with_defaults() {
        let config: HarnessConfig =
            serde_json::from_str(r#"{"bit_period": 100, "expected": "ok"}"#).unwrap();
        assert_eq!(config.bit_period.ticks(), 100);
        assert_eq!(config.reset_cycles, 10);
        assert!(serde_json::from_str::<HarnessConfig>(r#"{"bit_period": 0}"#).is_err());
    }

    #[test]
    fn capture_log_holds_both_directions() {
        let harness = Harness::new(quick("ok")).unwrap();
        harness.run(|_| ControlFlow::Continue(())).unwrap();
        let log = harness.log();
        let log = log.lock();
        assert_eq!(log.bytes(Direction::Tx), b"ok");
        assert_eq!(log.bytes(Direction::Rx), b"ok");
    }
}
