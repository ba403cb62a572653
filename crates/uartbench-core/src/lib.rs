//! Simulation side of the bench: virtual time, a simulated line and the
//! device stand-in that drives it, plus the capture log and the harness
//! that checks decoded traffic against a reference.

pub mod encoding;
pub mod error;
pub mod harness;
pub mod harness_service;
pub mod line;
pub mod logbuf;
pub mod sim;
pub mod transmitter;

pub use encoding::{TextEncoding, UnknownEncoding};
pub use error::{Elapsed, HarnessError, SimError};
pub use harness::{Harness, HarnessConfig, HarnessEvent, HarnessReport, InjectedFault};
pub use harness_service::HarnessService;
pub use line::SimLine;
pub use logbuf::{CaptureEntry, CaptureLog, Direction};
pub use sim::{Simulator, Timer};
pub use transmitter::{FrameFault, UartTransmitter};
