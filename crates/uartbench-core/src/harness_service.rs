use crossbeam_channel::{unbounded, Receiver, Sender};
use log::debug;
use parking_lot::Mutex;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::error::HarnessError;
use crate::harness::{Harness, HarnessConfig, HarnessEvent, HarnessReport};
use crate::logbuf::CaptureLog;

enum Command {
    Stop,
}

/// Runs a [`Harness`] on a worker thread and streams its events.
///
/// The simulation itself stays single-threaded; the worker owns it from
/// start to finish. Events arrive on [`HarnessService::events`] and the
/// channel disconnects once the run is over.
pub struct HarnessService {
    cfg: HarnessConfig,
    tx_cmd: Sender<Command>,
    rx_evt: Receiver<HarnessEvent>,
    log: Arc<Mutex<CaptureLog>>,
    handle: JoinHandle<Result<HarnessReport, HarnessError>>,
}

impl HarnessService {
    /// Validates `cfg` on the calling thread, then starts the run.
    pub fn spawn(cfg: HarnessConfig) -> Result<Self, HarnessError> {
        let log = Arc::new(Mutex::new(CaptureLog::new(cfg.log_capacity)));
        let harness = Harness::with_log(cfg.clone(), log.clone())?;
        let (tx_cmd, rx_cmd) = unbounded::<Command>();
        let (tx_evt, rx_evt) = unbounded::<HarnessEvent>();

        let handle = std::thread::spawn(move || {
            harness.run(|event| {
                let _ = tx_evt.send(event.clone());
                if matches!(event, HarnessEvent::Failed(_) | HarnessEvent::Finished(_)) {
                    return ControlFlow::Continue(());
                }
                match rx_cmd.try_recv() {
                    Ok(Command::Stop) => {
                        debug!("stop requested");
                        ControlFlow::Break(())
                    }
                    Err(_) => ControlFlow::Continue(()),
                }
            })
        });

        Ok(Self {
            cfg,
            tx_cmd,
            rx_evt,
            log,
            handle,
        })
    }

    /// Asks the run to end before its next frame.
    pub fn stop(&self) {
        let _ = self.tx_cmd.send(Command::Stop);
    }

    pub fn events(&self) -> &Receiver<HarnessEvent> {
        &self.rx_evt
    }

    pub fn log(&self) -> Arc<Mutex<CaptureLog>> {
        self.log.clone()
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.cfg
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Waits for the worker and returns the run's outcome.
    pub fn join(self) -> Result<HarnessReport, HarnessError> {
        self.handle.join().unwrap_or(Err(HarnessError::Panicked))
    }
}
