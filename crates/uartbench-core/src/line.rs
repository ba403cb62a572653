use std::cell::RefCell;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

use uartbench_decode::{LineProbe, Ticks};

use crate::error::SimError;
use crate::sim::{Registration, Simulator};

/// Piecewise-constant level history. Transitions are kept sorted and always
/// alternate level, so every transition to low is a falling edge.
#[derive(Debug)]
struct Waveform {
    idle: bool,
    transitions: Vec<(Ticks, bool)>,
}

impl Waveform {
    fn level_at(&self, t: Ticks) -> bool {
        match self.transitions.partition_point(|&(at, _)| at <= t) {
            0 => self.idle,
            n => self.transitions[n - 1].1,
        }
    }

    fn last_level(&self) -> bool {
        self.transitions.last().map_or(self.idle, |&(_, level)| level)
    }

    fn falling_edge_after(&self, t: Ticks) -> Option<Ticks> {
        let from = self.transitions.partition_point(|&(at, _)| at <= t);
        self.transitions[from..]
            .iter()
            .find(|&&(_, level)| !level)
            .map(|&(at, _)| at)
    }
}

/// A single simulated digital line bound to a [`Simulator`].
///
/// Clones share the waveform: the driver keeps one handle to write through
/// [`SimLine::drive`] while the receiver reads another through
/// [`LineProbe`].
#[derive(Debug, Clone)]
pub struct SimLine {
    sim: Simulator,
    wave: Rc<RefCell<Waveform>>,
}

impl SimLine {
    pub fn new(sim: &Simulator, idle: bool) -> Self {
        Self {
            sim: sim.clone(),
            wave: Rc::new(RefCell::new(Waveform {
                idle,
                transitions: Vec::new(),
            })),
        }
    }

    pub fn simulator(&self) -> &Simulator {
        &self.sim
    }

    /// Sets the line to `level` from tick `at` on.
    ///
    /// Driving the level the line already has is a no-op. A second drive at
    /// the same tick replaces the first.
    pub fn drive(&self, at: Ticks, level: bool) -> Result<(), SimError> {
        let now = self.sim.now();
        if at < now {
            return Err(SimError::DriveInPast { at, now });
        }

        let mut wave = self.wave.borrow_mut();
        if let Some(&(last, _)) = wave.transitions.last() {
            if at < last {
                return Err(SimError::NonMonotonicDrive { at, last });
            }
            if at == last {
                wave.transitions.pop();
            }
        }
        if wave.last_level() != level {
            wave.transitions.push((at, level));
        }
        Ok(())
    }

    pub fn level_at(&self, t: Ticks) -> bool {
        self.wave.borrow().level_at(t)
    }

    pub fn level(&self) -> bool {
        self.level_at(self.sim.now())
    }

    pub fn transitions(&self) -> Vec<(Ticks, bool)> {
        self.wave.borrow().transitions.clone()
    }
}

impl LineProbe for SimLine {
    fn falling_edge(&self) -> impl Future<Output = ()> + '_ {
        FallingEdge {
            line: self,
            since: self.sim.now(),
            registration: Registration::new(self.sim.clone()),
        }
    }

    fn wait(&self, ticks: Ticks) -> impl Future<Output = ()> + '_ {
        self.sim.timer(ticks)
    }

    fn read(&self) -> bool {
        self.level()
    }
}

/// Resolves at the first falling edge strictly after the wait began.
///
/// The waveform is re-examined on every poll, so edges driven after the
/// wait started are still seen. With no edge ahead it stays pending without
/// registering anything.
#[derive(Debug)]
#[must_use = "futures do nothing unless awaited"]
pub struct FallingEdge<'a> {
    line: &'a SimLine,
    since: Ticks,
    registration: Registration,
}

impl Future for FallingEdge<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let edge = this.line.wave.borrow().falling_edge_after(this.since);
        match edge {
            Some(at) if at <= this.line.sim.now() => {
                this.registration.release();
                Poll::Ready(())
            }
            Some(at) => {
                this.registration.arm(at, cx.waker());
                Poll::Pending
            }
            None => {
                this.registration.release();
                Poll::Pending
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_includes_transition_at_same_tick() {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        line.drive(10, false).unwrap();
        line.drive(20, true).unwrap();

        assert!(line.level_at(9));
        assert!(!line.level_at(10));
        assert!(!line.level_at(19));
        assert!(line.level_at(20));
    }

    #[test]
    fn redundant_and_replaced_drives_collapse() {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        line.drive(0, true).unwrap();
        line.drive(5, false).unwrap();
        line.drive(5, true).unwrap();
        line.drive(8, false).unwrap();
        line.drive(9, false).unwrap();

        assert_eq!(line.transitions(), vec![(8, false)]);
    }

    #[test]
    fn driving_backwards_is_rejected() {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        line.drive(30, false).unwrap();
        assert_eq!(
            line.drive(29, true),
            Err(SimError::NonMonotonicDrive { at: 29, last: 30 })
        );
    }

    #[test]
    fn falling_edge_skips_edges_before_the_wait() {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        for (at, level) in [(10, false), (15, true), (40, false), (45, true)] {
            line.drive(at, level).unwrap();
        }

        let at = sim
            .run(async {
                sim.timer(10).await;
                line.falling_edge().await;
                sim.now()
            })
            .unwrap();
        assert_eq!(at, 40);
        assert_eq!(sim.pending_waits(), 0);
    }

    #[test]
    fn edge_on_a_quiet_line_stalls() {
        let sim = Simulator::new();
        let line = SimLine::new(&sim, true);
        let err = sim.run(line.falling_edge()).unwrap_err();
        assert_eq!(err, SimError::Stalled { at: 0 });
    }
}
