//! Virtual-time executor.
//!
//! A [`Simulator`] drives one future to completion. Whenever that future is
//! pending and nothing has woken it, simulated time jumps straight to the
//! earliest registered deadline, so a run costs as many polls as it has
//! suspension points regardless of how many ticks it spans.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use futures_lite::future;
use log::{debug, trace};
use uartbench_decode::Ticks;

use crate::error::{Elapsed, SimError};

/// Deadline first so the map iterates in firing order; the id keeps
/// simultaneous waits apart.
type WaitKey = (Ticks, u64);

#[derive(Debug, Default)]
struct Kernel {
    now: Cell<Ticks>,
    next_id: Cell<u64>,
    waits: RefCell<BTreeMap<WaitKey, Waker>>,
}

/// Handle to one simulation run's clock. Cheap to clone; all clones share
/// the same time.
#[derive(Debug, Clone, Default)]
pub struct Simulator {
    kernel: Rc<Kernel>,
}

impl Simulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Ticks {
        self.kernel.now.get()
    }

    /// Number of waits currently registered with the clock.
    pub fn pending_waits(&self) -> usize {
        self.kernel.waits.borrow().len()
    }

    pub fn timer(&self, ticks: Ticks) -> Timer {
        self.timer_at(self.now().saturating_add(ticks))
    }

    pub fn timer_at(&self, deadline: Ticks) -> Timer {
        Timer {
            registration: Registration::new(self.clone()),
            deadline,
        }
    }

    /// Races `fut` against a timer `ticks` from now. The future wins a tie;
    /// whichever side loses is dropped, releasing its waits.
    pub async fn with_timeout<F: Future>(&self, ticks: Ticks, fut: F) -> Result<F::Output, Elapsed> {
        let deadline = self.now().saturating_add(ticks);
        future::or(async { Ok(fut.await) }, async {
            self.timer_at(deadline).await;
            Err(Elapsed { deadline })
        })
        .await
    }

    /// Polls `fut` to completion, advancing simulated time as needed.
    ///
    /// Fails with [`SimError::Stalled`] once the future is pending with no
    /// registered wait left to fire.
    pub fn run<F: Future>(&self, fut: F) -> Result<F::Output, SimError> {
        let flag = Arc::new(WakeFlag::default());
        let waker = Waker::from(flag.clone());
        let mut cx = Context::from_waker(&waker);
        futures_lite::pin!(fut);

        loop {
            flag.take();
            if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
                return Ok(out);
            }
            if flag.take() {
                continue;
            }
            match self.advance() {
                Some(now) => trace!("advanced to tick {now}"),
                None => {
                    let at = self.now();
                    debug!("simulation stalled at tick {at}");
                    return Err(SimError::Stalled { at });
                }
            }
        }
    }

    /// Moves time to the earliest deadline and wakes everything due then.
    fn advance(&self) -> Option<Ticks> {
        let waits = self.kernel.waits.borrow();
        let (&(deadline, _), _) = waits.iter().next()?;
        let now = deadline.max(self.now());
        self.kernel.now.set(now);
        for waker in waits.range(..=(now, u64::MAX)).map(|(_, waker)| waker) {
            waker.wake_by_ref();
        }
        Some(now)
    }
}

#[derive(Debug, Default)]
struct WakeFlag(AtomicBool);

impl WakeFlag {
    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

impl Wake for WakeFlag {
    fn wake(self: Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }

    fn wake_by_ref(self: &Arc<Self>) {
        self.0.store(true, Ordering::Release);
    }
}

/// A single slot in the clock's wait list. Dropping it deregisters, which is
/// how cancelled futures leave the simulator clean.
#[derive(Debug)]
pub(crate) struct Registration {
    sim: Simulator,
    key: Option<WaitKey>,
}

impl Registration {
    pub(crate) fn new(sim: Simulator) -> Self {
        Self { sim, key: None }
    }

    pub(crate) fn simulator(&self) -> &Simulator {
        &self.sim
    }

    pub(crate) fn arm(&mut self, deadline: Ticks, waker: &Waker) {
        let kernel = &self.sim.kernel;
        let mut waits = kernel.waits.borrow_mut();
        if let Some(key) = self.key {
            if key.0 == deadline {
                waits.insert(key, waker.clone());
                return;
            }
            waits.remove(&key);
        }
        let id = kernel.next_id.get();
        kernel.next_id.set(id.wrapping_add(1));
        let key = (deadline, id);
        waits.insert(key, waker.clone());
        self.key = Some(key);
    }

    pub(crate) fn release(&mut self) {
        if let Some(key) = self.key.take() {
            self.sim.kernel.waits.borrow_mut().remove(&key);
        }
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.release();
    }
}

/// Resolves once simulated time reaches its deadline.
#[derive(Debug)]
#[must_use = "timers do nothing unless awaited"]
pub struct Timer {
    registration: Registration,
    deadline: Ticks,
}

impl Timer {
    pub fn deadline(&self) -> Ticks {
        self.deadline
    }
}

impl Future for Timer {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let deadline = self.deadline;
        if self.registration.simulator().now() >= deadline {
            self.registration.release();
            Poll::Ready(())
        } else {
            self.registration.arm(deadline, cx.waker());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_advance_virtual_time() {
        let sim = Simulator::new();
        let out = sim
            .run(async {
                sim.timer(100).await;
                let first = sim.now();
                sim.timer(0).await;
                sim.timer(23).await;
                (first, sim.now())
            })
            .unwrap();
        assert_eq!(out, (100, 123));
        assert_eq!(sim.pending_waits(), 0);
    }

    #[test]
    fn pending_forever_is_a_stall() {
        let sim = Simulator::new();
        let err = sim
            .run(async {
                sim.timer(7).await;
                future::pending::<()>().await;
            })
            .unwrap_err();
        assert_eq!(err, SimError::Stalled { at: 7 });
    }

    #[test]
    fn timeout_drops_the_losing_wait() {
        let sim = Simulator::new();
        let out = sim.run(sim.with_timeout(50, sim.timer(80))).unwrap();
        assert_eq!(out, Err(Elapsed { deadline: 50 }));
        assert_eq!(sim.now(), 50);
        assert_eq!(sim.pending_waits(), 0);
    }

    #[test]
    fn future_wins_a_tie_with_its_timeout() {
        let sim = Simulator::new();
        let out = sim
            .run(sim.with_timeout(40, async {
                sim.timer(40).await;
                "done"
            }))
            .unwrap();
        assert_eq!(out, Ok("done"));
    }

    #[test]
    fn dropping_a_polled_timer_deregisters_it() {
        let sim = Simulator::new();
        let mut timer = sim.timer(10);
        let waker = Waker::from(Arc::new(WakeFlag::default()));
        let mut cx = Context::from_waker(&waker);
        assert!(Pin::new(&mut timer).poll(&mut cx).is_pending());
        assert_eq!(sim.pending_waits(), 1);
        drop(timer);
        assert_eq!(sim.pending_waits(), 0);
    }
}
