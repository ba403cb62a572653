use std::future::Future;

use crate::Ticks;

/// Read-only view of one digital line together with the two suspension
/// points a sampling receiver needs.
///
/// Implementations own the notion of time. The decoder only ever asks to be
/// resumed after an edge or after a relative delay, then reads the
/// instantaneous level.
pub trait LineProbe {
    /// Resolves at the first 1 -> 0 transition that happens after the call.
    fn falling_edge(&self) -> impl Future<Output = ()> + '_;

    /// Resolves once `ticks` time units have elapsed.
    fn wait(&self, ticks: Ticks) -> impl Future<Output = ()> + '_;

    /// Logic level of the line at the current instant.
    fn read(&self) -> bool;
}
