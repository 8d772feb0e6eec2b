//! The process-wide default collector.
//!
//! Drivers that do not want to thread a [`Collector`] through their code call
//! [`process_epoch_init`] once at startup and [`process_epoch_deinit`] at
//! shutdown, and use the free functions in between.
//!
//! 进程级默认收集器。

use crate::domain::Collector;
use crate::error::{DeferError, EpochError};
use crate::reader::Guard;
use once_cell::sync::OnceCell;

static PROCESS_COLLECTOR: OnceCell<Collector> = OnceCell::new();

/// Install the process-wide collector: epoch 0, empty limbo.
///
/// # Errors
/// [`EpochError::AlreadyInitialized`] on a second call.
pub fn process_epoch_init() -> Result<(), EpochError> {
    PROCESS_COLLECTOR
        .set(Collector::new())
        .map_err(|_| EpochError::AlreadyInitialized)
}

/// Report entries the process-wide collector never reclaimed.
///
/// Call [`synchronize`] first. The collector stays installed, so late
/// callers still work; their entries are simply reported by the next check.
///
/// # Errors
/// [`EpochError::Leak`] if limbo is not empty, [`EpochError::Uninitialized`]
/// if [`process_epoch_init`] was never called.
pub fn process_epoch_deinit() -> Result<(), EpochError> {
    collector()?.check_drained()
}

/// The process-wide collector.
pub fn collector() -> Result<&'static Collector, EpochError> {
    PROCESS_COLLECTOR.get().ok_or(EpochError::Uninitialized)
}

/// [`Collector::enter`] on the process-wide collector.
#[inline]
pub fn enter() -> Result<(), EpochError> {
    collector()?.enter()
}

/// [`Collector::exit`] on the process-wide collector.
///
/// # Panics
/// Panics if the process-wide collector is not initialized or the calling
/// thread is not inside a critical section.
#[inline]
pub fn exit() {
    match PROCESS_COLLECTOR.get() {
        Some(collector) => collector.exit(),
        None => panic!("BUG: exit() before process_epoch_init()"),
    }
}

/// [`Collector::pin`] on the process-wide collector.
#[inline]
pub fn pin() -> Result<Guard<'static>, EpochError> {
    collector()?.pin()
}

/// [`Collector::defer`] on the process-wide collector.
///
/// # Errors
/// [`EpochError::Uninitialized`] before [`process_epoch_init`], and any error
/// of [`Collector::defer`]. Either way the payload and callback come back in
/// the [`DeferError`].
pub fn defer<P, F>(payload: P, callback: F) -> Result<(), DeferError<(P, F)>>
where
    P: Send + 'static,
    F: FnOnce(P) + Send + 'static,
{
    match PROCESS_COLLECTOR.get() {
        Some(collector) => collector.defer(payload, callback),
        None => Err(DeferError::new(
            EpochError::Uninitialized,
            (payload, callback),
        )),
    }
}

/// [`Collector::synchronize`] on the process-wide collector.
///
/// Does nothing if the collector was never initialized: nothing can have been
/// deferred.
pub fn synchronize() {
    if let Some(collector) = PROCESS_COLLECTOR.get() {
        collector.synchronize();
    }
}
