//! Tri-epoch deferred memory reclamation.
//!
//! Readers mark short critical sections with [`Collector::enter`] /
//! [`Collector::exit`] (or the scoped [`Collector::pin`]) and never take a lock.
//! Writers unlink an object from a shared structure and hand it to
//! [`Collector::defer`]; its reclamation callback runs exactly once, after the
//! global epoch has advanced twice past the epoch it was deferred in, which
//! cannot happen while any reader that might still see it is active.
//!
//! The global epoch takes the values `0`, `1` and `2` and only moves forward.
//! Each value owns one limbo bucket. An advance is allowed only when no
//! registered thread is inside a critical section; the thread whose
//! compare-and-swap wins the advance drains the bucket that is now two
//! generations old. [`Collector::synchronize`] blocks until it has performed two
//! advances, so everything deferred before it has been reclaimed.
//!
//! Threads register lazily on first use and are unregistered automatically
//! when they exit.
//!
//! ```
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use tri_epoch::Collector;
//!
//! let collector = Collector::new();
//! let freed = Arc::new(AtomicUsize::new(0));
//!
//! let counter = Arc::clone(&freed);
//! collector
//!     .defer(Box::new([0u8; 64]), move |block| {
//!         drop(block);
//!         counter.fetch_add(1, Ordering::SeqCst);
//!     })
//!     .unwrap();
//!
//! collector.synchronize();
//! assert_eq!(freed.load(Ordering::SeqCst), 1);
//! ```
//!
//! 三纪元延迟内存回收。
//! 读者通过 `enter`/`exit`（或作用域化的 `pin`）标记短临界区，从不加锁。
//! 写者将对象从共享结构中摘除后交给 `defer`；回收回调恰好执行一次，在全局纪元
//! 越过其延迟时所在纪元两次之后执行。

mod domain;
mod epoch;
mod error;
mod garbage;
#[cfg(not(feature = "loom"))]
mod process;
mod ptr;
mod reader;
mod state;
mod sync;

pub use domain::{Collector, CollectorBuilder, CollectorStats};
pub use epoch::Epoch;
pub use error::{DeferError, EpochError, RegistrationFault};
#[cfg(not(feature = "loom"))]
pub use process::{
    collector, defer, enter, exit, pin, process_epoch_deinit, process_epoch_init, synchronize,
};
pub use ptr::EpochCell;
pub use reader::Guard;

#[cfg(all(test, not(feature = "loom")))]
mod tests;
