use crate::domain::Collector;
use crate::error::{EpochError, RegistrationFault};
use crate::state::{Record, Registry, SharedState};
use crate::sync::{Arc, current_thread, thread_local};
use std::cell::{Cell, RefCell};
use std::marker::PhantomData;
use std::vec::Vec;

/// This thread's record in one collector, with its critical-section depth.
///
/// The depth lives here rather than in the shared [`Record`] because only the
/// owning thread ever reads or writes it.
///
/// 本线程在某个收集器中的记录，以及临界区嵌套深度。
struct LocalRecord {
    registry: Arc<Registry>,
    record: Arc<Record>,
    depth: Cell<usize>,
}

/// Every record the current thread owns, one per collector it has touched.
///
/// Dropping it is the thread-exit hook: each record is unlinked from its
/// registry before it is freed.
#[derive(Default)]
struct LocalRecords {
    entries: RefCell<Vec<LocalRecord>>,
}

impl Drop for LocalRecords {
    fn drop(&mut self) {
        for local in self.entries.get_mut().drain(..) {
            if local.depth.get() > 0 {
                tracing::warn!(
                    target: "tri_epoch",
                    registry = local.registry.id(),
                    depth = local.depth.get(),
                    "thread exited inside a critical section"
                );
            }

            // Already gone if the collector was torn down first.
            let _ = local.registry.remove(&local.record);
        }
    }
}

thread_local! {
    static LOCAL_RECORDS: LocalRecords = LocalRecords::default();
}

fn find<'a>(entries: &'a [LocalRecord], registry: &Registry) -> Option<&'a LocalRecord> {
    entries
        .iter()
        .find(|local| local.registry.id() == registry.id())
}

/// Runs `f` on the calling thread's record, creating and registering one first
/// if the thread has none in this collector.
///
/// The fast path is a thread-local lookup with no locking.
fn with_local<R>(registry: &Arc<Registry>, f: impl FnOnce(&LocalRecord) -> R) -> Result<R, EpochError> {
    LOCAL_RECORDS
        .try_with(|local| {
            {
                let entries = local.entries.borrow();
                if let Some(found) = find(&entries, registry) {
                    return Ok(f(found));
                }
            }

            let record = registry.insert(current_thread().id())?;

            let mut entries = local.entries.borrow_mut();
            entries.retain(|local| !local.registry.is_closed());
            entries.push(LocalRecord {
                registry: Arc::clone(registry),
                record,
                depth: Cell::new(0),
            });
            drop(entries);

            let entries = local.entries.borrow();
            let created = entries
                .last()
                .ok_or(EpochError::Registration(RegistrationFault::NotRegistered))?;
            Ok(f(created))
        })
        .unwrap_or(Err(EpochError::Registration(RegistrationFault::ThreadExiting)))
}

/// Looks up the calling thread's record without creating one.
fn with_existing<R>(registry: &Registry, f: impl FnOnce(Option<&LocalRecord>) -> R) -> Option<R> {
    LOCAL_RECORDS
        .try_with(|local| {
            let entries = local.entries.borrow();
            f(find(&entries, registry))
        })
        .ok()
}

pub(crate) fn register(shared: &SharedState) -> Result<(), EpochError> {
    with_local(&shared.registry, |_| ())
}

/// Removes the calling thread's record from `registry`.
pub(crate) fn unregister(registry: &Registry) -> Result<(), EpochError> {
    LOCAL_RECORDS
        .try_with(|local| {
            let mut entries = local.entries.borrow_mut();
            let position = entries
                .iter()
                .position(|local| local.registry.id() == registry.id())
                .ok_or(EpochError::Registration(RegistrationFault::NotRegistered))?;

            if entries[position].depth.get() > 0 {
                return Err(EpochError::Registration(RegistrationFault::StillPinned));
            }

            registry.remove(&entries[position].record)?;
            entries.swap_remove(position);
            Ok(())
        })
        .unwrap_or(Err(EpochError::Registration(RegistrationFault::ThreadExiting)))
}

/// Marks the start of a critical section.
///
/// Only the outermost call publishes a snapshot of the global epoch. Nested
/// calls only deepen the count.
#[inline]
pub(crate) fn enter(shared: &SharedState) -> Result<(), EpochError> {
    with_local(&shared.registry, |local| {
        let depth = local.depth.get();
        if depth == 0 {
            local.record.publish(shared.epoch.load());
        }
        local.depth.set(depth + 1);
    })
}

/// Marks the end of a critical section.
///
/// # Panics
/// Panics if the calling thread is not inside a critical section of this
/// collector.
#[inline]
pub(crate) fn exit(registry: &Registry) {
    let balanced = with_existing(registry, |local| {
        let Some(local) = local else {
            return false;
        };

        let depth = local.depth.get();
        if depth == 0 {
            return false;
        }

        if depth == 1 {
            local.record.retract();
        }
        local.depth.set(depth - 1);
        true
    });

    // During thread teardown the record has already been unlinked.
    assert!(
        balanced.unwrap_or(true),
        "BUG: exit() without a matching enter() on this thread. \
         This indicates incorrect API usage."
    );
}

pub(crate) fn depth(registry: &Registry) -> usize {
    with_existing(registry, |local| local.map_or(0, |local| local.depth.get())).unwrap_or(0)
}

/// A scoped critical section.
///
/// Obtained from [`Collector::pin`]. While a `Guard` is alive the calling thread
/// counts as active, so nothing deferred after the guard was taken can be
/// reclaimed. Dropping it calls [`Collector::exit`], including during unwinding.
///
/// `Guard` is `!Send` and `!Sync`: it describes the state of the thread that
/// created it. Cloning a guard nests the critical section; the thread stays
/// active until every clone is dropped.
///
/// 作用域临界区守卫。
/// 通过 [`Collector::pin`] 获得。`Guard` 存活期间调用线程被视为活跃，因此
/// 在获取守卫之后被延迟回收的对象都不会被回收。drop 时调用
/// [`Collector::exit`]，展开（unwinding）时同样如此。
/// `Guard` 是 `!Send` 和 `!Sync` 的。克隆守卫会嵌套临界区，线程在所有克隆
/// 都被 drop 之前保持活跃。
#[must_use]
pub struct Guard<'a> {
    collector: &'a Collector,
    _not_send: PhantomData<*const ()>,
}

impl<'a> Guard<'a> {
    pub(crate) fn new(collector: &'a Collector) -> Self {
        Guard {
            collector,
            _not_send: PhantomData,
        }
    }

    /// The collector this guard belongs to.
    #[inline]
    pub fn collector(&self) -> &'a Collector {
        self.collector
    }
}

impl<'a> Clone for Guard<'a> {
    #[inline]
    fn clone(&self) -> Self {
        let nested = with_existing(self.collector.registry(), |local| {
            local.map(|local| {
                let depth = local.depth.get();
                assert!(
                    depth > 0,
                    "BUG: Cloning a Guard in an unpinned state (depth = 0). \
                     This indicates incorrect API usage or a library bug."
                );
                local.depth.set(depth + 1);
            })
        });

        assert!(
            matches!(nested, Some(Some(()))),
            "BUG: Cloning a Guard on a thread without a record."
        );

        Guard::new(self.collector)
    }
}

impl<'a> Drop for Guard<'a> {
    #[inline]
    fn drop(&mut self) {
        self.collector.exit();
    }
}

impl std::fmt::Debug for Guard<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guard")
            .field("depth", &depth(self.collector.registry()))
            .finish()
    }
}
