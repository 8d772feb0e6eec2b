use crate::epoch::{EPOCH_COUNT, Epoch, GlobalEpoch};
use crate::error::{DeferError, EpochError};
use crate::garbage::{DeferredEntry, Limbo};
use crate::reader::{self, Guard};
use crate::state::{
    AUTO_ADVANCE_THRESHOLD, Config, DEFAULT_SPIN_LIMIT, Registry, SharedState,
};
use crate::sync::{Arc, Ordering, current_thread, fence, spin_loop, yield_now};
use std::boxed::Box;

/// Builder for configuring a [`Collector`].
///
/// - `auto_advance_threshold`: pending-entry count above which `defer` makes one
///   advance attempt
/// - `max_records`: cap on registered threads
/// - `spin_limit`: failed advance attempts `synchronize` spins through before
///   yielding
///
/// # Example
/// ```
/// use tri_epoch::Collector;
///
/// let collector = Collector::builder()
///     .auto_advance_threshold(128)
///     .max_records(32)
///     .spin_limit(64)
///     .build();
/// ```
///
/// 用于配置 [`Collector`] 的构建器。
pub struct CollectorBuilder {
    auto_advance_threshold: Option<usize>,
    max_records: Option<usize>,
    spin_limit: u32,
}

impl CollectorBuilder {
    /// Create a new builder with default settings.
    /// 创建一个带有默认设置的新构建器。
    #[inline]
    pub fn new() -> Self {
        Self {
            auto_advance_threshold: Some(AUTO_ADVANCE_THRESHOLD),
            max_records: None,
            spin_limit: DEFAULT_SPIN_LIMIT,
        }
    }

    /// Set the opportunistic advance threshold.
    ///
    /// When the pending count exceeds this threshold after a `defer`, that
    /// `defer` makes a single [`Collector::try_advance`] attempt.
    /// Pass `None` to disable it; reclamation then happens only through
    /// `try_advance` and `synchronize`.
    ///
    /// Default: `Some(64)`
    ///
    /// 设置顺带推进的阈值。
    /// 当 `defer` 之后待回收数量超过此阈值时，该次 `defer` 会尝试一次推进。
    /// 传递 `None` 可禁用。
    #[inline]
    pub fn auto_advance_threshold(mut self, threshold: impl Into<Option<usize>>) -> Self {
        self.auto_advance_threshold = threshold.into();
        self
    }

    /// Cap the number of simultaneously registered threads.
    ///
    /// Registering past the cap fails with [`EpochError::Allocation`].
    ///
    /// Default: `None` (unbounded)
    #[inline]
    pub fn max_records(mut self, limit: impl Into<Option<usize>>) -> Self {
        self.max_records = limit.into();
        self
    }

    /// Set how many failed advance attempts `synchronize` spins through before
    /// it starts yielding the CPU between attempts.
    ///
    /// Default: `1024`
    #[inline]
    pub fn spin_limit(mut self, spins: u32) -> Self {
        self.spin_limit = spins;
        self
    }

    /// Build the collector: global epoch 0, all limbo buckets empty.
    /// 构建收集器：全局纪元为 0，所有 limbo 桶为空。
    #[inline]
    pub fn build(self) -> Collector {
        let shared = Arc::new(SharedState {
            epoch: GlobalEpoch::new(),
            registry: Arc::new(Registry::new(self.max_records)),
            limbo: Limbo::new(),
            config: Config {
                auto_advance_threshold: self.auto_advance_threshold,
                spin_limit: self.spin_limit,
            },
        });

        tracing::debug!(
            target: "tri_epoch",
            registry = shared.registry.id(),
            auto_advance_threshold = ?self.auto_advance_threshold,
            max_records = ?self.max_records,
            "collector initialized"
        );

        Collector { shared }
    }
}

impl Default for CollectorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of a collector, for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorStats {
    /// Current global epoch.
    pub epoch: Epoch,
    /// Successful advances since the collector was built.
    pub advances: u64,
    /// Threads currently holding a record.
    pub registered: usize,
    /// Records currently inside a critical section.
    pub active: usize,
    /// Entries waiting in each limbo bucket, indexed by epoch.
    pub pending: [usize; EPOCH_COUNT],
    /// Callbacks run since the collector was built.
    pub reclaimed: u64,
}

/// An epoch-based reclamation domain.
///
/// `Collector` is the explicit context object holding the global epoch, the
/// registry of per-thread records and the three limbo buckets. Independent
/// collectors never interact, which keeps tests isolated.
///
/// It is `Clone` (cheap, reference-counted) and `Send + Sync`: create one at
/// startup and hand clones to every thread that reads or retires shared data.
///
/// **Typical Usage**:
/// ```
/// use tri_epoch::Collector;
///
/// let collector = Collector::new();
///
/// // Reader: mark a short critical section.
/// {
///     let _guard = collector.pin().unwrap();
///     // read the shared structure ...
/// }
///
/// // Writer: unlink, then hand the old object over.
/// let unlinked = Box::new(String::from("old"));
/// collector.defer_drop(unlinked).unwrap();
///
/// // Barrier: everything deferred so far is reclaimed.
/// collector.synchronize();
/// assert!(collector.deinit().is_ok());
/// ```
///
/// # Liveness
///
/// A thread that stays inside a critical section forever stops the global
/// epoch, and with it all reclamation, including any pending
/// [`synchronize`](Collector::synchronize). Keep critical sections short and
/// leave them on every path; [`Collector::pin`] does that for you.
///
/// 基于纪元的回收域。
/// `Collector` 是显式的上下文对象，持有全局纪元、每线程记录表和三个 limbo 桶。
/// 互相独立的收集器之间不会交互。
/// 它是 `Clone` 且 `Send + Sync` 的。
/// **活性**：一个永远停留在临界区内的线程会阻止全局纪元推进，从而阻塞所有
/// 回收，包括正在等待的 `synchronize`。
#[derive(Clone, Debug)]
pub struct Collector {
    shared: Arc<SharedState>,
}

impl Collector {
    /// Create a collector with default settings.
    /// 使用默认设置创建收集器。
    #[inline]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Create a builder for configuring a collector.
    #[inline]
    pub fn builder() -> CollectorBuilder {
        CollectorBuilder::new()
    }

    #[inline]
    pub(crate) fn registry(&self) -> &Registry {
        &self.shared.registry
    }

    /// Create the calling thread's record if it has none yet.
    ///
    /// Idempotent. `enter` and `defer` register implicitly; calling this first
    /// surfaces [`EpochError::Allocation`] before any payload is handed over.
    pub fn register(&self) -> Result<(), EpochError> {
        reader::register(&self.shared)
    }

    /// Remove the calling thread's record.
    ///
    /// A later `enter` creates a fresh record. Threads are unregistered
    /// automatically when they exit, so this is only needed to release the slot
    /// early.
    ///
    /// # Errors
    /// [`RegistrationFault::NotRegistered`](crate::RegistrationFault) if the
    /// thread has no record, and
    /// [`RegistrationFault::StillPinned`](crate::RegistrationFault) if it is
    /// inside a critical section.
    ///
    /// 移除调用线程的记录。线程退出时会自动注销。
    pub fn unregister(&self) -> Result<(), EpochError> {
        reader::unregister(&self.shared.registry)
    }

    /// Whether the calling thread currently holds a record, looked up in the
    /// registry by thread id.
    pub fn is_registered(&self) -> bool {
        self.shared.registry.contains(current_thread().id())
    }

    /// Enter a critical section on the calling thread.
    ///
    /// Registers the thread on first use. Calls may nest; the thread stays
    /// active until the matching number of [`exit`](Collector::exit) calls.
    /// Lock-free and allocation-free once the thread is registered.
    ///
    /// Prefer [`pin`](Collector::pin), which cannot forget to exit.
    ///
    /// 在调用线程上进入临界区。首次调用时注册线程；可以嵌套。
    #[inline]
    pub fn enter(&self) -> Result<(), EpochError> {
        reader::enter(&self.shared)
    }

    /// Leave the critical section entered by the matching [`enter`](Collector::enter).
    ///
    /// # Panics
    /// Panics if the calling thread is not inside a critical section of this
    /// collector.
    #[inline]
    pub fn exit(&self) {
        reader::exit(&self.shared.registry)
    }

    /// Enter a critical section that ends when the returned guard is dropped.
    ///
    /// 进入一个在返回的守卫被 drop 时结束的临界区。
    #[inline]
    pub fn pin(&self) -> Result<Guard<'_>, EpochError> {
        self.enter()?;
        Ok(Guard::new(self))
    }

    /// Whether the calling thread is inside a critical section of this collector.
    pub fn is_pinned(&self) -> bool {
        reader::depth(&self.shared.registry) > 0
    }

    /// Schedule `callback(payload)` to run once no reader can still observe
    /// `payload`.
    ///
    /// Returns immediately. The callback runs exactly once, on whichever thread
    /// drains its bucket, so it must not rely on thread identity and should not
    /// re-enter this collector.
    ///
    /// # Errors
    /// Fails only if the calling thread cannot be registered. Nothing is
    /// enqueued then: the returned [`DeferError`] hands the payload and the
    /// callback back, neither dropped nor run, so the caller can retry. Readers
    /// may still reference the payload, so do not drop it outright.
    ///
    /// 安排在没有读者还能观察到 `payload` 时执行 `callback(payload)`。
    /// 立即返回；回调恰好执行一次，可能在任意线程上执行。
    /// 失败时载荷和回调通过 [`DeferError`] 原样归还，可以重试。
    pub fn defer<P, F>(&self, payload: P, callback: F) -> Result<(), DeferError<(P, F)>>
    where
        P: Send + 'static,
        F: FnOnce(P) + Send + 'static,
    {
        if let Err(err) = self.register() {
            return Err(DeferError::new(err, (payload, callback)));
        }

        self.push(DeferredEntry::with_callback(payload, callback));
        Ok(())
    }

    /// Schedule `value` to be dropped once no reader can still observe it.
    ///
    /// # Errors
    /// As [`defer`](Collector::defer); the box comes back in the error.
    pub fn defer_drop<T: Send + 'static>(&self, value: Box<T>) -> Result<(), DeferError<Box<T>>> {
        if let Err(err) = self.register() {
            return Err(DeferError::new(err, value));
        }

        self.push(DeferredEntry::from_box(value));
        Ok(())
    }

    /// Schedule a pointer obtained from [`Box::into_raw`] to be freed once no
    /// reader can still observe it.
    ///
    /// # Safety
    /// `ptr` must come from `Box::<T>::into_raw`, must already be unreachable
    /// for new readers, and must not be freed by anyone else. On error the
    /// pointer is left untouched and still owned by the caller.
    pub unsafe fn defer_destroy<T: Send + 'static>(&self, ptr: *mut T) -> Result<(), EpochError> {
        self.register()?;
        self.push(unsafe { DeferredEntry::from_raw(ptr) });
        Ok(())
    }

    /// Enqueue into the bucket of the epoch read now, then maybe advance once.
    fn push(&self, entry: DeferredEntry) {
        let epoch = self.shared.epoch.load();
        let pending = self.shared.limbo.push(epoch, entry);

        if let Some(threshold) = self.shared.config.auto_advance_threshold {
            if pending > threshold {
                self.try_advance();
            }
        }
    }

    /// Advance the global epoch by one if no record holds it back, then drain
    /// the bucket that is now two generations old.
    ///
    /// Returns `true` if this call performed the advance. `false` means either
    /// some thread is inside a critical section or another thread advanced
    /// first; neither is an error.
    ///
    /// **Reclamation Logic**:
    /// - Every record inside a critical section holds the epoch back. A record
    ///   pinned in the current epoch `e` may still reach state unlinked during
    ///   `e`. A record pinned in an older epoch announced itself after an
    ///   earlier scan and may predate unlinks that now sit in the bucket about
    ///   to be drained.
    /// - The transition `e -> e+1` is a single CAS on the monotonic stamp
    ///   behind `e`, so at most one advance per stamp takes effect and a scan
    ///   that went stale during a full cycle cannot commit.
    /// - The winner drains bucket `(e + 2) mod 3`: entries deferred while the
    ///   counter read `e - 1`, two advances ago.
    ///
    /// 如果没有记录阻止，则将全局纪元推进一步，然后清空已落后两代的桶。
    /// 返回 `true` 表示本次调用完成了推进。
    pub fn try_advance(&self) -> bool {
        match self.quiescent_stamp() {
            Some(stamp) => self.advance_from(stamp),
            None => false,
        }
    }

    /// Reads the epoch stamp and scans the registry. Returns the stamp if no
    /// record was active during the scan.
    pub(crate) fn quiescent_stamp(&self) -> Option<usize> {
        let shared = &*self.shared;
        let stamp = shared.epoch.stamp();

        fence(Ordering::SeqCst);

        let mut blocker = None;
        shared.registry.scan(|record| {
            if blocker.is_none() {
                if let Some(snapshot) = record.snapshot() {
                    blocker = Some((record.thread(), snapshot));
                }
            }
        });

        if let Some((thread, snapshot)) = blocker {
            tracing::trace!(
                target: "tri_epoch",
                epoch = Epoch::new(stamp).value(),
                ?thread,
                snapshot = snapshot.value(),
                "advance blocked by active record"
            );
            return None;
        }

        Some(stamp)
    }

    /// Commits an advance whose scan observed `stamp`, then drains the bucket
    /// two generations behind.
    ///
    /// The CAS compares the full stamp, so it fails if any advance happened
    /// since the scan, even one that brought the epoch value back around.
    pub(crate) fn advance_from(&self, stamp: usize) -> bool {
        let shared = &*self.shared;
        if !shared.epoch.try_advance(stamp) {
            return false;
        }

        let epoch = Epoch::new(stamp);
        let drained = epoch.predecessor();
        let reclaimed = shared.limbo.drain(drained);

        tracing::debug!(
            target: "tri_epoch",
            from = epoch.value(),
            to = epoch.successor().value(),
            drained = drained.value(),
            reclaimed,
            "epoch advanced"
        );

        true
    }

    /// Block until everything deferred before this call has been reclaimed.
    ///
    /// Retries [`try_advance`](Collector::try_advance), spinning and then
    /// yielding between failed attempts, until this call has performed two
    /// advances itself. There is no timeout.
    ///
    /// **Non-termination**: if some thread never leaves its critical section,
    /// this call never returns. That is a bug in the caller holding the
    /// critical section, not in the collector.
    ///
    /// Reclamation callbacks may run on this thread.
    ///
    /// # Panics
    /// Panics if the calling thread is itself inside a critical section of this
    /// collector, which would otherwise wait forever on itself.
    ///
    /// 阻塞直到本次调用之前延迟回收的所有对象都已被回收。
    /// **不终止**：若某线程永不离开临界区，此调用永远不会返回。
    pub fn synchronize(&self) {
        assert!(
            !self.is_pinned(),
            "BUG: synchronize() called from inside a critical section; it would wait on itself"
        );

        let spin_limit = self.shared.config.spin_limit;
        let mut advanced = 0;
        let mut spins: u32 = 0;
        let mut yields: u64 = 0;

        while advanced < 2 {
            if self.try_advance() {
                advanced += 1;
                continue;
            }

            if spins < spin_limit {
                spins += 1;
                spin_loop();
            } else {
                yields += 1;
                yield_now();
            }
        }

        tracing::debug!(
            target: "tri_epoch",
            epoch = self.shared.epoch.load().value(),
            spins,
            yields,
            "synchronize complete"
        );
    }

    /// The current global epoch.
    #[inline]
    pub fn epoch(&self) -> Epoch {
        self.shared.epoch.load()
    }

    /// Entries deferred but not yet reclaimed, across all buckets.
    #[inline]
    pub fn pending(&self) -> usize {
        self.shared.limbo.pending()
    }

    /// Snapshot of the collector's counters.
    pub fn stats(&self) -> CollectorStats {
        let shared = &*self.shared;
        let mut registered = 0;
        let mut active = 0;
        shared.registry.scan(|record| {
            registered += 1;
            if record.snapshot().is_some() {
                active += 1;
            }
        });

        CollectorStats {
            epoch: shared.epoch.load(),
            advances: shared.epoch.advances(),
            registered,
            active,
            pending: shared.limbo.pending_per_epoch(),
            reclaimed: shared.limbo.reclaimed(),
        }
    }

    /// Number of threads currently holding a record in this collector.
    pub fn registered_records(&self) -> usize {
        self.shared.registry.len()
    }

    /// Check that every limbo bucket is empty.
    ///
    /// # Errors
    /// [`EpochError::Leak`] with the per-bucket counts otherwise.
    pub fn check_drained(&self) -> Result<(), EpochError> {
        let pending = self.shared.limbo.pending_per_epoch();
        if pending.iter().all(|count| *count == 0) {
            return Ok(());
        }

        tracing::warn!(
            target: "tri_epoch",
            registry = self.shared.registry.id(),
            ?pending,
            "limbo not empty at shutdown; was synchronize() skipped?"
        );
        Err(EpochError::Leak { pending })
    }

    /// Shut this handle down, reporting entries that were never reclaimed.
    ///
    /// A leak is diagnostic only: the leftover callbacks still run, exactly
    /// once, when the last handle to the collector is dropped.
    ///
    /// 关闭此句柄并报告未被回收的条目。泄漏仅用于诊断：剩余回调仍会在最后一个
    /// 句柄被 drop 时恰好执行一次。
    pub fn deinit(self) -> Result<(), EpochError> {
        self.check_drained()
    }
}

impl Default for Collector {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Collector {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }
}

impl Eq for Collector {}
