use crate::epoch::{Epoch, GlobalEpoch};
use crate::error::{EpochError, RegistrationFault};
use crate::garbage::Limbo;
use crate::sync::{Arc, AtomicBool, AtomicUsize, Mutex, Ordering, ThreadId, fence};
use std::vec::Vec;

/// Default pending-entry count above which `defer` makes one advance attempt.
/// `defer` 触发一次推进尝试的默认待回收条目阈值。
pub(crate) const AUTO_ADVANCE_THRESHOLD: usize = 64;

/// Default number of failed advance attempts `synchronize` spins through before
/// it starts yielding.
/// `synchronize` 在开始让出 CPU 之前自旋的失败推进次数。
pub(crate) const DEFAULT_SPIN_LIMIT: u32 = 1024;

/// Source of collector ids, so thread-local caches can tell collectors apart.
static NEXT_REGISTRY_ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(0);

/// Per-thread state: the epoch snapshot taken at `enter` and the active flag.
///
/// Only the owning thread writes it. The advancer reads it from any thread.
/// Cache-aligned to prevent false sharing between readers.
///
/// 每线程状态：`enter` 时拍下的纪元快照以及活跃标志。
/// 只有所属线程写入，推进者可以在任意线程读取。
/// 缓存对齐以防止读者之间的伪共享。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct Record {
    thread: ThreadId,
    local_epoch: AtomicUsize,
    active: AtomicBool,
}

impl Record {
    fn new(thread: ThreadId) -> Self {
        Self {
            thread,
            local_epoch: AtomicUsize::new(Epoch::INITIAL.value()),
            active: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn thread(&self) -> ThreadId {
        self.thread
    }

    /// Announces a critical section that observed `epoch`.
    ///
    /// The snapshot is published before the flag, so the advancer never sees
    /// `active` paired with a stale snapshot. The trailing fence keeps the
    /// caller's reads of shared data after the announcement.
    #[inline]
    pub(crate) fn publish(&self, epoch: Epoch) {
        self.local_epoch.store(epoch.value(), Ordering::Relaxed);
        self.active.store(true, Ordering::Release);
        fence(Ordering::SeqCst);
    }

    #[inline]
    pub(crate) fn retract(&self) {
        self.active.store(false, Ordering::Release);
    }

    /// The epoch this record is pinned in, or `None` when it is quiescent.
    #[inline]
    pub(crate) fn snapshot(&self) -> Option<Epoch> {
        if self.active.load(Ordering::Acquire) {
            Some(Epoch::new(self.local_epoch.load(Ordering::Relaxed)))
        } else {
            None
        }
    }
}

/// Arena of live records for one collector.
///
/// Insertion and removal happen under the lock, and records enter the arena
/// inactive, so a scan never observes a half-registered or half-destroyed
/// record.
///
/// 一个收集器的活跃记录表。
/// 插入和移除都在锁内进行，且记录以非活跃状态加入，
/// 因此扫描永远不会看到注册或销毁到一半的记录。
#[derive(Debug)]
pub(crate) struct Registry {
    id: usize,
    records: Mutex<Vec<Arc<Record>>>,
    limit: Option<usize>,
    closed: AtomicBool,
}

impl Registry {
    pub(crate) fn new(limit: Option<usize>) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed),
            records: Mutex::new(Vec::new()),
            limit,
            closed: AtomicBool::new(false),
        }
    }

    #[inline]
    pub(crate) fn id(&self) -> usize {
        self.id
    }

    /// Allocates a record for `thread` and links it into the arena.
    pub(crate) fn insert(&self, thread: ThreadId) -> Result<Arc<Record>, EpochError> {
        let record = Arc::new(Record::new(thread));

        let mut records = self.records.lock();
        let live_records = records.len();

        if let Some(limit) = self.limit {
            if live_records >= limit {
                return Err(EpochError::Allocation {
                    live_records,
                    limit: Some(limit),
                });
            }
        }

        records
            .try_reserve(1)
            .map_err(|err| EpochError::from_reserve(err, live_records))?;
        records.push(Arc::clone(&record));
        drop(records);

        tracing::trace!(target: "tri_epoch", registry = self.id, thread = ?thread, "record registered");
        Ok(record)
    }

    /// Unlinks `record`. Fails if it is not in the arena.
    pub(crate) fn remove(&self, record: &Arc<Record>) -> Result<(), EpochError> {
        let mut records = self.records.lock();
        let position = records
            .iter()
            .position(|candidate| Arc::ptr_eq(candidate, record))
            .ok_or(EpochError::Registration(RegistrationFault::NotRegistered))?;
        records.swap_remove(position);
        drop(records);

        tracing::trace!(target: "tri_epoch", registry = self.id, thread = ?record.thread(), "record unregistered");
        Ok(())
    }

    /// Visits every linked record while holding the registry lock.
    pub(crate) fn scan<F: FnMut(&Record)>(&self, mut visit: F) {
        let records = self.records.lock();
        for record in records.iter() {
            visit(record);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub(crate) fn contains(&self, thread: ThreadId) -> bool {
        self.records
            .lock()
            .iter()
            .any(|record| record.thread() == thread)
    }

    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    #[inline]
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Tunables fixed at build time.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Config {
    pub(crate) auto_advance_threshold: Option<usize>,
    pub(crate) spin_limit: u32,
}

/// State shared by every handle to one collector.
///
/// 同一个收集器所有句柄共享的状态。
#[derive(Debug)]
pub(crate) struct SharedState {
    pub(crate) epoch: GlobalEpoch,
    /// Also held by the thread-local caches, which outlive handles.
    pub(crate) registry: Arc<Registry>,
    pub(crate) limbo: Limbo,
    pub(crate) config: Config,
}

impl Drop for SharedState {
    fn drop(&mut self) {
        self.registry.close();

        let pending = self.limbo.pending();
        if pending > 0 {
            tracing::warn!(
                target: "tri_epoch",
                registry = self.registry.id(),
                pending,
                "collector dropped with undrained limbo; running remaining callbacks"
            );
        }
    }
}
