use crate::epoch::{EPOCH_COUNT, Epoch};
use crate::sync::{AtomicU64, AtomicUsize, Ordering};
use crossbeam_queue::SegQueue;
use std::boxed::Box;
use std::fmt;

/// An unlinked payload waiting for its grace period, plus the callback that
/// reclaims it.
///
/// The payload is type-erased to a raw pointer and `callback` knows its
/// concrete type. The callback runs exactly once, when the entry is dropped.
///
/// 一个已被摘除、等待宽限期结束的载荷，以及回收它的回调。
/// 载荷被类型擦除为原始指针，`callback` 知道其具体类型。
/// 回调恰好执行一次，在条目被 drop 时执行。
pub(crate) struct DeferredEntry {
    payload: *mut (),
    callback: unsafe fn(*mut ()),
}

// SAFETY: every constructor requires the erased payload to be `Send`.
unsafe impl Send for DeferredEntry {}

/// Converts the raw pointer back to `Box<T>` and drops it.
#[inline(always)]
unsafe fn drop_value<T>(ptr: *mut ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut T));
    }
}

/// Converts the raw pointer back to the boxed closure and calls it.
#[inline(always)]
unsafe fn call_boxed<F: FnOnce()>(ptr: *mut ()) {
    let f = unsafe { Box::from_raw(ptr as *mut F) };
    f();
}

impl DeferredEntry {
    /// Reclaims the box by dropping it. No extra allocation.
    #[inline]
    pub(crate) fn from_box<T: Send + 'static>(value: Box<T>) -> Self {
        DeferredEntry {
            payload: Box::into_raw(value) as *mut (),
            callback: drop_value::<T>,
        }
    }

    /// Reclaims a pointer obtained from `Box::into_raw`.
    ///
    /// # Safety
    /// `ptr` must come from `Box::<T>::into_raw` and must not be freed by anyone
    /// else.
    #[inline]
    pub(crate) unsafe fn from_raw<T: Send + 'static>(ptr: *mut T) -> Self {
        DeferredEntry {
            payload: ptr as *mut (),
            callback: drop_value::<T>,
        }
    }

    /// Runs `callback(payload)` at reclamation time.
    #[inline]
    pub(crate) fn with_callback<P, F>(payload: P, callback: F) -> Self
    where
        P: Send + 'static,
        F: FnOnce(P) + Send + 'static,
    {
        Self::from_closure(move || callback(payload))
    }

    #[inline]
    fn from_closure<C: FnOnce() + Send + 'static>(reclaim: C) -> Self {
        DeferredEntry {
            payload: Box::into_raw(Box::new(reclaim)) as *mut (),
            callback: call_boxed::<C>,
        }
    }
}

impl Drop for DeferredEntry {
    #[inline(always)]
    fn drop(&mut self) {
        if !self.payload.is_null() {
            let payload = std::mem::replace(&mut self.payload, std::ptr::null_mut());
            unsafe {
                (self.callback)(payload);
            }
        }
    }
}

/// The three epoch-indexed limbo buckets.
///
/// Each bucket is a lock-free MPMC FIFO, so deferring never takes a lock and
/// any thread that wins an advance can drain a bucket while others keep
/// deferring into the other two.
///
/// 三个按纪元索引的 limbo 桶。
/// 每个桶都是无锁 MPMC FIFO，因此延迟回收从不加锁；赢得推进的任意线程
/// 可以清空一个桶，同时其他线程继续向另外两个桶延迟回收。
pub(crate) struct Limbo {
    buckets: [SegQueue<DeferredEntry>; EPOCH_COUNT],
    pending: AtomicUsize,
    reclaimed: AtomicU64,
}

impl Limbo {
    pub(crate) fn new() -> Self {
        Self {
            buckets: [SegQueue::new(), SegQueue::new(), SegQueue::new()],
            pending: AtomicUsize::new(0),
            reclaimed: AtomicU64::new(0),
        }
    }

    /// Appends `entry` to the bucket of `epoch` and returns the new pending total.
    #[inline]
    pub(crate) fn push(&self, epoch: Epoch, entry: DeferredEntry) -> usize {
        // Count first so a concurrent drain never takes the total below zero.
        let pending = self.pending.fetch_add(1, Ordering::Relaxed) + 1;
        self.buckets[epoch.value()].push(entry);
        pending
    }

    /// Runs every entry in the bucket of `epoch`, oldest first.
    pub(crate) fn drain(&self, epoch: Epoch) -> usize {
        let bucket = &self.buckets[epoch.value()];
        let mut reclaimed = 0;

        while let Some(entry) = bucket.pop() {
            self.pending.fetch_sub(1, Ordering::Relaxed);
            self.reclaimed.fetch_add(1, Ordering::Relaxed);
            drop(entry);
            reclaimed += 1;
        }

        reclaimed
    }

    #[inline]
    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::Relaxed)
    }

    pub(crate) fn pending_per_epoch(&self) -> [usize; EPOCH_COUNT] {
        [
            self.buckets[0].len(),
            self.buckets[1].len(),
            self.buckets[2].len(),
        ]
    }

    pub(crate) fn reclaimed(&self) -> u64 {
        self.reclaimed.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Limbo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Limbo")
            .field("pending", &self.pending_per_epoch())
            .field("reclaimed", &self.reclaimed())
            .finish()
    }
}
