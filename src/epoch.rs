use crate::sync::{AtomicUsize, Ordering};
use std::fmt;

/// Number of distinct epoch values, and therefore of limbo buckets.
/// 纪元取值的个数，也是 limbo 桶的个数。
pub(crate) const EPOCH_COUNT: usize = 3;

/// The stamp wraps at a multiple of [`EPOCH_COUNT`] so `stamp % 3` keeps
/// stepping forward across the wrap.
const STAMP_PERIOD: usize = EPOCH_COUNT * (usize::MAX / EPOCH_COUNT);

/// A value of the tri-state global epoch counter: always `0`, `1` or `2`.
///
/// Epochs only ever move forward, wrapping from `2` back to `0`.
///
/// 三态全局纪元计数器的一个取值：总是 `0`、`1` 或 `2`。
/// 纪元只会向前推进，从 `2` 回绕到 `0`。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Epoch(u8);

impl Epoch {
    /// The epoch every collector starts in.
    pub const INITIAL: Epoch = Epoch(0);

    /// Builds an epoch from any integer, reducing it modulo 3.
    #[inline]
    pub const fn new(value: usize) -> Self {
        Epoch((value % EPOCH_COUNT) as u8)
    }

    /// Raw value in `0..3`.
    #[inline]
    pub const fn value(self) -> usize {
        self.0 as usize
    }

    /// The epoch an advance moves to.
    /// 推进之后到达的纪元。
    #[inline]
    pub const fn successor(self) -> Self {
        Epoch::new(self.0 as usize + 1)
    }

    /// The epoch one step behind this one.
    ///
    /// When the counter leaves `e`, the bucket of `e.predecessor()` (equivalently
    /// `(e + 2) mod 3`) is two generations old and may be drained.
    ///
    /// 落后一步的纪元。
    /// 当计数器离开 `e` 时，`e.predecessor()`（即 `(e + 2) mod 3`）的桶已经
    /// 落后两代，可以被清空。
    #[inline]
    pub const fn predecessor(self) -> Self {
        Epoch::new(self.0 as usize + EPOCH_COUNT - 1)
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The shared epoch counter.
///
/// The atomic holds a monotonically increasing stamp and the public epoch is
/// `stamp % 3`. Advances compare-and-swap the full stamp, so an advancer whose
/// scan went stale while the counter cycled back to the same epoch value loses
/// the race instead of draining a bucket a newer reader can still see.
///
/// Only the advancer writes it, and only through [`GlobalEpoch::try_advance`], so
/// every transition is a single compare-and-swap and all transitions form one
/// total order.
///
/// 共享的纪元计数器。
/// 原子变量保存单调递增的戳，对外的纪元为 `stamp % 3`。推进时对完整的戳做
/// CAS，因此扫描已经过期的推进者不会在计数器绕回同一纪元值之后误清空桶。
#[derive(Debug)]
#[repr(align(64))]
pub(crate) struct GlobalEpoch {
    stamp: AtomicUsize,
}

impl GlobalEpoch {
    pub(crate) fn new() -> Self {
        Self {
            stamp: AtomicUsize::new(0),
        }
    }

    /// The current stamp. Pass it back to [`GlobalEpoch::try_advance`].
    #[inline]
    pub(crate) fn stamp(&self) -> usize {
        self.stamp.load(Ordering::SeqCst)
    }

    #[inline]
    pub(crate) fn load(&self) -> Epoch {
        Epoch::new(self.stamp())
    }

    /// Moves the counter one step past `from`.
    ///
    /// Returns `false` if the stamp is no longer `from`, which means another
    /// thread advanced at least once since `from` was read.
    #[inline]
    pub(crate) fn try_advance(&self, from: usize) -> bool {
        self.stamp
            .compare_exchange(
                from,
                (from + 1) % STAMP_PERIOD,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    /// Number of successful advances since creation.
    #[inline]
    pub(crate) fn advances(&self) -> u64 {
        self.stamp.load(Ordering::Relaxed) as u64
    }
}
