use crate::domain::Collector;
use crate::error::DeferError;
use crate::reader::Guard;
use crate::sync::{AtomicPtr, Ordering};
use std::boxed::Box;
use std::marker::PhantomData;

/// An epoch-protected shared cell for read-mostly data.
///
/// Readers call [`load`](EpochCell::load) inside a critical section and get a
/// reference that lives as long as their [`Guard`]. Writers publish a new value
/// with [`replace`](EpochCell::replace); the previous value is handed to the
/// collector and dropped once no reader can still hold it.
///
/// **Safety Contract**:
/// - The cell is bound to the [`Collector`] it was created with. `replace`
///   always defers into that collector, and `load` panics on a guard from any
///   other collector, since such a guard does not hold back its reclamation.
/// - The reference returned by `load` cannot outlive the guard, which the
///   compiler enforces.
///
/// **Typical Usage**:
/// ```
/// use tri_epoch::{Collector, EpochCell};
///
/// let collector = Collector::new();
/// let config = EpochCell::new(String::from("v1"), &collector);
///
/// {
///     let guard = collector.pin().unwrap();
///     assert_eq!(config.load(&guard), "v1");
/// }
///
/// config.replace(String::from("v2")).unwrap();
/// collector.synchronize();
/// ```
///
/// 受纪元保护的共享单元，用于读多写少的数据。
/// 读者在临界区内调用 `load`，得到一个与 [`Guard`] 同样长寿的引用。写者通过
/// `replace` 发布新值；旧值交给收集器，在没有读者还能持有它时被 drop。
/// 单元在创建时绑定收集器，`load` 拒绝来自其他收集器的守卫。
pub struct EpochCell<T> {
    ptr: AtomicPtr<T>,
    collector: Collector,
    _owns: PhantomData<Box<T>>,
}

impl<T: Send + 'static> EpochCell<T> {
    /// Create a cell holding `value`, protected by `collector`.
    #[inline]
    pub fn new(value: T, collector: &Collector) -> Self {
        Self {
            ptr: AtomicPtr::new(Box::into_raw(Box::new(value))),
            collector: collector.clone(),
            _owns: PhantomData,
        }
    }

    /// The collector this cell defers into.
    #[inline]
    pub fn collector(&self) -> &Collector {
        &self.collector
    }

    /// Read the current value.
    ///
    /// The returned reference is bound to `guard`, so it cannot be used after
    /// the critical section ends.
    ///
    /// # Panics
    /// Panics if `guard` belongs to a different collector than the cell.
    ///
    /// 读取当前值。返回的引用被绑定到 `guard`。
    #[inline]
    pub fn load<'g>(&self, guard: &'g Guard<'_>) -> &'g T {
        assert!(
            *guard.collector() == self.collector,
            "BUG: EpochCell loaded under a guard from another collector. \
             That guard does not protect values this cell retires."
        );

        let ptr = self.ptr.load(Ordering::Acquire);
        // SAFETY: the pointer is never null, and the value it points to is only
        // freed by the cell's collector after every guard of that collector
        // that could have loaded it is gone.
        unsafe { &*ptr }
    }

    /// Publish `value` and defer the previous one.
    ///
    /// Registers the calling thread first, so on error the cell is unchanged
    /// and `value` comes back in the [`DeferError`].
    ///
    /// 发布 `value` 并延迟回收旧值。出错时单元保持不变，`value` 随错误归还。
    pub fn replace(&self, value: T) -> Result<(), DeferError<T>> {
        if let Err(err) = self.collector.register() {
            return Err(DeferError::new(err, value));
        }

        let new_ptr = Box::into_raw(Box::new(value));
        let old_ptr = self.ptr.swap(new_ptr, Ordering::AcqRel);

        // SAFETY: `old_ptr` came from `Box::into_raw`, and the swap made it
        // unreachable for readers that start from now on. The thread is
        // registered, so the deferral cannot be refused.
        let deferred = unsafe { self.collector.defer_destroy(old_ptr) };
        debug_assert!(deferred.is_ok());
        Ok(())
    }

    /// Take the current value out of the cell.
    pub fn into_inner(self) -> T {
        let ptr = self.ptr.swap(std::ptr::null_mut(), Ordering::Relaxed);
        // SAFETY: `self` is consumed, so no reader can reach the value any more,
        // and the null left behind keeps `Drop` from freeing it again.
        *unsafe { Box::from_raw(ptr) }
    }
}

impl<T> std::fmt::Debug for EpochCell<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ptr = self.ptr.load(Ordering::Relaxed);
        f.debug_tuple("EpochCell").field(&ptr).finish()
    }
}

impl<T> Drop for EpochCell<T> {
    /// At drop time no other thread can access the cell, so the current value
    /// is dropped directly.
    /// 在 drop 时没有其他线程能访问该单元，因此直接 drop 当前值。
    #[inline]
    fn drop(&mut self) {
        let ptr = self.ptr.load(Ordering::Relaxed);
        if !ptr.is_null() {
            unsafe {
                drop(Box::from_raw(ptr));
            }
        }
    }
}
