use std::collections::TryReserveError;
use std::fmt;

/// Why a registration-level operation was rejected.
/// 注册相关操作被拒绝的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationFault {
    /// The calling thread owns no record in this collector.
    NotRegistered,
    /// The calling thread is still inside a critical section.
    StillPinned,
    /// The calling thread is tearing down its thread-local storage.
    ThreadExiting,
}

/// Errors reported by a [`Collector`](crate::Collector).
///
/// Allocation failures are local and recoverable by retrying. Registration
/// faults are programmer errors. A leak is diagnostic: some deferred entry was
/// never drained before shutdown.
///
/// [`Collector`](crate::Collector) 报告的错误。
/// 分配失败是局部的，可以通过重试恢复。注册错误属于编程错误。
/// 泄漏仅用于诊断：关闭前仍有延迟条目未被回收。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EpochError {
    /// The per-thread record could not be allocated or inserted.
    Allocation {
        live_records: usize,
        limit: Option<usize>,
    },
    /// Invalid register/unregister sequence.
    Registration(RegistrationFault),
    /// Limbo still holds entries at shutdown, indexed by epoch.
    Leak { pending: [usize; 3] },
    /// The process-wide collector has not been initialized.
    Uninitialized,
    /// The process-wide collector was initialized twice.
    AlreadyInitialized,
}

impl EpochError {
    pub(crate) fn from_reserve(err: TryReserveError, live_records: usize) -> Self {
        tracing::warn!(target: "tri_epoch", %err, live_records, "record arena reservation failed");
        EpochError::Allocation {
            live_records,
            limit: None,
        }
    }

    /// Total number of leaked entries, zero for non-leak errors.
    pub fn leaked(&self) -> usize {
        match self {
            EpochError::Leak { pending } => pending.iter().sum(),
            _ => 0,
        }
    }
}

impl fmt::Display for RegistrationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistrationFault::NotRegistered => write!(f, "thread is not registered"),
            RegistrationFault::StillPinned => {
                write!(f, "thread is still inside a critical section")
            }
            RegistrationFault::ThreadExiting => write!(f, "thread-local state is being destroyed"),
        }
    }
}

impl fmt::Display for EpochError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EpochError::Allocation {
                live_records,
                limit: Some(limit),
            } => write!(
                f,
                "record allocation failed: {} of {} record slots in use",
                live_records, limit
            ),
            EpochError::Allocation { live_records, .. } => write!(
                f,
                "record allocation failed with {} records registered",
                live_records
            ),
            EpochError::Registration(fault) => write!(f, "registration error: {}", fault),
            EpochError::Leak { pending } => write!(
                f,
                "{} deferred entries never reclaimed (per epoch: {:?}); missing synchronize before shutdown?",
                pending.iter().sum::<usize>(),
                pending
            ),
            EpochError::Uninitialized => write!(f, "process epoch collector is not initialized"),
            EpochError::AlreadyInitialized => {
                write!(f, "process epoch collector is already initialized")
            }
        }
    }
}

impl std::error::Error for EpochError {}

impl From<RegistrationFault> for EpochError {
    fn from(fault: RegistrationFault) -> Self {
        EpochError::Registration(fault)
    }
}

/// A deferral that was refused, carrying back what the caller handed over.
///
/// Nothing was enqueued, so the caller still owns the payload and may retry
/// once the cause is gone, for example after another thread released its
/// record slot.
///
/// 被拒绝的延迟回收请求，归还调用者交出的内容。
/// 没有任何条目入队，调用者仍拥有载荷，可以在原因消除后重试。
pub struct DeferError<T> {
    error: EpochError,
    rejected: T,
}

impl<T> DeferError<T> {
    pub(crate) fn new(error: EpochError, rejected: T) -> Self {
        Self { error, rejected }
    }

    /// Why the deferral was refused.
    #[inline]
    pub fn error(&self) -> &EpochError {
        &self.error
    }

    /// Take back the rejected payload.
    #[inline]
    pub fn into_inner(self) -> T {
        self.rejected
    }

    /// Split into the cause and the rejected payload.
    #[inline]
    pub fn into_parts(self) -> (EpochError, T) {
        (self.error, self.rejected)
    }
}

impl<T> fmt::Debug for DeferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<T> fmt::Display for DeferError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferral refused: {}", self.error)
    }
}

impl<T> std::error::Error for DeferError<T> {}

impl<T> From<DeferError<T>> for EpochError {
    fn from(err: DeferError<T>) -> Self {
        err.error
    }
}
