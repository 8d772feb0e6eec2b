/// 边界情况测试模块
/// 测试桶的顺序、推进阈值、注册上限、回调中的再次延迟以及错误信息
use super::DropCounter;
use crate::{Collector, Epoch, EpochError, RegistrationFault};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

fn manual_collector() -> Collector {
    Collector::builder().auto_advance_threshold(None).build()
}

/// 测试1: 空 limbo 上的 synchronize
#[test]
fn test_synchronize_with_empty_limbo() {
    let collector = manual_collector();
    collector.synchronize();

    let stats = collector.stats();
    assert_eq!(stats.advances, 2);
    assert_eq!(stats.reclaimed, 0);
}

/// 测试2: 同一个桶内按 FIFO 顺序回收
#[test]
fn test_bucket_reclaims_in_fifo_order() {
    let collector = manual_collector();
    let order = Arc::new(antidote::Mutex::new(Vec::new()));

    for i in 0..10 {
        let order = order.clone();
        collector
            .defer(i, move |i| order.lock().push(i))
            .unwrap();
    }

    collector.synchronize();
    assert_eq!(*order.lock(), (0..10).collect::<Vec<_>>());
}

/// 测试3: 条目在第二次推进之后才被回收
#[test]
fn test_entry_survives_first_advance() {
    let collector = manual_collector();
    let drops = DropCounter::default();

    collector.defer_drop(Box::new(drops.token())).unwrap();

    assert!(collector.try_advance());
    assert_eq!(drops.dropped(), 0);
    assert_eq!(collector.pending(), 1);

    assert!(collector.try_advance());
    assert_eq!(drops.dropped(), 1);
    assert_eq!(collector.pending(), 0);
}

/// 测试4: 每个桶在各自的时机被清空
#[test]
fn test_buckets_drain_one_generation_apart() {
    let collector = manual_collector();
    let early = DropCounter::default();
    let late = DropCounter::default();

    collector.defer_drop(Box::new(early.token())).unwrap();
    assert!(collector.try_advance());
    collector.defer_drop(Box::new(late.token())).unwrap();
    assert_eq!(collector.stats().pending, [1, 1, 0]);

    assert!(collector.try_advance());
    assert_eq!((early.dropped(), late.dropped()), (1, 0));
    assert_eq!(collector.stats().pending, [0, 1, 0]);

    assert!(collector.try_advance());
    assert_eq!((early.dropped(), late.dropped()), (1, 1));
    assert_eq!(collector.epoch(), Epoch::INITIAL);
}

/// 测试5: 超过阈值时 defer 会顺带推进
#[test]
fn test_auto_advance_threshold() {
    let collector = Collector::builder().auto_advance_threshold(4).build();

    for i in 0..4u32 {
        collector.defer_drop(Box::new(i)).unwrap();
    }
    assert_eq!(collector.stats().advances, 0);

    collector.defer_drop(Box::new(4u32)).unwrap();
    assert_eq!(collector.stats().advances, 1);

    // Every further defer stays above the threshold and advances again.
    collector.defer_drop(Box::new(5u32)).unwrap();
    assert_eq!(collector.stats().advances, 2);
    assert!(collector.stats().reclaimed >= 5);
}

/// 测试6: 禁用阈值后 defer 从不推进
#[test]
fn test_auto_advance_disabled() {
    let collector = manual_collector();

    for i in 0..200u32 {
        collector.defer_drop(Box::new(i)).unwrap();
    }

    let stats = collector.stats();
    assert_eq!(stats.advances, 0);
    assert_eq!(stats.pending, [200, 0, 0]);

    collector.synchronize();
    assert_eq!(collector.pending(), 0);
}

/// 测试7: 顺带推进被活跃读者阻止时不是错误
#[test]
fn test_auto_advance_blocked_by_reader() {
    let collector = Collector::builder().auto_advance_threshold(1).build();
    let guard = collector.pin().unwrap();

    for i in 0..10u32 {
        collector.defer_drop(Box::new(i)).unwrap();
    }
    assert_eq!(collector.stats().advances, 0);
    assert_eq!(collector.pending(), 10);

    drop(guard);
    collector.synchronize();
    assert_eq!(collector.pending(), 0);
}

/// 测试8: 超过注册上限时返回分配错误，载荷原样归还，释放名额后重试成功
#[test]
fn test_record_limit_returns_payload_for_retry() {
    let collector = Collector::builder()
        .auto_advance_threshold(None)
        .max_records(1)
        .build();
    collector.register().unwrap();

    let drops = DropCounter::default();
    let runs = Arc::new(AtomicUsize::new(0));
    let expected = expected_allocation();

    let (enter, boxed, (payload, callback)) = {
        let collector = collector.clone();
        let token = drops.token();
        let counter = runs.clone();
        thread::spawn(move || {
            let enter = collector.enter();
            let boxed = collector
                .defer_drop(Box::new(token))
                .map_err(|err| err.into_parts());
            let rejected = collector
                .defer(7u8, move |value| {
                    assert_eq!(value, 7);
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap_err();
            assert_eq!(rejected.error(), &expected_allocation());
            assert!(!collector.is_registered());
            (enter, boxed, rejected.into_inner())
        })
        .join()
        .unwrap()
    };

    assert_eq!(enter, Err(expected.clone()));
    let (err, token) = boxed.unwrap_err();
    assert_eq!(err, expected);
    assert_eq!(collector.pending(), 0);
    assert_eq!(collector.registered_records(), 1);

    // Nothing was enqueued or dropped on the caller's behalf.
    collector.synchronize();
    assert_eq!(drops.dropped(), 0);
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    // Freeing the slot lets the same payloads go through.
    collector.unregister().unwrap();
    {
        let collector = collector.clone();
        thread::spawn(move || {
            collector.defer_drop(token).unwrap();
            collector.defer(payload, callback).unwrap();
        })
        .join()
        .unwrap();
    }
    assert_eq!(collector.pending(), 2);

    collector.synchronize();
    assert_eq!(drops.dropped(), 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

fn expected_allocation() -> EpochError {
    EpochError::Allocation {
        live_records: 1,
        limit: Some(1),
    }
}

/// 测试9: 回调里再次 defer，由下一次 synchronize 回收
#[test]
fn test_defer_from_callback() {
    let collector = manual_collector();
    let drops = DropCounter::default();

    {
        let inner = collector.clone();
        let token = drops.token();
        collector
            .defer((), move |()| {
                inner.defer_drop(Box::new(token)).unwrap();
            })
            .unwrap();
    }

    collector.synchronize();
    assert_eq!(drops.dropped(), 0);
    assert_eq!(collector.pending(), 1);

    collector.synchronize();
    assert_eq!(drops.dropped(), 1);
}

/// 测试10: 不自旋直接让出时 synchronize 依然完成
#[test]
fn test_zero_spin_limit() {
    let collector = Collector::builder().spin_limit(0).build();
    collector.defer_drop(Box::new([0u64; 8])).unwrap();
    collector.synchronize();
    assert_eq!(collector.pending(), 0);
}

/// 测试11: 零大小载荷
#[test]
fn test_zero_sized_payloads() {
    let collector = manual_collector();
    let runs = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let runs = runs.clone();
        collector
            .defer((), move |()| {
                runs.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
    }
    collector.defer_drop(Box::new(())).unwrap();

    collector.synchronize();
    assert_eq!(runs.load(Ordering::SeqCst), 3);
    assert_eq!(collector.stats().reclaimed, 4);
}

/// 测试12: 错误信息
#[test]
fn test_error_messages() {
    let leak = EpochError::Leak { pending: [2, 0, 1] };
    assert_eq!(leak.leaked(), 3);
    assert!(leak.to_string().contains("3 deferred entries"));

    let alloc = EpochError::Allocation {
        live_records: 4,
        limit: Some(4),
    };
    assert!(alloc.to_string().contains("4 of 4"));

    let fault: EpochError = RegistrationFault::StillPinned.into();
    assert_eq!(
        fault.to_string(),
        "registration error: thread is still inside a critical section"
    );
    assert_eq!(fault.leaked(), 0);
}

/// 测试13: 扫描过期的推进者在纪元绕回同一取值后不能提交
#[test]
fn test_stale_scan_cannot_commit_after_full_cycle() {
    let collector = manual_collector();
    let drops = DropCounter::default();

    assert!(collector.try_advance());
    assert_eq!(collector.epoch(), Epoch::new(1));

    // Scanned at epoch 1, then stalls.
    let stalled = collector.quiescent_stamp().unwrap();

    assert!(collector.try_advance());
    assert!(collector.try_advance());
    assert_eq!(collector.epoch(), Epoch::INITIAL);

    // Scanned at epoch 0, before the reader below pinned.
    let lagging = collector.quiescent_stamp().unwrap();

    let guard = collector.pin().unwrap();
    collector.defer_drop(Box::new(drops.token())).unwrap();
    assert!(!collector.try_advance());

    assert!(collector.advance_from(lagging));
    assert_eq!(collector.epoch(), Epoch::new(1));

    // Epoch reads 1 again, but the stamp moved on: no drain of bucket 0.
    assert!(!collector.advance_from(stalled));
    assert_eq!(collector.epoch(), Epoch::new(1));
    assert_eq!(drops.dropped(), 0);
    assert_eq!(collector.stats().pending, [1, 0, 0]);

    drop(guard);
    collector.synchronize();
    assert_eq!(drops.dropped(), 1);
}
