//! End-to-end pool behaviour: expansion, drain, priorities, reaping, and
//! failure recovery.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use corral::{BorrowContext, BoxError, Error, Factory, Pool, PoolConfig};

// -- Tracked factory: counts every lifecycle event --

#[derive(Default)]
struct TrackState {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    live: AtomicUsize,
    peak_live: AtomicUsize,
    destroyed_order: Mutex<Vec<usize>>,
}

struct TrackedFactory(Arc<TrackState>);

impl Factory for TrackedFactory {
    type Resource = usize;

    async fn create(&self) -> Result<usize, BoxError> {
        let id = self.0.created.fetch_add(1, Ordering::SeqCst);
        let live = self.0.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.0.peak_live.fetch_max(live, Ordering::SeqCst);
        Ok(id)
    }

    async fn destroy(&self, resource: usize) -> Result<(), BoxError> {
        self.0.live.fetch_sub(1, Ordering::SeqCst);
        self.0.destroyed.fetch_add(1, Ordering::SeqCst);
        self.0.destroyed_order.lock().unwrap().push(resource);
        Ok(())
    }
}

fn tracked_pool(config: PoolConfig) -> (Pool<TrackedFactory>, Arc<TrackState>) {
    let state = Arc::new(TrackState::default());
    let pool = Pool::new(TrackedFactory(Arc::clone(&state)), config);
    (pool, state)
}

#[tokio::test]
async fn expansion_stops_at_the_ceiling() {
    let (pool, state) = tracked_pool(PoolConfig {
        name: "expansion".to_string(),
        max: 2,
        idle_timeout: Duration::from_millis(300),
        reap_interval: Duration::from_millis(50),
        ..Default::default()
    });

    let acquisitions: Vec<_> = (0..10).map(|_| pool.acquire()).collect();
    assert!(acquisitions[0].admitted());
    for acq in &acquisitions[1..] {
        assert!(!acq.admitted(), "everything past the first should expect to wait");
    }

    let mut holders = Vec::new();
    for acq in acquisitions {
        holders.push(tokio::spawn(async move {
            let lease = acq.await.expect("acquire");
            tokio::time::sleep(Duration::from_millis(100)).await;
            drop(lease);
        }));
    }
    for holder in holders {
        holder.await.unwrap();
    }

    assert_eq!(state.created.load(Ordering::SeqCst), 2, "two resources serve all ten borrows");
    assert_eq!(state.peak_live.load(Ordering::SeqCst), 2);

    // Once idle past the timeout, the reaper takes both.
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(state.destroyed.load(Ordering::SeqCst), 2);
    assert_eq!(pool.count(), 0);
}

#[tokio::test]
async fn immediate_drain_tears_down_the_minimum_floor() {
    let (pool, state) = tracked_pool(PoolConfig {
        name: "floor".to_string(),
        min: 1,
        max: 2,
        ..Default::default()
    });

    pool.drain().await;
    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(state.created.load(Ordering::SeqCst), 1, "the floor was built exactly once");
    assert_eq!(state.destroyed.load(Ordering::SeqCst), 1);
    assert_eq!(pool.available_count(), 0);
}

#[tokio::test]
async fn lower_bands_finish_before_higher_bands() {
    let (pool, _state) = tracked_pool(PoolConfig {
        name: "bands".to_string(),
        max: 1,
        priority_bands: 2,
        idle_timeout: Duration::from_secs(3600),
        reap_interval: Duration::from_secs(3600),
        ..Default::default()
    });

    let order = Arc::new(Mutex::new(Vec::new()));
    let mut holders = Vec::new();
    for band in [1usize, 0] {
        for _ in 0..10 {
            let acq = pool.acquire_with(band, BorrowContext::default());
            let order = Arc::clone(&order);
            holders.push(tokio::spawn(async move {
                let lease = acq.await.expect("acquire");
                order.lock().unwrap().push(band);
                tokio::time::sleep(Duration::from_millis(20)).await;
                drop(lease);
            }));
        }
    }
    for holder in holders {
        holder.await.unwrap();
    }

    let order = order.lock().unwrap();
    assert_eq!(order.len(), 20);
    let last_band0 = order.iter().rposition(|b| *b == 0).unwrap();
    let last_band1 = order.iter().rposition(|b| *b == 1).unwrap();
    assert!(
        last_band0 < last_band1,
        "band 0 finished at {last_band0}, band 1 at {last_band1}"
    );
}

#[tokio::test]
async fn reaping_follows_idle_age_oldest_first() {
    let (pool, state) = tracked_pool(PoolConfig {
        name: "reap-order".to_string(),
        max: 2,
        idle_timeout: Duration::from_millis(100),
        reap_interval: Duration::from_millis(25),
        ..Default::default()
    });

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    let first_id = *first;
    let second_id = *second;

    drop(first);
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(second);

    tokio::time::sleep(Duration::from_millis(300)).await;
    let order = state.destroyed_order.lock().unwrap().clone();
    assert_eq!(
        order,
        vec![first_id, second_id],
        "the resource idle longest is reaped first"
    );
}

// -- Factory that fails its first few creations --

struct FlakyFactory {
    failures_left: AtomicUsize,
    created: AtomicUsize,
}

impl Factory for FlakyFactory {
    type Resource = usize;

    async fn create(&self) -> Result<usize, BoxError> {
        let left = self.failures_left.load(Ordering::SeqCst);
        if left > 0 {
            self.failures_left.store(left - 1, Ordering::SeqCst);
            return Err("backend unavailable".into());
        }
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }
}

#[tokio::test]
async fn creation_errors_reach_each_waiter_in_turn() {
    let pool = Pool::new(
        FlakyFactory {
            failures_left: AtomicUsize::new(5),
            created: AtomicUsize::new(0),
        },
        PoolConfig {
            name: "flaky".to_string(),
            max: 1,
            idle_timeout: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(3600),
            ..Default::default()
        },
    );

    let acquisitions: Vec<_> = (0..5).map(|_| pool.acquire()).collect();
    for acq in acquisitions {
        let err = acq.await.expect_err("creation should have failed");
        assert!(matches!(err, Error::Create { .. }));
        assert!(err.is_retryable());
    }

    // The sixth attempt finds a factory that works again.
    let lease = pool.acquire().await.expect("pool recovers after factory failures");
    assert_eq!(*lease, 0);
    assert_eq!(pool.waiting_count(), 0);
}

// -- Factory that invalidates its first resource --

struct RejectFirstFactory {
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

impl Factory for RejectFirstFactory {
    type Resource = usize;

    async fn create(&self) -> Result<usize, BoxError> {
        Ok(self.created.fetch_add(1, Ordering::SeqCst))
    }

    async fn destroy(&self, _resource: usize) -> Result<(), BoxError> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn validate(&self, resource: &usize) -> bool {
        *resource != 0
    }
}

#[tokio::test]
async fn failed_validation_swaps_in_a_fresh_resource() {
    let factory = RejectFirstFactory {
        created: AtomicUsize::new(0),
        destroyed: AtomicUsize::new(0),
    };
    let pool = Pool::new(
        factory,
        PoolConfig {
            name: "validate".to_string(),
            max: 2,
            idle_timeout: Duration::from_secs(3600),
            reap_interval: Duration::from_secs(3600),
            ..Default::default()
        },
    );

    // Fresh creations are delivered without a validation step.
    let lease = pool.acquire().await.unwrap();
    assert_eq!(*lease, 0);
    drop(lease);

    // The second acquire trips validation on resource 0, which is silently
    // discarded and replaced.
    let lease = pool.acquire().await.unwrap();
    assert_eq!(*lease, 1);
    assert_eq!(pool.stats().validation_failures, 1);

    drop(lease);
    assert_eq!(pool.available_count(), 1);
}

#[tokio::test]
async fn churn_respects_the_ceiling_and_accounts_for_every_creation() {
    let (pool, state) = tracked_pool(PoolConfig {
        name: "churn".to_string(),
        max: 3,
        idle_timeout: Duration::from_secs(3600),
        reap_interval: Duration::from_secs(3600),
        ..Default::default()
    });

    let in_use: Arc<Vec<AtomicUsize>> = Arc::new((0..16).map(|_| AtomicUsize::new(0)).collect());
    let mut workers = Vec::new();
    for _ in 0..12 {
        let pool = pool.clone();
        let in_use = Arc::clone(&in_use);
        workers.push(tokio::spawn(async move {
            for _ in 0..5 {
                let lease = pool.acquire().await.expect("acquire");
                let holders = in_use[*lease].fetch_add(1, Ordering::SeqCst);
                assert_eq!(holders, 0, "resource {} borrowed twice at once", *lease);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_use[*lease].fetch_sub(1, Ordering::SeqCst);
                drop(lease);
            }
        }));
    }
    for worker in workers {
        worker.await.unwrap();
    }

    assert!(state.peak_live.load(Ordering::SeqCst) <= 3, "live set stayed bounded");

    pool.destroy_all().await;
    assert_eq!(
        state.created.load(Ordering::SeqCst),
        state.destroyed.load(Ordering::SeqCst) + pool.count(),
        "creations equal destructions plus live slots"
    );
    assert_eq!(pool.count(), 0);
}
