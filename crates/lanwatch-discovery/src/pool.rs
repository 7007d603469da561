//! Resolution worker pool
//!
//! A fixed set of workers drains a priority queue of identity lookups
//! (hostname, service name, vendor). Lower priority values run first, ties
//! run in enqueue order. Lookups happen outside the registry lock and each
//! one is bounded by a timeout; results are written back through
//! [`DeviceRegistry::apply_resolution`].

use chrono::Utc;
use lanwatch_core::{
    ConfigError, DeviceRegistry, LookupError, MacAddress, Resolution, TaskKind, VendorDatabase,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::mdns::ServiceDiscovery;
use crate::resolve::HostnameResolver;
use crate::scanner::DiscoveryEvent;

/// Freshly discovered device
pub const PRIORITY_NEW: u8 = 0;
/// Known device still missing identity data
pub const PRIORITY_UNRESOLVED: u8 = 1;
/// Retry after an earlier failure
pub const PRIORITY_RETRY: u8 = 2;

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent workers
    pub workers: usize,
    /// Per-lookup timeout in milliseconds
    pub lookup_timeout_ms: u64,
    /// Seconds before a failed lookup may be retried
    pub retry_cooldown_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            lookup_timeout_ms: 3000,
            retry_cooldown_secs: 300,
        }
    }
}

impl PoolConfig {
    pub const MAX_WORKERS: usize = 64;

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 || self.workers > Self::MAX_WORKERS {
            return Err(ConfigError::WorkerCount {
                got: self.workers,
                max: Self::MAX_WORKERS,
            });
        }
        if self.lookup_timeout_ms == 0 {
            return Err(ConfigError::ZeroDuration("lookup timeout"));
        }
        Ok(())
    }

    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_millis(self.lookup_timeout_ms)
    }

    pub fn retry_cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.retry_cooldown_secs.min(i64::MAX as u64) as i64)
    }
}

/// Lookup backends shared by all workers
#[derive(Clone)]
pub struct Resolvers {
    pub hostnames: Arc<dyn HostnameResolver>,
    pub services: Arc<dyn ServiceDiscovery>,
    pub vendors: Arc<VendorDatabase>,
}

/// Result of [`ResolutionPool::enqueue`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Already pending or resolved, cooling down after a failure, or the
    /// device is gone
    NotDue,
    /// The pool is shutting down
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct QueuedTask {
    priority: u8,
    seq: u64,
    mac: MacAddress,
    kind: TaskKind,
}

#[derive(Default)]
struct TaskQueue {
    heap: BinaryHeap<Reverse<QueuedTask>>,
    next_seq: u64,
}

impl TaskQueue {
    fn push(&mut self, mac: MacAddress, kind: TaskKind, priority: u8) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Reverse(QueuedTask {
            priority,
            seq,
            mac,
            kind,
        }));
    }

    fn pop(&mut self) -> Option<QueuedTask> {
        self.heap.pop().map(|Reverse(task)| task)
    }

    fn len(&self) -> usize {
        self.heap.len()
    }
}

struct Shared {
    queue: Mutex<TaskQueue>,
    notify: Notify,
    closed: AtomicBool,
    cancel: CancellationToken,
    registry: Arc<DeviceRegistry>,
    resolvers: Resolvers,
    config: PoolConfig,
    events: broadcast::Sender<DiscoveryEvent>,
    executed: AtomicU64,
    in_flight: AtomicUsize,
}

impl Shared {
    fn queue(&self) -> std::sync::MutexGuard<'_, TaskQueue> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Pop the next task and count it as in flight under the same lock, so
    /// no observer sees it neither queued nor running
    fn take_next(&self) -> Option<QueuedTask> {
        let mut queue = self.queue();
        let task = queue.pop()?;
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        Some(task)
    }

    fn is_idle(&self) -> bool {
        let queue = self.queue();
        queue.len() == 0 && self.in_flight.load(Ordering::Acquire) == 0
    }

    async fn execute(&self, task: QueuedTask) {
        let Some(ip) = self.registry.ip_of(&task.mac).await else {
            debug!(mac = %task.mac, kind = %task.kind, "Device gone before lookup ran");
            return;
        };

        self.executed.fetch_add(1, Ordering::Relaxed);
        let limit = self.config.lookup_timeout();
        let outcome = match tokio::time::timeout(limit, self.lookup(task.kind, task.mac, ip)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(LookupError::Timeout {
                task: task.kind,
                after: limit,
            }),
        };

        match outcome {
            Ok(Some(resolution)) => {
                if let Some(device) = self.registry.apply_resolution(&task.mac, resolution).await {
                    debug!(
                        mac = %task.mac,
                        kind = %task.kind,
                        name = %device.display_name(),
                        device_type = %device.device_type,
                        "Applied resolution"
                    );
                    let _ = self.events.send(DiscoveryEvent::DeviceUpdated(device));
                }
            }
            // The vendor table will not change until restart
            Ok(None) if task.kind == TaskKind::Vendor => {
                self.registry.mark_task_resolved(&task.mac, task.kind).await;
            }
            Ok(None) => {
                debug!(mac = %task.mac, ip = %ip, kind = %task.kind, "Lookup found nothing");
                self.registry.mark_task_failed(&task.mac, task.kind, Utc::now()).await;
            }
            Err(e) => {
                debug!(mac = %task.mac, ip = %ip, kind = %task.kind, error = %e, "Lookup failed");
                self.registry.mark_task_failed(&task.mac, task.kind, Utc::now()).await;
            }
        }
    }

    async fn lookup(&self, kind: TaskKind, mac: MacAddress, ip: IpAddr) -> Result<Option<Resolution>, LookupError> {
        match kind {
            TaskKind::Hostname => Ok(self
                .resolvers
                .hostnames
                .resolve_hostname(ip)
                .await?
                .map(Resolution::Hostname)),
            TaskKind::ServiceName => {
                let found = self.resolvers.services.query_services(ip).await?;
                if found.is_empty() {
                    return Ok(None);
                }
                Ok(Some(Resolution::Service {
                    name: found.name,
                    services: found.services,
                }))
            }
            TaskKind::Vendor => Ok(self
                .resolvers
                .vendors
                .lookup(&mac)
                .map(|vendor| Resolution::Vendor(vendor.to_string()))),
        }
    }
}

async fn worker_loop(shared: Arc<Shared>, id: usize) {
    debug!(worker = id, "Resolution worker started");
    loop {
        if shared.cancel.is_cancelled() {
            break;
        }

        let next = shared.take_next();
        match next {
            Some(task) => {
                shared.execute(task).await;
                shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            }
            None => {
                tokio::select! {
                    _ = shared.notify.notified() => {}
                    _ = shared.cancel.cancelled() => break,
                }
            }
        }
    }
    debug!(worker = id, "Resolution worker stopped");
}

/// Bounded pool of background identity resolution workers
pub struct ResolutionPool {
    shared: Arc<Shared>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl ResolutionPool {
    /// Validate the configuration and spawn the workers on the current runtime
    pub fn start(
        config: PoolConfig,
        registry: Arc<DeviceRegistry>,
        resolvers: Resolvers,
        events: broadcast::Sender<DiscoveryEvent>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let shared = Arc::new(Shared {
            queue: Mutex::new(TaskQueue::default()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            registry,
            resolvers,
            config,
            events,
            executed: AtomicU64::new(0),
            in_flight: AtomicUsize::new(0),
        });

        let workers = (0..shared.config.workers)
            .map(|id| tokio::spawn(worker_loop(shared.clone(), id)))
            .collect();

        info!(
            workers = shared.config.workers,
            timeout_ms = shared.config.lookup_timeout_ms,
            "Resolution pool started"
        );

        Ok(Self {
            shared,
            workers: Mutex::new(workers),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.shared.config
    }

    /// Queue a lookup unless one for the same (device, kind) is already
    /// pending, resolved or cooling down
    pub async fn enqueue(&self, mac: MacAddress, kind: TaskKind, priority: u8) -> Enqueued {
        if self.shared.closed.load(Ordering::Acquire) {
            return Enqueued::Closed;
        }

        let claimed = self
            .shared
            .registry
            .try_mark_pending(&mac, kind, Utc::now(), self.shared.config.retry_cooldown())
            .await;
        if claimed.is_none() {
            return Enqueued::NotDue;
        }

        self.shared.queue().push(mac, kind, priority);
        self.shared.notify.notify_one();
        Enqueued::Queued
    }

    /// Tasks waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue().len()
    }

    /// Lookups started since the pool was created
    pub fn executed(&self) -> u64 {
        self.shared.executed.load(Ordering::Relaxed)
    }

    pub fn is_idle(&self) -> bool {
        self.shared.is_idle()
    }

    /// Wait until the queue is drained and no lookup is running.
    /// Returns false if `limit` elapsed first.
    pub async fn wait_idle(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if self.is_idle() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    /// Stop accepting tasks, let in-flight lookups finish and apply their
    /// results, then drop whatever is still queued.
    pub async fn shutdown(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.cancel.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()));
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Resolution worker ended abnormally");
            }
        }

        let mut dropped = Vec::new();
        {
            let mut queue = self.shared.queue();
            while let Some(task) = queue.pop() {
                dropped.push(task);
            }
        }
        for task in &dropped {
            self.shared.registry.reset_task(&task.mac, task.kind).await;
        }

        info!(dropped = dropped.len(), executed = self.executed(), "Resolution pool stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mdns::DiscoveredServices;
    use async_trait::async_trait;
    use lanwatch_core::{MemoryNameStore, ResolutionState};
    use std::net::Ipv4Addr;
    use tokio::sync::Semaphore;

    /// Hostname resolver that records calls and optionally waits on a gate
    struct RecordingResolver {
        calls: Mutex<Vec<IpAddr>>,
        gate: Option<Arc<Semaphore>>,
        delay: Duration,
    }

    impl RecordingResolver {
        fn new() -> Self {
            Self {
                calls: Mutex::new(Vec::new()),
                gate: None,
                delay: Duration::ZERO,
            }
        }

        fn gated(gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::new()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self { delay, ..Self::new() }
        }

        fn calls(&self) -> Vec<IpAddr> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl HostnameResolver for RecordingResolver {
        fn name(&self) -> &'static str {
            "recording"
        }

        async fn resolve_hostname(&self, ip: IpAddr) -> Result<Option<String>, LookupError> {
            self.calls.lock().unwrap().push(ip);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            Ok(Some(format!("host-{}.lan", ip)))
        }
    }

    struct NoServices;

    #[async_trait]
    impl ServiceDiscovery for NoServices {
        async fn query_services(&self, _ip: IpAddr) -> Result<DiscoveredServices, LookupError> {
            Ok(DiscoveredServices::default())
        }
    }

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, last))
    }

    fn mac(last: u8) -> MacAddress {
        MacAddress::new([0xB8, 0x27, 0xEB, 0, 0, last])
    }

    struct Harness {
        registry: Arc<DeviceRegistry>,
        resolver: Arc<RecordingResolver>,
        pool: Arc<ResolutionPool>,
    }

    async fn harness(resolver: RecordingResolver, config: PoolConfig, devices: u8) -> Harness {
        let registry = Arc::new(DeviceRegistry::new(Arc::new(MemoryNameStore::new())));
        for i in 1..=devices {
            registry.upsert(mac(i), ip(i)).await;
        }
        let resolver = Arc::new(resolver);
        let resolvers = Resolvers {
            hostnames: resolver.clone(),
            services: Arc::new(NoServices),
            vendors: Arc::new(VendorDatabase::builtin()),
        };
        let (events, _) = broadcast::channel(64);
        let pool = ResolutionPool::start(config, registry.clone(), resolvers, events).unwrap();
        Harness {
            registry,
            resolver,
            pool: Arc::new(pool),
        }
    }

    async fn wait_for_calls(resolver: &RecordingResolver, n: usize) {
        for _ in 0..200 {
            if resolver.calls().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("resolver never reached {n} calls");
    }

    #[test]
    fn test_queue_orders_by_priority_then_fifo() {
        let mut queue = TaskQueue::default();
        queue.push(mac(1), TaskKind::Hostname, PRIORITY_RETRY);
        queue.push(mac(2), TaskKind::Hostname, PRIORITY_UNRESOLVED);
        queue.push(mac(3), TaskKind::Vendor, PRIORITY_NEW);
        queue.push(mac(4), TaskKind::Hostname, PRIORITY_UNRESOLVED);
        queue.push(mac(5), TaskKind::ServiceName, PRIORITY_NEW);

        let order: Vec<MacAddress> = std::iter::from_fn(|| queue.pop()).map(|t| t.mac).collect();
        assert_eq!(order, vec![mac(3), mac(5), mac(2), mac(4), mac(1)]);
    }

    #[test]
    fn test_config_validation() {
        assert!(PoolConfig::default().validate().is_ok());
        let zero = PoolConfig {
            workers: 0,
            ..Default::default()
        };
        assert_eq!(
            zero.validate(),
            Err(ConfigError::WorkerCount { got: 0, max: PoolConfig::MAX_WORKERS })
        );
        let no_timeout = PoolConfig {
            lookup_timeout_ms: 0,
            ..Default::default()
        };
        assert!(no_timeout.validate().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_runs_once() {
        let h = harness(RecordingResolver::new(), PoolConfig::default(), 1).await;

        assert_eq!(h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await, Enqueued::Queued);
        assert_eq!(h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await, Enqueued::NotDue);
        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await, Enqueued::NotDue);

        assert_eq!(h.resolver.calls(), vec![ip(1)]);
        assert_eq!(h.pool.executed(), 1);
        let device = h.registry.get(&mac(1)).await.unwrap();
        assert_eq!(device.hostname.as_deref(), Some("host-10.0.0.1.lan"));
        assert_eq!(device.resolution.hostname, ResolutionState::Resolved);
    }

    #[tokio::test]
    async fn test_workers_service_priority_order() {
        let gate = Arc::new(Semaphore::new(0));
        let config = PoolConfig {
            workers: 1,
            ..Default::default()
        };
        let h = harness(RecordingResolver::gated(gate.clone()), config, 5).await;

        // Occupy the single worker
        h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_UNRESOLVED).await;
        wait_for_calls(&h.resolver, 1).await;

        h.pool.enqueue(mac(2), TaskKind::Hostname, PRIORITY_RETRY).await;
        h.pool.enqueue(mac(3), TaskKind::Hostname, PRIORITY_UNRESOLVED).await;
        h.pool.enqueue(mac(4), TaskKind::Hostname, PRIORITY_NEW).await;
        h.pool.enqueue(mac(5), TaskKind::Hostname, PRIORITY_UNRESOLVED).await;

        gate.add_permits(10);
        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);
        assert_eq!(h.resolver.calls(), vec![ip(1), ip(4), ip(3), ip(5), ip(2)]);
    }

    #[tokio::test]
    async fn test_idle_only_after_results_applied() {
        let gate = Arc::new(Semaphore::new(0));
        let config = PoolConfig {
            workers: 2,
            ..Default::default()
        };
        let h = harness(RecordingResolver::gated(gate.clone()), config, 4).await;

        for i in 1..=4 {
            h.pool.enqueue(mac(i), TaskKind::Hostname, PRIORITY_NEW).await;
        }
        wait_for_calls(&h.resolver, 2).await;
        // Both workers hold a task and two more wait
        assert!(!h.pool.is_idle());
        assert_eq!(h.pool.queued(), 2);

        gate.add_permits(1);
        for _ in 0..400 {
            if h.pool.is_idle() {
                break;
            }
            // Never idle while a popped task is unfinished
            if h.pool.queued() == 0 && h.resolver.calls().len() < 4 {
                assert!(!h.pool.is_idle());
            }
            gate.add_permits(1);
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);
        for i in 1..=4 {
            let device = h.registry.get(&mac(i)).await.unwrap();
            assert_eq!(device.resolution.hostname, ResolutionState::Resolved);
        }
    }

    #[tokio::test]
    async fn test_timeout_marks_failed() {
        let config = PoolConfig {
            lookup_timeout_ms: 50,
            ..Default::default()
        };
        let h = harness(RecordingResolver::slow(Duration::from_secs(30)), config, 1).await;

        h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await;
        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);

        let device = h.registry.get(&mac(1)).await.unwrap();
        assert!(matches!(device.resolution.hostname, ResolutionState::Failed { .. }));
        assert_eq!(device.hostname, None);
        // Still cooling down
        assert_eq!(h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_RETRY).await, Enqueued::NotDue);
    }

    #[tokio::test]
    async fn test_vendor_and_empty_service_outcomes() {
        let h = harness(RecordingResolver::new(), PoolConfig::default(), 1).await;

        h.pool.enqueue(mac(1), TaskKind::Vendor, PRIORITY_NEW).await;
        h.pool.enqueue(mac(1), TaskKind::ServiceName, PRIORITY_NEW).await;
        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);

        let device = h.registry.get(&mac(1)).await.unwrap();
        assert_eq!(device.vendor.as_deref(), Some("Raspberry Pi Foundation"));
        assert_eq!(device.resolution.vendor, ResolutionState::Resolved);
        assert!(matches!(device.resolution.service_name, ResolutionState::Failed { .. }));
    }

    #[tokio::test]
    async fn test_removed_device_result_dropped() {
        let gate = Arc::new(Semaphore::new(0));
        let h = harness(RecordingResolver::gated(gate.clone()), PoolConfig::default(), 1).await;

        h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await;
        wait_for_calls(&h.resolver, 1).await;
        h.registry.remove(&mac(1)).await;
        gate.add_permits(1);

        assert!(h.pool.wait_idle(Duration::from_secs(2)).await);
        assert!(h.registry.get(&mac(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_shutdown_finishes_in_flight_and_drops_queued() {
        let gate = Arc::new(Semaphore::new(0));
        let config = PoolConfig {
            workers: 1,
            ..Default::default()
        };
        let h = harness(RecordingResolver::gated(gate.clone()), config, 2).await;

        h.pool.enqueue(mac(1), TaskKind::Hostname, PRIORITY_NEW).await;
        wait_for_calls(&h.resolver, 1).await;
        h.pool.enqueue(mac(2), TaskKind::Hostname, PRIORITY_NEW).await;

        let pool = h.pool.clone();
        let stopping = tokio::spawn(async move { pool.shutdown().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.add_permits(10);
        stopping.await.unwrap();

        // Computed result kept, queued task returned to unresolved
        let first = h.registry.get(&mac(1)).await.unwrap();
        assert_eq!(first.hostname.as_deref(), Some("host-10.0.0.1.lan"));
        let second = h.registry.get(&mac(2)).await.unwrap();
        assert_eq!(second.resolution.hostname, ResolutionState::Unresolved);
        assert_eq!(h.resolver.calls(), vec![ip(1)]);

        assert_eq!(h.pool.enqueue(mac(2), TaskKind::Hostname, PRIORITY_NEW).await, Enqueued::Closed);
    }
}
