//! Admission controller.
//!
//! # State Transitions
//! ```text
//! Arrived → Admitted-Fast          running permit free
//! Arrived → Queued                 running full, queue permit free
//! Arrived → Rejected-Immediate     running and queue full
//! Queued  → Admitted-Delayed       running permit freed up
//! Queued  → Rejected-Timeout       max_wait_in_queue elapsed
//! Queued  → Rejected-Cancelled     caller went away
//! ```
//!
//! # Design Decisions
//! - The queue pool only bounds the number of waiters; promotion order among
//!   waiters is not guaranteed
//! - Simultaneously ready events in the queued wait resolve first-ready-wins
//!   (`select!` polls its branches in random order)
//! - The queue permit is released before `admit` returns, so a rejected
//!   request never holds a permit while its response is built

use std::fmt;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::time::Instant;

use crate::admission::pool::{self, Permit, PermitPool};
use crate::admission::responder::{OverloadResponder, StaticResponder};
use crate::config::{AdmissionConfig, OverloadConfig};
use crate::config::validation::ValidationError;
use crate::observability::metrics;

/// How a request obtained its running permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmitPath {
    /// A running permit was free on arrival.
    Fast,
    /// The request waited in the queue first.
    Delayed,
}

impl AdmitPath {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmitPath::Fast => "fast",
            AdmitPath::Delayed => "delayed",
        }
    }
}

/// Why a request was turned away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// Neither a running permit nor a queue permit was available.
    Overloaded,
    /// The request waited `max_wait_in_queue` without being admitted.
    QueueTimeout,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::Overloaded => "overloaded",
            RejectReason::QueueTimeout => "queue_timeout",
        }
    }
}

/// Context handed to the overload responder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejection {
    pub reason: RejectReason,
    /// Time spent in the queue; zero for immediate rejections.
    pub waited: Duration,
}

/// A request that holds a running permit.
///
/// Dropping this value releases the permit.
#[derive(Debug)]
pub struct Admitted {
    permit: Permit,
    path: AdmitPath,
    waited: Duration,
}

impl Admitted {
    pub fn path(&self) -> AdmitPath {
        self.path
    }

    pub fn waited(&self) -> Duration {
        self.waited
    }

    pub fn permit(&self) -> &Permit {
        &self.permit
    }
}

/// Outcome of [`AdmissionController::admit`].
#[derive(Debug)]
pub enum Admission {
    Admitted(Admitted),
    Rejected(Rejection),
    /// The cancellation signal fired while queued. No response is owed.
    Cancelled { waited: Duration },
}

/// Snapshot of pool occupancy and cumulative outcomes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AdmissionStats {
    pub max_running: usize,
    pub running: usize,
    pub max_in_queue: usize,
    pub queued: usize,
    pub max_wait_in_queue_ms: u64,
    pub admitted_fast: u64,
    pub admitted_delayed: u64,
    pub rejected_overloaded: u64,
    pub rejected_timeout: u64,
    pub cancelled: u64,
}

/// Settings that may be swapped while the controller is serving.
struct Settings {
    max_wait_in_queue: Duration,
    responder: Arc<dyn OverloadResponder>,
    /// Overload section last applied from config, if any.
    overload: Option<OverloadConfig>,
}

#[derive(Debug, Default)]
struct Counters {
    admitted_fast: AtomicU64,
    admitted_delayed: AtomicU64,
    rejected_overloaded: AtomicU64,
    rejected_timeout: AtomicU64,
    cancelled: AtomicU64,
}

enum Waited {
    Promoted(Permit),
    TimedOut,
    Cancelled,
}

/// Counts a queued request whose `admit` future is dropped before the race
/// resolves, which is how a closed connection shows up.
struct Abandoned<'a> {
    counters: &'a Counters,
    enqueued_at: Instant,
    armed: bool,
}

impl Drop for Abandoned<'_> {
    fn drop(&mut self) {
        if self.armed {
            let waited = self.enqueued_at.elapsed();
            self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
            metrics::record_cancellation(waited);
            tracing::debug!(
                waited_ms = waited.as_millis() as u64,
                "Queued request dropped by caller"
            );
        }
    }
}

/// Two-stage concurrency gate: a running pool and a queue pool.
pub struct AdmissionController {
    running: PermitPool,
    queue: PermitPool,
    settings: ArcSwap<Settings>,
    counters: Counters,
}

impl AdmissionController {
    /// Allow `max_running` concurrent requests and up to `max_in_queue`
    /// waiters. Queued requests wait indefinitely until
    /// [`set_max_wait_in_queue`](Self::set_max_wait_in_queue) says otherwise.
    pub fn new(max_running: NonZeroUsize, max_in_queue: usize) -> Self {
        Self {
            running: PermitPool::new("running", max_running.get()),
            queue: PermitPool::new("queue", max_in_queue),
            settings: ArcSwap::from_pointee(Settings {
                max_wait_in_queue: Duration::ZERO,
                responder: Arc::new(StaticResponder::default()),
                overload: None,
            }),
            counters: Counters::default(),
        }
    }

    /// Build from the `[admission]` config section.
    pub fn from_config(config: &AdmissionConfig) -> Result<Self, ValidationError> {
        let max_running =
            NonZeroUsize::new(config.max_running).ok_or(ValidationError::ZeroMaxRunning)?;
        for (field, value) in [
            ("admission.max_running", config.max_running),
            ("admission.max_in_queue", config.max_in_queue),
        ] {
            if value > pool::MAX_CAPACITY {
                return Err(ValidationError::CapacityTooLarge { field, value });
            }
        }
        let controller = Self::new(max_running, config.max_in_queue);
        controller.apply_config(config);
        Ok(controller)
    }

    /// Apply the reconfigurable part of `config`: the queue deadline and the
    /// overload response. Pool capacities are fixed at construction.
    ///
    /// The responder is rebuilt only when `[admission.overload]` differs from
    /// the last applied section, so a responder installed with
    /// [`set_overload_responder`](Self::set_overload_responder) survives
    /// reloads that leave that section alone.
    pub fn apply_config(&self, config: &AdmissionConfig) {
        self.settings.rcu(|current| {
            let responder = if current.overload.as_ref() == Some(&config.overload) {
                Arc::clone(&current.responder)
            } else {
                let fresh: Arc<dyn OverloadResponder> =
                    Arc::new(StaticResponder::from_config(&config.overload));
                fresh
            };
            Settings {
                max_wait_in_queue: config.max_wait_in_queue(),
                responder,
                overload: Some(config.overload.clone()),
            }
        });
    }

    /// Set the longest time a request may wait in the queue. Zero waits
    /// indefinitely. Requests already queued keep their current deadline.
    pub fn set_max_wait_in_queue(&self, max_wait: Duration) {
        self.settings.rcu(|current| Settings {
            max_wait_in_queue: max_wait,
            responder: Arc::clone(&current.responder),
            overload: current.overload.clone(),
        });
    }

    pub fn max_wait_in_queue(&self) -> Duration {
        self.settings.load().max_wait_in_queue
    }

    /// Replace the responder used for overload and queue-timeout rejections.
    ///
    /// A later [`apply_config`](Self::apply_config) whose overload section
    /// changed replaces it with a [`StaticResponder`] again.
    pub fn set_overload_responder<R: OverloadResponder>(&self, responder: R) {
        let responder: Arc<dyn OverloadResponder> = Arc::new(responder);
        self.settings.rcu(|current| Settings {
            max_wait_in_queue: current.max_wait_in_queue,
            responder: Arc::clone(&responder),
            overload: current.overload.clone(),
        });
    }

    pub fn overload_responder(&self) -> Arc<dyn OverloadResponder> {
        Arc::clone(&self.settings.load().responder)
    }

    pub fn running(&self) -> &PermitPool {
        &self.running
    }

    pub fn queue(&self) -> &PermitPool {
        &self.queue
    }

    /// Decide whether a request may run.
    ///
    /// `cancelled` resolves when the caller is gone; it is only observed
    /// while the request is queued. Dropping the returned future is
    /// equivalent to cancellation.
    pub async fn admit<C>(&self, cancelled: C) -> Admission
    where
        C: Future<Output = ()>,
    {
        if let Some(permit) = self.running.try_acquire() {
            self.counters.admitted_fast.fetch_add(1, Ordering::Relaxed);
            metrics::record_admission(AdmitPath::Fast.as_str(), Duration::ZERO);
            return Admission::Admitted(Admitted {
                permit,
                path: AdmitPath::Fast,
                waited: Duration::ZERO,
            });
        }

        let Some(queue_permit) = self.queue.try_acquire() else {
            self.counters
                .rejected_overloaded
                .fetch_add(1, Ordering::Relaxed);
            metrics::record_rejection(RejectReason::Overloaded.as_str(), Duration::ZERO);
            tracing::warn!(
                max_running = self.running.capacity(),
                max_in_queue = self.queue.capacity(),
                "Running pool and queue are full, rejecting request"
            );
            return Admission::Rejected(Rejection {
                reason: RejectReason::Overloaded,
                waited: Duration::ZERO,
            });
        };

        let enqueued_at = Instant::now();
        let mut abandoned = Abandoned {
            counters: &self.counters,
            enqueued_at,
            armed: true,
        };
        let max_wait = self.max_wait_in_queue();
        tracing::debug!(
            queued = self.queue.occupancy(),
            max_wait_ms = max_wait.as_millis() as u64,
            "Request queued"
        );

        let deadline = async move {
            if max_wait.is_zero() {
                std::future::pending::<()>().await
            } else {
                tokio::time::sleep(max_wait).await
            }
        };

        // Losing branches are dropped when `select!` returns, which disarms
        // the deadline and abandons the pending running acquire.
        let waited = tokio::select! {
            permit = self.running.acquire() => Waited::Promoted(permit),
            () = deadline => Waited::TimedOut,
            () = cancelled => Waited::Cancelled,
        };
        abandoned.armed = false;
        drop(queue_permit);

        let elapsed = enqueued_at.elapsed();
        match waited {
            Waited::Promoted(permit) => {
                self.counters
                    .admitted_delayed
                    .fetch_add(1, Ordering::Relaxed);
                metrics::record_admission(AdmitPath::Delayed.as_str(), elapsed);
                tracing::debug!(waited_ms = elapsed.as_millis() as u64, "Queued request admitted");
                Admission::Admitted(Admitted {
                    permit,
                    path: AdmitPath::Delayed,
                    waited: elapsed,
                })
            }
            Waited::TimedOut => {
                self.counters.rejected_timeout.fetch_add(1, Ordering::Relaxed);
                metrics::record_rejection(RejectReason::QueueTimeout.as_str(), elapsed);
                tracing::warn!(
                    waited_ms = elapsed.as_millis() as u64,
                    "Request timed out in queue"
                );
                Admission::Rejected(Rejection {
                    reason: RejectReason::QueueTimeout,
                    waited: elapsed,
                })
            }
            Waited::Cancelled => {
                self.counters.cancelled.fetch_add(1, Ordering::Relaxed);
                metrics::record_cancellation(elapsed);
                tracing::debug!(
                    waited_ms = elapsed.as_millis() as u64,
                    "Caller went away while queued"
                );
                Admission::Cancelled { waited: elapsed }
            }
        }
    }

    /// Current occupancy and cumulative outcome counters.
    pub fn stats(&self) -> AdmissionStats {
        AdmissionStats {
            max_running: self.running.capacity(),
            running: self.running.occupancy(),
            max_in_queue: self.queue.capacity(),
            queued: self.queue.occupancy(),
            max_wait_in_queue_ms: self.max_wait_in_queue().as_millis() as u64,
            admitted_fast: self.counters.admitted_fast.load(Ordering::Relaxed),
            admitted_delayed: self.counters.admitted_delayed.load(Ordering::Relaxed),
            rejected_overloaded: self.counters.rejected_overloaded.load(Ordering::Relaxed),
            rejected_timeout: self.counters.rejected_timeout.load(Ordering::Relaxed),
            cancelled: self.counters.cancelled.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdmissionController")
            .field("running", &self.running)
            .field("queue", &self.queue)
            .field("max_wait_in_queue", &self.max_wait_in_queue())
            .field("counters", &self.counters)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::pending;
    use std::sync::atomic::AtomicUsize;

    use axum::http::request::Parts;
    use axum::http::{Request, StatusCode};
    use axum::response::IntoResponse;
    use futures_util::FutureExt;
    use metrics_util::debugging::DebuggingRecorder;
    use tokio::sync::{mpsc, oneshot};

    use crate::admission::pool::tests::gauge;

    fn controller(max_running: usize, max_in_queue: usize) -> Arc<AdmissionController> {
        Arc::new(AdmissionController::new(
            NonZeroUsize::new(max_running).unwrap(),
            max_in_queue,
        ))
    }

    async fn wait_until(what: &str, check: impl Fn() -> bool) {
        let waited = tokio::time::timeout(Duration::from_secs(1), async {
            while !check() {
                tokio::task::yield_now().await;
            }
        })
        .await;
        assert!(waited.is_ok(), "timed out waiting for {what}");
    }

    fn admitted(admission: Admission) -> Admitted {
        match admission {
            Admission::Admitted(admitted) => admitted,
            other => panic!("expected admission, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn fast_path_admits_until_running_is_full() {
        let ctrl = controller(2, 0);

        let a = admitted(ctrl.admit(pending()).await);
        let b = admitted(ctrl.admit(pending()).await);
        assert_eq!(a.path(), AdmitPath::Fast);
        assert_eq!(b.permit().pool(), "running");
        assert_eq!(ctrl.stats().running, 2);

        // no queue capacity: overflow is rejected right away
        match ctrl.admit(pending()).await {
            Admission::Rejected(rejection) => {
                assert_eq!(rejection.reason, RejectReason::Overloaded);
                assert_eq!(rejection.waited, Duration::ZERO);
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        drop(a);
        drop(b);
        let stats = ctrl.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.admitted_fast, 2);
        assert_eq!(stats.rejected_overloaded, 1);
    }

    #[tokio::test]
    async fn queued_requests_are_promoted_one_per_release() {
        let ctrl = controller(2, 3);
        let first = admitted(ctrl.admit(pending()).await);
        let second = admitted(ctrl.admit(pending()).await);

        let (tx, mut rx) = mpsc::unbounded_channel();
        for _ in 0..3 {
            let ctrl = ctrl.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let admission = ctrl.admit(pending()).await;
                let _ = tx.send(admission);
            });
        }
        wait_until("three queued requests", || ctrl.stats().queued == 3).await;

        match ctrl.admit(pending()).await {
            Admission::Rejected(rejection) => assert_eq!(rejection.reason, RejectReason::Overloaded),
            other => panic!("expected rejection, got {other:?}"),
        }

        drop(first);
        let promoted = admitted(rx.recv().await.unwrap());
        assert_eq!(promoted.path(), AdmitPath::Delayed);

        let stats = ctrl.stats();
        assert_eq!(stats.running, 2);
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.rejected_overloaded, 1);
        assert!(rx.try_recv().is_err());

        drop(second);
        drop(promoted);
        let a = admitted(rx.recv().await.unwrap());
        let b = admitted(rx.recv().await.unwrap());
        assert_eq!(ctrl.stats().queued, 0);
        drop((a, b));
        assert_eq!(ctrl.stats().running, 0);
        assert_eq!(ctrl.stats().admitted_delayed, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn queue_deadline_rejects_and_frees_the_queue_slot() {
        let ctrl = controller(1, 1);
        ctrl.set_max_wait_in_queue(Duration::from_millis(50));
        let _running = admitted(ctrl.admit(pending()).await);

        let waiter = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.admit(pending()).await })
        };
        wait_until("queued request", || ctrl.stats().queued == 1).await;

        tokio::time::advance(Duration::from_millis(60)).await;
        match waiter.await.unwrap() {
            Admission::Rejected(rejection) => {
                assert_eq!(rejection.reason, RejectReason::QueueTimeout);
                assert!(rejection.waited >= Duration::from_millis(50));
            }
            other => panic!("expected queue timeout, got {other:?}"),
        }
        assert_eq!(ctrl.queue().available(), 1);

        let next = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.admit(pending()).await })
        };
        wait_until("slot reused", || ctrl.stats().queued == 1).await;
        next.abort();
        let _ = next.await;
        assert_eq!(ctrl.stats().rejected_timeout, 1);
    }

    #[tokio::test]
    async fn cancellation_releases_the_queue_slot() {
        let ctrl = controller(1, 1);
        ctrl.set_max_wait_in_queue(Duration::from_secs(60));
        let running = admitted(ctrl.admit(pending()).await);

        let (cancel_tx, cancel_rx) = oneshot::channel::<()>();
        let waiter = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move {
                ctrl.admit(async {
                    let _ = cancel_rx.await;
                })
                .await
            })
        };
        wait_until("queued request", || ctrl.stats().queued == 1).await;

        cancel_tx.send(()).unwrap();
        assert!(matches!(waiter.await.unwrap(), Admission::Cancelled { .. }));

        let stats = ctrl.stats();
        assert_eq!(stats.queued, 0);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.cancelled, 1);
        assert_eq!(stats.rejected_timeout + stats.rejected_overloaded, 0);
        drop(running);
    }

    #[tokio::test]
    async fn dropping_a_queued_admit_releases_the_slot() {
        let ctrl = controller(1, 1);
        let running = admitted(ctrl.admit(pending()).await);

        let waiter = {
            let ctrl = ctrl.clone();
            tokio::spawn(async move { ctrl.admit(pending()).await })
        };
        wait_until("queued request", || ctrl.stats().queued == 1).await;

        waiter.abort();
        let _ = waiter.await;
        assert_eq!(ctrl.stats().queued, 0);
        assert_eq!(ctrl.stats().cancelled, 1);

        drop(running);
        assert_eq!(ctrl.stats().running, 0);
    }

    #[tokio::test]
    async fn reconfigured_deadline_applies_to_new_waiters() {
        let ctrl = controller(1, 2);
        let _running = admitted(ctrl.admit(pending()).await);
        assert_eq!(ctrl.max_wait_in_queue(), Duration::ZERO);

        ctrl.set_max_wait_in_queue(Duration::from_millis(10));
        match ctrl.admit(pending()).await {
            Admission::Rejected(rejection) => assert_eq!(rejection.reason, RejectReason::QueueTimeout),
            other => panic!("expected queue timeout, got {other:?}"),
        }
        assert_eq!(ctrl.stats().max_wait_in_queue_ms, 10);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_mix_never_exceeds_capacity_and_does_not_leak() {
        const MAX_RUNNING: usize = 3;
        const MAX_IN_QUEUE: usize = 5;
        const REQUESTS: usize = 200;

        let ctrl = controller(MAX_RUNNING, MAX_IN_QUEUE);
        ctrl.set_max_wait_in_queue(Duration::from_millis(5));
        let in_handler = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for i in 0..REQUESTS {
            let ctrl = ctrl.clone();
            let in_handler = in_handler.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                if let Admission::Admitted(admitted) = ctrl.admit(pending()).await {
                    let now = in_handler.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_micros((i % 7) as u64 * 300)).await;
                    in_handler.fetch_sub(1, Ordering::SeqCst);
                    drop(admitted);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= MAX_RUNNING);
        let stats = ctrl.stats();
        assert_eq!(stats.running, 0);
        assert_eq!(stats.queued, 0);
        let outcomes = stats.admitted_fast
            + stats.admitted_delayed
            + stats.rejected_overloaded
            + stats.rejected_timeout
            + stats.cancelled;
        assert_eq!(outcomes, REQUESTS as u64);
    }

    #[test]
    fn from_config_rejects_zero_running() {
        let config = AdmissionConfig {
            max_running: 0,
            ..AdmissionConfig::default()
        };
        assert!(matches!(
            AdmissionController::from_config(&config),
            Err(ValidationError::ZeroMaxRunning)
        ));
    }

    #[test]
    fn from_config_applies_queue_deadline() {
        let config = AdmissionConfig {
            max_running: 4,
            max_in_queue: 8,
            max_wait_in_queue_ms: 250,
            ..AdmissionConfig::default()
        };
        let ctrl = AdmissionController::from_config(&config).unwrap();
        let stats = ctrl.stats();
        assert_eq!(stats.max_running, 4);
        assert_eq!(stats.max_in_queue, 8);
        assert_eq!(ctrl.max_wait_in_queue(), Duration::from_millis(250));
    }

    #[test]
    fn from_config_rejects_capacity_beyond_semaphore_limit() {
        let config = AdmissionConfig {
            max_in_queue: usize::MAX,
            ..AdmissionConfig::default()
        };
        assert!(matches!(
            AdmissionController::from_config(&config),
            Err(ValidationError::CapacityTooLarge {
                field: "admission.max_in_queue",
                value: usize::MAX,
            })
        ));
    }

    #[test]
    fn reload_keeps_custom_responder_unless_overload_section_changes() {
        let mut config = AdmissionConfig::default();
        let ctrl = AdmissionController::from_config(&config).unwrap();
        ctrl.set_overload_responder(|_: &Rejection, _: &Parts| {
            StatusCode::IM_A_TEAPOT.into_response()
        });
        let rejection = Rejection {
            reason: RejectReason::Overloaded,
            waited: Duration::ZERO,
        };
        let (parts, ()) = Request::new(()).into_parts();

        config.max_wait_in_queue_ms = 100;
        ctrl.apply_config(&config);
        assert_eq!(ctrl.max_wait_in_queue(), Duration::from_millis(100));
        let res = ctrl.overload_responder().respond(&rejection, &parts);
        assert_eq!(res.status(), StatusCode::IM_A_TEAPOT);

        config.overload.status = 429;
        ctrl.apply_config(&config);
        let res = ctrl.overload_responder().respond(&rejection, &parts);
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn running_gauge_drops_when_admitted_request_finishes() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        let ctrl = controller(2, 1);

        ::metrics::with_local_recorder(&recorder, || {
            let admission = ctrl.admit(pending()).now_or_never().unwrap();
            let running = admitted(admission);
            assert_eq!(gauge(&snapshotter, "running"), Some(1.0));
            drop(running);
        });

        assert_eq!(ctrl.stats().running, 0);
        assert_eq!(gauge(&snapshotter, "running"), Some(0.0));
    }
}
