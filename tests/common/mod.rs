//! Shared utilities for integration and load testing.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use admission_gate::{AdmissionController, GateConfig, HttpServer, Shutdown};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Semaphore};

/// Upstream whose handler blocks until the test releases it.
pub struct MockUpstream {
    pub addr: SocketAddr,
    pub barrier: Arc<Semaphore>,
    pub calls: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl MockUpstream {
    /// Let `n` blocked (or future) requests complete.
    pub fn release(&self, n: usize) {
        self.barrier.add_permits(n);
    }

    /// Stop blocking altogether.
    pub fn open(&self) {
        self.barrier.add_permits(1_000_000);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// Start an upstream answering `200 OK` once the barrier allows it.
pub async fn start_blocking_upstream() -> MockUpstream {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let barrier = Arc::new(Semaphore::new(0));
    let calls = Arc::new(AtomicUsize::new(0));

    let handler = {
        let barrier = barrier.clone();
        let calls = calls.clone();
        move || {
            let barrier = barrier.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                barrier.acquire().await.unwrap().forget();
                "OK"
            }
        }
    };
    let app = Router::new().fallback(handler);

    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    MockUpstream {
        addr,
        barrier,
        calls,
    }
}

/// A gate server running in the background.
#[allow(dead_code)]
pub struct RunningGate {
    pub addr: SocketAddr,
    pub controller: Arc<AdmissionController>,
    pub shutdown: Shutdown,
    pub config_tx: mpsc::UnboundedSender<GateConfig>,
}

#[allow(dead_code)]
impl RunningGate {
    pub fn url(&self) -> String {
        format!("http://{}/", self.addr)
    }
}

/// Start a gate in front of `upstream`, letting the test adjust the config.
pub async fn start_gate(upstream: SocketAddr, configure: impl FnOnce(&mut GateConfig)) -> RunningGate {
    let mut config = GateConfig::default();
    config.listener.bind_address = "127.0.0.1:0".into();
    config.upstream.address = upstream.to_string();
    configure(&mut config);

    let listener = TcpListener::bind(&config.listener.bind_address).await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(config).unwrap();
    let controller = server.controller().clone();

    let shutdown = Shutdown::new();
    let (config_tx, config_updates) = mpsc::unbounded_channel();
    let server_shutdown = shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, config_updates, server_shutdown).await;
    });

    RunningGate {
        addr,
        controller,
        shutdown,
        config_tx,
    }
}

/// Client without connection reuse, so each request is its own connection.
pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}

/// Poll `check` until it holds, failing the test after a few seconds.
pub async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}
