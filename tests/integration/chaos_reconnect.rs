//! End-to-end chaos test: a real local WebSocket server that accepts, then
//! drops, then accepts again, verifying the agent's `WsPump` reconnects with
//! growing backoff and resumes heartbeating once stable.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::net::TcpListener;

use agent::config::UpstreamConfig;
use agent::pump::{PumpConsumer, WsPump};
use transport_proto::ResponseGenerationRequest;

struct CountingConsumer {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl PumpConsumer for CountingConsumer {
    async fn on_response_generation_request(&self, _request: ResponseGenerationRequest) {
        self.count.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn pump_survives_three_consecutive_connection_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let accepted = Arc::new(AtomicUsize::new(0));
    let accepted_for_server = accepted.clone();
    let server = tokio::spawn(async move {
        for attempt in 0..4 {
            let (stream, _) = listener.accept().await.expect("accept");
            let mut ws = tokio_tungstenite::accept_async(stream).await.expect("ws upgrade");
            let _ = ws.next().await; // subscribe handshake
            accepted_for_server.fetch_add(1, Ordering::SeqCst);
            if attempt < 3 {
                // Drop immediately — simulate a flaky backend.
                continue;
            }
            // Stay up on the fourth attempt so the pump settles into Active.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    });

    let config = UpstreamConfig {
        url: format!("ws://{addr}"),
        ping_interval: Duration::from_secs(30),
        read_timeout: Duration::from_secs(60),
        write_timeout: Duration::from_secs(5),
        reconnect_interval: Duration::from_millis(15),
        reconnect_max_interval: Duration::from_millis(100),
    };

    let consumer = Arc::new(CountingConsumer { count: Arc::new(AtomicUsize::new(0)) });
    let pump = WsPump::new(config, consumer);
    pump.connect();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while accepted.load(Ordering::SeqCst) < 4 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(accepted.load(Ordering::SeqCst), 4, "pump should reconnect through every drop");

    // Give the pump a moment after the fourth accept to mark itself connected.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(pump.is_connected(), "pump should be active on the stable connection");

    pump.disconnect().await;
    let _ = server.await;
}
