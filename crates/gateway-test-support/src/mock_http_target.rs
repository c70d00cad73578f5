//! A mock HTTP target for exercising the HTTP forwarder's retry and
//! encryption-envelope behavior against a real listener.
//!
//! Binds to `127.0.0.1:0`, accepts any method/path, and pops one status
//! code off a configured sequence per request (repeating the last entry
//! once exhausted) — enough to drive spec.md §8 scenario 4 ("500, 500,
//! 200" with `retry_count=3`).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::any;
use axum::Router;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

#[derive(Default)]
struct Inner {
    statuses: Vec<u16>,
    next: usize,
    received_bodies: Vec<Vec<u8>>,
}

/// A running mock HTTP target. Dropping it aborts the accept loop.
pub struct MockHttpTarget {
    addr: SocketAddr,
    state: Arc<Mutex<Inner>>,
    task: JoinHandle<()>,
}

impl Drop for MockHttpTarget {
    fn drop(&mut self) {
        self.task.abort();
    }
}

impl MockHttpTarget {
    /// Start a target that always responds `200 OK`.
    pub async fn start() -> Self {
        Self::with_status_sequence(vec![200]).await
    }

    /// Start a target whose responses follow `statuses` in order, then
    /// repeat the final entry for any request beyond the sequence's length.
    pub async fn with_status_sequence(statuses: Vec<u16>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind mock http target");
        let addr = listener.local_addr().expect("local_addr");

        let state = Arc::new(Mutex::new(Inner { statuses, next: 0, received_bodies: Vec::new() }));
        let router_state = state.clone();
        let app = Router::new().fallback(any(handle)).with_state(router_state);

        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        MockHttpTarget { addr, state, task }
    }

    /// The base URL this target is listening on (`http://127.0.0.1:<port>`).
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// How many requests have been received so far.
    pub fn request_count(&self) -> usize {
        self.state.lock().expect("mock target state poisoned").received_bodies.len()
    }

    /// The raw bodies of every request received so far, in arrival order.
    pub fn received_bodies(&self) -> Vec<Vec<u8>> {
        self.state.lock().expect("mock target state poisoned").received_bodies.clone()
    }

    /// The most recent request body, JSON-decoded.
    pub fn last_json(&self) -> Option<serde_json::Value> {
        self.received_bodies().last().and_then(|b| serde_json::from_slice(b).ok())
    }
}

async fn handle(State(state): State<Arc<Mutex<Inner>>>, body: Bytes) -> StatusCode {
    let mut inner = state.lock().expect("mock target state poisoned");
    inner.received_bodies.push(body.to_vec());
    let idx = inner.next.min(inner.statuses.len().saturating_sub(1));
    let code = inner.statuses.get(idx).copied().unwrap_or(200);
    if inner.next < inner.statuses.len() {
        inner.next += 1;
    }
    StatusCode::from_u16(code).unwrap_or(StatusCode::OK)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn replays_status_sequence_then_repeats_the_last_entry() {
        let target = MockHttpTarget::with_status_sequence(vec![500, 500, 200]).await;
        let client = reqwest::Client::new();
        let codes: Vec<u16> = {
            let mut v = Vec::new();
            for _ in 0..4 {
                let resp = client.post(target.url()).body("{}").send().await.unwrap();
                v.push(resp.status().as_u16());
            }
            v
        };
        assert_eq!(codes, vec![500, 500, 200, 200]);
        assert_eq!(target.request_count(), 4);
    }
}
