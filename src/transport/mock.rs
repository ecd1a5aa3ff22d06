//! Scripted `WireClient` and `Sleeper` for exercising the engine without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::TransportFailure;
use crate::transport::http::{WireClient, WireResponse};
use crate::transport::{Credentials, RequestDescriptor, Sleeper};

/// One scripted answer, optionally delayed to shape completion order.
#[derive(Debug, Clone)]
pub struct MockReply {
    pub outcome: Result<WireResponse, TransportFailure>,
    pub delay: Option<Duration>,
}

impl MockReply {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            outcome: Ok(WireResponse {
                status,
                retry_after: None,
                body: body.to_string().into_bytes(),
            }),
            delay: None,
        }
    }

    pub fn text(status: u16, body: &str) -> Self {
        Self {
            outcome: Ok(WireResponse {
                status,
                retry_after: None,
                body: body.as_bytes().to_vec(),
            }),
            delay: None,
        }
    }

    pub fn rate_limited(retry_after: &str) -> Self {
        Self {
            outcome: Ok(WireResponse {
                status: 429,
                retry_after: Some(retry_after.to_string()),
                body: br#"{"error":"API Rate Limit Exceeded"}"#.to_vec(),
            }),
            delay: None,
        }
    }

    pub fn failure(kind: TransportFailure) -> Self {
        Self {
            outcome: Err(kind),
            delay: None,
        }
    }

    pub fn delayed(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// Record of a call made to the mock.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub method: String,
    pub path: String,
    pub url: String,
    pub payload: Option<Value>,
    pub username: String,
    pub secret: String,
    pub attachments: usize,
    pub headers: Vec<(String, String)>,
    pub timeout: Duration,
}

#[derive(Default)]
struct Script {
    queued: HashMap<String, VecDeque<MockReply>>,
    fallback: HashMap<String, MockReply>,
}

/// Mock wire keyed by `"{METHOD} {path}"`.
///
/// Queued replies are consumed in FIFO order; once a key's queue is empty its
/// fallback (if any) answers every further call. Unscripted calls fail with
/// `TransportFailure::HostIssue`, which is never retried.
#[derive(Clone, Default)]
pub struct MockWire {
    script: Arc<Mutex<Script>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    in_flight: Arc<AtomicUsize>,
    peak_in_flight: Arc<AtomicUsize>,
}

impl MockWire {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, key: &str, reply: MockReply) {
        if let Ok(mut script) = self.script.lock() {
            script
                .queued
                .entry(key.to_string())
                .or_default()
                .push_back(reply);
        }
    }

    pub fn push_get(&self, path: &str, reply: MockReply) {
        self.push(&format!("GET {path}"), reply);
    }

    pub fn push_post(&self, path: &str, reply: MockReply) {
        self.push(&format!("POST {path}"), reply);
    }

    /// Answer every call for `key` with `reply` once its queue is drained.
    pub fn always(&self, key: &str, reply: MockReply) {
        if let Ok(mut script) = self.script.lock() {
            script.fallback.insert(key.to_string(), reply);
        }
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Calls whose path starts with `prefix`.
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.path.starts_with(prefix))
            .count()
    }

    /// Highest number of simultaneously executing calls observed.
    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_reply(&self, key: &str) -> Option<MockReply> {
        let mut script = self.script.lock().ok()?;
        if let Some(reply) = script.queued.get_mut(key).and_then(VecDeque::pop_front) {
            return Some(reply);
        }
        script.fallback.get(key).cloned()
    }
}

struct InFlightGuard(Arc<AtomicUsize>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl WireClient for MockWire {
    async fn execute(
        &self,
        url: &str,
        request: &RequestDescriptor,
        credentials: &Credentials,
        timeout: Duration,
    ) -> Result<WireResponse, TransportFailure> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(self.in_flight.clone());

        if let Ok(mut calls) = self.calls.lock() {
            calls.push(MockCall {
                method: request.method.as_str().to_string(),
                path: request.path.clone(),
                url: url.to_string(),
                payload: request.payload.clone(),
                username: credentials.username.clone(),
                secret: credentials.secret().to_string(),
                attachments: request.attachments.len(),
                headers: request.headers.clone(),
                timeout,
            });
        }

        let key = format!("{} {}", request.method.as_str(), request.path);
        let Some(reply) = self.next_reply(&key) else {
            return Err(TransportFailure::HostIssue);
        };

        if let Some(delay) = reply.delay {
            tokio::time::sleep(delay).await;
        }
        reply.outcome
    }
}

/// Sleeper that records requested durations and returns immediately.
#[derive(Clone, Default)]
pub struct RecordingSleeper {
    slept: Arc<Mutex<Vec<Duration>>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn durations(&self) -> Vec<Duration> {
        self.slept.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        if let Ok(mut slept) = self.slept.lock() {
            slept.push(duration);
        }
    }
}
