//! Append-only audit event sink.
//!
//! `record` never blocks the request path: events go through a bounded
//! channel to a background writer task that emits them as JSON lines under
//! the `audit` log target, preserving per-process ordering. When the channel
//! is full the event is counted in `dropped_events` instead of silently
//! disappearing.
//!
//! Event payloads must never contain secrets: no passwords, no raw tokens,
//! no CSRF signatures. Token ids (jti), hash prefixes and usernames only.

use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio::sync::mpsc;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    LoginSuccess,
    LoginFailure,
    Logout,
    TokenRevoked,
    TokenReused,
    CsrfViolation,
    RateLimitExceeded,
    AccessDenied,
    ApiRequest,
    PayloadTooLarge,
    StoreFallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: Severity,
    pub user_id: Option<String>,
    pub client_ip: Option<String>,
    /// Stable id joining every event emitted for one request.
    pub correlation_id: String,
    pub timestamp: DateTime<Utc>,
    /// Microseconds of monotonic time since the audit service started;
    /// immune to wall-clock adjustments, used to order events for one
    /// process.
    pub monotonic_us: u64,
    pub details: Value,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_type,
            severity: Severity::Info,
            user_id: None,
            client_ip: None,
            correlation_id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            monotonic_us: 0,
            details: Value::Object(Default::default()),
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn apply_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id;
        self
    }

    pub fn with_client_ip(mut self, client_ip: impl Into<String>) -> Self {
        self.client_ip = Some(client_ip.into());
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if let Value::Object(map) = &mut self.details {
            map.insert(key.to_string(), value.into());
        }
        self
    }
}

#[derive(Clone)]
pub struct AuditService {
    tx: mpsc::Sender<AuditEvent>,
    dropped: Arc<AtomicU64>,
    started: Instant,
    /// Test hook: synchronous copy of everything recorded.
    capture: Option<Arc<Mutex<Vec<AuditEvent>>>>,
}

impl AuditService {
    /// Spawn the background writer; must be called from within a tokio
    /// runtime.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self::spawn_writer(rx);
        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
            started: Instant::now(),
            capture: None,
        }
    }

    /// Like `new`, but additionally copies every recorded event into the
    /// returned buffer before enqueueing, so tests can assert on the stream
    /// without racing the writer task.
    pub fn with_capture(capacity: usize) -> (Self, Arc<Mutex<Vec<AuditEvent>>>) {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let mut service = Self::new(capacity);
        service.capture = Some(buffer.clone());
        (service, buffer)
    }

    fn spawn_writer(mut rx: mpsc::Receiver<AuditEvent>) {
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => info!(target: "audit", "{}", line),
                    Err(e) => warn!("Failed to serialize audit event: {}", e),
                }
            }
        });
    }

    /// Enqueue an event. Fire-and-forget relative to the response path; a
    /// full buffer increments the drop counter rather than blocking.
    pub fn record(&self, mut event: AuditEvent) {
        event.timestamp = Utc::now();
        event.monotonic_us = self.started.elapsed().as_micros() as u64;

        if let Some(capture) = &self.capture {
            if let Ok(mut buf) = capture.lock() {
                buf.push(event.clone());
            }
        }

        if self.tx.try_send(event).is_err() {
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!("Audit buffer full; {} events dropped so far", total);
        }
    }

    /// Number of events lost to a full buffer since startup, for monitoring.
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
