//! Admission control for concurrent streams.
//!
//! [`AdmissionRegistry`] is the only state shared across streams. It caps the
//! number of active streams, counts every admission, and reclaims streams
//! that outlive the configured maximum duration.
//!
//! The capacity check and the insert happen under one mutex, so two callers
//! racing for the last slot can never both succeed. The active and served
//! counters are mirrored into atomics: [`AdmissionRegistry::active_count`],
//! [`AdmissionRegistry::is_at_capacity`] and
//! [`AdmissionRegistry::statistics`] never touch the lock.
//!
//! Every admission carries an expiry token. A sweep that reclaims a record
//! cancels its token, and the stream holding the matching [`StreamGuard`]
//! terminates with `STREAM_EXPIRED`.
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use squall::registry::{AdmissionRegistry, StreamType};
//!
//! let registry = Arc::new(AdmissionRegistry::new(1, Duration::from_secs(60)));
//! let guard = registry.try_acquire("st-1", "client-a", StreamType::Forecast).unwrap();
//! assert!(registry.is_at_capacity());
//! drop(guard);
//! assert_eq!(registry.active_count(), 0);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, info, warn};

use crate::config::StreamConfig;
use crate::error::StreamError;

/// Which orchestrator a stream runs.
#[derive(Serialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StreamType {
    Current,
    Forecast,
    Historical,
    Progress,
    Chat,
    ContextualChat,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StreamType::Current => "current",
            StreamType::Forecast => "forecast",
            StreamType::Historical => "historical",
            StreamType::Progress => "progress",
            StreamType::Chat => "chat",
            StreamType::ContextualChat => "contextual_chat",
        };
        f.write_str(name)
    }
}

/// One admitted stream. Owned by the registry.
#[derive(Serialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionRecord {
    pub stream_id: String,
    pub client_id: String,
    pub stream_type: StreamType,
    /// Wall-clock admission time, for reporting.
    pub started_at: DateTime<Utc>,
    /// Monotonic admission time; expiry is measured against this. Uses the
    /// tokio clock so a paused runtime controls expiry.
    #[serde(skip)]
    start: Instant,
    /// Admission serial. Lets a guard tell its own record apart from a
    /// later record that reused the same id.
    #[serde(skip)]
    serial: u64,
    /// Cancelled when a sweep reclaims this record.
    #[serde(skip)]
    expiry: CancellationToken,
}

impl ConnectionRecord {
    /// How long this stream has been active as of `now`.
    pub fn age_at(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.start)
    }

    pub fn age(&self) -> Duration {
        self.age_at(Instant::now())
    }
}

/// Point-in-time registry counters.
#[derive(Serialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RegistryStats {
    pub active: usize,
    pub max: usize,
    pub total_served: u64,
    pub max_duration_ms: u64,
}

/// Concurrency-capped registry of active streams.
#[derive(Debug)]
pub struct AdmissionRegistry {
    connections: Mutex<HashMap<String, ConnectionRecord>>,
    max_concurrent: usize,
    max_duration: Duration,
    active: AtomicUsize,
    total_served: AtomicU64,
}

impl AdmissionRegistry {
    pub fn new(max_concurrent: usize, max_duration: Duration) -> Self {
        Self {
            connections: Mutex::new(HashMap::with_capacity(max_concurrent.min(1024))),
            max_concurrent,
            max_duration,
            active: AtomicUsize::new(0),
            total_served: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &StreamConfig) -> Self {
        Self::new(config.max_concurrent, config.max_duration)
    }

    // A panic while holding the lock cannot leave the map half-updated, so a
    // poisoned mutex is still safe to use.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionRecord>> {
        self.connections.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Admit a stream if a slot is free.
    ///
    /// Returns `false` without side effects when the registry is full or the
    /// id is already active.
    pub fn register(
        &self,
        stream_id: impl Into<String>,
        client_id: impl Into<String>,
        stream_type: StreamType,
    ) -> bool {
        self.admit(stream_id.into(), client_id.into(), stream_type)
            .is_ok()
    }

    /// Admit a stream and return a guard that releases the slot when dropped.
    pub fn try_acquire(
        self: &Arc<Self>,
        stream_id: impl Into<String>,
        client_id: impl Into<String>,
        stream_type: StreamType,
    ) -> Result<StreamGuard, StreamError> {
        let stream_id = stream_id.into();
        let (serial, expiry) = self.admit(stream_id.clone(), client_id.into(), stream_type)?;
        Ok(StreamGuard {
            registry: Arc::clone(self),
            stream_id,
            serial,
            expiry,
            released: false,
        })
    }

    fn admit(
        &self,
        stream_id: String,
        client_id: String,
        stream_type: StreamType,
    ) -> Result<(u64, CancellationToken), StreamError> {
        let mut connections = self.lock();
        if connections.len() >= self.max_concurrent {
            warn!(
                stream_id = %stream_id,
                active = connections.len(),
                max = self.max_concurrent,
                "Admission rejected: at capacity"
            );
            return Err(StreamError::AdmissionRejected {
                stream_id,
                active: connections.len(),
                max: self.max_concurrent,
            });
        }
        if connections.contains_key(&stream_id) {
            warn!(stream_id = %stream_id, "Admission rejected: duplicate stream id");
            return Err(StreamError::DuplicateStream(stream_id));
        }

        let serial = self.total_served.fetch_add(1, Ordering::SeqCst) + 1;
        let expiry = CancellationToken::new();
        debug!(
            stream_id = %stream_id,
            client_id = %client_id,
            stream_type = %stream_type,
            "Stream admitted"
        );
        connections.insert(
            stream_id.clone(),
            ConnectionRecord {
                stream_id,
                client_id,
                stream_type,
                started_at: Utc::now(),
                start: Instant::now(),
                serial,
                expiry: expiry.clone(),
            },
        );
        self.active.store(connections.len(), Ordering::SeqCst);
        Ok((serial, expiry))
    }

    /// Remove a stream. Removing an unknown id is a no-op.
    ///
    /// Returns whether a record was removed.
    pub fn unregister(&self, stream_id: &str) -> bool {
        let mut connections = self.lock();
        let removed = connections.remove(stream_id).is_some();
        self.active.store(connections.len(), Ordering::SeqCst);
        if removed {
            debug!(stream_id, "Stream unregistered");
        }
        removed
    }

    /// Remove `stream_id` only if it is still the admission with `serial`.
    fn release(&self, stream_id: &str, serial: u64) -> bool {
        let mut connections = self.lock();
        let owned = connections
            .get(stream_id)
            .is_some_and(|record| record.serial == serial);
        if owned {
            connections.remove(stream_id);
            self.active.store(connections.len(), Ordering::SeqCst);
            debug!(stream_id, "Stream released");
        }
        owned
    }

    pub fn is_at_capacity(&self) -> bool {
        self.active_count() >= self.max_concurrent
    }

    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Total admissions since creation. Never decreases.
    pub fn total_served(&self) -> u64 {
        self.total_served.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    pub fn max_duration(&self) -> Duration {
        self.max_duration
    }

    pub fn statistics(&self) -> RegistryStats {
        RegistryStats {
            active: self.active_count(),
            max: self.max_concurrent,
            total_served: self.total_served(),
            max_duration_ms: self.max_duration.as_millis() as u64,
        }
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        self.lock().contains_key(stream_id)
    }

    /// Active records, oldest first.
    pub fn snapshot(&self) -> Vec<ConnectionRecord> {
        let mut records: Vec<ConnectionRecord> = self.lock().values().cloned().collect();
        records.sort_by_key(|r| r.start);
        records
    }

    /// Remove every record older than the maximum duration and signal its
    /// stream to terminate.
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    /// [`sweep_expired`](Self::sweep_expired) against an explicit clock reading.
    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let mut connections = self.lock();
        let before = connections.len();
        connections.retain(|id, record| {
            let keep = record.age_at(now) <= self.max_duration;
            if !keep {
                warn!(
                    stream_id = %id,
                    client_id = %record.client_id,
                    age_ms = record.age_at(now).as_millis() as u64,
                    "Reclaiming expired stream"
                );
                record.expiry.cancel();
            }
            keep
        });
        self.active.store(connections.len(), Ordering::SeqCst);
        before - connections.len()
    }
}

/// Holds one admission slot. Releases it exactly once, on
/// [`release`](StreamGuard::release) or drop.
#[derive(Debug)]
pub struct StreamGuard {
    registry: Arc<AdmissionRegistry>,
    stream_id: String,
    serial: u64,
    expiry: CancellationToken,
    released: bool,
}

impl StreamGuard {
    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    /// Whether a sweep has reclaimed this admission.
    pub fn is_expired(&self) -> bool {
        self.expiry.is_cancelled()
    }

    /// Resolves once a sweep reclaims this admission.
    pub fn expired(&self) -> WaitForCancellationFuture<'_> {
        self.expiry.cancelled()
    }

    /// Release the slot now. Later calls (and the drop) do nothing.
    ///
    /// Returns whether this call removed the record; `false` if it was
    /// already released or reclaimed by a sweep.
    pub fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        self.registry.release(&self.stream_id, self.serial)
    }
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run [`AdmissionRegistry::sweep_expired`] every `every` on the current
/// tokio runtime. Abort the returned handle to stop it.
pub fn spawn_sweeper(registry: Arc<AdmissionRegistry>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = registry.sweep_expired();
            if removed > 0 {
                info!(
                    removed,
                    active = registry.active_count(),
                    "Sweep reclaimed expired streams"
                );
            }
        }
    })
}
