use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};
use std::sync::{PoisonError, RwLock, RwLockWriteGuard};
use std::time::{Duration, Instant};

/// Point-in-time copy of the pipeline counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MeterStatus {
    #[serde(rename = "uptime_secs", serialize_with = "as_secs")]
    pub uptime: Duration,
    pub processed: u64,
    pub failed: u64,
    pub last_failure: Option<DateTime<Utc>>,
}

fn as_secs<S: Serializer>(uptime: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(uptime.as_secs_f64())
}

/// Delivery counters shared by the workers and the health-check surface.
pub struct StatusTracker {
    inner: RwLock<Counters>,
}

struct Counters {
    started: Option<Instant>,
    processed: u64,
    failed: u64,
    last_failure: Option<DateTime<Utc>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Counters {
                started: None,
                processed: 0,
                failed: 0,
                last_failure: None,
            }),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, Counters> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Starts the uptime clock.
    pub fn start(&self) {
        self.write().started = Some(Instant::now());
    }

    pub fn record_processed(&self) {
        self.write().processed += 1;
    }

    pub fn record_failure(&self) {
        let mut counters = self.write();
        counters.failed += 1;
        counters.last_failure = Some(Utc::now());
    }

    pub fn snapshot(&self) -> MeterStatus {
        let counters = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        MeterStatus {
            uptime: counters
                .started
                .map(|started| started.elapsed())
                .unwrap_or_default(),
            processed: counters.processed,
            failed: counters.failed,
            last_failure: counters.last_failure,
        }
    }
}

impl Default for StatusTracker {
    fn default() -> Self {
        Self::new()
    }
}
