//! Two-step confirmation for destructive account resets.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::clock::Clock;
use crate::domain::entities::UserId;
use crate::domain::errors::{TrackerError, TrackerResult};

/// Pending reset requests keyed by user, each valid for `ttl`.
pub struct PendingResetStore {
    clock: Arc<dyn Clock>,
    ttl: Duration,
    pending: Mutex<HashMap<UserId, DateTime<Utc>>>,
}

impl PendingResetStore {
    pub fn new(clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            clock,
            ttl: Duration::from_std(ttl).unwrap_or_else(|_| Duration::seconds(120)),
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Open (or refresh) a request and return when it expires.
    pub fn request(&self, user_id: UserId) -> DateTime<Utc> {
        let expires_at = self.clock.now() + self.ttl;
        if let Ok(mut pending) = self.pending.lock() {
            pending.insert(user_id, expires_at);
        }
        expires_at
    }

    /// Consume the user's request. Expired requests are removed and refused.
    pub fn confirm(&self, user_id: UserId) -> TrackerResult<()> {
        let expires_at = self
            .pending
            .lock()
            .ok()
            .and_then(|mut pending| pending.remove(&user_id))
            .ok_or(TrackerError::ResetNotPending)?;

        if self.clock.now() > expires_at {
            return Err(TrackerError::ResetExpired {
                ttl_secs: self.ttl.num_seconds().max(0) as u64,
            });
        }
        Ok(())
    }

    /// Returns `true` when a request was pending.
    pub fn cancel(&self, user_id: UserId) -> bool {
        self.pending
            .lock()
            .map(|mut pending| pending.remove(&user_id).is_some())
            .unwrap_or(false)
    }
}
