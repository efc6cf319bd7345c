//! Per-device submission throttle
//!
//! A pruned fixed-window counter with a temporary ban. The ban is shorter
//! than the window, so a device that keeps submitting right after a ban
//! expires is banned again on its next attempt.
//!
//! Admission takes a slot right away; a submission that is not accepted
//! afterwards hands it back with [`RateLimiter::release`].

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{StorageError, SubmitError, Throttled};
use crate::storage::RateLimitStore;

/// Limits applied to one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitPolicy {
    /// Observation window (millis)
    pub window_ms: u64,
    /// Submissions allowed inside the window
    pub max_submissions: usize,
    /// Ban length once the window is full (millis)
    pub ban_ms: u64,
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self {
            window_ms: 10 * 60 * 1000,
            max_submissions: 5,
            ban_ms: 60 * 1000,
        }
    }
}

/// Persisted throttle state: accepted submission times plus a ban deadline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    /// Accepted submission times (Unix millis), oldest first
    pub history: Vec<u64>,
    /// No submissions accepted before this time (Unix millis)
    pub ban_until: u64,
}

/// Outcome of evaluating a submission attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allow,
    Reject(Throttled),
}

impl RateLimitState {
    /// Drop history entries that have left the window.
    pub fn prune(&mut self, now: u64, window_ms: u64) {
        self.history
            .retain(|&ts| now.saturating_sub(ts) < window_ms);
    }

    /// Decide whether a submission at `now` may proceed.
    ///
    /// Prunes the history and, when the window is full, starts a ban. Does
    /// not record the submission; call [`RateLimitState::record`] for that.
    pub fn evaluate(&mut self, now: u64, policy: &RateLimitPolicy) -> RateDecision {
        if now < self.ban_until {
            return RateDecision::Reject(Throttled {
                remaining_ms: self.ban_until - now,
                newly_banned: false,
            });
        }

        self.prune(now, policy.window_ms);

        if self.history.len() >= policy.max_submissions {
            self.ban_until = now + policy.ban_ms;
            return RateDecision::Reject(Throttled {
                remaining_ms: policy.ban_ms,
                newly_banned: true,
            });
        }

        RateDecision::Allow
    }

    pub fn record(&mut self, now: u64) {
        self.history.push(now);
    }

    /// Remove one recorded entry at `at`. Returns false if none was found.
    pub fn unrecord(&mut self, at: u64) -> bool {
        match self.history.iter().rposition(|&ts| ts == at) {
            Some(pos) => {
                self.history.remove(pos);
                true
            }
            None => false,
        }
    }
}

/// Slot taken by an admitted submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    at: u64,
}

impl Reservation {
    /// Admission time (Unix millis)
    pub fn at(&self) -> u64 {
        self.at
    }
}

/// Gate in front of the submission pipeline
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    policy: RateLimitPolicy,
    // Serializes load-evaluate-save so concurrent submissions can't share a slot
    gate: Mutex<()>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn RateLimitStore>, policy: RateLimitPolicy) -> Self {
        Self {
            store,
            policy,
            gate: Mutex::new(()),
        }
    }

    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }

    /// Admit or reject a submission at `now`, persisting the outcome.
    ///
    /// An admitted submission is recorded in the history before returning.
    pub async fn admit(&self, now: u64) -> Result<Reservation, SubmitError> {
        let _gate = self.gate.lock().await;
        let mut state = self.store.load_rate_limit().await?;

        match state.evaluate(now, &self.policy) {
            RateDecision::Allow => {
                state.record(now);
                self.store.save_rate_limit(&state).await?;
                Ok(Reservation { at: now })
            }
            RateDecision::Reject(throttled) => {
                if throttled.newly_banned {
                    self.store.save_rate_limit(&state).await?;
                    warn!(
                        ban_ms = self.policy.ban_ms,
                        submissions = state.history.len(),
                        "Submission burst detected, device banned"
                    );
                }
                Err(SubmitError::Throttled(throttled))
            }
        }
    }

    /// Give back the slot of a submission that was not accepted.
    pub async fn release(&self, reservation: Reservation) {
        let _gate = self.gate.lock().await;
        let mut state = match self.store.load_rate_limit().await {
            Ok(state) => state,
            Err(e) => {
                warn!(error = %e, "Could not load throttle state to release a slot");
                return;
            }
        };
        if !state.unrecord(reservation.at) {
            // Already pruned out of the window
            return;
        }
        match self.store.save_rate_limit(&state).await {
            Ok(()) => debug!(at = reservation.at, "Submission slot released"),
            Err(e) => warn!(error = %e, "Could not persist released submission slot"),
        }
    }

    /// Current persisted state, for diagnostics.
    pub async fn state(&self) -> Result<RateLimitState, StorageError> {
        self.store.load_rate_limit().await
    }
}
