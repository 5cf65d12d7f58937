//! Call signaling: channel naming, access tokens, and per-call session
//! tracking.
//!
//! The media session itself runs on an external framework; this module only
//! exchanges setup metadata.  Sessions are ephemeral — nothing here is
//! persisted, and a session disappears on its terminal transition.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use palaver_shared::UserId;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Lifetime of an issued call access token.
const TOKEN_TTL_SECS: i64 = 3600;

/// Derive the channel name shared by a pair of callers.
///
/// Order-independent: the two ids are sorted before joining, so
/// `call_channel(a, b) == call_channel(b, a)` and both directions of a call
/// resolve to the same channel.
pub fn call_channel(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("call:{lo}:{hi}")
}

/// A short-lived access token for the external media framework.
#[derive(Debug, Clone, Serialize)]
pub struct CallToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// Caller-side call progress, as observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerState {
    Idle,
    RequestingToken,
    SignalingSent,
    Ringing,
    Connected,
    Rejected,
    TimedOut,
    Ended,
}

/// Callee-side call progress, as observed by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalleeState {
    Idle,
    OfferReceived,
    Accepted,
    Rejected,
    Connected,
    Ended,
}

/// One in-flight call attempt on a channel.
#[derive(Debug, Clone)]
struct CallSession {
    caller: UserId,
    callee: UserId,
    caller_state: CallerState,
    callee_state: CalleeState,
    updated_at: Instant,
}

/// Coordinates call setup: issues tokens and tracks session state keyed by
/// channel name.
#[derive(Clone)]
pub struct CallSignaling {
    app_id: Option<String>,
    app_secret: Option<[u8; 32]>,
    sessions: Arc<RwLock<HashMap<String, CallSession>>>,
}

impl CallSignaling {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            app_id: config.call_app_id.clone(),
            app_secret: config.call_app_secret,
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Begin a call attempt: derive the channel and open a session in the
    /// token-requesting state.  A repeat request for the same pair restarts
    /// the attempt.
    pub async fn begin(&self, caller: &UserId, callee: &UserId) -> Result<String, ServerError> {
        if caller == callee {
            return Err(ServerError::InvalidArgument(
                "cannot call yourself".into(),
            ));
        }

        let channel = call_channel(caller, callee);
        let mut sessions = self.sessions.write().await;
        sessions.insert(
            channel.clone(),
            CallSession {
                caller: caller.clone(),
                callee: callee.clone(),
                caller_state: CallerState::RequestingToken,
                callee_state: CalleeState::Idle,
                updated_at: Instant::now(),
            },
        );
        debug!(channel = %channel, caller = %caller, "call attempt started");
        Ok(channel)
    }

    /// Issue an access token for `user` on `channel`.
    ///
    /// Fails with `CallUnconfigured` when the media credentials are absent —
    /// at this operation, not at startup, so messaging keeps working on an
    /// instance that never configured calling.
    pub async fn issue_token(
        &self,
        channel: &str,
        user: &UserId,
    ) -> Result<CallToken, ServerError> {
        let (Some(app_id), Some(secret)) = (self.app_id.as_deref(), self.app_secret.as_ref())
        else {
            return Err(ServerError::CallUnconfigured(
                "CALL_APP_ID / CALL_APP_SECRET not set".into(),
            ));
        };

        let expires_at = Utc::now() + Duration::seconds(TOKEN_TTL_SECS);
        let expires_unix = expires_at.timestamp();
        let mac = blake3::keyed_hash(
            secret,
            format!("{channel}:{user}:{expires_unix}").as_bytes(),
        );
        let token = format!("{app_id}:{expires_unix}:{}", hex::encode(mac.as_bytes()));

        // Token issuance is an observable step on both sides: the caller
        // fetches one before signaling, the callee after accepting (to join
        // the media session).
        {
            let mut sessions = self.sessions.write().await;
            if let Some(session) = sessions.get_mut(channel) {
                if session.caller == *user && session.caller_state == CallerState::RequestingToken
                {
                    session.caller_state = CallerState::SignalingSent;
                } else if session.callee == *user
                    && session.callee_state == CalleeState::Accepted
                {
                    session.callee_state = CalleeState::Connected;
                }
                session.updated_at = Instant::now();
            }
        }

        Ok(CallToken { token, expires_at })
    }

    /// Record a relayed offer.  `delivered` is whether the callee's
    /// connection accepted the event; an undelivered offer leaves the
    /// caller short of ringing (no retry — the caller checks presence first
    /// and otherwise gives up).
    pub async fn on_offer(&self, channel: &str, caller: &UserId, callee: &UserId, delivered: bool) {
        let mut sessions = self.sessions.write().await;
        // An offer relayed without a preceding `begin` (token already in
        // hand from an earlier attempt) still gets a session, starting from
        // the notional idle states.
        let session = sessions
            .entry(channel.to_string())
            .or_insert_with(|| CallSession {
                caller: caller.clone(),
                callee: callee.clone(),
                caller_state: CallerState::Idle,
                callee_state: CalleeState::Idle,
                updated_at: Instant::now(),
            });

        if delivered {
            session.caller_state = CallerState::Ringing;
            session.callee_state = CalleeState::OfferReceived;
        } else {
            session.caller_state = CallerState::SignalingSent;
        }
        session.updated_at = Instant::now();
        debug!(channel = %channel, delivered, "call offer relayed");
    }

    /// Record a relayed answer.
    ///
    /// The caller learns the call was picked up, so their side is connected;
    /// the callee has accepted and completes the media join against the
    /// external framework, which this coordinator never observes.
    pub async fn on_answer(&self, channel: &str) {
        let mut sessions = self.sessions.write().await;
        match sessions.get_mut(channel) {
            Some(session) => {
                if session.callee_state != CalleeState::OfferReceived {
                    warn!(
                        channel = %channel,
                        state = ?session.callee_state,
                        "answer for a call that was not ringing"
                    );
                }
                session.callee_state = CalleeState::Accepted;
                session.caller_state = CallerState::Connected;
                session.updated_at = Instant::now();
            }
            None => warn!(channel = %channel, "answer for unknown call"),
        }
    }

    /// Record a rejection.  Terminal: the session is removed.
    pub async fn on_reject(&self, channel: &str) {
        if let Some(mut session) = self.sessions.write().await.remove(channel) {
            session.caller_state = CallerState::Rejected;
            session.callee_state = CalleeState::Rejected;
            debug!(channel = %channel, state = ?session.caller_state, "call rejected");
        }
    }

    /// Record a hang-up from either side.  Terminal: the session is removed.
    pub async fn on_end(&self, channel: &str) {
        if let Some(mut session) = self.sessions.write().await.remove(channel) {
            session.caller_state = CallerState::Ended;
            session.callee_state = CalleeState::Ended;
            debug!(channel = %channel, state = ?session.caller_state, "call ended");
        }
    }

    /// Drop sessions that have not progressed within `max_age`.
    ///
    /// Covers attempts abandoned before any terminal event (caller closed
    /// the tab mid-ring, callee never answered an undelivered offer).
    pub async fn purge_stale(&self, max_age: std::time::Duration) {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|channel, session| {
            let stale = session.updated_at.elapsed() > max_age;
            if stale {
                info!(
                    channel = %channel,
                    caller_state = ?CallerState::TimedOut,
                    "purging stale call session"
                );
            }
            !stale
        });
        let purged = before - sessions.len();
        if purged > 0 {
            info!(purged, "stale call sessions removed");
        }
    }

    /// Observed states for a channel, if a session exists.  Mainly for
    /// introspection and tests.
    #[allow(dead_code)]
    pub async fn session_states(&self, channel: &str) -> Option<(CallerState, CalleeState)> {
        self.sessions
            .read()
            .await
            .get(channel)
            .map(|s| (s.caller_state, s.callee_state))
    }
}
