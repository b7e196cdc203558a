/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Privileged call gate.
//!
//! Every [`Host`] call made by the control loop goes through
//! [`CallGate::call`]:
//!
//! * **Isolated**: the closure runs on tokio's blocking pool, never on the
//!   control loop's own task.  A panic inside it is caught and surfaced as
//!   [`CallError::Panicked`] with its message.
//! * **Single-flight**: concurrent callers queue on an async mutex; at most
//!   one closure runs at a time.
//! * **Bounded**: each call has a fixed timeout (10 s by default).  When it
//!   fires the caller gets [`CallError::TimedOut`] and the gate is released;
//!   the abandoned closure's result is discarded.

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::host::{Host, HostError};

/// Default bound on a single privileged call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, PartialEq)]
pub enum CallError {
    #[error("privileged call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("privileged call failed: {0}")]
    Host(#[from] HostError),

    /// The closure panicked.  Carries the panic message when it had one.
    #[error("privileged call panicked: {0}")]
    Panicked(String),

    /// The blocking pool dropped the call (runtime shutting down).
    #[error("privileged call was cancelled")]
    Cancelled,
}

// ── CallGate ──────────────────────────────────────────────────────────────────

/// Serialises and bounds access to a [`Host`].
pub struct CallGate<H: Host> {
    host: Arc<H>,
    flight: Mutex<()>,
    timeout: Duration,
}

impl<H: Host> CallGate<H> {
    pub fn with_timeout(host: Arc<H>, timeout: Duration) -> Self {
        Self {
            host,
            flight: Mutex::new(()),
            timeout,
        }
    }

    /// Run `f` against the host in isolation.
    pub async fn call<T, F>(&self, f: F) -> Result<T, CallError>
    where
        F: FnOnce(&H) -> Result<T, HostError> + Send + 'static,
        T: Send + 'static,
    {
        let _flight = self.flight.lock().await;
        let host = Arc::clone(&self.host);
        let handle = tokio::task::spawn_blocking(move || f(&host));

        match tokio::time::timeout(self.timeout, handle).await {
            Err(_) => {
                warn!(timeout = ?self.timeout, "privileged call timed out");
                Err(CallError::TimedOut(self.timeout))
            }
            Ok(Err(join)) if join.is_panic() => {
                let msg = panic_message(join.into_panic());
                debug!(panic = %msg, "privileged call panicked");
                Err(CallError::Panicked(msg))
            }
            Ok(Err(_)) => Err(CallError::Cancelled),
            Ok(Ok(result)) => result.map_err(CallError::from),
        }
    }
}

/// Best-effort text for a panic payload; non-string payloads get a stand-in.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
