//! Status Poller
//!
//! Waits for an asynchronous state transition on one remote object:
//! fetch, evaluate the predicate, sleep a fixed interval, repeat until the
//! predicate holds or the timeout elapses. No backoff and no jitter.
//!
//! A 404 while waiting for presence is treated as eventual-consistency lag
//! and polling continues; with [`Predicate::Absent`] a 404 means done.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::context::{DEFAULT_POLL_INTERVAL_SECS, DEFAULT_POLL_TIMEOUT_SECS};
use crate::error::ReconcileError;
use crate::platform::{ObjectRef, Platform, PlatformError, RemoteObject};

/// Condition a waited-on object must satisfy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "until", rename_all = "kebab-case")]
pub enum Predicate {
    /// Normalized status equals `value` (`ACTIVE`, `active`, `Ready`)
    StatusEquals { value: String },
    /// The field at `pointer` equals `value`
    FieldEquals { pointer: String, value: Value },
    /// The field at `pointer` is populated (non-null, non-empty)
    FieldPresent { pointer: String },
    /// The object no longer exists
    Absent,
}

impl Predicate {
    pub fn status(value: impl Into<String>) -> Self {
        Predicate::StatusEquals {
            value: value.into(),
        }
    }

    pub fn field(pointer: impl Into<String>, value: impl Into<Value>) -> Self {
        Predicate::FieldEquals {
            pointer: pointer.into(),
            value: value.into(),
        }
    }

    pub fn present(pointer: impl Into<String>) -> Self {
        Predicate::FieldPresent {
            pointer: pointer.into(),
        }
    }

    /// Evaluate against an observed object. `Absent` never holds for an
    /// object that could be fetched.
    pub fn is_met(&self, object: &RemoteObject) -> bool {
        match self {
            Predicate::StatusEquals { value } => object.status.as_deref() == Some(value.as_str()),
            Predicate::FieldEquals { pointer, value } => object.field(pointer) == Some(value),
            Predicate::FieldPresent { pointer } => match object.field(pointer) {
                None | Some(Value::Null) => false,
                Some(Value::String(s)) => !s.is_empty(),
                Some(_) => true,
            },
            Predicate::Absent => false,
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::StatusEquals { value } => write!(f, "status == {}", value),
            Predicate::FieldEquals { pointer, value } => write!(f, "{} == {}", pointer, value),
            Predicate::FieldPresent { pointer } => write!(f, "{} present", pointer),
            Predicate::Absent => f.write_str("absent"),
        }
    }
}

/// Poll timing used when a wait does not set its own
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollDefaults {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for PollDefaults {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            timeout: Duration::from_secs(DEFAULT_POLL_TIMEOUT_SECS),
        }
    }
}

/// Wait request as written in a descriptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WaitSpec {
    #[serde(flatten)]
    pub predicate: Predicate,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_secs: Option<u64>,

    /// Statuses that abort the wait (`ERROR`, `failed`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fail_on: Vec<String>,
}

impl WaitSpec {
    pub fn new(predicate: Predicate) -> Self {
        Self {
            predicate,
            timeout_secs: None,
            interval_secs: None,
            fail_on: Vec::new(),
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_interval_secs(mut self, secs: u64) -> Self {
        self.interval_secs = Some(secs);
        self
    }

    pub fn with_fail_on(mut self, status: impl Into<String>) -> Self {
        self.fail_on.push(status.into());
        self
    }

    /// Bind this spec to a concrete object
    pub fn condition(&self, target: ObjectRef, defaults: &PollDefaults) -> WaitCondition {
        WaitCondition {
            target,
            predicate: self.predicate.clone(),
            timeout: self
                .timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            interval: self
                .interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.interval),
            fail_on: self.fail_on.clone(),
        }
    }
}

/// A single wait, created per call
#[derive(Debug, Clone, PartialEq)]
pub struct WaitCondition {
    pub target: ObjectRef,
    pub predicate: Predicate,
    pub timeout: Duration,
    pub interval: Duration,
    pub fail_on: Vec<String>,
}

impl WaitCondition {
    pub fn new(target: ObjectRef, predicate: Predicate, defaults: &PollDefaults) -> Self {
        Self {
            target,
            predicate,
            timeout: defaults.timeout,
            interval: defaults.interval,
            fail_on: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fail_on(mut self, status: impl Into<String>) -> Self {
        self.fail_on.push(status.into());
        self
    }
}

/// Result of a successful wait
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome {
    /// The object satisfied the predicate
    Ready(RemoteObject),
    /// The object is gone
    Absent,
}

impl WaitOutcome {
    pub fn into_object(self) -> Option<RemoteObject> {
        match self {
            WaitOutcome::Ready(object) => Some(object),
            WaitOutcome::Absent => None,
        }
    }
}

/// Poll `condition.target` until `condition.predicate` holds.
///
/// Each sleep is clamped to the time left, so the call returns within one
/// request of `timeout`. Transport failures abort the wait, and a zero
/// interval is refused before the first request.
pub async fn wait_for(
    platform: &dyn Platform,
    condition: &WaitCondition,
) -> Result<WaitOutcome, ReconcileError> {
    let target = &condition.target;
    if condition.interval.is_zero() {
        return Err(ReconcileError::InvalidDescriptor(format!(
            "{}: poll interval must be > 0",
            target
        )));
    }
    let started = Instant::now();
    let mut last_status: Option<String> = None;
    let mut polls: u32 = 0;

    info!(
        %target,
        predicate = %condition.predicate,
        timeout = ?condition.timeout,
        "Waiting"
    );

    loop {
        polls += 1;
        match platform.get(target.kind, target.namespace(), &target.id).await {
            Ok(object) => {
                if object.status != last_status {
                    info!(
                        %target,
                        from = last_status.as_deref().unwrap_or("-"),
                        to = object.status.as_deref().unwrap_or("-"),
                        "Status changed"
                    );
                    last_status = object.status.clone();
                }
                debug!(%target, poll = polls, status = ?object.status, "Polled");

                if let Some(status) = &object.status {
                    if condition.fail_on.iter().any(|s| s == status) {
                        return Err(ReconcileError::Failed {
                            target: target.clone(),
                            status: status.clone(),
                        });
                    }
                }
                if condition.predicate.is_met(&object) {
                    info!(%target, polls, elapsed = ?started.elapsed(), "Condition met");
                    return Ok(WaitOutcome::Ready(object));
                }
            }
            Err(PlatformError::NotFound(_)) => {
                if condition.predicate == Predicate::Absent {
                    info!(%target, polls, elapsed = ?started.elapsed(), "Gone");
                    return Ok(WaitOutcome::Absent);
                }
                debug!(%target, poll = polls, "Not visible yet");
            }
            Err(e) => return Err(ReconcileError::platform(e, target.kind, &target.id)),
        }

        let elapsed = started.elapsed();
        if elapsed >= condition.timeout {
            return Err(ReconcileError::Timeout {
                target: target.clone(),
                waited: elapsed,
                last_status,
            });
        }
        sleep(condition.interval.min(condition.timeout - elapsed)).await;
    }
}

/// Run `attempt` up to `attempts` times with a fixed delay between tries.
///
/// `Ok(Some(v))` finishes, `Ok(None)` means not yet, `Err` aborts
/// immediately. Returns `Ok(None)` when the budget runs out.
pub async fn retry_fixed<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    mut attempt: F,
) -> Result<Option<T>, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for n in 1..=attempts {
        if let Some(value) = attempt(n).await? {
            return Ok(Some(value));
        }
        if n < attempts {
            debug!(attempt = n, of = attempts, delay = ?delay, "Not ready, retrying");
            sleep(delay).await;
        }
    }
    Ok(None)
}
