//! Run execution: post input, start a run, poll it to a terminal state.
//!
//! ```text
//! Submitted -> (Queued | InProgress)* -> Completed | Failed
//!                                     \-> TimedOut (deadline from submission)
//! ```
//!
//! Polling uses a fixed interval. Transient poll failures are retried until
//! the deadline. A timed-out run is abandoned, not cancelled: the provider
//! may still finish it later, but no result is returned for it.

use crate::error::AssistError;
use crate::extract::{extract_answers, AnswerSummary};
use crate::gateway::{ImageInput, MessageContent, ProviderGateway, RunStatus};
use crate::profile::ProfileResolver;
use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use refdesk_common::util::truncate_with_ellipsis;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Polling discipline for one run.
#[derive(Debug, Clone, Copy)]
pub struct RunPolicy {
    pub poll_interval: Duration,
    pub timeout: Duration,
}

impl Default for RunPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            timeout: Duration::from_secs(120),
        }
    }
}

/// Structured answer produced by a completed run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResult {
    pub session_id: String,
    pub run_id: String,
    pub answers: Vec<Value>,
    pub summary: AnswerSummary,
    pub elapsed_ms: u64,
    pub completed_at: DateTime<Utc>,
}

/// Terminal observation of the poll loop.
#[derive(Debug)]
enum RunOutcome {
    Completed,
    Failed(Option<String>),
    TimedOut,
}

pub struct RunExecutor {
    gateway: Arc<dyn ProviderGateway>,
    store: SessionStore,
    profiles: Arc<ProfileResolver>,
    policy: RunPolicy,
    in_flight: Arc<Mutex<HashSet<String>>>,
}

impl RunExecutor {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: SessionStore,
        profiles: Arc<ProfileResolver>,
        policy: RunPolicy,
    ) -> Self {
        Self {
            gateway,
            store,
            profiles,
            policy,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Whether a run is currently in flight for `session_id`.
    pub fn is_busy(&self, session_id: &str) -> bool {
        lock_set(&self.in_flight).contains(session_id)
    }

    /// Analyze one image against a session's document.
    ///
    /// Only one run per session may be in flight; a concurrent request for
    /// the same session fails with `RunInProgress`.
    pub async fn analyze(
        &self,
        session_id: &str,
        image: ImageInput,
        instruction: String,
    ) -> Result<RunResult, AssistError> {
        let _guard = InFlightGuard::acquire(&self.in_flight, session_id)?;
        self.store.get(session_id).await?;

        let message = MessageContent::TextWithImage {
            text: instruction,
            image,
        };
        self.gateway
            .post_message(session_id, &message)
            .await
            .map_err(|e| AssistError::upstream("post_message", e))?;

        let profile_id = self
            .profiles
            .current_or_resolve()
            .await
            .map_err(|e| AssistError::upstream("ensure_profile", e))?;

        let run_id = self
            .gateway
            .start_run(session_id, &profile_id)
            .await
            .map_err(|e| AssistError::upstream("start_run", e))?;
        let started = Instant::now();
        tracing::info!(session_id, run_id = %run_id, "Run submitted");

        match self.wait_for_run(session_id, &run_id, started).await? {
            RunOutcome::Completed => {}
            RunOutcome::Failed(reason) => {
                let reason = reason.unwrap_or_else(|| "unknown error".to_string());
                tracing::warn!(session_id, run_id = %run_id, reason = %reason, "Run failed");
                return Err(AssistError::RunFailed { run_id, reason });
            }
            RunOutcome::TimedOut => {
                let elapsed_secs = started.elapsed().as_secs();
                tracing::warn!(session_id, run_id = %run_id, elapsed_secs, "Run timed out");
                return Err(AssistError::Timeout {
                    session_id: session_id.to_string(),
                    run_id,
                    elapsed_secs,
                });
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let text = self
            .gateway
            .fetch_last_message(session_id)
            .await
            .map_err(|e| AssistError::upstream("fetch_last_message", e))?;
        tracing::debug!(
            session_id,
            preview = %truncate_with_ellipsis(&text, 200),
            "Run response received"
        );

        let answers = extract_answers(&text)?;
        let summary = AnswerSummary::from_answers(&answers);
        tracing::info!(
            session_id,
            run_id = %run_id,
            elapsed_ms,
            answers = summary.total,
            multiple_choice = summary.multiple_choice,
            written = summary.written,
            "Run completed"
        );

        Ok(RunResult {
            session_id: session_id.to_string(),
            run_id,
            answers,
            summary,
            elapsed_ms,
            completed_at: Utc::now(),
        })
    }

    /// Poll until a terminal status or the deadline, whichever comes first.
    async fn wait_for_run(
        &self,
        session_id: &str,
        run_id: &str,
        started: Instant,
    ) -> Result<RunOutcome, AssistError> {
        let deadline = started + self.policy.timeout;
        let mut polls = 0u32;

        loop {
            polls += 1;
            let poll = tokio::time::timeout_at(deadline, self.gateway.poll_run(session_id, run_id));

            match poll.await {
                Err(_) => return Ok(RunOutcome::TimedOut),
                Ok(Ok(RunStatus::Completed)) => return Ok(RunOutcome::Completed),
                Ok(Ok(RunStatus::Failed { reason })) => return Ok(RunOutcome::Failed(reason)),
                Ok(Ok(RunStatus::Pending(status))) => {
                    tracing::debug!(
                        session_id,
                        run_id,
                        status = %status,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "Run pending"
                    );
                }
                Ok(Err(e)) if e.is_transient() => {
                    tracing::warn!(session_id, run_id, polls, error = %e, "Poll failed, retrying");
                }
                Ok(Err(e)) => return Err(AssistError::upstream("poll_run", e)),
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(RunOutcome::TimedOut);
            }
            let pause = self.policy.poll_interval.min(deadline - now);
            tokio::time::sleep(pause).await;
        }
    }
}

fn lock_set(set: &Mutex<HashSet<String>>) -> std::sync::MutexGuard<'_, HashSet<String>> {
    set.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks a session busy for the guard's lifetime.
struct InFlightGuard {
    set: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl InFlightGuard {
    fn acquire(set: &Arc<Mutex<HashSet<String>>>, session_id: &str) -> Result<Self, AssistError> {
        if !lock_set(set).insert(session_id.to_string()) {
            return Err(AssistError::RunInProgress(session_id.to_string()));
        }
        Ok(Self {
            set: Arc::clone(set),
            session_id: session_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock_set(&self.set).remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_rejects_second_holder_and_releases_on_drop() {
        let set = Arc::new(Mutex::new(HashSet::new()));

        let guard = InFlightGuard::acquire(&set, "thread_1").unwrap();
        assert!(matches!(
            InFlightGuard::acquire(&set, "thread_1"),
            Err(AssistError::RunInProgress(_))
        ));
        assert!(InFlightGuard::acquire(&set, "thread_2").is_ok());

        drop(guard);
        assert!(InFlightGuard::acquire(&set, "thread_1").is_ok());
    }
}
