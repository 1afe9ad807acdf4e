//! Scripted in-memory provider shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use refdesk_assist::{
    AssistService, AssistantProfile, Document, GatewayError, MessageContent, ProfileSpec,
    ProviderGateway, ResourceKind, RunStatus,
};
use refdesk_common::Config;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n1 0 obj\n<< >>\nendobj\n%%EOF";

/// Minimal valid base64 payload for image inputs.
pub const IMAGE_BASE64: &str = "iVBORw0KGgo=";

pub const ANSWER_TEXT: &str = r#"Here are the answers:
[
  {"questionNumber": 1, "type": "multiple-choice", "correctAnswer": 2},
  {"questionNumber": 2, "type": "written", "answerText": "Photosynthesis"}
]"#;

/// Provider call that can be scripted to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Upload,
    Profile,
    Index,
    Session,
    Message,
    StartRun,
    Poll,
    FetchMessage,
}

struct Script {
    fail_at: Option<(FailPoint, GatewayError)>,
    pending_polls: usize,
    transient_poll_errors: usize,
    profile_delay: Duration,
    poll_delay: Duration,
    terminal: RunStatus,
    reply: String,
    fail_deletes: bool,
    live: HashSet<(ResourceKind, String)>,
    deleted: Vec<(ResourceKind, String)>,
    messages: Vec<(String, MessageContent)>,
    uploads: usize,
    polls: usize,
    fetches: usize,
    profile_checks: usize,
    profiles_created: usize,
}

pub struct FakeGateway {
    script: Mutex<Script>,
    next_id: AtomicUsize,
}

impl Default for FakeGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeGateway {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script {
                fail_at: None,
                pending_polls: 0,
                transient_poll_errors: 0,
                profile_delay: Duration::ZERO,
                poll_delay: Duration::ZERO,
                terminal: RunStatus::Completed,
                reply: ANSWER_TEXT.to_string(),
                fail_deletes: false,
                live: HashSet::new(),
                deleted: Vec::new(),
                messages: Vec::new(),
                uploads: 0,
                polls: 0,
                fetches: 0,
                profile_checks: 0,
                profiles_created: 0,
            }),
            next_id: AtomicUsize::new(1),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        self.script.lock().unwrap()
    }

    fn mint(&self, prefix: &str) -> String {
        format!("{}_{}", prefix, self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    fn check(&self, point: FailPoint) -> Result<(), GatewayError> {
        match &self.script().fail_at {
            Some((at, error)) if *at == point => Err(error.clone()),
            _ => Ok(()),
        }
    }

    pub fn fail_at(&self, point: FailPoint) {
        self.fail_with(point, GatewayError::Transport("connection reset".into()));
    }

    pub fn fail_with(&self, point: FailPoint, error: GatewayError) {
        self.script().fail_at = Some((point, error));
    }

    pub fn clear_failure(&self) {
        self.script().fail_at = None;
    }

    pub fn set_pending_polls(&self, polls: usize) {
        self.script().pending_polls = polls;
    }

    pub fn set_transient_poll_errors(&self, errors: usize) {
        self.script().transient_poll_errors = errors;
    }

    /// Make every profile check take `delay` before answering.
    pub fn set_profile_delay(&self, delay: Duration) {
        self.script().profile_delay = delay;
    }

    /// Make every status poll take `delay` before answering.
    pub fn set_poll_delay(&self, delay: Duration) {
        self.script().poll_delay = delay;
    }

    pub fn set_terminal(&self, status: RunStatus) {
        self.script().terminal = status;
    }

    pub fn set_reply(&self, reply: impl Into<String>) {
        self.script().reply = reply.into();
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.script().fail_deletes = fail;
    }

    /// Register resources as existing on the provider.
    pub fn adopt(&self, kind: ResourceKind, id: &str) {
        self.script().live.insert((kind, id.to_string()));
    }

    /// Drop a resource on the provider side without recording a delete.
    pub fn forget(&self, kind: ResourceKind, id: &str) {
        self.script().live.remove(&(kind, id.to_string()));
    }

    pub fn live_count(&self) -> usize {
        self.script().live.len()
    }

    pub fn is_live(&self, kind: ResourceKind, id: &str) -> bool {
        self.script().live.contains(&(kind, id.to_string()))
    }

    pub fn deleted(&self) -> Vec<(ResourceKind, String)> {
        self.script().deleted.clone()
    }

    pub fn messages(&self) -> Vec<(String, MessageContent)> {
        self.script().messages.clone()
    }

    pub fn uploads(&self) -> usize {
        self.script().uploads
    }

    pub fn polls(&self) -> usize {
        self.script().polls
    }

    pub fn fetches(&self) -> usize {
        self.script().fetches
    }

    pub fn profile_checks(&self) -> usize {
        self.script().profile_checks
    }

    pub fn profiles_created(&self) -> usize {
        self.script().profiles_created
    }
}

#[async_trait]
impl ProviderGateway for FakeGateway {
    async fn upload_document(
        &self,
        _document: Document,
        _purpose: &str,
    ) -> Result<String, GatewayError> {
        self.check(FailPoint::Upload)?;
        let id = self.mint("file");
        let mut script = self.script();
        script.uploads += 1;
        script.live.insert((ResourceKind::File, id.clone()));
        Ok(id)
    }

    async fn ensure_profile(
        &self,
        cached_id: Option<&str>,
        _spec: &ProfileSpec,
    ) -> Result<AssistantProfile, GatewayError> {
        let delay = {
            let mut script = self.script();
            script.profile_checks += 1;
            script.profile_delay
        };
        tokio::time::sleep(delay).await;
        self.check(FailPoint::Profile)?;
        if let Some(id) = cached_id {
            return Ok(AssistantProfile {
                id: id.to_string(),
                reused: true,
            });
        }
        let id = self.mint("asst");
        self.script().profiles_created += 1;
        Ok(AssistantProfile { id, reused: false })
    }

    async fn create_index(&self, _file_id: &str, _name: &str) -> Result<String, GatewayError> {
        self.check(FailPoint::Index)?;
        let id = self.mint("vs");
        self.script().live.insert((ResourceKind::Index, id.clone()));
        Ok(id)
    }

    async fn create_session(&self, _index_id: &str) -> Result<String, GatewayError> {
        self.check(FailPoint::Session)?;
        let id = self.mint("thread");
        self.script().live.insert((ResourceKind::Session, id.clone()));
        Ok(id)
    }

    async fn post_message(
        &self,
        session_id: &str,
        content: &MessageContent,
    ) -> Result<(), GatewayError> {
        self.check(FailPoint::Message)?;
        self.script()
            .messages
            .push((session_id.to_string(), content.clone()));
        Ok(())
    }

    async fn start_run(&self, _session_id: &str, _profile_id: &str) -> Result<String, GatewayError> {
        self.check(FailPoint::StartRun)?;
        Ok(self.mint("run"))
    }

    async fn poll_run(&self, _session_id: &str, _run_id: &str) -> Result<RunStatus, GatewayError> {
        let delay = self.script().poll_delay;
        tokio::time::sleep(delay).await;
        self.check(FailPoint::Poll)?;
        let mut script = self.script();
        script.polls += 1;
        if script.transient_poll_errors > 0 {
            script.transient_poll_errors -= 1;
            return Err(GatewayError::Rejected {
                status: 503,
                message: "overloaded".into(),
            });
        }
        if script.pending_polls > 0 {
            script.pending_polls -= 1;
            return Ok(RunStatus::Pending("in_progress".into()));
        }
        Ok(script.terminal.clone())
    }

    async fn fetch_last_message(&self, _session_id: &str) -> Result<String, GatewayError> {
        self.check(FailPoint::FetchMessage)?;
        let mut script = self.script();
        script.fetches += 1;
        Ok(script.reply.clone())
    }

    async fn delete_resource(&self, kind: ResourceKind, id: &str) -> Result<(), GatewayError> {
        let mut script = self.script();
        if script.fail_deletes {
            return Err(GatewayError::Rejected {
                status: 500,
                message: "internal error".into(),
            });
        }
        if !script.live.remove(&(kind, id.to_string())) {
            return Err(GatewayError::NotFound(format!("{kind} {id}")));
        }
        script.deleted.push((kind, id.to_string()));
        Ok(())
    }
}

/// Configuration with fast polling for tests.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.runs.poll_interval_ms = 5;
    config.runs.timeout_secs = 5;
    config
}

pub fn test_service() -> (Arc<FakeGateway>, AssistService) {
    let gateway = Arc::new(FakeGateway::new());
    let service = AssistService::new(gateway.clone(), test_config());
    (gateway, service)
}

pub fn pdf_source(filename: &str) -> refdesk_assist::DocumentSource {
    refdesk_assist::DocumentSource::Bytes {
        filename: filename.to_string(),
        bytes: PDF_BYTES.to_vec(),
    }
}

/// Poll `condition` until it holds or `limit` elapses.
pub async fn wait_until<F>(limit: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    condition()
}
