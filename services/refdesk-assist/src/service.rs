//! Service facade: the boundary operations exposed to clients.

use crate::error::AssistError;
use crate::executor::{RunExecutor, RunPolicy, RunResult};
use crate::gateway::{AssistantProfile, ImageInput, ProfileSpec, ProviderGateway};
use crate::janitor::Janitor;
use crate::orchestrator::{DocumentSource, UploadOrchestrator, UploadSettings};
use crate::profile::ProfileResolver;
use crate::reclaim::{release_resources, ReleaseReport};
use crate::store::{ResourceBundle, SessionStore};
use base64::Engine;
use chrono::{DateTime, Utc};
use refdesk_common::util::minutes_rounded;
use refdesk_common::Config;
use serde::Serialize;
use std::sync::Arc;

/// Client-facing view of a stored session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub file_id: String,
    pub index_id: String,
    pub source_ref: String,
    pub created_at: DateTime<Utc>,
    pub age_minutes: f64,
}

impl SessionView {
    pub fn from_bundle(bundle: &ResourceBundle, now: DateTime<Utc>) -> Self {
        Self {
            session_id: bundle.session_id.clone(),
            file_id: bundle.file_id.clone(),
            index_id: bundle.index_id.clone(),
            source_ref: bundle.source_ref.clone(),
            created_at: bundle.created_at,
            age_minutes: minutes_rounded(bundle.age(now).num_milliseconds()),
        }
    }
}

pub struct AssistService {
    gateway: Arc<dyn ProviderGateway>,
    store: SessionStore,
    profiles: Arc<ProfileResolver>,
    orchestrator: UploadOrchestrator,
    executor: RunExecutor,
    default_instruction: String,
    config: Config,
}

impl AssistService {
    pub fn new(gateway: Arc<dyn ProviderGateway>, config: Config) -> Self {
        let store = SessionStore::new();
        let spec = ProfileSpec {
            name: config.provider.assistant_name.clone(),
            model: config.provider.model.clone(),
            instructions: config.provider.instructions.clone(),
        };
        let profiles = Arc::new(ProfileResolver::new(
            Arc::clone(&gateway),
            spec,
            config.provider.assistant_id.clone(),
        ));

        let orchestrator = UploadOrchestrator::new(
            Arc::clone(&gateway),
            store.clone(),
            Arc::clone(&profiles),
            UploadSettings {
                accepted_extensions: config
                    .sessions
                    .accepted_extensions
                    .iter()
                    .map(|e| e.trim_start_matches('.').to_lowercase())
                    .collect(),
                seed_message: config.sessions.seed_message.clone(),
            },
        );

        let executor = RunExecutor::new(
            Arc::clone(&gateway),
            store.clone(),
            Arc::clone(&profiles),
            RunPolicy {
                poll_interval: config.runs.poll_interval(),
                timeout: config.runs.timeout(),
            },
        );

        Self {
            gateway,
            store,
            profiles,
            orchestrator,
            executor,
            default_instruction: config.runs.default_instruction.clone(),
            config,
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Resolve the assistant profile ahead of the first request.
    pub async fn prepare_profile(&self) -> Result<AssistantProfile, AssistError> {
        self.profiles
            .resolve()
            .await
            .map_err(|e| AssistError::upstream("ensure_profile", e))
    }

    pub async fn create_session(
        &self,
        source: DocumentSource,
        name: Option<String>,
    ) -> Result<SessionView, AssistError> {
        let bundle = self.orchestrator.create_session(source, name).await?;
        Ok(SessionView::from_bundle(&bundle, Utc::now()))
    }

    pub async fn get_session(&self, session_id: &str) -> Result<SessionView, AssistError> {
        require_session_id(session_id)?;
        let bundle = self.store.get(session_id).await?;
        Ok(SessionView::from_bundle(&bundle, Utc::now()))
    }

    /// All sessions, oldest first.
    pub async fn list_sessions(&self) -> Vec<SessionView> {
        let now = Utc::now();
        self.store
            .snapshot()
            .await
            .iter()
            .map(|bundle| SessionView::from_bundle(bundle, now))
            .collect()
    }

    /// Remove a session, then release its provider resources.
    ///
    /// Provider failures are reported but do not fail the call: once the
    /// entry is gone the session no longer exists for clients.
    pub async fn delete_session(&self, session_id: &str) -> Result<ReleaseReport, AssistError> {
        require_session_id(session_id)?;
        let bundle = self.store.remove(session_id).await?;
        let report = release_resources(self.gateway.as_ref(), &bundle.owned_resources()).await;
        tracing::info!(
            session_id,
            released = report.released,
            failures = report.failures.len(),
            "Session deleted"
        );
        Ok(report)
    }

    pub async fn analyze_image(
        &self,
        session_id: &str,
        image: ImageInput,
        instruction: Option<String>,
    ) -> Result<RunResult, AssistError> {
        require_session_id(session_id)?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(image.data_base64.trim())
            .map_err(|e| AssistError::Validation(format!("image is not valid base64: {e}")))?;
        if decoded.is_empty() {
            return Err(AssistError::Validation("image is empty".into()));
        }

        let instruction = instruction
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.default_instruction.clone());

        self.executor.analyze(session_id, image, instruction).await
    }

    /// Janitor over this service's store and gateway.
    pub fn janitor(&self) -> Janitor {
        Janitor::new(
            self.store.clone(),
            Arc::clone(&self.gateway),
            self.config.sessions.max_age(),
            self.config.sessions.sweep_interval(),
        )
    }
}

fn require_session_id(session_id: &str) -> Result<(), AssistError> {
    if session_id.trim().is_empty() {
        return Err(AssistError::Validation("session id is required".into()));
    }
    Ok(())
}
