//! Session creation: turn a source document into a stored resource bundle.
//!
//! Creation is a chain of provider calls. If any link fails, everything
//! created earlier in the same attempt is released before the error is
//! returned, and nothing is stored.

use crate::error::{AssistError, UploadStep};
use crate::gateway::{Document, GatewayError, MessageContent, ProviderGateway, ResourceKind};
use crate::profile::ProfileResolver;
use crate::reclaim::release_resources;
use crate::store::{ResourceBundle, SessionStore};
use chrono::Utc;
use refdesk_common::util::format_bytes;
use std::path::PathBuf;
use std::sync::Arc;

/// Purpose tag attached to uploaded documents.
const UPLOAD_PURPOSE: &str = "assistants";

const DEFAULT_FILENAME: &str = "uploaded.pdf";

/// Where the source document comes from.
#[derive(Debug, Clone)]
pub enum DocumentSource {
    Bytes { filename: String, bytes: Vec<u8> },
    Path(PathBuf),
}

/// Settings for session creation.
#[derive(Debug, Clone)]
pub struct UploadSettings {
    /// Accepted extensions, lowercase without dot.
    pub accepted_extensions: Vec<String>,
    pub seed_message: String,
}

pub struct UploadOrchestrator {
    gateway: Arc<dyn ProviderGateway>,
    store: SessionStore,
    profiles: Arc<ProfileResolver>,
    settings: UploadSettings,
}

impl UploadOrchestrator {
    pub fn new(
        gateway: Arc<dyn ProviderGateway>,
        store: SessionStore,
        profiles: Arc<ProfileResolver>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            gateway,
            store,
            profiles,
            settings,
        }
    }

    /// Create a session for `source`. `name` overrides the recorded source
    /// reference (defaults to the filename or path).
    pub async fn create_session(
        &self,
        source: DocumentSource,
        name: Option<String>,
    ) -> Result<ResourceBundle, AssistError> {
        let (document, default_ref) = load_document(source).await?;
        let source_ref = name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(default_ref);
        self.validate(&document)?;

        tracing::info!(
            source_ref = %source_ref,
            size = %format_bytes(document.len() as u64),
            "Creating session from document"
        );

        let mut created: Vec<(ResourceKind, String)> = Vec::new();
        match self.build(document, &source_ref, &mut created).await {
            Ok(bundle) => {
                tracing::info!(
                    session_id = %bundle.session_id,
                    file_id = %bundle.file_id,
                    index_id = %bundle.index_id,
                    "Session created"
                );
                Ok(bundle)
            }
            Err((step, error)) => {
                tracing::error!(step = %step, error = %error, "Session creation failed");
                self.compensate(created).await;
                Err(AssistError::Upload {
                    step,
                    source: Box::new(error),
                })
            }
        }
    }

    fn validate(&self, document: &Document) -> Result<(), AssistError> {
        if document.is_empty() {
            return Err(AssistError::Validation("document is empty".into()));
        }

        let extension = document.extension().unwrap_or_default();
        if !self.settings.accepted_extensions.iter().any(|e| e == &extension) {
            return Err(AssistError::Validation(format!(
                "unsupported document type '{}' (accepted: {})",
                document.filename,
                self.settings.accepted_extensions.join(", ")
            )));
        }

        if extension == "pdf" && !document.bytes.starts_with(b"%PDF") {
            return Err(AssistError::Validation(format!(
                "'{}' is not a PDF document",
                document.filename
            )));
        }

        Ok(())
    }

    async fn build(
        &self,
        document: Document,
        source_ref: &str,
        created: &mut Vec<(ResourceKind, String)>,
    ) -> Result<ResourceBundle, (UploadStep, AssistError)> {
        let file_id = self
            .gateway
            .upload_document(document, UPLOAD_PURPOSE)
            .await
            .map_err(|e| failed(UploadStep::Upload, "upload_document", e))?;
        created.push((ResourceKind::File, file_id.clone()));
        tracing::debug!(file_id = %file_id, "Document uploaded");

        self.profiles
            .resolve()
            .await
            .map_err(|e| failed(UploadStep::ResolveProfile, "ensure_profile", e))?;

        let index_name = format!("{} - {}", source_ref, Utc::now().to_rfc3339());
        let index_id = self
            .gateway
            .create_index(&file_id, &index_name)
            .await
            .map_err(|e| failed(UploadStep::CreateIndex, "create_index", e))?;
        created.push((ResourceKind::Index, index_id.clone()));
        tracing::debug!(index_id = %index_id, "Search index created");

        let session_id = self
            .gateway
            .create_session(&index_id)
            .await
            .map_err(|e| failed(UploadStep::CreateSession, "create_session", e))?;
        created.push((ResourceKind::Session, session_id.clone()));
        tracing::debug!(session_id = %session_id, "Conversation created");

        let seed = MessageContent::Text(self.settings.seed_message.clone());
        self.gateway
            .post_message(&session_id, &seed)
            .await
            .map_err(|e| failed(UploadStep::SeedContext, "post_message", e))?;

        let bundle = ResourceBundle::new(session_id, file_id, index_id, source_ref);
        if let Err(e) = self.store.put(bundle.clone()).await {
            // A colliding id names a session the stored bundle still owns.
            created.retain(|(kind, _)| *kind != ResourceKind::Session);
            return Err((UploadStep::Store, e));
        }

        Ok(bundle)
    }

    /// Release resources from a failed attempt, newest first.
    async fn compensate(&self, mut created: Vec<(ResourceKind, String)>) {
        if created.is_empty() {
            return;
        }
        created.reverse();

        let report = release_resources(self.gateway.as_ref(), &created).await;
        if report.is_clean() {
            tracing::info!(released = report.released, "Rolled back partial session");
        } else {
            tracing::warn!(
                released = report.released,
                failed = report.failures.len(),
                "Partial session rollback left provider resources behind"
            );
        }
    }
}

fn failed(
    step: UploadStep,
    operation: &'static str,
    error: GatewayError,
) -> (UploadStep, AssistError) {
    (step, AssistError::upstream(operation, error))
}

/// Materialize a document and its default source reference.
async fn load_document(source: DocumentSource) -> Result<(Document, String), AssistError> {
    match source {
        DocumentSource::Bytes { filename, bytes } => {
            let filename = if filename.trim().is_empty() {
                DEFAULT_FILENAME.to_string()
            } else {
                filename
            };
            Ok((Document::new(filename.clone(), bytes), filename))
        }
        DocumentSource::Path(path) => {
            let bytes = tokio::fs::read(&path).await.map_err(|e| {
                AssistError::Validation(format!("cannot read document {}: {}", path.display(), e))
            })?;
            let filename = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or(DEFAULT_FILENAME)
                .to_string();
            Ok((Document::new(filename, bytes), path.display().to_string()))
        }
    }
}
