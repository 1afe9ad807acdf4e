//! Capability interface to the remote analysis provider.
//!
//! The provider exposes a session-oriented API: upload a file, build a
//! search index over it, open a conversation bound to the index, post
//! messages, start runs and poll them. Every call may fail independently.

mod openai;

pub use openai::OpenAiGateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Gateway Trait
// ============================================================================

/// Remote provider operations consumed by the session lifecycle manager.
#[async_trait]
pub trait ProviderGateway: Send + Sync {
    /// Upload a source document, returning the provider file id.
    async fn upload_document(&self, document: Document, purpose: &str)
        -> Result<String, GatewayError>;

    /// Reuse the profile named by `cached_id` if the provider still accepts
    /// it, otherwise create a new one from `spec`.
    async fn ensure_profile(
        &self,
        cached_id: Option<&str>,
        spec: &ProfileSpec,
    ) -> Result<AssistantProfile, GatewayError>;

    /// Build a derived search index over an uploaded file.
    async fn create_index(&self, file_id: &str, name: &str) -> Result<String, GatewayError>;

    /// Open a conversation bound to a search index.
    async fn create_session(&self, index_id: &str) -> Result<String, GatewayError>;

    /// Append a user message to a conversation.
    async fn post_message(
        &self,
        session_id: &str,
        content: &MessageContent,
    ) -> Result<(), GatewayError>;

    /// Start an analysis run, returning the run id.
    async fn start_run(&self, session_id: &str, profile_id: &str) -> Result<String, GatewayError>;

    /// Fetch the current status of a run.
    async fn poll_run(&self, session_id: &str, run_id: &str) -> Result<RunStatus, GatewayError>;

    /// Text of the most recent message in a conversation.
    async fn fetch_last_message(&self, session_id: &str) -> Result<String, GatewayError>;

    /// Delete a provider resource. A missing resource yields `GatewayError::NotFound`.
    async fn delete_resource(&self, kind: ResourceKind, id: &str) -> Result<(), GatewayError>;
}

// ============================================================================
// Errors
// ============================================================================

/// Failure reported by a provider call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("provider rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("transport failure: {0}")]
    Transport(String),

    #[error("unexpected provider response: {0}")]
    Decode(String),
}

impl GatewayError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Whether retrying the same call later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Rejected { status, .. } => *status == 429 || *status >= 500,
            Self::NotFound(_) | Self::Decode(_) => false,
        }
    }
}

// ============================================================================
// Types
// ============================================================================

/// Kind of provider-side resource owned by a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    File,
    Index,
    Session,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::File => write!(f, "file"),
            Self::Index => write!(f, "index"),
            Self::Session => write!(f, "session"),
        }
    }
}

/// A source document ready for upload.
#[derive(Clone)]
pub struct Document {
    pub filename: String,
    pub bytes: Vec<u8>,
}

impl Document {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
        }
    }

    /// Lowercase extension of the filename, if any.
    pub fn extension(&self) -> Option<String> {
        std::path::Path::new(&self.filename)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Document {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Document")
            .field("filename", &self.filename)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Settings used when a new assistant profile must be created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub name: String,
    pub model: String,
    pub instructions: String,
}

/// A reusable remote assistant configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssistantProfile {
    pub id: String,
    /// True when the cached id was accepted, false when a new profile was created.
    pub reused: bool,
}

/// Base64-encoded image attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageInput {
    #[serde(default = "default_media_type")]
    pub media_type: String,
    pub data_base64: String,
}

fn default_media_type() -> String {
    "image/png".into()
}

impl ImageInput {
    pub fn png(data_base64: impl Into<String>) -> Self {
        Self {
            media_type: default_media_type(),
            data_base64: data_base64.into(),
        }
    }

    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data_base64)
    }
}

/// Content of a user message.
#[derive(Debug, Clone)]
pub enum MessageContent {
    Text(String),
    TextWithImage { text: String, image: ImageInput },
}

impl MessageContent {
    pub fn text(&self) -> &str {
        match self {
            Self::Text(text) | Self::TextWithImage { text, .. } => text,
        }
    }
}

/// Run status as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunStatus {
    /// Any non-terminal status (queued, in_progress, or vocabulary not known here).
    Pending(String),
    Completed,
    Failed { reason: Option<String> },
}
