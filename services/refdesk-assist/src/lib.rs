//! refdesk-assist - Document-backed analysis sessions over a remote assistant provider.
//!
//! A session owns three provider resources (uploaded file, search index,
//! conversation). This crate creates them atomically, runs image analyses
//! against them with a bounded poll loop, and reclaims them on deletion or
//! after they expire.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod error;
pub mod executor;
pub mod extract;
pub mod gateway;
pub mod janitor;
pub mod orchestrator;
pub mod profile;
pub mod reclaim;
pub mod routes;
pub mod service;
pub mod store;

pub use error::{AssistError, UploadStep};
pub use executor::{RunExecutor, RunPolicy, RunResult};
pub use extract::{extract_answers, AnswerSummary};
pub use gateway::{
    AssistantProfile, Document, GatewayError, ImageInput, MessageContent, OpenAiGateway,
    ProfileSpec, ProviderGateway, ResourceKind, RunStatus,
};
pub use janitor::{Janitor, JanitorHandle, SweepReport};
pub use orchestrator::{DocumentSource, UploadOrchestrator, UploadSettings};
pub use profile::ProfileResolver;
pub use reclaim::{release_resources, ReleaseFailure, ReleaseReport};
pub use routes::{build_router, AppState};
pub use service::{AssistService, SessionView};
pub use store::{ResourceBundle, SessionStore};
