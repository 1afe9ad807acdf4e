//! Assistant profile resolution.
//!
//! A profile id may be supplied by configuration. The first resolution
//! validates it with the provider; a replacement profile's id is logged
//! so an operator can persist it, nothing is written back here.
//!
//! The cached id is readable while a resolution is talking to the
//! provider. Resolutions queue behind each other, and one that waited
//! reuses the result it waited for.

use crate::gateway::{AssistantProfile, GatewayError, ProfileSpec, ProviderGateway};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

#[derive(Debug)]
struct Cached {
    id: Option<String>,
    /// Bumped by every successful resolution.
    generation: u64,
}

pub struct ProfileResolver {
    gateway: Arc<dyn ProviderGateway>,
    spec: ProfileSpec,
    cached: RwLock<Cached>,
    in_flight: Mutex<()>,
}

impl ProfileResolver {
    pub fn new(gateway: Arc<dyn ProviderGateway>, spec: ProfileSpec, hint: Option<String>) -> Self {
        Self {
            gateway,
            spec,
            cached: RwLock::new(Cached {
                id: hint,
                generation: 0,
            }),
            in_flight: Mutex::new(()),
        }
    }

    /// Validate the cached profile with the provider, creating a new one if
    /// it is absent or rejected. Only one resolution talks to the provider
    /// at a time, so at most one replacement profile is created.
    pub async fn resolve(&self) -> Result<AssistantProfile, GatewayError> {
        let seen = self.read(|cached| cached.generation);
        let _flight = self.in_flight.lock().await;

        let resolved_meanwhile = self.read(|cached| {
            if cached.generation != seen {
                cached.id.clone()
            } else {
                None
            }
        });
        if let Some(id) = resolved_meanwhile {
            return Ok(AssistantProfile { id, reused: true });
        }

        let hint = self.cached_id();
        let profile = self
            .gateway
            .ensure_profile(hint.as_deref(), &self.spec)
            .await?;

        if profile.reused {
            tracing::debug!(profile_id = %profile.id, "Using cached assistant profile");
        } else {
            tracing::warn!(
                profile_id = %profile.id,
                "Created new assistant profile; set ASSISTANT_ID={} to reuse it",
                profile.id
            );
        }

        let mut cached = self.cached.write().unwrap_or_else(|p| p.into_inner());
        cached.id = Some(profile.id.clone());
        cached.generation += 1;
        Ok(profile)
    }

    /// Return the cached id without a provider round-trip, resolving only
    /// when nothing has been resolved or configured yet.
    pub async fn current_or_resolve(&self) -> Result<String, GatewayError> {
        if let Some(id) = self.cached_id() {
            return Ok(id);
        }
        self.resolve().await.map(|profile| profile.id)
    }

    pub fn cached_id(&self) -> Option<String> {
        self.read(|cached| cached.id.clone())
    }

    fn read<T>(&self, f: impl FnOnce(&Cached) -> T) -> T {
        f(&self.cached.read().unwrap_or_else(|p| p.into_inner()))
    }
}
