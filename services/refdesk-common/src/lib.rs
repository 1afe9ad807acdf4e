//! refdesk Common - Shared configuration, logging, and utilities for refdesk services.
//!
//! This crate provides:
//! - Configuration types and loading
//! - Logging setup and structured logging helpers
//! - Utility functions used across refdesk services

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod config;
pub mod logging;
pub mod util;

pub use config::{
    Config, NetworkConfig, ObservabilityConfig, ProviderConfig, RunConfig, ServerConfig,
    SessionsConfig,
};
