//! HTTP front-end for the speech cache: configuration, routing, auth and the
//! request orchestration around [`tts_core::AudioCache`].

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod service;
pub mod validation;

pub use app::{build_router, AppState};
pub use config::{EngineKind, ServerConfig};
