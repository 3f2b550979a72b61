#![warn(clippy::unwrap_used)]

//! Core types for the CrewHQ control plane: error taxonomy, configuration,
//! tenant context resolution, password utilities, and outbound mail.

pub mod config;
pub mod context;
pub mod error;
pub mod mailer;
pub mod password;

pub use config::PlatformConfig;
pub use context::{ResolutionSource, TenantContext};
pub use error::{PlatformError, PlatformResult};
pub use mailer::{LogMailer, Mailer, OutboundEmail, RecordingMailer};
