//! `echoboard-core` — identity and localization building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns)
//! shared by request handlers and background task bodies.

pub mod error;
pub mod id;
pub mod identity;
pub mod locale;

pub use error::{DomainError, DomainResult};
pub use id::{CorrelationId, TenantId, UserId};
pub use identity::{Role, Tenant, User};
pub use locale::Locale;
