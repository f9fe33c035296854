//! Plan-gated QR code generation: plan catalog, authorization, sessions,
//! the generation workflow and its capped history.

pub mod authz;
pub mod codes;
pub mod history;
pub mod plan;
pub mod render;
pub mod request;
pub mod session;
pub mod workflow;

pub use qrstudio_db::models::{ContentCategory, EcLevel, PlanTier, QrType};
