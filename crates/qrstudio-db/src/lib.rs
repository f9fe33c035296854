//! Persistent row store for QR Studio: account profiles and saved QR code
//! metadata, plus the domain enums shared with `qrstudio-core`.

pub mod config;
pub mod models;
pub mod pool;
pub mod queries;
