//! # tether-core
//!
//! Core types and configuration shared by the Tether crates.
//!
//! This crate provides:
//! - Record identity (`Id`, `RecordRef`)
//! - The `ValidationErrors` collection
//! - Configuration types and environment loading

pub mod config;
pub mod error;
pub mod traits;

pub use config::*;
pub use error::*;
pub use traits::*;
