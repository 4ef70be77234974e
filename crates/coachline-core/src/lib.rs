//! # coachline-core
//!
//! Core types, traits, configuration, and error handling for Coachline.

pub mod config;
pub mod context;
pub mod error;
pub mod ids;
pub mod message;
pub mod model;
pub mod progress;
pub mod sanitize;
pub mod traits;

pub use config::shellexpand;
