//! Data models representing database entities.
//!
//! This module contains all data structures that map to database tables.

/// Pooled API key model
pub mod api_key;
/// Service key authentication model
pub mod service_key;
