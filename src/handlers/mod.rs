//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to the service layer
//! 3. Returns HTTP response (JSON, status code)

/// Health check endpoint
pub mod health;
/// Pooled key management and dispensing endpoints
pub mod keys;
/// Service key management endpoints
pub mod service_keys;
