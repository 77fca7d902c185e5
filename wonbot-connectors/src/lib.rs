//! Wonbot Exchange Connectors
//!
//! Adapters for the Upbit REST API. Normalizes exchange-specific
//! responses to the execution layer's port types.

#![warn(clippy::all)]

// Public modules
pub mod auth;
pub mod upbit_rest;

// Re-exports
pub use auth::{create_jwt_token, AuthError};
pub use upbit_rest::{UpbitAccount, UpbitOrder, UpbitRestClient, UpbitRestError, UpbitTrade};
