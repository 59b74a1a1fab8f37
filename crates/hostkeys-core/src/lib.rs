//! Core abstractions for hostkeys: the secret model, key-name codec, and the
//! store, sentinel, and repository contracts.
//! This crate is intentionally small to keep dependency surface minimal.

pub mod auth;
pub mod codec;
pub mod error;
pub mod repository;
pub mod secrets;
pub mod sentinel;
pub mod store;

pub use error::{DecodeError, Result, SecretsError};
