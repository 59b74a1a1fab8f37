//! Filesystem-backed secret stores, the file sentinel, and caller-side value
//! sealing (AES-GCM with keys from the environment, the OS keyring, or memory).

pub mod cipher;
pub mod file_store;
mod fsutil;
pub mod key_provider;
pub mod mounted_store;
pub mod sentinel;
