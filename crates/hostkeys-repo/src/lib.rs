//! Repository implementations: a store-backed repository and a sentinel-aware
//! read cache in front of it.

pub mod cache;
pub mod layout;
pub mod repository;

pub use cache::CachedSecretsRepository;
pub use layout::{PurgePolicy, RepositoryOptions, SetLayout};
pub use repository::StoreSecretsRepository;
