//! Infrastructure layer: configuration, credentials, stores.

pub mod config;
pub mod credentials;
pub mod deadline;
pub mod query;
pub mod store;

pub use config::{AuthConfig, ConfigError, HashingSettings};
pub use credentials::{CredentialHasher, SessionToken, TokenPair, hash_token};
pub use deadline::bounded;
pub use query::{Page, Pagination};
