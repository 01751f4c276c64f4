//! Client metadata carried by sessions and audit records.

use serde::{Deserialize, Serialize};

/// Where a request came from (as reported by the transport layer).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientMeta {
    /// Origin network address.
    pub origin: Option<String>,
    /// Client agent string.
    pub user_agent: Option<String>,
}

impl ClientMeta {
    pub fn new(origin: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            origin: Some(origin.into()),
            user_agent: Some(user_agent.into()),
        }
    }

    /// Metadata for actions initiated by the system itself.
    pub fn system() -> Self {
        Self::default()
    }
}
