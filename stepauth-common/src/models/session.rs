// File: stepauth-common/src/models/session.rs

use std::collections::HashMap;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::challenge::ChallengeKind;

/// Identifies one cached orchestrator. `Default` never collides with a name.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq, Hash)]
pub enum SessionKey {
    Default,
    Named(String),
}

impl SessionKey {
    pub fn from_name(name: Option<&str>) -> Self {
        match name {
            Some(n) => SessionKey::Named(n.to_string()),
            None => SessionKey::Default,
        }
    }

    pub fn name(&self) -> Option<&str> {
        match self {
            SessionKey::Default => None,
            SessionKey::Named(n) => Some(n.as_str()),
        }
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionKey::Default => write!(f, "<default>"),
            SessionKey::Named(n) => write!(f, "{}", n),
        }
    }
}

/// What a backend needs to know about the session it serves.
#[derive(Debug, Serialize, Deserialize, Clone, Eq, PartialEq)]
pub struct BackendBinding {
    pub session: SessionKey,
    /// Key the backend client is registered under, e.g. "UserPoolKey.tenantA".
    pub client_key: String,
    /// Namespace for token storage, suffixed with the session name for named sessions.
    pub keychain_service: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct SignInRequest {
    pub username: Option<String>,
    pub client_metadata: HashMap<String, String>,
}

impl SignInRequest {
    pub fn for_user(username: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            client_metadata: HashMap::new(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SignInOutcome {
    pub username: String,
    pub signed_in_at: DateTime<Utc>,
    /// Challenges answered during the flow, in the order they were raised.
    pub completed_steps: Vec<ChallengeKind>,
}
