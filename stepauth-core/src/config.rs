// stepauth-core/src/config.rs

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::models::{BackendBinding, SessionKey};
use crate::Error;

pub const ENV_CLIENT_KEY_PREFIX: &str = "STEPAUTH_CLIENT_KEY_PREFIX";
pub const ENV_KEYCHAIN_SERVICE: &str = "STEPAUTH_KEYCHAIN_SERVICE";

pub const DEFAULT_CLIENT_KEY_PREFIX: &str = "UserPoolKey";

/// How sessions are bound to backend clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub client_key_prefix: String,
    pub keychain_service: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            client_key_prefix: DEFAULT_CLIENT_KEY_PREFIX.to_string(),
            keychain_service: None,
        }
    }
}

impl ClientConfig {
    /// Reads `.env` (if present) and then the process environment.
    pub fn from_env() -> Result<Self, Error> {
        dotenv::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    pub fn from_vars<I, K, V>(vars: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut config = Self::default();
        for (key, value) in vars {
            match key.as_ref() {
                ENV_CLIENT_KEY_PREFIX => config.client_key_prefix = value.into(),
                ENV_KEYCHAIN_SERVICE => {
                    let service: String = value.into();
                    config.keychain_service = if service.trim().is_empty() {
                        None
                    } else {
                        Some(service)
                    };
                }
                _ => {}
            }
        }
        config.validate()?;
        debug!(?config, "client configuration loaded");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.client_key_prefix.trim().is_empty() {
            return Err(Error::Config(format!("{} must not be empty", ENV_CLIENT_KEY_PREFIX)));
        }
        Ok(())
    }

    /// Derives the backend binding for one session. Named sessions get their
    /// own client key and their own keychain namespace.
    pub fn binding_for(&self, session: &SessionKey) -> BackendBinding {
        match session {
            SessionKey::Default => BackendBinding {
                session: SessionKey::Default,
                client_key: self.client_key_prefix.clone(),
                keychain_service: self.keychain_service.clone(),
            },
            SessionKey::Named(name) => BackendBinding {
                session: session.clone(),
                client_key: format!("{}.{}", self.client_key_prefix, name),
                keychain_service: self
                    .keychain_service
                    .as_ref()
                    .map(|service| format!("{}.{}", service, name)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_variables() {
        let config = ClientConfig::from_vars(Vec::<(String, String)>::new()).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn reads_known_variables() {
        let config = ClientConfig::from_vars(vec![
            (ENV_CLIENT_KEY_PREFIX, "PoolKey"),
            (ENV_KEYCHAIN_SERVICE, "com.example.auth"),
            ("PATH", "/usr/bin"),
        ])
        .unwrap();
        assert_eq!(config.client_key_prefix, "PoolKey");
        assert_eq!(config.keychain_service.as_deref(), Some("com.example.auth"));
    }

    #[test]
    fn empty_prefix_is_rejected() {
        let res = ClientConfig::from_vars(vec![(ENV_CLIENT_KEY_PREFIX, "  ")]);
        assert!(matches!(res, Err(Error::Config(_))));
    }

    #[test]
    fn named_sessions_get_suffixed_bindings() {
        let config = ClientConfig {
            client_key_prefix: "UserPoolKey".into(),
            keychain_service: Some("com.example.auth".into()),
        };

        let default = config.binding_for(&SessionKey::Default);
        assert_eq!(default.client_key, "UserPoolKey");
        assert_eq!(default.keychain_service.as_deref(), Some("com.example.auth"));

        let named = config.binding_for(&SessionKey::Named("tenantA".into()));
        assert_eq!(named.client_key, "UserPoolKey.tenantA");
        assert_eq!(named.keychain_service.as_deref(), Some("com.example.auth.tenantA"));
    }
}
