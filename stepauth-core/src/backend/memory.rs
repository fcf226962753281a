// File: stepauth-core/src/backend/memory.rs
//
// A local identity backend with an in-process user directory. It walks the
// same challenge sequence a hosted user pool would (password, custom
// challenge, MFA, forced password change) without any network.

use std::collections::HashMap;
use std::sync::Arc;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::challenge::{
    resolution_slot, BackendFactory, ChallengeDelegate, IdentityBackend, SlotReceiver,
};
use crate::models::{
    BackendBinding, ChallengeKind, CustomChallengeInput, DeliveryMedium, MultiFactorInput,
    NewPasswordRequiredInput, PasswordChallengeInput, SignInOutcome, SignInRequest,
};
use crate::{BackendError, Error};

/// Response key the custom challenge answer is expected under.
pub const CUSTOM_ANSWER_KEY: &str = "ANSWER";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaEnrollment {
    pub delivery_medium: DeliveryMedium,
    pub destination: String,
    pub code: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomChallengeSpec {
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    pub expected_answer: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    #[serde(default)]
    pub mfa: Option<MfaEnrollment>,
    #[serde(default)]
    pub custom_challenge: Option<CustomChallengeSpec>,
    #[serde(default)]
    pub new_password_required: bool,
    #[serde(default)]
    pub required_attributes: Vec<String>,
}

impl DirectoryUser {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            attributes: HashMap::new(),
            mfa: None,
            custom_challenge: None,
            new_password_required: false,
            required_attributes: Vec::new(),
        }
    }

    pub fn with_mfa(
        mut self,
        delivery_medium: DeliveryMedium,
        destination: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        self.mfa = Some(MfaEnrollment {
            delivery_medium,
            destination: destination.into(),
            code: code.into(),
        });
        self
    }

    pub fn with_custom_challenge(
        mut self,
        parameters: HashMap<String, String>,
        expected_answer: impl Into<String>,
    ) -> Self {
        self.custom_challenge = Some(CustomChallengeSpec {
            parameters,
            expected_answer: expected_answer.into(),
        });
        self
    }

    pub fn requiring_new_password(mut self, required_attributes: Vec<String>) -> Self {
        self.new_password_required = true;
        self.required_attributes = required_attributes;
        self
    }
}

/// Users keyed by lowercased username.
#[derive(Default)]
pub struct UserDirectory {
    users: DashMap<String, DirectoryUser>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_users(users: impl IntoIterator<Item = DirectoryUser>) -> Self {
        let directory = Self::new();
        for user in users {
            directory.insert(user);
        }
        directory
    }

    /// Parses a JSON array of users.
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let users: Vec<DirectoryUser> = serde_json::from_str(json)
            .map_err(|e| Error::Config(format!("invalid user directory: {}", e)))?;
        Ok(Self::from_users(users))
    }

    pub fn insert(&self, user: DirectoryUser) {
        self.users.insert(user.username.to_lowercase(), user);
    }

    pub fn get(&self, username: &str) -> Option<DirectoryUser> {
        self.users
            .get(&username.to_lowercase())
            .map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn complete_password_change(
        &self,
        username: &str,
        new_password: &str,
        attributes: HashMap<String, String>,
    ) {
        if let Some(mut user) = self.users.get_mut(&username.to_lowercase()) {
            user.password = new_password.to_string();
            user.new_password_required = false;
            user.attributes.extend(attributes);
        }
    }
}

pub struct InMemoryBackend {
    binding: BackendBinding,
    directory: Arc<UserDirectory>,
}

impl InMemoryBackend {
    pub fn new(binding: BackendBinding, directory: Arc<UserDirectory>) -> Self {
        Self { binding, directory }
    }

    pub fn binding(&self) -> &BackendBinding {
        &self.binding
    }

    fn pool_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("client_key".to_string(), self.binding.client_key.clone());
        metadata.insert("session".to_string(), self.binding.session.to_string());
        metadata
    }
}

/// Ends `kind`'s step with `error` and hands the error back for returning.
fn fail_step(delegate: &dyn ChallengeDelegate, kind: ChallengeKind, error: BackendError) -> BackendError {
    delegate.on_step_failed(kind, error.clone());
    error
}

async fn await_answer<A>(
    delegate: &dyn ChallengeDelegate,
    kind: ChallengeKind,
    raised: Result<(), Error>,
    receiver: SlotReceiver<A>,
) -> Result<A, BackendError> {
    if let Err(e) = raised {
        // The step never started; the orchestrator already failed the slot
        // with the reason.
        warn!(%kind, error = %e, "challenge was not accepted");
        return Err(match receiver.wait().await {
            Err(reason) => reason,
            Ok(_) => BackendError::Rejected(e.to_string()),
        });
    }
    match receiver.wait().await {
        Ok(answer) => Ok(answer),
        Err(reason) => Err(fail_step(delegate, kind, reason)),
    }
}

#[async_trait]
impl IdentityBackend for InMemoryBackend {
    async fn sign_in(
        &self,
        request: SignInRequest,
        delegate: Arc<dyn ChallengeDelegate>,
    ) -> Result<SignInOutcome, BackendError> {
        let delegate = delegate.as_ref();
        let mut completed_steps = Vec::new();

        // 1) password
        let kind = ChallengeKind::Password;
        let (slot, receiver) = resolution_slot(kind);
        let input = PasswordChallengeInput {
            username: request.username.clone(),
            pool_metadata: self.pool_metadata(),
        };
        let raised = delegate.on_password_requested(input, slot);
        let answer = await_answer(delegate, kind, raised, receiver).await?;

        let username = if answer.username.trim().is_empty() {
            request.username.clone().unwrap_or_default()
        } else {
            answer.username.clone()
        };
        let user = match self.directory.get(&username) {
            Some(user) if user.password == answer.password => user,
            _ => {
                debug!(client_key = %self.binding.client_key, %username, "password rejected");
                return Err(fail_step(
                    delegate,
                    kind,
                    BackendError::InvalidCredential("incorrect username or password".into()),
                ));
            }
        };
        delegate.on_step_completed(kind, None);
        completed_steps.push(kind);

        // 2) custom challenge
        if let Some(custom) = &user.custom_challenge {
            let kind = ChallengeKind::CustomChallenge;
            let (slot, receiver) = resolution_slot(kind);
            let input = CustomChallengeInput {
                challenge_parameters: custom.parameters.clone(),
            };
            let raised = delegate.on_custom_challenge_requested(input, slot);
            let answer = await_answer(delegate, kind, raised, receiver).await?;

            if answer.challenge_responses.get(CUSTOM_ANSWER_KEY) != Some(&custom.expected_answer) {
                return Err(fail_step(
                    delegate,
                    kind,
                    BackendError::InvalidCredential("incorrect challenge answer".into()),
                ));
            }
            delegate.on_step_completed(kind, None);
            completed_steps.push(kind);
        }

        // 3) multi-factor code
        if let Some(mfa) = &user.mfa {
            let kind = ChallengeKind::MultiFactorCode;
            let (slot, receiver) = resolution_slot(kind);
            let input = MultiFactorInput {
                delivery_medium: mfa.delivery_medium,
                destination: mfa.destination.clone(),
            };
            let raised = delegate.on_mfa_code_requested(input, slot);
            let answer = await_answer(delegate, kind, raised, receiver).await?;

            if answer.code.trim() != mfa.code {
                return Err(fail_step(
                    delegate,
                    kind,
                    BackendError::InvalidCredential("invalid verification code".into()),
                ));
            }
            delegate.on_step_completed(kind, None);
            completed_steps.push(kind);
        }

        // 4) forced password change
        if user.new_password_required {
            let kind = ChallengeKind::NewPasswordRequired;
            let (slot, receiver) = resolution_slot(kind);
            let input = NewPasswordRequiredInput {
                user_attributes: user.attributes.clone(),
                required_attributes: user.required_attributes.clone(),
            };
            let raised = delegate.on_new_password_requested(input, slot);
            let answer = await_answer(delegate, kind, raised, receiver).await?;

            if answer.proposed_password.is_empty() || answer.proposed_password == user.password {
                return Err(fail_step(
                    delegate,
                    kind,
                    BackendError::InvalidCredential("new password must differ from the current one".into()),
                ));
            }
            let missing: Vec<&str> = user
                .required_attributes
                .iter()
                .filter(|attr| answer.user_attributes.get(*attr).is_none_or(|v| v.trim().is_empty()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                return Err(fail_step(
                    delegate,
                    kind,
                    BackendError::InvalidCredential(format!(
                        "missing required attributes: {}",
                        missing.join(", ")
                    )),
                ));
            }
            self.directory
                .complete_password_change(&user.username, &answer.proposed_password, answer.user_attributes);
            delegate.on_step_completed(kind, None);
            completed_steps.push(kind);
        }

        info!(client_key = %self.binding.client_key, username = %user.username, "user signed in");
        Ok(SignInOutcome {
            username: user.username.clone(),
            signed_in_at: Utc::now(),
            completed_steps,
        })
    }
}

/// Builds in-memory backends that all share one directory.
pub struct InMemoryBackendFactory {
    directory: Arc<UserDirectory>,
}

impl InMemoryBackendFactory {
    pub fn new(directory: Arc<UserDirectory>) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Arc<UserDirectory> {
        &self.directory
    }
}

impl BackendFactory for InMemoryBackendFactory {
    fn create(&self, binding: &BackendBinding) -> Result<Arc<dyn IdentityBackend>, Error> {
        debug!(client_key = %binding.client_key, keychain = ?binding.keychain_service, "binding in-memory backend");
        Ok(Arc::new(InMemoryBackend::new(
            binding.clone(),
            Arc::clone(&self.directory),
        )))
    }
}
