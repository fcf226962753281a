// File: stepauth-core/src/test_utils/mod.rs
//
// Helpers shared by the unit tests and the integration tests under tests/.

use std::sync::Arc;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::backend::memory::{InMemoryBackend, UserDirectory};
use crate::challenge::{ChallengeHandler, IdentityBackend, ResolutionSlot};
use crate::models::{
    BackendBinding, ChallengeKind, CustomChallengeDetails, CustomChallengeInput, MfaCodeDetails,
    MultiFactorInput, NewPasswordDetails, NewPasswordRequiredInput, PasswordChallengeInput,
    PasswordDetails, SessionKey,
};
use crate::BackendError;

/// One observed handler callback. `Details` carries the id of the slot it was given.
#[derive(Debug, Clone, PartialEq)]
pub enum HandlerCall {
    Details(ChallengeKind, Uuid),
    Completed(ChallengeKind, Option<BackendError>),
}

/// A handler that only records what it was asked.
#[derive(Default)]
pub struct RecordingHandler {
    calls: Mutex<Vec<HandlerCall>>,
    password_slot: Mutex<Option<ResolutionSlot<PasswordDetails>>>,
}

impl RecordingHandler {
    pub fn calls(&self) -> Vec<HandlerCall> {
        self.calls.lock().clone()
    }

    pub fn last_password_slot(&self) -> Option<ResolutionSlot<PasswordDetails>> {
        self.password_slot.lock().clone()
    }

    fn record(&self, call: HandlerCall) {
        self.calls.lock().push(call);
    }
}

impl ChallengeHandler for RecordingHandler {
    fn get_password_details(&self, _input: PasswordChallengeInput, slot: ResolutionSlot<PasswordDetails>) {
        self.record(HandlerCall::Details(ChallengeKind::Password, slot.id()));
        *self.password_slot.lock() = Some(slot);
    }

    fn did_complete_password_step(&self, error: Option<BackendError>) {
        self.record(HandlerCall::Completed(ChallengeKind::Password, error));
    }

    fn get_new_password_details(
        &self,
        _input: NewPasswordRequiredInput,
        slot: ResolutionSlot<NewPasswordDetails>,
    ) {
        self.record(HandlerCall::Details(ChallengeKind::NewPasswordRequired, slot.id()));
    }

    fn did_complete_new_password_step(&self, error: Option<BackendError>) {
        self.record(HandlerCall::Completed(ChallengeKind::NewPasswordRequired, error));
    }

    fn get_custom_challenge_details(
        &self,
        _input: CustomChallengeInput,
        slot: ResolutionSlot<CustomChallengeDetails>,
    ) {
        self.record(HandlerCall::Details(ChallengeKind::CustomChallenge, slot.id()));
    }

    fn did_complete_custom_challenge_step(&self, error: Option<BackendError>) {
        self.record(HandlerCall::Completed(ChallengeKind::CustomChallenge, error));
    }

    fn get_mfa_code(&self, _input: MultiFactorInput, slot: ResolutionSlot<MfaCodeDetails>) {
        self.record(HandlerCall::Details(ChallengeKind::MultiFactorCode, slot.id()));
    }

    fn did_complete_mfa_step(&self, error: Option<BackendError>) {
        self.record(HandlerCall::Completed(ChallengeKind::MultiFactorCode, error));
    }
}

/// A backend with nobody in its directory, for tests that drive the delegate by hand.
pub fn idle_backend() -> Arc<dyn IdentityBackend> {
    let binding = BackendBinding {
        session: SessionKey::Default,
        client_key: "UserPoolKey".into(),
        keychain_service: None,
    };
    Arc::new(InMemoryBackend::new(binding, Arc::new(UserDirectory::new())))
}
