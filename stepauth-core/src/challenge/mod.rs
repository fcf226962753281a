// =============================================================================
// stepauth-core/src/challenge/mod.rs
// =============================================================================

use std::sync::Arc;
use async_trait::async_trait;

use crate::models::{
    BackendBinding, ChallengeKind, CustomChallengeDetails, CustomChallengeInput, MfaCodeDetails,
    MultiFactorInput, NewPasswordDetails, NewPasswordRequiredInput, PasswordChallengeInput,
    PasswordDetails, SignInOutcome, SignInRequest,
};
use crate::{BackendError, Error};

pub mod events;
pub mod orchestrator;
pub mod registry;
pub mod slot;

pub use events::{ChallengeEvent, EventChannelHandler};
pub use orchestrator::ChallengeOrchestrator;
pub use registry::SessionRegistry;
pub use slot::{resolution_slot, ResolutionSlot, SlotReceiver, SlotResult};

/// Application-side callbacks.
///
/// `get_*` is called once per raised challenge and must return quickly; the
/// answer arrives later, either through the slot or through the
/// orchestrator's `resolve_*` methods. `did_complete_*` is called once per
/// step with `None` on success.
pub trait ChallengeHandler: Send + Sync {
    fn get_password_details(&self, input: PasswordChallengeInput, slot: ResolutionSlot<PasswordDetails>);
    fn did_complete_password_step(&self, error: Option<BackendError>);

    fn get_new_password_details(
        &self,
        input: NewPasswordRequiredInput,
        slot: ResolutionSlot<NewPasswordDetails>,
    );
    fn did_complete_new_password_step(&self, error: Option<BackendError>);

    fn get_custom_challenge_details(
        &self,
        input: CustomChallengeInput,
        slot: ResolutionSlot<CustomChallengeDetails>,
    );
    fn did_complete_custom_challenge_step(&self, error: Option<BackendError>);

    fn get_mfa_code(&self, input: MultiFactorInput, slot: ResolutionSlot<MfaCodeDetails>);
    fn did_complete_mfa_step(&self, error: Option<BackendError>);
}

/// What the identity backend calls while it walks a sign-in flow.
pub trait ChallengeDelegate: Send + Sync {
    fn on_password_requested(
        &self,
        input: PasswordChallengeInput,
        slot: ResolutionSlot<PasswordDetails>,
    ) -> Result<(), Error>;
    fn on_password_step_completed(&self, error: Option<BackendError>);

    fn on_new_password_requested(
        &self,
        input: NewPasswordRequiredInput,
        slot: ResolutionSlot<NewPasswordDetails>,
    ) -> Result<(), Error>;
    fn on_new_password_step_completed(&self, error: Option<BackendError>);

    fn on_custom_challenge_requested(
        &self,
        input: CustomChallengeInput,
        slot: ResolutionSlot<CustomChallengeDetails>,
    ) -> Result<(), Error>;
    fn on_custom_challenge_step_completed(&self, error: Option<BackendError>);

    fn on_mfa_code_requested(
        &self,
        input: MultiFactorInput,
        slot: ResolutionSlot<MfaCodeDetails>,
    ) -> Result<(), Error>;
    fn on_mfa_step_completed(&self, error: Option<BackendError>);

    fn on_step_completed(&self, kind: ChallengeKind, error: Option<BackendError>) {
        match kind {
            ChallengeKind::Password => self.on_password_step_completed(error),
            ChallengeKind::NewPasswordRequired => self.on_new_password_step_completed(error),
            ChallengeKind::CustomChallenge => self.on_custom_challenge_step_completed(error),
            ChallengeKind::MultiFactorCode => self.on_mfa_step_completed(error),
        }
    }

    /// A failed step is still a completed step.
    fn on_step_failed(&self, kind: ChallengeKind, error: BackendError) {
        self.on_step_completed(kind, Some(error));
    }
}

/// The identity-provider client. Token exchange and storage live behind it.
#[async_trait]
pub trait IdentityBackend: Send + Sync {
    async fn sign_in(
        &self,
        request: SignInRequest,
        delegate: Arc<dyn ChallengeDelegate>,
    ) -> Result<SignInOutcome, BackendError>;
}

/// Builds the backend bound to one session. Called at most once per session
/// key, while the registry holds that key's entry, so it must not call back
/// into the registry.
#[cfg_attr(test, mockall::automock)]
pub trait BackendFactory: Send + Sync {
    fn create(&self, binding: &BackendBinding) -> Result<Arc<dyn IdentityBackend>, Error>;
}
