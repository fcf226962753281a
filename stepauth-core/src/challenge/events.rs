//! A [`ChallengeHandler`] that turns callbacks into events on a bounded queue,
//! so one task can prompt the user and answer through the orchestrator's
//! `resolve_*` methods.

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::challenge::{ChallengeHandler, ResolutionSlot};
use crate::models::{
    ChallengeInput, ChallengeKind, CustomChallengeDetails, CustomChallengeInput, MfaCodeDetails,
    MultiFactorInput, NewPasswordDetails, NewPasswordRequiredInput, PasswordChallengeInput,
    PasswordDetails,
};
use crate::BackendError;

#[derive(Debug, Clone, PartialEq)]
pub enum ChallengeEvent {
    /// The flow is waiting on an answer for `kind`.
    Requested { kind: ChallengeKind, input: ChallengeInput },
    /// The step for `kind` finished; `error` is `None` on success.
    Completed { kind: ChallengeKind, error: Option<BackendError> },
}

pub struct EventChannelHandler {
    tx: mpsc::Sender<ChallengeEvent>,
}

impl EventChannelHandler {
    pub fn new(tx: mpsc::Sender<ChallengeEvent>) -> Self {
        Self { tx }
    }

    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ChallengeEvent>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    fn publish_request<A>(&self, input: ChallengeInput, slot: &ResolutionSlot<A>) {
        let kind = input.kind();
        match self.tx.try_send(ChallengeEvent::Requested { kind, input }) {
            Ok(()) => debug!(%kind, slot = %slot.id(), "challenge request published"),
            Err(e) => {
                // Nobody will ever see this request, so end the step now.
                warn!(%kind, slot = %slot.id(), error = %e, "could not publish challenge request");
                let reason = BackendError::Rejected(format!(
                    "challenge event queue unavailable for {}",
                    kind
                ));
                if let Err(e) = slot.fail(reason) {
                    debug!(%kind, slot = %slot.id(), error = %e, "backend was no longer waiting");
                }
            }
        }
    }

    fn publish_completion(&self, kind: ChallengeKind, error: Option<BackendError>) {
        if let Err(e) = self.tx.try_send(ChallengeEvent::Completed { kind, error }) {
            warn!(%kind, error = %e, "dropping step completion event");
        }
    }
}

impl ChallengeHandler for EventChannelHandler {
    fn get_password_details(&self, input: PasswordChallengeInput, slot: ResolutionSlot<PasswordDetails>) {
        self.publish_request(ChallengeInput::Password(input), &slot);
    }

    fn did_complete_password_step(&self, error: Option<BackendError>) {
        self.publish_completion(ChallengeKind::Password, error);
    }

    fn get_new_password_details(
        &self,
        input: NewPasswordRequiredInput,
        slot: ResolutionSlot<NewPasswordDetails>,
    ) {
        self.publish_request(ChallengeInput::NewPasswordRequired(input), &slot);
    }

    fn did_complete_new_password_step(&self, error: Option<BackendError>) {
        self.publish_completion(ChallengeKind::NewPasswordRequired, error);
    }

    fn get_custom_challenge_details(
        &self,
        input: CustomChallengeInput,
        slot: ResolutionSlot<CustomChallengeDetails>,
    ) {
        self.publish_request(ChallengeInput::CustomChallenge(input), &slot);
    }

    fn did_complete_custom_challenge_step(&self, error: Option<BackendError>) {
        self.publish_completion(ChallengeKind::CustomChallenge, error);
    }

    fn get_mfa_code(&self, input: MultiFactorInput, slot: ResolutionSlot<MfaCodeDetails>) {
        self.publish_request(ChallengeInput::MultiFactorCode(input), &slot);
    }

    fn did_complete_mfa_step(&self, error: Option<BackendError>) {
        self.publish_completion(ChallengeKind::MultiFactorCode, error);
    }
}
