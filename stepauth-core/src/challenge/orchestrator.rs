// stepauth-core/src/challenge/orchestrator.rs
//
// One orchestrator mediates one interactive sign-in flow at a time. Each
// challenge kind has its own little state machine:
//
//     Idle --(backend request)--> Pending --(resolve)--> Settled --(step completed)--> Idle
//
// A step can also go from Pending straight to Idle when the backend fails it.
// Settled reads as Idle from the outside, but a late resolver sees
// AlreadyResolved. The handler a challenge was raised with is the one told
// about its completion. Ending the flow closes every step still in flight.

use std::collections::HashMap;
use std::sync::Arc;
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::challenge::{ChallengeDelegate, ChallengeHandler, IdentityBackend, ResolutionSlot};
use crate::models::{
    ChallengeKind, CustomChallengeDetails, CustomChallengeInput, MfaCodeDetails, MultiFactorInput,
    NewPasswordDetails, NewPasswordRequiredInput, PasswordChallengeInput, PasswordDetails,
    SessionKey, SignInOutcome, SignInRequest,
};
use crate::{BackendError, Error};

struct PendingChallenge<I, A> {
    kind: ChallengeKind,
    input: I,
    slot: ResolutionSlot<A>,
    handler: Arc<dyn ChallengeHandler>,
}

enum StepState<I, A> {
    Idle,
    Pending(PendingChallenge<I, A>),
    Settled(PendingChallenge<I, A>),
}

impl<I, A> StepState<I, A> {
    /// Pending and still waiting for an answer. A handler that filled the slot
    /// directly, or a backend that stopped listening, leaves the step Pending
    /// but no longer live.
    fn is_live(&self) -> bool {
        matches!(self, StepState::Pending(p) if !p.slot.is_filled() && !p.slot.receiver_dropped())
    }

    /// Raised and not yet completed by the backend.
    fn in_flight(&self) -> bool {
        match self {
            StepState::Idle => false,
            StepState::Pending(p) => !p.slot.receiver_dropped(),
            StepState::Settled(_) => true,
        }
    }

    fn take(&mut self) -> Option<PendingChallenge<I, A>> {
        match std::mem::replace(self, StepState::Idle) {
            StepState::Idle => None,
            StepState::Pending(p) | StepState::Settled(p) => Some(p),
        }
    }
}

struct FlowState {
    handler: Option<Arc<dyn ChallengeHandler>>,
    flow_active: bool,
    password: StepState<PasswordChallengeInput, PasswordDetails>,
    new_password: StepState<NewPasswordRequiredInput, NewPasswordDetails>,
    custom: StepState<CustomChallengeInput, CustomChallengeDetails>,
    mfa: StepState<MultiFactorInput, MfaCodeDetails>,
}

type StepSelector<I, A> = fn(&mut FlowState) -> &mut StepState<I, A>;

impl FlowState {
    fn new(handler: Option<Arc<dyn ChallengeHandler>>) -> Self {
        Self {
            handler,
            flow_active: false,
            password: StepState::Idle,
            new_password: StepState::Idle,
            custom: StepState::Idle,
            mfa: StepState::Idle,
        }
    }

    fn password_step(&mut self) -> &mut StepState<PasswordChallengeInput, PasswordDetails> {
        &mut self.password
    }

    fn new_password_step(&mut self) -> &mut StepState<NewPasswordRequiredInput, NewPasswordDetails> {
        &mut self.new_password
    }

    fn custom_step(&mut self) -> &mut StepState<CustomChallengeInput, CustomChallengeDetails> {
        &mut self.custom
    }

    fn mfa_step(&mut self) -> &mut StepState<MultiFactorInput, MfaCodeDetails> {
        &mut self.mfa
    }

    fn is_live(&self, kind: ChallengeKind) -> bool {
        match kind {
            ChallengeKind::Password => self.password.is_live(),
            ChallengeKind::NewPasswordRequired => self.new_password.is_live(),
            ChallengeKind::CustomChallenge => self.custom.is_live(),
            ChallengeKind::MultiFactorCode => self.mfa.is_live(),
        }
    }

    fn in_flight(&self, kind: ChallengeKind) -> bool {
        match kind {
            ChallengeKind::Password => self.password.in_flight(),
            ChallengeKind::NewPasswordRequired => self.new_password.in_flight(),
            ChallengeKind::CustomChallenge => self.custom.in_flight(),
            ChallengeKind::MultiFactorCode => self.mfa.in_flight(),
        }
    }

    fn first_in_flight(&self) -> Option<ChallengeKind> {
        ChallengeKind::ALL.into_iter().find(|kind| self.in_flight(*kind))
    }

    /// Clears every raised step, returning who still owes a completion.
    fn take_unfinished(&mut self) -> Vec<(ChallengeKind, Arc<dyn ChallengeHandler>)> {
        let mut unfinished = Vec::new();
        if let Some(p) = self.password.take() {
            unfinished.push((p.kind, p.handler));
        }
        if let Some(p) = self.new_password.take() {
            unfinished.push((p.kind, p.handler));
        }
        if let Some(p) = self.custom.take() {
            unfinished.push((p.kind, p.handler));
        }
        if let Some(p) = self.mfa.take() {
            unfinished.push((p.kind, p.handler));
        }
        unfinished
    }
}

fn notify_completion(handler: &dyn ChallengeHandler, kind: ChallengeKind, error: Option<BackendError>) {
    match kind {
        ChallengeKind::Password => handler.did_complete_password_step(error),
        ChallengeKind::NewPasswordRequired => handler.did_complete_new_password_step(error),
        ChallengeKind::CustomChallenge => handler.did_complete_custom_challenge_step(error),
        ChallengeKind::MultiFactorCode => handler.did_complete_mfa_step(error),
    }
}

/// Ends the flow when `begin_flow` returns or its future is dropped.
struct FlowGuard<'a> {
    orchestrator: &'a ChallengeOrchestrator,
}

impl Drop for FlowGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.end_flow();
    }
}

pub struct ChallengeOrchestrator {
    session: SessionKey,
    backend: Arc<dyn IdentityBackend>,
    state: Mutex<FlowState>,
}

impl ChallengeOrchestrator {
    pub fn new(session: SessionKey, backend: Arc<dyn IdentityBackend>) -> Self {
        Self {
            session,
            backend,
            state: Mutex::new(FlowState::new(None)),
        }
    }

    pub fn with_handler(
        session: SessionKey,
        backend: Arc<dyn IdentityBackend>,
        handler: Arc<dyn ChallengeHandler>,
    ) -> Self {
        Self {
            session,
            backend,
            state: Mutex::new(FlowState::new(Some(handler))),
        }
    }

    pub fn session(&self) -> &SessionKey {
        &self.session
    }

    /// Replaces the handler set. Rejected while any step is between its
    /// request and its completion, answered or not.
    pub fn register_handler(&self, handler: Arc<dyn ChallengeHandler>) -> Result<(), Error> {
        let mut state = self.state.lock();
        if let Some(kind) = state.first_in_flight() {
            warn!(session = %self.session, %kind, "refusing to swap challenge handler mid-flight");
            return Err(Error::InvalidHandlerSwap(kind));
        }
        state.handler = Some(handler);
        info!(session = %self.session, "challenge handler registered");
        Ok(())
    }

    pub fn has_handler(&self) -> bool {
        self.state.lock().handler.is_some()
    }

    pub fn is_pending(&self, kind: ChallengeKind) -> bool {
        self.state.lock().is_live(kind)
    }

    pub fn pending_kinds(&self) -> Vec<ChallengeKind> {
        let state = self.state.lock();
        ChallengeKind::ALL
            .into_iter()
            .filter(|kind| state.is_live(*kind))
            .collect()
    }

    /// The input of the MFA challenge in progress, kept for re-delivery.
    pub fn last_mfa_input(&self) -> Option<MultiFactorInput> {
        match &self.state.lock().mfa {
            StepState::Pending(p) | StepState::Settled(p) => Some(p.input.clone()),
            StepState::Idle => None,
        }
    }

    /// Runs one sign-in flow through the bound backend with this orchestrator
    /// as its delegate. Resolves once the backend finishes or gives up.
    ///
    /// Only one flow runs at a time. If the returned future is dropped early,
    /// steps still in flight are completed with `FlowCancelled`.
    pub async fn begin_flow(self: &Arc<Self>, request: SignInRequest) -> Result<SignInOutcome, Error> {
        {
            let mut state = self.state.lock();
            if state.flow_active {
                warn!(session = %self.session, "sign-in flow already in progress");
                return Err(Error::FlowInProgress);
            }
            state.flow_active = true;
        }
        let _guard = FlowGuard { orchestrator: &**self };

        info!(session = %self.session, username = ?request.username, "beginning sign-in flow");
        let delegate: Arc<dyn ChallengeDelegate> = Arc::clone(self) as Arc<dyn ChallengeDelegate>;
        match self.backend.sign_in(request, delegate).await {
            Ok(outcome) => {
                info!(
                    session = %self.session,
                    username = %outcome.username,
                    steps = outcome.completed_steps.len(),
                    "sign-in flow finished"
                );
                Ok(outcome)
            }
            Err(e) => {
                warn!(session = %self.session, error = %e, "sign-in flow failed");
                Err(Error::Backend(e))
            }
        }
    }

    fn end_flow(&self) {
        let unfinished = {
            let mut state = self.state.lock();
            state.flow_active = false;
            state.take_unfinished()
        };
        for (kind, handler) in unfinished {
            warn!(session = %self.session, %kind, "flow ended with the step still in flight");
            notify_completion(handler.as_ref(), kind, Some(BackendError::FlowCancelled));
        }
    }

    pub fn resolve_password(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<(), Error> {
        let answer = PasswordDetails {
            username: username.into(),
            password: password.into(),
        };
        self.settle(ChallengeKind::Password, FlowState::password_step, answer)
    }

    pub fn resolve_new_password(
        &self,
        proposed_password: impl Into<String>,
        user_attributes: HashMap<String, String>,
    ) -> Result<(), Error> {
        let answer = NewPasswordDetails {
            proposed_password: proposed_password.into(),
            user_attributes,
        };
        self.settle(ChallengeKind::NewPasswordRequired, FlowState::new_password_step, answer)
    }

    pub fn resolve_custom_challenge(
        &self,
        challenge_responses: HashMap<String, String>,
    ) -> Result<(), Error> {
        let answer = CustomChallengeDetails { challenge_responses };
        self.settle(ChallengeKind::CustomChallenge, FlowState::custom_step, answer)
    }

    pub fn resolve_mfa_code(&self, code: impl Into<String>) -> Result<(), Error> {
        let answer = MfaCodeDetails { code: code.into() };
        self.settle(ChallengeKind::MultiFactorCode, FlowState::mfa_step, answer)
    }

    /// Hands the pending MFA challenge to the handler again, same input and
    /// same slot, e.g. after the user asked for the code to be resent.
    pub fn redeliver_mfa_prompt(&self) -> Result<(), Error> {
        let kind = ChallengeKind::MultiFactorCode;
        let (handler, input, slot) = {
            let state = self.state.lock();
            match &state.mfa {
                StepState::Pending(p) if p.slot.receiver_dropped() => {
                    return Err(Error::NoPendingChallenge(kind));
                }
                StepState::Pending(p) if !p.slot.is_filled() => {
                    (Arc::clone(&p.handler), p.input.clone(), p.slot.clone())
                }
                StepState::Pending(_) | StepState::Settled(_) => return Err(Error::AlreadyResolved(kind)),
                StepState::Idle => return Err(Error::NoPendingChallenge(kind)),
            }
        };
        info!(session = %self.session, slot = %slot.id(), medium = %input.delivery_medium, "re-delivering mfa prompt");
        handler.get_mfa_code(input, slot);
        Ok(())
    }

    fn reject_slot<A>(&self, kind: ChallengeKind, slot: &ResolutionSlot<A>, reason: BackendError) {
        if let Err(e) = slot.fail(reason) {
            debug!(session = %self.session, %kind, slot = %slot.id(), error = %e, "backend was no longer waiting");
        }
    }

    fn raise<I, A>(
        &self,
        kind: ChallengeKind,
        select: StepSelector<I, A>,
        input: I,
        slot: ResolutionSlot<A>,
    ) -> Result<Arc<dyn ChallengeHandler>, Error> {
        let mut state = self.state.lock();
        let handler = state.handler.clone();
        let step = select(&mut *state);

        if step.is_live() {
            warn!(session = %self.session, %kind, slot = %slot.id(), "challenge raised while one is already pending");
            self.reject_slot(
                kind,
                &slot,
                BackendError::Rejected(format!("a {} challenge is already pending", kind)),
            );
            return Err(Error::ChallengeAlreadyPending(kind));
        }

        let Some(handler) = handler else {
            *step = StepState::Idle;
            error!(session = %self.session, %kind, slot = %slot.id(), "challenge raised with no handler registered");
            self.reject_slot(kind, &slot, BackendError::HandlerMissing(kind));
            return Err(Error::HandlerNotRegistered(kind));
        };

        if let Some(stale) = step.take() {
            debug!(session = %self.session, %kind, slot = %stale.slot.id(), "replacing a step the backend left behind");
        }
        debug!(session = %self.session, %kind, slot = %slot.id(), "challenge pending");
        *step = StepState::Pending(PendingChallenge {
            kind,
            input,
            slot,
            handler: Arc::clone(&handler),
        });
        Ok(handler)
    }

    fn settle<I, A>(&self, kind: ChallengeKind, select: StepSelector<I, A>, answer: A) -> Result<(), Error> {
        let slot = {
            let mut state = self.state.lock();
            let step = select(&mut *state);
            match std::mem::replace(step, StepState::Idle) {
                StepState::Pending(pending) if pending.slot.receiver_dropped() => {
                    *step = StepState::Pending(pending);
                    return Err(Error::SlotClosed(kind));
                }
                StepState::Pending(pending) => {
                    let slot = pending.slot.clone();
                    *step = StepState::Settled(pending);
                    slot
                }
                StepState::Settled(pending) => {
                    *step = StepState::Settled(pending);
                    return Err(Error::AlreadyResolved(kind));
                }
                StepState::Idle => return Err(Error::NoPendingChallenge(kind)),
            }
        };

        let slot_id = slot.id();
        if let Err(e) = slot.resolve(answer) {
            warn!(session = %self.session, %kind, slot = %slot_id, error = %e, "could not deliver answer");
            return Err(e);
        }
        info!(session = %self.session, %kind, slot = %slot_id, "challenge resolved");
        Ok(())
    }

    /// Returns the handler owed this completion: the one the challenge was
    /// raised with, or the current one if the step was never raised.
    fn complete<I, A>(
        &self,
        kind: ChallengeKind,
        select: StepSelector<I, A>,
        error: Option<&BackendError>,
    ) -> Option<Arc<dyn ChallengeHandler>> {
        let mut state = self.state.lock();
        let current = state.handler.clone();
        let step = select(&mut *state);

        let handler = match step.take() {
            Some(pending) => {
                if !pending.slot.is_filled() {
                    debug!(
                        session = %self.session,
                        kind = %pending.kind,
                        slot = %pending.slot.id(),
                        "step ended before its challenge was answered"
                    );
                }
                Some(pending.handler)
            }
            None => current,
        };

        match error {
            Some(e) => info!(session = %self.session, %kind, error = %e, "step failed"),
            None => info!(session = %self.session, %kind, "step completed"),
        }
        if handler.is_none() {
            warn!(session = %self.session, %kind, "step completed with no handler to notify");
        }
        handler
    }
}

impl ChallengeDelegate for ChallengeOrchestrator {
    fn on_password_requested(
        &self,
        input: PasswordChallengeInput,
        slot: ResolutionSlot<PasswordDetails>,
    ) -> Result<(), Error> {
        let handler = self.raise(ChallengeKind::Password, FlowState::password_step, input.clone(), slot.clone())?;
        handler.get_password_details(input, slot);
        Ok(())
    }

    fn on_password_step_completed(&self, error: Option<BackendError>) {
        if let Some(handler) = self.complete(ChallengeKind::Password, FlowState::password_step, error.as_ref()) {
            handler.did_complete_password_step(error);
        }
    }

    fn on_new_password_requested(
        &self,
        input: NewPasswordRequiredInput,
        slot: ResolutionSlot<NewPasswordDetails>,
    ) -> Result<(), Error> {
        let handler = self.raise(
            ChallengeKind::NewPasswordRequired,
            FlowState::new_password_step,
            input.clone(),
            slot.clone(),
        )?;
        handler.get_new_password_details(input, slot);
        Ok(())
    }

    fn on_new_password_step_completed(&self, error: Option<BackendError>) {
        if let Some(handler) = self.complete(
            ChallengeKind::NewPasswordRequired,
            FlowState::new_password_step,
            error.as_ref(),
        ) {
            handler.did_complete_new_password_step(error);
        }
    }

    fn on_custom_challenge_requested(
        &self,
        input: CustomChallengeInput,
        slot: ResolutionSlot<CustomChallengeDetails>,
    ) -> Result<(), Error> {
        let handler = self.raise(
            ChallengeKind::CustomChallenge,
            FlowState::custom_step,
            input.clone(),
            slot.clone(),
        )?;
        handler.get_custom_challenge_details(input, slot);
        Ok(())
    }

    fn on_custom_challenge_step_completed(&self, error: Option<BackendError>) {
        if let Some(handler) = self.complete(ChallengeKind::CustomChallenge, FlowState::custom_step, error.as_ref()) {
            handler.did_complete_custom_challenge_step(error);
        }
    }

    fn on_mfa_code_requested(
        &self,
        input: MultiFactorInput,
        slot: ResolutionSlot<MfaCodeDetails>,
    ) -> Result<(), Error> {
        let handler = self.raise(ChallengeKind::MultiFactorCode, FlowState::mfa_step, input.clone(), slot.clone())?;
        handler.get_mfa_code(input, slot);
        Ok(())
    }

    fn on_mfa_step_completed(&self, error: Option<BackendError>) {
        if let Some(handler) = self.complete(ChallengeKind::MultiFactorCode, FlowState::mfa_step, error.as_ref()) {
            handler.did_complete_mfa_step(error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::challenge::resolution_slot;
    use crate::models::DeliveryMedium;
    use crate::test_utils::{idle_backend, HandlerCall, RecordingHandler};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    fn orchestrator_with(handler: Arc<RecordingHandler>) -> ChallengeOrchestrator {
        ChallengeOrchestrator::with_handler(SessionKey::Default, idle_backend(), handler)
    }

    fn sms_input() -> MultiFactorInput {
        MultiFactorInput {
            delivery_medium: DeliveryMedium::Sms,
            destination: "+*******1234".into(),
        }
    }

    #[tokio::test]
    async fn password_challenge_round_trip() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(handler.clone());

        let (slot, receiver) = resolution_slot(ChallengeKind::Password);
        let slot_id = slot.id();
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), slot));
        assert!(orch.is_pending(ChallengeKind::Password));

        assert_ok!(orch.resolve_password("alice", "hunter2"));
        assert!(!orch.is_pending(ChallengeKind::Password));

        let answer = receiver.wait().await.unwrap();
        assert_eq!(answer.username, "alice");
        assert_eq!(answer.password, "hunter2");

        orch.on_password_step_completed(None);
        assert_eq!(
            handler.calls(),
            vec![
                HandlerCall::Details(ChallengeKind::Password, slot_id),
                HandlerCall::Completed(ChallengeKind::Password, None),
            ]
        );
    }

    #[test]
    fn resolve_without_pending_touches_nothing_else() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(handler.clone());

        let (slot, _receiver) = resolution_slot(ChallengeKind::MultiFactorCode);
        assert_ok!(orch.on_mfa_code_requested(sms_input(), slot));

        let res = orch.resolve_password("alice", "hunter2");
        assert!(matches!(res, Err(Error::NoPendingChallenge(ChallengeKind::Password))));
        assert_eq!(orch.pending_kinds(), vec![ChallengeKind::MultiFactorCode]);
    }

    #[test]
    fn second_resolve_is_already_resolved() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));
        let (slot, _receiver) = resolution_slot(ChallengeKind::CustomChallenge);
        assert_ok!(orch.on_custom_challenge_requested(CustomChallengeInput::default(), slot));

        assert_ok!(orch.resolve_custom_challenge(HashMap::new()));
        let res = orch.resolve_custom_challenge(HashMap::new());
        assert!(matches!(res, Err(Error::AlreadyResolved(ChallengeKind::CustomChallenge))));
    }

    #[tokio::test]
    async fn duplicate_request_keeps_the_original() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));

        let (first, first_rx) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), first));

        let (second, second_rx) = resolution_slot(ChallengeKind::Password);
        let res = orch.on_password_requested(PasswordChallengeInput::default(), second);
        assert!(matches!(res, Err(Error::ChallengeAlreadyPending(ChallengeKind::Password))));
        assert!(matches!(second_rx.wait().await, Err(BackendError::Rejected(_))));

        assert!(orch.is_pending(ChallengeKind::Password));
        assert_ok!(orch.resolve_password("alice", "pw"));
        assert_eq!(first_rx.wait().await.unwrap().username, "alice");
    }

    #[tokio::test]
    async fn missing_handler_fails_the_slot() {
        let orch = ChallengeOrchestrator::new(SessionKey::Default, idle_backend());
        let (slot, receiver) = resolution_slot(ChallengeKind::NewPasswordRequired);

        let res = orch.on_new_password_requested(NewPasswordRequiredInput::default(), slot);
        assert!(matches!(res, Err(Error::HandlerNotRegistered(ChallengeKind::NewPasswordRequired))));
        assert_eq!(
            receiver.wait().await.unwrap_err(),
            BackendError::HandlerMissing(ChallengeKind::NewPasswordRequired)
        );
        assert!(!orch.is_pending(ChallengeKind::NewPasswordRequired));
    }

    #[test]
    fn handler_swap_rejected_while_pending() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));
        let (slot, _receiver) = resolution_slot(ChallengeKind::MultiFactorCode);
        assert_ok!(orch.on_mfa_code_requested(sms_input(), slot));

        let res = orch.register_handler(Arc::new(RecordingHandler::default()));
        assert!(matches!(res, Err(Error::InvalidHandlerSwap(ChallengeKind::MultiFactorCode))));

        orch.on_mfa_step_completed(Some(BackendError::ChallengeExpired("expired".into())));
        assert_ok!(orch.register_handler(Arc::new(RecordingHandler::default())));
    }

    #[test]
    fn step_failure_clears_pending_and_notifies() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(handler.clone());
        let (slot, _receiver) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), slot));

        let failure = BackendError::Network("connection reset".into());
        orch.on_step_failed(ChallengeKind::Password, failure.clone());

        assert!(!orch.is_pending(ChallengeKind::Password));
        assert_eq!(
            handler.calls().last(),
            Some(&HandlerCall::Completed(ChallengeKind::Password, Some(failure)))
        );

        let late = orch.resolve_password("alice", "pw");
        assert!(matches!(late, Err(Error::NoPendingChallenge(ChallengeKind::Password))));
    }

    #[test]
    fn mfa_prompt_can_be_redelivered() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(handler.clone());

        assert!(matches!(
            orch.redeliver_mfa_prompt(),
            Err(Error::NoPendingChallenge(ChallengeKind::MultiFactorCode))
        ));

        let (slot, _receiver) = resolution_slot(ChallengeKind::MultiFactorCode);
        let slot_id = slot.id();
        assert_ok!(orch.on_mfa_code_requested(sms_input(), slot));
        assert_ok!(orch.redeliver_mfa_prompt());

        assert_eq!(
            handler.calls(),
            vec![
                HandlerCall::Details(ChallengeKind::MultiFactorCode, slot_id),
                HandlerCall::Details(ChallengeKind::MultiFactorCode, slot_id),
            ]
        );
        assert_eq!(orch.last_mfa_input(), Some(sms_input()));

        assert_ok!(orch.resolve_mfa_code("123456"));
        assert_err!(orch.redeliver_mfa_prompt());
    }

    #[tokio::test]
    async fn handler_answering_through_the_slot_counts_as_resolution() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(handler.clone());

        let (slot, receiver) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), slot));

        let handed_out = handler.last_password_slot().unwrap();
        assert_ok!(handed_out.resolve(PasswordDetails {
            username: "bob".into(),
            password: "pw".into(),
        }));
        assert!(!orch.is_pending(ChallengeKind::Password));

        let res = orch.resolve_password("bob", "other");
        assert!(matches!(res, Err(Error::AlreadyResolved(ChallengeKind::Password))));
        assert_eq!(receiver.wait().await.unwrap().password, "pw");
    }

    #[tokio::test]
    async fn handler_swap_rejected_between_resolve_and_completion() {
        let old = Arc::new(RecordingHandler::default());
        let new = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(old.clone());

        let (slot, receiver) = resolution_slot(ChallengeKind::Password);
        let slot_id = slot.id();
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), slot));
        assert_ok!(orch.resolve_password("alice", "pw"));
        assert_ok!(receiver.wait().await);

        let res = orch.register_handler(new.clone());
        assert!(matches!(res, Err(Error::InvalidHandlerSwap(ChallengeKind::Password))));

        orch.on_password_step_completed(None);
        assert_eq!(
            old.calls(),
            vec![
                HandlerCall::Details(ChallengeKind::Password, slot_id),
                HandlerCall::Completed(ChallengeKind::Password, None),
            ]
        );
        assert!(new.calls().is_empty());
        assert_ok!(orch.register_handler(new));
    }

    #[test]
    fn completion_reaches_the_handler_that_was_asked() {
        let old = Arc::new(RecordingHandler::default());
        let new = Arc::new(RecordingHandler::default());
        let orch = orchestrator_with(old.clone());

        let (slot, receiver) = resolution_slot(ChallengeKind::CustomChallenge);
        assert_ok!(orch.on_custom_challenge_requested(CustomChallengeInput::default(), slot));
        drop(receiver);
        assert!(!orch.is_pending(ChallengeKind::CustomChallenge));

        assert_ok!(orch.register_handler(new.clone()));
        orch.on_custom_challenge_step_completed(Some(BackendError::FlowCancelled));

        assert_eq!(
            old.calls().last(),
            Some(&HandlerCall::Completed(ChallengeKind::CustomChallenge, Some(BackendError::FlowCancelled)))
        );
        assert!(new.calls().is_empty());
    }

    #[test]
    fn abandoned_slot_does_not_block_a_new_challenge() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));

        let (stale, stale_rx) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), stale));
        drop(stale_rx);
        assert!(matches!(
            orch.resolve_password("alice", "pw"),
            Err(Error::SlotClosed(ChallengeKind::Password))
        ));

        let (fresh, _fresh_rx) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), fresh));
        assert!(orch.is_pending(ChallengeKind::Password));
        assert_ok!(orch.resolve_password("alice", "pw"));
    }

    #[tokio::test]
    async fn dropped_flow_releases_its_steps() {
        let handler = Arc::new(RecordingHandler::default());
        let orch = Arc::new(orchestrator_with(handler.clone()));

        let res = tokio::time::timeout(
            Duration::from_millis(50),
            orch.begin_flow(SignInRequest::for_user("alice")),
        )
        .await;
        assert!(res.is_err());

        assert!(!orch.is_pending(ChallengeKind::Password));
        assert_eq!(
            handler.calls().last(),
            Some(&HandlerCall::Completed(ChallengeKind::Password, Some(BackendError::FlowCancelled)))
        );
        assert_ok!(orch.register_handler(handler.clone()));

        let res = tokio::time::timeout(
            Duration::from_millis(50),
            orch.begin_flow(SignInRequest::for_user("alice")),
        )
        .await;
        assert!(res.is_err());
        let raised = handler
            .calls()
            .iter()
            .filter(|call| matches!(call, HandlerCall::Details(ChallengeKind::Password, _)))
            .count();
        assert_eq!(raised, 2);
    }

    #[tokio::test]
    async fn only_one_flow_runs_at_a_time() {
        let orch = Arc::new(orchestrator_with(Arc::new(RecordingHandler::default())));
        let running = {
            let orch = Arc::clone(&orch);
            tokio::spawn(async move { orch.begin_flow(SignInRequest::default()).await })
        };
        tokio::time::timeout(Duration::from_secs(5), async {
            while !orch.is_pending(ChallengeKind::Password) {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("first flow never raised a challenge");

        let second = orch.begin_flow(SignInRequest::default()).await;
        assert!(matches!(second, Err(Error::FlowInProgress)));
        assert!(orch.is_pending(ChallengeKind::Password));

        running.abort();
        let _ = running.await;
        assert!(!orch.is_pending(ChallengeKind::Password));
    }

    #[test]
    fn mfa_input_lives_as_long_as_the_step() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));
        assert_eq!(orch.last_mfa_input(), None);

        let (slot, _receiver) = resolution_slot(ChallengeKind::MultiFactorCode);
        assert_ok!(orch.on_mfa_code_requested(sms_input(), slot));
        assert_ok!(orch.resolve_mfa_code("123456"));
        assert_eq!(orch.last_mfa_input(), Some(sms_input()));

        orch.on_mfa_step_completed(None);
        assert_eq!(orch.last_mfa_input(), None);
    }

    #[test]
    fn rejecting_a_slot_nobody_waits_on_is_harmless() {
        let orch = orchestrator_with(Arc::new(RecordingHandler::default()));
        let (first, _first_rx) = resolution_slot(ChallengeKind::Password);
        assert_ok!(orch.on_password_requested(PasswordChallengeInput::default(), first));

        let (second, second_rx) = resolution_slot(ChallengeKind::Password);
        drop(second_rx);
        let res = orch.on_password_requested(PasswordChallengeInput::default(), second.clone());
        assert!(matches!(res, Err(Error::ChallengeAlreadyPending(ChallengeKind::Password))));
        assert!(second.is_filled());
        assert!(orch.is_pending(ChallengeKind::Password));

        let bare = ChallengeOrchestrator::new(SessionKey::Default, idle_backend());
        let (slot, receiver) = resolution_slot(ChallengeKind::MultiFactorCode);
        drop(receiver);
        let res = bare.on_mfa_code_requested(sms_input(), slot);
        assert!(matches!(res, Err(Error::HandlerNotRegistered(ChallengeKind::MultiFactorCode))));
    }
}
