//! Single-use handoff between a suspended backend step and whoever answers it.
//!
//! The backend keeps the [`SlotReceiver`] and awaits it; the orchestrator and
//! the application handler share clones of the [`ResolutionSlot`]. The first
//! fill wins, every later fill is an `AlreadyResolved` error.

use std::fmt;
use std::sync::Arc;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use crate::models::ChallengeKind;
use crate::{BackendError, Error};

pub type SlotResult<A> = Result<A, BackendError>;

struct SlotInner<A> {
    id: Uuid,
    kind: ChallengeKind,
    sender: Mutex<Option<oneshot::Sender<SlotResult<A>>>>,
}

pub struct ResolutionSlot<A> {
    inner: Arc<SlotInner<A>>,
}

pub struct SlotReceiver<A> {
    id: Uuid,
    kind: ChallengeKind,
    rx: oneshot::Receiver<SlotResult<A>>,
}

/// Creates a fresh slot for one challenge of `kind`.
pub fn resolution_slot<A>(kind: ChallengeKind) -> (ResolutionSlot<A>, SlotReceiver<A>) {
    let (tx, rx) = oneshot::channel();
    let id = Uuid::new_v4();
    let slot = ResolutionSlot {
        inner: Arc::new(SlotInner {
            id,
            kind,
            sender: Mutex::new(Some(tx)),
        }),
    };
    (slot, SlotReceiver { id, kind, rx })
}

impl<A> ResolutionSlot<A> {
    pub fn id(&self) -> Uuid {
        self.inner.id
    }

    pub fn kind(&self) -> ChallengeKind {
        self.inner.kind
    }

    pub fn is_filled(&self) -> bool {
        self.inner.sender.lock().is_none()
    }

    /// True once the backend stopped waiting without the slot being filled,
    /// e.g. because the flow was dropped.
    pub fn receiver_dropped(&self) -> bool {
        self.inner
            .sender
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.is_closed())
    }

    /// Answers the challenge, resuming the backend.
    pub fn resolve(&self, answer: A) -> Result<(), Error> {
        self.fill(Ok(answer))
    }

    /// Ends the step with a failure instead of an answer.
    pub fn fail(&self, error: BackendError) -> Result<(), Error> {
        self.fill(Err(error))
    }

    pub fn same_slot(&self, other: &ResolutionSlot<A>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn fill(&self, outcome: SlotResult<A>) -> Result<(), Error> {
        let sender = self
            .inner
            .sender
            .lock()
            .take()
            .ok_or(Error::AlreadyResolved(self.inner.kind))?;
        sender
            .send(outcome)
            .map_err(|_| Error::SlotClosed(self.inner.kind))
    }
}

impl<A> Clone for ResolutionSlot<A> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A> fmt::Debug for ResolutionSlot<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionSlot")
            .field("id", &self.inner.id)
            .field("kind", &self.inner.kind)
            .field("filled", &self.is_filled())
            .finish()
    }
}

impl<A> SlotReceiver<A> {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn kind(&self) -> ChallengeKind {
        self.kind
    }

    /// Waits for the answer. A slot dropped without being filled counts as a
    /// cancelled flow.
    pub async fn wait(self) -> SlotResult<A> {
        match self.rx.await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::FlowCancelled),
        }
    }
}
