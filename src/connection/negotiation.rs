use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;

use crate::transport::{DescriptionKind, EngineError, SessionEngine};

/// ceiling on any single engine step
const NEGOTIATION_TIMEOUT: Duration = Duration::from_secs(3);

/// One negotiation step against the transport engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    CreateOffer,
    CreateAnswer,
    SetLocalDescription,
    SetRemoteDescription,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::CreateOffer => "create-offer",
            Step::CreateAnswer => "create-answer",
            Step::SetLocalDescription => "set-local-description",
            Step::SetRemoteDescription => "set-remote-description",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Error)]
pub enum NegotiationError {
    #[error("negotiation step {step} timed out")]
    TimedOut { step: Step },

    #[error("negotiation step {step} requested while another is pending")]
    AlreadyPending { step: Step },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Which slot an in-flight chain occupies: local-description work or
/// remote-description application
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Local,
    Remote,
}

/// What a completed chain produced
#[derive(Debug, Clone)]
pub(crate) enum StepOutcome {
    /// offer created and installed locally, ready to send
    OfferReady { sdp: String },
    /// answer created and installed locally, ready to send
    AnswerReady { sdp: String },
    RemoteOfferApplied,
    RemoteAnswerApplied,
}

pub(crate) type StepResult = (Direction, Result<StepOutcome, NegotiationError>);

/// A single in-flight chain with its abort handle
#[derive(Debug)]
struct PendingOperation {
    step: Step,
    task: JoinHandle<()>,
}

/// Sequences the offer/answer steps against the engine. Steps run on
/// spawned tasks so the tick loop never blocks on the engine; each engine
/// await carries the bounded-wait timeout, and at most one chain per
/// direction is in flight. A timed-out step is abandoned, never retried.
pub(crate) struct Negotiation {
    engine: Arc<dyn SessionEngine>,
    results: mpsc::UnboundedSender<StepResult>,
    pending_local: Option<PendingOperation>,
    pending_remote: Option<PendingOperation>,
}

async fn run_step<T>(
    step: Step,
    fut: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, NegotiationError> {
    match timeout(NEGOTIATION_TIMEOUT, fut).await {
        Ok(result) => result.map_err(NegotiationError::from),
        Err(_) => Err(NegotiationError::TimedOut { step }),
    }
}

impl Negotiation {
    pub fn new(
        engine: Arc<dyn SessionEngine>,
        results: mpsc::UnboundedSender<StepResult>,
    ) -> Self {
        Self {
            engine,
            results,
            pending_local: None,
            pending_remote: None,
        }
    }

    pub fn pending(&self, direction: Direction) -> Option<Step> {
        match direction {
            Direction::Local => self.pending_local.as_ref().map(|p| p.step),
            Direction::Remote => self.pending_remote.as_ref().map(|p| p.step),
        }
    }

    fn ensure_idle(&self, direction: Direction, step: Step) -> Result<(), NegotiationError> {
        let occupied = match direction {
            Direction::Local => self.pending_local.is_some(),
            Direction::Remote => self.pending_remote.is_some(),
        };
        if occupied {
            return Err(NegotiationError::AlreadyPending { step });
        }
        Ok(())
    }

    /// host side: create-offer, install it locally, report it for sending
    pub fn start_offer(&mut self) -> Result<(), NegotiationError> {
        self.ensure_idle(Direction::Local, Step::CreateOffer)?;
        debug!("starting offer");
        let engine = Arc::clone(&self.engine);
        let results = self.results.clone();
        let task = tokio::spawn(async move {
            let outcome = async {
                let sdp = run_step(Step::CreateOffer, engine.create_offer()).await?;
                run_step(
                    Step::SetLocalDescription,
                    engine.set_local_description(DescriptionKind::Offer, &sdp),
                )
                .await?;
                Ok(StepOutcome::OfferReady { sdp })
            }
            .await;
            let _ = results.send((Direction::Local, outcome));
        });
        self.pending_local = Some(PendingOperation {
            step: Step::CreateOffer,
            task,
        });
        Ok(())
    }

    /// non-host side: create the answer to an applied offer and install it
    pub fn start_answer(&mut self) -> Result<(), NegotiationError> {
        self.ensure_idle(Direction::Local, Step::CreateAnswer)?;
        debug!("starting answer");
        let engine = Arc::clone(&self.engine);
        let results = self.results.clone();
        let task = tokio::spawn(async move {
            let outcome = async {
                let sdp = run_step(Step::CreateAnswer, engine.create_answer()).await?;
                run_step(
                    Step::SetLocalDescription,
                    engine.set_local_description(DescriptionKind::Answer, &sdp),
                )
                .await?;
                Ok(StepOutcome::AnswerReady { sdp })
            }
            .await;
            let _ = results.send((Direction::Local, outcome));
        });
        self.pending_local = Some(PendingOperation {
            step: Step::CreateAnswer,
            task,
        });
        Ok(())
    }

    /// apply the peer's offer
    pub fn apply_remote_offer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        self.apply_remote(DescriptionKind::Offer, sdp)
    }

    /// apply the peer's answer
    pub fn apply_remote_answer(&mut self, sdp: String) -> Result<(), NegotiationError> {
        self.apply_remote(DescriptionKind::Answer, sdp)
    }

    fn apply_remote(
        &mut self,
        kind: DescriptionKind,
        sdp: String,
    ) -> Result<(), NegotiationError> {
        self.ensure_idle(Direction::Remote, Step::SetRemoteDescription)?;
        debug!("applying remote {:?}", kind);
        let engine = Arc::clone(&self.engine);
        let results = self.results.clone();
        let task = tokio::spawn(async move {
            let outcome = async {
                run_step(
                    Step::SetRemoteDescription,
                    engine.set_remote_description(kind, &sdp),
                )
                .await?;
                Ok(match kind {
                    DescriptionKind::Offer => StepOutcome::RemoteOfferApplied,
                    DescriptionKind::Answer => StepOutcome::RemoteAnswerApplied,
                })
            }
            .await;
            let _ = results.send((Direction::Remote, outcome));
        });
        self.pending_remote = Some(PendingOperation {
            step: Step::SetRemoteDescription,
            task,
        });
        Ok(())
    }

    /// the supervisor received this direction's result; free the slot
    pub fn complete(&mut self, direction: Direction) {
        match direction {
            Direction::Local => self.pending_local = None,
            Direction::Remote => self.pending_remote = None,
        }
    }

    /// abort anything in flight (teardown or superseded attempt)
    pub fn cancel_all(&mut self) {
        if let Some(pending) = self.pending_local.take() {
            debug!("cancelling pending {}", pending.step);
            pending.task.abort();
        }
        if let Some(pending) = self.pending_remote.take() {
            debug!("cancelling pending {}", pending.step);
            pending.task.abort();
        }
    }
}

impl Drop for Negotiation {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
