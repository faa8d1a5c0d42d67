//! Orchestration of one intent: its progress stream feeding its dispatcher.
//!
//! An [`IntentSession`] goes `Created -> Active -> Disposed`. While active it
//! owns a stream consumer task and a [`Dispatcher`]; when the stream reports
//! completion the prepared transactions are handed to the dispatcher, which
//! auto-sends them exactly once. [`IntentPipeline`] keeps one session per
//! intent and aborts the previous one when a different intent is opened.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument as _, debug, info, info_span, warn};

use crate::config::PipelineConfig;
use crate::consumer::ConsumerState;
use crate::dispatcher::{DispatchOutcome, DispatchState, Dispatcher, OverallStatus, WalletContext};
use crate::driver::StreamHandle;
use crate::errors::{DispatchError, PipelineError};
use crate::guard::{AbortHandle, Admission, RequestGuard, RequestTicket};
use crate::model::IntentId;
use crate::notify::Notifier;
use crate::policy::ReconnectPolicy;
use crate::transport::{HttpSseTransport, StreamTransport};

const STREAM_SLOT: &str = "intent-stream";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Created,
    Active,
    Disposed,
}

/// Combined view of an intent's stream and dispatch progress.
#[derive(Clone, Debug, PartialEq)]
pub struct PipelineStatus {
    pub intent_id: IntentId,
    pub phase: SessionPhase,
    pub consumer: ConsumerState,
    pub dispatch: DispatchState,
}

impl PipelineStatus {
    fn new(intent_id: IntentId) -> Self {
        Self {
            intent_id,
            phase: SessionPhase::Created,
            consumer: ConsumerState::default(),
            dispatch: DispatchState::default(),
        }
    }

    pub fn progress_percentage(&self) -> f64 {
        self.consumer.progress_percentage()
    }

    fn has_pending_dispatch(&self) -> bool {
        self.consumer.is_complete
            && self
                .consumer
                .transactions
                .as_ref()
                .is_some_and(|txs| !txs.is_empty())
    }

    /// Nothing further will happen without outside action.
    pub fn is_settled(&self) -> bool {
        match self.phase {
            SessionPhase::Disposed => true,
            SessionPhase::Created => false,
            SessionPhase::Active => match self.dispatch.overall_status {
                OverallStatus::Success | OverallStatus::Error => true,
                OverallStatus::Sending => false,
                OverallStatus::Idle => self.consumer.is_terminal() && !self.has_pending_dispatch(),
            },
        }
    }

    /// Interprets a settled status as the result of the session.
    pub fn outcome(&self) -> Result<(), PipelineError> {
        if self.dispatch.overall_status == OverallStatus::Error {
            let err = self
                .dispatch
                .error
                .clone()
                .unwrap_or_else(|| DispatchError::Unexpected("dispatch failed".into()));
            return Err(err.into());
        }
        if self.consumer.has_error {
            let message = self
                .consumer
                .error_message
                .clone()
                .unwrap_or_else(|| "stream failed".into());
            return Err(PipelineError::StreamTerminated(message));
        }
        if self.phase == SessionPhase::Disposed && self.dispatch.overall_status != OverallStatus::Success {
            return Err(PipelineError::Stopped);
        }
        Ok(())
    }
}

enum SessionCommand {
    ResetDispatch,
    ClearError,
    SendNow,
    Dispose,
}

struct Pending {
    transport: Arc<dyn StreamTransport>,
    policy: ReconnectPolicy,
    dispatcher: Dispatcher,
}

struct Running {
    commands: mpsc::UnboundedSender<SessionCommand>,
    cancel: AbortHandle,
    task: JoinHandle<()>,
}

/// One intent's stream consumer and dispatcher, driven by a background task.
pub struct IntentSession {
    session_id: uuid::Uuid,
    intent_id: IntentId,
    phase: SessionPhase,
    status: Arc<watch::Sender<PipelineStatus>>,
    pending: Option<Pending>,
    running: Option<Running>,
}

impl IntentSession {
    pub fn create(
        intent_id: IntentId,
        transport: Arc<dyn StreamTransport>,
        policy: ReconnectPolicy,
        dispatcher: Dispatcher,
    ) -> Self {
        let (status, _) = watch::channel(PipelineStatus::new(intent_id.clone()));
        Self {
            session_id: uuid::Uuid::new_v4(),
            intent_id,
            phase: SessionPhase::Created,
            status: Arc::new(status),
            pending: Some(Pending {
                transport,
                policy,
                dispatcher,
            }),
            running: None,
        }
    }

    pub fn intent_id(&self) -> &IntentId {
        &self.intent_id
    }

    /// Unique per session, including sessions reopened for the same intent.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn status(&self) -> PipelineStatus {
        self.status.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PipelineStatus> {
        self.status.subscribe()
    }

    /// Starts consuming the intent's stream. Activating twice is a no-op.
    pub fn activate(&mut self) -> Result<(), PipelineError> {
        self.activate_with(None)
    }

    fn activate_with(&mut self, ticket: Option<RequestTicket>) -> Result<(), PipelineError> {
        match self.phase {
            SessionPhase::Disposed => return Err(PipelineError::SessionDisposed),
            SessionPhase::Active => return Ok(()),
            SessionPhase::Created => {}
        }
        let Some(Pending {
            transport,
            policy,
            mut dispatcher,
        }) = self.pending.take()
        else {
            return Err(PipelineError::SessionDisposed);
        };

        let (commands, command_rx) = mpsc::unbounded_channel();
        let cancel = AbortHandle::new();
        dispatcher.cancel_on(cancel.signal());
        self.phase = SessionPhase::Active;
        self.status.send_modify(|s| s.phase = SessionPhase::Active);
        let span = info_span!(
            "intent_session",
            session_id = %self.session_id,
            intent_id = %self.intent_id
        );
        let stream = span.in_scope(|| StreamHandle::spawn(transport, policy));
        let task = tokio::spawn(
            run_session(
                self.intent_id.clone(),
                stream,
                dispatcher,
                command_rx,
                self.status.clone(),
                cancel.clone(),
                ticket,
            )
            .instrument(span),
        );
        info!(session_id = %self.session_id, intent_id = %self.intent_id, "intent session activated");
        self.running = Some(Running {
            commands,
            cancel,
            task,
        });
        Ok(())
    }

    /// Returns the dispatcher to idle without sending.
    pub fn reset_dispatch(&self) -> Result<(), PipelineError> {
        self.command(SessionCommand::ResetDispatch)
    }

    pub fn clear_error(&self) -> Result<(), PipelineError> {
        self.command(SessionCommand::ClearError)
    }

    /// Resets the dispatcher and sends the current transaction set again.
    pub fn retry_dispatch(&self) -> Result<(), PipelineError> {
        self.command(SessionCommand::ResetDispatch)?;
        self.command(SessionCommand::SendNow)
    }

    /// Waits until the session settles and returns its final status.
    pub async fn settled(&self) -> Result<PipelineStatus, PipelineError> {
        let mut rx = self.subscribe();
        let status = rx
            .wait_for(PipelineStatus::is_settled)
            .await
            .map_err(|_| PipelineError::SessionDisposed)?
            .clone();
        status.outcome().map(|()| status)
    }

    /// Stops the stream and ends the session. Idempotent.
    pub async fn dispose(&mut self) {
        if self.phase == SessionPhase::Disposed {
            return;
        }
        self.phase = SessionPhase::Disposed;
        self.pending = None;
        if let Some(Running {
            commands,
            cancel,
            task,
        }) = self.running.take()
        {
            // Lets an in-progress dispatch stop before its next batch.
            cancel.abort();
            let _ = commands.send(SessionCommand::Dispose);
            drop(commands);
            let _ = task.await;
        }
        self.status.send_modify(|s| s.phase = SessionPhase::Disposed);
        info!(session_id = %self.session_id, intent_id = %self.intent_id, "intent session disposed");
    }

    fn command(&self, command: SessionCommand) -> Result<(), PipelineError> {
        let running = self.running.as_ref().ok_or(PipelineError::SessionDisposed)?;
        running
            .commands
            .send(command)
            .map_err(|_| PipelineError::SessionDisposed)
    }
}

async fn run_session(
    intent_id: IntentId,
    stream: StreamHandle,
    mut dispatcher: Dispatcher,
    mut commands: mpsc::UnboundedReceiver<SessionCommand>,
    status: Arc<watch::Sender<PipelineStatus>>,
    cancel: AbortHandle,
    ticket: Option<RequestTicket>,
) {
    let mut consumer_rx = stream.subscribe();
    let forwarder = tokio::spawn(forward_dispatch(dispatcher.subscribe(), status.clone()));
    let mut cancelled = cancel.signal();
    // Losing the stream slot cancels the session like a dispose does.
    let relay = ticket.as_ref().map(|ticket| {
        let mut superseded = ticket.signal();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            superseded.aborted().await;
            cancel.abort();
        })
    });
    if let Err(err) = stream.start(intent_id.clone()) {
        warn!(intent_id = %intent_id, error = %err, "intent stream did not start");
    }

    loop {
        tokio::select! {
            biased;
            command = commands.recv() => match command {
                None | Some(SessionCommand::Dispose) => break,
                Some(SessionCommand::ResetDispatch) => dispatcher.reset(),
                Some(SessionCommand::ClearError) => dispatcher.clear_error(),
                Some(SessionCommand::SendNow) => {
                    log_outcome(&intent_id, dispatcher.send_to_wallet().await);
                }
            },
            () = cancelled.aborted() => {
                let superseded = ticket.as_ref().is_some_and(RequestTicket::is_aborted);
                info!(intent_id = %intent_id, superseded, "intent session cancelled");
                break;
            }
            changed = consumer_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let consumer = consumer_rx.borrow_and_update().clone();
                let is_complete = consumer.is_complete;
                if is_complete && let Some(transactions) = &consumer.transactions {
                    dispatcher.set_transactions(transactions.clone());
                }
                status.send_modify(|s| s.consumer = consumer);
                if let Some(result) = dispatcher.auto_send_when_ready(is_complete).await {
                    log_outcome(&intent_id, result);
                }
            }
        }
    }

    stream.shutdown().await;
    forwarder.abort();
    if let Some(relay) = relay {
        relay.abort();
    }
    status.send_modify(|s| {
        s.phase = SessionPhase::Disposed;
        s.dispatch = dispatcher.state().clone();
    });
    drop(ticket);
    debug!(intent_id = %intent_id, "intent session task finished");
}

async fn forward_dispatch(
    mut dispatch_rx: watch::Receiver<DispatchState>,
    status: Arc<watch::Sender<PipelineStatus>>,
) {
    while dispatch_rx.changed().await.is_ok() {
        let dispatch = dispatch_rx.borrow_and_update().clone();
        status.send_modify(|s| s.dispatch = dispatch);
    }
}

fn log_outcome(intent_id: &IntentId, result: Result<DispatchOutcome, DispatchError>) {
    match result {
        Ok(outcome) => info!(intent_id = %intent_id, ?outcome, "dispatch finished"),
        Err(err) => warn!(intent_id = %intent_id, error = %err, "dispatch failed"),
    }
}

/// Keeps one active [`IntentSession`] per intent id.
///
/// Opening an intent that is already being consumed is a no-op; opening a
/// different one aborts the session that held the stream slot.
pub struct IntentPipeline {
    config: PipelineConfig,
    transport: Arc<dyn StreamTransport>,
    wallet: WalletContext,
    notifier: Arc<dyn Notifier>,
    guard: RequestGuard,
    sessions: DashMap<IntentId, IntentSession>,
}

impl IntentPipeline {
    pub fn new(
        config: PipelineConfig,
        transport: Arc<dyn StreamTransport>,
        wallet: WalletContext,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            transport,
            wallet,
            notifier,
            guard: RequestGuard::new(),
            sessions: DashMap::new(),
        }
    }

    /// Builds a pipeline that reads streams over HTTP.
    pub fn connect(
        config: PipelineConfig,
        wallet: WalletContext,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, PipelineError> {
        let transport = Arc::new(HttpSseTransport::new(&config)?);
        Ok(Self::new(config, transport, wallet, notifier))
    }

    /// Opens (or keeps) the session for `intent_id` and returns its status feed.
    pub fn open(
        &self,
        intent_id: impl Into<IntentId>,
    ) -> Result<watch::Receiver<PipelineStatus>, PipelineError> {
        let intent_id = intent_id.into();
        match self.guard.begin(STREAM_SLOT, intent_id.as_str()) {
            Admission::Suppressed => self
                .sessions
                .get(&intent_id)
                .map(|session| session.subscribe())
                .ok_or(PipelineError::SessionDisposed),
            Admission::Started(ticket) => {
                let dispatcher = Dispatcher::new(
                    self.wallet.clone(),
                    self.notifier.clone(),
                    self.config.dispatch.clone(),
                );
                let mut session = IntentSession::create(
                    intent_id.clone(),
                    self.transport.clone(),
                    self.config.reconnect.clone(),
                    dispatcher,
                );
                session.activate_with(Some(ticket))?;
                let rx = session.subscribe();
                // Sessions that lost the slot have been aborted.
                self.sessions.retain(|id, _| id == &intent_id);
                self.sessions.insert(intent_id, session);
                Ok(rx)
            }
        }
    }

    pub fn status(&self, intent_id: &IntentId) -> Option<PipelineStatus> {
        self.sessions.get(intent_id).map(|session| session.status())
    }

    pub fn reset_dispatch(&self, intent_id: &IntentId) -> Result<(), PipelineError> {
        self.with_session(intent_id, IntentSession::reset_dispatch)
    }

    pub fn clear_error(&self, intent_id: &IntentId) -> Result<(), PipelineError> {
        self.with_session(intent_id, IntentSession::clear_error)
    }

    pub fn retry_dispatch(&self, intent_id: &IntentId) -> Result<(), PipelineError> {
        self.with_session(intent_id, IntentSession::retry_dispatch)
    }

    /// Disposes the session for `intent_id`, if any.
    pub async fn close(&self, intent_id: &IntentId) {
        if let Some((_, mut session)) = self.sessions.remove(intent_id) {
            session.dispose().await;
        }
    }

    fn with_session(
        &self,
        intent_id: &IntentId,
        f: impl FnOnce(&IntentSession) -> Result<(), PipelineError>,
    ) -> Result<(), PipelineError> {
        let session = self
            .sessions
            .get(intent_id)
            .ok_or(PipelineError::SessionDisposed)?;
        f(session.value())
    }
}
