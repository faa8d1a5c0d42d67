//! Async runtime for [`StreamConsumer`]: owns the single physical connection
//! and the reconnect timer, feeds transport activity into the state machine
//! and carries out the directives it returns.

use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt as _;
use futures::future::BoxFuture;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{Instrument as _, debug, warn};

use crate::consumer::{ConsumerState, Directive, StreamConsumer, TransportEvent};
use crate::errors::{PipelineError, TransportError};
use crate::model::StreamId;
use crate::policy::ReconnectPolicy;
use crate::transport::{FrameStream, SseFrame, StreamRequest, StreamTransport};

enum Command {
    Start(StreamId),
    Stop,
}

enum Wake {
    Command(Option<Command>),
    Opened(Result<FrameStream, TransportError>),
    Frame(Option<Result<SseFrame, TransportError>>),
    Retry(u64),
}

type RetryTimer = Option<(Pin<Box<Sleep>>, u64)>;

type PendingOpen = Option<BoxFuture<'static, Result<FrameStream, TransportError>>>;

/// Connection-side state owned by the driver task.
///
/// At most one of `opening` and `connection` is set at a time.
struct Link {
    transport: Arc<dyn StreamTransport>,
    opening: PendingOpen,
    connection: Option<FrameStream>,
    retry: RetryTimer,
}

impl Link {
    fn begin_open(&mut self, request: StreamRequest) {
        // Only one physical connection per logical stream.
        self.connection = None;
        let transport = self.transport.clone();
        self.opening = Some(Box::pin(async move { transport.open(request).await }));
    }

    fn close(&mut self) {
        self.opening = None;
        self.connection = None;
    }
}

/// Handle to a running stream consumer task.
///
/// Dropping every handle (or calling [`StreamHandle::shutdown`]) closes the
/// connection and ends the task.
pub struct StreamHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConsumerState>,
    task: JoinHandle<()>,
}

impl StreamHandle {
    /// Spawns the consumer task on the current tokio runtime, inside the
    /// caller's current span.
    pub fn spawn(transport: Arc<dyn StreamTransport>, policy: ReconnectPolicy) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state) = watch::channel(ConsumerState::default());
        let task = tokio::spawn(
            drive(transport, StreamConsumer::new(policy), command_rx, state_tx).in_current_span(),
        );
        Self {
            commands,
            state,
            task,
        }
    }

    /// Starts (or keeps) consuming `stream_id`. See [`StreamConsumer::start`].
    ///
    /// Fails with [`PipelineError::ConsumerGone`] once the task has exited.
    pub fn start(&self, stream_id: impl Into<StreamId>) -> Result<(), PipelineError> {
        self.send(Command::Start(stream_id.into()))
    }

    /// Stops the current stream and cancels any pending reconnect.
    pub fn stop(&self) -> Result<(), PipelineError> {
        self.send(Command::Stop)
    }

    fn send(&self, command: Command) -> Result<(), PipelineError> {
        self.commands.send(command).map_err(|_| {
            warn!("stream consumer task is gone; command dropped");
            PipelineError::ConsumerGone
        })
    }

    /// Latest published state.
    pub fn state(&self) -> ConsumerState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConsumerState> {
        self.state.clone()
    }

    /// Stops the stream and waits for the task to exit.
    pub async fn shutdown(self) {
        let Self { commands, task, .. } = self;
        let _ = commands.send(Command::Stop);
        drop(commands);
        let _ = task.await;
    }
}

async fn drive(
    transport: Arc<dyn StreamTransport>,
    mut consumer: StreamConsumer,
    mut commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConsumerState>,
) {
    let mut link = Link {
        transport,
        opening: None,
        connection: None,
        retry: None,
    };

    loop {
        // Commands win over everything else, so a stop or a new start is
        // never stuck behind a slow open.
        let wake = tokio::select! {
            biased;
            cmd = commands.recv() => Wake::Command(cmd),
            generation = retry_due(&mut link.retry) => Wake::Retry(generation),
            opened = open_done(&mut link.opening) => Wake::Opened(opened),
            next = next_frame(&mut link.connection) => Wake::Frame(next),
        };

        let directives = match wake {
            Wake::Command(Some(Command::Start(stream_id))) => consumer.start(stream_id),
            Wake::Command(Some(Command::Stop)) => consumer.stop(),
            Wake::Command(None) => {
                consumer.stop();
                link.close();
                state_tx.send_replace(consumer.state().clone());
                debug!("stream handle dropped; consumer task exiting");
                return;
            }
            Wake::Retry(generation) => {
                link.retry = None;
                consumer.handle_event(TransportEvent::ReconnectDue { generation })
            }
            Wake::Opened(Ok(stream)) => {
                link.opening = None;
                link.connection = Some(stream);
                consumer.handle_event(TransportEvent::Opened)
            }
            Wake::Opened(Err(err)) => {
                link.opening = None;
                consumer.handle_event(TransportEvent::Failed(err))
            }
            Wake::Frame(Some(Ok(frame))) => consumer.handle_event(TransportEvent::Frame(frame)),
            Wake::Frame(Some(Err(err))) => {
                link.connection = None;
                consumer.handle_event(TransportEvent::Failed(err))
            }
            Wake::Frame(None) => {
                link.connection = None;
                match consumer.state().stream_id.clone() {
                    Some(stream_id) => consumer
                        .handle_event(TransportEvent::Failed(TransportError::Closed { stream_id })),
                    None => Vec::new(),
                }
            }
        };

        apply_directives(&mut link, directives);
        state_tx.send_replace(consumer.state().clone());
    }
}

fn apply_directives(link: &mut Link, directives: Vec<Directive>) {
    for directive in directives {
        match directive {
            Directive::Open(request) => link.begin_open(request),
            Directive::Close => link.close(),
            Directive::ScheduleReconnect {
                delay,
                attempt,
                generation,
            } => {
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    generation,
                    "reconnect timer armed"
                );
                link.retry = Some((Box::pin(tokio::time::sleep(delay)), generation));
            }
            Directive::CancelReconnect => {
                link.retry = None;
            }
        }
    }
}

async fn open_done(opening: &mut PendingOpen) -> Result<FrameStream, TransportError> {
    match opening {
        Some(open) => open.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_frame(
    connection: &mut Option<FrameStream>,
) -> Option<Result<SseFrame, TransportError>> {
    match connection {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

async fn retry_due(retry: &mut RetryTimer) -> u64 {
    match retry {
        Some((sleep, generation)) => {
            sleep.as_mut().await;
            *generation
        }
        None => std::future::pending().await,
    }
}
