//! Resumable stream consumer.
//!
//! [`StreamConsumer`] is a synchronous state machine: every input goes through
//! [`StreamConsumer::handle_event`] (or `start`/`stop`) and comes back as a
//! list of [`Directive`]s for the caller to carry out. It never touches a
//! socket or a timer itself, so the whole transition table runs in plain unit
//! tests; [`crate::driver`] executes the directives against a real transport.

use std::collections::HashSet;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::errors::TransportError;
use crate::event::{ReceivedEvent, StreamEvent};
use crate::model::{PreparedTransaction, StreamId};
use crate::policy::ReconnectPolicy;
use crate::transport::{SseFrame, StreamRequest};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Observable state of one logical stream.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct ConsumerState {
    pub stream_id: Option<StreamId>,
    pub connection_status: ConnectionStatus,
    pub is_complete: bool,
    pub has_error: bool,
    pub error_message: Option<String>,
    /// Set once the stream can no longer make progress (reconnect limit hit or
    /// backend reported an error). No further reconnects happen.
    pub is_halted: bool,
    /// Append-only history of decoded events in arrival order.
    pub events: Vec<ReceivedEvent>,
    pub last_event_id: Option<String>,
    pub reconnect_attempts: u32,
    pub processed_count: u64,
    pub total_count: u64,
    /// Transactions from the terminal `complete` event.
    pub transactions: Option<Vec<PreparedTransaction>>,
    pub parse_failures: u32,
    pub last_parse_error: Option<String>,
}

impl ConsumerState {
    fn for_stream(stream_id: Option<StreamId>) -> Self {
        Self {
            stream_id,
            ..Self::default()
        }
    }

    /// `processed_count / total_count` as a percentage, 0 while the total is unknown.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_count == 0 {
            return 0.0;
        }
        (self.processed_count as f64 * 100.0 / self.total_count as f64).min(100.0)
    }

    /// Complete or halted: nothing more will happen on this stream.
    pub fn is_terminal(&self) -> bool {
        self.is_complete || self.is_halted
    }
}

/// Input to the consumer state machine.
#[derive(Clone, Debug, PartialEq)]
pub enum TransportEvent {
    /// The connection requested by the last `Directive::Open` is established.
    Opened,
    /// One raw frame arrived on the open connection.
    Frame(SseFrame),
    /// Opening or reading the connection failed, or it closed early.
    Failed(TransportError),
    /// A timer scheduled by `Directive::ScheduleReconnect` fired.
    ReconnectDue { generation: u64 },
}

/// Side effect requested by the consumer.
#[derive(Clone, Debug, PartialEq)]
pub enum Directive {
    /// Close any existing connection, then open this one.
    Open(StreamRequest),
    /// Close the current connection.
    Close,
    /// Deliver `TransportEvent::ReconnectDue { generation }` after `delay`.
    ScheduleReconnect {
        delay: Duration,
        attempt: u32,
        generation: u64,
    },
    /// Drop any pending reconnect timer.
    CancelReconnect,
}

pub struct StreamConsumer {
    policy: ReconnectPolicy,
    state: ConsumerState,
    seen_event_ids: HashSet<String>,
    // Bumped on every start/stop so timers from an earlier stream are ignored.
    generation: u64,
    transport_open: bool,
    reconnect_pending: bool,
}

impl StreamConsumer {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConsumerState::default(),
            seen_event_ids: HashSet::new(),
            generation: 0,
            transport_open: false,
            reconnect_pending: false,
        }
    }

    pub fn state(&self) -> &ConsumerState {
        &self.state
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// True while a connection is open or a reconnect is scheduled.
    pub fn is_active(&self) -> bool {
        self.transport_open || self.reconnect_pending
    }

    /// Starts consuming `stream_id`.
    ///
    /// A no-op while the same stream is active or already complete. Any other
    /// stream is torn down and its state discarded first.
    pub fn start(&mut self, stream_id: StreamId) -> Vec<Directive> {
        if self.state.stream_id.as_ref() == Some(&stream_id)
            && (self.is_active() || self.state.is_complete)
        {
            debug!(stream_id = %stream_id, "stream already started");
            return Vec::new();
        }

        let mut directives = self.teardown();
        self.reset(Some(stream_id.clone()));
        info!(stream_id = %stream_id, "starting intent stream");
        self.state.connection_status = ConnectionStatus::Connecting;
        self.transport_open = true;
        directives.push(Directive::Open(StreamRequest::new(stream_id)));
        directives
    }

    /// Tears down the connection and forgets the stream. Safe to repeat.
    pub fn stop(&mut self) -> Vec<Directive> {
        let directives = self.teardown();
        if let Some(stream_id) = &self.state.stream_id {
            info!(stream_id = %stream_id, "stopping intent stream");
        }
        self.reset(None);
        directives
    }

    pub fn handle_event(&mut self, event: TransportEvent) -> Vec<Directive> {
        match event {
            TransportEvent::Opened => {
                self.on_opened();
                Vec::new()
            }
            TransportEvent::Frame(frame) => self.on_frame(frame),
            TransportEvent::Failed(err) => self.on_transport_error(err),
            TransportEvent::ReconnectDue { generation } => self.on_reconnect_due(generation),
        }
    }

    fn on_opened(&mut self) {
        if !self.transport_open || self.state.is_terminal() {
            return;
        }
        self.state.connection_status = ConnectionStatus::Connected;
        self.state.has_error = false;
        self.state.error_message = None;
        info!(
            stream_id = ?self.state.stream_id,
            resume_from = ?self.state.last_event_id,
            reconnect_attempts = self.state.reconnect_attempts,
            "intent stream connected"
        );
    }

    fn on_frame(&mut self, frame: SseFrame) -> Vec<Directive> {
        if !self.transport_open || self.state.is_terminal() {
            return Vec::new();
        }

        if let Some(id) = frame.id.as_deref() {
            if !self.seen_event_ids.insert(id.to_string()) {
                debug!(event_id = id, "skipping already processed event");
                return Vec::new();
            }
            self.state.last_event_id = Some(id.to_string());
        }

        if frame.data.trim().is_empty() {
            return Vec::new();
        }

        let event = match StreamEvent::decode(&frame.data) {
            Ok(event) => event,
            Err(err) => {
                self.state.parse_failures = self.state.parse_failures.saturating_add(1);
                self.state.last_parse_error = Some(err.to_string());
                warn!(event_id = ?frame.id, error = %err, "ignoring undecodable stream event");
                return Vec::new();
            }
        };

        debug!(event_id = ?frame.id, kind = event.kind(), "stream event");
        self.apply(&event);
        let terminal = event.is_terminal();
        self.state.events.push(ReceivedEvent {
            transport_event_id: frame.id,
            event,
        });

        if terminal {
            self.state.connection_status = ConnectionStatus::Disconnected;
            return self.teardown();
        }
        Vec::new()
    }

    fn apply(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Connected { total_tokens, .. } => {
                self.state.total_count = *total_tokens;
            }
            StreamEvent::TokenReady {
                processed_tokens,
                total_tokens,
                ..
            }
            | StreamEvent::TokenFailed {
                processed_tokens,
                total_tokens,
                ..
            } => {
                self.record_progress(Some(*processed_tokens), *total_tokens);
            }
            StreamEvent::Complete {
                transactions,
                processed_tokens,
                total_tokens,
            } => {
                self.record_progress(*processed_tokens, *total_tokens);
                self.state.is_complete = true;
                self.state.transactions = Some(transactions.clone());
                info!(
                    stream_id = ?self.state.stream_id,
                    transactions = transactions.len(),
                    "intent stream complete"
                );
            }
            StreamEvent::StreamComplete => {
                self.state.is_complete = true;
                info!(stream_id = ?self.state.stream_id, "intent stream finished");
            }
            StreamEvent::Error { error: message } => {
                self.state.has_error = true;
                self.state.is_halted = true;
                self.state.error_message = Some(message.clone());
                error!(stream_id = ?self.state.stream_id, error = %message, "backend reported intent failure");
            }
        }
    }

    // The server is authoritative for counts, but a late or replayed event
    // must never move progress backwards.
    fn record_progress(&mut self, processed: Option<u64>, total: Option<u64>) {
        if let Some(processed) = processed {
            self.state.processed_count = self.state.processed_count.max(processed);
        }
        if let Some(total) = total
            && self.state.total_count == 0
        {
            self.state.total_count = total;
        }
    }

    fn on_transport_error(&mut self, err: TransportError) -> Vec<Directive> {
        if self.state.stream_id.is_none() || self.state.is_terminal() {
            debug!(error = %err, "ignoring transport error on inactive stream");
            return Vec::new();
        }
        if self.reconnect_pending {
            return Vec::new();
        }

        let mut directives = Vec::new();
        if self.transport_open {
            self.transport_open = false;
            directives.push(Directive::Close);
        }
        self.state.connection_status = ConnectionStatus::Disconnected;
        self.state.has_error = true;

        let attempts = self.state.reconnect_attempts;
        if !self.policy.can_retry(attempts) {
            self.state.is_halted = true;
            self.state.error_message = Some(format!(
                "stream lost after {attempts} reconnect attempts: {err}"
            ));
            error!(stream_id = ?self.state.stream_id, attempts, error = %err, "giving up on intent stream");
            return directives;
        }

        let delay = self.policy.backoff_duration(attempts);
        self.state.reconnect_attempts = attempts + 1;
        self.state.error_message = Some(err.to_string());
        self.reconnect_pending = true;
        info!(
            stream_id = ?self.state.stream_id,
            attempt = attempts + 1,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "scheduling stream reconnect"
        );
        directives.push(Directive::ScheduleReconnect {
            delay,
            attempt: attempts + 1,
            generation: self.generation,
        });
        directives
    }

    fn on_reconnect_due(&mut self, generation: u64) -> Vec<Directive> {
        if generation != self.generation || !self.reconnect_pending {
            debug!(generation, current = self.generation, "ignoring stale reconnect timer");
            return Vec::new();
        }
        self.reconnect_pending = false;
        let Some(stream_id) = self.state.stream_id.clone() else {
            return Vec::new();
        };
        if self.state.is_terminal() {
            return Vec::new();
        }
        self.state.connection_status = ConnectionStatus::Connecting;
        self.transport_open = true;
        vec![Directive::Open(
            StreamRequest::new(stream_id).resume_from(self.state.last_event_id.clone()),
        )]
    }

    fn teardown(&mut self) -> Vec<Directive> {
        let mut directives = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            directives.push(Directive::CancelReconnect);
        }
        if self.transport_open {
            self.transport_open = false;
            directives.push(Directive::Close);
        }
        directives
    }

    fn reset(&mut self, stream_id: Option<StreamId>) {
        self.generation = self.generation.wrapping_add(1);
        self.state = ConsumerState::for_stream(stream_id);
        self.seen_event_ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(id: &str, data: &str) -> TransportEvent {
        TransportEvent::Frame(SseFrame {
            id: Some(id.to_string()),
            event: None,
            data: data.to_string(),
        })
    }

    fn ready(id: &str, processed: u64) -> TransportEvent {
        frame(
            id,
            &format!(r#"{{"type":"token_ready","processedTokens":{processed}}}"#),
        )
    }

    fn drop_connection() -> TransportEvent {
        TransportEvent::Failed(TransportError::Closed {
            stream_id: StreamId::new("intent-1"),
        })
    }

    fn started() -> StreamConsumer {
        let mut consumer = StreamConsumer::new(ReconnectPolicy::default());
        consumer.start(StreamId::new("intent-1"));
        consumer.handle_event(TransportEvent::Opened);
        consumer
    }

    fn scheduled_delay(directives: &[Directive]) -> Option<u128> {
        directives.iter().find_map(|d| match d {
            Directive::ScheduleReconnect { delay, .. } => Some(delay.as_millis()),
            _ => None,
        })
    }

    fn fire_timer(consumer: &mut StreamConsumer) -> Vec<Directive> {
        let generation = consumer.generation();
        consumer.handle_event(TransportEvent::ReconnectDue { generation })
    }

    #[test]
    fn start_opens_fresh_connection_and_is_idempotent() {
        let mut consumer = StreamConsumer::new(ReconnectPolicy::default());
        let directives = consumer.start(StreamId::new("intent-1"));
        assert_eq!(
            directives,
            vec![Directive::Open(StreamRequest::new(StreamId::new("intent-1")))]
        );
        assert_eq!(
            consumer.state().connection_status,
            ConnectionStatus::Connecting
        );

        consumer.handle_event(TransportEvent::Opened);
        assert!(consumer.start(StreamId::new("intent-1")).is_empty());
        assert_eq!(
            consumer.state().connection_status,
            ConnectionStatus::Connected
        );
    }

    #[test]
    fn starting_another_stream_closes_previous_and_resets_state() {
        let mut consumer = started();
        consumer.handle_event(ready("1", 3));

        let directives = consumer.start(StreamId::new("intent-2"));
        assert_eq!(
            directives,
            vec![
                Directive::Close,
                Directive::Open(StreamRequest::new(StreamId::new("intent-2"))),
            ]
        );
        let state = consumer.state();
        assert_eq!(state.stream_id, Some(StreamId::new("intent-2")));
        assert!(state.events.is_empty());
        assert_eq!(state.last_event_id, None);
        assert_eq!(state.processed_count, 0);
    }

    #[test]
    fn progress_follows_server_counts_and_never_decreases() {
        let mut consumer = started();
        consumer.handle_event(frame("c", r#"{"type":"connected","totalTokens":10}"#));
        let mut observed = Vec::new();
        for (id, processed) in [("1", 2), ("2", 6), ("3", 4), ("4", 8)] {
            consumer.handle_event(ready(id, processed));
            observed.push(consumer.state().processed_count);
        }
        assert_eq!(observed, vec![2, 6, 6, 8]);
        assert_eq!(consumer.state().progress_percentage(), 80.0);
        assert_eq!(consumer.state().events.len(), 5);
    }

    #[test]
    fn progress_percentage_is_zero_without_total() {
        let mut consumer = started();
        consumer.handle_event(ready("1", 3));
        assert_eq!(consumer.state().progress_percentage(), 0.0);
    }

    #[test]
    fn parse_failures_are_recorded_but_do_not_end_the_stream() {
        let mut consumer = started();
        let directives = consumer.handle_event(frame("1", "{broken"));
        assert!(directives.is_empty());
        assert_eq!(consumer.state().parse_failures, 1);
        assert!(consumer.state().last_parse_error.is_some());
        assert!(!consumer.state().has_error);
        assert_eq!(consumer.state().last_event_id.as_deref(), Some("1"));

        consumer.handle_event(ready("2", 1));
        assert_eq!(consumer.state().processed_count, 1);
        assert_eq!(consumer.state().events.len(), 1);
    }

    #[test]
    fn duplicate_transport_ids_are_skipped() {
        let mut consumer = started();
        consumer.handle_event(ready("1", 1));
        consumer.handle_event(ready("1", 1));
        assert_eq!(consumer.state().events.len(), 1);
    }

    #[test]
    fn backoff_doubles_and_resumes_from_last_event_id() {
        let mut consumer = started();
        consumer.handle_event(ready("41", 1));

        let first = consumer.handle_event(drop_connection());
        assert_eq!(first[0], Directive::Close);
        assert_eq!(scheduled_delay(&first), Some(1_000));
        assert!(consumer.state().has_error);
        assert_eq!(
            consumer.state().connection_status,
            ConnectionStatus::Disconnected
        );

        let reopen = fire_timer(&mut consumer);
        assert_eq!(
            reopen,
            vec![Directive::Open(
                StreamRequest::new(StreamId::new("intent-1")).resume_from(Some("41".into()))
            )]
        );

        let second = consumer.handle_event(drop_connection());
        assert_eq!(scheduled_delay(&second), Some(2_000));
        fire_timer(&mut consumer);
        consumer.handle_event(TransportEvent::Opened);

        let state = consumer.state();
        assert_eq!(state.reconnect_attempts, 2);
        assert_eq!(state.connection_status, ConnectionStatus::Connected);
        assert!(!state.has_error);
    }

    #[test]
    fn reconnects_stop_after_the_attempt_cap() {
        let mut consumer = started();
        let mut delays = Vec::new();
        let mut attempts = Vec::new();
        for _ in 0..5 {
            let directives = consumer.handle_event(drop_connection());
            delays.push(scheduled_delay(&directives).expect("reconnect scheduled"));
            attempts.extend(directives.iter().filter_map(|d| match d {
                Directive::ScheduleReconnect { attempt, .. } => Some(*attempt),
                _ => None,
            }));
            fire_timer(&mut consumer);
        }
        assert_eq!(delays, vec![1_000, 2_000, 4_000, 8_000, 16_000]);
        assert_eq!(attempts, vec![1, 2, 3, 4, 5]);

        let last = consumer.handle_event(drop_connection());
        assert_eq!(last, vec![Directive::Close]);
        let state = consumer.state();
        assert!(state.is_halted);
        assert!(state.has_error);
        assert_eq!(state.reconnect_attempts, 5);
        assert!(consumer.handle_event(drop_connection()).is_empty());
    }

    #[test]
    fn terminal_event_closes_and_suppresses_reconnects() {
        let mut consumer = started();
        let directives = consumer.handle_event(frame(
            "9",
            r#"{"type":"complete","transactions":[{"to":"0x1111111254eeb25477b68fb85ed929f73a960582","data":"0x"}]}"#,
        ));
        assert_eq!(directives, vec![Directive::Close]);
        let state = consumer.state();
        assert!(state.is_complete);
        assert_eq!(state.connection_status, ConnectionStatus::Disconnected);
        assert_eq!(state.transactions.as_ref().map(Vec::len), Some(1));

        assert!(consumer.handle_event(drop_connection()).is_empty());
        assert_eq!(consumer.state().reconnect_attempts, 0);
        assert!(consumer.start(StreamId::new("intent-1")).is_empty());
    }

    #[test]
    fn completion_with_wide_wei_amount_is_not_dropped() {
        let mut consumer = started();
        consumer.handle_event(frame(
            "9",
            r#"{"type":"complete","transactions":[{"to":"0x1111111254eeb25477b68fb85ed929f73a960582","data":"0x","value":100000000000000000000}]}"#,
        ));
        let state = consumer.state();
        assert!(state.is_complete);
        assert_eq!(state.parse_failures, 0);
        let value = state
            .transactions
            .as_ref()
            .and_then(|txs| txs.first())
            .and_then(|tx| tx.value())
            .map(|q| q.value());
        assert_eq!(value, Some(primitive_types::U256::exp10(20)));
    }

    #[test]
    fn stream_complete_is_terminal_too() {
        let mut consumer = started();
        consumer.handle_event(frame("1", r#"{"type":"stream_complete"}"#));
        assert!(consumer.state().is_complete);
        assert!(consumer.handle_event(drop_connection()).is_empty());
    }

    #[test]
    fn backend_error_event_halts_without_reconnect() {
        let mut consumer = started();
        let directives =
            consumer.handle_event(frame("1", r#"{"type":"error","error":"quote expired"}"#));
        assert_eq!(directives, vec![Directive::Close]);
        let state = consumer.state();
        assert!(state.is_halted);
        assert!(!state.is_complete);
        assert_eq!(state.error_message.as_deref(), Some("quote expired"));
    }

    #[test]
    fn stop_cancels_pending_reconnect_and_is_repeatable() {
        let mut consumer = started();
        consumer.handle_event(ready("5", 1));
        consumer.handle_event(drop_connection());
        let stale_generation = consumer.generation();

        assert_eq!(consumer.stop(), vec![Directive::CancelReconnect]);
        assert!(consumer.stop().is_empty());
        let state = consumer.state();
        assert_eq!(state.reconnect_attempts, 0);
        assert_eq!(state.last_event_id, None);
        assert_eq!(state.stream_id, None);

        let late = consumer.handle_event(TransportEvent::ReconnectDue {
            generation: stale_generation,
        });
        assert!(late.is_empty());
    }

    #[test]
    fn stop_without_start_is_a_noop() {
        let mut consumer = StreamConsumer::new(ReconnectPolicy::default());
        assert!(consumer.stop().is_empty());
        assert!(consumer.handle_event(drop_connection()).is_empty());
    }
}
