//! Stream transport adapter: opens one long-lived event connection per
//! request and yields raw SSE frames.
//!
//! Closing a connection is dropping its [`FrameStream`].

mod http;
pub mod sse;

use std::pin::Pin;

pub use http::HttpSseTransport;
pub use sse::{SseDecoder, SseFrame};

use crate::errors::TransportError;
use crate::model::StreamId;

/// Raw frames from one physical connection. `None` means the server closed it.
pub type FrameStream =
    Pin<Box<dyn futures::Stream<Item = Result<SseFrame, TransportError>> + Send + 'static>>;

/// Parameters for opening one physical connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamRequest {
    pub stream_id: StreamId,
    /// Resume after this transport event id instead of from the beginning.
    pub last_event_id: Option<String>,
}

impl StreamRequest {
    pub fn new(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            last_event_id: None,
        }
    }

    pub fn resume_from(mut self, last_event_id: Option<String>) -> Self {
        self.last_event_id = last_event_id;
        self
    }
}

/// Contract implemented by concrete stream transports.
#[async_trait::async_trait]
pub trait StreamTransport: Send + Sync {
    /// Opens a connection. Returning `Ok` means the transport is open.
    async fn open(&self, request: StreamRequest) -> Result<FrameStream, TransportError>;
}
