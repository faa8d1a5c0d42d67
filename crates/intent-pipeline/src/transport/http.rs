use std::collections::VecDeque;
use std::pin::Pin;

use futures::StreamExt as _;
use futures::stream;
use reqwest::Url;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use tracing::debug;

use super::sse::SseDecoder;
use super::{FrameStream, SseFrame, StreamRequest, StreamTransport};
use crate::config::PipelineConfig;
use crate::errors::{PipelineError, TransportError};
use crate::model::StreamId;

type ByteStream =
    Pin<Box<dyn futures::Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static>>;

/// Server-sent events over HTTP `GET {base_url}/intents/{id}/stream`.
pub struct HttpSseTransport {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpSseTransport {
    pub fn new(config: &PipelineConfig) -> Result<Self, PipelineError> {
        let base_url = Url::parse(config.base_url.trim())
            .map_err(|e| PipelineError::Config(format!("invalid stream base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(PipelineError::Config(format!(
                "stream base url cannot be a base: {base_url}"
            )));
        }
        // No overall request timeout: the stream stays open for the intent's lifetime.
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| PipelineError::Config(format!("failed to build stream client: {e}")))?;
        Ok(Self { client, base_url })
    }

    pub(crate) fn stream_url(&self, request: &StreamRequest) -> Result<Url, TransportError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| TransportError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(["intents", request.stream_id.as_str(), "stream"]);
        if let Some(last_event_id) = request.last_event_id.as_deref() {
            url.query_pairs_mut()
                .append_pair("lastEventId", last_event_id);
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl StreamTransport for HttpSseTransport {
    async fn open(&self, request: StreamRequest) -> Result<FrameStream, TransportError> {
        let url = self.stream_url(&request)?;
        let stream_id = request.stream_id.clone();
        debug!(stream_id = %stream_id, resume_from = ?request.last_event_id, %url, "opening intent stream");

        let mut http_req = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .header(CACHE_CONTROL, "no-cache");
        if let Some(last_event_id) = request.last_event_id.as_deref() {
            http_req = http_req.header("Last-Event-ID", last_event_id);
        }

        let response = http_req
            .send()
            .await
            .map_err(|e| TransportError::connect(stream_id.clone(), e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(TransportError::Status {
                stream_id,
                status: status.as_u16(),
                body,
            });
        }

        let bytes_stream: ByteStream = Box::pin(response.bytes_stream());
        Ok(Box::pin(frame_stream(stream_id, bytes_stream)))
    }
}

fn frame_stream(
    stream_id: StreamId,
    bytes_stream: ByteStream,
) -> impl futures::Stream<Item = Result<SseFrame, TransportError>> + Send {
    struct State {
        stream_id: StreamId,
        bytes_stream: ByteStream,
        decoder: SseDecoder,
        pending: VecDeque<SseFrame>,
        done: bool,
    }

    stream::try_unfold(
        State {
            stream_id,
            bytes_stream,
            decoder: SseDecoder::default(),
            pending: VecDeque::new(),
            done: false,
        },
        |mut state| async move {
            loop {
                if let Some(frame) = state.pending.pop_front() {
                    return Ok(Some((frame, state)));
                }
                if state.done {
                    return Ok(None);
                }

                match state.bytes_stream.next().await {
                    Some(Ok(chunk)) => match state.decoder.push_chunk(&chunk) {
                        Ok(frames) => state.pending.extend(frames),
                        Err(err) => {
                            return Err(TransportError::read(state.stream_id, err.to_string()));
                        }
                    },
                    Some(Err(e)) => {
                        return Err(TransportError::read(state.stream_id, e.to_string()));
                    }
                    None => {
                        state.pending.extend(state.decoder.finish());
                        state.done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt as _;

    fn transport(base: &str) -> HttpSseTransport {
        HttpSseTransport::new(&PipelineConfig::new(base)).expect("transport")
    }

    #[test]
    fn builds_stream_url_with_encoded_id_and_resume_token() {
        let t = transport("https://api.example.com/v1/");
        let url = t
            .stream_url(
                &StreamRequest::new(StreamId::new("intent 42")).resume_from(Some("17".into())),
            )
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.example.com/v1/intents/intent%2042/stream?lastEventId=17"
        );
    }

    #[test]
    fn fresh_stream_url_has_no_query() {
        let t = transport("http://localhost:8080");
        let url = t
            .stream_url(&StreamRequest::new(StreamId::new("abc")))
            .expect("url");
        assert_eq!(url.as_str(), "http://localhost:8080/intents/abc/stream");
    }

    #[test]
    fn rejects_unusable_base_url() {
        assert!(matches!(
            HttpSseTransport::new(&PipelineConfig::new("not a url")),
            Err(PipelineError::Config(_))
        ));
        assert!(matches!(
            HttpSseTransport::new(&PipelineConfig::new("mailto:ops@example.com")),
            Err(PipelineError::Config(_))
        ));
    }

    #[tokio::test]
    async fn frame_stream_decodes_chunks_and_flushes_tail() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"id: 1\ndata: {\"type\":\"conn")),
            Ok(bytes::Bytes::from_static(b"ected\",\"totalTokens\":3}\n\nid: 2\ndata: x")),
        ];
        let frames: Vec<_> = frame_stream(StreamId::new("s"), Box::pin(stream::iter(chunks)))
            .collect()
            .await;
        assert_eq!(frames.len(), 2);
        let first = frames[0].as_ref().expect("first frame");
        assert_eq!(first.id.as_deref(), Some("1"));
        let second = frames[1].as_ref().expect("second frame");
        assert_eq!(second.data, "x");
    }

    #[tokio::test]
    async fn oversized_frame_fails_the_connection() {
        let chunks: Vec<Result<bytes::Bytes, reqwest::Error>> = (0..20)
            .map(|_| Ok(bytes::Bytes::from(vec![b'a'; 64 * 1024])))
            .collect();
        let frames: Vec<_> = frame_stream(StreamId::new("s"), Box::pin(stream::iter(chunks)))
            .collect()
            .await;
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            Err(TransportError::Read { message, .. }) if message.contains("without a delimiter")
        ));
    }
}
