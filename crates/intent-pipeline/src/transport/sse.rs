//! Incremental `text/event-stream` decoder.

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseFrame {
    /// Value of the last `id:` line, used as the resumption token.
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: String,
}

/// Default cap on bytes buffered for one frame that has not been terminated.
pub const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// The peer sent more than the configured limit without a frame delimiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event frame exceeds {limit} bytes without a delimiter")]
pub struct FrameTooLarge {
    pub limit: usize,
}

/// Accumulates raw bytes and yields complete frames.
///
/// Chunks may split a frame (or a UTF-8 sequence) anywhere; bytes are only
/// interpreted once a frame delimiter has arrived.
pub struct SseDecoder {
    buf: Vec<u8>,
    /// Offset in `buf` where the delimiter search resumes.
    scanned: usize,
    max_frame_bytes: usize,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_limit(MAX_FRAME_BYTES)
    }
}

impl SseDecoder {
    pub fn with_limit(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            scanned: 0,
            max_frame_bytes,
        }
    }

    /// Appends `chunk` and returns every frame it completed.
    ///
    /// Fails once the unterminated tail grows past the limit. The buffered
    /// bytes are discarded and the caller should drop the connection.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Result<Vec<SseFrame>, FrameTooLarge> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        let mut consumed = 0;
        let mut from = self.scanned;
        while let Some((idx, delim_len)) = find_frame_delimiter(&self.buf, from) {
            if let Some(frame) = parse_sse_frame(&self.buf[consumed..idx]) {
                frames.push(frame);
            }
            consumed = idx + delim_len;
            from = consumed;
        }
        self.buf.drain(..consumed);
        // A delimiter may straddle the next chunk boundary.
        self.scanned = self.buf.len().saturating_sub(3);

        if self.buf.len() > self.max_frame_bytes {
            self.buf = Vec::new();
            self.scanned = 0;
            return Err(FrameTooLarge {
                limit: self.max_frame_bytes,
            });
        }
        Ok(frames)
    }

    /// Flushes a trailing frame that was not followed by a blank line.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        self.scanned = 0;
        parse_sse_frame(&rest)
    }
}

fn find_frame_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if i + 3 < buf.len()
            && buf[i] == b'\r'
            && buf[i + 1] == b'\n'
            && buf[i + 2] == b'\r'
            && buf[i + 3] == b'\n'
        {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}

fn field_value(rest: &str) -> &str {
    rest.strip_prefix(' ').unwrap_or(rest)
}

fn parse_sse_frame(bytes: &[u8]) -> Option<SseFrame> {
    if bytes.is_empty() {
        return None;
    }
    let text = String::from_utf8_lossy(bytes);
    let mut id: Option<String> = None;
    let mut event: Option<String> = None;
    let mut data_lines: Vec<&str> = Vec::new();
    for raw_line in text.split('\n') {
        let line = raw_line.trim_end_matches('\r');
        if line.is_empty() || line.starts_with(':') {
            continue;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(field_value(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(field_value(rest).to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            // An id containing NUL must be ignored per the SSE processing model.
            let value = field_value(rest);
            if !value.contains('\0') {
                id = Some(value.to_string());
            }
        }
        // `retry:` and unknown fields are ignored; reconnect timing is client policy.
    }
    if id.is_none() && event.is_none() && data_lines.is_empty() {
        return None;
    }
    Some(SseFrame {
        id: id.filter(|v| !v.is_empty()),
        event,
        data: data_lines.join("\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_handles_partial_chunk_boundaries() {
        let mut decoder = SseDecoder::default();
        let part1 = b"id: 7\nevent: progress\ndata: {\"type\":\"token_ready\",\"process";
        let part2 = b"edTokens\":2}\n\n";
        assert!(decoder.push_chunk(part1).expect("decode").is_empty());
        let frames = decoder.push_chunk(part2).expect("decode");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].id.as_deref(), Some("7"));
        assert_eq!(frames[0].event.as_deref(), Some("progress"));
        assert_eq!(frames[0].data, r#"{"type":"token_ready","processedTokens":2}"#);
    }

    #[test]
    fn decoder_splits_crlf_frames_and_skips_comments() {
        let mut decoder = SseDecoder::default();
        let frames = decoder
            .push_chunk(
                b": keep-alive\r\n\r\nid: a\r\ndata: one\r\n\r\nretry: 5000\r\ndata: two\r\ndata: lines\r\n\r\n",
            )
            .expect("decode");
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].id.as_deref(), Some("a"));
        assert_eq!(frames[0].data, "one");
        assert_eq!(frames[1].id, None);
        assert_eq!(frames[1].data, "two\nlines");
    }

    #[test]
    fn finish_flushes_unterminated_frame() {
        let mut decoder = SseDecoder::default();
        assert!(decoder.push_chunk(b"id: 9\ndata: tail").expect("decode").is_empty());
        let frame = decoder.finish().expect("trailing frame");
        assert_eq!(frame.id.as_deref(), Some("9"));
        assert_eq!(frame.data, "tail");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn delimiters_split_across_single_byte_chunks() {
        let input = b"id: 1\r\ndata: a\r\n\r\nid: 2\ndata: b\n\n";
        let mut decoder = SseDecoder::default();
        let mut frames = Vec::new();
        for byte in input {
            frames.extend(decoder.push_chunk(std::slice::from_ref(byte)).expect("decode"));
        }
        let ids: Vec<_> = frames.iter().map(|f| f.id.as_deref()).collect();
        assert_eq!(ids, vec![Some("1"), Some("2")]);
        assert_eq!(frames[1].data, "b");
        assert!(decoder.finish().is_none());
    }

    #[test]
    fn unterminated_frame_past_the_limit_is_rejected() {
        let mut decoder = SseDecoder::with_limit(64);
        assert!(decoder.push_chunk(b"data: ").expect("decode").is_empty());
        let err = decoder.push_chunk(&[b'x'; 80]).expect_err("over limit");
        assert_eq!(err, FrameTooLarge { limit: 64 });

        // The oversized tail is gone; later frames decode normally.
        let frames = decoder.push_chunk(b"\n\ndata: ok\n\n").expect("decode");
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, "ok");
    }
}
