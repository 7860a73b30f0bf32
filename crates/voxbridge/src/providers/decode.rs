use serde_json::Value;

const DATA_PREFIX: &str = "data:";
const DONE_SENTINEL: &str = "[DONE]";

/// One decoded event from a streaming completion response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// An incremental fragment of the reply text
    Delta(String),
    /// The upstream stream has ended; no further deltas will arrive
    Done,
}

/// Incremental decoder for the upstream event stream.
///
/// Chunks arrive as raw bytes and may split anywhere, including inside a
/// multi-byte character, so an incomplete UTF-8 tail is carried separately
/// from the textual residual. Records are separated by a blank line (LF or
/// CRLF) and may span chunk boundaries. Individual records that fail to
/// parse are skipped; a corrupt record must never abort an otherwise
/// healthy stream.
#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    residual: String,
    done: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk of bytes from the transport, returning every event
    /// completed by it. Incomplete trailing bytes and record fragments are
    /// retained for the next chunk.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.pending.extend_from_slice(chunk);
        self.drain_pending();
        while let Some(record) = self.next_record() {
            if self.process_record(record.trim_end(), &mut events) {
                self.done = true;
                break;
            }
        }
        events
    }

    /// The transport reported end of stream. A non-empty residual gets one
    /// final parse attempt before the end signal.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.done {
            return events;
        }
        self.done = true;
        // whatever bytes are left can no longer be completed
        let pending = std::mem::take(&mut self.pending);
        self.residual.push_str(&String::from_utf8_lossy(&pending));
        let residual = std::mem::take(&mut self.residual);
        let record = residual.trim();
        if !record.is_empty() && self.process_record(record, &mut events) {
            // the sentinel arrived without its trailing delimiter
            return events;
        }
        events.push(StreamEvent::Done);
        events
    }

    /// Move every decodable byte into the textual residual, keeping only an
    /// incomplete trailing character pending. Invalid sequences are replaced
    /// rather than stalling the stream.
    fn drain_pending(&mut self) {
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    self.residual.push_str(text);
                    self.pending.clear();
                    return;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    self.residual
                        .push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        Some(invalid) => {
                            self.residual.push('\u{FFFD}');
                            self.pending.drain(..valid + invalid);
                        }
                        None => {
                            // a character split across chunks; wait for the rest
                            self.pending.drain(..valid);
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Pop the next complete record off the residual, if one is delimited.
    fn next_record(&mut self) -> Option<String> {
        let (pos, delimiter) = match (self.residual.find("\n\n"), self.residual.find("\r\n\r\n")) {
            (Some(lf), Some(crlf)) if lf < crlf => (lf, 2),
            (_, Some(crlf)) => (crlf, 4),
            (Some(lf), None) => (lf, 2),
            (None, None) => return None,
        };
        let record: String = self.residual.drain(..pos + delimiter).collect();
        Some(record)
    }

    /// Handle one complete record. Returns true when the end-of-stream
    /// sentinel was seen.
    fn process_record(&self, record: &str, events: &mut Vec<StreamEvent>) -> bool {
        for line in record.lines() {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            let payload = payload.trim();
            if payload == DONE_SENTINEL {
                events.push(StreamEvent::Done);
                return true;
            }
            match serde_json::from_str::<Value>(payload) {
                Ok(value) => {
                    if let Some(content) = delta_content(&value) {
                        if !content.is_empty() {
                            events.push(StreamEvent::Delta(content.to_string()));
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!("skipping malformed stream record: {}", err);
                }
            }
        }
        false
    }
}

/// Content increment carried by a parsed record, if any. Role-only and
/// metadata-only records have no content field.
fn delta_content(value: &Value) -> Option<&str> {
    value
        .get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
}
