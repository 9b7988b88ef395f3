// Dispatch event wire format.
// SSE-style frames on the way out; an incremental decoder for chunked responses on the way in.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{DispatchEvent, DispatchResult, Progress};

const PROGRESS: &str = "progress";
const RESULT: &str = "result";
const ERROR: &str = "error";
const DATA_PREFIX: &[u8] = b"data:";

#[derive(Debug, Serialize, Deserialize)]
struct ErrorPayload {
    message: String,
}

/// Encode one event as `event: <name>\ndata: <json>\n\n`.
pub fn encode(event: &DispatchEvent) -> Bytes {
    let (name, data) = match event {
        DispatchEvent::Progress(progress) => (PROGRESS, serde_json::to_string(progress)),
        DispatchEvent::Final(results) => (RESULT, serde_json::to_string(results)),
        DispatchEvent::Failed(message) => (
            ERROR,
            serde_json::to_string(&ErrorPayload {
                message: message.clone(),
            }),
        ),
    };

    let frame = match data {
        Ok(data) => format!("event: {name}\ndata: {data}\n\n"),
        Err(e) => format!("event: {ERROR}\ndata: {{\"message\":\"{e}\"}}\n\n"),
    };
    Bytes::from(frame)
}

/// Decoder state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderState {
    AwaitingEvent,
    BufferingProgress,
    BufferingError,
    BufferingResult,
    Done,
}

/// Incremental decoder for a dispatch event stream.
///
/// Chunks may split frames, lines and UTF-8 sequences anywhere. Progress and
/// error frames end at a blank line. The result payload is re-parsed after
/// every chunk and the decoder finishes on the first successful parse.
#[derive(Debug)]
pub struct StreamDecoder {
    state: DecoderState,
    pending: Vec<u8>,
    payload: Vec<u8>,
    prefix_stripped: bool,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self {
            state: DecoderState::AwaitingEvent,
            pending: Vec::new(),
            payload: Vec::new(),
            prefix_stripped: false,
        }
    }

    pub fn state(&self) -> DecoderState {
        self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == DecoderState::Done
    }

    /// Feed one chunk and return every event it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<DispatchEvent> {
        let mut events = Vec::new();
        if self.is_done() {
            return events;
        }
        self.pending.extend_from_slice(chunk);

        loop {
            match self.state {
                DecoderState::Done => break,
                DecoderState::AwaitingEvent => {
                    let Some(line) = self.take_line() else { break };
                    let line = String::from_utf8_lossy(&line);
                    if let Some(name) = line.strip_prefix("event:") {
                        self.payload.clear();
                        self.prefix_stripped = false;
                        self.state = match name.trim() {
                            PROGRESS => DecoderState::BufferingProgress,
                            RESULT => DecoderState::BufferingResult,
                            ERROR => DecoderState::BufferingError,
                            other => {
                                warn!(event = other, "ignoring unknown dispatch event");
                                DecoderState::AwaitingEvent
                            }
                        };
                    }
                }
                DecoderState::BufferingProgress | DecoderState::BufferingError => {
                    let Some(line) = self.take_line() else { break };
                    if line.is_empty() {
                        if let Some(event) = self.finish_frame() {
                            events.push(event);
                        }
                        if !self.is_done() {
                            self.state = DecoderState::AwaitingEvent;
                        }
                    } else if let Some(data) = line.strip_prefix(DATA_PREFIX) {
                        if !self.payload.is_empty() {
                            self.payload.push(b'\n');
                        }
                        self.payload.extend_from_slice(data);
                    }
                }
                DecoderState::BufferingResult => {
                    self.payload.append(&mut self.pending);
                    if !self.prefix_stripped && !self.strip_result_prefix() {
                        break;
                    }
                    // Only the first JSON value counts; bytes after it belong to later frames.
                    let mut values = serde_json::Deserializer::from_slice(&self.payload)
                        .into_iter::<Vec<DispatchResult>>();
                    match values.next() {
                        Some(Ok(results)) => {
                            self.payload.clear();
                            self.state = DecoderState::Done;
                            events.push(DispatchEvent::Final(results));
                        }
                        // Incomplete so far; wait for the next chunk.
                        Some(Err(_)) | None => break,
                    }
                }
            }
        }

        events
    }

    /// Pop one `\n`-terminated line (without the terminator or a trailing `\r`).
    fn take_line(&mut self) -> Option<Vec<u8>> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(line)
    }

    /// Drop the leading `data:` of the result payload once enough bytes are in.
    fn strip_result_prefix(&mut self) -> bool {
        let start = self
            .payload
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.payload.len());
        let rest = &self.payload[start..];

        if rest.len() < DATA_PREFIX.len() {
            return false;
        }
        if rest.starts_with(DATA_PREFIX) {
            self.payload.drain(..start + DATA_PREFIX.len());
        }
        self.prefix_stripped = true;
        true
    }

    fn finish_frame(&mut self) -> Option<DispatchEvent> {
        let payload = std::mem::take(&mut self.payload);
        match self.state {
            DecoderState::BufferingProgress => match serde_json::from_slice::<Progress>(&payload) {
                Ok(progress) => Some(DispatchEvent::Progress(progress)),
                Err(e) => {
                    warn!(error = %e, "skipping malformed progress frame");
                    None
                }
            },
            DecoderState::BufferingError => {
                let message = serde_json::from_slice::<ErrorPayload>(&payload)
                    .map(|p| p.message)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&payload).trim().to_string());
                self.state = DecoderState::Done;
                Some(DispatchEvent::Failed(message))
            }
            _ => None,
        }
    }
}
