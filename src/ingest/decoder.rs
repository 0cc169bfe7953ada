//! Incremental decoder for the backend event stream.
//!
//! The stream is server-sent-event shaped: events are separated by a blank
//! line and each `data:` line carries one JSON record. Bytes arrive in
//! arbitrary chunks, so both UTF-8 sequences and events can straddle reads.

use serde_json::Value;

use crate::model::FrameRecord;

pub const DATA_PREFIX: &str = "data:";
const EVENT_DELIMITER: &str = "\n\n";

/// Decoded unit of the stream.
#[derive(Clone, Debug, PartialEq)]
pub enum StreamEvent {
    Frame(FrameRecord),
    /// The `{"done": true}` completion marker.
    Done,
}

/// Turns a byte stream into text, holding back an incomplete trailing
/// UTF-8 sequence until the next chunk completes it.
#[derive(Debug, Default)]
pub struct Utf8Chunker {
    pending: Vec<u8>,
}

impl Utf8Chunker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(&String::from_utf8_lossy(&self.pending[..valid]));
                    match err.error_len() {
                        // Truncated sequence at the end; wait for more bytes.
                        None => {
                            self.pending.drain(..valid);
                            return out;
                        }
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid + bad);
                        }
                    }
                }
            }
        }
    }

    /// Flush whatever is left at end of stream.
    pub fn finish(&mut self) -> String {
        let rest = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        rest
    }
}

#[derive(Debug, Default)]
pub struct EventDecoder {
    text: Utf8Chunker,
    buffer: String,
    finished: bool,
    frames: u64,
    malformed: u64,
}

impl EventDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk and return the complete events it closed.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let text = self.text.push(bytes);
        self.append_text(&text);
        while let Some(end) = self.buffer.find(EVENT_DELIMITER) {
            let block: String = self.buffer.drain(..end + EVENT_DELIMITER.len()).collect();
            self.decode_block(&block[..end], &mut events);
            if self.finished {
                self.buffer.clear();
                break;
            }
        }
        events
    }

    /// Decode a trailing event that was not followed by a blank line.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }
        let rest = self.text.finish();
        self.append_text(&rest);
        let block = std::mem::take(&mut self.buffer);
        if !block.trim().is_empty() {
            self.decode_block(&block, &mut events);
        }
        events
    }

    /// True once the completion marker has been decoded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames
    }

    pub fn malformed_records(&self) -> u64 {
        self.malformed
    }

    fn append_text(&mut self, text: &str) {
        self.buffer.extend(text.chars().filter(|c| *c != '\r'));
    }

    fn decode_block(&mut self, block: &str, events: &mut Vec<StreamEvent>) {
        for line in block.lines() {
            let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
                continue;
            };
            match parse_payload(payload.trim()) {
                Ok(StreamEvent::Done) => {
                    self.finished = true;
                    events.push(StreamEvent::Done);
                    return;
                }
                Ok(event) => {
                    self.frames += 1;
                    events.push(event);
                }
                Err(err) => {
                    self.malformed += 1;
                    log::debug!("dropping malformed stream record: {}", err);
                }
            }
        }
    }
}

fn parse_payload(payload: &str) -> anyhow::Result<StreamEvent> {
    let value: Value = serde_json::from_str(payload)?;
    if value.get("done") == Some(&Value::Bool(true)) {
        return Ok(StreamEvent::Done);
    }
    let frame: FrameRecord = serde_json::from_value(value)?;
    frame.validate()?;
    Ok(StreamEvent::Frame(frame))
}
