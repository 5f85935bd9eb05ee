//! Streaming decoder for child agent progress output.
//!
//! Children write one structured record per stdout line. Chunks arrive in
//! arbitrary sizes, so the decoder keeps exactly one pending-partial-line
//! buffer per stream: each chunk is appended, complete lines are parsed,
//! and the trailing (possibly incomplete) segment is retained for the next
//! chunk. [`StreamDecoder::finish`] gives the final remainder one last
//! parse attempt when the stream ends.
//!
//! Unparsable lines are dropped silently (logged at debug) -- the stream
//! may legitimately interleave non-structured diagnostic text. Events are
//! emitted in exactly the order their source lines appeared, and the
//! emitted sequence is identical regardless of how the underlying bytes
//! were split into chunks.

use serde::Deserialize;

/// A decoded progress event from one child's output stream.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    /// An incremental fragment of the child's output text.
    Text(String),
    /// The child started invoking a tool.
    ToolStart(String),
    /// End-of-run marker carrying the child-reported exit status.
    Completed { exit_code: i32 },
}

/// Wire shape of one stdout line. Unknown `type` values fail to
/// deserialize and the line is treated as noise.
#[derive(Deserialize)]
#[serde(tag = "type")]
enum WireRecord {
    #[serde(rename = "text")]
    Text { delta: String },
    #[serde(rename = "tool_start")]
    ToolStart { name: String },
    #[serde(rename = "done")]
    Done { exit_code: i32 },
}

impl From<WireRecord> for ProgressEvent {
    fn from(record: WireRecord) -> Self {
        match record {
            WireRecord::Text { delta } => ProgressEvent::Text(delta),
            WireRecord::ToolStart { name } => ProgressEvent::ToolStart(name),
            WireRecord::Done { exit_code } => ProgressEvent::Completed { exit_code },
        }
    }
}

/// Reassembles newline-delimited records from arbitrary-sized chunks.
///
/// One instance per stream. Not shared across streams -- the partial-line
/// buffer is stream-local state.
#[derive(Default)]
pub struct StreamDecoder {
    pending: String,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk and return the events decoded from every complete
    /// line it closed. The trailing segment after the last newline is kept
    /// as the new pending buffer.
    pub fn push(&mut self, chunk: &str) -> Vec<ProgressEvent> {
        self.pending.push_str(chunk);

        let mut events = Vec::new();
        while let Some(newline) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=newline).collect();
            if let Some(event) = parse_line(line.trim_end_matches(['\n', '\r'])) {
                events.push(event);
            }
        }
        events
    }

    /// Signal end of stream: the buffered remainder gets one last parse
    /// attempt, then is dropped.
    pub fn finish(&mut self) -> Option<ProgressEvent> {
        let remainder = std::mem::take(&mut self.pending);
        parse_line(remainder.trim_end_matches('\r'))
    }
}

/// Parse one complete line. Blank and unparsable lines yield `None`.
fn parse_line(line: &str) -> Option<ProgressEvent> {
    if line.trim().is_empty() {
        return None;
    }
    match serde_json::from_str::<WireRecord>(line) {
        Ok(record) => Some(record.into()),
        Err(e) => {
            tracing::debug!(error = %e, line, "Dropping unparsable stream line");
            None
        }
    }
}
