//! Record framing and event decoding for the oracle's `text/event-stream` body.

use std::{collections::VecDeque, time::Duration};

use futures::StreamExt;
use shared::protocol::{StreamEvent, StreamRecord};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::{error::OracleError, transport::ByteStream};

pub const RECORD_DELIMITER: &[u8] = b"\n\n";
pub const DATA_PREFIX: &str = "data: ";

/// Splits an arbitrarily chunked byte stream into blank-line separated records.
#[derive(Debug, Default)]
pub struct RecordFramer {
    buffer: Vec<u8>,
}

impl RecordFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `chunk` and returns every record it completed. The trailing
    /// fragment stays buffered until a later chunk closes it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        while let Some(offset) = find_delimiter(&self.buffer[start..]) {
            records.push(self.buffer[start..start + offset].to_vec());
            start += offset + RECORD_DELIMITER.len();
        }
        self.buffer.drain(..start);
        records
    }

    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Drops the unterminated fragment, returning how many bytes were lost.
    pub fn discard(&mut self) -> usize {
        let dropped = self.buffer.len();
        self.buffer.clear();
        dropped
    }
}

fn find_delimiter(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(RECORD_DELIMITER.len())
        .position(|window| window == RECORD_DELIMITER)
}

/// Decodes one framed record. Records that are not `data:` lines carry no
/// event, and neither do steps this client does not know.
pub fn decode_record(record: &[u8]) -> Result<Option<StreamEvent>, OracleError> {
    let text = std::str::from_utf8(record)
        .map_err(|err| OracleError::MalformedEvent(format!("record is not UTF-8: {err}")))?;
    let Some(json) = text.strip_prefix(DATA_PREFIX) else {
        debug!(len = text.len(), "skipping non-data record");
        return Ok(None);
    };
    let parsed: StreamRecord = serde_json::from_str(json)
        .map_err(|err| OracleError::MalformedEvent(format!("invalid record json: {err}")))?;
    let step = parsed.step.clone();
    let event = parsed
        .into_event()
        .map_err(|err| OracleError::MalformedEvent(err.to_string()))?;
    if event.is_none() {
        debug!(step = ?step, "ignoring unknown step");
    }
    Ok(event)
}

pub struct StreamReader {
    inner: ByteStream,
    framer: RecordFramer,
    ready: VecDeque<Vec<u8>>,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl StreamReader {
    pub fn new(inner: ByteStream) -> Self {
        Self {
            inner,
            framer: RecordFramer::new(),
            ready: VecDeque::new(),
            idle_timeout: None,
            finished: false,
        }
    }

    /// Fails the read with a transport error when no chunk arrives for `limit`.
    pub fn with_idle_timeout(mut self, limit: Duration) -> Self {
        self.idle_timeout = Some(limit);
        self
    }

    /// Next event in stream order, or `None` once the stream has ended.
    pub async fn next_event(&mut self) -> Result<Option<StreamEvent>, OracleError> {
        loop {
            while let Some(record) = self.ready.pop_front() {
                if let Some(event) = decode_record(&record)? {
                    return Ok(Some(event));
                }
            }
            if self.finished {
                return Ok(None);
            }

            let next = match self.idle_timeout {
                Some(limit) => timeout(limit, self.inner.next()).await.map_err(|_| {
                    OracleError::Transport(format!(
                        "no data received from the oracle for {} seconds",
                        limit.as_secs()
                    ))
                })?,
                None => self.inner.next().await,
            };

            match next {
                Some(Ok(chunk)) => self.ready.extend(self.framer.push(&chunk)),
                Some(Err(err)) => return Err(err),
                None => {
                    self.finished = true;
                    let dropped = self.framer.discard();
                    if dropped > 0 {
                        warn!(
                            dropped_bytes = dropped,
                            "stream ended inside a record; trailing fragment discarded"
                        );
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "tests/stream_reader_tests.rs"]
mod tests;
