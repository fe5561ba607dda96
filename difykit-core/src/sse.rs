//! Incremental Server-Sent-Events framing.
//!
//! Body fragments arrive at arbitrary byte boundaries. [`SseReassembler`]
//! buffers bytes, cuts complete records on a blank line (`\n\n` or
//! `\r\n\r\n`), and keeps at most one incomplete record pending. Records are
//! cut on bytes and decoded afterwards, so a multi-byte character split
//! across fragments decodes the same as if it had arrived whole.

use crate::error::{CoreResult, DifyError};

/// One complete SSE record with the fields this client cares about.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SseRecord {
    pub event: Option<String>,
    /// `data:` lines joined with `\n`; `None` if the record had none.
    pub data: Option<String>,
    pub id: Option<String>,
}

impl SseRecord {
    /// Parse one record's text. Returns `None` when the record holds only
    /// comments (`:`-prefixed lines) and whitespace.
    pub fn parse(text: &str) -> Option<Self> {
        let mut record = SseRecord::default();
        let mut data: Option<String> = None;
        let mut any_field = false;

        for line in text.lines() {
            if line.trim().is_empty() || line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((f, v)) => (f, v.strip_prefix(' ').unwrap_or(v)),
                None => (line, ""),
            };
            any_field = true;
            match field {
                "data" => match data.as_mut() {
                    Some(d) => {
                        d.push('\n');
                        d.push_str(value);
                    }
                    None => data = Some(value.to_string()),
                },
                "event" => record.event = Some(value.to_string()),
                "id" => record.id = Some(value.to_string()),
                _ => {}
            }
        }

        if !any_field {
            return None;
        }
        record.data = data;
        Some(record)
    }
}

/// Byte-level record splitter. Owned by exactly one stream operation.
#[derive(Debug)]
pub struct SseReassembler {
    buf: Vec<u8>,
    /// Offset in `buf` where the next delimiter search starts.
    scan_from: usize,
    max_pending: usize,
    skipped: u64,
}

impl SseReassembler {
    pub fn new(max_pending: usize) -> Self {
        Self {
            buf: Vec::new(),
            scan_from: 0,
            max_pending,
            skipped: 0,
        }
    }

    /// Append a fragment and return every record it completed, in order.
    /// Comment-only and blank records are dropped here and counted.
    pub fn push(&mut self, chunk: &[u8]) -> CoreResult<Vec<SseRecord>> {
        self.buf.extend_from_slice(chunk);

        let mut records = Vec::new();
        let mut start = 0;
        let mut pos = self.scan_from;
        while let Some((at, len)) = find_delimiter(&self.buf, pos) {
            let text = String::from_utf8_lossy(&self.buf[start..at]);
            match SseRecord::parse(&text) {
                Some(record) => records.push(record),
                None => self.skipped += 1,
            }
            start = at + len;
            pos = start;
        }

        if start > 0 {
            self.buf.drain(..start);
        }
        // A delimiter straddling the next fragment starts at most 3 bytes back.
        self.scan_from = self.buf.len().saturating_sub(3);

        if self.buf.len() > self.max_pending {
            return Err(DifyError::RecordTooLarge {
                limit: self.max_pending,
            });
        }
        Ok(records)
    }

    /// Bytes of the incomplete trailing record.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Number of comment-only or blank records dropped so far.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Discard the incomplete tail at end of stream; returns its length.
    /// A record without its terminating blank line is never emitted.
    pub fn finish(&mut self) -> usize {
        let n = self.buf.len();
        self.buf.clear();
        self.scan_from = 0;
        n
    }
}

/// Earliest `\n\n` or `\r\n\r\n` at or after `from`: (offset, delimiter length).
fn find_delimiter(buf: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 1 < buf.len() {
        if buf[i] == b'\n' && buf[i + 1] == b'\n' {
            return Some((i, 2));
        }
        if buf[i..].starts_with(b"\r\n\r\n") {
            return Some((i, 4));
        }
        i += 1;
    }
    None
}
