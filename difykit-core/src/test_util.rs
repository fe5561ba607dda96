use bytes::Bytes;
use futures::stream::{self, Iter};

use crate::error::CoreResult;

pub const DATASET_ID: &str = "0b7c3a6e-1f2d-4e5a-9b8c-7d6e5f4a3b2c";
pub const DOCUMENT_ID: &str = "1c8d4b7f-2a3e-4f6b-8c9d-0e1f2a3b4c5d";
pub const SEGMENT_ID: &str = "2d9e5c80-3b4f-4a7c-9dae-1f203b4c5d6e";
pub const CHUNK_ID: &str = "3eaf6d91-4c50-4b8d-8ebf-20314c5d6e7f";
pub const TAG_ID: &str = "4fb07ea2-5d61-4c9e-9fc0-31425d6e7f80";

/// Transport that yields each part as one body fragment.
pub fn chunks(parts: &[&str]) -> Iter<std::vec::IntoIter<CoreResult<Bytes>>> {
    let items: Vec<CoreResult<Bytes>> = parts
        .iter()
        .map(|p| Ok(Bytes::copy_from_slice(p.as_bytes())))
        .collect();
    stream::iter(items)
}

/// SSE body with one `data:` record per payload.
pub fn sse_body(payloads: &[&str]) -> String {
    payloads.iter().map(|p| format!("data: {p}\n\n")).collect()
}
