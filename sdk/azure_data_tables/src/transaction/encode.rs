//! Batch request encoding.
//!
//! A batch body is two nested `multipart/mixed` envelopes. The outer one
//! (the batch) holds exactly one part: the inner one (the changeset), which
//! holds one `application/http` part per action. Each of those is the
//! literal text of an HTTP/1.1 request.

use azure_data_tables_core::error::{TablesError, TablesResult};
use azure_data_tables_core::models::TableRequest;
use bytes::Bytes;
use url::Url;

use super::boundary::{BatchIds, Boundaries};
use crate::request::{build_request, TransactionAction};

const CRLF: &[u8] = b"\r\n";

/// A finished batch request body and the `Content-Type` that names its boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedBatch {
    body: Bytes,
    content_type: String,
}

impl EncodedBatch {
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// `multipart/mixed; boundary=batch_<id>`
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn into_parts(self) -> (Bytes, String) {
        (self.body, self.content_type)
    }
}

/// An encoded batch together with the per-action requests it contains.
///
/// The requests are needed again to frame the per-operation responses.
#[derive(Debug, Clone)]
pub struct PreparedTransaction {
    pub batch: EncodedBatch,
    pub requests: Vec<TableRequest>,
}

/// Writes parts delimited by one boundary.
///
/// Framing: `--B` CRLF before the first part, CRLF `--B` CRLF before each
/// later part, part headers sorted by name, a blank line, the part body, and
/// CRLF `--B--` CRLF to close.
struct MultipartWriter {
    out: Vec<u8>,
    boundary: String,
    parts: usize,
}

impl MultipartWriter {
    fn new(boundary: &str) -> Self {
        Self {
            out: Vec::new(),
            boundary: boundary.to_string(),
            parts: 0,
        }
    }

    /// Start a part and return the buffer to write its body into.
    fn part(&mut self, headers: &[(&str, &str)]) -> &mut Vec<u8> {
        if self.parts > 0 {
            self.out.extend_from_slice(CRLF);
        }
        self.parts += 1;

        self.out.extend_from_slice(b"--");
        self.out.extend_from_slice(self.boundary.as_bytes());
        self.out.extend_from_slice(CRLF);

        let mut headers = headers.to_vec();
        headers.sort_unstable_by(|a, b| a.0.cmp(b.0));
        for (name, value) in headers {
            write_header(&mut self.out, name, value);
        }
        self.out.extend_from_slice(CRLF);
        &mut self.out
    }

    fn finish(mut self) -> Vec<u8> {
        if self.parts > 0 {
            self.out.extend_from_slice(CRLF);
        }
        self.out.extend_from_slice(b"--");
        self.out.extend_from_slice(self.boundary.as_bytes());
        self.out.extend_from_slice(b"--");
        self.out.extend_from_slice(CRLF);
        self.out
    }
}

fn write_header(out: &mut Vec<u8>, name: &str, value: &str) {
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value.as_bytes());
    out.extend_from_slice(CRLF);
}

/// Serialize a request as HTTP/1.1 text: request line, name-sorted headers,
/// blank line, body.
fn write_request(out: &mut Vec<u8>, request: &TableRequest) {
    out.extend_from_slice(request.method().as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(request.url().as_str().as_bytes());
    out.extend_from_slice(b" HTTP/1.1");
    out.extend_from_slice(CRLF);

    for (name, value) in request.headers() {
        write_header(out, name, value);
    }
    out.extend_from_slice(CRLF);

    if let Some(body) = request.body() {
        out.extend_from_slice(body);
    }
}

/// Encode requests as the parts of one changeset.
///
/// Returns an empty buffer when there are no requests.
pub fn encode_changeset(requests: &[TableRequest], boundary: &str) -> Vec<u8> {
    if requests.is_empty() {
        return Vec::new();
    }

    let mut writer = MultipartWriter::new(boundary);
    for request in requests {
        let out = writer.part(&[
            ("Content-Type", "application/http"),
            ("Content-Transfer-Encoding", "binary"),
        ]);
        write_request(out, request);
    }
    writer.finish()
}

/// Wrap a changeset body as the single part of the outer batch envelope.
///
/// # Errors
///
/// Returns [`TablesError::EmptyTransaction`] if `changeset` is empty.
pub fn encode_batch(changeset: &[u8], boundaries: &Boundaries) -> TablesResult<EncodedBatch> {
    if changeset.is_empty() {
        return Err(TablesError::EmptyTransaction);
    }

    let part_content_type = format!("multipart/mixed; boundary={}", boundaries.changeset);
    let mut writer = MultipartWriter::new(&boundaries.batch);
    writer
        .part(&[("Content-Type", part_content_type.as_str())])
        .extend_from_slice(changeset);

    Ok(EncodedBatch {
        body: Bytes::from(writer.finish()),
        content_type: format!("multipart/mixed; boundary={}", boundaries.batch),
    })
}

/// Build and encode every action of a transaction against `table`.
///
/// Nothing is encoded unless every action is valid: an empty action list
/// fails with [`TablesError::EmptyTransaction`], and an entity without its
/// identity properties fails with [`TablesError::MissingEntityKey`].
pub fn encode_transaction(
    endpoint: &Url,
    table: &str,
    actions: &[TransactionAction],
    ids: &BatchIds,
) -> TablesResult<PreparedTransaction> {
    if actions.is_empty() {
        return Err(TablesError::EmptyTransaction);
    }
    let boundaries = ids.boundaries()?;

    let requests = actions
        .iter()
        .map(|action| build_request(endpoint, table, action))
        .collect::<TablesResult<Vec<_>>>()?;

    let changeset = encode_changeset(&requests, &boundaries.changeset);
    let batch = encode_batch(&changeset, &boundaries)?;

    Ok(PreparedTransaction { batch, requests })
}
