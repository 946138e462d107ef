//! Batch response decoding.
//!
//! The service answers a batch either with a flat `odata.error` JSON body
//! (the batch was rejected before any action ran) or with the same two-level
//! multipart nesting as the request, where every inner part is the literal
//! text of an HTTP/1.1 response.

use azure_data_tables_core::client::TableServiceClient;
use azure_data_tables_core::error::{TablesError, TablesResult};
use azure_data_tables_core::models::{RawResponse, TableRequest};
use bytes::Bytes;
use memchr::memmem;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_LENGTH};
use reqwest::{Method, StatusCode};

use super::error::extract_transaction_error;

/// Decode a batch response into one outcome per submitted request.
///
/// `requests` are the requests that were encoded into the batch, in order;
/// they frame the per-part responses and bound the number of parts.
///
/// # Errors
///
/// - [`TablesError::Transaction`] when the body is a JSON rejection or any
///   part carries a failure status. Decoding stops at the first failed part.
/// - [`TablesError::Http`] when the outer status is a failure and the body
///   is neither JSON nor multipart.
/// - [`TablesError::MalformedResponse`] for empty bodies, bad boundaries,
///   truncated parts, unparsable HTTP messages, or a part count that does
///   not match `requests`.
pub fn decode_response(
    status: StatusCode,
    body: &[u8],
    requests: &[TableRequest],
) -> TablesResult<Vec<RawResponse>> {
    let body = body.trim_ascii_start();

    if body.first() == Some(&b'{') {
        tracing::debug!("batch rejected before execution");
        return Err(extract_transaction_error(Some(status.as_u16()), body).into());
    }
    if body.is_empty() {
        return Err(TablesError::malformed("response body is empty"));
    }
    if !body.starts_with(b"--") && (status.is_client_error() || status.is_server_error()) {
        return Err(TablesError::http(
            status.as_u16(),
            TableServiceClient::truncate_message(&String::from_utf8_lossy(body)),
        ));
    }

    let outer = split_multipart(body)?;
    let (_, changeset) = split_headers(outer[0]);
    let inner = split_multipart(changeset.trim_ascii_start())?;

    let mut responses = Vec::with_capacity(inner.len());
    for (index, part) in inner.into_iter().enumerate() {
        let request = requests.get(index).ok_or_else(|| {
            TablesError::malformed(format!(
                "response has more parts than the {} submitted actions",
                requests.len()
            ))
        })?;

        let (_, message) = split_headers(part);
        let response = parse_http_response(message, request.method())?;
        tracing::trace!(index, status = response.status.as_u16(), "decoded operation response");

        if response.status.is_client_error() || response.status.is_server_error() {
            tracing::debug!(
                index,
                status = response.status.as_u16(),
                "operation failed, transaction rolled back"
            );
            return Err(
                extract_transaction_error(Some(response.status.as_u16()), &response.body).into(),
            );
        }
        responses.push(response);
    }

    if responses.len() != requests.len() {
        return Err(TablesError::malformed(format!(
            "response has {} parts for {} submitted actions",
            responses.len(),
            requests.len()
        )));
    }
    Ok(responses)
}

/// Split a multipart body into its parts.
///
/// The boundary is read from the first line (`--<boundary>`). Returned parts
/// still include their MIME headers. The line break before each delimiter
/// belongs to the delimiter, not to the part.
pub(crate) fn split_multipart(body: &[u8]) -> TablesResult<Vec<&[u8]>> {
    let line_end = memchr::memchr(b'\n', body)
        .ok_or_else(|| TablesError::malformed("missing boundary line"))?;
    let boundary = body[..line_end]
        .trim_ascii_end()
        .strip_prefix(b"--")
        .filter(|b| !b.is_empty() && !b.ends_with(b"--"))
        .ok_or_else(|| TablesError::malformed("first line is not a boundary delimiter"))?;

    let mut delimiter = Vec::with_capacity(boundary.len() + 3);
    delimiter.extend_from_slice(b"\n--");
    delimiter.extend_from_slice(boundary);
    let finder = memmem::Finder::new(&delimiter);
    let dash_boundary = &delimiter[1..];

    let mut parts = Vec::new();
    let mut part_start = line_end + 1;
    let mut search_from = part_start;

    loop {
        // An empty part puts its delimiter directly at the start of the part.
        let (delimiter_start, after) =
            if search_from == part_start && body[part_start..].starts_with(dash_boundary) {
                (part_start, part_start + dash_boundary.len())
            } else {
                let found = finder.find(&body[search_from..]).ok_or_else(|| {
                    TablesError::malformed("multipart body has no closing delimiter")
                })?;
                (search_from + found, search_from + found + delimiter.len())
            };
        let rest = &body[after..];

        if rest.starts_with(b"--") {
            parts.push(trim_cr(&body[part_start..delimiter_start]));
            return Ok(parts);
        }

        match memchr::memchr(b'\n', rest) {
            Some(nl) if rest[..nl].iter().all(u8::is_ascii_whitespace) => {
                parts.push(trim_cr(&body[part_start..delimiter_start]));
                part_start = after + nl + 1;
                search_from = part_start;
            }
            // The boundary text continues; it is content, not a delimiter.
            Some(_) => search_from = after,
            None => return Err(TablesError::malformed("truncated boundary line")),
        }
    }
}

/// Split a header block from what follows the first blank line.
///
/// Without a blank line the whole input is treated as headers.
pub(crate) fn split_headers(data: &[u8]) -> (&[u8], &[u8]) {
    if data.starts_with(b"\r\n") {
        return (&[], &data[2..]);
    }
    if data.starts_with(b"\n") {
        return (&[], &data[1..]);
    }
    if let Some(pos) = memmem::find(data, b"\r\n\r\n") {
        return (&data[..pos], &data[pos + 4..]);
    }
    if let Some(pos) = memmem::find(data, b"\n\n") {
        return (&data[..pos], &data[pos + 2..]);
    }
    (data, &[])
}

/// Upper bound on headers in one part's response.
const MAX_PART_HEADERS: usize = 64;

/// Parse the literal text of one HTTP/1.1 response.
///
/// `method` is the method of the request being answered: responses to `HEAD`
/// and 1xx/204/304 responses carry no body.
pub(crate) fn parse_http_response(message: &[u8], method: &Method) -> TablesResult<RawResponse> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_PART_HEADERS];
    let mut parsed = httparse::Response::new(&mut header_buf);
    let head_len = match parsed.parse(message) {
        Ok(httparse::Status::Complete(len)) => len,
        Ok(httparse::Status::Partial) => {
            return Err(TablesError::malformed("incomplete HTTP response head"))
        }
        Err(e) => return Err(TablesError::malformed(format!("invalid HTTP response: {e}"))),
    };

    let status = parsed
        .code
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(|| TablesError::malformed("invalid status code"))?;

    let mut headers = HeaderMap::with_capacity(parsed.headers.len());
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|e| TablesError::malformed(format!("invalid header name: {e}")))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|e| TablesError::malformed(format!("invalid header value: {e}")))?;
        headers.append(name, value);
    }
    let rest = &message[head_len..];

    let bodiless = method == Method::HEAD
        || status.is_informational()
        || status == StatusCode::NO_CONTENT
        || status == StatusCode::NOT_MODIFIED;

    let body = if bodiless {
        Bytes::new()
    } else if let Some(length) = content_length(&headers)? {
        let body = rest.get(..length).ok_or_else(|| {
            TablesError::malformed(format!(
                "body is {} bytes but Content-Length is {length}",
                rest.len()
            ))
        })?;
        Bytes::copy_from_slice(body)
    } else {
        Bytes::copy_from_slice(rest)
    };

    Ok(RawResponse {
        status,
        headers,
        body,
    })
}

fn content_length(headers: &HeaderMap) -> TablesResult<Option<usize>> {
    headers
        .get(CONTENT_LENGTH)
        .map(|value| {
            value
                .to_str()
                .ok()
                .and_then(|s| s.trim().parse::<usize>().ok())
                .ok_or_else(|| TablesError::malformed("invalid Content-Length"))
        })
        .transpose()
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}
