//! Wire framing for both directions.
//!
//! Every part starts with a CRLF followed by the delimiter line, so a writer
//! never needs to know whether the previous write ended its last line.

use axum::http::StatusCode;

use super::Boundary;

/// Free text written before the first boundary. Peers discard it.
pub const PREAMBLE: &str = "Batch API. Multiplexed HTTP requests follow as multipart/mixed parts.";

const CRLF: &str = "\r\n";

/// Frame one client request part.
pub fn request_part(
    boundary: &Boundary,
    content_id: u64,
    method: &str,
    path: &str,
    body: Option<&str>,
) -> String {
    let mut frame = part_head(boundary, Some(&content_id.to_string()), true);
    frame.push_str(CRLF);
    frame.push_str(&format!("{} {} HTTP/1.1", method, path));
    frame.push_str(CRLF);
    frame.push_str("Accept: application/json");

    if let Some(body) = body.filter(|b| !b.is_empty()) {
        frame.push_str(CRLF);
        frame.push_str("Transfer-Encoding: chunked");
        frame.push_str(CRLF);
        frame.push_str("Content-Type: application/json");
        frame.push_str(CRLF);
        frame.push_str(CRLF);
        frame.push_str(body);
    }
    frame
}

/// Frame one server reply part.
///
/// A reply without a content id is still written so the exchange stays
/// well-formed; the client simply cannot correlate it.
pub fn reply_part(
    boundary: &Boundary,
    content_id: Option<&str>,
    status: u16,
    headers: &[(String, String)],
    body: &str,
) -> String {
    let mut frame = part_head(boundary, content_id, false);
    frame.push_str(CRLF);
    frame.push_str(&format!("HTTP/1.1 {} {}", status, reason_phrase(status)));
    for (name, value) in headers {
        frame.push_str(CRLF);
        frame.push_str(&format!("{}: {}", name, value));
    }
    frame.push_str(CRLF);
    frame.push_str(CRLF);
    frame.push_str(body);
    frame
}

/// Terminal marker closing the stream.
pub fn terminator(boundary: &Boundary) -> String {
    format!("{}{}{}", CRLF, boundary.terminator(), CRLF)
}

/// Canonical reason phrase, `Error` for codes without one.
pub fn reason_phrase(status: u16) -> &'static str {
    StatusCode::from_u16(status)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Error")
}

fn part_head(boundary: &Boundary, content_id: Option<&str>, binary: bool) -> String {
    let mut head = String::from(CRLF);
    head.push_str(&boundary.delimiter());
    head.push_str(CRLF);
    head.push_str("Content-Type: application/http");
    if binary {
        head.push_str(CRLF);
        head.push_str("Content-Transfer-Encoding: binary");
    }
    if let Some(id) = content_id {
        head.push_str(CRLF);
        head.push_str(&format!("Content-ID: {}", id));
    }
    head.push_str(CRLF);
    head
}
