//! Snapshot codec and report envelope
//!
//! A snapshot is serialized to an opaque token: standard base64 over a small
//! versioned JSON payload. Report documents carry that token between two
//! literal sentinel lines:
//!
//! ```text
//! ...human readable report...
//! ANALYSIS_DATA_BEGIN
//! eyJ2ZXJzaW9uIjoxLCJzbmFwc2hvdCI6ey...
//! ...
//! ANALYSIS_DATA_END
//! ```
//!
//! Text extracted from a rendered report may reflow the token across lines,
//! so extraction strips every whitespace character between the sentinels
//! before decoding. The rest of the document is never inspected.

use crate::error::{Error, Result};
use crate::types::AnalysisSnapshot;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

pub const BEGIN_MARKER: &str = "ANALYSIS_DATA_BEGIN";
pub const END_MARKER: &str = "ANALYSIS_DATA_END";

const PAYLOAD_VERSION: u32 = 1;

/// Column width used when embedding a token in a document.
const TOKEN_LINE_WIDTH: usize = 76;

#[derive(Serialize)]
struct PayloadRef<'a> {
    version: u32,
    snapshot: &'a AnalysisSnapshot,
}

#[derive(Deserialize)]
struct Payload {
    version: u32,
    snapshot: AnalysisSnapshot,
}

/// Serialize a snapshot into an opaque token.
pub fn encode(snapshot: &AnalysisSnapshot) -> String {
    let payload = PayloadRef {
        version: PAYLOAD_VERSION,
        snapshot,
    };
    // Serializing plain structs of strings, vecs and bools cannot fail.
    let json = serde_json::to_vec(&payload).unwrap_or_default();
    BASE64_STANDARD.encode(json)
}

/// Decode a token produced by [`encode`].
pub fn decode(token: &str) -> Result<AnalysisSnapshot> {
    let bytes = BASE64_STANDARD
        .decode(token.trim())
        .map_err(|e| Error::CodecDecode(format!("invalid base64: {}", e)))?;

    let payload: Payload = serde_json::from_slice(&bytes)
        .map_err(|e| Error::CodecDecode(format!("invalid payload: {}", e)))?;

    if payload.version != PAYLOAD_VERSION {
        return Err(Error::CodecDecode(format!(
            "unsupported payload version {}",
            payload.version
        )));
    }

    Ok(payload.snapshot)
}

/// Locate the envelope in `document` and decode the token inside it.
///
/// Uses the first begin marker and the first end marker after it. A missing
/// marker is an error; there is no partial recovery.
pub fn extract_and_decode(document: &str) -> Result<AnalysisSnapshot> {
    let token = extract_token(document)?;
    decode(&token)
}

/// Return the whitespace-stripped text between the envelope sentinels.
pub fn extract_token(document: &str) -> Result<String> {
    let begin = document
        .find(BEGIN_MARKER)
        .ok_or(Error::EnvelopeMarkerMissing(BEGIN_MARKER))?;
    let body_start = begin + BEGIN_MARKER.len();

    let end = document[body_start..]
        .find(END_MARKER)
        .ok_or(Error::EnvelopeMarkerMissing(END_MARKER))?;

    Ok(document[body_start..body_start + end]
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect())
}

/// Append an envelope carrying `snapshot` to a human-readable document body.
pub fn embed(body: &str, snapshot: &AnalysisSnapshot) -> String {
    let token = encode(snapshot);
    let mut out = String::with_capacity(body.len() + token.len() + 64);
    out.push_str(body);
    if !body.is_empty() && !body.ends_with('\n') {
        out.push('\n');
    }
    out.push_str(BEGIN_MARKER);
    out.push('\n');
    // base64 output is ASCII, so byte chunks are valid str boundaries.
    for chunk in token.as_bytes().chunks(TOKEN_LINE_WIDTH) {
        out.push_str(&String::from_utf8_lossy(chunk));
        out.push('\n');
    }
    out.push_str(END_MARKER);
    out.push('\n');
    out
}
