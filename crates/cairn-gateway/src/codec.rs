//! Checksummed blob envelope.
//!
//! Every blob is stored as
//!
//! ```text
//! cairn:<kind>\n
//! sha256:<hex digest of payload>\n
//! <json payload>
//! ```
//!
//! Reads verify the kind and the checksum before deserializing, so a blob
//! written for one component can never be decoded as another and torn or
//! corrupted payloads are rejected.

use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};

use crate::error::{RemoteStateError, Result};

const MAGIC: &str = "cairn:";
const CHECKSUM_PREFIX: &str = "sha256:";

/// Returns the hex SHA-256 of `payload`.
#[must_use]
pub fn checksum(payload: &[u8]) -> String {
    hex::encode(Sha256::digest(payload))
}

/// Serializes `value` into an envelope of the given kind.
///
/// # Errors
///
/// Returns [`RemoteStateError::Serialization`] if `value` cannot be
/// serialized.
pub fn encode<T: Serialize>(kind: &str, value: &T) -> Result<Bytes> {
    let payload = serde_json::to_vec(value)?;
    let digest = checksum(&payload);

    let mut buf = BytesMut::with_capacity(
        MAGIC.len() + kind.len() + CHECKSUM_PREFIX.len() + digest.len() + payload.len() + 2,
    );
    buf.put_slice(MAGIC.as_bytes());
    buf.put_slice(kind.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(CHECKSUM_PREFIX.as_bytes());
    buf.put_slice(digest.as_bytes());
    buf.put_u8(b'\n');
    buf.put_slice(&payload);
    Ok(buf.freeze())
}

/// Verifies and deserializes an envelope of the given kind.
///
/// # Errors
///
/// Returns [`RemoteStateError::Serialization`] if the header is malformed,
/// the kind does not match, the checksum does not match, or the payload
/// cannot be deserialized.
pub fn decode<T: DeserializeOwned>(kind: &str, data: &[u8]) -> Result<T> {
    let (header, rest) = split_line(data)?;
    let (checksum_line, payload) = split_line(rest)?;

    let found_kind = header
        .strip_prefix(MAGIC)
        .ok_or_else(|| RemoteStateError::serialization("missing blob header"))?;
    if found_kind != kind {
        return Err(RemoteStateError::serialization(format!(
            "blob kind mismatch: expected {kind}, found {found_kind}"
        )));
    }

    let expected = checksum_line
        .strip_prefix(CHECKSUM_PREFIX)
        .ok_or_else(|| RemoteStateError::serialization("missing blob checksum"))?;
    let actual = checksum(payload);
    if expected != actual {
        return Err(RemoteStateError::serialization(format!(
            "checksum mismatch for {kind} blob: expected {expected}, computed {actual}"
        )));
    }

    Ok(serde_json::from_slice(payload)?)
}

fn split_line(data: &[u8]) -> Result<(&str, &[u8])> {
    let pos = data
        .iter()
        .position(|b| *b == b'\n')
        .ok_or_else(|| RemoteStateError::serialization("truncated blob header"))?;
    let line = std::str::from_utf8(&data[..pos])
        .map_err(|e| RemoteStateError::serialization(format!("blob header is not utf-8: {e}")))?;
    Ok((line, &data[pos + 1..]))
}
