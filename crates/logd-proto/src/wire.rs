// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Length-prefixed CBOR framing (spec.md §6's own framing is a
//! blank-line-terminated text grammar; that document text surface syntax is
//! out of scope per spec.md §1, so this crate frames with a 4-byte
//! big-endian length prefix followed by a canonical CBOR body instead — see
//! `DESIGN.md`).

use serde::{de::DeserializeOwned, Serialize};

/// Framing/encoding failures.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The buffer does not yet hold a complete length prefix.
    #[error("incomplete length prefix")]
    IncompleteLength,
    /// The buffer holds a length prefix but not the full body yet.
    #[error("incomplete frame body")]
    IncompleteBody,
    /// CBOR encoding failed.
    #[error("cbor encode error: {0}")]
    Encode(#[from] ciborium::ser::Error<std::io::Error>),
    /// CBOR decoding failed.
    #[error("cbor decode error: {0}")]
    Decode(#[from] ciborium::de::Error<std::io::Error>),
}

/// Encode `value` as a length-prefixed CBOR frame: a 4-byte big-endian
/// `u32` byte count, followed by the canonical CBOR encoding of `value`.
///
/// # Errors
/// [`FrameError::Encode`] if CBOR serialization fails.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, FrameError> {
    let mut body = Vec::new();
    ciborium::into_writer(value, &mut body)?;
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&u32::try_from(body.len()).unwrap_or(u32::MAX).to_be_bytes());
    out.extend_from_slice(&body);
    Ok(out)
}

/// Decode one frame from the front of `buf`, returning the value and the
/// number of bytes it consumed. Returns `Err(FrameError::Incomplete*)` if
/// `buf` does not yet hold a complete frame — callers keep reading from the
/// socket and retry, per the reader task's decoding loop (spec.md §4.E).
///
/// # Errors
/// [`FrameError::IncompleteLength`]/[`FrameError::IncompleteBody`] while more
/// bytes are needed; [`FrameError::Decode`] if the body is not valid CBOR
/// for `T`.
pub fn decode<T: DeserializeOwned>(buf: &[u8]) -> Result<(T, usize), FrameError> {
    if buf.len() < 4 {
        return Err(FrameError::IncompleteLength);
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    if buf.len() < 4 + len {
        return Err(FrameError::IncompleteBody);
    }
    let value = ciborium::from_reader(&buf[4..4 + len])?;
    Ok((value, 4 + len))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{Envelope, Request, Response};

    #[test]
    fn round_trips_a_request_envelope() {
        let env = Envelope {
            id: Some("req-1".to_string()),
            body: Request::Hello(crate::HelloRequest { client_info: Some("test-client".to_string()) }),
        };
        let frame = encode(&env).unwrap();
        let (decoded, consumed): (Envelope<Request>, usize) = decode(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        assert_eq!(decoded, env);
    }

    #[test]
    fn detects_incomplete_frame() {
        let env = Envelope { id: None, body: Response::Hello };
        let frame = encode(&env).unwrap();
        let truncated = &frame[..frame.len() - 1];
        let result: Result<(Envelope<Response>, usize), FrameError> = decode(truncated);
        assert!(matches!(result, Err(FrameError::IncompleteBody)));
    }

    #[test]
    fn detects_short_length_prefix() {
        let result: Result<(Envelope<Response>, usize), FrameError> = decode(&[0, 1]);
        assert!(matches!(result, Err(FrameError::IncompleteLength)));
    }
}
