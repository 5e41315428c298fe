//! Wire codec for the arithmetic protocol.
//!
//! Both directions carry one JSON object per message:
//! - Request: `{"a": <int>, "b": <int>}`
//! - Response: `{"s": <int>, "m": <int>}`
//!
//! A completed round trip is recorded as an [`Outcome`], which has its own
//! line format (`a:<A>,b:<B>,s:<S>,m:<M>`) used by the result sink. That
//! format never goes over the wire.

use bytes::{BufMut, Bytes, BytesMut};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Upper bound (exclusive) for generated operands
pub const OPERAND_LIMIT: i64 = 1000;

/// Codec errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode {kind}: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode {kind}: {source}")]
    Decode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Two operands sent by the client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub a: i64,
    pub b: i64,
}

impl Request {
    pub fn new(a: i64, b: i64) -> Self {
        Self { a, b }
    }

    /// Draw both operands independently from `[0, OPERAND_LIMIT)`
    pub fn random() -> Self {
        let mut rng = rand::rng();
        Self {
            a: rng.random_range(0..OPERAND_LIMIT),
            b: rng.random_range(0..OPERAND_LIMIT),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|source| CodecError::Encode {
            kind: "request",
            source,
        })
    }

    pub fn decode(message: &str) -> Result<Self, CodecError> {
        serde_json::from_str(message).map_err(|source| CodecError::Decode {
            kind: "request",
            source,
        })
    }
}

/// Sum and product computed by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub s: i64,
    pub m: i64,
}

impl Response {
    /// Compute the response for a request. Overflow wraps instead of
    /// panicking since operands arrive from the network.
    pub fn compute(request: &Request) -> Self {
        Self {
            s: request.a.wrapping_add(request.b),
            m: request.a.wrapping_mul(request.b),
        }
    }

    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|source| CodecError::Encode {
            kind: "response",
            source,
        })
    }

    pub fn decode(message: &str) -> Result<Self, CodecError> {
        serde_json::from_str(message).map_err(|source| CodecError::Decode {
            kind: "response",
            source,
        })
    }
}

/// A request paired with the response it produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outcome {
    pub request: Request,
    pub response: Response,
}

impl Outcome {
    pub fn new(request: Request, response: Response) -> Self {
        Self { request, response }
    }

    /// Serialize to the persisted line form, without a trailing newline
    pub fn to_line(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(48);
        buf.put_slice(self.to_string().as_bytes());
        buf.freeze()
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "a:{},b:{},s:{},m:{}",
            self.request.a, self.request.b, self.response.s, self.response.m
        )
    }
}
