//! Wire frames: flat arrays of scalars.
//!
//! A frame carries one or more messages back to back, each an integer opcode
//! followed by that opcode's fixed number of scalars. Strings are quoted JSON
//! strings, so no length prefixes are needed to find where a message ends.

use serde::{Deserialize, Serialize};

use crate::errors::BridgeError;
use crate::path::Path;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Str(String),
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<u64> for Scalar {
    fn from(v: u64) -> Self {
        Self::Int(v as i64)
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Self::Str(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Self::Str(v.to_owned())
    }
}

impl From<&Path> for Scalar {
    fn from(v: &Path) -> Self {
        Self::Str(v.to_string())
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Frame(Vec<Scalar>);

impl Frame {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, scalar: impl Into<Scalar>) -> &mut Self {
        self.0.push(scalar.into());
        self
    }

    pub fn scalars(&self) -> &[Scalar] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn to_json(&self) -> String {
        // A Vec of untagged scalars cannot fail to serialize.
        serde_json::to_string(&self.0).unwrap_or_else(|_| "[]".to_owned())
    }

    pub fn from_json(raw: &str) -> Result<Self, BridgeError> {
        Ok(Self(serde_json::from_str(raw)?))
    }

    pub fn reader(&self) -> FrameReader<'_> {
        FrameReader {
            scalars: &self.0,
            pos: 0,
        }
    }
}

impl From<Vec<Scalar>> for Frame {
    fn from(v: Vec<Scalar>) -> Self {
        Self(v)
    }
}

/// Sequential reader over a frame. Every accessor fails with
/// `ProtocolViolation` on truncation or a scalar of the wrong kind.
pub struct FrameReader<'a> {
    scalars: &'a [Scalar],
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn is_done(&self) -> bool {
        self.pos >= self.scalars.len()
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    fn next(&mut self, expected: &str) -> Result<&'a Scalar, BridgeError> {
        let scalar = self.scalars.get(self.pos).ok_or_else(|| {
            BridgeError::protocol(format!(
                "truncated frame: expected {expected} at position {}",
                self.pos
            ))
        })?;
        self.pos += 1;
        Ok(scalar)
    }

    fn mismatch(&self, expected: &str, got: &Scalar) -> BridgeError {
        BridgeError::protocol(format!(
            "expected {expected} at position {}, got {got:?}",
            self.pos - 1
        ))
    }

    pub fn int(&mut self) -> Result<i64, BridgeError> {
        match self.next("integer")? {
            Scalar::Int(v) => Ok(*v),
            other => Err(self.mismatch("integer", other)),
        }
    }

    pub fn uint(&mut self) -> Result<u64, BridgeError> {
        let v = self.int()?;
        u64::try_from(v).map_err(|_| BridgeError::protocol(format!("negative value {v}")))
    }

    pub fn string(&mut self) -> Result<String, BridgeError> {
        match self.next("string")? {
            Scalar::Str(v) => Ok(v.clone()),
            other => Err(self.mismatch("string", other)),
        }
    }

    pub fn boolean(&mut self) -> Result<bool, BridgeError> {
        match self.next("boolean")? {
            Scalar::Bool(v) => Ok(*v),
            // Browsers commonly encode flags as 0/1.
            Scalar::Int(0) => Ok(false),
            Scalar::Int(1) => Ok(true),
            other => Err(self.mismatch("boolean", other)),
        }
    }

    pub fn path(&mut self) -> Result<Path, BridgeError> {
        self.string()?.parse()
    }
}
