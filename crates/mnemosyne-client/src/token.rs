//! Session token type and its wire codec.
//!
//! A token is an opaque identifier minted by the session service. Its wire
//! form is the token's own bytes; every byte must be visible ASCII so the same
//! bytes are also a valid gRPC ASCII metadata value. Validation happens once,
//! when a [`SessionToken`] is constructed, so encoding never fails and
//! decoding only has to check the structure of untrusted bytes.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tonic::metadata::{Ascii, MetadataValue};

use crate::error::{SessionError, SessionResult};

/// Maximum length of a token, in bytes.
pub const MAX_TOKEN_LEN: usize = 512;

/// Length of the routing key prefix of service-minted tokens.
pub const TOKEN_KEY_LEN: usize = 10;

/// An opaque, immutable session identifier.
///
/// Equality is exact byte equality. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SessionToken(Arc<str>);

impl SessionToken {
    /// Validate and wrap a token value.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::InvalidToken`] if the value is empty, longer than
    /// [`MAX_TOKEN_LEN`] or contains anything other than visible ASCII.
    pub fn new(value: impl Into<String>) -> SessionResult<Self> {
        let value = value.into();
        check(value.as_bytes()).map_err(SessionError::InvalidToken)?;
        Ok(Self(Arc::from(value)))
    }

    /// Decode a token from its wire bytes.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::MalformedToken`] for any byte sequence that
    /// [`SessionToken::encode`] could not have produced.
    pub fn decode(bytes: &[u8]) -> SessionResult<Self> {
        check(bytes).map_err(SessionError::MalformedToken)?;
        let value = std::str::from_utf8(bytes)
            .map_err(|e| SessionError::MalformedToken(e.to_string()))?;
        Ok(Self(Arc::from(value)))
    }

    /// Wire bytes of the token.
    pub fn encode(&self) -> Vec<u8> {
        self.0.as_bytes().to_vec()
    }

    /// Metadata representation, used to propagate the token between calls.
    pub fn encode_metadata(&self) -> SessionResult<MetadataValue<Ascii>> {
        MetadataValue::try_from(self.as_str())
            .map_err(|e| SessionError::InvalidToken(e.to_string()))
    }

    /// Decode a token carried in call metadata.
    pub fn decode_metadata(value: &MetadataValue<Ascii>) -> SessionResult<Self> {
        Self::decode(value.as_bytes())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Routing key of a service-minted token (`<key(10)><hash>`).
    ///
    /// Returns `None` when the token is too short to carry a hash after the key.
    pub fn key(&self) -> Option<&str> {
        if self.0.len() > TOKEN_KEY_LEN { Some(&self.0[..TOKEN_KEY_LEN]) } else { None }
    }

    /// Log-safe form: the first [`TOKEN_KEY_LEN`] bytes followed by `...`.
    pub fn redacted(&self) -> String {
        match self.key() {
            Some(key) => format!("{key}..."),
            None => "...".to_string(),
        }
    }
}

/// Structural check shared by construction and decoding.
fn check(bytes: &[u8]) -> Result<(), String> {
    if bytes.is_empty() {
        return Err("token is empty".to_string());
    }
    if bytes.len() > MAX_TOKEN_LEN {
        return Err(format!("token is {} bytes long, maximum is {MAX_TOKEN_LEN}", bytes.len()));
    }
    if let Some(position) = bytes.iter().position(|b| !(0x21..=0x7e).contains(b)) {
        return Err(format!("byte 0x{:02x} at position {position} is not visible ASCII", bytes[position]));
    }
    Ok(())
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SessionToken").field(&self.redacted()).finish()
    }
}

impl FromStr for SessionToken {
    type Err = SessionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for SessionToken {
    type Error = SessionError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<SessionToken> for String {
    fn from(token: SessionToken) -> Self {
        token.0.to_string()
    }
}

impl AsRef<str> for SessionToken {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}
