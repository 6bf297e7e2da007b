use std::fmt;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use bytes::Bytes;

/// A stored value: text or raw bytes. No schema is imposed on either.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Text(String),
    Bytes(Bytes),
}

impl Value {
    pub fn is_text(&self) -> bool {
        matches!(self, Value::Text(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(text) => Some(text),
            Value::Bytes(_) => None,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Value::Text(text) => text.as_bytes(),
            Value::Bytes(bytes) => bytes,
        }
    }

    /// Body sent to the backend. Text is stored as utf-8.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Value::Text(text) => Bytes::from(text),
            Value::Bytes(bytes) => bytes,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Text(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Text(value)
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value))
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Value::Bytes(Bytes::from(value))
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Bytes(value)
    }
}

/// Text encodings a body can be decoded with on read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Encoding {
    /// Strict utf-8; invalid sequences are a decode error.
    #[default]
    Utf8,
    /// utf-8 with invalid sequences replaced by U+FFFD.
    Utf8Lossy,
    /// ISO-8859-1: every byte maps to the code point of the same value.
    Latin1,
    /// Lowercase hexadecimal.
    Hex,
    /// Standard padded base64.
    Base64,
}

impl Encoding {
    /// Decode `bytes` into text, or `None` when they are not valid under this encoding.
    pub fn decode(&self, bytes: &[u8]) -> Option<String> {
        match self {
            Encoding::Utf8 => std::str::from_utf8(bytes).ok().map(str::to_owned),
            Encoding::Utf8Lossy => Some(String::from_utf8_lossy(bytes).into_owned()),
            Encoding::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
            Encoding::Hex => Some(hex::encode(bytes)),
            Encoding::Base64 => Some(B64.encode(bytes)),
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Encoding::Utf8 => "utf-8",
            Encoding::Utf8Lossy => "utf-8 (lossy)",
            Encoding::Latin1 => "latin1",
            Encoding::Hex => "hex",
            Encoding::Base64 => "base64",
        };
        f.write_str(name)
    }
}
