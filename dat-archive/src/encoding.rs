//! Encodings of file content at the API boundary.

use bytes::Bytes;
use data_encoding::{BASE64, HEXLOWER_PERMISSIVE};
use serde::{Deserialize, Serialize};

use crate::error::{ArchiveError, Result};

/// How file content is represented when reading and writing.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Encoding {
    /// UTF-8 text.
    #[default]
    #[strum(to_string = "utf8", serialize = "utf-8")]
    Utf8,
    /// Lowercase hex text.
    Hex,
    /// Standard padded base64 text.
    Base64,
    /// Raw bytes.
    Binary,
}

/// File content, either text or raw bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileContent {
    /// Text, interpreted according to an [`Encoding`].
    Text(String),
    /// Raw bytes.
    Binary(Bytes),
}

impl From<String> for FileContent {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for FileContent {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<Bytes> for FileContent {
    fn from(value: Bytes) -> Self {
        Self::Binary(value)
    }
}

impl From<Vec<u8>> for FileContent {
    fn from(value: Vec<u8>) -> Self {
        Self::Binary(value.into())
    }
}

impl From<&[u8]> for FileContent {
    fn from(value: &[u8]) -> Self {
        Self::Binary(Bytes::copy_from_slice(value))
    }
}

impl FileContent {
    /// Returns the text, if this is text content.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }

    /// Returns the bytes, if this is binary content.
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Self::Text(_) => None,
            Self::Binary(bytes) => Some(bytes),
        }
    }

    /// Converts content passed to a write into the bytes to store.
    ///
    /// Binary content is stored as is. Text is decoded according to `encoding`, where
    /// [`Encoding::Binary`] text is taken as latin-1.
    pub fn into_bytes(self, encoding: Encoding) -> Result<Bytes> {
        let text = match self {
            Self::Binary(bytes) => return Ok(bytes),
            Self::Text(text) => text,
        };
        let bytes = match encoding {
            Encoding::Utf8 => text.into_bytes(),
            Encoding::Hex => HEXLOWER_PERMISSIVE
                .decode(text.trim().as_bytes())
                .map_err(|err| invalid_content(encoding, err))?,
            Encoding::Base64 => BASE64
                .decode(text.trim().as_bytes())
                .map_err(|err| invalid_content(encoding, err))?,
            Encoding::Binary => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).map_err(|_| invalid_latin1(c)))
                .collect::<Result<Vec<u8>>>()?,
        };
        Ok(bytes.into())
    }

    /// Represents stored bytes in `encoding`.
    ///
    /// Bytes that are not valid UTF-8 are replaced when reading as [`Encoding::Utf8`].
    pub fn from_bytes(bytes: Bytes, encoding: Encoding) -> Self {
        match encoding {
            Encoding::Utf8 => Self::Text(String::from_utf8_lossy(&bytes).into_owned()),
            Encoding::Hex => Self::Text(HEXLOWER_PERMISSIVE.encode(&bytes)),
            Encoding::Base64 => Self::Text(BASE64.encode(&bytes)),
            Encoding::Binary => Self::Binary(bytes),
        }
    }
}

fn invalid_content(encoding: Encoding, err: data_encoding::DecodeError) -> ArchiveError {
    ArchiveError::InvalidArgument(format!("content is not valid {encoding}: {err}").into())
}

fn invalid_latin1(c: char) -> ArchiveError {
    ArchiveError::InvalidArgument(format!("character {c:?} can not be written as binary").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_names() {
        assert_eq!("utf8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("UTF-8".parse::<Encoding>().unwrap(), Encoding::Utf8);
        assert_eq!("base64".parse::<Encoding>().unwrap(), Encoding::Base64);
        assert_eq!(Encoding::Hex.to_string(), "hex");
        assert!("latin2".parse::<Encoding>().is_err());
    }

    #[test]
    fn decode_text_for_write() {
        let hex = FileContent::from("68656c6c6f").into_bytes(Encoding::Hex).unwrap();
        assert_eq!(&hex[..], b"hello");
        let b64 = FileContent::from("aGVsbG8=").into_bytes(Encoding::Base64).unwrap();
        assert_eq!(&b64[..], b"hello");
        let latin1 = FileContent::from("\u{00ff}a").into_bytes(Encoding::Binary).unwrap();
        assert_eq!(&latin1[..], &[0xff, b'a']);
        let raw = FileContent::from(vec![1u8, 2, 3])
            .into_bytes(Encoding::Hex)
            .unwrap();
        assert_eq!(&raw[..], &[1, 2, 3]);
    }

    #[test]
    fn reject_malformed_text() {
        assert!(FileContent::from("zz").into_bytes(Encoding::Hex).is_err());
        assert!(FileContent::from("!!!").into_bytes(Encoding::Base64).is_err());
        assert!(FileContent::from("€").into_bytes(Encoding::Binary).is_err());
    }

    #[test]
    fn encode_for_read() {
        let bytes = Bytes::from_static(&[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(
            FileContent::from_bytes(bytes.clone(), Encoding::Hex),
            FileContent::Text("deadbeef".into())
        );
        assert_eq!(
            FileContent::from_bytes(bytes.clone(), Encoding::Base64),
            FileContent::Text("3q2+7w==".into())
        );
        assert_eq!(
            FileContent::from_bytes(bytes.clone(), Encoding::Binary),
            FileContent::Binary(bytes)
        );
        assert_eq!(
            FileContent::from_bytes(Bytes::from_static(b"hi"), Encoding::Utf8).as_text(),
            Some("hi")
        );
    }
}
