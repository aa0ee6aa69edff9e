// Opaque server-issued query cursors, transported as base64 on the JSON wire.
use std::fmt;

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;

use crate::core::error::Error;

#[derive(Clone, Eq, Hash, PartialEq)]
pub struct Cursor(Bytes);

impl Cursor {
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        Self(bytes.into())
    }

    pub fn from_base64(encoded: &str) -> Result<Self, Error> {
        let bytes = BASE64
            .decode(encoded)
            .map_err(|err| Error::invalid_argument("cursor is not valid base64").with_source(err))?;
        Ok(Self(Bytes::from(bytes)))
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cursor({})", self.to_base64())
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base64())
    }
}

/// Decode an optional wire cursor; empty strings mean "no cursor".
pub(crate) fn decode_wire_cursor(encoded: Option<&str>) -> Result<Option<Cursor>, Error> {
    match encoded {
        None | Some("") => Ok(None),
        Some(text) => Cursor::from_base64(text)
            .map(Some)
            .map_err(|err| Error::decode("server returned an invalid cursor").with_source(err)),
    }
}

#[cfg(test)]
mod tests {
    use super::{Cursor, decode_wire_cursor};
    use crate::core::error::ErrorKind;

    #[test]
    fn base64_round_trips() {
        let cursor = Cursor::from_bytes(&b"\x01\x02page"[..]);
        let encoded = cursor.to_base64();
        assert_eq!(Cursor::from_base64(&encoded).expect("decode"), cursor);
        assert_eq!(cursor.to_string(), encoded);
    }

    #[test]
    fn invalid_base64_is_rejected() {
        let err = Cursor::from_base64("not base64!").expect_err("err");
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn empty_wire_cursor_is_absent() {
        assert_eq!(decode_wire_cursor(Some("")).expect("empty"), None);
        assert_eq!(decode_wire_cursor(None).expect("none"), None);
        let err = decode_wire_cursor(Some("%%")).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Decode);
    }
}
