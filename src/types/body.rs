//! Text encoding of event payloads inside JSON documents

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// How a payload is stored in a JSON string field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyEncoding {
    #[default]
    Utf8,
    Base64,
}

/// Encode bytes for a JSON string field, preferring plain UTF-8
pub fn encode_body(body: &[u8]) -> (String, BodyEncoding) {
    match std::str::from_utf8(body) {
        Ok(text) => (text.to_string(), BodyEncoding::Utf8),
        Err(_) => (STANDARD.encode(body), BodyEncoding::Base64),
    }
}

/// Decode a JSON string field back into payload bytes
pub fn decode_body(body: &str, encoding: BodyEncoding) -> Result<Vec<u8>, base64::DecodeError> {
    match encoding {
        BodyEncoding::Utf8 => Ok(body.as_bytes().to_vec()),
        BodyEncoding::Base64 => STANDARD.decode(body),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_stays_readable() {
        let (text, encoding) = encode_body(br#"{"order": 42}"#);
        assert_eq!(encoding, BodyEncoding::Utf8);
        assert_eq!(text, r#"{"order": 42}"#);
    }

    #[test]
    fn test_binary_uses_base64() {
        let payload = vec![0xff, 0x00, 0xfe];
        let (text, encoding) = encode_body(&payload);
        assert_eq!(encoding, BodyEncoding::Base64);
        assert_eq!(decode_body(&text, encoding).unwrap(), payload);
    }
}
