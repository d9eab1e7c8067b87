use anyhow::{
    Error,
    Result,
};
use serde_json::Value;
use wamp_peer_values::{
    BLOB_PREFIX,
    Blob,
    Object,
    Variant,
};

use crate::{
    codec::codec::{
        Codec,
        CodecId,
    },
    core::error::DecodingError,
};

/// A codec implemented for JavaScript Object Notation.
///
/// Blobs are encoded as strings holding a NUL character followed by standard base64.
#[derive(Debug, Default)]
pub struct JsonCodec {}

fn from_json(value: Value) -> Result<Variant, DecodingError> {
    let value = match value {
        Value::Null => Variant::Null,
        Value::Bool(value) => Variant::Bool(value),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Variant::Int(value)
            } else if let Some(value) = number.as_u64() {
                Variant::UInt(value)
            } else {
                Variant::Real(number.as_f64().unwrap_or(f64::NAN))
            }
        }
        Value::String(value) => match value.strip_prefix(BLOB_PREFIX) {
            Some(encoded) => Variant::Blob(Blob::from_base64(encoded)?),
            None => Variant::String(value),
        },
        Value::Array(values) => Variant::Array(
            values
                .into_iter()
                .map(from_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(values) => Variant::Object(
            values
                .into_iter()
                .map(|(key, value)| Ok((key, from_json(value)?)))
                .collect::<Result<Object, DecodingError>>()?,
        ),
    };
    Ok(value)
}

impl Codec for JsonCodec {
    fn id(&self) -> CodecId {
        CodecId::Json
    }

    fn encode(&self, value: &Variant, output: &mut Vec<u8>) -> Result<()> {
        serde_json::to_writer(output, value).map_err(Error::new)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Variant, DecodingError> {
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodingError::EmptyInput);
        }
        let value = serde_json::from_slice::<Value>(bytes)
            .map_err(|err| DecodingError::Failed(err.to_string()))?;
        from_json(value)
    }
}

#[cfg(test)]
mod json_test {
    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Blob,
        Object,
        Variant,
    };

    use crate::{
        codec::{
            codec::Codec,
            json::JsonCodec,
        },
        core::error::DecodingError,
    };

    fn encode(value: &Variant) -> String {
        let mut output = Vec::new();
        JsonCodec::default().encode(value, &mut output).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn encodes_messages_compactly() {
        let value = Variant::Array(vec![
            Variant::UInt(32),
            Variant::UInt(1),
            Variant::Object(Object::new()),
            Variant::from("com.example.t"),
        ]);
        assert_eq!(encode(&value), r#"[32,1,{},"com.example.t"]"#);
    }

    #[test]
    fn encodes_blobs_as_prefixed_base64() {
        let value = Variant::Array(vec![Variant::Blob(Blob::new(b"hi".to_vec()))]);
        assert_eq!(encode(&value), r#"["\u0000aGk="]"#);
    }

    #[test]
    fn decodes_numbers_by_range() {
        let value = JsonCodec::default()
            .decode(br#"[-1, 18446744073709551615, 2.5, 9007199254740992]"#)
            .unwrap();
        assert_eq!(
            value,
            Variant::Array(vec![
                Variant::Int(-1),
                Variant::UInt(u64::MAX),
                Variant::Real(2.5),
                Variant::Int(1 << 53),
            ])
        );
        assert_matches::assert_matches!(value.at(0), Some(Variant::Int(-1)));
        assert_matches::assert_matches!(value.at(1), Some(Variant::UInt(u64::MAX)));
        assert_matches::assert_matches!(value.at(2), Some(Variant::Real(_)));
    }

    #[test]
    fn decodes_blobs() {
        let value = JsonCodec::default().decode(br#"["\u0000aGk=", "plain"]"#).unwrap();
        assert_eq!(
            value,
            Variant::Array(vec![
                Variant::Blob(Blob::new(b"hi".to_vec())),
                Variant::from("plain"),
            ])
        );
    }

    #[test]
    fn reports_typed_decoding_errors() {
        let codec = JsonCodec::default();
        assert_eq!(codec.decode(b""), Err(DecodingError::EmptyInput));
        assert_eq!(codec.decode(b"  \n"), Err(DecodingError::EmptyInput));
        assert_matches::assert_matches!(codec.decode(b"[1, 2] x"), Err(DecodingError::Failed(_)));
        assert_matches::assert_matches!(codec.decode(b"[1, "), Err(DecodingError::Failed(_)));
        assert_eq!(
            codec.decode(br#"["\u0000aGk"]"#),
            Err(DecodingError::BadBase64Padding)
        );
        assert_eq!(
            codec.decode(br#"["\u0000a*k="]"#),
            Err(DecodingError::BadBase64Char)
        );
    }
}
