use anyhow::{
    Error,
    Result,
};
use serde::{
    Deserialize,
    Serialize,
};
use wamp_peer_values::{
    EXPECTED_STRING_KEY,
    Variant,
};

use crate::{
    codec::codec::{
        Codec,
        CodecId,
    },
    core::error::DecodingError,
};

/// A codec implemented for MessagePack.
///
/// Blobs are encoded with the native binary type.
#[derive(Debug, Default)]
pub struct MessagePackCodec {}

impl Codec for MessagePackCodec {
    fn id(&self) -> CodecId {
        CodecId::MsgPack
    }

    fn encode(&self, value: &Variant, output: &mut Vec<u8>) -> Result<()> {
        value
            .serialize(&mut rmp_serde::Serializer::new(output))
            .map_err(Error::new)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Variant, DecodingError> {
        if bytes.is_empty() {
            return Err(DecodingError::EmptyInput);
        }
        let mut remaining = bytes;
        let value = {
            let mut deserializer = rmp_serde::Deserializer::new(&mut remaining);
            Variant::deserialize(&mut deserializer).map_err(|err| {
                let message = err.to_string();
                if message.contains(EXPECTED_STRING_KEY) {
                    DecodingError::ExpectedStringKey
                } else {
                    DecodingError::Failed(message)
                }
            })?
        };
        if !remaining.is_empty() {
            return Err(DecodingError::Failed(format!(
                "{} trailing bytes after value",
                remaining.len()
            )));
        }
        Ok(value)
    }
}

#[cfg(test)]
mod message_pack_test {
    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Blob,
        Object,
        Variant,
    };

    use crate::{
        codec::{
            codec::Codec,
            message_pack::MessagePackCodec,
        },
        core::error::DecodingError,
    };

    #[test]
    fn encodes_and_decodes_messages() {
        let codec = MessagePackCodec::default();
        let value = Variant::Array(vec![
            Variant::UInt(48),
            Variant::UInt(7),
            Variant::Object(Object::from_iter([(
                "receive_progress".to_owned(),
                Variant::Bool(true),
            )])),
            Variant::from("com.example.add"),
            Variant::Array(vec![
                Variant::Int(-3),
                Variant::Real(0.5),
                Variant::Blob(Blob::new(vec![0, 255])),
                Variant::Null,
            ]),
        ]);
        let mut bytes = Vec::new();
        codec.encode(&value, &mut bytes).unwrap();
        assert_eq!(codec.decode(&bytes), Ok(value));
    }

    #[test]
    fn encodes_small_integers_compactly() {
        let mut bytes = Vec::new();
        MessagePackCodec::default()
            .encode(&Variant::Array(vec![Variant::UInt(1)]), &mut bytes)
            .unwrap();
        assert_eq!(bytes, vec![0x91, 0x01]);
    }

    #[test]
    fn rejects_non_string_keys() {
        // {1: true}
        assert_eq!(
            MessagePackCodec::default().decode(&[0x81, 0x01, 0xc3]),
            Err(DecodingError::ExpectedStringKey)
        );
    }

    #[test]
    fn rejects_trailing_bytes() {
        assert_matches::assert_matches!(
            MessagePackCodec::default().decode(&[0x91, 0x01, 0x01]),
            Err(DecodingError::Failed(_))
        );
    }

    #[test]
    fn rejects_empty_and_truncated_input() {
        let codec = MessagePackCodec::default();
        assert_eq!(codec.decode(&[]), Err(DecodingError::EmptyInput));
        assert_matches::assert_matches!(codec.decode(&[0x92, 0x01]), Err(DecodingError::Failed(_)));
    }
}
