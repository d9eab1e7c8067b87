use std::fmt::{
    Debug,
    Display,
};

use anyhow::Result;
use wamp_peer_values::Variant;

use crate::{
    codec::{
        json::JsonCodec,
        message_pack::MessagePackCodec,
    },
    core::error::{
        DecodingError,
        TransportError,
    },
};

/// The format used to encode messages on the wire.
///
/// The numeric value is the serializer ID used by raw socket transports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecId {
    /// JavaScript Object Notation.
    Json = 1,
    /// MessagePack.
    MsgPack = 2,
    /// Concise Binary Object Representation.
    Cbor = 3,
}

impl CodecId {
    /// The subprotocol name used during protocol negotiation.
    pub fn subprotocol(&self) -> &'static str {
        match self {
            Self::Json => "wamp.2.json",
            Self::MsgPack => "wamp.2.msgpack",
            Self::Cbor => "wamp.2.cbor",
        }
    }

    /// Checks if encoded messages are text, rather than binary.
    pub fn is_text(&self) -> bool {
        matches!(self, Self::Json)
    }

    /// Checks if [`new_codec`] can create a codec for this format.
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Cbor)
    }
}

impl Display for CodecId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.subprotocol())
    }
}

impl TryFrom<&str> for CodecId {
    type Error = TransportError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "wamp.2.json" => Ok(Self::Json),
            "wamp.2.msgpack" => Ok(Self::MsgPack),
            "wamp.2.cbor" => Ok(Self::Cbor),
            _ => Err(TransportError::BadSerializer),
        }
    }
}

impl TryFrom<u8> for CodecId {
    type Error = TransportError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Json),
            2 => Ok(Self::MsgPack),
            3 => Ok(Self::Cbor),
            _ => Err(TransportError::BadSerializer),
        }
    }
}

/// A codec, which encodes and decodes dynamic values to a well-known format that can be passed over
/// the wire.
///
/// Does not implement message batching.
pub trait Codec: Send + Sync + Debug {
    /// The codec identifier.
    fn id(&self) -> CodecId;

    /// Encodes the value, appending to the output buffer.
    fn encode(&self, value: &Variant, output: &mut Vec<u8>) -> Result<()>;

    /// Decodes bytes to a value. The entire input must be consumed.
    fn decode(&self, bytes: &[u8]) -> Result<Variant, DecodingError>;
}

/// Creates a new [`Codec`] for the given identifier.
pub fn new_codec(id: CodecId) -> Result<Box<dyn Codec>, TransportError> {
    match id {
        CodecId::Json => Ok(Box::new(JsonCodec::default())),
        CodecId::MsgPack => Ok(Box::new(MessagePackCodec::default())),
        CodecId::Cbor => Err(TransportError::BadSerializer),
    }
}

#[cfg(test)]
mod codec_test {
    use std::collections::BTreeSet;

    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Blob,
        Object,
        Variant,
    };

    use crate::{
        codec::codec::{
            CodecId,
            new_codec,
        },
        core::{
            error::TransportError,
            id::Id,
        },
        message::{
            kind::MessageKind,
            message::Message,
        },
    };

    fn id(value: u64) -> Id {
        Id::try_from(value).unwrap()
    }

    fn details() -> Object {
        Object::from_iter([
            ("flag".to_owned(), Variant::Bool(true)),
            ("nested".to_owned(), Variant::Object(Object::from_iter([(
                "n".to_owned(),
                Variant::Int(-7),
            )]))),
        ])
    }

    fn payload(message: Message) -> Message {
        message.with_payload(
            vec![
                Variant::Null,
                Variant::Real(1.5),
                Variant::from("caf\u{e9}"),
                Variant::Blob(Blob::new(vec![0, 1, 254, 255])),
                Variant::Array(vec![Variant::UInt(1 << 53)]),
            ],
            details(),
        )
    }

    fn every_message_kind() -> Vec<Message> {
        let big = Id::MAX;
        vec![
            Message::hello("com.example.realm", details()),
            Message::welcome(big, details()),
            Message::abort(details(), "wamp.error.no_such_realm"),
            Message::challenge("ticket", details()),
            Message::authenticate("secret", Object::new()),
            Message::goodbye(Object::new(), "wamp.close.close_realm"),
            payload(Message::error(
                MessageKind::Call,
                id(5),
                details(),
                "wamp.error.runtime_error",
            )),
            payload(Message::publish(details(), "com.example.topic")),
            Message::published(id(2), big),
            Message::subscribe(Object::new(), "com.example.topic"),
            Message::subscribed(id(3), id(30)),
            Message::unsubscribe(id(30)),
            Message::unsubscribed(id(4)),
            payload(Message::event(id(30), id(300), details())),
            payload(Message::call(Object::new(), "com.example.add")),
            Message::cancel(id(6), Object::from_iter([(
                "mode".to_owned(),
                Variant::from("kill"),
            )])),
            payload(Message::result(id(6), Object::new())),
            Message::register(Object::new(), "com.example.add"),
            Message::registered(id(7), id(70)),
            Message::unregister(id(70)),
            Message::unregistered(id(8)),
            payload(Message::invocation(id(9), id(70), details())),
            Message::interrupt(id(9), Object::new()),
            payload(Message::yield_result(id(9), Object::new())),
        ]
    }

    fn preserves_every_message_kind(codec_id: CodecId) {
        let codec = new_codec(codec_id).unwrap();
        let messages = every_message_kind();
        let kinds = messages
            .iter()
            .map(|message| message.kind())
            .collect::<BTreeSet<_>>();
        assert_eq!(kinds.len(), 24);

        for message in messages {
            let mut bytes = Vec::new();
            codec
                .encode(&message.clone().into_variant(), &mut bytes)
                .unwrap();
            let decoded = Message::parse(codec.decode(&bytes).unwrap()).unwrap();
            assert_eq!(decoded, message, "{} over {codec_id}", message.kind());
        }
    }

    #[test]
    fn json_preserves_every_message_kind() {
        preserves_every_message_kind(CodecId::Json);
    }

    #[test]
    fn message_pack_preserves_every_message_kind() {
        preserves_every_message_kind(CodecId::MsgPack);
    }

    #[test]
    fn negotiates_known_subprotocols() {
        assert_eq!(CodecId::try_from("wamp.2.json"), Ok(CodecId::Json));
        assert_eq!(CodecId::try_from("wamp.2.msgpack"), Ok(CodecId::MsgPack));
        assert_eq!(CodecId::try_from("wamp.2.cbor"), Ok(CodecId::Cbor));
        assert_eq!(
            CodecId::try_from("wamp.2.ubjson"),
            Err(TransportError::BadSerializer)
        );
        assert_eq!(CodecId::try_from(2u8), Ok(CodecId::MsgPack));
    }

    #[test]
    fn creates_supported_codecs() {
        assert_matches::assert_matches!(new_codec(CodecId::Json), Ok(codec) => {
            assert_eq!(codec.id(), CodecId::Json);
        });
        assert_matches::assert_matches!(new_codec(CodecId::MsgPack), Ok(codec) => {
            assert_eq!(codec.id(), CodecId::MsgPack);
        });
        assert_matches::assert_matches!(
            new_codec(CodecId::Cbor),
            Err(TransportError::BadSerializer)
        );
        for id in [CodecId::Json, CodecId::MsgPack, CodecId::Cbor] {
            assert_eq!(id.is_supported(), new_codec(id).is_ok(), "{id}");
        }
    }
}
