use wamp_peer_values::{
    Object,
    Variant,
};

use crate::{
    core::{
        error::{
            WampErrc,
            WampError,
        },
        id::Id,
    },
    message::{
        kind::MessageKind,
        message::Message,
    },
};

/// An ABORT message carrying the error.
pub fn abort_for_error(error: WampError) -> Message {
    let (uri, details, args, kwargs) = error.into_parts();
    Message::abort(details, uri).with_payload(args, kwargs)
}

/// An ABORT message with a reason and a human-readable hint.
pub fn abort_with_hint(errc: WampErrc, hint: &str) -> Message {
    abort_for_error(WampError::new(errc).with_message(hint))
}

/// A GOODBYE message for the given reason.
pub fn goodbye_with_reason<S>(reason: S, details: Object) -> Message
where
    S: Into<String>,
{
    Message::goodbye(details, reason)
}

/// The GOODBYE message sent in response to a peer's GOODBYE.
pub fn goodbye_and_out() -> Message {
    goodbye_with_reason(WampErrc::GoodbyeAndOut.uri(), Object::new())
}

/// An ERROR message in response to a request.
pub fn error_for_request(request_kind: MessageKind, request_id: Id, error: WampError) -> Message {
    let (uri, details, args, kwargs) = error.into_parts();
    Message::error(request_kind, request_id, details, uri).with_payload(args, kwargs)
}

/// A WAMP error built from an ERROR or ABORT message.
pub fn wamp_error_from_message(message: Message) -> WampError {
    let uri = message.uri().unwrap_or(WampErrc::Unknown.uri()).to_owned();
    let payload = message.into_payload();
    WampError::from_uri(uri)
        .with_details(payload.options)
        .with_args(payload.args)
        .with_kwargs(payload.kwargs)
}

/// Builds an options object with a single entry.
pub(crate) fn single_option<K, V>(key: K, value: V) -> Object
where
    K: Into<String>,
    V: Into<Variant>,
{
    Object::from_iter([(key.into(), value.into())])
}

#[cfg(test)]
mod common_test {
    use wamp_peer_values::Variant;

    use crate::{
        core::{
            error::{
                WampErrc,
                WampError,
            },
            id::Id,
        },
        message::{
            common::{
                error_for_request,
                goodbye_and_out,
                wamp_error_from_message,
            },
            kind::MessageKind,
        },
    };

    #[test]
    fn builds_error_for_request() {
        let message = error_for_request(
            MessageKind::Invocation,
            Id::try_from(5).unwrap(),
            WampError::new(WampErrc::NoSuchProcedure),
        );
        assert_eq!(
            message.into_variant(),
            Variant::Array(vec![
                Variant::UInt(8),
                Variant::UInt(68),
                Variant::UInt(5),
                Variant::Object(Default::default()),
                Variant::from("wamp.error.no_such_procedure"),
            ])
        );
    }

    #[test]
    fn reads_error_back_from_message() {
        let message = error_for_request(
            MessageKind::Call,
            Id::try_from(2).unwrap(),
            WampError::invalid_argument("bad"),
        );
        let error = wamp_error_from_message(message);
        assert_eq!(error.errc(), WampErrc::InvalidArgument);
        assert_eq!(error.message(), Some("bad"));
    }

    #[test]
    fn replies_goodbye_and_out() {
        assert_eq!(goodbye_and_out().uri(), Some("wamp.close.goodbye_and_out"));
    }
}
