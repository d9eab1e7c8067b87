use std::{
    fmt::Display,
    sync::LazyLock,
};

use anyhow::Error;
use thiserror::Error;
use wamp_peer_values::{
    Array,
    BlobDecodeError,
    ConversionError,
    Object,
    Variant,
};

use crate::core::hash::HashMap;

/// A miscellaneous error raised locally by the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum MiscError {
    /// The operation was abandoned before it could complete.
    #[error("operation abandoned")]
    Abandoned,
    /// The operation is not valid in the current session state.
    #[error("invalid state")]
    InvalidState,
    /// The referenced item does not exist.
    #[error("item is absent")]
    Absent,
    /// The item being created already exists.
    #[error("item already exists")]
    AlreadyExists,
    /// A value had an unexpected type.
    #[error("invalid or unexpected type")]
    BadType,
    /// No subscription exists for the topic.
    #[error("no subscription under the given topic")]
    NoSuchTopic,
    /// The session ended while the operation was pending.
    #[error("session ended")]
    SessionEnded,
}

/// A WAMP error code, identified on the wire by a URI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WampErrc {
    /// The URI is not known to this library. The original URI is kept by [`WampError`].
    Unknown,
    InvalidUri,
    NoSuchProcedure,
    ProcedureAlreadyExists,
    NoSuchRegistration,
    NoSuchSubscription,
    NoSuchRealm,
    NoSuchRole,
    NoSuchPrincipal,
    ProtocolViolation,
    AuthenticationDenied,
    AuthenticationFailed,
    AuthenticationRequired,
    AuthorizationDenied,
    AuthorizationFailed,
    AuthorizationRequired,
    NotAuthorized,
    Cancelled,
    Timeout,
    PayloadSizeExceeded,
    OptionNotAllowed,
    DiscloseMeDisallowed,
    FeatureNotSupported,
    InvalidArgument,
    RuntimeError,
    CloseRealm,
    GoodbyeAndOut,
    SessionKilled,
    ClosedNormally,
    SystemShutdown,
}

static URI_TABLE: LazyLock<HashMap<&'static str, WampErrc>> = LazyLock::new(|| {
    let mut table = HashMap::from_iter(
        WampErrc::ALL
            .iter()
            .map(|errc| (errc.uri(), *errc)),
    );
    // Spellings used by other implementations.
    table.insert("wamp.error.cancelled", WampErrc::Cancelled);
    table.insert("wamp.error.goodbye_and_out", WampErrc::GoodbyeAndOut);
    table.insert("wamp.error.close_realm", WampErrc::CloseRealm);
    table.insert("wamp.error.system_shutdown", WampErrc::SystemShutdown);
    table.insert("wamp.close.timeout", WampErrc::Timeout);
    table
});

impl WampErrc {
    const ALL: [WampErrc; 29] = [
        Self::InvalidUri,
        Self::NoSuchProcedure,
        Self::ProcedureAlreadyExists,
        Self::NoSuchRegistration,
        Self::NoSuchSubscription,
        Self::NoSuchRealm,
        Self::NoSuchRole,
        Self::NoSuchPrincipal,
        Self::ProtocolViolation,
        Self::AuthenticationDenied,
        Self::AuthenticationFailed,
        Self::AuthenticationRequired,
        Self::AuthorizationDenied,
        Self::AuthorizationFailed,
        Self::AuthorizationRequired,
        Self::NotAuthorized,
        Self::Cancelled,
        Self::Timeout,
        Self::PayloadSizeExceeded,
        Self::OptionNotAllowed,
        Self::DiscloseMeDisallowed,
        Self::FeatureNotSupported,
        Self::InvalidArgument,
        Self::RuntimeError,
        Self::CloseRealm,
        Self::GoodbyeAndOut,
        Self::SessionKilled,
        Self::ClosedNormally,
        Self::SystemShutdown,
    ];

    /// The canonical URI for the error code.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Unknown => "wamp.error.unknown",
            Self::InvalidUri => "wamp.error.invalid_uri",
            Self::NoSuchProcedure => "wamp.error.no_such_procedure",
            Self::ProcedureAlreadyExists => "wamp.error.procedure_already_exists",
            Self::NoSuchRegistration => "wamp.error.no_such_registration",
            Self::NoSuchSubscription => "wamp.error.no_such_subscription",
            Self::NoSuchRealm => "wamp.error.no_such_realm",
            Self::NoSuchRole => "wamp.error.no_such_role",
            Self::NoSuchPrincipal => "wamp.error.no_such_principal",
            Self::ProtocolViolation => "wamp.error.protocol_violation",
            Self::AuthenticationDenied => "wamp.error.authentication_denied",
            Self::AuthenticationFailed => "wamp.error.authentication_failed",
            Self::AuthenticationRequired => "wamp.error.authentication_required",
            Self::AuthorizationDenied => "wamp.error.authorization_denied",
            Self::AuthorizationFailed => "wamp.error.authorization_failed",
            Self::AuthorizationRequired => "wamp.error.authorization_required",
            Self::NotAuthorized => "wamp.error.not_authorized",
            Self::Cancelled => "wamp.error.canceled",
            Self::Timeout => "wamp.error.timeout",
            Self::PayloadSizeExceeded => "wamp.error.payload_size_exceeded",
            Self::OptionNotAllowed => "wamp.error.option_not_allowed",
            Self::DiscloseMeDisallowed => "wamp.error.option_disallowed.disclose_me",
            Self::FeatureNotSupported => "wamp.error.feature_not_supported",
            Self::InvalidArgument => "wamp.error.invalid_argument",
            Self::RuntimeError => "wamp.error.runtime_error",
            Self::CloseRealm => "wamp.close.close_realm",
            Self::GoodbyeAndOut => "wamp.close.goodbye_and_out",
            Self::SessionKilled => "wamp.close.killed",
            Self::ClosedNormally => "wamp.close.normal",
            Self::SystemShutdown => "wamp.close.system_shutdown",
        }
    }

    /// Looks up the error code for a URI.
    pub fn from_uri(uri: &str) -> Self {
        URI_TABLE.get(uri).copied().unwrap_or(Self::Unknown)
    }
}

impl Display for WampErrc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.uri())
    }
}

/// A WAMP error object, as carried by ERROR and ABORT messages.
///
/// The reason URI is always preserved, even when it does not map to a known [`WampErrc`].
#[derive(Debug, Clone, PartialEq)]
pub struct WampError {
    errc: WampErrc,
    uri: String,
    details: Object,
    args: Array,
    kwargs: Object,
}

impl WampError {
    /// Creates a new error for a known error code.
    pub fn new(errc: WampErrc) -> Self {
        Self {
            errc,
            uri: errc.uri().to_owned(),
            details: Object::default(),
            args: Array::default(),
            kwargs: Object::default(),
        }
    }

    /// Creates a new error from a reason URI.
    pub fn from_uri<S>(uri: S) -> Self
    where
        S: Into<String>,
    {
        let uri = uri.into();
        Self {
            errc: WampErrc::from_uri(&uri),
            uri,
            details: Object::default(),
            args: Array::default(),
            kwargs: Object::default(),
        }
    }

    /// Creates an invalid argument error, with the message as the only positional argument.
    pub fn invalid_argument<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self::new(WampErrc::InvalidArgument).with_args(vec![Variant::String(message.into())])
    }

    pub fn with_details(mut self, details: Object) -> Self {
        self.details = details;
        self
    }

    pub fn with_args(mut self, args: Array) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Object) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Attaches a human-readable message under `details.message`.
    pub fn with_message<S>(mut self, message: S) -> Self
    where
        S: Into<String>,
    {
        self.details
            .insert("message".to_owned(), Variant::String(message.into()));
        self
    }

    pub fn errc(&self) -> WampErrc {
        self.errc
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn details(&self) -> &Object {
        &self.details
    }

    pub fn args(&self) -> &Array {
        &self.args
    }

    pub fn kwargs(&self) -> &Object {
        &self.kwargs
    }

    /// Checks if the error carries a payload beyond its URI.
    pub fn has_payload(&self) -> bool {
        !self.args.is_empty() || !self.kwargs.is_empty()
    }

    /// A human-readable message, taken from `details.message` or the first positional argument.
    pub fn message(&self) -> Option<&str> {
        self.details
            .get("message")
            .and_then(Variant::as_str)
            .or_else(|| self.args.first().and_then(Variant::as_str))
    }

    /// Splits the error into its parts.
    pub fn into_parts(self) -> (String, Object, Array, Object) {
        (self.uri, self.details, self.args, self.kwargs)
    }
}

impl From<WampErrc> for WampError {
    fn from(value: WampErrc) -> Self {
        Self::new(value)
    }
}

impl Display for WampError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.message() {
            Some(message) => write!(f, "{}: {message}", self.uri),
            None => write!(f, "{}", self.uri),
        }
    }
}

impl std::error::Error for WampError {}

/// An error for a message that breaks the rules of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol violation: {0}")]
pub struct ProtocolViolation(pub String);

impl ProtocolViolation {
    pub fn new<S>(message: S) -> Self
    where
        S: Into<String>,
    {
        Self(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}

/// An error decoding bytes received over a transport.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodingError {
    #[error("decoding failed: {0}")]
    Failed(String),
    #[error("input is empty")]
    EmptyInput,
    #[error("map key is not a string")]
    ExpectedStringKey,
    #[error("invalid base64 length")]
    BadBase64Length,
    #[error("invalid base64 padding")]
    BadBase64Padding,
    #[error("invalid base64 character")]
    BadBase64Char,
    #[error("top-level value is not an array")]
    NotAnArray,
}

impl From<BlobDecodeError> for DecodingError {
    fn from(value: BlobDecodeError) -> Self {
        match value {
            BlobDecodeError::BadLength => Self::BadBase64Length,
            BlobDecodeError::BadPadding => Self::BadBase64Padding,
            BlobDecodeError::BadChar => Self::BadBase64Char,
        }
    }
}

/// An error raised by a transport or during transport negotiation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport aborted")]
    Aborted,
    #[error("transport ended by peer")]
    Ended,
    #[error("transport disconnected")]
    Disconnected,
    #[error("transport timed out")]
    Timeout,
    #[error("transport failed: {0}")]
    Failed(String),
    #[error("all connection attempts failed")]
    Exhausted,
    #[error("peer is overloaded")]
    Overloaded,
    #[error("connection shedded by peer")]
    Shedded,
    #[error("peer is unresponsive")]
    Unresponsive,
    #[error("inbound message exceeds the receive limit")]
    InboundTooLong,
    #[error("outbound message exceeds the send limit")]
    OutboundTooLong,
    #[error("handshake declined by peer")]
    HandshakeDeclined,
    #[error("bad handshake")]
    BadHandshake,
    #[error("bad command")]
    BadCommand,
    #[error("unsupported serializer")]
    BadSerializer,
    #[error("bad length limit")]
    BadLengthLimit,
    #[error("unsupported feature")]
    BadFeature,
    #[error("expected binary message")]
    ExpectedBinary,
    #[error("expected text message")]
    ExpectedText,
    #[error("no serializer negotiated")]
    NoSerializer,
}

/// Maps an error raised by application code to the WAMP error that should be sent to the peer.
///
/// Returns [`None`] for errors that have no WAMP representation.
pub fn recognize_wamp_error(error: &Error) -> Option<WampError> {
    if let Some(error) = error.downcast_ref::<WampError>() {
        return Some(error.clone());
    }
    if let Some(error) = error.downcast_ref::<ConversionError>() {
        return Some(WampError::invalid_argument(error.to_string()));
    }
    if let Some(MiscError::BadType) = error.downcast_ref::<MiscError>() {
        return Some(WampError::invalid_argument(error.to_string()));
    }
    if let Some(errc) = error.downcast_ref::<WampErrc>() {
        return Some(WampError::new(*errc));
    }
    if let Some(error) = error.downcast_ref::<ProtocolViolation>() {
        return Some(WampError::new(WampErrc::ProtocolViolation).with_message(error.message()));
    }
    None
}

impl std::error::Error for WampErrc {}

#[cfg(test)]
mod error_test {
    use anyhow::Error;
    use wamp_peer_values::{
        ConversionError,
        Variant,
    };

    use crate::core::error::{
        MiscError,
        WampErrc,
        WampError,
        recognize_wamp_error,
    };

    #[test]
    fn maps_known_uris() {
        assert_eq!(
            WampErrc::from_uri("wamp.error.no_such_procedure"),
            WampErrc::NoSuchProcedure
        );
        assert_eq!(
            WampErrc::from_uri("wamp.close.goodbye_and_out"),
            WampErrc::GoodbyeAndOut
        );
        assert_eq!(WampErrc::from_uri("wamp.error.cancelled"), WampErrc::Cancelled);
        assert_eq!(WampErrc::from_uri("wamp.error.canceled"), WampErrc::Cancelled);
    }

    #[test]
    fn preserves_unknown_uris() {
        let error = WampError::from_uri("com.example.oops");
        assert_eq!(error.errc(), WampErrc::Unknown);
        assert_eq!(error.uri(), "com.example.oops");
        assert_eq!(error.to_string(), "com.example.oops");
    }

    #[test]
    fn reads_message_from_details_or_args() {
        let error = WampError::new(WampErrc::RuntimeError).with_message("boom");
        assert_eq!(error.message(), Some("boom"));
        let error = WampError::new(WampErrc::RuntimeError).with_args(vec![Variant::from("bang")]);
        assert_eq!(error.message(), Some("bang"));
        assert_eq!(error.to_string(), "wamp.error.runtime_error: bang");
    }

    #[test]
    fn recognizes_application_errors() {
        let error = Error::new(WampError::new(WampErrc::NotAuthorized));
        assert_matches::assert_matches!(recognize_wamp_error(&error), Some(error) => {
            assert_eq!(error.errc(), WampErrc::NotAuthorized);
        });

        let error = Error::new(ConversionError::new("expected integer").at_index(0));
        assert_matches::assert_matches!(recognize_wamp_error(&error), Some(error) => {
            assert_eq!(error.errc(), WampErrc::InvalidArgument);
            assert_eq!(error.args(), &vec![Variant::from("at [0]: expected integer")]);
        });

        let error = Error::new(MiscError::BadType);
        assert_matches::assert_matches!(recognize_wamp_error(&error), Some(error) => {
            assert_eq!(error.errc(), WampErrc::InvalidArgument);
        });

        assert_matches::assert_matches!(recognize_wamp_error(&Error::msg("opaque")), None);
    }
}
