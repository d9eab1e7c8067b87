use std::fmt::Display;

use wamp_peer_values::{
    Variant,
    VariantKind,
};

/// The expected type of a message field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    /// The message tag; a non-negative integer.
    Tag,
    /// A non-negative integer, such as an ID or a request type.
    Int,
    String,
    Object,
    Array,
}

impl FieldType {
    /// Checks if the value has the expected type.
    pub fn matches(&self, value: &Variant) -> bool {
        match self {
            Self::Tag | Self::Int => value.as_u64().is_some() && value.is_integer(),
            Self::String => value.kind() == VariantKind::String,
            Self::Object => value.kind() == VariantKind::Object,
            Self::Array => value.kind() == VariantKind::Array,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tag | Self::Int => "non-negative integer",
            Self::String => "string",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

/// Static properties of a message kind.
#[derive(Debug)]
pub struct KindTraits {
    pub name: &'static str,
    /// Expected type of each field, including the tag at position 0. The length is the maximum
    /// number of fields.
    pub fields: &'static [FieldType],
    pub min_size: usize,
    /// Position of the request ID, or 0 if the kind carries none.
    pub id_position: usize,
    /// Position of the URI (or authentication string) field, or 0 if the kind carries none.
    pub uri_position: usize,
    /// Position of the options (or details) object, or 0 if the kind carries none.
    pub options_position: usize,
    /// Position of the positional arguments, or 0 if the kind carries no payload.
    pub args_position: usize,
    /// The request kind this kind replies to.
    pub replies_to: Option<MessageKind>,
    pub valid_as_client_rx: bool,
    pub valid_as_router_rx: bool,
    pub valid_while_establishing: bool,
    pub valid_while_authenticating: bool,
    pub valid_while_established: bool,
    pub valid_while_shutting_down: bool,
}

impl KindTraits {
    pub fn max_size(&self) -> usize {
        self.fields.len()
    }

    pub fn has_request_id(&self) -> bool {
        self.id_position != 0
    }

    pub fn kwargs_position(&self) -> usize {
        if self.args_position == 0 {
            0
        } else {
            self.args_position + 1
        }
    }
}

use FieldType::{
    Array as A,
    Int as I,
    Object as O,
    String as S,
    Tag as T,
};

const fn session_traits(
    name: &'static str,
    fields: &'static [FieldType],
    min_size: usize,
    client_rx: bool,
    router_rx: bool,
    valid_states: [bool; 4],
) -> KindTraits {
    KindTraits {
        name,
        fields,
        min_size,
        id_position: 0,
        uri_position: 0,
        options_position: 0,
        args_position: 0,
        replies_to: None,
        valid_as_client_rx: client_rx,
        valid_as_router_rx: router_rx,
        valid_while_establishing: valid_states[0],
        valid_while_authenticating: valid_states[1],
        valid_while_established: valid_states[2],
        valid_while_shutting_down: valid_states[3],
    }
}

const JOINING: [bool; 4] = [true, true, false, false];
const ESTABLISHED: [bool; 4] = [false, false, true, false];
const ESTABLISHED_OR_CLOSING: [bool; 4] = [false, false, true, true];

static HELLO: KindTraits = KindTraits {
    uri_position: 1,
    options_position: 2,
    ..session_traits("HELLO", &[T, S, O], 3, false, true, [true, false, false, false])
};
static WELCOME: KindTraits = KindTraits {
    options_position: 2,
    ..session_traits("WELCOME", &[T, I, O], 3, true, false, JOINING)
};
static ABORT: KindTraits = KindTraits {
    uri_position: 2,
    options_position: 1,
    args_position: 3,
    ..session_traits("ABORT", &[T, O, S, A, O], 3, true, true, [true, true, true, true])
};
static CHALLENGE: KindTraits = KindTraits {
    uri_position: 1,
    options_position: 2,
    ..session_traits("CHALLENGE", &[T, S, O], 3, true, false, JOINING)
};
static AUTHENTICATE: KindTraits = KindTraits {
    uri_position: 1,
    options_position: 2,
    ..session_traits("AUTHENTICATE", &[T, S, O], 3, false, true, [false, true, false, false])
};
static GOODBYE: KindTraits = KindTraits {
    uri_position: 2,
    options_position: 1,
    ..session_traits("GOODBYE", &[T, O, S], 3, true, true, ESTABLISHED_OR_CLOSING)
};
static ERROR: KindTraits = KindTraits {
    id_position: 2,
    uri_position: 4,
    options_position: 3,
    args_position: 5,
    ..session_traits("ERROR", &[T, I, I, O, S, A, O], 5, true, true, ESTABLISHED_OR_CLOSING)
};
static PUBLISH: KindTraits = KindTraits {
    id_position: 1,
    uri_position: 3,
    options_position: 2,
    args_position: 4,
    ..session_traits("PUBLISH", &[T, I, O, S, A, O], 4, false, true, ESTABLISHED)
};
static PUBLISHED: KindTraits = KindTraits {
    id_position: 1,
    replies_to: Some(MessageKind::Publish),
    ..session_traits("PUBLISHED", &[T, I, I], 3, true, false, ESTABLISHED_OR_CLOSING)
};
static SUBSCRIBE: KindTraits = KindTraits {
    id_position: 1,
    uri_position: 3,
    options_position: 2,
    ..session_traits("SUBSCRIBE", &[T, I, O, S], 4, false, true, ESTABLISHED)
};
static SUBSCRIBED: KindTraits = KindTraits {
    id_position: 1,
    replies_to: Some(MessageKind::Subscribe),
    ..session_traits("SUBSCRIBED", &[T, I, I], 3, true, false, ESTABLISHED_OR_CLOSING)
};
static UNSUBSCRIBE: KindTraits = KindTraits {
    id_position: 1,
    ..session_traits("UNSUBSCRIBE", &[T, I, I], 3, false, true, ESTABLISHED)
};
static UNSUBSCRIBED: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    replies_to: Some(MessageKind::Unsubscribe),
    ..session_traits("UNSUBSCRIBED", &[T, I, O], 2, true, false, ESTABLISHED_OR_CLOSING)
};
static EVENT: KindTraits = KindTraits {
    options_position: 3,
    args_position: 4,
    ..session_traits("EVENT", &[T, I, I, O, A, O], 4, true, false, ESTABLISHED)
};
static CALL: KindTraits = KindTraits {
    id_position: 1,
    uri_position: 3,
    options_position: 2,
    args_position: 4,
    ..session_traits("CALL", &[T, I, O, S, A, O], 4, false, true, ESTABLISHED)
};
static CANCEL: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    ..session_traits("CANCEL", &[T, I, O], 3, false, true, ESTABLISHED)
};
static RESULT: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    args_position: 3,
    replies_to: Some(MessageKind::Call),
    ..session_traits("RESULT", &[T, I, O, A, O], 3, true, false, ESTABLISHED_OR_CLOSING)
};
static REGISTER: KindTraits = KindTraits {
    id_position: 1,
    uri_position: 3,
    options_position: 2,
    ..session_traits("REGISTER", &[T, I, O, S], 4, false, true, ESTABLISHED)
};
static REGISTERED: KindTraits = KindTraits {
    id_position: 1,
    replies_to: Some(MessageKind::Register),
    ..session_traits("REGISTERED", &[T, I, I], 3, true, false, ESTABLISHED_OR_CLOSING)
};
static UNREGISTER: KindTraits = KindTraits {
    id_position: 1,
    ..session_traits("UNREGISTER", &[T, I, I], 3, false, true, ESTABLISHED)
};
static UNREGISTERED: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    replies_to: Some(MessageKind::Unregister),
    ..session_traits("UNREGISTERED", &[T, I, O], 2, true, false, ESTABLISHED_OR_CLOSING)
};
static INVOCATION: KindTraits = KindTraits {
    id_position: 1,
    options_position: 3,
    args_position: 4,
    ..session_traits("INVOCATION", &[T, I, I, O, A, O], 4, true, false, ESTABLISHED)
};
static INTERRUPT: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    ..session_traits("INTERRUPT", &[T, I, O], 3, true, false, ESTABLISHED)
};
static YIELD: KindTraits = KindTraits {
    id_position: 1,
    options_position: 2,
    args_position: 3,
    ..session_traits("YIELD", &[T, I, O, A, O], 3, false, true, ESTABLISHED_OR_CLOSING)
};

/// The kind of a WAMP message, identified on the wire by its numeric tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageKind {
    Hello,
    Welcome,
    Abort,
    Challenge,
    Authenticate,
    Goodbye,
    Error,
    Publish,
    Published,
    Subscribe,
    Subscribed,
    Unsubscribe,
    Unsubscribed,
    Event,
    Call,
    Cancel,
    Result,
    Register,
    Registered,
    Unregister,
    Unregistered,
    Invocation,
    Interrupt,
    Yield,
}

impl MessageKind {
    /// Looks up the kind for a numeric tag.
    pub fn from_tag(tag: u64) -> Option<Self> {
        let kind = match tag {
            1 => Self::Hello,
            2 => Self::Welcome,
            3 => Self::Abort,
            4 => Self::Challenge,
            5 => Self::Authenticate,
            6 => Self::Goodbye,
            8 => Self::Error,
            16 => Self::Publish,
            17 => Self::Published,
            32 => Self::Subscribe,
            33 => Self::Subscribed,
            34 => Self::Unsubscribe,
            35 => Self::Unsubscribed,
            36 => Self::Event,
            48 => Self::Call,
            49 => Self::Cancel,
            50 => Self::Result,
            64 => Self::Register,
            65 => Self::Registered,
            66 => Self::Unregister,
            67 => Self::Unregistered,
            68 => Self::Invocation,
            69 => Self::Interrupt,
            70 => Self::Yield,
            _ => return None,
        };
        Some(kind)
    }

    /// The numeric tag of the kind.
    pub fn tag(&self) -> u64 {
        match self {
            Self::Hello => 1,
            Self::Welcome => 2,
            Self::Abort => 3,
            Self::Challenge => 4,
            Self::Authenticate => 5,
            Self::Goodbye => 6,
            Self::Error => 8,
            Self::Publish => 16,
            Self::Published => 17,
            Self::Subscribe => 32,
            Self::Subscribed => 33,
            Self::Unsubscribe => 34,
            Self::Unsubscribed => 35,
            Self::Event => 36,
            Self::Call => 48,
            Self::Cancel => 49,
            Self::Result => 50,
            Self::Register => 64,
            Self::Registered => 65,
            Self::Unregister => 66,
            Self::Unregistered => 67,
            Self::Invocation => 68,
            Self::Interrupt => 69,
            Self::Yield => 70,
        }
    }

    /// The static properties of the kind.
    pub fn traits(&self) -> &'static KindTraits {
        match self {
            Self::Hello => &HELLO,
            Self::Welcome => &WELCOME,
            Self::Abort => &ABORT,
            Self::Challenge => &CHALLENGE,
            Self::Authenticate => &AUTHENTICATE,
            Self::Goodbye => &GOODBYE,
            Self::Error => &ERROR,
            Self::Publish => &PUBLISH,
            Self::Published => &PUBLISHED,
            Self::Subscribe => &SUBSCRIBE,
            Self::Subscribed => &SUBSCRIBED,
            Self::Unsubscribe => &UNSUBSCRIBE,
            Self::Unsubscribed => &UNSUBSCRIBED,
            Self::Event => &EVENT,
            Self::Call => &CALL,
            Self::Cancel => &CANCEL,
            Self::Result => &RESULT,
            Self::Register => &REGISTER,
            Self::Registered => &REGISTERED,
            Self::Unregister => &UNREGISTER,
            Self::Unregistered => &UNREGISTERED,
            Self::Invocation => &INVOCATION,
            Self::Interrupt => &INTERRUPT,
            Self::Yield => &YIELD,
        }
    }

    pub fn name(&self) -> &'static str {
        self.traits().name
    }
}

impl Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod kind_test {
    use crate::message::kind::MessageKind;

    const ALL_TAGS: [u64; 24] = [
        1, 2, 3, 4, 5, 6, 8, 16, 17, 32, 33, 34, 35, 36, 48, 49, 50, 64, 65, 66, 67, 68, 69, 70,
    ];

    #[test]
    fn maps_tags_both_ways() {
        for tag in ALL_TAGS {
            let kind = MessageKind::from_tag(tag).unwrap();
            assert_eq!(kind.tag(), tag);
        }
        assert_eq!(MessageKind::from_tag(7), None);
        assert_eq!(MessageKind::from_tag(0), None);
    }

    #[test]
    fn keeps_table_consistent() {
        for tag in ALL_TAGS {
            let traits = MessageKind::from_tag(tag).unwrap().traits();
            assert!(traits.min_size <= traits.max_size(), "{}", traits.name);
            assert!(traits.id_position < traits.max_size(), "{}", traits.name);
            assert!(traits.uri_position < traits.max_size(), "{}", traits.name);
            assert!(traits.options_position < traits.max_size(), "{}", traits.name);
            if traits.args_position != 0 {
                assert_eq!(traits.kwargs_position() + 1, traits.max_size(), "{}", traits.name);
            }
            if traits.replies_to.is_some() {
                assert!(traits.has_request_id(), "{}", traits.name);
            }
        }
    }
}
