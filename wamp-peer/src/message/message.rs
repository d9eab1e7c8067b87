use std::{
    fmt::Display,
    sync::LazyLock,
};

use wamp_peer_values::{
    Array,
    Object,
    Variant,
};

use crate::{
    core::{
        error::ProtocolViolation,
        id::Id,
    },
    message::kind::{
        FieldType,
        MessageKind,
    },
};

static EMPTY_OBJECT: LazyLock<Object> = LazyLock::new(Object::new);
static EMPTY_ARRAY: Array = Vec::new();

/// Key for correlating a request with its replies.
///
/// Replies are keyed by the kind of the request they reply to, so a RESULT and an ERROR for the
/// same CALL produce the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RequestKey {
    pub kind: MessageKind,
    pub request_id: Id,
}

impl RequestKey {
    pub fn new(kind: MessageKind, request_id: Id) -> Self {
        Self { kind, request_id }
    }
}

impl Display for RequestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.kind, self.request_id)
    }
}

/// The options, positional arguments, and keyword arguments of a message.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Payload {
    pub options: Object,
    pub args: Array,
    pub kwargs: Object,
}

/// A WAMP message.
///
/// A message is an array of fields whose first element is the numeric tag of its kind. Every
/// message produced by [`Message::parse`] or by one of the constructors satisfies the field
/// schema of its kind. Optional trailing fields are only present if they were received or
/// explicitly set.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    kind: MessageKind,
    fields: Array,
}

impl Message {
    fn with_fields(kind: MessageKind, mut fields: Array) -> Self {
        fields.insert(0, Variant::UInt(kind.tag()));
        Self { kind, fields }
    }

    /// Parses a message from a decoded value, validating it against the schema for its kind.
    pub fn parse(value: Variant) -> Result<Self, ProtocolViolation> {
        let fields = match value {
            Variant::Array(fields) => fields,
            value => {
                return Err(ProtocolViolation::new(format!(
                    "message must be an array, found {}",
                    value.kind()
                )));
            }
        };
        let tag = fields
            .first()
            .filter(|tag| FieldType::Tag.matches(tag))
            .and_then(Variant::as_u64)
            .ok_or_else(|| ProtocolViolation::new("message tag is missing or invalid"))?;
        let kind = MessageKind::from_tag(tag)
            .ok_or_else(|| ProtocolViolation::new(format!("unknown message tag {tag}")))?;
        let traits = kind.traits();
        if fields.len() < traits.min_size || fields.len() > traits.max_size() {
            return Err(ProtocolViolation::new(format!(
                "{kind} message has {} fields, expected between {} and {}",
                fields.len(),
                traits.min_size,
                traits.max_size()
            )));
        }
        for (i, (field, expected)) in fields.iter().zip(traits.fields).enumerate() {
            if !expected.matches(field) {
                return Err(ProtocolViolation::new(format!(
                    "field {i} of {kind} message must be a {}, found {}",
                    expected.name(),
                    field.kind()
                )));
            }
        }
        Ok(Self { kind, fields })
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn fields(&self) -> &[Variant] {
        &self.fields
    }

    pub fn field(&self, position: usize) -> Option<&Variant> {
        self.fields.get(position)
    }

    /// Converts the message to the value sent over the wire.
    pub fn into_variant(self) -> Variant {
        Variant::Array(self.fields)
    }

    /// Reads an ID at the given position.
    pub fn id_at(&self, position: usize) -> Option<Id> {
        self.fields
            .get(position)
            .and_then(|value| Id::try_from(value).ok())
    }

    /// Reads a string at the given position.
    pub fn str_at(&self, position: usize) -> Option<&str> {
        self.fields.get(position).and_then(Variant::as_str)
    }

    /// The request ID, if the kind carries one and it is in range.
    pub fn request_id(&self) -> Option<Id> {
        match self.kind.traits().id_position {
            0 => None,
            position => self.id_at(position),
        }
    }

    /// Overwrites the request ID. Does nothing if the kind carries no request ID.
    pub fn set_request_id(&mut self, id: Id) {
        let position = self.kind.traits().id_position;
        if position == 0 {
            return;
        }
        if let Some(field) = self.fields.get_mut(position) {
            *field = id.into();
        }
    }

    /// The key correlating the message to an outstanding request.
    ///
    /// For an outbound request, the key is its own kind. For a reply, the key is the kind it
    /// replies to. For an ERROR, the key is the kind embedded in the message.
    pub fn request_key(&self) -> Option<RequestKey> {
        let request_id = self.request_id()?;
        let kind = match self.kind {
            MessageKind::Error => self
                .fields
                .get(1)
                .and_then(Variant::as_u64)
                .and_then(MessageKind::from_tag)?,
            kind => kind.traits().replies_to.unwrap_or(kind),
        };
        Some(RequestKey::new(kind, request_id))
    }

    /// The URI field, such as a topic, procedure, or reason.
    pub fn uri(&self) -> Option<&str> {
        match self.kind.traits().uri_position {
            0 => None,
            position => self.str_at(position),
        }
    }

    /// The options or details object. Empty if absent.
    pub fn options(&self) -> &Object {
        self.object_at(self.kind.traits().options_position)
    }

    /// The options or details object, created if absent.
    ///
    /// Kinds without options yield [`None`].
    pub fn options_mut(&mut self) -> Option<&mut Object> {
        let position = self.kind.traits().options_position;
        if position == 0 {
            return None;
        }
        self.materialize(position);
        self.fields.get_mut(position).and_then(Variant::as_object_mut)
    }

    /// Looks up a single option.
    pub fn option(&self, key: &str) -> Option<&Variant> {
        self.options().get(key)
    }

    /// Positional arguments. Empty if absent.
    pub fn args(&self) -> &Array {
        match self.kind.traits().args_position {
            0 => &EMPTY_ARRAY,
            position => match self.fields.get(position).and_then(Variant::as_array) {
                Some(args) => args,
                None => &EMPTY_ARRAY,
            },
        }
    }

    /// Keyword arguments. Empty if absent.
    pub fn kwargs(&self) -> &Object {
        self.object_at(self.kind.traits().kwargs_position())
    }

    /// Sets the positional arguments. Does nothing if the kind carries no payload.
    pub fn set_args(&mut self, args: Array) {
        let position = self.kind.traits().args_position;
        if position == 0 {
            return;
        }
        self.materialize(position);
        if let Some(field) = self.fields.get_mut(position) {
            *field = Variant::Array(args);
        }
    }

    /// Sets the keyword arguments, creating empty positional arguments if needed. Does nothing if
    /// the kind carries no payload.
    pub fn set_kwargs(&mut self, kwargs: Object) {
        let position = self.kind.traits().kwargs_position();
        if position == 0 {
            return;
        }
        self.materialize(position);
        if let Some(field) = self.fields.get_mut(position) {
            *field = Variant::Object(kwargs);
        }
    }

    /// Sets the payload, leaving out trailing empty parts.
    pub fn with_payload(mut self, args: Array, kwargs: Object) -> Self {
        if !kwargs.is_empty() {
            self.set_args(args);
            self.set_kwargs(kwargs);
        } else if !args.is_empty() {
            self.set_args(args);
        }
        self
    }

    /// Checks if the message is flagged as a progressive (non-final) part of a call.
    pub fn is_progress(&self) -> bool {
        self.option("progress")
            .and_then(Variant::as_bool)
            .unwrap_or(false)
    }

    /// Checks if the message is a progressive RESULT, which does not end its call.
    pub fn is_progressive_result(&self) -> bool {
        self.kind == MessageKind::Result && self.is_progress()
    }

    /// Moves the options and payload out of the message.
    pub fn into_payload(self) -> Payload {
        let traits = self.kind.traits();
        let mut payload = Payload::default();
        for (position, field) in self.fields.into_iter().enumerate() {
            if position == 0 {
                continue;
            }
            if position == traits.options_position {
                if let Variant::Object(options) = field {
                    payload.options = options;
                }
            } else if position == traits.args_position {
                if let Variant::Array(args) = field {
                    payload.args = args;
                }
            } else if position == traits.kwargs_position() {
                if let Variant::Object(kwargs) = field {
                    payload.kwargs = kwargs;
                }
            }
        }
        payload
    }

    fn object_at(&self, position: usize) -> &Object {
        if position == 0 {
            return &EMPTY_OBJECT;
        }
        match self.fields.get(position).and_then(Variant::as_object) {
            Some(object) => object,
            None => &EMPTY_OBJECT,
        }
    }

    fn materialize(&mut self, position: usize) {
        let schema = self.kind.traits().fields;
        while self.fields.len() <= position {
            let value = match schema.get(self.fields.len()) {
                Some(FieldType::Object) => Variant::Object(Object::new()),
                Some(FieldType::Array) => Variant::Array(Array::new()),
                Some(FieldType::String) => Variant::String(String::new()),
                Some(FieldType::Tag | FieldType::Int) => Variant::UInt(0),
                None => return,
            };
            self.fields.push(value);
        }
    }
}

impl Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}[", self.kind)?;
        for (i, field) in self.fields.iter().enumerate().skip(1) {
            if i > 1 {
                write!(f, ", ")?;
            }
            write!(f, "{field}")?;
        }
        write!(f, "]")
    }
}

fn request_placeholder() -> Variant {
    Variant::UInt(0)
}

/// Constructors for each kind of message.
///
/// Requests are created with a placeholder request ID, assigned when the request is sent.
impl Message {
    pub fn hello<S>(realm: S, details: Object) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Hello,
            vec![Variant::String(realm.into()), Variant::Object(details)],
        )
    }

    pub fn welcome(session_id: Id, details: Object) -> Self {
        Self::with_fields(
            MessageKind::Welcome,
            vec![session_id.into(), Variant::Object(details)],
        )
    }

    pub fn abort<S>(details: Object, reason: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Abort,
            vec![Variant::Object(details), Variant::String(reason.into())],
        )
    }

    pub fn challenge<S>(auth_method: S, extra: Object) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Challenge,
            vec![Variant::String(auth_method.into()), Variant::Object(extra)],
        )
    }

    pub fn authenticate<S>(signature: S, extra: Object) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Authenticate,
            vec![Variant::String(signature.into()), Variant::Object(extra)],
        )
    }

    pub fn goodbye<S>(details: Object, reason: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Goodbye,
            vec![Variant::Object(details), Variant::String(reason.into())],
        )
    }

    pub fn error<S>(request_kind: MessageKind, request_id: Id, details: Object, uri: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Error,
            vec![
                Variant::UInt(request_kind.tag()),
                request_id.into(),
                Variant::Object(details),
                Variant::String(uri.into()),
            ],
        )
    }

    pub fn publish<S>(options: Object, topic: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Publish,
            vec![
                request_placeholder(),
                Variant::Object(options),
                Variant::String(topic.into()),
            ],
        )
    }

    pub fn published(request_id: Id, publication_id: Id) -> Self {
        Self::with_fields(
            MessageKind::Published,
            vec![request_id.into(), publication_id.into()],
        )
    }

    pub fn subscribe<S>(options: Object, topic: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Subscribe,
            vec![
                request_placeholder(),
                Variant::Object(options),
                Variant::String(topic.into()),
            ],
        )
    }

    pub fn subscribed(request_id: Id, subscription_id: Id) -> Self {
        Self::with_fields(
            MessageKind::Subscribed,
            vec![request_id.into(), subscription_id.into()],
        )
    }

    pub fn unsubscribe(subscription_id: Id) -> Self {
        Self::with_fields(
            MessageKind::Unsubscribe,
            vec![request_placeholder(), subscription_id.into()],
        )
    }

    pub fn unsubscribed(request_id: Id) -> Self {
        Self::with_fields(MessageKind::Unsubscribed, vec![request_id.into()])
    }

    pub fn event(subscription_id: Id, publication_id: Id, details: Object) -> Self {
        Self::with_fields(
            MessageKind::Event,
            vec![
                subscription_id.into(),
                publication_id.into(),
                Variant::Object(details),
            ],
        )
    }

    pub fn call<S>(options: Object, procedure: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Call,
            vec![
                request_placeholder(),
                Variant::Object(options),
                Variant::String(procedure.into()),
            ],
        )
    }

    pub fn cancel(request_id: Id, options: Object) -> Self {
        Self::with_fields(
            MessageKind::Cancel,
            vec![request_id.into(), Variant::Object(options)],
        )
    }

    pub fn result(request_id: Id, details: Object) -> Self {
        Self::with_fields(
            MessageKind::Result,
            vec![request_id.into(), Variant::Object(details)],
        )
    }

    pub fn register<S>(options: Object, procedure: S) -> Self
    where
        S: Into<String>,
    {
        Self::with_fields(
            MessageKind::Register,
            vec![
                request_placeholder(),
                Variant::Object(options),
                Variant::String(procedure.into()),
            ],
        )
    }

    pub fn registered(request_id: Id, registration_id: Id) -> Self {
        Self::with_fields(
            MessageKind::Registered,
            vec![request_id.into(), registration_id.into()],
        )
    }

    pub fn unregister(registration_id: Id) -> Self {
        Self::with_fields(
            MessageKind::Unregister,
            vec![request_placeholder(), registration_id.into()],
        )
    }

    pub fn unregistered(request_id: Id) -> Self {
        Self::with_fields(MessageKind::Unregistered, vec![request_id.into()])
    }

    pub fn invocation(request_id: Id, registration_id: Id, details: Object) -> Self {
        Self::with_fields(
            MessageKind::Invocation,
            vec![
                request_id.into(),
                registration_id.into(),
                Variant::Object(details),
            ],
        )
    }

    pub fn interrupt(request_id: Id, options: Object) -> Self {
        Self::with_fields(
            MessageKind::Interrupt,
            vec![request_id.into(), Variant::Object(options)],
        )
    }

    pub fn yield_result(request_id: Id, options: Object) -> Self {
        Self::with_fields(
            MessageKind::Yield,
            vec![request_id.into(), Variant::Object(options)],
        )
    }
}
