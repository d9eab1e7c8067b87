use tokio::sync::mpsc::WeakUnboundedSender;
use wamp_peer_values::{
    Array,
    ConversionError,
    FromArgs,
    IntoVariant,
    Object,
    Variant,
    VariantObject,
};

use crate::{
    core::{
        id::Id,
        match_policy::MatchPolicy,
    },
    peer::client::Command,
};

/// A topic to subscribe to.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Topic {
    pub uri: String,
    /// How the topic is matched against published events.
    pub match_policy: MatchPolicy,
    /// Additional SUBSCRIBE options.
    pub options: Object,
}

impl Topic {
    pub fn new<S>(uri: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            uri: uri.into(),
            ..Default::default()
        }
    }

    pub fn with_match_policy(mut self, match_policy: MatchPolicy) -> Self {
        self.match_policy = match_policy;
        self
    }

    pub fn with_option<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Variant>,
    {
        self.options.insert(key.into(), value.into());
        self
    }

    pub(crate) fn key(&self) -> TopicKey {
        (self.uri.clone(), self.match_policy)
    }

    pub(crate) fn subscribe_options(&self) -> Object {
        let mut options = self.options.clone();
        if let Some(policy) = self.match_policy.option_value() {
            options.insert("match".to_owned(), Variant::from(policy));
        }
        options
    }
}

/// Subscriptions are shared among local handlers by URI and match policy.
pub(crate) type TopicKey = (String, MatchPolicy);

fn is_false(value: &bool) -> bool {
    !*value
}

/// Options for publishing an event.
#[derive(Debug, Default, Clone, PartialEq, Eq, VariantObject)]
pub struct PubOptions {
    /// The router should acknowledge the publication with PUBLISHED.
    #[wamp_peer_values(default, skip_serializing_if = is_false)]
    pub acknowledge: bool,
    /// The publisher should not receive its own event. Defaults to true on the router.
    #[wamp_peer_values(default, skip_serializing_if = Option::is_none)]
    pub exclude_me: Option<bool>,
    /// The publisher's identity should be disclosed to subscribers.
    #[wamp_peer_values(default, skip_serializing_if = is_false)]
    pub disclose_me: bool,
    /// Sessions that should not receive the event.
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub exclude: Vec<Id>,
    /// Sessions allowed to receive the event.
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub eligible: Vec<Id>,
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub exclude_authid: Vec<String>,
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub eligible_authid: Vec<String>,
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub exclude_authrole: Vec<String>,
    #[wamp_peer_values(default, skip_serializing_if = Vec::is_empty)]
    pub eligible_authrole: Vec<String>,
}

/// An event to publish.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Pub {
    pub topic: String,
    pub args: Array,
    pub kwargs: Object,
    pub options: PubOptions,
    /// Options not covered by [`PubOptions`].
    pub extra: Object,
}

impl Pub {
    pub fn new<S>(topic: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            topic: topic.into(),
            ..Default::default()
        }
    }

    pub fn with_args(mut self, args: Array) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Object) -> Self {
        self.kwargs = kwargs;
        self
    }

    pub fn with_options(mut self, options: PubOptions) -> Self {
        self.options = options;
        self
    }

    /// Asks the router to acknowledge the publication.
    pub fn acknowledged(mut self) -> Self {
        self.options.acknowledge = true;
        self
    }

    pub fn with_option<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Variant>,
    {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub(crate) fn publish_options(&self) -> Result<Object, ConversionError> {
        let mut options = match self.options.clone().into_variant()? {
            Variant::Object(options) => options,
            _ => Object::new(),
        };
        options.extend(self.extra.clone());
        Ok(options)
    }
}

/// An event received on a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub subscription_id: Id,
    pub publication_id: Id,
    /// The topic the event was published to.
    ///
    /// For pattern-based subscriptions, this is the concrete topic sent by the router.
    pub topic: String,
    pub details: Object,
    pub args: Array,
    pub kwargs: Object,
}

impl Event {
    /// The publisher's session ID, if disclosed.
    pub fn publisher(&self) -> Option<Id> {
        self.details
            .get("publisher")
            .and_then(|id| Id::try_from(id).ok())
    }

    /// Converts the positional arguments into a tuple.
    pub fn args_as<T>(&self) -> Result<T, ConversionError>
    where
        T: FromArgs,
    {
        T::from_args(self.args.clone())
    }
}

/// A local handle to a subscription.
///
/// Several handles may share a single subscription on the router. The subscription is only removed
/// from the router when its last handle is unsubscribed.
#[derive(Debug)]
pub struct Subscription {
    id: Id,
    slot_id: u64,
    topic: String,
    match_policy: MatchPolicy,
    commands: WeakUnboundedSender<Command>,
}

impl Subscription {
    pub(crate) fn new(
        id: Id,
        slot_id: u64,
        key: &TopicKey,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            id,
            slot_id,
            topic: key.0.clone(),
            match_policy: key.1,
            commands,
        }
    }

    /// The subscription ID assigned by the router.
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn match_policy(&self) -> MatchPolicy {
        self.match_policy
    }

    pub(crate) fn slot_id(&self) -> u64 {
        self.slot_id
    }

    /// Converts the handle into one that unsubscribes when dropped.
    pub fn scoped(self) -> ScopedSubscription {
        ScopedSubscription {
            subscription: Some(self),
        }
    }
}

/// A subscription handle that unsubscribes when dropped.
///
/// Unsubscribing on drop is best effort: the result is not reported.
#[derive(Debug)]
pub struct ScopedSubscription {
    subscription: Option<Subscription>,
}

impl ScopedSubscription {
    pub fn subscription(&self) -> Option<&Subscription> {
        self.subscription.as_ref()
    }

    /// Releases the handle without unsubscribing.
    pub fn release(mut self) -> Option<Subscription> {
        self.subscription.take()
    }
}

impl Drop for ScopedSubscription {
    fn drop(&mut self) {
        let Some(subscription) = self.subscription.take() else {
            return;
        };
        if let Some(commands) = subscription.commands.upgrade() {
            commands
                .send(Command::Unsubscribe {
                    subscription_id: subscription.id,
                    slot_id: subscription.slot_id,
                    reply: None,
                })
                .ok();
        }
    }
}
