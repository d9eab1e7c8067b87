use std::fmt::Display;

use wamp_peer_values::{
    ConversionError,
    IntoVariant,
    Object,
    Variant,
    VariantObject,
};

/// Which side of a WAMP session a peer plays.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerKind {
    /// The peer joins realms on a router.
    #[default]
    Client,
    /// The peer routes messages for clients.
    Router,
}

/// A role a client can take on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientRole {
    /// Registers RPC endpoints.
    Callee,
    /// Calls RPC endpoints.
    Caller,
    /// Publishes events to topics.
    Publisher,
    /// Subscribes to events for topics.
    Subscriber,
}

impl ClientRole {
    pub const ALL: [ClientRole; 4] = [
        ClientRole::Callee,
        ClientRole::Caller,
        ClientRole::Publisher,
        ClientRole::Subscriber,
    ];
}

impl TryFrom<&str> for ClientRole {
    type Error = anyhow::Error;
    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "callee" => Ok(Self::Callee),
            "caller" => Ok(Self::Caller),
            "publisher" => Ok(Self::Publisher),
            "subscriber" => Ok(Self::Subscriber),
            _ => Err(Self::Error::msg(format!("invalid client role: {value}"))),
        }
    }
}

impl From<ClientRole> for &'static str {
    fn from(value: ClientRole) -> Self {
        match value {
            ClientRole::Callee => "callee",
            ClientRole::Caller => "caller",
            ClientRole::Publisher => "publisher",
            ClientRole::Subscriber => "subscriber",
        }
    }
}

impl Display for ClientRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", Into::<&'static str>::into(*self))
    }
}

/// A role a router can take on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouterRole {
    /// Routes calls.
    Dealer,
    /// Routes events.
    Broker,
}

impl From<RouterRole> for &'static str {
    fn from(value: RouterRole) -> Self {
        match value {
            RouterRole::Dealer => "dealer",
            RouterRole::Broker => "broker",
        }
    }
}

/// Advanced features advertised for the callee role.
#[derive(Debug, Clone, PartialEq, Eq, VariantObject)]
pub struct CalleeFeatures {
    pub call_canceling: bool,
    pub call_timeout: bool,
    pub call_trustlevels: bool,
    pub caller_identification: bool,
    pub pattern_based_registration: bool,
    pub progressive_call_invocations: bool,
    pub progressive_call_results: bool,
}

impl Default for CalleeFeatures {
    fn default() -> Self {
        Self {
            call_canceling: true,
            call_timeout: true,
            call_trustlevels: true,
            caller_identification: true,
            pattern_based_registration: true,
            progressive_call_invocations: true,
            progressive_call_results: true,
        }
    }
}

/// Advanced features advertised for the caller role.
#[derive(Debug, Clone, PartialEq, Eq, VariantObject)]
pub struct CallerFeatures {
    pub call_canceling: bool,
    pub call_timeout: bool,
    pub caller_exclusion: bool,
    pub caller_identification: bool,
    pub progressive_call_invocations: bool,
    pub progressive_call_results: bool,
}

impl Default for CallerFeatures {
    fn default() -> Self {
        Self {
            call_canceling: true,
            call_timeout: true,
            caller_exclusion: true,
            caller_identification: true,
            progressive_call_invocations: true,
            progressive_call_results: true,
        }
    }
}

/// Advanced features advertised for the publisher role.
#[derive(Debug, Clone, PartialEq, Eq, VariantObject)]
pub struct PublisherFeatures {
    pub publisher_exclusion: bool,
    pub publisher_identification: bool,
    pub subscriber_blackwhite_listing: bool,
}

impl Default for PublisherFeatures {
    fn default() -> Self {
        Self {
            publisher_exclusion: true,
            publisher_identification: true,
            subscriber_blackwhite_listing: true,
        }
    }
}

/// Advanced features advertised for the subscriber role.
#[derive(Debug, Clone, PartialEq, Eq, VariantObject)]
pub struct SubscriberFeatures {
    pub pattern_based_subscription: bool,
    pub publication_trustlevels: bool,
    pub publisher_identification: bool,
}

impl Default for SubscriberFeatures {
    fn default() -> Self {
        Self {
            pattern_based_subscription: true,
            publication_trustlevels: true,
            publisher_identification: true,
        }
    }
}

/// Builds the `roles` dictionary sent in HELLO details.
pub fn client_roles_details(roles: &[ClientRole]) -> Result<Object, ConversionError> {
    let mut details = Object::new();
    for role in roles {
        let features = match role {
            ClientRole::Callee => CalleeFeatures::default().into_variant()?,
            ClientRole::Caller => CallerFeatures::default().into_variant()?,
            ClientRole::Publisher => PublisherFeatures::default().into_variant()?,
            ClientRole::Subscriber => SubscriberFeatures::default().into_variant()?,
        };
        details.insert(
            role.to_string(),
            Variant::Object(Object::from_iter([("features".to_owned(), features)])),
        );
    }
    Ok(details)
}

#[cfg(test)]
mod roles_test {
    use wamp_peer_values::Variant;

    use crate::core::roles::{
        ClientRole,
        client_roles_details,
    };

    #[test]
    fn advertises_required_features() {
        let details = client_roles_details(&ClientRole::ALL).unwrap();
        let features = |role: &str, feature: &str| {
            details
                .get(role)
                .and_then(|role| role.get("features"))
                .and_then(|features| features.get(feature))
                .cloned()
        };
        for feature in [
            "call_canceling",
            "call_timeout",
            "call_trustlevels",
            "caller_identification",
            "pattern_based_registration",
            "progressive_call_results",
        ] {
            assert_eq!(features("callee", feature), Some(Variant::Bool(true)), "{feature}");
        }
        for feature in [
            "call_canceling",
            "call_timeout",
            "caller_exclusion",
            "caller_identification",
            "progressive_call_results",
        ] {
            assert_eq!(features("caller", feature), Some(Variant::Bool(true)), "{feature}");
        }
        for feature in [
            "publisher_exclusion",
            "publisher_identification",
            "subscriber_blackwhite_listing",
        ] {
            assert_eq!(features("publisher", feature), Some(Variant::Bool(true)), "{feature}");
        }
        for feature in [
            "pattern_based_subscription",
            "publication_trustlevels",
            "publisher_identification",
        ] {
            assert_eq!(features("subscriber", feature), Some(Variant::Bool(true)), "{feature}");
        }
    }

    #[test]
    fn advertises_only_requested_roles() {
        let details = client_roles_details(&[ClientRole::Caller]).unwrap();
        assert_eq!(details.len(), 1);
        assert!(details.contains_key("caller"));
    }
}
