use log::error;
use wamp_peer_values::{
    Object,
    Variant,
};

use crate::{
    core::{
        error::WampErrc,
        id::Id,
        roles::{
            ClientRole,
            client_roles_details,
        },
    },
    message::message::Message,
};

/// A request to join a realm.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Petition {
    /// The realm to join.
    pub realm: String,
    /// The authentication ID to present to the router.
    pub auth_id: Option<String>,
    /// Authentication methods offered to the router, in order of preference.
    pub auth_methods: Vec<String>,
    /// Additional data for the authentication methods.
    pub auth_extra: Object,
    /// Custom HELLO details.
    pub options: Object,
}

impl Petition {
    pub fn new<S>(realm: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            realm: realm.into(),
            ..Default::default()
        }
    }

    pub fn with_auth_id<S>(mut self, auth_id: S) -> Self
    where
        S: Into<String>,
    {
        self.auth_id = Some(auth_id.into());
        self
    }

    pub fn with_auth_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.auth_methods = methods.into_iter().map(|method| method.into()).collect();
        self
    }

    pub fn with_auth_extra(mut self, extra: Object) -> Self {
        self.auth_extra = extra;
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

    /// Builds the details of the HELLO message for this petition.
    pub(crate) fn hello_details(&self, agent: &str, roles: &[ClientRole]) -> Object {
        let mut details = self.options.clone();
        details.insert("agent".to_owned(), Variant::from(agent));
        match client_roles_details(roles) {
            Ok(roles) => {
                details.insert("roles".to_owned(), Variant::Object(roles));
            }
            Err(err) => {
                error!("Failed to build role features for HELLO: {err}");
            }
        }
        if let Some(auth_id) = &self.auth_id {
            details.insert("authid".to_owned(), Variant::from(auth_id.as_str()));
        }
        if !self.auth_methods.is_empty() {
            details.insert(
                "authmethods".to_owned(),
                Variant::Array(
                    self.auth_methods
                        .iter()
                        .map(|method| Variant::from(method.as_str()))
                        .collect(),
                ),
            );
        }
        if !self.auth_extra.is_empty() {
            details.insert(
                "authextra".to_owned(),
                Variant::Object(self.auth_extra.clone()),
            );
        }
        details
    }
}

/// Information about a session that joined a realm.
#[derive(Debug, Clone, PartialEq)]
pub struct Welcome {
    /// The session ID assigned by the router.
    pub session_id: Id,
    /// The realm joined.
    pub realm: String,
    /// Details sent by the router.
    pub details: Object,
}

impl Welcome {
    pub(crate) fn from_message(realm: String, message: &Message) -> Option<Self> {
        Some(Self {
            session_id: message.id_at(1)?,
            realm,
            details: message.options().clone(),
        })
    }

    fn detail_str(&self, key: &str) -> Option<&str> {
        self.details.get(key).and_then(Variant::as_str)
    }

    pub fn auth_id(&self) -> Option<&str> {
        self.detail_str("authid")
    }

    pub fn auth_role(&self) -> Option<&str> {
        self.detail_str("authrole")
    }

    pub fn auth_method(&self) -> Option<&str> {
        self.detail_str("authmethod")
    }

    pub fn auth_provider(&self) -> Option<&str> {
        self.detail_str("authprovider")
    }

    /// The router's agent string.
    pub fn agent(&self) -> Option<&str> {
        self.detail_str("agent")
    }

    /// The roles advertised by the router.
    pub fn roles(&self) -> Option<&Object> {
        self.details.get("roles").and_then(Variant::as_object)
    }
}

/// The reason a session was closed, carried by GOODBYE.
#[derive(Debug, Clone, PartialEq)]
pub struct Reason {
    pub uri: String,
    pub details: Object,
}

impl Reason {
    pub fn new<S>(uri: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            uri: uri.into(),
            details: Object::new(),
        }
    }

    pub fn with_message<S>(mut self, message: S) -> Self
    where
        S: Into<String>,
    {
        self.details
            .insert("message".to_owned(), Variant::String(message.into()));
        self
    }

    pub fn errc(&self) -> WampErrc {
        WampErrc::from_uri(&self.uri)
    }

    pub(crate) fn from_message(message: Message) -> Self {
        let uri = message.uri().unwrap_or_default().to_owned();
        Self {
            uri,
            details: message.into_payload().options,
        }
    }
}

impl Default for Reason {
    fn default() -> Self {
        Self::new(WampErrc::CloseRealm.uri())
    }
}

/// An authentication challenge sent by the router.
#[derive(Debug, Clone, PartialEq)]
pub struct Challenge {
    /// The authentication method being challenged.
    pub method: String,
    /// Method-specific data.
    pub extra: Object,
}

impl Challenge {
    pub(crate) fn from_message(message: Message) -> Self {
        let method = message.uri().unwrap_or_default().to_owned();
        Self {
            method,
            extra: message.into_payload().options,
        }
    }
}

/// The answer to a [`Challenge`].
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Authentication {
    pub signature: String,
    pub extra: Object,
}

impl Authentication {
    pub fn new<S>(signature: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            signature: signature.into(),
            extra: Object::new(),
        }
    }

    pub fn with_extra(mut self, extra: Object) -> Self {
        self.extra = extra;
        self
    }

    pub(crate) fn into_message(self) -> Message {
        Message::authenticate(self.signature, self.extra)
    }
}

#[cfg(test)]
mod petition_test {
    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Object,
        Variant,
    };

    use crate::{
        core::roles::ClientRole,
        peer::petition::{
            Petition,
            Reason,
        },
    };

    #[test]
    fn hello_details_advertise_agent_roles_and_authentication() {
        let details = Petition::new("realm1")
            .with_auth_id("alice")
            .with_auth_methods(["ticket"])
            .hello_details("agent-1.0", &ClientRole::ALL);
        assert_eq!(details.get("agent"), Some(&Variant::from("agent-1.0")));
        assert_eq!(details.get("authid"), Some(&Variant::from("alice")));
        assert_eq!(
            details.get("authmethods"),
            Some(&Variant::Array(vec![Variant::from("ticket")]))
        );
        let roles = details.get("roles").and_then(Variant::as_object).unwrap();
        assert_eq!(
            roles.keys().cloned().collect::<Vec<_>>(),
            vec!["callee", "caller", "publisher", "subscriber"]
        );
        assert_eq!(
            roles
                .get("callee")
                .and_then(|role| role.get("features"))
                .and_then(|features| features.get("call_canceling")),
            Some(&Variant::Bool(true))
        );
        assert!(details.get("authextra").is_none());
    }

    #[test]
    fn default_reason_closes_realm() {
        assert_eq!(
            Reason::default(),
            Reason {
                uri: "wamp.close.close_realm".to_owned(),
                details: Object::new(),
            }
        );
    }
}
