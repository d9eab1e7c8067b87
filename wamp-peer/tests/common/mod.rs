#![allow(dead_code)]

use std::{
    sync::{
        Arc,
        Mutex,
    },
    time::Duration,
};

use futures_util::{
    SinkExt,
    StreamExt,
};
use wamp_peer::{
    codec::{
        codec::{
            Codec,
            CodecId,
        },
        json::JsonCodec,
    },
    core::{
        error::WampError,
        id::Id,
        roles::PeerKind,
        state::SessionState,
    },
    message::{
        kind::MessageKind,
        message::Message,
    },
    peer::{
        ConnectionWish,
        Incident,
        Petition,
        Session,
        SessionConfig,
        Welcome,
        engine::{
            Engine,
            Inbound,
        },
    },
    transport::{
        direct::{
            DirectListener,
            DirectTransport,
            direct_endpoint,
        },
        transport::{
            TransportData,
            TransportInfo,
        },
    },
};
use wamp_peer_values::{
    Object,
    Variant,
};

pub const REALM: &str = "com.example.realm";

pub fn id(value: u64) -> Id {
    Id::try_from(value).unwrap()
}

/// A router whose every message is driven by the test.
pub struct ScriptedRouter {
    engine: Engine,
}

impl ScriptedRouter {
    pub async fn accept(listener: &mut DirectListener) -> Self {
        let transport = listener.accept().await.unwrap();
        let mut engine = Engine::new("router", PeerKind::Router, Duration::from_secs(1));
        engine.attach(Box::new(transport)).unwrap();
        Self { engine }
    }

    pub fn state(&self) -> SessionState {
        self.engine.state()
    }

    /// Waits for the next message from the client.
    ///
    /// Returns [`None`] once the client closes the transport.
    pub async fn recv(&mut self) -> Option<Message> {
        loop {
            let frame = self.engine.next_frame().await;
            match self.engine.handle_frame(frame).await {
                Inbound::Hello(message)
                | Inbound::Authenticate(message)
                | Inbound::Aborted(message)
                | Inbound::Goodbye(message)
                | Inbound::GoodbyeReply(message)
                | Inbound::Reply(message)
                | Inbound::Unsolicited(message) => return Some(message),
                Inbound::Pong | Inbound::Ignored => (),
                Inbound::Disconnected(_) => return None,
                inbound => panic!("unexpected inbound frame on router: {inbound:?}"),
            }
        }
    }

    /// Waits for the next message from the client, which must be of the given kind.
    pub async fn expect(&mut self, kind: MessageKind) -> Message {
        match self.recv().await {
            Some(message) if message.kind() == kind => message,
            other => panic!("expected {kind} message, received {other:?}"),
        }
    }

    /// Checks that the client sends nothing for a while.
    pub async fn expect_silence(&mut self) {
        if let Ok(message) =
            tokio::time::timeout(Duration::from_millis(50), self.recv()).await
        {
            panic!("expected no message, received {message:?}");
        }
    }

    pub async fn send(&mut self, message: Message) {
        self.engine.send(message).await.unwrap();
    }

    /// Answers HELLO with WELCOME.
    pub async fn welcome(&mut self, session_id: u64) -> Message {
        let hello = self.expect(MessageKind::Hello).await;
        self.send(Message::welcome(id(session_id), Object::new()))
            .await;
        hello
    }

    pub async fn abort(&mut self, error: WampError) {
        self.engine.abort(error).await.unwrap();
    }

    pub async fn disconnect(&mut self) {
        self.engine.disconnect().await;
    }
}

pub fn endpoint() -> (ConnectionWish, DirectListener) {
    endpoint_with_info(TransportInfo::new(CodecId::Json))
}

pub fn endpoint_with_info(info: TransportInfo) -> (ConnectionWish, DirectListener) {
    let (dialer, listener) = direct_endpoint(info);
    (ConnectionWish::new(dialer, info.codec), listener)
}

pub fn session(name: &str) -> Session {
    let mut config = SessionConfig::default();
    config.name = name.to_owned();
    Session::new(config).unwrap()
}

/// Collects every incident reported by a session.
#[derive(Clone, Default)]
pub struct IncidentLog {
    incidents: Arc<Mutex<Vec<Incident>>>,
}

impl IncidentLog {
    pub fn install(&self, config: &mut SessionConfig) {
        let incidents = self.incidents.clone();
        config.incident_slot = Some(Arc::new(move |incident: Incident| {
            incidents.lock().unwrap().push(incident);
        }));
    }

    pub fn incidents(&self) -> Vec<Incident> {
        self.incidents.lock().unwrap().clone()
    }
}

pub async fn connect(
    session: &Session,
    wish: ConnectionWish,
    listener: &mut DirectListener,
) -> ScriptedRouter {
    assert_eq!(session.connect(vec![wish]).await.unwrap(), 0);
    ScriptedRouter::accept(listener).await
}

pub async fn join(session: &Session, router: &mut ScriptedRouter) -> Welcome {
    let (welcome, _) = tokio::join!(session.join(Petition::new(REALM)), router.welcome(12345));
    welcome.unwrap()
}

/// Creates a session that joined a realm on a scripted router.
pub async fn joined_session(name: &str) -> (Session, ScriptedRouter) {
    let session = session(name);
    let (wish, mut listener) = endpoint();
    let mut router = connect(&session, wish, &mut listener).await;
    join(&session, &mut router).await;
    (session, router)
}

pub async fn joined_session_with_config(config: SessionConfig) -> (Session, ScriptedRouter) {
    let session = Session::new(config).unwrap();
    let (wish, mut listener) = endpoint();
    let mut router = connect(&session, wish, &mut listener).await;
    join(&session, &mut router).await;
    (session, router)
}

/// A router that exchanges raw JSON values, for sending frames a well-behaved peer never would.
pub struct RawRouter {
    transport: DirectTransport,
}

impl RawRouter {
    pub async fn accept(listener: &mut DirectListener) -> Self {
        Self {
            transport: listener.accept().await.unwrap(),
        }
    }

    pub async fn send(&mut self, value: Variant) {
        let mut buffer = Vec::new();
        JsonCodec::default().encode(&value, &mut buffer).unwrap();
        self.transport
            .send(TransportData::Message(buffer))
            .await
            .unwrap();
    }

    /// Waits for the next message, returning [`None`] once the client closes the transport.
    pub async fn recv(&mut self) -> Option<Variant> {
        loop {
            match self.transport.next().await {
                Some(Ok(TransportData::Message(bytes))) => {
                    return Some(JsonCodec::default().decode(&bytes).unwrap());
                }
                Some(Ok(_)) => (),
                Some(Err(_)) | None => return None,
            }
        }
    }
}

/// Waits until the condition holds, failing the test if it never does.
pub async fn eventually<F>(condition: F)
where
    F: Fn() -> bool,
{
    for _ in 0..100 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition was never met");
}
