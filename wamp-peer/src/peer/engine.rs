use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    SinkExt,
    StreamExt,
    future,
};
use log::{
    debug,
    info,
    trace,
    warn,
};
use tokio::sync::watch;

use crate::{
    codec::codec::{
        Codec,
        new_codec,
    },
    core::{
        error::{
            MiscError,
            ProtocolViolation,
            TransportError,
            WampErrc,
            WampError,
        },
        id::{
            Id,
            RequestIdAllocator,
        },
        roles::PeerKind,
        state::SessionState,
    },
    message::{
        common::{
            abort_for_error,
            goodbye_and_out,
            single_option,
        },
        kind::{
            KindTraits,
            MessageKind,
        },
        message::Message,
    },
    transport::transport::{
        Transport,
        TransportData,
        TransportInfo,
    },
};

/// What the engine made of a frame received from the transport.
#[derive(Debug)]
pub enum Inbound {
    /// HELLO, received by a router.
    Hello(Message),
    /// WELCOME. The session is established.
    Welcome(Message),
    /// CHALLENGE. The session is authenticating.
    Challenge(Message),
    /// AUTHENTICATE, received by a router.
    Authenticate(Message),
    /// ABORT. The session is closed if it was joining, or failed otherwise.
    Aborted(Message),
    /// GOODBYE initiated by the peer. The engine already answered it, and the session is closed.
    Goodbye(Message),
    /// GOODBYE answering one sent by this peer. The session is closed.
    GoodbyeReply(Message),
    /// A reply to a request, including ERROR.
    Reply(Message),
    /// A message that is not a reply, such as EVENT, INVOCATION, or INTERRUPT.
    Unsolicited(Message),
    /// The answer to a heartbeat.
    Pong,
    /// Nothing for the session to handle.
    Ignored,
    /// The peer broke the protocol. The session failed.
    Violation(ProtocolViolation),
    /// The transport closed or failed. The session is disconnected.
    Disconnected(Option<Error>),
}

fn valid_in_state(traits: &KindTraits, state: SessionState) -> bool {
    match state {
        SessionState::Establishing => traits.valid_while_establishing,
        SessionState::Authenticating => traits.valid_while_authenticating,
        SessionState::Established => traits.valid_while_established,
        SessionState::ShuttingDown => traits.valid_while_shutting_down,
        _ => false,
    }
}

fn is_payload_size_exceeded(error: &Error) -> bool {
    error
        .downcast_ref::<WampError>()
        .is_some_and(|error| error.errc() == WampErrc::PayloadSizeExceeded)
}

/// The session state machine.
///
/// Owns the transport and codec, validates every message sent and received against the session
/// state and the role of this peer, and assigns request IDs.
#[derive(Debug)]
pub struct Engine {
    name: String,
    peer_kind: PeerKind,
    state_tx: watch::Sender<SessionState>,
    transport: Option<Box<dyn Transport>>,
    codec: Option<Box<dyn Codec>>,
    info: Option<TransportInfo>,
    request_ids: RequestIdAllocator,
    abort_timeout: Duration,
}

impl Engine {
    pub fn new<S>(name: S, peer_kind: PeerKind, abort_timeout: Duration) -> Self
    where
        S: Into<String>,
    {
        let (state_tx, _) = watch::channel(SessionState::default());
        Self {
            name: name.into(),
            peer_kind,
            state_tx,
            transport: None,
            codec: None,
            info: None,
            request_ids: RequestIdAllocator::new(),
            abort_timeout,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn peer_kind(&self) -> PeerKind {
        self.peer_kind
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// A receiver observing every state change.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Properties of the attached transport.
    pub fn transport_info(&self) -> Option<TransportInfo> {
        self.info
    }

    fn set_state(&mut self, state: SessionState) {
        let previous = self.state();
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state;
            true
        });
        if changed {
            debug!(
                "Session {} transitioned from {previous} to {state}",
                self.name
            );
        }
    }

    /// Marks the start of a connection attempt.
    pub fn begin_connecting(&mut self) -> Result<()> {
        let state = self.state();
        if state != SessionState::Disconnected {
            return Err(Error::new(MiscError::InvalidState)
                .context(format!("cannot connect in the {state} state")));
        }
        self.set_state(SessionState::Connecting);
        Ok(())
    }

    /// Marks the end of a failed or abandoned connection attempt.
    pub fn cancel_connecting(&mut self) {
        if self.state() == SessionState::Connecting {
            self.set_state(SessionState::Disconnected);
        }
    }

    /// Attaches a transport, over which a session may be established.
    ///
    /// A client waits to send HELLO, while a router waits to receive it.
    pub fn attach(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        if self.transport.is_some() {
            return Err(Error::new(MiscError::InvalidState)
                .context("a transport is already attached"));
        }
        let info = transport.info();
        self.codec = Some(new_codec(info.codec)?);
        self.transport = Some(transport);
        self.info = Some(info);
        self.request_ids.reset();
        info!(
            "Session {} attached a transport using {}",
            self.name, info.codec
        );
        self.set_state(match self.peer_kind {
            PeerKind::Client => SessionState::Closed,
            PeerKind::Router => SessionState::Establishing,
        });
        Ok(())
    }

    /// Generates the next request ID, skipping IDs that are still pending.
    pub fn next_request_id<F>(&mut self, is_pending: F) -> Id
    where
        F: Fn(Id) -> bool,
    {
        self.request_ids.next(is_pending)
    }

    fn may_send(&self, kind: MessageKind, state: SessionState) -> bool {
        let traits = kind.traits();
        let visible = match self.peer_kind {
            PeerKind::Client => traits.valid_as_router_rx,
            PeerKind::Router => traits.valid_as_client_rx,
        };
        if !visible || kind == MessageKind::Abort {
            return false;
        }
        if kind == MessageKind::Hello {
            return state == SessionState::Closed;
        }
        valid_in_state(traits, state)
    }

    /// Sends a message to the peer.
    ///
    /// Fails without sending anything if the message is not valid in the current state, or if it
    /// does not fit in the transport's send limit.
    pub async fn send(&mut self, message: Message) -> Result<()> {
        let state = self.state();
        let kind = message.kind();
        if !self.may_send(kind, state) {
            return Err(Error::new(MiscError::InvalidState)
                .context(format!("{kind} message cannot be sent in the {state} state")));
        }
        trace!("Session {} sending {message}", self.name);
        let buffer = self.encode(message)?;
        self.write(TransportData::Message(buffer)).await?;
        match (kind, self.peer_kind) {
            (MessageKind::Hello, _) => self.set_state(SessionState::Establishing),
            (MessageKind::Goodbye, _) if state == SessionState::Established => {
                self.set_state(SessionState::ShuttingDown)
            }
            (MessageKind::Challenge, PeerKind::Router) => {
                self.set_state(SessionState::Authenticating)
            }
            (MessageKind::Welcome, PeerKind::Router) => self.set_state(SessionState::Established),
            _ => (),
        }
        Ok(())
    }

    /// Sends a transport-level health check.
    pub async fn send_ping(&mut self, data: Vec<u8>) -> Result<()> {
        self.write(TransportData::Ping(data)).await
    }

    fn encode(&self, message: Message) -> Result<Vec<u8>> {
        let codec = self.codec.as_ref().ok_or_else(|| {
            Error::new(MiscError::InvalidState).context("no transport is attached")
        })?;
        let mut buffer = Vec::new();
        codec.encode(&message.into_variant(), &mut buffer)?;
        let limit = self.info.map(|info| info.send_limit).unwrap_or(usize::MAX);
        if buffer.len() > limit {
            return Err(
                Error::new(WampError::new(WampErrc::PayloadSizeExceeded)).context(format!(
                    "encoded message of {} bytes exceeds the send limit of {limit} bytes",
                    buffer.len()
                )),
            );
        }
        Ok(buffer)
    }

    async fn write(&mut self, data: TransportData) -> Result<()> {
        let transport = self.transport.as_mut().ok_or_else(|| {
            Error::new(MiscError::InvalidState).context("no transport is attached")
        })?;
        transport.send(data).await
    }

    async fn write_with_timeout(&mut self, data: TransportData) -> Result<()> {
        match tokio::time::timeout(self.abort_timeout, self.write(data)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout.into()),
        }
    }

    /// Waits for the next frame from the transport.
    ///
    /// Never completes while no transport is attached.
    pub async fn next_frame(&mut self) -> Option<Result<TransportData>> {
        match self.transport.as_mut() {
            Some(transport) => transport.next().await,
            None => future::pending().await,
        }
    }

    /// Handles a frame received from [`Self::next_frame`].
    pub async fn handle_frame(&mut self, frame: Option<Result<TransportData>>) -> Inbound {
        match frame {
            None => {
                info!("Session {} transport was closed by the peer", self.name);
                self.drop_transport();
                Inbound::Disconnected(None)
            }
            Some(Err(err)) => {
                warn!("Session {} transport failed: {err:#}", self.name);
                self.drop_transport();
                Inbound::Disconnected(Some(err))
            }
            Some(Ok(TransportData::Ping(data))) => {
                if let Err(err) = self.write(TransportData::Pong(data)).await {
                    warn!("Session {} failed to answer ping: {err:#}", self.name);
                }
                Inbound::Ignored
            }
            Some(Ok(TransportData::Pong(_))) => Inbound::Pong,
            Some(Ok(TransportData::Message(bytes))) => self.receive(&bytes).await,
        }
    }

    async fn receive(&mut self, bytes: &[u8]) -> Inbound {
        let Some(codec) = &self.codec else {
            return Inbound::Ignored;
        };
        let value = match codec.decode(bytes) {
            Ok(value) => value,
            Err(err) => {
                return self
                    .violation(ProtocolViolation::new(format!(
                        "failed to decode message: {err}"
                    )))
                    .await;
            }
        };
        let message = match Message::parse(value) {
            Ok(message) => message,
            Err(violation) => return self.violation(violation).await,
        };
        trace!("Session {} received {message}", self.name);

        let kind = message.kind();
        let traits = kind.traits();
        let state = self.state();
        let visible = match self.peer_kind {
            PeerKind::Client => traits.valid_as_client_rx,
            PeerKind::Router => traits.valid_as_router_rx,
        };
        if !visible {
            return self
                .violation(ProtocolViolation::new(format!(
                    "{kind} message is not valid for a {}",
                    match self.peer_kind {
                        PeerKind::Client => "client",
                        PeerKind::Router => "router",
                    }
                )))
                .await;
        }
        if kind == MessageKind::Error {
            // ERROR is tolerated outside of an established session, since some routers send it
            // after the session closed. Pending requests still see it.
            if !state.has_transport() {
                return Inbound::Ignored;
            }
        } else if !valid_in_state(traits, state) {
            if state == SessionState::ShuttingDown {
                debug!(
                    "Session {} dropped {kind} message while shutting down",
                    self.name
                );
                return Inbound::Ignored;
            }
            return self
                .violation(ProtocolViolation::new(format!(
                    "{kind} message is not valid in the {state} state"
                )))
                .await;
        }

        match kind {
            MessageKind::Hello => {
                if state == SessionState::Establishing {
                    self.set_state(SessionState::Authenticating);
                }
                Inbound::Hello(message)
            }
            MessageKind::Welcome => {
                self.set_state(SessionState::Established);
                Inbound::Welcome(message)
            }
            MessageKind::Challenge => {
                self.set_state(SessionState::Authenticating);
                Inbound::Challenge(message)
            }
            MessageKind::Authenticate => Inbound::Authenticate(message),
            MessageKind::Abort => {
                warn!(
                    "Session {} was aborted by the peer: {}",
                    self.name,
                    message.uri().unwrap_or_default()
                );
                if state.is_joining() {
                    self.set_state(SessionState::Closed);
                } else {
                    self.set_state(SessionState::Failed);
                    self.close_transport().await;
                }
                Inbound::Aborted(message)
            }
            MessageKind::Goodbye => {
                if state == SessionState::ShuttingDown {
                    self.set_state(SessionState::Closed);
                    return Inbound::GoodbyeReply(message);
                }
                info!(
                    "Session {} was closed by the peer: {}",
                    self.name,
                    message.uri().unwrap_or_default()
                );
                self.set_state(SessionState::ShuttingDown);
                if let Err(err) = self.send(goodbye_and_out()).await {
                    warn!("Session {} failed to answer GOODBYE: {err:#}", self.name);
                }
                self.set_state(SessionState::Closed);
                Inbound::Goodbye(message)
            }
            MessageKind::Error => Inbound::Reply(message),
            _ if traits.replies_to.is_some() => Inbound::Reply(message),
            _ => Inbound::Unsolicited(message),
        }
    }

    async fn violation(&mut self, violation: ProtocolViolation) -> Inbound {
        warn!(
            "Session {} received a message that violates the protocol: {}",
            self.name,
            violation.message()
        );
        if self.state().is_abortable() {
            match self.encode(abort_for_error(WampError::new(WampErrc::ProtocolViolation))) {
                Ok(buffer) => {
                    if let Err(err) = self.write_with_timeout(TransportData::Message(buffer)).await
                    {
                        warn!("Session {} failed to send ABORT: {err:#}", self.name);
                    }
                }
                Err(err) => warn!("Session {} failed to encode ABORT: {err:#}", self.name),
            }
        }
        self.set_state(SessionState::Failed);
        self.close_transport().await;
        Inbound::Violation(violation)
    }

    /// Aborts the session.
    ///
    /// If the ABORT does not fit in the send limit, it is retried once with its details replaced
    /// by a hint. If that does not fit either, nothing is sent and the size error is returned.
    /// The transport is closed either way.
    pub async fn abort(&mut self, error: WampError) -> Result<()> {
        let state = self.state();
        if !state.is_abortable() {
            return Err(Error::new(MiscError::InvalidState)
                .context(format!("cannot abort in the {state} state")));
        }
        let reason = error.uri().to_owned();
        info!("Session {} is aborting: {reason}", self.name);

        let mut result = Ok(());
        let buffer = match self.encode(abort_for_error(error)) {
            Ok(buffer) => Some(buffer),
            Err(err) if is_payload_size_exceeded(&err) => {
                let snipped = Message::abort(single_option("hint", "(snipped)"), reason);
                match self.encode(snipped) {
                    Ok(buffer) => Some(buffer),
                    Err(err) => {
                        result = Err(err);
                        None
                    }
                }
            }
            Err(err) => {
                result = Err(err);
                None
            }
        };
        if let Some(buffer) = buffer {
            if let Err(err) = self.write_with_timeout(TransportData::Message(buffer)).await {
                warn!("Session {} failed to send ABORT: {err:#}", self.name);
            }
        }
        self.set_state(SessionState::Failed);
        self.close_transport().await;
        result
    }

    /// Closes the transport immediately, without a GOODBYE.
    pub async fn disconnect(&mut self) {
        self.close_transport().await;
        self.set_state(SessionState::Disconnected);
    }

    async fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            match tokio::time::timeout(self.abort_timeout, transport.close()).await {
                Ok(Ok(())) => (),
                Ok(Err(err)) => debug!("Session {} failed to close transport: {err:#}", self.name),
                Err(_) => debug!("Session {} timed out closing transport", self.name),
            }
        }
        self.codec = None;
        self.info = None;
    }

    fn drop_transport(&mut self) {
        self.transport = None;
        self.codec = None;
        self.info = None;
        self.set_state(SessionState::Disconnected);
    }
}

#[cfg(test)]
mod engine_test {
    use std::time::Duration;

    use assert_matches::assert_matches;
    use futures_util::{
        FutureExt,
        SinkExt,
        StreamExt,
    };
    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Object,
        Variant,
    };

    use crate::{
        codec::{
            codec::{
                Codec,
                CodecId,
            },
            json::JsonCodec,
        },
        core::{
            error::{
                MiscError,
                WampErrc,
                WampError,
            },
            id::Id,
            roles::PeerKind,
            state::SessionState,
        },
        message::{
            common::goodbye_with_reason,
            message::Message,
        },
        peer::engine::{
            Engine,
            Inbound,
        },
        transport::{
            direct::DirectTransport,
            transport::{
                TransportData,
                TransportInfo,
            },
        },
    };

    fn id(value: u64) -> Id {
        Id::try_from(value).unwrap()
    }

    async fn send_raw(remote: &mut DirectTransport, value: Variant) {
        let mut buffer = Vec::new();
        JsonCodec::default().encode(&value, &mut buffer).unwrap();
        remote.send(TransportData::Message(buffer)).await.unwrap();
    }

    async fn read_raw(remote: &mut DirectTransport) -> Variant {
        match remote.next().await {
            Some(Ok(TransportData::Message(bytes))) => JsonCodec::default().decode(&bytes).unwrap(),
            other => panic!("unexpected frame: {other:?}"),
        }
    }

    async fn receive(engine: &mut Engine) -> Inbound {
        let frame = engine.next_frame().await;
        engine.handle_frame(frame).await
    }

    fn attached(peer_kind: PeerKind, info: TransportInfo) -> (Engine, DirectTransport) {
        let (local, remote) = DirectTransport::pair(info);
        let mut engine = Engine::new("test", peer_kind, Duration::from_secs(1));
        engine.attach(Box::new(local)).unwrap();
        (engine, remote)
    }

    async fn established(info: TransportInfo) -> (Engine, DirectTransport) {
        let (mut engine, mut remote) = attached(PeerKind::Client, info);
        engine
            .send(Message::hello("realm1", Object::new()))
            .await
            .unwrap();
        read_raw(&mut remote).await;
        send_raw(
            &mut remote,
            Variant::Array(vec![
                Variant::UInt(2),
                Variant::UInt(12345),
                Variant::Object(Object::new()),
            ]),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Welcome(_));
        (engine, remote)
    }

    #[tokio::test]
    async fn client_joins_through_establishing() {
        let (mut engine, mut remote) = attached(PeerKind::Client, TransportInfo::new(CodecId::Json));
        let mut states = engine.state_changes();
        assert_eq!(engine.state(), SessionState::Closed);
        engine
            .send(Message::hello("realm1", Object::new()))
            .await
            .unwrap();
        assert_eq!(engine.state(), SessionState::Establishing);
        assert_eq!(*states.borrow_and_update(), SessionState::Establishing);
        assert_eq!(
            read_raw(&mut remote).await,
            Variant::Array(vec![
                Variant::UInt(1),
                Variant::from("realm1"),
                Variant::Object(Object::new()),
            ])
        );
        send_raw(
            &mut remote,
            Variant::Array(vec![
                Variant::UInt(2),
                Variant::UInt(12345),
                Variant::Object(Object::new()),
            ]),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Welcome(message) => {
            assert_eq!(message.id_at(1), Some(id(12345)));
        });
        assert_eq!(engine.state(), SessionState::Established);
    }

    #[tokio::test]
    async fn hello_is_only_sent_on_closed_session() {
        let (mut engine, _remote) = established(TransportInfo::new(CodecId::Json)).await;
        let err = engine
            .send(Message::hello("realm1", Object::new()))
            .await
            .unwrap_err();
        assert_matches!(err.downcast_ref::<MiscError>(), Some(MiscError::InvalidState));
    }

    #[tokio::test]
    async fn non_array_frame_aborts_established_session() {
        let (mut engine, mut remote) = established(TransportInfo::new(CodecId::Json)).await;
        send_raw(&mut remote, Variant::from("not a message")).await;
        assert_matches!(receive(&mut engine).await, Inbound::Violation(_));
        assert_eq!(engine.state(), SessionState::Failed);
        assert_eq!(
            read_raw(&mut remote).await,
            Variant::Array(vec![
                Variant::UInt(3),
                Variant::Object(Object::new()),
                Variant::from("wamp.error.protocol_violation"),
            ])
        );
    }

    #[tokio::test]
    async fn router_message_sent_to_client_is_a_violation() {
        let (mut engine, mut remote) = established(TransportInfo::new(CodecId::Json)).await;
        send_raw(
            &mut remote,
            Variant::Array(vec![
                Variant::UInt(48),
                Variant::UInt(1),
                Variant::Object(Object::new()),
                Variant::from("p"),
            ]),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Violation(violation) => {
            assert_eq!(violation.message(), "CALL message is not valid for a client");
        });
    }

    #[tokio::test]
    async fn oversized_message_is_not_sent() {
        let mut info = TransportInfo::new(CodecId::Json);
        info.send_limit = 64;
        let (mut engine, mut remote) = established(info).await;
        let err = engine
            .send(Message::publish(Object::new(), "a".repeat(100)))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<WampError>().map(WampError::errc),
            Some(WampErrc::PayloadSizeExceeded)
        );
        assert!(remote.next().now_or_never().is_none());
        assert_eq!(engine.state(), SessionState::Established);
    }

    #[tokio::test]
    async fn oversized_abort_is_snipped() {
        let mut info = TransportInfo::new(CodecId::Json);
        info.send_limit = 96;
        let (mut engine, mut remote) = established(info).await;
        engine
            .abort(WampError::new(WampErrc::SystemShutdown).with_message("x".repeat(200)))
            .await
            .unwrap();
        assert_eq!(
            read_raw(&mut remote).await,
            Variant::Array(vec![
                Variant::UInt(3),
                Variant::Object(Object::from_iter([(
                    "hint".to_owned(),
                    Variant::from("(snipped)")
                )])),
                Variant::from("wamp.close.system_shutdown"),
            ])
        );
        assert_eq!(engine.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn abort_that_never_fits_still_closes_transport() {
        let mut info = TransportInfo::new(CodecId::Json);
        info.send_limit = 96;
        let (mut engine, mut remote) = established(info).await;
        let err = engine
            .abort(WampError::from_uri(format!("com.example.{}", "x".repeat(100))))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<WampError>().map(WampError::errc),
            Some(WampErrc::PayloadSizeExceeded)
        );
        assert_eq!(engine.state(), SessionState::Failed);
        assert_matches!(remote.next().await, None);
    }

    #[tokio::test]
    async fn abort_is_invalid_when_closed() {
        let (mut engine, _remote) = attached(PeerKind::Client, TransportInfo::new(CodecId::Json));
        let err = engine
            .abort(WampError::new(WampErrc::SystemShutdown))
            .await
            .unwrap_err();
        assert_matches!(err.downcast_ref::<MiscError>(), Some(MiscError::InvalidState));
    }

    #[tokio::test]
    async fn peer_goodbye_is_answered() {
        let (mut engine, mut remote) = established(TransportInfo::new(CodecId::Json)).await;
        send_raw(
            &mut remote,
            goodbye_with_reason("wamp.close.system_shutdown", Object::new()).into_variant(),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Goodbye(_));
        assert_eq!(engine.state(), SessionState::Closed);
        assert_eq!(
            read_raw(&mut remote).await,
            Variant::Array(vec![
                Variant::UInt(6),
                Variant::Object(Object::new()),
                Variant::from("wamp.close.goodbye_and_out"),
            ])
        );
    }

    #[tokio::test]
    async fn own_goodbye_is_closed_by_reply() {
        let (mut engine, mut remote) = established(TransportInfo::new(CodecId::Json)).await;
        engine
            .send(goodbye_with_reason("wamp.close.close_realm", Object::new()))
            .await
            .unwrap();
        assert_eq!(engine.state(), SessionState::ShuttingDown);
        read_raw(&mut remote).await;

        // Non-replies are dropped while shutting down.
        send_raw(
            &mut remote,
            Variant::Array(vec![
                Variant::UInt(36),
                Variant::UInt(1),
                Variant::UInt(2),
                Variant::Object(Object::new()),
            ]),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Ignored);

        send_raw(
            &mut remote,
            goodbye_with_reason("wamp.close.goodbye_and_out", Object::new()).into_variant(),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::GoodbyeReply(_));
        assert_eq!(engine.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn error_is_delivered_outside_established_session() {
        let (mut engine, mut remote) = attached(PeerKind::Client, TransportInfo::new(CodecId::Json));
        send_raw(
            &mut remote,
            Variant::Array(vec![
                Variant::UInt(8),
                Variant::UInt(48),
                Variant::UInt(1),
                Variant::Object(Object::new()),
                Variant::from("wamp.error.canceled"),
            ]),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Reply(_));
        assert_eq!(engine.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn answers_pings() {
        let (mut engine, mut remote) = established(TransportInfo::new(CodecId::Json)).await;
        remote
            .send(TransportData::Ping(b"hi".to_vec()))
            .await
            .unwrap();
        assert_matches!(receive(&mut engine).await, Inbound::Ignored);
        assert_matches!(
            remote.next().await,
            Some(Ok(TransportData::Pong(data))) => assert_eq!(data, b"hi".to_vec())
        );
    }

    #[tokio::test]
    async fn transport_close_disconnects() {
        let (mut engine, remote) = established(TransportInfo::new(CodecId::Json)).await;
        drop(remote);
        assert_matches!(receive(&mut engine).await, Inbound::Disconnected(None));
        assert_eq!(engine.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn request_ids_skip_pending_ids() {
        let mut engine = Engine::new("test", PeerKind::Client, Duration::from_secs(1));
        assert_eq!(engine.next_request_id(|_| false), id(1));
        assert_eq!(engine.next_request_id(|id| id.value() == 2), id(3));
    }

    #[tokio::test]
    async fn router_engine_accepts_hello_and_sends_welcome() {
        let (mut engine, mut remote) = attached(PeerKind::Router, TransportInfo::new(CodecId::Json));
        assert_eq!(engine.state(), SessionState::Establishing);
        send_raw(
            &mut remote,
            Message::hello("realm1", Object::new()).into_variant(),
        )
        .await;
        assert_matches!(receive(&mut engine).await, Inbound::Hello(message) => {
            assert_eq!(message.uri(), Some("realm1"));
        });
        assert_eq!(engine.state(), SessionState::Authenticating);
        engine
            .send(Message::welcome(id(7), Object::new()))
            .await
            .unwrap();
        assert_eq!(engine.state(), SessionState::Established);
        assert_eq!(
            read_raw(&mut remote).await,
            Variant::Array(vec![
                Variant::UInt(2),
                Variant::UInt(7),
                Variant::Object(Object::new()),
            ])
        );
    }
}
