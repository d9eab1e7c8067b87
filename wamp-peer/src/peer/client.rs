use std::{
    collections::BTreeMap,
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use futures_util::future;
use log::{
    debug,
    error,
    info,
    warn,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{
            UnboundedReceiver,
            UnboundedSender,
            WeakUnboundedSender,
            unbounded_channel,
        },
        oneshot,
    },
    time::Instant,
};
use wamp_peer_values::{
    Array,
    Object,
};

use crate::{
    core::{
        cancel::CallCancelMode,
        error::{
            MiscError,
            TransportError,
            WampErrc,
            WampError,
            recognize_wamp_error,
        },
        hash::HashMap,
        id::Id,
        roles::ClientRole,
        state::SessionState,
    },
    message::{
        common::{
            error_for_request,
            goodbye_with_reason,
            single_option,
            wamp_error_from_message,
        },
        kind::MessageKind,
        message::{
            Message,
            RequestKey,
        },
    },
    peer::{
        config::{
            IncidentSlot,
            SessionConfig,
        },
        engine::{
            Engine,
            Inbound,
        },
        handlers::{
            CallSlot,
            ChallengeSlot,
            EventSlot,
            InterruptSlot,
            StreamSlot,
            guarded,
        },
        incident::{
            Incident,
            IncidentKind,
        },
        petition::{
            Authentication,
            Challenge,
            Petition,
            Reason,
            Welcome,
        },
        pub_sub::{
            Event,
            Pub,
            Subscription,
            Topic,
            TopicKey,
        },
        registry::{
            CancelOutcome,
            Delivery,
            Registry,
        },
        rpc::{
            CallChit,
            Invocation,
            Interruption,
            Outcome,
            Procedure,
            Registration,
            RpcResult,
        },
        streaming::{
            CalleeChannel,
            CallerChunk,
        },
        timeout::{
            TimeoutScheduler,
            deadline_after,
        },
    },
    transport::transport::Transport,
};

/// The handler installed for a registered procedure.
#[derive(Clone)]
pub(crate) enum RegisteredHandler {
    Call {
        call: Arc<dyn CallSlot>,
        interrupt: Option<Arc<dyn InterruptSlot>>,
    },
    Stream(Arc<dyn StreamSlot>),
}

/// Where the results of a call are delivered.
pub(crate) enum CallSink {
    Single(oneshot::Sender<Result<RpcResult>>),
    Progressive(UnboundedSender<Result<RpcResult>>),
}

impl CallSink {
    fn deliver(self, result: Result<RpcResult>) {
        match self {
            Self::Single(tx) => {
                tx.send(result).ok();
            }
            Self::Progressive(tx) => {
                tx.send(result).ok();
            }
        }
    }
}

/// A CALL to send.
pub(crate) struct OutgoingCall {
    pub procedure: String,
    pub options: Object,
    pub args: Array,
    pub kwargs: Object,
    pub caller_timeout: Option<Duration>,
    pub cancel_mode: CallCancelMode,
}

/// Work posted to the session strand.
pub(crate) enum Command {
    BeginConnect {
        reply: oneshot::Sender<Result<()>>,
    },
    Attach {
        transport: Box<dyn Transport>,
        reply: oneshot::Sender<Result<()>>,
    },
    ConnectFailed,
    Join {
        petition: Petition,
        challenge_slot: Option<Arc<dyn ChallengeSlot>>,
        reply: oneshot::Sender<Result<Welcome>>,
    },
    ChallengeAnswered {
        result: Result<Authentication>,
    },
    Leave {
        reason: Reason,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Reason>>,
    },
    Abort {
        error: WampError,
        reply: oneshot::Sender<Result<()>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Terminate,
    Subscribe {
        topic: Topic,
        slot: Box<dyn EventSlot>,
        reply: oneshot::Sender<Result<Subscription>>,
    },
    Unsubscribe {
        subscription_id: Id,
        slot_id: u64,
        reply: Option<oneshot::Sender<Result<bool>>>,
    },
    Publish {
        publication: Pub,
        reply: oneshot::Sender<Result<Option<Id>>>,
    },
    Enroll {
        procedure: Procedure,
        handler: RegisteredHandler,
        reply: oneshot::Sender<Result<Registration>>,
    },
    Unregister {
        registration_id: Id,
        reply: Option<oneshot::Sender<Result<bool>>>,
    },
    Call {
        call: OutgoingCall,
        sink: CallSink,
        reply: oneshot::Sender<Result<CallChit>>,
    },
    CancelCall {
        request_id: Id,
        mode: CallCancelMode,
    },
    SendCallChunk {
        request_id: Id,
        chunk: CallerChunk,
        reply: oneshot::Sender<Result<()>>,
    },
    Respond {
        request_id: Id,
        outcome: Result<Outcome>,
    },
}

/// A request waiting for its reply.
enum PendingRequest {
    Subscribe {
        key: TopicKey,
    },
    Unsubscribe {
        reply: Option<oneshot::Sender<Result<bool>>>,
    },
    Publish {
        reply: oneshot::Sender<Result<Option<Id>>>,
    },
    Register {
        procedure: String,
        handler: RegisteredHandler,
        reply: oneshot::Sender<Result<Registration>>,
    },
    Unregister {
        reply: Option<oneshot::Sender<Result<bool>>>,
    },
    Call {
        procedure: String,
        sink: CallSink,
    },
}

struct SubscriptionRecord {
    key: TopicKey,
    slots: BTreeMap<u64, UnboundedSender<Event>>,
}

type SubscribeWaiter = (Box<dyn EventSlot>, oneshot::Sender<Result<Subscription>>);

struct RegistrationRecord {
    procedure: String,
    handler: RegisteredHandler,
}

struct InvocationRecord {
    registration_id: Id,
    chunks: Option<UnboundedSender<CallerChunk>>,
}

struct PendingJoin {
    realm: String,
    challenge_slot: Option<Arc<dyn ChallengeSlot>>,
    reply: oneshot::Sender<Result<Welcome>>,
}

struct PendingLeave {
    reply: oneshot::Sender<Result<Reason>>,
    deadline: Option<Instant>,
}

struct Heartbeat {
    interval: Duration,
    next: Instant,
    unanswered: u32,
}

const MAX_UNANSWERED_HEARTBEATS: u32 = 2;

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => future::pending().await,
    }
}

fn session_ended() -> Error {
    Error::new(MiscError::SessionEnded)
}

fn cancelled() -> Error {
    Error::new(WampError::new(WampErrc::Cancelled))
}

/// Copies an error that must be reported to several waiters.
fn replicate_error(error: &Error) -> Error {
    if let Some(wamp_error) = error.downcast_ref::<WampError>() {
        return wamp_error.clone().into();
    }
    if let Some(misc_error) = error.downcast_ref::<MiscError>() {
        return (*misc_error).into();
    }
    Error::msg(format!("{error:#}"))
}

fn invalid_state(operation: &str, state: SessionState) -> Error {
    Error::new(MiscError::InvalidState)
        .context(format!("cannot {operation} in the {state} state"))
}

/// The session strand.
///
/// Owns the engine and every table of the session. All of its state is mutated from a single task,
/// which consumes [`Command`]s from the session façade and frames from the transport.
pub(crate) struct Client {
    name: String,
    agent: String,
    roles: Vec<ClientRole>,
    fallback_timeout: Option<Duration>,
    user_executor: Handle,
    incident_slot: Option<IncidentSlot>,
    commands: WeakUnboundedSender<Command>,

    engine: Engine,
    registry: Registry<PendingRequest>,
    timeouts: TimeoutScheduler,

    topics: HashMap<TopicKey, Id>,
    subscriptions: HashMap<Id, SubscriptionRecord>,
    pending_subscribes: HashMap<TopicKey, Vec<SubscribeWaiter>>,
    next_slot_id: u64,

    registrations: HashMap<Id, RegistrationRecord>,
    invocations: HashMap<Id, InvocationRecord>,

    pending_join: Option<PendingJoin>,
    pending_leave: Option<PendingLeave>,
    heartbeat: Option<Heartbeat>,
}

impl Client {
    pub fn new(
        config: SessionConfig,
        engine: Engine,
        user_executor: Handle,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            name: config.name,
            agent: config.agent,
            roles: config.roles,
            fallback_timeout: config.fallback_timeout,
            user_executor,
            incident_slot: config.incident_slot,
            commands,
            engine,
            registry: Registry::new(),
            timeouts: TimeoutScheduler::new(),
            topics: HashMap::default(),
            subscriptions: HashMap::default(),
            pending_subscribes: HashMap::default(),
            next_slot_id: 0,
            registrations: HashMap::default(),
            invocations: HashMap::default(),
            pending_join: None,
            pending_leave: None,
            heartbeat: None,
        }
    }

    /// Runs the strand until every handle to the session is dropped.
    pub async fn run(mut self, mut commands: UnboundedReceiver<Command>) {
        debug!("Session {} strand started", self.name);
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                frame = self.engine.next_frame() => {
                    let inbound = self.engine.handle_frame(frame).await;
                    self.handle_inbound(inbound).await;
                }
                _ = sleep_until(deadline) => self.handle_deadlines().await,
            }
        }
        self.terminate().await;
        debug!("Session {} strand finished", self.name);
    }

    fn incident(&self, kind: IncidentKind, message: String) {
        if let Some(slot) = &self.incident_slot {
            slot(Incident::new(kind, message));
        }
    }

    fn next_deadline(&self) -> Option<Instant> {
        [
            self.timeouts.next_deadline(),
            self.pending_leave.as_ref().and_then(|leave| leave.deadline),
            self.heartbeat.as_ref().map(|heartbeat| heartbeat.next),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    fn next_request_id(&mut self) -> Id {
        let registry = &self.registry;
        self.engine
            .next_request_id(|id| registry.has_request_id(id))
    }

    /// Sends a request and records it as pending.
    ///
    /// If the request cannot be sent, the entry is handed back with the error.
    async fn try_request(
        &mut self,
        mut message: Message,
        entry: PendingRequest,
        multi_shot: bool,
    ) -> Result<Id, (Error, PendingRequest)> {
        let request_id = self.next_request_id();
        message.set_request_id(request_id);
        let kind = message.kind();
        if let Err(err) = self.engine.send(message).await {
            return Err((err, entry));
        }
        if let Some(displaced) =
            self.registry
                .insert(RequestKey::new(kind, request_id), entry, multi_shot)
        {
            warn!(
                "Session {} reused request ID {request_id} for a pending {kind}",
                self.name
            );
            self.fail_request(displaced, cancelled());
        }
        Ok(request_id)
    }

    /// Sends a request and records it as pending, failing the entry if it cannot be sent.
    async fn request(&mut self, message: Message, entry: PendingRequest) {
        if let Err((err, entry)) = self.try_request(message, entry, false).await {
            self.fail_request(entry, err);
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::BeginConnect { reply } => {
                reply.send(self.engine.begin_connecting()).ok();
            }
            Command::Attach { transport, reply } => {
                let result = self.engine.attach(transport);
                if result.is_ok() {
                    self.heartbeat = self
                        .engine
                        .transport_info()
                        .and_then(|info| info.heartbeat_interval)
                        .and_then(|interval| {
                            Some(Heartbeat {
                                interval,
                                next: deadline_after(interval)?,
                                unanswered: 0,
                            })
                        });
                }
                reply.send(result).ok();
            }
            Command::ConnectFailed => self.engine.cancel_connecting(),
            Command::Join {
                petition,
                challenge_slot,
                reply,
            } => self.join(petition, challenge_slot, reply).await,
            Command::ChallengeAnswered { result } => self.answer_challenge(result).await,
            Command::Leave {
                reason,
                timeout,
                reply,
            } => self.leave(reason, timeout, reply).await,
            Command::Abort { error, reply } => {
                let result = self.engine.abort(error).await;
                if !self.engine.state().has_transport() {
                    self.end_session();
                }
                reply.send(result).ok();
            }
            Command::Disconnect { reply } => {
                self.engine.disconnect().await;
                self.end_session();
                reply.send(()).ok();
            }
            Command::Terminate => self.terminate().await,
            Command::Subscribe { topic, slot, reply } => self.subscribe(topic, slot, reply).await,
            Command::Unsubscribe {
                subscription_id,
                slot_id,
                reply,
            } => self.unsubscribe(subscription_id, slot_id, reply).await,
            Command::Publish { publication, reply } => self.publish(publication, reply).await,
            Command::Enroll {
                procedure,
                handler,
                reply,
            } => self.enroll(procedure, handler, reply).await,
            Command::Unregister {
                registration_id,
                reply,
            } => self.unregister(registration_id, reply).await,
            Command::Call { call, sink, reply } => self.call(call, sink, reply).await,
            Command::CancelCall { request_id, mode } => self.cancel_call(request_id, mode).await,
            Command::SendCallChunk {
                request_id,
                chunk,
                reply,
            } => {
                reply.send(self.send_call_chunk(request_id, chunk).await).ok();
            }
            Command::Respond {
                request_id,
                outcome,
            } => self.respond(request_id, outcome).await,
        }
    }

    async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Welcome(message) => {
                let Some(join) = self.pending_join.take() else {
                    debug!("Session {} received WELCOME without a join", self.name);
                    return;
                };
                let result = Welcome::from_message(join.realm, &message).ok_or_else(|| {
                    Error::msg("WELCOME message is missing a session ID")
                });
                if let Ok(welcome) = &result {
                    info!(
                        "Session {} joined realm {} as session {}",
                        self.name, welcome.realm, welcome.session_id
                    );
                }
                join.reply.send(result).ok();
            }
            Inbound::Challenge(message) => self.challenge(message).await,
            Inbound::Aborted(message) => {
                let error = wamp_error_from_message(message);
                self.incident(IncidentKind::AbortedByPeer, error.uri().to_owned());
                if let Some(join) = self.pending_join.take() {
                    join.reply.send(Err(error.into())).ok();
                }
                self.end_session();
            }
            Inbound::Goodbye(message) => {
                let reason = Reason::from_message(message);
                self.incident(IncidentKind::ClosedByPeer, reason.uri);
                self.end_session();
            }
            Inbound::GoodbyeReply(message) => {
                let reason = Reason::from_message(message);
                info!("Session {} left its realm: {}", self.name, reason.uri);
                if let Some(leave) = self.pending_leave.take() {
                    leave.reply.send(Ok(reason)).ok();
                }
                self.end_session();
            }
            Inbound::Reply(message) => self.reply(message).await,
            Inbound::Unsolicited(message) => match message.kind() {
                MessageKind::Event => self.event(message),
                MessageKind::Invocation => self.invocation(message).await,
                MessageKind::Interrupt => self.interrupt(message).await,
                kind => debug!("Session {} ignored {kind} message", self.name),
            },
            Inbound::Pong => {
                if let Some(heartbeat) = &mut self.heartbeat {
                    heartbeat.unanswered = 0;
                }
            }
            Inbound::Ignored => (),
            Inbound::Violation(violation) => {
                self.incident(IncidentKind::ProtocolViolation, violation.message().to_owned());
                self.end_session();
            }
            Inbound::Disconnected(err) => {
                let message = match err {
                    Some(err) => format!("{err:#}"),
                    None => "transport closed by the peer".to_owned(),
                };
                self.incident(IncidentKind::TransportDropped, message);
                self.end_session();
            }
            Inbound::Hello(_) | Inbound::Authenticate(_) => {
                error!(
                    "Session {} received a router-bound message on a client engine",
                    self.name
                );
            }
        }
    }

    async fn handle_deadlines(&mut self) {
        let now = Instant::now();
        for request_id in self.timeouts.expire(now) {
            debug!(
                "Session {} call {request_id} timed out on the caller side",
                self.name
            );
            self.cancel_call(request_id, CallCancelMode::KillNoWait)
                .await;
        }

        if self
            .pending_leave
            .as_ref()
            .and_then(|leave| leave.deadline)
            .is_some_and(|deadline| deadline <= now)
        {
            warn!(
                "Session {} timed out waiting for GOODBYE, closing transport",
                self.name
            );
            if let Some(leave) = self.pending_leave.take() {
                leave
                    .reply
                    .send(Err(WampError::new(WampErrc::Timeout).into()))
                    .ok();
            }
            self.engine.disconnect().await;
            self.end_session();
        }

        let Some(heartbeat) = &mut self.heartbeat else {
            return;
        };
        if heartbeat.next > now {
            return;
        }
        if heartbeat.unanswered >= MAX_UNANSWERED_HEARTBEATS {
            warn!("Session {} transport is unresponsive", self.name);
            self.incident(
                IncidentKind::TransportDropped,
                TransportError::Unresponsive.to_string(),
            );
            self.engine.disconnect().await;
            self.end_session();
            return;
        }
        heartbeat.unanswered += 1;
        match now.checked_add(heartbeat.interval) {
            Some(next) => heartbeat.next = next,
            None => self.heartbeat = None,
        }
        if let Err(err) = self.engine.send_ping(Vec::new()).await {
            debug!("Session {} failed to send heartbeat: {err:#}", self.name);
        }
    }

    async fn join(
        &mut self,
        petition: Petition,
        challenge_slot: Option<Arc<dyn ChallengeSlot>>,
        reply: oneshot::Sender<Result<Welcome>>,
    ) {
        let state = self.engine.state();
        if state != SessionState::Closed || self.pending_join.is_some() {
            reply.send(Err(invalid_state("join", state))).ok();
            return;
        }
        let details = petition.hello_details(&self.agent, &self.roles);
        if let Err(err) = self
            .engine
            .send(Message::hello(petition.realm.clone(), details))
            .await
        {
            reply.send(Err(err)).ok();
            return;
        }
        self.pending_join = Some(PendingJoin {
            realm: petition.realm,
            challenge_slot,
            reply,
        });
    }

    async fn challenge(&mut self, message: Message) {
        let slot = self
            .pending_join
            .as_ref()
            .and_then(|join| join.challenge_slot.clone());
        let Some(slot) = slot else {
            let error = WampError::new(WampErrc::AuthenticationFailed)
                .with_message("no challenge handler");
            if let Err(err) = self.engine.abort(error.clone()).await {
                warn!("Session {} failed to abort: {err:#}", self.name);
            }
            if let Some(join) = self.pending_join.take() {
                join.reply.send(Err(error.into())).ok();
            }
            self.end_session();
            return;
        };
        let challenge = Challenge::from_message(message);
        info!(
            "Session {} received a {} challenge",
            self.name, challenge.method
        );
        let commands = self.commands.clone();
        let executor = slot
            .executor()
            .unwrap_or_else(|| self.user_executor.clone());
        executor.spawn(async move {
            let result = guarded(slot.on_challenge(challenge)).await;
            if let Some(commands) = commands.upgrade() {
                commands.send(Command::ChallengeAnswered { result }).ok();
            }
        });
    }

    async fn answer_challenge(&mut self, result: Result<Authentication>) {
        if self.engine.state() != SessionState::Authenticating || self.pending_join.is_none() {
            debug!(
                "Session {} dropped a challenge answer for a join that ended",
                self.name
            );
            return;
        }
        let error = match result {
            Ok(authentication) => match self.engine.send(authentication.into_message()).await {
                Ok(()) => return,
                Err(err) => err,
            },
            Err(err) => {
                let error = WampError::new(WampErrc::AuthenticationFailed)
                    .with_message(format!("{err:#}"));
                if let Err(err) = self.engine.abort(error).await {
                    warn!("Session {} failed to abort: {err:#}", self.name);
                }
                err
            }
        };
        if let Some(join) = self.pending_join.take() {
            join.reply.send(Err(error)).ok();
        }
        self.end_session();
    }

    async fn leave(
        &mut self,
        reason: Reason,
        timeout: Option<Duration>,
        reply: oneshot::Sender<Result<Reason>>,
    ) {
        let state = self.engine.state();
        if state != SessionState::Established {
            reply.send(Err(invalid_state("leave", state))).ok();
            return;
        }
        if let Err(err) = self
            .engine
            .send(goodbye_with_reason(reason.uri, reason.details))
            .await
        {
            reply.send(Err(err)).ok();
            return;
        }
        self.pending_leave = Some(PendingLeave {
            reply,
            deadline: timeout
                .or(self.fallback_timeout)
                .and_then(deadline_after),
        });
    }

    /// Fails every pending operation after the session ended.
    fn end_session(&mut self) {
        for entry in self.registry.drain() {
            self.fail_request(entry, session_ended());
        }
        for (_, waiters) in self.pending_subscribes.drain() {
            for (_, reply) in waiters {
                reply.send(Err(session_ended())).ok();
            }
        }
        if let Some(join) = self.pending_join.take() {
            join.reply.send(Err(session_ended())).ok();
        }
        if let Some(leave) = self.pending_leave.take() {
            leave.reply.send(Err(session_ended())).ok();
        }
        self.clear_tables();
    }

    /// Drops every table without notifying anyone.
    fn clear_tables(&mut self) {
        self.timeouts.clear();
        self.topics.clear();
        self.subscriptions.clear();
        self.registrations.clear();
        self.invocations.clear();
        self.heartbeat = None;
    }

    async fn terminate(&mut self) {
        if self.engine.state().has_transport() {
            info!("Session {} terminated", self.name);
        }
        self.engine.disconnect().await;
        self.registry.drain();
        self.pending_subscribes.clear();
        self.pending_join = None;
        self.pending_leave = None;
        self.clear_tables();
    }

    fn fail_request(&mut self, entry: PendingRequest, error: Error) {
        match entry {
            PendingRequest::Subscribe { key } => {
                for (_, reply) in self.pending_subscribes.remove(&key).unwrap_or_default() {
                    reply.send(Err(replicate_error(&error))).ok();
                }
            }
            PendingRequest::Unsubscribe { reply } | PendingRequest::Unregister { reply } => {
                if let Some(reply) = reply {
                    reply.send(Err(error)).ok();
                }
            }
            PendingRequest::Publish { reply } => {
                reply.send(Err(error)).ok();
            }
            PendingRequest::Register { reply, .. } => {
                reply.send(Err(error)).ok();
            }
            PendingRequest::Call { sink, .. } => sink.deliver(Err(error)),
        }
    }

    async fn reply(&mut self, message: Message) {
        let Some(key) = message.request_key() else {
            debug!(
                "Session {} dropped {} message without a request ID",
                self.name,
                message.kind()
            );
            return;
        };
        let progressive = message.is_progressive_result();
        let entry = match self.registry.route(&key, progressive) {
            Some(Delivery::Progress(PendingRequest::Call {
                sink: CallSink::Progressive(tx),
                ..
            })) => {
                tx.send(Ok(RpcResult::from_message(message))).ok();
                return;
            }
            Some(Delivery::Progress(_)) => return,
            Some(Delivery::Final(entry)) => entry,
            None => {
                self.stale_reply(key, message);
                return;
            }
        };
        if key.kind == MessageKind::Call {
            self.timeouts.remove(key.request_id);
        }
        if message.kind() == MessageKind::Error {
            let error = wamp_error_from_message(message);
            if error.errc() == WampErrc::Unknown {
                self.incident(IncidentKind::UnknownErrorUri, error.uri().to_owned());
            }
            self.fail_request(entry, error.into());
            return;
        }
        self.complete_request(entry, message).await;
    }

    fn stale_reply(&self, key: RequestKey, message: Message) {
        debug!(
            "Session {} dropped {} for {key}, which is no longer pending",
            self.name,
            message.kind()
        );
        if message.kind() == MessageKind::Error
            && (!message.args().is_empty() || !message.kwargs().is_empty())
        {
            warn!(
                "Session {} dropped ERROR {} for {key} with args {:?} and kwargs {:?}",
                self.name,
                message.uri().unwrap_or_default(),
                message.args(),
                message.kwargs()
            );
        }
        self.incident(IncidentKind::StaleReply, format!("{} for {key}", message.kind()));
    }

    async fn complete_request(&mut self, entry: PendingRequest, message: Message) {
        match entry {
            PendingRequest::Subscribe { key } => {
                let waiters = self.pending_subscribes.remove(&key).unwrap_or_default();
                let Some(subscription_id) = message.id_at(2) else {
                    for (_, reply) in waiters {
                        reply
                            .send(Err(Error::msg("SUBSCRIBED message is missing an ID")))
                            .ok();
                    }
                    return;
                };
                self.topics.insert(key.clone(), subscription_id);
                self.subscriptions
                    .entry(subscription_id)
                    .or_insert_with(|| SubscriptionRecord {
                        key,
                        slots: BTreeMap::new(),
                    });
                for (slot, reply) in waiters {
                    self.add_slot(subscription_id, slot, reply);
                }
                self.release_if_unused(subscription_id).await;
            }
            PendingRequest::Unsubscribe { reply } | PendingRequest::Unregister { reply } => {
                if let Some(reply) = reply {
                    reply.send(Ok(true)).ok();
                }
            }
            PendingRequest::Publish { reply } => {
                reply.send(Ok(message.id_at(2))).ok();
            }
            PendingRequest::Register {
                procedure,
                handler,
                reply,
            } => {
                let Some(registration_id) = message.id_at(2) else {
                    reply
                        .send(Err(Error::msg("REGISTERED message is missing an ID")))
                        .ok();
                    return;
                };
                debug!(
                    "Session {} registered {procedure} as {registration_id}",
                    self.name
                );
                self.registrations.insert(
                    registration_id,
                    RegistrationRecord {
                        procedure: procedure.clone(),
                        handler,
                    },
                );
                let registration =
                    Registration::new(registration_id, procedure, self.commands.clone());
                if reply.send(Ok(registration)).is_err() {
                    self.unregister(registration_id, None).await;
                }
            }
            PendingRequest::Call { sink, .. } => {
                sink.deliver(Ok(RpcResult::from_message(message)));
            }
        }
    }

    fn add_slot(
        &mut self,
        subscription_id: Id,
        slot: Box<dyn EventSlot>,
        reply: oneshot::Sender<Result<Subscription>>,
    ) {
        let Some(record) = self.subscriptions.get_mut(&subscription_id) else {
            reply.send(Err(session_ended())).ok();
            return;
        };
        self.next_slot_id += 1;
        let slot_id = self.next_slot_id;
        let subscription =
            Subscription::new(subscription_id, slot_id, &record.key, self.commands.clone());
        if reply.send(Ok(subscription)).is_err() {
            return;
        }

        let (tx, rx) = unbounded_channel();
        record.slots.insert(slot_id, tx);
        let executor = slot
            .executor()
            .unwrap_or_else(|| self.user_executor.clone());
        executor.spawn(dispatch_events(
            self.name.clone(),
            slot,
            rx,
            self.incident_slot.clone(),
        ));
    }

    /// Unsubscribes on the router if no local slot is left under the subscription.
    async fn release_if_unused(&mut self, subscription_id: Id) {
        let Some(record) = self.subscriptions.get(&subscription_id) else {
            return;
        };
        if !record.slots.is_empty() {
            return;
        }
        self.unsubscribe_from_router(subscription_id, None).await;
    }

    async fn unsubscribe_from_router(
        &mut self,
        subscription_id: Id,
        reply: Option<oneshot::Sender<Result<bool>>>,
    ) {
        if let Some(record) = self.subscriptions.remove(&subscription_id) {
            self.topics.remove(&record.key);
        }
        debug!(
            "Session {} unsubscribing from {subscription_id}",
            self.name
        );
        self.request(
            Message::unsubscribe(subscription_id),
            PendingRequest::Unsubscribe { reply },
        )
        .await;
    }

    async fn subscribe(
        &mut self,
        topic: Topic,
        slot: Box<dyn EventSlot>,
        reply: oneshot::Sender<Result<Subscription>>,
    ) {
        let state = self.engine.state();
        if state != SessionState::Established {
            reply.send(Err(invalid_state("subscribe", state))).ok();
            return;
        }
        let key = topic.key();
        if let Some(subscription_id) = self.topics.get(&key).copied() {
            self.add_slot(subscription_id, slot, reply);
            return;
        }
        if let Some(waiters) = self.pending_subscribes.get_mut(&key) {
            waiters.push((slot, reply));
            return;
        }
        self.pending_subscribes
            .insert(key.clone(), vec![(slot, reply)]);
        let message = Message::subscribe(topic.subscribe_options(), topic.uri);
        self.request(message, PendingRequest::Subscribe { key })
            .await;
    }

    async fn unsubscribe(
        &mut self,
        subscription_id: Id,
        slot_id: u64,
        reply: Option<oneshot::Sender<Result<bool>>>,
    ) {
        let removed = self
            .subscriptions
            .get_mut(&subscription_id)
            .and_then(|record| record.slots.remove(&slot_id))
            .is_some();
        let last = removed
            && self
                .subscriptions
                .get(&subscription_id)
                .is_some_and(|record| record.slots.is_empty());
        if !last {
            if let Some(reply) = reply {
                reply.send(Ok(false)).ok();
            }
            return;
        }
        self.unsubscribe_from_router(subscription_id, reply).await;
    }

    async fn publish(&mut self, publication: Pub, reply: oneshot::Sender<Result<Option<Id>>>) {
        let state = self.engine.state();
        if state != SessionState::Established {
            reply.send(Err(invalid_state("publish", state))).ok();
            return;
        }
        let options = match publication.publish_options() {
            Ok(options) => options,
            Err(err) => {
                reply.send(Err(err.into())).ok();
                return;
            }
        };
        let acknowledge = publication.options.acknowledge;
        let message = Message::publish(options, publication.topic)
            .with_payload(publication.args, publication.kwargs);
        if acknowledge {
            self.request(message, PendingRequest::Publish { reply })
                .await;
            return;
        }
        let mut message = message;
        message.set_request_id(self.next_request_id());
        reply.send(self.engine.send(message).await.map(|()| None)).ok();
    }

    async fn enroll(
        &mut self,
        procedure: Procedure,
        handler: RegisteredHandler,
        reply: oneshot::Sender<Result<Registration>>,
    ) {
        let state = self.engine.state();
        if state != SessionState::Established {
            reply.send(Err(invalid_state("register", state))).ok();
            return;
        }
        let message = Message::register(procedure.register_options(), procedure.uri.clone());
        let entry = PendingRequest::Register {
            procedure: procedure.uri,
            handler,
            reply,
        };
        self.request(message, entry).await;
    }

    async fn unregister(
        &mut self,
        registration_id: Id,
        reply: Option<oneshot::Sender<Result<bool>>>,
    ) {
        let Some(record) = self.registrations.remove(&registration_id) else {
            if let Some(reply) = reply {
                reply.send(Ok(false)).ok();
            }
            return;
        };
        debug!(
            "Session {} unregistering {} ({registration_id})",
            self.name, record.procedure
        );
        self.request(
            Message::unregister(registration_id),
            PendingRequest::Unregister { reply },
        )
        .await;
    }

    async fn call(
        &mut self,
        call: OutgoingCall,
        sink: CallSink,
        reply: oneshot::Sender<Result<CallChit>>,
    ) {
        let state = self.engine.state();
        if state != SessionState::Established {
            reply.send(Err(invalid_state("call", state))).ok();
            return;
        }
        let multi_shot = matches!(sink, CallSink::Progressive(_));
        let message =
            Message::call(call.options, call.procedure.clone()).with_payload(call.args, call.kwargs);
        let entry = PendingRequest::Call {
            procedure: call.procedure,
            sink,
        };
        let request_id = match self.try_request(message, entry, multi_shot).await {
            Ok(request_id) => request_id,
            Err((err, _)) => {
                reply.send(Err(err)).ok();
                return;
            }
        };
        if let Some(timeout) = call.caller_timeout.or(self.fallback_timeout) {
            if !self.timeouts.add(request_id, timeout) {
                debug!(
                    "Session {} call {request_id} has a timeout too large to schedule",
                    self.name
                );
            }
        }
        reply
            .send(Ok(CallChit {
                request_id,
                cancel_mode: call.cancel_mode,
            }))
            .ok();
    }

    async fn cancel_call(&mut self, request_id: Id, mode: CallCancelMode) {
        let key = RequestKey::new(MessageKind::Call, request_id);
        let CancelOutcome::Pending {
            send_cancel,
            completed,
        } = self.registry.cancel(&key, mode)
        else {
            return;
        };
        if send_cancel && self.engine.state() == SessionState::Established {
            let message = Message::cancel(request_id, single_option("mode", mode.to_string()));
            if let Err(err) = self.engine.send(message).await {
                warn!(
                    "Session {} failed to cancel call {request_id}: {err:#}",
                    self.name
                );
            }
        }
        if let Some(entry) = completed {
            self.timeouts.remove(request_id);
            self.fail_request(entry, cancelled());
        }
    }

    async fn send_call_chunk(&mut self, request_id: Id, chunk: CallerChunk) -> Result<()> {
        let key = RequestKey::new(MessageKind::Call, request_id);
        let procedure = match self.registry.get_mut(&key) {
            Some(PendingRequest::Call { procedure, .. }) => procedure.clone(),
            _ => {
                return Err(Error::new(MiscError::Absent)
                    .context(format!("call {request_id} is no longer pending")));
            }
        };
        self.engine.send(chunk.into_call(request_id, &procedure)).await
    }

    fn event(&mut self, message: Message) {
        let (Some(subscription_id), Some(publication_id)) = (message.id_at(1), message.id_at(2))
        else {
            return;
        };
        let Some(record) = self.subscriptions.get(&subscription_id) else {
            warn!(
                "Session {} received EVENT for unknown subscription {subscription_id}",
                self.name
            );
            self.incident(
                IncidentKind::EventForUnknownSubscription,
                format!("subscription {subscription_id}"),
            );
            return;
        };
        let topic = message
            .option("topic")
            .and_then(|topic| topic.as_str())
            .unwrap_or(&record.key.0)
            .to_owned();
        let payload = message.into_payload();
        let event = Event {
            subscription_id,
            publication_id,
            topic,
            details: payload.options,
            args: payload.args,
            kwargs: payload.kwargs,
        };
        for tx in record.slots.values() {
            tx.send(event.clone()).ok();
        }
    }

    async fn invocation(&mut self, message: Message) {
        let (Some(request_id), Some(registration_id)) = (message.request_id(), message.id_at(2))
        else {
            return;
        };

        if let Some(record) = self.invocations.get_mut(&request_id) {
            let Some(chunks) = &record.chunks else {
                debug!(
                    "Session {} dropped a chunk for invocation {request_id} that is not streaming",
                    self.name
                );
                return;
            };
            let chunk = CallerChunk::from_invocation(message);
            let is_final = chunk.is_final;
            chunks.send(chunk).ok();
            if is_final {
                record.chunks = None;
            }
            return;
        }

        let Some(registration) = self.registrations.get(&registration_id) else {
            let error = WampError::new(WampErrc::NoSuchProcedure);
            if let Err(err) = self
                .engine
                .send(error_for_request(MessageKind::Invocation, request_id, error))
                .await
            {
                warn!(
                    "Session {} failed to reject invocation {request_id}: {err:#}",
                    self.name
                );
            }
            return;
        };

        match registration.handler.clone() {
            RegisteredHandler::Call { call, .. } => {
                let executor = call
                    .executor()
                    .unwrap_or_else(|| self.user_executor.clone());
                let Some(invocation) =
                    Invocation::new(message, executor.clone(), self.commands.clone())
                else {
                    return;
                };
                self.invocations.insert(
                    request_id,
                    InvocationRecord {
                        registration_id,
                        chunks: None,
                    },
                );
                let commands = self.commands.clone();
                executor.spawn(async move {
                    let outcome = guarded(call.on_call(invocation)).await;
                    if let Some(commands) = commands.upgrade() {
                        commands
                            .send(Command::Respond {
                                request_id,
                                outcome,
                            })
                            .ok();
                    }
                });
            }
            RegisteredHandler::Stream(slot) => {
                let executor = slot
                    .executor()
                    .unwrap_or_else(|| self.user_executor.clone());
                let details = message.options().clone();
                let invitation = CallerChunk::from_invocation(message);
                let (tx, rx) = unbounded_channel();
                let chunks = (!invitation.is_final).then_some(tx);
                self.invocations.insert(
                    request_id,
                    InvocationRecord {
                        registration_id,
                        chunks,
                    },
                );
                let channel = CalleeChannel::new(
                    request_id,
                    registration_id,
                    details,
                    invitation,
                    rx,
                    executor.clone(),
                    self.commands.clone(),
                );
                let commands = self.commands.clone();
                executor.spawn(async move {
                    if let Err(err) = guarded(slot.on_stream(channel)).await {
                        if let Some(commands) = commands.upgrade() {
                            commands
                                .send(Command::Respond {
                                    request_id,
                                    outcome: Err(err),
                                })
                                .ok();
                        }
                    }
                });
            }
        }
    }

    async fn interrupt(&mut self, message: Message) {
        let Some(request_id) = message.request_id() else {
            return;
        };
        let Some(record) = self.invocations.get(&request_id) else {
            debug!(
                "Session {} dropped INTERRUPT for invocation {request_id}, which is no longer pending",
                self.name
            );
            return;
        };
        let slot = match self
            .registrations
            .get(&record.registration_id)
            .map(|registration| &registration.handler)
        {
            Some(RegisteredHandler::Call {
                interrupt: Some(slot),
                ..
            }) => Some(slot.clone()),
            _ => None,
        };
        let Some(slot) = slot else {
            self.invocations.remove(&request_id);
            let error = WampError::new(WampErrc::Cancelled);
            if let Err(err) = self
                .engine
                .send(error_for_request(MessageKind::Invocation, request_id, error))
                .await
            {
                warn!(
                    "Session {} failed to answer INTERRUPT for {request_id}: {err:#}",
                    self.name
                );
            }
            return;
        };
        let Some(interruption) = Interruption::new(message, self.commands.clone()) else {
            return;
        };
        let executor = slot
            .executor()
            .unwrap_or_else(|| self.user_executor.clone());
        let commands = self.commands.clone();
        executor.spawn(async move {
            let outcome = guarded(slot.on_interrupt(interruption)).await;
            if let Some(commands) = commands.upgrade() {
                commands
                    .send(Command::Respond {
                        request_id,
                        outcome,
                    })
                    .ok();
            }
        });
    }

    async fn respond(&mut self, request_id: Id, outcome: Result<Outcome>) {
        if !self.invocations.contains_key(&request_id) {
            debug!(
                "Session {} dropped the answer to invocation {request_id}, which is no longer pending",
                self.name
            );
            return;
        }
        let message = match outcome {
            Ok(Outcome::Deferred) => return,
            Ok(Outcome::Result(result)) => {
                if !result.progress {
                    self.invocations.remove(&request_id);
                }
                result.into_yield(request_id)
            }
            Ok(Outcome::Error(error)) => {
                self.invocations.remove(&request_id);
                error_for_request(MessageKind::Invocation, request_id, error)
            }
            Err(err) => {
                self.invocations.remove(&request_id);
                let error = match recognize_wamp_error(&err) {
                    Some(error) => error,
                    None => {
                        warn!(
                            "Session {} call handler for invocation {request_id} failed: {err:#}",
                            self.name
                        );
                        self.incident(IncidentKind::HandlerFailed, format!("{err:#}"));
                        WampError::new(WampErrc::RuntimeError).with_message(format!("{err:#}"))
                    }
                };
                error_for_request(MessageKind::Invocation, request_id, error)
            }
        };
        let Err(err) = self.engine.send(message).await else {
            return;
        };
        let too_large = err
            .downcast_ref::<WampError>()
            .is_some_and(|error| error.errc() == WampErrc::PayloadSizeExceeded);
        if !too_large {
            warn!(
                "Session {} failed to answer invocation {request_id}: {err:#}",
                self.name
            );
            return;
        }
        self.invocations.remove(&request_id);
        let error = WampError::new(WampErrc::PayloadSizeExceeded);
        if let Err(err) = self
            .engine
            .send(error_for_request(MessageKind::Invocation, request_id, error))
            .await
        {
            warn!(
                "Session {} failed to answer invocation {request_id}: {err:#}",
                self.name
            );
        }
    }
}

/// Delivers events to a single slot, one at a time.
async fn dispatch_events(
    name: String,
    mut slot: Box<dyn EventSlot>,
    mut events: UnboundedReceiver<Event>,
    incident_slot: Option<IncidentSlot>,
) {
    while let Some(event) = events.recv().await {
        let topic = event.topic.clone();
        if let Err(err) = guarded(slot.on_event(event)).await {
            warn!("Session {name} event handler for {topic} failed: {err:#}");
            if let Some(incident_slot) = &incident_slot {
                incident_slot(Incident::new(
                    IncidentKind::HandlerFailed,
                    format!("event handler for {topic}: {err:#}"),
                ));
            }
        }
    }
}
