use std::{
    future::Future,
    sync::Arc,
    time::Duration,
};

use anyhow::{
    Error,
    Result,
};
use log::{
    info,
    warn,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{
            UnboundedSender,
            unbounded_channel,
        },
        oneshot,
        watch,
    },
};
use wamp_peer_values::{
    Object,
    Variant,
};

use crate::{
    core::{
        cancel::CallCancelMode,
        error::{
            MiscError,
            TransportError,
            WampErrc,
            WampError,
        },
        id::Id,
        match_policy::MatchPolicy,
        roles::PeerKind,
        state::SessionState,
        uri::{
            InvalidUri,
            validate_uri,
            validate_wildcard_uri,
        },
    },
    peer::{
        client::{
            CallSink,
            Client,
            Command,
            OutgoingCall,
            RegisteredHandler,
        },
        config::SessionConfig,
        connector::connector::ConnectionWish,
        engine::Engine,
        handlers::{
            CallSlot,
            ChallengeSlot,
            EventSlot,
            InterruptSlot,
            StreamSlot,
        },
        petition::{
            Petition,
            Reason,
            Welcome,
        },
        pub_sub::{
            Pub,
            Subscription,
            Topic,
        },
        rpc::{
            CallChit,
            Outcome,
            PendingCall,
            ProgressiveCall,
            Procedure,
            Registration,
            Rpc,
            RpcResult,
        },
        streaming::{
            CallerChannel,
            StreamRequest,
        },
    },
};

fn invalid_uri(err: InvalidUri) -> Error {
    WampError::new(WampErrc::InvalidUri)
        .with_message(err.to_string())
        .into()
}

fn validate_pattern(uri: &str, match_policy: MatchPolicy) -> Result<()> {
    let result = match match_policy {
        MatchPolicy::Exact => validate_uri(uri),
        MatchPolicy::Prefix | MatchPolicy::Wildcard => validate_wildcard_uri(uri),
    };
    result.map_err(invalid_uri)
}

/// Reports a failed connection attempt if a connect operation is dropped or exhausts its wishes.
struct ConnectGuard<'a> {
    commands: &'a UnboundedSender<Command>,
    armed: bool,
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.commands.send(Command::ConnectFailed).ok();
        }
    }
}

struct Shared {
    name: String,
    commands: UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    fallback_timeout: Option<Duration>,
}

/// A WAMP client session.
///
/// Every operation is posted to a single task that owns the transport and all session state, so a
/// session may be cloned and used from any task. The task ends when the last clone is dropped.
#[derive(Clone)]
pub struct Session {
    shared: Arc<Shared>,
}

impl Session {
    /// Creates a new session on the current runtime.
    pub fn new(config: SessionConfig) -> Result<Self> {
        let runtime = Handle::try_current()?;
        let user_executor = config
            .user_executor
            .clone()
            .unwrap_or_else(|| runtime.clone());
        let engine = Engine::new(config.name.clone(), PeerKind::Client, config.abort_timeout);
        let state = engine.state_changes();
        if let Some(slot) = config.state_change_slot.clone() {
            let mut changes = engine.state_changes();
            runtime.spawn(async move {
                while changes.changed().await.is_ok() {
                    let state = *changes.borrow_and_update();
                    slot(state);
                }
            });
        }

        let (commands, commands_rx) = unbounded_channel();
        let shared = Arc::new(Shared {
            name: config.name.clone(),
            commands: commands.clone(),
            state,
            fallback_timeout: config.fallback_timeout,
        });
        let client = Client::new(config, engine, user_executor, commands.downgrade());
        runtime.spawn(client.run(commands_rx));
        Ok(Self { shared })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// The current state of the session.
    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    /// A receiver observing every state change of the session.
    pub fn state_changes(&self) -> watch::Receiver<SessionState> {
        self.shared.state.clone()
    }

    fn post(&self, command: Command) -> Result<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| Error::new(MiscError::SessionEnded))
    }

    async fn ask<T, F>(&self, command: F) -> Result<T>
    where
        F: FnOnce(oneshot::Sender<Result<T>>) -> Command,
    {
        let (tx, rx) = oneshot::channel();
        self.post(command(tx))?;
        rx.await.map_err(|_| Error::new(MiscError::Abandoned))?
    }

    async fn with_fallback_timeout<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.shared.fallback_timeout {
            Some(timeout) => match tokio::time::timeout(timeout, future).await {
                Ok(result) => result,
                Err(_) => Err(WampError::new(WampErrc::Timeout).into()),
            },
            None => future.await,
        }
    }

    /// Connects to a router, trying each wish in order.
    ///
    /// Returns the index of the wish that succeeded. Dropping the returned future stops the
    /// attempt and returns the session to the disconnected state.
    pub async fn connect(&self, wishes: Vec<ConnectionWish>) -> Result<usize> {
        if wishes.is_empty() {
            return Err(Error::new(TransportError::Exhausted).context("no connection wishes"));
        }
        self.ask(|reply| Command::BeginConnect { reply }).await?;
        let mut guard = ConnectGuard {
            commands: &self.shared.commands,
            armed: true,
        };
        let mut last_error = None;
        for (index, wish) in wishes.iter().enumerate() {
            let result = if wish.codec.is_supported() {
                match wish.connector.connect(wish.codec).await {
                    Ok(transport) => {
                        self.ask(|reply| Command::Attach { transport, reply })
                            .await
                    }
                    Err(err) => Err(err),
                }
            } else {
                Err(Error::new(TransportError::BadSerializer)
                    .context(format!("no codec for {}", wish.codec)))
            };
            match result {
                Ok(()) => {
                    guard.armed = false;
                    info!("Session {} connected using wish {index}", self.name());
                    return Ok(index);
                }
                Err(err) => {
                    warn!(
                        "Session {} failed to connect using wish {index}: {err:#}",
                        self.name()
                    );
                    last_error = Some(err);
                }
            }
        }
        Err(match last_error {
            Some(err) => err.context(TransportError::Exhausted),
            None => TransportError::Exhausted.into(),
        })
    }

    /// Joins a realm without authentication.
    pub async fn join(&self, petition: Petition) -> Result<Welcome> {
        self.join_internal(petition, None).await
    }

    /// Joins a realm, answering authentication challenges with the given handler.
    pub async fn join_with_authentication<S>(&self, petition: Petition, slot: S) -> Result<Welcome>
    where
        S: ChallengeSlot,
    {
        self.join_internal(petition, Some(Arc::new(slot))).await
    }

    async fn join_internal(
        &self,
        petition: Petition,
        challenge_slot: Option<Arc<dyn ChallengeSlot>>,
    ) -> Result<Welcome> {
        validate_uri(&petition.realm).map_err(invalid_uri)?;
        self.with_fallback_timeout(self.ask(|reply| Command::Join {
            petition,
            challenge_slot,
            reply,
        }))
        .await
    }

    /// Leaves the realm with the default reason, waiting up to the fallback timeout.
    pub async fn leave(&self) -> Result<Reason> {
        self.leave_with_reason(Reason::default(), None).await
    }

    /// Leaves the realm, returning the router's reason.
    ///
    /// If the router does not answer within the timeout, the transport is closed.
    pub async fn leave_with_reason(
        &self,
        reason: Reason,
        timeout: Option<Duration>,
    ) -> Result<Reason> {
        validate_uri(&reason.uri).map_err(invalid_uri)?;
        self.ask(|reply| Command::Leave {
            reason,
            timeout,
            reply,
        })
        .await
    }

    /// Closes the transport immediately, failing every pending operation.
    pub async fn disconnect(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.post(Command::Disconnect { reply: tx })?;
        rx.await.map_err(|_| Error::new(MiscError::Abandoned))
    }

    /// Closes the transport immediately, dropping every pending operation without completing it.
    pub fn terminate(&self) {
        self.post(Command::Terminate).ok();
    }

    /// Aborts the session with the given error.
    pub async fn abort(&self, error: WampError) -> Result<()> {
        self.ask(|reply| Command::Abort { error, reply }).await
    }

    /// Subscribes to a topic.
    ///
    /// Several subscriptions to the same topic and match policy share one subscription on the
    /// router.
    pub async fn subscribe<S>(&self, topic: Topic, slot: S) -> Result<Subscription>
    where
        S: EventSlot,
    {
        validate_pattern(&topic.uri, topic.match_policy)?;
        self.with_fallback_timeout(self.ask(|reply| Command::Subscribe {
            topic,
            slot: Box::new(slot),
            reply,
        }))
        .await
    }

    /// Removes a subscription handle.
    ///
    /// Returns true if this was the last handle for its topic and the router confirmed the
    /// subscription was removed.
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        self.with_fallback_timeout(self.ask(|reply| Command::Unsubscribe {
            subscription_id: subscription.id(),
            slot_id: subscription.slot_id(),
            reply: Some(reply),
        }))
        .await
    }

    /// Publishes an event.
    ///
    /// Returns the publication ID if the publication asked for an acknowledgement.
    pub async fn publish(&self, publication: Pub) -> Result<Option<Id>> {
        validate_uri(&publication.topic).map_err(invalid_uri)?;
        self.with_fallback_timeout(self.ask(|reply| Command::Publish { publication, reply }))
            .await
    }

    /// Registers a procedure.
    pub async fn enroll<S>(&self, procedure: Procedure, slot: S) -> Result<Registration>
    where
        S: CallSlot,
    {
        self.enroll_internal(
            procedure,
            RegisteredHandler::Call {
                call: Arc::new(slot),
                interrupt: None,
            },
        )
        .await
    }

    /// Registers a procedure whose invocations can be interrupted by their callers.
    pub async fn enroll_with_interrupt<S, I>(
        &self,
        procedure: Procedure,
        slot: S,
        interrupt_slot: I,
    ) -> Result<Registration>
    where
        S: CallSlot,
        I: InterruptSlot,
    {
        self.enroll_internal(
            procedure,
            RegisteredHandler::Call {
                call: Arc::new(slot),
                interrupt: Some(Arc::new(interrupt_slot)),
            },
        )
        .await
    }

    /// Registers a procedure whose invocations open a stream.
    pub async fn enroll_stream<S>(&self, procedure: Procedure, slot: S) -> Result<Registration>
    where
        S: StreamSlot,
    {
        self.enroll_internal(procedure, RegisteredHandler::Stream(Arc::new(slot)))
            .await
    }

    async fn enroll_internal(
        &self,
        procedure: Procedure,
        handler: RegisteredHandler,
    ) -> Result<Registration> {
        validate_pattern(&procedure.uri, procedure.match_policy)?;
        self.with_fallback_timeout(self.ask(|reply| Command::Enroll {
            procedure,
            handler,
            reply,
        }))
        .await
    }

    /// Unregisters a procedure.
    ///
    /// Returns true if the router confirmed the registration was removed.
    pub async fn unregister(&self, registration: Registration) -> Result<bool> {
        self.with_fallback_timeout(self.ask(|reply| Command::Unregister {
            registration_id: registration.id(),
            reply: Some(reply),
        }))
        .await
    }

    /// Calls a procedure and waits for its result.
    ///
    /// Dropping the returned future before it completes cancels the call with the RPC's cancel
    /// mode.
    pub async fn call(&self, rpc: Rpc) -> Result<RpcResult> {
        self.start_call(rpc).await?.result().await
    }

    /// Calls a procedure, returning a handle to the pending call.
    pub async fn start_call(&self, rpc: Rpc) -> Result<PendingCall> {
        let options = rpc.options.call_options();
        let (tx, rx) = oneshot::channel();
        let chit = self
            .send_call(rpc, options, CallSink::Single(tx))
            .await?;
        Ok(PendingCall::new(chit, rx, self.shared.commands.downgrade()))
    }

    /// Calls a procedure that may answer with progressive results.
    pub async fn ongoing_call(&self, rpc: Rpc) -> Result<ProgressiveCall> {
        let mut options = rpc.options.call_options();
        options.insert("receive_progress".to_owned(), Variant::Bool(true));
        let (tx, rx) = unbounded_channel();
        let chit = self
            .send_call(rpc, options, CallSink::Progressive(tx))
            .await?;
        Ok(ProgressiveCall::new(
            chit,
            rx,
            self.shared.commands.downgrade(),
        ))
    }

    /// Opens a streaming call.
    pub async fn request_stream(&self, request: StreamRequest) -> Result<CallerChannel> {
        let options = request.call_options();
        let (tx, rx) = unbounded_channel();
        let chit = self
            .send_call(request.rpc, options, CallSink::Progressive(tx))
            .await?;
        Ok(CallerChannel::new(
            chit,
            request.mode,
            rx,
            self.shared.commands.downgrade(),
        ))
    }

    async fn send_call(
        &self,
        rpc: Rpc,
        options: Object,
        sink: CallSink,
    ) -> Result<CallChit> {
        validate_uri(&rpc.procedure).map_err(invalid_uri)?;
        let call = OutgoingCall {
            procedure: rpc.procedure,
            options,
            args: rpc.args,
            kwargs: rpc.kwargs,
            caller_timeout: rpc.options.caller_timeout,
            cancel_mode: rpc.options.cancel_mode,
        };
        self.ask(|reply| Command::Call { call, sink, reply })
            .await
    }

    /// Cancels an ongoing call.
    pub fn cancel_call(&self, chit: CallChit, mode: CallCancelMode) -> Result<()> {
        self.post(Command::CancelCall {
            request_id: chit.request_id,
            mode,
        })
    }

    /// Answers an invocation whose handler deferred its outcome.
    pub fn yield_outcome<O>(&self, request_id: Id, outcome: O) -> Result<()>
    where
        O: Into<Outcome>,
    {
        self.post(Command::Respond {
            request_id,
            outcome: Ok(outcome.into()),
        })
    }
}
