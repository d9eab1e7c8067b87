use std::time::Duration;

use anyhow::{
    Error,
    Result,
};
use futures_util::{
    Stream,
    StreamExt,
};
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{
            UnboundedReceiver,
            WeakUnboundedSender,
        },
        oneshot,
    },
};
use wamp_peer_values::{
    Array,
    ConversionError,
    FromArgs,
    Object,
    Variant,
};

use crate::{
    core::{
        cancel::CallCancelMode,
        error::{
            MiscError,
            WampError,
        },
        id::Id,
        invocation_policy::InvocationPolicy,
        match_policy::MatchPolicy,
    },
    message::message::Message,
    peer::client::Command,
};

/// A procedure to register.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Procedure {
    pub uri: String,
    /// How the procedure is matched against calls.
    pub match_policy: MatchPolicy,
    /// How the router selects a callee when several share the procedure.
    pub invocation_policy: InvocationPolicy,
    /// The caller's identity should be disclosed to the callee.
    pub disclose_caller: bool,
    /// Additional REGISTER options.
    pub options: Object,
}

impl Procedure {
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

    pub fn with_invocation_policy(mut self, invocation_policy: InvocationPolicy) -> Self {
        self.invocation_policy = invocation_policy;
        self
    }

    pub fn with_disclose_caller(mut self, disclose_caller: bool) -> Self {
        self.disclose_caller = disclose_caller;
        self
    }

    pub(crate) fn register_options(&self) -> Object {
        let mut options = self.options.clone();
        if let Some(policy) = self.match_policy.option_value() {
            options.insert("match".to_owned(), Variant::from(policy));
        }
        if let Some(policy) = self.invocation_policy.option_value() {
            options.insert("invoke".to_owned(), Variant::from(policy));
        }
        if self.disclose_caller {
            options.insert("disclose_caller".to_owned(), Variant::Bool(true));
        }
        options
    }
}

/// Options for calling a procedure.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcOptions {
    /// The caller's identity should be disclosed to the callee.
    pub disclose_me: bool,
    /// Timeout enforced by the router, sent as the `timeout` option.
    pub dealer_timeout: Option<Duration>,
    /// Timeout enforced locally. When it elapses, the call is canceled in
    /// [`CallCancelMode::KillNoWait`] mode.
    ///
    /// If unset, the session's fallback timeout applies.
    pub caller_timeout: Option<Duration>,
    /// The mode used when the call is canceled by dropping it.
    pub cancel_mode: CallCancelMode,
    /// Additional CALL options.
    pub extra: Object,
}

impl RpcOptions {
    pub(crate) fn call_options(&self) -> Object {
        let mut options = self.extra.clone();
        if self.disclose_me {
            options.insert("disclose_me".to_owned(), Variant::Bool(true));
        }
        if let Some(timeout) = self.dealer_timeout {
            options.insert(
                "timeout".to_owned(),
                Variant::UInt(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)),
            );
        }
        options
    }
}

/// A procedure call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Rpc {
    pub procedure: String,
    pub args: Array,
    pub kwargs: Object,
    pub options: RpcOptions,
}

impl Rpc {
    pub fn new<S>(procedure: S) -> Self
    where
        S: Into<String>,
    {
        Self {
            procedure: procedure.into(),
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

    pub fn with_caller_timeout(mut self, timeout: Duration) -> Self {
        self.options.caller_timeout = Some(timeout);
        self
    }

    pub fn with_dealer_timeout(mut self, timeout: Duration) -> Self {
        self.options.dealer_timeout = Some(timeout);
        self
    }

    pub fn with_cancel_mode(mut self, cancel_mode: CallCancelMode) -> Self {
        self.options.cancel_mode = cancel_mode;
        self
    }

    pub fn with_disclose_me(mut self, disclose_me: bool) -> Self {
        self.options.disclose_me = disclose_me;
        self
    }

    pub fn with_option<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<Variant>,
    {
        self.options.extra.insert(key.into(), value.into());
        self
    }
}

/// A result of a procedure call, or a result produced by a callee.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct RpcResult {
    pub args: Array,
    pub kwargs: Object,
    /// RESULT details, or YIELD options.
    pub details: Object,
    /// More results follow this one.
    pub progress: bool,
}

impl RpcResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_args(mut self, args: Array) -> Self {
        self.args = args;
        self
    }

    pub fn with_kwargs(mut self, kwargs: Object) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Marks the result as progressive, so that more results may follow.
    pub fn progressive(mut self) -> Self {
        self.progress = true;
        self
    }

    /// Converts the positional arguments into a tuple.
    pub fn args_as<T>(&self) -> Result<T, ConversionError>
    where
        T: FromArgs,
    {
        T::from_args(self.args.clone())
    }

    pub(crate) fn from_message(message: Message) -> Self {
        let progress = message.is_progress();
        let payload = message.into_payload();
        Self {
            args: payload.args,
            kwargs: payload.kwargs,
            details: payload.options,
            progress,
        }
    }

    pub(crate) fn into_yield(self, request_id: Id) -> Message {
        let mut options = self.details;
        if self.progress {
            options.insert("progress".to_owned(), Variant::Bool(true));
        }
        Message::yield_result(request_id, options).with_payload(self.args, self.kwargs)
    }
}

/// Identifies an in-flight call for cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallChit {
    pub request_id: Id,
    /// The mode used when the call is canceled implicitly.
    pub cancel_mode: CallCancelMode,
}

fn cancel_call(commands: &WeakUnboundedSender<Command>, request_id: Id, mode: CallCancelMode) {
    if let Some(commands) = commands.upgrade() {
        commands.send(Command::CancelCall { request_id, mode }).ok();
    }
}

/// A call that is expected to produce a single result.
///
/// Dropping the call before its result is read cancels it with the RPC's cancel mode.
#[derive(Debug)]
pub struct PendingCall {
    chit: CallChit,
    result_rx: oneshot::Receiver<Result<RpcResult>>,
    commands: WeakUnboundedSender<Command>,
    done: bool,
}

impl PendingCall {
    pub(crate) fn new(
        chit: CallChit,
        result_rx: oneshot::Receiver<Result<RpcResult>>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            chit,
            result_rx,
            commands,
            done: false,
        }
    }

    pub fn chit(&self) -> CallChit {
        self.chit
    }

    /// Waits for the result of the call.
    pub async fn result(mut self) -> Result<RpcResult> {
        let result = (&mut self.result_rx).await;
        self.done = true;
        match result {
            Ok(result) => result,
            Err(_) => Err(MiscError::Abandoned.into()),
        }
    }

    /// Cancels the call.
    ///
    /// In [`CallCancelMode::Kill`] mode, the final result or error can still be read from
    /// [`Self::result`].
    pub fn cancel(&self, mode: CallCancelMode) {
        cancel_call(&self.commands, self.chit.request_id, mode);
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        if !self.done {
            cancel_call(&self.commands, self.chit.request_id, self.chit.cancel_mode);
        }
    }
}

/// A call that is expected to produce one or more results.
#[derive(Debug)]
pub struct ProgressiveCall {
    chit: CallChit,
    result_rx: UnboundedReceiver<Result<RpcResult>>,
    commands: WeakUnboundedSender<Command>,
    done: bool,
}

impl ProgressiveCall {
    pub(crate) fn new(
        chit: CallChit,
        result_rx: UnboundedReceiver<Result<RpcResult>>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            chit,
            result_rx,
            commands,
            done: false,
        }
    }

    pub fn chit(&self) -> CallChit {
        self.chit
    }

    /// Checks if the call has received all of its results.
    pub fn done(&self) -> bool {
        self.done
    }

    /// Waits for the next result of the call.
    ///
    /// Returns [`None`] after the final result was read.
    pub async fn next_result(&mut self) -> Result<Option<RpcResult>> {
        if self.done {
            return Ok(None);
        }
        match self.result_rx.recv().await {
            Some(Ok(result)) => {
                self.done = !result.progress;
                Ok(Some(result))
            }
            Some(Err(err)) => {
                self.done = true;
                Err(err)
            }
            None => {
                self.done = true;
                Err(MiscError::Abandoned.into())
            }
        }
    }

    /// Cancels the call.
    pub fn cancel(&self, mode: CallCancelMode) {
        cancel_call(&self.commands, self.chit.request_id, mode);
    }

    /// Wraps the call as a stream of results.
    ///
    /// The stream is finished after the last result or error.
    pub fn into_stream(self) -> impl Stream<Item = Result<RpcResult>> + Send {
        futures_util::stream::unfold(self, move |mut call| async {
            match call.next_result().await {
                Ok(Some(result)) => Some((Ok(result), call)),
                Ok(None) => None,
                Err(err) => Some((Err(err), call)),
            }
        })
        .boxed()
    }
}

impl Drop for ProgressiveCall {
    fn drop(&mut self) {
        if !self.done {
            cancel_call(&self.commands, self.chit.request_id, self.chit.cancel_mode);
        }
    }
}

/// What a callee answers an invocation with.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// A result. If progressive, the invocation stays open for more results.
    Result(RpcResult),
    /// An error, which ends the invocation.
    Error(WampError),
    /// Nothing is sent now. The callee answers later through [`Invocation::respond`] or
    /// [`Session::yield_outcome`][`crate::peer::session::Session::yield_outcome`].
    Deferred,
}

impl From<RpcResult> for Outcome {
    fn from(value: RpcResult) -> Self {
        Self::Result(value)
    }
}

impl From<WampError> for Outcome {
    fn from(value: WampError) -> Self {
        Self::Error(value)
    }
}

fn respond(commands: &WeakUnboundedSender<Command>, request_id: Id, outcome: Result<Outcome>) {
    if let Some(commands) = commands.upgrade() {
        commands.send(Command::Respond { request_id, outcome }).ok();
    }
}

/// An invocation of a registered procedure.
#[derive(Debug)]
pub struct Invocation {
    pub request_id: Id,
    pub registration_id: Id,
    pub details: Object,
    pub args: Array,
    pub kwargs: Object,
    executor: Handle,
    commands: WeakUnboundedSender<Command>,
}

impl Invocation {
    pub(crate) fn new(
        message: Message,
        executor: Handle,
        commands: WeakUnboundedSender<Command>,
    ) -> Option<Self> {
        let request_id = message.request_id()?;
        let registration_id = message.id_at(2)?;
        let payload = message.into_payload();
        Some(Self {
            request_id,
            registration_id,
            details: payload.options,
            args: payload.args,
            kwargs: payload.kwargs,
            executor,
            commands,
        })
    }

    /// The caller's session ID, if disclosed.
    pub fn caller(&self) -> Option<Id> {
        self.details
            .get("caller")
            .and_then(|id| Id::try_from(id).ok())
    }

    /// The concrete procedure called, sent by the router for pattern-based registrations.
    pub fn procedure(&self) -> Option<&str> {
        self.details.get("procedure").and_then(Variant::as_str)
    }

    /// Checks if the caller accepts progressive results.
    pub fn receives_progress(&self) -> bool {
        self.details
            .get("receive_progress")
            .and_then(Variant::as_bool)
            .unwrap_or(false)
    }

    /// The timeout requested by the caller.
    pub fn timeout(&self) -> Option<Duration> {
        self.details
            .get("timeout")
            .and_then(Variant::as_u64)
            .filter(|timeout| *timeout > 0)
            .map(Duration::from_millis)
    }

    /// The executor the invocation's handler runs on.
    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    /// Converts the positional arguments into a tuple.
    pub fn args_as<T>(&self) -> Result<T, ConversionError>
    where
        T: FromArgs,
    {
        T::from_args(self.args.clone())
    }

    /// Answers the invocation outside of its handler.
    ///
    /// Does nothing if the session is gone.
    pub fn respond<O>(&self, outcome: O)
    where
        O: Into<Outcome>,
    {
        respond(&self.commands, self.request_id, Ok(outcome.into()));
    }

    /// Sends a progressive result, keeping the invocation open.
    pub fn yield_progress(&self, result: RpcResult) {
        self.respond(result.progressive());
    }

    /// A handle for answering the invocation after the handler returns [`Outcome::Deferred`].
    pub fn responder(&self) -> Responder {
        Responder {
            request_id: self.request_id,
            commands: self.commands.clone(),
        }
    }
}

/// Answers an invocation from anywhere.
#[derive(Debug, Clone)]
pub struct Responder {
    request_id: Id,
    commands: WeakUnboundedSender<Command>,
}

impl Responder {
    pub fn request_id(&self) -> Id {
        self.request_id
    }

    /// Answers the invocation. Does nothing if the session is gone.
    pub fn respond<O>(&self, outcome: O)
    where
        O: Into<Outcome>,
    {
        respond(&self.commands, self.request_id, Ok(outcome.into()));
    }

    /// Answers the invocation with an application error.
    pub fn fail(&self, error: Error) {
        respond(&self.commands, self.request_id, Err(error));
    }
}

/// A request from the caller to stop an ongoing invocation.
#[derive(Debug)]
pub struct Interruption {
    pub request_id: Id,
    pub mode: CallCancelMode,
    pub options: Object,
    commands: WeakUnboundedSender<Command>,
}

impl Interruption {
    pub(crate) fn new(message: Message, commands: WeakUnboundedSender<Command>) -> Option<Self> {
        let request_id = message.request_id()?;
        let mode = message
            .option("mode")
            .and_then(Variant::as_str)
            .and_then(|mode| CallCancelMode::try_from(mode).ok())
            .unwrap_or_default();
        Some(Self {
            request_id,
            mode,
            options: message.into_payload().options,
            commands,
        })
    }

    /// A handle for answering the interrupted invocation.
    pub fn responder(&self) -> Responder {
        Responder {
            request_id: self.request_id,
            commands: self.commands.clone(),
        }
    }
}

/// A handle to a registered procedure.
#[derive(Debug)]
pub struct Registration {
    id: Id,
    procedure: String,
    commands: WeakUnboundedSender<Command>,
}

impl Registration {
    pub(crate) fn new(id: Id, procedure: String, commands: WeakUnboundedSender<Command>) -> Self {
        Self {
            id,
            procedure,
            commands,
        }
    }

    /// The registration ID assigned by the router.
    pub fn id(&self) -> Id {
        self.id
    }

    pub fn procedure(&self) -> &str {
        &self.procedure
    }

    /// Converts the handle into one that unregisters when dropped.
    pub fn scoped(self) -> ScopedRegistration {
        ScopedRegistration {
            registration: Some(self),
        }
    }
}

/// A registration handle that unregisters when dropped.
///
/// Unregistering on drop is best effort: the result is not reported.
#[derive(Debug)]
pub struct ScopedRegistration {
    registration: Option<Registration>,
}

impl ScopedRegistration {
    pub fn registration(&self) -> Option<&Registration> {
        self.registration.as_ref()
    }

    /// Releases the handle without unregistering.
    pub fn release(mut self) -> Option<Registration> {
        self.registration.take()
    }
}

impl Drop for ScopedRegistration {
    fn drop(&mut self) {
        let Some(registration) = self.registration.take() else {
            return;
        };
        if let Some(commands) = registration.commands.upgrade() {
            commands
                .send(Command::Unregister {
                    registration_id: registration.id,
                    reply: None,
                })
                .ok();
        }
    }
}

#[cfg(test)]
mod rpc_test {
    use std::time::Duration;

    use pretty_assertions::assert_eq;
    use wamp_peer_values::{
        Object,
        Variant,
    };

    use crate::{
        core::{
            id::Id,
            invocation_policy::InvocationPolicy,
            match_policy::MatchPolicy,
        },
        peer::rpc::{
            Procedure,
            Rpc,
            RpcResult,
        },
    };

    #[test]
    fn call_options_encode_dealer_timeout_in_milliseconds() {
        let rpc = Rpc::new("p")
            .with_dealer_timeout(Duration::from_secs(2))
            .with_caller_timeout(Duration::from_secs(1))
            .with_disclose_me(true);
        assert_eq!(
            rpc.options.call_options(),
            Object::from_iter([
                ("disclose_me".to_owned(), Variant::Bool(true)),
                ("timeout".to_owned(), Variant::UInt(2000)),
            ])
        );
    }

    #[test]
    fn oversized_dealer_timeout_saturates() {
        let rpc = Rpc::new("p").with_dealer_timeout(Duration::MAX);
        assert_eq!(
            rpc.options.call_options().get("timeout"),
            Some(&Variant::UInt(u64::MAX))
        );
    }

    #[test]
    fn register_options_skip_defaults() {
        assert_eq!(Procedure::new("p").register_options(), Object::new());
        assert_eq!(
            Procedure::new("p")
                .with_match_policy(MatchPolicy::Wildcard)
                .with_invocation_policy(InvocationPolicy::RoundRobin)
                .register_options(),
            Object::from_iter([
                ("match".to_owned(), Variant::from("wildcard")),
                ("invoke".to_owned(), Variant::from("roundrobin")),
            ])
        );
    }

    #[test]
    fn progressive_yield_sets_progress_option() {
        let message = RpcResult::new()
            .with_args(vec![Variant::from(1)])
            .progressive()
            .into_yield(Id::try_from(3).unwrap());
        assert_eq!(
            message.into_variant(),
            Variant::Array(vec![
                Variant::UInt(70),
                Variant::UInt(3),
                Variant::Object(Object::from_iter([(
                    "progress".to_owned(),
                    Variant::Bool(true)
                )])),
                Variant::Array(vec![Variant::Int(1)]),
            ])
        );
    }
}
