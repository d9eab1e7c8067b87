use anyhow::{
    Error,
    Result,
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
    },
    message::message::Message,
    peer::{
        client::Command,
        rpc::{
            CallChit,
            Outcome,
            Rpc,
            RpcResult,
        },
    },
};

/// The direction in which chunks flow in a streaming call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum StreamMode {
    /// The caller sends one request, and the callee answers with progressive results.
    #[default]
    CalleeToCaller,
    /// The caller sends progressive chunks, and the callee answers with one result.
    CallerToCallee,
    /// Both sides send progressive chunks.
    Bidirectional,
}

impl StreamMode {
    /// Checks if the caller sends more chunks after the initial CALL.
    pub fn caller_streams(&self) -> bool {
        !matches!(self, Self::CalleeToCaller)
    }

    /// Checks if the callee may answer with progressive results.
    pub fn callee_streams(&self) -> bool {
        !matches!(self, Self::CallerToCallee)
    }
}

/// A request to open a streaming call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StreamRequest {
    /// The procedure and the initial chunk.
    pub rpc: Rpc,
    pub mode: StreamMode,
}

impl StreamRequest {
    pub fn new(rpc: Rpc, mode: StreamMode) -> Self {
        Self { rpc, mode }
    }

    pub(crate) fn call_options(&self) -> Object {
        let mut options = self.rpc.options.call_options();
        if self.mode.callee_streams() {
            options.insert("receive_progress".to_owned(), Variant::Bool(true));
        }
        if self.mode.caller_streams() {
            options.insert("progress".to_owned(), Variant::Bool(true));
        }
        options
    }
}

/// A chunk sent by the caller of a streaming call.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct CallerChunk {
    pub args: Array,
    pub kwargs: Object,
    /// No chunks follow this one.
    pub is_final: bool,
}

impl CallerChunk {
    pub fn new(args: Array) -> Self {
        Self {
            args,
            ..Default::default()
        }
    }

    pub fn with_kwargs(mut self, kwargs: Object) -> Self {
        self.kwargs = kwargs;
        self
    }

    /// Marks the chunk as the last one sent by the caller.
    pub fn finished(mut self) -> Self {
        self.is_final = true;
        self
    }

    pub(crate) fn into_call(self, request_id: Id, procedure: &str) -> Message {
        let mut options = Object::new();
        if !self.is_final {
            options.insert("progress".to_owned(), Variant::Bool(true));
        }
        let mut message =
            Message::call(options, procedure.to_owned()).with_payload(self.args, self.kwargs);
        message.set_request_id(request_id);
        message
    }

    pub(crate) fn from_invocation(message: Message) -> Self {
        let is_final = !message.is_progress();
        let payload = message.into_payload();
        Self {
            args: payload.args,
            kwargs: payload.kwargs,
            is_final,
        }
    }
}

/// The caller's side of a streaming call.
///
/// Dropping the channel before the call finishes cancels it with the RPC's cancel mode.
#[derive(Debug)]
pub struct CallerChannel {
    chit: CallChit,
    mode: StreamMode,
    result_rx: UnboundedReceiver<Result<RpcResult>>,
    commands: WeakUnboundedSender<Command>,
    done: bool,
    finished_sending: bool,
}

impl CallerChannel {
    pub(crate) fn new(
        chit: CallChit,
        mode: StreamMode,
        result_rx: UnboundedReceiver<Result<RpcResult>>,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            chit,
            mode,
            result_rx,
            commands,
            done: false,
            finished_sending: !mode.caller_streams(),
        }
    }

    pub fn chit(&self) -> CallChit {
        self.chit
    }

    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Sends a chunk to the callee.
    pub async fn send_chunk(&mut self, chunk: CallerChunk) -> Result<()> {
        if self.finished_sending || self.done {
            return Err(Error::new(MiscError::InvalidState)
                .context("the caller already finished sending chunks"));
        }
        let commands = self.commands.upgrade().ok_or(MiscError::SessionEnded)?;
        let is_final = chunk.is_final;
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(Command::SendCallChunk {
                request_id: self.chit.request_id,
                chunk,
                reply: reply_tx,
            })
            .map_err(|_| MiscError::SessionEnded)?;
        reply_rx.await.map_err(|_| MiscError::Abandoned)??;
        self.finished_sending = is_final;
        Ok(())
    }

    /// Waits for the next chunk sent by the callee.
    ///
    /// Returns [`None`] after the final chunk was read.
    pub async fn next_chunk(&mut self) -> Result<Option<RpcResult>> {
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
        if let Some(commands) = self.commands.upgrade() {
            commands
                .send(Command::CancelCall {
                    request_id: self.chit.request_id,
                    mode,
                })
                .ok();
        }
    }
}

impl Drop for CallerChannel {
    fn drop(&mut self) {
        if !self.done {
            self.cancel(self.chit.cancel_mode);
        }
    }
}

/// The callee's side of a streaming call.
#[derive(Debug)]
pub struct CalleeChannel {
    pub request_id: Id,
    pub registration_id: Id,
    /// Details of the invocation that opened the stream.
    pub details: Object,
    /// The first chunk sent by the caller.
    pub invitation: CallerChunk,
    chunk_rx: UnboundedReceiver<CallerChunk>,
    executor: Handle,
    commands: WeakUnboundedSender<Command>,
}

impl CalleeChannel {
    pub(crate) fn new(
        request_id: Id,
        registration_id: Id,
        details: Object,
        invitation: CallerChunk,
        chunk_rx: UnboundedReceiver<CallerChunk>,
        executor: Handle,
        commands: WeakUnboundedSender<Command>,
    ) -> Self {
        Self {
            request_id,
            registration_id,
            details,
            invitation,
            chunk_rx,
            executor,
            commands,
        }
    }

    /// Checks if the caller accepts progressive results.
    pub fn receives_progress(&self) -> bool {
        self.details
            .get("receive_progress")
            .and_then(Variant::as_bool)
            .unwrap_or(false)
    }

    pub fn executor(&self) -> &Handle {
        &self.executor
    }

    /// Waits for the next chunk sent by the caller.
    ///
    /// Returns [`None`] once the caller has sent its final chunk or the invocation was
    /// interrupted.
    pub async fn next_chunk(&mut self) -> Option<CallerChunk> {
        self.chunk_rx.recv().await
    }

    /// Sends a chunk to the caller. A non-progressive result ends the stream.
    pub fn send(&self, result: RpcResult) -> Result<()> {
        self.post(Ok(Outcome::Result(result)))
    }

    /// Ends the stream with an error.
    pub fn fail(&self, error: WampError) -> Result<()> {
        self.post(Ok(Outcome::Error(error)))
    }

    fn post(&self, outcome: Result<Outcome>) -> Result<()> {
        let commands = self.commands.upgrade().ok_or(MiscError::SessionEnded)?;
        commands
            .send(Command::Respond {
                request_id: self.request_id,
                outcome,
            })
            .map_err(|_| MiscError::SessionEnded)?;
        Ok(())
    }
}
