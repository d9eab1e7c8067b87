use std::{
    future::Future,
    panic::AssertUnwindSafe,
};

use anyhow::{
    Error,
    Result,
};
use async_trait::async_trait;
use futures_util::FutureExt;
use tokio::runtime::Handle;

use crate::peer::{
    petition::{
        Authentication,
        Challenge,
    },
    pub_sub::Event,
    rpc::{
        Interruption,
        Invocation,
        Outcome,
    },
    streaming::CalleeChannel,
};

/// A handler for events received on a subscription.
///
/// Events for a single slot are delivered one at a time, in the order they were received.
#[async_trait]
pub trait EventSlot: Send + 'static {
    async fn on_event(&mut self, event: Event) -> Result<()>;

    /// The executor the handler should run on.
    ///
    /// If [`None`], the session's user executor is used.
    fn executor(&self) -> Option<Handle> {
        None
    }
}

#[async_trait]
impl<F, Fut> EventSlot for F
where
    F: FnMut(Event) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_event(&mut self, event: Event) -> Result<()> {
        self(event).await
    }
}

/// A handler for invocations of a registered procedure.
///
/// Returning an error that carries a WAMP representation (such as a
/// [`WampError`][`crate::core::error::WampError`] or a
/// [`ConversionError`][`wamp_peer_values::ConversionError`]) answers the caller with that error.
#[async_trait]
pub trait CallSlot: Send + Sync + 'static {
    async fn on_call(&self, invocation: Invocation) -> Result<Outcome>;

    /// The executor the handler should run on.
    fn executor(&self) -> Option<Handle> {
        None
    }
}

#[async_trait]
impl<F, Fut> CallSlot for F
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    async fn on_call(&self, invocation: Invocation) -> Result<Outcome> {
        self(invocation).await
    }
}

/// A handler for interruptions of an ongoing invocation.
#[async_trait]
pub trait InterruptSlot: Send + Sync + 'static {
    async fn on_interrupt(&self, interruption: Interruption) -> Result<Outcome>;

    /// The executor the handler should run on.
    fn executor(&self) -> Option<Handle> {
        None
    }
}

#[async_trait]
impl<F, Fut> InterruptSlot for F
where
    F: Fn(Interruption) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Outcome>> + Send + 'static,
{
    async fn on_interrupt(&self, interruption: Interruption) -> Result<Outcome> {
        self(interruption).await
    }
}

/// A handler for streaming invocations of a registered procedure.
#[async_trait]
pub trait StreamSlot: Send + Sync + 'static {
    async fn on_stream(&self, channel: CalleeChannel) -> Result<()>;

    /// The executor the handler should run on.
    fn executor(&self) -> Option<Handle> {
        None
    }
}

#[async_trait]
impl<F, Fut> StreamSlot for F
where
    F: Fn(CalleeChannel) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    async fn on_stream(&self, channel: CalleeChannel) -> Result<()> {
        self(channel).await
    }
}

/// A handler for authentication challenges received while joining a realm.
#[async_trait]
pub trait ChallengeSlot: Send + Sync + 'static {
    async fn on_challenge(&self, challenge: Challenge) -> Result<Authentication>;

    /// The executor the handler should run on.
    fn executor(&self) -> Option<Handle> {
        None
    }
}

#[async_trait]
impl<F, Fut> ChallengeSlot for F
where
    F: Fn(Challenge) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Authentication>> + Send + 'static,
{
    async fn on_challenge(&self, challenge: Challenge) -> Result<Authentication> {
        self(challenge).await
    }
}

/// A handler bound to a specific executor.
///
/// Created by [`bind_executor`].
pub struct BoundSlot<S> {
    slot: S,
    executor: Handle,
}

/// Binds a handler to an executor, which takes precedence over the session's user executor.
pub fn bind_executor<S>(slot: S, executor: Handle) -> BoundSlot<S> {
    BoundSlot { slot, executor }
}

#[async_trait]
impl<S> EventSlot for BoundSlot<S>
where
    S: EventSlot,
{
    async fn on_event(&mut self, event: Event) -> Result<()> {
        self.slot.on_event(event).await
    }

    fn executor(&self) -> Option<Handle> {
        Some(self.executor.clone())
    }
}

#[async_trait]
impl<S> CallSlot for BoundSlot<S>
where
    S: CallSlot,
{
    async fn on_call(&self, invocation: Invocation) -> Result<Outcome> {
        self.slot.on_call(invocation).await
    }

    fn executor(&self) -> Option<Handle> {
        Some(self.executor.clone())
    }
}

#[async_trait]
impl<S> InterruptSlot for BoundSlot<S>
where
    S: InterruptSlot,
{
    async fn on_interrupt(&self, interruption: Interruption) -> Result<Outcome> {
        self.slot.on_interrupt(interruption).await
    }

    fn executor(&self) -> Option<Handle> {
        Some(self.executor.clone())
    }
}

#[async_trait]
impl<S> StreamSlot for BoundSlot<S>
where
    S: StreamSlot,
{
    async fn on_stream(&self, channel: CalleeChannel) -> Result<()> {
        self.slot.on_stream(channel).await
    }

    fn executor(&self) -> Option<Handle> {
        Some(self.executor.clone())
    }
}

#[async_trait]
impl<S> ChallengeSlot for BoundSlot<S>
where
    S: ChallengeSlot,
{
    async fn on_challenge(&self, challenge: Challenge) -> Result<Authentication> {
        self.slot.on_challenge(challenge).await
    }

    fn executor(&self) -> Option<Handle> {
        Some(self.executor.clone())
    }
}

/// Runs a handler future, turning a panic into an error.
pub(crate) async fn guarded<F, T>(future: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|message| message.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_owned());
            Err(Error::msg(format!("handler panicked: {message}")))
        }
    }
}

#[cfg(test)]
mod handlers_test {
    use anyhow::Error;
    use tokio::runtime::Handle;

    use crate::peer::{
        handlers::{
            EventSlot,
            bind_executor,
            guarded,
        },
        pub_sub::Event,
    };

    #[tokio::test]
    async fn catches_handler_panics() {
        let result = guarded(async {
            if true {
                panic!("boom");
            }
            Ok::<_, Error>(())
        })
        .await;
        assert_eq!(result.unwrap_err().to_string(), "handler panicked: boom");
    }

    #[tokio::test]
    async fn passes_through_handler_errors() {
        let result = guarded(async { Err::<(), _>(Error::msg("failed")) }).await;
        assert_eq!(result.unwrap_err().to_string(), "failed");
    }

    #[tokio::test]
    async fn bound_slot_reports_its_executor() {
        let slot = |_: Event| async { Ok::<_, Error>(()) };
        assert!(EventSlot::executor(&slot).is_none());
        let bound = bind_executor(slot, Handle::current());
        assert!(EventSlot::executor(&bound).is_some());
    }
}
