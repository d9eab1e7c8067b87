mod common;

use anyhow::Error;
use assert_matches::assert_matches;
use common::{
    ScriptedRouter,
    id,
    joined_session,
};
use tokio::sync::mpsc::unbounded_channel;
use wamp_peer::{
    core::error::MiscError,
    message::{
        kind::MessageKind,
        message::Message,
    },
    peer::{
        CalleeChannel,
        CallerChunk,
        Procedure,
        Rpc,
        RpcResult,
        Session,
        StreamMode,
        StreamRequest,
        StreamSlot,
    },
};
use wamp_peer_values::{
    Object,
    Variant,
};

const PROCEDURE: &str = "com.example.upload";

fn progress() -> Object {
    Object::from_iter([("progress".to_owned(), Variant::Bool(true))])
}

async fn enroll_stream_with_reply<S>(session: &Session, router: &mut ScriptedRouter, slot: S)
where
    S: StreamSlot,
{
    let (registration, _) = tokio::join!(
        session.enroll_stream(Procedure::new(PROCEDURE), slot),
        async {
            let register = router.expect(MessageKind::Register).await;
            router
                .send(Message::registered(register.request_id().unwrap(), id(9)))
                .await;
        }
    );
    registration.unwrap();
}

#[tokio::test]
async fn caller_streams_chunks() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("caller").await;
    let request = StreamRequest::new(
        Rpc::new(PROCEDURE).with_args(vec![Variant::from("first")]),
        StreamMode::CallerToCallee,
    );
    let (channel, call) = tokio::join!(
        session.request_stream(request),
        router.expect(MessageKind::Call)
    );
    let mut channel = channel.unwrap();
    let request_id = call.request_id().unwrap();
    assert_eq!(channel.chit().request_id, request_id);
    assert_eq!(channel.mode(), StreamMode::CallerToCallee);
    assert!(call.is_progress());
    assert_eq!(call.option("receive_progress"), None);
    assert_eq!(call.args(), &vec![Variant::from("first")]);

    channel
        .send_chunk(CallerChunk::new(vec![Variant::from("second")]))
        .await
        .unwrap();
    let chunk = router.expect(MessageKind::Call).await;
    assert_eq!(chunk.request_id(), Some(request_id));
    assert_eq!(chunk.uri(), Some(PROCEDURE));
    assert!(chunk.is_progress());
    assert_eq!(chunk.args(), &vec![Variant::from("second")]);

    channel
        .send_chunk(CallerChunk::new(vec![Variant::from("third")]).finished())
        .await
        .unwrap();
    let chunk = router.expect(MessageKind::Call).await;
    assert_eq!(chunk.request_id(), Some(request_id));
    assert!(!chunk.is_progress());

    let err = channel
        .send_chunk(CallerChunk::new(Vec::new()))
        .await
        .unwrap_err();
    assert_matches!(err.downcast_ref::<MiscError>(), Some(MiscError::InvalidState));

    router
        .send(
            Message::result(request_id, Object::new())
                .with_payload(vec![Variant::from(3)], Object::new()),
        )
        .await;
    let result = channel.next_chunk().await.unwrap().unwrap();
    assert_eq!(result.args, vec![Variant::from(3)]);
    assert_matches!(channel.next_chunk().await, Ok(None));
}

#[tokio::test]
async fn callee_streams_chunks() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("caller").await;
    let request = StreamRequest::new(Rpc::new(PROCEDURE), StreamMode::CalleeToCaller);
    let (channel, call) = tokio::join!(
        session.request_stream(request),
        router.expect(MessageKind::Call)
    );
    let mut channel = channel.unwrap();
    assert!(!call.is_progress());
    assert_eq!(
        call.option("receive_progress").and_then(Variant::as_bool),
        Some(true)
    );

    // The caller never streams in this mode.
    let err = channel
        .send_chunk(CallerChunk::new(Vec::new()))
        .await
        .unwrap_err();
    assert_matches!(err.downcast_ref::<MiscError>(), Some(MiscError::InvalidState));

    let request_id = call.request_id().unwrap();
    for n in [1, 2] {
        router
            .send(
                Message::result(request_id, progress())
                    .with_payload(vec![Variant::from(n)], Object::new()),
            )
            .await;
    }
    router
        .send(Message::result(request_id, Object::new()))
        .await;

    for n in [1, 2] {
        let chunk = channel.next_chunk().await.unwrap().unwrap();
        assert!(chunk.progress);
        assert_eq!(chunk.args, vec![Variant::from(n)]);
    }
    assert_matches!(channel.next_chunk().await, Ok(Some(chunk)) => {
        assert!(!chunk.progress);
    });
    assert_matches!(channel.next_chunk().await, Ok(None));
}

#[tokio::test]
async fn dropping_caller_channel_cancels_call() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("caller").await;
    let request = StreamRequest::new(Rpc::new(PROCEDURE), StreamMode::Bidirectional);
    let (channel, call) = tokio::join!(
        session.request_stream(request),
        router.expect(MessageKind::Call)
    );
    drop(channel.unwrap());
    let cancel = router.expect(MessageKind::Cancel).await;
    assert_eq!(cancel.request_id(), call.request_id());
}

#[tokio::test]
async fn callee_receives_caller_chunks() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("callee").await;
    let (tx, mut rx) = unbounded_channel();
    let slot = move |mut channel: CalleeChannel| {
        let tx = tx.clone();
        async move {
            let mut received = channel.invitation.args.clone();
            while let Some(chunk) = channel.next_chunk().await {
                received.extend(chunk.args);
            }
            tx.send(received.clone()).ok();
            channel.send(RpcResult::new().with_args(vec![Variant::from(received.len())]))?;
            Ok::<_, Error>(())
        }
    };
    enroll_stream_with_reply(&session, &mut router, slot).await;

    router
        .send(
            Message::invocation(id(1), id(9), progress())
                .with_payload(vec![Variant::from("a")], Object::new()),
        )
        .await;
    router
        .send(
            Message::invocation(id(1), id(9), progress())
                .with_payload(vec![Variant::from("b")], Object::new()),
        )
        .await;
    router
        .send(
            Message::invocation(id(1), id(9), Object::new())
                .with_payload(vec![Variant::from("c")], Object::new()),
        )
        .await;

    assert_eq!(
        rx.recv().await,
        Some(vec![
            Variant::from("a"),
            Variant::from("b"),
            Variant::from("c")
        ])
    );
    let yielded = router.expect(MessageKind::Yield).await;
    assert_eq!(yielded.request_id(), Some(id(1)));
    assert!(!yielded.is_progress());
    assert_eq!(yielded.args(), &vec![Variant::from(3)]);
}

#[tokio::test]
async fn callee_sends_progressive_chunks() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("callee").await;
    let slot = |channel: CalleeChannel| async move {
        assert!(channel.receives_progress());
        assert!(channel.invitation.is_final);
        for n in [1, 2] {
            channel.send(
                RpcResult::new()
                    .with_args(vec![Variant::from(n)])
                    .progressive(),
            )?;
        }
        channel.send(RpcResult::new())?;
        Ok::<_, Error>(())
    };
    enroll_stream_with_reply(&session, &mut router, slot).await;

    router
        .send(Message::invocation(
            id(1),
            id(9),
            Object::from_iter([("receive_progress".to_owned(), Variant::Bool(true))]),
        ))
        .await;
    for n in [1, 2] {
        let yielded = router.expect(MessageKind::Yield).await;
        assert!(yielded.is_progress());
        assert_eq!(yielded.args(), &vec![Variant::from(n)]);
    }
    let yielded = router.expect(MessageKind::Yield).await;
    assert!(!yielded.is_progress());
}

#[tokio::test]
async fn failing_stream_handler_answers_error() {
    test_utils::setup::setup_test_environment();

    let (session, mut router) = joined_session("callee").await;
    let slot = |_: CalleeChannel| async { Err::<(), _>(Error::msg("disk full")) };
    enroll_stream_with_reply(&session, &mut router, slot).await;

    router
        .send(Message::invocation(id(1), id(9), Object::new()))
        .await;
    let error = router.expect(MessageKind::Error).await;
    assert_eq!(error.request_id(), Some(id(1)));
    assert_eq!(error.uri(), Some("wamp.error.runtime_error"));
}
