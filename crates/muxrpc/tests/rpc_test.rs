//! End-to-end tests between two engines over an in-memory transport.

use futures::StreamExt;
use futures::future::join_all;
use parking_lot::Mutex;
use proven_muxrpc::*;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
struct TestHandler {
    seen: Arc<Mutex<Vec<String>>>,
    parked: Arc<Mutex<Vec<Responder>>>,
}

impl CallHandler for TestHandler {
    fn handle_async(&self, request: CallRequest, responder: Responder) {
        self.seen.lock().push(request.name.clone());
        let who = request
            .args
            .first()
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        match request.name.as_str() {
            "Echo" => responder.reply(Ok(Body::from(format!("hi {who}!")))),
            "EchoJson" => responder.reply(Ok(Body::Json(json!({"text": format!("hi {who}!")})))),
            "EchoBinary" => responder.reply_with_encoding(
                Encoding::Binary,
                Ok(Body::Binary(Bytes::from(format!("hi {who}!")))),
            ),
            "Broken" => responder.reply(Err(RemoteError::new("broken"))),
            "Later" => {
                tokio::spawn(async move {
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    responder.reply(Ok(Body::from(format!("later {who}"))));
                });
            }
            "Forget" => drop(responder),
            "Never" => self.parked.lock().push(responder),
            other => responder.reply(Err(RemoteError::new(format!("unknown method {other}")))),
        }
    }

    fn handle_source(&self, request: CallRequest) -> std::result::Result<Source, RemoteError> {
        self.seen.lock().push(request.name.clone());

        match request.name.as_str() {
            "Count" => {
                let n = request.args.first().and_then(Value::as_i64).unwrap_or(0);
                Ok(Source::iter(Encoding::Json, (1..=n).map(|i| json!(i))))
            }
            "Fail" => Ok(Source::new(
                Encoding::Json,
                futures::stream::iter(vec![
                    Ok(Body::Json(json!(1))),
                    Err(RemoteError::new("source broke")),
                ]),
            )),
            "Endless" => Ok(Source::values(
                Encoding::Json,
                futures::stream::repeat(json!(true)),
            )),
            "Refuse" => Err(RemoteError::new("refused")),
            other => Err(RemoteError::new(format!("unknown source {other}"))),
        }
    }
}

/// Two connected engines, each serving with its own handler.
fn connected_pair(
    config: MuxRpcConfig,
    left: Option<TestHandler>,
    right: Option<TestHandler>,
) -> (MuxRpc, MuxRpc) {
    let _ = tracing_subscriber::fmt::try_init();

    let (left_io, right_io) = tokio::io::duplex(64 * 1024);
    let (left_rpc, left_endpoint) = MuxRpc::new(config.clone());
    let (right_rpc, right_endpoint) = MuxRpc::new(config);

    if let Some(handler) = left {
        left_rpc.on_request(handler);
    }
    if let Some(handler) = right {
        right_rpc.on_request(handler);
    }

    left_endpoint.spawn(left_io);
    right_endpoint.spawn(right_io);
    (left_rpc, right_rpc)
}

fn remote_message(result: Result<Body>) -> String {
    match result {
        Err(Error::Remote(err)) => err.message().to_string(),
        other => panic!("expected remote error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_async_echo() {
    let handler = TestHandler::default();
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(handler.clone()));

    let reply = client.request_async("Echo", ["world"]).await.unwrap();

    assert_eq!(reply, Body::Utf8("hi world!".to_string()));
    assert_eq!(handler.seen.lock().as_slice(), ["Echo"]);
    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_reply_encodings() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let json_reply = client.request_async("EchoJson", ["world"]).await.unwrap();
    assert_eq!(json_reply, Body::Json(json!({"text": "hi world!"})));

    let binary_reply = client.request_async("EchoBinary", ["world"]).await.unwrap();
    assert_eq!(
        binary_reply,
        Body::Binary(Bytes::from_static(b"hi world!"))
    );
}

#[tokio::test]
async fn test_error_reply() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let result = client.request_async("Broken", Vec::<String>::new()).await;
    assert_eq!(remote_message(result), "broken");

    let result = client.request_async("Missing", Vec::<String>::new()).await;
    assert_eq!(remote_message(result), "unknown method Missing");
}

#[tokio::test]
async fn test_dropped_responder_sends_error() {
    let handler = TestHandler::default();
    let (client, server) = connected_pair(MuxRpcConfig::default(), None, Some(handler));

    let result = client.request_async("Forget", Vec::<String>::new()).await;

    assert_eq!(remote_message(result), "call dropped without a reply");
    assert_eq!(server.active_incoming(), 0);
}

#[tokio::test]
async fn test_no_handler_rejects_calls() {
    let (client, _server) = connected_pair(MuxRpcConfig::default(), None, None);

    let result = client.request_async("Echo", ["world"]).await;
    assert_eq!(remote_message(result), "no call handler registered");

    let items: Vec<_> = client
        .request_source("Count", [3])
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        remote_message(items.into_iter().next().unwrap()),
        "no call handler registered"
    );
}

#[tokio::test]
async fn test_source_streams_values_in_order() {
    let (client, server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let values: Vec<Body> = client
        .request_source("Count", [3])
        .unwrap()
        .map(|item| item.unwrap())
        .collect()
        .await;

    assert_eq!(
        values,
        vec![
            Body::Json(json!(1)),
            Body::Json(json!(2)),
            Body::Json(json!(3)),
        ]
    );
    assert_eq!(client.outstanding_calls(), 0);

    // The serving side forgets the call once its terminal frame is out.
    tokio::time::timeout(Duration::from_secs(1), async {
        while server.active_incoming() > 0 {
            tokio::task::yield_now().await;
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_empty_source_ends_immediately() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let items: Vec<_> = client
        .request_source("Count", [0])
        .unwrap()
        .collect()
        .await;
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_source_error_end() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let mut items = client
        .request_source("Fail", Vec::<String>::new())
        .unwrap()
        .collect::<Vec<_>>()
        .await
        .into_iter();

    assert_eq!(items.next().unwrap().unwrap(), Body::Json(json!(1)));
    assert_eq!(remote_message(items.next().unwrap()), "source broke");
    assert!(items.next().is_none());

    let items: Vec<_> = client
        .request_source("Refuse", Vec::<String>::new())
        .unwrap()
        .collect()
        .await;
    assert_eq!(items.len(), 1);
    assert_eq!(remote_message(items.into_iter().next().unwrap()), "refused");
}

#[tokio::test]
async fn test_both_peers_call_each_other() {
    let (left, right) = connected_pair(
        MuxRpcConfig::default(),
        Some(TestHandler::default()),
        Some(TestHandler::default()),
    );

    let (from_right, from_left) = tokio::join!(
        left.request_async("Echo", ["left"]),
        right.request_async("Echo", ["right"]),
    );

    assert_eq!(from_right.unwrap(), Body::from("hi left!"));
    assert_eq!(from_left.unwrap(), Body::from("hi right!"));
}

#[tokio::test]
async fn test_concurrent_calls_resolve_independently() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let slow = client.request_async("Later", ["slow"]);
    let fast = async {
        join_all((0..50).map(|n| {
            let client = client.clone();
            async move { client.request_async("Echo", [n.to_string()]).await }
        }))
        .await
    };

    let (slow, fast) = tokio::join!(slow, fast);

    assert_eq!(slow.unwrap(), Body::from("later slow"));
    for (n, reply) in fast.into_iter().enumerate() {
        assert_eq!(reply.unwrap(), Body::from(format!("hi {n}!")));
    }
    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_streams_interleave_with_async_calls() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let counting = client
        .request_source("Count", [200])
        .unwrap()
        .map(|item| item.unwrap())
        .collect::<Vec<_>>();
    let echo = client.request_async("Echo", ["world"]);

    let (values, reply) = tokio::join!(counting, echo);

    assert_eq!(values.len(), 200);
    assert_eq!(values.last(), Some(&Body::Json(json!(200))));
    assert_eq!(reply.unwrap(), Body::from("hi world!"));
}

#[tokio::test]
async fn test_request_timeout() {
    let config = MuxRpcConfig::builder()
        .request_timeout(Duration::from_millis(50))
        .build();
    let (client, _server) = connected_pair(config, None, Some(TestHandler::default()));

    let result = client.request_async("Never", Vec::<String>::new()).await;

    assert!(matches!(result, Err(Error::Timeout(_))));
    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_cancelled_calls_are_forgotten() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    for _ in 0..100 {
        let call = client.request_async("Never", Vec::<String>::new());
        assert!(tokio::time::timeout(Duration::from_millis(1), call).await.is_err());
    }

    assert_eq!(client.outstanding_calls(), 0);
}

#[tokio::test]
async fn test_source_cut_off_by_peer_ends_with_error() {
    let config = MuxRpcConfig::builder().source_buffer(2).build();
    let (client, server) = connected_pair(config, None, Some(TestHandler::default()));

    let values = client
        .request_source("Endless", Vec::<String>::new())
        .unwrap();
    // Nothing is consumed while the buffers fill up.
    tokio::time::sleep(Duration::from_millis(200)).await;
    server.shutdown();

    let items = tokio::time::timeout(Duration::from_secs(5), values.collect::<Vec<_>>())
        .await
        .unwrap();

    let (last, delivered) = items.split_last().unwrap();
    assert!(matches!(last, Err(Error::ConnectionClosed)));
    let expected = Body::Json(json!(true));
    assert!(
        delivered
            .iter()
            .all(|item| matches!(item, Ok(body) if *body == expected))
    );
}

#[tokio::test]
async fn test_shutdown_fails_pending_calls() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    let pending = tokio::spawn({
        let client = client.clone();
        async move { client.request_async("Never", Vec::<String>::new()).await }
    });
    while client.outstanding_calls() == 0 {
        tokio::task::yield_now().await;
    }

    client.shutdown();

    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionClosed)));
    assert!(matches!(
        client.request_async("Echo", ["world"]).await,
        Err(Error::ConnectionClosed)
    ));
}

#[tokio::test]
async fn test_invalid_request_is_rejected_locally() {
    let (client, _server) =
        connected_pair(MuxRpcConfig::default(), None, Some(TestHandler::default()));

    assert!(matches!(
        client.request_async("", ["world"]).await,
        Err(Error::InvalidRequest(_))
    ));
    assert!(matches!(
        client.request_source("Count", 3),
        Err(Error::InvalidRequest(_))
    ));
    assert_eq!(client.outstanding_calls(), 0);
}
