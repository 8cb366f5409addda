//! End-to-end tests: a kitten worker on TCP called through `RemoteInvoker`.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use catwire::codec::{JSON_CONTENT_TYPE, MSGPACK_CONTENT_TYPE};
use catwire::handler::{GOODBYE, STATIC_PONG};
use catwire::protocol::Status;
use catwire::{Args, CatwireError, Codec, RemoteInvoker, Server};
use common::{eventually, kitten, Kitten, MEOW, TOKEN};
use futures::StreamExt;
use serde_json::json;

async fn start() -> (Server, Arc<Kitten>) {
    let state = Arc::new(Kitten::default());
    let server = kitten(state.clone()).start().await.unwrap();
    (server, state)
}

fn anonymous(server: &Server) -> RemoteInvoker {
    RemoteInvoker::tcp(server.tcp_addr().unwrap())
}

fn authed(server: &Server) -> RemoteInvoker {
    RemoteInvoker::from_url(&server.url().unwrap()).unwrap()
}

async fn stop(server: Server) {
    server.shutdown();
    server.wait_for_shutdown().await;
}

fn remote_status(result: catwire::Result<impl std::fmt::Debug>) -> Status {
    match result {
        Err(CatwireError::Remote { status, .. }) => status,
        other => panic!("expected a remote error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_public_method_without_token() {
    let (server, _) = start().await;

    let meow = anonymous(&server)
        .call_single("meow", Args::new())
        .await
        .unwrap();

    assert_eq!(meow.mime().as_str(), Some("text/plain"));
    assert_eq!(meow.as_text(), Some(MEOW));

    stop(server).await;
}

#[tokio::test]
async fn test_private_method_without_token_is_forbidden() {
    let (server, _) = start().await;

    let result = anonymous(&server).call("purr", Args::new()).await;
    assert_eq!(remote_status(result), Status::Forbidden);

    let result = anonymous(&server)
        .with_token("wrong")
        .call("purr", Args::new())
        .await;
    assert_eq!(remote_status(result), Status::Forbidden);

    stop(server).await;
}

#[tokio::test]
async fn test_purr_streams_count_items() {
    let (server, _) = start().await;

    let mut purrs = authed(&server)
        .call_stream("purr", Args::new().kwarg("count", 3))
        .await
        .unwrap();
    assert_eq!(purrs.content_type(), Some(MSGPACK_CONTENT_TYPE));

    let mut values = Vec::new();
    while let Some(item) = purrs.next().await {
        values.push(item.unwrap().into_value());
    }

    assert_eq!(
        values,
        vec![
            json!({"purr": "purr"}),
            json!({"purr": "purrpurr"}),
            json!({"purr": "purrpurrpurr"}),
        ]
    );
    assert_eq!(purrs.received(), 3);
    assert!(purrs.next().await.is_none());

    stop(server).await;
}

#[tokio::test]
async fn test_json_codec_is_mirrored() {
    let (server, _) = start().await;

    let purrs = authed(&server)
        .with_codec(Codec::Json)
        .call_stream("purr", Args::new().arg(2).arg("mew"))
        .await
        .unwrap();
    assert_eq!(purrs.content_type(), Some(JSON_CONTENT_TYPE));

    let values: Vec<_> = purrs
        .into_stream()
        .map(|item| item.unwrap().into_value())
        .collect()
        .await;
    assert_eq!(values, vec![json!({"purr": "mew"}), json!({"purr": "mewmew"})]);

    stop(server).await;
}

#[tokio::test]
async fn test_unknown_method_is_not_found() {
    let (server, _) = start().await;

    let result = authed(&server).call("bark", Args::new()).await;
    assert_eq!(remote_status(result), Status::NotFound);

    // Names are case-sensitive.
    let result = authed(&server).call("MEOW", Args::new()).await;
    assert_eq!(remote_status(result), Status::NotFound);

    stop(server).await;
}

#[tokio::test]
async fn test_anonymous_callers_cannot_tell_private_from_unknown() {
    let (server, _) = start().await;

    for name in ["bark", "scratch", "help", "MEOW"] {
        let result = anonymous(&server).call(name, Args::new()).await;
        assert_eq!(remote_status(result), Status::Forbidden, "{}", name);
    }

    stop(server).await;
}

#[tokio::test]
async fn test_binding_errors_are_bad_requests() {
    let (server, _) = start().await;
    let invoker = authed(&server);

    let unknown_keyword = invoker
        .call("purr", Args::new().kwarg("volume", 11))
        .await;
    assert_eq!(remote_status(unknown_keyword), Status::BadRequest);

    let missing = invoker.call("add", Args::new().kwarg("b", 1)).await;
    assert_eq!(remote_status(missing), Status::BadRequest);

    let too_many = invoker
        .call("add", Args::new().arg(1).arg(2).arg(3))
        .await;
    assert_eq!(remote_status(too_many), Status::BadRequest);

    let duplicate = invoker
        .call("add", Args::new().arg(1).kwarg("a", 2))
        .await;
    assert_eq!(remote_status(duplicate), Status::BadRequest);

    let sum = invoker
        .call_single("add", Args::new().arg(2).kwarg("b", 3))
        .await
        .unwrap();
    assert_eq!(sum.decode::<i64>().unwrap(), 5);

    stop(server).await;
}

#[tokio::test]
async fn test_handler_error_is_internal_error() {
    let (server, _) = start().await;

    match authed(&server).call("hiss", Args::new()).await {
        Err(CatwireError::Remote { status, message }) => {
            assert_eq!(status, Status::InternalError);
            assert!(message.contains("hiss!"));
        }
        other => panic!("expected a remote error, got {:?}", other),
    }

    stop(server).await;
}

#[tokio::test]
async fn test_panic_is_contained() {
    let (server, _) = start().await;
    let invoker = authed(&server);

    let result = invoker.call("scratch", Args::new()).await;
    assert_eq!(remote_status(result), Status::InternalError);

    // The worker keeps serving.
    let depth = invoker
        .call_single("scratch", Args::new().kwarg("depth", 2))
        .await
        .unwrap();
    assert_eq!(depth.decode::<u32>().unwrap(), 2);

    stop(server).await;
}

#[tokio::test]
async fn test_stream_failure_after_items_ends_with_error() {
    let (server, _) = start().await;

    let mut items = authed(&server)
        .call_stream("purr_then_hiss", Args::new().kwarg("count", 2))
        .await
        .unwrap();

    assert_eq!(items.next().await.unwrap().unwrap().into_value(), json!(0));
    assert_eq!(items.next().await.unwrap().unwrap().into_value(), json!(1));
    match items.next().await {
        Some(Err(CatwireError::Remote { status, message })) => {
            assert_eq!(status, Status::InternalError);
            assert!(message.contains("hiss!"));
        }
        other => panic!("expected an error item, got {:?}", other),
    }
    assert!(items.next().await.is_none());

    stop(server).await;
}

#[tokio::test]
async fn test_stream_items_keep_the_first_items_encoding() {
    let (server, _) = start().await;

    let items = authed(&server)
        .call_stream("mixed_purr", Args::new())
        .await
        .unwrap();
    assert_eq!(items.content_type(), Some(MSGPACK_CONTENT_TYPE));

    let values: Vec<_> = items
        .collect()
        .await
        .unwrap()
        .into_iter()
        .map(|item| item.into_value())
        .collect();
    assert_eq!(values, vec![json!({"purr": 1}), json!("purr"), json!({"purr": 3})]);

    stop(server).await;
}

#[tokio::test]
async fn test_stream_item_that_does_not_fit_ends_with_error() {
    let (server, _) = start().await;

    let mut items = authed(&server)
        .call_stream("text_then_value", Args::new())
        .await
        .unwrap();
    assert_eq!(items.content_type(), Some("text/plain"));

    assert_eq!(items.next().await.unwrap().unwrap().as_text(), Some("first"));
    match items.next().await {
        Some(Err(CatwireError::Remote { status, message })) => {
            assert_eq!(status, Status::InternalError);
            assert!(message.contains("does not fit"));
        }
        other => panic!("expected an error item, got {:?}", other),
    }
    assert!(items.next().await.is_none());

    stop(server).await;
}

#[tokio::test]
async fn test_stream_failure_before_first_item_is_plain_error() {
    let (server, _) = start().await;

    let result = authed(&server)
        .call("purr_then_hiss", Args::new().kwarg("count", 0))
        .await;
    assert_eq!(remote_status(result), Status::InternalError);

    stop(server).await;
}

#[tokio::test]
async fn test_overlapping_requests_do_not_block() {
    let (server, _) = start().await;
    let invoker = authed(&server);
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    for (which, delay) in [(1, 0.2), (2, 0.1), (3, 0.0)] {
        let invoker = invoker.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let result = invoker
                .call_single("slow_meow", Args::new().kwarg("delay", delay))
                .await;
            tx.send((which, result.is_ok())).unwrap();
        });
    }
    drop(tx);

    let mut order = Vec::new();
    while let Some((which, ok)) = rx.recv().await {
        assert!(ok);
        order.push(which);
    }
    assert_eq!(order, vec![3, 2, 1]);

    stop(server).await;
}

#[tokio::test]
async fn test_discover_and_local_binding() {
    let (server, _) = start().await;
    let mut invoker = authed(&server);

    let names: Vec<_> = invoker
        .discover()
        .await
        .unwrap()
        .iter()
        .map(|d| d.name.clone())
        .collect();
    assert_eq!(&names[..3], &["ping", "help", "quitquitquit"]);
    assert!(names.contains(&"purr".to_string()));

    let purr = invoker.method("purr").unwrap();
    assert!(purr.descriptor().is_stream());
    let outputs = purr
        .call_all(Args::new().kwarg("count", 2))
        .await
        .unwrap();
    assert_eq!(outputs.len(), 2);

    // Fails locally, not with a remote 400.
    let result = invoker.call("purr", Args::new().kwarg("volume", 11)).await;
    assert!(matches!(result, Err(CatwireError::ArgumentBinding(_))));

    stop(server).await;
}

#[tokio::test]
async fn test_config_reports_bound_addresses_without_token() {
    let (server, _) = start().await;

    let config = authed(&server)
        .call_single("config", Args::new())
        .await
        .unwrap()
        .into_value();
    assert_eq!(config["tcp_addr"], server.tcp_addr().unwrap().to_string());
    assert_eq!(config["keep_alive"], true);
    assert!(config.get("token").is_none());
    assert!(!config.to_string().contains(TOKEN));

    let result = anonymous(&server).call("config", Args::new()).await;
    assert_eq!(remote_status(result), Status::Forbidden);

    stop(server).await;
}

#[tokio::test]
async fn test_help_for_one_command() {
    let (server, _) = start().await;

    let descriptor = authed(&server)
        .call_single("help", Args::new().arg("purr"))
        .await
        .unwrap()
        .into_value();
    assert_eq!(descriptor["name"], "purr");
    assert_eq!(descriptor["access"], "private");
    assert_eq!(descriptor["kind"], "stream");

    let result = anonymous(&server).call("help", Args::new()).await;
    assert_eq!(remote_status(result), Status::Forbidden);

    stop(server).await;
}

#[tokio::test]
async fn test_ping() {
    let (server, _) = start().await;

    let pong = anonymous(&server)
        .call_single("ping", Args::new())
        .await
        .unwrap();
    assert_eq!(pong.as_text(), Some(STATIC_PONG));

    let pong = authed(&server)
        .call_single("ping", Args::new())
        .await
        .unwrap()
        .into_value();
    assert_eq!(pong["pong"], true);
    assert_eq!(pong["conn"], server.tcp_addr().unwrap().to_string());

    stop(server).await;
}

#[tokio::test]
async fn test_url_prefix() {
    let state = Arc::new(Kitten::default());
    let server = kitten(state).url_prefix("kitten").start().await.unwrap();

    let url = server.url().unwrap();
    assert!(url.ends_with(&format!("/kitten/{}", TOKEN)));

    let purrs = RemoteInvoker::from_url(&url)
        .unwrap()
        .call("purr", Args::new())
        .await
        .unwrap()
        .into_outputs()
        .await
        .unwrap();
    assert_eq!(purrs.len(), 1);

    let result = anonymous(&server).call("meow", Args::new()).await;
    assert_eq!(remote_status(result), Status::NotFound);

    stop(server).await;
}

#[tokio::test]
async fn test_dropped_stream_releases_producer() {
    let (server, state) = start().await;

    let mut purrs = authed(&server)
        .call_stream("endless_purr", Args::new())
        .await
        .unwrap();
    assert!(purrs.next().await.unwrap().is_ok());
    assert!(purrs.next().await.unwrap().is_ok());
    drop(purrs);

    assert!(eventually(|| state.abandoned_purrs.load(Ordering::SeqCst) == 1).await);

    stop(server).await;
}

#[tokio::test]
async fn test_quitquitquit_stops_server() {
    let (server, _) = start().await;
    let invoker = authed(&server);

    let goodbye = invoker
        .call_single("quitquitquit", Args::new())
        .await
        .unwrap();
    assert_eq!(goodbye.into_value(), json!(GOODBYE));

    tokio::time::timeout(Duration::from_secs(2), server.wait_for_shutdown())
        .await
        .unwrap();

    assert!(invoker.call("meow", Args::new()).await.is_err());
}
