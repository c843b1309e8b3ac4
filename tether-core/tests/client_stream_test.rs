use futures_util::StreamExt;
use harness::{CONFIG, EmbeddedLoader, InProcessFactory, fast_options, setup_client};
use serde_json::json;
use std::sync::Arc;
use tether_core::{
    auth::StaticAuth,
    client::{
        CallError, CallSpec, ClientOptions, ExecutionMode, Payload, SinkClosed, StreamEvent,
        TetherClient,
    },
    config::ServiceConfig,
    descriptor::DescriptorCache,
    status::ResponseStatus,
};

mod harness;

fn server_stream() -> CallSpec {
    CallSpec::new("EchoService", "ServerStreamingEcho")
}

fn words(events: &[StreamEvent]) -> Vec<String> {
    events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Data(payload) => payload.to_value(),
            _ => None,
        })
        .map(|value| value["message"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_server_stream_reports_request_response_and_data() {
    let (client, _, _) = setup_client(fast_options(3));

    let events: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "one two three" }))
        .unwrap()
        .collect()
        .await;

    match &events[0] {
        StreamEvent::Request(observed) => {
            assert_eq!(observed.attempt, 0);
            assert_eq!(observed.payload, json!({ "message": "one two three" }));
            assert!(observed.metadata.iter().any(|(k, _)| k == "x-client-info"));
            assert!(!observed.metadata.iter().any(|(k, _)| k == "authorization"));
        }
        other => panic!("Expected a request event, got {other:?}"),
    }
    assert!(matches!(&events[1], StreamEvent::Response(status) if *status == ResponseStatus::ok()));
    assert_eq!(words(&events), ["one", "two", "three"]);
    assert_eq!(events.len(), 5);
}

#[tokio::test]
async fn test_object_mode_controls_payload_shape() {
    let (client, _, _) = setup_client(fast_options(0));

    let encoded: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "a" }))
        .unwrap()
        .collect()
        .await;
    let objects: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "a", "objectMode": true }))
        .unwrap()
        .collect()
        .await;

    assert!(encoded.iter().any(|e| matches!(e, StreamEvent::Data(Payload::Encoded(_)))));
    assert!(objects.iter().any(|e| matches!(e, StreamEvent::Data(Payload::Object(_)))));
}

#[tokio::test]
async fn test_stream_open_is_retried() {
    let (client, factory, _) = setup_client(fast_options(3));

    let events: Vec<_> = client
        .request_stream(
            server_stream(),
            json!({ "message": "finally", "failCode": 14, "failTimes": 2 }),
        )
        .unwrap()
        .collect()
        .await;

    let attempts: Vec<u32> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Request(observed) => Some(observed.attempt),
            _ => None,
        })
        .collect();

    assert_eq!(attempts, [0, 1, 2]);
    assert_eq!(words(&events), ["finally"]);
    assert_eq!(factory.service.attempts(), 3);
}

#[tokio::test]
async fn test_stream_open_failure_is_a_decorated_error() {
    let (client, factory, _) = setup_client(fast_options(3));

    let events: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "x", "failCode": 5 }))
        .unwrap()
        .collect()
        .await;

    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error(CallError::Status(status))) if status.code == 404
    ));
    assert!(!events.iter().any(|e| matches!(e, StreamEvent::Response(_))));
    assert_eq!(factory.service.attempts(), 1);
}

#[tokio::test]
async fn test_mid_stream_error_is_decorated_and_terminal() {
    let (client, _, _) = setup_client(fast_options(0));

    let events: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "first !halt never" }))
        .unwrap()
        .collect()
        .await;

    assert_eq!(words(&events), ["first"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error(CallError::Status(status)))
            if status.code == 409 && status.message == "!halt"
    ));
}

#[tokio::test]
async fn test_preparation_failure_is_an_error_event() {
    let factory = InProcessFactory::new(Default::default());
    let client = TetherClient::builder(ServiceConfig::from_json(CONFIG).unwrap())
        .options(fast_options(0))
        .auth(StaticAuth::default())
        .descriptor_cache(Arc::new(DescriptorCache::new(EmbeddedLoader::default())))
        .stub_factory(factory)
        .build()
        .unwrap();

    let events: Vec<_> = client
        .request_stream(server_stream(), json!({ "message": "x" }))
        .unwrap()
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error(CallError::Credentials(_))));
}

#[tokio::test]
async fn test_bidirectional_stream_echoes_writes() {
    let (client, _, _) = setup_client(fast_options(0));

    let (sink, responses) = client
        .request_writable_stream(
            CallSpec::new("EchoService", "BidirectionalEcho"),
            Some(json!({ "message": "{{projectId}}" })),
        )
        .unwrap()
        .split();

    // Written before the transport is open; buffered.
    sink.send(json!({ "message": "ping" })).await.unwrap();
    sink.send(json!({ "message": "pong" })).await.unwrap();
    sink.finish();

    let events: Vec<_> = responses.collect().await;

    assert_eq!(words(&events), ["test-project", "ping", "pong"]);
    assert!(matches!(events.last(), Some(StreamEvent::Response(status)) if status.is_ok()));
}

#[tokio::test]
async fn test_bidirectional_failure_is_decorated() {
    let (client, _, _) = setup_client(fast_options(3));

    let (sink, responses) = client
        .request_writable_stream(CallSpec::new("EchoService", "BidirectionalEcho"), None)
        .unwrap()
        .split();

    sink.send(json!({ "message": "ok" })).await.unwrap();
    sink.send(json!({ "message": "boom", "failCode": 16 })).await.unwrap();

    let events: Vec<_> = responses.collect().await;

    assert_eq!(words(&events), ["ok"]);
    assert!(matches!(
        events.last(),
        Some(StreamEvent::Error(CallError::Status(status))) if status.code == 401
    ));
}

#[tokio::test]
async fn test_duplex_preparation_failure_is_an_error_event() {
    let factory = InProcessFactory::new(Default::default());
    let client = TetherClient::builder(ServiceConfig::from_json(CONFIG).unwrap())
        .options(fast_options(0))
        .auth(StaticAuth::default())
        .descriptor_cache(Arc::new(DescriptorCache::new(EmbeddedLoader::default())))
        .stub_factory(factory.clone())
        .build()
        .unwrap();

    let (sink, responses) = client
        .request_writable_stream(CallSpec::new("EchoService", "BidirectionalEcho"), None)
        .unwrap()
        .split();

    // Accepted before credentials are resolved.
    sink.send(json!({ "message": "early" })).await.unwrap();

    let events: Vec<_> = responses.collect().await;

    assert_eq!(events.len(), 1);
    assert!(matches!(events[0], StreamEvent::Error(CallError::Credentials(_))));
    assert_eq!(factory.created(), 0);

    let late = sink.send(json!({ "message": "late" })).await;
    assert!(matches!(late, Err(SinkClosed(value)) if value == json!({ "message": "late" })));
}

#[tokio::test]
async fn test_single_request_method_is_not_writable() {
    let (client, factory, _) = setup_client(fast_options(0));

    let events: Vec<_> = client
        .request_writable_stream(
            CallSpec::new("EchoService", "ServerStreamingEcho"),
            Some(json!({ "message": "x" })),
        )
        .unwrap()
        .responses
        .collect()
        .await;

    assert_eq!(events.len(), 1);
    assert!(matches!(
        &events[0],
        StreamEvent::Error(CallError::NotClientStreaming { method, .. })
            if method == "ServerStreamingEcho"
    ));
    assert_eq!(factory.service.attempts(), 0);
}

#[tokio::test]
async fn test_client_stream_collects_writes() {
    let (client, _, _) = setup_client(fast_options(0));

    let duplex = client
        .request_writable_stream(
            CallSpec::new("EchoService", "ClientStreamingEcho"),
            Some(json!({ "message": "a" })),
        )
        .unwrap();

    duplex.sink.send(json!({ "message": "b" })).await.unwrap();
    duplex.sink.send(json!({ "message": "c" })).await.unwrap();
    let (sink, responses) = duplex.split();
    drop(sink);

    let events: Vec<_> = responses.collect().await;

    assert_eq!(words(&events), ["a b c"]);
    assert!(matches!(events.last(), Some(StreamEvent::Response(status)) if status.code == 200));
}

#[tokio::test]
async fn test_sandbox_short_circuits_every_entry_point() {
    let loader = EmbeddedLoader::default();
    let factory = InProcessFactory::new(Default::default());
    let client = TetherClient::builder(ServiceConfig::from_json(CONFIG).unwrap())
        .options(ClientOptions {
            mode: ExecutionMode::Sandbox("restricted".to_string()),
            ..fast_options(3)
        })
        .descriptor_cache(Arc::new(DescriptorCache::new(loader.clone())))
        .stub_factory(factory.clone())
        .build()
        .unwrap();

    let unary = client
        .request(&CallSpec::new("EchoService", "UnaryEcho"), json!({}))
        .await;
    let stream = client.request_stream(server_stream(), json!({}));
    let duplex =
        client.request_writable_stream(CallSpec::new("EchoService", "BidirectionalEcho"), None);
    let stub = client.stub("EchoService").await;

    assert!(matches!(unary, Err(CallError::Sandboxed(marker)) if marker == "restricted"));
    assert!(matches!(stream, Err(CallError::Sandboxed(_))));
    assert!(matches!(duplex, Err(CallError::Sandboxed(_))));
    assert!(matches!(stub, Err(CallError::Sandboxed(_))));
    assert_eq!(loader.loads.load(std::sync::atomic::Ordering::SeqCst), 0);
    assert_eq!(factory.created(), 0);
}
