//! End-to-end tests against an in-process Electrum server.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use common::{MockServer, Reply, SilentServer, electrum_handler, response};
use futures::future::join_all;
use parking_lot::Mutex;
use proven_electrum::{
    ClientConfig, ClientEvent, CloseReason, ConnectionStatus, ElectrumClient, Error,
    PersistencePolicy, Protocol, TransportConfig, method,
};
use serde_json::{Value, json};
use tokio::sync::broadcast;
use tokio::time::{sleep, timeout};
use tokio_stream::StreamExt;
use tracing_test::traced_test;

fn client(server: &MockServer) -> ElectrumClient {
    client_with(server, ClientConfig::default().reconnect_delay(Duration::from_millis(50)))
}

fn client_with(server: &MockServer, config: ClientConfig) -> ElectrumClient {
    ElectrumClient::with_config(
        TransportConfig::new("127.0.0.1", server.port, Protocol::Tcp),
        config,
    )
    .unwrap()
}

async fn next_event(events: &mut broadcast::Receiver<ClientEvent>) -> ClientEvent {
    timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("event channel closed")
}

/// Skip events until one matches.
async fn wait_for_event<F>(events: &mut broadcast::Receiver<ClientEvent>, matches: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    loop {
        let event = next_event(events).await;
        if matches(&event) {
            return event;
        }
    }
}

#[tokio::test]
#[traced_test]
async fn test_connect_negotiates_version() {
    let server = MockServer::start().await;
    let client = client(&server);
    let mut events = client.events();

    let version = client
        .connect("test-wallet", "1.4", PersistencePolicy::default())
        .await
        .unwrap();

    assert_eq!(version, json!("1.4.2"));
    assert!(client.is_connected());
    assert_eq!(client.negotiated_version(), Some(json!("1.4.2")));

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0]["id"], json!(1));
    assert_eq!(requests[0]["method"], "server.version");
    assert_eq!(requests[0]["params"], json!(["test-wallet", "1.4"]));

    assert_eq!(next_event(&mut events).await, ClientEvent::Connected);
    assert_eq!(
        next_event(&mut events).await,
        ClientEvent::Ready {
            version: json!("1.4.2")
        }
    );
}

#[tokio::test]
#[traced_test]
async fn test_second_connect_is_silent() {
    let server = MockServer::start().await;
    let client = client(&server);

    client
        .connect("test-wallet", "1.4", PersistencePolicy::default())
        .await
        .unwrap();
    let again = client
        .connect("other", "1.5", PersistencePolicy::disabled())
        .await
        .unwrap();

    assert_eq!(again, json!("1.4.2"));
    assert_eq!(server.accepted(), 1);
    assert_eq!(server.requests().len(), 1);
    assert_eq!(client.identity().client_name, "test-wallet");
}

#[tokio::test]
#[traced_test]
async fn test_request_before_connect_is_rejected() {
    let server = MockServer::start().await;
    let client = client(&server);

    let result = client.request("server.banner", vec![]).await;

    assert!(matches!(result, Err(Error::NotConnected)));
    assert_eq!(server.accepted(), 0);
}

#[tokio::test]
#[traced_test]
async fn test_out_of_order_responses() {
    // The header request is held back and answered after the banner.
    let held = Arc::new(Mutex::new(None::<Value>));
    let handler = {
        let held = Arc::clone(&held);
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("blockchain.block.header") => {
                *held.lock() = Some(request["id"].clone());
                Reply::Ignore
            }
            Some("server.banner") => {
                let header_id = held.lock().take().unwrap();
                Reply::Raw(vec![
                    response(&request["id"], json!("Welcome")),
                    response(&header_id, json!("00000020deadbeef")),
                ])
            }
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client(&server);
    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    let header = {
        let client = client.clone();
        tokio::spawn(async move { client.block_header(100, 0).await })
    };
    server.wait_for_requests("blockchain.block.header", 1).await;

    let banner = client.server_banner().await.unwrap();
    let header = header.await.unwrap().unwrap();

    assert_eq!(banner, json!("Welcome"));
    assert_eq!(header, json!("00000020deadbeef"));
}

#[tokio::test]
#[traced_test]
async fn test_concurrent_requests_share_one_connection() {
    let server = MockServer::start().await;
    let client = client(&server);
    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    let calls = (0..50).map(|i| {
        let client = client.clone();
        async move {
            let scripthash = format!("{i:064x}");
            let result = client.scripthash_get_balance(&scripthash).await.unwrap();
            (scripthash, result)
        }
    });

    for (scripthash, result) in join_all(calls).await {
        assert_eq!(result, json!([scripthash]));
    }

    let mut ids: Vec<u64> = server
        .requests()
        .iter()
        .map(|request| request["id"].as_u64().unwrap())
        .collect();
    ids.sort_unstable();
    ids.dedup();

    assert_eq!(ids.len(), 51);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_server_error_fails_only_its_request() {
    let handler = {
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("blockchain.transaction.broadcast") => Reply::Error(json!({
                "code": 1,
                "message": "the transaction was rejected by network rules."
            })),
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client(&server);
    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    let (broadcast, fee) = tokio::join!(client.transaction_broadcast("0100"), client.relay_fee());

    let Err(Error::Server(error)) = broadcast else {
        panic!("expected server error");
    };
    assert_eq!(error.code, Some(1));
    assert_eq!(error.message, "the transaction was rejected by network rules.");
    assert_eq!(fee.unwrap(), json!([]));
    assert!(client.is_connected());
}

#[tokio::test]
#[traced_test]
async fn test_notifications_reach_listeners() {
    let server = MockServer::start().await;
    let client = client(&server);

    let seen = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        client.on(method::HEADERS_SUBSCRIBE, move |params| {
            seen.lock().push(params.clone());
        });
    }
    let mut stream = client.subscribe(method::HEADERS_SUBSCRIBE);

    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    // Nobody listens for this one.
    server.notify("blockchain.numblocks.subscribe", json!([800_000]));
    server.notify(method::HEADERS_SUBSCRIBE, json!([{"height": 800_001, "hex": "00"}]));

    let pushed = timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pushed, json!([{"height": 800_001, "hex": "00"}]));
    assert_eq!(*seen.lock(), vec![pushed]);

    assert_eq!(client.server_ping().await.unwrap(), Value::Null);
}

#[tokio::test]
#[traced_test]
async fn test_panicking_listener_is_isolated() {
    let server = MockServer::start().await;
    let client = client(&server);

    client.on(method::SCRIPTHASH_SUBSCRIBE, |_| panic!("listener bug"));
    let mut stream = client.subscribe(method::SCRIPTHASH_SUBSCRIBE);

    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();
    server.notify(method::SCRIPTHASH_SUBSCRIBE, json!(["hash", "status"]));

    let pushed = timeout(Duration::from_secs(5), stream.next())
        .await
        .unwrap();
    assert_eq!(pushed, Some(json!(["hash", "status"])));
    assert!(client.is_connected());
}

#[tokio::test]
#[traced_test]
async fn test_close_fails_pending_and_never_reconnects() {
    let handler = {
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("blockchain.transaction.get") => Reply::Ignore,
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client(&server);
    let mut events = client.events();
    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    let pending = {
        let client = client.clone();
        tokio::spawn(async move { client.transaction_get("ab", true).await })
    };
    server.wait_for_requests("blockchain.transaction.get", 1).await;

    client.close();

    assert!(matches!(pending.await.unwrap(), Err(Error::ConnectionLost)));
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed(_))).await,
        ClientEvent::Closed(CloseReason::Requested)
    );

    sleep(Duration::from_millis(300)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(client.remaining_retries(), 10);
    assert!(matches!(
        client.server_ping().await,
        Err(Error::NotConnected)
    ));
}

#[tokio::test]
#[traced_test]
async fn test_reconnects_after_server_drop() {
    let server = MockServer::start().await;
    let client = client(&server);
    let mut events = client.events();

    let seen = Arc::new(AtomicUsize::new(0));
    {
        let seen = Arc::clone(&seen);
        client.on(method::HEADERS_SUBSCRIBE, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
    }

    client
        .connect("test-wallet", "1.4", PersistencePolicy::new(2))
        .await
        .unwrap();

    server.drop_connections();

    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed(_))).await,
        ClientEvent::Closed(CloseReason::EndOfStream)
    );
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await,
        ClientEvent::Reconnecting { remaining: 1 }
    );
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Ready { .. })).await;

    assert_eq!(server.accepted(), 2);
    assert!(client.is_connected());

    // The stored identity is reused verbatim.
    let negotiations: Vec<Value> = server
        .requests()
        .into_iter()
        .filter(|request| request["method"] == "server.version")
        .map(|request| request["params"].clone())
        .collect();
    assert_eq!(
        negotiations,
        vec![json!(["test-wallet", "1.4"]), json!(["test-wallet", "1.4"])]
    );

    // Listeners survive the reconnect and ids keep increasing.
    server.notify(method::HEADERS_SUBSCRIBE, json!([{"height": 1}]));
    client.server_ping().await.unwrap();
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    let last = server.requests().last().cloned().unwrap();
    assert_eq!(last["id"], json!(3));
}

#[tokio::test]
#[traced_test]
async fn test_exhaustion_callback_runs_once() {
    let server = MockServer::start().await;
    let client = client(&server);
    let mut events = client.events();

    let exhausted = Arc::new(AtomicUsize::new(0));
    let policy = {
        let exhausted = Arc::clone(&exhausted);
        PersistencePolicy::new(1).on_exhausted(move || {
            exhausted.fetch_add(1, Ordering::SeqCst);
        })
    };

    client.connect("", "", policy).await.unwrap();

    server.drop_connections();
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Ready { .. })).await;
    assert_eq!(server.accepted(), 2);
    assert_eq!(client.remaining_retries(), 0);

    server.drop_connections();
    assert_eq!(
        wait_for_event(&mut events, |e| {
            matches!(e, ClientEvent::RetriesExhausted | ClientEvent::Reconnecting { .. })
        })
        .await,
        ClientEvent::RetriesExhausted
    );

    sleep(Duration::from_millis(300)).await;
    assert_eq!(exhausted.load(Ordering::SeqCst), 1);
    assert_eq!(server.accepted(), 2);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
#[traced_test]
async fn test_keepalive_probes_idle_connection() {
    let server = MockServer::start().await;
    let client = client_with(
        &server,
        ClientConfig::default().keepalive_interval(Duration::from_millis(200)),
    );

    client
        .connect("", "", PersistencePolicy::default())
        .await
        .unwrap();

    server.wait_for_requests("server.ping", 1).await;

    assert!(client.is_connected());
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_unanswered_probe_forces_reconnect() {
    let handler = {
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("server.ping") => Reply::Ignore,
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client_with(
        &server,
        ClientConfig::default()
            .keepalive_interval(Duration::from_millis(200))
            .keepalive_retry_delay(Duration::from_millis(50)),
    );
    let mut events = client.events();

    client
        .connect("", "", PersistencePolicy::new(3))
        .await
        .unwrap();

    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed(_))).await,
        ClientEvent::Closed(CloseReason::ProbeFailed)
    );
    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Reconnecting { .. })).await,
        ClientEvent::Reconnecting { remaining: 2 }
    );
    wait_for_event(&mut events, |e| matches!(e, ClientEvent::Ready { .. })).await;

    assert_eq!(server.accepted(), 2);
}

#[tokio::test]
#[traced_test]
async fn test_server_close_during_keepalive_uses_one_retry() {
    // The server hangs up on the ping and refuses every later connection.
    let handler = {
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("server.ping") => Reply::Shutdown,
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client_with(
        &server,
        ClientConfig::default()
            .keepalive_interval(Duration::from_millis(200))
            .keepalive_retry_delay(Duration::from_millis(50))
            .reconnect_delay(Duration::from_millis(300)),
    );
    let mut events = client.events();

    client
        .connect("", "", PersistencePolicy::new(5))
        .await
        .unwrap();

    assert_eq!(
        wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed(_))).await,
        ClientEvent::Closed(CloseReason::EndOfStream)
    );

    // Long enough for both the keepalive recovery and the close handler.
    sleep(Duration::from_millis(1500)).await;

    let mut rest = Vec::new();
    while let Ok(event) = events.try_recv() {
        rest.push(event);
    }

    let reconnects = rest
        .iter()
        .filter(|e| matches!(e, ClientEvent::Reconnecting { .. }))
        .count();
    let closes = 1 + rest
        .iter()
        .filter(|e| matches!(e, ClientEvent::Closed(_)))
        .count();

    assert_eq!(reconnects, closes, "events: {rest:?}");
    assert!(rest.contains(&ClientEvent::Reconnecting { remaining: 4 }));
    assert!(rest.iter().any(|e| matches!(e, ClientEvent::Error(_))));
    assert_eq!(client.remaining_retries(), 4);
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
#[traced_test]
async fn test_abandoned_connect_can_be_retried() {
    let server = SilentServer::start().await;
    let client = ElectrumClient::with_config(
        TransportConfig::new("127.0.0.1", server.port, Protocol::TlsNoVerify),
        ClientConfig::default().connect_timeout(Duration::from_millis(200)),
    )
    .unwrap();

    let abandoned = timeout(
        Duration::from_millis(50),
        client.connect("", "", PersistencePolicy::default()),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(client.status(), ConnectionStatus::Disconnected);

    // A fresh attempt goes back to the wire and runs into the connect timeout.
    let retried = client.connect("", "", PersistencePolicy::default()).await;
    assert!(
        matches!(retried, Err(Error::ConnectTimeout(_))),
        "unexpected result: {retried:?}"
    );
    assert_eq!(server.accepted(), 2);
    assert_eq!(client.status(), ConnectionStatus::Disconnected);
}

#[tokio::test]
#[traced_test]
async fn test_oversized_line_closes_connection() {
    let handler = {
        let fallback = electrum_handler();
        Arc::new(move |request: &Value| match request["method"].as_str() {
            Some("server.banner") => Reply::Result(json!("x".repeat(512))),
            _ => fallback(request),
        })
    };
    let server = MockServer::with_handler(handler).await;
    let client = client_with(
        &server,
        ClientConfig::default()
            .reconnect_delay(Duration::from_millis(50))
            .max_frame_length(128),
    );
    let mut events = client.events();

    client
        .connect("", "", PersistencePolicy::disabled())
        .await
        .unwrap();

    let result = client.server_banner().await;
    assert!(matches!(result, Err(Error::ConnectionLost)), "{result:?}");

    let closed = wait_for_event(&mut events, |e| matches!(e, ClientEvent::Closed(_))).await;
    assert!(
        matches!(&closed, ClientEvent::Closed(CloseReason::Error(message)) if message.contains("128")),
        "unexpected close: {closed:?}"
    );

    assert_eq!(server.accepted(), 1);
}
