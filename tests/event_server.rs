use std::time::{Duration, Instant};

use quik_bridge::{Event, EventServer, LineEncoding, ServerConfig};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

async fn start_server(config: ServerConfig) -> (EventServer, mpsc::UnboundedReceiver<Event>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = move |event: Event| {
        let _ = tx.send(event);
    };
    let server = EventServer::bind("127.0.0.1:0", config, handler)
        .await
        .expect("bind");
    (server, rx)
}

async fn next_event(rx: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("event in time")
        .expect("handler alive")
}

async fn wait_for_connections(server: &EventServer, count: usize) {
    for _ in 0..200 {
        if server.connection_count() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "expected {count} tracked connections, have {}",
        server.connection_count()
    );
}

#[tokio::test]
async fn malformed_line_skips_single_event() {
    let (server, mut rx) = start_server(ServerConfig::default()).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");

    terminal
        .write_all(
            b"{\"cmd\":\"OnTrade\",\"t\":1,\"data\":{\"qty\":10}}\n\
              {\"cmd\":\"OnTrade\",\"t\":\n\
              {\"cmd\":\"OnQuote\",\"t\":2,\"data\":null}\n",
        )
        .await
        .expect("write");

    let first = next_event(&mut rx).await;
    assert_eq!(first.name, "OnTrade");
    assert_eq!(first.timestamp, 1);
    assert_eq!(first.payload, json!({"qty": 10}));

    let second = next_event(&mut rx).await;
    assert_eq!(second.name, "OnQuote");
    assert_eq!(second.timestamp, 2);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err());
    assert_eq!(server.connection_count(), 1);

    server.close().await;
}

#[tokio::test]
async fn events_keep_arrival_order_per_connection() {
    let (server, mut rx) = start_server(ServerConfig::default()).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");

    for t in 0..50 {
        let line = json!({"cmd": "OnParam", "t": t, "data": {"seq": t}}).to_string() + "\n";
        terminal.write_all(line.as_bytes()).await.expect("write");
    }
    terminal.write_all(b"\n  \n").await.expect("blank lines");

    for t in 0..50 {
        assert_eq!(next_event(&mut rx).await.timestamp, t);
    }

    server.close().await;
}

#[tokio::test]
async fn peer_disconnect_untracks_connection() {
    let (server, mut rx) = start_server(ServerConfig::default()).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");
    terminal
        .write_all(b"{\"cmd\":\"OnDisconnected\",\"t\":3}\n")
        .await
        .expect("write");
    assert_eq!(next_event(&mut rx).await.name, "OnDisconnected");
    wait_for_connections(&server, 1).await;

    drop(terminal);
    wait_for_connections(&server, 0).await;

    server.close().await;
}

#[tokio::test]
async fn close_drains_every_connection() {
    const CONNECTIONS: usize = 4;

    let (server, _rx) = start_server(ServerConfig::default()).await;
    let addr = server.local_addr();

    let mut terminals = Vec::new();
    for _ in 0..CONNECTIONS {
        terminals.push(TcpStream::connect(addr).await.expect("connect"));
    }
    wait_for_connections(&server, CONNECTIONS).await;
    let connections = server.connections();
    assert_eq!(connections.peers().len(), CONNECTIONS);

    tokio::time::timeout(Duration::from_secs(5), server.close())
        .await
        .expect("close finishes");
    assert!(connections.is_empty());

    for mut terminal in terminals {
        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(5), terminal.read(&mut buf))
            .await
            .expect("socket closed in time");
        assert!(matches!(read, Ok(0) | Err(_)));
    }

    assert!(TcpStream::connect(addr).await.is_err());
}

#[tokio::test]
async fn lifecycle_trips_on_close() {
    let (server, _rx) = start_server(ServerConfig::default()).await;
    let lifecycle = server.lifecycle().clone();
    assert!(!lifecycle.is_tripped());

    server.close().await;
    assert!(lifecycle.is_tripped());
}

#[tokio::test]
async fn windows_1251_events_are_transcoded() {
    let config = ServerConfig {
        encoding: LineEncoding::Windows1251,
        ..ServerConfig::default()
    };
    let (server, mut rx) = start_server(config).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");

    // "Сбер" in Windows-1251.
    let mut line = b"{\"cmd\":\"OnTrade\",\"t\":4,\"data\":\"".to_vec();
    line.extend_from_slice(&[0xD1, 0xE1, 0xE5, 0xF0]);
    line.extend_from_slice(b"\"}\r\n");
    terminal.write_all(&line).await.expect("write");

    let event = next_event(&mut rx).await;
    assert_eq!(event.payload, json!("Сбер"));

    server.close().await;
}

#[tokio::test]
async fn slow_handler_holds_back_its_own_connection_only() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handler = move |event: Event| {
        if event.name == "Slow" {
            std::thread::sleep(Duration::from_millis(800));
        }
        let _ = tx.send((event.name, Instant::now()));
    };
    let server = EventServer::bind("127.0.0.1:0", ServerConfig::default(), handler)
        .await
        .expect("bind");

    let mut slow = TcpStream::connect(server.local_addr()).await.expect("connect");
    let mut fast = TcpStream::connect(server.local_addr()).await.expect("connect");
    wait_for_connections(&server, 2).await;

    slow.write_all(b"{\"cmd\":\"Slow\",\"t\":1}\n{\"cmd\":\"AfterSlow\",\"t\":2}\n")
        .await
        .expect("write");
    tokio::time::sleep(Duration::from_millis(100)).await;
    let sent = Instant::now();
    fast.write_all(b"{\"cmd\":\"Fast\",\"t\":3}\n")
        .await
        .expect("write");

    let mut order = Vec::new();
    for _ in 0..3 {
        let (name, at) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("event in time")
            .expect("handler alive");
        if name == "Fast" {
            assert!(
                at.duration_since(sent) < Duration::from_millis(400),
                "fast connection waited {:?}",
                at.duration_since(sent)
            );
        }
        order.push(name);
    }
    assert_eq!(order, vec!["Fast", "Slow", "AfterSlow"]);

    server.close().await;
}

#[tokio::test]
async fn overlong_line_closes_connection() {
    let config = ServerConfig {
        max_line: 64,
        ..ServerConfig::default()
    };
    let (server, mut rx) = start_server(config).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");
    wait_for_connections(&server, 1).await;

    terminal
        .write_all(b"{\"cmd\":\"OnTrade\",\"t\":1}\n")
        .await
        .expect("write");
    assert_eq!(next_event(&mut rx).await.name, "OnTrade");

    terminal.write_all(&[b'x'; 200]).await.expect("write");
    wait_for_connections(&server, 0).await;

    let mut buf = [0u8; 16];
    let read = tokio::time::timeout(Duration::from_secs(5), terminal.read(&mut buf))
        .await
        .expect("socket closed in time");
    assert!(matches!(read, Ok(0) | Err(_)));

    server.close().await;
}

#[tokio::test]
async fn event_without_name_is_delivered() {
    let (server, mut rx) = start_server(ServerConfig::default()).await;
    let mut terminal = TcpStream::connect(server.local_addr()).await.expect("connect");

    terminal
        .write_all(b"{\"t\":9,\"data\":{\"qty\":2}}\n")
        .await
        .expect("write");
    let event = next_event(&mut rx).await;
    assert!(event.name.is_empty());
    assert_eq!(event.timestamp, 9);

    server.close().await;
}
