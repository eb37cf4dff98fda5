//! Protocol-level tests driving the hub with raw WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use uniclip::guard::AccessGuard;
use uniclip::hub::Hub;
use uniclip::protocol::{Action, ClipboardKind, ClipboardValue, WireMessage};
use uniclip::store::UniversalClipboard;

const USER: &str = "test";
const PASS: &str = "pw";

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestHub {
    addr: String,
    hub: Arc<Hub>,
    shutdown: watch::Sender<bool>,
}

impl Drop for TestHub {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn start_hub() -> Result<TestHub> {
    let store = Arc::new(UniversalClipboard::new(None));
    let guard = Arc::new(AccessGuard::new([(USER, PASS)]));
    let hub = Arc::new(Hub::new(store, guard));

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?.to_string();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(Arc::clone(&hub).serve(listener, shutdown_rx));

    Ok(TestHub {
        addr,
        hub,
        shutdown: shutdown_tx,
    })
}

async fn connect(addr: &str, user: &str, pass: &str) -> Result<Socket> {
    let mut request = format!("ws://{addr}").into_client_request()?;
    let value = format!("Basic {}", BASE64.encode(format!("{user}:{pass}")));
    request.headers_mut().insert(AUTHORIZATION, value.parse()?);
    let (ws, _) = connect_async(request).await?;
    Ok(ws)
}

async fn send(ws: &mut Socket, msg: &WireMessage) -> Result<()> {
    ws.send(WsMessage::Binary(msg.encode()?.into())).await?;
    Ok(())
}

async fn recv(ws: &mut Socket) -> Result<WireMessage> {
    loop {
        let frame = timeout(Duration::from_secs(2), ws.next())
            .await?
            .ok_or_else(|| anyhow::anyhow!("connection closed"))??;
        match frame {
            WsMessage::Binary(b) => return Ok(WireMessage::decode(&b)?),
            WsMessage::Text(t) => return Ok(WireMessage::decode(t.as_bytes())?),
            _ => continue,
        }
    }
}

async fn expect_silence(ws: &mut Socket) {
    let got = timeout(Duration::from_millis(200), ws.next()).await;
    assert!(got.is_err(), "expected no frame, got {got:?}");
}

/// Register under `id` and return the socket plus the assigned identity.
async fn register(addr: &str, id: &str) -> Result<(Socket, String)> {
    let mut ws = connect(addr, USER, PASS).await?;
    send(&mut ws, &WireMessage::register(id)).await?;
    let reply = recv(&mut ws).await?;
    assert_eq!(reply.action, Action::Ready);
    Ok((ws, reply.user_id))
}

#[tokio::test]
async fn test_handshake_deduplicates_identities() -> Result<()> {
    let hub = start_hub().await?;

    let (_a, id_a) = register(&hub.addr, "mac").await?;
    let (_b, id_b) = register(&hub.addr, "mac").await?;

    assert_eq!(id_a, "mac");
    assert_ne!(id_b, "mac");
    assert!(id_b.starts_with("mac-"));
    assert_eq!(hub.hub.registry().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_put_broadcasts_to_others_only() -> Result<()> {
    let hub = start_hub().await?;

    let (mut a, _) = register(&hub.addr, "mac").await?;
    let (mut b, _) = register(&hub.addr, "linux").await?;

    let value = ClipboardValue::from_bytes(ClipboardKind::Text, b"hello");
    send(&mut a, &WireMessage::clipboard_put("mac", &value)).await?;

    let changed = recv(&mut b).await?;
    assert_eq!(changed.action, Action::ClipboardChanged);
    assert_eq!(changed.user_id, "mac");
    let got = ClipboardValue::decode(&changed.data)?;
    assert_eq!(got.kind, ClipboardKind::Text);
    assert_eq!(got.data, "hello");

    // the sender never receives its own change notification
    expect_silence(&mut a).await;
    Ok(())
}

#[tokio::test]
async fn test_identical_put_broadcasts_once() -> Result<()> {
    let hub = start_hub().await?;

    let (mut a, _) = register(&hub.addr, "mac").await?;
    let (mut b, _) = register(&hub.addr, "linux").await?;

    let value = ClipboardValue::from_bytes(ClipboardKind::Text, b"hello");
    send(&mut a, &WireMessage::clipboard_put("mac", &value)).await?;
    send(&mut a, &WireMessage::clipboard_put("mac", &value)).await?;

    let first = recv(&mut b).await?;
    assert_eq!(first.action, Action::ClipboardChanged);
    expect_silence(&mut b).await;

    let (kind, buf) = hub.hub.store().read();
    assert_eq!(kind, ClipboardKind::Text);
    assert_eq!(buf, b"hello");
    Ok(())
}

#[tokio::test]
async fn test_image_value_relayed_intact() -> Result<()> {
    let hub = start_hub().await?;

    let (mut a, _) = register(&hub.addr, "a").await?;
    let (mut b, _) = register(&hub.addr, "b").await?;

    let raw = vec![0x89, b'P', b'N', b'G', 0x00, 0xff, 0x10];
    let value = ClipboardValue::from_bytes(ClipboardKind::ImagePng, &raw);
    send(&mut a, &WireMessage::clipboard_put("a", &value)).await?;

    let changed = recv(&mut b).await?;
    let (kind, bytes) = ClipboardValue::decode(&changed.data)?.into_bytes();
    assert_eq!(kind, ClipboardKind::ImagePng);
    assert_eq!(bytes, raw);
    Ok(())
}

#[tokio::test]
async fn test_listing_tracks_disconnects() -> Result<()> {
    let hub = start_hub().await?;

    let (a, _) = register(&hub.addr, "a").await?;
    let (mut b, _) = register(&hub.addr, "b").await?;

    drop(a);
    timeout(Duration::from_secs(2), async {
        while hub.hub.registry().len() != 1 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await?;

    send(&mut b, &WireMessage::list_daemons_request("b")).await?;
    let reply = recv(&mut b).await?;
    assert_eq!(reply.action, Action::ListDaemonsResponse);

    let table = String::from_utf8(reply.data)?;
    let lines: Vec<_> = table.lines().collect();
    assert_eq!(lines[0], "id\tname");
    assert_eq!(lines.len(), 2);
    assert!(lines[1].ends_with("\tb"));
    Ok(())
}

#[tokio::test]
async fn test_first_action_must_be_register() -> Result<()> {
    let hub = start_hub().await?;

    let mut ws = connect(&hub.addr, USER, PASS).await?;
    let value = ClipboardValue::from_bytes(ClipboardKind::Text, b"early");
    send(&mut ws, &WireMessage::clipboard_put("x", &value)).await?;

    let reply = recv(&mut ws).await?;
    assert_eq!(reply.action, Action::Terminate);
    assert_eq!(hub.hub.registry().len(), 0);
    Ok(())
}

#[tokio::test]
async fn test_malformed_handshake_terminates() -> Result<()> {
    let hub = start_hub().await?;

    let mut ws = connect(&hub.addr, USER, PASS).await?;
    ws.send(WsMessage::Binary(b"{garbage".to_vec().into()))
        .await?;

    let reply = recv(&mut ws).await?;
    assert_eq!(reply.action, Action::Terminate);
    Ok(())
}

#[tokio::test]
async fn test_malformed_frame_in_steady_state_is_dropped() -> Result<()> {
    let hub = start_hub().await?;

    let (mut a, _) = register(&hub.addr, "a").await?;
    a.send(WsMessage::Binary(b"not json at all".to_vec().into()))
        .await?;

    // the connection survives and still answers requests
    send(&mut a, &WireMessage::list_daemons_request("a")).await?;
    let reply = recv(&mut a).await?;
    assert_eq!(reply.action, Action::ListDaemonsResponse);
    Ok(())
}

#[tokio::test]
async fn test_unknown_action_is_ignored() -> Result<()> {
    let hub = start_hub().await?;

    let (mut a, _) = register(&hub.addr, "a").await?;
    a.send(WsMessage::Binary(
        br#"{"action":"newsput","user_id":"a","msg":"","data":""}"#
            .to_vec()
            .into(),
    ))
    .await?;

    send(&mut a, &WireMessage::list_daemons_request("a")).await?;
    let reply = recv(&mut a).await?;
    assert_eq!(reply.action, Action::ListDaemonsResponse);
    Ok(())
}

#[tokio::test]
async fn test_bad_credentials_rejected() -> Result<()> {
    let hub = start_hub().await?;

    let err = connect(&hub.addr, USER, "wrong").await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("401"), "expected 401, got: {text}");

    // good credentials still work, the failure never locked us out
    let (_ws, id) = register(&hub.addr, "ok").await?;
    assert_eq!(id, "ok");
    Ok(())
}

#[tokio::test]
async fn test_repeated_failures_lock_the_address_out() -> Result<()> {
    let hub = start_hub().await?;

    for _ in 0..6 {
        let _ = connect(&hub.addr, USER, "wrong").await.unwrap_err();
    }

    // locked out: even valid credentials now bounce with 403
    let err = connect(&hub.addr, USER, PASS).await.unwrap_err();
    let text = err.to_string();
    assert!(text.contains("403"), "expected 403, got: {text}");
    Ok(())
}
