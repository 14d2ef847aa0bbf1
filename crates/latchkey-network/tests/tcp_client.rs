//! Integration tests for TcpClient and SessionChannel
//!
//! These run against small scripted servers on loopback so that connection
//! loss, reconnects and malformed answers can be staged exactly.

use futures::{SinkExt, StreamExt};
use latchkey_core::{DeviceId, DeviceKey, Pin};
use latchkey_network::{
    RetryPolicy, SessionChannel, SessionError, TcpClient, TcpClientConfig, TcpClientError,
};
use latchkey_protocol::{JsonCodec, Operation, Response};
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::codec::Framed;

async fn loopback_listener() -> (TcpListener, SocketAddr) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    (listener, addr)
}

fn session_for(addr: SocketAddr, retry: RetryPolicy) -> SessionChannel {
    SessionChannel::new(
        TcpClientConfig::new(addr).with_timeout(Duration::from_millis(1000)),
        retry,
        DeviceId::from("abc"),
        DeviceKey::from("12345"),
    )
}

/// Read one request and return it as JSON.
async fn next_request(framed: &mut Framed<TcpStream, JsonCodec>) -> Value {
    let frame = framed.next().await.unwrap().unwrap();
    serde_json::from_slice(&frame).unwrap()
}

#[tokio::test]
async fn test_full_lifecycle_with_echo_server() {
    let (listener, addr) = loopback_listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        let request = next_request(&mut framed).await;
        framed.send(request).await.unwrap();
    });

    let mut client = TcpClient::new(TcpClientConfig::new(addr));
    client.connect().await.unwrap();
    assert!(client.is_connected());

    let request = json!({"type": "open_door", "device_id": "abc",
        "device_key": "12345", "pin": "123456"});
    client.send(&request).await.unwrap();

    let echoed: Value = serde_json::from_slice(&client.recv().await.unwrap()).unwrap();
    assert_eq!(echoed, request);

    client.close().await.unwrap();
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_recv_reports_server_close() {
    let (listener, addr) = loopback_listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        drop(stream);
    });

    let mut client = TcpClient::new(TcpClientConfig::new(addr));
    client.connect().await.unwrap();

    let result = client.recv().await;
    assert!(matches!(
        result,
        Err(TcpClientError::ConnectionLost(_)) | Err(TcpClientError::Io(_))
    ));
}

#[tokio::test]
async fn test_recv_response_timeout() {
    let (listener, addr) = loopback_listener().await;

    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let config = TcpClientConfig::new(addr).with_response_timeout(Duration::from_millis(100));
    let mut client = TcpClient::new(config);
    client.connect().await.unwrap();

    let result = client.recv().await;
    assert!(matches!(result, Err(TcpClientError::ReadTimeout(100))));
}

#[tokio::test]
async fn test_connect_refused() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let mut client = TcpClient::new(TcpClientConfig::new(addr));
    let result = client.connect().await;
    assert!(matches!(
        result,
        Err(TcpClientError::Io(_)) | Err(TcpClientError::ConnectionTimeout(_))
    ));
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_session_sends_credentials() {
    let (listener, addr) = loopback_listener().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        for _ in 0..2 {
            let request = next_request(&mut framed).await;
            seen_tx.send(request).unwrap();
            framed.send(Response::success()).await.unwrap();
        }
    });

    let mut session = session_for(addr, RetryPolicy::default());
    assert!(session.register().await);
    assert!(
        session
            .change_pin(Pin::from("123456"), Pin::from("654321"))
            .await
    );

    assert_eq!(
        seen_rx.recv().await.unwrap(),
        json!({"type": "register_device", "device_id": "abc", "device_key": "12345"})
    );
    assert_eq!(
        seen_rx.recv().await.unwrap(),
        json!({"type": "tenant_change_password", "device_id": "abc", "device_key": "12345",
            "current_pin": "123456", "new_pin": "654321"})
    );
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_session_returns_unlock_payload() {
    let (listener, addr) = loopback_listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        next_request(&mut framed).await;
        framed
            .send(json!({"success": 1, "flag": "<theflag>"}))
            .await
            .unwrap();
    });

    let mut session = session_for(addr, RetryPolicy::default());
    let response = session
        .call(Operation::OpenDoor {
            pin: Pin::from("123456"),
        })
        .await
        .unwrap();

    assert!(response.success);
    assert_eq!(response.unlock_payload.as_deref(), Some("<theflag>"));
}

#[tokio::test]
async fn test_session_denied_is_false() {
    let (listener, addr) = loopback_listener().await;

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        next_request(&mut framed).await;
        framed.send(Response::failure()).await.unwrap();
    });

    let mut session = session_for(addr, RetryPolicy::default());
    assert!(!session.open_door(Pin::from("000000")).await);
}

#[tokio::test]
async fn test_session_resends_after_connection_loss() {
    let (listener, addr) = loopback_listener().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        // First connection: read the request, then hang up without answering.
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        seen_tx.send(next_request(&mut framed).await).unwrap();
        drop(framed);

        // Second connection: answer normally.
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        seen_tx.send(next_request(&mut framed).await).unwrap();
        framed.send(Response::success()).await.unwrap();
    });

    let mut session = session_for(addr, RetryPolicy::default().with_max_attempts(5));
    assert!(session.open_door(Pin::from("123456")).await);

    let first = seen_rx.recv().await.unwrap();
    let second = seen_rx.recv().await.unwrap();
    assert_eq!(first, second);
    assert_eq!(first["type"], "open_door");
}

#[tokio::test]
async fn test_session_reconnects_once_server_appears() {
    let addr = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        let listener = TcpListener::bind(addr).await.unwrap();
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        next_request(&mut framed).await;
        framed.send(Response::success()).await.unwrap();
    });

    let retry = RetryPolicy::default()
        .with_backoff(Duration::from_millis(50))
        .with_max_attempts(100);
    let mut session = session_for(addr, retry);

    assert!(session.register().await);
    assert!(session.is_connected());
}

#[tokio::test]
async fn test_session_malformed_answer_is_anomaly() {
    let (listener, addr) = loopback_listener().await;
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel::<()>();

    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut framed = Framed::new(stream, JsonCodec::new());
        next_request(&mut framed).await;
        seen_tx.send(()).unwrap();
        let mut stream = framed.into_inner();
        stream.write_all(b"[1, 2, 3]").await.unwrap();
        // Keep the connection open so any resend would be observable.
        if let Ok((_second, _)) = listener.accept().await {
            seen_tx.send(()).unwrap();
        }
    });

    let mut session = session_for(addr, RetryPolicy::default());
    let result = session.call(Operation::Register).await;

    assert!(matches!(result, Err(SessionError::ProtocolAnomaly(_))));
    seen_rx.recv().await.unwrap();
    assert!(seen_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_session_oversized_answer_is_not_resent() {
    let (listener, addr) = loopback_listener().await;
    let requests = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&requests);

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let seen = Arc::clone(&seen);
            tokio::spawn(async move {
                let mut framed = Framed::new(stream, JsonCodec::new());
                while let Some(Ok(_)) = framed.next().await {
                    seen.fetch_add(1, Ordering::SeqCst);
                    let answer = format!(r#"{{"success":1,"flag":"{}"}}"#, "x".repeat(70_000));
                    if framed.get_mut().write_all(answer.as_bytes()).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let mut session = session_for(addr, RetryPolicy::default().with_max_attempts(5));
    let result = session
        .call(Operation::ChangePinMaster {
            master_pin: Pin::from("12345678"),
            new_pin: Pin::from("654321"),
        })
        .await;

    assert!(matches!(result, Err(SessionError::ProtocolAnomaly(_))));
    assert_eq!(requests.load(Ordering::SeqCst), 1);
    assert!(!session.is_connected());
}
