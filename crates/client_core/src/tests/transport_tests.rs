use super::*;
use serde_json::{json, Value};
use shared::domain::ChatStatus;
use tokio::net::TcpListener;

fn ack_frame(request_id: u64, result: &str) -> Message {
    Message::Text(
        json!({
            "type": "ack",
            "payload": { "requestId": request_id, "result": { "result": result } }
        })
        .to_string(),
    )
}

fn status_event_frame(participant_id: i64) -> Message {
    Message::Text(
        json!({
            "type": "event",
            "payload": {
                "type": "status",
                "payload": { "participant_id": participant_id, "status": "typing" }
            }
        })
        .to_string(),
    )
}

fn request_id_of(text: &str) -> u64 {
    let envelope: Value = serde_json::from_str(text).expect("request envelope");
    envelope["requestId"].as_u64().expect("requestId")
}

/// Accepts one connection and acks every request with `"ok"`.
async fn spawn_ok_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        let (mut writer, mut reader) = ws.split();
        while let Some(Ok(Message::Text(text))) = reader.next().await {
            let request_id = request_id_of(&text);
            writer.send(ack_frame(request_id, "ok")).await.expect("ack");
        }
    });
    format!("ws://{addr}")
}

#[tokio::test]
async fn request_receives_the_correlated_ack() {
    let url = spawn_ok_server().await;
    let transport = WsTransport::connect(&url).await.expect("connect");

    let ack = transport
        .request(ClientRequest::SetStatus {
            status: ChatStatus::Typing,
            target: None,
        })
        .await
        .expect("ack");
    assert!(ack.is_ok());
}

#[tokio::test]
async fn concurrent_requests_correlate_even_when_acked_out_of_order() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        let (mut writer, mut reader) = ws.split();

        let mut ids = Vec::new();
        while ids.len() < 2 {
            if let Some(Ok(Message::Text(text))) = reader.next().await {
                ids.push(request_id_of(&text));
            }
        }
        // Ack in reverse arrival order; correlation must still hold.
        for id in ids.iter().rev() {
            writer
                .send(ack_frame(*id, &format!("req-{id}")))
                .await
                .expect("ack");
        }
    });

    let transport = WsTransport::connect(&format!("ws://{addr}"))
        .await
        .expect("connect");
    let first = transport.request(ClientRequest::SetStatus {
        status: ChatStatus::Typing,
        target: None,
    });
    let second = transport.request(ClientRequest::SetStatus {
        status: ChatStatus::None,
        target: None,
    });

    let (first, second) = tokio::join!(first, second);
    assert_eq!(first.expect("first ack").result, "req-1");
    assert_eq!(second.expect("second ack").result, "req-2");
}

#[tokio::test]
async fn pushed_events_reach_subscribers() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.expect("accept");
        let ws = tokio_tungstenite::accept_async(stream)
            .await
            .expect("handshake");
        let (mut writer, mut reader) = ws.split();
        // Push only after the client speaks, so the subscription below is
        // guaranteed to be in place.
        if let Some(Ok(Message::Text(_))) = reader.next().await {
            writer
                .send(status_event_frame(3))
                .await
                .expect("push event");
        }
    });

    let transport = WsTransport::connect(&format!("ws://{addr}"))
        .await
        .expect("connect");
    let mut events = transport.subscribe_server_events();

    transport
        .send(ClientRequest::SetStatus {
            status: ChatStatus::Typing,
            target: None,
        })
        .await
        .expect("send");

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .expect("event before timeout")
        .expect("event");
    match event {
        ServerEvent::Status {
            participant_id,
            status,
        } => {
            assert_eq!(participant_id.0, 3);
            assert_eq!(status, ChatStatus::Typing);
        }
        other => panic!("unexpected event: {other:?}"),
    }
}

#[test]
fn converts_http_schemes_to_websocket_schemes() {
    assert_eq!(
        ws_url_from_server_url("https://chat.example/ws").expect("wss"),
        "wss://chat.example/ws"
    );
    assert_eq!(
        ws_url_from_server_url("http://localhost:8080/ws").expect("ws"),
        "ws://localhost:8080/ws"
    );
    assert_eq!(
        ws_url_from_server_url("ws://localhost:8080/ws").expect("passthrough"),
        "ws://localhost:8080/ws"
    );
    assert!(ws_url_from_server_url("ftp://nope").is_err());
}
