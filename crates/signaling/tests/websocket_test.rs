//! End-to-end test over a real WebSocket connection

mod harness;

use futures::{SinkExt, StreamExt};
use harness::*;
use room_signaling::protocol::{
    self, LeaveRequest, ParticipantUpdate, SignalRequest, SignalResponse,
};
use room_signaling::{DisconnectReason, SessionEvent, SessionHandle, SignalingConfig};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

fn text(response: &SignalResponse) -> Message {
    let frame = protocol::encode_response(response).unwrap();
    Message::Text(String::from_utf8(frame).unwrap())
}

#[tokio::test]
async fn test_websocket_session() {
    init_test_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let join = match ws.next().await {
            Some(Ok(Message::Text(body))) => protocol::decode_request(body.as_bytes()).unwrap(),
            other => panic!("expected join, got {:?}", other),
        };
        assert!(matches!(join, SignalRequest::Join(_)));

        ws.send(text(&SignalResponse::Join(join_response(vec![]))))
            .await
            .unwrap();
        ws.send(text(&SignalResponse::Update(ParticipantUpdate {
            participants: vec![participant("PA_bob", "bob", 1)],
        })))
        .await
        .unwrap();

        let mut requests = Vec::new();
        while let Some(Ok(message)) = ws.next().await {
            match message {
                Message::Text(body) => {
                    requests.push(protocol::decode_request(body.as_bytes()).unwrap())
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
        requests
    });

    let config = SignalingConfig::new(&format!("ws://{}", addr), TOKEN, ROOM);
    let session = SessionHandle::connect(config, FakePeer::new()).await.unwrap();
    let mut events = session.events();

    match next_event(&mut events).await {
        SessionEvent::ParticipantJoined(p) => assert_eq!(p.identity, "bob"),
        other => panic!("unexpected event {:?}", other),
    }

    session.close().await.unwrap();

    let requests = tokio::time::timeout(WAIT, server)
        .await
        .expect("server did not finish")
        .unwrap();
    assert_eq!(
        requests,
        vec![SignalRequest::Leave(LeaveRequest {
            can_reconnect: false,
            reason: DisconnectReason::ClientInitiated,
        })]
    );
}

#[tokio::test]
async fn test_websocket_connection_refused() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = SignalingConfig::new(&format!("ws://{}", addr), TOKEN, ROOM);
    config.reconnect.max_attempts = 0;

    let result = SessionHandle::connect(config, FakePeer::new()).await;
    assert!(matches!(result, Err(room_signaling::Error::Connect(_))));
}
