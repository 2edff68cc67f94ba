use bytes::Bytes;
use cam_motion_streamer::service::{self, ServiceEvent};
use cam_motion_streamer::transport::{OutboundMessage, WsServer};
use crossbeam_channel::Receiver;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;

async fn next_event(rx: Receiver<ServiceEvent>) -> (Receiver<ServiceEvent>, ServiceEvent) {
    tokio::task::spawn_blocking(move || {
        let event = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("service event");
        (rx, event)
    })
    .await
    .unwrap()
}

#[tokio::test]
async fn test_viewer_receives_pushed_messages() {
    let (events, rx) = service::channel();
    let server = WsServer::bind("127.0.0.1:0", events, 4).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let (mut ws, _) = connect_async(format!("ws://{}", addr)).await.unwrap();

    let (rx, event) = next_event(rx).await;
    let ServiceEvent::Connected(handle) = event else {
        panic!("expected Connected, got {:?}", event);
    };

    let telemetry = r#"{"motion":false,"timestamp":1,"framesAnalyzed":0,"motionFrames":0}"#;
    handle
        .try_reserve()
        .unwrap()
        .send(OutboundMessage::Telemetry(telemetry.to_string()));
    handle
        .try_reserve()
        .unwrap()
        .send(OutboundMessage::Frame(Bytes::from_static(&[0xFF, 0xD8, 0xFF, 0xD9])));

    let msg = ws.next().await.unwrap().unwrap();
    assert_eq!(msg.into_text().unwrap().as_str(), telemetry);

    let msg = ws.next().await.unwrap().unwrap();
    assert!(msg.is_binary());
    assert_eq!(&msg.into_data()[..], &[0xFF, 0xD8, 0xFF, 0xD9]);

    ws.close(None).await.unwrap();
    let (_rx, event) = next_event(rx).await;
    assert!(matches!(event, ServiceEvent::Closed(id) if id == handle.id()));
}

#[tokio::test]
async fn test_second_viewer_is_rejected() {
    let (events, rx) = service::channel();
    let server = WsServer::bind("127.0.0.1:0", events, 4).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());

    let (mut first, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (rx, event) = next_event(rx).await;
    let ServiceEvent::Connected(active) = event else {
        panic!("expected Connected, got {:?}", event);
    };

    let (mut second, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    match second.next().await {
        Some(Ok(Message::Close(Some(frame)))) => assert_eq!(frame.code, CloseCode::Again),
        other => panic!("expected close frame, got {:?}", other),
    }

    // the active viewer is untouched
    assert!(rx.try_recv().is_err());
    assert!(!active.is_closed());

    first.close(None).await.unwrap();
    let (rx, event) = next_event(rx).await;
    assert!(matches!(event, ServiceEvent::Closed(id) if id == active.id()));

    // the slot is free again
    let (_third, _) = connect_async(format!("ws://{}", addr)).await.unwrap();
    let (_rx, event) = next_event(rx).await;
    assert!(matches!(event, ServiceEvent::Connected(_)));
}
