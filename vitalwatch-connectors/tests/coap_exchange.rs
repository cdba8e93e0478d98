//! CoAP exchanges over real loopback sockets

#![cfg(feature = "coap")]

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use vitalwatch_connectors::coap::{
    handle_request, CoapConfig, CoapError, CoapMessage, CoapRequestTransport, Code, MessageType,
    Observers, ResourceServer, MAX_DATAGRAM, OBSERVE_DEREGISTER, OBSERVE_REGISTER,
};
use vitalwatch_core::transport::StatusCode;
use vitalwatch_core::{Channel, ChannelTable, MonitorObserver, ResourceTable, Sample};

/// Collector socket on loopback; `script` runs on its own thread
fn collector<F>(script: F) -> (SocketAddr, thread::JoinHandle<()>)
where
    F: FnOnce(UdpSocket) + Send + 'static,
{
    let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    socket.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    let address = socket.local_addr().unwrap();
    (address, thread::spawn(move || script(socket)))
}

fn receive(socket: &UdpSocket) -> (CoapMessage, SocketAddr) {
    let mut buffer = [0u8; MAX_DATAGRAM];
    let (n, peer) = socket.recv_from(&mut buffer).unwrap();
    (CoapMessage::parse(&buffer[..n]).unwrap(), peer)
}

fn client(collector: SocketAddr) -> CoapRequestTransport {
    CoapRequestTransport::new(CoapConfig::new(collector).ack_timeout(Duration::from_millis(200))).unwrap()
}

#[test]
fn test_registration_piggybacked_response() {
    let (address, handle) = collector(|socket| {
        let (request, peer) = receive(&socket);
        assert_eq!(request.get_type(), MessageType::Confirmable);
        assert_eq!(request.code(), Code::Post);
        assert_eq!(request.uri_path(), "registeredMonitors");
        let body: serde_json::Value = serde_json::from_slice(request.get_payload()).unwrap();
        assert_eq!(body["registration"], true);

        let mut reply = CoapMessage::new();
        reply.set_type(MessageType::Acknowledgment);
        reply.set_code(Code::Response(StatusCode::CREATED));
        reply.set_message_id(request.get_message_id());
        reply.set_token(request.token().to_vec());
        socket.send_to(&reply.to_bytes().unwrap(), peer).unwrap();
    });

    let status = client(address)
        .post("/registeredMonitors", br#"{"monitorID":"127.0.0.1","registration":true}"#)
        .unwrap();
    assert_eq!(status, StatusCode::CREATED);
    handle.join().unwrap();
}

#[test]
fn test_registration_separate_response_is_acknowledged() {
    let (address, handle) = collector(|socket| {
        let (request, peer) = receive(&socket);
        let ack = CoapMessage::empty_ack(request.get_message_id());
        socket.send_to(&ack.to_bytes().unwrap(), peer).unwrap();

        let mut response = CoapMessage::new();
        response.set_type(MessageType::Confirmable);
        response.set_code(Code::Response(StatusCode::CREATED));
        response.set_message_id(request.get_message_id().wrapping_add(100));
        response.set_token(request.token().to_vec());
        socket.send_to(&response.to_bytes().unwrap(), peer).unwrap();

        let (ack, _) = receive(&socket);
        assert_eq!(ack.get_type(), MessageType::Acknowledgment);
        assert_eq!(ack.code(), Code::Empty);
        assert_eq!(ack.get_message_id(), request.get_message_id().wrapping_add(100));
    });

    assert_eq!(client(address).post("/registeredMonitors", b"{}").unwrap(), StatusCode::CREATED);
    handle.join().unwrap();
}

#[test]
fn test_silent_collector_exhausts_retransmissions() {
    let (address, handle) = collector(|socket| {
        // Swallow the first transmission and the single retransmission
        receive(&socket);
        receive(&socket);
    });

    let mut transport = CoapRequestTransport::new(
        CoapConfig::new(address).ack_timeout(Duration::from_millis(50)).max_retransmit(1),
    )
    .unwrap();
    assert!(matches!(transport.post("/registeredMonitors", b"{}"), Err(CoapError::MaxRetransmissions)));
    handle.join().unwrap();
}

#[test]
fn test_request_timeout_caps_retransmissions() {
    // Bound but never read: every transmission goes unanswered
    let silent = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
    let config = CoapConfig::new(silent.local_addr().unwrap())
        .ack_timeout(Duration::from_millis(50))
        .max_retransmit(4)
        .request_timeout(Duration::from_millis(150));
    assert_eq!(config.retransmission_span(), Duration::from_millis(1_550));

    let started = Instant::now();
    let outcome = CoapRequestTransport::new(config).unwrap().post("/registeredMonitors", b"{}");
    assert!(matches!(outcome, Err(CoapError::Timeout)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test]
async fn test_resource_server_answers_get() {
    let server = ResourceServer::bind((Ipv4Addr::LOCALHOST, 0).into()).await.unwrap();
    let table = ResourceTable::from_channels(&ChannelTable::default());

    let peer = tokio::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    let mut request = CoapMessage::new();
    request.set_type(MessageType::Confirmable);
    request.set_code(Code::Get);
    request.set_message_id(42);
    request.set_token(vec![1, 2]);
    request.add_uri_path("registeredPatient");
    peer.send_to(&request.to_bytes().unwrap(), server.local_addr().unwrap()).await.unwrap();

    let mut buffer = [0u8; MAX_DATAGRAM];
    let (n, from) = server.receive(&mut buffer).await.unwrap();
    let (response, event) = handle_request(&table, &mut Observers::new(), from, &buffer[..n]).unwrap();
    assert!(event.is_none());
    server.reply(&response, from).await.unwrap();

    let n = tokio::time::timeout(Duration::from_secs(5), peer.recv(&mut buffer)).await.unwrap().unwrap();
    let reply = CoapMessage::parse(&buffer[..n]).unwrap();
    assert_eq!(reply.get_message_id(), 42);
    assert_eq!(reply.code(), Code::Response(StatusCode::CONTENT));
}

async fn observe(peer: &tokio::net::UdpSocket, server: SocketAddr, message_id: u16, observe: u32) {
    let mut request = CoapMessage::new();
    request.set_type(MessageType::Confirmable);
    request.set_code(Code::Get);
    request.set_message_id(message_id);
    request.set_token(vec![7, 7]);
    request.add_uri_path("patientState/heartRate");
    request.set_observe(observe);
    peer.send_to(&request.to_bytes().unwrap(), server).await.unwrap();
}

async fn next_message(peer: &tokio::net::UdpSocket) -> CoapMessage {
    let mut buffer = [0u8; MAX_DATAGRAM];
    let n = tokio::time::timeout(Duration::from_secs(5), peer.recv(&mut buffer)).await.unwrap().unwrap();
    CoapMessage::parse(&buffer[..n]).unwrap()
}

#[tokio::test]
async fn test_observer_notified_of_new_sample() {
    let server = ResourceServer::bind((Ipv4Addr::LOCALHOST, 0).into()).await.unwrap();
    let address = server.local_addr().unwrap();
    let mut table = ResourceTable::from_channels(&ChannelTable::default());
    let mut observers = Observers::new();
    let mut buffer = [0u8; MAX_DATAGRAM];

    let peer = tokio::net::UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
    observe(&peer, address, 1, OBSERVE_REGISTER).await;
    let (n, from) = server.receive(&mut buffer).await.unwrap();
    let (response, _) = handle_request(&table, &mut observers, from, &buffer[..n]).unwrap();
    server.reply(&response, from).await.unwrap();

    let registered = next_message(&peer).await;
    assert_eq!(registered.code(), Code::Response(StatusCode::CONTENT));
    assert_eq!(registered.observe(), Some(0));

    // One sample taken: the changed resource goes out to its observer
    table.on_sample(&Sample { channel: Channel::HeartRate, value: 88, timestamp: 6_000 });
    for path in table.take_changes() {
        for (notification, to) in observers.notifications(&table, path) {
            server.reply(&notification, to).await.unwrap();
        }
    }

    let notification = next_message(&peer).await;
    assert_eq!(notification.get_type(), MessageType::NonConfirmable);
    assert_eq!(notification.code(), Code::Response(StatusCode::CONTENT));
    assert_eq!(notification.token(), &[7, 7]);
    assert_eq!(notification.observe(), Some(1));
    let body: serde_json::Value = serde_json::from_slice(notification.get_payload()).unwrap();
    assert_eq!(body["heartRate"], 88);
    assert_eq!(body["timestamp"], 6);

    observe(&peer, address, 2, OBSERVE_DEREGISTER).await;
    let (n, from) = server.receive(&mut buffer).await.unwrap();
    let (response, _) = handle_request(&table, &mut observers, from, &buffer[..n]).unwrap();
    server.reply(&response, from).await.unwrap();
    assert_eq!(next_message(&peer).await.observe(), None);
    assert!(observers.is_empty());
}
