use robolink_core::link::{
    ChannelSink, LinkConfig, LinkSession, LinkState, SessionEvent, TcpConnector,
};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn next_event(rx: &mut tokio::sync::mpsc::UnboundedReceiver<SessionEvent>) -> SessionEvent {
    timeout(WAIT, rx.recv())
        .await
        .expect("event within timeout")
        .expect("session still alive")
}

#[tokio::test]
async fn test_drive_over_tcp_until_robot_hangs_up() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let robot = thread::spawn(move || {
        let (sock, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(sock.try_clone().unwrap());
        let mut writer = sock;
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        writer.write_all(b"0\r\n5\r\n").unwrap();
        line
        // Socket dropped here, the session sees EOF
    });

    let session = LinkSession::new(TcpConnector::default(), LinkConfig::default()).unwrap();
    let (sink, mut events) = ChannelSink::new();
    session.set_sink(&sink);
    session.connect(&addr).unwrap();

    assert_eq!(next_event(&mut events).await, SessionEvent::Connected);
    assert!(session.write("s,30,30"));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::WriteEcho("s,30,30".into())
    );
    assert_eq!(next_event(&mut events).await, SessionEvent::Read("5".into()));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Cancel("Connection lost".into())
    );

    assert_eq!(robot.join().unwrap(), "s,30,30\n");
    assert_eq!(session.state(), LinkState::Idle);
    assert!(!session.write("r"));
}

#[tokio::test]
async fn test_unreachable_endpoint_cancels() {
    // Bind then drop to get a port nobody listens on
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().to_string()
    };

    let session = LinkSession::new(TcpConnector::default(), LinkConfig::default()).unwrap();
    let (sink, mut events) = ChannelSink::new();
    session.set_sink(&sink);
    session.connect(&addr).unwrap();

    match next_event(&mut events).await {
        SessionEvent::Cancel(reason) => assert!(reason.starts_with("Unable to connect")),
        other => panic!("unexpected event {:?}", other),
    }
    assert_eq!(session.state(), LinkState::Idle);
}
