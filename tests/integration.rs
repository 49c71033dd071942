//! Integration tests for netio

use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;

use netio::digest::{HashAlgorithm, Hasher};
use netio::endpoint::{Endpoint, EndpointConfig, EndpointState, Role, Transport};
use netio::framing::FrameBoundary;
use netio::runner::{Payload, RunConfig, Runner};
use netio::EndpointError;

const TEST_TIMEOUT: Duration = Duration::from_secs(20);

fn md5_of(data: &[u8]) -> String {
    let mut hasher = Hasher::new(HashAlgorithm::Md5);
    hasher.update(data);
    hasher.finalize_reset()
}

async fn started_server() -> Endpoint {
    let mut server = Endpoint::new(
        Role::Server,
        "127.0.0.1:0".parse().unwrap(),
        &EndpointConfig::default(),
    )
    .unwrap();
    server.start().await.unwrap();
    server
}

fn server_config() -> RunConfig {
    let mut config = RunConfig::new(Role::Server, "127.0.0.1:0".parse().unwrap());
    config.loop_timeout = Duration::from_millis(500);
    config
}

fn client_config(port: u16) -> RunConfig {
    let mut config = RunConfig::new(Role::Client, format!("127.0.0.1:{}", port).parse().unwrap());
    config.loop_sleep = Some(Duration::ZERO);
    config
}

fn write_file(dir: &Path, name: &str, content: &[u8]) -> std::path::PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, content).unwrap();
    path
}

#[tokio::test]
async fn test_tcp_round_trip() {
    let mut server = started_server().await;
    let port = server.local_addr().unwrap().port();

    let mut client = Endpoint::new(
        Role::Client,
        format!("127.0.0.1:{}", port).parse().unwrap(),
        &EndpointConfig::default(),
    )
    .unwrap();
    client.start().await.unwrap();

    let (accepted, dialed) = tokio::join!(server.get_connection(), client.get_connection());
    let mut accepted = accepted.unwrap();
    let mut dialed = dialed.unwrap();

    dialed.write_all(b"ping").await.unwrap();
    let mut buf = [0u8; 4];
    accepted.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"ping");

    accepted.write_all(b"pong").await.unwrap();
    dialed.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"pong");

    dialed.close().await.unwrap();
    dialed.close().await.unwrap();
    assert_eq!(accepted.read(&mut buf).await.unwrap(), 0);

    server.stop().await.unwrap();
    client.stop().await.unwrap();
}

#[tokio::test]
async fn test_endpoint_lifecycle() {
    let mut server = Endpoint::new(
        Role::Server,
        "127.0.0.1:0".parse().unwrap(),
        &EndpointConfig::default(),
    )
    .unwrap();

    assert!(matches!(
        server.get_connection().await,
        Err(EndpointError::NotStarted)
    ));

    // Stop before start is a no-op
    server.stop().await.unwrap();
    assert_eq!(server.state(), EndpointState::Uninitialized);

    server.start().await.unwrap();
    assert_eq!(server.state(), EndpointState::Started);

    server.stop().await.unwrap();
    server.stop().await.unwrap();
    assert_eq!(server.state(), EndpointState::Stopped);
    assert!(matches!(
        server.get_connection().await,
        Err(EndpointError::Stopped)
    ));
    assert!(server.start().await.is_err());
}

#[tokio::test]
async fn test_connection_refused() {
    // Grab a free port and release it again
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };

    let mut client = Endpoint::new(
        Role::Client,
        format!("127.0.0.1:{}", port).parse().unwrap(),
        &EndpointConfig::default(),
    )
    .unwrap();
    client.start().await.unwrap();

    let err = client.get_connection().await.unwrap_err();
    assert!(matches!(err, EndpointError::Connect { .. }), "{}", err);
}

#[tokio::test]
async fn test_file_transfer_verified() {
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    let input = write_file(dir.path(), "input.bin", &content);
    let output = dir.path().join("output.bin");

    let mut server = server_config();
    server.files = vec![output.clone()];
    server.expected = vec![md5_of(&content).to_uppercase()];
    let server = Runner::start(server).await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.files = vec![input];

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    let server_summary = server_summary.unwrap();
    let client_summary = client_summary.unwrap();

    assert!(server_summary.is_success());
    assert_eq!(server_summary.verification.correct, 1);
    assert_eq!(server_summary.transfers[0].bytes, content.len() as u64);
    assert_eq!(client_summary.transfers[0].bytes, content.len() as u64);
    assert_eq!(
        client_summary.transfers[0].digest,
        server_summary.transfers[0].digest
    );
    assert_eq!(std::fs::read(&output).unwrap(), content);
}

#[tokio::test]
async fn test_digest_mismatch_reported() {
    let mut server = server_config();
    server.expected = vec!["00000000000000000000000000000000".to_string()];
    let server = Runner::start(server).await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.text = Some("hello netio".to_string());

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    let server_summary = server_summary.unwrap();
    assert!(client_summary.unwrap().is_success());
    assert!(!server_summary.is_success());
    assert_eq!(server_summary.verification.errors, 1);
    assert_eq!(server_summary.transfers[0].digest, md5_of(b"hello netio"));
}

#[tokio::test]
async fn test_server_sends_to_receiving_client() {
    let mut server = server_config();
    server.data_sender = true;
    server.text = Some("served text".to_string());
    let server = Runner::start(server).await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.data_receiver = true;
    client.loop_timeout = Duration::from_millis(500);
    client.expected = vec![md5_of(b"served text")];

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    server_summary.unwrap();
    let client_summary = client_summary.unwrap();
    assert!(client_summary.is_success());
    assert_eq!(client_summary.verification.correct, 1);
    assert_eq!(client_summary.transfers[0].bytes, 11);
}

#[tokio::test]
async fn test_length_bounds_generated_payload() {
    let server = Runner::start(server_config()).await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.payload = Payload::Zero;
    client.length = 64 * 1024;
    client.loop_timeout = Duration::from_secs(10);

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    assert_eq!(client_summary.unwrap().transfers[0].bytes, 64 * 1024);
    let server_summary = server_summary.unwrap();
    assert_eq!(server_summary.transfers[0].bytes, 64 * 1024);
    assert_eq!(
        server_summary.transfers[0].digest,
        md5_of(&vec![0u8; 64 * 1024])
    );
}

#[tokio::test]
async fn test_hl7_messages_stored() {
    let dir = tempfile::tempdir().unwrap();
    let inbox = dir.path().join("inbox");
    std::fs::create_dir(&inbox).unwrap();
    let first = write_file(dir.path(), "a.hl7", b"MSH|^~\\&|first\rPID|1");
    let second = write_file(dir.path(), "b.hl7", b"MSH|^~\\&|second\rPID|2");

    let mut server = server_config();
    server.framing = Some(FrameBoundary::hl7());
    server.files = vec![inbox.clone()];
    let server = Runner::start(server).await.unwrap();
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.framing = Some(FrameBoundary::hl7());
    client.files = vec![first, second];

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    let client_summary = client_summary.unwrap();
    let server_summary = server_summary.unwrap();
    assert_eq!(client_summary.transfers[0].messages, Some(2));
    assert_eq!(server_summary.transfers[0].messages, Some(2));
    assert_eq!(
        client_summary.transfers[0].digest,
        server_summary.transfers[0].digest
    );

    let mut stored: Vec<Vec<u8>> = std::fs::read_dir(&inbox)
        .unwrap()
        .map(|entry| {
            let path = entry.unwrap().path();
            assert_eq!(path.extension().unwrap(), "msg");
            std::fs::read(path).unwrap()
        })
        .collect();
    stored.sort();
    assert_eq!(
        stored,
        vec![
            b"MSH|^~\\&|first\rPID|1".to_vec(),
            b"MSH|^~\\&|second\rPID|2".to_vec()
        ]
    );
}

#[tokio::test]
async fn test_multiple_loops() {
    let dir = tempfile::tempdir().unwrap();
    let files = vec![
        write_file(dir.path(), "one.txt", b"one"),
        write_file(dir.path(), "two.txt", b"two"),
        write_file(dir.path(), "three.txt", b"three"),
    ];

    let mut server = server_config();
    server.loop_count = 0;
    server.expected = vec![md5_of(b"one"), md5_of(b"two"), md5_of(b"three")];
    let server = Runner::start(server).await.unwrap();
    let port = server.local_addr().unwrap().port();
    assert_eq!(server.config().loop_count, 3);

    let mut client = client_config(port);
    client.loop_count = 0;
    client.files = files;

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    assert_eq!(client_summary.unwrap().loops, 3);
    let server_summary = server_summary.unwrap();
    assert_eq!(server_summary.loops, 3);
    assert_eq!(server_summary.verification.runs, 3);
    assert_eq!(server_summary.verification.correct, 3);
}

#[tokio::test]
async fn test_throttled_receiver_outlasts_loop_timeout() {
    // A full 32K buffer at 20,000 B/s pauses well past the 500 ms timeout
    let dir = tempfile::tempdir().unwrap();
    let content: Vec<u8> = (0..60_000u32).map(|i| (i % 199) as u8).collect();
    let input = write_file(dir.path(), "throttled.bin", &content);

    let mut server = server_config();
    server.rate = 20_000;
    server.expected = vec![md5_of(&content)];
    let server = Runner::start(server).await.unwrap();
    assert_eq!(server.config().buffer_size, 32 * 1024);
    let port = server.local_addr().unwrap().port();

    let mut client = client_config(port);
    client.files = vec![input];

    let (server_summary, client_summary) = timeout(TEST_TIMEOUT, async {
        tokio::join!(server.run(), async {
            Runner::start(client).await?.run().await
        })
    })
    .await
    .expect("transfer should finish");

    assert_eq!(client_summary.unwrap().transfers[0].bytes, 60_000);
    let server_summary = server_summary.unwrap();
    assert!(server_summary.is_success());
    assert_eq!(server_summary.transfers[0].bytes, 60_000);
    assert_eq!(server_summary.verification.correct, 1);
}
