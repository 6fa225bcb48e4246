//! End-to-end session tests against a loopback TCP fixture standing in for
//! a MUD server.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::time::Instant;

use mudgate::session::{MudSession, Phase, SessionError, SessionTiming};

fn quick_timing() -> SessionTiming {
    SessionTiming {
        connect_timeout: Duration::from_secs(1),
        greeting_settle: Duration::from_millis(150),
        send_settle: Duration::from_millis(100),
    }
}

async fn bind() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let port = listener.local_addr().expect("addr").port();
    (listener, port)
}

#[tokio::test]
async fn greeting_is_collected_and_cleaned() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        socket
            .write_all(&[0xFF, 0xFB, 0x01])
            .await
            .expect("write iac");
        tokio::time::sleep(Duration::from_millis(20)).await;
        socket
            .write_all(b"Welcome to \x1b[31mGodWars\x1b[0m\r\n")
            .await
            .expect("write banner");
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let session = MudSession::new(quick_timing());
    let greeting = session.connect("127.0.0.1", port).await.expect("connect");
    assert_eq!(greeting, "Welcome to GodWars\n");
    assert_eq!(session.phase(), Phase::Connected);
}

#[tokio::test]
async fn send_command_returns_settled_response() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.expect("accept");
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let reply = format!("You {line} around.\r\n");
            if write_half.write_all(reply.as_bytes()).await.is_err() {
                break;
            }
        }
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");
    let response = session.send_command("look").await.expect("send");
    assert_eq!(response, "You look around.\n");
}

#[tokio::test]
async fn read_times_out_with_empty_result_when_quiet() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");

    let started = Instant::now();
    let text = session
        .read_output(Duration::from_millis(300))
        .await
        .expect("read");
    let elapsed = started.elapsed();
    assert_eq!(text, "");
    assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
}

#[tokio::test]
async fn read_wakes_early_when_data_arrives() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        // Past the greeting window, mid-poll.
        tokio::time::sleep(Duration::from_millis(400)).await;
        socket
            .write_all(b"A goblin attacks!\r\n")
            .await
            .expect("write");
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");

    let started = Instant::now();
    let text = session
        .read_output(Duration::from_secs(5))
        .await
        .expect("read");
    assert_eq!(text, "A goblin attacks!\n");
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn read_returns_immediately_when_unread_text_exists() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_millis(300)).await;
        socket.write_all(b"queued event\r\n").await.expect("write");
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");
    // Let the event land before reading.
    tokio::time::sleep(Duration::from_millis(400)).await;

    let started = Instant::now();
    let text = session
        .read_output(Duration::from_secs(5))
        .await
        .expect("read");
    assert_eq!(text, "queued event\n");
    assert!(started.elapsed() < Duration::from_millis(200));
}

#[tokio::test]
async fn disconnect_releases_a_pending_poll() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(3)).await;
    });

    let session = Arc::new(MudSession::new(quick_timing()));
    session.connect("127.0.0.1", port).await.expect("connect");

    let reader = Arc::clone(&session);
    let pending = tokio::spawn(async move { reader.read_output(Duration::from_secs(10)).await });

    tokio::time::sleep(Duration::from_millis(100)).await;
    session.disconnect().await.expect("disconnect");

    let result = tokio::time::timeout(Duration::from_secs(1), pending)
        .await
        .expect("poll released")
        .expect("join");
    assert_eq!(result.expect("read"), "");
    assert_eq!(session.phase(), Phase::Disconnected);
}

#[tokio::test]
async fn peer_close_flushes_decoder_and_finalizes_state() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        // Past the greeting window so the text is not drained as a greeting.
        tokio::time::sleep(Duration::from_millis(300)).await;
        // Trailing bytes are a dangling UTF-8 prefix and a truncated IAC.
        socket
            .write_all(b"bye\xe4\xb8")
            .await
            .expect("write tail");
        socket.write_all(&[0xFF]).await.expect("write iac");
        // Dropping the socket closes the stream.
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(session.phase(), Phase::Disconnected);
    assert_eq!(session.drain_now(), "bye\u{FFFD}");
    assert!(matches!(
        session.read_output(Duration::from_millis(50)).await,
        Err(SessionError::NotConnected)
    ));
}

#[tokio::test]
async fn byte_at_a_time_delivery_reassembles_cleanly() {
    let payload: &[u8] = b"\xff\xfb\x01h\xc3\xa9llo \xe4\xb8\x96\xe7\x95\x8c\r\n";
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_millis(300)).await;
        for &byte in payload {
            socket.write_all(&[byte]).await.expect("write byte");
            socket.flush().await.expect("flush");
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");

    let mut collected = String::new();
    for _ in 0..20 {
        collected.push_str(
            &session
                .read_output(Duration::from_millis(150))
                .await
                .expect("read"),
        );
        if collected == "héllo 世界\n" {
            break;
        }
    }
    assert_eq!(collected, "héllo 世界\n");
}

#[tokio::test]
async fn reconnect_starts_with_a_fresh_transcript() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let _ = socket.write_all(b"banner\r\n").await;
                tokio::time::sleep(Duration::from_secs(2)).await;
            });
        }
    });

    let session = MudSession::new(quick_timing());
    let first = session.connect("127.0.0.1", port).await.expect("connect");
    assert_eq!(first, "banner\n");
    session.disconnect().await.expect("disconnect");

    let second = session.connect("127.0.0.1", port).await.expect("reconnect");
    assert_eq!(second, "banner\n");
}

#[tokio::test]
async fn connect_twice_is_rejected() {
    let (listener, port) = bind().await;
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.expect("accept");
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let session = MudSession::new(quick_timing());
    session.connect("127.0.0.1", port).await.expect("connect");
    assert!(matches!(
        session.connect("127.0.0.1", port).await,
        Err(SessionError::AlreadyConnected)
    ));
}
