use std::net::SocketAddr;
use std::time::Duration;

use aiosock::{bind_datagram, DatagramChannel, ErrorKind, Family, SocketConfig};

fn loopback() -> Option<SocketAddr> {
    Some("127.0.0.1:0".parse().unwrap())
}

fn config() -> SocketConfig {
    let _ = env_logger::builder().is_test(true).try_init();
    SocketConfig::default().with_family(Family::V4)
}

/// Waits until the receive loop has dropped `n` datagrams.
async fn settle(channel: &DatagramChannel, n: u64) {
    for _ in 0..200 {
        if channel.overflow_count() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_datagrams_arrive_in_order() {
    let mut server = bind_datagram(loopback(), None, &config().with_queue_capacity(3))
        .await
        .unwrap();
    let target = server.local_address();
    let client = bind_datagram(None, Some(target), &config()).await.unwrap();

    for payload in [&b"D1"[..], &b"D2"[..], &b"D3"[..]] {
        client.send_to(payload, None).unwrap();
    }

    for expected in [&b"D1"[..], &b"D2"[..], &b"D3"[..]] {
        let (payload, source) = server
            .receive_with_timeout(Duration::from_secs(5))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(payload, expected);
        assert_eq!(source, client.local_address());
    }
}

#[tokio::test]
async fn test_reply_reaches_connected_client() {
    let mut server = bind_datagram(loopback(), None, &config()).await.unwrap();
    let mut client = bind_datagram(None, Some(server.local_address()), &config())
        .await
        .unwrap();

    client.send_to(b"ping", None).unwrap();
    let (payload, from) = server.receive().await.unwrap().unwrap();
    assert_eq!(payload, b"ping");

    server.send_to(b"pong", Some(from)).unwrap();
    let (reply, source) = client
        .receive_with_timeout(Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reply, b"pong");
    assert_eq!(Some(source), client.peer_address());
}

#[tokio::test]
async fn test_send_without_address_is_not_connected() {
    let channel = bind_datagram(loopback(), None, &config()).await.unwrap();
    let err = channel.send_to(b"nowhere", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_overflow_keeps_oldest() {
    let mut server = bind_datagram(loopback(), None, &config().with_queue_capacity(2))
        .await
        .unwrap();
    let client = bind_datagram(None, Some(server.local_address()), &config())
        .await
        .unwrap();

    for payload in [&b"1"[..], &b"2"[..], &b"3"[..], &b"4"[..]] {
        client.send_to(payload, None).unwrap();
    }
    settle(&server, 2).await;
    assert_eq!(server.overflow_count(), 2);

    let (first, _) = server.receive().await.unwrap().unwrap();
    let (second, _) = server.receive().await.unwrap().unwrap();
    assert_eq!((first.as_slice(), second.as_slice()), (&b"1"[..], &b"2"[..]));

    let err = server.check_overflow().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::QueueOverflow);
}

#[tokio::test]
async fn test_timeout_leaves_channel_usable() {
    let mut server = bind_datagram(loopback(), None, &config()).await.unwrap();
    let err = server
        .receive_with_timeout(Duration::from_millis(20))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Timeout);

    let client = bind_datagram(None, Some(server.local_address()), &config())
        .await
        .unwrap();
    client.send_to(b"after", None).unwrap();
    let (payload, _) = server.receive().await.unwrap().unwrap();
    assert_eq!(payload, b"after");
}

#[tokio::test]
async fn test_refused_peer_error_is_deferred() {
    // The probe is gone, so the kernel answers with ICMP port unreachable.
    let closed = {
        let probe = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        probe.local_addr().unwrap()
    };
    let mut client = bind_datagram(None, Some(closed), &config()).await.unwrap();
    client.send_to(b"anyone?", None).unwrap();

    let err = client
        .receive_with_timeout(Duration::from_secs(5))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transport);

    // Reported once; the latch is empty afterwards.
    let quiet = client.receive_with_timeout(Duration::from_millis(50)).await;
    assert_eq!(quiet.unwrap_err().kind(), ErrorKind::Timeout);
}

#[tokio::test]
async fn test_scope_closes_channel() {
    let server = bind_datagram(loopback(), None, &config()).await.unwrap();
    let target = server.local_address();

    let sent = server
        .scope(async |channel: &mut DatagramChannel| -> aiosock::Result<usize> {
            channel.send_to(b"self", Some(target))?;
            let (payload, _) = channel.receive().await?.ok_or(aiosock::Error::Closed)?;
            Ok(payload.len())
        })
        .await
        .unwrap();
    assert_eq!(sent, 4);
}

#[tokio::test]
async fn test_dual_stack_accepts_v4_peer() {
    let dual = SocketConfig::default().with_family(Family::Dual);
    let Ok(mut server) = bind_datagram(Some("[::]:0".parse().unwrap()), None, &dual).await else {
        // Host without IPv6.
        return;
    };
    let port = server.local_address().port();
    let v4_target: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
    let client = bind_datagram(None, Some(v4_target), &config()).await.unwrap();

    client.send_to(b"v4 over dual", None).unwrap();
    let (payload, source) = server
        .receive_with_timeout(Duration::from_secs(5))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(payload, b"v4 over dual");
    assert_eq!(aiosock::address::unmap(source), client.local_address());
}
