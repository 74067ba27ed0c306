//! Integration tests exercising the full stack (transport -> `HeartbeatConn`
//! -> `StreamConn`) rather than a single module in isolation.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dataconn::error::{DataconnError, ReadStreamErrorKind};
use dataconn::frame;
use dataconn::streamcopier::{SinkWriter, StreamCopier};
use dataconn::{ClientIdentity, HeartbeatConnConfig, StreamConn};
use dataconn::transport::local::{LocalConnecter, LocalListener};
use dataconn::transport::tcp::{TcpConnecter, TcpListenerFactory};
use dataconn::transport::{AuthenticatedListener, AuthenticatedListenerFactory, Connecter, Wire};
use dataconn_core::pipe::pipe;

fn fast_heartbeat_config() -> HeartbeatConnConfig {
    HeartbeatConnConfig {
        send_interval: Duration::from_secs(3600),
        peer_timeout: Duration::from_secs(10),
        write_timeout: Some(Duration::from_secs(5)),
        max_frame_length: frame::DEFAULT_MAX_FRAME_LENGTH,
    }
}

async fn tcp_stream_conns() -> (StreamConn<compio::net::TcpStream, compio::net::TcpStream>, StreamConn<compio::net::TcpStream, compio::net::TcpStream>) {
    let factory = TcpListenerFactory {
        addr: "127.0.0.1:0".parse().unwrap(),
    };
    let listener = factory.listen().await.unwrap();
    let addr = listener.addr().parse().unwrap();
    let connecter = TcpConnecter {
        addr,
        client_identity: ClientIdentity::parse("integration-client").unwrap(),
    };

    let (accepted, connected) = futures::join!(listener.accept(), connecter.connect());
    let server_wire = accepted.unwrap().into_parts().0;
    let client_wire = connected.unwrap();

    let (sr, sw) = server_wire.into_split();
    let (cr, cw) = client_wire.into_split();
    (
        StreamConn::new(cr, cw, fast_heartbeat_config()),
        StreamConn::new(sr, sw, fast_heartbeat_config()),
    )
}

/// Scenario 1: clean message round-trip over a real TCP socket, through the
/// identity handshake, heartbeat framing, and stream layer.
#[compio::test]
async fn clean_message_round_trips_over_tcp() {
    let (client, server) = tcp_stream_conns().await;
    client
        .write_message(frame::PUBLIC_FRAME_TYPE_MIN, Bytes::from_static(b"zfs send payload"))
        .await
        .unwrap();
    let received = server.read_message(4096, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap();
    assert_eq!(&received[..], b"zfs send payload");
    assert!(client.is_write_clean().await);
    assert!(server.is_read_clean().await);
}

struct PrefixThenFail {
    prefix: Vec<u8>,
    sent: bool,
}

#[async_trait]
impl StreamCopier for PrefixThenFail {
    async fn write_stream_to(&mut self, sink: &mut (dyn SinkWriter + Send)) -> Result<(), dataconn::error::StreamCopierError> {
        if !self.sent {
            sink.write_chunk(Bytes::from(self.prefix.clone())).await?;
            self.sent = true;
        }
        Err(dataconn::error::StreamCopierError::read_error("disk read failed"))
    }
}

/// Scenario 2: the sender's data source fails partway through; the receiver
/// must see the bytes sent so far, a `Source`-kind error, and a still-clean
/// read direction usable for a subsequent operation.
#[compio::test]
async fn source_declared_error_leaves_read_direction_clean() {
    let (client, server) = tcp_stream_conns().await;

    let copier = PrefixThenFail {
        prefix: b"abc".to_vec(),
        sent: false,
    };
    let (mut pipe_writer, mut pipe_reader) = pipe(8);

    let send = client.send_stream(frame::PUBLIC_FRAME_TYPE_MIN, copier);
    let recv = server.read_stream_into(&mut pipe_writer, frame::PUBLIC_FRAME_TYPE_MIN);
    let (send_res, recv_res) = futures::join!(send, recv);

    assert!(send_res.is_err());
    let recv_err = recv_res.unwrap_err();
    assert_eq!(recv_err.kind, ReadStreamErrorKind::Source);
    assert!(recv_err.message.contains("disk read failed"));

    let mut collected = Vec::new();
    while let Ok(Some(chunk)) = pipe_reader.recv().await {
        collected.extend_from_slice(&chunk);
    }
    assert_eq!(collected, b"abc");
    assert!(server.is_read_clean().await);

    // The read direction is still usable: a further message round-trips.
    client
        .write_message(frame::PUBLIC_FRAME_TYPE_MIN, Bytes::from_static(b"still alive"))
        .await
        .unwrap();
    let next = server.read_message(1024, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap();
    assert_eq!(&next[..], b"still alive");
}

/// Scenario 6: a bounded read against an oversized message poisons the read
/// direction, and any further operation on it is rejected with `UnknownState`
/// without touching the wire again.
#[compio::test]
async fn oversized_message_poisons_then_rejects_further_reads() {
    let (client, server) = tcp_stream_conns().await;
    client
        .write_message(frame::PUBLIC_FRAME_TYPE_MIN, Bytes::from(vec![0u8; 64]))
        .await
        .unwrap();

    let err = server.read_message(8, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap_err();
    assert_eq!(err.kind, ReadStreamErrorKind::Conn);
    assert!(!server.is_read_clean().await);

    let rejected = server.read_message(4096, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap_err();
    assert_eq!(rejected.kind, ReadStreamErrorKind::Other);
}

/// Scenario 8: dialing an unregistered local transport name fails before any
/// `Wire` is produced; dialing a registered one succeeds end to end.
#[compio::test]
async fn local_transport_requires_a_registered_name() {
    let unregistered = LocalConnecter {
        name: "nobody-bound-this".to_owned(),
        client_identity: ClientIdentity::parse("dialer").unwrap(),
    };
    let err = unregistered.connect().await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);

    let listener = LocalListener::bind("end-to-end-local").unwrap();
    let connecter = LocalConnecter {
        name: "end-to-end-local".to_owned(),
        client_identity: ClientIdentity::parse("dialer").unwrap(),
    };
    let (accepted, connected) = futures::join!(listener.accept(), connecter.connect());
    let server_wire = accepted.unwrap().into_parts().0;
    let client_wire = connected.unwrap();

    let (sr, sw) = server_wire.into_split();
    let (cr, cw) = client_wire.into_split();
    let server = StreamConn::new(sr, sw, fast_heartbeat_config());
    let client = StreamConn::new(cr, cw, fast_heartbeat_config());

    client
        .write_message(frame::PUBLIC_FRAME_TYPE_MIN, Bytes::from_static(b"local"))
        .await
        .unwrap();
    let received = server.read_message(1024, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap();
    assert_eq!(&received[..], b"local");
}

/// Peer-silence handling: a connection configured with a short `peer_timeout`
/// fails the read side once the other end goes quiet, and the read direction
/// poisons instead of hanging forever.
#[compio::test]
async fn peer_silence_past_timeout_poisons_read_direction() {
    let factory = TcpListenerFactory {
        addr: "127.0.0.1:0".parse().unwrap(),
    };
    let listener = factory.listen().await.unwrap();
    let addr = listener.addr().parse().unwrap();
    let connecter = TcpConnecter {
        addr,
        client_identity: ClientIdentity::parse("silent-peer").unwrap(),
    };
    let (accepted, connected) = futures::join!(listener.accept(), connecter.connect());
    let server_wire = accepted.unwrap().into_parts().0;
    let client_wire = connected.unwrap();

    let short_timeout = HeartbeatConnConfig {
        send_interval: Duration::from_secs(3600),
        peer_timeout: Duration::from_millis(100),
        write_timeout: Some(Duration::from_secs(5)),
        max_frame_length: frame::DEFAULT_MAX_FRAME_LENGTH,
    };
    let (sr, sw) = server_wire.into_split();
    let server = StreamConn::new(sr, sw, short_timeout);
    client_wire.into_split(); // dropped: client never sends anything

    let err = server.read_message(1024, frame::PUBLIC_FRAME_TYPE_MIN).await.unwrap_err();
    assert_eq!(err.kind, ReadStreamErrorKind::Conn);
    assert!(!server.is_read_clean().await);
}

#[compio::test]
async fn invalid_client_identity_is_rejected_at_parse() {
    assert!(ClientIdentity::parse("a/b").is_err());
    assert!(ClientIdentity::parse("").is_err());
    assert!(matches!(
        ClientIdentity::parse("a/b").unwrap_err(),
        DataconnError::InvalidClientIdentity(_, _)
    ));
    assert!(ClientIdentity::parse("host1").is_ok());
}
