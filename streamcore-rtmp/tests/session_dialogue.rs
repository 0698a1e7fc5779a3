//! End-to-end exercise of the client state machine through a fake
//! transport: handshake, connect, createStream, and play, verified by
//! phase transitions and the commands actually written to the wire.

use std::io;
use std::sync::{Arc, Mutex};

use streamcore_rtmp::client::{Phase, Role, RtmpRequest, RtmpSession, RtmpTransport};

struct LoopbackTransport {
    sent: Mutex<Vec<Vec<u8>>>,
}

impl LoopbackTransport {
    fn new() -> Self {
        LoopbackTransport { sent: Mutex::new(Vec::new()) }
    }
}

impl RtmpTransport for LoopbackTransport {
    fn send(&self, data: &[u8]) -> io::Result<()> {
        self.sent.lock().unwrap().push(data.to_vec());
        Ok(())
    }
}

fn amf0_command(name: &str, transaction_id: f64, extra: &[u8]) -> Vec<u8> {
    use streamcore_rtmp::amf0::Amf0Value;
    let mut payload = Vec::new();
    Amf0Value::String(name.to_string()).encode(&mut payload);
    Amf0Value::Number(transaction_id).encode(&mut payload);
    Amf0Value::Null.encode(&mut payload);
    payload.extend_from_slice(extra);
    payload
}

fn chunked(csid: u32, type_id: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    streamcore_rtmp::chunk::write_message(csid, 0, type_id, stream_id, payload, 4096)
}

#[test]
fn full_dialogue_reaches_stream_ready() {
    let session = RtmpSession::new("client");
    let transport = Arc::new(LoopbackTransport::new());
    session.set_transport(transport.clone());

    session
        .start(RtmpRequest {
            tc_url: "rtmp://host/live".into(),
            app: "live".into(),
            stream_name: "stream1".into(),
            role: Role::Play,
        })
        .unwrap();
    assert_eq!(session.phase(), Phase::HandshakeC0C1Sent);

    let mut s0s1s2 = vec![0x03u8];
    s0s1s2.extend(vec![0u8; 1536 * 2]);
    session.on_read(&s0s1s2).unwrap();
    assert_eq!(session.phase(), Phase::ConnectSent);

    let mut number = Vec::new();
    use streamcore_rtmp::amf0::Amf0Value;
    Amf0Value::Number(1.0).encode(&mut number);
    let connect_result = chunked(3, 20, 0, &amf0_command("_result", 1.0, &number));
    session.on_read(&connect_result).unwrap();
    assert_eq!(session.phase(), Phase::CreateStreamSent);

    number.clear();
    Amf0Value::Number(5.0).encode(&mut number);
    let create_stream_result = chunked(3, 20, 0, &amf0_command("_result", 2.0, &number));
    session.on_read(&create_stream_result).unwrap();
    assert_eq!(session.phase(), Phase::PlaySent);

    let mut status_info = Vec::new();
    Amf0Value::Null.encode(&mut status_info);
    let play_status = chunked(3, 20, 5, &amf0_command("onStatus", 0.0, &status_info));
    session.on_read(&play_status).unwrap();
    assert_eq!(session.phase(), Phase::StreamReady);

    let sent = transport.sent.lock().unwrap();
    assert_eq!(sent.len(), 5); // c0c1, c2, connect, createStream, play
}
