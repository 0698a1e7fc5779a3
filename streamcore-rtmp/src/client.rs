//! RTMP client state machine (§4.E): handshake, `connect`/`createStream`/
//! `play`/`publish` dialogue, and per-message dispatch once the stream is
//! live. Grounded on `RtmpClientSession::HandleMessage` and
//! `ReceiveRespMessage`, generalized from two split callback interfaces
//! (`RtmpClientCtrlCallbackI` + `RtmpClientDataCallbackI`) into one
//! control callback plus the [`Streamer`]/[`Sinker`] substrate already
//! used by the MP4 engine for media delivery.

use std::collections::{BTreeMap, HashMap};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use streamcore_core::{AvType, CodecType, FmtType, Packet, Reporter, Sinker, SinkerFanout, Streamer, StreamerError};

use crate::amf0::{flatten_to_items, Amf0Value};
use crate::chunk::{write_message, ChunkDemuxer, ChunkMessage};
use crate::error::RtmpError;
use crate::handshake::{build_c0c1, build_c2, parse_s0s1s2, C0C1_LEN, S0S1S2_LEN};

const DEFAULT_OPTIONS: &[(&str, &str)] = &[("chunk_size", "4096")];

const MSG_SET_CHUNK_SIZE: u8 = 1;
const MSG_ACKNOWLEDGEMENT: u8 = 3;
const MSG_WINDOW_ACK_SIZE: u8 = 5;
const MSG_SET_PEER_BANDWIDTH: u8 = 6;
const MSG_AUDIO: u8 = 8;
const MSG_VIDEO: u8 = 9;
const MSG_DATA_AMF0: u8 = 18;
const MSG_DATA_AMF3: u8 = 15;
const MSG_COMMAND_AMF0: u8 = 20;

const CSID_CONTROL: u32 = 3;
const CSID_AUDIO: u32 = 4;
const CSID_VIDEO: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    HandshakeC0C1Sent,
    HandshakeC2Sent,
    ConnectSent,
    ConnectResponseReceived,
    CreateStreamSent,
    CreateStreamResponseReceived,
    PlaySent,
    PublishSent,
    StreamReady,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Play,
    Publish,
}

#[derive(Debug, Clone)]
pub struct RtmpRequest {
    pub tc_url: String,
    pub app: String,
    pub stream_name: String,
    pub role: Role,
}

/// Sends bytes to the peer. Implemented by whatever owns the actual TCP
/// socket; the session itself never touches the network directly.
pub trait RtmpTransport: Send + Sync {
    fn send(&self, data: &[u8]) -> io::Result<()>;
}

/// Every callback the original split across `RtmpClientCtrlCallbackI`,
/// collapsed into one trait with no-op defaults so callers only override
/// what they care about.
pub trait RtmpControlCallback: Send + Sync {
    fn on_handshake_done(&self) {}
    fn on_connect_result(&self, _items: &BTreeMap<String, String>) {}
    fn on_create_stream_result(&self, _stream_id: u32) {}
    fn on_play_result(&self, _items: &BTreeMap<String, String>) {}
    fn on_publish_result(&self, _items: &BTreeMap<String, String>) {}
    fn on_close(&self) {}
}

struct SessionState {
    phase: Phase,
    demuxer: ChunkDemuxer,
    handshake_buffer: Vec<u8>,
    write_chunk_size: usize,
    stream_id: u32,
    request: Option<RtmpRequest>,
}

impl SessionState {
    fn new() -> Self {
        SessionState {
            phase: Phase::Init,
            demuxer: ChunkDemuxer::new(),
            handshake_buffer: Vec::new(),
            write_chunk_size: 4096,
            stream_id: 0,
            request: None,
        }
    }
}

/// One RTMP connection, in either play (media delivery via the embedded
/// [`SinkerFanout`]) or publish (outbound serialization via
/// [`Sinker::source_data`]) role.
pub struct RtmpSession {
    name: String,
    fanout: SinkerFanout,
    reporter: Mutex<Option<Arc<dyn Reporter>>>,
    transport: Mutex<Option<Arc<dyn RtmpTransport>>>,
    callback: Mutex<Option<Arc<dyn RtmpControlCallback>>>,
    options: Mutex<HashMap<String, String>>,
    state: Mutex<SessionState>,
}

impl RtmpSession {
    pub fn new(name: impl Into<String>) -> Self {
        let mut options = HashMap::new();
        for (k, v) in DEFAULT_OPTIONS {
            options.insert((*k).to_string(), (*v).to_string());
        }
        RtmpSession {
            name: name.into(),
            fanout: SinkerFanout::new(),
            reporter: Mutex::new(None),
            transport: Mutex::new(None),
            callback: Mutex::new(None),
            options: Mutex::new(options),
            state: Mutex::new(SessionState::new()),
        }
    }

    pub fn set_transport(&self, transport: Arc<dyn RtmpTransport>) {
        *self.transport.lock().unwrap() = Some(transport);
    }

    pub fn set_control_callback(&self, callback: Arc<dyn RtmpControlCallback>) {
        *self.callback.lock().unwrap() = Some(callback);
    }

    pub fn phase(&self) -> Phase {
        self.state.lock().unwrap().phase
    }

    fn report(&self, kind: &str, value: &str) {
        if let Some(reporter) = self.reporter.lock().unwrap().as_ref() {
            reporter.on_report(&self.name, kind, value);
        }
    }

    fn send(&self, data: &[u8]) -> Result<(), RtmpError> {
        let transport = self.transport.lock().unwrap().clone();
        match transport {
            Some(t) => t.send(data).map_err(RtmpError::Io),
            None => Err(RtmpError::Handshake("no transport attached".into())),
        }
    }

    /// Begins the handshake and records `request` for the dialogue that
    /// follows once the handshake completes.
    pub fn start(&self, request: RtmpRequest) -> Result<(), RtmpError> {
        let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u32).unwrap_or(0);
        {
            let mut state = self.state.lock().unwrap();
            state.request = Some(request);
            state.phase = Phase::HandshakeC0C1Sent;
        }
        self.send(&build_c0c1(timestamp))
    }

    /// Feeds newly-received bytes from the socket into the handshake or
    /// chunk-stream state machine, dispatching any complete messages.
    pub fn on_read(&self, data: &[u8]) -> Result<(), RtmpError> {
        let phase = self.state.lock().unwrap().phase;
        if phase == Phase::HandshakeC0C1Sent {
            return self.continue_handshake(data);
        }
        if phase == Phase::Closed {
            return Err(RtmpError::PeerClosed);
        }

        self.state.lock().unwrap().demuxer.push(data);
        loop {
            let message = self.state.lock().unwrap().demuxer.next_message()?;
            match message {
                Some(message) => self.handle_message(message)?,
                None => break,
            }
        }
        Ok(())
    }

    fn continue_handshake(&self, data: &[u8]) -> Result<(), RtmpError> {
        let leftover = {
            let mut state = self.state.lock().unwrap();
            state.handshake_buffer.extend_from_slice(data);
            if state.handshake_buffer.len() < S0S1S2_LEN {
                return Ok(());
            }
            let server = parse_s0s1s2(&state.handshake_buffer[..S0S1S2_LEN])?;
            let leftover = state.handshake_buffer[S0S1S2_LEN..].to_vec();
            state.handshake_buffer.clear();
            state.phase = Phase::HandshakeC2Sent;
            (server, leftover)
        };
        let (server, leftover) = leftover;
        self.send(&build_c2(&server))?;
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback.on_handshake_done();
        }
        self.send_connect()?;
        if !leftover.is_empty() {
            self.on_read(&leftover)?;
        }
        Ok(())
    }

    fn send_connect(&self) -> Result<(), RtmpError> {
        let request = self.state.lock().unwrap().request.clone().ok_or_else(|| RtmpError::Handshake("start() was never called".into()))?;

        let mut object = BTreeMap::new();
        object.insert("app".to_string(), Amf0Value::String(request.app.clone()));
        object.insert("type".to_string(), Amf0Value::String("nonprivate".to_string()));
        object.insert("flashVer".to_string(), Amf0Value::String("FMS.3.1".to_string()));
        object.insert("tcUrl".to_string(), Amf0Value::String(request.tc_url.clone()));

        let mut payload = Vec::new();
        Amf0Value::String("connect".into()).encode(&mut payload);
        Amf0Value::Number(1.0).encode(&mut payload);
        Amf0Value::Object(object).encode(&mut payload);

        self.state.lock().unwrap().phase = Phase::ConnectSent;
        self.write_command(&payload)
    }

    fn send_create_stream(&self) -> Result<(), RtmpError> {
        let mut payload = Vec::new();
        Amf0Value::String("createStream".into()).encode(&mut payload);
        Amf0Value::Number(2.0).encode(&mut payload);
        Amf0Value::Null.encode(&mut payload);

        self.state.lock().unwrap().phase = Phase::CreateStreamSent;
        self.write_command(&payload)
    }

    fn send_play_or_publish(&self) -> Result<(), RtmpError> {
        let (request, stream_id) = {
            let state = self.state.lock().unwrap();
            (state.request.clone().expect("request set before create_stream response"), state.stream_id)
        };

        let mut payload = Vec::new();
        match request.role {
            Role::Play => {
                Amf0Value::String("play".into()).encode(&mut payload);
                Amf0Value::Number(0.0).encode(&mut payload);
                Amf0Value::Null.encode(&mut payload);
                Amf0Value::String(request.stream_name.clone()).encode(&mut payload);
                self.state.lock().unwrap().phase = Phase::PlaySent;
            }
            Role::Publish => {
                Amf0Value::String("publish".into()).encode(&mut payload);
                Amf0Value::Number(0.0).encode(&mut payload);
                Amf0Value::Null.encode(&mut payload);
                Amf0Value::String(request.stream_name.clone()).encode(&mut payload);
                Amf0Value::String("live".into()).encode(&mut payload);
                self.state.lock().unwrap().phase = Phase::PublishSent;
            }
        }
        self.write_command_on_stream(&payload, stream_id)
    }

    fn write_command(&self, payload: &[u8]) -> Result<(), RtmpError> {
        self.write_command_on_stream(payload, 0)
    }

    fn write_command_on_stream(&self, payload: &[u8], stream_id: u32) -> Result<(), RtmpError> {
        let chunk_size = self.state.lock().unwrap().write_chunk_size;
        let wire = write_message(CSID_CONTROL, 0, MSG_COMMAND_AMF0, stream_id, payload, chunk_size);
        self.send(&wire)
    }

    fn handle_message(&self, message: ChunkMessage) -> Result<(), RtmpError> {
        match message.type_id {
            MSG_SET_CHUNK_SIZE => {
                if message.payload.len() >= 4 {
                    let size = u32::from_be_bytes([message.payload[0], message.payload[1], message.payload[2], message.payload[3]]);
                    self.state.lock().unwrap().demuxer.set_chunk_size(size as usize);
                    self.report("chunk_size", &size.to_string());
                }
                Ok(())
            }
            MSG_WINDOW_ACK_SIZE => {
                self.report("window_ack_size", "received");
                Ok(())
            }
            MSG_SET_PEER_BANDWIDTH => {
                self.report("set_peer_bandwidth", "received");
                Ok(())
            }
            MSG_ACKNOWLEDGEMENT => {
                self.report("ack", "received");
                Ok(())
            }
            MSG_COMMAND_AMF0 => self.handle_command(&message.payload),
            MSG_DATA_AMF0 | MSG_DATA_AMF3 => self.handle_data_message(&message.payload),
            MSG_AUDIO => self.deliver_media(AvType::Audio, CodecType::Aac, message),
            MSG_VIDEO => self.deliver_media(AvType::Video, CodecType::H264, message),
            other => {
                self.report("unknown_message", &other.to_string());
                Ok(())
            }
        }
    }

    /// AMF0/AMF3 data messages (`onMetaData` and friends) are reported
    /// through the event reporter, not converted into `Packet`s — this
    /// engine's play role only forwards the audio/video elementary
    /// streams, not in-band metadata.
    fn handle_data_message(&self, payload: &[u8]) -> Result<(), RtmpError> {
        let values = crate::amf0::decode_all(payload)?;
        self.report("MetaData", &format!("{:?}", values));
        Ok(())
    }

    fn deliver_media(&self, av_type: AvType, codec_type: CodecType, message: ChunkMessage) -> Result<(), RtmpError> {
        let mut packet = Packet::new(message.payload.len());
        packet.av_type = av_type;
        packet.codec_type = codec_type;
        packet.fmt_type = FmtType::Raw;
        packet.dts = message.timestamp as i64;
        packet.pts = message.timestamp as i64;
        packet.payload = Bytes::from(message.payload);
        packet.source = Some(self.name.clone());
        self.fanout.dispatch(Arc::new(packet))?;
        Ok(())
    }

    fn handle_command(&self, payload: &[u8]) -> Result<(), RtmpError> {
        let values = crate::amf0::decode_all(payload)?;
        let command = values.first().and_then(Amf0Value::as_str).unwrap_or_default().to_string();

        match command.as_str() {
            "_result" => self.handle_result(&values),
            "onStatus" => self.handle_on_status(&values),
            "_error" => {
                self.report("amf_error", &format!("{:?}", values));
                Ok(())
            }
            other => {
                self.report("unknown_command", other);
                Ok(())
            }
        }
    }

    fn handle_result(&self, values: &[Amf0Value]) -> Result<(), RtmpError> {
        let phase = self.state.lock().unwrap().phase;
        match phase {
            Phase::ConnectSent => {
                let items = values.get(3).or_else(|| values.get(2)).map(flatten_to_items).unwrap_or_default();
                self.state.lock().unwrap().phase = Phase::ConnectResponseReceived;
                if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                    callback.on_connect_result(&items);
                }
                self.send_create_stream()
            }
            Phase::CreateStreamSent => {
                let stream_id = values.get(3).and_then(Amf0Value::as_f64).unwrap_or(0.0) as u32;
                {
                    let mut state = self.state.lock().unwrap();
                    state.stream_id = stream_id;
                    state.phase = Phase::CreateStreamResponseReceived;
                }
                if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                    callback.on_create_stream_result(stream_id);
                }
                self.send_play_or_publish()
            }
            other => Err(RtmpError::UnexpectedResponse { phase: phase_name(other), detail: "_result".to_string() }),
        }
    }

    fn handle_on_status(&self, values: &[Amf0Value]) -> Result<(), RtmpError> {
        let items = values.get(3).map(flatten_to_items).unwrap_or_default();
        let phase = self.state.lock().unwrap().phase;
        match phase {
            Phase::PlaySent => {
                self.state.lock().unwrap().phase = Phase::StreamReady;
                if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                    callback.on_play_result(&items);
                }
                Ok(())
            }
            Phase::PublishSent => {
                self.state.lock().unwrap().phase = Phase::StreamReady;
                if let Some(callback) = self.callback.lock().unwrap().as_ref() {
                    callback.on_publish_result(&items);
                }
                Ok(())
            }
            _ => {
                self.report("on_status", &format!("{:?}", items));
                Ok(())
            }
        }
    }

    pub fn close(&self) {
        self.state.lock().unwrap().phase = Phase::Closed;
        if let Some(callback) = self.callback.lock().unwrap().as_ref() {
            callback.on_close();
        }
    }
}

fn phase_name(phase: Phase) -> &'static str {
    match phase {
        Phase::Init => "init",
        Phase::HandshakeC0C1Sent => "handshake_c0c1_sent",
        Phase::HandshakeC2Sent => "handshake_c2_sent",
        Phase::ConnectSent => "connect_sent",
        Phase::ConnectResponseReceived => "connect_response_received",
        Phase::CreateStreamSent => "create_stream_sent",
        Phase::CreateStreamResponseReceived => "create_stream_response_received",
        Phase::PlaySent => "play_sent",
        Phase::PublishSent => "publish_sent",
        Phase::StreamReady => "stream_ready",
        Phase::Closed => "closed",
    }
}

impl Sinker for RtmpSession {
    fn streamer_name(&self) -> &str {
        &self.name
    }

    /// Publish-mode outbound path: serializes the packet as an RTMP
    /// audio/video message and writes it to the transport.
    fn source_data(&self, packet: Arc<Packet>) -> Result<(), StreamerError> {
        let (csid, type_id) = match packet.av_type {
            AvType::Audio => (CSID_AUDIO, MSG_AUDIO),
            AvType::Video => (CSID_VIDEO, MSG_VIDEO),
            _ => (CSID_CONTROL, MSG_DATA_AMF0),
        };
        let (stream_id, chunk_size) = {
            let state = self.state.lock().unwrap();
            (state.stream_id, state.write_chunk_size)
        };
        let wire = write_message(csid, packet.dts.max(0) as u32, type_id, stream_id, &packet.payload, chunk_size);
        self.send(&wire).map_err(|e| StreamerError::Io(io::Error::other(e)))
    }
}

impl Streamer for RtmpSession {
    fn add_sinker(&self, sinker: Arc<dyn Sinker>) {
        self.fanout.add(sinker);
    }

    fn remove_sinker(&self, name: &str) -> usize {
        self.fanout.remove(name)
    }

    fn add_option(&self, key: &str, value: &str) -> Result<(), StreamerError> {
        let mut options = self.options.lock().unwrap();
        if !options.contains_key(key) {
            return Err(StreamerError::UnknownOption { key: key.to_string() });
        }
        if key == "chunk_size" {
            if let Ok(size) = value.parse::<usize>() {
                self.state.lock().unwrap().write_chunk_size = size;
            }
        }
        options.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn set_reporter(&self, reporter: Arc<dyn Reporter>) {
        *self.reporter.lock().unwrap() = Some(reporter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    struct RecordingTransport {
        sent: StdMutex<Vec<Vec<u8>>>,
    }

    impl RecordingTransport {
        fn new() -> Self {
            RecordingTransport { sent: StdMutex::new(Vec::new()) }
        }
    }

    impl RtmpTransport for RecordingTransport {
        fn send(&self, data: &[u8]) -> io::Result<()> {
            self.sent.lock().unwrap().push(data.to_vec());
            Ok(())
        }
    }

    fn request() -> RtmpRequest {
        RtmpRequest { tc_url: "rtmp://host/live".into(), app: "live".into(), stream_name: "stream1".into(), role: Role::Play }
    }

    #[test]
    fn start_sends_c0c1_and_enters_handshake_phase() {
        let session = RtmpSession::new("client");
        let transport = Arc::new(RecordingTransport::new());
        session.set_transport(transport.clone());

        session.start(request()).unwrap();

        assert_eq!(session.phase(), Phase::HandshakeC0C1Sent);
        assert_eq!(transport.sent.lock().unwrap()[0].len(), C0C1_LEN);
    }

    #[test]
    fn handshake_reply_triggers_c2_and_connect() {
        let session = RtmpSession::new("client");
        let transport = Arc::new(RecordingTransport::new());
        session.set_transport(transport.clone());
        session.start(request()).unwrap();

        let mut s0s1s2 = vec![0x03u8];
        s0s1s2.extend(vec![0u8; 1536]);
        s0s1s2.extend(vec![0u8; 1536]);
        assert_eq!(s0s1s2.len(), S0S1S2_LEN);

        session.on_read(&s0s1s2).unwrap();

        assert_eq!(session.phase(), Phase::ConnectSent);
        let sent = transport.sent.lock().unwrap();
        assert_eq!(sent.len(), 3); // c0c1, c2, connect command
    }

    #[test]
    fn unknown_option_is_rejected() {
        let session = RtmpSession::new("client");
        assert!(session.add_option("nonsense", "x").is_err());
    }

    #[test]
    fn chunk_size_option_updates_write_chunk_size() {
        let session = RtmpSession::new("client");
        session.add_option("chunk_size", "512").unwrap();
        assert_eq!(session.state.lock().unwrap().write_chunk_size, 512);
    }
}
