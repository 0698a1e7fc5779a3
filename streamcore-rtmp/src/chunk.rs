//! Chunk-stream multiplexer/demultiplexer (§4.E): basic headers (fmt
//! 0-3), message-header reassembly per chunk stream id, and extended
//! timestamps.

use std::collections::HashMap;

use streamcore_codec::bytestream::{read_u24, read_u32};

use crate::error::RtmpError;

pub const DEFAULT_CHUNK_SIZE: usize = 128;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkMessage {
    pub csid: u32,
    pub type_id: u8,
    pub stream_id: u32,
    pub timestamp: u32,
    pub payload: Vec<u8>,
}

#[derive(Default, Clone)]
struct ChunkStreamState {
    timestamp: u32,
    last_delta: u32,
    message_length: usize,
    type_id: u8,
    stream_id: u32,
    payload: Vec<u8>,
    bytes_remaining: usize,
    extended_timestamp: bool,
}

/// Reassembles interleaved chunks back into complete messages, one
/// state machine per chunk stream id.
pub struct ChunkDemuxer {
    buffer: Vec<u8>,
    chunk_size: usize,
    streams: HashMap<u32, ChunkStreamState>,
}

impl ChunkDemuxer {
    pub fn new() -> Self {
        ChunkDemuxer { buffer: Vec::new(), chunk_size: DEFAULT_CHUNK_SIZE, streams: HashMap::new() }
    }

    /// Applies a peer-requested `Set Chunk Size` to how this side reads
    /// the wire.
    pub fn set_chunk_size(&mut self, size: usize) {
        self.chunk_size = size;
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pulls the next fully-reassembled message, if the buffer already
    /// holds enough bytes for it. Returns `Ok(None)` without consuming
    /// anything when more bytes are needed.
    pub fn next_message(&mut self) -> Result<Option<ChunkMessage>, RtmpError> {
        loop {
            match self.parse_next_chunk()? {
                None => return Ok(None),
                Some((consumed, completed)) => {
                    self.buffer.drain(0..consumed);
                    if completed.is_some() {
                        return Ok(completed);
                    }
                }
            }
        }
    }

    fn parse_next_chunk(&mut self) -> Result<Option<(usize, Option<ChunkMessage>)>, RtmpError> {
        let buf = &self.buffer;
        if buf.is_empty() {
            return Ok(None);
        }

        let byte0 = buf[0];
        let fmt = byte0 >> 6;
        let csid_low = byte0 & 0x3f;
        let (csid, basic_len) = match csid_low {
            0 => {
                if buf.len() < 2 {
                    return Ok(None);
                }
                (64 + buf[1] as u32, 2)
            }
            1 => {
                if buf.len() < 3 {
                    return Ok(None);
                }
                (64 + buf[1] as u32 + buf[2] as u32 * 256, 3)
            }
            low => (low as u32, 1),
        };

        let header_len = match fmt {
            0 => 11,
            1 => 7,
            2 => 3,
            3 => 0,
            _ => unreachable!("fmt is two bits"),
        };
        if buf.len() < basic_len + header_len {
            return Ok(None);
        }

        let mut state = self.streams.get(&csid).cloned().unwrap_or_default();
        let mut pos = basic_len;
        let continuing_message = state.bytes_remaining > 0;

        match fmt {
            0 => {
                let ts_field = read_u24(&buf[pos..pos + 3]);
                let len = read_u24(&buf[pos + 3..pos + 6]) as usize;
                let type_id = buf[pos + 6];
                let stream_id = u32::from_le_bytes([buf[pos + 7], buf[pos + 8], buf[pos + 9], buf[pos + 10]]);
                pos += 11;

                state.extended_timestamp = ts_field == 0xFFFFFF;
                if state.extended_timestamp {
                    if buf.len() < pos + 4 {
                        return Ok(None);
                    }
                    state.timestamp = read_u32(&buf[pos..pos + 4]);
                    pos += 4;
                } else {
                    state.timestamp = ts_field;
                }
                state.last_delta = 0;
                state.message_length = len;
                state.type_id = type_id;
                state.stream_id = stream_id;
                state.payload.clear();
                state.bytes_remaining = len;
            }
            1 => {
                let delta_field = read_u24(&buf[pos..pos + 3]);
                let len = read_u24(&buf[pos + 3..pos + 6]) as usize;
                let type_id = buf[pos + 6];
                pos += 7;

                state.extended_timestamp = delta_field == 0xFFFFFF;
                let delta = if state.extended_timestamp {
                    if buf.len() < pos + 4 {
                        return Ok(None);
                    }
                    let ext = read_u32(&buf[pos..pos + 4]);
                    pos += 4;
                    ext
                } else {
                    delta_field
                };
                state.timestamp = state.timestamp.wrapping_add(delta);
                state.last_delta = delta;
                state.message_length = len;
                state.type_id = type_id;
                state.payload.clear();
                state.bytes_remaining = len;
            }
            2 => {
                let delta_field = read_u24(&buf[pos..pos + 3]);
                pos += 3;

                state.extended_timestamp = delta_field == 0xFFFFFF;
                let delta = if state.extended_timestamp {
                    if buf.len() < pos + 4 {
                        return Ok(None);
                    }
                    let ext = read_u32(&buf[pos..pos + 4]);
                    pos += 4;
                    ext
                } else {
                    delta_field
                };
                state.timestamp = state.timestamp.wrapping_add(delta);
                state.last_delta = delta;
                state.payload.clear();
                state.bytes_remaining = state.message_length;
            }
            3 => {
                if state.extended_timestamp {
                    if buf.len() < pos + 4 {
                        return Ok(None);
                    }
                    pos += 4;
                }
                if !continuing_message {
                    state.timestamp = state.timestamp.wrapping_add(state.last_delta);
                    state.payload.clear();
                    state.bytes_remaining = state.message_length;
                }
            }
            _ => unreachable!("fmt is two bits"),
        }

        let take = state.bytes_remaining.min(self.chunk_size);
        if buf.len() < pos + take {
            return Ok(None);
        }
        state.payload.extend_from_slice(&buf[pos..pos + take]);
        state.bytes_remaining -= take;
        let consumed = pos + take;

        let message = if state.bytes_remaining == 0 {
            Some(ChunkMessage {
                csid,
                type_id: state.type_id,
                stream_id: state.stream_id,
                timestamp: state.timestamp,
                payload: std::mem::take(&mut state.payload),
            })
        } else {
            None
        };

        self.streams.insert(csid, state);
        Ok(Some((consumed, message)))
    }
}

impl Default for ChunkDemuxer {
    fn default() -> Self {
        Self::new()
    }
}

fn write_u24(out: &mut Vec<u8>, value: u32) {
    out.push(((value >> 16) & 0xff) as u8);
    out.push(((value >> 8) & 0xff) as u8);
    out.push((value & 0xff) as u8);
}

fn write_basic_header(fmt: u8, csid: u32, out: &mut Vec<u8>) {
    if csid < 64 {
        out.push((fmt << 6) | csid as u8);
    } else if csid < 320 {
        out.push(fmt << 6);
        out.push((csid - 64) as u8);
    } else {
        out.push((fmt << 6) | 1);
        let v = csid - 64;
        out.push((v & 0xff) as u8);
        out.push(((v >> 8) & 0xff) as u8);
    }
}

/// Serializes one RTMP message as a Type-0 chunk followed by Type-3
/// continuation chunks, split at `chunk_size` bytes.
pub fn write_message(csid: u32, timestamp: u32, type_id: u8, stream_id: u32, payload: &[u8], chunk_size: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 16);
    write_basic_header(0, csid, &mut out);

    let extended = timestamp >= 0xFFFFFF;
    write_u24(&mut out, if extended { 0xFFFFFF } else { timestamp });
    write_u24(&mut out, payload.len() as u32);
    out.push(type_id);
    out.extend_from_slice(&stream_id.to_le_bytes());
    if extended {
        out.extend_from_slice(&timestamp.to_be_bytes());
    }

    let mut offset = 0;
    loop {
        let end = (offset + chunk_size).min(payload.len());
        out.extend_from_slice(&payload[offset..end]);
        offset = end;
        if offset >= payload.len() {
            break;
        }
        write_basic_header(3, csid, &mut out);
        if extended {
            out.extend_from_slice(&timestamp.to_be_bytes());
        }
    }
    out
}
