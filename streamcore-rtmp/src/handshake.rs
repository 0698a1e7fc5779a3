//! Simple (non-digest) RTMP handshake byte layout (§4.E).
//!
//! C0+C1 is 1537 bytes: a version byte followed by a 1536-byte chunk of
//! timestamp, zero, and filler. S0+S1+S2 mirrors it at 3073 bytes. C2
//! echoes S1 back unchanged. This variant skips the digest/signature
//! dance of the complex handshake, which the original client never
//! performs either — it always talks to trusted first-party servers.

use crate::error::RtmpError;

pub const RTMP_VERSION: u8 = 0x03;
pub const HANDSHAKE_CHUNK_LEN: usize = 1536;
pub const C0C1_LEN: usize = 1 + HANDSHAKE_CHUNK_LEN;
pub const S0S1S2_LEN: usize = 1 + HANDSHAKE_CHUNK_LEN * 2;

/// Seeded, non-cryptographic filler generator. The handshake's random
/// bytes only need to be unpredictable enough for a liveness check, not
/// secure, so a tiny xorshift avoids pulling in a dependency the rest of
/// the workspace doesn't otherwise need.
struct Xorshift32 {
    state: u32,
}

impl Xorshift32 {
    fn new(seed: u32) -> Self {
        Xorshift32 { state: if seed == 0 { 0x9e3779b9 } else { seed } }
    }

    fn next_u32(&mut self) -> u32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        x
    }

    fn fill(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let word = self.next_u32().to_be_bytes();
            chunk.copy_from_slice(&word[..chunk.len()]);
        }
    }
}

/// Builds C0+C1. `timestamp` is the local epoch time in milliseconds,
/// truncated to 32 bits as the wire format requires.
pub fn build_c0c1(timestamp: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(C0C1_LEN);
    out.push(RTMP_VERSION);
    out.extend_from_slice(&timestamp.to_be_bytes());
    out.extend_from_slice(&0u32.to_be_bytes());

    let mut filler = vec![0u8; HANDSHAKE_CHUNK_LEN - 8];
    Xorshift32::new(timestamp).fill(&mut filler);
    out.extend_from_slice(&filler);
    out
}

/// The portion of S0+S1+S2 the client needs to remember: S1's body, so
/// it can be echoed back verbatim as C2.
pub struct ServerHandshake {
    pub s1: Vec<u8>,
}

/// Parses S0+S1+S2 (3073 bytes) from the server's handshake reply.
pub fn parse_s0s1s2(data: &[u8]) -> Result<ServerHandshake, RtmpError> {
    if data.len() < S0S1S2_LEN {
        return Err(RtmpError::ShortRead { wanted: S0S1S2_LEN, have: data.len() });
    }
    let version = data[0];
    if version != RTMP_VERSION {
        return Err(RtmpError::Handshake(format!("unexpected server version byte {}", version)));
    }
    let s1 = data[1..1 + HANDSHAKE_CHUNK_LEN].to_vec();
    Ok(ServerHandshake { s1 })
}

/// Builds C2 by echoing S1 back to the server unchanged.
pub fn build_c2(server: &ServerHandshake) -> Vec<u8> {
    server.s1.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn c0c1_has_expected_length_and_version() {
        let c0c1 = build_c0c1(12345);
        assert_eq!(c0c1.len(), C0C1_LEN);
        assert_eq!(c0c1[0], RTMP_VERSION);
        assert_eq!(u32::from_be_bytes(c0c1[1..5].try_into().unwrap()), 12345);
        assert_eq!(u32::from_be_bytes(c0c1[5..9].try_into().unwrap()), 0);
    }

    #[test]
    fn s0s1s2_too_short_is_rejected() {
        let data = vec![0x03; 100];
        assert!(parse_s0s1s2(&data).is_err());
    }

    #[test]
    fn s0s1s2_wrong_version_is_rejected() {
        let data = vec![0x06; S0S1S2_LEN];
        assert!(parse_s0s1s2(&data).is_err());
    }

    #[test]
    fn c2_echoes_s1() {
        let mut data = vec![0x03u8];
        let s1: Vec<u8> = (0..HANDSHAKE_CHUNK_LEN).map(|i| (i % 256) as u8).collect();
        data.extend_from_slice(&s1);
        data.extend(vec![0u8; HANDSHAKE_CHUNK_LEN]);

        let server = parse_s0s1s2(&data).unwrap();
        assert_eq!(build_c2(&server), s1);
    }

    #[test]
    fn filler_is_deterministic_for_same_seed() {
        let a = build_c0c1(999);
        let b = build_c0c1(999);
        assert_eq!(a, b);
    }
}
