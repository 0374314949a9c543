//! The data-plane wire format emitted by the traffic generator (§4.7).
//!
//! Unlike the control plane, data messages are not subject to `max_length`
//! framing concerns beyond the fragment size itself: each fragment is sized
//! to fit one UDP datagram.

use std::io::{Cursor, Read};

use crate::clock::Timestamp;
use crate::error::WireError;

/// Maximum bytes carried by a single data-plane fragment (§4.7, §6).
pub const MAX_PROTOCOL_MSG_LEN: usize = 1458;

const HEADER_LEN: usize = 1 + 4 + 8 + 4 + 4 + 4 + 12 + 12;

/// One fragment of a traffic-generator "object" (§4.7).
#[derive(Debug, Clone, PartialEq)]
pub struct DataMessage {
    pub priority: u8,
    pub source_id: u32,
    pub service_id: u64,
    pub object_number: u32,
    pub fragment_number: u32,
    pub total_fragments: u32,
    pub timestamp: Timestamp,
    pub send_time_point: Timestamp,
    pub payload: Vec<u8>,
}

impl DataMessage {
    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.payload.len());
        buf.push(self.priority);
        buf.extend_from_slice(&self.source_id.to_le_bytes());
        buf.extend_from_slice(&self.service_id.to_le_bytes());
        buf.extend_from_slice(&self.object_number.to_le_bytes());
        buf.extend_from_slice(&self.fragment_number.to_le_bytes());
        buf.extend_from_slice(&self.total_fragments.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.sec.to_le_bytes());
        buf.extend_from_slice(&self.timestamp.nsec.to_le_bytes());
        buf.extend_from_slice(&self.send_time_point.sec.to_le_bytes());
        buf.extend_from_slice(&self.send_time_point.nsec.to_le_bytes());
        buf.extend_from_slice(&self.payload);
        buf
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self, WireError> {
        if bytes.len() < HEADER_LEN {
            return Err(WireError::TooShort {
                got: bytes.len(),
                need: HEADER_LEN,
            });
        }
        let mut cur = Cursor::new(bytes);
        let mut byte = [0u8; 1];
        cur.read_exact(&mut byte).unwrap();
        let priority = byte[0];
        let source_id = read_u32(&mut cur);
        let service_id = read_u64(&mut cur);
        let object_number = read_u32(&mut cur);
        let fragment_number = read_u32(&mut cur);
        let total_fragments = read_u32(&mut cur);
        let timestamp = Timestamp::new(read_u64(&mut cur), read_u32(&mut cur));
        let send_time_point = Timestamp::new(read_u64(&mut cur), read_u32(&mut cur));
        let mut payload = Vec::new();
        cur.read_to_end(&mut payload).unwrap();
        Ok(DataMessage {
            priority,
            source_id,
            service_id,
            object_number,
            fragment_number,
            total_fragments,
            timestamp,
            send_time_point,
            payload,
        })
    }
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> u32 {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).unwrap();
    u32::from_le_bytes(b)
}

fn read_u64(cur: &mut Cursor<&[u8]>) -> u64 {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b).unwrap();
    u64::from_le_bytes(b)
}

/// `total_fragments = ceil(object_size_bytes / MAX_PROTOCOL_MSG_LEN)` (§4.7, §8 property 5).
pub fn total_fragments(object_size_bytes: u64) -> u32 {
    if object_size_bytes == 0 {
        return 1;
    }
    (object_size_bytes as usize).div_ceil(MAX_PROTOCOL_MSG_LEN) as u32
}

/// Payload for fragment `fragment_number` (1-indexed) of an object of
/// `object_size_bytes`: `MAX_PROTOCOL_MSG_LEN` filler bytes, except the
/// last fragment which shrinks to the remainder (§4.7, §8 boundary
/// behavior).
pub fn fragment_payload(object_size_bytes: u64, fragment_number: u32) -> Vec<u8> {
    let total = total_fragments(object_size_bytes);
    let sent_before = (fragment_number as u64 - 1) * MAX_PROTOCOL_MSG_LEN as u64;
    let remaining = object_size_bytes.saturating_sub(sent_before);
    let this_len = if fragment_number >= total {
        remaining
    } else {
        MAX_PROTOCOL_MSG_LEN as u64
    };
    vec![b'A'; this_len as usize]
}
