//! The control-plane wire protocol: `ControlMessage` framing and the
//! `RMPayload` carried inside it (§3, §4.1, §6).
//!
//! Serialization is field-by-field, little-endian, tightly packed, matching
//! the frozen wire order from §4.1. `send_time_point` and the three embedded
//! timestamps use the `(sec: u64, nsec: u32)` representation chosen in §9.

use std::io::{Cursor, Read};

use crate::clock::Timestamp;
use crate::error::WireError;

/// Maximum control-plane datagram length (§6).
pub const MAX_LENGTH: usize = 1472;
/// Maximum protocol payload carried inside a `ControlMessage` (§6).
pub const MAX_PAYLOAD: usize = 1024;

/// On-wire message kind. Numeric values are frozen (§6) and must never be
/// renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
    Noop = 0,
    SyncTimestamp = 1,
    RmClientStart = 2,
    RmClientStop = 3,
    RmClientPause = 4,
    RmClientReconfigure = 5,
    RmClientSyncTimestampStart = 6,
    RmClientSyncTimestampStop = 7,
    RmClientSyncTimestampPause = 8,
    RmClientSyncTimestampReconfigure = 9,
    RmClientSyncTimestampReconfigureSoft = 10,
    RmClientSyncRequest = 11,
    RmClientSyncReceive = 12,
    RmClientSyncReconfigureDone = 13,
    RmClientRequest = 14,
    RmClientRelease = 15,
    Ack = 16,
    Nack = 17,
    // Switch-variant and termination extensions (§6).
    RmClientReconfigureHw = 18,
    RmClientSyncTimestampReconfigureHw = 19,
    RmClientSyncTimestampReconfigureSyncObjectHw = 20,
    RmClientSyncTimestampExit = 21,
    RmClientExit = 22,
}

impl MessageKind {
    fn from_u32(v: u32) -> Result<Self, WireError> {
        use MessageKind::*;
        Ok(match v {
            0 => Noop,
            1 => SyncTimestamp,
            2 => RmClientStart,
            3 => RmClientStop,
            4 => RmClientPause,
            5 => RmClientReconfigure,
            6 => RmClientSyncTimestampStart,
            7 => RmClientSyncTimestampStop,
            8 => RmClientSyncTimestampPause,
            9 => RmClientSyncTimestampReconfigure,
            10 => RmClientSyncTimestampReconfigureSoft,
            11 => RmClientSyncRequest,
            12 => RmClientSyncReceive,
            13 => RmClientSyncReconfigureDone,
            14 => RmClientRequest,
            15 => RmClientRelease,
            16 => Ack,
            17 => Nack,
            18 => RmClientReconfigureHw,
            19 => RmClientSyncTimestampReconfigureHw,
            20 => RmClientSyncTimestampReconfigureSyncObjectHw,
            21 => RmClientSyncTimestampExit,
            22 => RmClientExit,
            other => return Err(WireError::UnknownKind(other)),
        })
    }
}

/// `RMCommand` carried inside an `RMPayload` (§6). Distinct from
/// `MessageKind`: the mapping between the two is not bijective (§9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RmCommand {
    Idle = 0,
    Start = 1,
    Stop = 2,
    Pause = 3,
    Reconfigure = 4,
    SyncTimestampStart = 5,
    SyncTimestampStop = 6,
    SyncTimestampPaused = 7,
    SyncTimestampReconfigure = 8,
    SyncTimestampReconfigureSoft = 9,
}

impl RmCommand {
    fn from_u32(v: u32) -> Result<Self, WireError> {
        use RmCommand::*;
        Ok(match v {
            0 => Idle,
            1 => Start,
            2 => Stop,
            3 => Pause,
            4 => Reconfigure,
            5 => SyncTimestampStart,
            6 => SyncTimestampStop,
            7 => SyncTimestampPaused,
            8 => SyncTimestampReconfigure,
            9 => SyncTimestampReconfigureSoft,
            other => return Err(WireError::UnknownProtocol(other)),
        })
    }
}

/// Protocol identifier selecting how `ControlMessage.payload` is
/// interpreted (§3). `Rm` is the only payload format the core protocol
/// defines; others are parsed as opaque bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum ProtocolId {
    None = 0,
    Rm = 1,
}

impl ProtocolId {
    fn from_u32(v: u32) -> Result<Self, WireError> {
        match v {
            0 => Ok(ProtocolId::None),
            1 => Ok(ProtocolId::Rm),
            other => Err(WireError::UnknownProtocol(other)),
        }
    }
}

/// The resource request sub-record carried inside an `RMPayload` (§3).
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRequest {
    pub client_id: u32,
    pub service_id: u32,
    pub priority: u32,
    pub bandwidth: f64,
    pub deadline_ms: u32,
    pub data_path: Vec<u32>,
    pub allocated: bool,
}

impl Default for ResourceRequest {
    fn default() -> Self {
        ResourceRequest {
            client_id: 0,
            service_id: 0,
            priority: 0,
            bandwidth: 0.0,
            deadline_ms: 0,
            data_path: Vec::new(),
            allocated: false,
        }
    }
}

/// The concrete payload used by the core protocol (§3, §6).
#[derive(Debug, Clone, PartialEq)]
pub struct RmPayload {
    pub object_size: u32,
    pub deadline_ns: u64,
    pub stream_priority: u32,
    pub measurement_id: u32,
    pub command: RmCommand,
    pub ts_stop: Timestamp,
    pub ts_reconfig: Timestamp,
    pub ts_start: Timestamp,
    pub request: ResourceRequest,
}

impl Default for RmPayload {
    fn default() -> Self {
        RmPayload {
            object_size: 0,
            deadline_ns: 0,
            stream_priority: 0,
            measurement_id: 0,
            command: RmCommand::Idle,
            ts_stop: Timestamp::ZERO,
            ts_reconfig: Timestamp::ZERO,
            ts_start: Timestamp::ZERO,
            request: ResourceRequest::default(),
        }
    }
}

impl RmPayload {
    /// `ts_stop <= ts_reconfig <= ts_start` (§3 invariant, §8 property 1).
    /// A zero timestamp is exempt from the ordering check — it means
    /// "unused" for the soft/bare variants.
    pub fn timestamps_ordered(&self) -> bool {
        let stop = if self.ts_stop.is_zero() {
            None
        } else {
            Some(self.ts_stop)
        };
        let reconfig = if self.ts_reconfig.is_zero() {
            None
        } else {
            Some(self.ts_reconfig)
        };
        let start = if self.ts_start.is_zero() {
            None
        } else {
            Some(self.ts_start)
        };
        if let (Some(s), Some(r)) = (stop, reconfig) {
            if s > r {
                return false;
            }
        }
        if let (Some(r), Some(st)) = (reconfig, start) {
            if r > st {
                return false;
            }
        }
        true
    }

    fn write(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.object_size.to_le_bytes());
        buf.extend_from_slice(&self.deadline_ns.to_le_bytes());
        buf.extend_from_slice(&self.stream_priority.to_le_bytes());
        buf.extend_from_slice(&self.measurement_id.to_le_bytes());
        buf.extend_from_slice(&(self.command as u32).to_le_bytes());
        write_timestamp(buf, self.ts_stop);
        write_timestamp(buf, self.ts_reconfig);
        write_timestamp(buf, self.ts_start);
        buf.extend_from_slice(&self.request.client_id.to_le_bytes());
        buf.extend_from_slice(&self.request.service_id.to_le_bytes());
        buf.extend_from_slice(&self.request.priority.to_le_bytes());
        buf.extend_from_slice(&self.request.bandwidth.to_le_bytes());
        buf.extend_from_slice(&self.request.deadline_ms.to_le_bytes());
        buf.extend_from_slice(&(self.request.allocated as u8).to_le_bytes());
        buf.extend_from_slice(&(self.request.data_path.len() as u32).to_le_bytes());
        for hop in &self.request.data_path {
            buf.extend_from_slice(&hop.to_le_bytes());
        }
    }

    fn read(cur: &mut Cursor<&[u8]>) -> Result<Self, WireError> {
        let object_size = read_u32(cur)?;
        let deadline_ns = read_u64(cur)?;
        let stream_priority = read_u32(cur)?;
        let measurement_id = read_u32(cur)?;
        let command = RmCommand::from_u32(read_u32(cur)?)?;
        let ts_stop = read_timestamp(cur)?;
        let ts_reconfig = read_timestamp(cur)?;
        let ts_start = read_timestamp(cur)?;
        let client_id = read_u32(cur)?;
        let service_id = read_u32(cur)?;
        let priority = read_u32(cur)?;
        let bandwidth = read_f64(cur)?;
        let deadline_ms = read_u32(cur)?;
        let allocated = read_u8(cur)? != 0;
        let path_len = read_u32(cur)? as usize;
        let mut data_path = Vec::with_capacity(path_len);
        for _ in 0..path_len {
            data_path.push(read_u32(cur)?);
        }
        Ok(RmPayload {
            object_size,
            deadline_ns,
            stream_priority,
            measurement_id,
            command,
            ts_stop,
            ts_reconfig,
            ts_start,
            request: ResourceRequest {
                client_id,
                service_id,
                priority,
                bandwidth,
                deadline_ms,
                data_path,
                allocated,
            },
        })
    }
}

/// The control-plane wire record (§3, §4.1).
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    pub kind: MessageKind,
    pub priority: u8,
    pub source_id: u32,
    pub destination_id: u32,
    pub service_id: u64,
    pub mode: u8,
    pub send_time_point: Timestamp,
    pub protocol_id: ProtocolId,
    pub payload: RmPayload,
}

impl ControlMessage {
    /// Serialize to the fixed wire order from §4.1.
    pub fn serialize(&self) -> Result<Vec<u8>, WireError> {
        let mut buf = Vec::with_capacity(128);
        buf.extend_from_slice(&(self.kind as u32).to_le_bytes());
        buf.extend_from_slice(&self.priority.to_le_bytes());
        buf.extend_from_slice(&self.source_id.to_le_bytes());
        buf.extend_from_slice(&self.destination_id.to_le_bytes());
        buf.extend_from_slice(&self.service_id.to_le_bytes());
        buf.extend_from_slice(&self.mode.to_le_bytes());
        write_timestamp(&mut buf, self.send_time_point);
        buf.extend_from_slice(&(self.protocol_id as u32).to_le_bytes());

        let mut payload_bytes = Vec::new();
        if self.protocol_id == ProtocolId::Rm {
            self.payload.write(&mut payload_bytes);
        }
        if payload_bytes.len() > MAX_PAYLOAD {
            return Err(WireError::PayloadLengthMismatch {
                declared: MAX_PAYLOAD,
                actual: payload_bytes.len(),
            });
        }
        buf.extend_from_slice(&payload_bytes);

        if buf.len() > MAX_LENGTH {
            return Err(WireError::TooLong {
                got: buf.len(),
                max: MAX_LENGTH,
            });
        }
        Ok(buf)
    }

    /// Deserialize from a received datagram. Parse errors leave the
    /// receive loop running; the datagram is simply dropped (§7).
    pub fn deserialize(bytes: &[u8]) -> Result<Self, WireError> {
        const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 8 + 1 + 12 + 4;
        if bytes.len() < HEADER_LEN {
            return Err(WireError::TooShort {
                got: bytes.len(),
                need: HEADER_LEN,
            });
        }
        if bytes.len() > MAX_LENGTH {
            return Err(WireError::TooLong {
                got: bytes.len(),
                max: MAX_LENGTH,
            });
        }
        let mut cur = Cursor::new(bytes);
        let kind = MessageKind::from_u32(read_u32(&mut cur)?)?;
        let priority = read_u8(&mut cur)?;
        let source_id = read_u32(&mut cur)?;
        let destination_id = read_u32(&mut cur)?;
        let service_id = read_u64(&mut cur)?;
        let mode = read_u8(&mut cur)?;
        let send_time_point = read_timestamp(&mut cur)?;
        let protocol_id = ProtocolId::from_u32(read_u32(&mut cur)?)?;

        let payload = if protocol_id == ProtocolId::Rm {
            RmPayload::read(&mut cur)?
        } else {
            RmPayload::default()
        };

        Ok(ControlMessage {
            kind,
            priority,
            source_id,
            destination_id,
            service_id,
            mode,
            send_time_point,
            protocol_id,
            payload,
        })
    }
}

fn write_timestamp(buf: &mut Vec<u8>, ts: Timestamp) {
    buf.extend_from_slice(&ts.sec.to_le_bytes());
    buf.extend_from_slice(&ts.nsec.to_le_bytes());
}

fn read_timestamp(cur: &mut Cursor<&[u8]>) -> Result<Timestamp, WireError> {
    Ok(Timestamp::new(read_u64(cur)?, read_u32(cur)?))
}

fn read_u8(cur: &mut Cursor<&[u8]>) -> Result<u8, WireError> {
    let mut b = [0u8; 1];
    cur.read_exact(&mut b).map_err(|_| short(cur, 1))?;
    Ok(b[0])
}

fn read_u32(cur: &mut Cursor<&[u8]>) -> Result<u32, WireError> {
    let mut b = [0u8; 4];
    cur.read_exact(&mut b).map_err(|_| short(cur, 4))?;
    Ok(u32::from_le_bytes(b))
}

fn read_u64(cur: &mut Cursor<&[u8]>) -> Result<u64, WireError> {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b).map_err(|_| short(cur, 8))?;
    Ok(u64::from_le_bytes(b))
}

fn read_f64(cur: &mut Cursor<&[u8]>) -> Result<f64, WireError> {
    let mut b = [0u8; 8];
    cur.read_exact(&mut b).map_err(|_| short(cur, 8))?;
    Ok(f64::from_le_bytes(b))
}

fn short(cur: &Cursor<&[u8]>, need: usize) -> WireError {
    WireError::TooShort {
        got: cur.get_ref().len(),
        need: cur.position() as usize + need,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ControlMessage {
        ControlMessage {
            kind: MessageKind::RmClientSyncTimestampReconfigure,
            priority: 2,
            source_id: 7,
            destination_id: 1,
            service_id: 0x1234,
            mode: 1,
            send_time_point: Timestamp::new(100, 0),
            protocol_id: ProtocolId::Rm,
            payload: RmPayload {
                object_size: 2048,
                deadline_ns: 100_000_000,
                stream_priority: 3,
                measurement_id: 9,
                command: RmCommand::Reconfigure,
                ts_stop: Timestamp::new(5, 10),
                ts_reconfig: Timestamp::new(6, 20),
                ts_start: Timestamp::new(7, 30),
                request: ResourceRequest {
                    client_id: 0xABCD,
                    service_id: 0x1234,
                    priority: 2,
                    bandwidth: 42.0,
                    deadline_ms: 100,
                    data_path: vec![1, 2, 3],
                    allocated: false,
                },
            },
        }
    }

    /// §8 property 3 and Scenario E: serialization is a bijection.
    #[test]
    fn round_trip_is_identity() {
        let msg = sample();
        let bytes = msg.serialize().unwrap();
        let decoded = ControlMessage::deserialize(&bytes).unwrap();
        assert_eq!(msg, decoded);
    }

    #[test]
    fn rejects_truncated_datagram() {
        let msg = sample();
        let mut bytes = msg.serialize().unwrap();
        bytes.truncate(10);
        assert!(matches!(
            ControlMessage::deserialize(&bytes),
            Err(WireError::TooShort { .. })
        ));
    }

    #[test]
    fn rejects_unknown_kind() {
        let mut bytes = sample().serialize().unwrap();
        bytes[0..4].copy_from_slice(&999u32.to_le_bytes());
        assert!(matches!(
            ControlMessage::deserialize(&bytes),
            Err(WireError::UnknownKind(999))
        ));
    }

    #[test]
    fn timestamps_ordered_accepts_soft_zeroes() {
        let mut payload = RmPayload::default();
        payload.ts_stop = Timestamp::ZERO;
        payload.ts_reconfig = Timestamp::new(5, 0);
        payload.ts_start = Timestamp::ZERO;
        assert!(payload.timestamps_ordered());
    }

    #[test]
    fn timestamps_ordered_rejects_out_of_order() {
        let mut payload = RmPayload::default();
        payload.ts_stop = Timestamp::new(10, 0);
        payload.ts_reconfig = Timestamp::new(5, 0);
        assert!(!payload.timestamps_ordered());
    }
}
