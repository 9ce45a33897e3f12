//! Wire protocol — frame header, payload framing, and a polling-based
//! codec that resumes transparently when a read idles out.
//!
//! The header is a fixed 16-byte record. Multi-byte integer fields
//! (`size`, `timestamp_sec`, `timestamp_nsec`) are network byte order on the
//! wire; single-byte fields (`type`, `param1..3`) are not reordered. Two
//! reserved padding bytes keep the record at exactly 16 bytes:
//!
//! ```text
//! offset  0   1   2-3   4      5      6      7   8-11          12-15
//!        type pad size  param1 param2 param3 pad timestamp_sec timestamp_nsec
//! ```

use std::io::{self, Read, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use thiserror::Error;

pub const HEADER_LEN: usize = 16;

/// Largest payload `recv` will allocate for, independent of chat's own
/// 1024-byte formatting cap. A peer that claims more in `header.size` is
/// rejected before any allocation, rather than trusting an attacker-
/// controlled length prefix.
pub const MAX_PAYLOAD_LEN: usize = 4096;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed mid-frame")]
    Eof,
    #[error("payload size {0} exceeds maximum frame size")]
    OversizePayload(usize),
}

/// Frame type codes. Values are fixed by wire compatibility with existing
/// clients and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameType {
    Login = 1,
    Move = 2,
    Turn = 3,
    Fire = 4,
    Refresh = 5,
    Send = 6,
    Ready = 7,
    Inuse = 8,
    Clear = 9,
    Show = 10,
    Alert = 11,
    Score = 12,
    Chat = 13,
}

impl FrameType {
    pub fn from_u8(v: u8) -> Option<FrameType> {
        Some(match v {
            1 => FrameType::Login,
            2 => FrameType::Move,
            3 => FrameType::Turn,
            4 => FrameType::Fire,
            5 => FrameType::Refresh,
            6 => FrameType::Send,
            7 => FrameType::Ready,
            8 => FrameType::Inuse,
            9 => FrameType::Clear,
            10 => FrameType::Show,
            11 => FrameType::Alert,
            12 => FrameType::Score,
            13 => FrameType::Chat,
            _ => return None,
        })
    }
}

/// The fixed 16-byte frame header shared by every request and reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub kind: u8,
    pub size: u16,
    pub param1: u8,
    pub param2: u8,
    pub param3: u8,
    pub timestamp_sec: u32,
    pub timestamp_nsec: u32,
}

impl PacketHeader {
    pub fn new(kind: FrameType, size: u16, param1: u8, param2: u8, param3: u8) -> PacketHeader {
        PacketHeader {
            kind: kind as u8,
            size,
            param1,
            param2,
            param3,
            timestamp_sec: 0,
            timestamp_nsec: 0,
        }
    }

    fn encode(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = self.kind;
        buf[1] = 0; // padding
        buf[2..4].copy_from_slice(&self.size.to_be_bytes());
        buf[4] = self.param1;
        buf[5] = self.param2;
        buf[6] = self.param3;
        buf[7] = 0; // padding
        buf[8..12].copy_from_slice(&self.timestamp_sec.to_be_bytes());
        buf[12..16].copy_from_slice(&self.timestamp_nsec.to_be_bytes());
        buf
    }

    fn decode(buf: &[u8; HEADER_LEN]) -> PacketHeader {
        PacketHeader {
            kind: buf[0],
            size: u16::from_be_bytes([buf[2], buf[3]]),
            param1: buf[4],
            param2: buf[5],
            param3: buf[6],
            timestamp_sec: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
            timestamp_nsec: u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]),
        }
    }
}

fn now_stamp() -> (u32, u32) {
    let d = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    (d.as_secs() as u32, d.subsec_nanos())
}

/// `send(fd, header, payload_or_none)`: stamps the timestamp, converts
/// multi-byte fields to network order, and writes header plus payload in
/// full, looping on short writes.
pub fn send<W: Write>(
    w: &mut W,
    mut header: PacketHeader,
    payload: Option<&[u8]>,
) -> Result<(), ProtocolError> {
    let (sec, nsec) = now_stamp();
    header.timestamp_sec = sec;
    header.timestamp_nsec = nsec;

    let encoded = header.encode();
    write_all_checked(w, &encoded)?;

    if header.size > 0 {
        if let Some(p) = payload {
            write_all_checked(w, p)?;
        }
    }
    Ok(())
}

fn write_all_checked<W: Write>(w: &mut W, mut buf: &[u8]) -> Result<(), ProtocolError> {
    while !buf.is_empty() {
        match w.write(buf) {
            Ok(0) => return Err(ProtocolError::Eof),
            Ok(n) => buf = &buf[n..],
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes, transparently resuming on a timed-out /
/// would-block read by invoking `on_idle` and retrying. A genuine
/// EOF with zero bytes read is reported as [`ProtocolError::Eof`].
fn read_exact_polling<R: Read>(
    r: &mut R,
    buf: &mut [u8],
    on_idle: &mut dyn FnMut(),
) -> Result<(), ProtocolError> {
    let mut filled = 0;
    while filled < buf.len() {
        match r.read(&mut buf[filled..]) {
            Ok(0) => return Err(ProtocolError::Eof),
            Ok(n) => filled += n,
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                on_idle();
                continue;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }
    Ok(())
}

/// `recv(fd, &header, &payload_out)`: read a full frame, retrying
/// transparently across idle timeouts. `on_idle` is invoked once per idle
/// wakeup and is the hook the client service routine uses to poll the
/// laser-hit flag while blocked.
pub fn recv<R: Read>(
    r: &mut R,
    on_idle: &mut dyn FnMut(),
) -> Result<(PacketHeader, Option<Vec<u8>>), ProtocolError> {
    let mut hdr_buf = [0u8; HEADER_LEN];
    read_exact_polling(r, &mut hdr_buf, on_idle)?;
    let header = PacketHeader::decode(&hdr_buf);

    if header.size == 0 {
        return Ok((header, None));
    }
    if header.size as usize > MAX_PAYLOAD_LEN {
        return Err(ProtocolError::OversizePayload(header.size as usize));
    }

    let mut payload = vec![0u8; header.size as usize];
    read_exact_polling(r, &mut payload, on_idle)?;
    Ok((header, Some(payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_header_fields_except_timestamp() {
        let mut buf = Vec::new();
        let header = PacketHeader::new(FrameType::Move, 0, 1, 2, 3);
        send(&mut buf, header, None).unwrap();

        let mut cursor = Cursor::new(buf);
        let (decoded, payload) = recv(&mut cursor, &mut || {}).unwrap();
        assert_eq!(decoded.kind, FrameType::Move as u8);
        assert_eq!(decoded.param1, 1);
        assert_eq!(decoded.param2, 2);
        assert_eq!(decoded.param3, 3);
        assert_eq!(decoded.size, 0);
        assert!(payload.is_none());
    }

    #[test]
    fn round_trips_payload() {
        let mut buf = Vec::new();
        let msg = b"hello".to_vec();
        let header = PacketHeader::new(FrameType::Chat, msg.len() as u16, 0, 0, 0);
        send(&mut buf, header, Some(&msg)).unwrap();

        let mut cursor = Cursor::new(buf);
        let (decoded, payload) = recv(&mut cursor, &mut || {}).unwrap();
        assert_eq!(decoded.size as usize, msg.len());
        assert_eq!(payload.unwrap(), msg);
    }

    #[test]
    fn size_field_is_network_byte_order() {
        // size=0x0102 -> low byte (0x02) at the higher offset (byte 3).
        let header = PacketHeader::new(FrameType::Chat, 0x0102, 0, 0, 0);
        let encoded = header.encode();
        assert_eq!(encoded[2], 0x01);
        assert_eq!(encoded[3], 0x02);
    }

    #[test]
    fn oversize_payload_is_rejected_before_allocating() {
        // Header claims a payload larger than MAX_PAYLOAD_LEN; recv must
        // reject it without trying to read (or allocate for) that many bytes.
        let header = PacketHeader::new(FrameType::Chat, (MAX_PAYLOAD_LEN + 1) as u16, 0, 0, 0);
        let mut buf = Vec::new();
        buf.extend_from_slice(&header.encode());
        let mut cursor = Cursor::new(buf);
        let result = recv(&mut cursor, &mut || {});
        assert!(matches!(result, Err(ProtocolError::OversizePayload(n)) if n == MAX_PAYLOAD_LEN + 1));
    }

    #[test]
    fn eof_mid_frame_is_an_error() {
        // Header claims a 5-byte payload but the stream ends after the header.
        let header = PacketHeader::new(FrameType::Chat, 5, 0, 0, 0);
        let mut buf = Vec::new();
        buf.extend_from_slice(&header.encode());
        let mut cursor = Cursor::new(buf);
        let result = recv(&mut cursor, &mut || {});
        assert!(result.is_err());
    }

    #[test]
    fn idle_hook_is_invoked_while_waiting_for_more_bytes() {
        struct StallThenData {
            calls: usize,
            stage: usize,
        }
        impl Read for StallThenData {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                if self.stage == 0 {
                    self.stage = 1;
                    return Err(io::Error::new(io::ErrorKind::WouldBlock, "would block"));
                }
                let header = PacketHeader::new(FrameType::Refresh, 0, 0, 0, 0);
                let encoded = header.encode();
                buf[..encoded.len()].copy_from_slice(&encoded);
                Ok(encoded.len())
            }
        }
        let mut stream = StallThenData { calls: 0, stage: 0 };
        let mut idle_calls = 0;
        let (header, _) = recv(&mut stream, &mut || idle_calls += 1).unwrap();
        assert_eq!(header.kind, FrameType::Refresh as u8);
        assert_eq!(idle_calls, 1);
        let _ = stream.calls;
    }
}
