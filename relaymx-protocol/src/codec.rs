use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};

/// A single wire frame carries at most this many payload bytes; a logical
/// packet larger than this is split across consecutive frames that share
/// sequence ids, the last of which is shorter than the limit (or, if the
/// logical payload is an exact multiple, a trailing zero-length frame).
pub const MAX_FRAME_LEN: usize = 0x00FF_FFFF;

/// One fully reassembled client<->server packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

/// Incremental decoder for the length-prefixed MySQL packet framing.
///
/// Frames arrive as `u24 length (LE) | u8 sequence_id | payload`. The codec
/// buffers partial frames and reassembles split packets; [`PacketCodec::decode`]
/// returns `Ok(None)` whenever the caller should read more bytes before
/// trying again rather than signalling an error for a short buffer.
#[derive(Default)]
pub struct PacketCodec {
    reassembly: Option<Reassembly>,
}

struct Reassembly {
    sequence_id: u8,
    payload: BytesMut,
}

impl PacketCodec {
    pub fn new() -> Self {
        Self { reassembly: None }
    }

    /// Try to decode one logical packet from `src`, consuming the bytes of
    /// every wire frame it read. Returns `Ok(None)` if `src` doesn't yet
    /// contain a complete frame.
    pub fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>> {
        loop {
            if src.len() < 4 {
                return Ok(None);
            }
            let len = u32::from_le_bytes([src[0], src[1], src[2], 0]) as usize;
            if src.len() < 4 + len {
                return Ok(None);
            }

            let header = src.split_to(4);
            let sequence_id = header[3];
            let frame = src.split_to(len);

            let is_continuation = self.reassembly.is_some();
            let reassembly = self.reassembly.get_or_insert_with(|| Reassembly {
                sequence_id,
                payload: BytesMut::new(),
            });

            if is_continuation && sequence_id != reassembly.sequence_id.wrapping_add(1) {
                self.reassembly = None;
                return Err(ProxyError::Protocol(format!(
                    "out-of-order packet sequence id {sequence_id}"
                )));
            }
            reassembly.sequence_id = sequence_id;
            reassembly.payload.extend_from_slice(&frame);

            if len < MAX_FRAME_LEN {
                let Reassembly { sequence_id, payload } = self.reassembly.take().unwrap();
                return Ok(Some(Packet { sequence_id, payload: payload.freeze() }));
            }
            // Exactly MAX_FRAME_LEN: another frame (possibly zero-length) must follow.
        }
    }
}

/// Write `payload` as one or more wire frames starting at `sequence_id`,
/// splitting it at [`MAX_FRAME_LEN`] boundaries. Returns the next unused
/// sequence id.
pub fn write_packet(payload: &[u8], sequence_id: u8, dst: &mut BytesMut) -> u8 {
    let mut seq = sequence_id;
    let mut remaining = payload;
    loop {
        let chunk_len = remaining.len().min(MAX_FRAME_LEN);
        let (chunk, rest) = remaining.split_at(chunk_len);
        dst.put_u8((chunk_len & 0xFF) as u8);
        dst.put_u8(((chunk_len >> 8) & 0xFF) as u8);
        dst.put_u8(((chunk_len >> 16) & 0xFF) as u8);
        dst.put_u8(seq);
        dst.put_slice(chunk);
        seq = seq.wrapping_add(1);
        remaining = rest;
        if chunk_len < MAX_FRAME_LEN {
            break;
        }
        if remaining.is_empty() {
            // Exact multiple of MAX_FRAME_LEN: terminate with an empty frame.
            dst.put_u8(0);
            dst.put_u8(0);
            dst.put_u8(0);
            dst.put_u8(seq);
            seq = seq.wrapping_add(1);
            break;
        }
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_small_packet() {
        let mut dst = BytesMut::new();
        write_packet(b"select 1", 0, &mut dst);

        let mut codec = PacketCodec::new();
        let packet = codec.decode(&mut dst).unwrap().unwrap();
        assert_eq!(packet.sequence_id, 0);
        assert_eq!(&packet.payload[..], b"select 1");
        assert!(dst.is_empty());
    }

    #[test]
    fn reports_need_more_on_a_short_buffer() {
        let mut dst = BytesMut::new();
        dst.extend_from_slice(&[5, 0, 0, 0, b'h', b'i']);
        let mut codec = PacketCodec::new();
        assert!(codec.decode(&mut dst).unwrap().is_none());
    }

    #[test]
    fn reassembles_a_split_packet_across_frames() {
        let big = vec![0x42u8; MAX_FRAME_LEN + 10];
        let mut dst = BytesMut::new();
        write_packet(&big, 7, &mut dst);

        let mut codec = PacketCodec::new();
        let packet = codec.decode(&mut dst).unwrap().unwrap();
        assert_eq!(packet.payload.len(), big.len());
        assert_eq!(&packet.payload[..], &big[..]);
    }

    #[test]
    fn rejects_an_out_of_order_continuation() {
        let mut dst = BytesMut::new();
        // First frame: full MAX_FRAME_LEN, sequence 0, so a continuation is expected.
        dst.put_u8(0xFF);
        dst.put_u8(0xFF);
        dst.put_u8(0xFF);
        dst.put_u8(0);
        dst.put_bytes(0, MAX_FRAME_LEN);
        // Continuation arrives with the wrong sequence id (2 instead of 1).
        dst.put_u8(1);
        dst.put_u8(0);
        dst.put_u8(0);
        dst.put_u8(2);
        dst.put_u8(0xAA);

        let mut codec = PacketCodec::new();
        assert!(codec.decode(&mut dst).is_err());
    }
}
