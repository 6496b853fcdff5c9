//! RTP wire format
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! ```

use bytes::{Buf, BufMut};

use crate::error::PacketError;

/// The only RTP version accepted or produced
pub const RTP_VERSION: u8 = 2;

/// Size of the fixed RTP header
pub const RTP_HEADER_SIZE: usize = 12;

/// Dynamic payload type conventionally used for AES67 streams
pub const DEFAULT_PAYLOAD_TYPE: u8 = 96;

/// Fixed RTP header fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Create a version 2 header with no CSRCs, padding or extension
    pub fn new(payload_type: u8, sequence_number: u16, timestamp: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: payload_type & 0x7F,
            sequence_number,
            timestamp,
            ssrc,
        }
    }

    /// Parse the fixed 12-byte header
    pub fn parse(data: &[u8]) -> Result<Self, PacketError> {
        if data.len() < RTP_HEADER_SIZE {
            return Err(PacketError::TooShort(data.len()));
        }

        let mut buf = &data[..RTP_HEADER_SIZE];
        let b0 = buf.get_u8();
        let b1 = buf.get_u8();

        Ok(Self {
            version: b0 >> 6,
            padding: b0 & 0x20 != 0,
            extension: b0 & 0x10 != 0,
            csrc_count: b0 & 0x0F,
            marker: b1 & 0x80 != 0,
            payload_type: b1 & 0x7F,
            sequence_number: buf.get_u16(),
            timestamp: buf.get_u32(),
            ssrc: buf.get_u32(),
        })
    }

    /// Serialize the fixed header into the start of `out`.
    ///
    /// Returns the number of bytes written, or `None` if `out` is too short.
    pub fn write_to(&self, out: &mut [u8]) -> Option<usize> {
        if out.len() < RTP_HEADER_SIZE {
            return None;
        }

        let b0 = (self.version & 0x03) << 6
            | (self.padding as u8) << 5
            | (self.extension as u8) << 4
            | (self.csrc_count & 0x0F);
        let b1 = (self.marker as u8) << 7 | (self.payload_type & 0x7F);

        let mut buf = &mut out[..RTP_HEADER_SIZE];
        buf.put_u8(b0);
        buf.put_u8(b1);
        buf.put_u16(self.sequence_number);
        buf.put_u32(self.timestamp);
        buf.put_u32(self.ssrc);

        Some(RTP_HEADER_SIZE)
    }
}

/// A parsed packet borrowing its payload from the receive buffer
#[derive(Debug, Clone, Copy)]
pub struct RtpPacket<'a> {
    pub header: RtpHeader,
    pub payload: &'a [u8],
}

impl<'a> RtpPacket<'a> {
    /// Parse a datagram, skipping CSRCs and any header extension and
    /// stripping padding.
    ///
    /// Only structural checks happen here; version and payload type are
    /// left to the caller.
    pub fn parse(data: &'a [u8]) -> Result<Self, PacketError> {
        let header = RtpHeader::parse(data)?;
        let mut body = &data[RTP_HEADER_SIZE..];

        let csrc_len = header.csrc_count as usize * 4;
        if body.remaining() < csrc_len {
            return Err(PacketError::Truncated);
        }
        body.advance(csrc_len);

        if header.extension {
            if body.remaining() < 4 {
                return Err(PacketError::Truncated);
            }
            let _profile = body.get_u16();
            let ext_len = body.get_u16() as usize * 4;
            if body.remaining() < ext_len {
                return Err(PacketError::Truncated);
            }
            body.advance(ext_len);
        }

        if header.padding {
            let pad = match body.last() {
                Some(&pad) => pad,
                None => return Err(PacketError::BadPadding(0)),
            };
            if pad == 0 || pad as usize > body.len() {
                return Err(PacketError::BadPadding(pad));
            }
            body = &body[..body.len() - pad as usize];
        }

        Ok(Self {
            header,
            payload: body,
        })
    }
}

/// Outcome of feeding a sequence number to a [`SequenceTracker`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    /// First packet seen since the last reset
    First,
    /// Exactly the expected sequence number
    InOrder,
    /// `n` packets were skipped before this one
    Gap(u16),
    /// Older than expected: reordered or duplicated
    Late,
}

/// Tracks the expected next sequence number across 16-bit wraparound
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    expected: Option<u16>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an arriving sequence number.
    ///
    /// Forward jumps of less than half the sequence space are gaps and
    /// advance the expectation. Anything else is late and leaves the
    /// expectation where it was.
    pub fn observe(&mut self, sequence: u16) -> SequenceEvent {
        let expected = match self.expected {
            Some(expected) => expected,
            None => {
                self.expected = Some(sequence.wrapping_add(1));
                return SequenceEvent::First;
            }
        };

        let distance = sequence.wrapping_sub(expected);
        if distance >= 0x8000 {
            return SequenceEvent::Late;
        }

        self.expected = Some(sequence.wrapping_add(1));
        if distance == 0 {
            SequenceEvent::InOrder
        } else {
            SequenceEvent::Gap(distance)
        }
    }

    /// Next sequence number expected, if any packet has been seen
    pub fn expected(&self) -> Option<u16> {
        self.expected
    }

    /// Forget the expectation; the next packet is treated as the first
    pub fn reset(&mut self) {
        self.expected = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn packet(header: &RtpHeader, extra: &[u8]) -> Vec<u8> {
        let mut data = vec![0u8; RTP_HEADER_SIZE];
        header.write_to(&mut data).unwrap();
        data.extend_from_slice(extra);
        data
    }

    #[test]
    fn test_header_layout() {
        let mut header = RtpHeader::new(97, 0x1234, 0xDEADBEEF, 0x01020304);
        header.marker = true;

        let mut out = [0u8; 12];
        assert_eq!(header.write_to(&mut out), Some(12));
        assert_eq!(
            out,
            [0x80, 0xE1, 0x12, 0x34, 0xDE, 0xAD, 0xBE, 0xEF, 0x01, 0x02, 0x03, 0x04]
        );
        assert_eq!(RtpHeader::parse(&out).unwrap(), header);
    }

    #[test]
    fn test_short_buffers() {
        assert_eq!(RtpHeader::parse(&[0x80; 11]), Err(PacketError::TooShort(11)));
        let header = RtpHeader::new(96, 0, 0, 0);
        assert_eq!(header.write_to(&mut [0u8; 8]), None);
    }

    #[test]
    fn test_version_is_reported_not_enforced() {
        let data = [0x40, 96, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0, 1, 2];
        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(packet.header.version, 1);
        assert_eq!(packet.payload, &[1, 2]);
    }

    #[test]
    fn test_csrc_and_extension_skipped() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.csrc_count = 2;
        header.extension = true;

        let mut extra = vec![0xAA; 8]; // two CSRCs
        extra.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // one extension word follows
        extra.extend_from_slice(&[0xCC; 4]);
        extra.extend_from_slice(&[7, 8, 9]);

        let data = packet(&header, &extra);
        let parsed = RtpPacket::parse(&data).unwrap();
        assert_eq!(parsed.payload, &[7, 8, 9]);
    }

    #[test]
    fn test_truncated_csrc_list() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.csrc_count = 3;
        let data = packet(&header, &[0; 8]);
        assert_eq!(RtpPacket::parse(&data).unwrap_err(), PacketError::Truncated);
    }

    #[test]
    fn test_padding_stripped() {
        let mut header = RtpHeader::new(96, 1, 2, 3);
        header.padding = true;

        let data = packet(&header, &[1, 2, 3, 4, 0, 0, 3]);
        assert_eq!(RtpPacket::parse(&data).unwrap().payload, &[1, 2, 3, 4]);

        let bad = packet(&header, &[1, 2, 9]);
        assert_eq!(RtpPacket::parse(&bad).unwrap_err(), PacketError::BadPadding(9));
    }

    #[test]
    fn test_sequence_gap() {
        let mut tracker = SequenceTracker::new();
        assert_eq!(tracker.observe(5), SequenceEvent::First);
        assert_eq!(tracker.observe(6), SequenceEvent::InOrder);
        assert_eq!(tracker.observe(9), SequenceEvent::Gap(2));
        assert_eq!(tracker.expected(), Some(10));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(65534);
        assert_eq!(tracker.observe(65535), SequenceEvent::InOrder);
        assert_eq!(tracker.observe(0), SequenceEvent::InOrder);
        assert_eq!(tracker.observe(3), SequenceEvent::Gap(2));
    }

    #[test]
    fn test_late_packet_keeps_expectation() {
        let mut tracker = SequenceTracker::new();
        tracker.observe(100);
        tracker.observe(101);
        assert_eq!(tracker.observe(99), SequenceEvent::Late);
        assert_eq!(tracker.observe(102), SequenceEvent::InOrder);

        tracker.reset();
        assert_eq!(tracker.observe(7), SequenceEvent::First);
    }
}
