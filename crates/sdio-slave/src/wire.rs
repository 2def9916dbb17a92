//! Packet wire format
//!
//! A packet is a sequence of payload records followed by an end word and
//! zero padding up to the block size:
//!
//! ```text
//! +--------+--------+------+---------+----------------------+-----+
//! | len lo | len hi | chan | subtype | data[len], pad to 4  | ... |  END  | 0-pad to BLOCK
//! +--------+--------+------+---------+----------------------+-----+
//! ```
//!
//! `len` counts data bytes only, little-endian. The end word is
//! [`PACKET_END_MAGIC`]; an all-zero header word also ends the packet, which
//! makes trailing block padding self-terminating.

/// Bytes in one payload header.
pub const PAYLOAD_HEADER_LEN: usize = 4;

/// Reserved header word marking the end of a packet.
pub const PACKET_END_MAGIC: u32 = 0x5A5A_A5A5;

/// Header preceding every payload in a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PayloadHeader {
    /// Data bytes following the header (excluding alignment padding).
    pub len: u16,
    /// Logical channel the payload belongs to.
    pub channel: u8,
    /// Application-defined subtype, carried through unchanged.
    pub subtype: u8,
}

/// One decoded header word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum HeaderWord {
    /// End of packet (magic or all-zero).
    End,
    /// A payload follows.
    Payload(PayloadHeader),
}

impl PayloadHeader {
    /// Encode as four wire bytes.
    #[must_use]
    pub const fn pack(&self) -> [u8; PAYLOAD_HEADER_LEN] {
        let len = self.len.to_le_bytes();
        [len[0], len[1], self.channel, self.subtype]
    }

    /// Bytes this record occupies on the wire, header and padding included.
    #[must_use]
    pub const fn record_len(&self) -> usize {
        record_len(self.len as usize)
    }
}

/// Decode the first header word of `bytes`.
///
/// Returns `None` if fewer than [`PAYLOAD_HEADER_LEN`] bytes are available.
#[must_use]
pub fn unpack(bytes: &[u8]) -> Option<HeaderWord> {
    let word: [u8; PAYLOAD_HEADER_LEN] = bytes.get(..PAYLOAD_HEADER_LEN)?.try_into().ok()?;
    let raw = u32::from_le_bytes(word);
    if raw == PACKET_END_MAGIC || raw == 0 {
        return Some(HeaderWord::End);
    }
    let [l0, l1, channel, subtype] = word;
    Some(HeaderWord::Payload(PayloadHeader {
        len: u16::from_le_bytes([l0, l1]),
        channel,
        subtype,
    }))
}

/// End-of-packet word as bytes.
#[must_use]
pub const fn end_word() -> [u8; PAYLOAD_HEADER_LEN] {
    PACKET_END_MAGIC.to_le_bytes()
}

/// `len` rounded up to the 4-byte payload alignment.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // Safety: len <= u16::MAX, far below usize::MAX - 3
pub const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// Wire size of a record carrying `data_len` bytes.
#[must_use]
#[allow(clippy::arithmetic_side_effects)] // Safety: data_len <= u16::MAX
pub const fn record_len(data_len: usize) -> usize {
    PAYLOAD_HEADER_LEN + align4(data_len)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    // ---- pack/unpack tests ----

    #[test]
    fn test_header_layout_is_little_endian() {
        let h = PayloadHeader {
            len: 0x0140,
            channel: 2,
            subtype: 7,
        };
        assert_eq!(h.pack(), [0x40, 0x01, 2, 7]);
    }

    #[test]
    fn test_unpack_payload_header() {
        let word = unpack(&[0x80, 0x00, 1, 3, 0xFF]).unwrap();
        assert_eq!(
            word,
            HeaderWord::Payload(PayloadHeader {
                len: 128,
                channel: 1,
                subtype: 3
            })
        );
    }

    #[test]
    fn test_unpack_magic_is_end() {
        assert_eq!(unpack(&end_word()), Some(HeaderWord::End));
    }

    #[test]
    fn test_unpack_zero_is_end() {
        assert_eq!(unpack(&[0, 0, 0, 0]), Some(HeaderWord::End));
    }

    #[test]
    fn test_unpack_short_input_is_none() {
        assert_eq!(unpack(&[1, 0, 0]), None);
        assert_eq!(unpack(&[]), None);
    }

    // ---- alignment tests ----

    #[test]
    fn test_align4() {
        assert_eq!(align4(0), 0);
        assert_eq!(align4(1), 4);
        assert_eq!(align4(4), 4);
        assert_eq!(align4(63), 64);
    }

    #[test]
    fn test_record_len_includes_header_and_padding() {
        assert_eq!(record_len(64), 68);
        assert_eq!(record_len(5), 12);
        let h = PayloadHeader {
            len: 1,
            channel: 0,
            subtype: 0,
        };
        assert_eq!(h.record_len(), 8);
    }

    proptest::proptest! {
        #[test]
        fn prop_unpack_inverts_pack(len: u16, channel: u8, subtype: u8, tail: u8) {
            let h = PayloadHeader { len, channel, subtype };
            let mut bytes = h.pack().to_vec();
            bytes.push(tail);
            let raw = u32::from_le_bytes(h.pack());
            let expected = if raw == PACKET_END_MAGIC || raw == 0 {
                HeaderWord::End
            } else {
                HeaderWord::Payload(h)
            };
            proptest::prop_assert_eq!(unpack(&bytes), Some(expected));
        }
    }
}
