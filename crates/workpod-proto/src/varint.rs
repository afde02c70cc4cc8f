//! Zig-zag LEB128 signed varints.
//!
//! Byte-compatible with Go's `encoding/binary.PutVarint` / `Varint`, which is
//! what remote agents use for the exit code payload.

use bytes::BufMut;

use crate::exec::ProtoError;

/// Longest encoding of a 64-bit varint.
pub const MAX_VARINT_LEN: usize = 10;

/// Append the varint encoding of `value` to `buf`.
pub fn put_varint(buf: &mut impl BufMut, value: i64) {
    let mut ux = ((value << 1) ^ (value >> 63)) as u64;
    while ux >= 0x80 {
        buf.put_u8((ux as u8) | 0x80);
        ux >>= 7;
    }
    buf.put_u8(ux as u8);
}

/// Decode a varint from the front of `data`.
///
/// Returns the value and the number of bytes consumed.
pub fn read_varint(data: &[u8]) -> Result<(i64, usize), ProtoError> {
    let mut ux: u64 = 0;
    let mut shift = 0u32;

    for (i, &b) in data.iter().enumerate() {
        if i == MAX_VARINT_LEN {
            return Err(ProtoError::VarintOverflow);
        }
        if b < 0x80 {
            if i == MAX_VARINT_LEN - 1 && b > 1 {
                return Err(ProtoError::VarintOverflow);
            }
            ux |= (b as u64) << shift;
            let mut x = (ux >> 1) as i64;
            if ux & 1 != 0 {
                x = !x;
            }
            return Ok((x, i + 1));
        }
        ux |= ((b & 0x7f) as u64) << shift;
        shift += 7;
    }

    Err(ProtoError::IncompleteVarint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::BytesMut;

    fn encode(value: i64) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_varint(&mut buf, value);
        buf.to_vec()
    }

    #[test]
    fn test_matches_go_encoding() {
        // Reference values produced by binary.PutVarint
        assert_eq!(encode(0), vec![0x00]);
        assert_eq!(encode(-1), vec![0x01]);
        assert_eq!(encode(1), vec![0x02]);
        assert_eq!(encode(63), vec![0x7e]);
        assert_eq!(encode(-64), vec![0x7f]);
        assert_eq!(encode(64), vec![0x80, 0x01]);
        assert_eq!(encode(127), vec![0xfe, 0x01]);
        assert_eq!(encode(255), vec![0xfe, 0x03]);
    }

    #[test]
    fn test_extremes() {
        for value in [i64::MIN, i64::MAX, i32::MIN as i64, i32::MAX as i64, 137, -137] {
            let encoded = encode(value);
            assert!(encoded.len() <= MAX_VARINT_LEN);
            let (decoded, used) = read_varint(&encoded).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(used, encoded.len());
        }
    }

    #[test]
    fn test_incomplete() {
        assert!(matches!(
            read_varint(&[0x80, 0x80]),
            Err(ProtoError::IncompleteVarint)
        ));
        assert!(matches!(read_varint(&[]), Err(ProtoError::IncompleteVarint)));
    }

    #[test]
    fn test_overflow() {
        let too_long = [0xffu8; 11];
        assert!(matches!(
            read_varint(&too_long),
            Err(ProtoError::VarintOverflow)
        ));

        let mut tenth_byte_too_big = vec![0xffu8; 9];
        tenth_byte_too_big.push(0x02);
        assert!(matches!(
            read_varint(&tenth_byte_too_big),
            Err(ProtoError::VarintOverflow)
        ));
    }
}
