use bytes::{Bytes, BytesMut};
use proptest::prelude::*;
use senax_wire::{varint, Error};

fn encode_u64(value: u64) -> Bytes {
    let mut buf = BytesMut::new();
    varint::write(value, &mut buf);
    buf.freeze()
}

#[test]
fn test_unsigned_boundaries() {
    let cases: &[(u64, usize)] = &[
        (0, 1),
        (1, 1),
        ((1 << 7) - 1, 1),
        (1 << 7, 2),
        ((1 << 14) - 1, 2),
        (1 << 14, 3),
        ((1 << 21) - 1, 3),
        (1 << 21, 4),
        (u32::MAX as u64, 5),
        (u64::MAX, 10),
    ];
    for &(value, len) in cases {
        let mut bytes = encode_u64(value);
        assert_eq!(bytes.len(), len, "length of {}", value);
        assert_eq!(varint::size(value), len, "size of {}", value);
        let decoded: u64 = varint::read(&mut bytes).unwrap();
        assert_eq!(decoded, value);
        assert!(bytes.is_empty());
    }
}

#[test]
fn test_known_encodings() {
    assert_eq!(encode_u64(0).as_ref(), &[0x00]);
    assert_eq!(encode_u64(127).as_ref(), &[0x7f]);
    assert_eq!(encode_u64(128).as_ref(), &[0x80, 0x01]);
    assert_eq!(encode_u64(300).as_ref(), &[0xac, 0x02]);
}

#[test]
fn test_narrow_widths() {
    for value in [0u8, 1, 127, 128, u8::MAX] {
        let mut buf = BytesMut::new();
        varint::write(value, &mut buf);
        assert_eq!(buf.len(), varint::size(value));
        let decoded: u8 = varint::read(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, value);
    }
    for value in [0u16, 127, 128, 16383, 16384, u16::MAX] {
        let mut buf = BytesMut::new();
        varint::write(value, &mut buf);
        assert_eq!(buf.len(), varint::size(value));
        let decoded: u16 = varint::read(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, value);
    }
}

#[test]
fn test_zigzag_mapping() {
    // Small magnitudes of either sign stay small
    let cases: &[(i64, usize)] = &[(0, 1), (-1, 1), (1, 1), (-64, 1), (63, 1), (64, 2), (-65, 2)];
    for &(value, len) in cases {
        let mut buf = BytesMut::new();
        varint::write_signed(value, &mut buf);
        assert_eq!(buf.len(), len, "length of {}", value);
        assert_eq!(varint::size_signed(value), len);
        let decoded: i64 = varint::read_signed(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, value);
    }

    for value in [i32::MIN, -1, 0, 1, i32::MAX] {
        let mut buf = BytesMut::new();
        varint::write_signed(value, &mut buf);
        let decoded: i32 = varint::read_signed(&mut buf.freeze()).unwrap();
        assert_eq!(decoded, value);
    }
}

#[test]
fn test_truncated_input() {
    // Continuation bit set on the last available byte
    let mut bytes = Bytes::from_static(&[0x80, 0x80]);
    let result: Result<u64, _> = varint::read(&mut bytes);
    assert!(matches!(result, Err(Error::InsufficientData { .. })));

    let mut empty = Bytes::new();
    let result: Result<u32, _> = varint::read(&mut empty);
    assert!(matches!(result, Err(Error::InsufficientData { .. })));
}

#[test]
fn test_overflow_is_rejected() {
    // 2^8 does not fit in u8
    let mut bytes = encode_u64(256);
    let result: Result<u8, _> = varint::read(&mut bytes);
    assert!(matches!(result, Err(Error::InvalidVarInt)));

    // Eleven bytes can never be a u64
    let mut bytes = Bytes::from_static(
        &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x01],
    );
    let result: Result<u64, _> = varint::read(&mut bytes);
    assert!(matches!(result, Err(Error::InvalidVarInt)));
}

#[test]
fn test_skip() {
    let mut buf = BytesMut::new();
    varint::write(1u64 << 40, &mut buf);
    varint::write(5u32, &mut buf);
    let mut bytes = buf.freeze();
    varint::skip(&mut bytes).unwrap();
    let next: u32 = varint::read(&mut bytes).unwrap();
    assert_eq!(next, 5);
}

proptest! {
    #[test]
    fn prop_u64_round_trip(value: u64) {
        let mut bytes = encode_u64(value);
        prop_assert_eq!(bytes.len(), varint::size(value));
        let expected_len = std::cmp::max(1, (64 - value.leading_zeros() as usize).div_ceil(7));
        prop_assert_eq!(bytes.len(), expected_len);
        let decoded: u64 = varint::read(&mut bytes).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_u32_round_trip(value: u32) {
        let mut buf = BytesMut::new();
        varint::write(value, &mut buf);
        let decoded: u32 = varint::read(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_i64_round_trip(value: i64) {
        let mut buf = BytesMut::new();
        varint::write_signed(value, &mut buf);
        prop_assert_eq!(buf.len(), varint::size_signed(value));
        let decoded: i64 = varint::read_signed(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded, value);
    }

    #[test]
    fn prop_i16_round_trip(value: i16) {
        let mut buf = BytesMut::new();
        varint::write_signed(value, &mut buf);
        let decoded: i16 = varint::read_signed(&mut buf.freeze()).unwrap();
        prop_assert_eq!(decoded, value);
    }
}
