use std::sync::Arc;

use bytes::Bytes;
use senax_wire::{BufferPool, Error, Reader, Writer};

#[test]
fn test_fixed_width_little_endian() {
    let mut writer = Writer::new();
    writer.write_u16_le(0x0102);
    writer.write_u32_le(0x03040506);
    writer.write_u64_le(0x0708090a0b0c0d0e);
    assert_eq!(writer.position(), 14);

    let bytes = writer.into_bytes();
    assert_eq!(&bytes[..2], &[0x02, 0x01]);
    assert_eq!(&bytes[2..6], &[0x06, 0x05, 0x04, 0x03]);

    let mut reader = Reader::new(bytes);
    assert_eq!(reader.read_u16_le().unwrap(), 0x0102);
    assert_eq!(reader.read_u32_le().unwrap(), 0x03040506);
    assert_eq!(reader.read_u64_le().unwrap(), 0x0708090a0b0c0d0e);
    assert_eq!(reader.remaining(), 0);
}

#[test]
fn test_writer_spills_across_segments() {
    let mut writer = Writer::with_segment_size(16);
    for i in 0..10u64 {
        writer.write_u64_le(i);
    }
    let payload: Vec<u8> = (0..40).collect();
    writer.write_length_prefixed(&payload);
    assert_eq!(writer.position(), 80 + 1 + 40);
    assert!(writer.segment_count() > 1);

    let segments = writer.into_segments();
    assert!(segments.len() > 1);
    assert_eq!(segments.iter().map(Bytes::len).sum::<usize>(), 121);

    let mut reader = Reader::from_segments(segments);
    for i in 0..10u64 {
        assert_eq!(reader.read_u64_le().unwrap(), i);
    }
    assert_eq!(reader.read_length_prefixed().unwrap().as_ref(), payload.as_slice());
    assert_eq!(reader.position(), reader.length());
}

#[test]
fn test_reader_fast_path_is_zero_copy() {
    let source = Bytes::from_static(b"hello world");
    let mut reader = Reader::new(source.clone());
    assert!(reader.is_contiguous(5));
    let hello = reader.read_bytes(5).unwrap();
    assert_eq!(hello.as_ref(), b"hello");
    assert_eq!(hello.as_ptr(), source.as_ptr());
}

#[test]
fn test_reader_slow_path_crosses_segments() {
    let segments = vec![
        Bytes::from_static(&[1, 2, 3]),
        Bytes::new(),
        Bytes::from_static(&[4, 5]),
        Bytes::from_static(&[6, 7, 8, 9]),
    ];
    let mut reader = Reader::from_segments(segments);
    assert_eq!(reader.length(), 9);

    reader.skip(1).unwrap();
    assert!(!reader.is_contiguous(4));
    let span = reader.read_bytes(4).unwrap();
    assert_eq!(span.as_ref(), &[2, 3, 4, 5]);
    assert_eq!(reader.position(), 5);

    // A u32 whose bytes are split over two segments
    let mut reader = Reader::from_segments(
        vec![Bytes::from_static(&[0x78, 0x56]), Bytes::from_static(&[0x34, 0x12])],
    );
    assert_eq!(reader.read_u32_le().unwrap(), 0x12345678);
}

#[test]
fn test_reading_past_end_fails() {
    let mut reader = Reader::new(Bytes::from_static(&[1, 2, 3]));
    let err = reader.read_u32_le().unwrap_err();
    assert!(matches!(err, Error::InsufficientData { needed: 4, remaining: 3 }));
    // Nothing was consumed
    assert_eq!(reader.position(), 0);

    let mut reader = Reader::new(Bytes::new());
    assert!(matches!(reader.read_u8(), Err(Error::InsufficientData { .. })));
    assert!(matches!(reader.skip(1), Err(Error::InsufficientData { .. })));
}

#[test]
fn test_copy_has_independent_cursor() {
    let mut reader = Reader::from(vec![10u8, 20, 30, 40]);
    reader.read_u8().unwrap();

    let mut peek = reader.copy();
    assert_eq!(peek.read_u8().unwrap(), 20);
    assert_eq!(peek.read_u8().unwrap(), 30);
    assert_eq!(reader.position(), 1);
    assert_eq!(reader.read_u8().unwrap(), 20);

    let mut fork = reader.fork_at(3).unwrap();
    assert_eq!(fork.read_u8().unwrap(), 40);
    assert!(reader.fork_at(5).is_err());
}

#[test]
fn test_varints_through_reader() {
    let mut writer = Writer::with_segment_size(16);
    for value in [0u64, 127, 128, 1 << 35, u64::MAX] {
        writer.write_var_u64(value);
    }
    writer.write_var_i32(-3);
    writer.write_var_i64(i64::MIN);

    let mut reader = Reader::from(writer);
    for value in [0u64, 127, 128, 1 << 35, u64::MAX] {
        assert_eq!(reader.read_var_u64().unwrap(), value);
    }
    assert_eq!(reader.read_var_i32().unwrap(), -3);
    assert_eq!(reader.read_var_i64().unwrap(), i64::MIN);
}

#[test]
fn test_buffer_pool_reuses_segments() {
    let pool = Arc::new(BufferPool::new(32));
    assert_eq!(pool.segment_size(), 32);
    assert_eq!(pool.retained(), 0);

    let mut writer = Writer::with_pool(pool.clone());
    for i in 0..20u32 {
        writer.write_u32_le(i);
    }
    let bytes = writer.into_bytes();
    assert_eq!(bytes.len(), 80);
    assert!(pool.retained() > 0);

    let retained = pool.retained();
    let segment = pool.rent(8);
    assert_eq!(pool.retained(), retained - 1);
    assert!(segment.capacity() >= 32);
    pool.give_back(segment);
    assert_eq!(pool.retained(), retained);

    // Default pool uses 4 KiB segments
    assert_eq!(BufferPool::default().segment_size(), 4096);
}
