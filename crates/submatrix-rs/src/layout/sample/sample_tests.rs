use super::*;

#[test]
fn zeroed_is_clean_and_sized() {
    let b = BlockBuf::zeroed(64);
    assert_eq!(b.len(), 64);
    assert_eq!(b.samples(), 16);
    assert!(!b.is_dirty());
    assert!(b.as_bytes().iter().all(|&x| x == 0));
}

#[test]
fn big_endian_layout_matches_ieee_bytes() {
    let mut b = BlockBuf::zeroed(8);
    b.set_f32(1, 1.0, ByteOrder::Big);
    assert_eq!(&b.as_bytes()[4..8], &[0x3F, 0x80, 0x00, 0x00]);
    assert_eq!(b.get_f32(1, ByteOrder::Big), 1.0);
}

#[test]
fn little_endian_layout_matches_ieee_bytes() {
    let mut b = BlockBuf::zeroed(8);
    b.set_f32(0, 1.0, ByteOrder::Little);
    assert_eq!(&b.as_bytes()[0..4], &[0x00, 0x00, 0x80, 0x3F]);
    assert_eq!(b.get_f32(0, ByteOrder::Little), 1.0);
}

#[test]
fn byte_order_mismatch_changes_value() {
    let mut b = BlockBuf::zeroed(4);
    b.set_f32(0, 3.5, ByteOrder::Big);
    assert_ne!(b.get_f32(0, ByteOrder::Little), 3.5);
}

#[test]
fn set_marks_dirty_and_mark_clean_resets() {
    let mut b = BlockBuf::zeroed(16);
    b.set_f32(2, -7.25, ByteOrder::Big);
    assert!(b.is_dirty());
    b.mark_clean();
    assert!(!b.is_dirty());
    assert_eq!(b.get_f32(2, ByteOrder::Big), -7.25);
}

#[test]
fn sum_adds_every_sample() {
    let mut b = BlockBuf::zeroed(16);
    for (i, v) in [1.0f32, 2.0, 3.5, -0.5].into_iter().enumerate() {
        b.set_f32(i, v, ByteOrder::Little);
    }
    assert!((b.sum(ByteOrder::Little) - 6.0).abs() < 1e-9);
}

#[test]
fn i32_helpers_roundtrip_both_orders() {
    let mut raw = [0u8; 4];
    ByteOrder::Big.write_i32(&mut raw, 874_032_077);
    assert_eq!(ByteOrder::Big.read_i32(&raw), 874_032_077);
    ByteOrder::Little.write_i32(&mut raw, -12);
    assert_eq!(ByteOrder::Little.read_i32(&raw), -12);
}

#[test]
#[should_panic(expected = "out of range")]
fn get_panics_out_of_bounds() {
    let b = BlockBuf::zeroed(4);
    let _ = b.get_f32(1, ByteOrder::Big);
}
