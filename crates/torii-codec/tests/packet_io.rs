//! End-to-end exercises of the packet codec surface.

use torii_codec::{Encoding, Packet, ReadOnlyPacket, MAX_PACKET_SIZE};

#[test]
fn mixed_endian_round_trip() {
    let mut packet = Packet::new();
    packet.write_u32_little(0xDEADBEEF).unwrap();
    packet.write_u16_big(0x1234).unwrap();
    packet.rewind();

    assert_eq!(packet.read_u32_little().unwrap(), 0xDEADBEEF);
    assert_eq!(packet.read_u16_big().unwrap(), 0x1234);
    assert_eq!(packet.left(), 0);
}

#[test]
fn wire_bytes_match_endianness() {
    let mut packet = Packet::new();
    packet.write_u32_big(0x01020304).unwrap();
    packet.write_u32_little(0x01020304).unwrap();

    assert_eq!(packet.as_bytes(), &[1, 2, 3, 4, 4, 3, 2, 1]);
}

#[test]
fn cp932_field_layout_on_the_wire() {
    let text = "This is CP-932 encoding: 日本語が大好き！";

    let mut packet = Packet::new();
    packet
        .write_string32_little(Encoding::Cp932, text, true)
        .unwrap();

    packet.rewind();
    assert_eq!(packet.read_u32_little().unwrap(), 42);
    assert_eq!(packet.read_array(25).unwrap(), b"This is CP-932 encoding: ");

    packet.rewind();
    assert_eq!(packet.read_string32_little(Encoding::Cp932).unwrap(), text);
}

#[test]
fn views_expose_commands_without_copying() {
    let mut packet = Packet::new();
    packet.write_u16_little(0x1000).unwrap();
    packet.write_array(&[9; 10]).unwrap();
    packet.write_u16_little(0x1001).unwrap();
    packet.write_array(&[7; 4]).unwrap();

    let frame: ReadOnlyPacket = packet.into();

    let mut first = frame.view(2, 10).unwrap();
    let mut second = frame.view(14, 4).unwrap();
    drop(frame);

    // The sub-views keep the backing alive on their own.
    assert_eq!(first.read_array(10).unwrap(), vec![9; 10]);
    assert_eq!(second.read_array(4).unwrap(), vec![7; 4]);
}

#[test]
fn full_capacity_packet() {
    let mut packet = Packet::new();
    packet.write_blank(MAX_PACKET_SIZE as u32).unwrap();
    assert_eq!(packet.size() as usize, MAX_PACKET_SIZE);
    assert!(packet.write_u8(0).is_err());
}

#[test]
fn zero_length_operations_are_no_ops() {
    let mut packet = Packet::new();
    packet.write_array(&[]).unwrap();
    assert_eq!(packet.size(), 0);
    assert_eq!(packet.read_array(0).unwrap(), Vec::<u8>::new());
    assert_eq!(packet.compress(0).unwrap(), 0);
    assert_eq!(packet.decompress(0).unwrap(), 0);
}

#[test]
fn hex_dump_marks_the_cursor() {
    let mut packet = Packet::new();
    packet.write_array(b"torii").unwrap();
    packet.seek(2).unwrap();

    let dump = packet.hex_dump();
    assert!(dump.contains("{72}"));
    assert!(dump.contains("torii"));
}
