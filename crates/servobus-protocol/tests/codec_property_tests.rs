//! 帧编解码的属性测试

use servobus_protocol::{
    BROADCAST_ID, FrameScanner, Instruction, MAX_PARAMS_LEN, Packet, StatusFlags, StatusPacket, decode,
    decode_status,
};

use proptest::prelude::*;

fn instruction() -> impl Strategy<Value = Instruction> {
    prop_oneof![
        Just(Instruction::Ping),
        Just(Instruction::Read),
        Just(Instruction::Write),
        Just(Instruction::RegWrite),
        Just(Instruction::Action),
        Just(Instruction::SyncRead),
        Just(Instruction::SyncWrite),
    ]
}

fn packet() -> impl Strategy<Value = Packet> {
    (
        0u8..=BROADCAST_ID,
        instruction(),
        prop::collection::vec(any::<u8>(), 0..=MAX_PARAMS_LEN),
    )
        .prop_map(|(id, instruction, params)| Packet::new(id, instruction, params).unwrap())
}

proptest! {
    /// 任意合法帧编码后可以无损解码
    #[test]
    fn encode_decode_roundtrip(packet in packet()) {
        let bytes = packet.encode();
        prop_assert_eq!(bytes.len(), packet.params().len() + 6);
        prop_assert_eq!(decode(&bytes).unwrap(), packet);
    }

    /// Ping/Read 快捷构造器对任意合法 id 同样可以无损解码，0xFF 被拒绝
    #[test]
    fn shortcut_constructors_roundtrip(id in any::<u8>(), address in any::<u8>(), len in any::<u8>()) {
        match (Packet::ping(id), Packet::read(id, address, len)) {
            (Ok(ping), Ok(read)) => {
                prop_assert!(id != 0xFF);
                prop_assert_eq!(decode(&ping.encode()).unwrap(), ping);
                prop_assert_eq!(decode(&read.encode()).unwrap(), read);
            },
            (Err(_), Err(_)) => prop_assert_eq!(id, 0xFF),
            _ => prop_assert!(false, "ping and read disagree on id {}", id),
        }
    }

    /// 修改任意一个字节都不会解码出一个不同的帧
    #[test]
    fn single_byte_corruption_never_yields_wrong_packet(
        packet in packet(),
        pos in any::<prop::sample::Index>(),
        flip in 1u8..=255,
    ) {
        let mut bytes = packet.encode();
        let i = pos.index(bytes.len());
        bytes[i] ^= flip;
        match decode(&bytes) {
            Err(_) => {},
            Ok(decoded) => prop_assert_eq!(decoded, packet),
        }
    }

    /// 截断的帧总是报错
    #[test]
    fn truncated_frame_rejected(packet in packet(), cut in any::<prop::sample::Index>()) {
        let bytes = packet.encode();
        let len = cut.index(bytes.len());
        prop_assert!(decode(&bytes[..len]).is_err());
    }

    /// 分帧器在任意切分方式下都能还原首尾相接的应答
    #[test]
    fn scanner_splits_concatenated_replies(
        ids in prop::collection::vec(0u8..=0xFC, 1..8),
        chunk in 1usize..16,
    ) {
        let stream: Vec<u8> = ids
            .iter()
            .flat_map(|id| StatusPacket::new(*id, StatusFlags(0), vec![*id, 0x00]).unwrap().encode())
            .collect();

        let mut scanner = FrameScanner::new();
        let mut seen = Vec::new();
        for piece in stream.chunks(chunk) {
            scanner.extend(piece);
            while let Some(frame) = scanner.next_frame() {
                seen.push(frame.unwrap().id);
            }
        }
        prop_assert_eq!(seen, ids);
        prop_assert_eq!(scanner.buffered(), 0);
    }

    /// 状态帧往返
    #[test]
    fn status_roundtrip(
        id in 0u8..=0xFC,
        error in any::<u8>(),
        params in prop::collection::vec(any::<u8>(), 0..32),
    ) {
        let status = StatusPacket::new(id, StatusFlags(error), params).unwrap();
        prop_assert_eq!(decode_status(&status.encode()).unwrap(), status);
    }
}
