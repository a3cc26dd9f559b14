//! 协议常量定义

// ============================================================================
// 帧结构
// ============================================================================

/// 帧头魔数（两个字节均为 0xFF）
pub const HEADER: [u8; 2] = [0xFF, 0xFF];

/// 广播 ID（所有设备都会处理，只有 Ping 会收到应答）
pub const BROADCAST_ID: u8 = 0xFE;

/// 最大可分配的设备 ID
pub const MAX_ID: u8 = 0xFC;

/// 整帧最大长度（固件限制）
pub const MAX_PACKET_LEN: usize = 250;

/// 帧头 + ID + 长度 + 指令 + 校验和
pub const FRAME_OVERHEAD: usize = 6;

/// 单帧参数的最大字节数
pub const MAX_PARAMS_LEN: usize = MAX_PACKET_LEN - FRAME_OVERHEAD;

/// 无参数状态帧的长度（Ping 应答）
pub const STATUS_PACKET_LEN: usize = FRAME_OVERHEAD;

/// 帧内字段偏移
pub mod idx {
    pub const ID: usize = 2;
    pub const LENGTH: usize = 3;
    /// 指令帧中为指令码，状态帧中为错误位
    pub const INSTRUCTION: usize = 4;
    pub const PARAM_0: usize = 5;
}

// ============================================================================
// 状态帧错误位
// ============================================================================

pub const ERRBIT_VOLTAGE: u8 = 1 << 0;
pub const ERRBIT_ANGLE: u8 = 1 << 1;
pub const ERRBIT_OVERHEAT: u8 = 1 << 2;
pub const ERRBIT_OVERELE: u8 = 1 << 3;
pub const ERRBIT_OVERLOAD: u8 = 1 << 5;

// ============================================================================
// 波特率
// ============================================================================

/// 设备支持的波特率（从高到低），扫描时的默认候选集
pub const SUPPORTED_BAUD_RATES: [u32; 11] = [
    1_000_000, 500_000, 250_000, 128_000, 115_200, 57_600, 38_400, 19_200, 14_400, 9_600, 4_800,
];

/// 出厂默认波特率
pub const DEFAULT_BAUD_RATE: u32 = 1_000_000;

/// 单字节在线路上的传输时间（毫秒，8N1 共 10 bit）
pub fn byte_time_ms(baud_rate: u32) -> f64 {
    (1000.0 / f64::from(baud_rate.max(1))) * 10.0
}
