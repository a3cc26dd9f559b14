//! 设备发现
//!
//! 广播 Ping 后，总线上的每个设备都会应答，应答可能首尾相接地到达。
//! 收集方式：持续读取，直到连续 `quiet_window` 没有任何字节，或者达到
//! 按波特率计算的总窗口；然后用 [`FrameScanner`] 切分所有应答，损坏的帧
//! 记录警告后跳过。
//!
//! 所有函数都要求 `&mut BusSession`，因此发现过程不可能与普通读写交错。

use crate::error::{DiscoveryError, ExchangeError};
use crate::session::BusSession;
use servobus_protocol::{
    Access, BROADCAST_ID, FrameError, FrameScanner, Packet, RawFrame, RegisterDescriptor, RegisterWidth, StatusFlags,
};
use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;
use tracing::{debug, info, warn};

/// `ModelNumber` 在所有系列中的位置相同
const MODEL_NUMBER: RegisterDescriptor = RegisterDescriptor {
    name: "ModelNumber",
    address: 3,
    width: RegisterWidth::Word,
    signed: false,
    sign_bit: None,
    access: Access::ReadOnly,
};

/// 在指定波特率下广播 Ping，返回 `id → 型号编号`
///
/// # 错误
/// - `DiscoveryError::Unsupported`: 协议 1 不支持广播 Ping
/// - `DiscoveryError::Transport`: 端口错误（超时不算错误，只是没有设备）
pub fn broadcast_ping(session: &mut BusSession, baud_rate: u32) -> Result<BTreeMap<u8, u16>, DiscoveryError> {
    let protocol = session.protocol();
    if !protocol.supports_broadcast_ping() {
        return Err(DiscoveryError::Unsupported(protocol));
    }

    session.set_baud_rate(baud_rate)?;
    let ids = collect_ping_replies(session)?;

    let mut found = BTreeMap::new();
    for id in ids {
        if let Some(model_number) = read_model_number(session, id)? {
            found.insert(id, model_number);
        }
    }

    info!(baud_rate, devices = found.len(), "Broadcast ping finished");
    Ok(found)
}

/// 依次尝试每个波特率
///
/// 某个波特率下没有设备不是错误，只是结果为空。结束后恢复会话原来的波特率。
///
/// # 错误
/// - `DiscoveryError::ScanInterrupted`: 某个波特率失败，携带已完成的结果
pub fn scan_baud_rates(
    session: &mut BusSession,
    rates: &[u32],
) -> Result<BTreeMap<u32, BTreeMap<u8, u16>>, DiscoveryError> {
    let protocol = session.protocol();
    if !protocol.supports_broadcast_ping() {
        return Err(DiscoveryError::Unsupported(protocol));
    }

    let original = session.baud_rate();
    let mut results = BTreeMap::new();
    let mut failure = None;

    for &rate in rates {
        match broadcast_ping(session, rate) {
            Ok(found) => {
                debug!(rate, ids = ?found.keys().collect::<Vec<_>>(), "Scanned baud rate");
                results.insert(rate, found);
            },
            Err(e) => {
                failure = Some((rate, e));
                break;
            },
        }
    }

    let restored = session.set_baud_rate(original);
    if let Some((rate, source)) = failure {
        warn!(rate, completed = results.len(), "Baud rate scan interrupted: {}", source);
        return Err(DiscoveryError::ScanInterrupted {
            rate,
            scanned: results,
            source: Box::new(source),
        });
    }
    restored?;
    Ok(results)
}

/// Ping 单个设备，应答时返回其型号编号
pub fn ping(session: &mut BusSession, id: u8) -> Result<Option<u16>, DiscoveryError> {
    match session.transact(&Packet::ping(id)?, 0) {
        Ok(status) => {
            log_status_flags(status.id, status.error);
            read_model_number(session, id)
        },
        Err(e) if e.is_timeout() => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn collect_ping_replies(session: &mut BusSession) -> Result<BTreeSet<u8>, DiscoveryError> {
    session.send(&Packet::ping(BROADCAST_ID)?)?;

    let window = session.timeouts().broadcast_window(session.baud_rate());
    let quiet = session.timeouts().quiet_window();
    let start = Instant::now();
    let mut last_rx = start;
    let mut scanner = FrameScanner::new();
    let mut ids = BTreeSet::new();

    loop {
        let now = Instant::now();
        let window_left = window.saturating_sub(now - start);
        let quiet_left = quiet.saturating_sub(now - last_rx);
        if window_left.is_zero() || quiet_left.is_zero() {
            break;
        }

        let bytes = session.transport_mut().read_available(window_left.min(quiet_left))?;
        if bytes.is_empty() {
            continue;
        }
        last_rx = Instant::now();
        scanner.extend(&bytes);
        while let Some(result) = scanner.next_frame() {
            accept_reply(result, &mut ids);
        }
    }

    for result in scanner.finish() {
        accept_reply(result, &mut ids);
    }
    if scanner.discarded() > 0 {
        debug!(bytes = scanner.discarded(), "Discarded noise while collecting ping replies");
    }
    Ok(ids)
}

fn accept_reply(result: Result<RawFrame, FrameError>, ids: &mut BTreeSet<u8>) {
    match result {
        Ok(frame) => {
            let status = frame.into_status();
            log_status_flags(status.id, status.error);
            if !ids.insert(status.id) {
                warn!(id = status.id, "Duplicate ping reply, ids may collide on the bus");
            }
        },
        Err(e) => warn!("Skipping corrupted ping reply: {}", e),
    }
}

fn log_status_flags(id: u8, flags: StatusFlags) {
    if !flags.is_ok() {
        warn!(id, %flags, "Device reports error flags");
    }
}

/// 读取型号编号；设备不应答或应答损坏时返回 `None`
fn read_model_number(session: &mut BusSession, id: u8) -> Result<Option<u16>, DiscoveryError> {
    let packet = Packet::read(id, MODEL_NUMBER.address as u8, MODEL_NUMBER.width.bytes() as u8)?;
    let status = match session.transact(&packet, MODEL_NUMBER.width.bytes()) {
        Ok(status) => status,
        Err(e) if e.is_timeout() => {
            warn!(id, "Device answered ping but not the model number read");
            return Ok(None);
        },
        Err(ExchangeError::Frame(e)) => {
            warn!(id, "Model number reply corrupted: {}", e);
            return Ok(None);
        },
        Err(e) => return Err(e.into()),
    };

    match MODEL_NUMBER.decode(&status.params, session.protocol().byte_order()) {
        Ok(reading) => Ok(Some(reading.value as u16)),
        Err(e) => {
            warn!(id, "Model number reply malformed: {}", e);
            Ok(None)
        },
    }
}
