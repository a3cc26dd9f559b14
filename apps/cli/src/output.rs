//! 输出格式

use clap::ValueEnum;
use serde::Serialize;
use servobus_driver::{BusError, CalibrationRecord};

/// 输出格式
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// positions 命令的一行
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionRow {
    pub actuator: String,
    pub id: Option<u8>,
    pub raw: Option<i32>,
    pub full_turns: Option<i32>,
    pub within_turn: Option<u32>,
    pub homing_offset: Option<i32>,
    pub valid: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PositionRow {
    pub fn from_result(name: String, id: Option<u8>, result: Result<CalibrationRecord, BusError>) -> Self {
        match result {
            Ok(record) => {
                let c = record.calibration;
                Self {
                    actuator: name,
                    id: Some(record.id),
                    raw: Some(c.raw),
                    full_turns: Some(c.full_turns),
                    within_turn: Some(c.within_turn),
                    homing_offset: Some(c.homing_offset),
                    valid: Some(c.valid),
                    error: None,
                }
            },
            Err(e) => Self {
                actuator: name,
                id,
                raw: None,
                full_turns: None,
                within_turn: None,
                homing_offset: None,
                valid: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn cell<T: ToString>(value: Option<T>) -> String {
    value.map_or_else(|| "-".to_string(), |v| v.to_string())
}

/// 渲染位置表
pub fn render_positions_table(rows: &[PositionRow]) -> String {
    let name_width = rows.iter().map(|r| r.actuator.len()).max().unwrap_or(0).max("actuator".len());

    let mut out = format!(
        "{:<name_width$}  {:>3}  {:>7}  {:>5}  {:>6}  {:>7}  status\n",
        "actuator", "id", "raw", "turns", "within", "offset"
    );
    for row in rows {
        let status = match (&row.error, row.valid) {
            (Some(e), _) => format!("❌ {}", e),
            (None, Some(false)) => "⚠ offset exceeds HomingOffset range".to_string(),
            _ => "ok".to_string(),
        };
        out.push_str(&format!(
            "{:<name_width$}  {:>3}  {:>7}  {:>5}  {:>6}  {:>7}  {}\n",
            row.actuator,
            cell(row.id),
            cell(row.raw),
            cell(row.full_turns),
            cell(row.within_turn),
            cell(row.homing_offset),
            status
        ));
    }
    out
}
