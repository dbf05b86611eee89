// Define message types for the runtime

use serde::{Deserialize, Serialize};

use crate::calibration::Offsets;

// Command from teleop/scripts -> runtime
// Every field is optional so one message can carry a mode, a speed change or a calibration action
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HexapodCommand {
    #[serde(rename = "movementMode", default, skip_serializing_if = "Option::is_none")]
    pub movement_mode: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,

    #[serde(rename = "speedLevel", default, skip_serializing_if = "Option::is_none")]
    pub speed_level: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cal_action: Option<CalAction>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<i32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub angle: Option<f32>,
}

impl HexapodCommand {
    pub fn movement(mode: u8) -> Self {
        Self {
            movement_mode: Some(mode),
            ..Default::default()
        }
    }
}

/// Calibration actions a client can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalAction {
    Start,
    Stop,
    Save,
    Set,
    Get,
    Test,
    TestAll,
    Clear,
    Reset,
}

/// Health status published by runtime
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeHealth {
    Ok,
    CmdStale,
    Calibrating,
    HardwareFault,
}

// Mode and speed, published every tick
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HexapodStatus {
    pub mode: u8,
    pub mode_name: String,
    pub speed: f32,
    pub calibrating: bool,
}

// Reply to a `get` calibration action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalibrationReport {
    pub offsets: Offsets,
}
