// Timeouts, topics, geometry, timing and hardware configuration
use clap::Parser;
use crate::movement::MovementMode;
use std::time::Duration;

// Runtime loop frequency (matches the 50 Hz servo PWM period)
pub const LOOP_HZ: u64 = 50;

// Nominal control tick
pub const MOVEMENT_INTERVAL_MS: u64 = 1000 / LOOP_HZ;

// Command timeout for watchdog
pub const CMD_TIMEOUT: Duration = Duration::from_millis(500);

// Zenoh topics
pub const TOPIC_CMD: &str = "hexapod/cmd"; // commands
pub const TOPIC_HEALTH: &str = "hexapod/state/health"; // health status
pub const TOPIC_STATUS: &str = "hexapod/state/status"; // mode and speed
pub const TOPIC_CALIBRATION: &str = "hexapod/state/calibration"; // offset table

// Leg geometry, all in mm
pub const LEG_MOUNT_LEFT_RIGHT_X: f32 = 29.87;
pub const LEG_MOUNT_OTHER_X: f32 = 22.41;
pub const LEG_MOUNT_OTHER_Y: f32 = 55.41;

pub const LEG_ROOT_TO_JOINT1: f32 = 20.75;
pub const LEG_JOINT1_TO_JOINT2: f32 = 28.0;
pub const LEG_JOINT2_TO_JOINT3: f32 = 42.6;
pub const LEG_JOINT3_TO_TIP: f32 = 89.07;

// Gait timing, in ms
pub const MOVEMENT_SWITCH_DURATION_MS: f32 = 150.0;

// Speed multiplier: 1.0 is fastest
pub const DEFAULT_SPEED: f32 = 0.5;
pub const MIN_SPEED: f32 = 0.25;
pub const MAX_SPEED: f32 = 1.0;

// PWM controllers
pub const PWM_FREQUENCY_HZ: u16 = 50;
pub const PCA9685_LEFT_ADDRESS: u8 = 0x40;
pub const PCA9685_RIGHT_ADDRESS: u8 = 0x41;

// Servo pulse limits, in µs
pub const SERVO_MIDDLE_US: f32 = 1500.0;
pub const SERVO_MIN_US: f32 = 500.0;
pub const SERVO_MAX_US: f32 = 2500.0;
pub const SERVO_DEFAULT_RANGE_DEG: f32 = 60.0;

pub const DEFAULT_I2C_DEVICE: &str = "/dev/i2c-1";
pub const DEFAULT_CALIBRATION_FILE: &str = "calibration.json";

/// Command line options for the runtime binary
#[derive(Debug, Clone, Parser)]
#[command(name = "hexapod-zenoh-runtime", about = "Six-legged gait runtime")]
pub struct Args {
    /// I2C bus device the PCA9685 boards hang off
    #[arg(long, default_value = DEFAULT_I2C_DEVICE)]
    pub i2c_device: String,

    /// Where per-joint trim offsets are persisted
    #[arg(long, default_value = DEFAULT_CALIBRATION_FILE)]
    pub calibration_file: String,

    /// Run without hardware, writing into a simulated register file
    #[arg(long)]
    pub simulate: bool,

    /// Move every leg to its home position on start
    #[arg(long)]
    pub reset: bool,
}

/// Static configuration rejected at construction time
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Leg {leg} joint {joint}: channel {channel} is outside 0-31")]
    ChannelOutOfRange { leg: usize, joint: usize, channel: u8 },

    #[error("Channel {channel} assigned to both (leg, joint) {first:?} and {second:?}")]
    DuplicateChannel {
        channel: u8,
        first: (usize, usize),
        second: (usize, usize),
    },

    #[error("Invalid leg index {0} (0-5)")]
    InvalidLeg(usize),

    #[error("Gait {mode} has no keyframes")]
    EmptyGait { mode: MovementMode },

    #[error("Gait {mode}: entry keyframe {entry} outside table of {len}")]
    BadEntry {
        mode: MovementMode,
        entry: usize,
        len: usize,
    },

    #[error("Gait {mode}: step duration must be positive")]
    InvalidStepDuration { mode: MovementMode },

    #[error("Gait {mode} keyframe {keyframe}: {reason}")]
    UnreachableKeyframe {
        mode: MovementMode,
        keyframe: usize,
        reason: String,
    },
}
