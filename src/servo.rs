// Joint servo: calibrated angle -> pulse width -> PCA9685 ticks
use tracing::{debug, info};

use crate::config::{
    ConfigError, PWM_FREQUENCY_HZ, SERVO_DEFAULT_RANGE_DEG, SERVO_MAX_US, SERVO_MIDDLE_US,
    SERVO_MIN_US,
};
use crate::pwm::pca9685::TICKS_PER_PERIOD;
use crate::pwm::{CHANNELS_PER_CHIP, Chip, PwmError, PwmOutput};

pub const LEG_COUNT: usize = 6;
pub const JOINT_COUNT: usize = 3;

/// Channels across both boards
pub const TOTAL_CHANNELS: u8 = 2 * CHANNELS_PER_CHIP;

/// Global channel of every (leg, joint). 0-15 sit on the right board, 16-31 on the left.
pub const CHANNEL_MAP: [[u8; JOINT_COUNT]; LEG_COUNT] = [
    [5, 6, 7],
    [2, 3, 4],
    [8, 9, 10],
    [24, 25, 26],
    [18, 19, 20],
    [21, 22, 23],
];

/// Pulse width change per degree of joint travel
const US_PER_DEGREE: f32 = (SERVO_MAX_US - SERVO_MIDDLE_US) / 90.0;

/// Board and local index of a servo channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelAddress {
    pub chip: Chip,
    pub index: u8,
}

impl ChannelAddress {
    pub fn from_global(channel: u8) -> Option<Self> {
        if channel < CHANNELS_PER_CHIP {
            Some(Self {
                chip: Chip::Right,
                index: channel,
            })
        } else if channel < TOTAL_CHANNELS {
            Some(Self {
                chip: Chip::Left,
                index: channel - CHANNELS_PER_CHIP,
            })
        } else {
            None
        }
    }
}

/// Every channel in range and used by exactly one joint
pub fn validate_channel_map(map: &[[u8; JOINT_COUNT]; LEG_COUNT]) -> Result<(), ConfigError> {
    let mut owners: [Option<(usize, usize)>; TOTAL_CHANNELS as usize] =
        [None; TOTAL_CHANNELS as usize];

    for (leg, joints) in map.iter().enumerate() {
        for (joint, &channel) in joints.iter().enumerate() {
            let owner = owners
                .get_mut(channel as usize)
                .ok_or(ConfigError::ChannelOutOfRange {
                    leg,
                    joint,
                    channel,
                })?;
            if let Some(first) = *owner {
                return Err(ConfigError::DuplicateChannel {
                    channel,
                    first,
                    second: (leg, joint),
                });
            }
            *owner = Some((leg, joint));
        }
    }
    Ok(())
}

/// Mounting of one joint servo
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointConfig {
    /// Joint angle at which the horn sits at mid-travel
    pub mechanical_adjust_deg: f32,
    /// Servo mirrored relative to the kinematic sign convention
    pub inverse: bool,
    /// Allowed travel either side of mid
    pub range_deg: f32,
}

impl JointConfig {
    pub const fn new(mechanical_adjust_deg: f32, inverse: bool) -> Self {
        Self {
            mechanical_adjust_deg,
            inverse,
            range_deg: SERVO_DEFAULT_RANGE_DEG,
        }
    }

    /// Servo-frame angle, clamped to the allowed travel. Second value is true if clamped.
    pub fn effective_angle(&self, angle: f32) -> (f32, bool) {
        let relative = angle - self.mechanical_adjust_deg;
        let relative = if self.inverse { -relative } else { relative };
        let clamped = relative.clamp(-self.range_deg, self.range_deg);
        (clamped, clamped != relative)
    }
}

/// Pulse width for a servo-frame angle plus trim, limited to the servo's pulse range
pub fn pulse_width_us(effective_deg: f32, offset_us: i32) -> f32 {
    (SERVO_MIDDLE_US + effective_deg * US_PER_DEGREE + offset_us as f32)
        .clamp(SERVO_MIN_US, SERVO_MAX_US)
}

/// Off tick for a pulse width at the given PWM frequency
pub fn pulse_to_ticks(pulse_us: f32, frequency_hz: u16) -> u16 {
    let us_per_tick = 1_000_000.0 / (frequency_hz as f32 * TICKS_PER_PERIOD as f32);
    (pulse_us / us_per_tick).floor() as u16
}

/// One joint servo of one leg
#[derive(Debug, Clone)]
pub struct Servo {
    leg: usize,
    joint: usize,
    address: ChannelAddress,
    config: JointConfig,
    angle: f32,
    offset: i32,
}

impl Servo {
    pub fn new(leg: usize, joint: usize, config: JointConfig) -> Result<Self, ConfigError> {
        let channel = *CHANNEL_MAP
            .get(leg)
            .ok_or(ConfigError::InvalidLeg(leg))?
            .get(joint)
            .ok_or(ConfigError::ChannelOutOfRange {
                leg,
                joint,
                channel: u8::MAX,
            })?;
        let address = ChannelAddress::from_global(channel).ok_or(ConfigError::ChannelOutOfRange {
            leg,
            joint,
            channel,
        })?;

        Ok(Self {
            leg,
            joint,
            address,
            config,
            angle: config.mechanical_adjust_deg,
            offset: 0,
        })
    }

    /// Drive the servo to a joint angle. Out-of-range angles are clamped, not refused.
    pub fn set_angle<P: PwmOutput + ?Sized>(
        &mut self,
        pwm: &mut P,
        angle: f32,
    ) -> Result<(), PwmError> {
        let (effective, clamped) = self.config.effective_angle(angle);
        if clamped {
            info!(
                "Servo[{}:{}] angle {:.2} exceeds ±{:.0}° travel, clamped",
                self.leg, self.joint, angle, self.config.range_deg
            );
        }
        self.angle = angle;

        let pulse_us = pulse_width_us(effective, self.offset);
        let ticks = pulse_to_ticks(pulse_us, PWM_FREQUENCY_HZ);
        debug!(
            "Servo[{}:{}] {:.2}° -> {:.1} µs -> {} ticks",
            self.leg, self.joint, angle, pulse_us, ticks
        );
        pwm.set_channel(self.address.chip, self.address.index, 0, ticks)
    }

    /// Rewrite the last requested angle, picking up a changed offset
    pub fn refresh<P: PwmOutput + ?Sized>(&mut self, pwm: &mut P) -> Result<(), PwmError> {
        self.set_angle(pwm, self.angle)
    }

    /// Last requested angle, before clamping
    pub fn get_angle(&self) -> f32 {
        self.angle
    }

    /// Trim applied on the next write
    pub fn set_offset(&mut self, offset_us: i32) {
        self.offset = offset_us;
    }

    pub fn get_offset(&self) -> i32 {
        self.offset
    }

    pub fn address(&self) -> ChannelAddress {
        self.address
    }
}
