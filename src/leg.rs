// Leg kinematics: mount-relative tip position -> coax, femur and tibia angles
//
// Body frame: x right, y forward, z up, mm. Tip positions are relative to the
// leg's mount point with axes aligned to the body.

use tracing::debug;

use crate::config::{
    ConfigError, LEG_JOINT1_TO_JOINT2, LEG_JOINT2_TO_JOINT3, LEG_JOINT3_TO_TIP,
    LEG_MOUNT_LEFT_RIGHT_X, LEG_MOUNT_OTHER_X, LEG_MOUNT_OTHER_Y, LEG_ROOT_TO_JOINT1,
};
use crate::movement::TipPosition;
use crate::pwm::{PwmError, PwmOutput};
use crate::servo::{JOINT_COUNT, JointConfig, LEG_COUNT, Servo};

pub const COAX: usize = 0;
pub const FEMUR: usize = 1;
pub const TIBIA: usize = 2;

/// Slack on the reach limits, in ulps of the limit, to absorb f32 rounding
const REACH_TOLERANCE_ULPS: f32 = 4.0;

/// Horizontal distance from mount to tip when the femur is level and the tibia hangs straight down
pub const HOME_REACH_MM: f32 = LEG_ROOT_TO_JOINT1 + LEG_JOINT1_TO_JOINT2 + LEG_JOINT2_TO_JOINT3;

/// Where a leg attaches to the body and which way it points
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Mount {
    pub x: f32,
    pub y: f32,
    /// Outward direction, counter-clockwise from +x
    pub yaw_deg: f32,
}

/// Right front, right middle, right rear, left rear, left middle, left front
pub const LEG_MOUNTS: [Mount; LEG_COUNT] = [
    Mount { x: LEG_MOUNT_OTHER_X, y: LEG_MOUNT_OTHER_Y, yaw_deg: 45.0 },
    Mount { x: LEG_MOUNT_LEFT_RIGHT_X, y: 0.0, yaw_deg: 0.0 },
    Mount { x: LEG_MOUNT_OTHER_X, y: -LEG_MOUNT_OTHER_Y, yaw_deg: -45.0 },
    Mount { x: -LEG_MOUNT_OTHER_X, y: -LEG_MOUNT_OTHER_Y, yaw_deg: -135.0 },
    Mount { x: -LEG_MOUNT_LEFT_RIGHT_X, y: 0.0, yaw_deg: 180.0 },
    Mount { x: -LEG_MOUNT_OTHER_X, y: LEG_MOUNT_OTHER_Y, yaw_deg: 135.0 },
];

/// Servo mounting per joint. Left side femur and tibia servos are mirrored.
fn joint_configs(leg: usize) -> [JointConfig; JOINT_COUNT] {
    let mirrored = leg >= LEG_COUNT / 2;
    [
        JointConfig::new(0.0, false),
        JointConfig::new(0.0, mirrored),
        JointConfig::new(90.0, mirrored),
    ]
}

/// Joint angles in degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointAngles {
    pub coax: f32,
    pub femur: f32,
    /// Bend away from the femur line; 0 means fully extended
    pub tibia: f32,
}

impl JointAngles {
    pub fn as_array(&self) -> [f32; JOINT_COUNT] {
        [self.coax, self.femur, self.tibia]
    }
}

/// Leg failures.
///
/// Targets the leg cannot reach come in two kinds: `UnreachablePose` when the
/// femur joint distance is outside the two-link window, and `BehindCoax` when
/// the tip falls inside the coax radius. Use [`LegError::is_kinematic`] to
/// catch both.
#[derive(Debug, thiserror::Error)]
pub enum LegError {
    #[error(
        "Leg {leg}: target {distance_mm:.2} mm from the femur joint is outside reach [{min_mm:.2}, {max_mm:.2}] mm"
    )]
    UnreachablePose {
        leg: usize,
        distance_mm: f32,
        min_mm: f32,
        max_mm: f32,
    },

    #[error("Leg {leg}: target is inside the coax radius")]
    BehindCoax { leg: usize },

    #[error("Invalid joint index {0} (0-2)")]
    InvalidJoint(usize),

    #[error(transparent)]
    Pwm(#[from] PwmError),
}

impl LegError {
    pub fn is_kinematic(&self) -> bool {
        matches!(
            self,
            LegError::UnreachablePose { .. } | LegError::BehindCoax { .. }
        )
    }
}

/// Home tip position of a leg, mount-relative
pub fn home_position(leg: usize) -> TipPosition {
    let yaw = LEG_MOUNTS[leg % LEG_COUNT].yaw_deg.to_radians();
    TipPosition::new(
        HOME_REACH_MM * yaw.cos(),
        HOME_REACH_MM * yaw.sin(),
        -LEG_JOINT3_TO_TIP,
    )
}

/// Two-link solve in the leg's vertical plane.
///
/// `horizontal` runs from the femur joint outward, `vertical` is up.
/// Returns (femur, tibia bend) in degrees.
pub fn solve_planar(leg: usize, horizontal: f32, vertical: f32) -> Result<(f32, f32), LegError> {
    if horizontal < 0.0 {
        return Err(LegError::BehindCoax { leg });
    }

    let femur_len = LEG_JOINT2_TO_JOINT3;
    let tibia_len = LEG_JOINT3_TO_TIP;
    let max_mm = femur_len + tibia_len;
    let min_mm = (tibia_len - femur_len).abs();
    let distance = horizontal.hypot(vertical);

    let max_slack = max_mm * f32::EPSILON * REACH_TOLERANCE_ULPS;
    let min_slack = min_mm * f32::EPSILON * REACH_TOLERANCE_ULPS;
    if distance > max_mm + max_slack || distance < min_mm - min_slack {
        return Err(LegError::UnreachablePose {
            leg,
            distance_mm: distance,
            min_mm,
            max_mm,
        });
    }

    // Clamp only absorbs rounding of an in-range argument
    let cos_alpha = ((femur_len * femur_len + distance * distance - tibia_len * tibia_len)
        / (2.0 * femur_len * distance))
        .clamp(-1.0, 1.0);
    let cos_gamma = ((femur_len * femur_len + tibia_len * tibia_len - distance * distance)
        / (2.0 * femur_len * tibia_len))
        .clamp(-1.0, 1.0);

    let femur = (vertical.atan2(horizontal) + cos_alpha.acos()).to_degrees();
    let tibia = 180.0 - cos_gamma.acos().to_degrees();
    Ok((femur, tibia))
}

/// One leg: geometry plus its three servos
#[derive(Debug, Clone)]
pub struct Leg {
    index: usize,
    mount: Mount,
    servos: [Servo; JOINT_COUNT],
    tip: TipPosition,
}

impl Leg {
    pub fn new(index: usize) -> Result<Self, ConfigError> {
        let mount = *LEG_MOUNTS.get(index).ok_or(ConfigError::InvalidLeg(index))?;
        let [coax, femur, tibia] = joint_configs(index);
        Ok(Self {
            index,
            mount,
            servos: [
                Servo::new(index, COAX, coax)?,
                Servo::new(index, FEMUR, femur)?,
                Servo::new(index, TIBIA, tibia)?,
            ],
            tip: home_position(index),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn mount(&self) -> Mount {
        self.mount
    }

    /// Last tip position successfully commanded
    pub fn tip_position(&self) -> TipPosition {
        self.tip
    }

    /// Inverse kinematics for a mount-relative tip position, without touching servos
    pub fn solve(&self, target: TipPosition) -> Result<JointAngles, LegError> {
        let (sin, cos) = self.mount.yaw_deg.to_radians().sin_cos();
        let local_x = cos * target.x + sin * target.y;
        let local_y = -sin * target.x + cos * target.y;

        let from_coax_x = local_x - LEG_ROOT_TO_JOINT1;
        let from_coax_y = local_y;
        let coax = from_coax_y.atan2(from_coax_x).to_degrees();

        let horizontal = from_coax_x.hypot(from_coax_y) - LEG_JOINT1_TO_JOINT2;
        let (femur, tibia) = solve_planar(self.index, horizontal, target.z)?;

        Ok(JointAngles { coax, femur, tibia })
    }

    /// Solve and drive all three servos. Unreachable targets leave every servo untouched.
    ///
    /// A PWM error part way through leaves the earlier joints moved while the
    /// stored tip keeps the previous target, so after a failure the tip no
    /// longer describes the physical pose.
    pub fn move_tip<P: PwmOutput + ?Sized>(
        &mut self,
        pwm: &mut P,
        target: TipPosition,
    ) -> Result<(), LegError> {
        let angles = self.solve(target)?;
        for (servo, angle) in self.servos.iter_mut().zip(angles.as_array()) {
            servo.set_angle(pwm, angle)?;
        }
        self.tip = target;
        Ok(())
    }

    /// Drive the leg to its home position
    pub fn force_reset_tip_position<P: PwmOutput + ?Sized>(
        &mut self,
        pwm: &mut P,
    ) -> Result<(), LegError> {
        debug!("Leg {} reset to home", self.index);
        self.move_tip(pwm, home_position(self.index))
    }

    pub fn get(&self, joint: usize) -> Result<&Servo, LegError> {
        self.servos.get(joint).ok_or(LegError::InvalidJoint(joint))
    }

    pub fn get_mut(&mut self, joint: usize) -> Result<&mut Servo, LegError> {
        self.servos.get_mut(joint).ok_or(LegError::InvalidJoint(joint))
    }

    pub fn servos(&self) -> &[Servo; JOINT_COUNT] {
        &self.servos
    }
}
