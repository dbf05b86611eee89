// Keyframe tables for every movement mode, generated from body geometry
use crate::config::ConfigError;
use crate::leg::{LEG_MOUNTS, home_position};
use crate::servo::LEG_COUNT;

use super::{GaitTable, LegPoseSet, MovementMode, TipPosition};

const STANDBY_STEP_MS: f32 = 500.0;
const WALK_STEP_MS: f32 = 160.0;
const FAST_STEP_MS: f32 = 120.0;
const CLIMB_STEP_MS: f32 = 250.0;
const SWAY_STEP_MS: f32 = 200.0;

const WALK_STRIDE_MM: f32 = 30.0;
const FAST_STRIDE_MM: f32 = 45.0;
const WALK_LIFT_MM: f32 = 25.0;
const CLIMB_LIFT_MM: f32 = 35.0;
const TURN_ANGLE_DEG: f32 = 20.0;

const SWAY_KEYFRAMES: usize = 8;
const TILT_AMPLITUDE_DEG: f32 = 10.0;
const YAW_AMPLITUDE_DEG: f32 = 12.0;
const TWIST_AMPLITUDE_DEG: f32 = 8.0;
const TWIST_RADIUS_MM: f32 = 12.0;

/// Legs 0, 2, 4 swing together; 1, 3, 5 half a cycle later
const TRIPOD_A: [bool; LEG_COUNT] = [true, false, true, false, true, false];

/// Per phase: fraction of the stride (forward +) and whether the tip is lifted
const STRIDE_PHASES: [f32; 4] = [0.5, 0.0, -0.5, 0.0];
const LIFT_PHASES: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// A tripod gait may start with either group leading
const TRIPOD_ENTRIES: [usize; 2] = [0, 2];

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

fn rotate(axis: Axis, p: TipPosition, angle_rad: f32) -> TipPosition {
    let (s, c) = angle_rad.sin_cos();
    match axis {
        Axis::X => TipPosition::new(p.x, c * p.y - s * p.z, s * p.y + c * p.z),
        Axis::Y => TipPosition::new(c * p.x + s * p.z, p.y, -s * p.x + c * p.z),
        Axis::Z => TipPosition::new(c * p.x - s * p.y, s * p.x + c * p.y, p.z),
    }
}

fn mount_offset(leg: usize) -> TipPosition {
    let mount = LEG_MOUNTS[leg];
    TipPosition::new(mount.x, mount.y, 0.0)
}

/// Home foot position in the body frame
fn home_in_body(leg: usize) -> TipPosition {
    mount_offset(leg) + home_position(leg)
}

fn home_pose() -> LegPoseSet {
    LegPoseSet::new(std::array::from_fn(home_position))
}

fn tripod_phase(leg: usize, keyframe: usize) -> usize {
    if TRIPOD_A[leg] {
        keyframe
    } else {
        (keyframe + 2) % STRIDE_PHASES.len()
    }
}

/// Four-phase tripod cycle. `stride` maps (leg, stride fraction) to a ground-level tip.
fn tripod(
    step_duration_ms: f32,
    lift_mm: f32,
    stride: impl Fn(usize, f32) -> TipPosition,
) -> GaitTable {
    let keyframes = (0..STRIDE_PHASES.len())
        .map(|k| {
            LegPoseSet::new(std::array::from_fn(|leg| {
                let phase = tripod_phase(leg, k);
                stride(leg, STRIDE_PHASES[phase])
                    + TipPosition::new(0.0, 0.0, lift_mm * LIFT_PHASES[phase])
            }))
        })
        .collect();

    GaitTable {
        keyframes,
        step_duration_ms,
        entries: TRIPOD_ENTRIES.to_vec(),
    }
}

/// Walk along a body-frame direction
fn translation(direction: (f32, f32), stride_mm: f32, lift_mm: f32, step_ms: f32) -> GaitTable {
    tripod(step_ms, lift_mm, |leg, fraction| {
        home_position(leg)
            + TipPosition::new(
                direction.0 * stride_mm * fraction,
                direction.1 * stride_mm * fraction,
                0.0,
            )
    })
}

/// Turn in place; positive angle turns left
fn turn(angle_deg: f32, lift_mm: f32, step_ms: f32) -> GaitTable {
    tripod(step_ms, lift_mm, |leg, fraction| {
        let angle = (angle_deg * fraction).to_radians();
        rotate(Axis::Z, home_in_body(leg), angle) - mount_offset(leg)
    })
}

/// Feet planted, body swaying about an axis through its center
fn sway(axis: Axis, amplitude_deg: f32, step_ms: f32) -> GaitTable {
    let keyframes = (0..SWAY_KEYFRAMES)
        .map(|k| {
            let angle = sway_angle(amplitude_deg, k);
            LegPoseSet::new(std::array::from_fn(|leg| {
                rotate(axis, home_in_body(leg), angle) - mount_offset(leg)
            }))
        })
        .collect();

    GaitTable {
        keyframes,
        step_duration_ms: step_ms,
        entries: vec![0],
    }
}

/// Yaw sway combined with the body circling over planted feet
fn twist(amplitude_deg: f32, radius_mm: f32, step_ms: f32) -> GaitTable {
    let keyframes = (0..SWAY_KEYFRAMES)
        .map(|k| {
            let phase = cycle_phase(k);
            let angle = sway_angle(amplitude_deg, k);
            let body_shift = TipPosition::new(radius_mm * phase.cos(), radius_mm * phase.sin(), 0.0);
            LegPoseSet::new(std::array::from_fn(|leg| {
                rotate(Axis::Z, home_in_body(leg), angle) - body_shift - mount_offset(leg)
            }))
        })
        .collect();

    GaitTable {
        keyframes,
        step_duration_ms: step_ms,
        entries: vec![0],
    }
}

fn cycle_phase(keyframe: usize) -> f32 {
    std::f32::consts::TAU * keyframe as f32 / SWAY_KEYFRAMES as f32
}

/// Feet move opposite to the body, hence the sign
fn sway_angle(amplitude_deg: f32, keyframe: usize) -> f32 {
    -(amplitude_deg * cycle_phase(keyframe).sin()).to_radians()
}

/// One gait table per movement mode
#[derive(Debug, Clone)]
pub struct GaitLibrary {
    standby: GaitTable,
    forward: GaitTable,
    forward_fast: GaitTable,
    backward: GaitTable,
    turn_left: GaitTable,
    turn_right: GaitTable,
    shift_left: GaitTable,
    shift_right: GaitTable,
    climb: GaitTable,
    rotate_x: GaitTable,
    rotate_y: GaitTable,
    rotate_z: GaitTable,
    twist: GaitTable,
}

impl GaitLibrary {
    /// Build every table and check its structure
    pub fn new() -> Result<Self, ConfigError> {
        let library = Self {
            standby: GaitTable {
                keyframes: vec![home_pose()],
                step_duration_ms: STANDBY_STEP_MS,
                entries: vec![0],
            },
            forward: translation((0.0, 1.0), WALK_STRIDE_MM, WALK_LIFT_MM, WALK_STEP_MS),
            forward_fast: translation((0.0, 1.0), FAST_STRIDE_MM, WALK_LIFT_MM, FAST_STEP_MS),
            backward: translation((0.0, -1.0), WALK_STRIDE_MM, WALK_LIFT_MM, WALK_STEP_MS),
            turn_left: turn(TURN_ANGLE_DEG, WALK_LIFT_MM, WALK_STEP_MS),
            turn_right: turn(-TURN_ANGLE_DEG, WALK_LIFT_MM, WALK_STEP_MS),
            shift_left: translation((-1.0, 0.0), WALK_STRIDE_MM, WALK_LIFT_MM, WALK_STEP_MS),
            shift_right: translation((1.0, 0.0), WALK_STRIDE_MM, WALK_LIFT_MM, WALK_STEP_MS),
            climb: translation((0.0, 1.0), WALK_STRIDE_MM, CLIMB_LIFT_MM, CLIMB_STEP_MS),
            rotate_x: sway(Axis::X, TILT_AMPLITUDE_DEG, SWAY_STEP_MS),
            rotate_y: sway(Axis::Y, TILT_AMPLITUDE_DEG, SWAY_STEP_MS),
            rotate_z: sway(Axis::Z, YAW_AMPLITUDE_DEG, SWAY_STEP_MS),
            twist: twist(TWIST_AMPLITUDE_DEG, TWIST_RADIUS_MM, SWAY_STEP_MS),
        };

        for mode in MovementMode::ALL {
            library.table(mode).validate(mode)?;
        }
        Ok(library)
    }

    pub fn table(&self, mode: MovementMode) -> &GaitTable {
        match mode {
            MovementMode::Standby => &self.standby,
            MovementMode::Forward => &self.forward,
            MovementMode::ForwardFast => &self.forward_fast,
            MovementMode::Backward => &self.backward,
            MovementMode::TurnLeft => &self.turn_left,
            MovementMode::TurnRight => &self.turn_right,
            MovementMode::ShiftLeft => &self.shift_left,
            MovementMode::ShiftRight => &self.shift_right,
            MovementMode::Climb => &self.climb,
            MovementMode::RotateX => &self.rotate_x,
            MovementMode::RotateY => &self.rotate_y,
            MovementMode::RotateZ => &self.rotate_z,
            MovementMode::Twist => &self.twist,
        }
    }
}
