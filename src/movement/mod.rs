// Gait engine: keyframe tables per movement mode and time-based interpolation
//
// Provides:
// - Tip and pose-set vector types
// - The thirteen movement modes and their gait tables
// - Movement, which advances through a table as time passes

mod gaits;

pub use gaits::GaitLibrary;

use std::fmt;
use std::ops::{Add, Index, Mul, Sub};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use tracing::{debug, warn};

use crate::config::{
    ConfigError, DEFAULT_SPEED, MAX_SPEED, MIN_SPEED, MOVEMENT_SWITCH_DURATION_MS,
};
use crate::servo::LEG_COUNT;

/// Leg tip position in mm, relative to the leg mount
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TipPosition {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl TipPosition {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &TipPosition) -> f32 {
        let d = *self - *other;
        (d.x * d.x + d.y * d.y + d.z * d.z).sqrt()
    }
}

impl Add for TipPosition {
    type Output = TipPosition;

    fn add(self, rhs: TipPosition) -> TipPosition {
        TipPosition::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for TipPosition {
    type Output = TipPosition;

    fn sub(self, rhs: TipPosition) -> TipPosition {
        TipPosition::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for TipPosition {
    type Output = TipPosition;

    fn mul(self, rhs: f32) -> TipPosition {
        TipPosition::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// One tip position per leg
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LegPoseSet([TipPosition; LEG_COUNT]);

impl LegPoseSet {
    pub const fn new(tips: [TipPosition; LEG_COUNT]) -> Self {
        Self(tips)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TipPosition> {
        self.0.iter()
    }

    /// Largest per-leg distance to another pose set
    pub fn max_deviation(&self, other: &LegPoseSet) -> f32 {
        self.0
            .iter()
            .zip(other.0.iter())
            .map(|(a, b)| a.distance(b))
            .fold(0.0, f32::max)
    }
}

impl Index<usize> for LegPoseSet {
    type Output = TipPosition;

    fn index(&self, leg: usize) -> &TipPosition {
        &self.0[leg]
    }
}

impl Add for LegPoseSet {
    type Output = LegPoseSet;

    fn add(self, rhs: LegPoseSet) -> LegPoseSet {
        LegPoseSet(std::array::from_fn(|i| self.0[i] + rhs.0[i]))
    }
}

impl Sub for LegPoseSet {
    type Output = LegPoseSet;

    fn sub(self, rhs: LegPoseSet) -> LegPoseSet {
        LegPoseSet(std::array::from_fn(|i| self.0[i] - rhs.0[i]))
    }
}

impl Mul<f32> for LegPoseSet {
    type Output = LegPoseSet;

    fn mul(self, rhs: f32) -> LegPoseSet {
        LegPoseSet(self.0.map(|tip| tip * rhs))
    }
}

/// Linear blend: ratio 0 gives `current`, 1 gives `target`
pub fn interpolate(current: &LegPoseSet, target: &LegPoseSet, ratio: f32) -> LegPoseSet {
    *current + (*target - *current) * ratio
}

/// Movement modes, numbered as they appear on the wire
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MovementMode {
    Standby = 0,
    Forward = 1,
    ForwardFast = 2,
    Backward = 3,
    TurnLeft = 4,
    TurnRight = 5,
    ShiftLeft = 6,
    ShiftRight = 7,
    Climb = 8,
    RotateX = 9,
    RotateY = 10,
    RotateZ = 11,
    Twist = 12,
}

impl MovementMode {
    pub const ALL: [MovementMode; 13] = [
        MovementMode::Standby,
        MovementMode::Forward,
        MovementMode::ForwardFast,
        MovementMode::Backward,
        MovementMode::TurnLeft,
        MovementMode::TurnRight,
        MovementMode::ShiftLeft,
        MovementMode::ShiftRight,
        MovementMode::Climb,
        MovementMode::RotateX,
        MovementMode::RotateY,
        MovementMode::RotateZ,
        MovementMode::Twist,
    ];

    pub fn name(self) -> &'static str {
        match self {
            MovementMode::Standby => "standby",
            MovementMode::Forward => "forward",
            MovementMode::ForwardFast => "forward_fast",
            MovementMode::Backward => "backward",
            MovementMode::TurnLeft => "turn_left",
            MovementMode::TurnRight => "turn_right",
            MovementMode::ShiftLeft => "shift_left",
            MovementMode::ShiftRight => "shift_right",
            MovementMode::Climb => "climb",
            MovementMode::RotateX => "rotate_x",
            MovementMode::RotateY => "rotate_y",
            MovementMode::RotateZ => "rotate_z",
            MovementMode::Twist => "twist",
        }
    }
}

impl fmt::Display for MovementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl TryFrom<u8> for MovementMode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, u8> {
        MovementMode::ALL.get(value as usize).copied().ok_or(value)
    }
}

impl From<MovementMode> for u8 {
    fn from(mode: MovementMode) -> u8 {
        mode as u8
    }
}

/// Keyframes of one gait plus timing
#[derive(Debug, Clone, PartialEq)]
pub struct GaitTable {
    pub keyframes: Vec<LegPoseSet>,
    /// Time to travel between consecutive keyframes at speed 1.0
    pub step_duration_ms: f32,
    /// Keyframes a switch into this gait may start from
    pub entries: Vec<usize>,
}

impl GaitTable {
    pub fn len(&self) -> usize {
        self.keyframes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keyframes.is_empty()
    }

    /// Structural checks: non-empty, positive timing, entries inside the table
    pub fn validate(&self, mode: MovementMode) -> Result<(), ConfigError> {
        if self.keyframes.is_empty() || self.entries.is_empty() {
            return Err(ConfigError::EmptyGait { mode });
        }
        if self.step_duration_ms.is_nan() || self.step_duration_ms <= 0.0 {
            return Err(ConfigError::InvalidStepDuration { mode });
        }
        if let Some(&entry) = self.entries.iter().find(|&&e| e >= self.keyframes.len()) {
            return Err(ConfigError::BadEntry {
                mode,
                entry,
                len: self.keyframes.len(),
            });
        }
        Ok(())
    }
}

/// Time left below this counts as arrived
const ARRIVAL_EPSILON_MS: f32 = 1e-3;

/// Walks the active gait table, interpolating between keyframes
pub struct Movement {
    library: GaitLibrary,
    mode: MovementMode,
    position: LegPoseSet,
    index: usize,
    remain_ms: f32,
    speed: f32,
    rng: StdRng,
}

impl Movement {
    pub fn new(library: GaitLibrary) -> Self {
        Self::with_rng(library, StdRng::from_os_rng())
    }

    /// Deterministic entry-point selection, for tests and replays
    pub fn with_seed(library: GaitLibrary, seed: u64) -> Self {
        Self::with_rng(library, StdRng::seed_from_u64(seed))
    }

    fn with_rng(library: GaitLibrary, rng: StdRng) -> Self {
        let standby = library.table(MovementMode::Standby);
        let position = standby.keyframes.first().copied().unwrap_or_default();
        Self {
            library,
            mode: MovementMode::Standby,
            position,
            index: 0,
            remain_ms: 0.0,
            speed: DEFAULT_SPEED,
            rng,
        }
    }

    pub fn library(&self) -> &GaitLibrary {
        &self.library
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    /// Current interpolated pose
    pub fn position(&self) -> LegPoseSet {
        self.position
    }

    /// Keyframe currently being approached
    pub fn keyframe_index(&self) -> usize {
        self.index
    }

    /// Time left to reach the current keyframe
    pub fn remaining_ms(&self) -> f32 {
        self.remain_ms
    }

    /// Switch gait, starting from a random entry keyframe.
    ///
    /// The first approach never takes less than the switch duration, scaled by speed.
    pub fn set_mode(&mut self, mode: MovementMode) -> Result<(), ConfigError> {
        let table = self.library.table(mode);
        let Some(&entry) = table.entries.choose(&mut self.rng) else {
            warn!("Movement mode {} has no entry keyframes, ignoring", mode);
            return Err(ConfigError::EmptyGait { mode });
        };
        if entry >= table.len() {
            warn!("Movement mode {} entry {} out of range, ignoring", mode, entry);
            return Err(ConfigError::BadEntry {
                mode,
                entry,
                len: table.len(),
            });
        }

        let step_ms = table.step_duration_ms / self.speed;
        let switch_ms = MOVEMENT_SWITCH_DURATION_MS / self.speed;

        self.mode = mode;
        self.index = entry;
        self.remain_ms = step_ms.max(switch_ms);
        debug!(
            "Movement mode {} entering at keyframe {} over {:.0} ms",
            mode, entry, self.remain_ms
        );
        Ok(())
    }

    /// Advance by `elapsed_ms` and return the new pose.
    ///
    /// A non-positive elapsed time advances one full step.
    pub fn next(&mut self, elapsed_ms: f32) -> LegPoseSet {
        let table = self.library.table(self.mode);
        if table.is_empty() {
            return self.position;
        }
        let step_ms = table.step_duration_ms / self.speed;

        let mut elapsed = if elapsed_ms.is_nan() || elapsed_ms <= 0.0 {
            step_ms
        } else {
            elapsed_ms
        };

        if self.remain_ms <= 0.0 {
            self.index = (self.index + 1) % table.len();
            self.remain_ms = step_ms;
        }
        elapsed = elapsed.min(self.remain_ms);

        let ratio = elapsed / self.remain_ms;
        self.position = interpolate(&self.position, &table.keyframes[self.index], ratio);
        self.remain_ms -= elapsed;

        // Summed tick times leave float residue; land exactly on the keyframe
        if self.remain_ms < ARRIVAL_EPSILON_MS {
            self.remain_ms = 0.0;
            self.position = table.keyframes[self.index];
        }

        self.position
    }

    /// Set the speed multiplier, clamped to [0.25, 1.0]. Non-finite values are ignored.
    pub fn set_speed(&mut self, speed: f32) {
        if !speed.is_finite() {
            warn!("Ignoring non-finite movement speed {}", speed);
            return;
        }
        self.speed = speed.clamp(MIN_SPEED, MAX_SPEED);
        debug!("Movement speed set to {:.2}", self.speed);
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f32 = 1e-3;

    fn movement() -> Movement {
        Movement::with_seed(GaitLibrary::new().unwrap(), 7)
    }

    #[test]
    fn test_mode_numbering_round_trips() {
        for (value, mode) in MovementMode::ALL.iter().enumerate() {
            assert_eq!(MovementMode::try_from(value as u8), Ok(*mode));
            assert_eq!(u8::from(*mode), value as u8);
        }
        assert_eq!(MovementMode::try_from(13), Err(13));
    }

    #[test]
    fn test_interpolate_endpoints() {
        let a = LegPoseSet::new([TipPosition::new(0.0, 0.0, 0.0); LEG_COUNT]);
        let b = LegPoseSet::new([TipPosition::new(10.0, -4.0, 2.0); LEG_COUNT]);

        assert_eq!(interpolate(&a, &b, 0.0), a);
        assert!(interpolate(&a, &b, 1.0).max_deviation(&b) < EPS);
        assert!((interpolate(&a, &b, 0.5)[3].x - 5.0).abs() < EPS);
    }

    #[test]
    fn test_increments_converge_on_keyframe() {
        let mut m = movement();
        m.set_speed(0.5);
        m.set_mode(MovementMode::Forward).unwrap();

        // forward steps 160 ms, so 320 ms at half speed
        assert!((m.remaining_ms() - 320.0).abs() < EPS);
        let target = m.library().table(MovementMode::Forward).keyframes[m.keyframe_index()];

        let mut pose = m.position();
        for _ in 0..16 {
            pose = m.next(20.0);
        }

        assert!(pose.max_deviation(&target) < EPS);
        assert!(m.remaining_ms().abs() < EPS);
    }

    #[test]
    fn test_uneven_increments_land_on_keyframe() {
        let mut m = movement();
        m.set_mode(MovementMode::TurnLeft).unwrap();
        let table = m.library().table(MovementMode::TurnLeft);
        let (len, entry) = (table.len(), m.keyframe_index());
        let target = table.keyframes[entry];

        let jitter = [13.7, 31.1, 7.9, 22.3, 18.4, 40.6];
        let total = m.remaining_ms();
        let last = total - jitter.iter().sum::<f32>();
        assert!(last > 0.0);

        let mut pose = m.position();
        for step in jitter.iter().copied().chain([last]) {
            pose = m.next(step);
        }

        assert!(pose.max_deviation(&target) < EPS);
        assert_eq!(m.keyframe_index(), entry);

        m.next(20.0);
        assert_eq!(m.keyframe_index(), (entry + 1) % len);
    }

    #[test]
    fn test_full_steps_cycle_through_table() {
        for mode in MovementMode::ALL {
            let mut m = movement();
            m.set_mode(mode).unwrap();
            let len = m.library().table(mode).len();

            for _ in 0..=len {
                m.next(0.0);
            }
            let first: Vec<_> = (0..len).map(|_| m.next(0.0)).collect();
            let second: Vec<_> = (0..len).map(|_| m.next(0.0)).collect();

            for (a, b) in first.iter().zip(second.iter()) {
                assert!(a.max_deviation(b) < EPS, "mode {} not periodic", mode);
            }
        }
    }

    #[test]
    fn test_index_wraps_after_last_keyframe() {
        let mut m = movement();
        m.set_mode(MovementMode::Forward).unwrap();
        let len = m.library().table(MovementMode::Forward).len();

        let mut seen = Vec::new();
        for _ in 0..2 * len {
            m.next(0.0);
            seen.push(m.keyframe_index());
        }

        assert!(seen.iter().all(|&i| i < len));
        for pair in seen.windows(2) {
            assert_eq!(pair[1], (pair[0] + 1) % len);
        }
    }

    #[test]
    fn test_speed_clamped() {
        let mut m = movement();
        m.set_speed(2.0);
        assert_eq!(m.speed(), MAX_SPEED);
        m.set_speed(0.0);
        assert_eq!(m.speed(), MIN_SPEED);
        m.set_speed(f32::NAN);
        assert_eq!(m.speed(), MIN_SPEED);
    }

    #[test]
    fn test_doubling_speed_halves_travel_time() {
        let mut slow = movement();
        let mut fast = movement();
        slow.set_speed(0.5);
        fast.set_speed(1.0);
        slow.set_mode(MovementMode::Forward).unwrap();
        fast.set_mode(MovementMode::Forward).unwrap();
        assert_eq!(slow.keyframe_index(), fast.keyframe_index());

        let slow_pose = slow.next(160.0);
        let fast_pose = fast.next(80.0);

        assert!(slow_pose.max_deviation(&fast_pose) < EPS);
    }

    #[test]
    fn test_switch_never_faster_than_switch_duration() {
        for speed in [MIN_SPEED, 0.33, 0.5, MAX_SPEED] {
            for mode in MovementMode::ALL {
                let mut m = movement();
                m.set_speed(speed);
                m.set_mode(mode).unwrap();

                let step = m.library().table(mode).step_duration_ms / speed;
                let switch = MOVEMENT_SWITCH_DURATION_MS / speed;
                assert!(m.remaining_ms() >= step - EPS);
                assert!(m.remaining_ms() >= switch - EPS);
            }
        }
    }

    #[test]
    fn test_entry_points_drawn_from_table() {
        let mut m = movement();
        let entries = m.library().table(MovementMode::Forward).entries.clone();

        let mut seen = Vec::new();
        for _ in 0..64 {
            m.set_mode(MovementMode::Forward).unwrap();
            assert!(entries.contains(&m.keyframe_index()));
            seen.push(m.keyframe_index());
        }
        for entry in entries {
            assert!(seen.contains(&entry));
        }
    }

    #[test]
    fn test_oversized_elapsed_is_clamped() {
        let mut m = movement();
        m.set_mode(MovementMode::Backward).unwrap();
        let target = m.library().table(MovementMode::Backward).keyframes[m.keyframe_index()];

        let pose = m.next(10_000.0);

        assert!(pose.max_deviation(&target) < EPS);
    }
}
