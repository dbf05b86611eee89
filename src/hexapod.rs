// Robot-level orchestration: legs, gait engine, calibration and PWM output
use tracing::{debug, info, warn};

use crate::calibration::{
    CalibrationBackend, CalibrationEntry, CalibrationError, CalibrationStore, Offsets,
    collect_offsets,
};
use crate::config::ConfigError;
use crate::leg::{Leg, LegError};
use crate::movement::{GaitLibrary, Movement, MovementMode};
use crate::pwm::{Chip, PwmError, PwmOutput};
use crate::servo::{CHANNEL_MAP, LEG_COUNT, validate_channel_map};

/// Error types for the whole robot
#[derive(Debug, thiserror::Error)]
pub enum HexapodError {
    #[error("Leg {leg}: {source}")]
    Leg { leg: usize, source: LegError },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Calibration(#[from] CalibrationError),

    #[error(transparent)]
    Pwm(#[from] PwmError),

    #[error("Invalid movement mode {0} (0-12)")]
    InvalidMode(u8),

    #[error("Invalid speed level {0} (0-3)")]
    InvalidSpeedLevel(u8),
}

impl HexapodError {
    /// Unreachable pose rather than a hardware fault
    pub fn is_kinematic(&self) -> bool {
        match self {
            HexapodError::Leg { source, .. } => source.is_kinematic(),
            HexapodError::Calibration(CalibrationError::Leg(source)) => source.is_kinematic(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, HexapodError>;

/// Preset speed multipliers, slowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedLevel {
    Slowest,
    Slow,
    Medium,
    Fast,
}

impl SpeedLevel {
    pub fn multiplier(self) -> f32 {
        match self {
            SpeedLevel::Slowest => 0.25,
            SpeedLevel::Slow => 0.33,
            SpeedLevel::Medium => 0.5,
            SpeedLevel::Fast => 1.0,
        }
    }
}

impl TryFrom<u8> for SpeedLevel {
    type Error = HexapodError;

    fn try_from(level: u8) -> Result<Self> {
        match level {
            0 => Ok(SpeedLevel::Slowest),
            1 => Ok(SpeedLevel::Slow),
            2 => Ok(SpeedLevel::Medium),
            3 => Ok(SpeedLevel::Fast),
            other => Err(HexapodError::InvalidSpeedLevel(other)),
        }
    }
}

/// Check every gait keyframe against leg kinematics
fn validate_reachability(library: &GaitLibrary, legs: &[Leg; LEG_COUNT]) -> Result<()> {
    for mode in MovementMode::ALL {
        for (keyframe, pose) in library.table(mode).keyframes.iter().enumerate() {
            for (leg, tip) in legs.iter().zip(pose.iter()) {
                leg.solve(*tip)
                    .map_err(|e| ConfigError::UnreachableKeyframe {
                        mode,
                        keyframe,
                        reason: e.to_string(),
                    })?;
            }
        }
    }
    Ok(())
}

/// The robot
pub struct Hexapod<P, B> {
    pwm: P,
    legs: [Leg; LEG_COUNT],
    movement: Movement,
    calibration: CalibrationStore<B>,
    mode: MovementMode,
}

impl<P: PwmOutput, B: CalibrationBackend> Hexapod<P, B> {
    /// Build legs and gaits, validating all static tables. Nothing is written to hardware.
    pub fn new(pwm: P, backend: B) -> Result<Self> {
        let library = GaitLibrary::new()?;
        Self::with_movement(pwm, backend, Movement::new(library))
    }

    /// Same as [`Hexapod::new`] with a deterministic gait entry sequence
    pub fn with_seed(pwm: P, backend: B, seed: u64) -> Result<Self> {
        let library = GaitLibrary::new()?;
        Self::with_movement(pwm, backend, Movement::with_seed(library, seed))
    }

    fn with_movement(pwm: P, backend: B, movement: Movement) -> Result<Self> {
        validate_channel_map(&CHANNEL_MAP)?;

        let [l0, l1, l2, l3, l4, l5] = std::array::from_fn::<_, LEG_COUNT, _>(Leg::new);
        let legs = [l0?, l1?, l2?, l3?, l4?, l5?];

        validate_reachability(movement.library(), &legs)?;

        Ok(Self {
            pwm,
            legs,
            movement,
            calibration: CalibrationStore::new(backend),
            mode: MovementMode::Standby,
        })
    }

    /// Load calibration, then either home every leg or settle into standby
    pub fn init(&mut self, reset: bool) -> Result<()> {
        let offsets = self.calibration.load(&mut self.legs);
        debug!("Applied offsets {:?}", offsets);

        if reset {
            self.force_reset_all_leg_tip_positions()?;
        } else {
            self.process_movement(MovementMode::Standby, 0.0)?;
        }
        info!("Hexapod ready (reset={})", reset);
        Ok(())
    }

    /// Advance the gait by `elapsed_ms` in `mode` and drive every leg.
    ///
    /// A mode change restarts the gait from one of its entry keyframes.
    pub fn process_movement(&mut self, mode: MovementMode, elapsed_ms: f32) -> Result<()> {
        if mode != self.mode {
            match self.movement.set_mode(mode) {
                Ok(()) => {
                    info!("Movement mode {} -> {}", self.mode, mode);
                    self.mode = mode;
                }
                Err(e) => {
                    warn!("Cannot switch to {}: {}", mode, e);
                    return Err(e.into());
                }
            }
        }

        let pose = self.movement.next(elapsed_ms);
        for (leg, tip) in self.legs.iter_mut().zip(pose.iter()) {
            leg.move_tip(&mut self.pwm, *tip)
                .map_err(|source| HexapodError::Leg {
                    leg: leg.index(),
                    source,
                })?;
        }
        Ok(())
    }

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    pub fn set_movement_speed(&mut self, speed: f32) {
        self.movement.set_speed(speed);
    }

    pub fn set_movement_speed_level(&mut self, level: u8) -> Result<()> {
        let level = SpeedLevel::try_from(level)?;
        self.movement.set_speed(level.multiplier());
        info!("Speed level {:?} ({:.2})", level, level.multiplier());
        Ok(())
    }

    pub fn movement_speed(&self) -> f32 {
        self.movement.speed()
    }

    pub fn force_reset_all_leg_tip_positions(&mut self) -> Result<()> {
        for leg in self.legs.iter_mut() {
            leg.force_reset_tip_position(&mut self.pwm)
                .map_err(|source| HexapodError::Leg {
                    leg: leg.index(),
                    source,
                })?;
        }
        info!("All legs reset to home");
        Ok(())
    }

    pub fn calibration_save(&mut self) -> Result<()> {
        self.calibration.save(&self.legs)?;
        Ok(())
    }

    pub fn calibration_get(&self, leg: usize, joint: usize) -> Result<i32> {
        Ok(self.calibration.get_offset(&self.legs, leg, joint)?)
    }

    /// Change one offset and rewrite that servo so the trim shows immediately
    pub fn calibration_set(&mut self, entry: CalibrationEntry) -> Result<()> {
        self.calibration
            .set_offset(&mut self.legs, entry.leg, entry.joint, entry.offset)?;
        debug!(
            "Offset leg {} joint {} = {}",
            entry.leg, entry.joint, entry.offset
        );
        self.calibration
            .refresh(&mut self.legs, &mut self.pwm, entry.leg, entry.joint)?;
        Ok(())
    }

    pub fn calibration_test(&mut self, leg: usize, joint: usize, angle: f32) -> Result<()> {
        self.calibration
            .test_angle(&mut self.legs, &mut self.pwm, leg, joint, angle)?;
        Ok(())
    }

    pub fn calibration_test_all_legs(&mut self, angle: f32) -> Result<()> {
        self.calibration
            .test_all_legs_angle(&mut self.legs, &mut self.pwm, angle)?;
        Ok(())
    }

    /// Zero every offset and rewrite all servos at their last angles
    pub fn clear_offsets(&mut self) -> Result<()> {
        self.calibration.clear_all(&mut self.legs);
        self.calibration.refresh_all(&mut self.legs, &mut self.pwm)?;
        Ok(())
    }

    pub fn offsets(&self) -> Offsets {
        collect_offsets(&self.legs)
    }

    pub fn legs(&self) -> &[Leg; LEG_COUNT] {
        &self.legs
    }

    pub fn pwm(&self) -> &P {
        &self.pwm
    }

    /// Cut every servo output
    pub fn all_off(&mut self) -> Result<()> {
        for chip in Chip::ALL {
            self.pwm.all_off(chip)?;
        }
        info!("All servo outputs off");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::{MemoryBackend, encode_offsets};
    use crate::leg::home_position;
    use crate::pwm::SimulatedPwm;
    use crate::pwm::pca9685::FULL_ON_OFF;

    const EPS: f32 = 1e-3;

    fn hexapod() -> Hexapod<SimulatedPwm, MemoryBackend> {
        Hexapod::with_seed(SimulatedPwm::new(), MemoryBackend::default(), 3).unwrap()
    }

    #[test]
    fn test_init_reset_homes_every_leg() {
        let mut robot = hexapod();
        robot.init(true).unwrap();

        for leg in robot.legs() {
            assert!(leg.tip_position().distance(&home_position(leg.index())) < EPS);
        }
        assert_eq!(robot.pwm().write_count(), 18);
    }

    #[test]
    fn test_init_loads_offsets() {
        let mut offsets = [[0; 3]; LEG_COUNT];
        offsets[2] = [5, -5, 12];
        let backend = MemoryBackend {
            blob: Some(encode_offsets(&offsets).unwrap()),
        };
        let mut robot = Hexapod::with_seed(SimulatedPwm::new(), backend, 1).unwrap();

        robot.init(false).unwrap();

        assert_eq!(robot.offsets(), offsets);
        assert_eq!(robot.calibration_get(2, 2).unwrap(), 12);
    }

    #[test]
    fn test_mode_latched_after_switch() {
        let mut robot = hexapod();
        robot.init(false).unwrap();

        robot.process_movement(MovementMode::Forward, 20.0).unwrap();
        assert_eq!(robot.mode(), MovementMode::Forward);

        for _ in 0..50 {
            robot.process_movement(MovementMode::Forward, 20.0).unwrap();
        }
        assert_eq!(robot.mode(), MovementMode::Forward);
    }

    #[test]
    fn test_every_mode_runs_a_full_cycle() {
        let mut robot = hexapod();
        robot.init(false).unwrap();
        robot.set_movement_speed_level(3).unwrap();

        for mode in MovementMode::ALL {
            for _ in 0..40 {
                robot.process_movement(mode, 20.0).unwrap();
            }
        }
    }

    #[test]
    fn test_speed_levels() {
        let mut robot = hexapod();
        for (level, expected) in [(0, 0.25), (1, 0.33), (2, 0.5), (3, 1.0)] {
            robot.set_movement_speed_level(level).unwrap();
            assert!((robot.movement_speed() - expected).abs() < EPS);
        }
        assert!(matches!(
            robot.set_movement_speed_level(4),
            Err(HexapodError::InvalidSpeedLevel(4))
        ));
    }

    #[test]
    fn test_calibration_round_trip_through_robot() {
        let mut robot = hexapod();
        robot
            .calibration_set(CalibrationEntry {
                leg: 5,
                joint: 1,
                offset: -33,
            })
            .unwrap();
        robot.calibration_save().unwrap();
        robot.clear_offsets().unwrap();
        assert_eq!(robot.calibration_get(5, 1).unwrap(), 0);

        robot.init(false).unwrap();
        assert_eq!(robot.calibration_get(5, 1).unwrap(), -33);
    }

    #[test]
    fn test_invalid_calibration_index_is_not_kinematic() {
        let mut robot = hexapod();
        let err = robot.calibration_test(9, 0, 0.0).unwrap_err();
        assert!(!err.is_kinematic());
    }

    #[test]
    fn test_all_off_sets_full_off() {
        let mut robot = hexapod();
        robot.init(true).unwrap();
        robot.all_off().unwrap();
        assert_eq!(robot.pwm().off_ticks(Chip::Left, 0), Some(FULL_ON_OFF));
        assert_eq!(robot.pwm().off_ticks(Chip::Right, 15), Some(FULL_ON_OFF));
    }
}
