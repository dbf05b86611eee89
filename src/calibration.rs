// Per-joint trim offsets: persistence and live application
//
// Stored as {"leg0":[o0,o1,o2],...,"leg5":[...]}, offsets in µs of pulse width.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, warn};

use crate::leg::{Leg, LegError};
use crate::pwm::PwmOutput;
use crate::servo::{JOINT_COUNT, LEG_COUNT};

/// Offset per (leg, joint)
pub type Offsets = [[i32; JOINT_COUNT]; LEG_COUNT];

pub const ZERO_OFFSETS: Offsets = [[0; JOINT_COUNT]; LEG_COUNT];

#[derive(Debug, thiserror::Error)]
pub enum CalibrationError {
    #[error("Calibration storage error: {0}")]
    Io(#[from] io::Error),

    #[error("Malformed calibration data: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid leg index {0} (0-5)")]
    InvalidLeg(usize),

    #[error(transparent)]
    Leg(#[from] LegError),
}

/// A single trim value, as sent by a calibration client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationEntry {
    pub leg: usize,
    pub joint: usize,
    pub offset: i32,
}

/// Where the offset blob lives
pub trait CalibrationBackend {
    /// `Ok(None)` when nothing has been stored yet
    fn read(&mut self) -> io::Result<Option<String>>;

    fn write(&mut self, blob: &str) -> io::Result<()>;
}

/// JSON file on disk
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl CalibrationBackend for FileBackend {
    fn read(&mut self) -> io::Result<Option<String>> {
        match fs::read_to_string(&self.path) {
            Ok(blob) => Ok(Some(blob)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn write(&mut self, blob: &str) -> io::Result<()> {
        fs::write(&self.path, blob)
    }
}

/// Keeps the blob in memory; used when no file is wanted
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    pub blob: Option<String>,
}

impl CalibrationBackend for MemoryBackend {
    fn read(&mut self) -> io::Result<Option<String>> {
        Ok(self.blob.clone())
    }

    fn write(&mut self, blob: &str) -> io::Result<()> {
        self.blob = Some(blob.to_string());
        Ok(())
    }
}

fn leg_key(leg: usize) -> String {
    format!("leg{}", leg)
}

pub fn encode_offsets(offsets: &Offsets) -> Result<String, serde_json::Error> {
    let mut doc = Map::new();
    for (leg, joints) in offsets.iter().enumerate() {
        doc.insert(leg_key(leg), serde_json::to_value(joints)?);
    }
    serde_json::to_string(&Value::Object(doc))
}

/// Parse a blob. Legs with a missing or malformed entry come back as zeros and
/// are listed in the second value.
pub fn decode_offsets(blob: &str) -> Result<(Offsets, Vec<usize>), serde_json::Error> {
    let doc: Value = serde_json::from_str(blob)?;
    let mut offsets = ZERO_OFFSETS;
    let mut defaulted = Vec::new();

    for (leg, slot) in offsets.iter_mut().enumerate() {
        match doc.get(leg_key(leg)).and_then(parse_joints) {
            Some(joints) => *slot = joints,
            None => defaulted.push(leg),
        }
    }
    Ok((offsets, defaulted))
}

fn parse_joints(value: &Value) -> Option<[i32; JOINT_COUNT]> {
    let items = value.as_array()?;
    if items.len() != JOINT_COUNT {
        return None;
    }
    let mut joints = [0; JOINT_COUNT];
    for (joint, item) in joints.iter_mut().zip(items) {
        *joint = i32::try_from(item.as_i64()?).ok()?;
    }
    Some(joints)
}

/// Current offsets of every servo
pub fn collect_offsets(legs: &[Leg; LEG_COUNT]) -> Offsets {
    std::array::from_fn(|leg| std::array::from_fn(|joint| legs[leg].servos()[joint].get_offset()))
}

fn apply_offsets(legs: &mut [Leg; LEG_COUNT], offsets: &Offsets) {
    for (leg, joints) in legs.iter_mut().zip(offsets) {
        for (joint, &offset) in joints.iter().enumerate() {
            if let Ok(servo) = leg.get_mut(joint) {
                servo.set_offset(offset);
            }
        }
    }
}

fn leg_mut(legs: &mut [Leg; LEG_COUNT], leg: usize) -> Result<&mut Leg, CalibrationError> {
    legs.get_mut(leg).ok_or(CalibrationError::InvalidLeg(leg))
}

/// Loads, saves and edits trim offsets on a set of legs
pub struct CalibrationStore<B> {
    backend: B,
}

impl<B: CalibrationBackend> CalibrationStore<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Apply stored offsets to every servo. Missing or unreadable data means zero offsets.
    pub fn load(&mut self, legs: &mut [Leg; LEG_COUNT]) -> Offsets {
        let offsets = match self.read_offsets() {
            Ok(offsets) => offsets,
            Err(e) => {
                warn!("Failed to load calibration, using zero offsets: {}", e);
                ZERO_OFFSETS
            }
        };
        apply_offsets(legs, &offsets);
        offsets
    }

    fn read_offsets(&mut self) -> Result<Offsets, CalibrationError> {
        let Some(blob) = self.backend.read()? else {
            warn!("No calibration data stored, using zero offsets");
            return Ok(ZERO_OFFSETS);
        };

        let (offsets, defaulted) = decode_offsets(&blob)?;
        for leg in defaulted {
            warn!("Calibration entry {} missing or malformed, defaulting to 0", leg_key(leg));
        }
        info!("Loaded servo calibration: {:?}", offsets);
        Ok(offsets)
    }

    /// Persist the offsets currently held by the servos
    pub fn save(&mut self, legs: &[Leg; LEG_COUNT]) -> Result<(), CalibrationError> {
        let offsets = collect_offsets(legs);
        let blob = encode_offsets(&offsets)?;
        self.backend.write(&blob)?;
        info!("Saved servo calibration: {:?}", offsets);
        Ok(())
    }

    /// Set one trim value in memory; takes effect on the next write to that servo
    pub fn set_offset(
        &self,
        legs: &mut [Leg; LEG_COUNT],
        leg: usize,
        joint: usize,
        offset: i32,
    ) -> Result<(), CalibrationError> {
        leg_mut(legs, leg)?.get_mut(joint)?.set_offset(offset);
        Ok(())
    }

    pub fn get_offset(
        &self,
        legs: &[Leg; LEG_COUNT],
        leg: usize,
        joint: usize,
    ) -> Result<i32, CalibrationError> {
        let leg = legs.get(leg).ok_or(CalibrationError::InvalidLeg(leg))?;
        Ok(leg.get(joint)?.get_offset())
    }

    /// Drive one servo straight to an angle, bypassing kinematics
    pub fn test_angle<P: PwmOutput + ?Sized>(
        &self,
        legs: &mut [Leg; LEG_COUNT],
        pwm: &mut P,
        leg: usize,
        joint: usize,
        angle: f32,
    ) -> Result<(), CalibrationError> {
        let servo = leg_mut(legs, leg)?.get_mut(joint)?;
        servo.set_angle(pwm, angle).map_err(LegError::from)?;
        Ok(())
    }

    /// Drive every servo to the same angle
    pub fn test_all_legs_angle<P: PwmOutput + ?Sized>(
        &self,
        legs: &mut [Leg; LEG_COUNT],
        pwm: &mut P,
        angle: f32,
    ) -> Result<(), CalibrationError> {
        for leg in 0..LEG_COUNT {
            for joint in 0..JOINT_COUNT {
                self.test_angle(legs, pwm, leg, joint, angle)?;
            }
        }
        Ok(())
    }

    /// Zero every offset in memory. Storage is untouched until the next save.
    pub fn clear_all(&self, legs: &mut [Leg; LEG_COUNT]) {
        apply_offsets(legs, &ZERO_OFFSETS);
        info!("Cleared all servo offsets");
    }

    /// Rewrite every servo at its last angle so edited offsets show on the outputs
    pub fn refresh_all<P: PwmOutput + ?Sized>(
        &self,
        legs: &mut [Leg; LEG_COUNT],
        pwm: &mut P,
    ) -> Result<(), CalibrationError> {
        for leg in 0..LEG_COUNT {
            for joint in 0..JOINT_COUNT {
                self.refresh(legs, pwm, leg, joint)?;
            }
        }
        Ok(())
    }

    /// Rewrite one servo at its last angle
    pub fn refresh<P: PwmOutput + ?Sized>(
        &self,
        legs: &mut [Leg; LEG_COUNT],
        pwm: &mut P,
        leg: usize,
        joint: usize,
    ) -> Result<(), CalibrationError> {
        let servo = leg_mut(legs, leg)?.get_mut(joint)?;
        servo.refresh(pwm).map_err(LegError::from)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::{Chip, SimulatedPwm};

    fn legs() -> [Leg; LEG_COUNT] {
        std::array::from_fn(|i| Leg::new(i).unwrap())
    }

    fn sample_offsets() -> Offsets {
        [
            [10, -20, 30],
            [0, 0, 0],
            [-5, 7, -100],
            [1, 2, 3],
            [-1, -2, -3],
            [250, -250, 0],
        ]
    }

    #[test]
    fn test_encode_layout() {
        let blob = encode_offsets(&sample_offsets()).unwrap();
        assert!(blob.starts_with(r#"{"leg0":[10,-20,30],"leg1":[0,0,0]"#));
        assert!(blob.contains(r#""leg5":[250,-250,0]"#));
    }

    #[test]
    fn test_save_then_load_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("calibration.json");

        let mut source = legs();
        let mut store = CalibrationStore::new(FileBackend::new(&path));
        for (leg, joints) in sample_offsets().iter().enumerate() {
            for (joint, &offset) in joints.iter().enumerate() {
                store.set_offset(&mut source, leg, joint, offset).unwrap();
            }
        }
        store.save(&source).unwrap();

        let mut restored = legs();
        let mut reader = CalibrationStore::new(FileBackend::new(&path));
        let loaded = reader.load(&mut restored);

        assert_eq!(loaded, sample_offsets());
        assert_eq!(collect_offsets(&restored), sample_offsets());
    }

    #[test]
    fn test_missing_file_loads_zeros() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = CalibrationStore::new(FileBackend::new(dir.path().join("absent.json")));
        let mut legs = legs();

        assert_eq!(store.load(&mut legs), ZERO_OFFSETS);
    }

    #[test]
    fn test_malformed_leg_defaults_to_zero() {
        let blob = r#"{"leg0":[1,2,3],"leg1":[1,2],"leg2":"x","leg3":[4,5,6],"leg5":[7,8,9.5]}"#;
        let (offsets, defaulted) = decode_offsets(blob).unwrap();

        assert_eq!(offsets[0], [1, 2, 3]);
        assert_eq!(offsets[3], [4, 5, 6]);
        assert_eq!(offsets[1], [0, 0, 0]);
        assert_eq!(defaulted, vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_corrupt_blob_loads_zeros() {
        let mut store = CalibrationStore::new(MemoryBackend {
            blob: Some("not json".to_string()),
        });
        let mut legs = legs();
        legs[2].get_mut(1).unwrap().set_offset(40);

        assert_eq!(store.load(&mut legs), ZERO_OFFSETS);
        assert_eq!(legs[2].get(1).unwrap().get_offset(), 0);
    }

    #[test]
    fn test_index_validation() {
        let store = CalibrationStore::new(MemoryBackend::default());
        let mut legs = legs();

        assert!(matches!(
            store.set_offset(&mut legs, 6, 0, 10),
            Err(CalibrationError::InvalidLeg(6))
        ));
        assert!(matches!(
            store.get_offset(&legs, 0, 3),
            Err(CalibrationError::Leg(LegError::InvalidJoint(3)))
        ));
    }

    #[test]
    fn test_clear_all_keeps_storage() {
        let mut store = CalibrationStore::new(MemoryBackend::default());
        let mut legs = legs();
        store.set_offset(&mut legs, 4, 2, -60).unwrap();
        store.save(&legs).unwrap();

        store.clear_all(&mut legs);

        assert_eq!(collect_offsets(&legs), ZERO_OFFSETS);
        let (stored, _) = decode_offsets(store.backend().blob.as_deref().unwrap()).unwrap();
        assert_eq!(stored[4][2], -60);
    }

    #[test]
    fn test_angle_applies_offset() {
        let store = CalibrationStore::new(MemoryBackend::default());
        let mut pwm = SimulatedPwm::new();
        let mut legs = legs();
        store.set_offset(&mut legs, 1, 0, 100).unwrap();

        // leg 1 coax sits on right board channel 2
        store.test_angle(&mut legs, &mut pwm, 1, 0, 0.0).unwrap();

        assert_eq!(pwm.off_ticks(Chip::Right, 2), Some(327));
    }

    #[test]
    fn test_all_legs_angle_touches_every_servo() {
        let store = CalibrationStore::new(MemoryBackend::default());
        let mut pwm = SimulatedPwm::new();
        let mut legs = legs();

        store.test_all_legs_angle(&mut legs, &mut pwm, 0.0).unwrap();

        assert_eq!(pwm.write_count(), LEG_COUNT * JOINT_COUNT);
    }
}
