// In-memory stand-in for the two PCA9685 boards
use super::pca9685::{FULL_ON_OFF, validate_channel};
use super::{CHANNELS_PER_CHIP, Chip, PwmError, PwmOutput, Result};

const CHANNELS: usize = CHANNELS_PER_CHIP as usize;

/// Keeps the last on/off pair written to every channel
#[derive(Debug, Clone, Default)]
pub struct SimulatedPwm {
    channels: [[(u16, u16); CHANNELS]; 2],
    writes: usize,
}

impl SimulatedPwm {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of channel writes accepted so far
    pub fn write_count(&self) -> usize {
        self.writes
    }

    /// Off tick of a channel, the value that sets the pulse width
    pub fn off_ticks(&self, chip: Chip, index: u8) -> Option<u16> {
        self.channels[chip.index()]
            .get(index as usize)
            .map(|&(_, off)| off)
    }
}

impl PwmOutput for SimulatedPwm {
    fn set_channel(&mut self, chip: Chip, index: u8, on: u16, off: u16) -> Result<()> {
        validate_channel(index, on, off)?;
        self.channels[chip.index()][index as usize] = (on, off);
        self.writes += 1;
        Ok(())
    }

    fn get_channel(&mut self, chip: Chip, index: u8) -> Result<(u16, u16)> {
        self.channels[chip.index()]
            .get(index as usize)
            .copied()
            .ok_or(PwmError::InvalidChannel(index))
    }

    fn all_off(&mut self, chip: Chip) -> Result<()> {
        self.channels[chip.index()] = [(0, FULL_ON_OFF); CHANNELS];
        Ok(())
    }
}
