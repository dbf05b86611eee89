// PWM output layer for the two daisy-chained PCA9685 boards
//
// Provides:
// - PCA9685 register protocol over an embedded-hal I2C bus
// - HardwareContext owning the bus and both chip handles, initialized once
// - A simulated register file for running without hardware

mod context;
#[cfg(test)]
pub(crate) mod mock;
pub mod pca9685;
mod sim;

pub use context::HardwareContext;
pub use pca9685::{Pca9685, RegisterWrite};
pub use sim::SimulatedPwm;

use embedded_hal::i2c::ErrorKind;

/// Channels on one PCA9685
pub const CHANNELS_PER_CHIP: u8 = 16;

/// Which of the two boards a channel lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Chip {
    Left,
    Right,
}

impl Chip {
    pub const ALL: [Chip; 2] = [Chip::Left, Chip::Right];

    pub fn index(self) -> usize {
        match self {
            Chip::Left => 0,
            Chip::Right => 1,
        }
    }
}

/// Error types for PWM controller communication
#[derive(Debug, thiserror::Error)]
pub enum PwmError {
    #[error("Cannot claim I2C bus {path}: {reason}")]
    BusInit { path: String, reason: String },

    #[error("PCA9685 at 0x{address:02X} did not respond: {kind}")]
    DeviceInit { address: u8, kind: ErrorKind },

    #[error("I2C transaction with 0x{address:02X} failed: {kind}")]
    I2c { address: u8, kind: ErrorKind },

    #[error("PWM controllers have not been initialized")]
    NotInitialized,

    #[error("Invalid channel {0} (0-15)")]
    InvalidChannel(u8),

    #[error("Invalid tick value {0} (0-4095, or 4096 for full on/off)")]
    InvalidTicks(u16),

    #[error("PWM frequency {0} Hz is outside the prescaler range")]
    InvalidFrequency(u16),

    #[error("Register write of {len} bytes exceeds the transaction buffer")]
    BufferOverflow { len: usize },
}

pub type Result<T> = std::result::Result<T, PwmError>;

/// Anything that can drive the 32 servo channels.
///
/// Implemented by [`HardwareContext`] for real boards and by [`SimulatedPwm`]
/// when running without hardware.
pub trait PwmOutput {
    /// Write the on/off tick pair of one channel
    fn set_channel(&mut self, chip: Chip, index: u8, on: u16, off: u16) -> Result<()>;

    /// Read back the on/off tick pair of one channel
    fn get_channel(&mut self, chip: Chip, index: u8) -> Result<(u16, u16)>;

    /// Turn every channel of a chip fully off
    fn all_off(&mut self, chip: Chip) -> Result<()>;
}
