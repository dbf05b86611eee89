// Owns the I2C bus and both PCA9685 handles
use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;
use linux_embedded_hal::{Delay, I2cdev};
use tracing::{debug, info};

use super::pca9685::Pca9685;
use super::{Chip, PwmError, PwmOutput, Result};
use crate::config::{PCA9685_LEFT_ADDRESS, PCA9685_RIGHT_ADDRESS, PWM_FREQUENCY_HZ};

/// Hardware handles for the two boards.
///
/// Created once by the composition root and handed to whoever drives servos.
/// Writes are refused until [`HardwareContext::initialize`] has run.
pub struct HardwareContext<I2C, D> {
    bus: I2C,
    delay: D,
    chips: [Pca9685; 2],
    frequency_hz: u16,
    initialized: bool,
}

impl HardwareContext<I2cdev, Delay> {
    /// Open a Linux I2C character device with the default board addresses
    pub fn open_linux(path: &str) -> Result<Self> {
        info!("Opening I2C bus {}", path);
        let bus = I2cdev::new(path).map_err(|e| PwmError::BusInit {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::attach(bus, Delay, PCA9685_LEFT_ADDRESS, PCA9685_RIGHT_ADDRESS)
    }
}

impl<I2C: I2c, D: DelayNs> HardwareContext<I2C, D> {
    /// Wrap an already-open bus and verify both boards answer
    pub fn attach(bus: I2C, delay: D, left_address: u8, right_address: u8) -> Result<Self> {
        let mut context = Self {
            bus,
            delay,
            chips: [Pca9685::new(left_address), Pca9685::new(right_address)],
            frequency_hz: PWM_FREQUENCY_HZ,
            initialized: false,
        };

        for chip in Chip::ALL {
            let handle = context.chips[chip.index()];
            let mode = handle.probe(&mut context.bus)?;
            debug!(
                "{:?} PCA9685 at 0x{:02X} responded, MODE1=0x{:02X}",
                chip,
                handle.address(),
                mode
            );
        }
        Ok(context)
    }

    /// Reset both chips and program the servo frequency. Safe to call again.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            debug!("PWM controllers already initialized");
            return Ok(());
        }

        for handle in self.chips {
            handle.reset(&mut self.bus, &mut self.delay)?;
        }
        for handle in self.chips {
            handle.set_frequency(&mut self.bus, &mut self.delay, self.frequency_hz)?;
        }

        self.initialized = true;
        info!(
            "PWM controllers initialized at {} Hz (0x{:02X}, 0x{:02X})",
            self.frequency_hz,
            self.chips[0].address(),
            self.chips[1].address()
        );
        Ok(())
    }

    /// Current MODE1 register of a chip
    pub fn read_mode(&mut self, chip: Chip) -> Result<u8> {
        self.handle(chip).probe(&mut self.bus)
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn handle(&self, chip: Chip) -> Pca9685 {
        self.chips[chip.index()]
    }
}

impl<I2C: I2c, D: DelayNs> PwmOutput for HardwareContext<I2C, D> {
    fn set_channel(&mut self, chip: Chip, index: u8, on: u16, off: u16) -> Result<()> {
        if !self.initialized {
            return Err(PwmError::NotInitialized);
        }
        self.handle(chip).set_channel(&mut self.bus, index, on, off)
    }

    fn get_channel(&mut self, chip: Chip, index: u8) -> Result<(u16, u16)> {
        self.handle(chip).get_channel(&mut self.bus, index)
    }

    fn all_off(&mut self, chip: Chip) -> Result<()> {
        if !self.initialized {
            return Err(PwmError::NotInitialized);
        }
        self.handle(chip).all_off(&mut self.bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pwm::mock::{MockBus, MockDelay};
    use crate::pwm::pca9685::Register;

    fn context() -> HardwareContext<MockBus, MockDelay> {
        let bus = MockBus::new(&[PCA9685_LEFT_ADDRESS, PCA9685_RIGHT_ADDRESS]);
        HardwareContext::attach(
            bus,
            MockDelay::default(),
            PCA9685_LEFT_ADDRESS,
            PCA9685_RIGHT_ADDRESS,
        )
        .unwrap()
    }

    #[test]
    fn test_attach_fails_when_board_missing() {
        let bus = MockBus::new(&[PCA9685_LEFT_ADDRESS]);
        let result = HardwareContext::attach(
            bus,
            MockDelay::default(),
            PCA9685_LEFT_ADDRESS,
            PCA9685_RIGHT_ADDRESS,
        );
        assert!(matches!(
            result,
            Err(PwmError::DeviceInit { address: PCA9685_RIGHT_ADDRESS, .. })
        ));
    }

    #[test]
    fn test_writes_refused_before_initialize() {
        let mut ctx = context();
        assert!(matches!(
            ctx.set_channel(Chip::Left, 0, 0, 307),
            Err(PwmError::NotInitialized)
        ));
        assert!(matches!(ctx.all_off(Chip::Right), Err(PwmError::NotInitialized)));
    }

    #[test]
    fn test_initialize_is_idempotent() {
        let mut ctx = context();
        ctx.initialize().unwrap();
        let writes_after_first = ctx.bus.writes.len();

        ctx.initialize().unwrap();

        assert!(ctx.is_initialized());
        assert_eq!(ctx.bus.writes.len(), writes_after_first);
        for address in [PCA9685_LEFT_ADDRESS, PCA9685_RIGHT_ADDRESS] {
            assert_eq!(ctx.bus.register(address, Register::PreScale as u8), 121);
        }
    }

    #[test]
    fn test_channels_route_to_their_chip() {
        let mut ctx = context();
        ctx.initialize().unwrap();

        ctx.set_channel(Chip::Right, 5, 0, 307).unwrap();
        ctx.set_channel(Chip::Left, 5, 0, 400).unwrap();

        assert_eq!(ctx.get_channel(Chip::Right, 5).unwrap(), (0, 307));
        assert_eq!(ctx.get_channel(Chip::Left, 5).unwrap(), (0, 400));
    }
}
