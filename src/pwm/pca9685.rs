// NXP PCA9685 16-channel PWM controller register protocol
//
// Every write is [register, payload...] sent to the chip address.
// Reads send the register then read back with auto-increment.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{Error as _, I2c};
use heapless::Vec;
use tracing::debug;

use super::{CHANNELS_PER_CHIP, PwmError, Result};

/// Internal oscillator frequency
pub const CLOCK_FREQ_HZ: f32 = 25_000_000.0;

/// Ticks in one PWM period
pub const TICKS_PER_PERIOD: u16 = 4096;

/// Bit 12 of an ON/OFF pair: channel fully on/off
pub const FULL_ON_OFF: u16 = 0x1000;

pub const RESET_SETTLE_MS: u32 = 10;
pub const WAKE_SETTLE_MS: u32 = 5;

/// Register addresses
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Register {
    Mode1 = 0x00,
    Led0OnL = 0x06,  // 4 bytes per channel: on_l, on_h, off_l, off_h
    AllLedOnL = 0xFA, // same layout, applies to every channel
    PreScale = 0xFE,
}

/// MODE1 bits
pub const MODE1_RESTART: u8 = 0x80;
pub const MODE1_AUTO_INCREMENT: u8 = 0x20;
pub const MODE1_SLEEP: u8 = 0x10;

const LED_STRIDE: u8 = 4;
const PRESCALE_MIN: f32 = 3.0;
const PRESCALE_MAX: f32 = 255.0;

/// Register byte plus the largest payload we send (one channel block)
const REGISTER_WRITE_LEN: usize = 5;

/// Owned, length-checked buffer for one register write transaction
#[derive(Debug, Clone, PartialEq)]
pub struct RegisterWrite {
    bytes: Vec<u8, REGISTER_WRITE_LEN>,
}

impl RegisterWrite {
    pub fn new(register: u8, payload: &[u8]) -> Result<Self> {
        let len = payload.len() + 1;
        let mut bytes = Vec::new();
        bytes
            .push(register)
            .map_err(|_| PwmError::BufferOverflow { len })?;
        bytes
            .extend_from_slice(payload)
            .map_err(|_| PwmError::BufferOverflow { len })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// Prescaler value for a PWM frequency: round(clock / (4096 * hz)) - 1
pub fn prescale_for(hz: u16) -> Result<u8> {
    if hz == 0 {
        return Err(PwmError::InvalidFrequency(hz));
    }
    let prescale = (CLOCK_FREQ_HZ / (TICKS_PER_PERIOD as f32 * hz as f32)).round() - 1.0;
    if !(PRESCALE_MIN..=PRESCALE_MAX).contains(&prescale) {
        return Err(PwmError::InvalidFrequency(hz));
    }
    Ok(prescale as u8)
}

/// Reject channel indices and tick values the chip cannot represent
pub fn validate_channel(index: u8, on: u16, off: u16) -> Result<()> {
    if index >= CHANNELS_PER_CHIP {
        return Err(PwmError::InvalidChannel(index));
    }
    for ticks in [on, off] {
        if ticks > FULL_ON_OFF {
            return Err(PwmError::InvalidTicks(ticks));
        }
    }
    Ok(())
}

/// Handle for one PCA9685 on a shared bus
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pca9685 {
    address: u8,
}

impl Pca9685 {
    pub fn new(address: u8) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u8 {
        self.address
    }

    fn bus_error<E: embedded_hal::i2c::Error>(&self, error: E) -> PwmError {
        PwmError::I2c {
            address: self.address,
            kind: error.kind(),
        }
    }

    fn write<I: I2c>(&self, bus: &mut I, register: u8, payload: &[u8]) -> Result<()> {
        let buffer = RegisterWrite::new(register, payload)?;
        bus.write(self.address, buffer.as_bytes())
            .map_err(|e| self.bus_error(e))
    }

    fn read<I: I2c>(&self, bus: &mut I, register: u8, data: &mut [u8]) -> Result<()> {
        bus.write_read(self.address, &[register], data)
            .map_err(|e| self.bus_error(e))
    }

    /// Check the chip answers by reading MODE1
    pub fn probe<I: I2c>(&self, bus: &mut I) -> Result<u8> {
        let mut mode = [0u8];
        bus.write_read(self.address, &[Register::Mode1 as u8], &mut mode)
            .map_err(|e| PwmError::DeviceInit {
                address: self.address,
                kind: e.kind(),
            })?;
        Ok(mode[0])
    }

    /// Software reset, followed by the mandatory settle delay
    pub fn reset<I: I2c, D: DelayNs>(&self, bus: &mut I, delay: &mut D) -> Result<()> {
        let result = self.write(bus, Register::Mode1 as u8, &[MODE1_RESTART]);
        delay.delay_ms(RESET_SETTLE_MS);
        result
    }

    /// Program the output frequency.
    ///
    /// The prescaler is only writable while the oscillator sleeps, so this goes
    /// sleep -> prescale -> restore mode -> settle -> restart.
    pub fn set_frequency<I: I2c, D: DelayNs>(
        &self,
        bus: &mut I,
        delay: &mut D,
        hz: u16,
    ) -> Result<()> {
        let prescale = prescale_for(hz)?;

        let mut mode = [0u8];
        self.read(bus, Register::Mode1 as u8, &mut mode)?;
        let old_mode = mode[0];

        let sleep_mode = (old_mode & !MODE1_RESTART) | MODE1_SLEEP;
        self.write(bus, Register::Mode1 as u8, &[sleep_mode])?;
        self.write(bus, Register::PreScale as u8, &[prescale])?;
        self.write(bus, Register::Mode1 as u8, &[old_mode])?;

        delay.delay_ms(WAKE_SETTLE_MS);

        debug!(
            "PCA9685 0x{:02X}: {} Hz, prescale={}",
            self.address, hz, prescale
        );
        self.write(
            bus,
            Register::Mode1 as u8,
            &[old_mode | MODE1_RESTART | MODE1_AUTO_INCREMENT],
        )
    }

    /// Write the on/off tick pair of one channel
    pub fn set_channel<I: I2c>(&self, bus: &mut I, index: u8, on: u16, off: u16) -> Result<()> {
        validate_channel(index, on, off)?;

        let [on_l, on_h] = on.to_le_bytes();
        let [off_l, off_h] = off.to_le_bytes();
        self.write(bus, channel_register(index), &[on_l, on_h, off_l, off_h])
    }

    /// Read back the on/off tick pair of one channel
    pub fn get_channel<I: I2c>(&self, bus: &mut I, index: u8) -> Result<(u16, u16)> {
        if index >= CHANNELS_PER_CHIP {
            return Err(PwmError::InvalidChannel(index));
        }

        let mut block = [0u8; 4];
        self.read(bus, channel_register(index), &mut block)?;
        Ok((
            u16::from_le_bytes([block[0], block[1]]),
            u16::from_le_bytes([block[2], block[3]]),
        ))
    }

    /// Set the full-off bit on every channel at once
    pub fn all_off<I: I2c>(&self, bus: &mut I) -> Result<()> {
        let [off_l, off_h] = FULL_ON_OFF.to_le_bytes();
        self.write(bus, Register::AllLedOnL as u8, &[0, 0, off_l, off_h])
    }
}

fn channel_register(index: u8) -> u8 {
    Register::Led0OnL as u8 + LED_STRIDE * index
}
