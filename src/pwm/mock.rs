// Register-level I2C bus model for tests
use std::collections::HashMap;

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::{ErrorKind, ErrorType, I2c, NoAcknowledgeSource, Operation};

#[derive(Debug, Clone, Copy)]
pub struct MockError(pub ErrorKind);

impl embedded_hal::i2c::Error for MockError {
    fn kind(&self) -> ErrorKind {
        self.0
    }
}

/// 256-byte register file per responding address, with auto-increment
pub struct MockBus {
    registers: HashMap<u8, [u8; 256]>,
    pointers: HashMap<u8, u8>,
    pub writes: Vec<(u8, Vec<u8>)>,
}

impl MockBus {
    pub fn new(addresses: &[u8]) -> Self {
        Self {
            registers: addresses.iter().map(|&a| (a, [0u8; 256])).collect(),
            pointers: HashMap::new(),
            writes: Vec::new(),
        }
    }

    pub fn set_register(&mut self, address: u8, register: u8, value: u8) {
        if let Some(file) = self.registers.get_mut(&address) {
            file[register as usize] = value;
        }
    }

    pub fn register(&self, address: u8, register: u8) -> u8 {
        self.registers[&address][register as usize]
    }
}

impl ErrorType for MockBus {
    type Error = MockError;
}

impl I2c for MockBus {
    fn transaction(
        &mut self,
        address: u8,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let Some(file) = self.registers.get_mut(&address) else {
            return Err(MockError(ErrorKind::NoAcknowledge(
                NoAcknowledgeSource::Address,
            )));
        };
        let pointer = self.pointers.entry(address).or_insert(0);

        for op in operations.iter_mut() {
            match op {
                Operation::Write(bytes) => {
                    self.writes.push((address, bytes.to_vec()));
                    if let Some((register, data)) = bytes.split_first() {
                        *pointer = *register;
                        for byte in data {
                            file[*pointer as usize] = *byte;
                            *pointer = pointer.wrapping_add(1);
                        }
                    }
                }
                Operation::Read(buffer) => {
                    for byte in buffer.iter_mut() {
                        *byte = file[*pointer as usize];
                        *pointer = pointer.wrapping_add(1);
                    }
                }
            }
        }
        Ok(())
    }
}

/// Records requested delays instead of sleeping
#[derive(Debug, Default)]
pub struct MockDelay {
    total_ns: u64,
}

impl MockDelay {
    pub fn total_ms(&self) -> u32 {
        (self.total_ns / 1_000_000) as u32
    }
}

impl DelayNs for MockDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.total_ns += ns as u64;
    }
}
