// Hexapod motion core: PCA9685 servo output, leg kinematics, gaits and calibration,
// driven over Zenoh by the runtime binary

pub mod calibration;
pub mod config;
pub mod hexapod;
pub mod leg;
pub mod messages;
pub mod movement;
pub mod pwm;
pub mod runtime;
pub mod servo;
