// PWM diagnostic: READ-ONLY check of both PCA9685 boards
//
// Probes the two chips and dumps the on/off ticks of every servo channel.
// Nothing is written, so the chips keep whatever state they had.
//
// Usage: cargo run --example pwm_diagnostic -- [i2c-device]
// Example: cargo run --example pwm_diagnostic -- /dev/i2c-1

use hexapod_zenoh_runtime::config::{DEFAULT_I2C_DEVICE, PWM_FREQUENCY_HZ};
use hexapod_zenoh_runtime::pwm::pca9685::{FULL_ON_OFF, TICKS_PER_PERIOD};
use hexapod_zenoh_runtime::pwm::{Chip, HardwareContext, PwmOutput};
use hexapod_zenoh_runtime::servo::{CHANNEL_MAP, ChannelAddress};

const LEG_NAMES: [&str; 6] = [
    "Right front",
    "Right middle",
    "Right rear",
    "Left rear",
    "Left middle",
    "Left front",
];
const JOINT_NAMES: [&str; 3] = ["coax", "femur", "tibia"];

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("debug".parse().unwrap()),
        )
        .init();

    // Get device from args or use default
    let device = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_I2C_DEVICE.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Hexapod PWM Diagnostic (READ-ONLY)                 ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  This tool only READS registers - no writes, no movement     ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();
    println!("I2C device: {}", device);
    println!();

    println!("Step 1: Opening bus and probing both boards...");
    let mut pwm = match HardwareContext::open_linux(&device) {
        Ok(pwm) => {
            println!("  ✓ Both PCA9685 boards responded");
            pwm
        }
        Err(e) => {
            println!("  ✗ {}", e);
            println!();
            println!("Troubleshooting:");
            println!("  - Check the I2C device path and that i2c is enabled");
            println!("  - Run `i2cdetect -y 1` and look for 0x40 and 0x41");
            println!("  - Verify the address jumpers on the right board");
            return Err(e.into());
        }
    };
    println!();

    println!("Step 2: Reading MODE1...");
    for chip in Chip::ALL {
        match pwm.read_mode(chip) {
            Ok(mode) => {
                let sleeping = if mode & 0x10 != 0 { "SLEEPING" } else { "awake" };
                println!("  {:?}: 0x{:02X} ({})", chip, mode, sleeping);
            }
            Err(e) => println!("  {:?}: ERROR - {}", chip, e),
        }
    }
    println!();

    println!("Step 3: Reading servo channels...");
    println!();
    let us_per_tick = 1_000_000.0 / (PWM_FREQUENCY_HZ as f32 * TICKS_PER_PERIOD as f32);

    for (leg, joints) in CHANNEL_MAP.iter().enumerate() {
        println!("  === Leg {} ({}) ===", leg, LEG_NAMES[leg]);
        for (joint, &channel) in joints.iter().enumerate() {
            let Some(address) = ChannelAddress::from_global(channel) else {
                println!("    {:<6} ch {:>2}: not a valid channel", JOINT_NAMES[joint], channel);
                continue;
            };
            match pwm.get_channel(address.chip, address.index) {
                Ok((_, off)) if off & FULL_ON_OFF != 0 => {
                    println!("    {:<6} ch {:>2}: OFF", JOINT_NAMES[joint], channel);
                }
                Ok((on, off)) => {
                    let pulse_us = off.saturating_sub(on) as f32 * us_per_tick;
                    println!(
                        "    {:<6} ch {:>2}: on={:>4} off={:>4} ({:.0} µs)",
                        JOINT_NAMES[joint], channel, on, off, pulse_us
                    );
                }
                Err(e) => println!("    {:<6} ch {:>2}: ERROR - {}", JOINT_NAMES[joint], channel, e),
            }
        }
        println!();
    }

    println!("Diagnostic complete.");
    println!("A freshly initialized robot in standby shows ~1500 µs on every channel.");

    Ok(())
}
