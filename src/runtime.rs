// 50 Hz gait loop with watchdog
// Note: a watchdog is a safety mechanism that triggers a safe action if something goes wrong
// Eg. without it if teleop crashes mid-stride, the robot would keep walking on the last mode it heard

use std::time::{Duration, Instant};
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::calibration::{CalibrationBackend, CalibrationEntry, FileBackend};
use crate::config::{
    Args, CMD_TIMEOUT, LOOP_HZ, MOVEMENT_INTERVAL_MS, TOPIC_CALIBRATION, TOPIC_CMD, TOPIC_HEALTH,
    TOPIC_STATUS,
};
use crate::hexapod::{Hexapod, HexapodError};
use crate::messages::{CalAction, CalibrationReport, HexapodCommand, HexapodStatus, RuntimeHealth};
use crate::movement::MovementMode;
use crate::pwm::{HardwareContext, PwmOutput, SimulatedPwm};

/// Problems with a single command; logged and dropped, never fatal
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Calibration action {action:?} is missing field `{field}`")]
    MissingField { action: CalAction, field: &'static str },

    #[error(transparent)]
    Hexapod(#[from] HexapodError),
}

fn require<T>(value: Option<T>, action: CalAction, field: &'static str) -> Result<T, CommandError> {
    value.ok_or(CommandError::MissingField { action, field })
}

pub struct Runtime<P, B> {
    hexapod: Hexapod<P, B>,
    mode: MovementMode,
    cmd_received_at: Instant,
    stale: bool,
    calibrating: bool,
    fault: bool,
    health: RuntimeHealth,
}

impl<P: PwmOutput, B: CalibrationBackend> Runtime<P, B> {
    pub fn new(hexapod: Hexapod<P, B>) -> Self {
        Self {
            hexapod,
            mode: MovementMode::Standby,
            cmd_received_at: Instant::now(),
            stale: true, // Start stale until first cmd
            calibrating: false,
            fault: false,
            health: RuntimeHealth::CmdStale,
        }
    }

    pub fn health(&self) -> RuntimeHealth {
        self.health
    }

    pub fn hexapod(&self) -> &Hexapod<P, B> {
        &self.hexapod
    }

    /// Process incoming command. Returns a calibration report to publish, if one was asked for.
    fn on_command(&mut self, cmd: HexapodCommand) -> Option<CalibrationReport> {
        debug!("Received command: {:?}", &cmd);

        if let Some(value) = cmd.movement_mode {
            match MovementMode::try_from(value) {
                Ok(mode) => {
                    self.mode = mode;
                    self.cmd_received_at = Instant::now();
                    self.stale = false;
                }
                Err(_) => warn!("{}", HexapodError::InvalidMode(value)),
            }
        }

        if let Some(speed) = cmd.speed {
            self.hexapod.set_movement_speed(speed);
        }

        if let Some(level) = cmd.speed_level {
            if let Err(e) = self.hexapod.set_movement_speed_level(level) {
                warn!("{}", e);
            }
        }

        let action = cmd.cal_action?;
        match self.on_calibration(action, &cmd) {
            Ok(report) => report,
            Err(e) => {
                warn!("Calibration {:?} failed: {}", action, e);
                None
            }
        }
    }

    fn on_calibration(
        &mut self,
        action: CalAction,
        cmd: &HexapodCommand,
    ) -> Result<Option<CalibrationReport>, CommandError> {
        match action {
            CalAction::Start => {
                info!("Entering calibration mode");
                self.calibrating = true;
                self.hexapod.force_reset_all_leg_tip_positions()?;
            }
            CalAction::Stop => {
                info!("Leaving calibration mode");
                self.calibrating = false;
            }
            CalAction::Save => self.hexapod.calibration_save()?,
            CalAction::Set => {
                let entry = CalibrationEntry {
                    leg: require(cmd.leg, action, "leg")?,
                    joint: require(cmd.joint, action, "joint")?,
                    offset: require(cmd.offset, action, "offset")?,
                };
                self.hexapod.calibration_set(entry)?;
            }
            CalAction::Get => {
                return Ok(Some(CalibrationReport {
                    offsets: self.hexapod.offsets(),
                }));
            }
            CalAction::Test => {
                let leg = require(cmd.leg, action, "leg")?;
                let joint = require(cmd.joint, action, "joint")?;
                let angle = require(cmd.angle, action, "angle")?;
                self.hexapod.calibration_test(leg, joint, angle)?;
            }
            CalAction::TestAll => {
                let angle = require(cmd.angle, action, "angle")?;
                self.hexapod.calibration_test_all_legs(angle)?;
            }
            CalAction::Clear => self.hexapod.clear_offsets()?,
            CalAction::Reset => self.hexapod.force_reset_all_leg_tip_positions()?,
        }
        Ok(None)
    }

    /// One control tick: watchdog, then gait step unless calibrating
    fn tick(&mut self, elapsed_ms: f32) {
        if self.calibrating {
            self.update_health();
            return;
        }

        let cmd_age = self.cmd_received_at.elapsed();
        if self.mode != MovementMode::Standby && cmd_age > CMD_TIMEOUT {
            // Watchdog triggered - stand still
            warn!("Command stale ({:?} old), reverting to standby", cmd_age);
            self.mode = MovementMode::Standby;
            self.stale = true;
        }

        match self.hexapod.process_movement(self.mode, elapsed_ms) {
            Ok(()) => self.fault = false,
            Err(e) if e.is_kinematic() => warn!("Skipping unreachable pose: {}", e),
            Err(e) => {
                if !self.fault {
                    warn!("Hardware fault: {}", e);
                }
                self.fault = true;
            }
        }
        self.update_health();
    }

    fn update_health(&mut self) {
        self.health = if self.calibrating {
            RuntimeHealth::Calibrating
        } else if self.fault {
            RuntimeHealth::HardwareFault
        } else if self.stale {
            RuntimeHealth::CmdStale
        } else {
            RuntimeHealth::Ok
        };
    }

    fn status(&self) -> HexapodStatus {
        let mode = self.hexapod.mode();
        HexapodStatus {
            mode: mode.into(),
            mode_name: mode.name().to_string(),
            speed: self.hexapod.movement_speed(),
            calibrating: self.calibrating,
        }
    }

    /// Cut servo power on the way out
    fn shutdown(&mut self) {
        if let Err(e) = self.hexapod.all_off() {
            warn!("Failed to turn servos off: {}", e);
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let backend = FileBackend::new(&args.calibration_file);
    info!("Calibration file: {}", backend.path().display());

    if args.simulate {
        info!("Running against simulated PWM outputs");
        let hexapod = Hexapod::new(SimulatedPwm::new(), backend)?;
        serve(hexapod, args.reset).await
    } else {
        let mut hardware = HardwareContext::open_linux(&args.i2c_device)?;
        hardware.initialize()?;
        let hexapod = Hexapod::new(hardware, backend)?;
        serve(hexapod, args.reset).await
    }
}

async fn serve<P: PwmOutput, B: CalibrationBackend>(
    mut hexapod: Hexapod<P, B>,
    reset: bool,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    hexapod.init(reset)?;

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;

    info!("Setting up publishers and subscribers...");
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_health = session.declare_publisher(TOPIC_HEALTH).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;
    let pub_calibration = session.declare_publisher(TOPIC_CALIBRATION).await?;

    let mut runtime = Runtime::new(hexapod);
    let mut tick = interval(Duration::from_millis(MOVEMENT_INTERVAL_MS));
    let mut last_tick = Instant::now();

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(
        "Runtime started: {}Hz loop, {}ms watchdog timeout",
        LOOP_HZ,
        CMD_TIMEOUT.as_millis()
    );
    info!("Subscribed to: {}", TOPIC_CMD);
    info!(
        "Publishing to: {}, {}, {}",
        TOPIC_HEALTH, TOPIC_STATUS, TOPIC_CALIBRATION
    );

    loop {
        tokio::select! {
            _ = tick.tick() => {}
            _ = &mut shutdown => {
                info!("Shutting down");
                break;
            }
        }

        // 1. Drain all pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match serde_json::from_slice::<HexapodCommand>(&payload) {
                Ok(cmd) => {
                    if let Some(report) = runtime.on_command(cmd) {
                        let report_json = serde_json::to_string(&report)?;
                        pub_calibration.put(report_json).await?;
                    }
                }
                Err(e) => {
                    warn!("Failed to parse command: {}", e);
                }
            }
        }

        // 2. Step the gait with the measured elapsed time (includes watchdog logic)
        let now = Instant::now();
        let elapsed_ms = now.duration_since(last_tick).as_secs_f32() * 1000.0;
        last_tick = now;
        runtime.tick(elapsed_ms);

        // 3. Publish health and status
        let health_json = serde_json::to_string(&runtime.health)?;
        pub_health.put(health_json).await?;
        let status_json = serde_json::to_string(&runtime.status())?;
        pub_status.put(status_json).await?;
    }

    runtime.shutdown();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::MemoryBackend;
    use crate::pwm::Chip;
    use crate::pwm::pca9685::FULL_ON_OFF;

    fn runtime() -> Runtime<SimulatedPwm, MemoryBackend> {
        let mut hexapod =
            Hexapod::with_seed(SimulatedPwm::new(), MemoryBackend::default(), 11).unwrap();
        hexapod.init(false).unwrap();
        Runtime::new(hexapod)
    }

    fn cal(action: CalAction) -> HexapodCommand {
        HexapodCommand {
            cal_action: Some(action),
            ..Default::default()
        }
    }

    #[test]
    fn test_starts_stale_until_first_command() {
        let mut rt = runtime();
        rt.tick(20.0);
        assert_eq!(rt.health(), RuntimeHealth::CmdStale);

        rt.on_command(HexapodCommand::movement(1));
        rt.tick(20.0);
        assert_eq!(rt.health(), RuntimeHealth::Ok);
        assert_eq!(rt.hexapod().mode(), MovementMode::Forward);
    }

    #[test]
    fn test_watchdog_reverts_to_standby() {
        let mut rt = runtime();
        rt.on_command(HexapodCommand::movement(4));
        rt.tick(20.0);
        assert_eq!(rt.hexapod().mode(), MovementMode::TurnLeft);

        rt.cmd_received_at = Instant::now()
            .checked_sub(CMD_TIMEOUT + Duration::from_millis(100))
            .unwrap();
        rt.tick(20.0);

        assert_eq!(rt.hexapod().mode(), MovementMode::Standby);
        assert_eq!(rt.health(), RuntimeHealth::CmdStale);
    }

    #[test]
    fn test_invalid_mode_ignored() {
        let mut rt = runtime();
        rt.on_command(HexapodCommand::movement(2));
        rt.on_command(HexapodCommand::movement(40));
        rt.tick(20.0);
        assert_eq!(rt.hexapod().mode(), MovementMode::ForwardFast);
    }

    #[test]
    fn test_speed_commands() {
        let mut rt = runtime();
        rt.on_command(HexapodCommand {
            speed_level: Some(0),
            ..Default::default()
        });
        assert_eq!(rt.hexapod().movement_speed(), 0.25);

        rt.on_command(HexapodCommand {
            speed: Some(0.8),
            ..Default::default()
        });
        assert_eq!(rt.hexapod().movement_speed(), 0.8);
    }

    #[test]
    fn test_calibration_mode_holds_test_angles() {
        let mut rt = runtime();
        rt.on_command(HexapodCommand::movement(1));
        rt.on_command(cal(CalAction::Start));
        rt.on_command(HexapodCommand {
            cal_action: Some(CalAction::Test),
            leg: Some(1),
            joint: Some(0),
            angle: Some(30.0),
            ..Default::default()
        });
        let held = rt.hexapod().pwm().off_ticks(Chip::Right, 2);

        for _ in 0..10 {
            rt.tick(20.0);
        }

        assert_eq!(rt.health(), RuntimeHealth::Calibrating);
        assert_eq!(rt.hexapod().pwm().off_ticks(Chip::Right, 2), held);

        rt.on_command(cal(CalAction::Stop));
        rt.tick(20.0);
        assert_ne!(rt.health(), RuntimeHealth::Calibrating);
    }

    #[test]
    fn test_calibration_set_and_get() {
        let mut rt = runtime();
        rt.on_command(HexapodCommand {
            cal_action: Some(CalAction::Set),
            leg: Some(3),
            joint: Some(2),
            offset: Some(-45),
            ..Default::default()
        });

        let report = rt.on_command(cal(CalAction::Get)).unwrap();
        assert_eq!(report.offsets[3][2], -45);
    }

    #[test]
    fn test_offsets_apply_live_in_calibration_mode() {
        let mut rt = runtime();
        rt.on_command(cal(CalAction::Start));
        let before = rt.hexapod().pwm().off_ticks(Chip::Right, 2);

        rt.on_command(HexapodCommand {
            cal_action: Some(CalAction::Set),
            leg: Some(1),
            joint: Some(0),
            offset: Some(200),
            ..Default::default()
        });
        for _ in 0..5 {
            rt.tick(20.0);
        }
        let trimmed = rt.hexapod().pwm().off_ticks(Chip::Right, 2);

        // 200 µs at 4.88 µs per tick
        assert_eq!(trimmed, before.map(|ticks| ticks + 41));

        rt.on_command(cal(CalAction::Clear));
        rt.tick(20.0);
        assert_eq!(rt.hexapod().pwm().off_ticks(Chip::Right, 2), before);
    }

    #[test]
    fn test_calibration_missing_field_is_dropped() {
        let mut rt = runtime();
        let result = rt.on_calibration(CalAction::Set, &cal(CalAction::Set));
        assert!(matches!(
            result,
            Err(CommandError::MissingField { field: "leg", .. })
        ));
        assert_eq!(rt.hexapod().offsets(), [[0; 3]; 6]);
    }

    #[test]
    fn test_shutdown_turns_everything_off() {
        let mut rt = runtime();
        rt.shutdown();
        assert_eq!(rt.hexapod().pwm().off_ticks(Chip::Left, 3), Some(FULL_ON_OFF));
    }
}
