// Keyboard teleop: WASD walk/turn, Q/E shift, F fast, C climb, 1-4 body moves, R/V speed, Esc quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use hexapod_zenoh_runtime::config::TOPIC_CMD;
use hexapod_zenoh_runtime::messages::HexapodCommand;
use hexapod_zenoh_runtime::movement::MovementMode;

const SPEED_LABELS: [&str; 4] = ["SLOWEST", "SLOW", "NORMAL", "FAST"];
const INPUT_TIMEOUT_MS: u64 = 150; // Fall back to standby after this much time with no input

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: W/S=forward/back, A/D=turn, Q/E=shift, F=fast, C=climb");
    info!("          1/2/3=rotate x/y/z, 4=twist, R/V=speed, Esc=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_level: u8 = 2;
    let mut mode = MovementMode::Standby;
    let mut last_movement_input = Instant::now();

    publish(publisher, HexapodCommand {
        speed_level: Some(speed_level),
        ..Default::default()
    })
    .await?;
    print_speed(speed_level);

    loop {
        // Poll for key with 20ms timeout (50Hz effective rate)
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                let pressed = kind == KeyEventKind::Press || kind == KeyEventKind::Repeat;

                let requested = match code {
                    KeyCode::Char('w') if pressed => Some(MovementMode::Forward),
                    KeyCode::Char('s') if pressed => Some(MovementMode::Backward),
                    KeyCode::Char('a') if pressed => Some(MovementMode::TurnLeft),
                    KeyCode::Char('d') if pressed => Some(MovementMode::TurnRight),
                    KeyCode::Char('q') if pressed => Some(MovementMode::ShiftLeft),
                    KeyCode::Char('e') if pressed => Some(MovementMode::ShiftRight),
                    KeyCode::Char('f') if pressed => Some(MovementMode::ForwardFast),
                    KeyCode::Char('c') if pressed => Some(MovementMode::Climb),
                    KeyCode::Char('1') if pressed => Some(MovementMode::RotateX),
                    KeyCode::Char('2') if pressed => Some(MovementMode::RotateY),
                    KeyCode::Char('3') if pressed => Some(MovementMode::RotateZ),
                    KeyCode::Char('4') if pressed => Some(MovementMode::Twist),

                    // Speed control
                    KeyCode::Char('r') if pressed => {
                        speed_level = (speed_level + 1).min(3);
                        print_speed(speed_level);
                        publish(publisher, HexapodCommand {
                            speed_level: Some(speed_level),
                            ..Default::default()
                        })
                        .await?;
                        None
                    }
                    KeyCode::Char('v') if pressed => {
                        speed_level = speed_level.saturating_sub(1);
                        print_speed(speed_level);
                        publish(publisher, HexapodCommand {
                            speed_level: Some(speed_level),
                            ..Default::default()
                        })
                        .await?;
                        None
                    }

                    // Quit
                    KeyCode::Esc if pressed => break,

                    _ => None,
                };

                if let Some(requested) = requested {
                    mode = requested;
                    last_movement_input = Instant::now();
                }
            }
        }

        // Stand still if no movement input for INPUT_TIMEOUT_MS
        if last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            mode = MovementMode::Standby;
        }

        // Always publish at ~50Hz so the runtime watchdog stays fed
        publish(publisher, HexapodCommand::movement(mode.into())).await?;
    }

    publish(publisher, HexapodCommand::movement(MovementMode::Standby.into())).await?;
    Ok(())
}

async fn publish(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: HexapodCommand,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    publisher.put(serde_json::to_string(&cmd)?).await?;
    Ok(())
}

fn print_speed(level: u8) {
    info!("Speed: {}", SPEED_LABELS[level as usize]);
}
