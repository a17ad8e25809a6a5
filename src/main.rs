// src/main.rs
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;

use ferromill::axis::{AXES, Axis};
use ferromill::controller::{Command, Controller};
use ferromill::machine::Machine;
use ferromill::{Config, load_config};

#[derive(Parser, Debug)]
#[command(name = "ferromill", about = "CNC motion controller")]
struct Args {
    /// Path to the machine configuration
    #[arg(short, long, default_value = "machine.toml")]
    config: String,

    /// Log level: trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync + 'static>> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_max_level(args.log_level.parse::<tracing::Level>()?)
        .init();

    tracing::info!("Starting ferromill motion controller");

    let config = match load_config(&args.config) {
        Ok(config) => config,
        Err(error) => {
            tracing::warn!(%error, path = %args.config, "no config loaded, using defaults");
            Config::default()
        }
    };

    let mut controller = Controller::new(Machine::new(&config));
    controller.start();
    let commands = controller.command_sender();

    // Simple line console on stdin; the real G-code parser is an external
    // collaborator feeding the same command channel.
    let stdin_commands = commands.clone();
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            match parse_command(&line) {
                Some(command) => {
                    if stdin_commands.send(command).await.is_err() {
                        break;
                    }
                }
                None => {
                    if !line.trim().is_empty() {
                        tracing::warn!(%line, "unrecognized command");
                    }
                }
            }
        }
    });

    signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    Ok(())
}

/// Console syntax: `rapid x10 y20`, `feed x5 f1000`, `jog x0.5`, `home xz`,
/// `mreset [motor]`, plus bare words for the request flags.
fn parse_command(line: &str) -> Option<Command> {
    let mut parts = line.split_whitespace();
    let word = parts.next()?.to_ascii_lowercase();

    match word.as_str() {
        "rapid" | "feed" => {
            let mut values = [None; AXES];
            let mut feed_rate = None;
            for part in parts {
                let mut chars = part.chars();
                let letter = chars.next()?;
                let value: f64 = chars.as_str().parse().ok()?;
                if letter.eq_ignore_ascii_case(&'f') {
                    feed_rate = Some(value);
                } else {
                    values[Axis::from_char(letter)?.index()] = Some(value);
                }
            }
            if let Some(rate) = feed_rate {
                // A leading feed-rate update rides along with the move
                return Some(Command::FeedWithRate(values, rate, word == "rapid"));
            }
            Some(if word == "rapid" {
                Command::Rapid(values)
            } else {
                Command::Feed(values)
            })
        }
        "jog" => {
            let mut velocities = [0.0; AXES];
            for part in parts {
                let mut chars = part.chars();
                let letter = chars.next()?;
                let value: f64 = chars.as_str().parse().ok()?;
                velocities[Axis::from_char(letter)?.index()] = value;
            }
            Some(Command::Jog(velocities))
        }
        "home" => {
            let mut axes = [false; AXES];
            match parts.next() {
                Some(letters) => {
                    for letter in letters.chars() {
                        axes[Axis::from_char(letter)?.index()] = true;
                    }
                }
                None => axes = [true, true, true, false, false, false],
            }
            Some(Command::Home(axes))
        }
        "dwell" => Some(Command::Dwell(parts.next()?.parse().ok()?)),
        "mreset" => Some(Command::MotorReset(parts.next().and_then(|p| p.parse().ok()))),
        "hold" => Some(Command::Hold),
        "start" => Some(Command::Start),
        "flush" => Some(Command::Flush),
        "resume" => Some(Command::Resume),
        "step" => Some(Command::Step),
        "estop" => Some(Command::EStop),
        _ => None,
    }
}
