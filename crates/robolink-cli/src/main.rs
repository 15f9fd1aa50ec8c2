//! Binary entrypoint for the robolink terminal remote control.
//!
//! Commands:
//! - `ports` - list serial ports a robot may be reachable on
//! - `connect [DEVICE] [--tcp]` - open the link and drive from the terminal
//! - `play <FILE> [DEVICE] [-n <channels>]` - play back a keyframe file
//! - `pid <MODE> [--kp ..] [--ki ..] [--kd ..] [--max-speed ..]` - show or change PID settings
//! - `config` - print the effective configuration
//!
//! See the library crate docs for module-level details: `robolink_core::`.

mod config;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use robolink_core::control::{joystick, tilt, VoiceDrive};
use robolink_core::link::{
    default_connector, list_ports, ChannelSink, DriveCommand, FallbackConnector, KeyframeSet,
    LinkConnector, LinkSession, SerialConnector, SessionEvent, TcpConnector,
};
use robolink_core::settings::{SettingsStore, FACE_PURSUIT_KEY, LINE_FOLLOWER_KEY};

use config::AppConfig;

#[derive(Parser)]
#[command(name = "robolink")]
#[command(about = "Remote control for a serial-linked robot")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Verbose logging (-v, -vv for more)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// List serial ports, Bluetooth links first
    Ports,
    /// Connect and drive interactively
    Connect {
        /// Serial device (e.g. /dev/rfcomm0) or host:port with --tcp
        device: Option<String>,
        /// Connect over TCP instead of serial
        #[arg(long)]
        tcp: bool,
    },
    /// Play back a keyframe file
    Play {
        /// Keyframe file, one `time,ch1,...` line per frame
        file: PathBuf,
        /// Serial device or host:port
        device: Option<String>,
        /// Connect over TCP instead of serial
        #[arg(long)]
        tcp: bool,
        /// Servo channels per frame
        #[arg(short = 'n', long, default_value_t = 8)]
        channels: usize,
    },
    /// Show or change the PID settings of a driving mode
    Pid {
        #[arg(value_enum)]
        mode: Mode,
        #[arg(long)]
        kp: Option<f32>,
        #[arg(long)]
        ki: Option<f32>,
        #[arg(long)]
        kd: Option<f32>,
        #[arg(long)]
        max_speed: Option<i32>,
    },
    /// Print the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Mode {
    LineFollower,
    FacePursuit,
}

impl Mode {
    fn key(self) -> &'static str {
        match self {
            Mode::LineFollower => LINE_FOLLOWER_KEY,
            Mode::FacePursuit => FACE_PURSUIT_KEY,
        }
    }
}

fn init_logging(level: &str, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        1 => EnvFilter::new("robolink=debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn build_connector(config: &AppConfig, tcp: bool) -> Box<dyn LinkConnector> {
    if tcp || config.tcp {
        Box::new(TcpConnector::default())
    } else if config.no_fallback {
        Box::new(FallbackConnector::primary_only(Box::new(SerialConnector::new(
            config.link.baud_rate,
        ))))
    } else {
        Box::new(default_connector(config.link.baud_rate))
    }
}

fn resolve_device(config: &AppConfig, device: Option<String>) -> Result<String> {
    match device.or_else(|| config.device.clone()) {
        Some(device) => Ok(device),
        None => bail!("No device given and none configured (see `robolink ports`)"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path().context("No configuration directory available")?,
    };
    let config = AppConfig::load(&config_path)?;
    init_logging(&config.log_level, cli.verbose);
    debug!("Using config {}", config_path.display());

    match cli.command {
        Commands::Ports => {
            let ports = list_ports();
            if ports.is_empty() {
                println!("No serial ports found");
            }
            for port in ports {
                let kind = if port.bluetooth { "bluetooth" } else { "serial" };
                match &port.product {
                    Some(product) => println!("{:<20} {:<10} {}", port.name, kind, product),
                    None => println!("{:<20} {}", port.name, kind),
                }
            }
        }
        Commands::Connect { device, tcp } => {
            let device = resolve_device(&config, device)?;
            let session = LinkSession::new(build_connector(&config, tcp), config.link.clone())?;
            run_remote(&session, &device).await?;
        }
        Commands::Play {
            file,
            device,
            tcp,
            channels,
        } => {
            let text = fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let frames = KeyframeSet::parse(&text, channels)
                .with_context(|| format!("Invalid keyframe file {}", file.display()))?;
            let device = resolve_device(&config, device)?;
            let session = LinkSession::new(build_connector(&config, tcp), config.link.clone())?;
            run_playback(&session, &device, &frames).await?;
        }
        Commands::Pid {
            mode,
            kp,
            ki,
            kd,
            max_speed,
        } => {
            let store = SettingsStore::open_default()?;
            let mut settings = store.load_pid(mode.key());
            let changed = kp.is_some() || ki.is_some() || kd.is_some() || max_speed.is_some();
            settings.kp = kp.unwrap_or(settings.kp);
            settings.ki = ki.unwrap_or(settings.ki);
            settings.kd = kd.unwrap_or(settings.kd);
            settings.max_speed = max_speed.unwrap_or(settings.max_speed);
            if changed {
                store.save_pid(mode.key(), &settings)?;
                info!("Saved {} settings", mode.key());
            }
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        Commands::Config => {
            println!("# {}", config_path.display());
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Interactive driving: stdin lines become commands, events are printed
async fn run_remote(session: &LinkSession, device: &str) -> Result<()> {
    let (sink, mut events) = ChannelSink::new();
    session.set_sink(&sink);
    session.connect(device)?;
    println!("Connecting to {} (type `help` for commands)", device);

    let mut voice = VoiceDrive::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(SessionEvent::Connected) => println!("Connected"),
                Some(SessionEvent::Read(frame)) => println!("< {}", frame),
                Some(SessionEvent::WriteEcho(command)) => println!("> {}", command),
                Some(SessionEvent::Cancel(reason)) => {
                    println!("{}", reason);
                    break;
                }
                Some(SessionEvent::Ok) | None => break,
            },
            line = lines.next_line(), if stdin_open => match line? {
                Some(line) => handle_line(session, &mut voice, line.trim()),
                None => {
                    stdin_open = false;
                    session.disconnect();
                }
            },
            _ = tokio::signal::ctrl_c() => session.disconnect(),
        }
    }

    session.clear_sink();
    let stats = session.stats();
    info!(
        "Sent {} commands ({} bytes), received {} frames ({} bytes), {} keepalives",
        stats.tx_frames, stats.tx_bytes, stats.rx_frames, stats.rx_bytes, stats.keepalives
    );
    Ok(())
}

const HELP: &str = "\
  go | left | right | back | stop | fast | slow   voice style driving
  j <x> <y>                                        joystick, axes in -100..100
  t <x> <y>                                        tilt, m/s^2
  r | s,<l>,<r> | k,<t>,<ch>...                    raw robot commands
  quit                                             disconnect";

fn parse_pair<T: std::str::FromStr>(args: &[&str]) -> Option<(T, T)> {
    match args {
        [x, y] => Some((x.parse().ok()?, y.parse().ok()?)),
        _ => None,
    }
}

fn handle_line(session: &LinkSession, voice: &mut VoiceDrive, line: &str) {
    let words: Vec<&str> = line.split_whitespace().collect();
    let command = match words.as_slice() {
        [] => return,
        ["help"] => {
            println!("{}", HELP);
            return;
        }
        ["quit"] | ["exit"] => {
            session.disconnect();
            return;
        }
        ["j", args @ ..] => match parse_pair::<i32>(args) {
            Some((x, y)) => joystick(x, y).to_command(),
            None => {
                eprintln!("usage: j <x> <y>");
                return;
            }
        },
        ["t", args @ ..] => match parse_pair::<f32>(args) {
            Some((x, y)) => tilt(x, y).to_command(),
            None => {
                eprintln!("usage: t <x> <y>");
                return;
            }
        },
        [word @ ("go" | "left" | "right" | "back" | "stop" | "fast" | "slow")] => {
            match voice.handle(word) {
                Some(command) => command,
                None => {
                    println!("Speed {}", voice.speed());
                    return;
                }
            }
        }
        _ => match line.parse::<DriveCommand>() {
            Ok(command) => command,
            Err(e) => {
                eprintln!("{}", e);
                return;
            }
        },
    };

    if let Err(e) = session.try_write(&command.to_string()) {
        warn!("Not sent: {}", e);
    }
}

/// Send every keyframe, waiting for the robot's reply after each one
async fn run_playback(
    session: &LinkSession,
    device: &str,
    frames: &KeyframeSet,
) -> Result<()> {
    let ack_timeout = Duration::from_millis(session.config().watchdog.timeout_ms);
    let (sink, mut events) = ChannelSink::new();
    session.set_sink(&sink);
    session.connect(device)?;

    loop {
        match events.recv().await {
            Some(SessionEvent::Connected) => break,
            Some(SessionEvent::Cancel(reason)) => bail!("{}", reason),
            Some(_) => {}
            None => bail!("Session closed"),
        }
    }

    for (i, command) in frames.commands().iter().enumerate() {
        session
            .try_write(&command.to_string())
            .with_context(|| format!("Keyframe {} not sent", i + 1))?;

        loop {
            match tokio::time::timeout(ack_timeout, events.recv()).await {
                Ok(Some(SessionEvent::Read(reply))) => {
                    debug!("Keyframe {} acknowledged: {}", i + 1, reply);
                    break;
                }
                Ok(Some(SessionEvent::Cancel(reason))) => bail!("{}", reason),
                Ok(Some(_)) => {}
                Ok(None) => bail!("Session closed"),
                Err(_) => bail!("No reply to keyframe {}", i + 1),
            }
        }
    }

    println!("Played {} keyframes", frames.frames.len());
    session.finish();
    session.disconnect();
    Ok(())
}
