//! Command-line mirroring client.
//!
//! Connects to the agent's already-forwarded video, audio and control
//! ports, runs one session and prints every session event as a JSON line
//! until the streams end.

use std::net::TcpStream;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use mirror_audio::CpalBackend;
use mirror_codec::BasicDecoderFactory;
use mirror_engine::{AppConfig, EngineServices, Session, SessionStreams};
use mirror_ipc::{event_channel, SessionEvent, StopReason};

const DEFAULT_LOG_FILTER: &str = "mirror=debug,mirror_engine=debug,mirror_audio=debug,mirror_transport=debug,mirror_codec=info,mirror_protocol=info";

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(200);
const METRICS_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Parser, Debug, PartialEq)]
#[command(
    name = "mirror",
    version,
    about = "Mirror an Android device over forwarded agent ports"
)]
struct Args {
    /// Path to configuration TOML file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Forwarded video port (0 disables video).
    #[arg(value_parser = clap::value_parser!(u16))]
    video_port: u16,

    /// Forwarded audio port (0 disables audio).
    #[arg(value_parser = clap::value_parser!(u16))]
    audio_port: u16,

    /// Forwarded control port (0 disables input).
    #[arg(value_parser = clap::value_parser!(u16))]
    control_port: u16,
}

/// Initialize logging. `RUST_LOG` wins over the config file's filter.
fn init_logging(config_filter: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config_filter.unwrap_or(DEFAULT_LOG_FILTER)))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn connect(host: &str, port: u16, stream: &str) -> Result<Option<TcpStream>> {
    if port == 0 {
        info!(stream, "Stream disabled");
        return Ok(None);
    }
    let socket = TcpStream::connect((host, port))
        .with_context(|| format!("failed to connect {stream} stream to {host}:{port}"))?;
    info!(stream, host, port, "Connected");
    Ok(Some(socket))
}

fn print_event(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(line) => println!("{line}"),
        Err(e) => warn!(error = %e, "Failed to serialize event"),
    }
}

/// Print events until every reader has ended. Returns the last stream's
/// stop reason.
fn run(session: &Session, events: &Receiver<SessionEvent>) -> StopReason {
    let has_readers = session.config().video || session.config().audio;
    let mut last_reason = StopReason::UserRequested;
    let mut last_metrics = Instant::now();

    loop {
        match events.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => {
                print_event(&event);
                if let SessionEvent::StreamEnded { reason, .. } = event {
                    last_reason = reason;
                }
                continue;
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        if last_metrics.elapsed() >= METRICS_INTERVAL {
            session.publish_metrics();
            last_metrics = Instant::now();
        }
        if has_readers && session.active_streams() == 0 {
            break;
        }
    }

    for event in events.try_iter() {
        print_event(&event);
    }
    last_reason
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    init_logging(config.log_filter.as_deref());
    info!("Mirror client starting");

    // The agent accepts connections in this order.
    let streams = SessionStreams {
        video: connect(&config.host, args.video_port, "video")?,
        audio: connect(&config.host, args.audio_port, "audio")?,
        control: connect(&config.host, args.control_port, "control")?,
    };

    let (event_tx, event_rx) = event_channel();
    let services = EngineServices::new(
        Arc::new(CpalBackend::new()),
        Arc::new(BasicDecoderFactory),
        &config.session,
    );
    services.start(&config.session, &event_tx)?;

    let session = Session::start(streams, &config.session, &services, event_tx)?;
    let reason = run(&session, &event_rx);

    session.close(reason.clone());
    print_event(&SessionEvent::Metrics(session.metrics()));
    for event in event_rx.try_iter() {
        print_event(&event);
    }
    services.shutdown();

    info!(reason = %reason.message(), "Mirror client exiting");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("mirror").chain(list.iter().copied()))
    }

    #[test]
    fn test_parse_ports() {
        assert_eq!(
            args(&["27183", "0", "27185"]).unwrap(),
            Args {
                config: None,
                video_port: 27183,
                audio_port: 0,
                control_port: 27185,
            }
        );
    }

    #[test]
    fn test_parse_config_flag() {
        let parsed = args(&["--config", "mirror.toml", "1", "2", "3"]).unwrap();
        assert_eq!(parsed.config, Some(PathBuf::from("mirror.toml")));

        let short = args(&["1", "2", "3", "-c", "other.toml"]).unwrap();
        assert_eq!(short.config, Some(PathBuf::from("other.toml")));
        assert_eq!(short.control_port, 3);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(args(&["1", "2"]).is_err());
        assert!(args(&["1", "2", "x"]).is_err());
        assert!(args(&["1", "2", "70000"]).is_err());
        assert!(args(&["--config"]).is_err());
        assert!(args(&["1", "2", "3", "4"]).is_err());
    }

    #[test]
    fn test_help_is_generated() {
        let err = args(&["--help"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayHelp);
        let help = err.to_string();
        assert!(help.contains("CONTROL_PORT"), "{help}");
        assert!(help.contains("--config"), "{help}");
    }

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_LOG_FILTER).is_ok());
    }
}
