//! fmradio-service: control service for hardware FM tuners.
//!
//! Reads commands from stdin (`help` lists them) and drives the tuner
//! through the selected backend.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use fmradio_protocol::{BackendEvent, BandRegion, TunerError};
use fmradio_service::backend::{
    default_stations, determine_arch, host_abis, EmulatedBackend, QualcommBackend, TunerBackend,
};
use fmradio_service::channel::{ChannelConfig, CommandChannel};
use fmradio_service::command::{ServiceCommand, USAGE};
use fmradio_service::config::{BackendKind, ConfigFile, DEFAULT_CONFIG_FILE};
use fmradio_service::database::{Database, KeyValueStore, SharedDatabase, KEY_AUTOPLAY};
use fmradio_service::logging;
use fmradio_service::sink::{BroadcastSink, EventSink, FanoutSink, LogSink, TunerEvent};
use fmradio_service::status::{format_mhz, StatusLine};
use fmradio_service::tuner::{Collaborators, TunerController};

/// fmradio-service - Control service for hardware FM tuners
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the database file
    #[arg(short, long, default_value = "fmradio-service.db")]
    database: PathBuf,

    /// Tuner backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendKind>,

    /// Backend helper program (qualcomm backend)
    #[arg(long)]
    backend_program: Option<PathBuf>,

    /// FM band region (europe, americas, japan, oirt, wide)
    #[arg(long)]
    band: Option<BandRegion>,

    /// Directory where log files are stored
    #[arg(long, default_value = "logs")]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value = "7")]
    log_retention_days: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

type BackendParts = (Box<dyn TunerBackend>, mpsc::Receiver<BackendEvent>);

fn start_backend(
    kind: BackendKind,
    args: &Args,
    file_config: &ConfigFile,
    band: BandRegion,
) -> Result<BackendParts, Box<dyn std::error::Error>> {
    let section = &file_config.backend;
    match kind {
        BackendKind::Emulated => {
            let latency = Duration::from_millis(section.latency_ms.unwrap_or(50));
            let (backend, events) = EmulatedBackend::start(band, default_stations(), latency);
            Ok((Box::new(backend), events))
        }
        BackendKind::Qualcomm => {
            let program = match args
                .backend_program
                .clone()
                .or_else(|| section.program.as_ref().map(PathBuf::from))
            {
                Some(program) => program,
                None => {
                    let arch = determine_arch(&host_abis())?;
                    let dir = match &section.dir {
                        Some(dir) => PathBuf::from(dir),
                        None => std::env::current_exe()?
                            .parent()
                            .map(Path::to_path_buf)
                            .unwrap_or_else(|| PathBuf::from(".")),
                    };
                    info!("Detected architecture: {}", arch.tag());
                    arch.backend_program(&dir)
                }
            };

            let mut channel_config = ChannelConfig {
                program,
                args: section.args.clone().unwrap_or_default(),
                ..ChannelConfig::default()
            };
            if let Some(ms) = section.write_timeout_ms {
                channel_config.write_timeout = Duration::from_millis(ms);
            }

            info!("Starting backend: {:?}", channel_config.program);
            let channel = CommandChannel::spawn(&channel_config)?;
            let (backend, events) = QualcommBackend::start(channel)?;
            Ok((Box::new(backend), events))
        }
    }
}

async fn execute(ctl: &TunerController, command: ServiceCommand) -> Result<String, TunerError> {
    let message = match command {
        ServiceCommand::Init => {
            ctl.init().await?.await?;
            "initialized".to_string()
        }
        ServiceCommand::Enable => {
            ctl.enable().await?.await?;
            "enabled".to_string()
        }
        ServiceCommand::Disable => {
            ctl.disable().await?.await?;
            "disabled".to_string()
        }
        ServiceCommand::SetFrequency(khz) => {
            let khz = ctl.set_frequency(khz).await?.await?;
            format!("tuned to {} MHz", format_mhz(khz).trim())
        }
        ServiceCommand::Jump(direction) => {
            let khz = ctl.jump(direction).await?.await?;
            format!("tuned to {} MHz", format_mhz(khz).trim())
        }
        ServiceCommand::Seek(direction) => {
            let result = ctl.hardware_seek(direction).await?.await?;
            if result.found {
                format!("found {} MHz", format_mhz(result.frequency).trim())
            } else {
                "no station found".to_string()
            }
        }
        ServiceCommand::Search => {
            let stations = ctl.search().await?.await?;
            let list: Vec<String> = stations
                .iter()
                .map(|khz| format_mhz(*khz).trim().to_string())
                .collect();
            format!("found {} station(s): {}", stations.len(), list.join(" "))
        }
        ServiceCommand::Stereo(enabled) => {
            let enabled = ctl.set_stereo(enabled).await?.await?;
            let mode = if enabled { "stereo" } else { "mono" };
            mode.to_string()
        }
        ServiceCommand::Mute(state) => ctl.set_mute(state).await?.await?.to_string(),
        ServiceCommand::Status => {
            let rssi = ctl.get_rssi().await?.await?;
            format!("{} | rssi {}", StatusLine::from(&ctl.configuration()), rssi)
        }
        ServiceCommand::Kill => {
            ctl.kill().await?.await?;
            "killed".to_string()
        }
        ServiceCommand::Help => USAGE.to_string(),
    };
    Ok(message)
}

/// Save search results as the station list.
fn spawn_station_saver(mut events: broadcast::Receiver<TunerEvent>, db: SharedDatabase) {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(TunerEvent::SearchCompleted(stations)) => match db.replace_stations(&stations) {
                    Ok(count) => info!("[Stations] Saved {} station(s)", count),
                    Err(e) => error!("[Stations] Failed to save search results: {}", e),
                },
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("[Stations] Missed {} event(s)", skipped)
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Explicit path > auto-detect > defaults
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
        default_path.exists().then_some(default_path)
    });
    let file_config = match &config_path {
        Some(path) => match ConfigFile::load(path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e.into());
            }
        },
        None => ConfigFile::default(),
    };

    // Command line takes precedence over the config file
    let log_dir = if args.log_dir.to_string_lossy() != "logs" {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or("logs"))
    };
    let log_retention_days = if args.log_retention_days != 7 {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(7)
    };
    let log_level = if args.verbose {
        None
    } else {
        file_config.logging.level.as_deref()
    };
    logging::init_logging(&log_dir, log_retention_days, args.verbose, log_level)?;

    let tuner_config = file_config.tuner_config(args.band)?;
    let backend_kind = args.backend.or(file_config.backend.kind).unwrap_or_default();
    let db_path = if args.database.to_string_lossy() != "fmradio-service.db" {
        args.database.clone()
    } else {
        file_config
            .database
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| args.database.clone())
    };

    info!("fmradio-service starting...");
    info!("  Backend: {:?}", backend_kind);
    info!("  Band: {}", tuner_config.band);
    info!("  Database: {:?}", db_path);

    let db = match Database::open(&db_path) {
        Ok(db) => SharedDatabase::new(db),
        Err(e) => {
            error!("Failed to open database: {}", e);
            return Err(e.into());
        }
    };

    let (backend, events) = start_backend(backend_kind, &args, &file_config, tuner_config.band)?;

    let broadcast = BroadcastSink::new(64);
    spawn_station_saver(broadcast.subscribe(), db.clone());
    let sink: Arc<dyn EventSink> = Arc::new(FanoutSink(vec![
        Box::new(LogSink),
        Box::new(broadcast),
    ]));

    let collaborators = Collaborators {
        settings: Arc::new(db.clone()),
        stations: Arc::new(db.clone()),
        sink,
    };
    let (controller, task) = TunerController::spawn(backend, events, collaborators, tuner_config);

    controller.init().await?.await?;
    if db.get_bool(KEY_AUTOPLAY, false) {
        info!("Autoplay enabled, powering on");
        let enable = controller.enable().await?;
        tokio::spawn(async move {
            if let Err(e) = enable.await {
                error!("Autoplay failed: {}", e);
            }
        });
    }

    let mut configuration = controller.subscribe_configuration();
    tokio::spawn(async move {
        while configuration.changed().await.is_ok() {
            let line = StatusLine::from(&*configuration.borrow_and_update());
            println!("{}", line);
        }
    });

    let mut state = controller.subscribe_state();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match line.parse::<ServiceCommand>() {
                    Ok(ServiceCommand::Kill) => break,
                    Ok(command) => {
                        let ctl = controller.clone();
                        tokio::spawn(async move {
                            match execute(&ctl, command).await {
                                Ok(message) => println!("{}", message),
                                Err(e) => println!("{}: {}", command, e),
                            }
                        });
                    }
                    Err(e) => println!("{}", e),
                },
                Ok(None) => {
                    info!("stdin closed, waiting for Ctrl-C");
                    stdin_open = false;
                }
                Err(e) => {
                    warn!("Failed to read stdin: {}", e);
                    stdin_open = false;
                }
            },
            _ = state.wait_for(|s| s.is_dead()) => {
                warn!("Tuner stopped");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }
        }
    }

    println!("{}", execute(&controller, ServiceCommand::Kill).await?);
    drop(controller);
    if let Err(e) = task.await {
        error!("Controller task failed: {}", e);
    }
    info!("fmradio-service stopped");

    Ok(())
}
