use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::io::BufRead;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};
use trackme_rs::format;
use trackme_rs::upload::{self, TransportBuilder};
use trackme_rs::{
    Collaborators, Command, FileBlobStore, LogObserver, SimulatedSource, SystemClock,
    TrackerConfig, TrackingCoordinator, UploadConfig,
};

#[derive(Parser, Debug)]
#[command(name = "trackme")]
#[command(about = "GPS position recorder with periodic save and upload", long_about = None)]
struct Args {
    /// JSON settings file (missing file = defaults)
    #[arg(long, default_value = "trackme.json")]
    config: PathBuf,

    /// Directory holding the persisted backlog and recorder state
    #[arg(long, default_value = "trackme_data")]
    data_dir: PathBuf,

    /// Mirror uploads into this directory instead of the configured endpoint
    #[arg(long)]
    upload_dir: Option<PathBuf>,

    /// Simulated fix interval in milliseconds (default: the configured min time)
    #[arg(long, value_name = "MILLIS")]
    simulate: Option<u64>,

    /// Start latitude of the simulated track
    #[arg(long, default_value = "37.7749", allow_hyphen_values = true)]
    lat: f64,

    /// Start longitude of the simulated track
    #[arg(long, default_value = "-122.4194", allow_hyphen_values = true)]
    lon: f64,

    /// Begin recording immediately
    #[arg(long, default_value_t = false)]
    start: bool,

    /// Run time in seconds (0 = until Ctrl-C)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Ignore commands typed on stdin
    #[arg(long, default_value_t = false)]
    no_stdin: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = TrackerConfig::load(&args.config)
        .with_context(|| format!("Failed to load settings from {}", args.config.display()))?;
    log::info!(
        "trackme starting: data dir {}, min time {}s, max locations {}",
        args.data_dir.display(),
        config.min_time_secs,
        config.max_locations
    );

    let storage = FileBlobStore::new(&args.data_dir)
        .with_context(|| format!("Failed to open data dir {}", args.data_dir.display()))?;
    if let Some(dir) = &args.upload_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create upload dir {}", dir.display()))?;
    }
    let mirror_dir = args.upload_dir.clone();
    let build_transport: TransportBuilder = Arc::new(move |upload: &UploadConfig| {
        upload::transport_for(upload, mirror_dir.as_deref())
    });
    let transport = build_transport(&config.upload).context("Failed to set up uploads")?;

    let mut source = SimulatedSource::new(args.lat, args.lon);
    if let Some(millis) = args.simulate {
        source = source.with_interval(Duration::from_millis(millis.max(1)));
    }

    let mut coordinator = TrackingCoordinator::new(
        config,
        Collaborators {
            storage: Arc::new(storage),
            transport,
            source: Arc::new(source),
            clock: Arc::new(SystemClock),
        },
    );
    coordinator.add_observer(Arc::new(LogObserver));
    coordinator.set_transport_builder(build_transport);

    coordinator
        .restore()
        .await
        .context("Failed to restore previous session")?;
    if args.start {
        coordinator.start().context("Failed to start recording")?;
    }

    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>(16);
    spawn_shutdown_trigger(cmd_tx.clone(), args.duration);
    #[cfg(unix)]
    spawn_reload_on_hangup(cmd_tx.clone(), args.config.clone());
    if !args.no_stdin {
        spawn_stdin_commands(cmd_tx.clone(), args.config.clone());
    }
    drop(cmd_tx);

    coordinator.run(cmd_rx).await.context("Command loop failed")?;

    let stats = coordinator.statistics()?;
    log::info!(
        "Stopped. {}",
        format::status_line(coordinator.len()?, &stats)
    );
    Ok(())
}

/// Send `Shutdown` on Ctrl-C or once `duration_secs` has passed
fn spawn_shutdown_trigger(cmd_tx: mpsc::Sender<Command>, duration_secs: u64) {
    tokio::spawn(async move {
        if duration_secs > 0 {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => log::info!("Ctrl-C received"),
                _ = sleep(Duration::from_secs(duration_secs)) => log::info!("Duration reached"),
            }
        } else if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl-C: {}", e);
            return;
        }
        let _ = cmd_tx.send(Command::Shutdown).await;
    });
}

/// Reload the settings file on SIGHUP
#[cfg(unix)]
fn spawn_reload_on_hangup(cmd_tx: mpsc::Sender<Command>, path: PathBuf) {
    use tokio::signal::unix::{signal, SignalKind};

    tokio::spawn(async move {
        let mut hangup = match signal(SignalKind::hangup()) {
            Ok(s) => s,
            Err(e) => {
                log::warn!("Cannot listen for SIGHUP: {}", e);
                return;
            }
        };
        while hangup.recv().await.is_some() {
            if let Some(config) = reload_config(&path) {
                if cmd_tx.send(Command::RereadConfig(config)).await.is_err() {
                    break;
                }
            }
        }
    });
}

const STDIN_HELP: &str = "commands: start | stop | add | clear | status | reload | quit";

/// One line typed on stdin
#[derive(Debug, PartialEq)]
enum Input {
    Command(Command),
    Reload,
    Help,
    Unknown(String),
    Empty,
}

fn parse_input(line: &str) -> Input {
    match line.trim().to_ascii_lowercase().as_str() {
        "" => Input::Empty,
        "start" => Input::Command(Command::Start),
        "stop" => Input::Command(Command::Stop),
        "add" | "addone" => Input::Command(Command::AddOne),
        "clear" => Input::Command(Command::Clear),
        "status" | "broadcast" => Input::Command(Command::Broadcast),
        "quit" | "exit" => Input::Command(Command::Shutdown),
        "reload" => Input::Reload,
        "help" | "?" => Input::Help,
        other => Input::Unknown(other.to_string()),
    }
}

/// Read commands from stdin until EOF.
///
/// Runs on a detached thread: a blocking stdin read cannot be cancelled and
/// must not hold up runtime shutdown.
fn spawn_stdin_commands(cmd_tx: mpsc::Sender<Command>, config_path: PathBuf) {
    std::thread::spawn(move || {
        log::info!("{}", STDIN_HELP);

        for line in std::io::stdin().lock().lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    log::warn!("Stopped reading stdin: {}", e);
                    break;
                }
            };

            let command = match parse_input(&line) {
                Input::Command(command) => command,
                Input::Reload => match reload_config(&config_path) {
                    Some(config) => Command::RereadConfig(config),
                    None => continue,
                },
                Input::Help => {
                    log::info!("{}", STDIN_HELP);
                    continue;
                }
                Input::Unknown(word) => {
                    log::warn!("Unknown command '{}', {}", word, STDIN_HELP);
                    continue;
                }
                Input::Empty => continue,
            };

            if cmd_tx.blocking_send(command).is_err() {
                break;
            }
        }
    });
}

fn reload_config(path: &Path) -> Option<TrackerConfig> {
    match TrackerConfig::load(path) {
        Ok(config) => Some(config),
        Err(e) => {
            log::error!("Keeping current settings: {}", e);
            None
        }
    }
}
