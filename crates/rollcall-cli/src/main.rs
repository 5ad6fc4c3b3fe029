use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use rollcall_client::{AttendanceBackend, HttpBackend};
use rollcall_engine::media::SETTLE_ATTEMPTS;
use rollcall_engine::{
    list_mobile_sessions, Config, EngineError, EnrollmentOptions, EnrollmentRunner, LiveOptions, LiveRunner,
    MobileAttendance, SessionContext, SharedCamera,
};
use rollcall_hw::{
    FacingMode, FixedLocation, GeoFix, LocationProvider, MediaSource, NoLocation, SyntheticSource, V4lCamera,
    V4lSource,
};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall", about = "Face-recognition attendance client")]
struct Cli {
    /// Use a generated test pattern instead of a camera
    #[arg(long, global = true)]
    synthetic: bool,

    /// Camera device (overrides ROLLCALL_CAMERA_DEVICE)
    #[arg(long, global = true)]
    device: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enroll your face: capture frames until the backend has enough
    Enroll {
        /// Frames to request from the backend
        #[arg(short, long, default_value_t = rollcall_engine::enroll::DEFAULT_NUM_IMAGES)]
        images: u32,
    },
    /// Run live verification for a camera-mode session
    Live {
        /// Session ID
        #[arg(short, long)]
        session: String,
        /// End the session when stopped
        #[arg(long)]
        end: bool,
        /// Recognise only; never mark attendance
        #[arg(long)]
        no_mark: bool,
    },
    /// Mark yourself present in a mobile (geofenced) session
    Mobile {
        /// Session ID; lists mobile sessions when omitted
        #[arg(short, long)]
        session: Option<String>,
        #[arg(long, requires = "lng", allow_hyphen_values = true)]
        lat: Option<f64>,
        #[arg(long, requires = "lat", allow_hyphen_values = true)]
        lng: Option<f64>,
        #[arg(long, value_enum, default_value_t = Facing::User)]
        facing: Facing,
    },
    /// List active sessions
    Sessions {
        /// Only sessions that accept mobile marking
        #[arg(long)]
        mobile: bool,
    },
    /// Show one session
    Session {
        /// Session ID
        id: String,
    },
    /// End a session
    End {
        /// Session ID
        id: String,
    },
    /// List capture devices
    Devices,
    /// Run camera diagnostics
    Test {
        /// Write the captured still to this path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Facing {
    User,
    Environment,
}

impl From<Facing> for FacingMode {
    fn from(f: Facing) -> Self {
        match f {
            Facing::User => FacingMode::User,
            Facing::Environment => FacingMode::Environment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = Config::load().context("loading configuration")?;
    if let Some(device) = cli.device.clone() {
        config.camera_device = device;
    }
    tracing::debug!(api_url = %config.api_url, device = %config.camera_device, "configuration loaded");

    let source: Box<dyn MediaSource> = if cli.synthetic {
        Box::new(SyntheticSource::default())
    } else {
        Box::new(V4lSource)
    };

    match run(cli.command, &config, source.as_ref()).await {
        Err(e) if e.downcast_ref::<EngineError>().is_some_and(EngineError::is_unauthorized) => {
            bail!("credential rejected; set ROLLCALL_TOKEN to a fresh token and try again")
        }
        other => other,
    }
}

async fn run(command: Commands, config: &Config, source: &dyn MediaSource) -> Result<()> {
    match command {
        Commands::Enroll { images } => {
            let backend = backend(config)?;
            let camera = SharedCamera::acquire(source, &config.camera_constraints(), config.encoder())?;
            let runner = EnrollmentRunner::new(
                backend,
                camera,
                EnrollmentOptions {
                    num_images: images,
                    interval: config.enroll_interval(),
                },
            );
            let printer = print_snapshots(runner.subscribe());
            let report = runner.run(cancel_on_ctrl_c()).await;
            // Runner dropped its sender; the printer drains and exits.
            let _ = printer.await;
            let report = report?;
            eprintln!(
                "enrollment {:?}: {}/{} frames",
                report.phase, report.captured, report.target
            );
        }
        Commands::Live { session, end, no_mark } => {
            let backend = backend(config)?;
            let camera = SharedCamera::acquire(source, &config.camera_constraints(), config.encoder())?;
            let runner = LiveRunner::new(
                backend,
                camera,
                SessionContext::new(session).with_auto_mark(!no_mark),
                LiveOptions {
                    interval: config.verify_interval(),
                    settings: config.live_settings(),
                    end_on_stop: end,
                },
            );
            let printer = print_snapshots(runner.subscribe());
            let report = runner.run(cancel_on_ctrl_c()).await;
            let _ = printer.await;
            let report = report?;
            eprintln!(
                "{} present, {} marked this run{}",
                report.present_count,
                report.marked,
                if report.ended { "; session ended" } else { "" }
            );
        }
        Commands::Mobile {
            session,
            lat,
            lng,
            facing,
        } => {
            let backend = backend(config)?;
            let Some(session) = session else {
                for s in list_mobile_sessions(backend.as_ref()).await? {
                    print_json(&s)?;
                }
                return Ok(());
            };
            let location: Arc<dyn LocationProvider> = match (lat, lng) {
                (Some(lat), Some(lng)) => Arc::new(FixedLocation(GeoFix::new(lat, lng)?)),
                _ => Arc::new(NoLocation),
            };
            let constraints = config.camera_constraints().with_facing(facing.into());
            let camera = SharedCamera::acquire(source, &constraints, config.encoder())?;
            let mut mobile = MobileAttendance::new(backend, camera, location, session);
            print_json(&mobile.mark().await?)?;
        }
        Commands::Sessions { mobile } => {
            let backend = backend(config)?;
            let sessions = if mobile {
                list_mobile_sessions(backend.as_ref()).await?
            } else {
                backend.list_active_sessions().await.map_err(EngineError::from)?
            };
            for s in sessions {
                print_json(&s)?;
            }
        }
        Commands::Session { id } => {
            let session = backend(config)?.get_session(&id).await.map_err(EngineError::from)?;
            print_json(&session)?;
        }
        Commands::End { id } => {
            backend(config)?.end_session(&id).await.map_err(EngineError::from)?;
            eprintln!("session {id} ended");
        }
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for d in devices {
                println!("{}  {} ({}, {})", d.path, d.name, d.driver, d.bus);
            }
        }
        Commands::Test { output } => {
            println!("Running camera diagnostics on {}...", config.camera_device);
            let camera = SharedCamera::acquire(source, &config.camera_constraints(), config.encoder())?;
            let sample = camera.capture_settled(SETTLE_ATTEMPTS).await?;
            camera.release();
            let Some(sample) = sample else {
                bail!("camera opened but produced no usable frame");
            };
            println!(
                "captured {}x{} still, {} bytes JPEG",
                sample.source_width,
                sample.source_height,
                sample.payload.len()
            );
            if let Some(path) = output {
                std::fs::write(&path, &sample.payload)
                    .with_context(|| format!("writing {}", path.display()))?;
                println!("saved to {}", path.display());
            }
        }
    }
    Ok(())
}

fn backend(config: &Config) -> Result<Arc<dyn AttendanceBackend>> {
    let http = HttpBackend::new(config.api_url.clone(), config.token.clone(), config.request_timeout())
        .map_err(EngineError::from)?;
    Ok(Arc::new(http))
}

/// Cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping");
            trigger.cancel();
        }
    });
    token
}

/// Print each published snapshot as one JSON line on stdout.
fn print_snapshots<T>(mut rx: watch::Receiver<T>) -> tokio::task::JoinHandle<()>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let snapshot = rx.borrow_and_update().clone();
            if let Err(e) = print_json(&snapshot) {
                tracing::warn!(error = %e, "could not print snapshot");
            }
        }
    })
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}
