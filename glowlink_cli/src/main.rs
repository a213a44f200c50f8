use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::oneshot;

use glowlink_core::device::json_client::JsonDeviceConnector;
use glowlink_core::dispatch::calling_context::CallingContext;
use glowlink_core::downloader::http_download_service::HttpDownloadService;
use glowlink_core::probe::connectivity_probe::ConnectivityProbe;
use glowlink_core::probe::palette::TestPalette;
use glowlink_core::types::types::{ColorRgb, ProbeResult, ProbeSpec, UpdateOutcome, UpdateRequest};
use glowlink_core::update::artifact::{UpdaterConfig, PACKAGE_MIME_TYPE};
use glowlink_core::update::installer::CommandInstaller;
use glowlink_core::update::orchestrator::UpdateOrchestrator;

mod terminal_observer;
use terminal_observer::TerminalProgressObserver;

#[derive(Parser)]
#[command(name = "glowlink", about = "Ambient lighting companion: updates and connection tests")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Download a release package and hand it to the installer
    Update {
        /// Release artifact URL
        #[arg(short, long)]
        url: String,

        /// Version label of the release, used to name the artifact
        #[arg(short = 'v', long = "version")]
        version_label: String,

        /// Directory the artifact is saved to
        #[arg(short, long, env = "GLOWLINK_DOWNLOAD_DIR")]
        download_dir: Option<PathBuf>,

        /// Program that opens the downloaded package
        #[arg(short, long, env = "GLOWLINK_INSTALLER", default_value = "xdg-open")]
        installer: String,

        /// Extra argument passed to the installer before the artifact path (repeatable)
        #[arg(long = "installer-arg")]
        installer_args: Vec<String>,

        /// MIME type announced to the installer
        #[arg(long, default_value = PACKAGE_MIME_TYPE)]
        mime_type: String,

        #[arg(long, default_value = "glowlink")]
        app_name: String,

        #[arg(long, default_value = "apk")]
        extension: String,
    },

    /// Send a test colour to a lighting server
    Probe {
        #[arg(long)]
        host: String,

        #[arg(short, long, default_value = "19444")]
        port: u16,

        #[arg(long, default_value = "50")]
        priority: i32,

        /// Colour to show (name or #rrggbb); cycles red, green, blue, white when omitted
        #[arg(short, long)]
        color: Option<ColorRgb>,

        /// Number of probes to send one after another
        #[arg(short, long, default_value = "1")]
        repeat: usize,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();

    match args.command {
        Command::Update {
            url,
            version_label,
            download_dir,
            installer,
            installer_args,
            mime_type,
            app_name,
            extension,
        } => {
            let download_dir = download_dir
                .or_else(|| dirs::download_dir().map(|d| d.join("glowlink")))
                .unwrap_or_else(|| PathBuf::from("."));
            let config = UpdaterConfig::new(app_name)
                .with_extension(extension)
                .with_mime_type(mime_type);
            let installer = installer_args
                .into_iter()
                .fold(CommandInstaller::new(installer), CommandInstaller::with_arg);
            run_update(UpdateRequest::new(url, version_label), download_dir, installer, config).await
        }
        Command::Probe {
            host,
            port,
            priority,
            color,
            repeat,
        } => run_probe(host, port, priority, color, repeat).await,
    }
}

async fn run_update(
    request: UpdateRequest,
    download_dir: PathBuf,
    installer: CommandInstaller,
    config: UpdaterConfig,
) -> ExitCode {
    let service = match HttpDownloadService::new(&download_dir) {
        Ok(service) => service.with_observer(Arc::new(TerminalProgressObserver::new())),
        Err(e) => {
            eprintln!("Cannot use download directory {}: {}", download_dir.display(), e);
            return ExitCode::FAILURE;
        }
    };
    log::debug!("[cli] installer program: {}", installer.program());
    let target_dir = service.download_dir().to_path_buf();
    let orchestrator = UpdateOrchestrator::new(Arc::new(service), Arc::new(installer), config);

    println!(
        "Downloading {} to {}",
        orchestrator.config().artifact_name(&request.version_label),
        target_dir.display()
    );

    let (tx, mut rx) = oneshot::channel();
    orchestrator
        .start(request, move |outcome| {
            let _ = tx.send(outcome);
        })
        .await;

    let outcome = tokio::select! {
        outcome = &mut rx => outcome,
        _ = tokio::signal::ctrl_c() => {
            log::info!("[cli] interrupted, cancelling update");
            orchestrator.cancel().await;
            rx.await
        }
    };

    match outcome {
        Ok(outcome) => {
            println!("{}", outcome.user_message());
            match outcome {
                UpdateOutcome::Installing => ExitCode::SUCCESS,
                _ => ExitCode::FAILURE,
            }
        }
        Err(_) => {
            eprintln!("Update ended without a result");
            ExitCode::FAILURE
        }
    }
}

async fn run_probe(
    host: String,
    port: u16,
    priority: i32,
    color: Option<ColorRgb>,
    repeat: usize,
) -> ExitCode {
    let probe = ConnectivityProbe::new(Arc::new(JsonDeviceConnector::default()));
    let mut context = CallingContext::new();
    let mut palette = TestPalette::new();
    let mut all_ok = true;

    for _ in 0..repeat.max(1) {
        let spec = ProbeSpec {
            host: host.clone(),
            port,
            priority,
            color: color.unwrap_or_else(|| palette.next_color()),
        };
        println!("Sending {} to {}:{}", spec.color, spec.host, spec.port);

        let (tx, rx) = std::sync::mpsc::channel();
        probe.run(spec, &context.handle(), move |result| {
            println!("{}", result.user_message());
            let _ = tx.send(result);
        });

        // The result callback runs here, on the main task.
        context.run_next().await;
        all_ok &= matches!(rx.try_recv(), Ok(ProbeResult::Ok));
    }

    if all_ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
