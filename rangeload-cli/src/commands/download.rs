//! Download command - fetch one URL with concurrent range requests.

use std::path::{Path, PathBuf};

use clap::Args;
use console::style;
use indicatif::{HumanBytes, HumanDuration, ProgressBar, ProgressStyle};
use rangeload::download::AlwaysDownload;
use rangeload::{DownloadCoordinator, ProgressSubscription, SessionOutcome, SessionStatus};

use super::common::{load_config, resolve_downloader_config, resolve_output_dir};
use crate::error::CliError;

const BAR_TEMPLATE: &str = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] \
                            {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";

/// Arguments for the download command.
#[derive(Debug, Args)]
pub struct DownloadArgs {
    /// URL of the file to download (http or https)
    pub url: String,

    /// Directory to save into [default: config [output] directory, else .]
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Number of concurrent range workers [default: 4]
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Seconds a chunk may receive no data before the download fails [default: 30]
    #[arg(long, value_name = "SECS")]
    pub stall_timeout: Option<u64>,

    /// Download even if a file of the same size already exists
    #[arg(long)]
    pub force: bool,
}

/// Run the download command.
pub async fn run(args: DownloadArgs, config_file: Option<&Path>) -> Result<(), CliError> {
    let file_config = load_config(config_file)?;
    let config = resolve_downloader_config(args.workers, args.stall_timeout, &file_config)?;
    let output_dir = resolve_output_dir(args.output, &file_config);

    let mut coordinator = DownloadCoordinator::with_reqwest(config)?;
    if args.force {
        coordinator = coordinator.with_existing_check(AlwaysDownload);
    }
    let workers = coordinator.config().workers;

    println!("Downloading {}", style(&args.url).bold());
    println!("  Into:    {}", output_dir.display());
    println!("  Workers: {}", workers);
    println!();

    let handle = coordinator.start(args.url.clone(), output_dir, workers);

    let canceller = handle.canceller();
    ctrlc::set_handler(move || {
        if !canceller.is_cancelled() {
            eprintln!();
            eprintln!("Received interrupt, stopping workers...");
        }
        canceller.cancel();
    })
    .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;

    let renderer = tokio::spawn(render_progress(handle.subscribe(), progress_bar()));
    let result = handle.wait().await;
    // The renderer ends on the terminal event.
    let _ = renderer.await;

    match result? {
        SessionOutcome::Completed(report) => {
            let secs = report.elapsed.as_secs_f64();
            let rate = if secs > 0.0 {
                (report.total_bytes as f64 / secs) as u64
            } else {
                report.total_bytes
            };
            println!(
                "{} {} ({} in {}, {}/s, {} chunks)",
                style("Saved").green().bold(),
                report.path.display(),
                HumanBytes(report.total_bytes),
                HumanDuration(report.elapsed),
                HumanBytes(rate),
                report.chunks
            );
            Ok(())
        }
        SessionOutcome::SkippedAlreadyCurrent { path, size } => {
            println!(
                "{} {} already exists with the same size ({})",
                style("Skipped").yellow().bold(),
                path.display(),
                HumanBytes(size)
            );
            Ok(())
        }
        SessionOutcome::Cancelled { bytes_done } => Err(CliError::Cancelled { bytes_done }),
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let style = ProgressStyle::with_template(BAR_TEMPLATE)
        .map(|s| s.progress_chars("#>-"))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(style);
    bar
}

/// Draw progress events until the session ends.
async fn render_progress(mut subscription: ProgressSubscription, bar: ProgressBar) {
    while let Some(event) = subscription.next().await {
        if let Some(total) = event.total_bytes {
            bar.set_length(total);
        }
        bar.set_position(event.bytes_done);

        match event.status {
            SessionStatus::Planning => bar.set_message("probing"),
            SessionStatus::Downloading => bar.set_message(format!(
                "{}/{} chunks",
                event.chunks_completed, event.total_chunks
            )),
            SessionStatus::Completed => bar.finish_with_message("done"),
            SessionStatus::Idle => {}
            SessionStatus::Failed
            | SessionStatus::Cancelled
            | SessionStatus::SkippedAlreadyCurrent => {
                bar.abandon_with_message(event.status.to_string())
            }
        }
    }
}
