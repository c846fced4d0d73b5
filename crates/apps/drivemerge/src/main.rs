//! drivemerge - mirror a Google Drive location into merged text files
//!
//! Runs one sync pass against a Drive URL (or the whole drive) and prints a
//! summary. Exits non-zero when the pass cannot complete.

use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info, warn};
use mirror::sync::timing::{format_bytes, format_hms};
use mirror::{
    DriveAuth, DriveClient, DriveCredentials, PassReport, ShutdownFlag, SyncSettings, SyncTarget,
    parse_store_url, run_pass,
};
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "drivemerge", about = "Mirror Google Drive content into merged text files")]
struct Args {
    /// Drive folder, shared drive or file URL; omit to sync the whole drive
    url: Option<String>,

    /// Directory that receives one sub-directory per sync target
    #[arg(long)]
    output_root: Option<PathBuf>,

    /// Do not ask before syncing the whole drive
    #[arg(short, long)]
    yes: bool,
}

const ACCEPTED_URLS: &str = "\
  https://drive.google.com/drive/folders/<id>
  https://drive.google.com/drive/u/0/folders/<id>
  https://drive.google.com/drive/my-drive
  https://drive.google.com/drive/<shared-drive-id>
  https://drive.google.com/file/d/<id>/view
  https://docs.google.com/document/d/<id>/edit
  https://drive.google.com/open?id=<id>";

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = config::init() {
        error!("Failed to initialize config directory: {}", e);
    }

    match run(Args::parse()) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            error!("Sync failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Returns false when the user declined or gave an unusable URL
fn run(args: Args) -> Result<bool> {
    let target = match args.url.as_deref() {
        Some(url) => match parse_store_url(url) {
            Some(target) => target,
            None => {
                eprintln!("Unrecognized Drive URL: {}\nAccepted forms:\n{}", url, ACCEPTED_URLS);
                return Ok(false);
            }
        },
        None => {
            if !args.yes && !confirm("No URL given. Sync your entire drive?")? {
                println!("Nothing to do.");
                return Ok(false);
            }
            SyncTarget::WholeStore
        }
    };

    let mut settings = SyncSettings::load().context("Invalid settings.json")?;
    if let Some(root) = args.output_root {
        settings.output_root = root;
    }

    let shutdown = ShutdownFlag::new();
    {
        let flag = shutdown.clone();
        ctrlc::set_handler(move || {
            warn!("Received Ctrl+C, finishing in-flight work...");
            flag.set();
        })
        .context("Failed to install Ctrl+C handler")?;
    }

    let credentials = match DriveCredentials::load() {
        Ok(creds) => creds,
        Err(e) => {
            if let Some(path) = DriveCredentials::default_credentials_path() {
                warn!(
                    "To configure Drive access, either:\n\
                     1. Place your Google OAuth credentials at: {}\n\
                     2. Or set environment variables: DRIVE_CLIENT_ID and DRIVE_CLIENT_SECRET",
                    path.display()
                );
            }
            return Err(e.context("Drive credentials not found"));
        }
    };
    let auth = DriveAuth::new(credentials.client_id, credentials.client_secret)?;
    let client = DriveClient::new(auth);

    info!("Starting sync of {}", target);
    let report = run_pass(&client, &target, &settings, &shutdown)?;
    print_summary(&report);
    Ok(true)
}

fn confirm(question: &str) -> Result<bool> {
    print!("{} [y/N] ", question);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
}

fn print_summary(report: &PassReport) {
    let stats = &report.stats;
    println!();
    if report.interrupted {
        println!("Sync of {} was interrupted; the next run resumes from {}", report.target_name, report.marker);
    } else if stats.files_errored + stats.folder_errors > 0 {
        println!(
            "Sync of {} finished with errors; failed items are retried from {}",
            report.target_name, report.marker
        );
    } else {
        println!("Sync of {} complete", report.target_name);
    }
    println!("  Changes processed: {}", stats.changes_processed);
    println!("  Files updated:     {}", stats.files_updated);
    println!("  Files unchanged:   {}", stats.files_unchanged);
    println!("  Files restored:    {}", stats.files_restored);
    println!("  Files deleted:     {}", stats.files_deleted);
    println!("  Files with errors: {}", stats.files_errored);
    println!("  Folder errors:     {}", stats.folder_errors);
    println!("  Downloaded:        {}", format_bytes(stats.bytes_downloaded));
    println!("  Took:              {}", format_hms(Duration::from_millis(stats.duration_ms)));
    println!("Output in {}:", report.output_dir.display());
    for part in &report.merge.parts {
        println!(
            "  {} ({}, {} words, {} documents)",
            part.path.display(),
            format_bytes(part.bytes as u64),
            part.words,
            part.documents
        );
    }
    println!(
        "  Total: {}, {} words",
        format_bytes(report.merge.total_bytes() as u64),
        report.merge.total_words()
    );
}
