mod api;
mod config;
mod credentials;
mod error;
mod error_log;
mod ingest;
mod probe;
mod sheet;
mod storage;

use api::ApiClient;
use clap::Parser;
use colored::*;
use config::{load_config, resolve_in, same_file};
use credentials::OperatorPrompt;
use error_log::ErrorLog;
use ingest::{BatchSummary, Pipeline};
use probe::LoftyProbe;
use sheet::SongSheet;
use std::path::{Path, PathBuf};
use std::time::Instant;
use storage::R2Store;

// ---------------------------------------------------------------------------
// CLI
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "song-ingest",
    about = "Upload the songs listed in a spreadsheet and register them in the catalogue"
)]
struct Args {
    /// Spreadsheet to read (bare names are looked up in <base>/excel)
    #[arg(default_value = "data.xlsx")]
    input: String,

    /// Status log to write (bare names go to <base>/excel; .csv or .xlsx)
    #[arg(long, default_value = "data_log.xlsx")]
    output: String,

    /// Directory the file_path column is relative to (default: <base>/files)
    #[arg(long)]
    files_dir: Option<PathBuf>,

    /// Username for the sign-in prompt
    #[arg(long, env = "INGEST_USERNAME")]
    username: Option<String>,
}

fn fail(message: &str) -> ! {
    eprintln!("\n{} {}", "✗".red().bold(), message.red());
    std::process::exit(1);
}

/// End-of-run report. The count line is always last.
fn summary_lines(
    summary: &BatchSummary,
    elapsed_secs: f64,
    output: &Path,
    saved: &std::result::Result<(), error::IngestError>,
) -> Vec<String> {
    let mut lines = vec![
        String::new(),
        "═".repeat(60).bright_black().to_string(),
        String::new(),
        format!("{} {:.1}s", "Completed in:".white().bold(), elapsed_secs),
    ];
    if summary.failed > 0 {
        lines.push(format!(
            "  {} {} song(s) failed to upload. Check {} for details.",
            "Failed:".red(),
            summary.failed,
            output.display().to_string().bright_cyan()
        ));
    }
    if !summary.orphaned.is_empty() {
        lines.push(String::new());
        lines.push(format!(
            "{} {} uploaded object(s) have no song record (they were not deleted):",
            "Note:".yellow().bold(),
            summary.orphaned.len()
        ));
        for key in &summary.orphaned {
            lines.push(format!("  {} {}", "→".bright_black(), key.bright_black()));
        }
    }
    lines.push(String::new());
    match saved {
        Ok(()) => lines.push(format!("{} Log saved to {}", "✓".green(), output.display())),
        Err(e) => lines.push(format!("{} {}", "✗".red().bold(), format!("Could not save the log: {}", e).red())),
    }
    lines.push(format!(
        "Batch processing completed: {}/{} songs uploaded successfully.",
        summary.succeeded.to_string().green(),
        summary.total
    ));
    lines
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() {
    let args = Args::parse();

    println!("Song Batch Ingest");
    println!("=================");
    println!();

    let config = load_config().unwrap_or_else(|e| fail(&e.to_string()));

    let input_path = resolve_in(&config.excel_dir(), &args.input);
    let output_path = resolve_in(&config.excel_dir(), &args.output);
    if same_file(&input_path, &output_path) {
        fail("The output log would overwrite the input spreadsheet; pass a different --output");
    }
    let files_dir = args.files_dir.clone().unwrap_or_else(|| config.files_dir());

    // Initialize error log
    let error_log = ErrorLog::open(&config.error_log_path()).unwrap_or_else(|e| {
        eprintln!("{} Cannot open errors.log ({}), continuing without it", "⚠".yellow(), e);
        ErrorLog::disabled()
    });

    let mut sheet = SongSheet::read(&input_path).unwrap_or_else(|e| fail(&e.to_string()));
    println!("Input     : {}", input_path.display());
    println!("Files     : {}", files_dir.display());
    println!("Songs     : {}", sheet.rows.len());
    let missing = sheet.missing_columns();
    if !missing.is_empty() {
        println!(
            "{} Missing column(s): {} (treated as empty)",
            "⚠".yellow(),
            missing.join(", ").yellow()
        );
    }
    println!();

    let api = ApiClient::new(&config).unwrap_or_else(|e| fail(&e.to_string()));
    let store = R2Store::connect(&config.storage, &config.media_url).await;
    let credentials = OperatorPrompt {
        username: args.username.clone().or_else(|| config.username.clone()),
        password: config.password.clone(),
    };

    let pipeline = Pipeline {
        catalog: &api,
        store: &store,
        probe: &LoftyProbe,
        files_dir,
        error_log: &error_log,
    };

    let start = Instant::now();
    let summary = match ingest::run(&credentials, &api, &pipeline, &mut sheet.rows).await {
        Ok(summary) => summary,
        Err(e) => {
            error_log.record(&e.to_string());
            fail(&format!("{}. Cannot proceed with file processing.", e));
        }
    };

    let elapsed = start.elapsed().as_secs_f64();
    let saved = sheet.write(&output_path);
    if let Err(e) = &saved {
        error_log.record(&e.to_string());
    }

    for line in summary_lines(&summary, elapsed, &output_path, &saved) {
        println!("{}", line);
    }
    if saved.is_err() {
        std::process::exit(1);
    }
}
