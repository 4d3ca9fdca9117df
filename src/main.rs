//! sheetpress - render an export request (JSON sheets and placements) to PDF.

use anyhow::{Context, Result};
use clap::Parser;
use sheetpress::{ExportRequest, SheetPress};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "sheetpress")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the JSON export request
    request: PathBuf,

    /// Output file (defaults to the name derived from label and timestamp)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Directory containing the catalog font files
    #[arg(long, env = "SHEETPRESS_FONT_DIR")]
    font_dir: Option<PathBuf>,

    /// Write a JSON-lines trace of render decisions
    #[arg(long)]
    debug_log: Option<PathBuf>,

    /// Abort the export after this many milliseconds
    #[arg(long)]
    budget_ms: Option<u64>,

    /// Write uncompressed content streams
    #[arg(long)]
    no_compress: bool,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let body = std::fs::read(&args.request)
        .with_context(|| format!("reading {}", args.request.display()))?;
    let request = ExportRequest::from_json(&body).context("parsing export request")?;

    let mut builder = SheetPress::builder().compress_streams(!args.no_compress);
    if let Some(dir) = args.font_dir {
        builder = builder.font_dir(dir);
    }
    if let Some(path) = args.debug_log {
        builder = builder.debug_log(path);
    }
    if let Some(ms) = args.budget_ms {
        builder = builder.request_budget(Duration::from_millis(ms));
    }
    let engine = builder.build()?;

    let output = match args.output {
        Some(path) => path,
        None => {
            let name = request.file_name();
            println!("{name}");
            PathBuf::from(name)
        }
    };
    let summary = engine
        .render_to_file(&request, &output)
        .with_context(|| format!("rendering {}", output.display()))?;
    log::info!(
        "wrote {} page(s), {} bytes to {}",
        summary.pages,
        summary.bytes_written,
        output.display()
    );
    Ok(())
}
