//! `pdfconvd`: the conversion service binary.
//!
//! Maps flags and environment variables onto `ServerConfig`, checks each
//! poppler tool once, and serves until SIGINT/SIGTERM.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_pdfconv::pipeline::staging::prepare_scratch_dir;
use edgequake_pdfconv::{serve, ConversionMode, Converter, ServerConfig};
use std::io;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const AFTER_HELP: &str = r#"EXAMPLES:
  # Listen on the default port 5000
  pdfconvd

  # Only text extraction, poppler installed under /opt/poppler/bin
  pdfconvd --modes text --tool-dir /opt/poppler/bin

  # Convert a document
  curl --data-binary @report.pdf -H 'Content-Type: application/pdf' \
       http://localhost:5000/convert/text
  curl -F file=@report.pdf 'http://localhost:5000/convert/image?first_page=2&dpi=200' > page2.png
"#;

/// HTTP service converting PDFs with poppler-utils.
#[derive(Parser, Debug)]
#[command(
    name = "pdfconvd",
    version,
    about = "HTTP service converting PDFs to text, images and metadata with poppler-utils",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Address to bind.
    #[arg(long, env = "PDFCONV_BIND", default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 5000)]
    port: u16,

    /// Tokio worker threads (default: available parallelism).
    #[arg(long, env = "PDFCONV_WORKERS")]
    workers: Option<usize>,

    /// Directory for per-request temp files (default: $TMPDIR/pdfconv).
    #[arg(long, env = "PDFCONV_SCRATCH_DIR")]
    scratch_dir: Option<PathBuf>,

    /// Maximum upload size in MiB.
    #[arg(long, env = "PDFCONV_MAX_UPLOAD_MB", default_value_t = 25,
          value_parser = clap::value_parser!(u64).range(1..=1024))]
    max_upload_mb: u64,

    /// Per-invocation tool timeout in seconds.
    #[arg(long, env = "PDFCONV_TOOL_TIMEOUT", default_value_t = 60,
          value_parser = clap::value_parser!(u64).range(1..))]
    tool_timeout: u64,

    /// Directory containing pdftoppm, pdftotext and pdfinfo (default: PATH lookup).
    #[arg(long, env = "PDFCONV_TOOL_DIR")]
    tool_dir: Option<PathBuf>,

    /// Default rendering DPI (72–400).
    #[arg(long, env = "PDFCONV_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Maximum pages rendered by one `pages` request.
    #[arg(long, env = "PDFCONV_MAX_PAGES", default_value_t = 50)]
    max_pages: u32,

    /// Comma-separated modes to enable: text, image, pages, info (default: all).
    #[arg(long, env = "PDFCONV_MODES", value_delimiter = ',')]
    modes: Vec<String>,

    /// Do not attach CORS headers.
    #[arg(long, env = "PDFCONV_NO_CORS")]
    no_cors: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "PDFCONV_VERBOSE")]
    verbose: bool,

    /// Only log errors.
    #[arg(short, long, env = "PDFCONV_QUIET", conflicts_with = "verbose")]
    quiet: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.quiet {
        "error"
    } else if cli.verbose {
        "debug"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let config = Arc::new(build_config(&cli)?);
    prepare_scratch_dir(&config.scratch_dir).context("Scratch directory is not usable")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("Failed to start the async runtime")?;

    runtime.block_on(run(config))
}

async fn run(config: Arc<ServerConfig>) -> Result<()> {
    for check in Converter::new(Arc::clone(&config)).check_tools().await {
        let modes = check
            .modes
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        match check.status {
            Ok(()) => info!("{} ready for {modes} ({})", check.tool, check.path.display()),
            Err(e) => warn!("Modes {modes} will fail until fixed: {e}"),
        }
    }

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    serve(listener, config, shutdown_signal())
        .await
        .context("Server error")?;
    info!("Shut down cleanly");
    Ok(())
}

/// Map CLI args to `ServerConfig`.
fn build_config(cli: &Cli) -> Result<ServerConfig> {
    let modes = cli
        .modes
        .iter()
        .filter(|m| !m.trim().is_empty())
        .map(|m| m.parse::<ConversionMode>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --modes value")?;

    let max_upload_bytes = usize::try_from(cli.max_upload_mb * 1024 * 1024)
        .context("--max-upload-mb does not fit in memory on this platform")?;

    let mut builder = ServerConfig::builder()
        .bind_addr(cli.bind)
        .port(cli.port)
        .max_upload_bytes(max_upload_bytes)
        .tool_timeout_secs(cli.tool_timeout)
        .default_dpi(cli.dpi)
        .max_pages(cli.max_pages)
        .cors(!cli.no_cors);

    if let Some(n) = cli.workers {
        builder = builder.workers(n);
    }
    if let Some(ref dir) = cli.scratch_dir {
        builder = builder.scratch_dir(dir);
    }
    if let Some(ref dir) = cli.tool_dir {
        builder = builder.tool_dir(dir);
    }
    if !modes.is_empty() {
        builder = builder.enabled_modes(modes);
    }

    builder.build().context("Invalid configuration")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received, draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let cli = Cli::parse_from(["pdfconvd"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(config.max_upload_bytes, 25 * 1024 * 1024);
        assert_eq!(config.enabled_modes.len(), 4);
        assert!(config.cors);
    }

    #[test]
    fn modes_flag_restricts_modes() {
        let cli = Cli::parse_from(["pdfconvd", "--modes", "text,info", "--no-cors"]);
        let config = build_config(&cli).unwrap();
        assert_eq!(
            config.enabled_modes,
            vec![ConversionMode::Text, ConversionMode::Info]
        );
        assert!(!config.cors);
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let cli = Cli::parse_from(["pdfconvd", "--modes", "text,ocr"]);
        assert!(build_config(&cli).is_err());
    }

    #[test]
    fn dpi_out_of_range_is_rejected_by_parser() {
        assert!(Cli::try_parse_from(["pdfconvd", "--dpi", "1000"]).is_err());
    }
}
