//! PDF toolkit command line
//!
//! One subcommand per engine operation. Logs go to stderr so `--json`
//! output on stdout stays machine readable.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pdf_toolkit_core::command::DEFAULT_QUALITY;
use pdf_toolkit_core::{PdfCommand, ProcessResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "pdf-toolkit")]
#[command(version, about = "Merge, split, rotate, compress and password-protect PDFs")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output file
    #[arg(short, long, global = true)]
    output: Option<PathBuf>,

    /// Print metrics and warnings as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// Log level used when RUST_LOG is not set
    #[arg(long, global = true, env = "PDF_TOOLKIT_LOG_LEVEL", default_value = "info")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Concatenate documents in the given order
    Merge {
        #[arg(required = true, num_args = 2..)]
        files: Vec<PathBuf>,
    },
    /// Extract pages, e.g. --pages "1-3, 5"
    Split {
        file: PathBuf,
        #[arg(short, long)]
        pages: String,
    },
    /// Rotate pages clockwise by 90, 180 or 270 degrees
    Rotate {
        file: PathBuf,
        #[arg(short, long, allow_negative_numbers = true)]
        angle: i64,
        /// Pages to rotate; all when omitted
        #[arg(short, long)]
        pages: Option<String>,
    },
    /// Re-encode embedded images as JPEG where that saves space
    Compress {
        file: PathBuf,
        /// JPEG quality, 1-95
        #[arg(short, long, default_value_t = DEFAULT_QUALITY)]
        quality: u8,
    },
    /// Protect with a password (AES-128)
    Encrypt {
        file: PathBuf,
        #[arg(long, env = "PDF_TOOLKIT_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Remove password protection
    Decrypt {
        file: PathBuf,
        #[arg(long, env = "PDF_TOOLKIT_PASSWORD", hide_env_values = true)]
        password: String,
    },
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("Failed to read {}", path.display()))
}

impl Command {
    /// Default output name: `<input stem>-<operation>.pdf` next to the input.
    fn default_output(&self) -> PathBuf {
        let (input, suffix) = match self {
            Command::Merge { files } => (&files[0], "merged"),
            Command::Split { file, .. } => (file, "split"),
            Command::Rotate { file, .. } => (file, "rotated"),
            Command::Compress { file, .. } => (file, "compressed"),
            Command::Encrypt { file, .. } => (file, "encrypted"),
            Command::Decrypt { file, .. } => (file, "decrypted"),
        };
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "output".into());
        input.with_file_name(format!("{}-{}.pdf", stem, suffix))
    }

    fn into_pdf_command(self) -> Result<PdfCommand> {
        Ok(match self {
            Command::Merge { files } => PdfCommand::Merge {
                files: files.iter().map(|f| read(f)).collect::<Result<_>>()?,
            },
            Command::Split { file, pages } => PdfCommand::Split {
                file: read(&file)?,
                ranges: pages,
            },
            Command::Rotate { file, angle, pages } => PdfCommand::Rotate {
                file: read(&file)?,
                angle,
                ranges: pages,
            },
            Command::Compress { file, quality } => PdfCommand::Compress {
                file: read(&file)?,
                quality,
            },
            Command::Encrypt { file, password } => PdfCommand::Encrypt {
                file: read(&file)?,
                password,
            },
            Command::Decrypt { file, password } => PdfCommand::Decrypt {
                file: read(&file)?,
                password,
            },
        })
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    let output_path = cli
        .output
        .clone()
        .unwrap_or_else(|| cli.command.default_output());
    let command = cli.command.into_pdf_command()?;
    let name = command.name();
    tracing::debug!(command = name, output = %output_path.display(), "running");

    let output = command
        .execute()
        .with_context(|| format!("{} failed", name))?;
    fs::write(&output_path, &output.data)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    if cli.json {
        let mut result = ProcessResult::from(output);
        // The document itself went to the output file.
        result.data = None;
        println!("{}", result.to_json()?);
    } else {
        for warning in &output.warnings {
            eprintln!("warning: {}", warning);
        }
        eprintln!(
            "{}: wrote {} ({} pages, {} bytes)",
            name,
            output_path.display(),
            output.metrics.page_count,
            output.metrics.output_size_bytes
        );
    }

    Ok(())
}
