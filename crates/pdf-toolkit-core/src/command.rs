use std::time::Instant;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{PdfToolkitError, Result};
use crate::range::parse_ranges;
use crate::recompress::recompress_all;
use crate::report::{Processed, Warning};
use crate::rotate::{rotate, Rotation};
use crate::{merge, security, split};

pub const DEFAULT_QUALITY: u8 = 50;

fn default_quality() -> u8 {
    DEFAULT_QUALITY
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum PdfCommand {
    Merge {
        files: Vec<Vec<u8>>,
    },
    Split {
        file: Vec<u8>,
        ranges: String,
    },
    Rotate {
        file: Vec<u8>,
        angle: i64,
        #[serde(default)]
        ranges: Option<String>,
    },
    Compress {
        file: Vec<u8>,
        #[serde(default = "default_quality")]
        quality: u8,
    },
    Encrypt {
        file: Vec<u8>,
        password: String,
    },
    Decrypt {
        file: Vec<u8>,
        password: String,
    },
}

/// Outcome of a successfully executed command.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub data: Vec<u8>,
    pub metrics: ProcessMetrics,
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessResult {
    pub success: bool,
    /// Base64-encoded PDF data
    pub data: Option<String>,
    pub error: Option<String>,
    pub metrics: Option<ProcessMetrics>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessMetrics {
    pub input_size_bytes: usize,
    pub output_size_bytes: usize,
    pub page_count: u32,
    pub processing_time_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_found: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub images_replaced: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bytes_saved: Option<usize>,
}

impl PdfCommand {
    pub fn name(&self) -> &'static str {
        match self {
            PdfCommand::Merge { .. } => "merge",
            PdfCommand::Split { .. } => "split",
            PdfCommand::Rotate { .. } => "rotate",
            PdfCommand::Compress { .. } => "compress",
            PdfCommand::Encrypt { .. } => "encrypt",
            PdfCommand::Decrypt { .. } => "decrypt",
        }
    }

    pub fn from_json(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    fn input_size(&self) -> usize {
        match self {
            PdfCommand::Merge { files } => files.iter().map(Vec::len).sum(),
            PdfCommand::Split { file, .. }
            | PdfCommand::Rotate { file, .. }
            | PdfCommand::Compress { file, .. }
            | PdfCommand::Encrypt { file, .. }
            | PdfCommand::Decrypt { file, .. } => file.len(),
        }
    }

    /// Run the command, loading its inputs and serializing the result once.
    pub fn execute(self) -> Result<CommandOutput> {
        let started = Instant::now();
        let name = self.name();
        let mut metrics = ProcessMetrics {
            input_size_bytes: self.input_size(),
            ..Default::default()
        };

        let Processed { value: doc, warnings } = match self {
            PdfCommand::Merge { files } => {
                let loaded = merge::load_all(&files)?;
                Processed::new(merge::merge(&loaded)?, Vec::new())
            }
            PdfCommand::Split { file, ranges } => {
                let selection = parse_ranges(&ranges)?;
                split::split(&Document::load(&file)?, &selection)?
            }
            PdfCommand::Rotate {
                file,
                angle,
                ranges,
            } => {
                let rotation = Rotation::try_from(angle)?;
                let selection = ranges.as_deref().map(parse_ranges).transpose()?;
                let mut doc = Document::load(&file)?;
                let warnings = rotate(&mut doc, rotation, selection.as_ref());
                Processed::new(doc, warnings)
            }
            PdfCommand::Compress { file, quality } => {
                let mut doc = Document::load(&file)?;
                let report = recompress_all(&mut doc, quality)?;
                metrics.images_found = Some(report.images_found);
                metrics.images_replaced = Some(report.images_replaced);
                metrics.bytes_saved = Some(report.bytes_saved);
                Processed::new(doc, report.warnings)
            }
            PdfCommand::Encrypt { file, password } => {
                let doc = Document::load(&file)?;
                let page_count = doc.page_count();
                let data = security::encrypt(doc, &password)?;
                metrics.page_count = page_count as u32;
                return Ok(finish(name, data, metrics, Vec::new(), started));
            }
            PdfCommand::Decrypt { file, password } => security::decrypt(&file, &password)?,
        };

        metrics.page_count = doc.page_count() as u32;
        let data = doc.to_bytes()?;
        Ok(finish(name, data, metrics, warnings, started))
    }
}

fn finish(
    name: &str,
    data: Vec<u8>,
    mut metrics: ProcessMetrics,
    warnings: Vec<Warning>,
    started: Instant,
) -> CommandOutput {
    metrics.output_size_bytes = data.len();
    metrics.processing_time_ms = started.elapsed().as_millis() as u64;
    tracing::info!(
        command = name,
        input_bytes = metrics.input_size_bytes,
        output_bytes = metrics.output_size_bytes,
        pages = metrics.page_count,
        warnings = warnings.len(),
        elapsed_ms = metrics.processing_time_ms,
        "command finished"
    );
    CommandOutput {
        data,
        metrics,
        warnings,
    }
}

impl From<CommandOutput> for ProcessResult {
    fn from(output: CommandOutput) -> Self {
        ProcessResult {
            success: true,
            data: Some(BASE64.encode(&output.data)),
            error: None,
            metrics: Some(output.metrics),
            warnings: output.warnings,
        }
    }
}

impl From<PdfToolkitError> for ProcessResult {
    fn from(error: PdfToolkitError) -> Self {
        ProcessResult {
            success: false,
            data: None,
            error: Some(error.to_string()),
            metrics: None,
            warnings: Vec::new(),
        }
    }
}

impl ProcessResult {
    /// Execute `command`, folding failures into the result.
    pub fn run(command: PdfCommand) -> Self {
        match command.execute() {
            Ok(output) => output.into(),
            Err(e) => {
                tracing::warn!(error = %e, "command failed");
                e.into()
            }
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Decoded output bytes, if the command succeeded.
    pub fn decode_data(&self) -> Option<Vec<u8>> {
        self.data
            .as_deref()
            .and_then(|encoded| BASE64.decode(encoded).ok())
    }
}
