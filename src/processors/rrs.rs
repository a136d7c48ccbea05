//! Wrapper around the external RRS (Radiosonde Replacement System) BUFR decoder.
//!
//! Decoding itself is done by the vendor's command-line decoder; this module
//! only builds its argument list and turns a failed run into an error.

use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;

use crate::config::DecoderConfig;

/// Errors that can occur while running the decoder.
#[derive(Debug, Error)]
pub enum DecoderError {
    #[error("Failed to start decoder {executable:?}: {source}")]
    Spawn {
        executable: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Decoder exited with {status}: {stderr}")]
    Failed { status: String, stderr: String },

    #[error("BUFR input not found: {0}")]
    MissingInput(PathBuf),
}

/// Result type for decoder operations.
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Outcome of a successful decoder run.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodeReport {
    /// Output directory as passed to the decoder.
    pub outdir: String,
    /// Whatever the decoder printed to stdout.
    pub stdout: String,
}

/// Output directory in the form the decoder expects: no trailing separators
/// followed by exactly one `/`. An empty directory means `./`, and the root
/// stays `/` instead of doubling to `//`.
pub fn normalize_outdir(outdir: &str) -> String {
    let trimmed = outdir.trim_end_matches('/');
    if trimmed.is_empty() {
        if outdir.starts_with('/') {
            "/".to_string()
        } else {
            "./".to_string()
        }
    } else {
        format!("{}/", trimmed)
    }
}

/// Run the RRS decoder on a BUFR file.
///
/// # Arguments
///
/// * `bufr_in` - Radiosonde BUFR file
/// * `outputs` - Output selection string understood by the decoder
/// * `outdir` - Directory the decoder writes into
/// * `config` - Decoder executable (defaults if None)
///
/// # Errors
///
/// Returns an error if the input does not exist, the decoder cannot be
/// started, or it exits unsuccessfully (the error carries its stderr).
pub fn decode_rrs<P: AsRef<Path>>(
    bufr_in: P,
    outputs: &str,
    outdir: &str,
    config: Option<&DecoderConfig>,
) -> Result<DecodeReport> {
    let bufr_in = bufr_in.as_ref();
    let default_config = DecoderConfig::default();
    let config = config.unwrap_or(&default_config);

    if !bufr_in.exists() {
        return Err(DecoderError::MissingInput(bufr_in.to_path_buf()));
    }

    let outdir = normalize_outdir(outdir);
    log::info!(
        "Decoding {} with {} (outputs '{}', into {})",
        bufr_in.display(),
        config.executable.display(),
        outputs,
        outdir
    );

    let output = Command::new(&config.executable)
        .arg(bufr_in)
        .arg(outputs)
        .arg(&outdir)
        .output()
        .map_err(|source| DecoderError::Spawn {
            executable: config.executable.clone(),
            source,
        })?;

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if !output.status.success() {
        return Err(DecoderError::Failed {
            status: output.status.to_string(),
            stderr,
        });
    }
    if !stderr.is_empty() {
        log::warn!("Decoder: {}", stderr);
    }

    Ok(DecodeReport {
        outdir,
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
    })
}
