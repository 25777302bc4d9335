use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::telemetry::tags;
use crate::types::StreamStats;
use crate::{LzpipeError, Result};

use super::driver::ChunkPipeline;

/// File suffix appended by [`ChunkPipeline::compress_files`].
pub const DEFAULT_SUFFIX: &str = ".lz4";

/// Result of transcoding one file of a batch.
#[derive(Debug)]
pub struct FileOutcome {
    pub input: PathBuf,
    /// Destination path, when one could be derived from the input name.
    pub output: Option<PathBuf>,
    pub result: Result<StreamStats>,
}

impl FileOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// How a batch names and creates its outputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOptions {
    pub suffix: String,
    /// Replaces existing outputs instead of failing that file.
    pub overwrite: bool,
    /// Decodes and verifies without creating outputs (decompression only).
    pub test_only: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            overwrite: false,
            test_only: false,
        }
    }
}

impl ChunkPipeline {
    /// Compresses each file to `<input><suffix>`.
    ///
    /// Every file is a separate stream with its own register and failure
    /// slot, so one failure never stops the rest of the batch.
    pub fn compress_files<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        options: &BatchOptions,
    ) -> Vec<FileOutcome> {
        inputs
            .iter()
            .map(|input| {
                let input = input.as_ref().to_path_buf();
                let mut name = input.clone().into_os_string();
                name.push(&options.suffix);
                let output = PathBuf::from(name);

                let result = self.compress_file(&input, &output, options.overwrite);
                log_outcome(&input, &result);
                FileOutcome {
                    input,
                    output: Some(output),
                    result,
                }
            })
            .collect()
    }

    /// Decompresses each `<name><suffix>` file to `<name>`.
    ///
    /// Inputs without the suffix are reported as failed and left untouched.
    pub fn decompress_files<P: AsRef<Path>>(
        &self,
        inputs: &[P],
        options: &BatchOptions,
    ) -> Vec<FileOutcome> {
        inputs
            .iter()
            .map(|input| {
                let input = input.as_ref().to_path_buf();
                let output = strip_suffix(&input, &options.suffix);

                let result = match (&output, options.test_only) {
                    (_, true) => self.test_file(&input),
                    (Some(output), false) => {
                        self.decompress_file(&input, output, options.overwrite)
                    }
                    (None, false) => Err(LzpipeError::InvalidConfig(format!(
                        "{} does not end in {}; skipped",
                        input.display(),
                        options.suffix
                    ))),
                };
                log_outcome(&input, &result);
                FileOutcome {
                    input,
                    output: if options.test_only { None } else { output },
                    result,
                }
            })
            .collect()
    }

    /// Compresses one file into `output`, removing a partial output on failure.
    pub fn compress_file(&self, input: &Path, output: &Path, overwrite: bool) -> Result<StreamStats> {
        let reader = BufReader::new(open_input(input)?);
        let writer = BufWriter::new(create_output(output, overwrite)?);
        finish_output(output, self.compress_stream(reader, writer))
    }

    /// Decompresses one file into `output`, removing a partial output on failure.
    pub fn decompress_file(
        &self,
        input: &Path,
        output: &Path,
        overwrite: bool,
    ) -> Result<StreamStats> {
        let reader = BufReader::new(open_input(input)?);
        let writer = BufWriter::new(create_output(output, overwrite)?);
        finish_output(output, self.decompress_stream(reader, writer))
    }

    /// Decodes and verifies one file without writing.
    pub fn test_file(&self, input: &Path) -> Result<StreamStats> {
        let reader = BufReader::new(open_input(input)?);
        self.test_stream(reader)
            .map_err(|err| err.with_context(format!("test {}", input.display())))
    }
}

fn strip_suffix(input: &Path, suffix: &str) -> Option<PathBuf> {
    let name = input.to_str()?;
    let stem = name.strip_suffix(suffix)?;
    (!stem.is_empty()).then(|| PathBuf::from(stem))
}

fn open_input(path: &Path) -> Result<File> {
    File::open(path)
        .map_err(|err| LzpipeError::from(err).with_context(format!("open {}", path.display())))
}

fn create_output(path: &Path, overwrite: bool) -> Result<File> {
    let mut options = OpenOptions::new();
    options.write(true);
    if overwrite {
        options.create(true).truncate(true);
    } else {
        options.create_new(true);
    }
    options
        .open(path)
        .map_err(|err| LzpipeError::from(err).with_context(format!("create {}", path.display())))
}

fn finish_output(
    output: &Path,
    result: Result<(BufWriter<File>, StreamStats)>,
) -> Result<StreamStats> {
    let flushed = result.and_then(|(mut writer, stats)| {
        writer.flush()?;
        Ok(stats)
    });
    if flushed.is_err() && fs::remove_file(output).is_err() {
        tracing::warn!(
            target: tags::TARGET_PIPELINE,
            path = %output.display(),
            "could not remove partial output"
        );
    }
    flushed.map_err(|err| err.with_context(format!("write {}", output.display())))
}

fn log_outcome(input: &Path, result: &Result<StreamStats>) {
    match result {
        Ok(stats) => tracing::debug!(
            target: tags::TARGET_PIPELINE,
            path = %input.display(),
            bytes_in = stats.bytes_in,
            bytes_out = stats.bytes_out,
            "file done"
        ),
        Err(error) => tracing::warn!(
            target: tags::TARGET_PIPELINE,
            path = %input.display(),
            %error,
            "file failed"
        ),
    }
}
