use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use lzpipe_core::{
    BatchOptions, BlockMode, BlockSizeId, ChunkPipeline, FileOutcome,
    FnProgressSink, PipelineConfig, StreamFormat, StreamProgress, StreamStats, load_dictionary,
};
use tracing_subscriber::EnvFilter;

const STDIO_MARK: &str = "-";

#[derive(Parser)]
#[command(
    name = "lzpipe",
    version,
    about = "Parallel LZ4 stream compressor",
    long_about = "Compress, decompress, and verify LZ4 frame and legacy streams using an \
                  order-preserving worker pipeline."
)]
struct Cli {
    /// Increase log verbosity (repeat for more detail).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress progress output and warnings.
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compress files (or stdin) into LZ4 streams.
    Compress {
        /// Inputs to compress; `-` reads stdin.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output path for a single input (defaults to <input>.lz4, `-` for stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Compression level; 0 stores blocks uncompressed.
        #[arg(short, long, default_value_t = 1)]
        level: i32,

        /// Write the legacy format (8 MiB blocks, no checksums).
        #[arg(long)]
        legacy: bool,

        /// Let each block reference the previous block's tail.
        #[arg(long)]
        linked: bool,

        /// Maximum block size: 64K, 256K, 1M, or 4M.
        #[arg(long, default_value = "4M", value_parser = parse_block_size)]
        block_size: BlockSizeId,

        /// Append a checksum after every block.
        #[arg(long)]
        block_checksum: bool,

        /// Omit the whole-content checksum from the frame trailer.
        #[arg(long)]
        no_stream_checksum: bool,

        /// Record the input size in the frame header (file inputs only).
        #[arg(long)]
        content_size: bool,

        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Decompress LZ4 streams.
    Decompress {
        /// Inputs ending in .lz4; `-` reads stdin.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Output path for a single input (defaults to the input without .lz4,
        /// `-` for stdout).
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Copy input with an unknown header through unchanged.
        #[arg(long)]
        pass_through: bool,

        /// Decoded blocks allowed in flight between decoder and writer.
        #[arg(long, default_value_t = 4)]
        decode_buffers: usize,

        #[command(flatten)]
        shared: SharedArgs,
    },
    /// Decode and verify streams without writing output.
    Test {
        /// Inputs to verify; `-` reads stdin.
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        #[command(flatten)]
        shared: SharedArgs,
    },
}

#[derive(Args)]
struct SharedArgs {
    /// Dictionary file; its last 64 KiB seed the first block.
    #[arg(short = 'D', long)]
    dictionary: Option<PathBuf>,

    /// Compute workers (0 = detected cores minus one).
    #[arg(short = 'T', long, default_value_t = 0)]
    workers: usize,

    /// Overwrite existing outputs.
    #[arg(short, long)]
    force: bool,
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);

    match run(cli) {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(error) => {
            eprintln!("error: {error:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(verbose > 1)
        .init();
}

/// Returns `Ok(false)` when at least one input failed.
fn run(cli: Cli) -> anyhow::Result<bool> {
    let show_progress = !cli.quiet;
    match cli.command {
        Commands::Compress {
            inputs,
            output,
            level,
            legacy,
            linked,
            block_size,
            block_checksum,
            no_stream_checksum,
            content_size,
            shared,
        } => {
            let mut config = base_config(&shared)?;
            config.format = if legacy {
                StreamFormat::Legacy
            } else {
                StreamFormat::Frame
            };
            config.block_size = block_size;
            config.params.level = level;
            config.params.block_mode = if linked {
                BlockMode::Linked
            } else {
                BlockMode::Independent
            };
            config.params.block_checksum = block_checksum;
            config.params.stream_checksum = !no_stream_checksum;

            compress_command(config, &inputs, output, content_size, &shared, show_progress)
        }
        Commands::Decompress {
            inputs,
            output,
            pass_through,
            decode_buffers,
            shared,
        } => {
            let mut config = base_config(&shared)?;
            config.pass_through = pass_through;
            config.decode_buffers = decode_buffers.max(1);
            decompress_command(config, &inputs, output, &shared, show_progress)
        }
        Commands::Test { inputs, shared } => {
            let config = base_config(&shared)?;
            test_command(config, &inputs, show_progress)
        }
    }
}

fn base_config(shared: &SharedArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = PipelineConfig {
        workers: shared.workers,
        ..PipelineConfig::default()
    };
    if let Some(path) = &shared.dictionary {
        config.params.dictionary = Some(
            load_dictionary(path)
                .with_context(|| format!("loading dictionary {}", path.display()))?,
        );
    }
    Ok(config)
}

fn compress_command(
    mut config: PipelineConfig,
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    content_size: bool,
    shared: &SharedArgs,
    show_progress: bool,
) -> anyhow::Result<bool> {
    if let [input] = inputs {
        if content_size && !is_stdio(input) {
            config.params.content_size = Some(input.metadata()?.len());
        }
        let output = output.unwrap_or_else(|| {
            if is_stdio(input) {
                PathBuf::from(STDIO_MARK)
            } else {
                suffixed(input)
            }
        });
        let pipeline = ChunkPipeline::new(config)?;
        let stats = run_single(input, &output, shared.force, show_progress, |reader, writer, sink| {
            pipeline.compress_stream_with(reader, writer, sink)
        })?;
        report(input, &stats, show_progress, "compressed");
        return Ok(true);
    }

    if output.is_some() {
        bail!("--output needs exactly one input");
    }
    if content_size {
        tracing::warn!("--content-size is ignored for multiple inputs");
    }
    let pipeline = ChunkPipeline::new(config)?;
    let options = BatchOptions {
        overwrite: shared.force,
        ..BatchOptions::default()
    };
    Ok(report_batch(
        pipeline.compress_files(inputs, &options),
        show_progress,
        "compressed",
    ))
}

fn decompress_command(
    config: PipelineConfig,
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    shared: &SharedArgs,
    show_progress: bool,
) -> anyhow::Result<bool> {
    let pipeline = ChunkPipeline::new(config)?;
    if let [input] = inputs {
        let output = match output {
            Some(output) => output,
            None if is_stdio(input) => PathBuf::from(STDIO_MARK),
            None => unsuffixed(input)?,
        };
        let stats = run_single(input, &output, shared.force, show_progress, |reader, writer, sink| {
            pipeline.decompress_stream_with(reader, writer, sink)
        })?;
        report(input, &stats, show_progress, "decompressed");
        return Ok(true);
    }

    if output.is_some() {
        bail!("--output needs exactly one input");
    }
    let options = BatchOptions {
        overwrite: shared.force,
        ..BatchOptions::default()
    };
    Ok(report_batch(
        pipeline.decompress_files(inputs, &options),
        show_progress,
        "decompressed",
    ))
}

fn test_command(
    config: PipelineConfig,
    inputs: &[PathBuf],
    show_progress: bool,
) -> anyhow::Result<bool> {
    let pipeline = ChunkPipeline::new(config)?;
    let mut all_ok = true;
    for input in inputs {
        let result = if is_stdio(input) {
            pipeline.test_stream(io::stdin().lock())
        } else {
            pipeline.test_file(input)
        };
        match result {
            Ok(stats) => report(input, &stats, show_progress, "verified"),
            Err(error) => {
                all_ok = false;
                eprintln!("{}: {error}", input.display());
            }
        }
    }
    Ok(all_ok)
}

type BoxedWriter = Box<dyn Write + Send>;

/// Runs one stream between `input` and `output`, either of which may be stdio.
fn run_single<F>(
    input: &Path,
    output: &Path,
    force: bool,
    show_progress: bool,
    transcode: F,
) -> anyhow::Result<StreamStats>
where
    F: FnOnce(
        Box<dyn Read>,
        BoxedWriter,
        &mut FnProgressSink<Box<dyn FnMut(&StreamProgress)>>,
    ) -> lzpipe_core::Result<(BoxedWriter, StreamStats)>,
{
    let reader: Box<dyn Read> = if is_stdio(input) {
        Box::new(BufReader::new(io::stdin().lock()))
    } else {
        Box::new(BufReader::new(
            File::open(input).with_context(|| format!("opening {}", input.display()))?,
        ))
    };

    let writer: BoxedWriter = if is_stdio(output) {
        Box::new(BufWriter::new(io::stdout()))
    } else {
        if output.exists() && !force {
            bail!("{} already exists (use --force to overwrite)", output.display());
        }
        Box::new(BufWriter::new(
            File::create(output).with_context(|| format!("creating {}", output.display()))?,
        ))
    };

    let draw = show_progress && !is_stdio(output);
    let mut last_draw = Duration::ZERO;
    let callback: Box<dyn FnMut(&StreamProgress)> = Box::new(move |progress: &StreamProgress| {
        if draw && progress.elapsed >= last_draw + Duration::from_millis(250) {
            last_draw = progress.elapsed;
            eprint!(
                "\r{} read, {} written, {}",
                format_bytes(progress.bytes_in),
                format_bytes(progress.bytes_out),
                format_duration(progress.elapsed)
            );
        }
    });
    let mut sink = FnProgressSink::new(callback);

    let result = transcode(reader, writer, &mut sink)
        .map_err(anyhow::Error::from)
        .and_then(|(mut writer, stats)| {
            writer.flush()?;
            Ok(stats)
        });
    if draw {
        eprint!("\r");
    }
    if result.is_err() && !is_stdio(output) {
        let _ = std::fs::remove_file(output);
    }
    result.with_context(|| format!("processing {}", input.display()))
}

fn report(input: &Path, stats: &StreamStats, show_progress: bool, verb: &str) {
    if !show_progress {
        return;
    }
    eprintln!(
        "{}: {verb} {} -> {} ({:.2}%) in {}",
        input.display(),
        format_bytes(stats.bytes_in),
        format_bytes(stats.bytes_out),
        stats.ratio_percent(),
        format_duration(stats.elapsed)
    );
}

fn report_batch(outcomes: Vec<FileOutcome>, show_progress: bool, verb: &str) -> bool {
    let mut all_ok = true;
    for outcome in outcomes {
        match &outcome.result {
            Ok(stats) => report(&outcome.input, stats, show_progress, verb),
            Err(error) => {
                all_ok = false;
                eprintln!("{}: {error}", outcome.input.display());
            }
        }
    }
    all_ok
}

fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == STDIO_MARK
}

fn suffixed(input: &Path) -> PathBuf {
    let mut name = input.as_os_str().to_owned();
    name.push(lzpipe_core::pipeline::DEFAULT_SUFFIX);
    PathBuf::from(name)
}

fn unsuffixed(input: &Path) -> anyhow::Result<PathBuf> {
    let name = input.to_string_lossy();
    match name.strip_suffix(lzpipe_core::pipeline::DEFAULT_SUFFIX) {
        Some(stem) if !stem.is_empty() => Ok(PathBuf::from(stem)),
        _ => bail!(
            "cannot derive an output name for {}; pass --output",
            input.display()
        ),
    }
}

fn parse_block_size(value: &str) -> Result<BlockSizeId, String> {
    let bytes = parse_size(value)?;
    let id = BlockSizeId::for_block_size(bytes);
    if id.bytes() != bytes {
        return Err(format!("block size must be one of 64K, 256K, 1M, 4M (got {value})"));
    }
    Ok(id)
}

fn parse_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err("size cannot be empty".to_string());
    }

    let split_at = trimmed
        .find(|ch: char| !ch.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (num_part, suffix_part) = trimmed.split_at(split_at);
    if num_part.is_empty() {
        return Err(format!("invalid size: {value}"));
    }

    let base: usize = num_part
        .parse()
        .map_err(|_| format!("invalid size number: {value}"))?;

    let multiplier = match suffix_part.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1usize,
        "k" | "kb" => 1024usize,
        "m" | "mb" => 1024usize * 1024usize,
        other => {
            return Err(format!("invalid size suffix '{other}' in '{value}'"));
        }
    };

    base.checked_mul(multiplier)
        .ok_or_else(|| format!("size overflow: {value}"))
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0usize;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} {}", UNITS[unit])
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn format_duration(duration: Duration) -> String {
    let total_seconds = duration.as_secs();
    let millis = duration.subsec_millis();
    let minutes = total_seconds / 60;
    let seconds = total_seconds % 60;

    if minutes > 0 {
        format!("{minutes:02}:{seconds:02}")
    } else {
        format!("{seconds}.{millis:03}s")
    }
}
