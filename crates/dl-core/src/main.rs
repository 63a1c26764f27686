//! docket-lake CLI: convert Mirrulations dockets into Parquet tables.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use dl_common::{Compression, Error, Result};
use dl_config::{resolve_config, validate, ConfigPaths, ConvertConfig, MalformedPolicy};
use dl_core::logging::{default_level, init_logging, LogFormat};
use dl_core::{compact_store, Converter, DocketFilter, ExitCode, FsRecordSource, RunStats};
use dl_table::{DeltaManager, LocalStore};
use tracing::{error, info, warn};

/// Directory placed under the output root for converted tables.
const DERIVED_DATA: &str = "derived-data";

#[derive(Parser, Debug)]
#[command(
    name = "docket-lake",
    version,
    about = "Convert docket JSON into incremental Parquet tables"
)]
struct Cli {
    /// Debug-level logging
    #[arg(long, global = true)]
    debug: bool,

    /// Info-level logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert every selected docket under a data directory
    Convert(ConvertArgs),
    /// Compact every table with outstanding delta files
    Compact(CompactArgs),
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum MalformedArg {
    Skip,
    Abort,
}

impl From<MalformedArg> for MalformedPolicy {
    fn from(arg: MalformedArg) -> Self {
        match arg {
            MalformedArg::Skip => MalformedPolicy::Skip,
            MalformedArg::Abort => MalformedPolicy::Abort,
        }
    }
}

#[derive(Args, Debug)]
struct ConvertArgs {
    /// Mirror root containing raw-data/ or docket directories
    data_path: PathBuf,

    /// Output root; tables go to <OUTPUT_PATH>/derived-data
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Only convert dockets of this agency
    #[arg(long)]
    agency: Option<String>,

    /// Only convert dockets matching this glob
    #[arg(long)]
    docket_pattern: Option<String>,

    /// Compression codec
    #[arg(long, value_enum)]
    compression: Option<Compression>,

    /// Delta files per table before compaction
    #[arg(long)]
    compaction_threshold: Option<usize>,

    /// Worker threads (0 = one per CPU)
    #[arg(long)]
    workers: Option<usize>,

    /// Skip dockets that already have output
    #[arg(long)]
    resume: bool,

    /// Malformed record handling
    #[arg(long, value_enum)]
    malformed: Option<MalformedArg>,

    /// Config file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct CompactArgs {
    /// Directory holding <agency>/<docket>/iceberg/ trees
    output_root: PathBuf,

    /// Compression codec for the new base files
    #[arg(long, value_enum)]
    compression: Option<Compression>,

    /// Config file (JSON or TOML)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, default_level(cli.debug, cli.verbose));

    let code = match run(cli.command) {
        Ok(stats) => match serde_json::to_string_pretty(&stats) {
            Ok(json) => {
                println!("{json}");
                ExitCode::from_stats(&stats)
            }
            Err(e) => {
                eprintln!("error: failed to render summary: {e}");
                ExitCode::InternalError
            }
        },
        Err(e) => {
            error!(code = e.code(), error = %e, "run failed");
            eprintln!("error: {e}");
            ExitCode::from_error(&e)
        }
    };
    std::process::exit(code.as_i32());
}

fn run(command: Command) -> Result<RunStats> {
    match command {
        Command::Convert(args) => convert(args),
        Command::Compact(args) => compact(args),
    }
}

fn load_config(path: Option<&Path>) -> Result<ConvertConfig> {
    let (config, source) = resolve_config(&ConfigPaths::discover(path))?;
    info!(source = ?source, "configuration loaded");
    Ok(config)
}

fn check_config(config: &ConvertConfig) -> Result<()> {
    for warning in validate(config).into_result()? {
        warn!(warning = %warning, "configuration warning");
    }
    Ok(())
}

fn convert(args: ConvertArgs) -> Result<RunStats> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(compression) = args.compression {
        config.compression = compression;
    }
    if let Some(threshold) = args.compaction_threshold {
        config.compaction_threshold = threshold;
    }
    if let Some(workers) = args.workers {
        config.workers = workers;
    }
    if args.resume {
        config.resume = true;
    }
    if let Some(malformed) = args.malformed {
        config.malformed = malformed.into();
    }
    if args.agency.is_some() {
        config.agency = args.agency;
    }
    if args.docket_pattern.is_some() {
        config.docket_pattern = args.docket_pattern;
    }
    check_config(&config)?;

    if !args.data_path.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("data path {} is not a directory", args.data_path.display()),
        )));
    }
    let output_root = args
        .output_path
        .as_deref()
        .unwrap_or(&args.data_path)
        .join(DERIVED_DATA);
    info!(
        data = %args.data_path.display(),
        output = %output_root.display(),
        compression = %config.compression,
        "converting"
    );

    let filter = DocketFilter::new(
        config.agency_filter().as_deref(),
        config.docket_pattern.as_deref(),
    )?;
    let source = FsRecordSource::new(&args.data_path).with_filter(filter);
    let store = LocalStore::new(output_root);
    Converter::new(Arc::new(source), Arc::new(store), config).convert_all()
}

fn compact(args: CompactArgs) -> Result<RunStats> {
    let mut config = load_config(args.config.as_deref())?;
    if let Some(compression) = args.compression {
        config.compression = compression;
    }
    check_config(&config)?;

    if !args.output_root.is_dir() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("output root {} is not a directory", args.output_root.display()),
        )));
    }
    let store = LocalStore::new(&args.output_root);
    let manager = DeltaManager::new(
        Arc::new(store),
        config.compaction_threshold,
        config.compression,
    );
    compact_store(&manager)
}
