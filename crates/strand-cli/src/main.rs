use std::path::Path;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing::error;
use tracing_subscriber::filter::LevelFilter;

use strand_core::compress::Codec;
use strand_core::config::{RepoConfig, DEFAULT_CHUNK_SIZE};
use strand_core::error::Result;
use strand_core::export::{DirExporter, Exporter, PoolDrive};
use strand_core::repo::Repository;

#[derive(Parser)]
#[command(
    name = "strand",
    version,
    about = "Deduplicated, versioned backups with resemblance deltas"
)]
struct Cli {
    /// Chunk size in bytes
    #[arg(short = 'c', long, global = true, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// Log verbosity level (0-4)
    #[arg(short = 'v', long, global = true, default_value_t = 2)]
    verbose: u8,

    /// Store chunk payloads uncompressed
    #[arg(long, global = true)]
    store_plain: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new version of folder <SOURCE> in repository <DEST>
    Commit {
        source: String,
        dest: String,
    },

    /// Restore the latest version from repository <SOURCE> into folder <DEST>
    Restore {
        source: String,
        dest: String,
    },

    /// Export every version from repository <SOURCE> into <DEST>
    Export {
        source: String,
        dest: String,

        /// Export format
        #[arg(long, default_value = "dir", value_parser = ["dir", "pool"])]
        format: String,

        /// Number of pool files (pool format)
        #[arg(long, default_value_t = 96)]
        pools: usize,

        /// Size of one track in bytes (pool format)
        #[arg(long, default_value_t = 1020)]
        track_size: usize,

        /// Number of tracks per pool (pool format)
        #[arg(long, default_value_t = 10_000)]
        tracks_per_pool: usize,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::ERROR,
        1 => LevelFilter::WARN,
        2 => LevelFilter::INFO,
        3 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    let mut config = RepoConfig::with_chunk_size(cli.chunk_size);
    if cli.store_plain {
        config.codec = Codec::None;
    }

    match cli.command {
        Commands::Commit { source, dest } => {
            let mut repo = Repository::new(Path::new(&dest), config)?;
            repo.commit(Path::new(&source))
        }
        Commands::Restore { source, dest } => {
            let mut repo = Repository::new(Path::new(&source), config)?;
            repo.restore(Path::new(&dest))
        }
        Commands::Export {
            source,
            dest,
            format,
            pools,
            track_size,
            tracks_per_pool,
        } => {
            let mut repo = Repository::new(Path::new(&source), config)?;
            let mut exporter: Box<dyn Exporter> = match format.as_str() {
                "pool" => Box::new(PoolDrive::new(
                    Path::new(&dest),
                    pools,
                    track_size,
                    tracks_per_pool,
                )?),
                _ => Box::new(DirExporter::new(Path::new(&dest))?),
            };
            repo.export(exporter.as_mut())
        }
    }
}
