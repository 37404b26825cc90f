use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use regex::Regex;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use vidmatch::{
    DEFAULT_CHR_TOLERANCE, DEFAULT_PROP_TOLERANCE, Processor, ProcessorConfig, write_report,
};

#[derive(Parser, Debug)]
#[command(name = "vidmatch", version, about = "Identify similar videos")]
struct Cli {
    /// Number of parallel workers (default: available CPUs)
    #[arg(short = 'P', long, global = true)]
    workers: Option<usize>,

    /// Directory to store/use the state
    #[arg(short = 'd', long, global = true, value_name = "DIR")]
    state_directory: Option<PathBuf>,

    /// File to output the report to (default: stdout)
    #[arg(short = 'o', long, global = true, value_name = "FILE")]
    output_file: Option<PathBuf>,

    /// Skip files whose path matches this regular expression
    #[arg(short = 'X', long, global = true, value_name = "PATTERN")]
    exclude: Option<String>,

    /// Only show warnings and errors, no progress
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Debug mode
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Scan video files and report similar ones as JSON
    Process {
        /// Directories to scan
        #[arg(required = true, value_name = "DIR")]
        directories: Vec<PathBuf>,

        /// Luma and chrominance tolerance level
        #[arg(long, default_value_t = DEFAULT_CHR_TOLERANCE)]
        chr_tolerance: f64,

        /// Proportion tolerance level
        #[arg(long, default_value_t = DEFAULT_PROP_TOLERANCE)]
        prop_tolerance: f64,

        /// Store filenames with absolute paths
        #[arg(short = 'A', long)]
        abs_paths: bool,

        /// Bucket operator-flagged false positives like ordinary matches
        #[arg(long)]
        ignore_false_positives: bool,
    },

    /// Mark the given files as a false-positive match
    Unmatch {
        /// Files that should no longer be reported as duplicates
        #[arg(required = true, value_name = "FILE")]
        files: Vec<PathBuf>,
    },

    /// Delete state records for files that no longer exist
    Compact,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.debug {
        log::LevelFilter::Debug
    } else if cli.verbose {
        log::LevelFilter::Info
    } else {
        log::LevelFilter::Warn
    };
    env_logger::Builder::new().filter_level(level).init();

    let exclude = cli
        .exclude
        .as_deref()
        .map(Regex::new)
        .transpose()
        .context("invalid exclusion pattern")?;

    let mut config = ProcessorConfig {
        state_directory: cli.state_directory,
        exclude,
        quiet: cli.quiet,
        ..ProcessorConfig::default()
    };

    if let Some(workers) = cli.workers {
        config.workers = workers;
    }

    log::info!("running with {} parallel workers", config.workers);

    match cli.command {
        Commands::Process {
            directories,
            chr_tolerance,
            prop_tolerance,
            abs_paths,
            ignore_false_positives,
        } => {
            config.chr_tolerance = chr_tolerance;
            config.prop_tolerance = prop_tolerance;
            config.use_absolute_paths = abs_paths;
            config.ignore_false_positives = ignore_false_positives;
            let quiet = config.quiet;

            // A bad output path must fail here, not after an hours-long run.
            let mut writer = open_output(cli.output_file.as_deref())?;

            let processor = Processor::new(config)?;
            let report = processor.process(&directories)?;

            write_report(&mut writer, &report.buckets).context("failed to write report")?;
            writer.flush()?;

            if !quiet {
                eprintln!("\n{}", report.stats);
            }
        }

        Commands::Unmatch { files } => {
            config.workers = 1;
            let processor = Processor::new(config)?;
            processor.unmatch(&files)?;
        }

        Commands::Compact => {
            config.workers = 1;
            let processor = Processor::new(config)?;
            let summary = processor.compact_state()?;
            println!("{summary}");
        }
    }

    Ok(())
}

/// Report destination: the given file, or stdout when none was asked for.
fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("cannot open output file '{}'", path.display()))?;
            Ok(Box::new(BufWriter::new(file)))
        }
        None => Ok(Box::new(io::stdout().lock())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn unwritable_output_path_is_rejected_up_front() {
        let err = open_output(Some(Path::new("/nonexistent/dir/report.json")))
            .err()
            .unwrap();
        assert!(err.to_string().contains("cannot open output file"));
    }

    #[test]
    fn output_defaults_to_stdout() {
        assert!(open_output(None).is_ok());
    }

    #[test]
    fn writable_output_path_is_created_immediately() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("report.json");

        open_output(Some(&path)).unwrap();
        assert!(path.exists());
    }
}
