use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::warn;

use logan::output::{self, ReportFormat};
use logan::source::{Input, LineSource};
use logan::{
    Field, LineParser, ParseStats, PathTemplater, PatternRegistry, StopSignal, logging, pipeline,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Convert log lines into structured records
    Convert {
        #[command(flatten)]
        input: InputArgs,

        /// json, jsonl, csv, tsv, or a file path (format from its extension)
        #[arg(short, long, default_value = "json")]
        output: String,

        /// Keep the raw datetime only, without the derived epoch timestamp
        #[arg(long)]
        no_timestamp: bool,
    },

    /// Rank (method, url template) pairs by hit count
    Analyze {
        #[command(flatten)]
        input: InputArgs,

        /// JSON file holding a list of url substitution patterns
        #[arg(short = 'u', long)]
        url_pattern_file: Option<PathBuf>,

        /// Url substitution pattern, applied after those from the file
        #[arg(long = "url-pattern")]
        url_patterns: Vec<String>,

        /// Input holds records written by `convert` instead of raw log lines
        #[arg(long)]
        json: bool,

        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,

        /// Only list the N most frequent urls
        #[arg(long)]
        top: Option<usize>,
    },

    /// List the predefined line patterns
    Patterns,
}

#[derive(clap::Args, Debug)]
struct InputArgs {
    #[arg(value_name = "FILE")]
    file: Option<PathBuf>,

    /// Read from standard input
    #[arg(short = 'i', long)]
    stdin: bool,

    /// Name of a predefined pattern, or a regex with named groups
    #[arg(short, long, default_value = "apache2_access")]
    pattern: String,

    #[arg(long)]
    benchmark: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(&args.log_level);

    let registry = PatternRegistry::builtin()?;
    match args.command {
        Command::Patterns => list_patterns(&registry),
        Command::Convert {
            input,
            output: output_arg,
            no_timestamp,
        } => run_convert(&registry, input, &output_arg, no_timestamp),
        Command::Analyze {
            input,
            url_pattern_file,
            url_patterns,
            json,
            format,
            top,
        } => {
            let mut templater = match &url_pattern_file {
                Some(path) => PathTemplater::from_json_file(path)?,
                None => PathTemplater::default(),
            };
            templater.extend(PathTemplater::compile(&url_patterns)?);
            run_analyze(&registry, input, &templater, json, format, top)
        }
    }
}

fn list_patterns(registry: &PatternRegistry) -> Result<()> {
    let title = "List patterns";
    println!("{title}");
    println!("{}", "=".repeat(title.len()));
    println!();
    for pattern in registry.iter() {
        println!("{}: {}", pattern.name(), pattern.as_str());
        println!();
    }
    Ok(())
}

fn run_convert(
    registry: &PatternRegistry,
    args: InputArgs,
    output_arg: &str,
    no_timestamp: bool,
) -> Result<()> {
    let start_time = Instant::now();
    let input = Input::from_args(args.file, args.stdin)?;
    let mut parser = LineParser::new(registry.resolve(&args.pattern)?);
    if !no_timestamp && parser.pattern().has(Field::Datetime) {
        parser = parser.with_timestamps()?;
    }

    let mut source = LineSource::open(&input)?;
    let mut writer = output::create_writer(output_arg)?;
    let stats = pipeline::convert(source.lines(), &parser, &mut writer, &stop_signal())?;
    writer.finish()?;

    if args.benchmark {
        print_benchmark_results(&stats, start_time.elapsed());
    }
    ensure_parsed(&stats, parser.pattern().name())
}

fn run_analyze(
    registry: &PatternRegistry,
    args: InputArgs,
    templater: &PathTemplater,
    json: bool,
    format: ReportFormat,
    top: Option<usize>,
) -> Result<()> {
    let start_time = Instant::now();
    let input = Input::from_args(args.file, args.stdin)?;
    let stop = stop_signal();

    let (analysis, pattern_name) = if json {
        let analysis = pipeline::analyze_json(input.reader()?, templater, &stop)?;
        (analysis, "json records".to_string())
    } else {
        let parser = LineParser::new(registry.resolve(&args.pattern)?);
        let mut source = LineSource::open(&input)?;
        let analysis = pipeline::analyze(source.lines(), &parser, templater, &stop)?;
        (analysis, parser.pattern().name().to_string())
    };

    let mut out = io::stdout().lock();
    output::write_report(&mut out, &analysis.table, &analysis.stats, format, top)?;

    if args.benchmark {
        print_benchmark_results(&analysis.stats, start_time.elapsed());
    }
    ensure_parsed(&analysis.stats, &pattern_name)
}

fn stop_signal() -> StopSignal {
    let stop = StopSignal::new();
    if let Err(err) = stop.install_ctrlc_handler() {
        warn!(error = %err, "cannot install Ctrl-C handler");
    }
    stop
}

/// Input that was there but never matched is reported, not passed off as an
/// empty log.
fn ensure_parsed(stats: &ParseStats, pattern: &str) -> Result<()> {
    if stats.all_rejected() {
        warn!(rejected = stats.rejected, pattern, "no line matched");
        bail!(
            "none of the {} non-blank lines matched pattern `{}`",
            stats.rejected,
            pattern
        );
    }
    Ok(())
}

fn print_benchmark_results(stats: &ParseStats, duration: std::time::Duration) {
    let duration_secs = duration.as_secs_f64();
    let throughput_lines = stats.lines as f64 / duration_secs;
    let throughput_entries = stats.parsed as f64 / duration_secs;
    let non_blank = stats.lines - stats.blank;

    eprintln!("\n=== BENCHMARK RESULTS ===");
    eprintln!("Total lines: {}", stats.lines);
    eprintln!("Blank lines: {}", stats.blank);
    eprintln!("Parsed entries: {}", stats.parsed);
    eprintln!("Rejected lines: {}", stats.rejected);
    eprintln!("Processing time: {:.3}s", duration_secs);
    eprintln!("Throughput: {:.0} lines/s", throughput_lines);
    eprintln!("Throughput: {:.0} entries/s", throughput_entries);
    if non_blank > 0 {
        eprintln!(
            "Parse success rate: {:.1}%",
            (stats.parsed as f64 / non_blank as f64) * 100.0
        );
    }
}
