//! # gaiji-transcode CLI - CP932 CSV to Unicode converter
//!
//! Command-line front end for converting legacy Japanese CSV exports,
//! validating them, and exercising the conversion endpoint envelope.

#[cfg(feature = "cli")]
use std::fs;
#[cfg(feature = "cli")]
use std::io::{self, Read, Write};
#[cfg(feature = "cli")]
use std::path::{Path, PathBuf};
#[cfg(feature = "cli")]
use std::sync::Arc;

#[cfg(feature = "cli")]
use anyhow::{Context, Result};
#[cfg(feature = "cli")]
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
#[cfg(feature = "cli")]
use log::{LevelFilter, Metadata, Record};
#[cfg(feature = "cli")]
use serde::Serialize;

#[cfg(feature = "cli")]
use gaiji_transcode::{
    Error as TranscodeFailure, Method, Service, StrictRecovery, SubstitutionTable,
    TranscodeOptions, Transcoder, Warning,
};

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI features disabled. Enable with --features cli");
    std::process::exit(1);
}

/// gaiji-transcode: CP932 CSV to Unicode with gaiji recovery
#[cfg(feature = "cli")]
#[derive(Parser)]
#[command(name = "gaiji-transcode")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Output format (text, json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Gaiji substitution table (JSON)
    #[arg(long, global = true, env = "GAIJI_TABLE")]
    table: Option<PathBuf>,
}

#[cfg(feature = "cli")]
#[derive(Subcommand)]
enum Commands {
    /// Convert a CP932 CSV file to UTF-8
    Convert(ConvertArgs),

    /// Check that a file decodes without any recovery
    Validate(ValidateArgs),

    /// Answer a JSON conversion request the way the endpoint would
    Handle(HandleArgs),

    /// List the entries of the substitution table
    Table,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ConvertArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Output file (stdout if not specified)
    #[arg(short, long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    dialect: DialectArgs,

    /// Fail on the first undecodable sequence instead of substituting
    #[arg(long)]
    strict: bool,

    /// Prefix the output with a UTF-8 BOM
    #[arg(long)]
    add_bom: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct DialectArgs {
    /// Field delimiter
    #[arg(short, long, default_value = ",")]
    delimiter: char,

    /// Quote character
    #[arg(long, default_value = "\"")]
    quote: char,

    /// Use LF instead of CRLF between output rows
    #[arg(long)]
    lf: bool,

    /// Require every non-empty row to have this many fields
    #[arg(long)]
    columns: Option<usize>,

    /// Longest accepted field, in characters
    #[arg(long, default_value = "131072")]
    max_field_len: usize,
}

#[cfg(feature = "cli")]
impl DialectArgs {
    fn options(&self) -> TranscodeOptions {
        TranscodeOptions::csv()
            .with_delimiter(self.delimiter)
            .with_quote(self.quote)
            .with_terminator(if self.lf { "\n" } else { "\r\n" })
            .with_expected_columns(self.columns)
            .with_max_field_len(self.max_field_len)
    }
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct ValidateArgs {
    /// Input file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Show position of first error
    #[arg(long)]
    show_errors: bool,
}

#[cfg(feature = "cli")]
#[derive(Args)]
struct HandleArgs {
    /// Request body file (stdin if not specified)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Request method
    #[arg(short, long, default_value = "POST")]
    method: String,
}

#[cfg(feature = "cli")]
#[derive(Clone, Debug, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[cfg(feature = "cli")]
#[derive(Serialize)]
struct ConversionReport<'a> {
    success: bool,
    rows: usize,
    bytes_processed: usize,
    bytes_written: usize,
    warnings: &'a [Warning],
    error: Option<String>,
    processing_time_ms: u64,
}

#[cfg(feature = "cli")]
struct StderrLogger;

#[cfg(feature = "cli")]
impl log::Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record<'_>) {
        if self.enabled(record.metadata()) {
            eprintln!("[{}] {}", record.level(), record.args());
        }
    }

    fn flush(&self) {}
}

#[cfg(feature = "cli")]
static LOGGER: StderrLogger = StderrLogger;

#[cfg(feature = "cli")]
fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Error,
        1 => LevelFilter::Info,
        _ => LevelFilter::Debug,
    };
    if log::set_logger(&LOGGER).is_ok() {
        log::set_max_level(level);
    }
}

#[cfg(feature = "cli")]
fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Convert(ref args) => convert_command(args, &cli)?,
        Commands::Validate(ref args) => validate_command(args, &cli)?,
        Commands::Handle(ref args) => handle_command(args, &cli)?,
        Commands::Table => table_command(&cli)?,
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn load_table(path: Option<&Path>) -> Result<Arc<SubstitutionTable>> {
    let table = match path {
        Some(path) => SubstitutionTable::load(path)
            .with_context(|| format!("Failed to load table: {}", path.display()))?,
        None => SubstitutionTable::new(),
    };
    Ok(Arc::new(table))
}

#[cfg(feature = "cli")]
fn read_input(path: Option<&Path>) -> Result<Vec<u8>> {
    match path {
        Some(path) => {
            log::info!("reading from {}", path.display());
            fs::read(path).with_context(|| format!("Failed to read input file: {}", path.display()))
        }
        None => {
            log::info!("reading from stdin");
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read from stdin")?;
            Ok(buffer)
        }
    }
}

#[cfg(feature = "cli")]
fn convert_command(args: &ConvertArgs, cli: &Cli) -> Result<()> {
    let start_time = std::time::Instant::now();
    let table = load_table(cli.table.as_deref())?;
    let input_data = read_input(args.input.as_deref())?;
    let options = args.dialect.options();

    let outcome = if args.strict {
        Transcoder::with_strategy(StrictRecovery, options).transcode(&input_data)
    } else {
        Transcoder::new(&table)
            .with_options(options)
            .transcode(&input_data)
    };

    let (result, warnings) = match outcome {
        Ok(transcoded) => {
            let warnings = transcoded.warnings.clone();
            (Ok(transcoded), warnings)
        }
        Err(failure) => (Err(failure.error), failure.warnings),
    };

    let mut bytes_written = 0;
    let mut rows = 0;
    if let Ok(ref transcoded) = result {
        rows = transcoded.rows.len();
        let mut final_data = Vec::with_capacity(transcoded.text.len() + 3);
        if args.add_bom {
            final_data.extend_from_slice(&[0xEF, 0xBB, 0xBF]);
        }
        final_data.extend_from_slice(transcoded.text.as_bytes());
        bytes_written = final_data.len();

        if let Some(ref output_path) = args.output {
            fs::write(output_path, &final_data).with_context(|| {
                format!("Failed to write output file: {}", output_path.display())
            })?;
            log::info!("wrote {}", output_path.display());
        } else {
            io::stdout()
                .write_all(&final_data)
                .context("Failed to write to stdout")?;
        }
    }

    let processing_time = start_time.elapsed();
    log::info!(
        "processed {} bytes -> {} bytes in {:?}",
        input_data.len(),
        bytes_written,
        processing_time
    );

    match cli.format {
        OutputFormat::Json => {
            let report = ConversionReport {
                success: result.is_ok(),
                rows,
                bytes_processed: input_data.len(),
                bytes_written,
                warnings: &warnings,
                error: result.as_ref().err().map(|e| e.to_string()),
                processing_time_ms: processing_time.as_millis() as u64,
            };
            let json = serde_json::to_string_pretty(&report)?;
            // Keep stdout clean when it carries the converted data
            if args.output.is_some() {
                println!("{}", json);
            } else {
                eprintln!("{}", json);
            }
        }
        OutputFormat::Text => {
            for warning in &warnings {
                eprintln!("warning: {}", warning.message);
            }
            if result.is_ok() {
                eprintln!(
                    "✓ Converted {} rows with {} substitution warnings",
                    rows,
                    warnings.len()
                );
            }
        }
    }

    result.map(|_| ()).context("Conversion failed")
}

#[cfg(feature = "cli")]
fn validate_command(args: &ValidateArgs, cli: &Cli) -> Result<()> {
    let input_data = read_input(args.input.as_deref())?;

    let transcoder = Transcoder::with_strategy(StrictRecovery, TranscodeOptions::default());
    let outcome = transcoder.transcode(&input_data);

    if let OutputFormat::Json = cli.format {
        let report = serde_json::json!({
            "valid": outcome.is_ok(),
            "error": outcome.as_ref().err().map(|f| f.error.to_string()),
            "kind": outcome.as_ref().err().map(|f| f.error.kind()),
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
        std::process::exit(if outcome.is_ok() { 0 } else { 1 });
    }

    match outcome {
        Ok(transcoded) => {
            println!("✓ Input is valid CP932 ({} rows)", transcoded.rows.len());
            std::process::exit(0);
        }
        Err(failure) => {
            println!("✗ Input is not clean CP932");

            if args.show_errors {
                match failure.error {
                    TranscodeFailure::DecodeFatal { position, reason } => {
                        println!("  Error at position {}: {}", position, reason);
                    }
                    TranscodeFailure::MalformedInput { row, reason } => {
                        println!("  Error in row {}: {}", row, reason);
                    }
                    e => println!("  Error: {}", e),
                }
            }

            std::process::exit(1);
        }
    }
}

#[cfg(feature = "cli")]
fn handle_command(args: &HandleArgs, cli: &Cli) -> Result<()> {
    let method: Method = args
        .method
        .parse()
        .with_context(|| format!("Unsupported method: {}", args.method))?;
    let body = read_input(args.input.as_deref())?;

    let service = Service::new(load_table(cli.table.as_deref())?);
    let response = service.handle(method, &body);

    eprintln!("status: {}", response.status);
    for (name, value) in &response.headers {
        log::info!("{}: {}", name, value);
    }
    if !response.body.is_empty() {
        println!("{}", response.body);
    }

    Ok(())
}

#[cfg(feature = "cli")]
fn table_command(cli: &Cli) -> Result<()> {
    let table = load_table(cli.table.as_deref())?;

    match cli.format {
        OutputFormat::Json => {
            let entries: Vec<_> = table
                .iter()
                .map(|(key, ch)| {
                    serde_json::json!({
                        "bytes": format!("{:02X}{:02X}", key[0], key[1]),
                        "codepoint": format!("U+{:04X}", ch as u32),
                        "char": ch.to_string(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            println!("Substitution table ({} entries):", table.len());
            for (key, ch) in table.iter() {
                println!("  0x{:02X}{:02X} -> U+{:04X} {}", key[0], key[1], ch as u32, ch);
            }
        }
    }

    Ok(())
}
