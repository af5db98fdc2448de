//! CLI binary for contract-note-extractor.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `ExtractorConfig` / `ExtractionRequest`, writes one JSON envelope per
//! document and prints a short summary.

use anyhow::{Context, Result};
use clap::Parser;
use contract_note_extractor::pipeline::reduce::bind_pdfium;
use contract_note_extractor::{
    save_result, ExtractionProgressCallback, ExtractionRequest, ExtractionResult, Extractor,
    ExtractorConfig, OpenAiService, ProgressCallback, PromptAssets,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const DEFAULT_CONFIG: &str = "config.json";

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI progress callback using indicatif ────────────────────────────────────

/// One bar for the whole batch; documents finish out of order.
struct CliProgressCallback {
    bar: ProgressBar,
}

impl CliProgressCallback {
    fn new() -> Arc<Self> {
        let style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  [{bar:40.green/238}] {pos:>3}/{len} notes  \
             ⏱ {elapsed_precise}  {msg}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ");

        let bar = ProgressBar::new(0);
        bar.set_style(style);
        bar.set_prefix("Extracting");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ExtractionProgressCallback for CliProgressCallback {
    fn on_batch_start(&self, total: usize) {
        self.bar.set_length(total as u64);
    }

    fn on_document_start(&self, _index: usize, _total: usize, name: &str) {
        self.bar.set_message(name.to_string());
    }

    fn on_document_complete(&self, index: usize, total: usize, success: bool, transactions: usize) {
        let mark = if success { green("✓") } else { red("✗") };
        self.bar.println(format!(
            "  {} Note {:>3}/{:<3}  {}",
            mark,
            index + 1,
            total,
            dim(&format!("{transactions} transactions")),
        ));
        self.bar.inc(1);
    }

    fn on_batch_complete(&self, _total: usize, _succeeded: usize) {
        self.bar.finish_and_clear();
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Extract one contract note → ./note_extracted.json
  cnx note.pdf

  # Choose the output file and model
  cnx note.pdf -o result.json -m gpt-5-mini

  # Batch: one JSON file per note in ./out/
  cnx notes/*.pdf -o out/ --concurrency 8

  # Print the envelope to stdout
  cnx --json note.pdf > result.json

  # Extra guidance for an unusual layout
  cnx note.pdf --position-prompt hints.md

  # Verify configuration, prompt files and API key
  cnx --check

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY     OpenAI API key when --api-key is not given
                     (name configurable via openai.api_key_env_var)
  PDFIUM_LIB_PATH    Path to libpdfium (file or directory); needed only for reduction
  RUST_LOG           Override the log filter (e.g. contract_note_extractor=debug)
"#;

/// Extract structured data from brokerage contract-note PDFs.
#[derive(Parser, Debug)]
#[command(
    name = "cnx",
    version,
    about = "Extract header, transactions and obligations from contract-note PDFs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Contract-note PDF files.
    #[arg(required_unless_present = "check")]
    inputs: Vec<PathBuf>,

    /// Configuration file. Built-in defaults are used when the default file
    /// is absent.
    #[arg(short, long, env = "CNX_CONFIG")]
    config: Option<PathBuf>,

    /// Output file (one input) or directory (several inputs).
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// OpenAI API key. Defaults to the variable named by
    /// `openai.api_key_env_var` (OPENAI_API_KEY unless configured).
    #[arg(short = 'k', long)]
    api_key: Option<String>,

    /// Model ID (e.g. gpt-4o, gpt-4o-mini, gpt-5).
    #[arg(short, long)]
    model: Option<String>,

    /// File whose contents replace the configured system prompt.
    #[arg(long)]
    system_prompt: Option<PathBuf>,

    /// File whose contents are appended to the system prompt.
    #[arg(long)]
    position_prompt: Option<PathBuf>,

    /// Never trim oversized PDFs.
    #[arg(long)]
    no_reduce: bool,

    /// Documents extracted at the same time.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Print the result envelope(s) to stdout instead of writing files.
    #[arg(long)]
    json: bool,

    /// Verify configuration, prompt files and API key, then exit.
    #[arg(long)]
    check: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long)]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.json && cli.inputs.len() > 1;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else if show_progress {
        "warn"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    if cli.check {
        let ok = run_check(&cli);
        std::process::exit(if ok { 0 } else { 1 });
    }

    // ── Build extractor ──────────────────────────────────────────────────
    let (mut config, from_file) = load_config(cli.config.as_deref())?;
    if cli.no_reduce {
        config.pdf_reduction.enabled = false;
    }
    if let Some(n) = cli.concurrency {
        config.extraction.concurrency = n.max(1);
    }

    let extractor = if from_file {
        Extractor::from_config(config, cli.api_key.clone())
            .context("Failed to initialise extractor")?
    } else {
        let service = OpenAiService::from_settings(&config.openai, cli.api_key.clone())
            .context("Failed to initialise extractor")?;
        Extractor::new(config, PromptAssets::builtin(), Arc::new(service))
    };
    let extractor = if show_progress {
        extractor.with_progress(CliProgressCallback::new() as ProgressCallback)
    } else {
        extractor
    };

    let request = build_request(&cli).await?;

    // ── Run extraction ───────────────────────────────────────────────────
    let results = if cli.inputs.len() == 1 {
        vec![extractor.extract(&cli.inputs[0], &request).await]
    } else {
        extractor.extract_batch(&cli.inputs, &request).await
    };

    // ── Write results ────────────────────────────────────────────────────
    if cli.json {
        let json = if results.len() == 1 {
            serde_json::to_string_pretty(&results[0])
        } else {
            serde_json::to_string_pretty(&results)
        }
        .context("Failed to serialise result")?;
        println!("{json}");
    } else {
        for (input, result) in cli.inputs.iter().zip(&results) {
            let path = output_path(input, cli.output.as_deref(), cli.inputs.len() > 1);
            save_result(result, &path)
                .await
                .with_context(|| format!("Failed to save result for {}", input.display()))?;
            if !cli.quiet {
                print_summary(input, result, &path);
            }
        }
    }

    let failed = results.iter().filter(|r| !r.success).count();
    if !cli.quiet && results.len() > 1 {
        eprintln!(
            "{}  {}/{} notes extracted",
            if failed == 0 { green("✔") } else { yellow("⚠") },
            results.len() - failed,
            results.len()
        );
    }
    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}

/// Read the config file. A missing *default* file falls back to built-in
/// defaults; a missing file named with `--config` is an error.
fn load_config(explicit: Option<&Path>) -> Result<(ExtractorConfig, bool)> {
    match explicit {
        Some(path) => {
            let config = ExtractorConfig::from_file(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            Ok((config, true))
        }
        None if Path::new(DEFAULT_CONFIG).exists() => {
            let config = ExtractorConfig::from_file(DEFAULT_CONFIG)
                .with_context(|| format!("Failed to load {DEFAULT_CONFIG}"))?;
            Ok((config, true))
        }
        None => {
            tracing::info!("{} not found, using built-in defaults", DEFAULT_CONFIG);
            Ok((ExtractorConfig::default(), false))
        }
    }
}

/// Map prompt-file and model flags to an `ExtractionRequest`.
async fn build_request(cli: &Cli) -> Result<ExtractionRequest> {
    let mut request = ExtractionRequest::new();
    request.model = cli.model.clone();
    if let Some(ref path) = cli.system_prompt {
        request.system_prompt = Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        );
    }
    if let Some(ref path) = cli.position_prompt {
        request.position_prompt = Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read position prompt from {:?}", path))?,
        );
    }
    Ok(request)
}

/// `<stem>_extracted.json`, placed per `--output`.
fn output_path(input: &Path, output: Option<&Path>, many: bool) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());
    let file_name = format!("{stem}_extracted.json");
    match output {
        Some(out) if many || out.is_dir() => out.join(file_name),
        Some(out) => out.to_path_buf(),
        None => PathBuf::from(file_name),
    }
}

fn print_summary(input: &Path, result: &ExtractionResult, written: &Path) {
    let name = input.display().to_string();
    if result.success {
        eprintln!(
            "{} {}  {} transactions  →  {}",
            green("✔"),
            bold(&name),
            result.transaction_count(),
            written.display()
        );
        if let Some(client) = result.header_field("client_name") {
            eprintln!("   client:        {client}");
        }
        if let Some(note) = result.header_field("contract_note_no") {
            eprintln!("   contract note: {note}");
        }
    } else {
        eprintln!("{} {}  →  {}", red("✘"), bold(&name), written.display());
        for e in &result.errors {
            eprintln!("   {} {}", red("error:"), e);
        }
    }
    for w in &result.warnings {
        eprintln!("   {} {}", yellow("warning:"), w);
    }
}

// ── Setup check ──────────────────────────────────────────────────────────────

fn pass(what: &str, detail: &str) {
    println!("{} {:<16} {}", green("✔"), what, dim(detail));
}
fn fail(what: &str, detail: &str) {
    println!("{} {:<16} {}", red("✘"), what, detail);
}
fn note(what: &str, detail: &str) {
    println!("{} {:<16} {}", yellow("⚠"), what, detail);
}

/// Verify that an extraction could start. Returns false on any hard failure.
fn run_check(cli: &Cli) -> bool {
    println!("{}", bold("Contract Note Extractor - Setup Verification"));
    let mut ok = true;

    // Configuration
    let config = match load_config(cli.config.as_deref()) {
        Ok((config, true)) => {
            pass("config", "loaded");
            config
        }
        Ok((config, false)) => {
            note("config", &format!("{DEFAULT_CONFIG} not found, using built-in defaults"));
            config
        }
        Err(e) => {
            fail("config", &format!("{e:#}"));
            return false;
        }
    };

    // Prompt assets
    if cli.config.is_some() || Path::new(DEFAULT_CONFIG).exists() {
        let prompt = config.system_prompt_path();
        if prompt.exists() {
            pass("system prompt", &prompt.display().to_string());
        } else {
            fail("system prompt", &format!("{} missing", prompt.display()));
            ok = false;
        }
        let compact = config.resolve(&config.files.compact_schema);
        let full = config.resolve(&config.files.full_schema);
        if compact.exists() {
            pass("schema", &compact.display().to_string());
        } else if full.exists() {
            note("schema", &format!("{} missing, using {}", compact.display(), full.display()));
        } else {
            note("schema", "no schema file, prompts carry an empty schema");
        }
    } else {
        pass("prompts", "built-in");
    }

    // API key
    let raw_key = cli
        .api_key
        .clone()
        .or_else(|| std::env::var(&config.openai.api_key_env_var).ok());
    match raw_key {
        None => {
            fail("API key", &format!("{} not set", config.openai.api_key_env_var));
            ok = false;
        }
        Some(k) if k.trim().is_empty() => {
            fail("API key", "empty");
            ok = false;
        }
        Some(k) if k.contains(char::is_whitespace) => {
            note(
                "API key",
                &format!("set ({} chars) but contains whitespace; it will be trimmed", k.len()),
            );
        }
        Some(k) => pass("API key", &format!("set ({} chars)", k.len())),
    }

    // pdfium
    if config.pdf_reduction.enabled && !cli.no_reduce {
        match bind_pdfium() {
            Ok(_) => pass("pdfium", "available"),
            Err(e) => note("pdfium", &format!("{e}; oversized PDFs cannot be reduced")),
        }
    }

    println!();
    if ok {
        println!("{} Ready to extract.", green("✔"));
    } else {
        println!("{} Fix the problems above before extracting.", red("✘"));
    }
    ok
}
