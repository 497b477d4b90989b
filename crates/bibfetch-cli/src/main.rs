use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::{Instrument, debug, info, info_span, warn};

use bibfetch_core::{
    AppConfig, CoreError, ExitCode, InputKind, Mode, ValidatedBackends, timestamped_bib_path,
};
use bibfetch_science::{
    Backends, BatchInput, BatchReport, BatchRunner, BibliographyCollector, CollectReport,
    ResolutionPipeline, ScienceError,
};

mod input;

use input::Input;

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "bibfetch",
    about = "Find DOIs, PDFs and BibTeX entries for papers by title",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (default: $BIBFETCH_CONFIG, ./bibfetch.toml, then the user config dir).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for downloaded PDFs and generated .bib files.
    #[arg(long, global = true)]
    output_dir: Option<PathBuf>,

    /// What to fetch: pdf, bibtex. Repeat for both; replaces the configured modes.
    #[arg(long = "mode", global = true, action = clap::ArgAction::Append)]
    modes: Vec<String>,

    /// Records processed at the same time.
    #[arg(long, global = true)]
    concurrency: Option<usize>,

    /// Per-request timeout in seconds.
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// More log output (-v debug, -vv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only log errors.
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Output in JSON format (for scripts).
    /// Also enabled by setting BIBFETCH_JSON=1.
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Fetch the PDF of a single paper.
    Title {
        #[arg(required = true, num_args = 1..)]
        title: Vec<String>,
    },

    /// Fetch every title of a newline-delimited text file.
    List { file: PathBuf },

    /// Fetch PDFs for a BibTeX file and add `file` fields to it in place.
    Bib { file: PathBuf },

    /// Use the clipboard text as input.
    Clipboard {
        /// Treat each line as a separate title.
        #[arg(long)]
        lines: bool,
    },

    /// Use the `[input]` section of the config file.
    Run,

    /// Config management.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration.
    Show,
    /// Print the config file path.
    Path,
    /// Write a config file with default values.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

// ─── Main ────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.quiet);
    debug!(?cli, "CLI arguments parsed");

    let json_output = cli.json || std::env::var("BIBFETCH_JSON").as_deref() == Ok("1");
    let start = Instant::now();

    match run(cli, json_output, start).await {
        Ok(()) => std::process::ExitCode::from(ExitCode::Success as u8),
        Err(err) => {
            let code = exit_code_for(&err);
            if json_output {
                let kind = if code == ExitCode::ConfigError {
                    "config"
                } else {
                    "fatal"
                };
                let _ = print_json(&serde_json::json!({
                    "status": "error",
                    "error": kind,
                    "message": format!("{err:#}"),
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }));
            } else {
                eprintln!("error: {err:#}");
            }
            std::process::ExitCode::from(code as u8)
        }
    }
}

/// Log to stderr so the summary on stdout stays machine-readable.
///
/// Priority: RUST_LOG > --quiet > --verbose > info.
fn init_tracing(verbose: u8, quiet: bool) {
    let default_level = if quiet {
        "error"
    } else {
        match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(cli: Cli, json_output: bool, start: Instant) -> Result<()> {
    let config_path = cli.config.clone().unwrap_or_else(AppConfig::config_path);

    if let Commands::Config { action } = &cli.command {
        return config_command(action, &config_path, &cli, json_output, start);
    }

    let mut config = AppConfig::load_from(&config_path)
        .with_context(|| format!("loading config {}", config_path.display()))?;
    apply_overrides(&mut config, &cli);
    let selected = config.validate()?;

    let input = resolve_input(&cli.command, &config)?;
    let output_dir = config
        .ensure_output_dir()
        .with_context(|| format!("creating output dir {}", config.output_dir.display()))?
        .to_path_buf();
    let backends = Backends::from_config(&config, &selected)?;

    let span = info_span!("bibfetch", input = %input.describe());
    let outcome = execute(input, &config, &selected, backends, &output_dir, span.clone())
        .instrument(span)
        .await?;

    let dur = start.elapsed().as_millis();
    if json_output {
        print_json(&serde_json::json!({
            "status": "ok",
            "data": {
                "counts": outcome.batch.as_ref().map(BatchReport::counts),
                "items": outcome.batch.as_ref().map(|b| &b.items),
                "bibtex": outcome.collected.as_ref().map(|c| &c.items),
                "bib_file": outcome.bib_file,
            },
            "meta": { "duration_ms": dur }
        }))?;
    } else {
        if let Some(batch) = &outcome.batch {
            print!("{batch}");
        }
        if let Some(collected) = &outcome.collected {
            print!("{collected}");
        }
        if let Some(path) = &outcome.bib_file {
            println!("BibTeX written to {}", path.display());
        }
    }
    Ok(())
}

/// Reports produced by one run.
#[derive(Default)]
struct RunOutcome {
    batch: Option<BatchReport>,
    collected: Option<CollectReport>,
    bib_file: Option<PathBuf>,
}

async fn execute(
    input: Input,
    config: &AppConfig,
    selected: &ValidatedBackends,
    backends: Backends,
    output_dir: &Path,
    span: tracing::Span,
) -> Result<RunOutcome> {
    let concurrency = config.network.concurrency;
    let pipeline = ResolutionPipeline::new(
        backends.metadata,
        backends.locator,
        backends.downloader,
        output_dir,
    )
    .with_parent_span(span);
    let runner = BatchRunner::new(Arc::new(pipeline), concurrency);
    let want_pdf = selected.has_mode(Mode::Pdf);
    let mut outcome = RunOutcome::default();

    match input {
        Input::Bib(path) => {
            if selected.has_mode(Mode::Bibtex) {
                warn!("bibtex mode does not apply to BibTeX input, ignoring it");
            }
            if want_pdf {
                let report = runner
                    .run_bibtex_file(&path)
                    .await
                    .with_context(|| format!("processing {}", path.display()))?;
                outcome.batch = Some(report);
            }
        }

        Input::Titles(titles) => match backends.bibtex {
            Some(backend) => {
                let collector = BibliographyCollector::new(backend, concurrency);
                let mut collected = collector.collect(titles).await;

                if want_pdf {
                    let inputs = collected
                        .items
                        .iter()
                        .map(|item| match &item.record {
                            Some(record) => BatchInput::Record(record.clone()),
                            None => BatchInput::Title(item.query.clone()),
                        })
                        .collect();
                    let report = runner.run(inputs).await;
                    for item in &report.items {
                        if let Some(slot) = collected.items.get_mut(item.index)
                            && let Some(record) = slot.record.as_mut()
                        {
                            *record = item.record.clone();
                        }
                    }
                    outcome.batch = Some(report);
                }

                if collected.found().next().is_some() {
                    let path = timestamped_bib_path(output_dir, chrono::Local::now().naive_local());
                    collected.write_bibliography(&path)?;
                    outcome.bib_file = Some(path);
                } else {
                    info!("no bibtex entries found, nothing written");
                }
                outcome.collected = Some(collected);
            }
            None => {
                let inputs = titles.into_iter().map(BatchInput::Title).collect();
                outcome.batch = Some(runner.run(inputs).await);
            }
        },
    }

    Ok(outcome)
}

// ─── Config ──────────────────────────────────────────────────────────────────

fn config_command(
    action: &ConfigAction,
    path: &Path,
    cli: &Cli,
    json_output: bool,
    start: Instant,
) -> Result<()> {
    match action {
        ConfigAction::Path => {
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "path": path, "exists": path.exists() },
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }))?;
            } else {
                println!("{}", path.display());
            }
        }
        ConfigAction::Show => {
            let mut config = AppConfig::load_from(path)
                .with_context(|| format!("loading config {}", path.display()))?;
            apply_overrides(&mut config, cli);
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": config,
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }))?;
            } else {
                print!("{}", toml::to_string_pretty(&config)?);
            }
        }
        ConfigAction::Init { force } => {
            if path.exists() && !force {
                bail!(
                    "{} already exists, use --force to overwrite",
                    path.display()
                );
            }
            AppConfig::default().save_to(path)?;
            println!("Wrote default config to {}", path.display());
        }
    }
    Ok(())
}

fn apply_overrides(config: &mut AppConfig, cli: &Cli) {
    if let Some(dir) = &cli.output_dir {
        config.output_dir = dir.clone();
    }
    if !cli.modes.is_empty() {
        config.modes = cli.modes.clone();
    }
    if let Some(n) = cli.concurrency {
        config.network.concurrency = n;
    }
    if let Some(secs) = cli.timeout {
        config.network.timeout_secs = secs;
    }
}

fn resolve_input(command: &Commands, config: &AppConfig) -> Result<Input> {
    match command {
        Commands::Title { title } => input::single_title(&title.join(" ")),
        Commands::List { file } => input::read_title_list(file),
        Commands::Bib { file } => input::bib_file(file),
        Commands::Clipboard { lines } => input::clipboard_titles(*lines),
        Commands::Run => input_from_config(config),
        Commands::Config { .. } => bail!("config commands take no input"),
    }
}

fn input_from_config(config: &AppConfig) -> Result<Input> {
    let input = &config.input;
    let kind = input
        .kind
        .ok_or_else(|| CoreError::Config("input.kind is not set".to_string()))?;
    let path = || {
        input.path_to_file.as_deref().ok_or_else(|| {
            CoreError::Config(format!("input.path_to_file is required for {kind:?} input"))
        })
    };
    match kind {
        InputKind::Title => {
            let title = input
                .title
                .as_deref()
                .ok_or_else(|| CoreError::Config("input.title is not set".to_string()))?;
            input::single_title(title)
        }
        InputKind::Txt => input::read_title_list(path()?),
        InputKind::Bib => input::bib_file(path()?),
        InputKind::Clipboard => input::clipboard_titles(false),
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if let Some(core) = cause.downcast_ref::<CoreError>()
            && core.is_config()
        {
            return ExitCode::ConfigError;
        }
        if let Some(ScienceError::Core(core)) = cause.downcast_ref::<ScienceError>()
            && core.is_config()
        {
            return ExitCode::ConfigError;
        }
    }
    ExitCode::GeneralError
}

fn print_json(val: &serde_json::Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(val)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("bibfetch").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn title_words_are_joined() {
        let cli = parse(&["title", "Deep", "learning"]);
        let input = resolve_input(&cli.command, &AppConfig::default()).unwrap();
        assert_eq!(input, Input::Titles(vec!["Deep learning".to_string()]));
    }

    #[test]
    fn global_flags_override_config() {
        let cli = parse(&[
            "list",
            "titles.txt",
            "--mode",
            "pdf",
            "--mode",
            "bibtex",
            "--concurrency",
            "8",
            "--timeout",
            "5",
            "--output-dir",
            "papers",
            "-vv",
        ]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);

        assert_eq!(config.modes, vec!["pdf", "bibtex"]);
        assert_eq!(config.network.concurrency, 8);
        assert_eq!(config.network.timeout_secs, 5);
        assert_eq!(config.output_dir, PathBuf::from("papers"));
        assert_eq!(cli.verbose, 2);
    }

    #[test]
    fn unknown_mode_is_a_config_error() {
        let cli = parse(&["title", "x", "--mode", "epub"]);
        let mut config = AppConfig::default();
        apply_overrides(&mut config, &cli);
        let err = anyhow::Error::from(config.validate().unwrap_err());
        assert_eq!(exit_code_for(&err), ExitCode::ConfigError);
    }

    #[test]
    fn config_errors_keep_exit_code_through_context() {
        let err = anyhow::Error::from(CoreError::Config("bad".to_string())).context("loading");
        assert_eq!(exit_code_for(&err), ExitCode::ConfigError);

        let err = anyhow::Error::from(ScienceError::Core(CoreError::Config("bad".into())));
        assert_eq!(exit_code_for(&err), ExitCode::ConfigError);

        let err = anyhow::anyhow!("clipboard unavailable");
        assert_eq!(exit_code_for(&err), ExitCode::GeneralError);
    }

    #[test]
    fn empty_or_missing_input_exits_with_config_code() {
        let dir = tempdir().unwrap();
        let empty = dir.path().join("empty.txt");
        std::fs::write(&empty, "\n  \n").unwrap();
        let missing_list = dir.path().join("missing.txt");
        let missing_bib = dir.path().join("missing.bib");

        let commands = [
            parse(&["list", empty.to_str().unwrap()]),
            parse(&["list", missing_list.to_str().unwrap()]),
            parse(&["bib", missing_bib.to_str().unwrap()]),
            parse(&["title", "  "]),
        ];
        for cli in &commands {
            let err = resolve_input(&cli.command, &AppConfig::default()).unwrap_err();
            assert_eq!(exit_code_for(&err), ExitCode::ConfigError, "{:?}", cli.command);
        }
    }

    #[test]
    fn run_reads_input_section() {
        let dir = tempdir().unwrap();
        let list = dir.path().join("titles.txt");
        std::fs::write(&list, "One\n\nTwo\n").unwrap();

        let mut config = AppConfig::default();
        config.input.kind = Some(InputKind::Txt);
        config.input.path_to_file = Some(list);
        assert_eq!(
            input_from_config(&config).unwrap(),
            Input::Titles(vec!["One".to_string(), "Two".to_string()])
        );

        config.input.path_to_file = None;
        let err = input_from_config(&config).unwrap_err();
        assert_eq!(exit_code_for(&err), ExitCode::ConfigError);

        config.input.kind = None;
        assert!(input_from_config(&config).is_err());
    }

    #[test]
    fn config_init_refuses_to_overwrite() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bibfetch.toml");
        let cli = parse(&["config", "init"]);
        let action = ConfigAction::Init { force: false };

        config_command(&action, &path, &cli, false, Instant::now()).unwrap();
        assert!(path.exists());
        assert!(config_command(&action, &path, &cli, false, Instant::now()).is_err());
        config_command(&ConfigAction::Init { force: true }, &path, &cli, false, Instant::now())
            .unwrap();
    }
}
