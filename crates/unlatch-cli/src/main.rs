//! unlatch: batch decryption of vendor-encrypted recordings
//!
//! Commands:
//!   decrypt --source <loc> [--dest <loc> | --download <dir>]  - run one job with N local callers
//!   inspect <file> --key K                                    - check whether a key opens a file
//!   keystream --key K [--bytes N]                             - dump the derived keystream
//!   config show                                               - display current configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use unlatch_cipher::{
    decrypt_in_place, looks_like_container_header, DecryptionKey, HEADER_PROBE_LEN, KEYSTREAM_LEN,
};
use unlatch_core::config::UnlatchConfig;
use unlatch_core::UnlatchResult;
use unlatch_core::types::{DestinationKind, SourceKind};
use unlatch_jobs::{
    spawn_reaper, FileStatus, JobConfig, JobError, JobView, Orchestrator, OrchestratorConfig,
    Registry,
};
use unlatch_storage::{
    build_operator, check_health, memory_operator, ArtifactStore, OpendalStore,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "unlatch",
    version,
    about = "Decrypt batches of vendor-encrypted recordings",
    long_about = "unlatch: run decryption jobs against a folder in object storage or on disk"
)]
struct Cli {
    /// Path to unlatch.toml configuration file
    #[arg(long, short = 'c', env = "UNLATCH_CONFIG", default_value = "unlatch.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, env = "UNLATCH_LOG")]
    log: Option<String>,

    /// Log format; overrides the config file
    #[arg(long, env = "UNLATCH_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Decrypt every file in a source folder
    ///
    /// Output goes to --dest, to a folder next to the source (--same-folder),
    /// or to a local directory (--download).
    Decrypt {
        /// Source folder in the configured storage backend
        #[arg(long, short = 's')]
        source: String,
        /// Destination folder in the configured storage backend
        #[arg(long, short = 'd', conflicts_with_all = ["download", "same_folder"])]
        dest: Option<String>,
        /// Keep plaintext locally instead of uploading it
        #[arg(long, conflicts_with = "same_folder")]
        download: Option<PathBuf>,
        /// Write output alongside the source
        #[arg(long)]
        same_folder: bool,
        /// With --same-folder: prefix output names instead of using a subfolder
        #[arg(long, requires = "same_folder")]
        prefix_names: bool,
        /// Decryption key (32 hex characters)
        #[arg(long, short = 'k', env = "UNLATCH_KEY", hide_env_values = true)]
        key: String,
        /// Concurrent callers driving the job (default: config, then CPU count)
        #[arg(long)]
        callers: Option<usize>,
        /// Re-run failed files as new jobs up to this many times
        #[arg(long, default_value_t = 0)]
        retries: u32,
        /// Print the final job state as JSON
        #[arg(long)]
        json: bool,
    },

    /// Check whether a key opens a single encrypted file
    Inspect {
        /// Local encrypted file
        file: PathBuf,
        #[arg(long, short = 'k', env = "UNLATCH_KEY", hide_env_values = true)]
        key: String,
    },

    /// Hex dump of the keystream derived from a key
    Keystream {
        #[arg(long, short = 'k', env = "UNLATCH_KEY", hide_env_values = true)]
        key: String,
        /// Number of bytes to print (max 4096)
        #[arg(long, default_value_t = 64)]
        bytes: usize,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

struct DecryptArgs {
    source: String,
    dest: Option<String>,
    download: Option<PathBuf>,
    same_folder: bool,
    prefix_names: bool,
    key: String,
    callers: Option<usize>,
    retries: u32,
    json: bool,
}

// ── main ───────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = UnlatchConfig::load(&cli.config)?;

    let level = cli
        .log
        .clone()
        .unwrap_or_else(|| config.logging.level.clone());
    let format = cli.log_format.clone().unwrap_or_else(|| {
        if config.logging.format.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    });
    init_logging(&level, &format);

    match cli.command {
        Commands::Decrypt {
            source,
            dest,
            download,
            same_folder,
            prefix_names,
            key,
            callers,
            retries,
            json,
        } => {
            cmd_decrypt(
                &config,
                DecryptArgs {
                    source,
                    dest,
                    download,
                    same_folder,
                    prefix_names,
                    key,
                    callers,
                    retries,
                    json,
                },
            )
            .await
        }
        Commands::Inspect { file, key } => cmd_inspect(&file, &key),
        Commands::Keystream { key, bytes } => cmd_keystream(&key, bytes),
        Commands::Config {
            action: ConfigAction::Show,
        } => cmd_config_show(&config, &cli.config),
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    // stderr keeps log lines out of the progress bar and --json output
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style =
        ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("=>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
    pb.set_style(style);
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

// ── `unlatch decrypt` ─────────────────────────────────────────────────────────

async fn build_orchestrator(config: &UnlatchConfig) -> UnlatchResult<Orchestrator> {
    let op = build_operator(&config.storage)?;
    check_health(&op).await?;

    let store = OpendalStore::new(op)
        .with_include_patterns(&config.storage.include_patterns)?
        .with_subfolder_name(&config.output.subfolder_name);
    let registry = Registry::in_memory(Duration::from_secs(config.jobs.job_ttl_secs));
    let artifacts = ArtifactStore::new(memory_operator()?);

    Ok(Orchestrator::new(
        registry,
        Arc::new(store),
        artifacts,
        OrchestratorConfig::from_config(config),
    ))
}

fn job_config(args: &DecryptArgs) -> Result<JobConfig> {
    let key = DecryptionKey::parse(&args.key).context("invalid decryption key")?;
    let destination = if args.download.is_some() {
        DestinationKind::ClientDownload
    } else {
        DestinationKind::RemoteFolder
    };
    let mut config = JobConfig::new(SourceKind::RemoteFolder, destination, key)
        .with_source(args.source.clone());
    if args.same_folder {
        config = config.same_folder(args.prefix_names);
    }
    if let Some(dest) = &args.dest {
        config = config.with_destination(dest.clone());
    }
    Ok(config)
}

async fn cmd_decrypt(config: &UnlatchConfig, args: DecryptArgs) -> Result<()> {
    let orch = build_orchestrator(config)
        .await
        .context("setting up storage")?;
    let job = orch.create_job(job_config(&args)?)?;

    let callers = args
        .callers
        .or((config.jobs.callers > 0).then_some(config.jobs.callers))
        .unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        })
        .max(1);

    let cancel = CancellationToken::new();
    let signal = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, stopping after in-flight files");
                cancel.cancel();
            }
        }
    });
    let reaper_stop = CancellationToken::new();
    let reaper = spawn_reaper(
        orch.registry().clone(),
        orch.artifacts().clone(),
        Duration::from_secs(config.jobs.sweep_interval_secs.max(1)),
        reaper_stop.clone(),
    );

    let result = run_with_retries(&orch, &job.id, callers, &cancel, &args).await;

    reaper_stop.cancel();
    let _ = reaper.await;
    signal.abort();
    result
}

async fn run_with_retries(
    orch: &Orchestrator,
    first_id: &str,
    callers: usize,
    cancel: &CancellationToken,
    args: &DecryptArgs,
) -> Result<()> {
    let mut id = first_id.to_string();
    let mut attempt = 0;
    loop {
        let view = drive_job(orch, &id, callers, cancel).await?;

        if cancel.is_cancelled() {
            if let Err(e) = orch.cancel(&id) {
                // the job may have finished before the interrupt landed
                debug!(job_id = %id, error = %e, "job not marked cancelled");
            }
            anyhow::bail!("job {id} cancelled");
        }
        if let Some(dir) = &args.download {
            let written = export_artifacts(orch, &view, dir).await?;
            info!(job_id = %id, written, dir = %dir.display(), "artifacts written");
        }
        print_summary(&view, args.json)?;

        let failed = failed_count(&view);
        if failed == 0 {
            return Ok(());
        }
        if attempt >= args.retries {
            anyhow::bail!("{failed} file(s) failed");
        }
        attempt += 1;
        let retry = orch.retry(&id, None)?;
        info!(attempt, job_id = %retry.id, retry_of = %id, "retrying failed files");
        id = retry.id;
    }
}

/// Run `callers` concurrent callers against job `id` until none can make
/// progress, rendering progress from the job's read model.
async fn drive_job(
    orch: &Orchestrator,
    id: &str,
    callers: usize,
    cancel: &CancellationToken,
) -> Result<JobView> {
    let mut tasks = JoinSet::new();
    for caller in 0..callers {
        let orch = orch.clone();
        let id = id.to_string();
        let cancel = cancel.clone();
        tasks.spawn(async move {
            loop {
                match orch.advance_with_cancel(&id, &cancel).await {
                    Ok(outcome) if outcome.should_continue() => {}
                    Ok(outcome) => {
                        debug!(caller, status = %outcome.status, "caller finished");
                        return Ok(());
                    }
                    Err(JobError::Cancelled) => return Ok(()),
                    Err(e) => return Err(e),
                }
            }
        });
    }

    let pb = make_progress_bar(&id[..8.min(id.len())]);
    let mut ticker = tokio::time::interval(Duration::from_millis(200));
    let mut first_error: Option<anyhow::Error> = None;
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(Ok(()))) => {}
                Some(Ok(Err(e))) => {
                    first_error.get_or_insert_with(|| anyhow::Error::new(e));
                }
                Some(Err(e)) => {
                    first_error.get_or_insert_with(|| anyhow::anyhow!("caller task failed: {e}"));
                }
            },
            _ = ticker.tick() => {
                if let Ok(view) = orch.view(id) {
                    update_progress(&pb, &view);
                }
            }
        }
    }

    let view = orch.view(id)?;
    update_progress(&pb, &view);
    pb.finish_and_clear();
    match first_error {
        Some(e) => Err(e.context(format!("job {id}"))),
        None => Ok(view),
    }
}

fn update_progress(pb: &ProgressBar, view: &JobView) {
    pb.set_length(view.total_files as u64);
    pb.set_position(view.processed_files as u64);
    pb.set_message(view.current_file.clone().unwrap_or_default());
}

async fn export_artifacts(orch: &Orchestrator, view: &JobView, dir: &Path) -> Result<usize> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    let mut written = 0;
    for result in view
        .results
        .iter()
        .filter(|r| r.status == FileStatus::Success)
    {
        let data = orch.artifact(&view.id, &result.filename).await?;
        let path = dir.join(&result.filename);
        tokio::fs::write(&path, &data)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        written += 1;
    }
    Ok(written)
}

fn failed_count(view: &JobView) -> usize {
    view.results
        .iter()
        .filter(|r| r.status == FileStatus::Failed)
        .count()
}

fn print_summary(view: &JobView, json: bool) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(view).context("serializing job view")?
        );
        return Ok(());
    }
    let failed = failed_count(view);
    println!(
        "job {}: {}  {}/{} processed, {} failed",
        view.id,
        view.status,
        view.processed_files,
        view.total_files,
        failed
    );
    if let Some(origin) = &view.retry_of {
        println!("  retry of {origin}");
    }
    for result in view
        .results
        .iter()
        .filter(|r| r.status == FileStatus::Failed)
    {
        println!(
            "  ✗ {}: {}",
            result.filename,
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

// ── `unlatch inspect` ─────────────────────────────────────────────────────────

fn cmd_inspect(path: &Path, key: &str) -> Result<()> {
    let key = DecryptionKey::parse(key).context("invalid decryption key")?;
    let mut probe = [0u8; HEADER_PROBE_LEN];
    std::fs::File::open(path)
        .with_context(|| format!("opening {}", path.display()))?
        .read_exact(&mut probe)
        .with_context(|| format!("{} is shorter than {HEADER_PROBE_LEN} bytes", path.display()))?;

    decrypt_in_place(&mut probe, &key.keystream(), 0);
    println!("file:   {}", path.display());
    println!("probe:  {}", hex(&probe));

    if !looks_like_container_header(&probe) {
        anyhow::bail!("header does not validate (wrong key?)");
    }
    let len = u32::from_be_bytes([probe[0], probe[1], probe[2], probe[3]]);
    println!(
        "header: ok ({} box, {len} bytes)",
        String::from_utf8_lossy(&probe[4..8])
    );
    Ok(())
}

// ── `unlatch keystream` ───────────────────────────────────────────────────────

fn cmd_keystream(key: &str, bytes: usize) -> Result<()> {
    let key = DecryptionKey::parse(key).context("invalid decryption key")?;
    let keystream = key.keystream();
    let shown = &keystream.as_bytes()[..bytes.min(KEYSTREAM_LEN)];
    for (row, chunk) in shown.chunks(16).enumerate() {
        println!("{:04x}  {}", row * 16, hex(chunk));
    }
    Ok(())
}

// ── `unlatch config show` ─────────────────────────────────────────────────────

fn cmd_config_show(config: &UnlatchConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!(
            "# Configuration: defaults (no file at {})",
            config_path.display()
        );
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}
