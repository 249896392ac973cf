use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use miette::{IntoDiagnostic, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use warden_audit::audit_log::{AuditLog, FileAuditLog, NullAuditLog};
use warden_audit::oracle::LlmOracle;
use warden_audit::pipeline::AuditPipeline;
use warden_audit::source::DocumentSource;
use warden_core::{OutputFormat, WardenConfig};

const CONFIG_FILE: &str = ".warden.toml";

#[derive(Parser)]
#[command(
    name = "warden",
    version,
    about = "Two-pass AI security auditing",
    long_about = "Warden audits source documents with two model calls per finding.\n\n\
                   A proposer pass looks for a critical issue, then a validator pass\n\
                   confirms or rejects it. Only validated findings count as confirmed.\n\n\
                   Examples:\n  \
                     warden audit contracts/Vault.sol          Audit one document\n  \
                     warden audit src/*.sol --concurrency 4    Audit many, four at a time\n  \
                     warden audit Vault.sol --format json      Machine-readable report\n  \
                     warden init                               Create a .warden.toml"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file (default: .warden.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        global = true,
        default_value = "text",
        long_help = "Output format for the audit report.\n\n\
                       Formats:\n  \
                         text      Human-readable summary (default)\n  \
                         json      Machine-readable JSON with camelCase keys\n  \
                         markdown  GitHub-flavored Markdown"
    )]
    format: OutputFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Audit documents with the proposer/validator pipeline
    #[command(long_about = "Audit documents with the proposer/validator pipeline.\n\n\
        Each document is audited once per configured category. Failed oracle calls and\n\
        malformed answers are retried with exponential backoff; a task that runs out of\n\
        attempts is reported under errors without stopping the run.\n\n\
        Examples:\n  warden audit Vault.sol\n  warden audit a.sol b.sol --max-retries 3 --log-dir audit-logs\n  warden audit Vault.sol --fail-on-validated")]
    Audit {
        /// Documents to audit
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Maximum tasks in flight (default: 16)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Attempts per stage before a task fails (default: 5)
        #[arg(long)]
        max_retries: Option<u32>,

        /// Wall-clock limit per task in seconds
        #[arg(long)]
        task_deadline: Option<u64>,

        /// Directory for prompt/response audit logs (default: logs)
        #[arg(long)]
        log_dir: Option<PathBuf>,

        /// Do not write audit logs
        #[arg(long)]
        no_audit_log: bool,

        /// Exit with code 1 if any finding is validated
        #[arg(long)]
        fail_on_validated: bool,
    },
    /// Create a default .warden.toml configuration file
    #[command(long_about = "Create a default .warden.toml configuration file.\n\n\
        Generates a commented-out template with all available options.\n\
        Fails if .warden.toml already exists.")]
    Init,
    /// Generate shell completion scripts
    #[command(hide = true)]
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

const DEFAULT_CONFIG: &str = r#"# Warden Configuration

[oracle]
# OpenAI-compatible chat completions endpoint
# provider = "openai"
# model = "gpt-4o"
# base_url = "https://api.openai.com"
# timeout_secs = 120
# proposer_temperature = 0.7
# validator_temperature = 0.4
# max_tokens = 4096

[pipeline]
# concurrency = 16
# max_retries = 5
# backoff_unit_ms = 1000
# task_deadline_secs = 900
# categories = ["common"]

[audit_log]
# enabled = true
# dir = "logs"
"#;

fn load_config(path: Option<&Path>) -> Result<WardenConfig> {
    let config = match path {
        Some(path) => WardenConfig::from_file(path)?,
        None => {
            let default_path = Path::new(CONFIG_FILE);
            if default_path.exists() {
                WardenConfig::from_file(default_path)?
            } else {
                WardenConfig::default()
            }
        }
    };
    Ok(config.with_env(|key| std::env::var(key).ok()))
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "warden=debug,warden_audit=debug,warden_core=debug"
    } else {
        "warden=info,warden_audit=info,warden_core=info"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| fallback.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .build(),
        )
    }))
    .into_diagnostic()?;
    human_panic::setup_panic!();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        None => {
            Cli::command().print_help().into_diagnostic()?;
        }
        Some(Command::Audit {
            ref files,
            concurrency,
            max_retries,
            task_deadline,
            ref log_dir,
            no_audit_log,
            fail_on_validated,
        }) => {
            let mut config = load_config(cli.config.as_deref())?;
            if let Some(k) = concurrency {
                config.pipeline.concurrency = k;
            }
            if let Some(r) = max_retries {
                config.pipeline.max_retries = r;
            }
            if task_deadline.is_some() {
                config.pipeline.task_deadline_secs = task_deadline;
            }
            if let Some(dir) = log_dir {
                config.audit_log.dir = dir.clone();
            }
            if no_audit_log {
                config.audit_log.enabled = false;
            }
            config.validate()?;
            tracing::debug!(
                format = %cli.format,
                model = %config.oracle.model,
                concurrency = config.pipeline.concurrency,
                max_retries = config.pipeline.max_retries,
                audit_log = config.audit_log.enabled,
                "configuration loaded"
            );

            if config.oracle.api_key.is_none() && config.oracle.base_url.is_none() {
                miette::bail!(miette::miette!(
                    help = "Set WARDEN_API_KEY or OPENAI_API_KEY, or add api_key under [oracle] in your .warden.toml",
                    "No API key configured for oracle provider '{}'",
                    config.oracle.provider
                ));
            }

            let source = DocumentSource::open(files, config.pipeline.categories.clone())?;
            let task_count = source.task_count();

            let oracle = Arc::new(LlmOracle::new(&config.oracle)?);
            let audit_log: Arc<dyn AuditLog> = if config.audit_log.enabled {
                Arc::new(FileAuditLog::new(config.audit_log.dir.clone()))
            } else {
                Arc::new(NullAuditLog)
            };
            let pipeline = AuditPipeline::from_config(&config, oracle, audit_log);

            let spinner = if std::io::stderr().is_terminal() {
                let pb = indicatif::ProgressBar::new_spinner();
                if let Ok(style) =
                    indicatif::ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
                {
                    pb.set_style(style);
                }
                pb.set_message(format!(
                    "Auditing {task_count} task(s), {} at a time...",
                    pipeline.concurrency()
                ));
                pb.enable_steady_tick(std::time::Duration::from_millis(120));
                Some(pb)
            } else {
                None
            };

            let report = pipeline.run(source).await;

            if let Some(pb) = spinner {
                pb.finish_with_message("Done");
            }

            match cli.format {
                OutputFormat::Json => {
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&report).into_diagnostic()?
                    );
                }
                OutputFormat::Markdown => print!("{}", report.to_markdown()),
                OutputFormat::Text => print!("{report}"),
            }

            if fail_on_validated && report.stats.validated > 0 {
                std::process::exit(1);
            }
        }
        Some(Command::Init) => {
            let path = Path::new(CONFIG_FILE);
            if path.exists() {
                miette::bail!("{CONFIG_FILE} already exists");
            }
            std::fs::write(path, DEFAULT_CONFIG).into_diagnostic()?;
            println!("Created {CONFIG_FILE} with default configuration");
        }
        Some(Command::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "warden", &mut std::io::stdout());
        }
    }

    Ok(())
}
