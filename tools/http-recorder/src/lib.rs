pub mod anonymizer;
pub mod config;
pub mod content;
pub mod context;
pub mod errors;
pub mod har;
pub mod log_retention;
pub mod logging;
pub mod matcher;
pub mod mode;
pub mod model;
pub mod recorder;
pub mod store;
pub mod transport;

pub use anonymizer::{InteractionAnonymizer, RulesAnonymizer};
pub use context::{RecorderContext, RecorderContextGuard};
pub use errors::RecorderError;
pub use matcher::{HeaderComparison, RequestMatcher, RulesMatcher, UriPart};
pub use mode::{EffectiveMode, EnvMap, RecorderMode};
pub use model::{HttpRequest, HttpResponse, Interaction, InteractionMessage};
pub use recorder::HttpRecorder;
pub use store::{HarInteractionStore, InteractionStore};
pub use transport::{FakeHttpHandler, HttpHandler};

use clap::{error::ErrorKind, Parser, Subcommand};
use config::load_config;
use logging::{append_run_log, init_run_logger};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Parser)]
#[command(name = "http-recorder")]
#[command(about = "Inspect and maintain recorded HTTP interaction archives")]
#[command(version)]
pub struct Cli {
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// List the entries of an archive.
    Inspect {
        /// Interaction name; `.har` is appended when it has no extension.
        name: String,
    },
    /// Redact query parameters and headers in an existing archive.
    Anonymize {
        name: String,
        #[arg(long = "query")]
        query: Vec<String>,
        #[arg(long = "header")]
        header: Vec<String>,
        #[arg(long)]
        replacement: Option<String>,
    },
}

pub fn run() -> Result<i32, RecorderError> {
    let args = std::env::args_os().collect::<Vec<_>>();
    let env = mode::process_env();
    let cwd = std::env::current_dir().map_err(|e| RecorderError::Io(e.to_string()))?;
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    run_with_args(&args, &env, &cwd, &mut out)
}

pub fn run_with_args(
    args: &[std::ffi::OsString],
    env: &EnvMap,
    cwd: &Path,
    out: &mut dyn Write,
) -> Result<i32, RecorderError> {
    let cli = match Cli::try_parse_from(args) {
        Ok(cli) => cli,
        Err(error) => match error.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                write!(out, "{error}").map_err(|e| RecorderError::Io(e.to_string()))?;
                return Ok(0);
            }
            _ => return Err(RecorderError::Cli(error.to_string())),
        },
    };

    let config_path = cli.config.as_ref().map(|path| {
        if path.is_absolute() {
            path.clone()
        } else {
            cwd.join(path)
        }
    });
    let cfg = load_config(config_path.as_deref(), env, cwd)?;
    if let Some(logger) = cfg.run_logger() {
        init_run_logger(logger);
    }
    let store = HarInteractionStore::with_base_dir(
        cfg.archive_dir.clone().unwrap_or_else(|| cwd.to_path_buf()),
    );

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| RecorderError::Io(e.to_string()))?;

    match cli.command {
        Command::Inspect { name } => {
            let interaction = runtime.block_on(store.load(&name))?;
            write_inspection(out, &store.resolve_path(&name)?, &interaction)?;
        }
        Command::Anonymize {
            name,
            query,
            header,
            replacement,
        } => {
            let mut anonymize = cfg.anonymize.clone();
            if let Some(replacement) = replacement {
                anonymize.replacement = replacement;
            }
            anonymize.query_parameters.extend(query);
            anonymize.headers.extend(header);
            let anonymizer = config::RecorderConfig {
                anonymize,
                ..cfg.clone()
            }
            .anonymizer()?;

            let written = runtime.block_on(async {
                let interaction = store.load(&name).await?;
                let anonymized = anonymizer.anonymize(interaction).await?;
                store.store(anonymized).await
            })?;
            append_run_log(
                "info",
                "cli.anonymize",
                json!({"name": name, "entries": written.len(), "rules": anonymizer.rule_count()}),
            );
            writeln!(
                out,
                "anonymized {} entries in {}",
                written.len(),
                store.resolve_path(&name)?.display()
            )
            .map_err(|e| RecorderError::Io(e.to_string()))?;
        }
    }

    Ok(0)
}

fn write_inspection(
    out: &mut dyn Write,
    path: &Path,
    interaction: &Interaction,
) -> Result<(), RecorderError> {
    let io = |e: std::io::Error| RecorderError::Io(e.to_string());
    writeln!(out, "{} ({} entries)", path.display(), interaction.len()).map_err(io)?;
    for (index, message) in interaction.messages().iter().enumerate() {
        let request = message.request();
        let body = message.response_body();
        writeln!(
            out,
            "{index:>3}  {:<7} {} {:>8}B  {}  {}",
            request.method.as_str(),
            message.status().as_u16(),
            body.len(),
            short_digest(body),
            request.url
        )
        .map_err(io)?;
    }
    Ok(())
}

fn short_digest(body: &[u8]) -> String {
    Sha256::digest(body)
        .iter()
        .take(6)
        .map(|byte| format!("{byte:02x}"))
        .collect()
}
