use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{error, info};
use secrecy::SecretString;

use pullgate::config::{parse_config, parse_legacy_config};
use pullgate::ctx::Ctx;
use pullgate::forge::{Capabilities, Forge};
use pullgate::github::GithubClient;
use pullgate::matcher::Matcher;
use pullgate::snapshot::{parse_maintainer, resolve, MaintainerFormat};

#[derive(Parser)]
#[command(name = "pullgate", about = "approval policy gate for pull requests")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a repository configuration file
    CheckConfig {
        path: PathBuf,
        /// Treat the file as a legacy TOML configuration
        #[arg(long)]
        legacy: bool,
    },
    /// Validate a MAINTAINERS file against the live repository
    CheckMaintainers {
        path: PathBuf,
        /// Repository the file belongs to, as owner/name
        #[arg(long)]
        repo: String,
        /// File dialect: text, hjson, toml or legacy
        #[arg(long, default_value = "text")]
        format: String,
    },
    /// Parse an approval expression and print its canonical form
    Canonicalize { expression: String },
    /// Convert a legacy configuration to the current format
    ConvertLegacy { path: PathBuf },
}

fn main() {
    init_log();
    if let Err(err) = app() {
        error!("{}", err);
        for cause in err.chain().skip(1) {
            error!("caused by: {}", cause);
        }
        std::process::exit(1);
    }
}

fn init_log() {
    let mut env = env_logger::Builder::new();
    env.filter_module("pullgate", log::LevelFilter::Info);
    if let Ok(content) = std::env::var("RUST_LOG") {
        env.parse_filters(&content);
    }
    env.init();
}

fn app() -> anyhow::Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::CheckConfig { path, legacy } => {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config = if legacy {
                parse_legacy_config(&data)?
            } else {
                parse_config(&data, &Capabilities::allow_all())?
            };
            info!(
                "{} is valid with {} approval policies",
                path.display(),
                config.approvals.len()
            );
        }
        Command::CheckMaintainers { path, repo, format } => {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let format: MaintainerFormat = format.parse()?;
            let (owner, name) = repo
                .split_once('/')
                .context("--repo must be owner/name")?;

            let forge: Arc<dyn Forge> = Arc::new(GithubClient::new(&github_token()?)?);
            let caps = forge.capabilities()?;
            let bootstrap = Ctx::new(placeholder_repo());
            let ctx = Ctx::new(forge.get_repo(&bootstrap, owner, name)?);
            let maintainer = parse_maintainer(forge.as_ref(), &ctx, &data, &ctx.repo, format)?;
            let snapshot =
                resolve::maintainer_to_snapshot(&forge, &ctx, &caps, &ctx.repo, &maintainer)?;
            info!(
                "{} is valid: {} people, {} groups",
                path.display(),
                snapshot.people.len(),
                snapshot.org.len()
            );
        }
        Command::Canonicalize { expression } => {
            let matcher = Matcher::parse(&expression)?;
            println!("{matcher}");
        }
        Command::ConvertLegacy { path } => {
            let data = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config = parse_legacy_config(&data)?;
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }
    Ok(())
}

fn github_token() -> anyhow::Result<SecretString> {
    let raw = std::env::var("GITHUB_TOKEN")
        .context("environment variable GITHUB_TOKEN is not set")?;
    Ok(SecretString::from(raw))
}

/// `Ctx` requires a repository before one has been fetched.
fn placeholder_repo() -> pullgate_data::Repo {
    pullgate_data::Repo::new("", "", false)
}
