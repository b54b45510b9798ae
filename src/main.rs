//! gh-app-auth CLI - git credentials for GitHub Apps and stored tokens
//!
//! Configure it as a git credential helper:
//!
//! ```text
//! git config --global credential.helper "gh-app-auth"
//! git config --global credential.useHttpPath true
//! ```
//!
//! Run `gh-app-auth --help` for the remaining commands.

use clap::{Parser, Subcommand};
use gh_app_auth::assertion::PrivateKey;
use gh_app_auth::clock::SystemClock;
use gh_app_auth::config::{Config, ConfigError, CONFIG_ENV};
use gh_app_auth::engine::Engine;
use gh_app_auth::host::GitHubClient;
use gh_app_auth::protocol::{format_response, CredentialRequest};
use gh_app_auth::storage::{FileBackend, KeyringBackend, SecretKind, SecretStore};
use gh_app_auth::{Error, IdentityKind, KeySource, Secret};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncWriteExt, BufReader};
use tokio::task::JoinSet;
use tracing::{debug, error};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zeroize::Zeroizing;

/// How long to wait for stuck blocking work (a hung keyring) at exit
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(
    name = "gh-app-auth",
    about = "Git credential helper for GitHub Apps and stored tokens",
    version
)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Answer a git credential request on stdin
    Get,

    /// Accept a git store request (ignored)
    Store,

    /// Accept a git erase request (ignored)
    Erase,

    /// Show which identity would serve a URL
    Resolve {
        /// Repository URL
        url: String,
    },

    /// Fetch credentials for URLs and print their fingerprints
    Test {
        /// Repository URLs
        #[arg(required = true)]
        urls: Vec<String>,
    },

    /// Manage stored secrets
    Secret {
        #[command(subcommand)]
        command: SecretCommands,
    },

    /// List configured identities
    List,
}

#[derive(Subcommand)]
enum SecretCommands {
    /// Store a private key or access token
    Set {
        /// Identity name
        name: String,

        /// Secret kind (private_key, access_token)
        #[arg(short, long)]
        kind: SecretKind,

        /// Read the value from a file instead of prompting
        #[arg(long)]
        from_file: Option<PathBuf>,
    },

    /// Remove a stored secret from every backend
    Delete {
        /// Identity name
        name: String,

        /// Secret kind (private_key, access_token)
        #[arg(short, long)]
        kind: SecretKind,
    },

    /// Check whether the OS keyring is usable
    Probe,
}

type CliResult<T = ()> = Result<T, Error>;

fn main() -> ExitCode {
    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("gh-app-auth: failed to start runtime: {}", e);
            return ExitCode::FAILURE;
        }
    };
    let result = runtime.block_on(run(cli));
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("gh-app-auth: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult {
    let config = load_config(cli.config.clone()).await?;
    init_logging(cli.verbose, &config);

    match cli.command {
        Commands::Get => credential_get(config).await?,
        Commands::Store | Commands::Erase => drain_request().await?,
        Commands::Resolve { url } => resolve_url(config, url)?,
        Commands::Test { urls } => test_urls(config, urls).await?,
        Commands::Secret { command } => match command {
            SecretCommands::Set {
                name,
                kind,
                from_file,
            } => set_secret(config, name, kind, from_file).await?,
            SecretCommands::Delete { name, kind } => delete_secret(config, name, kind).await?,
            SecretCommands::Probe => probe_secrets(config).await,
        },
        Commands::List => list_identities(&config),
    }

    Ok(())
}

/// Load the explicit config, else the default one if it exists
async fn load_config(explicit: Option<PathBuf>) -> Result<Config, ConfigError> {
    let explicit = explicit.or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from));
    match explicit {
        Some(path) => Config::load(path).await,
        None => match Config::load(Config::default_path()).await {
            Err(ConfigError::NotFound(_)) => Ok(Config::default()),
            other => other,
        },
    }
}

/// Logs go to stderr; stdout belongs to git
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 => config.logging.level.as_str(),
        1 => "debug",
        _ => "trace",
    };
    let filter = if verbose == 0 {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
    } else {
        EnvFilter::new(level)
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn secret_store(config: &Config) -> Arc<SecretStore> {
    let storage = &config.storage;
    Arc::new(
        SecretStore::new(
            Arc::new(KeyringBackend::new(&storage.keyring_service)),
            Arc::new(FileBackend::new(&storage.dir)),
        )
        .with_timeout(storage.timeout),
    )
}

fn build_engine(config: Config) -> CliResult<Engine> {
    let secrets = secret_store(&config);
    let host = Arc::new(GitHubClient::new(&config.host)?);
    Ok(Engine::from_config(
        config,
        secrets,
        host,
        Arc::new(SystemClock),
    )?)
}

async fn credential_get(config: Config) -> CliResult {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let request = CredentialRequest::read_from(&mut stdin).await?;

    let Some(target) = request.target() else {
        debug!(?request, "request is not for an http repository, abstaining");
        return Ok(());
    };

    let engine = build_engine(config)?;
    let result = engine.resolve_target(&target).await;
    engine.shutdown().await;

    let resolved = match result {
        Ok(Some(resolved)) => resolved,
        Ok(None) => return Ok(()),
        Err(e) => {
            error!(identity = e.identity(), stage = %e.stage(), "{}", e);
            return Err(e.into());
        }
    };

    let response = Zeroizing::new(format_response(&resolved.credential)?);
    let mut stdout = tokio::io::stdout();
    stdout.write_all(response.as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}

/// Read and discard a request so git never sees a closed pipe
async fn drain_request() -> CliResult {
    let mut stdin = BufReader::new(tokio::io::stdin());
    CredentialRequest::read_from(&mut stdin).await?;
    Ok(())
}

fn resolve_url(config: Config, url: String) -> CliResult {
    let engine = build_engine(config)?;
    match engine.route(&url) {
        Some(route) => {
            println!("{}", route.identity.name);
            if !route.conflicts.is_empty() {
                eprintln!(
                    "warning: equally specific identities with the same priority: {}",
                    route.conflicts.join(", ")
                );
            }
        }
        None => eprintln!("No identity matches {}", url),
    }
    Ok(())
}

async fn test_urls(config: Config, urls: Vec<String>) -> CliResult {
    let engine = Arc::new(build_engine(config)?);

    let mut tasks = JoinSet::new();
    for (index, url) in urls.iter().enumerate() {
        let engine = Arc::clone(&engine);
        let url = url.clone();
        tasks.spawn(async move { (index, engine.resolve(&url).await) });
    }

    let mut results = Vec::with_capacity(urls.len());
    while let Some(joined) = tasks.join_next().await {
        results.push(joined?);
    }
    results.sort_by_key(|(index, _)| *index);

    let mut failed = 0;
    println!("{:<45} {:<20} {:<16} {}", "URL", "IDENTITY", "USERNAME", "FINGERPRINT");
    println!("{}", "-".repeat(95));
    for (index, result) in results {
        let url = &urls[index];
        match result {
            Ok(Some(resolved)) => println!(
                "{:<45} {:<20} {:<16} {}",
                url,
                resolved.identity,
                resolved.credential.username,
                resolved.credential.secret.fingerprint()
            ),
            Ok(None) => println!("{:<45} {:<20}", url, "-"),
            Err(e) => {
                failed += 1;
                println!("{:<45} {:<20} error: {}", url, e.identity(), e);
            }
        }
    }

    let stats = engine.stats();
    debug!(
        exchanges = stats.exchanges,
        cache_hits = stats.cache_hits,
        discoveries = stats.discoveries,
        "test finished"
    );
    engine.shutdown().await;

    if failed > 0 {
        return Err(Error::InvalidRequest(format!(
            "{} of {} URLs failed",
            failed,
            urls.len()
        )));
    }
    Ok(())
}

async fn set_secret(
    config: Config,
    name: String,
    kind: SecretKind,
    from_file: Option<PathBuf>,
) -> CliResult {
    let value = match from_file {
        Some(path) => Zeroizing::new(tokio::fs::read_to_string(&path).await?),
        None if kind == SecretKind::PrivateKey => {
            return Err(Error::InvalidRequest(
                "private keys must be read with --from-file".to_string(),
            ))
        }
        None => Zeroizing::new(rpassword::prompt_password(format!(
            "Enter {} for '{}': ",
            kind, name
        ))?),
    };

    let value = match kind {
        SecretKind::PrivateKey => {
            PrivateKey::from_pem(&value)?;
            Secret::new(value.as_str())
        }
        SecretKind::AccessToken => Secret::new(value.trim()),
    };
    if value.is_empty() {
        return Err(Error::InvalidRequest(
            "refusing to store an empty secret".to_string(),
        ));
    }

    let store = secret_store(&config);
    let backend = store.store(&name, kind, &value).await?;
    println!(
        "Stored {} for '{}' in the {} backend (fingerprint {})",
        kind,
        name,
        backend,
        value.fingerprint()
    );
    Ok(())
}

async fn delete_secret(config: Config, name: String, kind: SecretKind) -> CliResult {
    secret_store(&config).delete(&name, kind).await?;
    println!("Deleted {} for '{}'", kind, name);
    Ok(())
}

async fn probe_secrets(config: Config) {
    if secret_store(&config).available().await {
        println!("OS keyring available (service '{}')", config.storage.keyring_service);
    } else {
        println!(
            "OS keyring unavailable; secrets will be stored in {}",
            config.storage.dir.display()
        );
    }
}

fn list_identities(config: &Config) {
    if config.identities.is_empty() {
        println!("No identities configured");
        return;
    }

    println!("{:<20} {:<6} {:<9} {:<30} {}", "NAME", "KIND", "PRIORITY", "SOURCE", "PATTERNS");
    println!("{}", "-".repeat(95));
    for identity in &config.identities {
        let source = match &identity.kind {
            IdentityKind::App(app) => {
                let key = match &app.private_key {
                    KeySource::File(path) => path.display().to_string(),
                    KeySource::Store => "store".to_string(),
                };
                match app.installation_id {
                    Some(id) => format!("app {} inst {} ({})", app.app_id, id, key),
                    None => format!("app {} ({})", app.app_id, key),
                }
            }
            IdentityKind::StaticToken { username } => {
                format!("user {}", username.as_deref().unwrap_or(gh_app_auth::DEFAULT_USERNAME))
            }
        };
        let patterns: Vec<&str> = identity.patterns.iter().map(|p| p.as_str()).collect();
        println!(
            "{:<20} {:<6} {:<9} {:<30} {}",
            identity.name,
            identity.kind.label(),
            identity.priority,
            source,
            patterns.join(", ")
        );
    }
}
