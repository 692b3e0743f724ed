//! Drivelink CLI - operator interface for drive credentials and media.
//!
//! Connects drive accounts, hands out access tokens and runs the media
//! resolution pipeline against the configured providers.

mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use drivelink_common::{CredentialId, UserId};
use drivelink_credentials::{
    ConnectService, CredentialStore, EphemeralStateCache, SqliteCredentialStore,
    TokenLifecycleManager,
};
use drivelink_crypto::{TokenKey, XChaChaTokenCipher};
use drivelink_media::{MediaReference, MediaResolver};
use drivelink_storage::{create_default_registry, Capability, ProviderRegistry};

use crate::config::AppConfig;

#[derive(Parser)]
#[command(name = "drivelink")]
#[command(about = "Drivelink - cloud drive credentials and media resolution")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// JSON configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a token encryption key.
    Keygen,

    /// List registered providers.
    Providers,

    /// Start connecting a drive account and print the authorization URL.
    ConnectUrl {
        /// Provider identifier (gdrive, dropbox).
        #[arg(short, long)]
        provider: String,

        /// Owning user.
        #[arg(short, long)]
        user: String,
    },

    /// Finish connecting with the callback parameters.
    Connect {
        #[arg(short, long)]
        provider: String,

        /// `state` from the callback.
        #[arg(short, long)]
        state: String,

        /// `code` from the callback.
        #[arg(long)]
        code: String,
    },

    /// Obtain a valid access token, refreshing it if needed.
    Token {
        #[arg(short = 'i', long)]
        credential: String,

        #[arg(short, long)]
        user: String,

        /// Print the token itself.
        #[arg(long)]
        reveal: bool,
    },

    /// List files in a connected drive.
    List {
        #[arg(short = 'i', long)]
        credential: String,

        #[arg(short, long)]
        user: String,

        /// Folder id; the drive root when omitted.
        #[arg(short, long)]
        folder: Option<String>,

        /// Page token from a previous listing.
        #[arg(long)]
        page: Option<String>,
    },

    /// Resolve media references for publishing.
    Resolve {
        #[arg(short, long)]
        user: String,

        /// Reference paths (URLs or integration/{credential}/file/{file}).
        paths: Vec<String>,

        /// JSON file holding an array of media references.
        #[arg(long, conflicts_with = "paths")]
        json: Option<PathBuf>,

        /// Delete local copies after printing the result.
        #[arg(long)]
        cleanup: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging; RUST_LOG takes precedence over --verbose
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.as_str().to_lowercase()));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen => cmd_keygen(),
        Commands::Providers => cmd_providers(&config),
        Commands::ConnectUrl { provider, user } => cmd_connect_url(&config, &provider, &user).await,
        Commands::Connect {
            provider,
            state,
            code,
        } => cmd_connect(&config, &provider, &state, &code).await,
        Commands::Token {
            credential,
            user,
            reveal,
        } => cmd_token(&config, &credential, &user, reveal).await,
        Commands::List {
            credential,
            user,
            folder,
            page,
        } => cmd_list(&config, &credential, &user, folder.as_deref(), page.as_deref()).await,
        Commands::Resolve {
            user,
            paths,
            json,
            cleanup,
        } => cmd_resolve(&config, &user, paths, json, cleanup).await,
    }
}

/// Services opened from the configuration.
struct Services {
    registry: Arc<ProviderRegistry>,
    store: Arc<SqliteCredentialStore>,
    lifecycle: Arc<TokenLifecycleManager>,
}

impl Services {
    fn open(config: &AppConfig) -> Result<Self> {
        let registry = Arc::new(
            create_default_registry(config.gdrive.clone(), config.dropbox.clone())
                .context("Failed to create provider registry")?,
        );

        let db_path = config.database_path()?;
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let store = Arc::new(
            SqliteCredentialStore::open(&db_path).context("Failed to open credential store")?,
        );
        let cipher = Arc::new(XChaChaTokenCipher::new(config.token_key()?));
        let lifecycle = Arc::new(TokenLifecycleManager::new(
            store.clone(),
            registry.clone(),
            cipher,
            config.lifecycle.clone(),
        ));

        Ok(Self {
            registry,
            store,
            lifecycle,
        })
    }

    fn connect_service(&self, config: &AppConfig) -> Result<ConnectService> {
        let cipher = Arc::new(XChaChaTokenCipher::new(config.token_key()?));
        let states = EphemeralStateCache::new(self.store.clone());
        Ok(ConnectService::new(self.registry.clone(), self.store.clone(), cipher, states)
            .with_state_ttl(config.state_ttl()))
    }

    /// Look up a live credential of `user` and return its provider name.
    async fn owned_provider(&self, credential: &CredentialId, user: &UserId) -> Result<String> {
        let record = self
            .store
            .find_credential(credential, user)
            .await?
            .with_context(|| format!("No credential {} for user {}", credential, user))?;
        Ok(record.provider)
    }
}

fn parse_ids(credential: &str, user: &str) -> Result<(CredentialId, UserId)> {
    Ok((
        CredentialId::new(credential).context("Invalid credential id")?,
        UserId::new(user).context("Invalid user id")?,
    ))
}

/// Print a fresh base64 encryption key.
fn cmd_keygen() -> Result<()> {
    println!("{}", TokenKey::generate().to_base64());
    Ok(())
}

/// Show providers, whether they are configured, and their capabilities.
fn cmd_providers(config: &AppConfig) -> Result<()> {
    let registry = create_default_registry(config.gdrive.clone(), config.dropbox.clone())
        .context("Failed to create provider registry")?;

    println!("Providers:");
    for name in registry.providers() {
        let provider = registry.get(&name)?;
        let status = if provider.is_configured() {
            "configured"
        } else {
            "not configured"
        };
        let capabilities: Vec<&str> = provider
            .capabilities()
            .enabled()
            .iter()
            .map(Capability::as_str)
            .collect();
        println!("  {} ({})", name, status);
        if !capabilities.is_empty() {
            println!("    capabilities: {}", capabilities.join(", "));
        }
    }
    Ok(())
}

/// Begin the authorization handshake.
async fn cmd_connect_url(config: &AppConfig, provider: &str, user: &str) -> Result<()> {
    let owner = UserId::new(user).context("Invalid user id")?;
    let services = Services::open(config)?;
    let request = services
        .connect_service(config)?
        .begin(provider, &owner)
        .await
        .context("Failed to start authorization")?;

    println!("Open this URL to authorize {}:", provider);
    println!("  {}", request.authorization_url);
    println!();
    println!("Then run:");
    println!(
        "  drivelink connect --provider {} --state {} --code <code>",
        provider, request.state
    );
    Ok(())
}

/// Complete the authorization handshake.
async fn cmd_connect(config: &AppConfig, provider: &str, state: &str, code: &str) -> Result<()> {
    let services = Services::open(config)?;
    let record = services
        .connect_service(config)?
        .complete(provider, state, code)
        .await
        .context("Failed to connect account")?;

    info!(credential_id = %record.id, provider, "Account connected");
    println!("Connected {} account.", provider);
    println!("  Credential: {}", record.id);
    println!("  Owner: {}", record.owner_user_id);
    if !record.email.is_empty() {
        println!("  Email: {}", record.email);
    }
    if !record.has_refresh_token() {
        println!("  Note: no refresh token issued; reconnect when the token expires.");
    }
    Ok(())
}

/// Get a valid access token.
async fn cmd_token(config: &AppConfig, credential: &str, user: &str, reveal: bool) -> Result<()> {
    let (id, owner) = parse_ids(credential, user)?;
    let services = Services::open(config)?;
    services.owned_provider(&id, &owner).await?;

    let token = services
        .lifecycle
        .get_access_token(&id)
        .await
        .context("Failed to obtain access token")?;

    if reveal {
        println!("{}", token.expose());
    } else {
        println!("Access token valid ({} characters).", token.expose().len());
    }
    Ok(())
}

/// List one page of a folder.
async fn cmd_list(
    config: &AppConfig,
    credential: &str,
    user: &str,
    folder: Option<&str>,
    page: Option<&str>,
) -> Result<()> {
    let (id, owner) = parse_ids(credential, user)?;
    let services = Services::open(config)?;
    let provider_name = services.owned_provider(&id, &owner).await?;
    let provider = services.registry.get(&provider_name)?;
    let token = services
        .lifecycle
        .get_access_token(&id)
        .await
        .context("Failed to obtain access token")?;

    let listing = provider
        .list_files(token.expose(), folder, page)
        .await
        .context("Failed to list files")?;

    if listing.files.is_empty() {
        println!("Folder is empty.");
    }
    for file in &listing.files {
        if file.is_folder {
            println!("  [DIR]  {}/  ({})", file.name, file.id);
        } else {
            println!(
                "  [FILE] {} ({} bytes, {})  ({})",
                file.name, file.size_bytes, file.mime_type, file.id
            );
        }
    }
    if let Some(next) = listing.next_page_token {
        println!("\nMore results: --page {}", next);
    }
    Ok(())
}

/// Resolve references and print them as JSON.
async fn cmd_resolve(
    config: &AppConfig,
    user: &str,
    paths: Vec<String>,
    json: Option<PathBuf>,
    cleanup: bool,
) -> Result<()> {
    let owner = UserId::new(user).context("Invalid user id")?;
    let references: Vec<MediaReference> = match json {
        Some(path) => {
            let raw = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            serde_json::from_str(&raw).context("Invalid media reference JSON")?
        }
        None => paths.into_iter().map(MediaReference::new).collect(),
    };
    if references.is_empty() {
        anyhow::bail!("No media references given");
    }

    let services = Services::open(config)?;
    let resolver = MediaResolver::new(services.lifecycle.clone(), config.resolver.clone());
    let resolved = resolver
        .resolve_media(references, &owner)
        .await
        .context("Failed to resolve media")?;

    println!("{}", serde_json::to_string_pretty(&resolved.references)?);

    if cleanup {
        resolved.cleanup.cleanup();
        info!(count = resolved.cleanup.artifacts().len(), "Local copies removed");
    }
    Ok(())
}
