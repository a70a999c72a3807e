use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use repple_auth::{
    AuthActions, AuthConfig, AuthError, ExternalProvider, FileStore, KeyValueStore, MemoryIdentityProvider,
    MemoryStore, SessionStore, SystemClock,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "repple-auth", about = "Run guest-session and account-upgrade flows against an in-memory identity provider")]
struct Cli {
    /// Overrides `GUEST_EXPIRATION_SECS`.
    #[arg(long)]
    guest_expiration_secs: Option<u64>,

    /// Overrides `AUTH_STORAGE_PATH`.
    #[arg(long)]
    storage_path: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ensure a guest session twice and report reuse.
    Guest,
    /// Ensure a guest, wait past expiry, and ensure again.
    Expire,
    /// Ensure a guest, then register it with email and password.
    Upgrade {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
        /// Defaults to `--password`.
        #[arg(long)]
        confirm: Option<String>,
    },
    /// Ensure a guest, then link a Google account.
    Google {
        #[arg(long, default_value = "guest@gmail.com")]
        email: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(code = e.error_code(), error = %e, "command failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), AuthError> {
    let mut config = AuthConfig::from_env();
    if let Some(secs) = cli.guest_expiration_secs {
        config.guest_expiration = Duration::from_secs(secs);
    }
    if cli.storage_path.is_some() {
        config.storage_path = cli.storage_path;
    }

    let store: Arc<dyn KeyValueStore> = match &config.storage_path {
        Some(path) => Arc::new(FileStore::open(path)?),
        None => Arc::new(MemoryStore::new()),
    };

    let mut provider = MemoryIdentityProvider::new();
    if let Command::Google { email } = &cli.command {
        provider = provider.with_external_account(ExternalProvider::Google, email.clone());
    }
    let provider = Arc::new(provider);

    let mut session = SessionStore::start(provider.as_ref());
    let mut receiver = session.subscribe();
    let watcher = tokio::spawn(async move {
        while let Some(snapshot) = receiver.next().await {
            info!(
                logged_in = snapshot.is_logged_in,
                anonymous = snapshot.identity.as_ref().is_some_and(|i| i.is_anonymous),
                id = snapshot.identity.as_ref().map_or("-", |i| i.id.as_str()),
                "session snapshot"
            );
        }
    });
    session.ready().await;

    let actions = AuthActions::from_config(provider, store, Arc::new(SystemClock), &config);
    let cancel = CancellationToken::new();
    let interrupt = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = execute(&cli.command, &actions, &config, &cancel).await;

    interrupt.abort();
    session.stop();
    if let Err(e) = watcher.await {
        warn!(error = %e, "session watcher ended abnormally");
    }
    result
}

async fn execute(
    command: &Command,
    actions: &AuthActions,
    config: &AuthConfig,
    cancel: &CancellationToken,
) -> Result<(), AuthError> {
    match command {
        Command::Guest => {
            let first = actions.ensure_guest_session(cancel).await?;
            let second = actions.ensure_guest_session(cancel).await?;
            info!(id = %second.id, reused = first.id == second.id, "guest session ensured twice");
        }
        Command::Expire => {
            let first = actions.ensure_guest_session(cancel).await?;
            let wait = config.guest_expiration + Duration::from_millis(1);
            info!(wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX), "waiting for guest to expire");
            tokio::select! {
                () = cancel.cancelled() => return Err(AuthError::Cancelled),
                () = tokio::time::sleep(wait) => {}
            }
            let second = actions.ensure_guest_session(cancel).await?;
            info!(old = %first.id, new = %second.id, replaced = first.id != second.id, "guest expiry checked");
        }
        Command::Upgrade { email, password, confirm } => {
            let guest = actions.ensure_guest_session(cancel).await?;
            let confirm = confirm.as_deref().unwrap_or(password);
            let upgraded = actions.register(email, password, confirm, cancel).await?;
            info!(id = %upgraded.id, id_preserved = guest.id == upgraded.id, "guest upgraded");
        }
        Command::Google { .. } => {
            let guest = actions.ensure_guest_session(cancel).await?;
            let linked = actions.sign_in_with_google(cancel).await?;
            info!(id = %linked.id, id_preserved = guest.id == linked.id, "guest linked to google");
        }
    }
    Ok(())
}
