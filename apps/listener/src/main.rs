use std::{
    fs,
    io::{self, BufRead, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chat_client_core::{
    load_config, Authenticator, CookieSnapshot, Credentials, EventDispatcher, Listener,
    ReqwestTransport, SecurityCodeProvider,
};
use chat_shared::domain::ThreadKind;
use clap::Parser;
use tracing::{info, warn};

#[derive(Parser, Debug)]
struct Args {
    /// TOML client configuration; defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// JSON file holding exported session cookies.
    #[arg(long, default_value = "session.json")]
    cookies: PathBuf,
    /// Sign out and drop the cookie file when the listener stops.
    #[arg(long)]
    logout: bool,
}

/// Prompts on stdout and reads one line from stdin off the async runtime.
struct StdinCodeProvider;

#[async_trait]
impl SecurityCodeProvider for StdinCodeProvider {
    async fn security_code(&self) -> Result<String> {
        tokio::task::spawn_blocking(|| -> Result<String> {
            print!("security code: ");
            io::stdout().flush()?;
            let mut line = String::new();
            io::stdin().lock().read_line(&mut line)?;
            Ok(line.trim().to_string())
        })
        .await
        .context("security code prompt task failed")?
    }
}

fn read_cookies(path: &Path) -> Option<CookieSnapshot> {
    let raw = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(snapshot) => Some(snapshot),
        Err(err) => {
            warn!("listener: ignoring unreadable cookie file {}: {err}", path.display());
            None
        }
    }
}

fn write_cookies(path: &Path, snapshot: &CookieSnapshot) -> Result<()> {
    let raw = serde_json::to_string_pretty(snapshot)?;
    fs::write(path, raw).with_context(|| format!("failed to write {}", path.display()))
}

fn credentials_from_env() -> Credentials {
    Credentials::new(
        std::env::var("CHAT_EMAIL").unwrap_or_default(),
        std::env::var("CHAT_PASSWORD").unwrap_or_default(),
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();
    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    let transport = Arc::new(ReqwestTransport::new(&config)?);
    let mut auth =
        Authenticator::with_code_provider(transport.clone(), config.clone(), Arc::new(StdinCodeProvider));

    let stored = read_cookies(&args.cookies);
    let session = auth
        .restore_or_authenticate(&credentials_from_env(), stored.as_ref())
        .await?;
    info!(
        "listener: signed in as {} via {:?}",
        session.user_id().map(|id| id.as_str()).unwrap_or("?"),
        auth.transitions()
    );
    write_cookies(&args.cookies, &session.export_cookies())?;

    let mut dispatcher = EventDispatcher::with_logging_handlers();
    dispatcher.on_message_received(|message| {
        let scope = match message.thread_kind {
            ThreadKind::User => "user",
            ThreadKind::Group => "group",
        };
        println!("[{scope} {}] {}: {}", message.thread_id, message.author_id, message.body);
        Ok(())
    });

    let mut listener = Listener::with_dispatcher(transport, config, session, dispatcher);
    let stop = listener.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("listener: interrupt received; stopping after the current cycle");
            stop.request_stop();
        }
    });

    let outcome = listener.listen().await;

    if args.logout {
        auth.logout(listener.signer_mut()).await?;
        if args.cookies.exists() {
            fs::remove_file(&args.cookies)
                .with_context(|| format!("failed to remove {}", args.cookies.display()))?;
        }
        info!("listener: signed out");
    } else {
        write_cookies(&args.cookies, &listener.export_cookies().await)?;
    }

    outcome.context("push channel failed")
}
