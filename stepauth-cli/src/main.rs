use std::path::PathBuf;
use std::sync::Arc;
use anyhow::Context;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

use stepauth_common::models::SignInRequest;
use stepauth_core::backend::{InMemoryBackendFactory, UserDirectory};
use stepauth_core::challenge::EventChannelHandler;
use stepauth_core::{ClientConfig, SessionRegistry};

mod console;

#[derive(Parser, Debug, Clone)]
#[command(name = "stepauth")]
#[command(author, version, about = "Interactive multi-step sign-in against a local user directory")]
struct Args {
    /// Named session to sign in on. Omit for the default session.
    #[arg(long)]
    session: Option<String>,

    /// Username to start with. Prompted for when omitted.
    #[arg(long)]
    username: Option<String>,

    /// JSON file with the user directory. A small demo directory is used when omitted.
    #[arg(long)]
    directory: Option<PathBuf>,

    /// How many challenge events may queue up before new ones are rejected.
    #[arg(long, default_value_t = 16)]
    event_capacity: usize,
}

fn init_tracing() -> anyhow::Result<()> {
    tracing_log::LogTracer::init().context("failed to bridge log records")?;
    let filter = EnvFilter::from_default_env()
        .add_directive("stepauth=info".parse().unwrap_or_default());
    let sub = fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(sub).context("failed to set global subscriber")?;
    Ok(())
}

fn load_directory(path: Option<&PathBuf>) -> anyhow::Result<UserDirectory> {
    match path {
        Some(path) => {
            let json = std::fs::read_to_string(path)
                .with_context(|| format!("reading user directory {}", path.display()))?;
            Ok(UserDirectory::from_json(&json)?)
        }
        None => Ok(console::demo_directory()),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing()?;
    let args = Args::parse();
    info!(session = ?args.session, username = ?args.username, "stepauth starting");

    let config = ClientConfig::from_env()?;
    let directory = Arc::new(load_directory(args.directory.as_ref())?);
    info!(users = directory.len(), "user directory loaded");

    let registry = SessionRegistry::new(config, Arc::new(InMemoryBackendFactory::new(directory)));
    let orchestrator = registry.lookup_or_create(args.session.as_deref())?;

    let (handler, events) = EventChannelHandler::channel(args.event_capacity.max(1));
    orchestrator.register_handler(Arc::new(handler))?;

    let request = SignInRequest {
        username: args.username.clone(),
        ..SignInRequest::default()
    };
    let flow = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.begin_flow(request).await })
    };

    let result = console::drive(&orchestrator, events, flow).await;
    registry.teardown();

    match result {
        Ok(outcome) => {
            println!(
                "Signed in as {} at {} ({} step(s)).",
                outcome.username,
                outcome.signed_in_at.to_rfc3339(),
                outcome.completed_steps.len()
            );
            Ok(())
        }
        Err(e) => {
            error!("Sign-in failed: {:#}", e);
            Err(e)
        }
    }
}
