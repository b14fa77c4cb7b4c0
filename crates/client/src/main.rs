//! Homelink - command-line session monitor
//!
//! Connects to the hub, prints connection status changes and state changes
//! until Ctrl-C.
//!
//! Credentials come from `HOMELINK_SERVER_URL` / `HOMELINK_ACCESS_TOKEN`,
//! or from the secrets file in the platform config directory.

use anyhow::{Context, Result};
use chrono::Local;
use homelink_client::credentials::{EnvCredentials, SecretsFile};
use homelink_client::{logging, CredentialProvider, Session, SessionConfig};
use homelink_shared::Event;

fn credentials() -> Result<Box<dyn CredentialProvider>> {
    if std::env::var_os(homelink_client::credentials::ENV_ACCESS_TOKEN).is_some() {
        return Ok(Box::new(EnvCredentials));
    }
    let path = SecretsFile::default_path().context("no config directory on this platform")?;
    let secrets = SecretsFile::load(&path)
        .with_context(|| format!("no credentials in the environment or {}", path.display()))?;
    Ok(Box::new(secrets))
}

fn print_event(event: &Event) {
    let now = Local::now().format("%H:%M:%S");
    match event.state_changed() {
        Some(change) => {
            let old = change.old_state.as_ref().map_or("-", |s| s.state.as_str());
            let new = change.new_state.as_ref().map_or("-", |s| s.state.as_str());
            println!("{now} {}: {old} -> {new}", change.entity_id);
        }
        None => println!("{now} {}", event.event_type),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init(&format!("{},homelink=info", logging::DEFAULT_FILTER));

    let provider = credentials()?;
    let session = Session::with_websocket(provider.as_ref(), SessionConfig::from_env())
        .context("cannot build session")?;

    session.add_listener(print_event);

    let mut status = session.watch_status();
    tokio::spawn(async move {
        while status.changed().await.is_ok() {
            let current = status.borrow_and_update().clone();
            tracing::info!(
                "Status: {:?}/{:?} (attempt {}{})",
                current.connection,
                current.auth,
                current.reconnect_attempt,
                if current.unreachable { ", unreachable" } else { "" }
            );
        }
    });

    let connected = session.connect();
    tokio::select! {
        result = connected => {
            result.context("cannot connect to the hub")?;
            let states = session.get_states().await.context("cannot load states")?;
            println!("{} entities", states.len());
            tokio::signal::ctrl_c().await?;
        }
        _ = tokio::signal::ctrl_c() => {}
    }

    session.shutdown().await;
    Ok(())
}
