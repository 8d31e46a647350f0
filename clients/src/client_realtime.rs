use std::io::BufRead;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lib_realtime::credentials::RefreshClient;
use lib_realtime::loggers::setup_logging;
use lib_realtime::{
    ConnectionManager, CredentialSource, CredentialStore, FileBacklogStore, WireMessage,
};
use tokio::signal;
use tokio::sync::mpsc;

mod realtime_logic;
use realtime_logic::config::{self, Config};
use realtime_logic::console::{self, ConsoleCommand};

fn credential_store(config: &Config) -> Result<CredentialStore> {
    let source = match (&config.token_file, &config.token) {
        (Some(path), _) => CredentialSource::File(path.clone()),
        (None, Some(token)) => CredentialSource::Static(token.clone()),
        (None, None) => CredentialSource::None,
    };
    let mut store = CredentialStore::new(source);
    if let (Some(url), Some(refresh_token)) = (&config.refresh_url, &config.refresh_token) {
        store = store.with_refresh(RefreshClient::new(url, refresh_token.clone())?);
        log::info!("Credential refresh enabled via {}", url);
    }
    Ok(store)
}

fn print_events(batch: &[WireMessage]) {
    for event in batch {
        let data = event
            .data
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_default();
        match &event.error {
            Some(err) => println!("<< {} {} (error: {})", event.kind, data, err),
            None => println!("<< {} {}", event.kind, data),
        }
    }
}

/// Runs one console command; returns false when the user asked to quit.
async fn execute(manager: &ConnectionManager, cmd: ConsoleCommand) -> Result<bool> {
    match cmd {
        ConsoleCommand::Send { conversation_id, content } => manager.send_chat_message(&conversation_id, &content)?,
        ConsoleCommand::Typing { conversation_id, on } => manager.send_typing(&conversation_id, on)?,
        ConsoleCommand::Read { conversation_id, message_ids } => manager.mark_read(&conversation_id, &message_ids)?,
        ConsoleCommand::Open(id) => manager.open_conversation(&id)?,
        ConsoleCommand::Close(id) => manager.close_conversation(&id)?,
        ConsoleCommand::List => manager.list_conversations()?,
        ConsoleCommand::Refresh => manager.refresh_conversations()?,
        ConsoleCommand::Poll(ms) => manager.start_conversation_polling(ms.map(Duration::from_millis))?,
        ConsoleCommand::StopPolling => manager.stop_conversation_polling()?,
        ConsoleCommand::Watch(user) => manager.subscribe_presence(&user)?,
        ConsoleCommand::Unwatch(user) => manager.unsubscribe_presence(&user)?,
        ConsoleCommand::Query(users) => manager.query_presence(&users)?,
        ConsoleCommand::Raw { kind, data, priority } => manager.send(&kind, data, priority)?,
        ConsoleCommand::Online(online) => manager.set_online(online)?,
        ConsoleCommand::Visible(visible) => manager.set_visible(visible)?,
        ConsoleCommand::Focus => manager.focus()?,
        ConsoleCommand::Connect => manager.connect()?,
        ConsoleCommand::Disconnect => manager.disconnect()?,
        ConsoleCommand::Reconnect => manager.reconnect()?,
        ConsoleCommand::Status => println!("{}", serde_json::to_string_pretty(&manager.snapshot())?),
        ConsoleCommand::Stats => println!("{}", serde_json::to_string_pretty(&manager.stats().await?)?),
        ConsoleCommand::Conversations => {
            for c in manager.conversations().await? {
                println!("{}", serde_json::to_string(&c)?);
            }
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => return Ok(false),
    }
    Ok(true)
}

// Stdin is read on a plain thread; a blocking read must not hold up runtime shutdown.
fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("Failed to read stdin: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

async fn console_loop(manager: ConnectionManager) {
    let mut lines = spawn_stdin_reader();
    while let Some(line) = lines.recv().await {
        match console::parse_line(&line) {
            Ok(Some(cmd)) => match execute(&manager, cmd).await {
                Ok(true) => {}
                Ok(false) => break,
                Err(e) => println!("!! {}", e),
            },
            Ok(None) => {}
            Err(msg) => println!("!! {}", msg),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    let config = config::load_config();
    let log_dir = config.log_dir.clone().unwrap_or_else(|| "./logs".into());
    let log_level = config.log_level.clone().unwrap_or_else(|| "info".to_string());
    let log_path = setup_logging("client_realtime", &log_dir, &log_level, 5)?;
    log::info!("Logging to {}", log_path.display());

    let realtime = config.realtime_config()?;
    let mut builder = ConnectionManager::builder(realtime).credentials(Arc::new(credential_store(&config)?));
    if let Some(dir) = &config.storage_dir {
        let store = FileBacklogStore::new(dir);
        log::info!("Outbound backlog persisted at {}", store.path().display());
        builder = builder.backlog_store(Arc::new(store));
    }
    let manager = builder.build()?;

    manager.subscribe(lib_realtime::core::WILDCARD, print_events).detach();
    manager.connect()?;
    println!("{}", console::HELP);

    tokio::select! {
        _ = console_loop(manager.clone()) => {
            log::info!("Console closed, initiating shutdown.");
        }
        _ = manager.closed() => {
            log::warn!("Connection manager terminated by the server.");
        }
        _ = signal::ctrl_c() => {
            log::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        log::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        log::warn!("Cannot listen for SIGTERM: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
    }

    // Already terminated after a ban; the send error is expected then.
    let _ = manager.destroy();
    let _ = tokio::time::timeout(Duration::from_secs(2), manager.closed()).await;

    log::info!("Shutdown complete.");
    Ok(())
}
