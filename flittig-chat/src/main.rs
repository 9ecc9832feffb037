//! Terminal front-end.
//!
//! With `FLITTIG_RECEIVER` set, opens a conversation and sends each typed
//! line. Without it, prints notifications for every incoming message.

use flittig_chat::logging::init_tracing;
use flittig_chat::{
    ChatConfig, ChatSessionManager, ConnectionState, InboxWatcher, Message, MessageSide,
    SessionUpdate,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let _log_guard = init_tracing();

    let config = match ChatConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    let token = std::env::var("FLITTIG_TOKEN").ok();
    let receiver = std::env::var("FLITTIG_RECEIVER").ok();

    if token.as_deref().map_or(true, str::is_empty) {
        error!("FLITTIG_TOKEN is not set");
        std::process::exit(1);
    }

    match receiver {
        Some(receiver) if !receiver.is_empty() => {
            run_conversation(config, token.as_deref(), &receiver).await
        }
        _ => run_inbox(config, token.as_deref()).await,
    }
}

async fn run_conversation(config: ChatConfig, token: Option<&str>, receiver: &str) {
    let mut session = match ChatSessionManager::new(config) {
        Ok(session) => session,
        Err(e) => {
            error!("Failed to create chat session: {}", e);
            std::process::exit(1);
        }
    };

    let mut updates = session.subscribe();
    session.set_inputs(token, Some(receiver));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            update = updates.recv() => {
                match update {
                    Ok(SessionUpdate::History(_)) => {
                        for message in session.messages() {
                            print_message(&message);
                        }
                    }
                    Ok(SessionUpdate::Message(message)) => print_message(&message),
                    Ok(SessionUpdate::Presence(presence)) => println!("-- {} is {:?}", receiver, presence),
                    Ok(SessionUpdate::Counterpart(counterpart)) => {
                        println!("-- chatting with {}", counterpart.display_name());
                    }
                    Ok(SessionUpdate::Connection(ConnectionState::Closed)) => {
                        println!("-- connection closed");
                        break;
                    }
                    Ok(SessionUpdate::Connection(state)) => info!(state = ?state, "Connection state changed"),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Display fell behind"),
                    Err(RecvError::Closed) => break,
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        session.set_draft(line);
                        if !session.send_draft() {
                            println!("-- not sent");
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        error!("Failed to read input: {}", e);
                        break;
                    }
                }
            }
        }
    }

    session.close();
}

async fn run_inbox(config: ChatConfig, token: Option<&str>) {
    let mut watcher = InboxWatcher::new(config);
    let mut notifications = watcher.subscribe();
    watcher.set_token(token);

    loop {
        tokio::select! {
            notification = notifications.recv() => {
                match notification {
                    Ok(n) => println!(
                        "[{}] {}",
                        n.sender_name.as_deref().unwrap_or("Flittig"),
                        n.preview
                    ),
                    Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed notifications"),
                    Err(RecvError::Closed) => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    watcher.close();
}

fn print_message(message: &Message) {
    let time = message.timestamp.format("%H:%M");
    match message.side() {
        MessageSide::Own => println!("[{}] you: {}", time, message.content),
        MessageSide::Counterpart => println!(
            "[{}] {}: {}",
            time,
            message.sender_name().unwrap_or("them"),
            message.content
        ),
        MessageSide::System => match &message.action {
            Some(action) => println!("[{}] * {} [{}]", time, message.content, action.label),
            None => println!("[{}] * {}", time, message.content),
        },
    }
}
