/// Chatlink demo client - interactive REPL over a local document store
use chatlink_core::types::ChatKind;
use chatlink_core::{AuthUser, ChatClient, ChatEvent, Config, LocalStore};
use colored::*;
use std::env;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    // Parse configuration
    let args: Vec<String> = env::args().collect();
    let (config, opts) = Config::from_args(&args)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;

    let store = match &config.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            LocalStore::with_storage(dir).map_err(|e| anyhow::anyhow!("Store error: {}", e))?
        }
        None => LocalStore::new(),
    };

    // Stand-in for the identity provider: a stable uid derived from the name
    let uid = format!(
        "local-{}",
        opts.display_name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>()
            .to_lowercase()
    );
    let auth = AuthUser {
        uid,
        display_name: Some(opts.display_name.clone()),
        photo_url: None,
        guest: opts.guest,
    };

    let client = ChatClient::new(Arc::new(store), config, auth);
    let me = client
        .sign_in()
        .await
        .map_err(|e| anyhow::anyhow!("Sign-in error: {}", e))?;

    println!("{}", "⚡ Chatlink".bright_cyan().bold());
    println!(
        "Signed in as {} - your ID is {}",
        opts.display_name.bright_white().bold(),
        me.short_id
            .as_deref()
            .unwrap_or("??????")
            .bright_yellow()
            .bold()
    );
    if opts.guest {
        println!("{}", "Guest account: limited total conversations".yellow());
    }
    println!("Type {} for commands\n", "help".cyan());

    // Print engine events as they arrive
    let mut events = client.events();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ChatEvent::MessagesUpdated { count, .. }) => {
                    println!("{}", format!("· conversation updated ({} messages)", count).dimmed());
                }
                Ok(ChatEvent::ChatListUpdated { count }) => {
                    println!("{}", format!("· chat list updated ({} entries)", count).dimmed());
                }
                Ok(ChatEvent::ConversationClosed { .. }) => {
                    println!("{}", "· conversation closed".dimmed());
                }
                Ok(ChatEvent::Notice { text, warning }) => {
                    if warning {
                        println!("{} {}", "!".yellow().bold(), text.yellow());
                    } else {
                        println!("{} {}", "i".cyan().bold(), text);
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    println!("{}", format!("· skipped {} events", n).dimmed());
                }
                Err(_) => break,
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (command, rest) = line.split_once(' ').unwrap_or((line, ""));

        match command {
            "help" => print_help(),
            "quit" | "exit" => break,
            "whoami" => match client.own_record().await {
                Ok(record) => {
                    println!(
                        "{} ({}) - {} connections, {} groups",
                        record.display_name_or_unknown().bright_white(),
                        record.short_id.as_deref().unwrap_or("??????").bright_yellow(),
                        record.connections.len(),
                        record.groups.len()
                    );
                }
                Err(e) => print_error(&e),
            },
            "list" => {
                let entries = client.chat_list().await;
                if entries.is_empty() {
                    println!("{}", "No conversations yet - try `connect <ID>`".dimmed());
                }
                for (i, entry) in entries.iter().enumerate() {
                    let kind = match entry.kind {
                        ChatKind::Direct => "direct",
                        ChatKind::Group => "group ",
                    };
                    let preview = if entry.last_message.is_empty() {
                        "(no messages yet)".dimmed().to_string()
                    } else {
                        entry.last_message.clone()
                    };
                    println!(
                        "{:>3}. [{}] {} - {}",
                        i + 1,
                        kind.cyan(),
                        entry.name.bright_white(),
                        preview
                    );
                }
            }
            "connect" => match client.connect(rest).await {
                Ok(id) => println!("{} connected ({})", "✓".green().bold(), id.dimmed()),
                Err(e) => print_error(&e),
            },
            "open" => {
                let entries = client.chat_list().await;
                match rest.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| entries.get(i)) {
                    Some(entry) => {
                        let result = match entry.kind {
                            ChatKind::Direct => match &entry.peer_uid {
                                Some(peer) => client.open_conversation(peer).await.map(|_| ()),
                                None => Err(chatlink_core::ChatError::NotFound(
                                    "entry has no peer".to_string(),
                                )),
                            },
                            ChatKind::Group => client.open_group(&entry.key).await,
                        };
                        match result {
                            Ok(()) => {
                                println!("{} opened {}", "✓".green().bold(), entry.name.bright_white());
                                for message in client.messages().await {
                                    print_message(&message);
                                }
                            }
                            Err(e) => print_error(&e),
                        }
                    }
                    None => println!("{}", "Usage: open <n>  (from `list`)".yellow()),
                }
            }
            "send" => match client.send(rest).await {
                Ok(()) => {}
                Err(e) => print_error(&e),
            },
            "messages" => {
                let messages = client.messages().await;
                if messages.is_empty() {
                    println!("{}", "No messages".dimmed());
                }
                for message in messages {
                    print_message(&message);
                }
            }
            "close" => client.disconnect().await,
            "group" => {
                let mut parts = rest.split_whitespace();
                let Some(name) = parts.next() else {
                    println!("{}", "Usage: group <name> <ID> [<ID>...]".yellow());
                    continue;
                };
                let mut member_ids = Vec::new();
                let mut failed = false;
                for short_id in parts {
                    match client.resolve_short_id(short_id).await {
                        Ok(user) => member_ids.push(user.uid),
                        Err(e) => {
                            print_error(&e);
                            failed = true;
                            break;
                        }
                    }
                }
                if failed {
                    continue;
                }
                match client.create_group(name, &member_ids).await {
                    Ok(id) => println!("{} group created ({})", "✓".green().bold(), id.dimmed()),
                    Err(e) => print_error(&e),
                }
            }
            "leave" => {
                let entries = client.chat_list().await;
                match rest.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| entries.get(i)) {
                    Some(entry) if entry.kind == ChatKind::Group => {
                        match client.delete_or_leave_group(&entry.key).await {
                            Ok(()) => println!("{} done", "✓".green().bold()),
                            Err(e) => print_error(&e),
                        }
                    }
                    _ => println!("{}", "Usage: leave <n>  (a group from `list`)".yellow()),
                }
            }
            "delete" => {
                let entries = client.chat_list().await;
                match rest.parse::<usize>().ok().and_then(|n| n.checked_sub(1)).and_then(|i| entries.get(i)) {
                    Some(entry) if entry.kind == ChatKind::Direct => match &entry.peer_uid {
                        Some(peer) => match client.delete_conversation(&entry.key, peer).await {
                            Ok(()) => println!("{} chat deleted", "✓".green().bold()),
                            Err(e) => print_error(&e),
                        },
                        None => println!("{}", "Entry has no peer".yellow()),
                    },
                    _ => println!("{}", "Usage: delete <n>  (a direct chat from `list`)".yellow()),
                }
            }
            "offline" => {
                client.set_online(false);
                println!("{}", "Connectivity flag down - sends will be rejected".yellow());
            }
            "online" => {
                client.set_online(true);
                println!("{}", "Connectivity flag up".green());
            }
            _ => {
                println!("{} Unknown command: {}", "✗".red().bold(), command.red());
                print_help();
            }
        }
    }

    client.sign_out().await;
    println!("{}", "Bye".dimmed());
    Ok(())
}

fn print_help() {
    println!("{}", "Commands:".bright_white().bold());
    println!("  {} <ID>              Connect to a user by short id", "connect".cyan());
    println!("  {}                   Show the chat list", "list".cyan());
    println!("  {} <n>                 Open entry n from the list", "open".cyan());
    println!("  {} <text>              Send into the open conversation", "send".cyan());
    println!("  {}               Show the open conversation", "messages".cyan());
    println!("  {}                  Close the open conversation", "close".cyan());
    println!("  {} <name> <ID>...     Create a group", "group".cyan());
    println!("  {} <n>                Leave (or dissolve) group n", "leave".cyan());
    println!("  {} <n>               Delete direct chat n", "delete".cyan());
    println!("  {} / {}        Toggle the connectivity flag", "offline".cyan(), "online".cyan());
    println!("  {}                 Show your profile", "whoami".cyan());
    println!("  {}                   Leave the REPL", "quit".cyan());
}

fn print_message(message: &chatlink_core::types::MessageRecord) {
    let sender = message
        .sender_name
        .clone()
        .unwrap_or_else(|| message.sender.clone());
    println!(
        "  {} {}: {}",
        message.timestamp.dimmed(),
        sender.bright_white(),
        message.text
    );
}

fn print_error(e: &chatlink_core::ChatError) {
    println!("{} {}", "✗".red().bold(), e.to_string().red());
}
