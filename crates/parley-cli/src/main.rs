//! parley - terminal client for a remote chat assistant

mod commands;
mod config;
mod credentials;
mod render;
mod utils;

use clap::Parser;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tracing_subscriber::EnvFilter;

use commands::{Command, HistoryCommand};
use credentials::{CredentialStore, pick_token};
use parley_api::{Attachment, ChatId, HttpGateway, Role};
use parley_core::{ChatController, SendOutcome, SessionStore};
use render::{RenderAction, Transcript};

/// parley - chat with a remote assistant
#[derive(Parser, Debug)]
#[command(name = "parley")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Service base URL, including the /api prefix
    #[arg(long)]
    base_url: Option<String>,

    /// Bearer token (saved for later runs)
    #[arg(long)]
    token: Option<String>,

    /// Send a single message, print the reply and exit
    #[arg(short, long)]
    message: Option<String>,

    /// Conversation for --message: an id or #n from the history list
    #[arg(long, requires = "message")]
    chat: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Initialize config file
    #[arg(long)]
    init_config: bool,

    /// Forget the stored token
    #[arg(long)]
    logout: bool,
}

/// Whether the input loop keeps going after a command
enum Flow {
    Continue,
    /// Ask before deleting; the next line is the answer
    ConfirmDelete(ChatId),
    Quit,
}

const VERBOSE_FILTER: &str = "parley=debug,parley_core=debug,parley_api=debug";

/// Log filter: fixed under `--verbose`, otherwise `RUST_LOG` when set
fn log_filter(verbose: bool, rust_log: Option<&str>) -> Option<EnvFilter> {
    if verbose {
        return Some(EnvFilter::new(VERBOSE_FILTER));
    }
    rust_log
        .map(str::trim)
        .filter(|directives| !directives.is_empty())
        .map(EnvFilter::new)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Setup tracing; logs go to stderr so they don't mix with the transcript
    if let Some(filter) = log_filter(args.verbose, std::env::var("RUST_LOG").ok().as_deref()) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    if args.init_config {
        match config::Config::init() {
            Ok(path) => {
                println!("Config file created at: {}", path.display());
                println!("\nExample config:\n{}", config::example_config());
            }
            Err(e) => {
                eprintln!("Error creating config: {}", e);
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    let store = CredentialStore::open_default();

    if args.logout {
        store.remove()?;
        println!("Removed stored token ({})", store.path().display());
        return Ok(());
    }

    let cfg = config::Config::load();
    let base_url = args.base_url.clone().unwrap_or_else(|| cfg.base_url());

    let picked = pick_token(
        args.token.clone(),
        std::env::var("PARLEY_TOKEN").ok(),
        store.load().map(|c| c.token),
        cfg.token.clone(),
    );
    let Some((token, source)) = picked else {
        eprintln!("Error: Not signed in");
        eprintln!();
        eprintln!("Options:");
        eprintln!("  1. Pass a token once: parley --token <token>");
        eprintln!("  2. Set it in the environment: export PARLEY_TOKEN=<token>");
        eprintln!("  3. Add it to the config file: parley --init-config");
        std::process::exit(1);
    };
    tracing::debug!("using token from {:?}", source);
    if source.should_persist() {
        if let Err(e) = store.save(&token) {
            tracing::warn!("could not save token to {}: {}", store.path().display(), e);
        }
    }

    let gateway = Arc::new(HttpGateway::with_timeout(&base_url, cfg.request_timeout())?);
    tracing::debug!("using service at {}", gateway.base_url());
    let controller = ChatController::new(gateway, SessionStore::with_token(token));

    if let Some(message) = args.message {
        return run_once(&controller, &store, args.chat.as_deref(), &message).await;
    }

    run_interactive(&controller, &store).await
}

/// Forget the on-disk token once the controller has dropped the session.
fn forget_if_signed_out(controller: &ChatController, store: &CredentialStore) {
    if controller.session().is_authenticated() {
        return;
    }
    if let Err(e) = store.remove() {
        tracing::warn!("could not remove {}: {}", store.path().display(), e);
    }
}

async fn run_once(
    controller: &ChatController,
    store: &CredentialStore,
    chat: Option<&str>,
    message: &str,
) -> anyhow::Result<()> {
    if let Some(reference) = chat {
        let opened = async {
            controller.load_history().await?;
            match commands::resolve_ref(reference, &controller.summaries()) {
                Some(id) => controller.open(&id).await,
                None => Err(parley_core::Error::Load(parley_api::Error::NotFound {
                    message: format!("no conversation {}", reference),
                })),
            }
        }
        .await;
        if let Err(e) = opened {
            forget_if_signed_out(controller, store);
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let outcome = controller.send(message, Vec::new()).await;
    forget_if_signed_out(controller, store);

    match outcome {
        Ok(SendOutcome::Delivered { chat_id }) => {
            let state = controller.state();
            if let Some(reply) = state.messages.last() {
                println!("{}", reply.content);
            }
            tracing::debug!("reply stored in conversation {}", chat_id);
            Ok(())
        }
        Ok(SendOutcome::Failed { .. }) => {
            let state = controller.state();
            if let Some(entry) = state.messages.last().filter(|m| m.role == Role::SystemError) {
                eprintln!("{}", entry.content);
            }
            std::process::exit(1);
        }
        Ok(SendOutcome::Skipped) | Ok(SendOutcome::Detached) => Ok(()),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}

async fn run_interactive(controller: &ChatController, store: &CredentialStore) -> anyhow::Result<()> {
    let mut events = controller.subscribe();
    let (signout_tx, mut signout_rx) = watch::channel(false);

    let renderer = tokio::spawn(async move {
        let mut transcript = Transcript::new();
        loop {
            match events.recv().await {
                Ok(event) => {
                    let (lines, action) = transcript.apply(&event);
                    for line in lines {
                        println!("{}", line);
                    }
                    if action == RenderAction::SignOut {
                        let _ = signout_tx.send(true);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("renderer skipped {} event(s)", n);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    if std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        eprintln!("parley - type /help for commands");
        eprintln!();
    }

    // Failures are reported through the event stream.
    if let Err(e) = controller.initialize().await {
        tracing::debug!("initial load failed: {}", e);
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut attachments: Vec<Attachment> = Vec::new();
    let mut confirm_delete: Option<ChatId> = None;

    loop {
        tokio::select! {
            changed = signout_rx.changed() => {
                if changed.is_err() || *signout_rx.borrow() {
                    break;
                }
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // EOF
                    break;
                };
                let input = line.trim();
                if let Some(id) = confirm_delete.take() {
                    if commands::confirms(input) {
                        if controller.delete(&id).await.is_ok() {
                            println!("Deleted conversation {}", id);
                        }
                    } else {
                        println!("Kept conversation {}", id);
                    }
                    continue;
                }
                if input.is_empty() {
                    continue;
                }

                match commands::parse_command(input) {
                    Some(command) => {
                        match execute(command, controller, store, &mut attachments).await {
                            Flow::Continue => {}
                            Flow::ConfirmDelete(id) => confirm_delete = Some(id),
                            Flow::Quit => break,
                        }
                    }
                    None => {
                        // A busy send is refused; keep queued files for the retry.
                        let files = if controller.state().pending_send {
                            Vec::new()
                        } else {
                            std::mem::take(&mut attachments)
                        };
                        let controller = controller.clone();
                        let text = input.to_string();
                        tokio::spawn(async move {
                            if let Err(e) = controller.send(&text, files).await {
                                tracing::debug!("send not started: {}", e);
                            }
                        });
                    }
                }
            }
        }
    }

    forget_if_signed_out(controller, store);
    renderer.abort();
    Ok(())
}

async fn execute(
    command: Command,
    controller: &ChatController,
    store: &CredentialStore,
    attachments: &mut Vec<Attachment>,
) -> Flow {
    match command {
        Command::Help => println!("{}", commands::help_message()),
        Command::New => controller.start_new(),
        Command::History => {
            let active = controller.active_id();
            println!(
                "{}",
                HistoryCommand::render(&controller.summaries(), active.as_ref())
            );
        }
        Command::Refresh => {
            if controller.load_history().await.is_ok() {
                println!("{} conversation(s)", controller.summaries().len());
            }
        }
        Command::Open(reference) => {
            match commands::resolve_ref(&reference, &controller.summaries()) {
                Some(id) => {
                    let _ = controller.open(&id).await;
                }
                None => println!("No conversation {}. Use /history to list them.", reference),
            }
        }
        Command::Rename(title) => {
            if controller.state().id().is_none() {
                println!("New chats are named by the server after the first reply.");
            } else if let Ok(false) = controller.rename_current(&title).await {
                println!("Title unchanged.");
            }
        }
        Command::Delete(reference) => {
            let target = match reference {
                Some(reference) => commands::resolve_ref(&reference, &controller.summaries()),
                None => controller.state().id().cloned(),
            };
            match target {
                Some(id) => {
                    let summaries = controller.summaries();
                    let title = summaries
                        .iter()
                        .find(|s| s.id == id)
                        .map(|s| s.title.as_str())
                        .unwrap_or("this conversation");
                    println!("Delete \"{}\" ({})? [y/N]", title, id);
                    return Flow::ConfirmDelete(id);
                }
                None => println!("Nothing to delete."),
            }
        }
        Command::Attach(path) => match Attachment::from_path(&path).await {
            Ok(attachment) => {
                println!(
                    "Attached {} ({}, {} bytes)",
                    attachment.file_name,
                    attachment
                        .mime_type
                        .as_deref()
                        .unwrap_or("application/octet-stream"),
                    attachment.bytes.len()
                );
                attachments.push(attachment);
            }
            Err(e) => println!("Could not read {}: {}", path, e),
        },
        Command::Detach => {
            println!("Dropped {} attachment(s)", attachments.len());
            attachments.clear();
        }
        Command::Logout => {
            controller.session().clear();
            forget_if_signed_out(controller, store);
            println!("Signed out.");
            return Flow::Quit;
        }
        Command::Quit => return Flow::Quit,
        Command::Usage(usage) => println!("Usage: {}", usage),
        Command::Unknown(cmd) => {
            println!("Unknown command: /{}", cmd);
            println!("Type /help for available commands.");
        }
    }
    Flow::Continue
}
