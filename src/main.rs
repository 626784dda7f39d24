use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::*;
use tokio::sync::{mpsc, Mutex};
use tracing_subscriber::EnvFilter;

use docchat::cli::{resolve_token, Args};
use docchat::signature::MESSAGE_ID_MARKER;
use docchat::{
    ApiClient, ChatSession, Choice, RenderEvent, RenderHandle, RenderSink, Role, RoundId,
    SessionConfig, TurnOutcome,
};

type LineReceiver = Arc<Mutex<mpsc::UnboundedReceiver<String>>>;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Engine diagnostics go to stderr so they never interleave with the
    // transcript on stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_filter)),
        )
        .with_writer(io::stderr)
        .init();

    let Some(token) = resolve_token(args.token) else {
        return Err("no credential: pass --token or export DOCCHAT_TOKEN".into());
    };

    let client = ApiClient::builder(&args.server).token(token).build();
    let (sink, events) = RenderSink::channel();

    // One blocking thread owns stdin; the REPL and the choice prompt take
    // turns on the receiving end.
    let (line_tx, line_rx) = mpsc::unbounded_channel::<String>();
    std::thread::spawn(move || {
        for line in io::stdin().lines() {
            let Ok(line) = line else { break };
            if line_tx.send(line).is_err() {
                break;
            }
        }
    });
    let lines: LineReceiver = Arc::new(Mutex::new(line_rx));

    tokio::spawn(render_loop(events, Arc::clone(&lines)));

    let config = SessionConfig {
        dual_enabled: args.dual,
        dual_probability: args.dual_probability,
    };
    let mut session = ChatSession::new(client, sink, config);

    println!(
        "{}",
        "docchat — medical consultation assistant".bright_green().bold()
    );
    println!(
        "{}",
        "commands: /new  /list  /load <id>  /quit".dimmed()
    );

    if let Some(chat_id) = &args.chat {
        match session.load_chat(chat_id).await {
            Ok(()) => println!("{} {}", "Loaded:".bold(), session.title()),
            Err(err) => eprintln!("{}", format!("Error: {}", err.user_detail()).red()),
        }
    } else {
        print_history(&session).await;
    }

    loop {
        settle_renderer().await;
        print!("\n{} ", "you>".bright_blue().bold());
        let _ = io::stdout().flush();

        let line = { lines.lock().await.recv().await };
        let Some(line) = line else { break };
        let trimmed = line.trim();

        match trimmed {
            "/quit" | "/exit" => break,
            "/new" => {
                session.start_new_chat();
                println!("{}", "Started a new consultation.".dimmed());
            }
            "/list" => print_history(&session).await,
            _ if trimmed.starts_with("/load") => {
                let id = trimmed.trim_start_matches("/load").trim();
                if id.is_empty() {
                    println!("{}", "usage: /load <chat-id>".dimmed());
                    continue;
                }
                match session.load_chat(id).await {
                    Ok(()) => println!("{} {}", "Loaded:".bold(), session.title()),
                    Err(err) if err.is_unauthenticated() => {
                        return Err("not authenticated — log in again".into());
                    }
                    Err(err) => eprintln!("{}", format!("Error: {}", err.user_detail()).red()),
                }
            }
            _ => match session.submit_turn(trimmed).await {
                Ok(TurnOutcome::Completed(_))
                | Ok(TurnOutcome::Aborted)
                | Ok(TurnOutcome::Abandoned)
                | Ok(TurnOutcome::Ignored) => {}
                Err(err) if err.is_unauthenticated() => {
                    return Err("not authenticated — log in again".into());
                }
                Err(err) => eprintln!("{}", format!("Error: {}", err.user_detail()).red()),
            },
        }
    }

    Ok(())
}

/// Give the spawned renderer a moment to drain queued events before the
/// next prompt is printed.
async fn settle_renderer() {
    tokio::time::sleep(Duration::from_millis(25)).await;
}

async fn print_history(session: &ChatSession) {
    match session.list_chats().await {
        Ok(chats) if chats.is_empty() => println!("{}", "No chat history".dimmed()),
        Ok(chats) => {
            println!("{}", "Recent consultations:".bold());
            for chat in chats {
                println!("  {}  {}", chat.chat_id.dimmed(), chat.title);
            }
        }
        Err(err) => eprintln!("{}", format!("Error loading history: {err}").red()),
    }
}

// ---------------------------------------------------------------------------
// Render consumer
// ---------------------------------------------------------------------------

/// Consume engine render events the way the original page consumed DOM
/// callbacks: single-response slots stream to the terminal as they grow,
/// dual-round candidates buffer silently until both are ready.
async fn render_loop(mut events: mpsc::UnboundedReceiver<RenderEvent>, input: LineReceiver) {
    // Printed prefix per live-streaming slot.
    let mut live: HashMap<RenderHandle, String> = HashMap::new();
    // Latest content per buffered dual candidate.
    let mut buffered: HashMap<RenderHandle, String> = HashMap::new();
    // Rounds whose candidates were already displayed by the choice prompt.
    let mut displayed: std::collections::HashSet<RoundId> = std::collections::HashSet::new();

    while let Some(event) = events.recv().await {
        match event {
            RenderEvent::MessageCreated {
                handle,
                role,
                content,
            } => match role {
                // The prompt line already echoes user input.
                Role::User => {}
                Role::System => {
                    println!("\n{} {}", "system>".yellow().bold(), content.yellow());
                }
                Role::Assistant => {
                    if buffered.contains_key(&handle) {
                        continue;
                    }
                    let shown = &content[..visible_len(&content)];
                    print!("\n{} {}", "assistant>".bright_green().bold(), shown);
                    let _ = io::stdout().flush();
                    live.insert(handle, shown.to_string());
                }
            },
            RenderEvent::MessageUpdated { handle, content } => {
                if let Some(buf) = buffered.get_mut(&handle) {
                    *buf = content;
                    continue;
                }
                if let Some(printed) = live.get_mut(&handle) {
                    let shown = &content[..visible_len(&content)];
                    // Content is replace-in-place but only ever grows until
                    // the final designature pass, which the withheld marker
                    // region already covers.
                    if shown.len() > printed.len() && shown.starts_with(printed.as_str()) {
                        print!("{}", &shown[printed.len()..]);
                        let _ = io::stdout().flush();
                        *printed = shown.to_string();
                    }
                }
            }
            RenderEvent::TranscriptCleared => {
                live.clear();
                buffered.clear();
                println!();
            }
            RenderEvent::RoundOpened {
                candidate_a,
                candidate_b,
                ..
            } => {
                buffered.insert(candidate_a, String::new());
                buffered.insert(candidate_b, String::new());
                println!("{}", "Generating two candidate answers...".dimmed());
            }
            RenderEvent::RoundResolved { round_id, kept } => {
                let survivor = kept.and_then(|handle| buffered.remove(&handle));
                buffered.clear();
                if displayed.remove(&round_id) {
                    println!("{}", "Preference recorded.".dimmed());
                } else if let Some(content) = survivor {
                    println!("\n{} {}", "assistant>".bright_green().bold(), content);
                }
            }
            RenderEvent::ChoiceRequested(prompt) => {
                displayed.insert(prompt.round_id);
                println!("\n{}", "[1] ───────────────────────────".bright_cyan());
                println!("{}", prompt.candidate_a);
                println!("{}", "[2] ───────────────────────────".bright_cyan());
                println!("{}", prompt.candidate_b);
                print!(
                    "{} ",
                    "Which answer is better? [1/2, Enter skips]:".bright_cyan().bold()
                );
                let _ = io::stdout().flush();

                let answer = { input.lock().await.recv().await };
                match answer.as_deref().map(str::trim) {
                    Some("1") => {
                        let _ = prompt.responder.send(Choice::CandidateA);
                    }
                    Some("2") => {
                        let _ = prompt.responder.send(Choice::CandidateB);
                    }
                    // Anything else drops the responder and abandons the
                    // round.
                    _ => {}
                }
            }
        }
    }
}

/// Byte length of the part of a streaming accumulator that is safe to
/// print: everything up to the signature marker block, including a marker
/// prefix that may be cut at the end of the buffer. The engine only strips
/// the block once it is complete, so the terminal has to withhold it while
/// it streams in (a DOM renderer replaces content in place; a terminal
/// cannot unprint).
fn visible_len(content: &str) -> usize {
    if let Some(pos) = content.find(MESSAGE_ID_MARKER) {
        return pos;
    }
    let max = MESSAGE_ID_MARKER.len().min(content.len());
    for k in (1..=max).rev() {
        if content.ends_with(&MESSAGE_ID_MARKER[..k]) {
            return content.len() - k;
        }
    }
    content.len()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
