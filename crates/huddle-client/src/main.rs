//! # huddle
//!
//! Line-oriented terminal client. Plain lines are sent to the open
//! conversation; lines starting with `/` are commands (see `/help`).
//!
//! Runs with the headless media backend, so calls can be received and
//! declined but placing or accepting one reports that no devices exist.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

use huddle_client::{ChatClient, ClientConfig, Draft, UiEvent};
use huddle_media::headless::headless_backend;
use huddle_media::{CallOutcome, CallPhase};
use huddle_net::WsConnector;
use huddle_shared::{CallKind, Message, MessageId, User, UserId};
use huddle_store::{HttpStore, Upload};

#[derive(Parser, Debug)]
#[command(name = "huddle")]
#[command(about = "Terminal client for Huddle messaging and calls")]
#[command(version)]
struct Args {
    /// Your user id, as issued by the identity service
    #[arg(long, env = "HUDDLE_USER_ID")]
    user_id: i64,

    /// Name shown to the people you call
    #[arg(long, env = "HUDDLE_USER_NAME", default_value = "Huddle user")]
    name: String,
}

const HELP: &str = "\
/open <user>                 open the conversation with <user>
/close                       close the open conversation
/list                        refresh and show conversations
/older                       load older messages
/attach <path> [text]        send a file, with optional text
/delete <message>            delete a message
/delete-conversation <user>  delete every message with <user>
/who                         list online users
/call <user> [voice|video|screen]
/accept  /reject  /hangup
/quit";

#[derive(Debug, PartialEq)]
enum Input {
    Text(String),
    Open(UserId),
    Close,
    List,
    Older,
    Attach { path: String, text: String },
    Delete(MessageId),
    DeleteConversation(UserId),
    Who,
    Call(UserId, CallKind),
    Accept,
    Reject,
    HangUp,
    Help,
    Quit,
}

fn parse_input(line: &str) -> Result<Input, String> {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return Ok(Input::Text(line.to_string()));
    };

    let mut parts = command.split_whitespace();
    let name = parts.next().unwrap_or_default();
    let mut user = |what: &str| -> Result<UserId, String> {
        parts
            .next()
            .ok_or_else(|| format!("usage: /{name} <{what}>"))?
            .parse::<i64>()
            .map(UserId)
            .map_err(|_| format!("{what} must be a number"))
    };

    match name {
        "open" => Ok(Input::Open(user("user")?)),
        "close" => Ok(Input::Close),
        "list" => Ok(Input::List),
        "older" => Ok(Input::Older),
        "delete" => Ok(Input::Delete(MessageId(user("message")?.0))),
        "delete-conversation" => Ok(Input::DeleteConversation(user("user")?)),
        "who" => Ok(Input::Who),
        "call" => {
            let to = user("user")?;
            let kind = match parts.next() {
                Some(kind) => kind.parse::<CallKind>().map_err(|e| e.to_string())?,
                None => CallKind::Voice,
            };
            Ok(Input::Call(to, kind))
        }
        "attach" => {
            let rest = command["attach".len()..].trim_start();
            let (path, text) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if path.is_empty() {
                return Err("usage: /attach <path> [text]".into());
            }
            Ok(Input::Attach {
                path: path.to_string(),
                text: text.trim().to_string(),
            })
        }
        "accept" => Ok(Input::Accept),
        "reject" => Ok(Input::Reject),
        "hangup" => Ok(Input::HangUp),
        "help" => Ok(Input::Help),
        "quit" | "exit" => Ok(Input::Quit),
        other => Err(format!("unknown command /{other}, try /help")),
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        "doc" => "application/msword",
        "docx" => "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        _ => "application/octet-stream",
    }
}

async fn read_attachment(path: &str) -> anyhow::Result<Upload> {
    let path = Path::new(path);
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("file")
        .to_string();
    Ok(Upload::new(name, mime_for(path), bytes))
}

/// Run one input line. Returns `false` when the user quits.
async fn handle_input(client: &ChatClient, input: Input) -> bool {
    let result = match input {
        Input::Text(text) if text.is_empty() => Ok(()),
        Input::Text(text) => client.send_text(text).await,
        Input::Open(user) => {
            client.open_conversation(user);
            Ok(())
        }
        Input::Close => {
            client.close_conversation();
            Ok(())
        }
        Input::List => {
            client.refresh_conversations();
            Ok(())
        }
        Input::Older => {
            client.load_older();
            Ok(())
        }
        Input::Attach { path, text } => match read_attachment(&path).await {
            Ok(file) => client.send(Draft::text(text).with_attachment(file)).await,
            Err(e) => {
                println!("! {e:#}");
                Ok(())
            }
        },
        Input::Delete(id) => client.delete_message(id).await,
        Input::DeleteConversation(user) => client.delete_conversation(user).await,
        Input::Who => {
            if let Ok(snapshot) = client.snapshot().await {
                let online: Vec<String> = snapshot.online.iter().map(|u| u.to_string()).collect();
                println!("* online: {}", online.join(", "));
            }
            Ok(())
        }
        Input::Call(to, kind) => client.start_call(to, kind).await,
        Input::Accept => client.accept_call().await,
        Input::Reject => client.reject_call().await,
        Input::HangUp => {
            client.hang_up();
            Ok(())
        }
        Input::Help => {
            println!("{HELP}");
            Ok(())
        }
        Input::Quit => return false,
    };

    if let Err(e) = result {
        println!("! {}", e.user_message());
    }
    true
}

fn print_message(me: UserId, m: &Message) {
    let time = m.created_at.with_timezone(&chrono::Local).format("%H:%M");
    let who = if m.sender_id == me {
        "you".to_string()
    } else {
        m.sender_id.to_string()
    };
    let mut line = format!("[{time}] #{} {who}: {}", m.id, m.body);
    if let Some(ref a) = m.attachment {
        line.push_str(&format!(" [{} {}]", a.name, a.url));
    }
    println!("{line}");
}

/// Messages not printed yet, remembering them as printed.
fn unseen<'a>(messages: &'a [Message], shown: &mut HashSet<MessageId>) -> Vec<&'a Message> {
    messages.iter().filter(|m| shown.insert(m.id)).collect()
}

/// Render one UI event. `shown` remembers which messages were printed.
async fn render(client: &ChatClient, me: UserId, event: UiEvent, shown: &mut HashSet<MessageId>) {
    match event {
        UiEvent::Connected => println!("* connected"),
        UiEvent::Disconnected { reason } => println!("* disconnected ({reason}), reconnecting"),
        UiEvent::ConversationOpened { counterpart } => {
            shown.clear();
            println!("* conversation with {counterpart}");
        }
        UiEvent::MessagesChanged { .. } | UiEvent::HistoryLoaded { .. } => {
            let Ok(snapshot) = client.snapshot().await else {
                return;
            };
            for m in unseen(&snapshot.messages, shown) {
                print_message(me, m);
            }
            if snapshot.pagination.has_next && !snapshot.loading_history {
                println!("* /older for earlier messages");
            }
        }
        UiEvent::ConversationsRefreshed { conversations } => {
            for c in conversations.iter().filter(|c| c.unread_count > 0) {
                let name = if c.user_name.is_empty() {
                    c.user_id.to_string()
                } else {
                    format!("{} ({})", c.user_name, c.user_id)
                };
                println!("* {name}: {} unread", c.unread_count);
            }
        }
        UiEvent::PresenceChanged { online } => println!("* {} online", online.len()),
        UiEvent::TypingChanged { user, typing: true } => println!("* {user} is typing"),
        UiEvent::TypingChanged { .. } => {}
        UiEvent::IncomingCall(call) => println!(
            "* {} ({}) is calling ({}), /accept or /reject",
            call.caller_name, call.caller_id, call.kind
        ),
        UiEvent::CallPhaseChanged(CallPhase::Idle) => {}
        UiEvent::CallPhaseChanged(phase) => println!("* call: {phase:?}"),
        UiEvent::CallEnded(outcome) => match outcome {
            CallOutcome::Ended => println!("* call ended"),
            CallOutcome::Rejected => println!("* call rejected"),
            CallOutcome::Failed(reason) => println!("* call failed: {reason}"),
        },
        UiEvent::Error(message) => println!("! {message}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    huddle_client::init_tracing();

    let args = Args::parse();
    let config = ClientConfig::from_env();
    let user = User::new(args.user_id, args.name, config.tenant.clone());
    let me = user.id;
    info!(user = %me, tenant = %config.tenant, socket = %config.socket_url, "Starting huddle");

    let store = Arc::new(HttpStore::new(
        config.api_url.clone(),
        config.tenant.clone(),
        config.auth_token.clone(),
    ));
    let (client, mut ui) = ChatClient::start(user, config, WsConnector, store, headless_backend());

    println!("{HELP}");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut shown = HashSet::new();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read stdin")? else {
                    break;
                };
                match parse_input(&line) {
                    Ok(input) => {
                        if !handle_input(&client, input).await {
                            break;
                        }
                    }
                    Err(usage) => println!("! {usage}"),
                }
            }
            Some(event) = ui.recv() => render(&client, me, event, &mut shown).await,
        }
    }

    client.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_a_message() {
        assert_eq!(parse_input("  hi there "), Ok(Input::Text("hi there".into())));
    }

    #[test]
    fn test_commands() {
        assert_eq!(parse_input("/open 42"), Ok(Input::Open(UserId(42))));
        assert_eq!(parse_input("/delete 7"), Ok(Input::Delete(MessageId(7))));
        assert_eq!(
            parse_input("/delete-conversation 9"),
            Ok(Input::DeleteConversation(UserId(9)))
        );
        assert_eq!(parse_input("/call 3"), Ok(Input::Call(UserId(3), CallKind::Voice)));
        assert_eq!(
            parse_input("/call 3 screen"),
            Ok(Input::Call(UserId(3), CallKind::Screen))
        );
        assert_eq!(parse_input("/close"), Ok(Input::Close));
        assert_eq!(parse_input("/list"), Ok(Input::List));
        assert_eq!(parse_input("/quit"), Ok(Input::Quit));
    }

    #[test]
    fn test_attach_keeps_text() {
        assert_eq!(
            parse_input("/attach ./cv.pdf my  resume"),
            Ok(Input::Attach {
                path: "./cv.pdf".into(),
                text: "my  resume".into(),
            })
        );
        assert!(parse_input("/attach").is_err());
    }

    #[test]
    fn test_bad_arguments() {
        assert!(parse_input("/open").is_err());
        assert!(parse_input("/open bob").is_err());
        assert!(parse_input("/call 3 hologram").is_err());
        assert!(parse_input("/frobnicate").is_err());
    }

    fn message(id: i64) -> Message {
        Message {
            id: MessageId(id),
            sender_id: UserId(2),
            receiver_id: UserId(1),
            body: format!("m{id}"),
            attachment: None,
            created_at: chrono::Utc::now(),
            is_read: false,
        }
    }

    #[test]
    fn test_each_message_printed_once() {
        let mut shown = HashSet::new();
        let first = vec![message(1), message(2)];
        let ids: Vec<MessageId> = unseen(&first, &mut shown).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId(1), MessageId(2)]);

        let grown = vec![message(1), message(2), message(3)];
        let ids: Vec<MessageId> = unseen(&grown, &mut shown).iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![MessageId(3)]);
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_for(Path::new("a/B.PNG")), "image/png");
        assert_eq!(mime_for(Path::new("notes")), "application/octet-stream");
    }
}
