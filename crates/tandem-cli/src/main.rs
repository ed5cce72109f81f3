mod input;
mod render;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use tandem_client::{ClientConfig, Gateway, HttpApi};
use tandem_sync::{Draft, FailurePolicy, Session, SessionHandle, SessionNotice, SyncConfig, UploadFile};
use tandem_types::{Message, MessageStatus, ReplyPreview};

use input::Input;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Logs go to stderr so they don't interleave with the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "tandem=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    // Config
    let server_url = std::env::var("TANDEM_SERVER_URL").unwrap_or_else(|_| "http://localhost:3000".into());
    let token = std::env::var("TANDEM_TOKEN").context("TANDEM_TOKEN must be set")?;
    let user_id: Uuid = std::env::var("TANDEM_USER_ID")
        .context("TANDEM_USER_ID must be set")?
        .parse()
        .context("TANDEM_USER_ID is not a uuid")?;
    let conversation_id: Uuid = std::env::var("TANDEM_CONVERSATION_ID")
        .context("TANDEM_CONVERSATION_ID must be set")?
        .parse()
        .context("TANDEM_CONVERSATION_ID is not a uuid")?;
    let failure_policy = match std::env::var("TANDEM_FAILURE_POLICY") {
        Ok(raw) => raw.parse::<FailurePolicy>().map_err(anyhow::Error::msg)?,
        Err(_) => FailurePolicy::default(),
    };

    let client_config = ClientConfig::new(&server_url, token)?;
    let sync_config = SyncConfig {
        failure_policy,
        ..Default::default()
    };

    let api = Arc::new(HttpApi::new(client_config.clone())?);
    let (gateway, events) = Gateway::connect(&client_config).await?;
    info!("Opening conversation {} as {}", conversation_id, user_id);
    let (session, notices) = Session::spawn(conversation_id, user_id, sync_config, api, gateway.clone(), events);

    tokio::spawn(print_transcript(session.clone(), user_id));
    tokio::spawn(print_notices(notices));

    println!("{}", input::HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let parsed = match input::parse(&line) {
            Ok(parsed) => parsed,
            Err(e) => {
                eprintln!("{}", e);
                continue;
            }
        };
        match parsed {
            Input::Quit => break,
            Input::Empty => {}
            Input::Help => println!("{}", input::HELP),
            other => {
                if !gateway.is_connected() {
                    eprintln!("! gateway disconnected, live updates have stopped");
                }
                if let Err(e) = dispatch(&session, other).await {
                    eprintln!("! {}", e);
                }
            }
        }
    }

    let abandoned = session.close().await?;
    if !abandoned.is_empty() {
        warn!("{} message(s) were still sending when the session closed", abandoned.len());
    }
    Ok(())
}

async fn dispatch(session: &SessionHandle, cmd: Input) -> anyhow::Result<()> {
    match cmd {
        Input::Send(text) => {
            session.send(Draft::text(text)).await?;
        }
        Input::Reply { index, text } => {
            let target = message_at(session, index)?;
            let draft = Draft {
                content: text,
                reply_to: Some(ReplyPreview {
                    message_id: confirmed_id(&target)?,
                    sender_id: target.sender_id,
                    content: target.content.clone(),
                }),
                ..Default::default()
            };
            session.send(draft).await?;
        }
        Input::Attach { path, caption } => {
            let file = read_upload(Path::new(&path)).await?;
            let draft = Draft {
                content: caption,
                files: vec![file],
                ..Default::default()
            };
            session.send(draft).await?;
        }
        Input::Edit { index, text } => {
            let id = confirmed_id(&message_at(session, index)?)?;
            session.edit(id, text).await?;
        }
        Input::React { index, emoji } => {
            let id = confirmed_id(&message_at(session, index)?)?;
            session.react(id, emoji).await?;
        }
        Input::Delete { index, for_everyone } => {
            let id = confirmed_id(&message_at(session, index)?)?;
            session.delete(id, for_everyone).await?;
        }
        Input::Pin(index) => {
            let id = confirmed_id(&message_at(session, index)?)?;
            let pinned = session.pin(id).await?;
            println!("{}", if pinned { "pinned" } else { "unpinned" });
        }
        Input::Star(index) => {
            let id = confirmed_id(&message_at(session, index)?)?;
            session.star(id).await?;
        }
        Input::Retry => {
            let snapshot = session.snapshot();
            let failed = snapshot
                .messages
                .iter()
                .rev()
                .find(|m| m.status == MessageStatus::Failed)
                .and_then(|m| m.key.local_id());
            match failed {
                Some(local_id) => session.retry(local_id).await?,
                None => bail!("nothing to retry"),
            }
        }
        Input::NextPin => session.next_pin()?,
        Input::PreviousPin => session.previous_pin()?,
        Input::JumpPin(index) => {
            let id = confirmed_id(&message_at(session, index)?)?;
            session
                .select_pin(id)
                .await
                .with_context(|| format!("message {} is not pinned", index))?;
        }
        Input::Help | Input::Quit | Input::Empty => {}
    }
    Ok(())
}

fn message_at(session: &SessionHandle, index: usize) -> anyhow::Result<Message> {
    let snapshot = session.snapshot();
    snapshot
        .messages
        .get(index.wrapping_sub(1))
        .cloned()
        .with_context(|| format!("no message {}", index))
}

fn confirmed_id(msg: &Message) -> anyhow::Result<Uuid> {
    msg.server_id().context("message is still sending")
}

async fn read_upload(path: &Path) -> anyhow::Result<UploadFile> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("cannot read {}", path.display()))?;
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .context("path has no file name")?
        .to_string();
    Ok(UploadFile {
        mime: guess_mime(&name).to_string(),
        name,
        bytes: Bytes::from(bytes),
    })
}

fn guess_mime(name: &str) -> &'static str {
    let ext = name.rsplit_once('.').map(|(_, e)| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("mp4") => "video/mp4",
        Some("mp3") => "audio/mpeg",
        Some("ogg" | "opus") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("pdf") => "application/pdf",
        Some("txt") => "text/plain",
        _ => "application/octet-stream",
    }
}

async fn print_transcript(session: SessionHandle, self_id: Uuid) {
    let mut snapshots = session.subscribe();
    loop {
        let text = render::render(&snapshots.borrow_and_update(), self_id);
        println!("\n{}", text);
        if snapshots.changed().await.is_err() {
            break;
        }
    }
}

async fn print_notices(mut notices: tokio::sync::mpsc::UnboundedReceiver<SessionNotice>) {
    while let Some(notice) = notices.recv().await {
        match notice {
            SessionNotice::SendConfirmed { .. } => {}
            SessionNotice::SendFailed {
                error, retained: true, ..
            } => eprintln!("! message not sent ({}), /retry to resend", error),
            SessionNotice::SendFailed { error, .. } => eprintln!("! message not sent: {}", error),
            SessionNotice::HistoryFailed { error } => eprintln!("! could not load history: {}", error),
        }
    }
}
