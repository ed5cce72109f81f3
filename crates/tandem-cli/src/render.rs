use std::fmt::Write;

use uuid::Uuid;

use tandem_sync::Snapshot;
use tandem_types::{Message, MessageStatus};

/// How many trailing messages a redraw shows.
pub const TRANSCRIPT_TAIL: usize = 20;

fn status_mark(status: MessageStatus) -> &'static str {
    match status {
        MessageStatus::Sending => "…",
        MessageStatus::Sent => "✓",
        MessageStatus::Delivered => "✓✓",
        MessageStatus::Seen => "👁",
        MessageStatus::Failed => "✗",
    }
}

fn short(id: Uuid) -> String {
    id.simple().to_string()[..8].to_string()
}

fn line(index: usize, msg: &Message, self_id: Uuid) -> String {
    let who = if msg.sender_id == self_id {
        "you".to_string()
    } else {
        short(msg.sender_id)
    };
    let mut out = format!("{:>3}. [{}] {}: {}", index, msg.created_at.format("%H:%M"), who, msg.content.trim());

    for attachment in &msg.attachments {
        let _ = write!(out, " [{} {}B]", attachment.file_type, attachment.file_size);
    }
    if msg.is_edited {
        out.push_str(" (edited)");
    }
    for group in msg.reaction_groups() {
        let _ = write!(out, " {}{}", group.emoji, group.count);
    }
    if msg.is_pinned() {
        out.push_str(" 📌");
    }
    if msg.starred_by.contains(&self_id) {
        out.push_str(" ★");
    }
    if msg.sender_id == self_id {
        let _ = write!(out, " {}", status_mark(msg.status));
    }
    out
}

/// Render the tail of the transcript plus pin and typing status. Numbers
/// match positions in `snapshot.messages`, 1-based.
pub fn render(snapshot: &Snapshot, self_id: Uuid) -> String {
    let mut out = String::new();
    let skip = snapshot.messages.len().saturating_sub(TRANSCRIPT_TAIL);

    for (i, msg) in snapshot.messages.iter().enumerate().skip(skip) {
        if let Some(reply) = &msg.reply_to {
            let _ = writeln!(out, "       ↳ {}", reply.content.trim());
        }
        let _ = writeln!(out, "{}", line(i + 1, msg, self_id));
    }

    if let Some(pin) = snapshot.current_pin().and_then(|id| snapshot.message(id)) {
        let _ = writeln!(
            out,
            "📌 {}/{}: {}",
            snapshot.pinned_cursor + 1,
            snapshot.pinned.len(),
            pin.content.trim()
        );
    }
    if !snapshot.typing.is_empty() {
        let who: Vec<String> = snapshot.typing.iter().map(|id| short(*id)).collect();
        let _ = writeln!(out, "{} typing…", who.join(", "));
    }
    if snapshot.closed {
        out.push_str("(conversation closed)\n");
    }
    out
}
