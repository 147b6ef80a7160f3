//! Synthetic quote-header codec.
//!
//! When the proxy reposts a message under its own identity the native
//! reply-preview UI cannot be attached, so the relay fakes one: a two-line
//! bar-prefixed block imitating the preview, wrapped in a single bold
//! hyperlink to the original message (or its author). `strip` recognizes the
//! block at the start of a text and removes it, so edits and re-quotes don't
//! stack headers.

use std::sync::LazyLock;

use regex::Regex;
use teloxide::utils::html::escape;

use crate::message::{ChatRef, UserRef};

const BAR: char = '┃';
const ELLIPSIS: char = '…';
/// Maximum visible preview length, ellipsis included.
const MAX_PREVIEW_LEN: usize = 18;
/// Trailing whitespace after the author name, pushing the hyperlink's visible
/// region to a full line.
const NAME_PAD_WIDTH: usize = 84;

static HEADER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\A┃.* +\s*\n┃ .+…?\n").expect("quote header pattern"));

/// Render the two-line header for a reply to `author`'s message `reply_id`.
///
/// The link targets the message's permalink when the chat has one
/// (supergroups), else the author directly. `old_text` is the quoted
/// message's text; any header it already carries is removed before
/// truncating it to the preview.
pub fn build(chat: &ChatRef, author: &UserRef, reply_id: i32, old_text: &str) -> String {
    let url = match chat.permalink_fragment() {
        Some(fragment) => format!("https://t.me/{fragment}/{reply_id}"),
        None => format!("tg://user?id={}", author.id),
    };
    let preview = truncate_preview(strip(old_text).trim());
    let padding = " ".repeat(NAME_PAD_WIDTH);
    let inner = format!(
        "{BAR} {}{padding}\n{BAR} {preview}",
        author.full_name()
    );
    format!("<b><a href=\"{url}\">{}</a></b>\n", escape(&inner))
}

/// Remove every header at the start of `text`; unchanged if none is there.
/// Headers can stack (a re-quote of an already-headed echo), so the anchored
/// removal repeats until a fixpoint. Idempotent — a line that merely begins
/// with the bar glyph but doesn't match the full two-line shape is left
/// alone.
pub fn strip(text: &str) -> String {
    let mut current = text.to_string();
    loop {
        let cut = HEADER_RE.replace(&current, "");
        if cut == current {
            return current;
        }
        current = cut.into_owned();
    }
}

/// Like [`strip`], but tells the caller whether a header was present.
pub fn detect(text: &str) -> Option<String> {
    let cut = strip(text);
    if cut != text {
        Some(cut)
    } else {
        None
    }
}

fn truncate_preview(text: &str) -> String {
    if text.chars().count() > MAX_PREVIEW_LEN {
        let mut cut: String = text.chars().take(MAX_PREVIEW_LEN - 1).collect();
        cut.push(ELLIPSIS);
        cut
    } else {
        text.to_string()
    }
}
