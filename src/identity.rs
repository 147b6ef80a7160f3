//! Anonymous-sender identity codec.
//!
//! When a stranger's message is forwarded to the administrator, the relay
//! posts a marker message right after it that carries the stranger's identity
//! invisibly: a link annotation over a marker glyph whose target is a
//! `tg://user?id=…` URI. A later reply to that marker message can then be
//! resolved back to the original sender without any database — `decode` reads
//! the identity straight out of the message's annotations.
//!
//! Telegram may rewrite the encoding on delivery: a `tg://user` link becomes
//! a direct user-mention annotation when the user's profile is resolvable, or
//! stays a plain link annotation otherwise. The decoder accepts both, plus a
//! compact form where a single `code` annotation spans the bare numeric id.

use std::sync::LazyLock;

use regex::Regex;
use teloxide::utils::html::escape;
use tracing::debug;

use crate::message::{AnnotationKind, InboundMessage};

/// Leading glyph run that flags a message as carrying an encoded identity.
pub const MARKER: &str = "⤷ ";

const USER_URL_TEMPLATE: &str = "tg://user?id=";

static USER_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^tg://user\?id=(\d+)$").expect("identity URI pattern"));

/// Marker length in UTF-16 code units, the unit annotation spans are measured in.
fn marker_utf16_len() -> usize {
    MARKER.encode_utf16().count()
}

/// Build the HTML marker message identifying `user_id`.
///
/// The markup doubles as the annotation plan: Telegram turns the first anchor
/// (label = the marker glyph, target = the identity URI) into the invisible
/// annotation `decode` later reads back, and the second anchor into the
/// visible link on the display name — `https://t.me/<username>` when the user
/// has one, the identity URI otherwise.
pub fn encode(user_id: i64, display_name: &str, username: Option<&str>) -> String {
    let user_url = format!("{USER_URL_TEMPLATE}{user_id}");
    let visible_url = match username {
        Some(name) => format!("https://t.me/{name}"),
        None => user_url.clone(),
    };
    format!(
        "<a href=\"{user_url}\">{MARKER}</a>Sent by user <a href=\"{visible_url}\">{}</a> (<code>{user_id}</code>).",
        escape(display_name),
    )
}

/// Recover the user id a marker message was encoded with.
///
/// Returns `None` for anything that doesn't match the marker shape —
/// malformed markers are expected absence, never an error.
pub fn decode(msg: &InboundMessage) -> Option<i64> {
    let text = msg.text_or_caption()?;
    if !text.starts_with(MARKER) {
        debug!("no marker glyph at start of text");
        return None;
    }
    let first = match msg.annotations.first() {
        Some(first) => first,
        None => {
            debug!("marker glyph but no annotations");
            return None;
        }
    };

    // Compact form: a single code annotation over the bare numeric id.
    if first.kind == AnnotationKind::Code && msg.annotations.len() == 1 {
        let run = utf16_slice(text, first.offset, first.length)?;
        return match run.parse::<i64>() {
            Ok(id) => Some(id),
            Err(_) => {
                debug!(run = %run, "code annotation is not a numeric id");
                None
            }
        };
    }

    if msg.annotations.len() < 2 {
        debug!("not enough annotations for the link form");
        return None;
    }
    if first.offset != 0 || first.length != marker_utf16_len() {
        debug!(
            offset = first.offset,
            length = first.length,
            "first annotation does not cover the marker glyph"
        );
        return None;
    }

    match &first.kind {
        AnnotationKind::MentionOfUser { user_id } => Some(*user_id),
        AnnotationKind::Link { url } => {
            let captures = USER_URL_RE.captures(url)?;
            captures[1].parse::<i64>().ok()
        }
        _ => {
            debug!("first annotation is neither a mention nor a link");
            None
        }
    }
}

/// Slice `text` by UTF-16 code-unit offsets, as annotation spans are measured.
fn utf16_slice(text: &str, offset: usize, length: usize) -> Option<String> {
    let units: Vec<u16> = text.encode_utf16().collect();
    let end = offset.checked_add(length)?;
    if end > units.len() {
        return None;
    }
    String::from_utf16(&units[offset..end]).ok()
}
