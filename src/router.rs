//! Per-update relay routing.
//!
//! `route` is a pure function of (chat kind × sender role × reply-target
//! shape × text shape) to exactly one [`RelayDecision`]; no state survives
//! between calls besides the externally-resolved [`Registration`]. All
//! outgoing HTML (marker messages, notices, echo text) is rendered here so
//! the executor in `relay` only has to perform transport calls.

use teloxide::utils::html::escape;
use tracing::debug;

use crate::identity;
use crate::message::{ChatRef, InboundMessage, MessageBody, UserRef};
use crate::quote;

/// The resolved registration a webhook call runs under: which administrator
/// owns which proxy bot, and the echo prefix they chose.
#[derive(Debug, Clone)]
pub struct Registration {
    pub admin_id: i64,
    pub prefix: String,
    /// The proxy bot's API token (`<bot id>:<secret>`).
    pub proxy_token: String,
    /// Bot id parsed out of the token.
    pub proxy_id: i64,
    /// Proxy bot @username, when known; enables `/delete@name` command forms.
    pub proxy_username: Option<String>,
}

impl Registration {
    /// Build a registration from the raw webhook parameters. `None` when the
    /// token is malformed — the caller treats that as "ignore the update".
    pub fn resolve(admin_id: i64, prefix: String, proxy_token: String) -> Option<Self> {
        let proxy_id = proxy_token.split(':').next()?.parse().ok()?;
        Some(Self {
            admin_id,
            prefix,
            proxy_token,
            proxy_id,
            proxy_username: None,
        })
    }
}

/// Whether an edit rewrites message text or a media caption.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditTarget {
    Text,
    Caption,
}

/// The single action to take for one inbound update.
#[derive(Debug, Clone)]
pub enum RelayDecision {
    /// Explicit no-op.
    Ignore,
    /// Greet the administrator in their private relay channel.
    SendGreeting,
    /// Forward the stranger's message to the administrator and attach the
    /// identity marker as a reply to the forwarded copy.
    ForwardAndNotifyAdmin { marker_html: String },
    /// Repost the administrator's message to `destination_user_id`.
    RelayAdminReply {
        destination_user_id: i64,
        html: String,
        body: MessageBody,
        reply_to: Option<i32>,
    },
    /// Tell the administrator someone replied to the proxy in a group.
    NotifyAdminOfGroupReply { notice_html: String },
    /// Delete a proxy-authored message, then best-effort delete the command.
    PerformDelete {
        target_message_id: i32,
        command_message_id: i32,
    },
    /// Rewrite a proxy-authored message, then best-effort delete the command.
    PerformEdit {
        target_message_id: i32,
        new_html: String,
        target: EditTarget,
        command_message_id: i32,
    },
    /// Echo under the proxy identity (optionally headed by a synthetic
    /// quote), then best-effort delete the administrator's original.
    EchoWithQuote {
        html: String,
        body: MessageBody,
        reply_to: Option<i32>,
        original_message_id: i32,
    },
}

/// Decide what to do with one inbound message. First matching rule wins.
pub fn route(msg: &InboundMessage, reg: &Registration) -> RelayDecision {
    let Some(text) = msg.text_or_caption() else {
        return RelayDecision::Ignore;
    };
    if msg.chat.is_private() {
        route_private(msg, text, reg)
    } else {
        route_group(msg, text, reg)
    }
}

fn route_private(msg: &InboundMessage, text: &str, reg: &Registration) -> RelayDecision {
    if msg.from.id != reg.admin_id {
        // A stranger writing to the proxy: forward it and attach the
        // identity marker so a later reply finds its way back.
        debug!(user = msg.from.id, "stranger message, forwarding to admin");
        let marker_html = identity::encode(
            msg.from.id,
            &msg.from.full_name(),
            msg.from.username.as_deref(),
        );
        return RelayDecision::ForwardAndNotifyAdmin { marker_html };
    }

    if text == "/start" {
        return RelayDecision::SendGreeting;
    }

    if let Some(reply) = &msg.reply_to {
        if let Some(original) = &reply.forward_from {
            // Reply to a forwarded message: the forward header names the
            // real sender directly.
            debug!(user = original.id, "admin replied to a forward");
            return relay_to(original.id, msg, None);
        }
        if let Some(user_id) = identity::decode(reply) {
            debug!(user = user_id, "admin replied to an identity marker");
            return relay_to(user_id, msg, None);
        }
    }

    // Not a recognizable reply: echo back to the admin as if prefixed.
    relay_to(reg.admin_id, msg, Some(msg.id))
}

fn relay_to(destination: i64, msg: &InboundMessage, reply_to: Option<i32>) -> RelayDecision {
    let html = escape(msg.text_or_caption().unwrap_or_default());
    RelayDecision::RelayAdminReply {
        destination_user_id: destination,
        html,
        body: msg.body.clone(),
        reply_to,
    }
}

fn route_group(msg: &InboundMessage, text: &str, reg: &Registration) -> RelayDecision {
    let reply = msg.reply_to.as_deref();
    let reply_is_proxy = reply.is_some_and(|r| r.from.id == reg.proxy_id);

    if msg.from.id != reg.admin_id {
        if reply_is_proxy {
            return RelayDecision::NotifyAdminOfGroupReply {
                notice_html: group_reply_notice(msg),
            };
        }
        debug!(user = msg.from.id, "group message from non-admin, ignoring");
        return RelayDecision::Ignore;
    }

    if text.starts_with("/delete") || text.starts_with("/edit") {
        let Some(target) = reply.filter(|r| r.from.id == reg.proxy_id) else {
            debug!("command does not reply to a proxy message, ignoring");
            return RelayDecision::Ignore;
        };
        if is_delete_command(text, reg.proxy_username.as_deref()) {
            return RelayDecision::PerformDelete {
                target_message_id: target.id,
                command_message_id: msg.id,
            };
        }
        if let Some(new_text) = edit_command_text(text, reg.proxy_username.as_deref()) {
            let edit_target = match &target.body {
                MessageBody::Text { .. } => EditTarget::Text,
                MessageBody::Photo { .. } | MessageBody::Document { .. } => EditTarget::Caption,
                MessageBody::Other => return RelayDecision::Ignore,
            };
            return RelayDecision::PerformEdit {
                target_message_id: target.id,
                new_html: escape(new_text),
                target: edit_target,
                command_message_id: msg.id,
            };
        }
        // Bare `/edit`, or an unrecognized command form.
        return RelayDecision::Ignore;
    }

    let Some(body_text) = text.strip_prefix(reg.prefix.as_str()) else {
        debug!(prefix = %reg.prefix, "admin group message without prefix, ignoring");
        return RelayDecision::Ignore;
    };
    let body_text = body_text.trim();

    // When replying to another bot's message the native preview can't carry
    // the proxy's repost, so prepend the synthetic one.
    let header = match reply {
        Some(r) if r.from.is_bot && r.from.id != reg.proxy_id => quote::build(
            &msg.chat,
            &r.from,
            r.id,
            r.text_or_caption().unwrap_or_default(),
        ),
        _ => String::new(),
    };

    RelayDecision::EchoWithQuote {
        html: format!("{header}{}", escape(body_text)),
        body: msg.body.clone(),
        reply_to: reply.map(|r| r.id),
        original_message_id: msg.id,
    }
}

/// Notice sent to the administrator when someone replies to the proxy in a
/// group; supergroups get a permalink to the replying message.
fn group_reply_notice(msg: &InboundMessage) -> String {
    let base = format!(
        "In chat {} user {} replied to this bot's message",
        format_chat(&msg.chat),
        format_user(&msg.from),
    );
    match msg.chat.permalink_fragment() {
        Some(fragment) => format!(
            "{base}:\n<a href=\"https://t.me/{fragment}/{}\">→ Go to message</a>",
            msg.id
        ),
        None => format!("{base}."),
    }
}

fn format_user(user: &UserRef) -> String {
    format!(
        "<a href=\"tg://user?id={id}\"><b>{}</b></a> (<code>{id}</code>)",
        escape(&user.full_name()),
        id = user.id,
    )
}

fn format_chat(chat: &ChatRef) -> String {
    let title = match &chat.title {
        Some(title) => escape(title),
        None => return format!("<code>{}</code>", chat.id),
    };
    match &chat.username {
        Some(username) => format!("<a href=\"https://t.me/{username}\">{title}</a>"),
        None => format!("<b>{title}</b>"),
    }
}

/// The greeting posted when the administrator sends `/start` to the proxy.
pub fn greeting_html(prefix: &str) -> String {
    format!(
        "<i>Greetings.\n\
         This is your own bot, set up with the prefix {:?}.\n\
         Here I will forward you any messages from users writing to this bot directly.\n\
         Reply to those messages to send them an answer.\n\
         \n\
         If it doesn't find the message you replied to (that is you didn't reply to any \
         user, or the user's privacy settings disallow forwards) it will instead echo \
         what you wrote.</i>",
        escape(prefix),
    )
}

fn is_delete_command(text: &str, proxy_username: Option<&str>) -> bool {
    if text == "/delete" || text.starts_with("/delete ") {
        return true;
    }
    match proxy_username {
        Some(name) => {
            let suffixed = format!("/delete@{name}");
            text == suffixed || text.starts_with(&format!("{suffixed} "))
        }
        None => false,
    }
}

/// The replacement text of an `/edit` command, or `None` when the form is
/// not a valid edit (bare `/edit` included).
fn edit_command_text<'a>(text: &'a str, proxy_username: Option<&str>) -> Option<&'a str> {
    if let Some(rest) = text.strip_prefix("/edit ") {
        return Some(rest.trim());
    }
    if let Some(name) = proxy_username {
        if let Some(rest) = text.strip_prefix(&format!("/edit@{name} ")) {
            return Some(rest.trim());
        }
    }
    None
}
