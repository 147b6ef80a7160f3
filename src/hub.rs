//! The hub bot: registration front-end for character bots.
//!
//! Users create their character bot with @BotFather, then hand its API key
//! and their chosen echo prefix to `/add_bot` here. Registration writes no
//! state anywhere — it just points the character bot's webhook at our server
//! with the (admin id, prefix, api key) triple baked into the URL.

use std::sync::Arc;

use anyhow::Result;
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use teloxide::prelude::*;
use teloxide::types::ParseMode;
use teloxide::utils::html::escape;
use tracing::{info, warn};
use url::Url;

pub struct Hub {
    pub bot: Bot,
    /// Hub bot @username, resolved once at startup.
    pub username: String,
    pub public_hostname: String,
}

pub async fn run(hub: Arc<Hub>) -> Result<()> {
    info!("Starting hub bot dispatcher...");

    let handler = Update::filter_message().endpoint(handle_message);

    Dispatcher::builder(hub.bot.clone(), handler)
        .dependencies(dptree::deps![hub.clone()])
        .default_handler(|upd| async move {
            warn!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("hub"))
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_message(bot: Bot, msg: Message, hub: Arc<Hub>) -> ResponseResult<()> {
    let text = match msg.text() {
        Some(t) => t.to_string(),
        None => return Ok(()),
    };

    if text == "/start" {
        bot.send_message(msg.chat.id, "Hello. Do you seek /help?")
            .await?;
        return Ok(());
    }

    if text == "/help" {
        bot.send_message(msg.chat.id, help_text(&hub.username))
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    }

    if is_add_bot_command(&text) {
        handle_add_bot(&bot, &hub, &msg, &text).await?;
        return Ok(());
    }

    Ok(())
}

/// `/add_bot` alone or followed by its arguments; longer commands that merely
/// share the prefix don't count.
fn is_add_bot_command(text: &str) -> bool {
    match text.strip_prefix("/add_bot") {
        Some(rest) => rest.is_empty() || rest.starts_with(' ') || rest.starts_with('\n'),
        None => false,
    }
}

async fn handle_add_bot(bot: &Bot, hub: &Hub, msg: &Message, text: &str) -> ResponseResult<()> {
    let mut lines = text.lines();
    let api_key = lines
        .next()
        .and_then(|first| first.strip_prefix("/add_bot"))
        .map(str::trim)
        .unwrap_or("");
    let prefix = lines.next().map(str::trim).unwrap_or("");

    if api_key.is_empty() || prefix.is_empty() {
        bot.send_message(
            msg.chat.id,
            "Please send your bot and prefix like this:\n\
             <pre>/add_bot {API-KEY}\n\
             {PREFIX}</pre>\n\
             So on the <b>same line with the /add_bot</b> you put your bot API key, \
             and on the <b>second line</b> the prefix you wanna use.",
        )
        .parse_mode(ParseMode::Html)
        .await?;
        return Ok(());
    }

    let admin_id = match msg.from.as_ref() {
        Some(user) => user.id.0 as i64,
        None => return Ok(()),
    };

    match register(hub, admin_id, api_key, prefix).await {
        Ok((registered, usage)) => {
            bot.send_message(msg.chat.id, registered)
                .parse_mode(ParseMode::Html)
                .await?;
            bot.send_message(msg.chat.id, usage)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        Err(e) => {
            bot.send_message(msg.chat.id, format!("Error: {e:#}"))
                .await?;
        }
    }
    Ok(())
}

/// Verify the character bot's token and point its webhook at our server.
async fn register(
    hub: &Hub,
    admin_id: i64,
    api_key: &str,
    prefix: &str,
) -> Result<(String, String)> {
    let rp_bot = Bot::new(api_key);
    let me = rp_bot.get_me().await?;

    let b64_prefix = URL_SAFE.encode(prefix);
    let b64_key = URL_SAFE.encode(api_key);
    let webhook_url = Url::parse(&format!(
        "https://{}/rp_bot_webhooks/{admin_id}/{b64_prefix}/{b64_key}",
        hub.public_hostname,
    ))?;
    info!("setting webhook to {webhook_url}");
    rp_bot.set_webhook(webhook_url).await?;

    let character_name = escape(&me.user.first_name);
    let character_username = me.username();
    let registered = format!(
        "Successfully registered {character_name}.\n\
         Please now start your own bot (@{character_username}) by sending \
         <code>/start</code> to it.",
    );
    let usage = format!(
        "<b>How to use your bot @{character_username} in groups</b> (the bot needs to be a \
         member of the group, additionally admin to clean up your messages)\n\
         \n\
         Start any message with <b>{prefix}</b> to have it be echoed by the bot.\n\
         \n\
         You can then reply with <code>/edit NEW TEXT</code> to a post by the bot to \
         replace text or caption with <code>NEW TEXT</code>.\n\
         Reply <code>/delete</code> to a message of the bot to have it deleted.\n\
         \n\
         If you allow either your bot @{character_username} or this bot @{hub_username} \
         as admin in the chat you're roleplaying in, it will delete your original \
         message (the one with the prefix) automatically, so you don't end up with the \
         text always being there twice.",
        prefix = escape(prefix),
        hub_username = hub.username,
    );
    Ok((registered, usage))
}

fn help_text(hub_username: &str) -> String {
    format!(
        "Go ahead, set up the bot you wanna use for RPing with @BotFather first:\n\
         \n\
         <b>1.</b> Write <code>/addbot</code> to @BotFather, set your <u>character's \
         name</u> and then a <u>fitting username</u>.\n\
         \n\
         <b>2.</b> Set the <u>privacy of your bot</u> (<code>/setprivacy</code>) to \
         <u>disabled</u>, so this service can receive your messages even if you don't \
         mention the bot's @username.\n\
         \n\
         <b>3.</b> You can set up a <u>profile picture</u> there too with \
         <code>/setuserpic</code>, and an <u>about text</u> with \
         <code>/setabouttext</code>.\n\
         \n\
         <b>4.</b> After that, <u>come back to this bot</u> and use /add_bot to finally \
         let it listen and respond to messages.\n\
         \n\
         <b>5.</b> To test, start your bot (send /start to it). It should respond to \
         your messages there.\n\
         \n\
         <i>Powered by</i> @{hub_username}."
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_bot_command_matching() {
        assert!(is_add_bot_command("/add_bot"));
        assert!(is_add_bot_command("/add_bot 7000:AAbb\n!"));
        assert!(!is_add_bot_command("/add_botanical garden"));
        assert!(!is_add_bot_command("add_bot"));
    }

    #[test]
    fn help_text_names_the_hub_bot() {
        let text = help_text("relay_hub_bot");
        assert!(text.contains("@relay_hub_bot"));
        assert!(text.contains("/add_bot"));
    }
}
