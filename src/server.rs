//! Webhook server for registered character bots.
//!
//! Every registered character bot has its webhook pointed at
//! `/rp_bot_webhooks/{admin_user_id}/{b64_prefix}/{b64_api_key}`, so the
//! registration travels inside the URL and the server needs no storage. The
//! handler always answers `OK`: Telegram would otherwise keep redelivering
//! the update, and a relay failure should look like silence, not an error.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use base64::engine::general_purpose::URL_SAFE;
use base64::Engine as _;
use teloxide::prelude::*;
use teloxide::types::{
    InlineQuery, InlineQueryResult, InlineQueryResultArticle, InputMessageContent,
    InputMessageContentText, Update, UpdateKind,
};
use tracing::{debug, info, warn};

use crate::relay::Relay;
use crate::router::{self, Registration};
use crate::transport::{self, TelegramTransport};

pub struct AppState {
    /// The hub bot, lent to the executor for dual-identity cleanup deletes.
    pub hub_bot: Bot,
    /// `get_me` results per proxy bot id, so `@`-suffixed command forms
    /// resolve without a round trip on every update.
    usernames: Mutex<HashMap<i64, String>>,
}

impl AppState {
    pub fn new(hub_bot: Bot) -> Self {
        Self {
            hub_bot,
            usernames: Mutex::new(HashMap::new()),
        }
    }

    /// The proxy bot's @username, from the cache or one `get_me` call.
    /// `None` when the API is unreachable; the relay then only honors the
    /// bare command forms.
    async fn proxy_username(&self, bot: &Bot, proxy_id: i64) -> Option<String> {
        if let Some(name) = self.usernames.lock().unwrap().get(&proxy_id) {
            return Some(name.clone());
        }
        match bot.get_me().await {
            Ok(me) => {
                let name = me.username().to_string();
                self.usernames
                    .lock()
                    .unwrap()
                    .insert(proxy_id, name.clone());
                Some(name)
            }
            Err(e) => {
                warn!(proxy_id, "could not resolve proxy bot username: {e}");
                None
            }
        }
    }
}

pub async fn run(state: Arc<AppState>, bind_addr: &str) -> Result<()> {
    let app = Router::new()
        .route("/", get(index))
        .route("/healthcheck", get(healthcheck))
        .route(
            "/rp_bot_webhooks/{admin_user_id}/{b64_prefix}/{b64_api_key}",
            post(rp_bot_webhook),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!("Webhook server listening on {bind_addr}");

    axum::serve(listener, app).await.context("Server error")?;
    Ok(())
}

async fn index() -> &'static str {
    "Your advertisements could be here!"
}

async fn healthcheck() -> &'static str {
    "kk"
}

async fn rp_bot_webhook(
    State(state): State<Arc<AppState>>,
    Path((admin_user_id, b64_prefix, b64_api_key)): Path<(i64, String, String)>,
    Json(update): Json<Update>,
) -> &'static str {
    if let Err(e) = handle_update(&state, admin_user_id, &b64_prefix, &b64_api_key, update).await {
        warn!("update not relayed: {e:#}");
    }
    "OK"
}

/// Decode the registration embedded in the webhook URL. `None` for malformed
/// tokens — a configuration error, answered with `OK` and no relay.
fn decode_registration(
    admin_user_id: i64,
    b64_prefix: &str,
    b64_api_key: &str,
) -> Option<Registration> {
    let prefix = String::from_utf8(URL_SAFE.decode(b64_prefix).ok()?).ok()?;
    let token = String::from_utf8(URL_SAFE.decode(b64_api_key).ok()?).ok()?;
    Registration::resolve(admin_user_id, prefix, token)
}

async fn handle_update(
    state: &AppState,
    admin_user_id: i64,
    b64_prefix: &str,
    b64_api_key: &str,
    update: Update,
) -> Result<()> {
    let Some(mut reg) = decode_registration(admin_user_id, b64_prefix, b64_api_key) else {
        warn!(admin_user_id, "malformed registration token, ignoring update");
        return Ok(());
    };
    let proxy_bot = Bot::new(&reg.proxy_token);

    match update.kind {
        UpdateKind::Message(ref tg_msg) => {
            let Some(msg) = transport::convert_message(tg_msg) else {
                debug!("update is not a relayable message");
                return Ok(());
            };
            reg.proxy_username = state.proxy_username(&proxy_bot, reg.proxy_id).await;
            let decision = router::route(&msg, &reg);
            debug!(chat = msg.chat.id, from = msg.from.id, ?decision, "routed");

            let proxy = TelegramTransport::new(proxy_bot);
            let hub = TelegramTransport::new(state.hub_bot.clone());
            Relay::new(&proxy, Some(&hub))
                .execute(&msg, &reg, decision)
                .await
        }
        UpdateKind::InlineQuery(query) => answer_inline(&proxy_bot, &reg, query).await,
        _ => {
            debug!("not a message or inline query");
            Ok(())
        }
    }
}

/// Inline mode lets the administrator post as the character in any chat.
/// Anyone else gets an empty result set.
async fn answer_inline(bot: &Bot, reg: &Registration, query: InlineQuery) -> Result<()> {
    if query.from.id.0 as i64 != reg.admin_id {
        bot.answer_inline_query(query.id, Vec::<InlineQueryResult>::new())
            .await?;
        return Ok(());
    }

    let text = query.query.clone();
    let mut result_id = URL_SAFE.encode(&text);
    result_id.truncate(64); // Telegram caps result ids at 64 bytes
    let article = InlineQueryResultArticle::new(
        result_id,
        "Send as this character",
        InputMessageContent::Text(InputMessageContentText::new(text)),
    );
    bot.answer_inline_query(query.id, vec![InlineQueryResult::Article(article)])
        .await?;
    Ok(())
}
