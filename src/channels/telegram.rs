//! Telegram Bot API adapter: long-polled updates in, HTML views with inline keyboards out.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::mpsc;

use super::traits::{Channel, ChannelMessage, ReplyTarget};
use crate::config::BotConfig;
use crate::console::{CallbackToken, InboundEvent, Render};
use crate::sessions::SessionKey;

/// Platform limit for a message body, in characters.
pub const MAX_TEXT_CHARS: usize = 4096;
const RETRY_DELAY: Duration = Duration::from_secs(2);

pub struct TelegramChannel {
    client: Client,
    api_base: String,
    token: String,
    poll_timeout_secs: u64,
}

/// One decoded update: the event to route, and the callback query to acknowledge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedUpdate {
    pub message: Option<ChannelMessage>,
    pub callback_id: Option<String>,
}

impl TelegramChannel {
    pub fn from_config(config: &BotConfig) -> Result<Self> {
        let token = config
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .context("bot.token is required")?;
        let api_base = config.api_url.trim().trim_end_matches('/');
        if api_base.is_empty() {
            bail!("bot.api_url cannot be empty");
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.poll_timeout_secs + 15))
            .build()
            .context("failed to build bot HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.to_string(),
            token: token.to_string(),
            poll_timeout_secs: config.poll_timeout_secs,
        })
    }

    fn method_url(&self, method: &str) -> String {
        format!("{}/bot{}/{method}", self.api_base, self.token)
    }

    async fn call(&self, method: &str, body: &Value) -> Result<Value> {
        let response = self
            .client
            .post(self.method_url(method))
            .json(body)
            .send()
            .await
            .with_context(|| format!("telegram {method} request failed"))?;
        let payload: Value = response
            .json()
            .await
            .with_context(|| format!("telegram {method} returned invalid JSON"))?;
        if payload.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(payload.get("result").cloned().unwrap_or(Value::Null));
        }
        let description = payload
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("unknown error");
        Err(anyhow!("telegram {method} failed: {description}"))
    }

    async fn answer_callback(&self, callback_id: &str) {
        if let Err(err) = self
            .call("answerCallbackQuery", &json!({ "callback_query_id": callback_id }))
            .await
        {
            tracing::debug!("callback acknowledgement failed: {err:#}");
        }
    }

    async fn fetch_updates(&self, offset: i64) -> Result<Vec<Value>> {
        let response = self
            .client
            .get(self.method_url("getUpdates"))
            .query(&[
                ("timeout", self.poll_timeout_secs.to_string()),
                ("offset", offset.to_string()),
                ("allowed_updates", r#"["message","callback_query"]"#.to_string()),
            ])
            .send()
            .await
            .context("telegram getUpdates request failed")?;
        let payload: Value = response
            .json()
            .await
            .context("telegram getUpdates returned invalid JSON")?;
        payload
            .get("result")
            .and_then(Value::as_array)
            .cloned()
            .ok_or_else(|| anyhow!("telegram getUpdates response missing result[]"))
    }
}

/// Translate one raw update. Returns `None` for update types the console ignores.
pub fn decode_update(update: &Value) -> Option<DecodedUpdate> {
    if let Some(message) = update.get("message") {
        let text = message.get("text").and_then(Value::as_str)?;
        let user_id = message.pointer("/from/id").and_then(Value::as_i64)?;
        let chat_id = message.pointer("/chat/id").and_then(Value::as_i64)?;
        return Some(DecodedUpdate {
            message: Some(ChannelMessage {
                key: SessionKey::new(user_id, chat_id),
                event: InboundEvent::from_text(text),
                reply: ReplyTarget {
                    chat_id,
                    edit_message_id: None,
                },
            }),
            callback_id: None,
        });
    }

    let query = update.get("callback_query")?;
    let callback_id = query.get("id").and_then(Value::as_str)?.to_string();
    let user_id = query.pointer("/from/id").and_then(Value::as_i64);
    let chat_id = query.pointer("/message/chat/id").and_then(Value::as_i64);
    let message_id = query.pointer("/message/message_id").and_then(Value::as_i64);
    let data = query.get("data").and_then(Value::as_str).unwrap_or_default();

    let message = match (user_id, chat_id, CallbackToken::parse(data)) {
        (Some(user_id), Some(chat_id), Some(token)) => Some(ChannelMessage {
            key: SessionKey::new(user_id, chat_id),
            event: InboundEvent::ButtonPress(token),
            reply: ReplyTarget {
                chat_id,
                edit_message_id: message_id,
            },
        }),
        (_, _, None) => {
            tracing::warn!(data = %data, "dropping callback with unrecognized token");
            None
        }
        _ => {
            tracing::warn!("dropping callback without sender or chat");
            None
        }
    };
    Some(DecodedUpdate {
        message,
        callback_id: Some(callback_id),
    })
}

/// Inline keyboard markup for a view's button grid.
pub fn keyboard(render: &Render) -> Value {
    let rows: Vec<Value> = render
        .buttons
        .iter()
        .map(|row| {
            Value::Array(
                row.iter()
                    .map(|button| json!({ "text": button.label, "callback_data": button.token.encode() }))
                    .collect(),
            )
        })
        .collect();
    json!({ "inline_keyboard": rows })
}

/// Clamp text to the platform limit on a char boundary. The cut never lands inside
/// an entity (`&amp;`) or a tag; a tag left open by the cut is dropped.
pub fn clamp_text(text: &str) -> String {
    if text.chars().count() <= MAX_TEXT_CHARS {
        return text.to_string();
    }
    let mut clamped: String = text.chars().take(MAX_TEXT_CHARS - 1).collect();
    if let Some(open) = clamped.rfind(['&', '<']) {
        if !clamped[open..].contains([';', '>']) {
            clamped.truncate(open);
        }
    }
    for tag in ["b", "i", "code"] {
        if let Some(open) = clamped.rfind(&format!("<{tag}>")) {
            if !clamped[open..].contains(&format!("</{tag}>")) {
                clamped.truncate(open);
            }
        }
    }
    clamped.push('…');
    clamped
}

#[async_trait]
impl Channel for TelegramChannel {
    fn name(&self) -> &str {
        "telegram"
    }

    async fn send(&self, target: ReplyTarget, render: &Render) -> Result<()> {
        let mut body = json!({
            "chat_id": target.chat_id,
            "text": clamp_text(&render.text),
            "parse_mode": "HTML",
            "disable_web_page_preview": true,
            "reply_markup": keyboard(render),
        });

        if let Some(message_id) = target.edit_message_id {
            body["message_id"] = json!(message_id);
            match self.call("editMessageText", &body).await {
                Ok(_) => return Ok(()),
                Err(err) if err.to_string().contains("message is not modified") => return Ok(()),
                Err(err) => tracing::debug!("edit failed, sending a new message: {err:#}"),
            }
            if let Some(object) = body.as_object_mut() {
                object.remove("message_id");
            }
        }

        self.call("sendMessage", &body).await.map(|_| ())
    }

    async fn listen(&self, tx: mpsc::Sender<ChannelMessage>) -> Result<()> {
        let mut offset: i64 = 0;
        tracing::info!("telegram channel listening for updates");

        loop {
            let updates = match self.fetch_updates(offset).await {
                Ok(updates) => updates,
                Err(err) => {
                    tracing::warn!("telegram poll failed: {err:#}");
                    tokio::time::sleep(RETRY_DELAY).await;
                    continue;
                }
            };

            for update in &updates {
                if let Some(update_id) = update.get("update_id").and_then(Value::as_i64) {
                    offset = offset.max(update_id + 1);
                }
                let Some(decoded) = decode_update(update) else {
                    continue;
                };
                if let Some(callback_id) = &decoded.callback_id {
                    self.answer_callback(callback_id).await;
                }
                if let Some(message) = decoded.message {
                    if tx.send(message).await.is_err() {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn health_check(&self) -> bool {
        self.call("getMe", &json!({})).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{Button, Verb};
    use axum::extract::Query;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use parking_lot::Mutex;
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn spawn_api(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn channel_for(api_url: &str) -> TelegramChannel {
        TelegramChannel::from_config(&BotConfig {
            token: Some("test-token".into()),
            api_url: api_url.into(),
            poll_timeout_secs: 0,
        })
        .unwrap()
    }

    #[test]
    fn decodes_commands_text_and_callbacks() {
        let command = decode_update(&json!({
            "update_id": 1,
            "message": {"message_id": 5, "from": {"id": 7}, "chat": {"id": 70}, "text": "/start@panel_bot"}
        }))
        .unwrap();
        let message = command.message.unwrap();
        assert_eq!(message.key, SessionKey::new(7, 70));
        assert_eq!(message.event, InboundEvent::Command("start".into()));
        assert_eq!(message.reply.edit_message_id, None);

        let press = decode_update(&json!({
            "update_id": 2,
            "callback_query": {
                "id": "cb1",
                "from": {"id": 7},
                "message": {"message_id": 9, "chat": {"id": 70}},
                "data": "select_user_u_1"
            }
        }))
        .unwrap();
        assert_eq!(press.callback_id.as_deref(), Some("cb1"));
        let message = press.message.unwrap();
        assert_eq!(message.reply.edit_message_id, Some(9));
        match message.event {
            InboundEvent::ButtonPress(token) => {
                assert_eq!(token.verb, Verb::Select);
                assert_eq!(token.id.as_deref(), Some("u_1"));
            }
            other => panic!("expected a button press, got {other:?}"),
        }
    }

    #[test]
    fn unknown_callbacks_are_acknowledged_but_dropped() {
        let decoded = decode_update(&json!({
            "update_id": 3,
            "callback_query": {"id": "cb2", "from": {"id": 7}, "message": {"message_id": 1, "chat": {"id": 7}}, "data": "launch_rockets"}
        }))
        .unwrap();
        assert_eq!(decoded.callback_id.as_deref(), Some("cb2"));
        assert!(decoded.message.is_none());

        assert!(decode_update(&json!({"update_id": 4, "message": {"from": {"id": 1}, "chat": {"id": 1}, "sticker": {}}})).is_none());
        assert!(decode_update(&json!({"update_id": 5, "edited_message": {}})).is_none());
    }

    #[test]
    fn keyboard_mirrors_the_button_grid() {
        let render = Render::new("x").row(vec![Button::cancel(), Button::main_menu()]);
        let markup = keyboard(&render);
        assert_eq!(markup["inline_keyboard"][0][0]["callback_data"], json!("cancel"));
        assert_eq!(markup["inline_keyboard"][0][1]["callback_data"], json!("menu"));
    }

    #[test]
    fn clamp_respects_char_boundaries() {
        let long = "ж".repeat(MAX_TEXT_CHARS + 10);
        let clamped = clamp_text(&long);
        assert_eq!(clamped.chars().count(), MAX_TEXT_CHARS);
        assert!(clamped.ends_with('…'));
        assert_eq!(clamp_text("short"), "short");
    }

    #[test]
    fn clamp_never_splits_markup() {
        let mut text = "x".repeat(MAX_TEXT_CHARS - 3);
        text.push_str("&amp; tail");
        let clamped = clamp_text(&text);
        assert!(!clamped.contains('&'));
        assert!(clamped.ends_with("x…"));

        let mut text = "y".repeat(MAX_TEXT_CHARS - 20);
        text.push_str("\n<i>");
        text.push_str(&"z".repeat(100));
        text.push_str("</i>");
        let clamped = clamp_text(&text);
        assert!(!clamped.contains("<i>"));
        assert!(clamped.chars().count() <= MAX_TEXT_CHARS);
    }

    #[test]
    fn missing_token_is_rejected() {
        assert!(TelegramChannel::from_config(&BotConfig::default()).is_err());
    }

    #[tokio::test]
    async fn failed_edit_falls_back_to_a_new_message() {
        let calls: Arc<Mutex<Vec<(String, Value)>>> = Arc::new(Mutex::new(Vec::new()));
        let edit_calls = calls.clone();
        let send_calls = calls.clone();
        let router = Router::new()
            .route(
                "/bottest-token/editMessageText",
                post(move |Json(body): Json<Value>| {
                    let calls = edit_calls.clone();
                    async move {
                        calls.lock().push(("edit".into(), body));
                        Json(json!({"ok": false, "description": "Bad Request: message can't be edited"}))
                    }
                }),
            )
            .route(
                "/bottest-token/sendMessage",
                post(move |Json(body): Json<Value>| {
                    let calls = send_calls.clone();
                    async move {
                        calls.lock().push(("send".into(), body));
                        Json(json!({"ok": true, "result": {"message_id": 10}}))
                    }
                }),
            );
        let channel = channel_for(&spawn_api(router).await);

        let render = Render::new("<b>hi</b>").row(vec![Button::cancel()]);
        channel
            .send(
                ReplyTarget {
                    chat_id: 70,
                    edit_message_id: Some(9),
                },
                &render,
            )
            .await
            .unwrap();

        let calls = calls.lock();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0, "edit");
        assert_eq!(calls[0].1["message_id"], json!(9));
        assert_eq!(calls[1].0, "send");
        assert!(calls[1].1.get("message_id").is_none());
        assert_eq!(calls[1].1["parse_mode"], json!("HTML"));
    }

    #[tokio::test]
    async fn listen_advances_the_offset_and_acknowledges_callbacks() {
        let offsets: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let acks: Arc<Mutex<Vec<Value>>> = Arc::new(Mutex::new(Vec::new()));
        let seen_offsets = offsets.clone();
        let seen_acks = acks.clone();
        let router = Router::new()
            .route(
                "/bottest-token/getUpdates",
                get(move |Query(params): Query<HashMap<String, String>>| {
                    let offsets = seen_offsets.clone();
                    async move {
                        let offset = params.get("offset").cloned().unwrap_or_default();
                        offsets.lock().push(offset.clone());
                        if offset == "0" {
                            Json(json!({"ok": true, "result": [
                                {"update_id": 10, "message": {"message_id": 1, "from": {"id": 7}, "chat": {"id": 70}, "text": "hello"}},
                                {"update_id": 11, "callback_query": {"id": "cb", "from": {"id": 7}, "message": {"message_id": 2, "chat": {"id": 70}}, "data": "menu"}}
                            ]}))
                        } else {
                            tokio::time::sleep(Duration::from_millis(20)).await;
                            Json(json!({"ok": true, "result": []}))
                        }
                    }
                }),
            )
            .route(
                "/bottest-token/answerCallbackQuery",
                post(move |Json(body): Json<Value>| {
                    let acks = seen_acks.clone();
                    async move {
                        acks.lock().push(body);
                        Json(json!({"ok": true, "result": true}))
                    }
                }),
            );
        let channel = Arc::new(channel_for(&spawn_api(router).await));

        let (tx, mut rx) = mpsc::channel(8);
        let listener = {
            let channel = channel.clone();
            tokio::spawn(async move { channel.listen(tx).await })
        };

        let first = rx.recv().await.unwrap();
        assert_eq!(first.event, InboundEvent::TextMessage("hello".into()));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.event, InboundEvent::ButtonPress(ref token) if token.verb == Verb::Menu));

        tokio::time::sleep(Duration::from_millis(100)).await;
        listener.abort();

        assert!(offsets.lock().iter().any(|offset| offset == "12"));
        assert_eq!(acks.lock()[0]["callback_query_id"], json!("cb"));
    }
}
