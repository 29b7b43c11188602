//! Operator surface for posting into a ticket channel out of band.
//!
//! `POST /send` takes `{password, channelId, message}`. The channel must
//! resolve through the chat transport and sit inside the configured ticket
//! category. Rejections carry a short status word and nothing else.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use tracing::{info, warn};

use tillbot_chat::events::CategoryScope;
use tillbot_chat::socket::ChatTransport;

type HmacSha256 = Hmac<Sha256>;

const SECRET_CHECK_LABEL: &[u8] = b"tillbot.admin.send";
pub const BANNER: &str = "Remote control running";

const PANEL_HTML: &str = r#"<!doctype html>
<html>
  <head><meta charset="utf-8"><title>tillbot remote</title></head>
  <body>
    <form onsubmit="send();return false;">
      <input id="p" type="password" placeholder="password"><br>
      <input id="c" placeholder="channelId"><br>
      <textarea id="m"></textarea><br>
      <button>Send</button>
      <pre id="o"></pre>
    </form>
    <script>
      async function send() {
        const r = await fetch('/send', {
          method: 'POST',
          headers: { 'Content-Type': 'application/json' },
          body: JSON.stringify({ password: p.value, channelId: c.value, message: m.value })
        });
        o.textContent = r.status + ' ' + await r.text();
      }
    </script>
  </body>
</html>
"#;

#[derive(Clone)]
pub struct AdminState {
    transport: Arc<dyn ChatTransport>,
    scope: CategoryScope,
    secret_tag: Option<Vec<u8>>,
}

impl AdminState {
    /// Without a configured secret every send is refused.
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        scope: CategoryScope,
        admin_secret: Option<&SecretString>,
    ) -> Self {
        let secret_tag = admin_secret
            .filter(|secret| !secret.expose_secret().is_empty())
            .and_then(|secret| secret_tag(secret.expose_secret().as_bytes()));
        Self { transport, scope, secret_tag }
    }

    fn authorized(&self, password: &str) -> bool {
        let Some(expected) = &self.secret_tag else {
            return false;
        };
        let Ok(mut mac) = HmacSha256::new_from_slice(password.as_bytes()) else {
            return false;
        };
        mac.update(SECRET_CHECK_LABEL);
        mac.verify_slice(expected).is_ok()
    }
}

fn secret_tag(secret: &[u8]) -> Option<Vec<u8>> {
    let mut mac = HmacSha256::new_from_slice(secret).ok()?;
    mac.update(SECRET_CHECK_LABEL);
    Some(mac.finalize().into_bytes().to_vec())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendRequest {
    pub password: String,
    pub channel_id: String,
    pub message: String,
}

#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusBody {
    pub status: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("unauthorized")]
    Unauthorized,
    #[error("bad request")]
    BadRequest,
    #[error("bad channel")]
    BadChannel,
    #[error("delivery failed")]
    Delivery,
}

impl AdminError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::BadChannel => StatusCode::NOT_FOUND,
            Self::Delivery => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(StatusBody { status: self.to_string() })).into_response()
    }
}

pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/", get(banner))
        .route("/panel", get(panel))
        .route("/send", post(send))
        .with_state(state)
}

async fn banner() -> &'static str {
    BANNER
}

async fn panel() -> Html<&'static str> {
    Html(PANEL_HTML)
}

async fn send(
    State(state): State<AdminState>,
    payload: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<StatusBody>, AdminError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!(
            event_name = "admin.send.malformed",
            reason = %rejection.body_text(),
            "malformed send request"
        );
        AdminError::BadRequest
    })?;

    if !state.authorized(&request.password) {
        warn!(event_name = "admin.send.unauthorized", "send request with bad secret");
        return Err(AdminError::Unauthorized);
    }

    let channel_id = request.channel_id.trim();
    if channel_id.is_empty() || request.message.trim().is_empty() {
        return Err(AdminError::BadRequest);
    }

    let channel = match state.transport.channel_info(channel_id).await {
        Ok(Some(channel)) => channel,
        Ok(None) => return Err(AdminError::BadChannel),
        Err(error) => {
            warn!(
                event_name = "admin.send.lookup_failed",
                conversation_id = channel_id,
                error = %error,
                "channel lookup failed"
            );
            return Err(AdminError::BadChannel);
        }
    };
    if !state.scope.qualifies(channel.parent_id.as_deref()) {
        return Err(AdminError::BadChannel);
    }

    if let Err(error) = state.transport.send_message(&channel.channel_id, &request.message).await {
        warn!(
            event_name = "admin.send.delivery_failed",
            conversation_id = %channel.channel_id,
            error = %error,
            "operator message delivery failed"
        );
        return Err(AdminError::Delivery);
    }

    info!(
        event_name = "admin.send.delivered",
        conversation_id = %channel.channel_id,
        "operator message delivered"
    );
    Ok(Json(StatusBody { status: "ok".to_owned() }))
}
