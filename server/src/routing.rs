//! HTTP routing configuration

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};
use tracing::warn;

use crate::auth;
use crate::database;
use crate::error::RelayError;
use crate::websocket::ServerState;

/// Create the application router
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = build_cors_layer(&state.config.cors_origins);
    let uploads = ServeDir::new(&state.config.upload_dir);

    Router::new()
        .route("/ws", get(crate::websocket::handle_websocket))
        .route("/messages/:user_id", get(get_messages))
        .route("/people", get(get_people))
        .route("/profile", get(get_profile))
        .route("/health", get(health_check))
        .nest_service("/uploads", uploads)
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Build CORS layer from config. Permissive when no origins are configured.
fn build_cors_layer(origins: &Option<String>) -> CorsLayer {
    match origins {
        Some(list) if !list.is_empty() => {
            let parsed: Vec<_> = list
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            CorsLayer::new().allow_origin(AllowOrigin::list(parsed))
        }
        _ => CorsLayer::permissive(),
    }
}

/// One decrypted record on the history read path.
#[derive(Debug, Serialize)]
struct MessageRecord {
    #[serde(rename = "_id")]
    id: i64,
    sender: String,
    recipient: String,
    /// Null when the stored record failed to decrypt
    text: Option<String>,
    file: Option<String>,
    #[serde(rename = "createdAt")]
    created_at: i64,
}

/// One entry on the roster read path.
#[derive(Debug, Serialize)]
struct PersonRecord {
    #[serde(rename = "_id")]
    id: String,
    username: String,
}

/// Full decrypted conversation between the caller and another user,
/// oldest first.
async fn get_messages(
    Path(user_id): Path<String>,
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<MessageRecord>>, RelayError> {
    let claims = auth::authenticate(&headers, state.config.jwt_secret.as_bytes())?;
    let rows = database::conversation(&state.db_pool, &user_id, &claims.user_id).await?;

    let records = rows
        .into_iter()
        .map(
            |(id, sender, recipient, ciphertext, nonce, attachment, created_at)| {
                // A corrupt record is marked, never fatal to the rest of the
                // batch.
                let text = match state.cipher.decrypt(&ciphertext, &nonce) {
                    Ok(bytes) => match String::from_utf8(bytes) {
                        Ok(text) => Some(text),
                        Err(_) => {
                            warn!("Message {} decrypted to invalid UTF-8", id);
                            None
                        }
                    },
                    Err(e) => {
                        warn!("Message {} could not be decrypted: {}", id, e);
                        None
                    }
                };

                MessageRecord {
                    id,
                    sender,
                    recipient,
                    text,
                    file: attachment,
                    created_at,
                }
            },
        )
        .collect();

    Ok(Json(records))
}

/// All known user identities.
async fn get_people(
    State(state): State<Arc<ServerState>>,
) -> Result<Json<Vec<PersonRecord>>, RelayError> {
    let users = database::list_users(&state.db_pool).await?;

    Ok(Json(
        users
            .into_iter()
            .map(|(id, username)| PersonRecord { id, username })
            .collect(),
    ))
}

/// Echo the authenticated caller's claims.
async fn get_profile(
    headers: HeaderMap,
    State(state): State<Arc<ServerState>>,
) -> Result<Json<auth::Claims>, RelayError> {
    let claims = auth::authenticate(&headers, state.config.jwt_secret.as_bytes())?;
    Ok(Json(claims))
}

/// Health check — no sensitive data
async fn health_check() -> &'static str {
    "OK"
}
