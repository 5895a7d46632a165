use std::sync::Arc;

use axum::{
    Form, Json, Router,
    extract::{
        Path, Query, State, WebSocketUpgrade,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, header},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::{
    accounts::Accounts, error::ApiError, message::ClientId, registry::ConnectionRegistry, session,
};

const CHAT_PAGE: &str = include_str!("../static/chat.html");

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ConnectionRegistry>,
    pub accounts: Accounts,
}

#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserCreated {
    pub message: String,
    pub websocket_token: String,
}

/// OAuth2 password-grant form fields.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

#[derive(Debug, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .route("/create_user", post(create_user))
        .route("/token", post(token))
        .route("/me", get(me))
        .route("/ws/:client_id", get(chat_socket))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn index() -> Html<&'static str> {
    Html(CHAT_PAGE)
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    let connections = state.registry.len().await;
    Json(json!({ "status": "ok", "connections": connections }))
}

async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<CreateUser>, JsonRejection>,
) -> Result<Json<UserCreated>, ApiError> {
    let Json(body) = body.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let websocket_token = state.accounts.register(&body.email, &body.password).await?;
    Ok(Json(UserCreated {
        message: "User created successfully".to_string(),
        websocket_token,
    }))
}

async fn token(
    State(state): State<AppState>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let Form(form) = form.map_err(|rejection| ApiError::Validation(rejection.body_text()))?;
    let access_token = state.accounts.login(&form.username, &form.password).await?;
    Ok(Json(TokenResponse {
        access_token,
        token_type: "bearer".to_string(),
    }))
}

async fn me(State(state): State<AppState>, headers: HeaderMap) -> Result<Json<Value>, ApiError> {
    let token = bearer_token(&headers).ok_or(ApiError::InvalidToken)?;
    let account = state
        .accounts
        .resolve_token(token)
        .await?
        .ok_or(ApiError::InvalidToken)?;
    Ok(Json(json!({ "email": account.email })))
}

/// Admission: a token must be present and known before the connection is
/// registered for broadcast.
async fn chat_socket(
    ws: WebSocketUpgrade,
    Path(client_id): Path<ClientId>,
    Query(params): Query<WsParams>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = params.token.filter(|token| !token.is_empty()) else {
        warn!(client_id, "rejecting websocket without token");
        return ws.on_upgrade(session::reject_missing_token);
    };

    match state.accounts.resolve_token(&token).await {
        Ok(Some(account)) => {
            let registry = Arc::clone(&state.registry);
            ws.on_upgrade(move |socket| session::run(socket, registry, client_id, account.email))
        }
        Ok(None) => {
            warn!(client_id, "rejecting websocket with unknown token");
            ApiError::UnknownToken.into_response()
        }
        Err(err) => err.into_response(),
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}
