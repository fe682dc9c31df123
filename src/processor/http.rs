//! Long-poll HTTP API for the web UI.
//!
//! POST-only JSON endpoints on a loopback-bound axum server. The first
//! request presents the password (compared in constant time) and receives a
//! session cookie; the cookie authorizes reads, and mutating requests must
//! additionally echo the per-run CSRF token handed out by `get-state.json`.

use crate::event::now_ms;
use crate::processor::{actions::Action, Processor};
use axum::extract::State;
use axum::http::header::{HeaderMap, HeaderValue, COOKIE, SET_COOKIE};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::post;
use axum::Router;
use rand::Rng;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use subtle::ConstantTimeEq;
use tracing::{info, warn};

const COOKIE_NAME: &str = "mamirc";

struct ApiContext {
    processor: Arc<Processor>,
    password: String,
    csrf_token: String,
    cookies: Mutex<HashSet<String>>,
}

enum Auth {
    Granted { new_cookie: Option<String> },
    Denied,
}

impl ApiContext {
    /// Cookie first, password fallback. A fresh password login mints a new
    /// session cookie.
    fn authorize(&self, headers: &HeaderMap, password: Option<&str>) -> Auth {
        if let Some(token) = cookie_value(headers) {
            let cookies = self.cookies.lock().unwrap_or_else(|p| p.into_inner());
            if cookies.contains(&token) {
                return Auth::Granted { new_cookie: None };
            }
        }
        if let Some(presented) = password {
            if bool::from(presented.as_bytes().ct_eq(self.password.as_bytes())) {
                let token = random_token();
                self.cookies
                    .lock()
                    .unwrap_or_else(|p| p.into_inner())
                    .insert(token.clone());
                return Auth::Granted {
                    new_cookie: Some(token),
                };
            }
            warn!("Rejected API request with wrong password");
        }
        Auth::Denied
    }

    fn csrf_ok(&self, presented: &str) -> bool {
        bool::from(presented.as_bytes().ct_eq(self.csrf_token.as_bytes()))
    }
}

fn cookie_value(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get(COOKIE)?.to_str().ok()?;
    cookies.split(';').find_map(|part| {
        let (name, value) = part.trim().split_once('=')?;
        (name == COOKIE_NAME).then(|| value.to_string())
    })
}

fn random_token() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn with_cookie(mut response: Response, token: Option<String>) -> Response {
    if let Some(token) = token {
        let cookie = format!("{COOKIE_NAME}={token}; HttpOnly; Path=/; SameSite=Strict");
        if let Ok(value) = HeaderValue::from_str(&cookie) {
            response.headers_mut().insert(SET_COOKIE, value);
        }
    }
    response
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetStateRequest {
    #[serde(default)]
    max_messages_per_window: Option<usize>,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetUpdatesRequest {
    next_update_id: i64,
    #[serde(default)]
    max_wait: u64,
    #[serde(default)]
    password: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DoActionsRequest {
    payload: Vec<serde_json::Value>,
    csrf_token: String,
    // Echoed by the UI for bookkeeping; the server does not depend on it.
    #[serde(default)]
    #[allow(dead_code)]
    next_update_id: Option<i64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetProfilesRequest {
    #[serde(default)]
    password: Option<String>,
}

async fn get_state(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<GetStateRequest>,
) -> Response {
    match ctx.authorize(&headers, request.password.as_deref()) {
        Auth::Denied => StatusCode::UNAUTHORIZED.into_response(),
        Auth::Granted { new_cookie } => {
            let mut state = ctx
                .processor
                .get_state(request.max_messages_per_window.unwrap_or(usize::MAX));
            state["csrfToken"] = json!(ctx.csrf_token);
            with_cookie(Json(state).into_response(), new_cookie)
        }
    }
}

async fn get_updates(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<GetUpdatesRequest>,
) -> Response {
    match ctx.authorize(&headers, request.password.as_deref()) {
        Auth::Denied => StatusCode::UNAUTHORIZED.into_response(),
        Auth::Granted { new_cookie } => {
            let result = ctx
                .processor
                .get_updates(request.next_update_id, request.max_wait)
                .await;
            // None means "resync": the JSON body is a literal null.
            with_cookie(Json(result).into_response(), new_cookie)
        }
    }
}

async fn do_actions(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<DoActionsRequest>,
) -> Response {
    match ctx.authorize(&headers, None) {
        Auth::Denied => StatusCode::UNAUTHORIZED.into_response(),
        Auth::Granted { .. } => {
            if !ctx.csrf_ok(&request.csrf_token) {
                return StatusCode::FORBIDDEN.into_response();
            }
            let outcome = Action::parse_all(&request.payload)
                .and_then(|actions| ctx.processor.apply_actions(actions));
            match outcome {
                Ok(()) => Json(json!("OK")).into_response(),
                Err(text) => Json(json!(text)).into_response(),
            }
        }
    }
}

async fn get_profiles(
    State(ctx): State<Arc<ApiContext>>,
    headers: HeaderMap,
    Json(request): Json<GetProfilesRequest>,
) -> Response {
    match ctx.authorize(&headers, request.password.as_deref()) {
        Auth::Denied => StatusCode::UNAUTHORIZED.into_response(),
        Auth::Granted { new_cookie } => {
            with_cookie(Json(ctx.processor.get_profiles()).into_response(), new_cookie)
        }
    }
}

/// Unauthenticated on purpose: the UI uses it to measure clock skew before
/// logging in, and it reveals nothing but the wall clock.
async fn get_time() -> Json<i64> {
    Json(now_ms())
}

/// Serve the API until the process exits.
pub async fn run_http_server(
    port: u16,
    password: String,
    processor: Arc<Processor>,
) -> std::io::Result<()> {
    let context = Arc::new(ApiContext {
        processor,
        password,
        csrf_token: random_token(),
        cookies: Mutex::new(HashSet::new()),
    });

    let app = Router::new()
        .route("/get-state.json", post(get_state))
        .route("/get-updates.json", post(get_updates))
        .route("/do-actions.json", post(do_actions))
        .route("/get-profiles.json", post(get_profiles))
        .route("/get-time.json", post(get_time))
        .with_state(context);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP API listening");
    axum::serve(listener, app).await
}
