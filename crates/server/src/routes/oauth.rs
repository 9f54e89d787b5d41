//! OAuth 2.0 provider endpoints: dynamic client registration,
//! authorization-code flow with PKCE, token issuance/refresh, revocation,
//! and the metadata document.
//!
//! Registration is open but redirect URIs are restricted to loopback and
//! RFC-1918 hosts — this server fronts one operator's machine, not the
//! public internet.

use std::net::Ipv4Addr;

use axum::extract::{Form, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use revline_core::hash::{generate_token, new_uuid, pkce_verify};
use revline_core::time::{now_iso, now_unix};
use revline_engine::Engine;
use revline_store::{OAuthClientRow, OAuthStateRow, OAuthTokenRow};

use crate::error::ApiErr;

/// Authorization codes live for ten minutes.
const CODE_TTL_SECS: i64 = 600;

const VALID_SCOPES: &[&str] = &["read", "write"];

// ── Registration ───────────────────────────────────────────────────────

fn is_private_host(host: &str) -> bool {
    if host == "localhost" {
        return true;
    }
    match host.parse::<Ipv4Addr>() {
        Ok(ip) => {
            ip.is_loopback()
                || ip.octets()[0] == 10
                || (ip.octets()[0] == 172 && (16..=31).contains(&ip.octets()[1]))
                || (ip.octets()[0] == 192 && ip.octets()[1] == 168)
        }
        Err(_) => false,
    }
}

/// Only loopback / private-range redirect targets are registrable.
fn redirect_uri_allowed(uri: &str) -> bool {
    let Ok(parsed) = url::Url::parse(uri) else {
        return false;
    };
    if !matches!(parsed.scheme(), "http" | "https") {
        return false;
    }
    parsed.host_str().is_some_and(is_private_host)
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub client_name: String,
    pub redirect_uris: Vec<String>,
}

/// POST /oauth/register
pub async fn register(
    State(engine): State<Engine>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    if req.redirect_uris.is_empty() {
        return Err(ApiErr::bad_request("at least one redirect_uri is required"));
    }
    for uri in &req.redirect_uris {
        if !redirect_uri_allowed(uri) {
            return Err(ApiErr::bad_request(format!(
                "redirect_uri must be localhost or a private address: {uri}"
            )));
        }
    }

    let client = OAuthClientRow {
        id: new_uuid(),
        secret: generate_token()?,
        name: req.client_name,
        redirect_uris: req.redirect_uris,
        created_at: now_iso(),
    };
    engine
        .db
        .insert_oauth_client(&client)
        .map_err(ApiErr::from_db("register oauth client"))?;

    Ok(Json(json!({
        "client_id": client.id,
        "client_secret": client.secret,
        "client_name": client.name,
        "redirect_uris": client.redirect_uris,
    })))
}

// ── Authorization ──────────────────────────────────────────────────────

fn validate_scope(raw: Option<&str>) -> Result<String, ApiErr> {
    let scope = raw.unwrap_or("read").trim();
    for part in scope.split_whitespace() {
        if !VALID_SCOPES.contains(&part) {
            return Err(ApiErr::bad_request(format!("unknown scope: {part}")));
        }
    }
    Ok(scope.to_string())
}

#[derive(Debug, Deserialize)]
pub struct AuthorizeQuery {
    pub response_type: String,
    pub client_id: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub state: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
}

/// GET /oauth/authorize — validates and redirects back with a code. This
/// is a single-operator instance: possession of the loopback port is the
/// consent boundary, so no interactive approval screen exists.
pub async fn authorize(
    State(engine): State<Engine>,
    Query(q): Query<AuthorizeQuery>,
) -> Result<Response, ApiErr> {
    if q.response_type != "code" {
        return Err(ApiErr::bad_request("response_type must be \"code\""));
    }
    if let Some(method) = &q.code_challenge_method {
        if method != "S256" {
            return Err(ApiErr::bad_request("only S256 PKCE is supported"));
        }
    }

    let client = engine
        .db
        .get_oauth_client(&q.client_id)
        .map_err(ApiErr::from_db("load oauth client"))?
        .ok_or_else(|| ApiErr::bad_request("unknown client_id"))?;

    if !client.redirect_uris.contains(&q.redirect_uri) {
        return Err(ApiErr::bad_request("redirect_uri is not registered"));
    }
    let scope = validate_scope(q.scope.as_deref())?;

    let code = generate_token()?;
    engine
        .db
        .insert_oauth_state(&OAuthStateRow {
            state: new_uuid(),
            client_id: client.id,
            redirect_uri: q.redirect_uri.clone(),
            scope,
            code_challenge: q.code_challenge,
            code: Some(code.clone()),
            expires_at: now_unix() + CODE_TTL_SECS,
            created_at: now_iso(),
        })
        .map_err(ApiErr::from_db("store oauth state"))?;

    let sep = if q.redirect_uri.contains('?') { '&' } else { '?' };
    let mut location = format!("{}{sep}code={code}", q.redirect_uri);
    if let Some(state) = &q.state {
        location.push_str(&format!("&state={}", urlencoding::encode(state)));
    }
    Ok(Redirect::to(&location).into_response())
}

// ── Token endpoint ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub code: Option<String>,
    pub code_verifier: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub refresh_token: Option<String>,
}

fn oauth_error(status: StatusCode, code: &str, description: &str) -> Response {
    (
        status,
        Json(json!({ "error": code, "error_description": description })),
    )
        .into_response()
}

/// POST /oauth/token — `authorization_code` and `refresh_token` grants.
pub async fn token(State(engine): State<Engine>, Form(req): Form<TokenRequest>) -> Response {
    match req.grant_type.as_str() {
        "authorization_code" => exchange_code(&engine, &req),
        "refresh_token" => refresh(&engine, &req),
        other => oauth_error(
            StatusCode::BAD_REQUEST,
            "unsupported_grant_type",
            &format!("unsupported grant_type: {other}"),
        ),
    }
}

fn exchange_code(engine: &Engine, req: &TokenRequest) -> Response {
    let Some(code) = req.code.as_deref() else {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_request", "code is required");
    };
    let state = match engine.db.take_oauth_state_by_code(code) {
        Ok(Some(state)) => state,
        Ok(None) => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "authorization code is invalid or expired",
            );
        }
        Err(e) => {
            tracing::error!("oauth code lookup: {e}");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "storage failure");
        }
    };

    if req.client_id.as_deref() != Some(state.client_id.as_str()) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "client_id mismatch");
    }

    // PKCE: a challenge stored at authorize-time makes the verifier mandatory.
    if let Some(challenge) = &state.code_challenge {
        match req.code_verifier.as_deref() {
            Some(verifier) if pkce_verify(challenge, verifier) => {}
            _ => {
                return oauth_error(
                    StatusCode::BAD_REQUEST,
                    "invalid_grant",
                    "PKCE verification failed",
                );
            }
        }
    }

    issue_tokens(engine, &state.client_id, None, &state.scope)
}

fn refresh(engine: &Engine, req: &TokenRequest) -> Response {
    let Some(raw) = req.refresh_token.as_deref() else {
        return oauth_error(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            "refresh_token is required",
        );
    };
    let stored = match engine.db.get_refresh_token(raw) {
        Ok(Some(token)) => token,
        Ok(None) => {
            return oauth_error(
                StatusCode::BAD_REQUEST,
                "invalid_grant",
                "refresh token is invalid or expired",
            );
        }
        Err(e) => {
            tracing::error!("oauth refresh lookup: {e}");
            return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "storage failure");
        }
    };

    if req.client_id.as_deref() != Some(stored.client_id.as_str()) {
        return oauth_error(StatusCode::BAD_REQUEST, "invalid_grant", "client_id mismatch");
    }

    // Rotation: the presented token is consumed.
    let _ = engine.db.revoke_refresh_token(raw);
    issue_tokens(engine, &stored.client_id, stored.user_id.as_deref(), &stored.scope)
}

fn issue_tokens(engine: &Engine, client_id: &str, user_id: Option<&str>, scope: &str) -> Response {
    let (access, refresh) = match (generate_token(), generate_token()) {
        (Ok(a), Ok(r)) => (a, r),
        _ => return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "RNG failure"),
    };
    let now = now_unix();
    let access_ttl = engine.config.access_token_ttl;
    let refresh_ttl = engine.config.refresh_token_ttl;

    let access_row = OAuthTokenRow {
        token: access.clone(),
        client_id: client_id.to_string(),
        user_id: user_id.map(String::from),
        scope: scope.to_string(),
        expires_at: now + access_ttl,
        created_at: now_iso(),
    };
    let refresh_row = OAuthTokenRow {
        token: refresh.clone(),
        expires_at: now + refresh_ttl,
        ..access_row.clone()
    };

    if let Err(e) = engine
        .db
        .insert_access_token(&access_row)
        .and_then(|_| engine.db.insert_refresh_token(&refresh_row))
    {
        tracing::error!("oauth token insert: {e}");
        return oauth_error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "storage failure");
    }

    Json(json!({
        "access_token": access,
        "token_type": "bearer",
        "expires_in": access_ttl,
        "refresh_token": refresh,
        "scope": scope,
    }))
    .into_response()
}

// ── Revocation & metadata ──────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    pub token: String,
    pub token_type_hint: Option<String>,
}

/// POST /oauth/revoke — always 200, per RFC 7009.
pub async fn revoke(State(engine): State<Engine>, Form(req): Form<RevokeRequest>) -> Response {
    let revoked = match req.token_type_hint.as_deref() {
        Some("refresh_token") => engine
            .db
            .revoke_refresh_token(&req.token)
            .unwrap_or(false)
            || engine.db.revoke_access_token(&req.token).unwrap_or(false),
        _ => engine.db.revoke_access_token(&req.token).unwrap_or(false)
            || engine.db.revoke_refresh_token(&req.token).unwrap_or(false),
    };
    Json(json!({ "ok": true, "revoked": revoked })).into_response()
}

/// GET /.well-known/oauth-authorization-server
pub async fn metadata(State(engine): State<Engine>) -> Json<serde_json::Value> {
    let base = format!("http://localhost:{}", engine.config.port);
    Json(json!({
        "issuer": base,
        "authorization_endpoint": format!("{base}/oauth/authorize"),
        "token_endpoint": format!("{base}/oauth/token"),
        "revocation_endpoint": format!("{base}/oauth/revoke"),
        "registration_endpoint": format!("{base}/oauth/register"),
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token"],
        "code_challenge_methods_supported": ["S256"],
        "scopes_supported": VALID_SCOPES,
        "token_endpoint_auth_methods_supported": ["none", "client_secret_post"],
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn private_host_classification() {
        for host in ["localhost", "127.0.0.1", "10.0.0.8", "172.16.4.1", "172.31.255.1", "192.168.1.10"] {
            assert!(is_private_host(host), "{host} should be private");
        }
        for host in ["example.com", "8.8.8.8", "172.32.0.1", "192.169.0.1", "11.0.0.1"] {
            assert!(!is_private_host(host), "{host} should be public");
        }
    }

    #[test]
    fn redirect_uri_restrictions() {
        assert!(redirect_uri_allowed("http://localhost:8080/callback"));
        assert!(redirect_uri_allowed("http://127.0.0.1:7777/cb"));
        assert!(redirect_uri_allowed("https://192.168.0.2/cb"));
        assert!(!redirect_uri_allowed("https://example.com/cb"));
        assert!(!redirect_uri_allowed("custom-scheme://localhost/cb"));
        assert!(!redirect_uri_allowed("not a url"));
    }

    #[test]
    fn scope_validation() {
        assert_eq!(validate_scope(None).unwrap(), "read");
        assert_eq!(validate_scope(Some("read write")).unwrap(), "read write");
        assert!(validate_scope(Some("admin")).is_err());
    }
}
