//! Health check HTTP endpoints for container orchestration.
//!
//! `/health` answers 200 while the process is up; `/ready` answers 200 only
//! once the first ping result has landed. Optional Basic Auth and/or a static
//! token header guard both routes. A trusted-proxy allow-list decides whether
//! `X-Forwarded-For` is honored for client identification in logs.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{HeaderMap, Request, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::json;
use tracing::{info, warn};

use crate::config::{HealthSettings, VERSION};
use crate::stats::StatsRepository;
use crate::tasks::ShutdownSignal;

#[derive(Clone)]
pub struct HealthState {
    stats: Arc<StatsRepository>,
    settings: Arc<HealthSettings>,
}

/// Resolve the client address: honor X-Forwarded-For only for trusted peers.
fn client_ip(peer: IpAddr, headers: &HeaderMap, trusted: &[IpAddr]) -> IpAddr {
    if trusted.contains(&peer) {
        if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
            if let Some(first) = forwarded.split(',').next() {
                if let Ok(ip) = first.trim().parse() {
                    return ip;
                }
            }
        }
    }
    peer
}

/// Check Basic Auth and/or static token. `Ok(())` when no auth is configured.
fn authorize(settings: &HealthSettings, headers: &HeaderMap) -> Result<(), Response> {
    let basic = match (&settings.auth_user, &settings.auth_pass) {
        (Some(user), Some(pass)) if !user.is_empty() && !pass.is_empty() => {
            Some((user.as_str(), pass.as_str()))
        }
        _ => None,
    };
    let token = settings.token.as_deref().filter(|t| !t.is_empty());

    if basic.is_none() && token.is_none() {
        return Ok(());
    }

    if let Some((user, pass)) = basic {
        if check_basic_auth(headers, user, pass) {
            return Ok(());
        }
    }

    if let Some(expected) = token {
        let provided = headers
            .get(settings.token_header.as_str())
            .and_then(|v| v.to_str().ok());
        if provided == Some(expected) {
            return Ok(());
        }
    }

    let mut response = (
        StatusCode::UNAUTHORIZED,
        Json(json!({"error": "Unauthorized"})),
    )
        .into_response();
    response.headers_mut().insert(
        "WWW-Authenticate",
        "Basic realm=\"Health\"".parse().expect("static header"),
    );
    Err(response)
}

fn check_basic_auth(headers: &HeaderMap, user: &str, pass: &str) -> bool {
    let Some(header) = headers.get("authorization").and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let Some((scheme, encoded)) = header.split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }
    let Ok(decoded) = BASE64.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    match decoded.split_once(':') {
        Some((u, p)) => u == user && p == pass,
        None => false,
    }
}

async fn health(State(state): State<HealthState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state.settings, &headers) {
        return denied;
    }
    Json(json!({"status": "healthy", "service": "pinger", "version": VERSION})).into_response()
}

async fn ready(State(state): State<HealthState>, headers: HeaderMap) -> Response {
    if let Err(denied) = authorize(&state.settings, &headers) {
        return denied;
    }

    let snapshot = state.stats.get_snapshot();
    if snapshot.total > 0 {
        Json(json!({
            "status": "ready",
            "total_pings": snapshot.total,
            "success": snapshot.success,
        }))
        .into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": "No ping results yet"})),
        )
            .into_response()
    }
}

/// Request logging with trusted-proxy-aware client identification.
async fn request_logging(
    State(state): State<HealthState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let client = client_ip(peer.ip(), request.headers(), &state.settings.trusted_proxies);

    let start = Instant::now();
    let response = next.run(request).await;
    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis();

    if status >= 400 {
        warn!(%method, %path, status, latency_ms, client_ip = %client, "Request denied");
    } else {
        tracing::debug!(%method, %path, status, latency_ms, client_ip = %client, "Request completed");
    }

    response
}

pub fn health_router(stats: Arc<StatsRepository>, settings: Arc<HealthSettings>) -> Router {
    let state = HealthState { stats, settings };
    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            request_logging,
        ))
        .with_state(state)
}

/// Serve the health endpoints until the shutdown signal fires.
pub async fn serve_health(
    stats: Arc<StatsRepository>,
    settings: Arc<HealthSettings>,
    addr: SocketAddr,
    shutdown: ShutdownSignal,
) -> anyhow::Result<()> {
    let app = health_router(stats, settings);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Health server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move { shutdown.cancelled().await })
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings_with_basic(user: &str, pass: &str) -> HealthSettings {
        HealthSettings {
            auth_user: Some(user.into()),
            auth_pass: Some(pass.into()),
            ..HealthSettings::default()
        }
    }

    #[test]
    fn no_auth_configured_allows_everything() {
        let settings = HealthSettings::default();
        assert!(authorize(&settings, &HeaderMap::new()).is_ok());
    }

    #[test]
    fn basic_auth_accepts_valid_credentials() {
        let settings = settings_with_basic("ops", "s3cret");
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode("ops:s3cret");
        headers.insert(
            "authorization",
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert!(authorize(&settings, &headers).is_ok());
    }

    #[test]
    fn basic_auth_rejects_bad_password() {
        let settings = settings_with_basic("ops", "s3cret");
        let mut headers = HeaderMap::new();
        let encoded = BASE64.encode("ops:wrong");
        headers.insert(
            "authorization",
            format!("Basic {encoded}").parse().unwrap(),
        );
        assert!(authorize(&settings, &headers).is_err());
    }

    #[test]
    fn token_header_is_accepted() {
        let settings = HealthSettings {
            token: Some("tok123".into()),
            ..HealthSettings::default()
        };
        let mut headers = HeaderMap::new();
        headers.insert("X-Health-Token", "tok123".parse().unwrap());
        assert!(authorize(&settings, &headers).is_ok());
        assert!(authorize(&settings, &HeaderMap::new()).is_err());
    }

    #[test]
    fn forwarded_for_honored_only_from_trusted_proxy() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "203.0.113.7, 10.0.0.1".parse().unwrap());

        let proxy: IpAddr = "10.1.2.3".parse().unwrap();
        let other: IpAddr = "10.9.9.9".parse().unwrap();
        let trusted = vec![proxy];

        let resolved = client_ip(proxy, &headers, &trusted);
        assert_eq!(resolved, "203.0.113.7".parse::<IpAddr>().unwrap());

        let resolved = client_ip(other, &headers, &trusted);
        assert_eq!(resolved, other);
    }
}
