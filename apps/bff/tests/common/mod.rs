//! 統合テスト共通のフィクスチャ
//!
//! ID プロバイダと内部ゲートウェイは wiremock のモックサーバーで置き換え、
//! 実際の reqwest クライアントを通して BFF のルーター全体を検証する。

#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{HeaderMap, Request, header},
    response::Response,
};
use chrono::{DateTime, TimeZone, Utc};
use storefront_bff::{
    app_builder::{AppDependencies, build_app},
    client::{GatewayClientImpl, IdentityProviderClientImpl},
    config::{BffConfig, OAuthConfig},
};
use storefront_domain::clock::FixedClock;
use storefront_infra::mock::InMemoryTokenStore;
use wiremock::MockServer;

pub const FRONTEND_URL: &str = "https://shop.example.com";
pub const INTERNAL_API_KEY: &str = "integration-key";

/// テストの基準時刻
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
}

pub fn test_config(identity: &MockServer, gateway: &MockServer) -> BffConfig {
    BffConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        redis_url: "redis://unused".to_string(),
        identity_url: identity.uri(),
        gateway_url: gateway.uri(),
        images_url: gateway.uri(),
        cargo_url: gateway.uri(),
        frontend_url: FRONTEND_URL.to_string(),
        oauth: OAuthConfig {
            client_id:    "storefront_bff".to_string(),
            redirect_uri: format!("{FRONTEND_URL}/auth/callback"),
            scopes:       "openid profile offline_access".to_string(),
        },
        return_url_allowed_hosts: vec![],
        internal_api_key: Some(INTERNAL_API_KEY.to_string()),
        flow_cookie_path: "/".to_string(),
        cookie_secure: false,
        upstream_timeout: Duration::from_secs(5),
        upload_timeout: Duration::from_secs(5),
        upload_max_bytes: 1024,
        cors_allowed_origins: vec![],
    }
}

/// モックサーバーに向いたクライアントでルーターを組み立てる
pub fn create_app(identity: &MockServer, gateway: &MockServer, store: InMemoryTokenStore) -> Router {
    let config = test_config(identity, gateway);
    let idp = IdentityProviderClientImpl::new(
        &config.identity_url,
        config.oauth.clone(),
        config.upstream_timeout,
    )
    .unwrap();
    let gateway = GatewayClientImpl::new(config.upstream_timeout, config.upload_timeout).unwrap();

    build_app(
        &config,
        AppDependencies {
            idp:       Arc::new(idp),
            gateway:   Arc::new(gateway),
            store:     Arc::new(store),
            clock:     Arc::new(FixedClock::new(now())),
            readiness: None,
        },
    )
}

/// トークンエンドポイントの成功レスポンス
pub fn token_json(access_token: &str, refresh_token: &str) -> serde_json::Value {
    serde_json::json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "refresh_token": refresh_token,
    })
}

/// `Set-Cookie` から `name=value` 部分だけを取り出す
pub fn cookie_pair(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find(|c| c.starts_with(&format!("{name}=")))
        .and_then(|c| c.split(';').next())
        .map(str::to_string)
}

pub fn get(uri: &str, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::empty()).unwrap()
}

pub fn post_json(uri: &str, cookie: Option<&str>, body: serde_json::Value) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub async fn json_body(response: Response) -> serde_json::Value {
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&body).unwrap()
}
