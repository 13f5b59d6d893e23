//! # Request ID レイヤーのテスト
//!
//! BFF のルーター全体で Request ID レイヤー（SetRequestIdLayer + PropagateRequestIdLayer +
//! カスタム make_span_with）が正しく動作することを検証する。
//!
//! - レスポンスに `X-Request-Id` ヘッダーが含まれる
//! - クライアント提供の `X-Request-Id` がそのまま返される
//! - 自動生成の `X-Request-Id` が UUID v7 形式である
//! - エラーレスポンスにも `X-Request-Id` が含まれる

mod common;

use axum::http::StatusCode;
use common::*;
use storefront_infra::mock::InMemoryTokenStore;
use tower::ServiceExt;
use wiremock::MockServer;

async fn test_app() -> (axum::Router, MockServer, MockServer) {
    let identity = MockServer::start().await;
    let gateway = MockServer::start().await;
    let app = create_app(&identity, &gateway, InMemoryTokenStore::new());
    (app, identity, gateway)
}

#[tokio::test]
async fn test_レスポンスにx_request_idヘッダーが含まれる() {
    let (app, _identity, _gateway) = test_app().await;

    let response = app.oneshot(get("/health", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response.headers().contains_key("x-request-id"),
        "レスポンスに x-request-id ヘッダーが含まれること"
    );
}

#[tokio::test]
async fn test_クライアント提供のx_request_idがそのまま返される() {
    let (app, _identity, _gateway) = test_app().await;
    let custom_id = "client-provided-request-id-123";
    let mut request = get("/health", None);
    request
        .headers_mut()
        .insert("x-request-id", custom_id.parse().unwrap());

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response
            .headers()
            .get("x-request-id")
            .unwrap()
            .to_str()
            .unwrap(),
        custom_id,
        "クライアント提供の Request ID がそのまま返されること"
    );
}

#[tokio::test]
async fn test_自動生成のx_request_idがuuid_v7形式である() {
    let (app, _identity, _gateway) = test_app().await;

    let response = app.oneshot(get("/health", None)).await.unwrap();

    let request_id = response
        .headers()
        .get("x-request-id")
        .unwrap()
        .to_str()
        .unwrap();

    let uuid = uuid::Uuid::parse_str(request_id)
        .unwrap_or_else(|_| panic!("有効な UUID であること: {request_id}"));
    assert_eq!(
        uuid.get_version(),
        Some(uuid::Version::SortRand),
        "UUID v7（SortRand）であること"
    );
}

#[tokio::test]
async fn test_401レスポンスにもx_request_idが含まれる() {
    let (app, _identity, _gateway) = test_app().await;

    let response = app.oneshot(get("/auth/user", None)).await.unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(response.headers().contains_key("x-request-id"));
}
