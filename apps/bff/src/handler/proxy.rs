//! # プロキシハンドラ
//!
//! `ANY /api/{domain}/{*path}` をルーティングテーブルに従って内部ゲートウェイへ転送する。
//!
//! ## 転送するもの
//!
//! - メソッド・クエリ文字列
//! - ボディ（GET / DELETE / HEAD 以外）と元の `Content-Type`
//! - 安全なヘッダー（`Accept`, `Accept-Language`, `User-Agent`）
//! - `X-Request-Id`（現在のリクエスト ID をクライアント側で付与）
//! - 認証が必要なドメインでは `Authorization: Bearer <access_token>`
//!
//! ブラウザの Cookie と `Authorization` は転送しない。
//!
//! ## リアクティブリフレッシュ
//!
//! 下流が 401 を返し、このリクエストでまだリフレッシュしていなければ
//! 1 回だけリフレッシュして再送する。再送でも 401 ならそのまま返す。

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use bytes::Bytes;
use serde::Deserialize;
use storefront_domain::route::find_route;

use crate::{
    client::{ForwardRequest, GatewayClient, UpstreamResponse},
    cookie,
    error::{
        bad_request_response,
        log_and_convert_gateway_error,
        method_not_allowed_response,
        not_found_response,
        session_expired_response,
        unauthorized_response,
    },
    session::{ActiveSession, SessionError, SessionResolver},
};

/// 下流へ転送してよいヘッダー
const FORWARDED_HEADERS: [header::HeaderName; 3] =
    [header::ACCEPT, header::ACCEPT_LANGUAGE, header::USER_AGENT];

/// プロキシ・画像・アカウントハンドラの共有状態
pub struct ProxyState {
    pub gateway:          Arc<dyn GatewayClient>,
    pub sessions:         Arc<SessionResolver>,
    /// 内部ゲートウェイのベース URL
    pub gateway_url:      String,
    /// ID プロバイダのベース URL（プロフィール・パスワード）
    pub identity_url:     String,
    /// 画像サービスのベース URL
    pub images_url:       String,
    /// 配送サービスのベース URL（配送先住所）
    pub cargo_url:        String,
    /// アップロードの上限サイズ（バイト）
    pub upload_max_bytes: usize,
}

/// `/api/{domain}/{*path}` のパスパラメータ
#[derive(Debug, Deserialize)]
pub struct ProxyPath {
    pub domain: String,
    #[serde(default)]
    pub path:   String,
}

/// ANY /api/{domain}/{*path}
#[tracing::instrument(skip_all, fields(domain = %target.domain))]
pub async fn forward(
    State(state): State<Arc<ProxyState>>,
    Path(target): Path<ProxyPath>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    jar: CookieJar,
    body: Bytes,
) -> Response {
    let Some(route) = find_route(&target.domain) else {
        return not_found_response(&format!("ドメイン '{}' は存在しません", target.domain));
    };
    if !route.allows(method.as_str()) {
        return method_not_allowed_response(&format!(
            "ドメイン '{}' は {} を受け付けません",
            route.domain, method
        ));
    }
    let upstream_path = match route.upstream_path(&target.path) {
        Ok(path) => path,
        Err(e) => return bad_request_response(&e.to_string()),
    };

    let session = if route.requires_auth {
        match resolve_session(&state.sessions, &jar).await {
            Ok(session) => Some(session),
            Err(response) => return response,
        }
    } else {
        None
    };

    let request = ForwardRequest {
        url: with_query(format!("{}{}", state.gateway_url, upstream_path), &uri),
        bearer: session.as_ref().map(|s| s.tokens.access_token().to_string()),
        headers: forwarded_headers(&headers),
        content_type: headers.get(header::CONTENT_TYPE).cloned(),
        body: has_body(&method).then_some(body),
        method,
    };

    forward_with_retry(&state, request, session).await
}

/// リクエストを転送し、下流の 401 には 1 回だけリフレッシュして再送する
pub(crate) async fn forward_with_retry(
    state: &ProxyState,
    request: ForwardRequest,
    session: Option<ActiveSession>,
) -> Response {
    match send_with_retry(state, request, session).await {
        Ok(response) => relay(response),
        Err(response) => response,
    }
}

/// [`forward_with_retry`] と同じ手順で転送し、下流のレスポンスをそのまま返す
///
/// 成功時のボディを BFF 側で組み立てるハンドラが使う。
pub(crate) async fn send_with_retry(
    state: &ProxyState,
    request: ForwardRequest,
    session: Option<ActiveSession>,
) -> Result<UpstreamResponse, Response> {
    let response = state
        .gateway
        .forward(request.clone())
        .await
        .map_err(|e| log_and_convert_gateway_error("プロキシ転送", e))?;

    let Some(session) = session.filter(|s| !s.refreshed) else {
        return Ok(response);
    };
    if response.status != StatusCode::UNAUTHORIZED {
        return Ok(response);
    }

    tracing::debug!("下流が 401 を返したためトークンをリフレッシュして再送します");
    let refreshed = match state
        .sessions
        .refresh(&session.session_id, &session.tokens)
        .await
    {
        Ok(refreshed) => refreshed,
        Err(SessionError::Unauthenticated | SessionError::Expired) => {
            return Err(session_expired_response());
        }
        Err(e) => return Err(e.into_response()),
    };

    let retry = ForwardRequest {
        bearer: Some(refreshed.tokens.access_token().to_string()),
        ..request
    };
    state
        .gateway
        .forward(retry)
        .await
        .map_err(|e| log_and_convert_gateway_error("プロキシ再送", e))
}

/// Cookie のセッションを解決する（必要ならリフレッシュ）
pub(crate) async fn resolve_session(
    sessions: &SessionResolver,
    jar: &CookieJar,
) -> Result<ActiveSession, Response> {
    let Some(session_id) = cookie::session_id(jar) else {
        return Err(unauthorized_response());
    };
    sessions
        .resolve(&session_id)
        .await
        .map_err(IntoResponse::into_response)
}

/// 転送を許可したヘッダーだけを取り出す
pub(crate) fn forwarded_headers(headers: &HeaderMap) -> HeaderMap {
    let mut forwarded = HeaderMap::new();
    for name in FORWARDED_HEADERS {
        for value in headers.get_all(&name) {
            forwarded.append(name.clone(), value.clone());
        }
    }
    forwarded
}

/// 元のクエリ文字列を付け足す
pub(crate) fn with_query(url: String, uri: &Uri) -> String {
    match uri.query() {
        Some(query) if !query.is_empty() => format!("{url}?{query}"),
        _ => url,
    }
}

fn has_body(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::DELETE)
}

/// 下流のレスポンスをステータス・Content-Type・ボディごと返す
pub(crate) fn relay(response: UpstreamResponse) -> Response {
    let mut relayed = (response.status, response.body).into_response();
    let headers = relayed.headers_mut();
    match response.content_type {
        Some(content_type) => {
            headers.insert(header::CONTENT_TYPE, content_type);
        }
        None => {
            headers.remove(header::CONTENT_TYPE);
        }
    }
    relayed
}

#[cfg(test)]
pub(crate) mod test_utils {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::http::{HeaderValue, StatusCode};
    use bytes::Bytes;
    use futures::StreamExt;

    use crate::client::{
        ForwardRequest,
        GatewayClient,
        GatewayError,
        UploadRequest,
        UpstreamResponse,
    };

    /// 受け取ったリクエストを記録し、用意したレスポンスを順に返すゲートウェイのスタブ
    pub struct StubGateway {
        pub responses: parking_lot::Mutex<Vec<Result<UpstreamResponse, GatewayError>>>,
        pub requests:  parking_lot::Mutex<Vec<ForwardRequest>>,
        /// アップロードで受け取ったボディ（URL, bearer, 内容）
        pub uploads:   parking_lot::Mutex<Vec<(String, String, Bytes)>>,
    }

    impl StubGateway {
        pub fn new(responses: Vec<Result<UpstreamResponse, GatewayError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: parking_lot::Mutex::new(responses),
                requests:  parking_lot::Mutex::new(Vec::new()),
                uploads:   parking_lot::Mutex::new(Vec::new()),
            })
        }

        pub fn ok(status: StatusCode, body: &'static str) -> Result<UpstreamResponse, GatewayError> {
            Ok(UpstreamResponse {
                status,
                content_type: Some(HeaderValue::from_static("application/json")),
                body: Bytes::from_static(body.as_bytes()),
            })
        }

        pub fn requests(&self) -> Vec<ForwardRequest> {
            self.requests.lock().clone()
        }

        fn next_response(&self) -> Result<UpstreamResponse, GatewayError> {
            let mut responses = self.responses.lock();
            if responses.is_empty() {
                Self::ok(StatusCode::OK, "{}")
            } else {
                responses.remove(0)
            }
        }
    }

    #[async_trait]
    impl GatewayClient for StubGateway {
        async fn forward(&self, request: ForwardRequest) -> Result<UpstreamResponse, GatewayError> {
            self.requests.lock().push(request);
            self.next_response()
        }

        async fn upload(&self, request: UploadRequest) -> Result<UpstreamResponse, GatewayError> {
            let mut body = Vec::new();
            let mut stream = request.body;
            while let Some(chunk) = stream.next().await {
                match chunk {
                    Ok(bytes) => body.extend_from_slice(&bytes),
                    Err(e) => return Err(GatewayError::Unexpected(e.to_string())),
                }
            }
            self.uploads
                .lock()
                .push((request.url, request.bearer, Bytes::from(body)));
            self.next_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, Method, Request, StatusCode, header},
        routing::any,
    };
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use storefront_domain::{clock::FixedClock, session_id::SessionId, token::TokenSet};
    use storefront_infra::mock::InMemoryTokenStore;
    use tower::ServiceExt;

    use super::{test_utils::StubGateway, *};
    use crate::{client::GatewayError, handler::auth::test_utils::StubIdpClient};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
    }

    fn tokens_expiring_in(delta: TimeDelta) -> TokenSet {
        TokenSet::new("at-1", Some("rt-1".to_string()), None, now() + delta, None)
    }

    fn create_test_app(
        gateway: Arc<StubGateway>,
        idp: Arc<StubIdpClient>,
        store: InMemoryTokenStore,
    ) -> Router {
        let sessions = SessionResolver::new(
            Arc::new(store),
            idp,
            Arc::new(FixedClock::new(now())),
        );
        let state = Arc::new(ProxyState {
            gateway,
            sessions: Arc::new(sessions),
            gateway_url: "http://gateway".to_string(),
            identity_url: "http://identity".to_string(),
            images_url: "http://images".to_string(),
            cargo_url: "http://cargo".to_string(),
            upload_max_bytes: 1024,
        });

        Router::new()
            .route("/api/{domain}", any(forward))
            .route("/api/{domain}/{*path}", any(forward))
            .with_state(state)
    }

    fn request(method: Method, uri: &str, session_id: Option<&SessionId>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(id) = session_id {
            builder = builder.header(header::COOKIE, format!("bff_session={}", id.as_str()));
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_認証付きgetでbearerを付与しcookieとauthorizationは転送しない() {
        // Given
        let id = SessionId::generate();
        let gateway = StubGateway::new(vec![StubGateway::ok(StatusCode::OK, r#"{"items":[]}"#)]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1))),
        );
        let request = Request::builder()
            .method(Method::GET)
            .uri("/api/cart/items?page=2")
            .header(header::COOKIE, format!("bff_session={}; other=1", id.as_str()))
            .header(header::AUTHORIZATION, "Bearer from-browser")
            .header(header::ACCEPT, "application/json")
            .header("x-custom", "drop-me")
            .body(Body::empty())
            .unwrap();

        // When
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&body[..], br#"{"items":[]}"#);

        let forwarded = gateway.requests();
        assert_eq!(forwarded.len(), 1);
        assert_eq!(forwarded[0].url, "http://gateway/services/cart/items?page=2");
        assert_eq!(forwarded[0].bearer.as_deref(), Some("at-1"));
        assert_eq!(forwarded[0].headers[header::ACCEPT], "application/json");
        assert!(forwarded[0].headers.get(header::COOKIE).is_none());
        assert!(forwarded[0].headers.get(header::AUTHORIZATION).is_none());
        assert!(forwarded[0].headers.get("x-custom").is_none());
        assert_eq!(forwarded[0].body, None);
    }

    #[tokio::test]
    async fn test_公開ドメインはセッションなしで転送する() {
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::new(),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/product/items/42", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let forwarded = gateway.requests();
        assert_eq!(forwarded[0].url, "http://gateway/services/catalog/items/42");
        assert_eq!(forwarded[0].bearer, None);
    }

    #[tokio::test]
    async fn test_postはボディとcontent_typeを転送する() {
        let id = SessionId::generate();
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1))),
        );
        let request = Request::builder()
            .method(Method::POST)
            .uri("/api/order")
            .header(header::COOKIE, format!("bff_session={}", id.as_str()))
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"qty":1}"#))
            .unwrap();

        let response = sut.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let forwarded = gateway.requests();
        assert_eq!(forwarded[0].url, "http://gateway/services/order");
        assert_eq!(forwarded[0].method, Method::POST);
        assert_eq!(forwarded[0].body.as_deref(), Some(&br#"{"qty":1}"#[..]));
        assert_eq!(
            forwarded[0].content_type,
            Some(HeaderValue::from_static("application/json"))
        );
    }

    #[tokio::test]
    async fn test_未知のドメインは404() {
        let sut = create_test_app(
            StubGateway::new(vec![]),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::new(),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/unknown/items", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_許可されていないメソッドは405() {
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::new(),
        );

        let response = sut
            .oneshot(request(Method::DELETE, "/api/product/items/1", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_セッションcookieがなければ401() {
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::success()),
            InMemoryTokenStore::new(),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/cart/items", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_期限切れのセッションは1回リフレッシュしてから転送する() {
        // Given: 1 秒前に期限切れ
        let id = SessionId::generate();
        let store = InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::seconds(-1)));
        let idp = Arc::new(StubIdpClient::success());
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(gateway.clone(), idp.clone(), store.clone());

        // When
        let response = sut
            .oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(idp.calls(), 1);
        assert_eq!(gateway.requests()[0].bearer.as_deref(), Some("at-2"));
        let stored = store.snapshot(&id).unwrap();
        assert!(stored.expires_at() > now());
    }

    #[tokio::test]
    async fn test_有効なセッションはリフレッシュしない() {
        let id = SessionId::generate();
        let idp = Arc::new(StubIdpClient::success());
        let sut = create_test_app(
            StubGateway::new(vec![]),
            idp.clone(),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1))),
        );

        sut.oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();

        assert_eq!(idp.calls(), 0);
    }

    #[tokio::test]
    async fn test_リフレッシュが拒否されたらrequires_refresh付きの401() {
        let id = SessionId::generate();
        let store = InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::seconds(-1)));
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            Arc::new(StubIdpClient::rejecting()),
            store.clone(),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["requiresRefresh"], true);
        assert!(store.is_empty());
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_下流の401で1回だけリフレッシュして再送する() {
        // Given: 1 回目は 401、再送は 200
        let id = SessionId::generate();
        let idp = Arc::new(StubIdpClient::success());
        let gateway = StubGateway::new(vec![
            StubGateway::ok(StatusCode::UNAUTHORIZED, "{}"),
            StubGateway::ok(StatusCode::OK, r#"{"ok":true}"#),
        ]);
        let sut = create_test_app(
            gateway.clone(),
            idp.clone(),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1))),
        );

        // When
        let response = sut
            .oneshot(request(Method::GET, "/api/order/42", Some(&id)))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(idp.calls(), 1);
        let forwarded = gateway.requests();
        assert_eq!(forwarded.len(), 2);
        assert_eq!(forwarded[0].bearer.as_deref(), Some("at-1"));
        assert_eq!(forwarded[1].bearer.as_deref(), Some("at-2"));
    }

    #[tokio::test]
    async fn test_再送でも401ならそのまま返す() {
        let id = SessionId::generate();
        let idp = Arc::new(StubIdpClient::success());
        let gateway = StubGateway::new(vec![
            StubGateway::ok(StatusCode::UNAUTHORIZED, "{}"),
            StubGateway::ok(StatusCode::UNAUTHORIZED, r#"{"error":"denied"}"#),
        ]);
        let sut = create_test_app(
            gateway.clone(),
            idp.clone(),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1))),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/order/42", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(idp.calls(), 1);
        assert_eq!(gateway.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_このリクエストで既にリフレッシュ済みなら下流の401で再送しない() {
        let id = SessionId::generate();
        let idp = Arc::new(StubIdpClient::success());
        let gateway = StubGateway::new(vec![StubGateway::ok(StatusCode::UNAUTHORIZED, "{}")]);
        let sut = create_test_app(
            gateway.clone(),
            idp.clone(),
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::seconds(-1))),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/order/42", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(idp.calls(), 1);
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_下流に接続できなければ503_タイムアウトは504() {
        let id = SessionId::generate();
        let store = InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::hours(1)));
        let gateway = StubGateway::new(vec![Err(GatewayError::Unavailable), Err(GatewayError::Timeout)]);
        let sut = create_test_app(gateway, Arc::new(StubIdpClient::success()), store);

        let unavailable = sut
            .clone()
            .oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();
        let timeout = sut
            .oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();

        assert_eq!(unavailable.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_プロバイダ停止中でも期限間近のトークンで転送する() {
        let id = SessionId::generate();
        let idp = Arc::new(StubIdpClient::unavailable());
        let gateway = StubGateway::new(vec![]);
        let sut = create_test_app(
            gateway.clone(),
            idp,
            InMemoryTokenStore::with_session(&id, tokens_expiring_in(TimeDelta::minutes(2))),
        );

        let response = sut
            .oneshot(request(Method::GET, "/api/cart/items", Some(&id)))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(gateway.requests()[0].bearer.as_deref(), Some("at-1"));
    }

    #[test]
    fn test_relay_は下流のステータスとcontent_typeを保つ() {
        let response = relay(UpstreamResponse {
            status:       StatusCode::UNPROCESSABLE_ENTITY,
            content_type: Some(HeaderValue::from_static("application/problem+json")),
            body:         Bytes::from_static(b"{}"),
        });

        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/problem+json"
        );
    }

    #[test]
    fn test_with_query_はクエリがなければurlをそのまま返す() {
        let uri: Uri = "/api/cart".parse().unwrap();

        assert_eq!(
            with_query("http://gateway/services/cart".to_string(), &uri),
            "http://gateway/services/cart"
        );
    }
}
