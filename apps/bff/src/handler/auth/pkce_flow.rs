//! 認可コード + PKCE フローのハンドラ
//!
//! フロー状態（ベリファイア・state・戻り先）はサーバーに保存せず、
//! 10 分間有効な HttpOnly Cookie 3 つに分けて持たせる。
//! コールバックでは成否にかかわらず 3 つとも削除する。

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Deserialize;
use storefront_domain::{
    pkce::{PkceChallenge, generate_state, state_matches},
    return_url::ReturnUrl,
};
use storefront_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};

use super::AuthState;
use crate::{
    client::{IdpError, authorize_url},
    cookie::{self, OAUTH_STATE_COOKIE, PKCE_VERIFIER_COOKIE, RETURN_URL_COOKIE},
    error::{bad_request_response, internal_error_response, log_and_convert_idp_error},
};

/// `GET /auth/login` のクエリ
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginLoginQuery {
    pub return_url: Option<String>,
}

/// `GET /auth/callback` のクエリ
#[derive(Default, Deserialize)]
pub struct CallbackQuery {
    pub code:  Option<String>,
    pub state: Option<String>,
}

/// 302 Found でリダイレクトする
fn found(location: String) -> Response {
    (StatusCode::FOUND, [(header::LOCATION, location)]).into_response()
}

/// GET /auth/login
///
/// PKCE のベリファイアと state を生成して Cookie に保存し、
/// ID プロバイダの認可エンドポイントへリダイレクトする。
#[tracing::instrument(skip_all)]
pub async fn begin_login(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    Query(query): Query<BeginLoginQuery>,
) -> Response {
    let pkce = PkceChallenge::generate();
    let oauth_state = generate_state();
    let return_url =
        ReturnUrl::sanitize(query.return_url.as_deref(), &state.return_url_allowed_hosts);

    let location = match authorize_url(
        &state.identity_url,
        &state.oauth,
        &oauth_state,
        pkce.challenge(),
    ) {
        Ok(url) => url,
        Err(e) => {
            tracing::error!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::INTERNAL,
                "認可 URL の組み立てに失敗: {}",
                e
            );
            return internal_error_response();
        }
    };

    let jar = jar
        .add(state.cookies.flow_cookie(PKCE_VERIFIER_COOKIE, pkce.verifier()))
        .add(state.cookies.flow_cookie(OAUTH_STATE_COOKIE, oauth_state))
        .add(state.cookies.flow_cookie(RETURN_URL_COOKIE, return_url.as_str()));

    (jar, found(location)).into_response()
}

/// GET /auth/callback
///
/// state を検証し、認可コードとベリファイアをトークンに交換してセッションを確立する。
///
/// ## 失敗時
///
/// - `code` / `state` の欠落、state 不一致、ベリファイア Cookie の欠落 → 400
/// - ID プロバイダがコードを拒否 → 400
/// - ID プロバイダに到達できない → 503 / 504
///
/// いずれの場合もセッションは作成しない。
#[tracing::instrument(skip_all)]
pub async fn callback(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let expected_state = cookie::flow_value(&jar, OAUTH_STATE_COOKIE);
    let verifier = cookie::flow_value(&jar, PKCE_VERIFIER_COOKIE);
    let return_url = ReturnUrl::sanitize(
        cookie::flow_value(&jar, RETURN_URL_COOKIE).as_deref(),
        &state.return_url_allowed_hosts,
    );
    let jar = state.cookies.clear_flow_cookies(jar);

    let (Some(code), Some(received_state)) = (
        query.code.filter(|c| !c.is_empty()),
        query.state.filter(|s| !s.is_empty()),
    ) else {
        return (jar, bad_request_response("code と state は必須です")).into_response();
    };

    let state_ok = expected_state
        .as_deref()
        .is_some_and(|expected| state_matches(expected, &received_state));
    if !state_ok {
        let reason = if expected_state.is_some() {
            "state_mismatch"
        } else {
            "state_cookie_missing"
        };
        log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::CALLBACK_REJECTED,
            event.result = event::result::FAILURE,
            event.reason = reason,
            "state が一致しないコールバックを拒否しました（偽造の可能性）"
        );
        return (jar, bad_request_response("state が一致しません")).into_response();
    }

    let Some(verifier) = verifier else {
        log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::CALLBACK_REJECTED,
            event.result = event::result::FAILURE,
            event.reason = "verifier_cookie_missing",
            "コードベリファイアがないコールバックを拒否しました"
        );
        return (jar, bad_request_response("ログインフローの有効期限が切れています"))
            .into_response();
    };

    let response = match state.idp.exchange_code(&code, &verifier).await {
        Ok(response) => response,
        Err(IdpError::Rejected(reason)) | Err(IdpError::BadRequest(reason)) => {
            log_business_event!(
                event.category = event::category::AUTH,
                event.action = event::action::LOGIN_FAILURE,
                event.result = event::result::FAILURE,
                event.reason = %reason,
                "認可コードの交換が拒否されました"
            );
            return (jar, bad_request_response("認可コードを交換できません")).into_response();
        }
        Err(e) => {
            let response =
                log_and_convert_idp_error("認可コード交換", log_error::kind::TOKEN_EXCHANGE, e);
            return (jar, response).into_response();
        }
    };

    let (session_id, _) = match state.establish_session(response).await {
        Ok(created) => created,
        Err(response) => return (jar, response).into_response(),
    };

    log_business_event!(
        event.category = event::category::AUTH,
        event.action = event::action::LOGIN_SUCCESS,
        event.entity_type = event::entity_type::SESSION,
        event.entity_id = %session_id.short(),
        event.result = event::result::SUCCESS,
        "認可コードフローでログインしました"
    );

    let jar = jar.add(state.cookies.session_cookie(&session_id));
    (jar, found(return_url.resolve_against(&state.frontend_url))).into_response()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Method, Request, StatusCode, header},
    };
    use axum_extra::extract::cookie::Cookie;
    use pretty_assertions::assert_eq;
    use storefront_domain::pkce::verify_code_challenge;
    use storefront_infra::mock::InMemoryTokenStore;
    use tower::ServiceExt;
    use url::Url;

    use super::super::test_utils::*;

    fn callback_request(query: &str, cookies: &str) -> Request<Body> {
        Request::builder()
            .method(Method::GET)
            .uri(format!("/auth/callback?{query}"))
            .header(header::COOKIE, cookies)
            .body(Body::empty())
            .unwrap()
    }

    fn cookie_value(set_cookie: &str) -> String {
        Cookie::parse_encoded(set_cookie.to_string())
            .unwrap()
            .value()
            .to_string()
    }

    #[tokio::test]
    async fn test_login_で認可エンドポイントへ302リダイレクトする() {
        // Given
        let sut = create_test_app(Arc::new(StubIdpClient::success()), InMemoryTokenStore::new());
        let request = Request::builder()
            .uri("/auth/login?returnUrl=%2Fcart")
            .body(Body::empty())
            .unwrap();

        // When
        let response = sut.oneshot(request).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::FOUND);
        let location = response.headers()[header::LOCATION].to_str().unwrap();
        let url = Url::parse(location).unwrap();
        assert_eq!(url.path(), "/connect/authorize");
        let params: std::collections::HashMap<_, _> = url.query_pairs().into_owned().collect();
        assert_eq!(params["response_type"], "code");
        assert_eq!(params["client_id"], "storefront_bff");
        assert_eq!(params["code_challenge_method"], "S256");

        // Cookie に保存したベリファイアとチャレンジ、state が対応している
        let verifier = cookie_value(&find_set_cookie(response.headers(), "pkce_verifier").unwrap());
        let oauth_state = cookie_value(&find_set_cookie(response.headers(), "oauth_state").unwrap());
        assert!(verify_code_challenge(&verifier, &params["code_challenge"]));
        assert_eq!(params["state"], oauth_state);
        assert_ne!(verifier, oauth_state);

        let return_url = find_set_cookie(response.headers(), "return_url").unwrap();
        assert_eq!(cookie_value(&return_url), "/cart");
        assert!(return_url.contains("HttpOnly"));
        assert!(return_url.contains("Max-Age=600"));
        assert!(return_url.contains("Path=/auth"));
    }

    #[tokio::test]
    async fn test_login_で外部の戻り先はルートに置き換える() {
        let sut = create_test_app(Arc::new(StubIdpClient::success()), InMemoryTokenStore::new());
        let request = Request::builder()
            .uri("/auth/login?returnUrl=https%3A%2F%2Fevil.example.com")
            .body(Body::empty())
            .unwrap();

        let response = sut.oneshot(request).await.unwrap();

        let return_url = find_set_cookie(response.headers(), "return_url").unwrap();
        assert_eq!(cookie_value(&return_url), "/");
    }

    #[tokio::test]
    async fn test_callback_成功時にセッションを作成して戻り先へリダイレクトする() {
        // Given
        let idp = Arc::new(StubIdpClient::success());
        let store = InMemoryTokenStore::new();
        let sut = create_test_app(idp.clone(), store.clone());

        // When
        let response = sut
            .oneshot(callback_request(
                "code=code-1&state=state-1",
                "oauth_state=state-1; pkce_verifier=verifier-1; return_url=/cart",
            ))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(
            response.headers()[header::LOCATION],
            "https://shop.example.com/cart"
        );
        assert_eq!(idp.last_verifier.lock().as_deref(), Some("verifier-1"));
        assert_eq!(store.len(), 1);

        let session = find_set_cookie(response.headers(), "bff_session").unwrap();
        assert!(session.contains("HttpOnly"));
        // トークン自体は Cookie に載せない
        assert!(!session.contains("at-1"));
        for name in ["pkce_verifier", "oauth_state", "return_url"] {
            let cleared = find_set_cookie(response.headers(), name).unwrap();
            assert!(cleared.contains("Max-Age=0"), "{name} がクリアされること");
        }
    }

    #[tokio::test]
    async fn test_callback_許可リストの絶対urlへはそのままリダイレクトする() {
        let sut = create_test_app(Arc::new(StubIdpClient::success()), InMemoryTokenStore::new());

        let response = sut
            .oneshot(callback_request(
                "code=code-1&state=state-1",
                "oauth_state=state-1; pkce_verifier=verifier-1; return_url=https://admin.example.com/orders",
            ))
            .await
            .unwrap();

        assert_eq!(
            response.headers()[header::LOCATION],
            "https://admin.example.com/orders"
        );
    }

    #[tokio::test]
    async fn test_callback_state不一致は有効なコードでも400() {
        // Given
        let idp = Arc::new(StubIdpClient::success());
        let store = InMemoryTokenStore::new();
        let sut = create_test_app(idp.clone(), store.clone());

        // When
        let response = sut
            .oneshot(callback_request(
                "code=code-1&state=forged",
                "oauth_state=state-1; pkce_verifier=verifier-1",
            ))
            .await
            .unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(idp.calls(), 0);
        assert!(store.is_empty());
        assert!(find_set_cookie(response.headers(), "bff_session").is_none());
        let cleared = find_set_cookie(response.headers(), "oauth_state").unwrap();
        assert!(cleared.contains("Max-Age=0"));
    }

    #[tokio::test]
    async fn test_callback_state_cookieがなければ400() {
        let sut = create_test_app(Arc::new(StubIdpClient::success()), InMemoryTokenStore::new());

        let response = sut
            .oneshot(callback_request("code=code-1&state=state-1", "pkce_verifier=verifier-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_callback_ベリファイアcookieがなければ400() {
        let idp = Arc::new(StubIdpClient::success());
        let sut = create_test_app(idp.clone(), InMemoryTokenStore::new());

        let response = sut
            .oneshot(callback_request("code=code-1&state=state-1", "oauth_state=state-1"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(idp.calls(), 0);
    }

    #[tokio::test]
    async fn test_callback_codeがなければ400() {
        let sut = create_test_app(Arc::new(StubIdpClient::success()), InMemoryTokenStore::new());

        let response = sut
            .oneshot(callback_request(
                "state=state-1",
                "oauth_state=state-1; pkce_verifier=verifier-1",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_callback_プロバイダがコードを拒否したら400でセッションを作らない() {
        let store = InMemoryTokenStore::new();
        let sut = create_test_app(Arc::new(StubIdpClient::rejecting()), store.clone());

        let response = sut
            .oneshot(callback_request(
                "code=used&state=state-1",
                "oauth_state=state-1; pkce_verifier=verifier-1",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_callback_プロバイダ停止時は503() {
        let sut = create_test_app(Arc::new(StubIdpClient::unavailable()), InMemoryTokenStore::new());

        let response = sut
            .oneshot(callback_request(
                "code=code-1&state=state-1",
                "oauth_state=state-1; pkce_verifier=verifier-1",
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let cleared = find_set_cookie(response.headers(), "pkce_verifier").unwrap();
        assert!(cleared.contains("Max-Age=0"));
    }
}
