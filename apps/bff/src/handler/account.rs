//! # アカウントハンドラ
//!
//! ログイン中のユーザー自身のプロフィール・パスワード・配送先住所を扱う。
//! いずれもセッションのアクセストークンを付けて下流へ転送し、
//! 下流の 401 には [`send_with_retry`] で 1 回だけリフレッシュして再送する。
//!
//! | BFF | 転送先 |
//! |-----|--------|
//! | `PUT /users/profile` | ID プロバイダ `PUT /api/users/update` |
//! | `POST /users/password` | ID プロバイダ `POST /api/users/change-password` |
//! | `GET /addresses` | 配送サービス `GET /api/cargocustomers/user/{sub}/addresses` |
//! | `POST /addresses` | 配送サービス `POST /api/cargocustomers` |
//! | `GET /addresses/{id}` | 配送サービス `GET /api/cargocustomers/{id}` |
//! | `PUT /addresses/{id}` | 配送サービス `PUT /api/cargocustomers` |
//! | `DELETE /addresses/{id}` | 配送サービス `DELETE /api/cargocustomers/{id}` |
//! | `POST /addresses/{id}/set-default` | 配送サービス `POST /api/cargocustomers/{id}/set-default?userId={sub}` |
//!
//! 住所の所有者はトークンの `sub` で決まる。ボディに含まれる所有者 ID は上書きする。

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method},
    response::{IntoResponse, Response},
};
use axum_extra::extract::{CookieJar, WithRejection};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{Map, Value};
use storefront_domain::claims::UserClaims;
use storefront_shared::{event_log::event, log_business_event};

use super::proxy::{ProxyState, forwarded_headers, relay, resolve_session, send_with_retry};
use crate::{
    client::{ForwardRequest, UpstreamResponse},
    error::{JsonBodyRejection, internal_error_response, unauthorized_response},
    session::ActiveSession,
};

const PROFILE_UPDATE_PATH: &str = "/api/users/update";
const CHANGE_PASSWORD_PATH: &str = "/api/users/change-password";
const CARGO_CUSTOMERS_PATH: &str = "/api/cargocustomers";

/// プロフィール・パスワード変更の結果
#[derive(Debug, Serialize)]
pub struct AccountResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// 下流が返したエラーの本文
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AccountResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: Some(message.to_string()),
            details: None,
        })
    }

    fn done() -> Json<Self> {
        Json(Self {
            success: true,
            message: None,
            details: None,
        })
    }
}

// --- プロフィール・パスワード ---

/// PUT /users/profile
#[tracing::instrument(skip_all)]
pub async fn update_profile(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<Value>, JsonBodyRejection>,
) -> Response {
    let session = match resolve_session(&state.sessions, &jar).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let url = format!("{}{PROFILE_UPDATE_PATH}", state.identity_url);
    let request = match json_request(Method::PUT, url, &session, &headers, &payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match send_with_retry(&state, request, Some(session)).await {
        Ok(response) if response.status.is_success() => {
            log_business_event!(
                event.category = event::category::ACCOUNT,
                event.action = event::action::PROFILE_UPDATED,
                event.entity_type = event::entity_type::USER,
                event.result = event::result::SUCCESS,
                "プロフィールを更新しました"
            );
            AccountResponse::ok("プロフィールを更新しました").into_response()
        }
        Ok(response) => account_failure(response, "プロフィールの更新に失敗しました"),
        Err(response) => response,
    }
}

/// POST /users/password
#[tracing::instrument(skip_all)]
pub async fn change_password(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    jar: CookieJar,
    WithRejection(Json(payload), _): WithRejection<Json<Value>, JsonBodyRejection>,
) -> Response {
    let session = match resolve_session(&state.sessions, &jar).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let url = format!("{}{CHANGE_PASSWORD_PATH}", state.identity_url);
    let request = match json_request(Method::POST, url, &session, &headers, &payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    match send_with_retry(&state, request, Some(session)).await {
        Ok(response) if response.status.is_success() => {
            log_business_event!(
                event.category = event::category::ACCOUNT,
                event.action = event::action::PASSWORD_CHANGED,
                event.entity_type = event::entity_type::USER,
                event.result = event::result::SUCCESS,
                "パスワードを変更しました"
            );
            AccountResponse::ok("パスワードを変更しました").into_response()
        }
        Ok(response) => account_failure(response, "パスワードの変更に失敗しました"),
        Err(response) => response,
    }
}

// --- 配送先住所 ---

/// GET /addresses
#[tracing::instrument(skip_all)]
pub async fn list_addresses(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let (session, user_id) = match resolve_owner(&state, &jar).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let request = bare_request(
        Method::GET,
        format!(
            "{}{CARGO_CUSTOMERS_PATH}/user/{}/addresses",
            state.cargo_url,
            encode_segment(&user_id)
        ),
        &session,
        &headers,
    );
    relay_result(send_with_retry(&state, request, Some(session)).await)
}

/// GET /addresses/{id}
#[tracing::instrument(skip_all, fields(address_id = id))]
pub async fn get_address(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let session = match resolve_session(&state.sessions, &jar).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let request = bare_request(
        Method::GET,
        format!("{}{CARGO_CUSTOMERS_PATH}/{id}", state.cargo_url),
        &session,
        &headers,
    );
    relay_result(send_with_retry(&state, request, Some(session)).await)
}

/// POST /addresses
#[tracing::instrument(skip_all)]
pub async fn create_address(
    State(state): State<Arc<ProxyState>>,
    headers: HeaderMap,
    jar: CookieJar,
    WithRejection(Json(mut payload), _): WithRejection<Json<Map<String, Value>>, JsonBodyRejection>,
) -> Response {
    let (session, user_id) = match resolve_owner(&state, &jar).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    payload.insert("userCustomerId".to_string(), Value::String(user_id));
    let url = format!("{}{CARGO_CUSTOMERS_PATH}", state.cargo_url);
    let request = match json_request(Method::POST, url, &session, &headers, &payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    let result = send_with_retry(&state, request, Some(session)).await;
    if let Ok(response) = &result {
        log_address_event(response, "create");
    }
    relay_result(result)
}

/// PUT /addresses/{id}
#[tracing::instrument(skip_all, fields(address_id = id))]
pub async fn update_address(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    jar: CookieJar,
    WithRejection(Json(mut payload), _): WithRejection<Json<Map<String, Value>>, JsonBodyRejection>,
) -> Response {
    let (session, user_id) = match resolve_owner(&state, &jar).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    payload.insert("cargoCustomerId".to_string(), Value::from(id));
    payload.insert("userCustomerId".to_string(), Value::String(user_id));
    let url = format!("{}{CARGO_CUSTOMERS_PATH}", state.cargo_url);
    let request = match json_request(Method::PUT, url, &session, &headers, &payload) {
        Ok(request) => request,
        Err(response) => return response,
    };

    success_or_relay(send_with_retry(&state, request, Some(session)).await, "update")
}

/// DELETE /addresses/{id}
#[tracing::instrument(skip_all, fields(address_id = id))]
pub async fn delete_address(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let session = match resolve_session(&state.sessions, &jar).await {
        Ok(session) => session,
        Err(response) => return response,
    };

    let request = bare_request(
        Method::DELETE,
        format!("{}{CARGO_CUSTOMERS_PATH}/{id}", state.cargo_url),
        &session,
        &headers,
    );
    success_or_relay(send_with_retry(&state, request, Some(session)).await, "delete")
}

/// POST /addresses/{id}/set-default
#[tracing::instrument(skip_all, fields(address_id = id))]
pub async fn set_default_address(
    State(state): State<Arc<ProxyState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let (session, user_id) = match resolve_owner(&state, &jar).await {
        Ok(owner) => owner,
        Err(response) => return response,
    };

    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("userId", &user_id)
        .finish();
    let request = bare_request(
        Method::POST,
        format!("{}{CARGO_CUSTOMERS_PATH}/{id}/set-default?{query}", state.cargo_url),
        &session,
        &headers,
    );
    success_or_relay(
        send_with_retry(&state, request, Some(session)).await,
        "set_default",
    )
}

// --- ヘルパー ---

/// セッションを解決し、トークンの `sub` を住所の所有者 ID として取り出す
async fn resolve_owner(
    state: &ProxyState,
    jar: &CookieJar,
) -> Result<(ActiveSession, String), Response> {
    let session = resolve_session(&state.sessions, jar).await?;
    let sub = UserClaims::from_tokens(&session.tokens)
        .ok()
        .and_then(|claims| claims.sub)
        .filter(|sub| !sub.trim().is_empty());

    match sub {
        Some(sub) => Ok((session, sub)),
        None => {
            tracing::warn!("トークンに sub クレームがありません");
            Err(unauthorized_response())
        }
    }
}

fn bare_request(
    method: Method,
    url: String,
    session: &ActiveSession,
    headers: &HeaderMap,
) -> ForwardRequest {
    ForwardRequest {
        method,
        url,
        bearer: Some(session.tokens.access_token().to_string()),
        headers: forwarded_headers(headers),
        content_type: None,
        body: None,
    }
}

fn json_request<T: Serialize>(
    method: Method,
    url: String,
    session: &ActiveSession,
    headers: &HeaderMap,
    payload: &T,
) -> Result<ForwardRequest, Response> {
    let body = serde_json::to_vec(payload).map_err(|e| {
        tracing::error!("転送ボディをシリアライズできません: {}", e);
        internal_error_response()
    })?;

    Ok(ForwardRequest {
        content_type: Some(HeaderValue::from_static("application/json")),
        body: Some(Bytes::from(body)),
        ..bare_request(method, url, session, headers)
    })
}

fn relay_result(result: Result<UpstreamResponse, Response>) -> Response {
    match result {
        Ok(response) => relay(response),
        Err(response) => response,
    }
}

/// 成功なら `{success: true}`、失敗なら下流のレスポンスをそのまま返す
fn success_or_relay(result: Result<UpstreamResponse, Response>, operation: &str) -> Response {
    match result {
        Ok(response) => {
            log_address_event(&response, operation);
            if response.status.is_success() {
                AccountResponse::done().into_response()
            } else {
                relay(response)
            }
        }
        Err(response) => response,
    }
}

/// 失敗時は下流のステータスで `{success: false, message, details}` を返す
fn account_failure(response: UpstreamResponse, message: &str) -> Response {
    let details = String::from_utf8_lossy(&response.body).into_owned();
    let body = AccountResponse {
        success: false,
        message: Some(message.to_string()),
        details: (!details.is_empty()).then_some(details),
    };
    (response.status, Json(body)).into_response()
}

fn log_address_event(response: &UpstreamResponse, operation: &str) {
    let outcome = if response.status.is_success() {
        event::result::SUCCESS
    } else {
        event::result::FAILURE
    };
    log_business_event!(
        event.category = event::category::ACCOUNT,
        event.action = event::action::ADDRESS_CHANGED,
        event.entity_type = event::entity_type::ADDRESS,
        event.result = outcome,
        address.operation = operation,
        upstream.status = response.status.as_u16(),
        "配送先住所の変更を転送しました"
    );
}

/// パスの 1 セグメントとして埋め込めるようにエスケープする
fn encode_segment(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
