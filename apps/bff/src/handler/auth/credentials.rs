//! 資格情報によるログイン・登録、および信頼済み呼び出し元向けハンドラ
//!
//! `admin-login` / `get-token` / `admin-logout` はルーター側で
//! [`require_internal_api_key`](crate::middleware::require_internal_api_key) を通す。

use std::{ops::RangeInclusive, sync::Arc, time::Duration};

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{CookieJar, WithRejection};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use storefront_domain::{claims::UserClaims, return_url::ReturnUrl, session_id::SessionId};
use storefront_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};

use super::AuthState;
use crate::{
    client::{IdpError, RegisterRequest},
    error::{
        JsonBodyRejection,
        authentication_failed_response,
        log_and_convert_idp_error,
        log_store_error,
        unauthorized_response,
        validation_error_response,
    },
};

/// ログイン失敗時に挟む遅延の範囲（ミリ秒）
const FAILED_LOGIN_DELAY_MS: RangeInclusive<u64> = 100..=500;

// --- リクエスト/レスポンス型 ---

/// `POST /auth/login-credentials` のリクエスト
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsLoginRequest {
    #[serde(default)]
    pub username:   String,
    #[serde(default)]
    pub password:   String,
    #[serde(default)]
    pub return_url: Option<String>,
}

impl std::fmt::Debug for CredentialsLoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialsLoginRequest")
            .field("username", &self.username)
            .field("password", &storefront_domain::REDACTED)
            .field("return_url", &self.return_url)
            .finish()
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialsLoginResponse {
    pub success:    bool,
    pub return_url: String,
    pub message:    String,
}

/// `POST /auth/admin-login` のリクエスト
#[derive(Deserialize)]
pub struct AdminLoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

impl std::fmt::Debug for AdminLoginRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminLoginRequest")
            .field("username", &self.username)
            .field("password", &storefront_domain::REDACTED)
            .finish()
    }
}

/// `POST /auth/admin-login` のレスポンス
///
/// セッション ID のみを返し、トークンそのものは返さない。
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdminLoginResponse {
    pub success:    bool,
    pub session_id: String,
    pub user:       Option<UserClaims>,
    pub expires_at: DateTime<Utc>,
}

/// セッション ID を指定するリクエスト（`get-token` / `admin-logout`）
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionIdRequest {
    #[serde(default)]
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTokenResponse {
    pub access_token: String,
    pub expires_at:   DateTime<Utc>,
}

/// 成功フラグとメッセージのみのレスポンス
#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    pub fn ok(message: impl Into<String>) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.into(),
        })
    }
}

/// ログイン失敗時の応答時間を揃えるための遅延
fn failed_login_delay() -> Duration {
    Duration::from_millis(rand::rng().random_range(FAILED_LOGIN_DELAY_MS))
}

/// 資格情報をトークンに交換する
///
/// 拒否された場合は遅延を挟んでから、理由を区別しない 401 を返す。
async fn exchange_credentials(
    state: &AuthState,
    username: &str,
    password: &str,
) -> Result<storefront_domain::token::TokenResponse, Response> {
    match state.idp.exchange_password(username, password).await {
        Ok(response) => Ok(response),
        Err(IdpError::Rejected(reason)) | Err(IdpError::BadRequest(reason)) => {
            log_business_event!(
                event.category = event::category::AUTH,
                event.action = event::action::LOGIN_FAILURE,
                event.entity_type = event::entity_type::USER,
                event.entity_id = storefront_domain::REDACTED,
                event.result = event::result::FAILURE,
                event.reason = %reason,
                "ログイン失敗"
            );
            tokio::time::sleep(failed_login_delay()).await;
            Err(authentication_failed_response())
        }
        Err(e) => Err(log_and_convert_idp_error(
            "パスワードグラント",
            log_error::kind::TOKEN_EXCHANGE,
            e,
        )),
    }
}

/// POST /auth/login-credentials
///
/// ユーザー名/パスワードでログインし、セッション Cookie を設定する。
///
/// ## リクエストボディ
///
/// ```json
/// {
///   "username": "alice",
///   "password": "password123",
///   "returnUrl": "/cart"
/// }
/// ```
#[tracing::instrument(skip_all)]
pub async fn login_credentials(
    State(state): State<Arc<AuthState>>,
    jar: CookieJar,
    WithRejection(Json(req), _): WithRejection<Json<CredentialsLoginRequest>, JsonBodyRejection>,
) -> Response {
    if req.username.trim().is_empty() || req.password.trim().is_empty() {
        return validation_error_response("ユーザー名とパスワードは必須です");
    }

    let response = match exchange_credentials(&state, req.username.trim(), &req.password).await {
        Ok(response) => response,
        Err(response) => return response,
    };
    let (session_id, _) = match state.establish_session(response).await {
        Ok(created) => created,
        Err(response) => return response,
    };

    log_business_event!(
        event.category = event::category::AUTH,
        event.action = event::action::LOGIN_SUCCESS,
        event.entity_type = event::entity_type::SESSION,
        event.entity_id = %session_id.short(),
        event.result = event::result::SUCCESS,
        "ログイン成功"
    );

    let return_url = ReturnUrl::sanitize(req.return_url.as_deref(), &state.return_url_allowed_hosts);
    let jar = jar.add(state.cookies.session_cookie(&session_id));
    let body = CredentialsLoginResponse {
        success:    true,
        return_url: return_url.as_str().to_string(),
        message:    "ログインしました".to_string(),
    };

    (jar, Json(body)).into_response()
}

/// POST /auth/register
///
/// ユーザー登録を ID プロバイダに中継する。登録後のログインは行わない。
#[tracing::instrument(skip_all)]
pub async fn register(
    State(state): State<Arc<AuthState>>,
    WithRejection(Json(req), _): WithRejection<Json<RegisterRequest>, JsonBodyRejection>,
) -> Response {
    if req.username.trim().is_empty()
        || req.email.trim().is_empty()
        || req.password.trim().is_empty()
    {
        return validation_error_response("ユーザー名・メールアドレス・パスワードは必須です");
    }

    match state.idp.register(&req).await {
        Ok(()) => {
            log_business_event!(
                event.category = event::category::AUTH,
                event.action = event::action::REGISTERED,
                event.entity_type = event::entity_type::USER,
                event.result = event::result::SUCCESS,
                "ユーザーを登録しました"
            );
            MessageResponse::ok("登録が完了しました").into_response()
        }
        Err(e) => log_and_convert_idp_error("ユーザー登録", log_error::kind::REGISTRATION, e),
    }
}

/// POST /auth/admin-login
///
/// 信頼済み呼び出し元（管理画面のサーバー等）向けのログイン。
/// Cookie は設定せず、セッション ID とユーザー情報を返す。
#[tracing::instrument(skip_all)]
pub async fn admin_login(
    State(state): State<Arc<AuthState>>,
    WithRejection(Json(req), _): WithRejection<Json<AdminLoginRequest>, JsonBodyRejection>,
) -> Response {
    if req.username.trim().is_empty() || req.password.trim().is_empty() {
        return validation_error_response("ユーザー名とパスワードは必須です");
    }

    let response = match exchange_credentials(&state, req.username.trim(), &req.password).await {
        Ok(response) => response,
        Err(response) => return response,
    };
    let (session_id, tokens) = match state.establish_session(response).await {
        Ok(created) => created,
        Err(response) => return response,
    };

    let user = match UserClaims::from_tokens(&tokens) {
        Ok(claims) => Some(claims),
        Err(e) => {
            tracing::warn!("トークンからユーザー情報を取り出せません: {}", e);
            None
        }
    };

    log_business_event!(
        event.category = event::category::AUTH,
        event.action = event::action::LOGIN_SUCCESS,
        event.entity_type = event::entity_type::SESSION,
        event.entity_id = %session_id.short(),
        event.result = event::result::SUCCESS,
        "管理ログイン成功"
    );

    Json(AdminLoginResponse {
        success: true,
        session_id: session_id.as_str().to_string(),
        user,
        expires_at: tokens.expires_at(),
    })
    .into_response()
}

/// POST /auth/get-token
///
/// セッションのアクセストークンを返す。期限間近・期限切れならリフレッシュする。
#[tracing::instrument(skip_all)]
pub async fn get_token(
    State(state): State<Arc<AuthState>>,
    WithRejection(Json(req), _): WithRejection<Json<SessionIdRequest>, JsonBodyRejection>,
) -> Response {
    let Ok(session_id) = SessionId::parse(&req.session_id) else {
        return unauthorized_response();
    };

    match state.sessions.resolve(&session_id).await {
        Ok(session) => Json(GetTokenResponse {
            access_token: session.tokens.access_token().to_string(),
            expires_at:   session.tokens.expires_at(),
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

/// POST /auth/admin-logout
///
/// 指定したセッションを削除する。存在しなくても成功を返す。
#[tracing::instrument(skip_all)]
pub async fn admin_logout(
    State(state): State<Arc<AuthState>>,
    WithRejection(Json(req), _): WithRejection<Json<SessionIdRequest>, JsonBodyRejection>,
) -> Response {
    let Ok(session_id) = SessionId::parse(&req.session_id) else {
        return validation_error_response("sessionId が不正です");
    };

    if let Err(e) = state.store.remove(&session_id).await {
        return log_store_error("管理ログアウト", &e);
    }

    log_business_event!(
        event.category = event::category::AUTH,
        event.action = event::action::LOGOUT,
        event.entity_type = event::entity_type::SESSION,
        event.entity_id = %session_id.short(),
        event.result = event::result::SUCCESS,
        "管理ログアウト"
    );

    MessageResponse::ok("ログアウトしました").into_response()
}
