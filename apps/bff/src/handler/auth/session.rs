//! セッション管理ハンドラ（リフレッシュ・ログアウト・状態・ユーザー情報）

use std::sync::Arc;

use axum::{
    Json,
    extract::State,
    response::{IntoResponse, Response},
};
use axum_extra::extract::CookieJar;
use serde::Serialize;
use storefront_domain::{claims::UserClaims, session_state::SessionState};
use storefront_shared::{event_log::event, log_business_event};

use super::{AuthState, MessageResponse};
use crate::{
    cookie,
    error::{log_store_error, unauthorized_response},
    session::SessionError,
};

/// `GET /auth/status` のレスポンス
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub is_authenticated: bool,
    pub token_expired:    bool,
}

/// `GET /auth/user` のレスポンス
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub success: bool,
    pub user:    UserClaims,
}

/// POST /auth/refresh
///
/// Cookie のセッションのトークンを強制的にリフレッシュする。
/// セッションが存在しない・リフレッシュが拒否された場合は Cookie も削除して 401 を返す。
#[tracing::instrument(skip_all)]
pub async fn refresh(State(state): State<Arc<AuthState>>, jar: CookieJar) -> Response {
    let Some(session_id) = cookie::session_id(&jar) else {
        return unauthorized_response();
    };

    match state.sessions.force_refresh(&session_id).await {
        Ok(_) => MessageResponse::ok("トークンを更新しました").into_response(),
        Err(e @ (SessionError::Unauthenticated | SessionError::Expired)) => {
            let jar = jar.add(state.cookies.clear_session_cookie());
            (jar, e).into_response()
        }
        Err(e) => e.into_response(),
    }
}

/// POST /auth/logout
///
/// セッションを削除して Cookie をクリアする。ストアの障害はログに残して無視する。
#[tracing::instrument(skip_all)]
pub async fn logout(State(state): State<Arc<AuthState>>, jar: CookieJar) -> Response {
    if let Some(session_id) = cookie::session_id(&jar) {
        if let Err(e) = state.sessions.revoke(&session_id).await {
            tracing::warn!("セッション削除に失敗（無視）: {}", e);
        }

        log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::LOGOUT,
            event.entity_type = event::entity_type::SESSION,
            event.entity_id = %session_id.short(),
            event.result = event::result::SUCCESS,
            "ログアウト"
        );
    }

    let jar = jar.add(state.cookies.clear_session_cookie());
    (jar, MessageResponse::ok("ログアウトしました")).into_response()
}

/// GET /auth/status
///
/// 認証状態を返す。リフレッシュは行わず、未認証でも 401 にはしない。
#[tracing::instrument(skip_all)]
pub async fn status(State(state): State<Arc<AuthState>>, jar: CookieJar) -> Response {
    let Some(session_id) = cookie::session_id(&jar) else {
        return Json(StatusResponse {
            is_authenticated: false,
            token_expired:    false,
        })
        .into_response();
    };

    let session_state = match state.sessions.state(&session_id).await {
        Ok(session_state) => session_state,
        Err(SessionError::Store(e)) => return log_store_error("認証状態の取得", &e),
        Err(e) => return e.into_response(),
    };

    Json(StatusResponse {
        is_authenticated: !matches!(session_state, SessionState::Unauthenticated),
        token_expired:    matches!(session_state, SessionState::Expired(_)),
    })
    .into_response()
}

/// GET /auth/user
///
/// ID トークン（なければアクセストークン）からユーザー情報を取り出して返す。
#[tracing::instrument(skip_all)]
pub async fn user(State(state): State<Arc<AuthState>>, jar: CookieJar) -> Response {
    let Some(session_id) = cookie::session_id(&jar) else {
        return unauthorized_response();
    };

    let tokens = match state.sessions.state(&session_id).await {
        Ok(session_state) => session_state.tokens().cloned(),
        Err(e) => return e.into_response(),
    };
    let Some(tokens) = tokens else {
        return unauthorized_response();
    };

    match UserClaims::from_tokens(&tokens) {
        Ok(user) => Json(UserResponse {
            success: true,
            user,
        })
        .into_response(),
        Err(e) => {
            tracing::warn!("トークンからユーザー情報を取り出せません: {}", e);
            unauthorized_response()
        }
    }
}
