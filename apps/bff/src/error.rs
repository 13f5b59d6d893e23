//! # BFF エラーハンドリング
//!
//! HTTP API のエラー定義と、axum レスポンスへの変換。
//!
//! BFF の各ハンドラが共通で使うレスポンスヘルパーを集約する。
//! エラーボディはすべて RFC 9457 Problem Details（[`ErrorResponse`]）。

use axum::{
    extract::rejection::JsonRejection,
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use storefront_infra::InfraError;
use storefront_shared::{ErrorResponse, event_log::error as log_error};

use crate::{
    client::{GatewayError, IdpError},
    session::SessionError,
};

// --- IntoResponse for クライアントエラー ---

impl IntoResponse for IdpError {
    fn into_response(self) -> Response {
        match self {
            IdpError::Rejected(_) => authentication_failed_response(),
            IdpError::BadRequest(detail) => validation_error_response(&detail),
            IdpError::Unavailable => service_unavailable_response(),
            IdpError::Timeout => gateway_timeout_response(),
            IdpError::Unexpected(_) => internal_error_response(),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            GatewayError::Unavailable => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::service_unavailable(
                    "下流サービスが一時的に利用できません",
                )),
            )
                .into_response(),
            GatewayError::Timeout => (
                StatusCode::GATEWAY_TIMEOUT,
                Json(ErrorResponse::gateway_timeout(
                    "下流サービスの応答がタイムアウトしました",
                )),
            )
                .into_response(),
            GatewayError::Unexpected(_) => internal_error_response(),
        }
    }
}

impl IntoResponse for SessionError {
    fn into_response(self) -> Response {
        match self {
            SessionError::Unauthenticated => unauthorized_response(),
            SessionError::Expired => session_expired_response(),
            SessionError::Upstream(e) => log_and_convert_idp_error(
                "トークンリフレッシュ",
                log_error::kind::TOKEN_REFRESH,
                e,
            ),
            SessionError::Store(e) => log_store_error("セッション解決", &e),
        }
    }
}

/// ID プロバイダのエラーをログ付きでレスポンスに変換する
///
/// `Rejected` は認証失敗として呼び出し元で扱うため、ここではログを出さない。
pub fn log_and_convert_idp_error(context: &str, kind: &str, err: IdpError) -> Response {
    match &err {
        IdpError::Unavailable | IdpError::Timeout | IdpError::Unexpected(_) => {
            tracing::error!(
                error.category = log_error::category::EXTERNAL_SERVICE,
                error.kind = kind,
                "{}で ID プロバイダとの通信に失敗: {}",
                context,
                err
            );
        }
        IdpError::Rejected(_) | IdpError::BadRequest(_) => {}
    }
    err.into_response()
}

/// ゲートウェイのエラーをログ付きでレスポンスに変換する
pub fn log_and_convert_gateway_error(context: &str, err: GatewayError) -> Response {
    tracing::error!(
        error.category = log_error::category::EXTERNAL_SERVICE,
        error.kind = log_error::kind::SERVICE_COMMUNICATION,
        "{}で下流サービスとの通信に失敗: {}",
        context,
        err
    );
    err.into_response()
}

/// トークンストアのエラーをログに出して 500 を返す
pub fn log_store_error(context: &str, err: &InfraError) -> Response {
    tracing::error!(
        error.category = log_error::category::INFRASTRUCTURE,
        error.kind = log_error::kind::SESSION,
        store.transient = err.is_transient(),
        "{}でトークンストアの操作に失敗: {}",
        context,
        err
    );
    internal_error_response()
}

// --- レスポンスヘルパー ---

/// 認証失敗レスポンス
///
/// 失敗理由（ユーザー不在・パスワード不一致・アカウント停止）を区別しない。
pub fn authentication_failed_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::new(
            "authentication-failed",
            "Authentication Failed",
            401,
            "ユーザー名またはパスワードが正しくありません",
        )),
    )
        .into_response()
}

/// 未認証レスポンス
pub fn unauthorized_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(ErrorResponse::unauthorized("認証が必要です")),
    )
        .into_response()
}

/// セッション期限切れレスポンス（`requiresRefresh: true`）
///
/// フロントエンドはこれを受けて再ログインを促す。
pub fn session_expired_response() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(
            ErrorResponse::unauthorized("セッションの有効期限が切れました。再度ログインしてください")
                .with_requires_refresh(),
        ),
    )
        .into_response()
}

/// 内部エラーレスポンス
pub fn internal_error_response() -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse::internal_error()),
    )
        .into_response()
}

/// ID プロバイダ利用不可レスポンス
pub fn service_unavailable_response() -> Response {
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(ErrorResponse::service_unavailable(
            "認証サービスが一時的に利用できません",
        )),
    )
        .into_response()
}

/// ID プロバイダのタイムアウトレスポンス
pub fn gateway_timeout_response() -> Response {
    (
        StatusCode::GATEWAY_TIMEOUT,
        Json(ErrorResponse::gateway_timeout(
            "認証サービスの応答がタイムアウトしました",
        )),
    )
        .into_response()
}

/// バリデーションエラーレスポンス
pub fn validation_error_response(detail: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse::validation_error(detail)),
    )
        .into_response()
}

/// 400 Bad Request レスポンス
pub fn bad_request_response(detail: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResponse::bad_request(detail))).into_response()
}

/// 403 Forbidden レスポンス
pub fn forbidden_response(detail: &str) -> Response {
    (
        StatusCode::FORBIDDEN,
        Json(ErrorResponse::forbidden(detail)),
    )
        .into_response()
}

/// 404 Not Found レスポンス
pub fn not_found_response(detail: &str) -> Response {
    (StatusCode::NOT_FOUND, Json(ErrorResponse::not_found(detail))).into_response()
}

/// 405 Method Not Allowed レスポンス
pub fn method_not_allowed_response(detail: &str) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        Json(ErrorResponse::method_not_allowed(detail)),
    )
        .into_response()
}

/// 413 Payload Too Large レスポンス
pub fn payload_too_large_response(limit: usize) -> Response {
    (
        StatusCode::PAYLOAD_TOO_LARGE,
        Json(ErrorResponse::payload_too_large(format!(
            "アップロードできるサイズは {limit} バイトまでです"
        ))),
    )
        .into_response()
}

/// JSON ボディを読み取れなかった場合の拒否
///
/// `Content-Type` 不一致（415）や型不一致（422）も含め、400 の `validation_error` に揃える。
/// `WithRejection<Json<T>, JsonBodyRejection>` として使う。
#[derive(Debug)]
pub struct JsonBodyRejection(JsonRejection);

impl From<JsonRejection> for JsonBodyRejection {
    fn from(rejection: JsonRejection) -> Self {
        Self(rejection)
    }
}

impl IntoResponse for JsonBodyRejection {
    fn into_response(self) -> Response {
        tracing::debug!(rejection = %self.0.body_text(), "JSON ボディを読み取れません");
        validation_error_response("リクエストボディが不正です")
    }
}
