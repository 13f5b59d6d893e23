//! # 信頼済み呼び出し元ミドルウェア
//!
//! 管理用エンドポイント（`admin-login`, `get-token`, `admin-logout`）を
//! `X-Internal-Api-Key` ヘッダーで保護する。
//!
//! ```rust,ignore
//! use axum::middleware::from_fn_with_state;
//!
//! let trusted = TrustedCallerState {
//!     api_key: config.internal_api_key.clone(),
//! };
//!
//! Router::new()
//!     .route("/auth/get-token", post(get_token))
//!     .route_layer(from_fn_with_state(trusted, require_internal_api_key))
//! ```

use std::sync::Arc;

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use crate::error::forbidden_response;

/// API キーを運ぶヘッダー
pub const INTERNAL_API_KEY_HEADER: &str = "x-internal-api-key";

/// 信頼済み呼び出し元ミドルウェアの状態
#[derive(Clone)]
pub struct TrustedCallerState {
    /// 設定された API キー（`None` なら常に拒否）
    pub api_key: Option<Arc<str>>,
}

/// 信頼済み呼び出し元ミドルウェア
///
/// ヘッダーの値が設定済みの API キーと一致しなければ 403 Forbidden を返す。
/// キーが設定されていない場合はすべて拒否する。
pub async fn require_internal_api_key(
    State(state): State<TrustedCallerState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.api_key.as_deref() else {
        tracing::warn!("INTERNAL_API_KEY が未設定のため信頼済みエンドポイントを拒否しました");
        return forbidden_response("この操作は許可されていません");
    };

    let provided = request
        .headers()
        .get(INTERNAL_API_KEY_HEADER)
        .map(|v| v.as_bytes())
        .unwrap_or_default();

    // タイミング攻撃対策として定数時間比較を使用
    let is_valid: bool = expected.as_bytes().ct_eq(provided).into();
    if !is_valid {
        return forbidden_response("この操作は許可されていません");
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        http::{Method, StatusCode},
        middleware::from_fn_with_state,
        routing::post,
    };
    use rstest::rstest;
    use tower::ServiceExt;

    use super::*;

    async fn dummy_handler() -> StatusCode {
        StatusCode::OK
    }

    fn create_test_app(api_key: Option<&str>) -> Router {
        let state = TrustedCallerState {
            api_key: api_key.map(Arc::from),
        };

        Router::new()
            .route("/test", post(dummy_handler))
            .layer(from_fn_with_state(state, require_internal_api_key))
    }

    fn request(api_key: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder().method(Method::POST).uri("/test");
        if let Some(key) = api_key {
            builder = builder.header(INTERNAL_API_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_一致するキーならリクエストが通過する() {
        // Given
        let sut = create_test_app(Some("s3cret"));

        // When
        let response = sut.oneshot(request(Some("s3cret"))).await.unwrap();

        // Then
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[rstest]
    #[case::キーなし(None)]
    #[case::不一致(Some("wrong"))]
    #[case::前方一致(Some("s3c"))]
    #[case::空文字(Some(""))]
    #[tokio::test]
    async fn test_キーが一致しなければ403(#[case] provided: Option<&str>) {
        let sut = create_test_app(Some("s3cret"));

        let response = sut.oneshot(request(provided)).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_キー未設定なら常に403() {
        let sut = create_test_app(None);

        let response = sut.oneshot(request(Some("anything"))).await.unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
