//! # BFF アプリケーション構築
//!
//! State の初期化とルーター構築を担当する。
//! `main.rs` はインフラ初期化（Redis・HTTP クライアント）とサーバー起動に集中する。

use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    middleware::{from_fn, from_fn_with_state},
    routing::{any, delete, get, post, put},
};
use storefront_domain::clock::Clock;
use storefront_infra::TokenStore;
use storefront_shared::{
    canonical_log::CanonicalLogLineLayer,
    observability::{MakeRequestUuidV7, make_request_span},
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{
    client::{GatewayClient, IdentityProviderClient},
    config::BffConfig,
    cookie::CookieSettings,
    handler::{
        AuthState,
        ProxyState,
        ReadinessState,
        admin_login,
        admin_logout,
        begin_login,
        callback,
        change_password,
        create_address,
        delete_address,
        delete_image,
        forward,
        get_address,
        get_token,
        health_check,
        list_addresses,
        login_credentials,
        logout,
        readiness_check,
        refresh,
        register,
        set_default_address,
        status,
        update_address,
        update_profile,
        upload_image,
        user,
    },
    middleware::{
        TrustedCallerState,
        no_cache,
        request_id::store_request_id,
        require_internal_api_key,
    },
    session::SessionResolver,
};

/// ルーターが依存する外部コンポーネント
///
/// `main.rs` では Redis・reqwest 実装を、テストではインメモリ実装や
/// モックサーバー向けのクライアントを渡す。
pub struct AppDependencies {
    pub idp:       Arc<dyn IdentityProviderClient>,
    pub gateway:   Arc<dyn GatewayClient>,
    pub store:     Arc<dyn TokenStore>,
    pub clock:     Arc<dyn Clock>,
    /// `None` の場合 `/health/ready` をマウントしない
    pub readiness: Option<Arc<ReadinessState>>,
}

/// State の組み立てとルーター定義を行う
pub fn build_app(config: &BffConfig, deps: AppDependencies) -> Router {
    let AppDependencies {
        idp,
        gateway,
        store,
        clock,
        readiness,
    } = deps;

    // リフレッシュロックを認証ハンドラとプロキシで共有するため、Resolver は 1 つだけ作る
    let sessions = Arc::new(SessionResolver::new(
        store.clone(),
        idp.clone(),
        clock.clone(),
    ));

    let auth_state = Arc::new(AuthState {
        idp,
        store,
        sessions: sessions.clone(),
        clock,
        cookies: CookieSettings {
            secure:    config.cookie_secure,
            flow_path: config.flow_cookie_path.clone(),
        },
        identity_url: config.identity_url.clone(),
        oauth: config.oauth.clone(),
        frontend_url: config.frontend_url.clone(),
        return_url_allowed_hosts: config.return_url_allowed_hosts.clone(),
    });

    let proxy_state = Arc::new(ProxyState {
        gateway,
        sessions,
        gateway_url: config.gateway_url.clone(),
        identity_url: config.identity_url.clone(),
        images_url: config.images_url.clone(),
        cargo_url: config.cargo_url.clone(),
        upload_max_bytes: config.upload_max_bytes,
    });

    let trusted = TrustedCallerState {
        api_key: config.internal_api_key.as_deref().map(Arc::from),
    };

    let mut health = Router::new().route("/health", get(health_check));
    if let Some(readiness) = readiness {
        health = health.merge(
            Router::new()
                .route("/health/ready", get(readiness_check))
                .with_state(readiness),
        );
    }

    // ルーター構築
    // 信頼済みエンドポイントは route_layer で API キーを検証する（未マッチのパスには適用しない）
    let app = Router::new()
        .merge(health)
        .merge(
            Router::new()
                .route("/auth/login", get(begin_login))
                .route("/auth/callback", get(callback))
                .route("/auth/login-credentials", post(login_credentials))
                .route("/auth/register", post(register))
                .route("/auth/refresh", post(refresh))
                .route("/auth/logout", post(logout))
                .route("/auth/status", get(status))
                .route("/auth/user", get(user))
                .merge(
                    Router::new()
                        .route("/auth/admin-login", post(admin_login))
                        .route("/auth/get-token", post(get_token))
                        .route("/auth/admin-logout", post(admin_logout))
                        .route_layer(from_fn_with_state(trusted, require_internal_api_key)),
                )
                .with_state(auth_state),
        )
        .merge(
            Router::new()
                .route("/api/{domain}", any(forward))
                .route("/api/{domain}/{*path}", any(forward))
                .route("/images/upload", post(upload_image))
                .route("/images", delete(delete_image))
                .route("/users/profile", put(update_profile))
                .route("/users/password", post(change_password))
                .route("/addresses", get(list_addresses).post(create_address))
                .route(
                    "/addresses/{id}",
                    get(get_address).put(update_address).delete(delete_address),
                )
                .route("/addresses/{id}/set-default", post(set_default_address))
                .with_state(proxy_state),
        )
        // キャッシュ制御: トークンを含むレスポンスがキャッシュされないようにする
        .layer(from_fn(no_cache));

    let app = match cors_layer(&config.cors_allowed_origins) {
        Some(cors) => app.layer(cors),
        None => app,
    };

    // Request ID レイヤー（レイヤー順序が重要: 下に書いたものが外側）
    // 1. SetRequestIdLayer（最外）: リクエスト受信時に UUID v7 を生成（またはクライアント提供値を使用）
    // 2. TraceLayer: カスタムスパンに request_id を含め、全ログに自動注入
    // 3. CanonicalLogLineLayer: リクエスト完了時に1行サマリログを出力（スパン内）
    // 4. PropagateRequestIdLayer: レスポンスヘッダーに X-Request-Id をコピー
    // 5. store_request_id: task-local に保存し、BFF → ID プロバイダ・ゲートウェイのヘッダー伝播に使用
    app.layer(from_fn(store_request_id))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(CanonicalLogLineLayer)
        .layer(TraceLayer::new_for_http().make_span_with(make_request_span))
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuidV7))
}

/// 許可オリジンが設定されていれば Cookie 付きの CORS レイヤーを作る
///
/// ヘッダー値として不正なオリジンは警告を出して捨てる。
/// `X-Internal-Api-Key` はサーバー間専用のため許可ヘッダーに含めない。
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %origin, "不正な CORS オリジンを無視しました");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(AllowOrigin::list(origins))
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([
                header::ACCEPT,
                header::ACCEPT_LANGUAGE,
                header::CONTENT_TYPE,
            ])
            .allow_credentials(true),
    )
}
