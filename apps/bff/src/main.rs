//! # Storefront BFF (Backend for Frontend) サーバー
//!
//! ブラウザ向けの認証・プロキシサーバー。
//!
//! ## 役割
//!
//! - **認証**: 認可コード + PKCE フロー、資格情報ログイン、トークンリフレッシュ
//! - **セッション管理**: トークンを Redis に保持し、ブラウザには HttpOnly Cookie のみ渡す
//! - **プロキシ**: `/api/{domain}/...` を内部ゲートウェイへ Bearer 付きで転送
//! - **画像アップロード**: マルチパートボディを画像サービスへストリーミング転送
//!
//! ## アーキテクチャ
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌──────────────────┐
//! │   Browser    │────▶│     BFF      │────▶│ Internal Gateway │
//! │              │     │              │     │  / Images        │
//! └──────────────┘     └──────────────┘     └──────────────────┘
//!                        │         │
//!                        ▼         ▼
//!              ┌──────────────┐ ┌───────────────────┐
//!              │    Redis     │ │ Identity Provider │
//!              │ (TokenStore) │ │     (OAuth2)      │
//!              └──────────────┘ └───────────────────┘
//! ```
//!
//! ## 環境変数
//!
//! ポート番号等は `.env` ファイルで設定する。
//!
//! | 変数名 | 必須 | 説明 |
//! |--------|------|------|
//! | `BFF_HOST` | No | バインドアドレス（デフォルト: `0.0.0.0`） |
//! | `BFF_PORT` | **Yes** | ポート番号 |
//! | `REDIS_URL` | **Yes** | Redis 接続 URL |
//! | `IDENTITY_URL` | **Yes** | ID プロバイダの URL |
//! | `GATEWAY_URL` | **Yes** | 内部ゲートウェイの URL |
//! | `IMAGES_URL` | **Yes** | 画像サービスの URL |
//! | `CARGO_URL` | **Yes** | 配送サービス（配送先住所）の URL |
//! | `FRONTEND_URL` | **Yes** | 相対パスの戻り先を連結するフロントエンドの URL |
//! | `OAUTH_REDIRECT_URI` | **Yes** | 認可コードのコールバック URL |
//! | `OAUTH_CLIENT_ID` | No | クライアント ID（デフォルト: `storefront_bff`） |
//! | `OAUTH_SCOPES` | No | 要求するスコープ（デフォルト: 全スコープ） |
//! | `RETURN_URL_ALLOWED_HOSTS` | No | 戻り先として許可するホスト（カンマ区切り） |
//! | `INTERNAL_API_KEY` | No | 信頼済み呼び出し元の API キー（未設定なら管理用エンドポイントは 403） |
//! | `FLOW_COOKIE_PATH` | No | PKCE フロー Cookie の Path（デフォルト: `/`） |
//! | `COOKIE_SECURE` | No | Cookie の Secure 属性（デフォルト: `ENV=production` のとき有効） |
//! | `UPSTREAM_TIMEOUT_SECS` | No | ID プロバイダ・ゲートウェイのタイムアウト（デフォルト: 30） |
//! | `UPLOAD_TIMEOUT_SECS` | No | アップロードのタイムアウト（デフォルト: 120） |
//! | `UPLOAD_MAX_BYTES` | No | アップロードの上限サイズ（デフォルト: 10 MiB） |
//! | `CORS_ALLOWED_ORIGINS` | No | CORS を許可するオリジン（カンマ区切り、未設定なら CORS 無効） |
//!
//! ## 起動方法
//!
//! ```bash
//! # 開発環境（.env ファイルを使用）
//! cargo run -p storefront-bff
//!
//! # 本番環境（環境変数を直接指定）
//! ENV=production BFF_PORT=3000 REDIS_URL=redis://... cargo run -p storefront-bff --release
//! ```

use std::{net::SocketAddr, sync::Arc};

use anyhow::Context;
use storefront_bff::{
    app_builder::{AppDependencies, build_app},
    client::{GatewayClientImpl, IdentityProviderClientImpl},
    config::BffConfig,
    handler::ReadinessState,
};
use storefront_domain::clock::SystemClock;
use storefront_infra::{RedisTokenStore, redis::create_connection_manager};
use storefront_shared::observability::TracingConfig;
use tokio::net::TcpListener;

/// BFF サーバーのエントリーポイント
///
/// 以下の順序で初期化を行う:
///
/// 1. 環境変数の読み込み（.env ファイル）
/// 2. トレーシングの初期化
/// 3. アプリケーション設定の読み込み
/// 4. Redis・HTTP クライアントの初期化
/// 5. ルーターの構築
/// 6. HTTP サーバーの起動（SIGINT / SIGTERM で graceful shutdown）
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env ファイルを読み込む（存在する場合）
    // 本番環境では .env ファイルは使用せず、環境変数を直接設定する
    dotenvy::dotenv().ok();

    let tracing_config = TracingConfig::from_env("bff");
    storefront_shared::observability::init_tracing(tracing_config);
    let _tracing_guard = tracing::info_span!("app", service = "bff").entered();

    let config = BffConfig::from_env().context("設定の読み込みに失敗しました")?;

    tracing::info!("BFF サーバーを起動します: {}:{}", config.host, config.port);

    // ConnectionManager はトークンストアと Readiness Check で共有する
    let redis_conn = create_connection_manager(&config.redis_url)
        .await
        .context("Redis への接続に失敗しました")?;

    let idp = IdentityProviderClientImpl::new(
        &config.identity_url,
        config.oauth.clone(),
        config.upstream_timeout,
    )
    .context("ID プロバイダクライアントの初期化に失敗しました")?;
    let gateway = GatewayClientImpl::new(config.upstream_timeout, config.upload_timeout)
        .context("ゲートウェイクライアントの初期化に失敗しました")?;

    let readiness = Arc::new(ReadinessState {
        redis_conn:  redis_conn.clone(),
        gateway_url: config.gateway_url.clone(),
        http_client: reqwest::Client::new(),
    });

    let app = build_app(
        &config,
        AppDependencies {
            idp:       Arc::new(idp),
            gateway:   Arc::new(gateway),
            store:     Arc::new(RedisTokenStore::new(redis_conn)),
            clock:     Arc::new(SystemClock),
            readiness: Some(readiness),
        },
    );

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("アドレスのパースに失敗しました")?;

    let listener = TcpListener::bind(addr).await?;
    tracing::info!("BFF サーバーが起動しました: {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("BFF サーバーを停止しました");
    Ok(())
}

/// SIGINT（Ctrl+C）または SIGTERM を待つ
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Ctrl+C ハンドラの登録に失敗しました: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("SIGTERM ハンドラの登録に失敗しました: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("シャットダウンシグナルを受信しました");
}
