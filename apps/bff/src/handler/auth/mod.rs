//! # 認証ハンドラ
//!
//! BFF の認証エンドポイントを提供する。トークンはすべてサーバー側に保持し、
//! ブラウザにはセッション ID の Cookie だけを渡す。
//!
//! ## エンドポイント
//!
//! - `GET /auth/login` - 認可コード + PKCE フローの開始
//! - `GET /auth/callback` - 認可コードの受け取りとセッション確立
//! - `POST /auth/login-credentials` - ユーザー名/パスワードでログイン
//! - `POST /auth/register` - ユーザー登録（ID プロバイダへ中継）
//! - `POST /auth/refresh` - トークンの明示的なリフレッシュ
//! - `POST /auth/logout` - ログアウト
//! - `GET /auth/status` - 認証状態
//! - `GET /auth/user` - ユーザー情報
//! - `POST /auth/admin-login` - 信頼済み呼び出し元向けログイン
//! - `POST /auth/get-token` - 信頼済み呼び出し元向けアクセストークン取得
//! - `POST /auth/admin-logout` - 信頼済み呼び出し元向けログアウト

mod credentials;
mod pkce_flow;
mod session;

use std::sync::Arc;

use axum::response::Response;
pub use credentials::*;
pub use pkce_flow::*;
pub use session::*;
use storefront_domain::{
    clock::Clock,
    session_id::SessionId,
    token::{TokenResponse, TokenSet},
};
use storefront_infra::TokenStore;

use crate::{
    client::IdentityProviderClient,
    config::OAuthConfig,
    cookie::CookieSettings,
    error::log_store_error,
    session::SessionResolver,
};

/// 認証ハンドラの共有状態
pub struct AuthState {
    pub idp:                      Arc<dyn IdentityProviderClient>,
    pub store:                    Arc<dyn TokenStore>,
    pub sessions:                 Arc<SessionResolver>,
    pub clock:                    Arc<dyn Clock>,
    pub cookies:                  CookieSettings,
    /// ID プロバイダのベース URL（認可エンドポイントの組み立てに使う）
    pub identity_url:             String,
    pub oauth:                    OAuthConfig,
    /// 相対パスの戻り先を連結するフロントエンドのベース URL
    pub frontend_url:             String,
    pub return_url_allowed_hosts: Vec<String>,
}

impl AuthState {
    /// トークンレスポンスから新しいセッションを作成して保存する
    ///
    /// 失敗時はログを出力し、そのまま返せるエラーレスポンスを返す。
    async fn establish_session(
        &self,
        response: TokenResponse,
    ) -> Result<(SessionId, TokenSet), Response> {
        let session_id = SessionId::generate();
        let tokens = TokenSet::issue(response, self.clock.now());

        self.store
            .store(&session_id, &tokens)
            .await
            .map_err(|e| log_store_error("セッション作成", &e))?;

        Ok((session_id, tokens))
    }
}

// --- テストユーティリティ ---
