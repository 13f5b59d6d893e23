//! # ID プロバイダクライアント
//!
//! BFF から OAuth2 ID プロバイダへの通信を担当する。
//!
//! ## エンドポイント
//!
//! - `GET /connect/authorize` - 認可リクエスト（ブラウザをリダイレクトする先）
//! - `POST /connect/token` - トークンエンドポイント（form エンコード）
//!   - `grant_type=password`
//!   - `grant_type=authorization_code`（PKCE）
//!   - `grant_type=refresh_token`
//! - `POST /api/registers` - ユーザー登録

use std::{fmt, time::Duration};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use storefront_domain::{pkce::CODE_CHALLENGE_METHOD, token::TokenResponse};
use thiserror::Error;
use url::Url;

use crate::{config::OAuthConfig, middleware::request_id::inject_request_id};

/// TCP 接続確立のタイムアウト
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// ID プロバイダクライアントエラー
#[derive(Debug, Clone, Error)]
pub enum IdpError {
    /// 資格情報・認可コード・リフレッシュトークンの拒否（`invalid_grant` 等）
    #[error("ID プロバイダがリクエストを拒否しました: {0}")]
    Rejected(String),

    /// 入力内容の不備（登録 API の 4xx）
    #[error("リクエストエラー: {0}")]
    BadRequest(String),

    /// 接続できない・503
    #[error("ID プロバイダが一時的に利用できません")]
    Unavailable,

    #[error("ID プロバイダの応答がタイムアウトしました")]
    Timeout,

    #[error("予期しないエラー: {0}")]
    Unexpected(String),
}

impl From<reqwest::Error> for IdpError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            IdpError::Timeout
        } else if err.is_connect() {
            IdpError::Unavailable
        } else {
            IdpError::Unexpected(err.to_string())
        }
    }
}

// --- リクエスト/レスポンス型 ---

/// ユーザー登録リクエスト
#[derive(Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email:    String,
    #[serde(default)]
    pub name:     Option<String>,
    #[serde(default)]
    pub surname:  Option<String>,
    #[serde(default)]
    pub password: String,
}

impl fmt::Debug for RegisterRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisterRequest")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("name", &self.name)
            .field("surname", &self.surname)
            .field("password", &storefront_domain::REDACTED)
            .finish()
    }
}

/// トークンエンドポイントのエラーレスポンス（RFC 6749 §5.2）
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
}

/// ID プロバイダクライアントトレイト
///
/// テスト時にスタブを使用できるようトレイトで定義。
#[async_trait]
pub trait IdentityProviderClient: Send + Sync {
    /// リソースオーナーパスワードグラントでトークンを取得する
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, IdpError>;

    /// 認可コードとコードベリファイアをトークンに交換する
    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, IdpError>;

    /// リフレッシュトークンで新しいトークンを取得する
    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, IdpError>;

    /// ユーザーを登録する
    async fn register(&self, request: &RegisterRequest) -> Result<(), IdpError>;
}

/// 認可エンドポイントへのリダイレクト URL を組み立てる
pub fn authorize_url(
    identity_url: &str,
    oauth: &OAuthConfig,
    state: &str,
    code_challenge: &str,
) -> Result<String, url::ParseError> {
    let mut url = Url::parse(&format!(
        "{}/connect/authorize",
        identity_url.trim_end_matches('/')
    ))?;
    url.query_pairs_mut()
        .append_pair("client_id", &oauth.client_id)
        .append_pair("response_type", "code")
        .append_pair("redirect_uri", &oauth.redirect_uri)
        .append_pair("scope", &oauth.scopes)
        .append_pair("state", state)
        .append_pair("code_challenge", code_challenge)
        .append_pair("code_challenge_method", CODE_CHALLENGE_METHOD);
    Ok(url.into())
}

/// ID プロバイダクライアント実装
pub struct IdentityProviderClientImpl {
    base_url: String,
    oauth:    OAuthConfig,
    timeout:  Duration,
    client:   reqwest::Client,
}

impl IdentityProviderClientImpl {
    /// 新しい IdentityProviderClient を作成する
    ///
    /// # 引数
    ///
    /// - `base_url`: ID プロバイダのベース URL（例: `http://identity:5001`）
    /// - `timeout`: 1 リクエストあたりのタイムアウト
    pub fn new(
        base_url: &str,
        oauth: OAuthConfig,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            oauth,
            timeout,
            client: reqwest::Client::builder()
                .connect_timeout(CONNECT_TIMEOUT)
                .build()?,
        })
    }

    async fn token_request(&self, form: &[(&str, &str)]) -> Result<TokenResponse, IdpError> {
        let url = format!("{}/connect/token", self.base_url);

        let response = inject_request_id(self.client.post(&url))
            .timeout(self.timeout)
            .form(form)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(response.json::<TokenResponse>().await?),
            reqwest::StatusCode::BAD_REQUEST | reqwest::StatusCode::UNAUTHORIZED => {
                let error = response
                    .json::<OAuthErrorBody>()
                    .await
                    .map(|body| body.error)
                    .unwrap_or_else(|_| "invalid_request".to_string());
                Err(IdpError::Rejected(error))
            }
            reqwest::StatusCode::BAD_GATEWAY
            | reqwest::StatusCode::SERVICE_UNAVAILABLE
            | reqwest::StatusCode::GATEWAY_TIMEOUT => Err(IdpError::Unavailable),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IdpError::Unexpected(format!(
                    "予期しないステータス {}: {}",
                    status, body
                )))
            }
        }
    }
}

#[async_trait]
impl IdentityProviderClient for IdentityProviderClientImpl {
    async fn exchange_password(
        &self,
        username: &str,
        password: &str,
    ) -> Result<TokenResponse, IdpError> {
        self.token_request(&[
            ("grant_type", "password"),
            ("client_id", self.oauth.client_id.as_str()),
            ("username", username),
            ("password", password),
            ("scope", self.oauth.scopes.as_str()),
        ])
        .await
    }

    async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<TokenResponse, IdpError> {
        self.token_request(&[
            ("grant_type", "authorization_code"),
            ("client_id", self.oauth.client_id.as_str()),
            ("code", code),
            ("redirect_uri", self.oauth.redirect_uri.as_str()),
            ("code_verifier", code_verifier),
        ])
        .await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse, IdpError> {
        self.token_request(&[
            ("grant_type", "refresh_token"),
            ("client_id", self.oauth.client_id.as_str()),
            ("refresh_token", refresh_token),
        ])
        .await
    }

    async fn register(&self, request: &RegisterRequest) -> Result<(), IdpError> {
        let url = format!("{}/api/registers", self.base_url);

        let response = inject_request_id(self.client.post(&url))
            .timeout(self.timeout)
            .json(request)
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            reqwest::StatusCode::SERVICE_UNAVAILABLE => Err(IdpError::Unavailable),
            status if status.is_client_error() => {
                let body = response.text().await.unwrap_or_default();
                Err(IdpError::BadRequest(registration_detail(&body)))
            }
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(IdpError::Unexpected(format!(
                    "予期しないステータス {}: {}",
                    status, body
                )))
            }
        }
    }
}

/// 登録 API のエラーボディからユーザーに見せる説明を取り出す
///
/// `detail` / `message` / `title` のいずれか、または `errors` の最初の文字列を使う。
fn registration_detail(body: &str) -> String {
    const FALLBACK: &str = "ユーザー登録に失敗しました";

    let Ok(json) = serde_json::from_str::<serde_json::Value>(body) else {
        return FALLBACK.to_string();
    };
    for key in ["detail", "message", "title"] {
        if let Some(s) = json.get(key).and_then(|v| v.as_str()) {
            return s.to_string();
        }
    }
    let first_error = match json.get("errors") {
        Some(serde_json::Value::Array(items)) => items.iter().find_map(|v| v.as_str()),
        Some(serde_json::Value::Object(map)) => map.values().find_map(|v| match v {
            serde_json::Value::Array(items) => items.iter().find_map(|v| v.as_str()),
            other => other.as_str(),
        }),
        _ => None,
    };
    first_error.unwrap_or(FALLBACK).to_string()
}
