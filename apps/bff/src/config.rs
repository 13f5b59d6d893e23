//! # BFF 設定
//!
//! 環境変数から BFF サーバーの設定を読み込む。
//!
//! 値の解釈は純粋関数（`parse_*`）に切り出し、テストで環境変数を書き換えずに検証する。

use std::{env, time::Duration};

use thiserror::Error;

/// `OAUTH_SCOPES` 未設定時に要求するスコープ一式
pub const DEFAULT_SCOPES: &str = "openid profile email roles offline_access catalog.read \
                                  catalog.write cart.manage order.read order.write order.admin \
                                  discount.read discount.write message.read message.write \
                                  review.read review.write cargo.read cargo.write image.read \
                                  image.upload payment.process IdentityServerApi";

/// `OAUTH_CLIENT_ID` 未設定時のクライアント ID
pub const DEFAULT_CLIENT_ID: &str = "storefront_bff";

const DEFAULT_UPSTREAM_TIMEOUT_SECS: u64 = 30;
const DEFAULT_UPLOAD_TIMEOUT_SECS: u64 = 120;
const DEFAULT_UPLOAD_MAX_BYTES: usize = 10 * 1024 * 1024;

/// 設定読み込みエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} が設定されていません")]
    Missing(&'static str),

    #[error("{name} の値が不正です: {value}")]
    Invalid { name: &'static str, value: String },
}

/// BFF サーバーの設定
#[derive(Debug, Clone)]
pub struct BffConfig {
    /// バインドアドレス
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// Redis 接続 URL
    pub redis_url: String,
    /// ID プロバイダのベース URL
    pub identity_url: String,
    /// 内部ゲートウェイのベース URL
    pub gateway_url: String,
    /// 画像サービスのベース URL
    pub images_url: String,
    /// 配送サービス（配送先住所）のベース URL
    pub cargo_url: String,
    /// フロントエンドのベース URL（相対パスの戻り先を連結する）
    pub frontend_url: String,
    pub oauth: OAuthConfig,
    /// 戻り先として許可する絶対 URL の `host[:port]`
    pub return_url_allowed_hosts: Vec<String>,
    /// 信頼済み呼び出し元の API キー（未設定なら信頼済みエンドポイントは常に 403）
    pub internal_api_key: Option<String>,
    /// PKCE フロー Cookie の Path
    pub flow_cookie_path: String,
    /// Cookie に Secure 属性を付与するか
    pub cookie_secure: bool,
    /// ID プロバイダ・ゲートウェイ呼び出しのタイムアウト
    pub upstream_timeout: Duration,
    /// 画像アップロードのタイムアウト
    pub upload_timeout: Duration,
    /// アップロードの上限サイズ（バイト）
    pub upload_max_bytes: usize,
    /// CORS を許可するオリジン（空なら CORS レイヤーを付与しない）
    pub cors_allowed_origins: Vec<String>,
}

/// OAuth クライアント設定
#[derive(Debug, Clone)]
pub struct OAuthConfig {
    pub client_id:    String,
    pub redirect_uri: String,
    pub scopes:       String,
}

impl BffConfig {
    /// 環境変数から設定を読み込む
    pub fn from_env() -> Result<Self, ConfigError> {
        let production = env::var("ENV").is_ok_and(|v| v == "production");

        Ok(Self {
            host: optional("BFF_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_port(&required("BFF_PORT")?)?,
            redis_url: required("REDIS_URL")?,
            identity_url: parse_base_url("IDENTITY_URL", &required("IDENTITY_URL")?)?,
            gateway_url: parse_base_url("GATEWAY_URL", &required("GATEWAY_URL")?)?,
            images_url: parse_base_url("IMAGES_URL", &required("IMAGES_URL")?)?,
            cargo_url: parse_base_url("CARGO_URL", &required("CARGO_URL")?)?,
            frontend_url: parse_base_url("FRONTEND_URL", &required("FRONTEND_URL")?)?,
            oauth: OAuthConfig {
                client_id:    optional("OAUTH_CLIENT_ID")
                    .unwrap_or_else(|| DEFAULT_CLIENT_ID.to_string()),
                redirect_uri: required("OAUTH_REDIRECT_URI")?,
                scopes:       optional("OAUTH_SCOPES").unwrap_or_else(|| DEFAULT_SCOPES.to_string()),
            },
            return_url_allowed_hosts: parse_list(optional("RETURN_URL_ALLOWED_HOSTS").as_deref()),
            internal_api_key: optional("INTERNAL_API_KEY"),
            flow_cookie_path: optional("FLOW_COOKIE_PATH").unwrap_or_else(|| "/".to_string()),
            cookie_secure: parse_bool(optional("COOKIE_SECURE").as_deref(), production),
            upstream_timeout: Duration::from_secs(parse_number(
                "UPSTREAM_TIMEOUT_SECS",
                optional("UPSTREAM_TIMEOUT_SECS").as_deref(),
                DEFAULT_UPSTREAM_TIMEOUT_SECS,
            )?),
            upload_timeout: Duration::from_secs(parse_number(
                "UPLOAD_TIMEOUT_SECS",
                optional("UPLOAD_TIMEOUT_SECS").as_deref(),
                DEFAULT_UPLOAD_TIMEOUT_SECS,
            )?),
            upload_max_bytes: parse_number(
                "UPLOAD_MAX_BYTES",
                optional("UPLOAD_MAX_BYTES").as_deref(),
                DEFAULT_UPLOAD_MAX_BYTES,
            )?,
            cors_allowed_origins: parse_list(optional("CORS_ALLOWED_ORIGINS").as_deref()),
        })
    }
}

// --- パースヘルパー ---

fn required(name: &'static str) -> Result<String, ConfigError> {
    optional(name).ok_or(ConfigError::Missing(name))
}

/// 空文字は未設定として扱う
fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Invalid {
        name:  "BFF_PORT",
        value: value.to_string(),
    })
}

/// ベース URL を検証し、末尾の `/` を取り除く
fn parse_base_url(name: &'static str, value: &str) -> Result<String, ConfigError> {
    match url::Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {
            Ok(value.trim().trim_end_matches('/').to_string())
        }
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(
    name: &'static str,
    value: Option<&str>,
    default: T,
) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: v.to_string(),
        }),
    }
}

fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim) {
        Some(v) if v.eq_ignore_ascii_case("true") || v == "1" => true,
        Some(v) if v.eq_ignore_ascii_case("false") || v == "0" => false,
        _ => default,
    }
}

/// カンマ区切りのリストを分解する（空要素は捨てる）
fn parse_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
