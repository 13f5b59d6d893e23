//! # トークンセット
//!
//! ID プロバイダから受け取ったトークン一式と、その更新（ローテーション）規則を定義する。
//!
//! ## 不変条件
//!
//! - `TokenSet` はブラウザに返さない（`Serialize` はトークンストアへの永続化専用）
//! - `Debug` 出力ではトークン文字列をマスクする
//! - リフレッシュで新しいリフレッシュトークンが発行されたら古いものは破棄する

use std::fmt;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::REDACTED;

/// `expires_in` が省略された場合のアクセストークン有効期間（秒）
pub const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// 受け入れる `expires_in` の上限（秒）。これを超える値は上限に切り詰める
pub const MAX_EXPIRES_IN_SECS: i64 = 365 * 24 * 60 * 60;

/// ID プロバイダのトークンエンドポイントが返すレスポンス
///
/// `authorization_code` / `password` / `refresh_token` の各グラントで共通。
#[derive(Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token:  String,
    #[serde(default)]
    pub token_type:    Option<String>,
    #[serde(default)]
    pub expires_in:    Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token:      Option<String>,
    #[serde(default)]
    pub scope:         Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &REDACTED)
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("id_token", &self.id_token.as_ref().map(|_| REDACTED))
            .field("scope", &self.scope)
            .finish()
    }
}

impl TokenResponse {
    /// レスポンス受信時刻から絶対的な有効期限を求める
    fn expires_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = self
            .expires_in
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS)
            .clamp(0, MAX_EXPIRES_IN_SECS);
        now.checked_add_signed(TimeDelta::seconds(secs))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// セッションに紐づくトークン一式
///
/// トークンストアにセッション ID をキーとして 1 件だけ保存される。
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    access_token:  String,
    refresh_token: Option<String>,
    id_token:      Option<String>,
    expires_at:    DateTime<Utc>,
    scope:         Option<String>,
}

impl TokenSet {
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: Option<String>,
        id_token: Option<String>,
        expires_at: DateTime<Utc>,
        scope: Option<String>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token,
            id_token,
            expires_at,
            scope,
        }
    }

    /// 新規発行されたトークンレスポンスからトークンセットを作成する
    pub fn issue(response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response.expires_at(now);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token,
            id_token: response.id_token,
            expires_at,
            scope: response.scope,
        }
    }

    /// リフレッシュ結果でトークンセットを更新する
    ///
    /// 新しいリフレッシュトークンが発行された場合はそれに置き換え、古いものは破棄する。
    /// 発行されなかった場合（ローテーションしないプロバイダ）は既存のものを引き継ぐ。
    /// ID トークン・スコープも同様に、省略時は既存値を引き継ぐ。
    pub fn rotate(&self, response: TokenResponse, now: DateTime<Utc>) -> Self {
        let expires_at = response.expires_at(now);
        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or_else(|| self.refresh_token.clone()),
            id_token: response.id_token.or_else(|| self.id_token.clone()),
            expires_at,
            scope: response.scope.or_else(|| self.scope.clone()),
        }
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn refresh_token(&self) -> Option<&str> {
        self.refresh_token.as_deref()
    }

    pub fn id_token(&self) -> Option<&str> {
        self.id_token.as_deref()
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    /// `now` 時点で有効期限を過ぎているか
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

impl fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &REDACTED)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| REDACTED))
            .field("id_token", &self.id_token.as_ref().map(|_| REDACTED))
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}
