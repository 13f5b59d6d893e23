//! # 認証状態マシン
//!
//! トークンストアから取り出した結果を、有効期限に応じて 4 つの状態に分類する。
//!
//! ```text
//!                  ┌────────────────┐
//!   None ────────▶ │ Unauthenticated│
//!                  └────────────────┘
//!                  ┌────────────────┐  refresh 成功  ┌───────┐
//!   期限 - 5分以内 ▶│   NearExpiry   │ ─────────────▶ │ Valid │
//!                  └────────────────┘                └───────┘
//!                  ┌────────────────┐  refresh 成功      ▲
//!   期限切れ ─────▶ │    Expired     │ ──────────────────┘
//!                  └────────────────┘
//!                        │ refresh 失敗
//!                        ▼
//!                  Unauthenticated（セッション削除）
//! ```
//!
//! 遷移の実行（リフレッシュ・セッション削除）は BFF のセッションリゾルバが担う。

use chrono::{DateTime, TimeDelta, Utc};

use crate::token::TokenSet;

/// プロアクティブリフレッシュの安全マージン（秒）
pub const REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// セッションの認証状態
#[derive(Debug, Clone, PartialEq, Eq, strum::IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum SessionState {
    /// セッションが存在しない
    Unauthenticated,
    /// 有効期限まで安全マージン以上ある
    Valid(TokenSet),
    /// まだ有効だが安全マージン内に入っている
    NearExpiry(TokenSet),
    /// 有効期限を過ぎている
    Expired(TokenSet),
}

impl SessionState {
    /// トークンストアの取得結果を分類する
    pub fn classify(tokens: Option<TokenSet>, now: DateTime<Utc>) -> Self {
        let Some(tokens) = tokens else {
            return Self::Unauthenticated;
        };

        if tokens.is_expired_at(now) {
            Self::Expired(tokens)
        } else if tokens.expires_at() - now <= TimeDelta::seconds(REFRESH_MARGIN_SECS) {
            Self::NearExpiry(tokens)
        } else {
            Self::Valid(tokens)
        }
    }

    /// リフレッシュが必要な状態か
    pub fn needs_refresh(&self) -> bool {
        matches!(self, Self::NearExpiry(_) | Self::Expired(_))
    }

    /// 状態名（ログ出力用）
    pub fn name(&self) -> &'static str {
        self.into()
    }

    /// 保持しているトークンセット
    pub fn tokens(&self) -> Option<&TokenSet> {
        match self {
            Self::Unauthenticated => None,
            Self::Valid(t) | Self::NearExpiry(t) | Self::Expired(t) => Some(t),
        }
    }
}
