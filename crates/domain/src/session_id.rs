//! # セッション ID
//!
//! ブラウザの `bff_session` Cookie と、信頼済みサーバー間呼び出しで受け渡す
//! 不透明なセッション識別子。
//!
//! 32 バイト（256 ビット）の CSPRNG 出力を base64url（パディングなし）でエンコードする。

use std::fmt;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::DomainError;

/// 外部から受け取るセッション ID の最大長
const MAX_LENGTH: usize = 128;

/// ログに出力する先頭文字数
const LOG_PREFIX_LENGTH: usize = 8;

/// セッション ID
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// 新しいセッション ID を生成する
    pub fn generate() -> Self {
        let bytes: [u8; 32] = rand::rng().random();
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Cookie やリクエストボディから受け取った値を検証して取り込む
    ///
    /// base64url の文字集合以外を含む値はトークンストアのキーに使わない。
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        if raw.is_empty() || raw.len() > MAX_LENGTH {
            return Err(DomainError::Validation(
                "セッション ID の長さが不正です".to_string(),
            ));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(DomainError::Validation(
                "セッション ID に使用できない文字が含まれています".to_string(),
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// ログ出力用の短縮形（先頭 8 文字）
    pub fn short(&self) -> &str {
        let end = self.0.len().min(LOG_PREFIX_LENGTH);
        &self.0[..end]
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({}…)", self.short())
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
