//! # セッショントークンストア
//!
//! セッション ID をキーにトークンセットを保存する。
//!
//! ## Redis キー設計
//!
//! | キー | 値 | TTL |
//! |-----|-----|-----|
//! | `bff:session:{session_id}` | TokenSet (JSON) | 2592000秒（30日） |
//!
//! 書き込みのたびに TTL をリセットする。期限切れ・未作成のキーは `None` を返す。

use async_trait::async_trait;
use redis::{AsyncCommands, aio::ConnectionManager};
use storefront_domain::{session_id::SessionId, token::TokenSet};

use crate::InfraError;

/// セッションの有効期限（秒）
/// 30日 = 2592000秒
pub const SESSION_TTL_SECONDS: u64 = 30 * 24 * 60 * 60;

/// トークンストアトレイト
///
/// すべての操作は冪等。`store` と `update` はどちらも TTL をリセットする。
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// 新しいセッションのトークンセットを保存する
    async fn store(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError>;

    /// トークンセットを取得する
    ///
    /// 存在しない（期限切れを含む）場合は `None`
    async fn get(&self, session_id: &SessionId) -> Result<Option<TokenSet>, InfraError>;

    /// リフレッシュ後のトークンセットで置き換える
    async fn update(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError>;

    /// トークンセットを削除する
    ///
    /// 存在しないセッションを削除しても成功とする。
    async fn remove(&self, session_id: &SessionId) -> Result<(), InfraError>;
}

/// Redis を使用したトークンストア
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
}

impl RedisTokenStore {
    /// 共有の接続マネージャからストアを作成する
    pub fn new(conn: ConnectionManager) -> Self {
        Self { conn }
    }

    /// Redis URL に接続してストアを作成する
    pub async fn connect(redis_url: &str) -> Result<Self, InfraError> {
        let conn = crate::redis::create_connection_manager(redis_url).await?;
        Ok(Self::new(conn))
    }

    /// セッションキーを生成する
    fn session_key(session_id: &SessionId) -> String {
        format!("bff:session:{}", session_id.as_str())
    }

    /// セッションの TTL（残り秒数）を取得する（テスト用）
    pub async fn ttl(&self, session_id: &SessionId) -> Result<Option<i64>, InfraError> {
        let key = Self::session_key(session_id);
        let mut conn = self.conn.clone();

        let ttl: i64 = conn.ttl(&key).await?;

        // -2: キーなし、-1: TTL 未設定
        if ttl < 0 { Ok(None) } else { Ok(Some(ttl)) }
    }

    async fn write(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError> {
        let key = Self::session_key(session_id);
        let json = serde_json::to_string(tokens)?;

        let mut conn = self.conn.clone();
        let _: () = conn.set_ex(&key, json, SESSION_TTL_SECONDS).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn store(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError> {
        self.write(session_id, tokens).await?;
        tracing::debug!(session_id = %session_id.short(), "トークンセットを保存しました");
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<TokenSet>, InfraError> {
        let key = Self::session_key(session_id);
        let mut conn = self.conn.clone();

        let result: Option<String> = conn.get(&key).await?;

        match result {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn update(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError> {
        self.write(session_id, tokens).await?;
        tracing::debug!(session_id = %session_id.short(), "トークンセットを更新しました");
        Ok(())
    }

    async fn remove(&self, session_id: &SessionId) -> Result<(), InfraError> {
        let key = Self::session_key(session_id);
        let mut conn = self.conn.clone();
        let _: () = conn.del(&key).await?;
        Ok(())
    }
}
