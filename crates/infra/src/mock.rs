//! # テスト用インメモリトークンストア
//!
//! ハンドラ・セッションリゾルバのテストで使用する。
//! `test-utils` feature を有効にすることで、他クレートからも利用可能。
//!
//! ```toml
//! [dev-dependencies]
//! storefront-infra = { workspace = true, features = ["test-utils"] }
//! ```

use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use storefront_domain::{session_id::SessionId, token::TokenSet};

use crate::{error::InfraError, token_store::TokenStore};

// ===== InMemoryTokenStore =====

/// `HashMap` に保存するトークンストア
///
/// `update` の呼び出し回数を数え、リフレッシュが何回行われたかを検証できる。
#[derive(Clone, Default)]
pub struct InMemoryTokenStore {
    sessions: Arc<Mutex<HashMap<String, TokenSet>>>,
    updates:  Arc<AtomicUsize>,
    fail:     Arc<Mutex<bool>>,
}

impl InMemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 既存のセッションを持った状態で作成する
    pub fn with_session(session_id: &SessionId, tokens: TokenSet) -> Self {
        let store = Self::new();
        store
            .sessions
            .lock()
            .unwrap()
            .insert(session_id.as_str().to_string(), tokens);
        store
    }

    /// 保存されているトークンセットを直接取り出す
    pub fn snapshot(&self, session_id: &SessionId) -> Option<TokenSet> {
        self.sessions.lock().unwrap().get(session_id.as_str()).cloned()
    }

    /// 保存されているセッション数
    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `update` が呼ばれた回数
    pub fn update_count(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    /// 以降のすべての操作を失敗させる（ストア停止の再現）
    pub fn fail_all(&self) {
        *self.fail.lock().unwrap() = true;
    }

    fn check(&self) -> Result<(), InfraError> {
        if *self.fail.lock().unwrap() {
            return Err(InfraError::unavailable("トークンストアが停止しています"));
        }
        Ok(())
    }
}

#[async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn store(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError> {
        self.check()?;
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.as_str().to_string(), tokens.clone());
        Ok(())
    }

    async fn get(&self, session_id: &SessionId) -> Result<Option<TokenSet>, InfraError> {
        self.check()?;
        Ok(self.snapshot(session_id))
    }

    async fn update(&self, session_id: &SessionId, tokens: &TokenSet) -> Result<(), InfraError> {
        self.check()?;
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.sessions
            .lock()
            .unwrap()
            .insert(session_id.as_str().to_string(), tokens.clone());
        Ok(())
    }

    async fn remove(&self, session_id: &SessionId) -> Result<(), InfraError> {
        self.check()?;
        self.sessions.lock().unwrap().remove(session_id.as_str());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    use super::*;

    fn tokens(access: &str) -> TokenSet {
        let expires_at = Utc.with_ymd_and_hms(2026, 1, 1, 12, 0, 0).unwrap();
        TokenSet::new(access, Some("rt".to_string()), None, expires_at, None)
    }

    #[tokio::test]
    async fn test_保存したトークンセットを取得できる() {
        let sut = InMemoryTokenStore::new();
        let id = SessionId::generate();

        sut.store(&id, &tokens("at-1")).await.unwrap();

        assert_eq!(sut.get(&id).await.unwrap(), Some(tokens("at-1")));
    }

    #[tokio::test]
    async fn test_削除後はnoneを返す() {
        let id = SessionId::generate();
        let sut = InMemoryTokenStore::with_session(&id, tokens("at-1"));

        sut.remove(&id).await.unwrap();
        sut.remove(&id).await.unwrap();

        assert_eq!(sut.get(&id).await.unwrap(), None);
        assert!(sut.is_empty());
    }

    #[tokio::test]
    async fn test_updateの回数を数える() {
        let id = SessionId::generate();
        let sut = InMemoryTokenStore::with_session(&id, tokens("at-1"));

        sut.update(&id, &tokens("at-2")).await.unwrap();

        assert_eq!(sut.update_count(), 1);
        assert_eq!(sut.snapshot(&id), Some(tokens("at-2")));
    }

    #[tokio::test]
    async fn test_fail_all後はエラーを返す() {
        let sut = InMemoryTokenStore::new();
        sut.fail_all();

        assert!(sut.get(&SessionId::generate()).await.is_err());
    }
}
