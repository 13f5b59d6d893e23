//! # セッションリゾルバ
//!
//! セッション ID からアクセストークンを解決する。状態の分類は
//! [`SessionState::classify`] に任せ、ここでは遷移（リフレッシュ・セッション削除）を実行する。
//!
//! | 状態 | `resolve` | `resolve_without_refresh` |
//! |------|-----------|---------------------------|
//! | Unauthenticated | `Unauthenticated` | `Unauthenticated` |
//! | Valid | そのまま | そのまま |
//! | NearExpiry | 1 回リフレッシュ。プロバイダ停止時は現トークンを使う | `Expired` |
//! | Expired | 1 回リフレッシュ。プロバイダ停止時は `Upstream` | `Expired` |
//!
//! リフレッシュがプロバイダに拒否された場合はセッションを削除し `Expired` を返す。

use std::sync::Arc;

use storefront_domain::{clock::Clock, session_id::SessionId, session_state::SessionState, token::TokenSet};
use storefront_infra::{InfraError, TokenStore};
use storefront_shared::{
    event_log::{error as log_error, event},
    log_business_event,
};
use thiserror::Error;

use super::refresh_lock::RefreshLocks;
use crate::client::{IdentityProviderClient, IdpError};

/// セッション解決のエラー
#[derive(Debug, Error)]
pub enum SessionError {
    /// セッションが存在しない
    #[error("セッションが存在しません")]
    Unauthenticated,

    /// 期限切れでリフレッシュできない（再ログインが必要）
    #[error("セッションの有効期限が切れています")]
    Expired,

    /// ID プロバイダに到達できずリフレッシュできなかった（セッションは保持）
    #[error("トークンをリフレッシュできません: {0}")]
    Upstream(IdpError),

    /// トークンストアの障害
    #[error("トークンストアエラー: {0}")]
    Store(#[from] InfraError),
}

/// 解決済みのセッション
#[derive(Debug, Clone)]
pub struct ActiveSession {
    pub session_id: SessionId,
    pub tokens:     TokenSet,
    /// このリクエスト内でリフレッシュを行ったか
    pub refreshed:  bool,
}

/// リフレッシュの結果
enum RefreshOutcome {
    Refreshed(TokenSet),
    /// 自分がロックを待つ間に別のリクエストがローテーション済みだった
    AlreadyRotated(TokenSet),
}

/// セッションリゾルバ
pub struct SessionResolver {
    store: Arc<dyn TokenStore>,
    idp:   Arc<dyn IdentityProviderClient>,
    clock: Arc<dyn Clock>,
    locks: RefreshLocks,
}

impl SessionResolver {
    pub fn new(
        store: Arc<dyn TokenStore>,
        idp: Arc<dyn IdentityProviderClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            idp,
            clock,
            locks: RefreshLocks::new(),
        }
    }

    /// 現在の認証状態を取得する（遷移は行わない）
    pub async fn state(&self, session_id: &SessionId) -> Result<SessionState, SessionError> {
        let tokens = self.store.get(session_id).await?;
        Ok(SessionState::classify(tokens, self.clock.now()))
    }

    /// 有効なアクセストークンを解決する
    ///
    /// 期限切れ・期限間近の場合はリフレッシュを 1 回だけ試みる。
    #[tracing::instrument(skip_all, fields(session_id = %session_id.short()))]
    pub async fn resolve(&self, session_id: &SessionId) -> Result<ActiveSession, SessionError> {
        let state = self.state(session_id).await?;
        tracing::debug!(state = state.name(), "セッション状態を判定しました");

        match state {
            SessionState::Unauthenticated => Err(SessionError::Unauthenticated),
            SessionState::Valid(tokens) => Ok(ActiveSession {
                session_id: session_id.clone(),
                tokens,
                refreshed: false,
            }),
            SessionState::NearExpiry(tokens) => match self.refresh(session_id, &tokens).await {
                Ok(session) => Ok(session),
                // まだ有効なトークンはプロバイダ停止中でも使い続ける
                Err(SessionError::Upstream(e)) => {
                    tracing::warn!(
                        error.category = log_error::category::EXTERNAL_SERVICE,
                        error.kind = log_error::kind::TOKEN_REFRESH,
                        "リフレッシュできないため期限間近のトークンを使用します: {}",
                        e
                    );
                    Ok(ActiveSession {
                        session_id: session_id.clone(),
                        tokens,
                        refreshed: false,
                    })
                }
                Err(e) => Err(e),
            },
            SessionState::Expired(tokens) => self.refresh(session_id, &tokens).await,
        }
    }

    /// リフレッシュを行わずに解決する
    ///
    /// 期限間近・期限切れは `Expired` を返し、呼び出し元に再認証を求める。
    /// ストリーミングアップロードのようにリクエストを再送できない経路で使う。
    pub async fn resolve_without_refresh(
        &self,
        session_id: &SessionId,
    ) -> Result<ActiveSession, SessionError> {
        match self.state(session_id).await? {
            SessionState::Unauthenticated => Err(SessionError::Unauthenticated),
            SessionState::Valid(tokens) => Ok(ActiveSession {
                session_id: session_id.clone(),
                tokens,
                refreshed: false,
            }),
            SessionState::NearExpiry(_) | SessionState::Expired(_) => Err(SessionError::Expired),
        }
    }

    /// `observed` を起点にトークンをリフレッシュする
    ///
    /// セッション単位のロック内でストアを読み直し、`observed` から既に
    /// ローテーションされていればプロバイダを呼ばずにその結果を使う。
    pub async fn refresh(
        &self,
        session_id: &SessionId,
        observed: &TokenSet,
    ) -> Result<ActiveSession, SessionError> {
        let outcome = self
            .locks
            .run_exclusive(session_id.as_str(), self.refresh_locked(session_id, observed))
            .await?;

        let tokens = match outcome {
            RefreshOutcome::Refreshed(tokens) | RefreshOutcome::AlreadyRotated(tokens) => tokens,
        };
        Ok(ActiveSession {
            session_id: session_id.clone(),
            tokens,
            refreshed: true,
        })
    }

    /// ストア上の現在のトークンを強制的にリフレッシュする
    pub async fn force_refresh(&self, session_id: &SessionId) -> Result<ActiveSession, SessionError> {
        let Some(tokens) = self.store.get(session_id).await? else {
            return Err(SessionError::Unauthenticated);
        };
        self.refresh(session_id, &tokens).await
    }

    /// セッションを削除する
    pub async fn revoke(&self, session_id: &SessionId) -> Result<(), SessionError> {
        self.store.remove(session_id).await?;
        Ok(())
    }

    async fn refresh_locked(
        &self,
        session_id: &SessionId,
        observed: &TokenSet,
    ) -> Result<RefreshOutcome, SessionError> {
        let Some(current) = self.store.get(session_id).await? else {
            // 待っている間にログアウト・失効した
            return Err(SessionError::Expired);
        };
        if current.access_token() != observed.access_token() {
            tracing::debug!("別のリクエストがリフレッシュ済みのため結果を再利用します");
            return Ok(RefreshOutcome::AlreadyRotated(current));
        }

        let Some(refresh_token) = current.refresh_token() else {
            self.expire(session_id, "refresh_token_missing").await;
            return Err(SessionError::Expired);
        };

        match self.idp.refresh(refresh_token).await {
            Ok(response) => {
                let rotated = current.rotate(response, self.clock.now());
                self.store.update(session_id, &rotated).await?;

                log_business_event!(
                    event.category = event::category::AUTH,
                    event.action = event::action::TOKEN_REFRESHED,
                    event.entity_type = event::entity_type::SESSION,
                    event.entity_id = %session_id.short(),
                    event.result = event::result::SUCCESS,
                    "トークンをリフレッシュしました"
                );
                Ok(RefreshOutcome::Refreshed(rotated))
            }
            Err(IdpError::Rejected(reason)) | Err(IdpError::BadRequest(reason)) => {
                self.expire(session_id, &reason).await;
                Err(SessionError::Expired)
            }
            Err(e) => {
                log_business_event!(
                    event.category = event::category::AUTH,
                    event.action = event::action::REFRESH_FAILED,
                    event.entity_type = event::entity_type::SESSION,
                    event.entity_id = %session_id.short(),
                    event.result = event::result::FAILURE,
                    event.reason = %e,
                    "ID プロバイダに到達できずリフレッシュに失敗しました"
                );
                Err(SessionError::Upstream(e))
            }
        }
    }

    /// リフレッシュ不能なセッションを削除する
    ///
    /// 削除に失敗しても呼び出し元には `Expired` を返す（TTL で消える）。
    async fn expire(&self, session_id: &SessionId, reason: &str) {
        log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::REFRESH_FAILED,
            event.entity_type = event::entity_type::SESSION,
            event.entity_id = %session_id.short(),
            event.result = event::result::FAILURE,
            event.reason = reason,
            "リフレッシュが拒否されました"
        );

        if let Err(e) = self.store.remove(session_id).await {
            tracing::error!(
                error.category = log_error::category::INFRASTRUCTURE,
                error.kind = log_error::kind::SESSION,
                "失効したセッションの削除に失敗: {}",
                e
            );
            return;
        }

        log_business_event!(
            event.category = event::category::AUTH,
            event.action = event::action::SESSION_REVOKED,
            event.entity_type = event::entity_type::SESSION,
            event.entity_id = %session_id.short(),
            event.result = event::result::SUCCESS,
            "セッションを削除しました"
        );
    }
}
