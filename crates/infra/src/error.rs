//! # トークンストアのエラー
//!
//! [`InfraError`] は種別（[`InfraErrorKind`]）と、生成時点の [`SpanTrace`] を持つ。
//! どのハンドラのどの操作でストアが失敗したかをログから辿れるよう、
//! `From` 変換と [`InfraError::unavailable`] は必ずスパンを記録する。

use std::fmt;

use derive_more::Display;
use thiserror::Error;
use tracing_error::SpanTrace;

#[derive(Display)]
#[display("{kind}")]
pub struct InfraError {
    kind:       InfraErrorKind,
    span_trace: SpanTrace,
}

/// トークンストアの失敗の種別
#[derive(Debug, Error)]
pub enum InfraErrorKind {
    /// Redis への接続・コマンド実行の失敗
    #[error("Redis エラー: {0}")]
    Redis(#[source] redis::RedisError),

    /// 保存されたセッションレコードを JSON として読み書きできない
    #[error("セッションレコードが壊れています: {0}")]
    CorruptRecord(#[source] serde_json::Error),

    /// ストアが停止している
    #[error("トークンストアを利用できません: {0}")]
    Unavailable(String),
}

impl InfraError {
    pub fn kind(&self) -> &InfraErrorKind {
        &self.kind
    }

    pub fn span_trace(&self) -> &SpanTrace {
        &self.span_trace
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            kind:       InfraErrorKind::Unavailable(reason.into()),
            span_trace: SpanTrace::capture(),
        }
    }

    /// 再試行で回復しうる失敗か
    ///
    /// 接続断・タイムアウトは一時的、レコードの破損は再試行しても変わらない。
    pub fn is_transient(&self) -> bool {
        match &self.kind {
            InfraErrorKind::Redis(e) => e.is_io_error() || e.is_timeout() || e.is_connection_dropped(),
            InfraErrorKind::CorruptRecord(_) => false,
            InfraErrorKind::Unavailable(_) => true,
        }
    }
}

impl fmt::Debug for InfraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InfraError")
            .field("kind", &self.kind)
            .field("span_trace", &self.span_trace)
            .finish()
    }
}

impl std::error::Error for InfraError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.kind.source()
    }
}

impl From<redis::RedisError> for InfraError {
    fn from(source: redis::RedisError) -> Self {
        Self {
            kind:       InfraErrorKind::Redis(source),
            span_trace: SpanTrace::capture(),
        }
    }
}

impl From<serde_json::Error> for InfraError {
    fn from(source: serde_json::Error) -> Self {
        Self {
            kind:       InfraErrorKind::CorruptRecord(source),
            span_trace: SpanTrace::capture(),
        }
    }
}
