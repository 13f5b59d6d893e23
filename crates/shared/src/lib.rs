//! # Storefront 共有ユーティリティ
//!
//! BFF・インフラ層・ドメイン層から共通で使用するユーティリティを提供する。
//!
//! ## 設計方針
//!
//! - ビジネスロジックを含まない純粋なユーティリティのみを配置
//! - axum への依存は持たない（HTTP レスポンス変換は各アプリの責務）
//! - tracing / tower 系の依存は `observability` feature に閉じ込める

#[cfg(feature = "observability")]
pub mod canonical_log;
pub mod error_response;
pub mod event_log;
pub mod observability;

pub use error_response::ErrorResponse;
