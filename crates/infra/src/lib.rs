//! # Storefront インフラ層
//!
//! 外部ストア（Redis）との接続を担当するインフラストラクチャ層。
//!
//! ## 責務
//!
//! - **キャッシュ接続**: Redis への接続管理
//! - **トークンストア**: セッション ID → トークンセットの永続化
//!
//! ## 依存関係
//!
//! ```text
//! bff → infra → domain
//!   ↘           ↗
//!     shared
//! ```
//!
//! ## モジュール構成
//!
//! - [`redis`] - Redis 接続管理
//! - [`error`] - インフラ層エラー定義
//! - [`token_store`] - トークンストアのトレイトと Redis 実装
//! - `mock` - テスト用インメモリ実装（`test-utils` feature）

pub mod error;
#[cfg(any(test, feature = "test-utils"))]
pub mod mock;
pub mod redis;
pub mod token_store;

pub use error::{InfraError, InfraErrorKind};
pub use token_store::{RedisTokenStore, SESSION_TTL_SECONDS, TokenStore};
