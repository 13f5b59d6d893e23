//! # Redis 接続管理
//!
//! `ConnectionManager` は切断時に自動で再接続し、Clone して複数タスクで共有できる。
//! アプリケーション起動時に一度だけ作成し、トークンストアとヘルスチェックで共有する。
//!
//! ```rust,ignore
//! use storefront_infra::redis;
//!
//! let conn = redis::create_connection_manager("redis://localhost:6379").await?;
//! ```

use redis::{Client, aio::ConnectionManager};

/// Redis 接続マネージャを作成する
///
/// # 引数
///
/// * `redis_url` - `redis://[[username:]password@]host[:port][/database]`
///   （TLS は `rediss://`）
///
/// # エラー
///
/// - URL パースエラー
/// - 接続エラー・認証エラー
pub async fn create_connection_manager(
    redis_url: &str,
) -> Result<ConnectionManager, redis::RedisError> {
    let client = Client::open(redis_url)?;
    ConnectionManager::new(client).await
}
