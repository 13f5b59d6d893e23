//! # セッション解決
//!
//! Cookie のセッション ID からアクセストークンを解決し、必要に応じてリフレッシュする。
//!
//! - `resolver`: 認証状態マシンの遷移を実行する [`SessionResolver`]
//! - `refresh_lock`: セッション単位のリフレッシュ直列化

mod refresh_lock;
mod resolver;

pub use refresh_lock::RefreshLocks;
pub use resolver::{ActiveSession, SessionError, SessionResolver};
