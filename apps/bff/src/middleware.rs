//! # ミドルウェア
//!
//! BFF 用のミドルウェアを提供する。
//!
//! - [`no_cache`] - 全レスポンスのキャッシュ禁止
//! - [`require_internal_api_key`] - 信頼済み呼び出し元の検証
//! - [`request_id`] - Request ID の task-local 保存と外向きリクエストへの付与

mod cache_control;
pub mod request_id;
mod trusted_caller;

pub use cache_control::no_cache;
pub use trusted_caller::{INTERNAL_API_KEY_HEADER, TrustedCallerState, require_internal_api_key};
