//! # Storefront ドメイン層
//!
//! BFF の認証・プロキシ処理の中核となる値オブジェクトと純粋なルールを定義する。
//!
//! ## 設計方針
//!
//! - I/O を一切持たない（Redis、HTTP は infra / bff の責務）
//! - 時刻は引数で受け取り、テストで固定時刻を注入できるようにする
//! - トークン文字列を含む型は `Debug` をマスクする
//!
//! ## 依存関係の方向
//!
//! ```text
//! bff → infra → domain
//!   ↘          ↗
//!     shared
//! ```
//!
//! ## モジュール構成
//!
//! - [`token`] - トークンセットと ID プロバイダのトークンレスポンス
//! - [`session_id`] - 推測不能なセッション識別子
//! - [`session_state`] - 認証状態マシン（Valid / NearExpiry / Expired）
//! - [`pkce`] - PKCE のコードベリファイア・チャレンジ・state
//! - [`claims`] - ID トークンから取り出すユーザー情報
//! - [`return_url`] - オープンリダイレクトを防ぐ戻り先 URL の検証
//! - [`route`] - プロキシ先ドメインのルーティングテーブル
//! - [`clock`] - 時刻プロバイダ

pub mod claims;
pub mod clock;
pub mod error;
pub mod pkce;
pub mod return_url;
pub mod route;
pub mod session_id;
pub mod session_state;
pub mod token;

pub use error::DomainError;

/// ログ出力時に機密値の代わりに出力する文字列
pub const REDACTED: &str = "[REDACTED]";
