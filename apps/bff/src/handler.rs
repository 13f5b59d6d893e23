//! # HTTP リクエストハンドラ
//!
//! axum のルートに対応するハンドラ関数を定義する。
//!
//! ## 設計方針
//!
//! - 各ハンドラはサブモジュールに配置
//! - 親モジュールで re-export し、フラットな API を提供
//! - ハンドラは薄く保ち、トークンの扱いは [`crate::session`] に委譲
//!
//! ## ハンドラ一覧
//!
//! - `health`: ヘルスチェック
//! - `auth`: 認証関連（PKCE フロー、資格情報ログイン、セッション管理）
//! - `proxy`: 内部ゲートウェイへの転送
//! - `image`: 画像のアップロード・削除
//! - `account`: プロフィール・パスワード・配送先住所

pub mod account;
pub mod auth;
pub mod health;
pub mod image;
pub mod proxy;

pub use account::{
    change_password,
    create_address,
    delete_address,
    get_address,
    list_addresses,
    set_default_address,
    update_address,
    update_profile,
};
pub use auth::{
    AuthState,
    admin_login,
    admin_logout,
    begin_login,
    callback,
    get_token,
    login_credentials,
    logout,
    refresh,
    register,
    status,
    user,
};
pub use health::{ReadinessState, health_check, readiness_check};
pub use image::{delete_image, upload_image};
pub use proxy::{ProxyState, forward};
