//! # ドメイン層エラー定義
//!
//! 入力値や ID プロバイダ由来の値がドメインのルールに合わない場合のエラー型。
//!
//! | エラー種別 | HTTP ステータス | 用途 |
//! |-----------|----------------|------|
//! | `Validation` | 400 Bad Request | 入力値の検証失敗 |
//! | `InvalidToken` | 401 Unauthorized | JWT の形式不正・デコード失敗 |

use thiserror::Error;

/// ドメイン層で発生するエラー
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    /// バリデーションエラー
    ///
    /// セッション ID の形式不正、パストラバーサルを含むプロキシパスなど。
    #[error("バリデーションエラー: {0}")]
    Validation(String),

    /// トークンの形式が不正
    ///
    /// JWT のセグメント数不足、base64url / JSON のデコード失敗など。
    /// 原因文字列にトークン本体は含めない。
    #[error("トークンの形式が不正です: {0}")]
    InvalidToken(String),
}
