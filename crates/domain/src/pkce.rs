//! # PKCE（Proof Key for Code Exchange）
//!
//! 認可コードフローで使うコードベリファイア・コードチャレンジ・state を生成する。
//!
//! - ベリファイア: 32 バイトの乱数を base64url エンコード（43 文字、RFC 7636 の 43〜128 文字を満たす）
//! - チャレンジ: `BASE64URL(SHA256(verifier))`（`S256` 方式のみ）
//! - state: ベリファイアとは独立した 32 バイトの乱数

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// 認可リクエストに載せる `code_challenge_method`
pub const CODE_CHALLENGE_METHOD: &str = "S256";

/// コードベリファイアと、そこから導出したコードチャレンジの組
#[derive(Clone)]
pub struct PkceChallenge {
    verifier:  String,
    challenge: String,
}

impl PkceChallenge {
    /// 新しいベリファイアを生成し、チャレンジを導出する
    pub fn generate() -> Self {
        Self::from_verifier(random_url_safe())
    }

    /// 既存のベリファイアからチャレンジを導出する
    pub fn from_verifier(verifier: impl Into<String>) -> Self {
        let verifier = verifier.into();
        let challenge = code_challenge(&verifier);
        Self {
            verifier,
            challenge,
        }
    }

    pub fn verifier(&self) -> &str {
        &self.verifier
    }

    pub fn challenge(&self) -> &str {
        &self.challenge
    }
}

impl std::fmt::Debug for PkceChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceChallenge")
            .field("verifier", &crate::REDACTED)
            .field("challenge", &self.challenge)
            .finish()
    }
}

/// `S256` のコードチャレンジを計算する
pub fn code_challenge(verifier: &str) -> String {
    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
}

/// ベリファイアが開始時に送ったチャレンジと一致するかを検証する
pub fn verify_code_challenge(verifier: &str, challenge: &str) -> bool {
    constant_time_eq(&code_challenge(verifier), challenge)
}

/// CSRF 対策用の state を生成する
pub fn generate_state() -> String {
    random_url_safe()
}

/// コールバックで受け取った state と Cookie の state を比較する
///
/// 完全一致のみ受理する。比較は定数時間で行う。
pub fn state_matches(expected: &str, received: &str) -> bool {
    !expected.is_empty() && constant_time_eq(expected, received)
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn random_url_safe() -> String {
    let bytes: [u8; 32] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(bytes)
}
