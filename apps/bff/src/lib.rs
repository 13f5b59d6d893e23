//! # Storefront BFF (Backend for Frontend) ライブラリ
//!
//! ブラウザと内部ゲートウェイの間に立つ認証・プロキシサーバーのコアモジュール。
//! OAuth2 トークンはすべてサーバー側（Redis）に保持し、ブラウザには
//! セッション ID の HttpOnly Cookie だけを渡す。
//!
//! ## モジュール構成
//!
//! - `app_builder`: State の組み立てとルーター構築
//! - `client`: 外部 API クライアント（ID プロバイダ、内部ゲートウェイ）
//! - `config`: 環境変数からの設定読み込み
//! - `cookie`: セッション・PKCE フロー Cookie の発行と読み取り
//! - `error`: エラーレスポンスの組み立て
//! - `handler`: HTTP ハンドラ
//! - `middleware`: ミドルウェア（信頼済み呼び出し元の検証、Request ID 伝播等）
//! - `session`: セッションの解決とトークンリフレッシュ

pub mod app_builder;
pub mod client;
pub mod config;
pub mod cookie;
pub mod error;
pub mod handler;
pub mod middleware;
pub mod session;
