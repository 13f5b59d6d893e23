//! # 外部 API クライアント
//!
//! ID プロバイダ、内部ゲートウェイ（画像サービスを含む）との通信を担当する。

pub mod gateway;
pub mod identity_provider;

pub use gateway::{
    ForwardRequest,
    GatewayClient,
    GatewayClientImpl,
    GatewayError,
    UploadBody,
    UploadRequest,
    UpstreamResponse,
};
pub use identity_provider::{
    IdentityProviderClient,
    IdentityProviderClientImpl,
    IdpError,
    RegisterRequest,
    authorize_url,
};
