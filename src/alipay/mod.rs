mod client;
mod notify;
mod openapi;

mod config {
    use openssl::pkey::{PKey, Private, Public};

    /**
     * 支付宝开放平台应用配置, 密钥在启动时解析好, 请求里不再读文件
     */
    #[derive(Clone)]
    pub struct AlipayConfig {
        pub app_id: String,              // 开放平台应用 ID
        pub private_key: PKey<Private>,  // 应用私钥, RSA2 签名
        pub public_key: PKey<Public>,    // 支付宝公钥, 验签
        pub gateway_url: String,         // https://openapi.alipay.com/gateway.do
        pub return_url: String,          // 手机网站支付成功后跳转, 可以为空
    }
}

mod error {
    use crate::core::GatewayError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum AlipayError {
        #[error("[Failed Communicating Alipay API] {0}")]
        ApiError(String),
        #[error("[Invalid Alipay Config] {0}")]
        InvalidConfig(String),
        #[error("[Alipay Signature Mismatch] {0}")]
        Signature(String),
        #[error("[Unexpected Alipay Error] {0}")]
        Unexpected(String),
    }

    impl From<openssl::error::ErrorStack> for AlipayError {
        fn from(e: openssl::error::ErrorStack) -> Self {
            AlipayError::Unexpected(format!("[openssl] {:?}", e))
        }
    }

    impl From<data_encoding::DecodeError> for AlipayError {
        fn from(e: data_encoding::DecodeError) -> Self {
            AlipayError::Unexpected(format!("[base64] {:?}", e))
        }
    }

    impl From<AlipayError> for GatewayError {
        fn from(e: AlipayError) -> GatewayError {
            tracing::error!("{:?}", e);
            match e {
                AlipayError::Signature(e) => GatewayError::Signature(e),
                AlipayError::ApiError(e) => GatewayError::Upstream(e),
                AlipayError::InvalidConfig(e) => GatewayError::Upstream(e),
                AlipayError::Unexpected(e) => GatewayError::Upstream(e),
            }
        }
    }
}

mod api {
    use super::{
        notify::AlipayNotify,
        openapi::{AliRefundQueryReply, AliRefundReply, AliTradePayReply},
        AlipayError,
    };
    use crate::core::{Amount, NotifyError};
    use async_trait::async_trait;

    pub struct AliOrder<'a> {
        pub subject: &'a str,
        pub trade_no: &'a str, // 商户订单号 out_trade_no
        pub notify_url: Option<&'a str>,
        pub total_amount: Amount,
    }

    pub struct AliRefund<'a> {
        pub trade_no: &'a str,
        pub out_refund_no: &'a str, // 退款请求号 out_request_no
        pub refund_amount: Amount,
    }

    #[async_trait]
    pub trait AlipayApi: Send + Sync {
        /// 付款码支付 alipay.trade.pay
        async fn scan_code_pay(
            &self,
            order: &AliOrder,
            auth_code: &str,
        ) -> Result<AliTradePayReply, AlipayError>;

        async fn refund(&self, refund: &AliRefund) -> Result<AliRefundReply, AlipayError>;

        async fn query_refund(
            &self,
            trade_no: &str,
            out_refund_no: &str,
        ) -> Result<AliRefundQueryReply, AlipayError>;

        /// 手机网站支付, 返回自动提交的 html 表单
        fn h5_pay(&self, order: &AliOrder) -> Result<String, AlipayError>;

        fn verify_notify(&self, payload: &str) -> Result<AlipayNotify, NotifyError>;
    }
}

pub use api::*;
pub use client::AlipayClient;
pub use config::*;
pub use error::*;
pub use notify::{verify_notify, AlipayNotify};
pub use openapi::{
    load_private_key, load_public_key, openapi_rsa2, AliRefundQueryReply, AliRefundReply,
    AliReturn, AliTradePayReply,
};
