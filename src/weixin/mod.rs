mod client;
mod notify;
mod v2api;

mod config {
    /**
     * 微信支付 v2 商户配置, 启动时从环境变量加载一次, 之后只读
     */
    #[derive(Clone)]
    pub struct WeixinConfig {
        pub app_id: String,              // 公众号 app id
        pub mch_id: String,              // 微信支付商户号
        pub app_secret: String,          // 公众号 app secret, 用于 oauth2 换 openid
        pub api_secret: String,          // 商户 api 密钥, 签名和退款通知解密都用它
        pub mini_program_id: String,     // 小程序 app id
        pub mini_program_secret: String, // 小程序 secret
        pub client_cert: Option<String>, // apiclient_cert.pem, 退款和撤销需要
        pub client_key: Option<String>,  // apiclient_key.pem
        pub spbill_create_ip: String,    // 付款码支付时上报的终端 IP
        pub oauth_redirect_url: String,  // 公众号 oauth2 回跳地址, 指向 wxUnifyPay
        pub api_base: String,            // https://api.mch.weixin.qq.com
        pub open_api_base: String,       // https://api.weixin.qq.com
        pub allow_unsigned_refund_notify: bool,
    }
}

mod error {
    use crate::core::GatewayError;
    use thiserror::Error;

    #[derive(Error, Debug)]
    pub enum WeixinError {
        #[error("[Failed Communicating Weixin API] {0}")]
        ApiError(String),
        #[error("[Invalid Weixin Config] {0}")]
        InvalidConfig(String),
        #[error("[Weixin Signature Mismatch] {0}")]
        Signature(String),
        #[error("[Unexpected Weixin Error] {0}")]
        Unexpected(String),
    }

    impl From<openssl::error::ErrorStack> for WeixinError {
        fn from(e: openssl::error::ErrorStack) -> Self {
            WeixinError::Unexpected(format!("[openssl] {:?}", e))
        }
    }

    impl From<WeixinError> for GatewayError {
        fn from(e: WeixinError) -> GatewayError {
            tracing::error!("{:?}", e);
            match e {
                WeixinError::Signature(e) => GatewayError::Signature(e),
                WeixinError::ApiError(e) => GatewayError::Upstream(e),
                WeixinError::InvalidConfig(e) => GatewayError::Upstream(e),
                WeixinError::Unexpected(e) => GatewayError::Upstream(e),
            }
        }
    }
}

mod api {
    use super::{
        v2api::{
            WxAppParams, WxJsapiParams, WxMicroPayReply, WxOrderQueryReply, WxPaymentNotify,
            WxRefundNotify, WxRefundQueryReply, WxRefundReply, WxReverseReply, WxUnifiedOrderReply,
        },
        WeixinError,
    };
    use crate::core::{Amount, NotifyError};
    use async_trait::async_trait;

    pub struct WxOrder<'a> {
        pub body: &'a str,       // 商品描述
        pub trade_no: &'a str,   // 商户订单号
        pub notify_url: &'a str, // 异步通知地址
        pub fee: Amount,         // 金额, 分
    }

    pub struct WxRefund<'a> {
        pub trade_no: &'a str,
        pub out_refund_no: &'a str,
        pub notify_url: &'a str,
        pub total_fee: Amount,
        pub refund_fee: Amount,
    }

    /**
     * 微信支付 v2 接口. 网关只调用这些操作, 测试里用假实现替换
     */
    #[async_trait]
    pub trait WeixinApi: Send + Sync {
        /// NATIVE 下单, 返回二维码链接
        async fn get_pay_code(
            &self,
            order: &WxOrder,
            client_ip: &str,
        ) -> Result<WxUnifiedOrderReply, WeixinError>;

        async fn mini_program_place_order(
            &self,
            order: &WxOrder,
            code: &str,
        ) -> Result<WxJsapiParams, WeixinError>;

        async fn app_place_order(&self, order: &WxOrder) -> Result<WxAppParams, WeixinError>;

        /// 公众号 JSAPI 下单, code 来自 oauth2 回跳
        async fn public_place_order(
            &self,
            order: &WxOrder,
            code: &str,
        ) -> Result<WxJsapiParams, WeixinError>;

        /// 付款码支付
        async fn micro_pay(
            &self,
            order: &WxOrder,
            auth_code: &str,
        ) -> Result<WxMicroPayReply, WeixinError>;

        async fn query_order(&self, trade_no: &str) -> Result<WxOrderQueryReply, WeixinError>;

        async fn refund(&self, refund: &WxRefund) -> Result<WxRefundReply, WeixinError>;

        async fn query_refund(&self, out_refund_no: &str)
            -> Result<WxRefundQueryReply, WeixinError>;

        /// 撤销订单
        async fn reverse(&self, out_trade_no: &str) -> Result<WxReverseReply, WeixinError>;

        fn verify_payment_notify(&self, xml: &str) -> Result<WxPaymentNotify, NotifyError>;

        fn decode_refund_notify(&self, xml: &str) -> Result<WxRefundNotify, NotifyError>;

        /// 按支付结果通知的格式生成一条已签名的通知, 轮询成功后推给商户
        fn payment_notification(&self, reply: &WxOrderQueryReply) -> Result<String, WeixinError>;
    }
}

pub use api::*;
pub use client::WeixinClient;
pub use config::*;
pub use error::*;
pub use notify::{decode_refund_notify, payment_notification, verify_payment_notify};
pub use v2api::*;
