use crate::{
    alipay::{
        AliOrder, AliRefund, AliRefundQueryReply, AliRefundReply, AliReturn, AliTradePayReply,
        AlipayApi, AlipayConfig, AlipayError, AlipayNotify,
    },
    config::GatewayConfig,
    core::NotifyError,
    poller::{NotifySink, PollerConfig, PollerError, TradePoller},
    routes::AppState,
    weixin::{
        self, WeixinApi, WeixinConfig, WeixinError, WxAppParams, WxJsapiParams, WxMicroPayReply,
        WxOrder, WxOrderQueryReply, WxPaymentNotify, WxRefund, WxRefundNotify,
        WxRefundQueryReply, WxRefundReply, WxReturn, WxReverseReply, WxUnifiedOrderReply,
    },
};
use async_trait::async_trait;
use openssl::{
    pkey::{PKey, Private, Public},
    rsa::Rsa,
};
use std::sync::{Arc, Mutex, OnceLock};

pub const WX_API_SECRET: &str = "192006250b4c09247ec02edce69f6a2d";

/// 在随机端口上跑一个本地 http 服务, 返回 http://127.0.0.1:port
pub async fn serve_stub(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}

/// 测试用的支付宝密钥对, 整个测试进程只生成一次
pub fn alipay_keys() -> (PKey<Private>, PKey<Public>) {
    static KEYS: OnceLock<(PKey<Private>, PKey<Public>)> = OnceLock::new();
    KEYS.get_or_init(|| {
        let rsa = Rsa::generate(2048).unwrap();
        let private_key = PKey::from_rsa(rsa).unwrap();
        let public_key = PKey::public_key_from_der(&private_key.public_key_to_der().unwrap()).unwrap();
        (private_key, public_key)
    })
    .clone()
}

pub fn gateway_config() -> GatewayConfig {
    let (private_key, public_key) = alipay_keys();
    GatewayConfig {
        addr: ([127, 0, 0, 1], 8003).into(),
        weixin: WeixinConfig {
            app_id: "wx2421b1c4370ec43b".into(),
            mch_id: "10000100".into(),
            app_secret: "app-secret".into(),
            api_secret: WX_API_SECRET.into(),
            mini_program_id: "wxmini".into(),
            mini_program_secret: "mini-secret".into(),
            client_cert: None,
            client_key: None,
            spbill_create_ip: "127.0.0.1".into(),
            oauth_redirect_url: "https://pay.example.com/payService/WeChat/wxUnifyPay".into(),
            api_base: "https://api.mch.weixin.qq.com".into(),
            open_api_base: "https://api.weixin.qq.com".into(),
            allow_unsigned_refund_notify: false,
        },
        alipay: AlipayConfig {
            app_id: "2021000000".into(),
            private_key,
            public_key,
            gateway_url: "https://openapi.alipay.com/gateway.do".into(),
            return_url: String::new(),
        },
        poller: PollerConfig::default(),
    }
}

pub fn app_state(
    weixin: Arc<FakeWeixin>,
    alipay: Arc<FakeAlipay>,
    sink: Arc<RecordingSink>,
) -> AppState {
    let config = gateway_config();
    let poller = TradePoller::new(weixin.clone(), sink, config.poller.clone());
    AppState {
        config: Arc::new(config),
        weixin,
        alipay,
        poller,
    }
}

fn wx_success() -> WxReturn {
    WxReturn {
        return_code: "SUCCESS".into(),
        return_msg: "OK".into(),
        result_code: "SUCCESS".into(),
        ..Default::default()
    }
}

fn jsapi_params(prepay_id: &str) -> WxJsapiParams {
    WxJsapiParams {
        app_id: "wx2421b1c4370ec43b".into(),
        time_stamp: "1717927661".into(),
        nonce_str: "5K8264ILTKCH16CQ2502SI8ZNMTM67VS".into(),
        package: format!("prepay_id={}", prepay_id),
        sign_type: "MD5".into(),
        pay_sign: "C380BEC2BFD727A4B6845133519F3AD6".into(),
    }
}

/// 按脚本应答的微信接口, 记录每次查单的时间
#[derive(Default)]
pub struct FakeWeixin {
    pub paid_on_query: Option<usize>, // 第 n 次查单开始返回支付成功
    pub query_error: bool,            // 支付成功之前的查单都报错
    pub micro_pay: WxMicroPayReply,
    pub(crate) queries: Mutex<Vec<tokio::time::Instant>>,
}

impl FakeWeixin {
    pub fn query_count(&self) -> usize {
        self.queries.lock().unwrap().len()
    }

    pub fn query_times(&self) -> Vec<tokio::time::Instant> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WeixinApi for FakeWeixin {
    async fn get_pay_code(
        &self,
        order: &WxOrder,
        _client_ip: &str,
    ) -> Result<WxUnifiedOrderReply, WeixinError> {
        Ok(WxUnifiedOrderReply {
            base: wx_success(),
            trade_type: "NATIVE".into(),
            prepay_id: format!("wx{}", order.trade_no),
            code_url: format!("weixin://wxpay/bizpayurl?pr={}", order.trade_no),
            ..Default::default()
        })
    }

    async fn mini_program_place_order(
        &self,
        order: &WxOrder,
        _code: &str,
    ) -> Result<WxJsapiParams, WeixinError> {
        Ok(jsapi_params(&format!("wx{}", order.trade_no)))
    }

    async fn app_place_order(&self, order: &WxOrder) -> Result<WxAppParams, WeixinError> {
        Ok(WxAppParams {
            appid: "wxapp".into(),
            partnerid: "10000100".into(),
            prepayid: format!("wx{}", order.trade_no),
            package: "Sign=WXPay".into(),
            noncestr: "5K8264ILTKCH16CQ2502SI8ZNMTM67VS".into(),
            timestamp: "1717927661".into(),
            sign: "C380BEC2BFD727A4B6845133519F3AD6".into(),
        })
    }

    async fn public_place_order(
        &self,
        order: &WxOrder,
        code: &str,
    ) -> Result<WxJsapiParams, WeixinError> {
        if code == "expired" {
            return Err(WeixinError::ApiError("[40029] invalid code".into()));
        }
        Ok(jsapi_params(&format!("wx{}", order.trade_no)))
    }

    async fn micro_pay(
        &self,
        order: &WxOrder,
        _auth_code: &str,
    ) -> Result<WxMicroPayReply, WeixinError> {
        Ok(WxMicroPayReply {
            out_trade_no: order.trade_no.to_string(),
            ..self.micro_pay.clone()
        })
    }

    async fn query_order(&self, trade_no: &str) -> Result<WxOrderQueryReply, WeixinError> {
        let n = {
            let mut queries = self.queries.lock().unwrap();
            queries.push(tokio::time::Instant::now());
            queries.len()
        };
        if self.paid_on_query.is_some_and(|k| n >= k) {
            return Ok(WxOrderQueryReply {
                base: wx_success(),
                appid: "wx2421b1c4370ec43b".into(),
                mch_id: "10000100".into(),
                openid: "oUpF8uMuAJO_M2pxb1Q9zNjWeS6o".into(),
                trade_type: "MICROPAY".into(),
                trade_state: "SUCCESS".into(),
                bank_type: "CMC".into(),
                transaction_id: "1217752501201407033233368018".into(),
                out_trade_no: trade_no.to_string(),
                time_end: "20240609180741".into(),
                total_fee: "1000".into(),
                cash_fee: "1000".into(),
                ..Default::default()
            });
        }
        if self.query_error {
            return Err(WeixinError::ApiError("connection reset".into()));
        }
        Ok(WxOrderQueryReply {
            base: wx_success(),
            trade_state: "USERPAYING".into(),
            trade_state_desc: "需要用户输入支付密码".into(),
            out_trade_no: trade_no.to_string(),
            ..Default::default()
        })
    }

    async fn refund(&self, refund: &WxRefund) -> Result<WxRefundReply, WeixinError> {
        Ok(WxRefundReply {
            base: wx_success(),
            out_trade_no: refund.trade_no.to_string(),
            out_refund_no: refund.out_refund_no.to_string(),
            refund_id: "50000408942018111907145868882".into(),
            total_fee: refund.total_fee.to_string(),
            refund_fee: refund.refund_fee.to_string(),
            cash_fee: refund.total_fee.to_string(),
            ..Default::default()
        })
    }

    async fn query_refund(
        &self,
        out_refund_no: &str,
    ) -> Result<WxRefundQueryReply, WeixinError> {
        Ok(WxRefundQueryReply {
            base: wx_success(),
            out_refund_no: out_refund_no.to_string(),
            refund_status: "SUCCESS".into(),
            total_fee: "1000".into(),
            refund_fee: "500".into(),
            ..Default::default()
        })
    }

    async fn reverse(&self, _out_trade_no: &str) -> Result<WxReverseReply, WeixinError> {
        Ok(WxReverseReply {
            base: wx_success(),
            recall: "N".into(),
        })
    }

    fn verify_payment_notify(&self, xml: &str) -> Result<WxPaymentNotify, NotifyError> {
        weixin::verify_payment_notify(xml, WX_API_SECRET)
    }

    fn decode_refund_notify(&self, xml: &str) -> Result<WxRefundNotify, NotifyError> {
        weixin::decode_refund_notify(xml, WX_API_SECRET, false)
    }

    fn payment_notification(&self, reply: &WxOrderQueryReply) -> Result<String, WeixinError> {
        weixin::payment_notification(reply, WX_API_SECRET)
    }
}

#[derive(Default)]
pub struct FakeAlipay {
    pub fail_with: Option<AliReturn>, // 设置后所有接口都返回这个业务错误
}

impl FakeAlipay {
    fn base(&self) -> AliReturn {
        self.fail_with.clone().unwrap_or_else(|| AliReturn {
            code: "10000".into(),
            msg: "Success".into(),
            ..Default::default()
        })
    }
}

#[async_trait]
impl AlipayApi for FakeAlipay {
    async fn scan_code_pay(
        &self,
        order: &AliOrder,
        _auth_code: &str,
    ) -> Result<AliTradePayReply, AlipayError> {
        Ok(AliTradePayReply {
            base: self.base(),
            trade_no: "2024060922001476001".into(),
            out_trade_no: order.trade_no.to_string(),
            buyer_logon_id: "159****5620".into(),
            total_amount: order.total_amount.to_yuan_string(),
            receipt_amount: order.total_amount.to_yuan_string(),
            gmt_payment: "2024-06-09 18:07:41".into(),
        })
    }

    async fn refund(&self, refund: &AliRefund) -> Result<AliRefundReply, AlipayError> {
        Ok(AliRefundReply {
            base: self.base(),
            trade_no: "2024060922001476001".into(),
            out_trade_no: refund.trade_no.to_string(),
            fund_change: "Y".into(),
            refund_fee: refund.refund_amount.to_yuan_string(),
            gmt_refund_pay: "2024-06-10 09:00:00".into(),
            ..Default::default()
        })
    }

    async fn query_refund(
        &self,
        trade_no: &str,
        out_refund_no: &str,
    ) -> Result<AliRefundQueryReply, AlipayError> {
        Ok(AliRefundQueryReply {
            base: self.base(),
            out_trade_no: trade_no.to_string(),
            out_request_no: out_refund_no.to_string(),
            total_amount: "10.00".into(),
            refund_amount: "5.00".into(),
            refund_status: "REFUND_SUCCESS".into(),
            ..Default::default()
        })
    }

    fn h5_pay(&self, order: &AliOrder) -> Result<String, AlipayError> {
        Ok(format!(
            "<form name=\"alipaysubmit\">{} {}</form>",
            order.trade_no,
            order.total_amount.to_yuan_string()
        ))
    }

    fn verify_notify(&self, payload: &str) -> Result<AlipayNotify, NotifyError> {
        crate::alipay::verify_notify(payload, &alipay_keys().1)
    }
}

/// 记录推送, fail 为 true 时记录后返回失败
#[derive(Default)]
pub struct RecordingSink {
    pub fail: bool,
    pub(crate) delivered: Mutex<Vec<(String, String)>>,
}

impl RecordingSink {
    pub fn deliveries(&self) -> Vec<(String, String)> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotifySink for RecordingSink {
    async fn deliver(&self, url: &str, body: String) -> Result<(), PollerError> {
        self.delivered.lock().unwrap().push((url.to_string(), body));
        if self.fail {
            return Err(PollerError::Delivery(format!("{} answered 502 Bad Gateway", url)));
        }
        Ok(())
    }
}
