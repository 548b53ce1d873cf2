use super::{
    notify,
    v2api::{
        self, sign_params, MicroPayPayload, OutRefundNoPayload, OutTradeNoPayload, RefundPayload,
        UnifiedOrderPayload, V2ApiRequest, WxAppParams, WxJsapiParams, WxMicroPayReply,
        WxOrderQueryReply, WxPaymentNotify, WxRefundNotify, WxRefundQueryReply, WxRefundReply,
        WxReverseReply, WxUnifiedOrderReply,
    },
    WeixinApi, WeixinConfig, WeixinError, WxOrder, WxRefund,
};
use crate::core::{NotifyError, ProviderReturn};
use async_trait::async_trait;
use serde::Deserialize;
use std::{collections::HashMap, time::Duration};

const TIMEOUT: Duration = Duration::from_secs(10);

/// 用 code 换 openid 的两个接口 (小程序 jscode2session, 公众号 oauth2) 返回同样的字段
#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct SnsSession {
    openid: String,
    errcode: i64,
    errmsg: String,
}

enum SnsGrant {
    MiniProgram,
    Public,
}

pub struct WeixinClient {
    config: WeixinConfig,
    http: reqwest::Client,
    cert_http: Option<reqwest::Client>, // 带商户证书, 退款和撤销用
}

impl WeixinClient {
    pub fn new(config: WeixinConfig) -> Result<Self, WeixinError> {
        let http = reqwest::Client::builder()
            .timeout(TIMEOUT)
            .build()
            .map_err(|e| WeixinError::InvalidConfig(format!("error building http client: {}", e)))?;
        let cert_http = match (&config.client_cert, &config.client_key) {
            (Some(cert), Some(key)) => {
                let identity = reqwest::Identity::from_pkcs8_pem(cert.as_bytes(), key.as_bytes())
                    .map_err(|e| {
                        WeixinError::InvalidConfig(format!("invalid apiclient cert/key: {}", e))
                    })?;
                let client = reqwest::Client::builder()
                    .timeout(TIMEOUT)
                    .identity(identity)
                    .build()
                    .map_err(|e| {
                        WeixinError::InvalidConfig(format!("error building cert http client: {}", e))
                    })?;
                Some(client)
            }
            _ => {
                tracing::warn!("weixin client certificate not configured, refund and reverse are unavailable");
                None
            }
        };
        Ok(Self {
            config,
            http,
            cert_http,
        })
    }

    /**
     * 签名, 发送 xml, 解析应答. return_code 为 SUCCESS 的应答带签名, 必须验过才返回
     */
    async fn send_request(
        &self,
        path: &str,
        mut request: V2ApiRequest,
        with_cert: bool,
    ) -> Result<HashMap<String, String>, WeixinError> {
        request.sign_md5(&self.config.api_secret)?;
        let client = if with_cert {
            self.cert_http.as_ref().ok_or_else(|| {
                WeixinError::InvalidConfig("client certificate required for this api".into())
            })?
        } else {
            &self.http
        };
        let url = format!("{}{}", self.config.api_base, path);
        let res = client
            .post(&url)
            .body(request.to_xml())
            .send()
            .await
            .map_err(|e| WeixinError::ApiError(format!("error request {}: {}", path, e)))?;
        let res_text = res
            .text()
            .await
            .map_err(|e| WeixinError::ApiError(format!("error read {} response: {}", path, e)))?;
        tracing::debug!(path, response = res_text.as_str(), "weixin v2 api response");

        let m = v2api::parse_xml(&res_text)
            .map_err(|e| WeixinError::ApiError(format!("error parsing {} response: {}", path, e)))?;
        if m.get("return_code").map(|s| s.as_str()) == Some("SUCCESS") {
            v2api::v2api_sign::verify(&m, &self.config.api_secret)
                .map_err(|e| WeixinError::Signature(format!("{} response: {}", path, e)))?;
        }
        Ok(m)
    }

    async fn unified_order(
        &self,
        app_id: &str,
        order: &WxOrder<'_>,
        trade_type: &'static str,
        client_ip: &str,
        openid: Option<&str>,
    ) -> Result<WxUnifiedOrderReply, WeixinError> {
        let payload = UnifiedOrderPayload {
            body: order.body,
            out_trade_no: order.trade_no,
            total_fee: order.fee.to_string(),
            spbill_create_ip: client_ip,
            notify_url: order.notify_url,
            trade_type,
            openid,
            product_id: if trade_type == "NATIVE" {
                Some(order.trade_no)
            } else {
                None
            },
        };
        let request = V2ApiRequest::new(app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/pay/unifiedorder", request, false).await?;
        v2api::from_map(&m)
    }

    /// JSAPI / APP 需要 prepay_id 才能继续, 下单没成功直接当错误处理
    async fn prepay(
        &self,
        app_id: &str,
        order: &WxOrder<'_>,
        trade_type: &'static str,
        openid: Option<&str>,
    ) -> Result<String, WeixinError> {
        let reply = self
            .unified_order(app_id, order, trade_type, &self.config.spbill_create_ip, openid)
            .await?;
        let status = reply.base.status();
        if !status.is_success() {
            return Err(WeixinError::ApiError(format!(
                "unifiedorder failed: {}",
                status.msg
            )));
        }
        if reply.prepay_id.is_empty() {
            return Err(WeixinError::ApiError("unifiedorder returned no prepay_id".into()));
        }
        Ok(reply.prepay_id)
    }

    async fn openid_from_code(&self, grant: SnsGrant, code: &str) -> Result<String, WeixinError> {
        let (url, query) = match grant {
            SnsGrant::MiniProgram => (
                format!("{}/sns/jscode2session", self.config.open_api_base),
                [
                    ("appid", self.config.mini_program_id.as_str()),
                    ("secret", self.config.mini_program_secret.as_str()),
                    ("js_code", code),
                    ("grant_type", "authorization_code"),
                ],
            ),
            SnsGrant::Public => (
                format!("{}/sns/oauth2/access_token", self.config.open_api_base),
                [
                    ("appid", self.config.app_id.as_str()),
                    ("secret", self.config.app_secret.as_str()),
                    ("code", code),
                    ("grant_type", "authorization_code"),
                ],
            ),
        };
        let res = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await
            .map_err(|e| WeixinError::ApiError(format!("error request openid: {}", e)))?;
        let session: SnsSession = res
            .json()
            .await
            .map_err(|e| WeixinError::ApiError(format!("error parse openid response: {}", e)))?;
        if session.errcode != 0 || session.openid.is_empty() {
            return Err(WeixinError::ApiError(format!(
                "error exchanging code for openid: [{}] {}",
                session.errcode, session.errmsg
            )));
        }
        Ok(session.openid)
    }

    fn jsapi_params(&self, app_id: &str, prepay_id: &str) -> Result<WxJsapiParams, WeixinError> {
        /* paySign 不是下单时的 sign, 需要对调起参数重新签名 */
        let mut params = WxJsapiParams {
            app_id: app_id.to_string(),
            time_stamp: chrono::Utc::now().timestamp().to_string(),
            nonce_str: crate::utils::nonce_str(),
            package: format!("prepay_id={}", prepay_id),
            sign_type: "MD5".to_string(),
            pay_sign: String::new(),
        };
        params.pay_sign = sign_params(&params, &self.config.api_secret)?;
        Ok(params)
    }
}

#[async_trait]
impl WeixinApi for WeixinClient {
    async fn get_pay_code(
        &self,
        order: &WxOrder,
        client_ip: &str,
    ) -> Result<WxUnifiedOrderReply, WeixinError> {
        self.unified_order(&self.config.app_id, order, "NATIVE", client_ip, None)
            .await
    }

    async fn mini_program_place_order(
        &self,
        order: &WxOrder,
        code: &str,
    ) -> Result<WxJsapiParams, WeixinError> {
        let app_id = &self.config.mini_program_id;
        let openid = self.openid_from_code(SnsGrant::MiniProgram, code).await?;
        let prepay_id = self.prepay(app_id, order, "JSAPI", Some(&openid)).await?;
        self.jsapi_params(app_id, &prepay_id)
    }

    async fn app_place_order(&self, order: &WxOrder) -> Result<WxAppParams, WeixinError> {
        let app_id = &self.config.app_id;
        let prepay_id = self.prepay(app_id, order, "APP", None).await?;
        let mut params = WxAppParams {
            appid: app_id.clone(),
            partnerid: self.config.mch_id.clone(),
            prepayid: prepay_id,
            package: "Sign=WXPay".to_string(),
            noncestr: crate::utils::nonce_str(),
            timestamp: chrono::Utc::now().timestamp().to_string(),
            sign: String::new(),
        };
        params.sign = sign_params(&params, &self.config.api_secret)?;
        Ok(params)
    }

    async fn public_place_order(
        &self,
        order: &WxOrder,
        code: &str,
    ) -> Result<WxJsapiParams, WeixinError> {
        let app_id = &self.config.app_id;
        let openid = self.openid_from_code(SnsGrant::Public, code).await?;
        let prepay_id = self.prepay(app_id, order, "JSAPI", Some(&openid)).await?;
        self.jsapi_params(app_id, &prepay_id)
    }

    async fn micro_pay(
        &self,
        order: &WxOrder,
        auth_code: &str,
    ) -> Result<WxMicroPayReply, WeixinError> {
        let payload = MicroPayPayload {
            body: order.body,
            out_trade_no: order.trade_no,
            total_fee: order.fee.to_string(),
            spbill_create_ip: &self.config.spbill_create_ip,
            auth_code,
        };
        let request = V2ApiRequest::new(&self.config.app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/pay/micropay", request, false).await?;
        v2api::from_map(&m)
    }

    async fn query_order(&self, trade_no: &str) -> Result<WxOrderQueryReply, WeixinError> {
        let payload = OutTradeNoPayload {
            out_trade_no: trade_no,
        };
        let request = V2ApiRequest::new(&self.config.app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/pay/orderquery", request, false).await?;
        v2api::from_map(&m)
    }

    async fn refund(&self, refund: &WxRefund) -> Result<WxRefundReply, WeixinError> {
        let payload = RefundPayload {
            out_trade_no: refund.trade_no,
            out_refund_no: refund.out_refund_no,
            total_fee: refund.total_fee.to_string(),
            refund_fee: refund.refund_fee.to_string(),
            notify_url: refund.notify_url,
        };
        let request = V2ApiRequest::new(&self.config.app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/secapi/pay/refund", request, true).await?;
        v2api::from_map(&m)
    }

    async fn query_refund(
        &self,
        out_refund_no: &str,
    ) -> Result<WxRefundQueryReply, WeixinError> {
        let payload = OutRefundNoPayload { out_refund_no };
        let request = V2ApiRequest::new(&self.config.app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/pay/refundquery", request, false).await?;
        v2api::from_map(&m)
    }

    async fn reverse(&self, out_trade_no: &str) -> Result<WxReverseReply, WeixinError> {
        let payload = OutTradeNoPayload { out_trade_no };
        let request = V2ApiRequest::new(&self.config.app_id, &self.config.mch_id, &payload)?;
        let m = self.send_request("/secapi/pay/reverse", request, true).await?;
        v2api::from_map(&m)
    }

    fn verify_payment_notify(&self, xml: &str) -> Result<WxPaymentNotify, NotifyError> {
        notify::verify_payment_notify(xml, &self.config.api_secret)
    }

    fn decode_refund_notify(&self, xml: &str) -> Result<WxRefundNotify, NotifyError> {
        notify::decode_refund_notify(
            xml,
            &self.config.api_secret,
            self.config.allow_unsigned_refund_notify,
        )
    }

    fn payment_notification(&self, reply: &WxOrderQueryReply) -> Result<String, WeixinError> {
        notify::payment_notification(reply, &self.config.api_secret)
    }
}
