use super::{
    notify::{self, AlipayNotify},
    openapi::{
        self, AliRefundQueryReply, AliRefundReply, AliTradePayReply, OpenApiRequest,
        RefundBiz, RefundQueryBiz, TradePayBiz, WapPayBiz,
    },
    AliOrder, AliRefund, AlipayApi, AlipayConfig, AlipayError,
};
use crate::{core::NotifyError, utils::html_escape};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;

pub struct AlipayClient {
    config: AlipayConfig,
    http: reqwest::Client,
}

impl AlipayClient {
    pub fn new(config: AlipayConfig) -> Result<Self, AlipayError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AlipayError::InvalidConfig(format!("error building http client: {}", e)))?;
        Ok(Self { config, http })
    }

    fn signed_request<T: serde::Serialize>(
        &self,
        method: &str,
        biz: &T,
    ) -> Result<OpenApiRequest, AlipayError> {
        let mut request = OpenApiRequest::new(&self.config.app_id, method, biz)?;
        request.sign_rsa2(&self.config.private_key)?;
        Ok(request)
    }

    async fn send_request<R: DeserializeOwned>(
        &self,
        request: &OpenApiRequest,
    ) -> Result<R, AlipayError> {
        let res = self
            .http
            .post(&self.config.gateway_url)
            .query(request) // 参数放在 url 中
            .send()
            .await
            .map_err(|e| AlipayError::ApiError(format!("error request alipay openapi: {}", e)))?;
        let res_text = res.text().await.map_err(|e| {
            AlipayError::ApiError(format!("error read alipay openapi response: {}", e))
        })?;
        tracing::debug!(
            method = request.method.as_str(),
            response = res_text.as_str(),
            "alipay openapi response"
        );
        openapi::verify_response(&res_text, &request.method, &self.config.public_key)
    }
}

#[async_trait]
impl AlipayApi for AlipayClient {
    async fn scan_code_pay(
        &self,
        order: &AliOrder,
        auth_code: &str,
    ) -> Result<AliTradePayReply, AlipayError> {
        let biz = TradePayBiz {
            out_trade_no: order.trade_no,
            scene: "bar_code",
            auth_code,
            subject: order.subject,
            total_amount: order.total_amount.to_yuan_string(),
        };
        let request = self.signed_request("alipay.trade.pay", &biz)?;
        self.send_request(&request).await
    }

    async fn refund(&self, refund: &AliRefund) -> Result<AliRefundReply, AlipayError> {
        let biz = RefundBiz {
            out_trade_no: refund.trade_no,
            out_request_no: refund.out_refund_no,
            refund_amount: refund.refund_amount.to_yuan_string(),
        };
        let request = self.signed_request("alipay.trade.refund", &biz)?;
        self.send_request(&request).await
    }

    async fn query_refund(
        &self,
        trade_no: &str,
        out_refund_no: &str,
    ) -> Result<AliRefundQueryReply, AlipayError> {
        let biz = RefundQueryBiz {
            out_trade_no: trade_no,
            out_request_no: out_refund_no,
        };
        let request = self.signed_request("alipay.trade.fastpay.refund.query", &biz)?;
        self.send_request(&request).await
    }

    /**
     * 手机网站支付不走服务端请求, 生成一个自动提交到支付宝网关的表单
     */
    fn h5_pay(&self, order: &AliOrder) -> Result<String, AlipayError> {
        let biz = WapPayBiz {
            subject: order.subject,
            out_trade_no: order.trade_no,
            total_amount: order.total_amount.to_yuan_string(),
            product_code: "QUICK_WAP_WAY",
        };
        let mut request = OpenApiRequest::new(&self.config.app_id, "alipay.trade.wap.pay", &biz)?;
        request.notify_url = order.notify_url.map(|s| s.to_string());
        if !self.config.return_url.is_empty() {
            request.return_url = Some(self.config.return_url.clone());
        }
        request.sign_rsa2(&self.config.private_key)?;

        let mut params: Vec<(String, String)> = request.params()?.into_iter().collect();
        params.sort();
        let inputs: String = params
            .iter()
            .map(|(k, v)| {
                format!(
                    "<input type=\"hidden\" name=\"{}\" value=\"{}\"/>",
                    html_escape(k),
                    html_escape(v)
                )
            })
            .collect();
        Ok(format!(
            "<form id=\"alipaysubmit\" name=\"alipaysubmit\" action=\"{}?charset=utf-8\" method=\"POST\">{}<input type=\"submit\" value=\"ok\" style=\"display:none;\"></form><script>document.forms['alipaysubmit'].submit();</script>",
            html_escape(&self.config.gateway_url),
            inputs
        ))
    }

    fn verify_notify(&self, payload: &str) -> Result<AlipayNotify, NotifyError> {
        notify::verify_notify(payload, &self.config.public_key)
    }
}
