use super::{Amount, GatewayError};
use axum::{
    async_trait,
    extract::{Form, FromRequest, Request},
    http::header::CONTENT_TYPE,
};
use serde::{de::DeserializeOwned, Deserialize};

/**
 * 每个接口一个参数结构体, 在边界上一次性解析 + 校验.
 * form 和 json 两种请求体都接受, 缺字段报 1001, 字段格式不对报 1002
 */
pub struct Params<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for Params<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = GatewayError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);
        let params: T = if is_json {
            let body = String::from_request(req, state)
                .await
                .map_err(|e| GatewayError::InvalidParam(e.body_text()))?;
            serde_json::from_str(&body).map_err(|e| rejection(e.to_string()))?
        } else {
            let Form(params) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| rejection(e.body_text()))?;
            params
        };
        params.validate()?;
        Ok(Params(params))
    }
}

fn rejection(msg: String) -> GatewayError {
    match missing_field(&msg) {
        Some(field) => GatewayError::MissingParam(field),
        None => GatewayError::InvalidParam(msg),
    }
}

/// serde 的缺字段错误形如 "missing field `trade_no`"
fn missing_field(msg: &str) -> Option<String> {
    let (_, rest) = msg.split_once("missing field `")?;
    let (field, _) = rest.split_once('`')?;
    Some(field.to_string())
}

pub trait Validate {
    fn validate(&self) -> Result<(), GatewayError>;
}

fn required(name: &str, value: &str) -> Result<(), GatewayError> {
    if value.trim().is_empty() {
        return Err(GatewayError::MissingParam(name.to_string()));
    }
    Ok(())
}

fn positive(name: &str, amount: Amount) -> Result<(), GatewayError> {
    if !amount.is_positive() {
        return Err(GatewayError::InvalidParam(format!(
            "{} must be a positive amount in fen",
            name
        )));
    }
    Ok(())
}

#[derive(Deserialize, Debug)]
pub struct WxPayCodeRequest {
    pub body: String,
    pub trade_no: String,
    pub notify_url: String,
    #[serde(rename = "clientIp")]
    pub client_ip: String,
    pub fee: Amount,
}

impl Validate for WxPayCodeRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("notify_url", &self.notify_url)?;
        required("clientIp", &self.client_ip)?;
        positive("fee", self.fee)
    }
}

#[derive(Deserialize, Debug)]
pub struct WxMinProgramPayRequest {
    pub body: String,
    pub trade_no: String,
    pub notify_url: String,
    pub code: String, // wx.login 拿到的 code
    pub fee: Amount,
}

impl Validate for WxMinProgramPayRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("notify_url", &self.notify_url)?;
        required("code", &self.code)?;
        positive("fee", self.fee)
    }
}

#[derive(Deserialize, Debug)]
pub struct WxAppPayRequest {
    pub body: String,
    pub trade_no: String,
    pub notify_url: String,
    pub fee: Amount,
}

impl Validate for WxAppPayRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("notify_url", &self.notify_url)?;
        positive("fee", self.fee)
    }
}

/// 公众号 oauth2 回跳带回来的参数, state 是 unifyPayPage 编进去的订单信息
#[derive(Deserialize, Debug)]
pub struct WxUnifyPayQuery {
    pub state: String,
    #[serde(default)]
    pub code: String,
}

/// 用户拒绝授权时回跳不带 code
impl Validate for WxUnifyPayQuery {
    fn validate(&self) -> Result<(), GatewayError> {
        required("state", &self.state)?;
        required("code", &self.code)
    }
}

#[derive(Deserialize, Debug)]
pub struct WxMicroPayRequest {
    pub body: String,
    pub trade_no: String,
    pub auth_code: String,
    pub notify_url: String,
    pub total_fee: Amount,
}

impl Validate for WxMicroPayRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("auth_code", &self.auth_code)?;
        required("notify_url", &self.notify_url)?;
        positive("total_fee", self.total_fee)
    }
}

#[derive(Deserialize, Debug)]
pub struct AliMicroPayRequest {
    pub body: String,
    pub trade_no: String,
    pub auth_code: String,
    pub total_fee: Amount,
}

impl Validate for AliMicroPayRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("auth_code", &self.auth_code)?;
        positive("total_fee", self.total_fee)
    }
}

#[derive(Deserialize, Debug)]
pub struct TradeQueryRequest {
    pub trade_no: String,
}

impl Validate for TradeQueryRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("trade_no", &self.trade_no)
    }
}

#[derive(Deserialize, Debug)]
pub struct WxRefundRequest {
    pub trade_no: String,
    pub out_refund_no: String,
    pub refund_fee: Amount,
    pub total_fee: Amount,
    pub notify_url: String,
}

impl Validate for WxRefundRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("trade_no", &self.trade_no)?;
        required("out_refund_no", &self.out_refund_no)?;
        required("notify_url", &self.notify_url)?;
        positive("refund_fee", self.refund_fee)?;
        positive("total_fee", self.total_fee)?;
        if self.refund_fee > self.total_fee {
            return Err(GatewayError::InvalidParam(format!(
                "refund_fee {} exceeds total_fee {}",
                self.refund_fee, self.total_fee
            )));
        }
        Ok(())
    }
}

#[derive(Deserialize, Debug)]
pub struct WxQueryRefundRequest {
    pub out_refund_no: String,
}

impl Validate for WxQueryRefundRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("out_refund_no", &self.out_refund_no)
    }
}

/// 商户转发过来的微信通知原文
#[derive(Deserialize, Debug)]
pub struct NotifyInfoRequest {
    pub notify_info: String,
}

impl Validate for NotifyInfoRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("notify_info", &self.notify_info)
    }
}

#[derive(Deserialize, Debug)]
pub struct WxReverseRequest {
    pub out_trade_no: String,
}

impl Validate for WxReverseRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("out_trade_no", &self.out_trade_no)
    }
}

#[derive(Deserialize, Debug)]
pub struct AliRefundRequest {
    pub trade_no: String,
    pub out_refund_no: String,
    pub refund_fee: Amount,
}

impl Validate for AliRefundRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("trade_no", &self.trade_no)?;
        required("out_refund_no", &self.out_refund_no)?;
        positive("refund_fee", self.refund_fee)
    }
}

#[derive(Deserialize, Debug)]
pub struct AliQueryRefundRequest {
    pub trade_no: String,
    pub out_refund_no: String,
}

impl Validate for AliQueryRefundRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("trade_no", &self.trade_no)?;
        required("out_refund_no", &self.out_refund_no)
    }
}

#[derive(Deserialize, Debug)]
pub struct UnifyPayPageRequest {
    pub body: String,
    pub trade_no: String,
    pub notify_url: String,
    pub total_fee: Amount,
}

impl Validate for UnifyPayPageRequest {
    fn validate(&self) -> Result<(), GatewayError> {
        required("body", &self.body)?;
        required("trade_no", &self.trade_no)?;
        required("notify_url", &self.notify_url)?;
        positive("total_fee", self.total_fee)
    }
}
