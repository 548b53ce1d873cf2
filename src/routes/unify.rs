use super::AppState;
use crate::{
    alipay::AliOrder,
    core::{Amount, GatewayError, Params, UnifyPayPageRequest, Validate},
    utils::{html_escape, url_decode, url_encode},
};
use axum::{
    extract::State,
    http::{header::USER_AGENT, HeaderMap},
    response::Html,
};

const OAUTH2_AUTHORIZE_URL: &str = "https://open.weixin.qq.com/connect/oauth2/authorize";

#[derive(Debug, PartialEq)]
enum Wallet {
    Weixin,
    Alipay,
}

/// 二合一码: 按扫码的 app 的 User-Agent 选择渠道
fn wallet_from_user_agent(user_agent: &str) -> Option<Wallet> {
    if user_agent.contains("MicroMessenger") || user_agent.contains("MQQBrowser") {
        Some(Wallet::Weixin)
    } else if user_agent.contains("AlipayClient") || user_agent.contains("UCBrowser") {
        Some(Wallet::Alipay)
    } else {
        None
    }
}

/**
 * 订单信息经 oauth2 的 state 带到 wxUnifyPay, 四段各自 url encode 后用逗号连接:
 * body,trade_no,notify_url,total_fee
 */
pub(super) fn encode_state(body: &str, trade_no: &str, notify_url: &str, total_fee: i64) -> String {
    [body, trade_no, notify_url]
        .iter()
        .map(|part| url_encode(part))
        .chain(std::iter::once(total_fee.to_string()))
        .collect::<Vec<_>>()
        .join(",")
}

pub(super) fn decode_state(state: &str) -> Result<UnifyPayPageRequest, GatewayError> {
    let invalid = || GatewayError::InvalidParam(format!("malformed state {:?}", state));
    let parts: Vec<String> = state
        .split(',')
        .map(url_decode)
        .collect::<Option<_>>()
        .ok_or_else(invalid)?;
    let [body, trade_no, notify_url, total_fee]: [String; 4] =
        parts.try_into().map_err(|_| invalid())?;
    let req = UnifyPayPageRequest {
        body,
        trade_no,
        notify_url,
        total_fee: Amount::from_fen_str(&total_fee).map_err(|_| invalid())?,
    };
    req.validate()?;
    Ok(req)
}

pub async fn unify_pay_page(
    State(state): State<AppState>,
    headers: HeaderMap,
    Params(req): Params<UnifyPayPageRequest>,
) -> Result<Html<String>, GatewayError> {
    let user_agent = headers
        .get(USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    tracing::info!(trade_no = req.trade_no.as_str(), user_agent, "unifyPayPage");

    match wallet_from_user_agent(user_agent) {
        Some(Wallet::Weixin) => {
            let weixin = &state.config.weixin;
            if weixin.oauth_redirect_url.is_empty() {
                return Err(GatewayError::Upstream(
                    "WX_OAUTH_REDIRECT_URL is not configured".into(),
                ));
            }
            let url = format!(
                "{}?appid={}&redirect_uri={}&response_type=code&scope=snsapi_base&state={}#wechat_redirect",
                OAUTH2_AUTHORIZE_URL,
                url_encode(&weixin.app_id),
                url_encode(&weixin.oauth_redirect_url),
                url_encode(&encode_state(
                    &req.body,
                    &req.trade_no,
                    &req.notify_url,
                    req.total_fee.fen()
                )),
            );
            Ok(Html(redirect_page(&url)))
        }
        Some(Wallet::Alipay) => {
            let order = AliOrder {
                subject: &req.body,
                trade_no: &req.trade_no,
                notify_url: Some(&req.notify_url),
                total_amount: req.total_fee,
            };
            Ok(Html(state.alipay.h5_pay(&order)?))
        }
        None => Err(GatewayError::InvalidParam(format!(
            "unsupported user agent {:?}, open with weixin or alipay",
            user_agent
        ))),
    }
}

fn redirect_page(url: &str) -> String {
    let url = html_escape(url);
    format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="0;url={url}">
<title>微信支付</title>
</head>
<body>
<a href="{url}">正在跳转...</a>
</body>
</html>"#
    )
}
