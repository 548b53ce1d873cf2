use super::{unify, AppState};
use crate::{
    core::{
        Envelope, GatewayError, NotifyInfoRequest, Params, ProviderReturn, TradeQueryRequest,
        WxAppPayRequest, WxMicroPayRequest, WxMicroPayResponse, WxMinProgramPayRequest,
        WxPayCodeRequest, WxPayCodeResponse, WxPaymentNotifyInfo, WxQueryRefundRequest,
        WxQueryRefundResponse, WxQueryTradeResponse, WxRefundNotifyInfo, WxRefundRequest,
        WxRefundResponse, WxReverseRequest, WxReverseResponse, WxUnifyPayQuery,
    },
    weixin::{WxAppParams, WxJsapiParams, WxOrder, WxRefund},
};
use axum::{extract::State, response::Html};

pub async fn get_pay_code(
    State(state): State<AppState>,
    Params(req): Params<WxPayCodeRequest>,
) -> Result<Envelope<WxPayCodeResponse>, GatewayError> {
    tracing::info!(trade_no = req.trade_no.as_str(), fee = req.fee.fen(), "wxGetPayCode");
    let order = WxOrder {
        body: &req.body,
        trade_no: &req.trade_no,
        notify_url: &req.notify_url,
        fee: req.fee,
    };
    let reply = state.weixin.get_pay_code(&order, &req.client_ip).await?;
    Envelope::from_provider(reply)
}

pub async fn min_program_pay(
    State(state): State<AppState>,
    Params(req): Params<WxMinProgramPayRequest>,
) -> Result<Envelope<WxJsapiParams>, GatewayError> {
    tracing::info!(trade_no = req.trade_no.as_str(), fee = req.fee.fen(), "wxMinProgramPay");
    let order = WxOrder {
        body: &req.body,
        trade_no: &req.trade_no,
        notify_url: &req.notify_url,
        fee: req.fee,
    };
    let params = state
        .weixin
        .mini_program_place_order(&order, &req.code)
        .await?;
    Ok(Envelope::ok(params))
}

pub async fn app_pay(
    State(state): State<AppState>,
    Params(req): Params<WxAppPayRequest>,
) -> Result<Envelope<WxAppParams>, GatewayError> {
    tracing::info!(trade_no = req.trade_no.as_str(), fee = req.fee.fen(), "wxAppPay");
    let order = WxOrder {
        body: &req.body,
        trade_no: &req.trade_no,
        notify_url: &req.notify_url,
        fee: req.fee,
    };
    let params = state.weixin.app_place_order(&order).await?;
    Ok(Envelope::ok(params))
}

/**
 * 公众号 oauth2 回跳到这里, state 里是 unifyPayPage 编码的订单, 用 code 下单后返回调起支付的页面
 */
pub async fn unify_pay(
    State(state): State<AppState>,
    Params(query): Params<WxUnifyPayQuery>,
) -> Result<Html<String>, GatewayError> {
    let req = unify::decode_state(&query.state)?;
    tracing::info!(trade_no = req.trade_no.as_str(), "wxUnifyPay");
    let order = WxOrder {
        body: &req.body,
        trade_no: &req.trade_no,
        notify_url: &req.notify_url,
        fee: req.total_fee,
    };
    let params = state.weixin.public_place_order(&order, &query.code).await?;
    Ok(Html(jsapi_page(&params)?))
}

fn jsapi_page(params: &WxJsapiParams) -> Result<String, GatewayError> {
    let json = serde_json::to_string(params)
        .map_err(|e| GatewayError::Upstream(format!("error serializing jsapi params: {}", e)))?
        .replace("</", "<\\/");
    Ok(format!(
        r#"<!DOCTYPE html>
<html>
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>微信支付</title>
</head>
<body>
<p id="status">正在调起支付...</p>
<script>
function onBridgeReady() {{
  WeixinJSBridge.invoke('getBrandWCPayRequest', {json}, function (res) {{
    var paid = res.err_msg == 'get_brand_wcpay_request:ok';
    document.getElementById('status').innerText = paid ? '支付成功' : '支付未完成';
  }});
}}
if (typeof WeixinJSBridge == 'undefined') {{
  document.addEventListener('WeixinJSBridgeReady', onBridgeReady, false);
}} else {{
  onBridgeReady();
}}
</script>
</body>
</html>"#
    ))
}

/// 付款码支付受理或者用户支付中时, 在后台查单直到成功
pub async fn micro_pay(
    State(state): State<AppState>,
    Params(req): Params<WxMicroPayRequest>,
) -> Result<Envelope<WxMicroPayResponse>, GatewayError> {
    tracing::info!(
        trade_no = req.trade_no.as_str(),
        total_fee = req.total_fee.fen(),
        "wxMicroPay"
    );
    let order = WxOrder {
        body: &req.body,
        trade_no: &req.trade_no,
        notify_url: &req.notify_url,
        fee: req.total_fee,
    };
    let reply = state.weixin.micro_pay(&order, &req.auth_code).await?;
    if reply.status().is_success() || reply.result_unknown() {
        if let Err(e) = state.poller.spawn(&req.trade_no, &req.notify_url) {
            tracing::warn!(trade_no = req.trade_no.as_str(), "trade poller not started: {}", e);
        }
    }
    Envelope::from_provider(reply)
}

pub async fn query_trade(
    State(state): State<AppState>,
    Params(req): Params<TradeQueryRequest>,
) -> Result<Envelope<WxQueryTradeResponse>, GatewayError> {
    tracing::info!(trade_no = req.trade_no.as_str(), "wxQueryTrade");
    let reply = state.weixin.query_order(&req.trade_no).await?;
    Envelope::from_provider(reply)
}

pub async fn refund(
    State(state): State<AppState>,
    Params(req): Params<WxRefundRequest>,
) -> Result<Envelope<WxRefundResponse>, GatewayError> {
    tracing::info!(
        trade_no = req.trade_no.as_str(),
        out_refund_no = req.out_refund_no.as_str(),
        refund_fee = req.refund_fee.fen(),
        "wxRefund"
    );
    let refund = WxRefund {
        trade_no: &req.trade_no,
        out_refund_no: &req.out_refund_no,
        notify_url: &req.notify_url,
        total_fee: req.total_fee,
        refund_fee: req.refund_fee,
    };
    let reply = state.weixin.refund(&refund).await?;
    Envelope::from_provider(reply)
}

pub async fn query_refund(
    State(state): State<AppState>,
    Params(req): Params<WxQueryRefundRequest>,
) -> Result<Envelope<WxQueryRefundResponse>, GatewayError> {
    tracing::info!(out_refund_no = req.out_refund_no.as_str(), "wxQueryRefund");
    let reply = state.weixin.query_refund(&req.out_refund_no).await?;
    Envelope::from_provider(reply)
}

pub async fn payment_notify_verify(
    State(state): State<AppState>,
    Params(req): Params<NotifyInfoRequest>,
) -> Result<Envelope<WxPaymentNotifyInfo>, GatewayError> {
    let notify = state.weixin.verify_payment_notify(&req.notify_info)?;
    tracing::info!(
        out_trade_no = notify.out_trade_no.as_str(),
        "wxPaymentNotifyVerify"
    );
    Ok(Envelope::ok(WxPaymentNotifyInfo::try_from(notify)?))
}

pub async fn refund_notify_decode(
    State(state): State<AppState>,
    Params(req): Params<NotifyInfoRequest>,
) -> Result<Envelope<WxRefundNotifyInfo>, GatewayError> {
    let notify = state.weixin.decode_refund_notify(&req.notify_info)?;
    tracing::info!(
        out_refund_no = notify.out_refund_no.as_str(),
        refund_status = notify.refund_status.as_str(),
        "wxRefundNotifyDecode"
    );
    Ok(Envelope::ok(WxRefundNotifyInfo::try_from(notify)?))
}

pub async fn reverse(
    State(state): State<AppState>,
    Params(req): Params<WxReverseRequest>,
) -> Result<Envelope<WxReverseResponse>, GatewayError> {
    tracing::info!(out_trade_no = req.out_trade_no.as_str(), "wxReverse");
    let reply = state.weixin.reverse(&req.out_trade_no).await?;
    Envelope::from_provider(reply)
}
