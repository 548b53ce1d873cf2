use super::AppState;
use crate::{
    alipay::{AliOrder, AliRefund},
    core::{
        AliMicroPayRequest, AliMicroPayResponse, AliQueryRefundRequest, AliQueryRefundResponse,
        AliRefundRequest, AliRefundResponse, AlipayNotifyInfo, Envelope, GatewayError, Params,
    },
};
use axum::extract::State;

pub async fn micro_pay(
    State(state): State<AppState>,
    Params(req): Params<AliMicroPayRequest>,
) -> Result<Envelope<AliMicroPayResponse>, GatewayError> {
    tracing::info!(
        trade_no = req.trade_no.as_str(),
        total_fee = req.total_fee.fen(),
        "aliPayMicroPay"
    );
    let order = AliOrder {
        subject: &req.body,
        trade_no: &req.trade_no,
        notify_url: None,
        total_amount: req.total_fee,
    };
    let reply = state.alipay.scan_code_pay(&order, &req.auth_code).await?;
    Envelope::from_provider(reply)
}

pub async fn refund(
    State(state): State<AppState>,
    Params(req): Params<AliRefundRequest>,
) -> Result<Envelope<AliRefundResponse>, GatewayError> {
    tracing::info!(
        trade_no = req.trade_no.as_str(),
        out_refund_no = req.out_refund_no.as_str(),
        refund_fee = req.refund_fee.fen(),
        "aliPayRefund"
    );
    let refund = AliRefund {
        trade_no: &req.trade_no,
        out_refund_no: &req.out_refund_no,
        refund_amount: req.refund_fee,
    };
    let reply = state.alipay.refund(&refund).await?;
    Envelope::from_provider(reply)
}

pub async fn query_refund(
    State(state): State<AppState>,
    Params(req): Params<AliQueryRefundRequest>,
) -> Result<Envelope<AliQueryRefundResponse>, GatewayError> {
    tracing::info!(
        trade_no = req.trade_no.as_str(),
        out_refund_no = req.out_refund_no.as_str(),
        "aliPayQueryRefund"
    );
    let reply = state
        .alipay
        .query_refund(&req.trade_no, &req.out_refund_no)
        .await?;
    Envelope::from_provider(reply)
}

/// 商户原样转发支付宝的异步通知 body
pub async fn verify_sign(
    State(state): State<AppState>,
    body: String,
) -> Result<Envelope<AlipayNotifyInfo>, GatewayError> {
    let notify = state.alipay.verify_notify(&body)?;
    tracing::info!(
        out_trade_no = notify.out_trade_no.as_str(),
        trade_status = notify.trade_status.as_str(),
        "AliPayVerifySign"
    );
    Ok(Envelope::ok(AlipayNotifyInfo::try_from(notify)?))
}
