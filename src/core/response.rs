use super::{err_code, Amount, AmountError, GatewayError, RefundState, TradeState};
use crate::{
    alipay::{AliRefundQueryReply, AliRefundReply, AliReturn, AliTradePayReply, AlipayNotify},
    weixin::{
        WxMicroPayReply, WxOrderQueryReply, WxPaymentNotify, WxRefundNotify, WxRefundQueryReply,
        WxRefundReply, WxReturn, WxReverseReply, WxUnifiedOrderReply,
    },
};
use axum::{
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/**
 * 统一的应答格式 {err_code, err_msg, ...业务字段}, HTTP 状态码总是 200
 */
#[derive(Serialize, Debug)]
pub struct Envelope<T: Serialize> {
    pub err_code: i32,
    pub err_msg: String,
    #[serde(flatten)]
    pub data: T,
}

impl<T: Serialize> Envelope<T> {
    pub fn ok(data: T) -> Self {
        Envelope {
            err_code: err_code::OK,
            err_msg: "OK".to_string(),
            data,
        }
    }

    /// 业务字段照抄, err_code 由渠道自己的返回码决定
    pub fn from_provider<R>(reply: R) -> Result<Self, GatewayError>
    where
        R: ProviderReturn,
        T: TryFrom<R, Error = AmountError>,
    {
        let status = reply.status();
        let data = T::try_from(reply)?;
        Ok(Envelope {
            err_code: status.code,
            err_msg: status.msg,
            data,
        })
    }
}

impl<T: Serialize> IntoResponse for Envelope<T> {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStatus {
    pub code: i32,
    pub msg: String,
}

impl ProviderStatus {
    fn ok(msg: &str) -> Self {
        ProviderStatus {
            code: err_code::OK,
            msg: msg.to_string(),
        }
    }

    fn failed(msg: String) -> Self {
        ProviderStatus {
            code: err_code::CALL_PAYMENT,
            msg,
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == err_code::OK
    }
}

/// 渠道应答里的返回码, 只有渠道明确说成功才算 0
pub trait ProviderReturn {
    fn status(&self) -> ProviderStatus;
}

impl ProviderReturn for WxReturn {
    fn status(&self) -> ProviderStatus {
        if self.return_code != "SUCCESS" {
            let msg = if self.return_msg.is_empty() {
                format!("weixin return_code {:?}", self.return_code)
            } else {
                self.return_msg.clone()
            };
            return ProviderStatus::failed(msg);
        }
        if self.result_code != "SUCCESS" {
            let msg = match (self.err_code_des.is_empty(), self.err_code.is_empty()) {
                (false, _) => self.err_code_des.clone(),
                (true, false) => self.err_code.clone(),
                (true, true) => format!("weixin result_code {:?}", self.result_code),
            };
            return ProviderStatus::failed(msg);
        }
        ProviderStatus::ok("OK")
    }
}

impl ProviderReturn for AliReturn {
    fn status(&self) -> ProviderStatus {
        match self.code.as_str() {
            "10000" => ProviderStatus::ok(if self.msg.is_empty() {
                "Success"
            } else {
                self.msg.as_str()
            }),
            "" => ProviderStatus::failed("missing alipay response".to_string()),
            code => {
                let msg = if self.sub_msg.is_empty() {
                    self.msg.as_str()
                } else {
                    self.sub_msg.as_str()
                };
                let sub_code = if self.sub_code.is_empty() {
                    code
                } else {
                    self.sub_code.as_str()
                };
                ProviderStatus::failed(format!("[{}] {}", sub_code, msg))
            }
        }
    }
}

macro_rules! provider_return_via_base {
    ($($reply:ty),* $(,)?) => {
        $(
            impl ProviderReturn for $reply {
                fn status(&self) -> ProviderStatus {
                    self.base.status()
                }
            }
        )*
    };
}

provider_return_via_base!(
    WxUnifiedOrderReply,
    WxMicroPayReply,
    WxOrderQueryReply,
    WxRefundReply,
    WxRefundQueryReply,
    WxReverseReply,
    AliTradePayReply,
    AliRefundReply,
    AliRefundQueryReply,
);

// ---------------------------------------------------------------- weixin

#[derive(Serialize, Debug)]
pub struct WxPayCodeResponse {
    pub code_url: String,
    pub prepay_id: String,
}

impl TryFrom<WxUnifiedOrderReply> for WxPayCodeResponse {
    type Error = AmountError;
    fn try_from(r: WxUnifiedOrderReply) -> Result<Self, Self::Error> {
        Ok(WxPayCodeResponse {
            code_url: r.code_url,
            prepay_id: r.prepay_id,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxMicroPayResponse {
    pub state: TradeState,
    pub openid: String,
    pub trade_type: String,
    pub bank_type: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub total_fee: Amount,
    pub cash_fee: Amount,
}

impl TryFrom<WxMicroPayReply> for WxMicroPayResponse {
    type Error = AmountError;
    fn try_from(r: WxMicroPayReply) -> Result<Self, Self::Error> {
        let state = if r.base.status().is_success() {
            TradeState::Paid
        } else if r.result_unknown() {
            TradeState::Pending
        } else {
            TradeState::Failed
        };
        Ok(WxMicroPayResponse {
            state,
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            cash_fee: Amount::from_fen_str(&r.cash_fee)?,
            openid: r.openid,
            trade_type: r.trade_type,
            bank_type: r.bank_type,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            time_end: r.time_end,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxQueryTradeResponse {
    pub state: TradeState,
    pub trade_state: String,
    pub trade_state_desc: String,
    pub openid: String,
    pub trade_type: String,
    pub bank_type: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub total_fee: Amount,
    pub cash_fee: Amount,
}

impl TryFrom<WxOrderQueryReply> for WxQueryTradeResponse {
    type Error = AmountError;
    fn try_from(r: WxOrderQueryReply) -> Result<Self, Self::Error> {
        Ok(WxQueryTradeResponse {
            state: TradeState::from_weixin(&r.trade_state),
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            cash_fee: Amount::from_fen_str(&r.cash_fee)?,
            trade_state: r.trade_state,
            trade_state_desc: r.trade_state_desc,
            openid: r.openid,
            trade_type: r.trade_type,
            bank_type: r.bank_type,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            time_end: r.time_end,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxRefundResponse {
    pub transaction_id: String,
    pub out_trade_no: String,
    pub out_refund_no: String,
    pub refund_id: String,
    pub total_fee: Amount,
    pub refund_fee: Amount,
    pub cash_fee: Amount,
}

impl TryFrom<WxRefundReply> for WxRefundResponse {
    type Error = AmountError;
    fn try_from(r: WxRefundReply) -> Result<Self, Self::Error> {
        Ok(WxRefundResponse {
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            refund_fee: Amount::from_fen_str(&r.refund_fee)?,
            cash_fee: Amount::from_fen_str(&r.cash_fee)?,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            out_refund_no: r.out_refund_no,
            refund_id: r.refund_id,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxQueryRefundResponse {
    pub state: RefundState,
    pub refund_status: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub refund_id: String,
    pub out_refund_no: String,
    pub total_fee: Amount,
    pub refund_fee: Amount,
}

impl TryFrom<WxRefundQueryReply> for WxQueryRefundResponse {
    type Error = AmountError;
    fn try_from(r: WxRefundQueryReply) -> Result<Self, Self::Error> {
        Ok(WxQueryRefundResponse {
            state: RefundState::from_weixin(&r.refund_status),
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            refund_fee: Amount::from_fen_str(&r.refund_fee)?,
            refund_status: r.refund_status,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            refund_id: r.refund_id,
            out_refund_no: r.out_refund_no,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxReverseResponse {
    pub recall: bool, // true 时需要再调一次撤销
}

impl TryFrom<WxReverseReply> for WxReverseResponse {
    type Error = AmountError;
    fn try_from(r: WxReverseReply) -> Result<Self, Self::Error> {
        Ok(WxReverseResponse {
            recall: r.recall == "Y",
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxPaymentNotifyInfo {
    pub state: TradeState,
    pub appid: String,
    pub mch_id: String,
    pub openid: String,
    pub trade_type: String,
    pub total_fee: Amount,
    pub cash_fee: Amount,
    pub coupon_fee: Amount,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub trade_state: String,
    pub trade_state_desc: String,
}

impl TryFrom<WxPaymentNotify> for WxPaymentNotifyInfo {
    type Error = AmountError;
    fn try_from(r: WxPaymentNotify) -> Result<Self, Self::Error> {
        // 微信的支付通知不带 trade_state, 轮询生成的通知带
        let state = match r.trade_state.as_str() {
            "" if r.base.status().is_success() => TradeState::Paid,
            "" => TradeState::Failed,
            trade_state => TradeState::from_weixin(trade_state),
        };
        Ok(WxPaymentNotifyInfo {
            state,
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            cash_fee: Amount::from_fen_str(&r.cash_fee)?,
            coupon_fee: Amount::from_fen_str(&r.coupon_fee)?,
            appid: r.appid,
            mch_id: r.mch_id,
            openid: r.openid,
            trade_type: r.trade_type,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            time_end: r.time_end,
            trade_state: r.trade_state,
            trade_state_desc: r.trade_state_desc,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct WxRefundNotifyInfo {
    pub state: RefundState,
    pub appid: String,
    pub mch_id: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub refund_id: String,
    pub out_refund_no: String,
    pub total_fee: Amount,
    pub settlement_total_fee: Amount,
    pub refund_fee: Amount,
    pub settlement_refund_fee: Amount,
    pub refund_status: String,
    pub success_time: String,
    pub refund_recv_accout: String,
    pub refund_account: String,
    pub refund_request_source: String,
}

impl TryFrom<WxRefundNotify> for WxRefundNotifyInfo {
    type Error = AmountError;
    fn try_from(r: WxRefundNotify) -> Result<Self, Self::Error> {
        Ok(WxRefundNotifyInfo {
            state: RefundState::from_weixin(&r.refund_status),
            total_fee: Amount::from_fen_str(&r.total_fee)?,
            settlement_total_fee: Amount::from_fen_str(&r.settlement_total_fee)?,
            refund_fee: Amount::from_fen_str(&r.refund_fee)?,
            settlement_refund_fee: Amount::from_fen_str(&r.settlement_refund_fee)?,
            appid: r.appid,
            mch_id: r.mch_id,
            transaction_id: r.transaction_id,
            out_trade_no: r.out_trade_no,
            refund_id: r.refund_id,
            out_refund_no: r.out_refund_no,
            refund_status: r.refund_status,
            success_time: r.success_time,
            refund_recv_accout: r.refund_recv_accout,
            refund_account: r.refund_account,
            refund_request_source: r.refund_request_source,
        })
    }
}

// ---------------------------------------------------------------- alipay

#[derive(Serialize, Debug)]
pub struct AliMicroPayResponse {
    pub state: TradeState,
    pub trade_no: String,
    pub out_trade_no: String,
    pub buyer_logon_id: String,
    pub total_amount: Amount,
    pub receipt_amount: Amount,
    pub gmt_payment: String,
}

impl TryFrom<AliTradePayReply> for AliMicroPayResponse {
    type Error = AmountError;
    fn try_from(r: AliTradePayReply) -> Result<Self, Self::Error> {
        // 10003: 等待用户付款
        let state = match r.base.code.as_str() {
            "10000" => TradeState::Paid,
            "10003" => TradeState::Pending,
            _ => TradeState::Failed,
        };
        Ok(AliMicroPayResponse {
            state,
            total_amount: Amount::from_yuan_str(&r.total_amount)?,
            receipt_amount: Amount::from_yuan_str(&r.receipt_amount)?,
            trade_no: r.trade_no,
            out_trade_no: r.out_trade_no,
            buyer_logon_id: r.buyer_logon_id,
            gmt_payment: r.gmt_payment,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct AliRefundResponse {
    pub state: RefundState,
    pub trade_no: String,
    pub out_trade_no: String,
    pub fund_change: String,
    pub refund_fee: Amount,
    pub gmt_refund_pay: String,
}

impl TryFrom<AliRefundReply> for AliRefundResponse {
    type Error = AmountError;
    fn try_from(r: AliRefundReply) -> Result<Self, Self::Error> {
        let state = if r.fund_change == "Y" {
            RefundState::Success
        } else {
            RefundState::Pending
        };
        Ok(AliRefundResponse {
            state,
            refund_fee: Amount::from_yuan_str(&r.refund_fee)?,
            fund_change: r.fund_change,
            trade_no: r.trade_no,
            out_trade_no: r.out_trade_no,
            gmt_refund_pay: r.gmt_refund_pay,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct AliQueryRefundResponse {
    pub state: RefundState,
    pub trade_no: String,
    pub out_trade_no: String,
    pub out_request_no: String,
    pub total_amount: Amount,
    pub refund_amount: Amount,
    pub refund_status: String,
}

impl TryFrom<AliRefundQueryReply> for AliQueryRefundResponse {
    type Error = AmountError;
    fn try_from(r: AliRefundQueryReply) -> Result<Self, Self::Error> {
        // 老接口查询成功但不返回 refund_status, 有退款金额就是退款成功
        let state = match r.refund_status.as_str() {
            "" if !r.refund_amount.is_empty() => RefundState::Success,
            status => RefundState::from_alipay(status),
        };
        Ok(AliQueryRefundResponse {
            state,
            total_amount: Amount::from_yuan_str(&r.total_amount)?,
            refund_amount: Amount::from_yuan_str(&r.refund_amount)?,
            trade_no: r.trade_no,
            out_trade_no: r.out_trade_no,
            out_request_no: r.out_request_no,
            refund_status: r.refund_status,
        })
    }
}

#[derive(Serialize, Debug)]
pub struct AlipayNotifyInfo {
    pub state: TradeState,
    pub notify_time: String,
    pub notify_type: String,
    pub notify_id: String,
    pub app_id: String,
    pub trade_no: String,
    pub out_trade_no: String,
    pub buyer_logon_id: String,
    pub trade_status: String,
    pub total_amount: Amount,
    pub receipt_amount: Amount,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refund_fee: Option<Amount>,
    pub gmt_payment: String,
}

impl TryFrom<AlipayNotify> for AlipayNotifyInfo {
    type Error = AmountError;
    fn try_from(r: AlipayNotify) -> Result<Self, Self::Error> {
        let refund_fee = match r.refund_fee.as_str() {
            "" => None,
            fee => Some(Amount::from_yuan_str(fee)?),
        };
        Ok(AlipayNotifyInfo {
            state: TradeState::from_alipay(&r.trade_status),
            total_amount: Amount::from_yuan_str(&r.total_amount)?,
            receipt_amount: Amount::from_yuan_str(&r.receipt_amount)?,
            refund_fee,
            notify_time: r.notify_time,
            notify_type: r.notify_type,
            notify_id: r.notify_id,
            app_id: r.app_id,
            trade_no: r.trade_no,
            out_trade_no: r.out_trade_no,
            buyer_logon_id: r.buyer_logon_id,
            trade_status: r.trade_status,
            gmt_payment: r.gmt_payment,
        })
    }
}
