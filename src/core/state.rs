use serde::Serialize;

/// Provider independent trade status. The provider's own vocabulary is passed
/// through next to it.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TradeState {
    Created,
    Pending,
    Paid,
    Closed,
    Refunded,
    Failed,
    Unknown,
}

impl TradeState {
    /**
     * SUCCESS: 支付成功, REFUND: 转入退款, NOTPAY: 未支付, CLOSED: 已关闭,
     * REVOKED: 已撤销(刷卡支付), USERPAYING: 用户支付中, PAYERROR: 支付失败
     */
    pub fn from_weixin(trade_state: &str) -> Self {
        match trade_state {
            "SUCCESS" => TradeState::Paid,
            "REFUND" => TradeState::Refunded,
            "NOTPAY" => TradeState::Created,
            "CLOSED" | "REVOKED" => TradeState::Closed,
            "USERPAYING" => TradeState::Pending,
            "PAYERROR" => TradeState::Failed,
            _ => TradeState::Unknown,
        }
    }

    /**
     * WAIT_BUYER_PAY: 交易创建, TRADE_CLOSED: 关闭, TRADE_SUCCESS: 完成,
     * TRADE_FINISHED: 交易结束不可退款
     */
    pub fn from_alipay(trade_status: &str) -> Self {
        match trade_status {
            "WAIT_BUYER_PAY" => TradeState::Created,
            "TRADE_SUCCESS" | "TRADE_FINISHED" => TradeState::Paid,
            "TRADE_CLOSED" => TradeState::Closed,
            _ => TradeState::Unknown,
        }
    }
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RefundState {
    Pending,
    Success,
    Failed,
    Unknown,
}

impl RefundState {
    /// SUCCESS: 退款成功, PROCESSING: 退款处理中, CHANGE: 退款异常, REFUNDCLOSE: 退款关闭
    pub fn from_weixin(refund_status: &str) -> Self {
        match refund_status {
            "SUCCESS" => RefundState::Success,
            "PROCESSING" => RefundState::Pending,
            "CHANGE" | "REFUNDCLOSE" => RefundState::Failed,
            _ => RefundState::Unknown,
        }
    }

    pub fn from_alipay(refund_status: &str) -> Self {
        match refund_status {
            "REFUND_SUCCESS" => RefundState::Success,
            _ => RefundState::Unknown,
        }
    }
}
