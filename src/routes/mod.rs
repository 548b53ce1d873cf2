mod alipay;
mod unify;
mod weixin;

use crate::{alipay::AlipayApi, config::GatewayConfig, poller::TradePoller, weixin::WeixinApi};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/**
 * 所有 handler 共享的只读状态, 渠道客户端以 trait object 注入, 测试里换成假实现
 */
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub weixin: Arc<dyn WeixinApi>,
    pub alipay: Arc<dyn AlipayApi>,
    pub poller: TradePoller,
}

async fn health() -> &'static str {
    "ok"
}

pub fn get_routes(state: AppState) -> Router {
    let wechat = Router::new()
        .route("/wxGetPayCode", post(weixin::get_pay_code))
        .route("/wxMinProgramPay", post(weixin::min_program_pay))
        .route("/wxAppPay", post(weixin::app_pay))
        .route("/wxUnifyPay", get(weixin::unify_pay))
        .route("/wxMicroPay", post(weixin::micro_pay))
        .route("/wxQueryTrade", post(weixin::query_trade))
        .route("/wxRefund", post(weixin::refund))
        .route("/wxQueryRefund", post(weixin::query_refund))
        .route("/wxPaymentNotifyVerify", post(weixin::payment_notify_verify))
        .route("/wxRefundNotifyDecode", post(weixin::refund_notify_decode))
        .route("/wxReverse", post(weixin::reverse));

    let alipay = Router::new()
        .route("/aliPayMicroPay", post(alipay::micro_pay))
        .route("/aliPayRefund", post(alipay::refund))
        .route("/aliPayQueryRefund", post(alipay::query_refund))
        .route("/AliPayVerifySign", post(alipay::verify_sign));

    Router::new()
        .route("/health", get(health))
        .route("/payService/unifyPayPage", post(unify::unify_pay_page))
        .nest("/payService/WeChat", wechat)
        .nest("/payService/AliPay", alipay)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{app_state, FakeAlipay, FakeWeixin, RecordingSink};
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    pub(super) fn app() -> Router {
        get_routes(app_state(
            Arc::new(FakeWeixin::default()),
            Arc::new(FakeAlipay::default()),
            Arc::new(RecordingSink::default()),
        ))
    }

    pub(super) fn form(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    pub(super) async fn json_body(app: Router, req: Request<Body>) -> serde_json::Value {
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_check() {
        let res = app()
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"ok");
    }

    #[tokio::test]
    async fn unknown_route_is_404() {
        let res = app()
            .oneshot(form("/payService/WeChat/wxNope", "a=b"))
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::NOT_FOUND);
    }
}
