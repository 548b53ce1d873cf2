use crate::weixin::WeixinApi;
use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio_util::{sync::CancellationToken, task::TaskTracker};

#[derive(Debug, Clone)]
pub struct PollerConfig {
    pub interval: Duration,  // 两次查询之间的间隔
    pub max_attempts: u32,   // 最多查询次数
    pub max_concurrent: usize,
    pub drain: Duration,     // 停机时等待轮询结束的时间, 超时后取消
}

impl Default for PollerConfig {
    fn default() -> Self {
        PollerConfig {
            interval: Duration::from_secs(2),
            max_attempts: 15,
            max_concurrent: 256,
            drain: Duration::from_secs(30),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum PollerError {
    #[error("{0} trade pollers already running")]
    Saturated(usize),
    #[error("gateway is shutting down")]
    ShuttingDown,
    #[error("[Notify Delivery Failed] {0}")]
    Delivery(String),
}

/// 轮询成功后把通知推给商户
#[async_trait]
pub trait NotifySink: Send + Sync {
    async fn deliver(&self, url: &str, body: String) -> Result<(), PollerError>;
}

pub struct HttpNotifySink {
    http: reqwest::Client,
}

impl HttpNotifySink {
    pub fn new() -> Result<Self, PollerError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| PollerError::Delivery(format!("error building http client: {}", e)))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl NotifySink for HttpNotifySink {
    async fn deliver(&self, url: &str, body: String) -> Result<(), PollerError> {
        let res = self
            .http
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "text/xml; charset=utf-8")
            .body(body)
            .send()
            .await
            .map_err(|e| PollerError::Delivery(format!("error posting to {}: {}", url, e)))?;
        if !res.status().is_success() {
            return Err(PollerError::Delivery(format!(
                "{} answered {}",
                url,
                res.status()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, PartialEq)]
enum PollOutcome {
    Delivered,
    DeliveryFailed,
    Exhausted,
    Cancelled,
}

/**
 * 付款码支付可能要等用户输密码, 下单后在后台定时查单, 查到成功就给商户推一条通知.
 * 每笔订单一个后台任务, 同时运行的任务数有上限, 停机时先等一会再取消
 */
#[derive(Clone)]
pub struct TradePoller {
    inner: Arc<Inner>,
}

struct Inner {
    weixin: Arc<dyn WeixinApi>,
    sink: Arc<dyn NotifySink>,
    config: PollerConfig,
    permits: Arc<Semaphore>,
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl TradePoller {
    pub fn new(weixin: Arc<dyn WeixinApi>, sink: Arc<dyn NotifySink>, config: PollerConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrent));
        TradePoller {
            inner: Arc::new(Inner {
                weixin,
                sink,
                config,
                permits,
                tracker: TaskTracker::new(),
                cancel: CancellationToken::new(),
            }),
        }
    }

    /// 不等待轮询结果, 调用方的应答不受影响
    pub fn spawn(&self, trade_no: &str, notify_url: &str) -> Result<(), PollerError> {
        if self.inner.cancel.is_cancelled() || self.inner.tracker.is_closed() {
            return Err(PollerError::ShuttingDown);
        }
        let permit = self
            .inner
            .permits
            .clone()
            .try_acquire_owned()
            .map_err(|_| PollerError::Saturated(self.inner.config.max_concurrent))?;
        let inner = self.inner.clone();
        let trade_no = trade_no.to_string();
        let notify_url = notify_url.to_string();
        self.inner.tracker.spawn(async move {
            let _permit = permit;
            let outcome = inner.poll(&trade_no, &notify_url).await;
            tracing::debug!(trade_no = trade_no.as_str(), ?outcome, "trade poller finished");
        });
        Ok(())
    }

    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.tracker.close();
        tracing::info!(running = inner.tracker.len(), "draining trade pollers");
        if tokio::time::timeout(inner.config.drain, inner.tracker.wait())
            .await
            .is_err()
        {
            tracing::warn!(
                running = inner.tracker.len(),
                "trade pollers still running after drain, cancelling"
            );
            inner.cancel.cancel();
            inner.tracker.wait().await;
        }
    }
}

impl Inner {
    async fn poll(&self, trade_no: &str, notify_url: &str) -> PollOutcome {
        let max_attempts = self.config.max_attempts;
        for attempt in 1..=max_attempts {
            match self.weixin.query_order(trade_no).await {
                Ok(reply) if reply.is_paid() => return self.deliver(trade_no, notify_url, &reply).await,
                Ok(reply) => {
                    tracing::debug!(
                        trade_no,
                        attempt,
                        trade_state = reply.trade_state.as_str(),
                        "trade not paid yet"
                    );
                }
                // 查询失败和未支付一样处理, 下一轮再查
                Err(e) => tracing::warn!(trade_no, attempt, "error querying trade: {}", e),
            }
            if attempt == max_attempts {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!(trade_no, attempt, "trade poller cancelled");
                    return PollOutcome::Cancelled;
                }
                _ = tokio::time::sleep(self.config.interval) => {}
            }
        }
        tracing::info!(trade_no, max_attempts, "trade not paid after polling, giving up");
        PollOutcome::Exhausted
    }

    async fn deliver(
        &self,
        trade_no: &str,
        notify_url: &str,
        reply: &crate::weixin::WxOrderQueryReply,
    ) -> PollOutcome {
        let body = match self.weixin.payment_notification(reply) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!(trade_no, "error building payment notification: {}", e);
                return PollOutcome::DeliveryFailed;
            }
        };
        match self.sink.deliver(notify_url, body).await {
            Ok(()) => {
                tracing::info!(trade_no, notify_url, "payment notification delivered");
                PollOutcome::Delivered
            }
            Err(e) => {
                tracing::warn!(trade_no, notify_url, "{}", e);
                PollOutcome::DeliveryFailed
            }
        }
    }
}
