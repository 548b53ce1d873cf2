use axum::Router;
use dotenvy::dotenv;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

mod alipay;
mod config;
mod core;
mod poller;
mod routes;
#[cfg(test)]
mod testing;
mod utils;
mod weixin;

#[tokio::main]
async fn main() {
    dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run().await {
        tracing::error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = config::GatewayConfig::from_env()?;
    tracing::info!(?config, "loaded config");

    let weixin: Arc<dyn weixin::WeixinApi> =
        Arc::new(weixin::WeixinClient::new(config.weixin.clone())?);
    let alipay: Arc<dyn alipay::AlipayApi> =
        Arc::new(alipay::AlipayClient::new(config.alipay.clone())?);
    let poller = poller::TradePoller::new(
        weixin.clone(),
        Arc::new(poller::HttpNotifySink::new()?),
        config.poller.clone(),
    );

    let state = routes::AppState {
        config: Arc::new(config.clone()),
        weixin,
        alipay,
        poller: poller.clone(),
    };
    let app = Router::new().merge(routes::get_routes(state)).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .into_inner(),
    );

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!(addr = %config.addr, "pay gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 不再接受新请求之后再等后台查单结束
    poller.shutdown().await;
    tracing::info!("pay gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("error listening for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!("error listening for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received ctrl-c, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
