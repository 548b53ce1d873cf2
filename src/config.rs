use crate::{
    alipay::{load_private_key, load_public_key, AlipayConfig},
    poller::PollerConfig,
    weixin::WeixinConfig,
};
use std::{net::SocketAddr, str::FromStr, time::Duration};
use thiserror::Error;
use tokio::sync::Semaphore;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value for {key}: {msg}")]
    Invalid { key: &'static str, msg: String },
    #[error("error reading {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/**
 * 启动时从环境变量 (.env) 构建一次, 之后通过 AppState 只读共享
 */
#[derive(Clone)]
pub struct GatewayConfig {
    pub addr: SocketAddr,
    pub weixin: WeixinConfig,
    pub alipay: AlipayConfig,
    pub poller: PollerConfig,
}

impl GatewayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(lookup);

        let weixin = WeixinConfig {
            app_id: env.required("WX_APP_ID")?,
            mch_id: env.required("WX_MCH_ID")?,
            app_secret: env.required("WX_APP_SECRET")?,
            api_secret: env.required("WX_API_SECRET")?,
            mini_program_id: env.or("WX_MIN_PROGRAM_ID", ""),
            mini_program_secret: env.or("WX_MIN_PROGRAM_SECRET", ""),
            client_cert: env.optional_file("WX_CLIENT_CERT_PATH", "resource/apiclient_cert.pem")?,
            client_key: env.optional_file("WX_CLIENT_KEY_PATH", "resource/apiclient_key.pem")?,
            spbill_create_ip: env.or("WX_SPBILL_CREATE_IP", "127.0.0.1"),
            oauth_redirect_url: env.or("WX_OAUTH_REDIRECT_URL", ""),
            api_base: env.or("WX_API_BASE", "https://api.mch.weixin.qq.com"),
            open_api_base: env.or("WX_OPEN_API_BASE", "https://api.weixin.qq.com"),
            allow_unsigned_refund_notify: env.parse("WX_ALLOW_UNSIGNED_REFUND_NOTIFY", false)?,
        };

        let private_key_path = env.or("ALIPAY_PRIVATE_KEY_PATH", "resource/alipay_private.txt");
        let public_key_path = env.or("ALIPAY_PUBLIC_KEY_PATH", "resource/alipay_public.txt");
        let alipay = AlipayConfig {
            app_id: env.required("ALIPAY_APP_ID")?,
            private_key: load_private_key(&read_file(&private_key_path)?).map_err(|e| {
                ConfigError::Invalid {
                    key: "ALIPAY_PRIVATE_KEY_PATH",
                    msg: e.to_string(),
                }
            })?,
            public_key: load_public_key(&read_file(&public_key_path)?).map_err(|e| {
                ConfigError::Invalid {
                    key: "ALIPAY_PUBLIC_KEY_PATH",
                    msg: e.to_string(),
                }
            })?,
            gateway_url: env.or("ALIPAY_GATEWAY_URL", "https://openapi.alipay.com/gateway.do"),
            return_url: env.or("ALIPAY_RETURN_URL", ""),
        };

        let defaults = PollerConfig::default();
        let poller = PollerConfig {
            interval: Duration::from_secs(
                env.parse("POLLER_INTERVAL_SECS", defaults.interval.as_secs())?,
            ),
            max_attempts: env.parse("POLLER_MAX_ATTEMPTS", defaults.max_attempts)?,
            max_concurrent: env.parse("POLLER_MAX_CONCURRENT", defaults.max_concurrent)?,
            drain: Duration::from_secs(env.parse("POLLER_DRAIN_SECS", defaults.drain.as_secs())?),
        };
        if poller.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                key: "POLLER_MAX_ATTEMPTS",
                msg: "must be positive".into(),
            });
        }
        // Semaphore::new 超过 MAX_PERMITS 会 panic
        if poller.max_concurrent == 0 || poller.max_concurrent > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid {
                key: "POLLER_MAX_CONCURRENT",
                msg: format!("must be between 1 and {}", Semaphore::MAX_PERMITS),
            });
        }

        Ok(GatewayConfig {
            addr: env.parse("PAY_GATEWAY_ADDR", SocketAddr::from(([0, 0, 0, 0], 8003)))?,
            weixin,
            alipay,
            poller,
        })
    }
}

/// 密钥和证书不打印
impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("addr", &self.addr)
            .field("wx_app_id", &self.weixin.app_id)
            .field("wx_mch_id", &self.weixin.mch_id)
            .field("alipay_app_id", &self.alipay.app_id)
            .field("poller", &self.poller)
            .finish()
    }
}

struct Env<F>(F);

impl<F: Fn(&str) -> Option<String>> Env<F> {
    fn get(&self, key: &str) -> Option<String> {
        (self.0)(key).filter(|v| !v.trim().is_empty())
    }

    fn required(&self, key: &'static str) -> Result<String, ConfigError> {
        self.get(key).ok_or(ConfigError::Missing(key))
    }

    fn or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    fn parse<T>(&self, key: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            Some(v) => v.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
                key,
                msg: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    /// 证书只有退款和撤销用得到, 文件不存在时不报错
    fn optional_file(&self, key: &str, default: &str) -> Result<Option<String>, ConfigError> {
        let path = self.or(key, default);
        if !std::path::Path::new(&path).exists() {
            tracing::warn!(path = path.as_str(), "{} not found", key);
            return Ok(None);
        }
        read_file(&path).map(Some)
    }
}

fn read_file(path: &str) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })
}
