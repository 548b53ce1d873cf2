use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use thiserror::Error;

pub mod err_code {
    pub const OK: i32 = 0;
    pub const LACK_PARAM: i32 = 1001; // 缺少参数
    pub const INVALID_PARAM: i32 = 1002; // 参数无效
    pub const CALL_PAYMENT: i32 = 1003; // 调用支付渠道失败
    pub const VERIFY_SIGN: i32 = 1004; // 验签失败
    pub const DECRYPT: i32 = 1005; // 解密失败
}

/**
 * Everything a handler can fail with. Completed calls always answer HTTP 200,
 * the failure is carried in `err_code` / `err_msg`.
 */
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("missing parameter: {0}")]
    MissingParam(String),
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("{0}")]
    Upstream(String),
    #[error("signature verification failed: {0}")]
    Signature(String),
    #[error("decryption failed: {0}")]
    Decrypt(String),
}

impl GatewayError {
    pub fn err_code(&self) -> i32 {
        match self {
            GatewayError::MissingParam(_) => err_code::LACK_PARAM,
            GatewayError::InvalidParam(_) => err_code::INVALID_PARAM,
            GatewayError::Upstream(_) => err_code::CALL_PAYMENT,
            GatewayError::Signature(_) => err_code::VERIFY_SIGN,
            GatewayError::Decrypt(_) => err_code::DECRYPT,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        tracing::error!(err_code = self.err_code(), "{:?}", self);
        let body = json!({
            "err_code": self.err_code(),
            "err_msg": self.to_string(),
        });
        (StatusCode::OK, Json(body)).into_response()
    }
}

/**
 * Failures of the notification verifiers. Decryption and signature problems are
 * kept apart so callers can tell a wrong key from a forged message.
 */
#[derive(Error, Debug, PartialEq)]
pub enum NotifyError {
    #[error("malformed notification: {0}")]
    Malformed(String),
    #[error("notification is not signed")]
    MissingSignature,
    #[error("signature mismatch: {0}")]
    Signature(String),
    #[error("{0}")]
    Decrypt(String),
}

impl From<NotifyError> for GatewayError {
    fn from(e: NotifyError) -> GatewayError {
        match e {
            NotifyError::Decrypt(msg) => GatewayError::Decrypt(msg),
            e => GatewayError::Signature(e.to_string()),
        }
    }
}

impl From<super::AmountError> for GatewayError {
    fn from(e: super::AmountError) -> GatewayError {
        GatewayError::Upstream(format!("unexpected amount in provider response: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notify_errors_map_to_distinct_codes() {
        let decrypt: GatewayError = NotifyError::Decrypt("bad padding".into()).into();
        let signature: GatewayError = NotifyError::Signature("md5".into()).into();
        let unsigned: GatewayError = NotifyError::MissingSignature.into();
        assert_eq!(decrypt.err_code(), err_code::DECRYPT);
        assert_eq!(signature.err_code(), err_code::VERIFY_SIGN);
        assert_eq!(unsigned.err_code(), err_code::VERIFY_SIGN);
    }

    #[tokio::test]
    async fn errors_are_reported_with_http_200() {
        let response = GatewayError::MissingParam("trade_no".into()).into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["err_code"], 1001);
        assert_eq!(body["err_msg"], "missing parameter: trade_no");
    }
}
