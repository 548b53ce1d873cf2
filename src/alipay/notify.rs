use super::openapi::openapi_rsa2;
use crate::core::{canonical_string, NotifyError};
use openssl::pkey::{PKey, Public};
use serde::Deserialize;
use std::collections::HashMap;

/// 异步通知里用到的字段, 其余字段只参与验签
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AlipayNotify {
    pub notify_time: String,
    pub notify_type: String,
    pub notify_id: String,
    pub app_id: String,
    pub trade_no: String,
    pub out_trade_no: String,
    pub buyer_logon_id: String,
    pub trade_status: String,
    pub total_amount: String,
    pub receipt_amount: String,
    pub refund_fee: String,
    pub gmt_payment: String,
}

/**
 * convert key1=value1&key2=value2 to HashMap
 * x-www-form-urlencoded 里的 + 是空格, 要在 url decode 之前还原,
 * 不然 decode 出来的 sign 里的 + 也会被当成空格
 */
pub fn parse_form(payload: &str) -> Result<HashMap<String, String>, NotifyError> {
    let payload = payload.trim().replace('+', " ");
    let mut m = HashMap::new();
    for pair in payload.split('&').filter(|pair| !pair.is_empty()) {
        let (key, val) = pair
            .split_once('=')
            .ok_or_else(|| NotifyError::Malformed(format!("bad form pair {:?}", pair)))?;
        let val = crate::utils::url_decode(val)
            .ok_or_else(|| NotifyError::Malformed(format!("bad utf8 in {}", key)))?;
        m.insert(key.to_string(), val);
    }
    if m.is_empty() {
        return Err(NotifyError::Malformed("empty notification".into()));
    }
    Ok(m)
}

/**
 * https://opendocs.alipay.com/open/203/105286
 * 去掉 sign 和 sign_type, 剩下的非空参数排序拼接后用支付宝公钥验 RSA2
 */
pub fn verify_notify(payload: &str, public_key: &PKey<Public>) -> Result<AlipayNotify, NotifyError> {
    let m = parse_form(payload)?;
    let signature = m
        .get("sign")
        .filter(|s| !s.is_empty())
        .ok_or(NotifyError::MissingSignature)?;
    match m.get("sign_type").map(|s| s.as_str()) {
        None | Some("RSA2") => {}
        Some(other) => {
            return Err(NotifyError::Malformed(format!("sign_type {} not supported", other)))
        }
    }
    let content = canonical_string(&m, &["sign", "sign_type"]);
    let verified = openapi_rsa2::verify(&content, signature, public_key)
        .map_err(|e| NotifyError::Malformed(e.to_string()))?;
    if !verified {
        return Err(NotifyError::Signature("wrong rsa2 signature".into()));
    }
    let v = serde_json::to_value(&m).map_err(|e| NotifyError::Malformed(e.to_string()))?;
    serde_json::from_value(v).map_err(|e| NotifyError::Malformed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::alipay_keys;

    fn notification(params: &[(&str, &str)]) -> String {
        let (private_key, _) = alipay_keys();
        let m: HashMap<String, String> = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let signature =
            openapi_rsa2::sign(&canonical_string(&m, &["sign", "sign_type"]), &private_key)
                .unwrap();
        let mut pairs: Vec<String> = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, crate::utils::url_encode(v)))
            .collect();
        pairs.push(format!("sign={}", crate::utils::url_encode(&signature)));
        pairs.push("sign_type=RSA2".to_string());
        pairs.join("&")
    }

    fn trade_success() -> Vec<(&'static str, &'static str)> {
        vec![
            ("notify_time", "2024-06-09 18:07:41"),
            ("notify_type", "trade_status_sync"),
            ("notify_id", "ac05099524730693a8b330c5ecf72da9786"),
            ("app_id", "2021000000"),
            ("trade_no", "2024060922001"),
            ("out_trade_no", "T100"),
            ("trade_status", "TRADE_SUCCESS"),
            ("total_amount", "10.00"),
            ("receipt_amount", "10.00"),
            ("subject", "测试 商品"),
        ]
    }

    #[test]
    fn verifies_signed_notification() {
        let (_, public_key) = alipay_keys();
        let body = notification(&trade_success());
        let notify = verify_notify(&body, &public_key).unwrap();
        assert_eq!(notify.out_trade_no, "T100");
        assert_eq!(notify.trade_status, "TRADE_SUCCESS");
        assert_eq!(notify.notify_time, "2024-06-09 18:07:41");
    }

    #[test]
    fn field_order_does_not_matter() {
        let (_, public_key) = alipay_keys();
        let body = notification(&trade_success());
        let mut pairs: Vec<&str> = body.split('&').collect();
        pairs.reverse();
        assert!(verify_notify(&pairs.join("&"), &public_key).is_ok());
    }

    #[test]
    fn plus_encoded_spaces_verify() {
        let (_, public_key) = alipay_keys();
        let body = notification(&trade_success());
        // 有的网关把空格编码成 + 而不是 %20
        let body = body.replace("%20", "+");
        assert!(verify_notify(&body, &public_key).is_ok());
    }

    #[test]
    fn tampered_notification_is_rejected() {
        let (_, public_key) = alipay_keys();
        let body = notification(&trade_success()).replace("10.00", "0.01");
        assert!(matches!(
            verify_notify(&body, &public_key),
            Err(NotifyError::Signature(_))
        ));

        let extra = format!("{}&refund_fee=10.00", notification(&trade_success()));
        assert!(matches!(
            verify_notify(&extra, &public_key),
            Err(NotifyError::Signature(_))
        ));
    }

    #[test]
    fn unsigned_or_garbage_notifications_fail() {
        let (_, public_key) = alipay_keys();
        assert_eq!(
            verify_notify("out_trade_no=T100&total_amount=10.00", &public_key).unwrap_err(),
            NotifyError::MissingSignature
        );
        assert!(matches!(
            verify_notify("", &public_key),
            Err(NotifyError::Malformed(_))
        ));
        assert!(matches!(
            verify_notify("out_trade_no=T100&sign=%%%", &public_key),
            Err(NotifyError::Signature(_))
        ));
        assert!(matches!(
            verify_notify("out_trade_no=T100&sign=abc&sign_type=RSA", &public_key),
            Err(NotifyError::Malformed(_))
        ));
        assert!(matches!(
            verify_notify("out_trade_no=T100&sign=bm90LWEtc2ln", &public_key),
            Err(NotifyError::Signature(_))
        ));
    }
}
