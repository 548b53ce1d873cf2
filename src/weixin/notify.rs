use super::{
    v2api::{self, v2api_sign, WxOrderQueryReply, WxPaymentNotify, WxRefundNotify},
    WeixinError,
};
use crate::core::NotifyError;
use openssl::symm::{decrypt, Cipher};
use std::collections::BTreeMap;

/**
 * 支付结果通知验签
 * https://pay.weixin.qq.com/wiki/doc/api/jsapi.php?chapter=9_7
 */
pub fn verify_payment_notify(xml: &str, api_secret: &str) -> Result<WxPaymentNotify, NotifyError> {
    let m = v2api::parse_xml(xml)?;
    v2api_sign::verify(&m, api_secret)?;
    v2api::from_map(&m).map_err(|e| NotifyError::Malformed(e.to_string()))
}

/**
 * 退款结果通知
 * https://pay.weixin.qq.com/wiki/doc/api/jsapi.php?chapter=9_16&index=10
 * 外层明文带 sign 时先验签, req_info 是 AES-256-ECB 密文, key 为 md5(商户密钥) 的小写 hex
 */
pub fn decode_refund_notify(
    xml: &str,
    api_secret: &str,
    allow_unsigned: bool,
) -> Result<WxRefundNotify, NotifyError> {
    let outer = v2api::parse_xml(xml)?;
    if outer.get("return_code").map(|s| s.as_str()) != Some("SUCCESS") {
        return Err(NotifyError::Malformed(format!(
            "return_code not SUCCESS: {}",
            outer.get("return_msg").map(|s| s.as_str()).unwrap_or_default()
        )));
    }
    match v2api_sign::verify(&outer, api_secret) {
        Err(NotifyError::MissingSignature) if allow_unsigned => {
            tracing::debug!("accepting unsigned refund notify envelope");
        }
        result => result?,
    }
    let req_info = outer
        .get("req_info")
        .filter(|s| !s.is_empty())
        .ok_or_else(|| NotifyError::Malformed("missing req_info".into()))?;

    let plaintext = decrypt_req_info(req_info, api_secret)?;
    let mut m = v2api::parse_xml(&plaintext)
        .map_err(|e| NotifyError::Decrypt(format!("decrypted req_info is not xml: {}", e)))?;
    for key in ["appid", "mch_id"] {
        if let Some(v) = outer.get(key) {
            m.entry(key.to_string()).or_insert_with(|| v.clone());
        }
    }
    v2api::from_map(&m).map_err(|e| NotifyError::Decrypt(e.to_string()))
}

pub fn decrypt_req_info(req_info: &str, api_secret: &str) -> Result<String, NotifyError> {
    // 经过一次 url decode 的通知里 + 会变成空格
    let encoded: String = req_info
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .map(|c| if c == ' ' { '+' } else { c })
        .collect();
    let ciphertext = data_encoding::BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| NotifyError::Decrypt(format!("[base64] {}", e)))?;
    let key = format!("{:x}", md5::compute(api_secret.as_bytes()));
    let plaintext = decrypt(Cipher::aes_256_ecb(), key.as_bytes(), None, &ciphertext)
        .map_err(|e| NotifyError::Decrypt(format!("[aes-256-ecb] {:?}", e)))?;
    String::from_utf8(plaintext).map_err(|e| NotifyError::Decrypt(format!("[utf8] {}", e)))
}

/**
 * 付款码支付没有异步通知, 轮询到成功后按支付结果通知的格式拼一条, 用商户密钥签名,
 * 商户可以直接拿去 wxPaymentNotifyVerify 验签
 */
pub fn payment_notification(
    reply: &WxOrderQueryReply,
    api_secret: &str,
) -> Result<String, WeixinError> {
    let fields = [
        ("return_code", &reply.base.return_code),
        ("result_code", &reply.base.result_code),
        ("appid", &reply.appid),
        ("mch_id", &reply.mch_id),
        ("openid", &reply.openid),
        ("trade_type", &reply.trade_type),
        ("bank_type", &reply.bank_type),
        ("total_fee", &reply.total_fee),
        ("cash_fee", &reply.cash_fee),
        ("coupon_fee", &reply.coupon_fee),
        ("transaction_id", &reply.transaction_id),
        ("out_trade_no", &reply.out_trade_no),
        ("time_end", &reply.time_end),
        ("trade_state", &reply.trade_state),
        ("trade_state_desc", &reply.trade_state_desc),
    ];
    let mut m: BTreeMap<String, String> = fields
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    m.insert("nonce_str".into(), crate::utils::nonce_str());
    let signature = v2api_sign::sign(&m, api_secret, v2api_sign::SignType::Md5)?;
    m.insert("sign".into(), signature);
    Ok(v2api::to_xml(&m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use openssl::symm::encrypt;

    const SECRET: &str = "192006250b4c09247ec02edce69f6a2d";

    fn encrypt_req_info(plaintext: &str, api_secret: &str) -> String {
        let key = format!("{:x}", md5::compute(api_secret.as_bytes()));
        let ciphertext =
            encrypt(Cipher::aes_256_ecb(), key.as_bytes(), None, plaintext.as_bytes()).unwrap();
        data_encoding::BASE64.encode(&ciphertext)
    }

    fn refund_plaintext() -> &'static str {
        "<root><out_refund_no><![CDATA[R100]]></out_refund_no>\
         <out_trade_no><![CDATA[T100]]></out_trade_no>\
         <refund_status><![CDATA[SUCCESS]]></refund_status>\
         <refund_fee><![CDATA[500]]></refund_fee>\
         <total_fee><![CDATA[1000]]></total_fee></root>"
    }

    fn refund_envelope(req_info: &str, sign_with: Option<&str>) -> String {
        let mut m = BTreeMap::new();
        m.insert("return_code".to_string(), "SUCCESS".to_string());
        m.insert("appid".to_string(), "wx1".to_string());
        m.insert("mch_id".to_string(), "mch1".to_string());
        m.insert("nonce_str".to_string(), "abc".to_string());
        m.insert("req_info".to_string(), req_info.to_string());
        if let Some(key) = sign_with {
            let signature = v2api_sign::sign(&m, key, v2api_sign::SignType::Md5).unwrap();
            m.insert("sign".to_string(), signature);
        }
        v2api::to_xml(&m)
    }

    #[test]
    fn decrypts_signed_refund_notify() {
        let req_info = encrypt_req_info(refund_plaintext(), SECRET);
        let xml = refund_envelope(&req_info, Some(SECRET));
        let notify = decode_refund_notify(&xml, SECRET, false).unwrap();
        assert_eq!(notify.out_refund_no, "R100");
        assert_eq!(notify.refund_status, "SUCCESS");
        assert_eq!(notify.refund_fee, "500");
        assert_eq!(notify.mch_id, "mch1");
    }

    #[test]
    fn restores_plus_signs_mangled_into_spaces() {
        let req_info = encrypt_req_info(refund_plaintext(), SECRET);
        let mangled = req_info.replace('+', " ");
        let plaintext = decrypt_req_info(&mangled, SECRET).unwrap();
        assert_eq!(plaintext, refund_plaintext());
    }

    #[test]
    fn unsigned_envelope_depends_on_configuration() {
        let req_info = encrypt_req_info(refund_plaintext(), SECRET);
        let xml = refund_envelope(&req_info, None);
        assert_eq!(
            decode_refund_notify(&xml, SECRET, false).unwrap_err(),
            NotifyError::MissingSignature
        );
        assert!(decode_refund_notify(&xml, SECRET, true).is_ok());
    }

    #[test]
    fn decryption_and_signature_failures_are_distinct() {
        // req_info encrypted with another merchant key, envelope correctly signed
        let foreign = encrypt_req_info(refund_plaintext(), "another-secret");
        let xml = refund_envelope(&foreign, Some(SECRET));
        let decrypt_err = decode_refund_notify(&xml, SECRET, false).unwrap_err();
        assert!(matches!(decrypt_err, NotifyError::Decrypt(_)));

        // correct ciphertext, envelope signed with the wrong key
        let req_info = encrypt_req_info(refund_plaintext(), SECRET);
        let xml = refund_envelope(&req_info, Some("another-secret"));
        let sign_err = decode_refund_notify(&xml, SECRET, false).unwrap_err();
        assert!(matches!(sign_err, NotifyError::Signature(_)));

        // garbage base64
        let xml = refund_envelope("%%%not-base64%%%", Some(SECRET));
        assert!(matches!(
            decode_refund_notify(&xml, SECRET, false).unwrap_err(),
            NotifyError::Decrypt(_)
        ));
    }

    #[test]
    fn generated_payment_notification_verifies() {
        let reply = WxOrderQueryReply {
            base: v2api::WxReturn {
                return_code: "SUCCESS".into(),
                result_code: "SUCCESS".into(),
                ..Default::default()
            },
            out_trade_no: "T100".into(),
            transaction_id: "4200001".into(),
            trade_state: "SUCCESS".into(),
            total_fee: "1000".into(),
            ..Default::default()
        };
        let xml = payment_notification(&reply, SECRET).unwrap();
        let notify = verify_payment_notify(&xml, SECRET).unwrap();
        assert_eq!(notify.out_trade_no, "T100");
        assert_eq!(notify.total_fee, "1000");
        assert_eq!(notify.trade_state, "SUCCESS");

        let tampered = xml.replace("1000", "1");
        assert!(matches!(
            verify_payment_notify(&tampered, SECRET),
            Err(NotifyError::Signature(_))
        ));
    }
}
