use super::AlipayError;
use crate::core::canonical_string;
use openssl::pkey::{PKey, Private, Public};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::value::RawValue;
use std::collections::HashMap;

pub mod openapi_rsa2 {
    use super::*;
    use openssl::{
        hash::MessageDigest,
        sign::{Signer, Verifier},
    };

    pub fn sign(content: &str, private_key: &PKey<Private>) -> Result<String, AlipayError> {
        let mut signer = Signer::new(MessageDigest::sha256(), private_key)?;
        signer.update(content.as_bytes())?;
        let signature_bytes = signer.sign_to_vec()?;
        Ok(data_encoding::BASE64.encode(&signature_bytes))
    }

    /// 签名不是合法 base64 或长度不对也算验签失败, 返回 Ok(false)
    pub fn verify(
        content: &str,
        signature: &str,
        public_key: &PKey<Public>,
    ) -> Result<bool, AlipayError> {
        let signature_bytes = match data_encoding::BASE64.decode(signature.trim().as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(false),
        };
        let mut verifier = Verifier::new(MessageDigest::sha256(), public_key)?;
        verifier.update(content.as_bytes())?;
        Ok(verifier.verify(&signature_bytes).unwrap_or(false))
    }
}

/**
 * 支付宝后台给的密钥一般是不带头尾的 base64, 也兼容完整的 PEM 文件
 */
pub fn load_private_key(text: &str) -> Result<PKey<Private>, AlipayError> {
    let text = text.trim();
    let key = if text.starts_with("-----BEGIN") {
        PKey::private_key_from_pem(text.as_bytes())?
    } else {
        PKey::private_key_from_der(&decode_key_body(text)?)?
    };
    Ok(key)
}

pub fn load_public_key(text: &str) -> Result<PKey<Public>, AlipayError> {
    let text = text.trim();
    let key = if text.starts_with("-----BEGIN") {
        PKey::public_key_from_pem(text.as_bytes())?
    } else {
        PKey::public_key_from_der(&decode_key_body(text)?)?
    };
    Ok(key)
}

fn decode_key_body(text: &str) -> Result<Vec<u8>, AlipayError> {
    let body: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    Ok(data_encoding::BASE64.decode(body.as_bytes())?)
}

#[derive(Debug, Serialize)]
pub struct OpenApiRequest {
    pub app_id: String,
    pub method: String,
    pub format: String,
    pub charset: String,
    pub sign_type: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub sign: String,
    pub timestamp: String,
    pub version: String,
    pub biz_content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub return_url: Option<String>,
}

impl OpenApiRequest {
    pub fn new<T: Serialize>(app_id: &str, method: &str, biz: &T) -> Result<Self, AlipayError> {
        let biz_content = serde_json::to_string(biz)
            .map_err(|e| AlipayError::Unexpected(format!("malformed biz_content: {}", e)))?;
        Ok(Self {
            app_id: app_id.to_string(),
            method: method.to_string(),
            format: String::from("JSON"),
            charset: String::from("utf-8"),
            sign_type: String::from("RSA2"),
            sign: String::new(),
            timestamp: chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            version: String::from("1.0"),
            biz_content,
            notify_url: None,
            return_url: None,
        })
    }

    pub fn params(&self) -> Result<HashMap<String, String>, AlipayError> {
        let v = serde_json::to_value(self)
            .map_err(|e| AlipayError::Unexpected(format!("malformed openapi request: {}", e)))?;
        serde_json::from_value(v)
            .map_err(|e| AlipayError::Unexpected(format!("malformed openapi request: {}", e)))
    }

    pub fn sign_rsa2(&mut self, private_key: &PKey<Private>) -> Result<String, AlipayError> {
        self.sign.clear();
        let m = self.params()?;
        let signature = openapi_rsa2::sign(&canonical_string(&m, &["sign"]), private_key)?;
        self.sign = signature.clone();
        Ok(signature)
    }
}

/**
 * 同步应答 {"alipay_trade_pay_response": {...}, "sign": "..."}
 * 签名是对 xxx_response 节点的原始 json 文本做的, 所以要保留原文, 不能先反序列化再拼.
 * 业务失败时支付宝可能只返回 error_response 且不带签名, 这种情况照常返回给调用方;
 * code 为 10000 的成功应答必须带签名
 */
pub fn verify_response<T: DeserializeOwned>(
    res_text: &str,
    method: &str,
    public_key: &PKey<Public>,
) -> Result<T, AlipayError> {
    let node_name = format!("{}_response", method.replace('.', "_"));
    let m: HashMap<String, Box<RawValue>> = serde_json::from_str(res_text).map_err(|e| {
        AlipayError::ApiError(format!("error deserialize alipay openapi response: {}", e))
    })?;
    let node = m
        .get(&node_name)
        .or_else(|| m.get("error_response"))
        .ok_or_else(|| AlipayError::ApiError(format!("missing {} in alipay response", node_name)))?;
    let signature: Option<String> = match m.get("sign") {
        Some(raw) => Some(serde_json::from_str(raw.get()).map_err(|e| {
            AlipayError::ApiError(format!("malformed sign in alipay response: {}", e))
        })?),
        None => None,
    };

    match signature {
        Some(signature) => {
            if !openapi_rsa2::verify(node.get(), &signature, public_key)? {
                return Err(AlipayError::Signature(format!("wrong rsa2 signature on {}", node_name)));
            }
        }
        None => {
            let base: AliReturn = serde_json::from_str(node.get()).unwrap_or_default();
            if base.code == "10000" {
                return Err(AlipayError::Signature(format!("unsigned {}", node_name)));
            }
            tracing::warn!(method, code = base.code.as_str(), "alipay returned an unsigned error response");
        }
    }

    serde_json::from_str(node.get())
        .map_err(|e| AlipayError::ApiError(format!("unexpected {}: {}", node_name, e)))
}

/// 公共响应参数 https://opendocs.alipay.com/common/02km9f
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AliReturn {
    pub code: String,
    pub msg: String,
    pub sub_code: String,
    pub sub_msg: String,
}

/// alipay.trade.pay 统一收单交易支付 (付款码)
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AliTradePayReply {
    #[serde(flatten)]
    pub base: AliReturn,
    pub trade_no: String,
    pub out_trade_no: String,
    pub buyer_logon_id: String,
    pub total_amount: String,   // 元
    pub receipt_amount: String, // 元
    pub gmt_payment: String,
}

/**
 * alipay.trade.refund
 * code=10000 只代表退款请求成功, fund_change=Y 才是退款成功
 */
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AliRefundReply {
    #[serde(flatten)]
    pub base: AliReturn,
    pub trade_no: String,
    pub out_trade_no: String,
    pub buyer_logon_id: String,
    pub fund_change: String,
    pub refund_fee: String, // 该笔交易累计退款金额, 元
    pub gmt_refund_pay: String,
}

/// alipay.trade.fastpay.refund.query
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct AliRefundQueryReply {
    #[serde(flatten)]
    pub base: AliReturn,
    pub trade_no: String,
    pub out_trade_no: String,
    pub out_request_no: String,
    pub total_amount: String,
    pub refund_amount: String,
    pub refund_status: String, // REFUND_SUCCESS, 没有这个字段时按 refund_amount 判断
}

#[derive(Serialize, Debug)]
pub struct TradePayBiz<'a> {
    pub out_trade_no: &'a str,
    pub scene: &'static str, // bar_code
    pub auth_code: &'a str,
    pub subject: &'a str,
    pub total_amount: String,
}

#[derive(Serialize, Debug)]
pub struct RefundBiz<'a> {
    pub out_trade_no: &'a str,
    pub out_request_no: &'a str,
    pub refund_amount: String,
}

#[derive(Serialize, Debug)]
pub struct RefundQueryBiz<'a> {
    pub out_trade_no: &'a str,
    pub out_request_no: &'a str,
}

#[derive(Serialize, Debug)]
pub struct WapPayBiz<'a> {
    pub subject: &'a str,
    pub out_trade_no: &'a str,
    pub total_amount: String,
    pub product_code: &'static str, // QUICK_WAP_WAY
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::alipay_keys;

    fn signed_response(node_name: &str, node: &str, private_key: &PKey<Private>) -> String {
        let signature = openapi_rsa2::sign(node, private_key).unwrap();
        format!(r#"{{"{}":{},"sign":"{}"}}"#, node_name, node, signature)
    }

    #[test]
    fn loads_bare_base64_and_pem_keys() {
        let (private_key, public_key) = alipay_keys();
        let private_der = private_key.private_key_to_der().unwrap();
        let public_der = public_key.public_key_to_der().unwrap();
        let bare = data_encoding::BASE64.encode(&private_der);
        assert!(load_private_key(&bare).is_ok());
        let pem = String::from_utf8(public_key.public_key_to_pem().unwrap()).unwrap();
        let loaded = load_public_key(&pem).unwrap();
        assert_eq!(loaded.public_key_to_der().unwrap(), public_der);
        assert!(load_public_key("not a key").is_err());
    }

    #[test]
    fn request_signature_covers_every_param_but_sign() {
        let (private_key, public_key) = alipay_keys();
        let biz = RefundQueryBiz {
            out_trade_no: "T100",
            out_request_no: "R100",
        };
        let mut request = OpenApiRequest::new("2021000000", "alipay.trade.fastpay.refund.query", &biz)
            .unwrap();
        let signature = request.sign_rsa2(&private_key).unwrap();
        let m = request.params().unwrap();
        assert_eq!(m["sign"], signature);
        let content = canonical_string(&m, &["sign"]);
        assert!(content.contains("sign_type=RSA2"));
        assert!(openapi_rsa2::verify(&content, &signature, &public_key).unwrap());
    }

    #[test]
    fn verifies_response_over_raw_node_text() {
        let (private_key, public_key) = alipay_keys();
        // 字段顺序和空格都要按原文验签
        let node = r#"{"code":"10000","msg":"Success","trade_no":"2024","out_trade_no":"T100", "total_amount":"10.00"}"#;
        let res_text = signed_response("alipay_trade_pay_response", node, &private_key);
        let reply: AliTradePayReply =
            verify_response(&res_text, "alipay.trade.pay", &public_key).unwrap();
        assert_eq!(reply.base.code, "10000");
        assert_eq!(reply.total_amount, "10.00");

        let tampered = res_text.replace("10.00", "0.01");
        assert!(matches!(
            verify_response::<AliTradePayReply>(&tampered, "alipay.trade.pay", &public_key),
            Err(AlipayError::Signature(_))
        ));
    }

    #[test]
    fn unsigned_success_is_rejected_but_unsigned_error_passes() {
        let (_, public_key) = alipay_keys();
        let unsigned_success =
            r#"{"alipay_trade_refund_response":{"code":"10000","msg":"Success"}}"#;
        assert!(matches!(
            verify_response::<AliRefundReply>(unsigned_success, "alipay.trade.refund", &public_key),
            Err(AlipayError::Signature(_))
        ));

        let unsigned_error = r#"{"error_response":{"code":"40002","msg":"Invalid Arguments","sub_code":"isv.invalid-app-id","sub_msg":"无效的AppID参数"}}"#;
        let reply: AliRefundReply =
            verify_response(unsigned_error, "alipay.trade.refund", &public_key).unwrap();
        assert_eq!(reply.base.code, "40002");
        assert_eq!(reply.base.sub_code, "isv.invalid-app-id");
    }
}
