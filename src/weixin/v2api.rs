use super::WeixinError;
use crate::core::NotifyError;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub mod v2api_sign {
    use crate::core::{canonical_string, signature_eq, NotifyError};
    use openssl::{error::ErrorStack, hash::MessageDigest, pkey::PKey, sign::Signer};
    use std::collections::HashMap;

    #[derive(Debug, Clone, Copy, PartialEq)]
    pub enum SignType {
        Md5,
        HmacSha256,
    }

    impl SignType {
        /// 没有 sign_type 字段时默认 MD5
        pub fn from_field(sign_type: Option<&String>) -> Option<Self> {
            match sign_type.map(|s| s.as_str()) {
                None | Some("") | Some("MD5") => Some(SignType::Md5),
                Some("HMAC-SHA256") => Some(SignType::HmacSha256),
                Some(_) => None,
            }
        }
    }

    /**
     * https://pay.weixin.qq.com/wiki/doc/api/jsapi.php?chapter=4_3
     * 除 sign 以外的非空字段参与签名, 最后拼上 &key=商户密钥
     */
    pub fn sign<'a, I>(m: I, sign_key: &str, sign_type: SignType) -> Result<String, ErrorStack>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        let sign_source = format!("{}&key={}", canonical_string(m, &["sign"]), sign_key);
        let signature = match sign_type {
            SignType::Md5 => format!("{:x}", md5::compute(sign_source.as_bytes())).to_uppercase(),
            SignType::HmacSha256 => {
                let pkey = PKey::hmac(sign_key.as_bytes())?;
                let mut signer = Signer::new(MessageDigest::sha256(), &pkey)?;
                signer.update(sign_source.as_bytes())?;
                data_encoding::HEXUPPER.encode(&signer.sign_to_vec()?)
            }
        };
        Ok(signature)
    }

    pub fn verify(m: &HashMap<String, String>, sign_key: &str) -> Result<(), NotifyError> {
        let signature = m
            .get("sign")
            .filter(|s| !s.is_empty())
            .ok_or(NotifyError::MissingSignature)?;
        let sign_type = SignType::from_field(m.get("sign_type")).ok_or_else(|| {
            NotifyError::Malformed(format!("unsupported sign_type {:?}", m.get("sign_type")))
        })?;
        let expected = sign(m, sign_key, sign_type)
            .map_err(|e| NotifyError::Malformed(format!("[openssl] {:?}", e)))?;
        if !signature_eq(&expected, &signature.to_uppercase()) {
            return Err(NotifyError::Signature("wrong weixin signature".into()));
        }
        Ok(())
    }
}

/**
 * 把 <xml><k>v</k>...</xml> 的一层子节点读成 map, 文本和 CDATA 都接受.
 * 根节点的名字不限 (支付通知是 xml, 退款通知解密后是 root)
 */
pub fn parse_xml(payload: &str) -> Result<HashMap<String, String>, NotifyError> {
    use quick_xml::events::Event;

    let mut m = HashMap::<String, String>::new();
    let mut reader = quick_xml::Reader::from_str(payload);
    reader.config_mut().trim_text(true);
    let mut depth = 0usize;
    let mut key: Option<String> = None;
    let mut value = String::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                depth += 1;
                if depth == 2 {
                    key = Some(String::from_utf8_lossy(e.name().as_ref()).into_owned());
                    value.clear();
                }
            }
            Ok(Event::Empty(e)) => {
                if depth == 1 {
                    let key = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                    m.insert(key, String::new());
                }
            }
            Ok(Event::Text(text)) => {
                if depth == 2 {
                    let text = text
                        .unescape()
                        .map_err(|e| NotifyError::Malformed(format!("bad xml text: {}", e)))?;
                    value.push_str(&text);
                }
            }
            Ok(Event::CData(cdata)) => {
                if depth == 2 {
                    value.push_str(&String::from_utf8_lossy(&cdata));
                }
            }
            Ok(Event::End(_)) => {
                if depth == 2 {
                    if let Some(key) = key.take() {
                        m.insert(key, std::mem::take(&mut value));
                    }
                }
                depth = depth.saturating_sub(1);
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(NotifyError::Malformed(format!("error parsing xml: {}", e))),
            _ => {}
        }
    }
    if depth != 0 {
        return Err(NotifyError::Malformed("unexpected end of xml".into()));
    }
    if m.is_empty() {
        return Err(NotifyError::Malformed("empty xml document".into()));
    }
    Ok(m)
}

pub fn to_xml<'a, I>(m: I) -> String
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let mut xml = String::from("<xml>");
    for (k, v) in m {
        let v = v.replace("]]>", "]]]]><![CDATA[>");
        xml.push_str(&format!("<{k}><![CDATA[{v}]]></{k}>"));
    }
    xml.push_str("</xml>");
    xml
}

/// 应答里字符串字段按名字映射到结构体, 缺的字段留空
pub fn from_map<T: DeserializeOwned>(m: &HashMap<String, String>) -> Result<T, WeixinError> {
    let v = serde_json::to_value(m)
        .map_err(|e| WeixinError::Unexpected(format!("error converting weixin reply: {}", e)))?;
    serde_json::from_value(v)
        .map_err(|e| WeixinError::ApiError(format!("unexpected weixin reply: {}", e)))
}

pub struct V2ApiRequest {
    params: BTreeMap<String, String>,
}

impl V2ApiRequest {
    pub fn new<T: Serialize>(app_id: &str, mch_id: &str, biz: &T) -> Result<Self, WeixinError> {
        let v = serde_json::to_value(biz)
            .map_err(|e| WeixinError::Unexpected(format!("malformed v2 payload: {}", e)))?;
        let mut params: BTreeMap<String, String> = serde_json::from_value(v)
            .map_err(|e| WeixinError::Unexpected(format!("malformed v2 payload: {}", e)))?;
        params.insert("appid".into(), app_id.to_string());
        params.insert("mch_id".into(), mch_id.to_string());
        params.insert("nonce_str".into(), crate::utils::nonce_str());
        Ok(Self { params })
    }

    pub fn sign_md5(&mut self, sign_key: &str) -> Result<String, WeixinError> {
        let signature = v2api_sign::sign(&self.params, sign_key, v2api_sign::SignType::Md5)?;
        self.params.insert("sign".into(), signature.clone());
        Ok(signature)
    }

    pub fn to_xml(&self) -> String {
        to_xml(&self.params)
    }
}

#[derive(Serialize, Debug)]
pub struct UnifiedOrderPayload<'a> {
    pub body: &'a str,
    pub out_trade_no: &'a str,
    pub total_fee: String,
    pub spbill_create_ip: &'a str,
    pub notify_url: &'a str,
    pub trade_type: &'static str, // NATIVE | JSAPI | APP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openid: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<&'a str>,
}

#[derive(Serialize, Debug)]
pub struct MicroPayPayload<'a> {
    pub body: &'a str,
    pub out_trade_no: &'a str,
    pub total_fee: String,
    pub spbill_create_ip: &'a str,
    pub auth_code: &'a str,
}

#[derive(Serialize, Debug)]
pub struct RefundPayload<'a> {
    pub out_trade_no: &'a str,
    pub out_refund_no: &'a str,
    pub total_fee: String,
    pub refund_fee: String,
    pub notify_url: &'a str,
}

#[derive(Serialize, Debug)]
pub struct OutTradeNoPayload<'a> {
    pub out_trade_no: &'a str,
}

#[derive(Serialize, Debug)]
pub struct OutRefundNoPayload<'a> {
    pub out_refund_no: &'a str,
}

/// 所有 v2 应答共有的协议层和业务层结果
#[derive(Deserialize, Serialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxReturn {
    pub return_code: String,
    pub return_msg: String,
    pub result_code: String,
    pub err_code: String,
    pub err_code_des: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxUnifiedOrderReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub appid: String,
    pub mch_id: String,
    pub trade_type: String,
    pub prepay_id: String,
    pub code_url: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxMicroPayReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub openid: String,
    pub trade_type: String,
    pub bank_type: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub total_fee: String,
    pub cash_fee: String,
}

impl WxMicroPayReply {
    /// USERPAYING: 等用户输密码, SYSTEMERROR / BANKERROR: 结果未知, 都要继续查单
    pub fn result_unknown(&self) -> bool {
        matches!(
            self.base.err_code.as_str(),
            "USERPAYING" | "SYSTEMERROR" | "BANKERROR"
        )
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxOrderQueryReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub appid: String,
    pub mch_id: String,
    pub openid: String,
    pub trade_type: String,
    pub trade_state: String,
    pub trade_state_desc: String,
    pub bank_type: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub total_fee: String,
    pub cash_fee: String,
    pub coupon_fee: String,
}

impl WxOrderQueryReply {
    pub fn is_paid(&self) -> bool {
        self.base.return_code == "SUCCESS"
            && self.base.result_code == "SUCCESS"
            && self.trade_state == "SUCCESS"
    }
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxRefundReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub out_refund_no: String,
    pub refund_id: String,
    pub total_fee: String,
    pub refund_fee: String,
    pub cash_fee: String,
}

/// 退款查询按 out_refund_no 查, 只会有一笔, 取下标 0 的字段
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxRefundQueryReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub total_fee: String,
    #[serde(rename = "refund_id_0")]
    pub refund_id: String,
    #[serde(rename = "out_refund_no_0")]
    pub out_refund_no: String,
    #[serde(rename = "refund_fee_0")]
    pub refund_fee: String,
    #[serde(rename = "refund_status_0")]
    pub refund_status: String,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxReverseReply {
    #[serde(flatten)]
    pub base: WxReturn,
    pub recall: String, // Y 需要重新调用撤销, N 不需要
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxPaymentNotify {
    #[serde(flatten)]
    pub base: WxReturn,
    pub appid: String,
    pub mch_id: String,
    pub openid: String,
    pub trade_type: String,
    pub total_fee: String,
    pub cash_fee: String,
    pub coupon_fee: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub time_end: String,
    pub trade_state: String,
    pub trade_state_desc: String,
}

/// 退款通知外层明文 + req_info 解密后的字段
#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct WxRefundNotify {
    pub appid: String,
    pub mch_id: String,
    pub transaction_id: String,
    pub out_trade_no: String,
    pub refund_id: String,
    pub out_refund_no: String,
    pub total_fee: String,
    pub settlement_total_fee: String,
    pub refund_fee: String,
    pub settlement_refund_fee: String,
    pub refund_status: String, // SUCCESS | CHANGE | REFUNDCLOSE
    pub success_time: String,
    pub refund_recv_accout: String,
    pub refund_account: String,
    pub refund_request_source: String,
}

/// 小程序和公众号 JSAPI 调起支付的参数
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WxJsapiParams {
    pub app_id: String,
    pub time_stamp: String,
    pub nonce_str: String,
    pub package: String,
    pub sign_type: String,
    #[serde(default)]
    pub pay_sign: String,
}

/// APP 调起支付的参数
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct WxAppParams {
    pub appid: String,
    pub partnerid: String,
    pub prepayid: String,
    pub package: String,
    pub noncestr: String,
    pub timestamp: String,
    #[serde(default)]
    pub sign: String,
}

/// 把调起参数转成 map 再签名, pay_sign / sign 为空时不参与签名
pub fn sign_params<T: Serialize>(params: &T, sign_key: &str) -> Result<String, WeixinError> {
    let v = serde_json::to_value(params)
        .map_err(|e| WeixinError::Unexpected(format!("error serializing pay params: {}", e)))?;
    let m: HashMap<String, String> = serde_json::from_value(v)
        .map_err(|e| WeixinError::Unexpected(format!("error serializing pay params: {}", e)))?;
    let signature = v2api_sign::sign(&m, sign_key, v2api_sign::SignType::Md5)?;
    Ok(signature)
}
