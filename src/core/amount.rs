use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Money in fen (1/100 CNY). Every amount leaving the gateway is expressed in fen,
/// whatever unit the provider used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Amount(i64);

#[derive(Error, Debug, PartialEq)]
pub enum AmountError {
    #[error("invalid yuan amount {0:?}")]
    InvalidYuan(String),
    #[error("invalid fen amount {0:?}")]
    InvalidFen(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_fen(fen: i64) -> Self {
        Amount(fen)
    }

    pub fn fen(self) -> i64 {
        self.0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /**
     * "10.00" -> 1000 fen. Parsed as a decimal, so "0.07" is exactly 7 fen.
     * An absent (empty) provider field is zero.
     */
    pub fn from_yuan_str(s: &str) -> Result<Self, AmountError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Amount::ZERO);
        }
        let invalid = || AmountError::InvalidYuan(s.to_string());
        let yuan = Decimal::from_str(s).map_err(|_| invalid())?;
        if yuan.is_sign_negative() {
            return Err(invalid());
        }
        let fen = yuan.checked_mul(Decimal::ONE_HUNDRED).ok_or_else(invalid)?;
        if !fen.fract().is_zero() {
            return Err(invalid());
        }
        fen.to_i64().map(Amount).ok_or_else(invalid)
    }

    /// "1000" -> 1000 fen. Empty is zero.
    pub fn from_fen_str(s: &str) -> Result<Self, AmountError> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Amount::ZERO);
        }
        match s.parse::<i64>() {
            Ok(fen) if fen >= 0 => Ok(Amount(fen)),
            _ => Err(AmountError::InvalidFen(s.to_string())),
        }
    }

    /// 1000 fen -> "10.00", the format alipay expects for `total_amount` and friends.
    pub fn to_yuan_string(self) -> String {
        format!("{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.0)
    }
}

/**
 * Request parameters arrive as form strings ("1000") or json numbers (1000, and
 * sometimes 1000.0 from clients that only have doubles). All of them are fen.
 */
impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FenVisitor;

        impl<'de> de::Visitor<'de> for FenVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a non-negative integer amount in fen")
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Amount, E> {
                i64::try_from(v)
                    .map(Amount)
                    .map_err(|_| E::custom(format!("amount {} out of range", v)))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Amount, E> {
                if v < 0 {
                    return Err(E::custom(format!("negative amount {}", v)));
                }
                Ok(Amount(v))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Amount, E> {
                // i64::MAX as f64 就是 2^63, 等于它时转换会饱和
                if v < 0.0 || v.fract() != 0.0 || v >= i64::MAX as f64 {
                    return Err(E::custom(format!("amount {} is not a whole number of fen", v)));
                }
                Ok(Amount(v as i64))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Amount, E> {
                Amount::from_fen_str(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(FenVisitor)
    }
}
