use std::fmt;

use bytes::Bytes;
use primitive_types::U256;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Opaque identifier of one logical intent stream, as assigned by the backend.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

/// The intent id doubles as the stream id: one intent, one progress stream.
pub type IntentId = StreamId;

/// Wallet identity used to look up wallet-specific policy (for example
/// `eoa`, `smart-account`).
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct WalletKind(pub String);

impl WalletKind {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WalletKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Unsigned 256-bit amount as carried by transaction payloads.
///
/// Accepts JSON numbers, decimal strings and `0x`-prefixed hex strings;
/// always serializes as a hex string.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Default)]
pub struct Quantity(pub U256);

impl Quantity {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        let parsed = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
            Some("") => Ok(U256::zero()),
            Some(hex) => U256::from_str_radix(hex, 16).map_err(|e| format!("{e:?}")),
            None => U256::from_dec_str(raw).map_err(|e| format!("{e:?}")),
        };
        parsed
            .map(Self)
            .map_err(|e| format!("invalid quantity {raw:?}: {e}"))
    }

    pub fn value(&self) -> U256 {
        self.0
    }
}

impl From<u64> for Quantity {
    fn from(value: u64) -> Self {
        Self(U256::from(value))
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;
        // Integer literals keep their exact digits, so values past u64 survive.
        match serde_json::Value::deserialize(deserializer)? {
            serde_json::Value::Number(n) => {
                let digits = n.to_string();
                if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(D::Error::custom(format!(
                        "quantity {digits} is not a non-negative integer"
                    )));
                }
                Self::parse(&digits).map_err(D::Error::custom)
            }
            serde_json::Value::String(s) => Self::parse(&s).map_err(D::Error::custom),
            other => Err(D::Error::custom(format!(
                "quantity must be a number or string, got {other}"
            ))),
        }
    }
}

/// Fully formed, unsigned call descriptor delivered by the `complete` event.
///
/// Fields are kept exactly as the backend sent them; validation happens when
/// the transaction is converted into a [`WalletCall`].
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreparedTransaction {
    to: String,
    data: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    value: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    gas_price: Option<Quantity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    chain_id: Option<u64>,
}

impl PreparedTransaction {
    pub fn new(to: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            to: to.into(),
            data: data.into(),
            value: None,
            gas: None,
            gas_price: None,
            chain_id: None,
        }
    }

    pub fn with_value(mut self, value: impl Into<Quantity>) -> Self {
        self.value = Some(value.into());
        self
    }

    pub fn with_gas(mut self, gas: impl Into<Quantity>) -> Self {
        self.gas = Some(gas.into());
        self
    }

    pub fn with_gas_price(mut self, gas_price: impl Into<Quantity>) -> Self {
        self.gas_price = Some(gas_price.into());
        self
    }

    pub fn with_chain_id(mut self, chain_id: u64) -> Self {
        self.chain_id = Some(chain_id);
        self
    }

    pub fn to(&self) -> &str {
        &self.to
    }

    pub fn data(&self) -> &str {
        &self.data
    }

    pub fn value(&self) -> Option<Quantity> {
        self.value
    }

    pub fn gas(&self) -> Option<Quantity> {
        self.gas
    }

    pub fn gas_price(&self) -> Option<Quantity> {
        self.gas_price
    }

    pub fn chain_id(&self) -> Option<u64> {
        self.chain_id
    }

    /// Converts into the wallet's call format, validating address and calldata.
    pub fn to_wallet_call(&self) -> Result<WalletCall, String> {
        let to = self.to.trim();
        let hex_part = to
            .strip_prefix("0x")
            .ok_or_else(|| format!("address {to:?} is missing 0x prefix"))?;
        if hex_part.len() != 40 || !hex_part.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(format!("address {to:?} is not 20 hex-encoded bytes"));
        }
        let data = self.data.trim();
        let data_hex = data
            .strip_prefix("0x")
            .ok_or_else(|| format!("calldata {data:?} is missing 0x prefix"))?;
        let data = hex::decode(data_hex).map_err(|e| format!("invalid calldata: {e}"))?;
        Ok(WalletCall {
            to: to.to_ascii_lowercase(),
            data: Bytes::from(data),
            value: self.value.map(|q| q.value()),
            gas: self.gas.map(|q| q.value()),
        })
    }
}

/// Call descriptor in the shape the wallet signing capability expects.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WalletCall {
    pub to: String,
    pub data: Bytes,
    pub value: Option<U256>,
    pub gas: Option<U256>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const ROUTER: &str = "0x1111111254eeb25477b68fb85ed929f73a960582";

    #[test]
    fn quantity_accepts_numbers_decimal_and_hex() {
        let parsed: Vec<Quantity> =
            serde_json::from_str(r#"[21000, "1000000000000000000", "0x5208"]"#).expect("parse");
        assert_eq!(parsed[0], Quantity::from(21_000_u64));
        assert_eq!(parsed[1].value(), U256::exp10(18));
        assert_eq!(parsed[2], Quantity::from(21_000_u64));
        assert_eq!(parsed[2].to_string(), "0x5208");
    }

    #[test]
    fn quantity_rejects_garbage() {
        assert!(serde_json::from_str::<Quantity>(r#""12abc""#).is_err());
        assert!(serde_json::from_str::<Quantity>("-1").is_err());
        assert!(serde_json::from_str::<Quantity>("1.5").is_err());
        assert!(serde_json::from_str::<Quantity>("true").is_err());
    }

    #[test]
    fn quantity_keeps_numbers_wider_than_u64() {
        let wei: Quantity = serde_json::from_str("100000000000000000000").expect("parse");
        assert_eq!(wei.value(), U256::exp10(20));

        let max: Quantity = serde_json::from_str(
            "115792089237316195423570985008687907853269984665640564039457584007913129639935",
        )
        .expect("parse");
        assert_eq!(max.value(), U256::MAX);

        let tx: PreparedTransaction = serde_json::from_str(&format!(
            r#"{{"to":"{ROUTER}","data":"0x","value":123456789012345678901}}"#
        ))
        .expect("decode");
        assert_eq!(
            tx.value().map(|q| q.value()),
            U256::from_dec_str("123456789012345678901").ok()
        );
    }

    #[test]
    fn prepared_transaction_decodes_camel_case_payload() {
        let tx: PreparedTransaction = serde_json::from_value(serde_json::json!({
            "to": ROUTER,
            "data": "0x095ea7b3",
            "value": "0x0",
            "gasPrice": 30,
            "chainId": 8453
        }))
        .expect("decode");
        assert_eq!(tx.chain_id(), Some(8453));
        assert_eq!(tx.gas_price(), Some(Quantity::from(30_u64)));
        assert!(tx.gas().is_none());
    }

    #[test]
    fn wallet_call_conversion_validates_address_and_data() {
        let call = PreparedTransaction::new(ROUTER, "0x095ea7b3")
            .with_value(5_u64)
            .to_wallet_call()
            .expect("valid");
        assert_eq!(call.data.as_ref(), &[0x09, 0x5e, 0xa7, 0xb3]);
        assert_eq!(call.value, Some(U256::from(5_u64)));

        assert!(PreparedTransaction::new("0x1234", "0x").to_wallet_call().is_err());
        assert!(PreparedTransaction::new(ROUTER, "0xzz").to_wallet_call().is_err());
    }

    #[test]
    fn calldata_requires_0x_prefix() {
        let err = PreparedTransaction::new(ROUTER, "095ea7b3")
            .to_wallet_call()
            .expect_err("unprefixed calldata");
        assert!(err.contains("missing 0x prefix"));

        let empty = PreparedTransaction::new(ROUTER, "0x")
            .to_wallet_call()
            .expect("empty calldata");
        assert!(empty.data.is_empty());
    }
}
