//! アドレス表現の正規化
//!
//! アドレスは生成元によって10進文字列、16進文字列、JSON数値のいずれかで届くため、
//! 比較やマップのキーに使う前に必ず `u64` へ正規化します。

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// シンボライザとの交換に使う10進文字列表現
pub fn canonical(addr: u64) -> String {
    addr.to_string()
}

/// JSON境界を越えるアドレス
///
/// デシリアライズ時は文字列（10進/16進）と数値の両方を受け付け、
/// シリアライズ時は常に10進文字列を書き出す。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub u64);

impl From<Address> for u64 {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

/// 文字列のキーは `0x` 付きなら16進、それ以外は10進
///
/// 接頭辞のない16進は10進との区別がつかないため受け付けない。
impl FromStr for Address {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        let text = s.trim();
        let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => text.parse::<u64>(),
        };
        parsed
            .map(Address)
            .map_err(|e| anyhow::anyhow!("Bad address key '{}': {}", s, e))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&canonical(self.0))
    }
}

struct AddressVisitor;

impl<'de> Visitor<'de> for AddressVisitor {
    type Value = Address;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("an address as a number, a decimal string or a 0x-prefixed hex string")
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Address, E> {
        Ok(Address(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Address, E> {
        u64::try_from(v)
            .map(Address)
            .map_err(|_| E::custom(format!("negative address {}", v)))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Address, E> {
        v.parse().map_err(|e: anyhow::Error| E::custom(e.to_string()))
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(AddressVisitor)
    }
}
