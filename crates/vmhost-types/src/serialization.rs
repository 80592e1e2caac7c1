//! Serde implementations and field helpers for vmhost-types.
//!
//! Byte buffers travel as lowercase hex strings and big integers as
//! decimal strings so that JSON documents stay readable.

use crate::{Address, Hash};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::from_str(&s).map_err(serde::de::Error::custom)
    }
}

impl Serialize for Hash {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(serde::de::Error::custom)
    }
}

fn decode_hex<E: serde::de::Error>(s: &str) -> Result<Vec<u8>, E> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    hex::decode(s).map_err(E::custom)
}

pub mod hex_bytes {
    use super::*;

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        hex::encode(bytes).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_hex(&s)
    }
}

pub mod hex_bytes_vec {
    use super::*;

    pub fn serialize<S: Serializer>(items: &[Vec<u8>], serializer: S) -> Result<S::Ok, S::Error> {
        let encoded: Vec<String> = items.iter().map(hex::encode).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<Vec<u8>>, D::Error> {
        let items = Vec::<String>::deserialize(deserializer)?;
        items.iter().map(|s| decode_hex(s)).collect()
    }
}

pub mod bigint_dec {
    use super::*;
    use num_bigint::BigInt;

    pub fn serialize<S: Serializer>(value: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        value.to_str_radix(10).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let s = String::deserialize(deserializer)?;
        BigInt::from_str(&s).map_err(serde::de::Error::custom)
    }
}

pub mod bigint_dec_opt {
    use super::*;
    use num_bigint::BigInt;

    pub fn serialize<S: Serializer>(value: &Option<BigInt>, serializer: S) -> Result<S::Ok, S::Error> {
        value.as_ref().map(|v| v.to_str_radix(10)).serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<BigInt>, D::Error> {
        let s = Option::<String>::deserialize(deserializer)?;
        s.map(|s| BigInt::from_str(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

pub mod hex_key_map {
    use super::*;
    use std::collections::BTreeMap;

    pub fn serialize<S, V>(map: &BTreeMap<Vec<u8>, V>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
        V: Serialize,
    {
        let encoded: BTreeMap<String, &V> = map.iter().map(|(k, v)| (hex::encode(k), v)).collect();
        encoded.serialize(serializer)
    }

    pub fn deserialize<'de, D, V>(deserializer: D) -> Result<BTreeMap<Vec<u8>, V>, D::Error>
    where
        D: Deserializer<'de>,
        V: Deserialize<'de>,
    {
        let encoded = BTreeMap::<String, V>::deserialize(deserializer)?;
        encoded
            .into_iter()
            .map(|(k, v)| decode_hex(&k).map(|k| (k, v)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use crate::{OutputAccount, StorageUpdate, VMOutput};
    use num_bigint::BigInt;

    #[test]
    fn test_vm_output_json_roundtrip() {
        let mut output = VMOutput {
            return_data: vec![b"ok".to_vec(), vec![]],
            gas_remaining: 42,
            ..Default::default()
        };
        let mut account = OutputAccount::new(crate::Address::from_name("sc"));
        account.balance_delta = BigInt::from(-7);
        account.storage_updates.insert(
            b"key".to_vec(),
            StorageUpdate {
                offset: b"key".to_vec(),
                data: b"value".to_vec(),
            },
        );
        output.output_accounts.insert(account.address, account);

        let json = serde_json::to_string(&output).unwrap();
        assert!(json.contains("\"6f6b\""));
        assert!(json.contains("\"-7\""));
        let back: VMOutput = serde_json::from_str(&json).unwrap();
        assert_eq!(back, output);
    }
}
