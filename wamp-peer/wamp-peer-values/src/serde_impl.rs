use std::fmt;

use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    Serializer,
    de::{
        self,
        MapAccess,
        SeqAccess,
        Visitor,
    },
    ser::{
        SerializeMap,
        SerializeSeq,
    },
};

use crate::{
    Array,
    Blob,
    Object,
    Variant,
};

/// Error message produced when a map key is not a string.
///
/// Codecs match on this message to report a typed decoding error.
pub const EXPECTED_STRING_KEY: &str = "expected a string map key";

/// Prefix marking a string as a base64-encoded blob in text formats.
pub const BLOB_PREFIX: char = '\0';

impl Serialize for Blob {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if serializer.is_human_readable() {
            serializer.serialize_str(&format!("{BLOB_PREFIX}{}", self.to_base64()))
        } else {
            serializer.serialize_bytes(self.as_bytes())
        }
    }
}

impl Serialize for Variant {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(value) => serializer.serialize_bool(*value),
            Self::Int(value) => serializer.serialize_i64(*value),
            Self::UInt(value) => serializer.serialize_u64(*value),
            Self::Real(value) => serializer.serialize_f64(*value),
            Self::String(value) => serializer.serialize_str(value),
            Self::Blob(value) => value.serialize(serializer),
            Self::Array(value) => {
                let mut seq = serializer.serialize_seq(Some(value.len()))?;
                for element in value {
                    seq.serialize_element(element)?;
                }
                seq.end()
            }
            Self::Object(value) => {
                let mut map = serializer.serialize_map(Some(value.len()))?;
                for (key, element) in value {
                    map.serialize_entry(key, element)?;
                }
                map.end()
            }
        }
    }
}

struct VariantVisitor {
    human_readable: bool,
}

impl<'de> Visitor<'de> for VariantVisitor {
    type Value = Variant;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        write!(formatter, "any WAMP value")
    }

    fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Bool(v))
    }

    fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Int(v))
    }

    fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match i64::try_from(v) {
            Ok(v) => Ok(Variant::Int(v)),
            Err(_) => Ok(Variant::UInt(v)),
        }
    }

    fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Real(v))
    }

    fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        match v.strip_prefix(BLOB_PREFIX) {
            Some(encoded) if self.human_readable => Blob::from_base64(encoded)
                .map(Variant::Blob)
                .map_err(E::custom),
            _ => Ok(Variant::String(v.to_owned())),
        }
    }

    fn visit_bytes<E>(self, v: &[u8]) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Blob(Blob::from(v)))
    }

    fn visit_byte_buf<E>(self, v: Vec<u8>) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Blob(Blob::new(v)))
    }

    fn visit_unit<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Null)
    }

    fn visit_none<E>(self) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(Variant::Null)
    }

    fn visit_some<D>(self, deserializer: D) -> Result<Self::Value, D::Error>
    where
        D: Deserializer<'de>,
    {
        Variant::deserialize(deserializer)
    }

    fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
    where
        A: SeqAccess<'de>,
    {
        let mut array = Array::with_capacity(seq.size_hint().unwrap_or_default().min(4096));
        while let Some(element) = seq.next_element::<Variant>()? {
            array.push(element);
        }
        Ok(Variant::Array(array))
    }

    fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
    where
        A: MapAccess<'de>,
    {
        let mut object = Object::with_capacity(map.size_hint().unwrap_or_default().min(4096));
        while let Some(key) = map.next_key::<Variant>()? {
            let key = match key {
                Variant::String(key) => key,
                _ => return Err(de::Error::custom(EXPECTED_STRING_KEY)),
            };
            let value = map.next_value::<Variant>()?;
            object.insert(key, value);
        }
        Ok(Variant::Object(object))
    }
}

impl<'de> Deserialize<'de> for Variant {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let human_readable = deserializer.is_human_readable();
        deserializer.deserialize_any(VariantVisitor { human_readable })
    }
}
