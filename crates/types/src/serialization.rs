/// Serde base64-encoded String serializer/deserializer for raw bytes.
pub mod serde_base64 {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Serializer};

    pub fn serialize<S>(b: &Bytes, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        ser.serialize_str(BASE64_STANDARD.encode(b).as_str())
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Bytes, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(de)?;
        BASE64_STANDARD
            .decode(s)
            .map(Bytes::from)
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}

/// Same as [`serde_base64`], for optional fields.
///
/// An absent field, a `null` and an empty string all decode to `None`.
pub mod serde_base64_opt {
    use base64::prelude::BASE64_STANDARD;
    use base64::Engine;
    use bytes::Bytes;
    use serde::{Deserialize, Serializer};

    pub fn serialize<S>(b: &Option<Bytes>, ser: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match b {
            Some(b) => ser.serialize_str(BASE64_STANDARD.encode(b).as_str()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(de: D) -> Result<Option<Bytes>, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let Some(s) = Option::<String>::deserialize(de)? else {
            return Ok(None);
        };

        if s.is_empty() {
            return Ok(None);
        }

        BASE64_STANDARD
            .decode(s)
            .map(|v| Some(Bytes::from(v)))
            .map_err(|e| serde::de::Error::custom(e.to_string()))
    }
}
