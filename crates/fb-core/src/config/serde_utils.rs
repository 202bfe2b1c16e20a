//! Serde helpers for fetchback configuration files
//!
//! Timeouts are written as whole seconds. Sizes (part size, ticket ceiling,
//! frame limit) accept either a byte count or a string with a binary unit:
//!
//! ```toml
//! heartbeat_interval = 30
//! max_message_size = "1MiB"
//!
//! [transfer]
//! chunk_size = "5 MiB"
//! ceiling_size = 104857600
//! ```

/// `Duration` as whole seconds
pub mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Duration::from_secs(u64::deserialize(deserializer)?))
    }
}

/// Parse a size such as `1048576`, `"512KiB"` or `"5 MiB"`.
///
/// Units are case-insensitive and always powers of 1024; `K`, `KB` and `KiB`
/// all mean 1024 bytes.
pub fn parse_byte_size(input: &str) -> Result<u64, String> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (digits, unit) = trimmed.split_at(split);
    if digits.is_empty() {
        return Err(format!("invalid size {:?}: expected a number", input));
    }
    let value: u64 = digits
        .parse()
        .map_err(|_| format!("invalid size {:?}: number out of range", input))?;

    let multiplier: u64 = match unit.trim().to_ascii_lowercase().as_str() {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1 << 10,
        "m" | "mb" | "mib" => 1 << 20,
        "g" | "gb" | "gib" => 1 << 30,
        "t" | "tb" | "tib" => 1 << 40,
        other => return Err(format!("invalid size {:?}: unknown unit {:?}", input, other)),
    };
    value
        .checked_mul(multiplier)
        .ok_or_else(|| format!("invalid size {:?}: too large", input))
}

/// Byte count written as an integer, read from an integer or a unit string
pub mod byte_size {
    use serde::de::{self, Visitor};
    use serde::{Deserializer, Serializer};
    use std::fmt;
    use std::marker::PhantomData;

    pub fn serialize<T, S>(size: &T, serializer: S) -> Result<S::Ok, S::Error>
    where
        T: Copy + TryInto<u64>,
        S: Serializer,
    {
        let bytes: u64 = (*size)
            .try_into()
            .map_err(|_| <S::Error as serde::ser::Error>::custom("size does not fit in 64 bits"))?;
        serializer.serialize_u64(bytes)
    }

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<T, D::Error>
    where
        T: TryFrom<u64>,
        D: Deserializer<'de>,
    {
        deserializer.deserialize_any(SizeVisitor(PhantomData))
    }

    struct SizeVisitor<T>(PhantomData<T>);

    impl<T: TryFrom<u64>> SizeVisitor<T> {
        fn fit<E: de::Error>(bytes: u64) -> Result<T, E> {
            T::try_from(bytes).map_err(|_| E::custom(format!("size {} is out of range", bytes)))
        }
    }

    impl<'de, T: TryFrom<u64>> Visitor<'de> for SizeVisitor<T> {
        type Value = T;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a byte count or a size like \"5MiB\"")
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<T, E> {
            Self::fit(v)
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<T, E> {
            let bytes = u64::try_from(v).map_err(|_| E::custom("size cannot be negative"))?;
            Self::fit(bytes)
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<T, E> {
            Self::fit(super::parse_byte_size(v).map_err(E::custom)?)
        }
    }
}
