//! Serde representation of `f64` that survives JSON
//!
//! JSON has no literal for NaN or the infinities: serde_json writes them as
//! `null` and refuses to read that back as a float. Here non-finite values
//! are written as the strings `"NaN"`, `"inf"` and `"-inf"`; finite values
//! stay plain numbers.
//!
//! Use with `#[serde(with = "crate::storage::nonfinite")]` on an `f64`, or
//! `#[serde(with = "crate::storage::nonfinite::seq")]` on a `Vec<f64>`.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum Repr {
    Number(f64),
    Text(String),
}

fn encode(value: f64) -> Repr {
    if value.is_nan() {
        Repr::Text("NaN".to_string())
    } else if value.is_infinite() {
        let tag = if value > 0.0 { "inf" } else { "-inf" };
        Repr::Text(tag.to_string())
    } else {
        Repr::Number(value)
    }
}

fn decode<E: de::Error>(repr: Repr) -> Result<f64, E> {
    match repr {
        Repr::Number(value) => Ok(value),
        Repr::Text(text) => match text.as_str() {
            "NaN" => Ok(f64::NAN),
            "inf" => Ok(f64::INFINITY),
            "-inf" => Ok(f64::NEG_INFINITY),
            other => Err(E::invalid_value(
                de::Unexpected::Str(other),
                &"a number, \"NaN\", \"inf\" or \"-inf\"",
            )),
        },
    }
}

/// Serialize one `f64`.
#[allow(clippy::trivially_copy_pass_by_ref)]
pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    encode(*value).serialize(serializer)
}

/// Deserialize one `f64`.
pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    decode(Repr::deserialize(deserializer)?)
}

/// The same representation for every element of a `Vec<f64>`.
pub mod seq {
    use super::{decode, encode, Repr};
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize a sequence of `f64`.
    pub fn serialize<S: Serializer>(values: &[f64], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(values.iter().map(|v| encode(*v)))
    }

    /// Deserialize a sequence of `f64`.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<f64>, D::Error> {
        Vec::<Repr>::deserialize(deserializer)?
            .into_iter()
            .map(decode)
            .collect()
    }
}
