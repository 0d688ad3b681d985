//! RFC 3339 timestamps on the wire. Inputs may also be given as unix seconds, which is how
//! subgraphs store them.

pub mod option;

use serde::{Deserialize, Deserializer, Serializer};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum RawTimestamp {
	Seconds(i64),
	Text(String),
}
impl RawTimestamp {
	pub(crate) fn into_datetime(self) -> Result<OffsetDateTime, String> {
		match self {
			Self::Seconds(secs) =>
				OffsetDateTime::from_unix_timestamp(secs).map_err(|err| err.to_string()),
			Self::Text(raw) => OffsetDateTime::parse(raw.trim(), &Rfc3339)
				.or_else(|err| {
					raw.trim()
						.parse::<i64>()
						.map_err(|_| err.to_string())
						.and_then(|secs| {
							OffsetDateTime::from_unix_timestamp(secs).map_err(|err| err.to_string())
						})
				}),
		}
	}
}

pub fn serialize<S>(value: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
	S: Serializer,
{
	let formatted = value.format(&Rfc3339).map_err(serde::ser::Error::custom)?;

	serializer.serialize_str(&formatted)
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<OffsetDateTime, D::Error>
where
	D: Deserializer<'de>,
{
	RawTimestamp::deserialize(deserializer)?.into_datetime().map_err(serde::de::Error::custom)
}

/// Subgraph `BigInt` seconds, given as a string or a number.
pub(crate) fn from_graph_seconds(value: &serde_json::Value) -> Option<OffsetDateTime> {
	let secs = match value {
		serde_json::Value::String(raw) => raw.trim().parse::<i64>().ok()?,
		serde_json::Value::Number(raw) => raw.as_i64()?,
		_ => return None,
	};

	OffsetDateTime::from_unix_timestamp(secs).ok()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug, serde::Serialize, serde::Deserialize)]
	struct Stamped {
		#[serde(with = "crate::time_serde")]
		at: OffsetDateTime,
	}

	#[test]
	fn accepts_rfc3339_and_unix_seconds() {
		let parsed: Stamped = serde_json::from_value(serde_json::json!({ "at": "2023-11-14T22:13:20Z" }))
			.expect("RFC 3339 parses.");

		assert_eq!(parsed.at.unix_timestamp(), 1_700_000_000);

		let parsed: Stamped = serde_json::from_value(serde_json::json!({ "at": "1700000000" }))
			.expect("String seconds parse.");

		assert_eq!(
			serde_json::to_value(&parsed).expect("Serializes."),
			serde_json::json!({ "at": "2023-11-14T22:13:20Z" })
		);
	}
}
