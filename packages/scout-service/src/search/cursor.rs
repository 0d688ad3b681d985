//! Opaque resume token: `base64url(json)` carrying the query fingerprint and one fragment per
//! chain.

use std::collections::BTreeMap;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use scout_domain::Position;
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

const CURSOR_VERSION: u8 = 1;

/// Where one chain resumes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "position", rename_all = "snake_case")]
pub(crate) enum Fragment {
	Start,
	/// Resume strictly after this position.
	After(Position),
	Done,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct Cursor {
	v: u8,
	fp: String,
	sources: BTreeMap<u64, Fragment>,
}

pub(crate) fn encode(fingerprint: &str, sources: BTreeMap<u64, Fragment>) -> Result<String> {
	let cursor = Cursor { v: CURSOR_VERSION, fp: fingerprint.to_string(), sources };
	let json = serde_json::to_vec(&cursor)
		.map_err(|err| Error::InvalidCursor { message: err.to_string() })?;

	Ok(URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a cursor for the given query. The fingerprint must match and every chain must
/// have a fragment.
pub(crate) fn decode(
	raw: &str,
	fingerprint: &str,
	chains: &[u64],
) -> Result<BTreeMap<u64, Fragment>> {
	let bytes = URL_SAFE_NO_PAD
		.decode(raw.trim())
		.map_err(|_| invalid("cursor is not base64url"))?;
	let cursor: Cursor =
		serde_json::from_slice(&bytes).map_err(|_| invalid("cursor payload is malformed"))?;

	if cursor.v != CURSOR_VERSION {
		return Err(invalid("cursor version is not supported"));
	}
	if cursor.fp != fingerprint {
		return Err(Error::CursorMismatch);
	}
	if cursor.sources.len() != chains.len()
		|| chains.iter().any(|chain_id| !cursor.sources.contains_key(chain_id))
	{
		return Err(invalid("cursor chains do not match the query"));
	}

	Ok(cursor.sources)
}

fn invalid(message: &str) -> Error {
	Error::InvalidCursor { message: format!("{message}.") }
}

#[cfg(test)]
mod tests {
	use scout_domain::SortValue;

	use super::*;

	fn fragments() -> BTreeMap<u64, Fragment> {
		BTreeMap::from([
			(1, Fragment::After(Position::new(SortValue::Score(0.1 + 0.2), "1:7"))),
			(84_532, Fragment::Done),
			(11_155_111, Fragment::Start),
		])
	}

	#[test]
	fn round_trips_exactly() {
		let raw = encode("abc", fragments()).expect("Encode cursor.");
		let decoded = decode(&raw, "abc", &[1, 84_532, 11_155_111]).expect("Decode cursor.");

		assert_eq!(decoded, fragments());
	}

	#[test]
	fn foreign_fingerprint_is_a_mismatch() {
		let raw = encode("abc", fragments()).expect("Encode cursor.");

		assert!(matches!(
			decode(&raw, "def", &[1, 84_532, 11_155_111]),
			Err(Error::CursorMismatch)
		));
	}

	#[test]
	fn garbage_is_invalid() {
		for raw in ["", "not base64 !!", "e30", &URL_SAFE_NO_PAD.encode(b"[1,2]")] {
			assert!(
				matches!(decode(raw, "abc", &[1]), Err(Error::InvalidCursor { .. })),
				"{raw} should be invalid"
			);
		}

		let raw = encode("abc", fragments()).expect("Encode cursor.");

		assert!(matches!(decode(&raw, "abc", &[1]), Err(Error::InvalidCursor { .. })));
	}
}
