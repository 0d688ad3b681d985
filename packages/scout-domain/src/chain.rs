use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const MAINNET_CHAIN_ID: u64 = 1;

/// Which chains a search fans out to.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ChainSelection {
	/// Mainnet plus the deployment's default chain.
	#[default]
	Default,
	/// Every chain with a resolvable endpoint.
	All,
	List(Vec<u64>),
}
impl ChainSelection {
	pub fn is_default(&self) -> bool {
		matches!(self, Self::Default)
	}
}

impl Serialize for ChainSelection {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match self {
			Self::Default => serializer.serialize_none(),
			Self::All => serializer.serialize_str("all"),
			Self::List(ids) => ids.serialize(serializer),
		}
	}
}

impl<'de> Deserialize<'de> for ChainSelection {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		#[derive(Deserialize)]
		#[serde(untagged)]
		enum Raw {
			Keyword(String),
			List(Vec<u64>),
		}

		match Option::<Raw>::deserialize(deserializer)? {
			None => Ok(Self::Default),
			Some(Raw::Keyword(keyword)) if keyword.eq_ignore_ascii_case("all") => Ok(Self::All),
			Some(Raw::Keyword(keyword)) => Err(serde::de::Error::custom(format!(
				"chains must be a list of chain ids or \"all\", got \"{keyword}\"."
			))),
			Some(Raw::List(ids)) => Ok(Self::List(ids)),
		}
	}
}

/// Turns a selection into the ordered, duplicate-free list of chains to query.
///
/// `available` is only consulted for [`ChainSelection::All`].
pub fn resolve_chains(
	selection: &ChainSelection,
	default_chain_id: u64,
	available: &[u64],
) -> Vec<u64> {
	match selection {
		ChainSelection::Default => dedup_in_order([MAINNET_CHAIN_ID, default_chain_id]),
		ChainSelection::List(ids) if ids.is_empty() =>
			dedup_in_order([MAINNET_CHAIN_ID, default_chain_id]),
		ChainSelection::List(ids) => dedup_in_order(ids.iter().copied()),
		ChainSelection::All => {
			let mut ids = available.to_vec();

			ids.sort_unstable();
			ids.dedup();

			ids
		},
	}
}

fn dedup_in_order(ids: impl IntoIterator<Item = u64>) -> Vec<u64> {
	let mut out: Vec<u64> = Vec::new();

	for id in ids {
		if !out.contains(&id) {
			out.push(id);
		}
	}

	out
}
