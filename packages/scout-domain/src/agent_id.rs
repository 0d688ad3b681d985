use std::{
	fmt::{Display, Formatter},
	str::FromStr,
};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AgentIdError {
	input: String,
	message: &'static str,
}
impl Display for AgentIdError {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "Invalid agent id '{}': {}", self.input, self.message)
	}
}

impl std::error::Error for AgentIdError {}

/// A registry token scoped to its chain, written `"<chain_id>:<token_id>"`.
///
/// The written form is also the subgraph entity id, so ordering by [`AgentId::as_entity_id`]
/// matches the backend's `id` ordering.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct AgentId {
	chain_id: u64,
	token_id: String,
}
impl AgentId {
	pub fn new(chain_id: u64, token_id: impl Into<String>) -> Result<Self, AgentIdError> {
		let token_id = token_id.into();

		if token_id.is_empty() || !token_id.bytes().all(|byte| byte.is_ascii_digit()) {
			return Err(AgentIdError {
				input: format!("{chain_id}:{token_id}"),
				message: "token id must be a non-empty decimal integer.",
			});
		}

		Ok(Self { chain_id, token_id })
	}

	pub fn chain_id(&self) -> u64 {
		self.chain_id
	}

	pub fn token_id(&self) -> &str {
		&self.token_id
	}

	pub fn as_entity_id(&self) -> String {
		self.to_string()
	}
}

impl FromStr for AgentId {
	type Err = AgentIdError;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		let trimmed = raw.trim();
		let Some((chain, token)) = trimmed.split_once(':') else {
			return Err(AgentIdError {
				input: raw.to_string(),
				message: "expected '<chain_id>:<token_id>'.",
			});
		};
		let chain_id = chain.parse().map_err(|_| AgentIdError {
			input: raw.to_string(),
			message: "chain id must be an unsigned integer.",
		})?;

		Self::new(chain_id, token).map_err(|err| AgentIdError { input: raw.to_string(), ..err })
	}
}

impl Display for AgentId {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}:{}", self.chain_id, self.token_id)
	}
}

impl Serialize for AgentId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.collect_str(self)
	}
}

impl<'de> Deserialize<'de> for AgentId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		raw.parse().map_err(serde::de::Error::custom)
	}
}
