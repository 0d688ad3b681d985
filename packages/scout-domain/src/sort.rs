use std::{
	cmp::Ordering,
	fmt::{Display, Formatter},
	str::FromStr,
};

use serde::{Deserialize, Serialize};

use crate::decimal::Decimal;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
	#[serde(alias = "updatedAt")]
	UpdatedAt,
	#[serde(alias = "createdAt")]
	CreatedAt,
	#[serde(alias = "lastActivity")]
	LastActivity,
	#[serde(alias = "totalFeedback")]
	FeedbackCount,
	#[serde(alias = "averageValue")]
	AverageValue,
	#[serde(alias = "semanticScore")]
	SemanticScore,
}
impl SortKey {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::UpdatedAt => "updated_at",
			Self::CreatedAt => "created_at",
			Self::LastActivity => "last_activity",
			Self::FeedbackCount => "feedback_count",
			Self::AverageValue => "average_value",
			Self::SemanticScore => "semantic_score",
		}
	}

	/// Agent entity field carrying this key, when the key lives on the agent at all.
	pub fn agent_field(self) -> Option<&'static str> {
		match self {
			Self::UpdatedAt => Some("updatedAt"),
			Self::CreatedAt => Some("createdAt"),
			Self::LastActivity => Some("lastActivity"),
			Self::FeedbackCount => Some("totalFeedback"),
			Self::AverageValue => Some("averageFeedbackValue"),
			Self::SemanticScore => None,
		}
	}
}

impl FromStr for SortKey {
	type Err = String;

	fn from_str(raw: &str) -> Result<Self, Self::Err> {
		match raw.trim() {
			"updated_at" | "updatedAt" => Ok(Self::UpdatedAt),
			"created_at" | "createdAt" => Ok(Self::CreatedAt),
			"last_activity" | "lastActivity" => Ok(Self::LastActivity),
			"feedback_count" | "totalFeedback" => Ok(Self::FeedbackCount),
			"average_value" | "averageValue" => Ok(Self::AverageValue),
			"semantic_score" | "semanticScore" => Ok(Self::SemanticScore),
			other => Err(format!("Unknown sort key '{other}'.")),
		}
	}
}

impl Display for SortKey {
	fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
	Asc,
	#[default]
	Desc,
}
impl SortDirection {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::Asc => "asc",
			Self::Desc => "desc",
		}
	}
}

/// A sort-key value extracted from a record.
///
/// Values of different variants never meet in practice; the variant rank only keeps the
/// ordering total. `Missing` sorts below everything.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SortValue {
	Missing,
	Integer(u64),
	Decimal(Decimal),
	Score(#[serde(with = "score_bits")] f64),
}
impl SortValue {
	fn rank(&self) -> u8 {
		match self {
			Self::Missing => 0,
			Self::Integer(_) => 1,
			Self::Decimal(_) => 2,
			Self::Score(_) => 3,
		}
	}
}

impl PartialEq for SortValue {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for SortValue {}

impl Ord for SortValue {
	fn cmp(&self, other: &Self) -> Ordering {
		match (self, other) {
			(Self::Integer(a), Self::Integer(b)) => a.cmp(b),
			(Self::Decimal(a), Self::Decimal(b)) => a.cmp(b),
			(Self::Score(a), Self::Score(b)) => a.total_cmp(b),
			_ => self.rank().cmp(&other.rank()),
		}
	}
}

impl PartialOrd for SortValue {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

/// A point in a ranked sequence: a sort value plus the entity id breaking ties.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
	pub value: SortValue,
	pub id: String,
}
impl Position {
	pub fn new(value: SortValue, id: impl Into<String>) -> Self {
		Self { value, id: id.into() }
	}

	pub fn cmp_ranked(&self, other: &Self, direction: SortDirection) -> Ordering {
		compare_ranked(&self.value, &self.id, &other.value, &other.id, direction)
	}
}

/// Orders by value in the requested direction, then by ascending id in both directions.
pub fn compare_ranked(
	value_a: &SortValue,
	id_a: &str,
	value_b: &SortValue,
	id_b: &str,
	direction: SortDirection,
) -> Ordering {
	let primary = match direction {
		SortDirection::Asc => value_a.cmp(value_b),
		SortDirection::Desc => value_b.cmp(value_a),
	};

	primary.then_with(|| id_a.cmp(id_b))
}

// Scores travel through cursors, so they are stored as raw bits to survive JSON exactly.
mod score_bits {
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S>(value: &f64, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&format!("{:016x}", value.to_bits()))
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<f64, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		u64::from_str_radix(&raw, 16).map(f64::from_bits).map_err(serde::de::Error::custom)
	}
}
