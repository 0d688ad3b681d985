use std::collections::BTreeSet;

use scout_providers::subgraph::SchemaSnapshot;

pub(crate) const AGENT_COLLECTIONS: &[&str] = &["agents", "agentEntities"];
pub(crate) const AGENT_TYPES: &[&str] = &["Agent", "AgentEntity"];
pub(crate) const REGISTRATION_TYPES: &[&str] = &["AgentRegistrationFile", "RegistrationFile"];
pub(crate) const STATS_COLLECTIONS: &[&str] = &["agentStats", "agentStatistics"];
pub(crate) const STATS_TYPES: &[&str] = &["AgentStats", "AgentStatistic"];
pub(crate) const FEEDBACK_COLLECTIONS: &[&str] = &["feedbacks", "feedbackEntries"];
pub(crate) const FEEDBACK_TYPES: &[&str] = &["Feedback", "FeedbackEntry"];
pub(crate) const TEXT_SEARCH_FIELDS: &[&str] = &["agentSearch", "registrationFileSearch"];

/// First candidate the probe accepts.
pub(crate) fn resolve_alias<'a>(
	candidates: &[&'a str],
	available: impl Fn(&str) -> bool,
) -> Option<&'a str> {
	candidates.iter().copied().find(|candidate| available(candidate))
}

/// One entity type: its root collection (if queried directly), selectable fields, and the
/// keys its `<Type>_filter` input accepts.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct EntityCapability {
	pub(crate) collection: String,
	pub(crate) type_name: String,
	pub(crate) fields: BTreeSet<String>,
	pub(crate) filter: BTreeSet<String>,
}
impl EntityCapability {
	fn probe(
		snapshot: &SchemaSnapshot,
		collections: &[&str],
		types: &[&str],
	) -> Option<Self> {
		let collection = match collections {
			[] => String::new(),
			_ => resolve_alias(collections, |name| snapshot.has_query_field(name))?.to_string(),
		};
		let type_name = resolve_alias(types, |name| snapshot.has_type(name))?;
		let fields = snapshot.types.get(type_name).cloned().unwrap_or_default();
		let filter = snapshot.types.get(&format!("{type_name}_filter")).cloned().unwrap_or_default();

		Some(Self { collection, type_name: type_name.to_string(), fields, filter })
	}

	pub(crate) fn has(&self, field: &str) -> bool {
		self.fields.contains(field)
	}

	pub(crate) fn accepts(&self, key: &str) -> bool {
		self.filter.contains(key)
	}
}

/// What one subgraph deployment can answer, resolved once from its schema.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SourceCapabilities {
	pub(crate) agents: EntityCapability,
	/// Registration file reachable through `Agent.registrationFile`.
	pub(crate) registration: Option<EntityCapability>,
	pub(crate) stats: Option<EntityCapability>,
	pub(crate) feedback: Option<EntityCapability>,
	pub(crate) text_search: Option<String>,
}
impl SourceCapabilities {
	pub(crate) fn probe(snapshot: &SchemaSnapshot) -> Result<Self, String> {
		let agents = EntityCapability::probe(snapshot, AGENT_COLLECTIONS, AGENT_TYPES)
			.ok_or_else(|| {
				format!(
					"Schema exposes none of the agent collections {AGENT_COLLECTIONS:?} with types \
					 {AGENT_TYPES:?}."
				)
			})?;

		if !agents.has("id") {
			return Err(format!("Agent type {} has no id field.", agents.type_name));
		}

		let registration = agents
			.has("registrationFile")
			.then(|| EntityCapability::probe(snapshot, &[], REGISTRATION_TYPES))
			.flatten();
		let stats = EntityCapability::probe(snapshot, STATS_COLLECTIONS, STATS_TYPES);
		let feedback = EntityCapability::probe(snapshot, FEEDBACK_COLLECTIONS, FEEDBACK_TYPES);
		let text_search = resolve_alias(TEXT_SEARCH_FIELDS, |name| snapshot.has_query_field(name))
			.map(str::to_string);

		Ok(Self { agents, registration, stats, feedback, text_search })
	}

	pub(crate) fn registration_has(&self, field: &str) -> bool {
		self.registration.as_ref().is_some_and(|reg| reg.has(field))
	}

	/// Nested registration filters need both the `registrationFile_` key and the key on the
	/// registration filter type.
	pub(crate) fn registration_accepts(&self, key: &str) -> bool {
		self.agents.accepts("registrationFile_")
			&& self.registration.as_ref().is_some_and(|reg| reg.accepts(key))
	}

	/// Keyset scans need the field, its ordering, and range plus equality filters on it.
	pub(crate) fn supports_keyset(&self, field: &str) -> bool {
		self.agents.has(field)
			&& self.agents.accepts(field)
			&& self.agents.accepts(&format!("{field}_gt"))
			&& self.agents.accepts(&format!("{field}_lt"))
			&& self.agents.accepts("id_gt")
	}
}

#[cfg(test)]
mod tests {
	use std::collections::BTreeMap;

	use super::*;

	fn snapshot(query_fields: &[&str], types: &[(&str, &[&str])]) -> SchemaSnapshot {
		SchemaSnapshot {
			query_fields: query_fields.iter().map(|name| name.to_string()).collect(),
			types: types
				.iter()
				.map(|(name, fields)| {
					(name.to_string(), fields.iter().map(|field| field.to_string()).collect())
				})
				.collect::<BTreeMap<_, _>>(),
		}
	}

	#[test]
	fn alias_resolution_prefers_the_first_candidate() {
		assert_eq!(resolve_alias(&["a", "b"], |name| name == "b"), Some("b"));
		assert_eq!(resolve_alias(&["a", "b"], |_| true), Some("a"));
		assert_eq!(resolve_alias(&["a", "b"], |_| false), None);
	}

	#[test]
	fn probes_legacy_aliases() {
		let schema = snapshot(
			&["agentEntities", "agentStatistics", "registrationFileSearch"],
			&[
				("AgentEntity", &["id", "registrationFile", "updatedAt"]),
				("AgentEntity_filter", &["id_in", "registrationFile_", "updatedAt_gt"]),
				("RegistrationFile", &["name", "oasfSkills"]),
				("RegistrationFile_filter", &["oasfSkills_not"]),
				("AgentStatistic", &["id", "totalFeedback"]),
			],
		);
		let caps = SourceCapabilities::probe(&schema).expect("Probe should succeed.");

		assert_eq!(caps.agents.collection, "agentEntities");
		assert_eq!(caps.stats.as_ref().map(|stats| stats.collection.as_str()), Some("agentStatistics"));
		assert!(caps.feedback.is_none());
		assert_eq!(caps.text_search.as_deref(), Some("registrationFileSearch"));
		assert!(caps.registration_accepts("oasfSkills_not"));
		assert!(!caps.registration_accepts("hasOASF"));
		assert!(!caps.supports_keyset("updatedAt"));
	}

	#[test]
	fn missing_agent_collection_is_a_schema_error() {
		let schema = snapshot(&["tokens"], &[("Token", &["id"])]);

		assert!(SourceCapabilities::probe(&schema).is_err());
	}
}
