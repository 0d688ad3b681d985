use serde_json::{Map, Value, json};

/// One agent as it would be indexed by a subgraph.
#[derive(Clone, Debug)]
pub struct AgentFixture {
	pub chain_id: u64,
	pub token_id: u64,
	pub owner: String,
	pub operators: Vec<String>,
	pub wallet: Option<String>,
	pub created_at: i64,
	pub updated_at: i64,
	pub last_activity: i64,
	pub registration: Map<String, Value>,
	pub metadata: Vec<(String, String)>,
}
impl AgentFixture {
	/// Timestamps default to `1_700_000_000 + token_id`.
	pub fn new(chain_id: u64, token_id: u64) -> Self {
		let at = 1_700_000_000 + token_id as i64;

		Self {
			chain_id,
			token_id,
			owner: format!("0x{:040x}", token_id),
			operators: Vec::new(),
			wallet: None,
			created_at: at,
			updated_at: at,
			last_activity: at,
			registration: Map::new(),
			metadata: Vec::new(),
		}
	}

	pub fn id(&self) -> String {
		format!("{}:{}", self.chain_id, self.token_id)
	}

	pub fn created_at(mut self, secs: i64) -> Self {
		self.created_at = secs;

		self
	}

	pub fn updated_at(mut self, secs: i64) -> Self {
		self.updated_at = secs;

		self
	}

	pub fn owner(mut self, owner: &str) -> Self {
		self.owner = owner.to_string();

		self
	}

	pub fn operator(mut self, operator: &str) -> Self {
		self.operators.push(operator.to_string());

		self
	}

	pub fn name(self, name: &str) -> Self {
		self.registration("name", json!(name))
	}

	pub fn description(self, description: &str) -> Self {
		self.registration("description", json!(description))
	}

	pub fn mcp(self, endpoint: &str) -> Self {
		self.registration("mcpEndpoint", json!(endpoint))
	}

	pub fn a2a(self, endpoint: &str) -> Self {
		self.registration("a2aEndpoint", json!(endpoint))
	}

	pub fn oasf_skills(self, skills: &[&str]) -> Self {
		self.registration("oasfSkills", json!(skills))
	}

	pub fn oasf_domains(self, domains: &[&str]) -> Self {
		self.registration("oasfDomains", json!(domains))
	}

	pub fn active(self, active: bool) -> Self {
		self.registration("active", json!(active))
	}

	pub fn registration(mut self, field: &str, value: Value) -> Self {
		self.registration.insert(field.to_string(), value);

		self
	}

	pub fn metadata(mut self, key: &str, value: &str) -> Self {
		self.metadata.push((key.to_string(), value.to_string()));

		self
	}

	/// Registration file row. Array fields a subgraph would always return are filled with `[]`.
	pub(crate) fn registration_row(&self, native_oasf: bool) -> Value {
		let mut row = self.registration.clone();

		row.insert("id".to_string(), json!(format!("{}#registration", self.id())));

		for field in [
			"mcpTools",
			"mcpPrompts",
			"mcpResources",
			"a2aSkills",
			"oasfSkills",
			"oasfDomains",
			"supportedTrusts",
		] {
			row.entry(field.to_string()).or_insert_with(|| json!([]));
		}

		if native_oasf {
			let non_empty = |field: &str| row.get(field).and_then(Value::as_array).is_some_and(|items| !items.is_empty());
			let has_oasf = non_empty("oasfSkills") || non_empty("oasfDomains");

			row.insert("hasOASF".to_string(), json!(has_oasf));
		}

		Value::Object(row)
	}
}

/// One feedback entry left for an agent.
#[derive(Clone, Debug)]
pub struct FeedbackFixture {
	pub agent_id: String,
	pub client: String,
	pub value: u32,
	pub tag1: Option<String>,
	pub tag2: Option<String>,
	pub revoked: bool,
}
impl FeedbackFixture {
	pub fn new(agent: &AgentFixture, client: &str, value: u32) -> Self {
		Self {
			agent_id: agent.id(),
			client: client.to_lowercase(),
			value,
			tag1: None,
			tag2: None,
			revoked: false,
		}
	}

	pub fn tags(mut self, tag1: &str, tag2: &str) -> Self {
		self.tag1 = Some(tag1.to_string());
		self.tag2 = Some(tag2.to_string());

		self
	}

	pub fn revoked(mut self) -> Self {
		self.revoked = true;

		self
	}
}

/// Count and average over non-revoked entries, formatted the way subgraphs return them.
pub(crate) fn aggregates(agent_id: &str, feedback: &[FeedbackFixture]) -> (u64, Option<String>) {
	let values: Vec<u32> = feedback
		.iter()
		.filter(|entry| entry.agent_id == agent_id && !entry.revoked)
		.map(|entry| entry.value)
		.collect();

	if values.is_empty() {
		return (0, None);
	}

	let sum: u64 = values.iter().map(|value| u64::from(*value)).sum();
	let average = sum as f64 / values.len() as f64;

	(values.len() as u64, Some(format!("{average}")))
}
