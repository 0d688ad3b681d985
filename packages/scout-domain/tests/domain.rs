use std::cmp::Ordering;

use scout_domain::{
	AgentId, ChainSelection, Decimal, Position, SortDirection, SortKey, SortValue, compare_ranked,
	resolve_chains,
};

fn dec(raw: &str) -> Decimal {
	raw.parse().expect("Valid decimal.")
}

#[test]
fn decimals_compare_by_exact_value() {
	assert!(dec("1.10") > dec("1.09"));
	assert!(dec("0.1") < dec("0.12"));
	assert!(dec("10") > dec("9.999999999999999999999"));
	assert!(dec("-2") < dec("-1.5"));
	assert!(dec("-0.001") < Decimal::zero());
	assert_eq!(dec("4.50").cmp(&dec("4.5")), Ordering::Equal);

	// 0.1 + 0.2 style values that collapse under f64 stay distinct.
	assert!(dec("0.30000000000000000001") > dec("0.3"));
}

#[test]
fn decimals_round_trip_through_json() {
	let value = dec("123.4500");
	let json = serde_json::to_string(&value).expect("Serialize decimal.");

	assert_eq!(json, "\"123.45\"");

	let back: Decimal = serde_json::from_str(&json).expect("Deserialize decimal.");

	assert_eq!(back, value);

	let from_number: Decimal = serde_json::from_str("5").expect("Deserialize numeric decimal.");

	assert_eq!(from_number, dec("5.0"));
}

#[test]
fn agent_ids_parse_and_display() {
	let id: AgentId = "11155111:46".parse().expect("Valid agent id.");

	assert_eq!(id.chain_id(), 11_155_111);
	assert_eq!(id.token_id(), "46");
	assert_eq!(id.as_entity_id(), "11155111:46");

	for raw in ["46", "abc:1", "1:", "1:x", ":5"] {
		assert!(raw.parse::<AgentId>().is_err(), "{raw} should not parse");
	}
}

#[test]
fn default_chains_are_mainnet_plus_configured_chain() {
	assert_eq!(resolve_chains(&ChainSelection::Default, 11_155_111, &[]), vec![1, 11_155_111]);
	assert_eq!(resolve_chains(&ChainSelection::Default, 1, &[]), vec![1]);
	assert_eq!(resolve_chains(&ChainSelection::List(Vec::new()), 84_532, &[]), vec![1, 84_532]);
}

#[test]
fn explicit_chains_dedupe_in_order() {
	let selection = ChainSelection::List(vec![84_532, 1, 84_532]);

	assert_eq!(resolve_chains(&selection, 11_155_111, &[]), vec![84_532, 1]);
}

#[test]
fn all_chains_come_from_available_endpoints() {
	assert_eq!(
		resolve_chains(&ChainSelection::All, 11_155_111, &[80_002, 1, 80_002, 84_532]),
		vec![1, 84_532, 80_002]
	);
}

#[test]
fn chain_selection_deserializes_from_keyword_or_list() {
	let all: ChainSelection = serde_json::from_str("\"all\"").expect("Parse all.");
	let list: ChainSelection = serde_json::from_str("[1, 2]").expect("Parse list.");
	let none: ChainSelection = serde_json::from_str("null").expect("Parse null.");

	assert_eq!(all, ChainSelection::All);
	assert_eq!(list, ChainSelection::List(vec![1, 2]));
	assert_eq!(none, ChainSelection::Default);
	assert!(serde_json::from_str::<ChainSelection>("\"some\"").is_err());
}

#[test]
fn ties_break_by_ascending_id_in_both_directions() {
	let a = Position::new(SortValue::Integer(10), "1:2");
	let b = Position::new(SortValue::Integer(10), "1:3");

	assert_eq!(a.cmp_ranked(&b, SortDirection::Asc), Ordering::Less);
	assert_eq!(a.cmp_ranked(&b, SortDirection::Desc), Ordering::Less);

	let c = Position::new(SortValue::Integer(11), "1:1");

	assert_eq!(c.cmp_ranked(&a, SortDirection::Desc), Ordering::Less);
	assert_eq!(c.cmp_ranked(&a, SortDirection::Asc), Ordering::Greater);
}

#[test]
fn missing_values_sort_below_present_ones() {
	let missing = SortValue::Missing;
	let present = SortValue::Decimal(Decimal::zero());

	assert_eq!(
		compare_ranked(&missing, "1:1", &present, "1:2", SortDirection::Asc),
		Ordering::Less
	);
	assert_eq!(
		compare_ranked(&missing, "1:1", &present, "1:2", SortDirection::Desc),
		Ordering::Greater
	);
}

#[test]
fn sort_values_round_trip_exactly() {
	let values = vec![
		SortValue::Missing,
		SortValue::Integer(u64::MAX),
		SortValue::Decimal(dec("-0.000000000000000000000000001")),
		SortValue::Score(0.1 + 0.2),
	];

	for value in values {
		let json = serde_json::to_string(&value).expect("Serialize sort value.");
		let back: SortValue = serde_json::from_str(&json).expect("Deserialize sort value.");

		assert_eq!(back, value, "{json}");
	}
}

#[test]
fn sort_keys_accept_camel_case_aliases() {
	let key: SortKey = serde_json::from_str("\"updatedAt\"").expect("Parse alias.");

	assert_eq!(key, SortKey::UpdatedAt);
	assert_eq!("totalFeedback".parse::<SortKey>(), Ok(SortKey::FeedbackCount));
	assert_eq!(SortKey::SemanticScore.agent_field(), None);
}
