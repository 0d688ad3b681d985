use std::{
	cmp::Ordering,
	collections::{BTreeMap, BinaryHeap},
};

use scout_domain::{Position, SortDirection, compare_ranked};

use crate::search::{cursor::Fragment, executor::SourceBuffer, feedback::JoinedRecord};

pub(crate) struct Merged {
	pub(crate) items: Vec<JoinedRecord>,
	/// Resume point for every merged source.
	pub(crate) fragments: BTreeMap<u64, Fragment>,
}

struct Head<'a> {
	record: &'a JoinedRecord,
	source: usize,
	direction: SortDirection,
}

impl Ord for Head<'_> {
	fn cmp(&self, other: &Self) -> Ordering {
		// Max-heap: the record ranking first must compare greatest.
		compare_ranked(
			&other.record.sort_value,
			&other.record.id,
			&self.record.sort_value,
			&self.record.id,
			self.direction,
		)
	}
}

impl PartialOrd for Head<'_> {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
		Some(self.cmp(other))
	}
}

impl PartialEq for Head<'_> {
	fn eq(&self, other: &Self) -> bool {
		self.cmp(other) == Ordering::Equal
	}
}

impl Eq for Head<'_> {}

/// K-way merge of per-source buffers into one page.
///
/// A source that has run dry without being exhausted holds back every record ranking after its
/// scan position, since its next unseen record could rank ahead of them.
pub(crate) fn merge(buffers: Vec<SourceBuffer>, page_size: usize, direction: SortDirection) -> Merged {
	let mut consumed = vec![0_usize; buffers.len()];
	let mut heap = BinaryHeap::with_capacity(buffers.len());
	let mut emitted = Vec::with_capacity(page_size);

	for (source, buffer) in buffers.iter().enumerate() {
		if let Some(record) = buffer.records.first() {
			heap.push(Head { record, source, direction });
		}
	}

	while emitted.len() < page_size {
		let Some(head) = heap.peek() else {
			break;
		};

		if held_back(head.record, &buffers, &consumed, direction) {
			break;
		}

		let Some(Head { record, source, .. }) = heap.pop() else {
			break;
		};

		emitted.push(record.clone());
		consumed[source] += 1;

		if let Some(next) = buffers[source].records.get(consumed[source]) {
			heap.push(Head { record: next, source, direction });
		}
	}

	let fragments = buffers
		.iter()
		.zip(&consumed)
		.map(|(buffer, consumed)| (buffer.chain_id, next_fragment(buffer, *consumed)))
		.collect();

	Merged { items: emitted, fragments }
}

/// Whether `record` could be preceded by a record some drained, unexhausted source has not
/// fetched yet. Such a source's unfetched records all rank after its scan position; without a
/// scan position nothing is known about them.
fn held_back(
	record: &JoinedRecord,
	buffers: &[SourceBuffer],
	consumed: &[usize],
	direction: SortDirection,
) -> bool {
	buffers.iter().zip(consumed).any(|(buffer, consumed)| {
		if *consumed < buffer.records.len() || buffer.exhausted {
			return false;
		}

		match &buffer.scan_position {
			Some(bound) =>
				compare_ranked(&record.sort_value, &record.id, &bound.value, &bound.id, direction)
					.is_gt(),
			None => true,
		}
	})
}

fn next_fragment(buffer: &SourceBuffer, consumed: usize) -> Fragment {
	if consumed >= buffer.records.len() {
		if buffer.exhausted {
			return Fragment::Done;
		}

		return match &buffer.scan_position {
			Some(position) => Fragment::After(position.clone()),
			None => buffer.input.clone(),
		};
	}
	if consumed == 0 {
		return buffer.input.clone();
	}

	let last = &buffer.records[consumed - 1];

	Fragment::After(Position::new(last.sort_value.clone(), last.id.clone()))
}

#[cfg(test)]
mod tests {
	use scout_domain::SortValue;

	use super::*;

	fn record(chain_id: u64, token: u64, created: u64) -> JoinedRecord {
		let mut record = JoinedRecord::new(
			chain_id,
			serde_json::json!({ "id": format!("{chain_id}:{token}"), "createdAt": created.to_string() }),
		)
		.expect("Record has an id.");

		record.sort_value = SortValue::Integer(created);

		record
	}

	fn buffer(chain_id: u64, created: &[u64], exhausted: bool) -> SourceBuffer {
		let records: Vec<JoinedRecord> = created
			.iter()
			.enumerate()
			.map(|(token, created)| record(chain_id, token as u64, *created))
			.collect();
		let scan_position = records
			.last()
			.map(|record| Position::new(record.sort_value.clone(), record.id.clone()));

		SourceBuffer {
			chain_id,
			input: Fragment::Start,
			records,
			exhausted,
			scan_position,
			total: Some(created.len() as u64),
		}
	}

	fn ids(merged: &Merged) -> Vec<String> {
		merged.items.iter().map(|record| record.id.clone()).collect()
	}

	#[test]
	fn interleaves_three_sources_ascending() {
		let buffers = vec![
			buffer(1, &[10, 40, 70, 100, 130], true),
			buffer(2, &[20, 50, 80], true),
			buffer(3, &[30, 60, 90, 110, 120, 140, 150], true),
		];
		let merged = merge(buffers, 4, SortDirection::Asc);

		assert_eq!(ids(&merged), ["1:0", "2:0", "3:0", "1:1"]);
		assert_eq!(
			merged.fragments[&1],
			Fragment::After(Position::new(SortValue::Integer(40), "1:1"))
		);
		assert_eq!(
			merged.fragments[&2],
			Fragment::After(Position::new(SortValue::Integer(20), "2:0"))
		);
		assert_eq!(
			merged.fragments[&3],
			Fragment::After(Position::new(SortValue::Integer(30), "3:0"))
		);
	}

	#[test]
	fn equal_values_break_ties_by_id() {
		let buffers = vec![buffer(2, &[5, 5], true), buffer(1, &[5], true)];
		let merged = merge(buffers, 10, SortDirection::Desc);

		assert_eq!(ids(&merged), ["1:0", "2:0", "2:1"]);
		assert!(merged.fragments.values().all(|fragment| *fragment == Fragment::Done));
	}

	#[test]
	fn drained_unexhausted_source_blocks_emission() {
		let buffers = vec![buffer(1, &[10], false), buffer(2, &[1, 2, 3, 4], true)];
		let merged = merge(buffers, 10, SortDirection::Asc);

		// Chain 1 has unfetched records, so nothing may follow its last buffered one.
		assert_eq!(ids(&merged), ["2:0", "2:1", "2:2", "2:3", "1:0"]);
		assert_eq!(
			merged.fragments[&1],
			Fragment::After(Position::new(SortValue::Integer(10), "1:0"))
		);
		assert_eq!(merged.fragments[&2], Fragment::Done);

		let buffers = vec![buffer(1, &[], false), buffer(2, &[1, 2], true)];
		let merged = merge(buffers, 10, SortDirection::Asc);

		assert!(merged.items.is_empty());
		assert_eq!(merged.fragments[&1], Fragment::Start);
		assert_eq!(merged.fragments[&2], Fragment::Start);
	}

	#[test]
	fn drained_source_releases_records_up_to_its_scan_position() {
		let mut scanned = buffer(1, &[], false);

		scanned.scan_position = Some(Position::new(SortValue::Integer(3), "1:7"));

		let buffers = vec![scanned, buffer(2, &[1, 2, 4], true)];
		let merged = merge(buffers, 10, SortDirection::Asc);

		assert_eq!(ids(&merged), ["2:0", "2:1"]);
		assert_eq!(
			merged.fragments[&1],
			Fragment::After(Position::new(SortValue::Integer(3), "1:7"))
		);
		assert_eq!(
			merged.fragments[&2],
			Fragment::After(Position::new(SortValue::Integer(2), "2:1"))
		);

		let mut scanned = buffer(1, &[], false);

		scanned.scan_position = Some(Position::new(SortValue::Integer(9), "1:7"));

		let buffers = vec![scanned, buffer(2, &[8, 9, 10], true)];
		let merged = merge(buffers, 10, SortDirection::Desc);

		// "2:1" ties with the scan position but ranks after ids chain 1 has not reached.
		assert_eq!(ids(&merged), ["2:2"]);
	}
}
