use std::{
	collections::{BTreeMap, BTreeSet, HashMap},
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::{Duration, Instant},
};

use scout_config::Sources;
use scout_domain::{Position, SortDirection, SortKey, SortValue, compare_ranked};
use scout_providers::subgraph::CollectionQuery;
use serde_json::{Map, Value};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::{
	BoxFuture, Error, ProviderResult, Result, SourceConnector, SourceFailure, SourceFailureKind,
	registry::{SourceEntry, SourceRegistry},
	search::{
		SearchFilters,
		capabilities::SourceCapabilities,
		cursor::Fragment,
		feedback::{self, JoinedRecord},
		filter::{self, SourcePlan, Strategy},
	},
};

/// Per-search inputs shared by every source task.
pub(crate) struct ExecutionPlan {
	pub(crate) search_id: Uuid,
	pub(crate) filters: SearchFilters,
	pub(crate) sort: SortKey,
	pub(crate) direction: SortDirection,
	pub(crate) page_size: u32,
	pub(crate) scores: Option<Arc<HashMap<String, f64>>>,
	pub(crate) search: scout_config::Search,
	pub(crate) retry: scout_config::Retry,
	pub(crate) source_timeout: Duration,
	pub(crate) deadline: Instant,
}

pub(crate) struct SourceJob {
	pub(crate) chain_id: u64,
	pub(crate) fragment: Fragment,
	/// Entity ids the chain is restricted to, if any.
	pub(crate) scope: Option<BTreeSet<String>>,
}

/// Records one source contributes to a page, in comparator order.
#[derive(Debug)]
pub(crate) struct SourceBuffer {
	pub(crate) chain_id: u64,
	pub(crate) input: Fragment,
	pub(crate) records: Vec<JoinedRecord>,
	/// No records exist past the buffer.
	pub(crate) exhausted: bool,
	/// Last raw row examined, matched or not. Resuming after it skips nothing unseen.
	pub(crate) scan_position: Option<Position>,
	pub(crate) total: Option<u64>,
}

#[derive(Debug)]
pub(crate) struct SourceOutcome {
	pub(crate) result: Result<SourceBuffer, SourceFailure>,
	/// Fragment the source was started from.
	pub(crate) fragment: Fragment,
	pub(crate) elapsed_ms: u64,
	pub(crate) attempts: u32,
}

enum Abort {
	Source(SourceFailure),
	/// Ends the whole search, not just this source.
	Fatal(Error),
}

impl From<SourceFailure> for Abort {
	fn from(failure: SourceFailure) -> Self {
		Self::Source(failure)
	}
}

impl From<Error> for Abort {
	fn from(err: Error) -> Self {
		Self::Fatal(err)
	}
}

struct Running {
	chain_id: u64,
	fragment: Fragment,
	requests: Arc<AtomicU32>,
	started: Instant,
}

/// Queries every job's source concurrently under the search deadline.
pub(crate) async fn run(
	plan: &Arc<ExecutionPlan>,
	registry: &SourceRegistry,
	cfg: &Sources,
	connector: &dyn SourceConnector,
	jobs: Vec<SourceJob>,
) -> Result<BTreeMap<u64, SourceOutcome>> {
	let mut outcomes = BTreeMap::new();
	let mut tasks = JoinSet::new();
	let mut running = HashMap::new();
	let deadline = tokio::time::Instant::from_std(plan.deadline);

	for job in jobs {
		let entry = match registry.entry(cfg, connector, job.chain_id) {
			Ok(entry) => entry,
			Err(failure) => {
				if plan.search.fail_fast {
					return Err(Error::Source { failure });
				}

				outcomes.insert(
					job.chain_id,
					SourceOutcome {
						result: Err(failure),
						fragment: job.fragment,
						elapsed_ms: 0,
						attempts: 0,
					},
				);

				continue;
			},
		};
		let requests = Arc::new(AtomicU32::new(0));
		let source_run = SourceRun { entry, plan: plan.clone(), requests: requests.clone() };
		let info = Running {
			chain_id: job.chain_id,
			fragment: job.fragment.clone(),
			requests,
			started: Instant::now(),
		};
		let handle = tasks.spawn(async move {
			tokio::time::timeout_at(deadline, source_run.execute(job)).await
		});

		running.insert(handle.id(), info);
	}

	while let Some(joined) = tasks.join_next_with_id().await {
		let (task_id, joined) = match joined {
			Ok((task_id, result)) => (task_id, Ok(result)),
			Err(err) => (err.id(), Err(err)),
		};
		let Some(info) = running.remove(&task_id) else {
			continue;
		};
		let attempts = info.requests.load(Ordering::Relaxed);
		let result = match joined {
			Ok(Ok(Ok(buffer))) => Ok(buffer),
			// Schema failures carry no attempt count of their own.
			Ok(Ok(Err(Abort::Source(failure)))) if failure.kind == SourceFailureKind::Schema =>
				Err(SourceFailure { attempts, ..failure }),
			Ok(Ok(Err(Abort::Source(failure)))) => Err(failure),
			Ok(Ok(Err(Abort::Fatal(err)))) => {
				tasks.abort_all();

				return Err(err);
			},
			Ok(Err(_)) => Err(SourceFailure {
				chain_id: info.chain_id,
				kind: SourceFailureKind::Timeout,
				message: "Search deadline elapsed before the source finished.".to_string(),
				attempts,
			}),
			Err(err) => Err(SourceFailure {
				chain_id: info.chain_id,
				kind: SourceFailureKind::Transport,
				message: format!("Source task ended abnormally: {err}."),
				attempts,
			}),
		};

		if plan.search.fail_fast
			&& let Err(failure) = &result
		{
			tasks.abort_all();

			return Err(Error::Source { failure: failure.clone() });
		}

		outcomes.insert(
			info.chain_id,
			SourceOutcome {
				result,
				fragment: info.fragment,
				elapsed_ms: info.started.elapsed().as_millis() as u64,
				attempts,
			},
		);
	}

	Ok(outcomes)
}

/// One source's share of a search: its connection, the shared plan and a request counter.
pub(crate) struct SourceRun {
	entry: Arc<SourceEntry>,
	plan: Arc<ExecutionPlan>,
	requests: Arc<AtomicU32>,
}
impl SourceRun {
	pub(crate) async fn query(&self, query: &CollectionQuery) -> Result<Vec<Value>, SourceFailure> {
		let source = &self.entry.source;

		self.call(|| source.query_collection(query)).await
	}

	/// Runs `op` under the per-request timeout, retrying transient failures with exponential
	/// backoff.
	async fn call<'s, T>(
		&self,
		op: impl Fn() -> BoxFuture<'s, ProviderResult<T>>,
	) -> Result<T, SourceFailure> {
		let retry = &self.plan.retry;
		let mut attempt = 0;

		loop {
			attempt += 1;

			self.requests.fetch_add(1, Ordering::Relaxed);

			let result = match tokio::time::timeout(self.plan.source_timeout, op()).await {
				Ok(result) => result,
				Err(_) => Err(scout_providers::Error::Timeout {
					message: format!(
						"No response within {} ms.",
						self.plan.source_timeout.as_millis()
					),
				}),
			};

			match result {
				Ok(value) => return Ok(value),
				Err(err) if err.is_transient() && attempt <= retry.max_retries => {
					let backoff = backoff(retry, attempt);

					tracing::warn!(
						search_id = %self.plan.search_id,
						chain_id = self.entry.chain_id,
						attempt,
						backoff_ms = backoff.as_millis() as u64,
						error = %err,
						"Source request failed; retrying."
					);
					tokio::time::sleep(backoff).await;
				},
				Err(err) => return Err(SourceFailure::from_provider(self.entry.chain_id, &err, attempt)),
			}
		}
	}

	async fn execute(self, job: SourceJob) -> Result<SourceBuffer, Abort> {
		let chain_id = self.entry.chain_id;
		let source = &self.entry.source;
		let caps = self
			.entry
			.capabilities(|| async { self.call(|| source.introspect()).await })
			.await?;
		let mut source_plan = filter::compile(
			chain_id,
			&self.plan.filters,
			self.plan.sort,
			&caps,
			self.plan.search.max_batch_size,
		)?;

		if let Some(scope) = job.scope {
			source_plan.restrict_ids(scope);
		}
		if let Some(text) = source_plan.text_search.clone() {
			let ids = self.call(|| source.search_text(&text)).await?;

			source_plan.restrict_ids(ids.into_iter().collect());
		}
		if source_plan.is_empty() || job.fragment == Fragment::Done {
			return Ok(SourceBuffer {
				chain_id,
				input: job.fragment,
				records: Vec::new(),
				exhausted: true,
				scan_position: None,
				total: Some(0),
			});
		}

		match source_plan.strategy {
			Strategy::Keyset { field } => self.keyset(&caps, &source_plan, field, job.fragment).await,
			Strategy::Local => self.local(&caps, &source_plan, job.fragment).await,
		}
	}

	/// Backend-ordered scan: batches ordered by `field`, resumed through range filters, with
	/// tie groups walked by id.
	async fn keyset(
		&self,
		caps: &SourceCapabilities,
		source_plan: &SourcePlan,
		field: &'static str,
		input: Fragment,
	) -> Result<SourceBuffer, Abort> {
		let chain_id = self.entry.chain_id;
		let search = &self.plan.search;
		let direction = self.plan.direction;
		let target = self.plan.page_size as usize;
		let mut scan = match &input {
			Fragment::Start => Scan::Start,
			Fragment::After(position) => match position.value {
				SortValue::Integer(value) => Scan::InGroup { value, after_id: position.id.clone() },
				_ =>
					return Err(Abort::Fatal(Error::InvalidCursor {
						message: format!("Chain {chain_id} position does not fit the sort key."),
					})),
			},
			Fragment::Done => Scan::Exhausted,
		};
		let mut batch = self
			.plan
			.page_size
			.saturating_mul(search.batch_multiplier)
			.clamp(1, search.max_batch_size.max(1));
		let mut records = Vec::new();
		let mut scan_position = None;
		let mut rounds = 0;

		while records.len() < target && scan != Scan::Exhausted && rounds < search.max_refill_rounds.max(1)
		{
			let query = scan.query(source_plan, field, direction, batch);
			let rows = self.query(&query).await?;
			let full = rows.len() as u32 >= batch;
			let mut keyed = Vec::with_capacity(rows.len());

			for row in rows {
				let Some(id) = row.get("id").and_then(Value::as_str).map(str::to_string) else {
					return Err(SourceFailure::schema(chain_id, "Agent row is missing its id.").into());
				};
				let Some(value) =
					filter::graph_int(row.get(field)).and_then(|value| u64::try_from(value).ok())
				else {
					return Err(SourceFailure::schema(
						chain_id,
						format!("Agent {id} has no usable {field} value."),
					)
					.into());
				};

				keyed.push((value, id, row));
			}

			// Backends order ties arbitrarily; re-rank before trusting batch boundaries.
			keyed.sort_by(|(value_a, id_a, _), (value_b, id_b, _)| {
				compare_ranked(
					&SortValue::Integer(*value_a),
					id_a,
					&SortValue::Integer(*value_b),
					id_b,
					direction,
				)
			});

			let next = match (&scan, full) {
				(Scan::InGroup { value, .. }, true) => Scan::InGroup {
					value: *value,
					after_id: keyed.last().map(|(_, id, _)| id.clone()).unwrap_or_default(),
				},
				(Scan::InGroup { value, .. }, false) => Scan::After { value: *value },
				(_, true) => {
					let Some(last) = keyed.last().map(|(value, _, _)| *value) else {
						break;
					};

					keyed.retain(|(value, _, _)| *value != last);

					Scan::InGroup { value: last, after_id: String::new() }
				},
				(_, false) => Scan::Exhausted,
			};

			tracing::debug!(
				search_id = %self.plan.search_id,
				chain_id,
				batch,
				processed = keyed.len(),
				"Keyset batch fetched."
			);

			if !keyed.is_empty() {
				rounds += 1;
			}

			let mut matched = Vec::new();

			for (value, id, row) in keyed {
				scan_position = Some(Position::new(SortValue::Integer(value), id));

				if source_plan.accepts(&row)
					&& let Some(record) = JoinedRecord::new(chain_id, row)
				{
					matched.push(record);
				}
			}

			records.extend(self.join(caps, source_plan, matched).await?);

			scan = next;
			batch = batch.saturating_mul(2).min(search.max_batch_size.max(1));
		}

		Ok(SourceBuffer {
			chain_id,
			input,
			records,
			exhausted: scan == Scan::Exhausted,
			scan_position,
			total: None,
		})
	}

	/// Fetches every match, then ranks and resumes here.
	async fn local(
		&self,
		caps: &SourceCapabilities,
		source_plan: &SourcePlan,
		input: Fragment,
	) -> Result<SourceBuffer, Abort> {
		let chain_id = self.entry.chain_id;
		let search = &self.plan.search;
		let batch = search.max_batch_size.max(1);
		let by_id = caps.agents.accepts("id_gt");
		let mut matched = Vec::new();
		let mut fetched_total = 0_u32;
		let mut last_id: Option<String> = None;
		let mut truncated = false;

		loop {
			let mut filter = source_plan.base_filter();

			if by_id && let Some(last_id) = &last_id {
				filter.insert("id_gt".to_string(), Value::String(last_id.clone()));
			}

			let query = CollectionQuery {
				collection: source_plan.collection.clone(),
				filter,
				order_by: Some("id".to_string()),
				order_direction: Some(SortDirection::Asc),
				first: batch,
				skip: if by_id { 0 } else { fetched_total },
				selection: source_plan.selection.clone(),
			};
			let rows = self.query(&query).await?;
			let fetched = rows.len() as u32;

			fetched_total += fetched;

			for row in rows {
				if let Some(id) = row.get("id").and_then(Value::as_str) {
					last_id = Some(id.to_string());
				}
				if source_plan.accepts(&row)
					&& let Some(record) = JoinedRecord::new(chain_id, row)
				{
					matched.push(record);
				}
			}

			if fetched < batch {
				break;
			}
			if fetched_total >= search.max_local_records {
				truncated = true;

				tracing::warn!(
					search_id = %self.plan.search_id,
					chain_id,
					limit = search.max_local_records,
					"Local ranking hit its record limit; results are truncated."
				);

				break;
			}
		}

		let mut records = self.join(caps, source_plan, matched).await?;
		let direction = self.plan.direction;

		records.sort_by(|a, b| compare_ranked(&a.sort_value, &a.id, &b.sort_value, &b.id, direction));

		let total = (!truncated).then_some(records.len() as u64);

		if let Fragment::After(position) = &input {
			records.retain(|record| {
				compare_ranked(&record.sort_value, &record.id, &position.value, &position.id, direction)
					.is_gt()
			});
		}

		let exhausted = records.len() <= self.plan.page_size as usize;

		records.truncate(self.plan.page_size as usize);

		let scan_position =
			records.last().map(|record| Position::new(record.sort_value.clone(), record.id.clone()));

		Ok(SourceBuffer { chain_id, input, records, exhausted, scan_position, total })
	}

	/// Joins reputation aggregates, then fills in semantic scores and sort values.
	async fn join(
		&self,
		caps: &SourceCapabilities,
		source_plan: &SourcePlan,
		matched: Vec<JoinedRecord>,
	) -> Result<Vec<JoinedRecord>, SourceFailure> {
		let search = &self.plan.search;
		let mut records = feedback::join(
			self,
			caps,
			&source_plan.feedback,
			matched,
			search.feedback_batch_size,
			search.max_batch_size,
		)
		.await?;

		for record in &mut records {
			record.semantic_score =
				self.plan.scores.as_ref().and_then(|scores| scores.get(&record.id).copied());
			record.sort_value = record.sort_value_for(self.plan.sort);
		}

		Ok(records)
	}
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Scan {
	Start,
	/// Rows sharing `value`, walked by ascending id.
	InGroup { value: u64, after_id: String },
	/// Rows strictly past `value`.
	After { value: u64 },
	Exhausted,
}
impl Scan {
	fn query(
		&self,
		source_plan: &SourcePlan,
		field: &str,
		direction: SortDirection,
		batch: u32,
	) -> CollectionQuery {
		let mut filter = source_plan.base_filter();
		let (order_by, order_direction) = match self {
			Self::InGroup { value, after_id } => {
				filter.insert(field.to_string(), Value::String(value.to_string()));

				if !after_id.is_empty() {
					filter.insert("id_gt".to_string(), Value::String(after_id.clone()));
				}

				("id".to_string(), SortDirection::Asc)
			},
			Self::After { value } => {
				match direction {
					SortDirection::Asc => tighten(&mut filter, &format!("{field}_gt"), *value, true),
					SortDirection::Desc => tighten(&mut filter, &format!("{field}_lt"), *value, false),
				}

				(field.to_string(), direction)
			},
			Self::Start | Self::Exhausted => (field.to_string(), direction),
		};

		CollectionQuery {
			collection: source_plan.collection.clone(),
			filter,
			order_by: Some(order_by),
			order_direction: Some(order_direction),
			first: batch,
			skip: 0,
			selection: source_plan.selection.clone(),
		}
	}
}

/// Adds a strict bound, keeping an existing one on the same key when it is tighter.
fn tighten(filter: &mut Map<String, Value>, key: &str, bound: u64, lower: bool) {
	let existing = filter.get(key).and_then(|value| filter::graph_int(Some(value)));
	let bound = match existing.and_then(|existing| u64::try_from(existing).ok()) {
		Some(existing) if lower => existing.max(bound),
		Some(existing) => existing.min(bound),
		None => bound,
	};

	filter.insert(key.to_string(), Value::String(bound.to_string()));
}

fn backoff(retry: &scout_config::Retry, attempt: u32) -> Duration {
	let factor = 1_u64 << attempt.saturating_sub(1).min(16);

	Duration::from_millis(retry.backoff_ms.saturating_mul(factor).min(retry.max_backoff_ms))
}
