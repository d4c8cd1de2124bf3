//! Scheduler subsystem. Handles periodic and one-shot async tasks, cron
//! schedules, and retries with exponential backoff.
//!
//! The pool's background sweeps (hourly recycling, bucket eviction,
//! resource sampling) run as tasks here instead of free-floating spawned
//! loops, so they can be cancelled together and tests can invoke a task's
//! `run` directly instead of sleeping.

use async_trait::async_trait;
use std::{
	collections::{BTreeMap, HashMap},
	fmt::Debug,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc, Mutex,
	},
};

use chrono::{DateTime, Utc};
use croner::Cron;
use std::str::FromStr;
use tokio_util::sync::CancellationToken;

use crate::prelude::*;
use payflow_types::lock;

pub type TaskId = u64;

/// Cron schedule wrapper using the croner crate.
/// Stores the expression string for display and comparison.
#[derive(Debug, Clone)]
pub struct CronSchedule {
	expr: Box<str>,
	cron: Cron,
}

impl CronSchedule {
	/// Parse a cron expression (5 fields: minute hour day month weekday).
	pub fn parse(expr: &str) -> PfResult<Self> {
		let cron = Cron::from_str(expr)
			.map_err(|e| Error::ValidationError(format!("invalid cron expression: {}", e)))?;
		Ok(Self { expr: expr.into(), cron })
	}

	/// Calculate the next execution time after the given timestamp.
	pub fn next_execution(&self, after: Timestamp) -> PfResult<Timestamp> {
		let dt = DateTime::<Utc>::from_timestamp(after.0, 0).unwrap_or_else(Utc::now);

		self.cron
			.find_next_occurrence(&dt, false)
			.map(|next| Timestamp(next.timestamp()))
			.map_err(|e| {
				error!("Failed to find next cron occurrence for '{}': {}", self.expr, e);
				Error::ValidationError(format!("cron next_execution failed: {}", e))
			})
	}

	pub fn as_str(&self) -> &str {
		&self.expr
	}
}

impl PartialEq for CronSchedule {
	fn eq(&self, other: &Self) -> bool {
		self.expr == other.expr
	}
}

impl Eq for CronSchedule {}

/// A unit of background work. `run` errors are absorbed by the scheduler
/// (retried or rescheduled), never propagated to request handling.
#[async_trait]
pub trait Task<S: Clone>: Send + Sync + Debug {
	fn kind(&self) -> &'static str;
	async fn run(&self, state: &S) -> PfResult<()>;
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
	wait_min_max: (u64, u64),
	times: u16,
}

impl Default for RetryPolicy {
	fn default() -> Self {
		Self { wait_min_max: (60, 3600), times: 10 }
	}
}

impl RetryPolicy {
	pub fn new(wait_min_max: (u64, u64), times: u16) -> Self {
		Self { wait_min_max, times }
	}

	/// Exponential backoff in seconds: min * 2^attempt, capped at max.
	pub fn calculate_backoff(&self, attempt_count: u16) -> u64 {
		let (min, max) = self.wait_min_max;
		let backoff = min.saturating_mul(1u64 << u64::from(attempt_count.min(32)));
		backoff.min(max)
	}

	pub fn should_retry(&self, attempt_count: u16) -> bool {
		attempt_count < self.times
	}
}

#[derive(Clone, Debug)]
struct TaskMeta<S: Clone> {
	task: Arc<dyn Task<S>>,
	next_at: Option<Timestamp>,
	retry_count: u16,
	retry: Option<RetryPolicy>,
	cron: Option<CronSchedule>,
}

// TaskSchedulerBuilder - fluent API for task scheduling
//*******************************************************
pub struct TaskSchedulerBuilder<'a, S: Clone> {
	scheduler: &'a Scheduler<S>,
	task: Arc<dyn Task<S>>,
	next_at: Option<Timestamp>,
	retry: Option<RetryPolicy>,
	cron: Option<CronSchedule>,
}

impl<'a, S: Clone + Send + Sync + 'static> TaskSchedulerBuilder<'a, S> {
	fn new(scheduler: &'a Scheduler<S>, task: Arc<dyn Task<S>>) -> Self {
		Self { scheduler, task, next_at: None, retry: None, cron: None }
	}

	/// Recur on a cron expression, e.g. `.cron("0 * * * *")` for hourly.
	pub fn cron(mut self, expr: &str) -> PfResult<Self> {
		let cron_schedule = CronSchedule::parse(expr)?;
		self.next_at = Some(cron_schedule.next_execution(Timestamp::now())?);
		self.cron = Some(cron_schedule);
		Ok(self)
	}

	/// Run once after a relative delay (in seconds).
	pub fn schedule_after(mut self, seconds: i64) -> Self {
		self.next_at = Some(Timestamp::from_now(seconds));
		self
	}

	/// Retry failed runs with exponential backoff.
	pub fn with_retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = Some(policy);
		self
	}

	/// Queue the task with all configured options.
	pub fn schedule(self) -> PfResult<TaskId> {
		let meta = TaskMeta {
			task: self.task,
			next_at: self.next_at,
			retry_count: 0,
			retry: self.retry,
			cron: self.cron,
		};
		self.scheduler.add_queue(meta)
	}

	/// Queue for immediate execution.
	pub fn now(mut self) -> PfResult<TaskId> {
		self.next_at = Some(Timestamp(0));
		self.schedule()
	}
}

type ScheduledTaskMap<S> = BTreeMap<(Timestamp, TaskId), TaskMeta<S>>;

// Scheduler
#[derive(Clone)]
pub struct Scheduler<S: Clone> {
	next_id: Arc<AtomicU64>,
	tasks_scheduled: Arc<Mutex<ScheduledTaskMap<S>>>,
	tasks_running: Arc<Mutex<HashMap<TaskId, TaskMeta<S>>>>,
	tx_finish: flume::Sender<(TaskId, bool)>,
	rx_finish: flume::Receiver<(TaskId, bool)>,
	notify_schedule: Arc<tokio::sync::Notify>,
	cancel: CancellationToken,
}

impl<S: Clone + Send + Sync + 'static> Scheduler<S> {
	pub fn new() -> Arc<Self> {
		let (tx_finish, rx_finish) = flume::unbounded();

		Arc::new(Self {
			next_id: Arc::new(AtomicU64::new(1)),
			tasks_scheduled: Arc::new(Mutex::new(BTreeMap::new())),
			tasks_running: Arc::new(Mutex::new(HashMap::new())),
			tx_finish,
			rx_finish,
			notify_schedule: Arc::new(tokio::sync::Notify::new()),
			cancel: CancellationToken::new(),
		})
	}

	/// Create a builder for scheduling a task using the fluent API.
	pub fn task(&self, task: Arc<dyn Task<S>>) -> TaskSchedulerBuilder<'_, S> {
		TaskSchedulerBuilder::new(self, task)
	}

	/// Stops both scheduler loops. In-flight task runs complete.
	pub fn shutdown(&self) {
		self.cancel.cancel();
	}

	fn add_queue(&self, meta: TaskMeta<S>) -> PfResult<TaskId> {
		let id = self.next_id.fetch_add(1, Ordering::Relaxed);
		let next_at = meta.next_at.unwrap_or(Timestamp(0));
		debug!("Scheduling task {} ({}) for {}", id, meta.task.kind(), next_at);
		lock!(self.tasks_scheduled, "tasks_scheduled")?.insert((next_at, id), meta);
		self.notify_schedule.notify_one();
		Ok(id)
	}

	fn requeue(&self, id: TaskId, meta: TaskMeta<S>) -> PfResult<()> {
		let next_at = meta.next_at.unwrap_or(Timestamp(0));
		lock!(self.tasks_scheduled, "tasks_scheduled")?.insert((next_at, id), meta);
		self.notify_schedule.notify_one();
		Ok(())
	}

	fn spawn_task(&self, state: S, id: TaskId, meta: &TaskMeta<S>) {
		let task = meta.task.clone();
		let tx_finish = self.tx_finish.clone();
		tokio::spawn(async move {
			let ok = match task.run(&state).await {
				Ok(()) => true,
				Err(e) => {
					warn!("Task {} ({}) failed: {}", id, task.kind(), e);
					false
				}
			};
			if tx_finish.send((id, ok)).is_err() {
				error!("Scheduler finish channel closed; task {} result dropped", id);
			}
		});
	}

	pub fn start(&self, state: S) {
		// Handle finished tasks: cron reschedule, retry on failure
		let schedule = self.clone();
		let cancel = self.cancel.clone();
		let rx_finish = self.rx_finish.clone();
		tokio::spawn(async move {
			loop {
				let (id, ok) = tokio::select! {
					res = rx_finish.recv_async() => match res {
						Ok(v) => v,
						Err(_) => break,
					},
					() = cancel.cancelled() => break,
				};
				debug!("Completed task {} (ok={})", id, ok);
				if let Err(e) = schedule.on_finished(id, ok) {
					error!("Failed to process finished task {}: {}", id, e);
				}
			}
		});

		// Handle scheduled tasks
		let schedule = self.clone();
		let cancel = self.cancel.clone();
		tokio::spawn(async move {
			loop {
				let next_due = match schedule.spawn_due(&state) {
					Ok(next_due) => next_due,
					Err(e) => {
						error!("Scheduler queue error: {}", e);
						None
					}
				};

				let wait = match next_due {
					Some(at) => {
						let diff = at.seconds_since(Timestamp::now()).max(0);
						tokio::time::Duration::from_secs(diff.unsigned_abs())
					}
					// Idle until something is queued
					None => tokio::time::Duration::from_secs(3600),
				};
				tokio::select! {
					() = tokio::time::sleep(wait) => (),
					() = schedule.notify_schedule.notified() => (),
					() = cancel.cancelled() => break,
				};
			}
		});
	}

	/// Moves every due task to running and spawns it; returns the next
	/// wake-up time, if any task remains queued.
	fn spawn_due(&self, state: &S) -> PfResult<Option<Timestamp>> {
		loop {
			let due = {
				let mut scheduled = lock!(self.tasks_scheduled, "tasks_scheduled")?;
				let head = scheduled.first_key_value().map(|(&key, _)| key);
				match head {
					Some((at, id)) if at <= Timestamp::now() => {
						scheduled.remove(&(at, id)).map(|meta| (id, meta))
					}
					Some((at, _)) => return Ok(Some(at)),
					None => return Ok(None),
				}
			};
			let Some((id, meta)) = due else { continue };
			debug!("Spawning task {} ({})", id, meta.task.kind());
			self.spawn_task(state.clone(), id, &meta);
			lock!(self.tasks_running, "tasks_running")?.insert(id, meta);
		}
	}

	fn on_finished(&self, id: TaskId, ok: bool) -> PfResult<()> {
		let Some(mut meta) = lock!(self.tasks_running, "tasks_running")?.remove(&id) else {
			warn!("Completed task {} not found in running queue", id);
			return Ok(());
		};

		if ok {
			meta.retry_count = 0;
			if let Some(ref cron) = meta.cron {
				let next_at = cron.next_execution(Timestamp::now())?;
				debug!("Recurring task {} next execution at {}", id, next_at);
				meta.next_at = Some(next_at);
				return self.requeue(id, meta);
			}
			return Ok(());
		}

		if let Some(ref retry) = meta.retry {
			if retry.should_retry(meta.retry_count) {
				let backoff = retry.calculate_backoff(meta.retry_count);
				meta.retry_count += 1;
				meta.next_at = Some(Timestamp::from_now(backoff as i64));
				info!("Retrying task {} in {}s (attempt {})", id, backoff, meta.retry_count);
				return self.requeue(id, meta);
			}
			warn!("Task {} exhausted its retries", id);
		}

		// A failed cron task still recurs on its schedule
		if let Some(ref cron) = meta.cron {
			meta.retry_count = 0;
			meta.next_at = Some(cron.next_execution(Timestamp::now())?);
			return self.requeue(id, meta);
		}

		Ok(())
	}

	/// Number of queued (not yet running) tasks.
	pub fn queued_len(&self) -> usize {
		lock!(self.tasks_scheduled).map(|guard| guard.len()).unwrap_or(0)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::AtomicU32;

	#[derive(Debug)]
	struct CountingTask {
		runs: Arc<AtomicU32>,
		fail_first: u32,
	}

	#[async_trait]
	impl Task<()> for CountingTask {
		fn kind(&self) -> &'static str {
			"counting"
		}

		async fn run(&self, _state: &()) -> PfResult<()> {
			let run = self.runs.fetch_add(1, Ordering::SeqCst);
			if run < self.fail_first {
				return Err(Error::Internal("transient".into()));
			}
			Ok(())
		}
	}

	#[test]
	fn cron_parse_and_next() {
		let cron = CronSchedule::parse("0 * * * *").unwrap();
		// 2021-01-01T00:30:00Z -> next top of hour is 01:00:00Z
		let next = cron.next_execution(Timestamp(1_609_459_800)).unwrap();
		assert_eq!(next, Timestamp(1_609_462_800));
		assert_eq!(cron.as_str(), "0 * * * *");
	}

	#[test]
	fn cron_rejects_garbage() {
		assert!(CronSchedule::parse("not a cron").is_err());
	}

	#[test]
	fn backoff_grows_and_caps() {
		let policy = RetryPolicy::new((60, 3600), 10);
		assert_eq!(policy.calculate_backoff(0), 60);
		assert_eq!(policy.calculate_backoff(1), 120);
		assert_eq!(policy.calculate_backoff(2), 240);
		assert_eq!(policy.calculate_backoff(10), 3600);
		assert!(policy.should_retry(9));
		assert!(!policy.should_retry(10));
	}

	#[tokio::test]
	async fn immediate_task_runs() {
		let scheduler = Scheduler::new();
		let runs = Arc::new(AtomicU32::new(0));
		scheduler
			.task(Arc::new(CountingTask { runs: runs.clone(), fail_first: 0 }))
			.now()
			.unwrap();
		scheduler.start(());

		for _ in 0..50 {
			if runs.load(Ordering::SeqCst) > 0 {
				break;
			}
			tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
		}
		assert_eq!(runs.load(Ordering::SeqCst), 1);
		scheduler.shutdown();
	}

	#[tokio::test]
	async fn failed_task_retries() {
		let scheduler = Scheduler::new();
		let runs = Arc::new(AtomicU32::new(0));
		scheduler
			.task(Arc::new(CountingTask { runs: runs.clone(), fail_first: 1 }))
			.with_retry(RetryPolicy::new((0, 1), 3))
			.now()
			.unwrap();
		scheduler.start(());

		for _ in 0..100 {
			if runs.load(Ordering::SeqCst) >= 2 {
				break;
			}
			tokio::time::sleep(tokio::time::Duration::from_millis(10)).await;
		}
		// First run fails, retry succeeds
		assert_eq!(runs.load(Ordering::SeqCst), 2);
		scheduler.shutdown();
	}
}

// vim: ts=4
