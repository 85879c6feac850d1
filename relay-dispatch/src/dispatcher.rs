use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Once, PoisonError, Weak};

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinHandle};

use crate::error::DispatchError;
use crate::report::{DispatchOutcome, DispatchReport, Outcome, UnitReport};

/// Whether a unit that reports failure cancels the rest of the batch.
///
/// Worker errors, panics and interrupts always cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    #[default]
    KeepGoing,
    StopOnFailure,
}

/// Runs one worker call per unit with at most `jobs` running at once.
///
/// Cancellation is cooperative: once the flag is set no new unit starts,
/// and units already running finish normally.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    jobs: usize,
    policy: FailurePolicy,
    handle_interrupt: bool,
    interrupted: Arc<AtomicBool>,
}

impl Dispatcher {
    pub fn new(jobs: usize) -> Self {
        Self {
            jobs: jobs.max(1),
            policy: FailurePolicy::default(),
            handle_interrupt: true,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Let ctrl-c set the interrupt flag while this dispatcher or a clone
    /// of it is alive (on by default). With no such dispatcher left, or
    /// on a second ctrl-c, the process exits.
    pub fn handle_interrupt(mut self, enabled: bool) -> Self {
        self.handle_interrupt = enabled;
        self
    }

    /// One unit at a time, same policy and interrupt flag.
    pub fn sequential(&self) -> Self {
        Self {
            jobs: 1,
            ..self.clone()
        }
    }

    pub fn jobs(&self) -> usize {
        self.jobs
    }

    /// Interrupt flag shared by every run of this dispatcher. Setting it
    /// stops all later units, including those of a following pass.
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// Build a runtime and run the batch to completion on the current thread.
    pub fn run<U, T, E, F>(&self, units: Vec<U>, work: F) -> Result<DispatchReport<T>, DispatchError>
    where
        U: Display + Send + 'static,
        T: Outcome + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
    {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.jobs.clamp(1, 64))
            .enable_all()
            .build()
            .map_err(DispatchError::Runtime)?;
        Ok(runtime.block_on(self.run_async(units, work)))
    }

    pub async fn run_async<U, T, E, F>(&self, units: Vec<U>, work: F) -> DispatchReport<T>
    where
        U: Display + Send + 'static,
        T: Outcome + Send + 'static,
        E: Display + Send + 'static,
        F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
    {
        let batch = Batch {
            policy: self.policy,
            cancel: Arc::new(AtomicBool::new(false)),
            interrupted: self.interrupted.clone(),
        };
        if self.handle_interrupt {
            watch_interrupts(&self.interrupted);
        }

        let work = Arc::new(work);
        let units = if self.jobs <= 1 {
            run_sequential(&batch, units, work).await
        } else {
            run_pooled(&batch, self.jobs, units, work).await
        };

        let report = DispatchReport {
            units,
            cancelled: batch.cancelled(),
        };
        tracing::debug!(
            units = report.units.len(),
            cancelled = report.cancelled,
            success = report.success(),
            "dispatch finished"
        );
        report
    }
}

/// Run `work` over `units` and return whether every unit succeeded.
///
/// Blocking convenience around [`Dispatcher::run`] with the default policy.
pub fn run<U, T, E, F>(jobs: usize, units: Vec<U>, work: F) -> bool
where
    U: Display + Send + 'static,
    T: Outcome + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
{
    match Dispatcher::new(jobs).run(units, work) {
        Ok(report) => report.success(),
        Err(err) => {
            tracing::error!(error = %err, "dispatch failed to start");
            false
        }
    }
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

/// Exit status after a ctrl-c that no batch absorbed.
const EXIT_INTERRUPTED: i32 = 130;

static INTERRUPTIBLE: Interruptible = Interruptible::new();
static WATCHER: Once = Once::new();

/// Interrupt flags of the dispatchers still alive.
struct Interruptible {
    flags: Mutex<Vec<Weak<AtomicBool>>>,
}

impl Interruptible {
    const fn new() -> Self {
        Self {
            flags: Mutex::new(Vec::new()),
        }
    }

    fn flags(&self) -> MutexGuard<'_, Vec<Weak<AtomicBool>>> {
        self.flags.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn register(&self, flag: &Arc<AtomicBool>) {
        let weak = Arc::downgrade(flag);
        let mut flags = self.flags();
        flags.retain(|f| f.strong_count() > 0);
        if !flags.iter().any(|f| f.ptr_eq(&weak)) {
            flags.push(weak);
        }
    }

    /// Set every live flag. False when there was nothing left to interrupt.
    fn interrupt(&self) -> bool {
        let mut flags = self.flags();
        flags.retain(|f| f.strong_count() > 0);
        let live: Vec<Arc<AtomicBool>> = flags.iter().filter_map(Weak::upgrade).collect();
        if live.iter().all(|f| f.load(Ordering::SeqCst)) {
            return false;
        }
        for flag in &live {
            flag.store(true, Ordering::SeqCst);
        }
        true
    }
}

/// Register `flag` with the process-wide ctrl-c watcher, starting the
/// watcher on first use.
fn watch_interrupts(flag: &Arc<AtomicBool>) {
    INTERRUPTIBLE.register(flag);
    WATCHER.call_once(|| {
        let spawned = std::thread::Builder::new()
            .name("relay-interrupt".into())
            .spawn(|| {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(err) => {
                        tracing::warn!(error = %err, "cannot watch for ctrl-c");
                        return;
                    }
                };
                runtime.block_on(async {
                    while tokio::signal::ctrl_c().await.is_ok() {
                        if INTERRUPTIBLE.interrupt() {
                            tracing::warn!("interrupted; no new units will start (ctrl-c again to abort)");
                        } else {
                            tracing::warn!("aborted");
                            std::process::exit(EXIT_INTERRUPTED);
                        }
                    }
                });
            });
        if let Err(err) = spawned {
            tracing::warn!(error = %err, "cannot watch for ctrl-c");
        }
    });
}

struct Batch {
    policy: FailurePolicy,
    cancel: Arc<AtomicBool>,
    interrupted: Arc<AtomicBool>,
}

impl Batch {
    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst) || self.interrupted.load(Ordering::SeqCst)
    }
}

async fn run_sequential<U, T, E, F>(batch: &Batch, units: Vec<U>, work: Arc<F>) -> Vec<UnitReport<T>>
where
    U: Display + Send + 'static,
    T: Outcome + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
{
    let mut reports = Vec::with_capacity(units.len());
    for unit in units {
        let label = unit.to_string();
        if batch.cancelled() {
            tracing::debug!(project = %label, "skipped after cancellation");
            reports.push(UnitReport::cancelled(label));
            continue;
        }
        let joined = spawn_unit(label.clone(), unit, work.clone()).await;
        reports.push(settle(label, joined, batch.policy, &batch.cancel));
    }
    reports
}

enum Slot<T> {
    Done(UnitReport<T>),
    Running(String, JoinHandle<UnitReport<T>>),
}

async fn run_pooled<U, T, E, F>(
    batch: &Batch,
    jobs: usize,
    units: Vec<U>,
    work: Arc<F>,
) -> Vec<UnitReport<T>>
where
    U: Display + Send + 'static,
    T: Outcome + Send + 'static,
    E: Display + Send + 'static,
    F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
{
    let semaphore = Arc::new(Semaphore::new(jobs));
    let mut slots = Vec::with_capacity(units.len());

    for unit in units {
        let label = unit.to_string();
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                slots.push(Slot::Done(UnitReport::cancelled(label)));
                continue;
            }
        };
        if batch.cancelled() {
            tracing::debug!(project = %label, "skipped after cancellation");
            slots.push(Slot::Done(UnitReport::cancelled(label)));
            continue;
        }

        let work = work.clone();
        let cancel = batch.cancel.clone();
        let policy = batch.policy;
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            // Released only after the outcome is settled.
            let _permit = permit;
            let joined = spawn_unit(task_label.clone(), unit, work).await;
            settle(task_label, joined, policy, &cancel)
        });
        slots.push(Slot::Running(label, handle));
    }

    let mut reports = Vec::with_capacity(slots.len());
    for slot in slots {
        reports.push(match slot {
            Slot::Done(report) => report,
            Slot::Running(label, handle) => match handle.await {
                Ok(report) => report,
                Err(err) => {
                    batch.cancel.store(true, Ordering::SeqCst);
                    errored(label, format!("task join failure: {err}"))
                }
            },
        });
    }
    reports
}

/// Run one worker call on the blocking pool inside a span for its unit.
async fn spawn_unit<U, T, E, F>(label: String, unit: U, work: Arc<F>) -> Result<Result<T, E>, JoinError>
where
    U: Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(&U) -> Result<T, E> + Send + Sync + 'static,
{
    let span = tracing::info_span!("unit", project = %label);
    tokio::task::spawn_blocking(move || span.in_scope(|| work(&unit))).await
}

fn settle<T, E>(
    label: String,
    joined: Result<Result<T, E>, JoinError>,
    policy: FailurePolicy,
    cancel: &AtomicBool,
) -> UnitReport<T>
where
    T: Outcome,
    E: Display,
{
    match joined {
        Ok(Ok(value)) if value.succeeded() => UnitReport {
            label,
            outcome: DispatchOutcome::Succeeded,
            value: Some(value),
            error: None,
        },
        Ok(Ok(value)) => {
            tracing::warn!(project = %label, "unit reported failure");
            if policy == FailurePolicy::StopOnFailure {
                cancel.store(true, Ordering::SeqCst);
            }
            UnitReport {
                label,
                outcome: DispatchOutcome::Failed,
                value: Some(value),
                error: None,
            }
        }
        Ok(Err(err)) => {
            tracing::error!(project = %label, error = %err, "unit failed");
            cancel.store(true, Ordering::SeqCst);
            errored(label, err.to_string())
        }
        Err(err) => {
            let message = if err.is_panic() {
                "worker panicked".to_string()
            } else {
                format!("worker aborted: {err}")
            };
            tracing::error!(project = %label, "{message}");
            cancel.store(true, Ordering::SeqCst);
            errored(label, message)
        }
    }
}

fn errored<T>(label: String, error: String) -> UnitReport<T> {
    UnitReport {
        label,
        outcome: DispatchOutcome::Errored,
        value: None,
        error: Some(error),
    }
}
