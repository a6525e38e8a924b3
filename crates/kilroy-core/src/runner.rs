//! Hyperprotocol runner state machine.
//!
//! The runner walks a two-level cursor (hyperprotocol, step). Each step is
//! handed to an external [`ProtocolExecutor`]; the next step is issued only
//! after the executor reports completion through [`HyperprotocolRunner::on_step_complete`].
//!
//! Every transition takes the current [`Instant`] as an argument and returns
//! the events it produced, so the runner owns no timers and no channels. The
//! caller decides how events are delivered and how the clock advances.

use crate::error::{KilroyError, Result};
use crate::hyper::{Hyperprotocol, HyperprotocolStep};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ---------------------------------------------------------------------------
// Executor seam
// ---------------------------------------------------------------------------

/// Identifies one dispatched step. A completion reported with a ticket that
/// is not the current one belongs to an earlier step or a stopped run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StepTicket(pub u64);

/// Dispatches a named protocol to the fluidics hardware.
///
/// `start_protocol` must return promptly; completion is reported later by
/// calling [`HyperprotocolRunner::on_ticket_complete`] with the ticket the
/// step was dispatched under, or [`HyperprotocolRunner::on_step_complete`]
/// when the signal carries no identity.
pub trait ProtocolExecutor: Send + Sync {
    fn start_protocol(&self, step: &HyperprotocolStep, ticket: StepTicket) -> Result<()>;

    /// The running hyperprotocol was stopped; abandon the dispatched step.
    fn cancel(&self) {}
}

// ---------------------------------------------------------------------------
// Status and events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunnerStatus {
    Idle,
    Running { hyperprotocol: usize, step: usize },
}

impl RunnerStatus {
    /// `(hyperprotocol, step)`, or `(-1, -1)` when idle.
    pub fn as_pair(self) -> (i64, i64) {
        match self {
            RunnerStatus::Idle => (-1, -1),
            RunnerStatus::Running {
                hyperprotocol,
                step,
            } => (hyperprotocol as i64, step as i64),
        }
    }

    pub fn is_running(self) -> bool {
        matches!(self, RunnerStatus::Running { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// Every step ran.
    Finished,
    /// `stop()` ended the run early.
    Stopped,
    /// The executor refused a step.
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunnerEvent {
    StatusChanged {
        status: RunnerStatus,
    },
    StepIssued {
        hyperprotocol: String,
        step: usize,
        protocol: String,
        duration_secs: u64,
    },
    StepFailed {
        hyperprotocol: String,
        step: usize,
        protocol: String,
        reason: String,
    },
    /// A protocol finished while no hyperprotocol was running.
    ProtocolCompleted {
        message: Option<String>,
    },
    HyperprotocolCompleted {
        hyperprotocol: String,
        outcome: Completion,
        message: Option<String>,
    },
    Elapsed {
        hyperprotocol: String,
        seconds: u64,
    },
    Desync {
        hyperprotocol: String,
        protocol: String,
        overdue_secs: u64,
    },
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// One row of [`HyperprotocolRunner::describe`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HyperprotocolSummary {
    pub index: usize,
    pub name: String,
    pub steps: usize,
    pub required_secs: u64,
    pub running: bool,
}

#[derive(Debug, Clone)]
struct Watchdog {
    protocol: String,
    /// `None` when the deadline is past what `Instant` can represent.
    expires_at: Option<Instant>,
    reported: bool,
}

pub struct HyperprotocolRunner {
    hyperprotocols: Vec<Hyperprotocol>,
    status: RunnerStatus,
    executor: Arc<dyn ProtocolExecutor>,
    watchdog_grace: Duration,
    watchdog: Option<Watchdog>,
    started_at: Option<Instant>,
    issued: Option<String>,
    ticket: Option<StepTicket>,
    next_ticket: u64,
    last_message: Option<String>,
}

impl HyperprotocolRunner {
    pub fn new(executor: Arc<dyn ProtocolExecutor>, watchdog_grace: Duration) -> Self {
        Self {
            hyperprotocols: Vec::new(),
            status: RunnerStatus::Idle,
            executor,
            watchdog_grace,
            watchdog: None,
            started_at: None,
            issued: None,
            ticket: None,
            next_ticket: 0,
            last_message: None,
        }
    }

    // -----------------------------------------------------------------------
    // Loaded hyperprotocols
    // -----------------------------------------------------------------------

    /// Add `hyperprotocol`, replacing a loaded one with the same name.
    /// Returns its index. The running hyperprotocol cannot be replaced.
    pub fn insert(&mut self, hyperprotocol: Hyperprotocol) -> Result<usize> {
        if hyperprotocol.steps.is_empty() {
            return Err(KilroyError::config(
                hyperprotocol.name.as_str(),
                "hyperprotocol has no steps",
            ));
        }
        match self.index_of(&hyperprotocol.name) {
            Some(index) => {
                if let RunnerStatus::Running { hyperprotocol: running, .. } = self.status {
                    if running == index {
                        return Err(KilroyError::AlreadyRunning(hyperprotocol.name));
                    }
                }
                self.hyperprotocols[index] = hyperprotocol;
                Ok(index)
            }
            None => {
                self.hyperprotocols.push(hyperprotocol);
                Ok(self.hyperprotocols.len() - 1)
            }
        }
    }

    pub fn extend(&mut self, hyperprotocols: impl IntoIterator<Item = Hyperprotocol>) -> Result<()> {
        for hp in hyperprotocols {
            self.insert(hp)?;
        }
        Ok(())
    }

    pub fn hyperprotocols(&self) -> &[Hyperprotocol] {
        &self.hyperprotocols
    }

    pub fn hyperprotocol_names(&self) -> impl Iterator<Item = &str> {
        self.hyperprotocols.iter().map(|h| h.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.hyperprotocols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hyperprotocols.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.hyperprotocols.iter().position(|h| h.name == name)
    }

    pub fn is_valid_hyperprotocol(&self, name: &str) -> bool {
        self.index_of(name).is_some()
    }

    /// Sum of the snapshotted step durations of `name`.
    pub fn required_time(&self, name: &str) -> Result<u64> {
        self.index_of(name)
            .map(|i| self.hyperprotocols[i].total_secs())
            .ok_or_else(|| KilroyError::HyperprotocolNotFound(name.to_string()))
    }

    pub fn describe(&self) -> Vec<HyperprotocolSummary> {
        let running = match self.status {
            RunnerStatus::Running { hyperprotocol, .. } => Some(hyperprotocol),
            RunnerStatus::Idle => None,
        };
        self.hyperprotocols
            .iter()
            .enumerate()
            .map(|(index, hp)| HyperprotocolSummary {
                index,
                name: hp.name.clone(),
                steps: hp.steps.len(),
                required_secs: hp.total_secs(),
                running: running == Some(index),
            })
            .collect()
    }

    // -----------------------------------------------------------------------
    // Status
    // -----------------------------------------------------------------------

    pub fn status(&self) -> RunnerStatus {
        self.status
    }

    pub fn is_running(&self) -> bool {
        self.status.is_running()
    }

    /// Name of the most recently issued protocol while running.
    pub fn current_protocol(&self) -> Option<&str> {
        self.issued.as_deref()
    }

    /// Ticket of the step currently awaiting completion.
    pub fn current_ticket(&self) -> Option<StepTicket> {
        self.ticket
    }

    pub fn current_hyperprotocol(&self) -> Option<&Hyperprotocol> {
        match self.status {
            RunnerStatus::Running { hyperprotocol, .. } => self.hyperprotocols.get(hyperprotocol),
            RunnerStatus::Idle => None,
        }
    }

    pub fn current_step(&self) -> Option<&HyperprotocolStep> {
        match self.status {
            RunnerStatus::Running {
                hyperprotocol,
                step,
            } => self.hyperprotocols[hyperprotocol].steps.get(step),
            RunnerStatus::Idle => None,
        }
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    pub fn start(&mut self, index: usize, now: Instant) -> Result<Vec<RunnerEvent>> {
        if let RunnerStatus::Running { hyperprotocol, .. } = self.status {
            return Err(KilroyError::AlreadyRunning(
                self.hyperprotocols[hyperprotocol].name.clone(),
            ));
        }
        let hp = self
            .hyperprotocols
            .get(index)
            .ok_or(KilroyError::HyperprotocolIndex {
                index,
                count: self.hyperprotocols.len(),
            })?;
        let first = &hp.steps[0];
        let ticket = StepTicket(self.next_ticket);

        // Dispatch before touching status so a refused first step leaves us idle.
        self.executor.start_protocol(first, ticket)?;
        tracing::info!(hyperprotocol = %hp.name, protocol = %first.protocol, "starting hyperprotocol");

        let issued = RunnerEvent::StepIssued {
            hyperprotocol: hp.name.clone(),
            step: 0,
            protocol: first.protocol.clone(),
            duration_secs: first.duration_secs,
        };
        let watchdog = self.arm(first, now);

        self.status = RunnerStatus::Running {
            hyperprotocol: index,
            step: 0,
        };
        self.watchdog = Some(watchdog);
        self.started_at = Some(now);
        self.issued = Some(first.protocol.clone());
        self.ticket = Some(ticket);
        self.next_ticket += 1;
        self.last_message = None;

        Ok(vec![
            RunnerEvent::StatusChanged {
                status: self.status,
            },
            issued,
        ])
    }

    pub fn start_by_name(&mut self, name: &str, now: Instant) -> Result<Vec<RunnerEvent>> {
        let index = self
            .index_of(name)
            .ok_or_else(|| KilroyError::HyperprotocolNotFound(name.to_string()))?;
        self.start(index, now)
    }

    /// The executor finished the step dispatched under `ticket`.
    ///
    /// A ticket other than the current one is dropped, so a late signal
    /// from a stopped run or an already-completed step never advances the
    /// cursor.
    pub fn on_ticket_complete(
        &mut self,
        ticket: StepTicket,
        message: Option<String>,
        now: Instant,
    ) -> Vec<RunnerEvent> {
        if self.ticket != Some(ticket) {
            tracing::debug!(?ticket, current = ?self.ticket, "dropping stale completion");
            return Vec::new();
        }
        self.on_step_complete(message, now)
    }

    /// The executor finished the protocol it was given.
    ///
    /// While idle this is a standalone protocol completion and is passed
    /// through unchanged. While running it advances the cursor.
    pub fn on_step_complete(&mut self, message: Option<String>, now: Instant) -> Vec<RunnerEvent> {
        let RunnerStatus::Running {
            hyperprotocol,
            step,
        } = self.status
        else {
            return vec![RunnerEvent::ProtocolCompleted { message }];
        };
        if message.is_some() {
            self.last_message = message;
        }

        let next = step + 1;
        let Some(next_step) = self.hyperprotocols[hyperprotocol].steps.get(next).cloned() else {
            return self.finish(Completion::Finished);
        };
        let name = self.hyperprotocols[hyperprotocol].name.clone();
        let ticket = StepTicket(self.next_ticket);
        self.next_ticket += 1;

        if let Err(e) = self.executor.start_protocol(&next_step, ticket) {
            tracing::error!(hyperprotocol = %name, protocol = %next_step.protocol, error = %e, "step dispatch failed");
            let mut events = vec![RunnerEvent::StepFailed {
                hyperprotocol: name,
                step: next,
                protocol: next_step.protocol,
                reason: e.to_string(),
            }];
            events.extend(self.finish(Completion::Failed));
            return events;
        }
        tracing::info!(
            hyperprotocol = %name,
            step = next,
            protocol = %next_step.protocol,
            duration_secs = next_step.duration_secs,
            "issued step"
        );

        self.status = RunnerStatus::Running {
            hyperprotocol,
            step: next,
        };
        self.watchdog = Some(self.arm(&next_step, now));
        self.issued = Some(next_step.protocol.clone());
        self.ticket = Some(ticket);

        vec![
            RunnerEvent::StatusChanged {
                status: self.status,
            },
            RunnerEvent::StepIssued {
                hyperprotocol: name,
                step: next,
                protocol: next_step.protocol,
                duration_secs: next_step.duration_secs,
            },
        ]
    }

    /// End the running hyperprotocol early. A no-op while idle.
    pub fn stop(&mut self) -> Vec<RunnerEvent> {
        if !self.is_running() {
            return Vec::new();
        }
        self.executor.cancel();
        self.finish(Completion::Stopped)
    }

    /// Whole seconds since the running hyperprotocol started.
    pub fn poll_elapsed(&self, now: Instant) -> Option<u64> {
        self.started_at
            .map(|t| now.saturating_duration_since(t).as_secs())
    }

    /// Elapsed-time observation as an event, for periodic polling.
    pub fn elapsed_event(&self, now: Instant) -> Option<RunnerEvent> {
        let RunnerStatus::Running { hyperprotocol, .. } = self.status else {
            return None;
        };
        self.poll_elapsed(now).map(|seconds| RunnerEvent::Elapsed {
            hyperprotocol: self.hyperprotocols[hyperprotocol].name.clone(),
            seconds,
        })
    }

    /// Report a step that has outlived its expected duration plus grace.
    ///
    /// Returns [`KilroyError::Desync`] once per step. The runner keeps
    /// waiting; recovery is the operator's call.
    pub fn check_watchdog(&mut self, now: Instant) -> Result<()> {
        let Some(watchdog) = self.watchdog.as_mut() else {
            return Ok(());
        };
        let Some(expires_at) = watchdog.expires_at else {
            return Ok(());
        };
        if watchdog.reported || now <= expires_at {
            return Ok(());
        }
        watchdog.reported = true;
        let overdue_secs = now.saturating_duration_since(expires_at).as_secs();
        tracing::warn!(protocol = %watchdog.protocol, overdue_secs, "no completion signal from executor");
        Err(KilroyError::Desync {
            protocol: watchdog.protocol.clone(),
            overdue_secs,
        })
    }

    fn arm(&self, step: &HyperprotocolStep, now: Instant) -> Watchdog {
        Watchdog {
            protocol: step.protocol.clone(),
            expires_at: Duration::from_secs(step.duration_secs)
                .checked_add(self.watchdog_grace)
                .and_then(|timeout| now.checked_add(timeout)),
            reported: false,
        }
    }

    fn finish(&mut self, outcome: Completion) -> Vec<RunnerEvent> {
        let RunnerStatus::Running { hyperprotocol, .. } = self.status else {
            return Vec::new();
        };
        let name = self.hyperprotocols[hyperprotocol].name.clone();
        tracing::info!(hyperprotocol = %name, ?outcome, "hyperprotocol ended");

        self.status = RunnerStatus::Idle;
        self.watchdog = None;
        self.started_at = None;
        self.issued = None;
        self.ticket = None;

        vec![
            RunnerEvent::HyperprotocolCompleted {
                hyperprotocol: name,
                outcome,
                message: self.last_message.take(),
            },
            RunnerEvent::StatusChanged {
                status: RunnerStatus::Idle,
            },
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        started: Mutex<Vec<String>>,
        cancelled: Mutex<usize>,
        refuse: Option<String>,
    }

    impl RecordingExecutor {
        fn refusing(protocol: &str) -> Self {
            Self {
                refuse: Some(protocol.to_string()),
                ..Self::default()
            }
        }

        fn started(&self) -> Vec<String> {
            self.started.lock().unwrap().clone()
        }

        fn cancelled(&self) -> usize {
            *self.cancelled.lock().unwrap()
        }
    }

    impl ProtocolExecutor for RecordingExecutor {
        fn cancel(&self) {
            *self.cancelled.lock().unwrap() += 1;
        }

        fn start_protocol(&self, step: &HyperprotocolStep, _ticket: StepTicket) -> Result<()> {
            if self.refuse.as_deref() == Some(step.protocol.as_str()) {
                return Err(KilroyError::Executor {
                    protocol: step.protocol.clone(),
                    reason: "valve offline".to_string(),
                });
            }
            self.started.lock().unwrap().push(step.protocol.clone());
            Ok(())
        }
    }

    fn three_steps(name: &str) -> Hyperprotocol {
        Hyperprotocol::new(
            name,
            vec![
                HyperprotocolStep::new("Hybridize 1", 220),
                HyperprotocolStep::new("Wait Microscopy 10", 10),
                HyperprotocolStep::new("Wait Microscopy 1", 1),
            ],
        )
    }

    fn runner_with(executor: Arc<RecordingExecutor>) -> HyperprotocolRunner {
        let mut runner = HyperprotocolRunner::new(executor, Duration::from_secs(5));
        runner.insert(three_steps("run")).unwrap();
        runner.insert(three_steps("other")).unwrap();
        runner
    }

    fn completions(events: &[RunnerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, RunnerEvent::HyperprotocolCompleted { .. }))
            .count()
    }

    #[test]
    fn idle_status_is_sentinel_pair() {
        let runner = runner_with(Arc::new(RecordingExecutor::default()));
        assert_eq!(runner.status().as_pair(), (-1, -1));
        assert!(!runner.is_running());
        assert_eq!(runner.current_protocol(), None);
    }

    #[test]
    fn runs_steps_in_order_and_completes_once() {
        let exec = Arc::new(RecordingExecutor::default());
        let mut runner = runner_with(exec.clone());
        let t0 = Instant::now();

        let events = runner.start(0, t0).unwrap();
        assert_eq!(runner.status().as_pair(), (0, 0));
        assert!(matches!(events[1], RunnerEvent::StepIssued { step: 0, .. }));
        assert_eq!(exec.started(), vec!["Hybridize 1"]);

        let mut all = Vec::new();
        all.extend(runner.on_step_complete(None, t0));
        assert_eq!(runner.status().as_pair(), (0, 1));
        assert_eq!(runner.current_protocol(), Some("Wait Microscopy 10"));
        assert_eq!(
            runner.current_step(),
            Some(&HyperprotocolStep::new("Wait Microscopy 10", 10))
        );
        all.extend(runner.on_step_complete(None, t0));
        assert_eq!(runner.status().as_pair(), (0, 2));
        all.extend(runner.on_step_complete(Some("done".to_string()), t0));

        assert_eq!(runner.status(), RunnerStatus::Idle);
        assert_eq!(
            exec.started(),
            vec!["Hybridize 1", "Wait Microscopy 10", "Wait Microscopy 1"]
        );
        assert_eq!(completions(&all), 1);
        assert!(all.contains(&RunnerEvent::HyperprotocolCompleted {
            hyperprotocol: "run".to_string(),
            outcome: Completion::Finished,
            message: Some("done".to_string()),
        }));
    }

    #[test]
    fn completion_while_idle_changes_nothing() {
        let exec = Arc::new(RecordingExecutor::default());
        let mut runner = runner_with(exec.clone());
        let t0 = Instant::now();
        runner.start(0, t0).unwrap();
        for _ in 0..3 {
            runner.on_step_complete(None, t0);
        }

        let events = runner.on_step_complete(Some("standalone".to_string()), t0);
        assert_eq!(
            events,
            vec![RunnerEvent::ProtocolCompleted {
                message: Some("standalone".to_string())
            }]
        );
        assert_eq!(runner.status(), RunnerStatus::Idle);
        assert_eq!(exec.started().len(), 3);
    }

    #[test]
    fn start_rejects_bad_index_and_double_start() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        let t0 = Instant::now();
        assert!(matches!(
            runner.start(7, t0),
            Err(KilroyError::HyperprotocolIndex { index: 7, count: 2 })
        ));
        assert_eq!(runner.status(), RunnerStatus::Idle);

        runner.start(0, t0).unwrap();
        assert!(matches!(
            runner.start(1, t0),
            Err(KilroyError::AlreadyRunning(ref n)) if n == "run"
        ));
        assert_eq!(runner.status().as_pair(), (0, 0));
    }

    #[test]
    fn refused_first_step_leaves_runner_idle() {
        let exec = Arc::new(RecordingExecutor::refusing("Hybridize 1"));
        let mut runner = runner_with(exec);
        let err = runner.start(0, Instant::now()).unwrap_err();
        assert!(matches!(err, KilroyError::Executor { .. }));
        assert_eq!(runner.status(), RunnerStatus::Idle);
        assert_eq!(runner.poll_elapsed(Instant::now()), None);
    }

    #[test]
    fn refused_later_step_ends_run_as_failed() {
        let exec = Arc::new(RecordingExecutor::refusing("Wait Microscopy 10"));
        let mut runner = runner_with(exec);
        let t0 = Instant::now();
        runner.start(0, t0).unwrap();
        let events = runner.on_step_complete(None, t0);
        assert!(matches!(events[0], RunnerEvent::StepFailed { step: 1, .. }));
        assert!(events.iter().any(|e| matches!(
            e,
            RunnerEvent::HyperprotocolCompleted { outcome: Completion::Failed, .. }
        )));
        assert_eq!(runner.status(), RunnerStatus::Idle);
    }

    #[test]
    fn stop_while_idle_emits_nothing() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        assert!(runner.stop().is_empty());
    }

    #[test]
    fn stop_while_running_emits_one_completion() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        let t0 = Instant::now();
        runner.start(1, t0).unwrap();
        runner.on_step_complete(Some("partial".to_string()), t0);

        let events = runner.stop();
        assert_eq!(completions(&events), 1);
        assert!(events.contains(&RunnerEvent::HyperprotocolCompleted {
            hyperprotocol: "other".to_string(),
            outcome: Completion::Stopped,
            message: Some("partial".to_string()),
        }));
        assert_eq!(runner.status().as_pair(), (-1, -1));
        assert!(runner.stop().is_empty());
        assert!(runner.check_watchdog(t0 + Duration::from_secs(10_000)).is_ok());
    }

    #[test]
    fn stale_ticket_from_stopped_run_is_dropped() {
        let exec = Arc::new(RecordingExecutor::default());
        let mut runner = runner_with(exec.clone());
        let t0 = Instant::now();

        runner.start(0, t0).unwrap();
        let stale = runner.current_ticket().unwrap();
        runner.stop();
        assert_eq!(exec.cancelled(), 1);
        assert!(runner.on_ticket_complete(stale, None, t0).is_empty());

        runner.start(0, t0).unwrap();
        let fresh = runner.current_ticket().unwrap();
        assert_ne!(stale, fresh);
        assert!(runner.on_ticket_complete(stale, None, t0).is_empty());
        assert_eq!(runner.status().as_pair(), (0, 0));
        assert_eq!(exec.started(), vec!["Hybridize 1", "Hybridize 1"]);

        runner.on_ticket_complete(fresh, None, t0);
        assert_eq!(runner.status().as_pair(), (0, 1));
        // The ticket of a finished step is stale as well.
        assert!(runner.on_ticket_complete(fresh, None, t0).is_empty());
        assert_eq!(runner.status().as_pair(), (0, 1));
    }

    #[test]
    fn stop_while_idle_does_not_cancel() {
        let exec = Arc::new(RecordingExecutor::default());
        let mut runner = runner_with(exec.clone());
        runner.stop();
        assert_eq!(exec.cancelled(), 0);
    }

    #[test]
    fn enormous_step_duration_does_not_overflow() {
        let mut runner = HyperprotocolRunner::new(
            Arc::new(RecordingExecutor::default()),
            Duration::from_secs(5),
        );
        runner
            .insert(Hyperprotocol::new(
                "forever",
                vec![
                    HyperprotocolStep::new("Hybridize 1", u64::MAX),
                    HyperprotocolStep::new("Wait Microscopy 1", 1),
                ],
            ))
            .unwrap();
        let t0 = Instant::now();
        runner.start(0, t0).unwrap();
        assert!(runner.check_watchdog(t0 + Duration::from_secs(1_000_000)).is_ok());
        assert_eq!(runner.required_time("forever").unwrap(), u64::MAX);
    }

    #[test]
    fn elapsed_tracks_start_and_resets_on_stop() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        let t0 = Instant::now();
        assert_eq!(runner.poll_elapsed(t0), None);
        runner.start(0, t0).unwrap();
        assert_eq!(runner.poll_elapsed(t0 + Duration::from_millis(2500)), Some(2));
        assert_eq!(
            runner.elapsed_event(t0 + Duration::from_secs(3)),
            Some(RunnerEvent::Elapsed {
                hyperprotocol: "run".to_string(),
                seconds: 3
            })
        );
        runner.stop();
        assert_eq!(runner.poll_elapsed(t0 + Duration::from_secs(4)), None);
        assert_eq!(runner.elapsed_event(t0), None);
    }

    #[test]
    fn watchdog_reports_desync_once_per_step() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        let t0 = Instant::now();
        runner.start(0, t0).unwrap();

        // 220 s step + 5 s grace.
        assert!(runner.check_watchdog(t0 + Duration::from_secs(225)).is_ok());
        let err = runner
            .check_watchdog(t0 + Duration::from_secs(230))
            .unwrap_err();
        assert!(matches!(
            err,
            KilroyError::Desync { ref protocol, overdue_secs: 5 } if protocol == "Hybridize 1"
        ));
        assert!(runner.check_watchdog(t0 + Duration::from_secs(300)).is_ok());
        assert!(runner.is_running());

        // Advancing re-arms the watchdog for the next step.
        let t1 = t0 + Duration::from_secs(300);
        runner.on_step_complete(None, t1);
        assert!(runner.check_watchdog(t1 + Duration::from_secs(15)).is_ok());
        assert!(runner.check_watchdog(t1 + Duration::from_secs(16)).is_err());
    }

    #[test]
    fn insert_replaces_by_name_but_not_while_running() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        let replacement = Hyperprotocol::new("run", vec![HyperprotocolStep::new("Hybridize 2", 5)]);
        assert_eq!(runner.insert(replacement.clone()).unwrap(), 0);
        assert_eq!(runner.len(), 2);
        assert_eq!(runner.required_time("run").unwrap(), 5);

        runner.start(0, Instant::now()).unwrap();
        assert!(matches!(
            runner.insert(replacement),
            Err(KilroyError::AlreadyRunning(_))
        ));
        assert!(runner.insert(Hyperprotocol::new("empty", vec![])).is_err());
    }

    #[test]
    fn lookups_are_pure() {
        let runner = runner_with(Arc::new(RecordingExecutor::default()));
        assert!(runner.is_valid_hyperprotocol("other"));
        assert!(!runner.is_valid_hyperprotocol("missing"));
        assert_eq!(runner.required_time("run").unwrap(), 231);
        assert!(matches!(
            runner.required_time("missing"),
            Err(KilroyError::HyperprotocolNotFound(_))
        ));
        let names: Vec<&str> = runner.hyperprotocol_names().collect();
        assert_eq!(names, vec!["run", "other"]);
        assert_eq!(runner.status(), RunnerStatus::Idle);
    }

    #[test]
    fn describe_marks_running_entry() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        runner.start(1, Instant::now()).unwrap();
        let rows = runner.describe();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].required_secs, 231);
        assert_eq!(rows[0].steps, 3);
        assert!(!rows[0].running);
        assert!(rows[1].running);
    }

    #[test]
    fn start_by_name_resolves_index() {
        let mut runner = runner_with(Arc::new(RecordingExecutor::default()));
        runner.start_by_name("other", Instant::now()).unwrap();
        assert_eq!(runner.status().as_pair(), (1, 0));
        assert!(matches!(
            runner.start_by_name("nope", Instant::now()),
            Err(KilroyError::HyperprotocolNotFound(_))
        ));
        assert!(matches!(
            runner.start_by_name("run", Instant::now()),
            Err(KilroyError::AlreadyRunning(ref n)) if n == "other"
        ));
    }

    #[test]
    fn events_serialize_with_tags() {
        let event = RunnerEvent::StatusChanged {
            status: RunnerStatus::Running {
                hyperprotocol: 0,
                step: 2,
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "status_changed");
        assert_eq!(json["status"]["state"], "running");
        assert_eq!(json["status"]["step"], 2);
    }
}
