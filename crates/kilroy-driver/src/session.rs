use std::time::Duration;

use kilroy_core::config::RunnerConfig;
use kilroy_core::runner::{HyperprotocolRunner, RunnerEvent, RunnerStatus, StepTicket};
use kilroy_core::{KilroyError, Result};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::stream::EventStream;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

pub(crate) enum SessionCommand {
    Start {
        target: Target,
        reply: oneshot::Sender<Result<()>>,
    },
    StepComplete {
        ticket: Option<StepTicket>,
        message: Option<String>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<RunnerStatus>,
    },
    Subscribe {
        reply: oneshot::Sender<broadcast::Receiver<RunnerEvent>>,
    },
    Shutdown,
}

pub(crate) enum Target {
    Index(usize),
    Name(String),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionSettings {
    /// Period of the elapsed-time event and watchdog check.
    pub poll_interval: Duration,
    /// Events buffered per subscriber before the slowest one starts losing them.
    pub event_capacity: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&RunnerConfig::default())
    }
}

impl From<&RunnerConfig> for SessionSettings {
    fn from(cfg: &RunnerConfig) -> Self {
        Self {
            poll_interval: cfg.poll_interval(),
            event_capacity: 256,
        }
    }
}

// ---------------------------------------------------------------------------
// CompletionSender
// ---------------------------------------------------------------------------

/// Lets an executor report that the protocol it was handed has finished.
#[derive(Clone)]
pub struct CompletionSender {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl CompletionSender {
    /// Completion of the step dispatched under `ticket`. Ignored by the
    /// session if that step is no longer the current one.
    pub fn complete_step(&self, ticket: StepTicket, message: Option<String>) -> Result<()> {
        self.send(Some(ticket), message)
    }

    /// Completion with no step identity; applies to whatever step is current.
    pub fn complete(&self, message: Option<String>) -> Result<()> {
        self.send(None, message)
    }

    fn send(&self, ticket: Option<StepTicket>, message: Option<String>) -> Result<()> {
        self.tx
            .send(SessionCommand::StepComplete { ticket, message })
            .map_err(|_| KilroyError::SessionClosed)
    }

    /// A sender not attached to any session; tests read its commands directly.
    #[cfg(test)]
    pub(crate) fn detached() -> (Self, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

// ---------------------------------------------------------------------------
// SessionHandle
// ---------------------------------------------------------------------------

/// Cloneable front door to a running session task.
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    pub async fn start(&self, index: usize) -> Result<()> {
        self.start_target(Target::Index(index)).await
    }

    pub async fn start_by_name(&self, name: &str) -> Result<()> {
        self.start_target(Target::Name(name.to_string())).await
    }

    async fn start_target(&self, target: Target) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Start { target, reply })?;
        rx.await.map_err(|_| KilroyError::SessionClosed)?
    }

    /// Report a completion signal from outside the executor, e.g. hardware.
    pub fn step_complete(&self, message: Option<String>) -> Result<()> {
        self.send(SessionCommand::StepComplete {
            ticket: None,
            message,
        })
    }

    /// Stop the running hyperprotocol. Returns once the stop has been applied.
    pub async fn stop(&self) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Stop { reply })?;
        rx.await.map_err(|_| KilroyError::SessionClosed)
    }

    pub async fn status(&self) -> Result<RunnerStatus> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Status { reply })?;
        rx.await.map_err(|_| KilroyError::SessionClosed)
    }

    /// Events emitted after every command already sent on this handle.
    pub async fn subscribe(&self) -> Result<EventStream> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::Subscribe { reply })?;
        let source = rx.await.map_err(|_| KilroyError::SessionClosed)?;
        Ok(EventStream::new(source))
    }

    pub fn completions(&self) -> CompletionSender {
        CompletionSender {
            tx: self.tx.clone(),
        }
    }

    /// Stop any running hyperprotocol and end the session task.
    pub fn shutdown(&self) -> Result<()> {
        self.send(SessionCommand::Shutdown)
    }

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx.send(cmd).map_err(|_| KilroyError::SessionClosed)
    }
}

// ---------------------------------------------------------------------------
// spawn
// ---------------------------------------------------------------------------

/// Spawn the session task on the current tokio runtime.
///
/// `build` receives the [`CompletionSender`] executors use to report
/// finished steps and returns the runner the task will own.
pub fn spawn<F>(settings: SessionSettings, build: F) -> Result<(SessionHandle, JoinHandle<()>)>
where
    F: FnOnce(CompletionSender) -> Result<HyperprotocolRunner>,
{
    if settings.poll_interval.is_zero() {
        return Err(KilroyError::Config {
            origin: "runner".to_string(),
            reason: "poll interval must be greater than zero".to_string(),
        });
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let runner = build(CompletionSender { tx: tx.clone() })?;
    let (events, _) = broadcast::channel(settings.event_capacity.max(1));

    let task = tokio::spawn(run(runner, rx, events, settings.poll_interval));
    Ok((SessionHandle { tx }, task))
}

async fn run(
    mut runner: HyperprotocolRunner,
    mut rx: mpsc::UnboundedReceiver<SessionCommand>,
    events: broadcast::Sender<RunnerEvent>,
    poll_interval: Duration,
) {
    let publish = |batch: Vec<RunnerEvent>| {
        for event in batch {
            tracing::debug!(?event, "runner event");
            // No subscribers is not an error.
            let _ = events.send(event);
        }
    };

    let mut ticker = time::interval(poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                None | Some(SessionCommand::Shutdown) => {
                    publish(runner.stop());
                    break;
                }
                Some(SessionCommand::Start { target, reply }) => {
                    let now = Instant::now().into_std();
                    let started = match target {
                        Target::Index(index) => runner.start(index, now),
                        Target::Name(name) => runner.start_by_name(&name, now),
                    };
                    let result = started.map(|batch| publish(batch));
                    if let Err(e) = &result {
                        tracing::warn!(error = %e, "start rejected");
                    }
                    let _ = reply.send(result);
                }
                Some(SessionCommand::StepComplete { ticket, message }) => {
                    let now = Instant::now().into_std();
                    publish(match ticket {
                        Some(ticket) => runner.on_ticket_complete(ticket, message, now),
                        None => runner.on_step_complete(message, now),
                    });
                }
                Some(SessionCommand::Stop { reply }) => {
                    publish(runner.stop());
                    let _ = reply.send(());
                }
                Some(SessionCommand::Status { reply }) => {
                    let _ = reply.send(runner.status());
                }
                Some(SessionCommand::Subscribe { reply }) => {
                    let _ = reply.send(events.subscribe());
                }
            },
            _ = ticker.tick() => {
                let now = Instant::now().into_std();
                if let Some(event) = runner.elapsed_event(now) {
                    publish(vec![event]);
                }
                match runner.check_watchdog(now) {
                    Ok(()) => {}
                    Err(KilroyError::Desync { protocol, overdue_secs }) => {
                        let hyperprotocol = runner
                            .current_hyperprotocol()
                            .map(|h| h.name.clone())
                            .unwrap_or_default();
                        publish(vec![RunnerEvent::Desync {
                            hyperprotocol,
                            protocol,
                            overdue_secs,
                        }]);
                    }
                    Err(e) => tracing::warn!(error = %e, "watchdog check failed"),
                }
            }
        }
    }

    tracing::debug!("runner session closed");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
