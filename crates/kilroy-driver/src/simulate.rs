use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use kilroy_core::hyper::HyperprotocolStep;
use kilroy_core::runner::{ProtocolExecutor, StepTicket};
use kilroy_core::{KilroyError, Result};
use tokio::task::AbortHandle;

use crate::session::CompletionSender;

/// Stand-in for the fluidics hardware: every protocol "runs" for its
/// snapshotted duration multiplied by `time_scale`, then reports completion.
pub struct SimulatedExecutor {
    completions: CompletionSender,
    time_scale: f64,
    in_flight: Mutex<Option<AbortHandle>>,
}

impl SimulatedExecutor {
    pub fn new(completions: CompletionSender, time_scale: f64) -> Self {
        Self {
            completions,
            time_scale,
            in_flight: Mutex::new(None),
        }
    }

    fn replace_in_flight(&self, next: Option<AbortHandle>) {
        let previous = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, next)
        };
        if let Some(task) = previous {
            task.abort();
        }
    }
}

impl ProtocolExecutor for SimulatedExecutor {
    fn start_protocol(&self, step: &HyperprotocolStep, ticket: StepTicket) -> Result<()> {
        let failed = |reason: String| KilroyError::Executor {
            protocol: step.protocol.clone(),
            reason,
        };
        let delay = Duration::try_from_secs_f64(step.duration_secs as f64 * self.time_scale)
            .map_err(|e| failed(format!("time scale {}: {e}", self.time_scale)))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| failed(e.to_string()))?;

        let completions = self.completions.clone();
        let protocol = step.protocol.clone();
        tracing::debug!(%protocol, ?delay, ?ticket, "simulating protocol");
        let task = runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            if completions
                .complete_step(ticket, Some(format!("{protocol} complete")))
                .is_err()
            {
                tracing::debug!(%protocol, "session gone before simulated protocol finished");
            }
        });
        self.replace_in_flight(Some(task.abort_handle()));
        Ok(())
    }

    fn cancel(&self) {
        self.replace_in_flight(None);
    }
}
