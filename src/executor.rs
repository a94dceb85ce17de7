//! Runs units through init, run and shutdown.
//!
//! ```text
//! init:     sequential, dependency order; first failure aborts boot
//! run:      one task per unit, started after every init succeeded
//! wait:     root lifetime cancelled (signal, Shutdown call, parent token)
//! shutdown: reverse init order, one unit at a time, bounded wait each
//! ```
//!
//! Unit lifetimes are not children of the root lifetime: the executor
//! cancels them one by one so dependents stop before their dependencies.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, info_span, warn, Instrument};

use crate::app::AppContext;
use crate::error::{BootError, BootResult};
use crate::events::{EventSender, LifecycleEvent};
use crate::signals::spawn_signal_bridge;
use crate::unit::{ExitResult, Runner, UnitContext, UnitSpec, EXIT_ABANDONED, EXIT_PANICKED};

/// How one unit ended, recorded during shutdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitExit {
    pub unit: String,
    pub code: i32,
    pub error: Option<String>,
    /// The unit ignored cancellation past its deadline and was aborted.
    pub abandoned: bool,
}

impl UnitExit {
    /// Code 0, no error and not abandoned.
    pub fn is_clean(&self) -> bool {
        self.code == 0 && self.error.is_none() && !self.abandoned
    }
}

/// Summary of a completed run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BootReport {
    /// Why shutdown began, if it was requested explicitly or by a signal.
    pub reason: Option<String>,
    /// Unit exits in shutdown order.
    pub exits: Vec<UnitExit>,
}

struct RunningUnit {
    ctx: UnitContext,
    task: JoinHandle<ExitResult>,
}

pub(crate) struct Executor {
    app: Arc<AppContext>,
    events: Option<EventSender<LifecycleEvent>>,
    shutdown_timeout: Option<Duration>,
    trap_signals: bool,
}

impl Executor {
    pub(crate) fn new(app: Arc<AppContext>) -> Self {
        Self {
            app,
            events: None,
            shutdown_timeout: None,
            trap_signals: false,
        }
    }

    pub(crate) fn with_events(mut self, events: Option<EventSender<LifecycleEvent>>) -> Self {
        self.events = events;
        self
    }

    pub(crate) fn with_shutdown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub(crate) fn with_signals(mut self, trap: bool) -> Self {
        self.trap_signals = trap;
        self
    }

    fn emit(&self, event: LifecycleEvent) {
        if let Some(events) = &self.events {
            events.emit(event);
        }
    }

    /// Drive `units`, already in init order, to completion.
    pub(crate) async fn run(self, units: Vec<UnitSpec>) -> BootResult<BootReport> {
        if units.is_empty() {
            warn!("No unit to execute, exiting");
            return Ok(BootReport::default());
        }

        let bridge = self
            .trap_signals
            .then(|| spawn_signal_bridge(self.app.clone()));
        let scope = CancellationToken::new();

        let result = self.execute(units, &scope).await;

        scope.cancel();
        if let Some(bridge) = bridge {
            bridge.abort();
        }
        result
    }

    async fn execute(
        &self,
        units: Vec<UnitSpec>,
        scope: &CancellationToken,
    ) -> BootResult<BootReport> {
        let initialized = self.init_all(units, scope).await?;

        let mut report = BootReport::default();
        if self.app.is_shutting_down() {
            info!("Shutdown requested during init, skipping run phase");
            for (ctx, _) in initialized.iter().rev() {
                ctx.token().cancel();
            }
            report.reason = self.app.shutdown_reason().map(str::to_string);
            return Ok(report);
        }

        let running: Vec<RunningUnit> = initialized
            .into_iter()
            .map(|(ctx, runner)| {
                let task = tokio::spawn(run_unit(ctx.clone(), runner, self.events.clone()));
                RunningUnit { ctx, task }
            })
            .collect();

        self.app.token().cancelled().await;
        let reason = self
            .app
            .shutdown_reason()
            .unwrap_or("root lifetime completed")
            .to_string();
        info!(reason = %reason, "Shutting down units");
        self.emit(LifecycleEvent::ShutdownRequested {
            reason: reason.clone(),
        });
        report.reason = Some(reason);

        for unit in running.into_iter().rev() {
            report.exits.push(self.stop(unit).await);
        }
        info!("All units stopped");
        Ok(report)
    }

    /// Initialize units in order. On failure, already initialized units are
    /// cancelled and none of them ever runs.
    async fn init_all(
        &self,
        units: Vec<UnitSpec>,
        scope: &CancellationToken,
    ) -> BootResult<Vec<(UnitContext, Runner)>> {
        let mut initialized: Vec<(UnitContext, Runner)> = Vec::with_capacity(units.len());
        for spec in units {
            if self.app.is_shutting_down() {
                break;
            }
            let (name, initializer) = spec.into_parts();
            let span = info_span!("unit", name = %name);
            let ctx = UnitContext::new(name.clone(), self.app.clone(), scope.child_token(), span.clone());

            info!(parent: &span, "Start init");
            self.emit(LifecycleEvent::Initializing { unit: name.clone() });

            let outcome = AssertUnwindSafe(initializer.init(ctx.clone()))
                .catch_unwind()
                .instrument(span.clone())
                .await;

            let err = match outcome {
                Ok(Ok(runner)) => {
                    info!(parent: &span, "Init success");
                    self.emit(LifecycleEvent::Initialized { unit: name });
                    initialized.push((ctx, runner));
                    continue;
                }
                Ok(Err(source)) => BootError::InitFailed { unit: name.clone(), source },
                Err(panic) => BootError::InitPanicked {
                    unit: name.clone(),
                    message: panic_message(panic.as_ref()),
                },
            };

            error!(parent: &span, error = %err, "Init failed");
            self.emit(LifecycleEvent::InitFailed {
                unit: name,
                reason: err.to_string(),
            });
            ctx.token().cancel();
            for (ctx, _) in initialized.iter().rev() {
                ctx.token().cancel();
            }
            return Err(err);
        }
        Ok(initialized)
    }

    async fn stop(&self, unit: RunningUnit) -> UnitExit {
        let RunningUnit { ctx, mut task } = unit;
        let name = ctx.name().to_string();
        info!(parent: ctx.span(), "Stopping");
        self.emit(LifecycleEvent::Stopping { unit: name.clone() });
        ctx.token().cancel();

        let joined = match self.shutdown_timeout {
            Some(limit) => match tokio::time::timeout(limit, &mut task).await {
                Ok(joined) => Some(joined),
                Err(_) => None,
            },
            None => Some((&mut task).await),
        };

        let Some(joined) = joined else {
            task.abort();
            warn!(
                parent: ctx.span(),
                timeout_ms = self.shutdown_timeout.map(|d| d.as_millis() as u64),
                "Unit ignored cancellation, abandoned; its resources may leak"
            );
            self.emit(LifecycleEvent::Abandoned { unit: name.clone() });
            return UnitExit {
                unit: name,
                code: EXIT_ABANDONED,
                error: Some("abandoned after shutdown timeout".to_string()),
                abandoned: true,
            };
        };

        let result = joined.unwrap_or_else(|e| ExitResult::failure(EXIT_PANICKED, e.to_string()));
        info!(parent: ctx.span(), "Stopped");
        self.emit(LifecycleEvent::Stopped { unit: name.clone() });
        UnitExit {
            unit: name,
            code: result.code,
            error: result.error.map(|e| e.to_string()),
            abandoned: false,
        }
    }
}

/// Run one unit; a panic is contained here and becomes a failed result.
async fn run_unit(
    ctx: UnitContext,
    runner: Runner,
    events: Option<EventSender<LifecycleEvent>>,
) -> ExitResult {
    let span = ctx.span().clone();
    let name = ctx.name().to_string();
    async move {
        info!("Running");
        if let Some(events) = &events {
            events.emit(LifecycleEvent::Running { unit: name.clone() });
        }

        let result = match AssertUnwindSafe(runner.into_future(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(panic = %message, "Exit unexpected");
                ExitResult::failure(EXIT_PANICKED, format!("panicked: {message}"))
            }
        };

        let error = result.error.as_ref().map(|e| e.to_string());
        if result.is_clean() {
            info!(code = result.code, "Exit");
        } else {
            warn!(code = result.code, error = ?error, "Exit");
        }
        if let Some(events) = &events {
            events.emit(LifecycleEvent::Exited {
                unit: name,
                code: result.code,
                error,
            });
        }
        result
    }
    .instrument(span)
    .await
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
