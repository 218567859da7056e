//! State-machine Mission Runner. States, init hooks, and background tasks
//! are trait objects returning a boxed future, the same hand-rolled
//! `BoxFuture` technique `mavkit::safety::GeofenceCheck` uses to avoid an
//! `async-trait` dependency for a handful of object-safe async methods.

use mavkit::safety::BoxFuture;
use mavkit::{Vehicle, VehicleError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Free-form, user-owned state shared across state invocations.
#[derive(Debug, Clone, Default)]
pub struct Context {
    pub data: HashMap<String, Value>,
}

impl Context {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateOutcome {
    Done,
    Next(String),
}

pub trait MissionState: Send + Sync {
    fn run<'a>(&'a self, vehicle: &'a Vehicle, ctx: &'a mut Context) -> BoxFuture<'a, Result<StateOutcome, VehicleError>>;
}

pub trait InitHook: Send + Sync {
    fn run<'a>(&'a self, vehicle: &'a Vehicle, ctx: &'a mut Context) -> BoxFuture<'a, Result<(), VehicleError>>;
}

pub trait BackgroundTask: Send + Sync {
    fn run<'a>(&'a self, vehicle: &'a Vehicle, cancel: &'a CancellationToken) -> BoxFuture<'a, Result<(), VehicleError>>;
}

#[derive(Debug, Clone, Copy)]
struct TimedConfig {
    duration: Duration,
    is_loop: bool,
}

struct StateDef {
    handler: Arc<dyn MissionState>,
    timed: Option<TimedConfig>,
}

/// Builds and runs a named-state mission. Exactly one state is initial;
/// background tasks registered with [`StateMachineRunner::background_task`]
/// run concurrently for the lifetime of the mission via a `JoinSet`.
pub struct StateMachineRunner {
    vehicle: Vehicle,
    states: HashMap<String, StateDef>,
    initial: String,
    init_hooks: Vec<Arc<dyn InitHook>>,
    background_tasks: Vec<Arc<dyn BackgroundTask>>,
}

impl StateMachineRunner {
    pub fn new(vehicle: Vehicle, initial: impl Into<String>) -> Self {
        Self {
            vehicle,
            states: HashMap::new(),
            initial: initial.into(),
            init_hooks: Vec::new(),
            background_tasks: Vec::new(),
        }
    }

    pub fn state(mut self, name: impl Into<String>, handler: Arc<dyn MissionState>) -> Self {
        self.states.insert(name.into(), StateDef { handler, timed: None });
        self
    }

    /// Registers a state that re-invokes its body for at least `duration`
    /// before honoring a declared transition. With `is_loop = false` the
    /// duration is still enforced once; with `is_loop = true` the handler is
    /// re-entered repeatedly until the duration elapses.
    pub fn timed_state(mut self, name: impl Into<String>, handler: Arc<dyn MissionState>, duration: Duration, is_loop: bool) -> Self {
        self.states.insert(
            name.into(),
            StateDef { handler, timed: Some(TimedConfig { duration, is_loop }) },
        );
        self
    }

    pub fn init_hook(mut self, hook: Arc<dyn InitHook>) -> Self {
        self.init_hooks.push(hook);
        self
    }

    pub fn background_task(mut self, task: Arc<dyn BackgroundTask>) -> Self {
        self.background_tasks.push(task);
        self
    }

    pub async fn run(self) -> Result<(), VehicleError> {
        let cancel = CancellationToken::new();
        let mut ctx = Context::default();

        for hook in &self.init_hooks {
            hook.run(&self.vehicle, &mut ctx).await?;
        }

        let mut join_set: JoinSet<Result<(), VehicleError>> = JoinSet::new();
        for task in &self.background_tasks {
            let task = task.clone();
            let vehicle = self.vehicle.clone();
            let task_cancel = cancel.clone();
            join_set.spawn(async move { task.run(&vehicle, &task_cancel).await });
        }

        let state_machine = self.drive_states(&mut ctx);
        tokio::pin!(state_machine);

        let result = tokio::select! {
            result = &mut state_machine => result,
            err = watch_background(&mut join_set) => Err(err),
        };

        cancel.cancel();
        join_set.shutdown().await;
        result
    }

    async fn drive_states(&self, ctx: &mut Context) -> Result<(), VehicleError> {
        let mut current = self.initial.clone();
        loop {
            let def = self
                .states
                .get(&current)
                .ok_or_else(|| VehicleError::NavigationFailed(format!("unknown mission state '{current}'")))?;

            debug!(state = %current, "entering mission state");
            let started = Instant::now();
            let outcome = loop {
                let outcome = def.handler.run(&self.vehicle, ctx).await?;
                match &def.timed {
                    Some(timed) if timed.is_loop && started.elapsed() < timed.duration => {
                        continue;
                    }
                    Some(timed) if started.elapsed() < timed.duration => {
                        tokio::time::sleep(timed.duration - started.elapsed()).await;
                        break outcome;
                    }
                    _ => break outcome,
                }
            };

            match outcome {
                StateOutcome::Done => {
                    info!("mission state machine reached Done");
                    return Ok(());
                }
                StateOutcome::Next(name) => {
                    current = name;
                }
            }
        }
    }
}

async fn watch_background(join_set: &mut JoinSet<Result<(), VehicleError>>) -> VehicleError {
    while let Some(result) = join_set.join_next().await {
        match result {
            Ok(Ok(())) => continue,
            Ok(Err(err)) => {
                error!(%err, "background task failed, cancelling mission");
                return err;
            }
            Err(join_err) => {
                error!(%join_err, "background task panicked, cancelling mission");
                return VehicleError::NavigationFailed(join_err.to_string());
            }
        }
    }
    std::future::pending().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingState {
        visits: Arc<AtomicUsize>,
        next: Option<&'static str>,
    }

    impl MissionState for CountingState {
        fn run<'a>(&'a self, _vehicle: &'a Vehicle, _ctx: &'a mut Context) -> BoxFuture<'a, Result<StateOutcome, VehicleError>> {
            Box::pin(async move {
                self.visits.fetch_add(1, Ordering::SeqCst);
                Ok(match self.next {
                    Some(name) => StateOutcome::Next(name.to_string()),
                    None => StateOutcome::Done,
                })
            })
        }
    }

    struct FailingBackgroundTask;

    impl BackgroundTask for FailingBackgroundTask {
        fn run<'a>(&'a self, _vehicle: &'a Vehicle, _cancel: &'a CancellationToken) -> BoxFuture<'a, Result<(), VehicleError>> {
            Box::pin(async move { Err(VehicleError::Timeout) })
        }
    }

    #[test]
    fn context_round_trips_json_values() {
        let mut ctx = Context::default();
        ctx.set("waypoint_index", 3);
        assert_eq!(ctx.get("waypoint_index"), Some(&Value::from(3)));
    }

    #[test]
    fn state_outcome_equality() {
        assert_eq!(StateOutcome::Next("a".into()), StateOutcome::Next("a".into()));
        assert_ne!(StateOutcome::Done, StateOutcome::Next("a".into()));
    }
}
