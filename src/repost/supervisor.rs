//! Supervision of the long-lived pipeline units
//!
//! This module provides:
//! 1. A cloneable shutdown signal handed to every unit
//! 2. A supervisor that owns each unit's task handle and health state
//! 3. Crash-only recovery: a unit that exits while no shutdown was requested is restarted

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Interval between health checks of supervised units.
pub const SUPERVISOR_CHECK_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Unit '{0}' is already registered")]
    DuplicateUnit(String),

    #[error("Unit error: {0}")]
    Unit(String),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// Receiving side of the process-wide shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once shutdown has been requested.
    pub async fn wait(&mut self) {
        // An error means the sender is gone, which only happens on teardown.
        let _ = self.rx.wait_for(|requested| *requested).await;
    }

    /// Sleep for `duration`, returning `false` early if shutdown is requested.
    pub async fn sleep(&mut self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.wait() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Sending side of the shutdown flag.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownTrigger {
    pub fn new() -> (Self, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, ShutdownSignal { rx })
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
        }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

/// Lifecycle of a supervised unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Running,
    Crashed,
    Restarting,
    Stopped,
}

impl std::fmt::Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Running => write!(f, "running"),
            UnitState::Crashed => write!(f, "crashed"),
            UnitState::Restarting => write!(f, "restarting"),
            UnitState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Builds a fresh future for a unit each time it is (re)started.
pub type UnitFactory =
    Arc<dyn Fn(ShutdownSignal) -> BoxFuture<'static, SupervisorResult<()>> + Send + Sync>;

/// Wrap an async constructor into a [`UnitFactory`].
pub fn unit<F, Fut>(start: F) -> UnitFactory
where
    F: Fn(ShutdownSignal) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = SupervisorResult<()>> + Send + 'static,
{
    Arc::new(move |signal| start(signal).boxed())
}

struct SupervisedUnit {
    name: String,
    factory: UnitFactory,
    handle: Option<JoinHandle<SupervisorResult<()>>>,
    restarts: u32,
}

/// Owns every long-lived unit and restarts the ones that die.
pub struct Supervisor {
    units: Vec<SupervisedUnit>,
    states: Arc<RwLock<HashMap<String, UnitState>>>,
    trigger: ShutdownTrigger,
    check_interval: Duration,
}

impl Supervisor {
    pub fn new(trigger: ShutdownTrigger) -> Self {
        Self {
            units: Vec::new(),
            states: Arc::new(RwLock::new(HashMap::new())),
            trigger,
            check_interval: SUPERVISOR_CHECK_INTERVAL,
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Register a unit. It is started by [`Supervisor::run`].
    pub fn register(&mut self, name: impl Into<String>, factory: UnitFactory) -> SupervisorResult<()> {
        let name = name.into();
        if self.units.iter().any(|u| u.name == name) {
            return Err(SupervisorError::DuplicateUnit(name));
        }
        self.units.push(SupervisedUnit {
            name,
            factory,
            handle: None,
            restarts: 0,
        });
        Ok(())
    }

    /// Shared view of unit states, for status reporting.
    pub fn states(&self) -> Arc<RwLock<HashMap<String, UnitState>>> {
        self.states.clone()
    }

    fn start_unit(&mut self, index: usize) {
        let signal = self.trigger.subscribe();
        let unit = &mut self.units[index];
        let future = (unit.factory)(signal);
        unit.handle = Some(tokio::spawn(future));
        self.states.write().insert(unit.name.clone(), UnitState::Running);
        info!(unit = %unit.name, "Started unit");
    }

    /// Restart count for a unit, if registered.
    pub fn restarts(&self, name: &str) -> Option<u32> {
        self.units.iter().find(|u| u.name == name).map(|u| u.restarts)
    }

    /// Start all units and keep them alive until shutdown is requested.
    pub async fn run(&mut self) {
        for index in 0..self.units.len() {
            self.start_unit(index);
        }

        let mut shutdown = self.trigger.subscribe();
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = ticker.tick() => self.check_units().await,
            }
        }

        self.join_all().await;
    }

    async fn check_units(&mut self) {
        for index in 0..self.units.len() {
            let finished = self.units[index]
                .handle
                .as_ref()
                .is_some_and(|handle| handle.is_finished());
            if !finished || self.trigger.is_requested() {
                continue;
            }

            let name = self.units[index].name.clone();
            self.states.write().insert(name.clone(), UnitState::Crashed);

            if let Some(handle) = self.units[index].handle.take() {
                match handle.await {
                    Ok(Ok(())) => warn!(unit = %name, "Unit exited unexpectedly"),
                    Ok(Err(e)) => error!(unit = %name, "Unit failed: {}", e),
                    Err(e) => error!(unit = %name, "Unit panicked: {}", e),
                }
            }

            self.states.write().insert(name.clone(), UnitState::Restarting);
            self.units[index].restarts += 1;
            warn!(unit = %name, restarts = self.units[index].restarts, "Restarting unit");
            self.start_unit(index);
        }
    }

    async fn join_all(&mut self) {
        for unit in &mut self.units {
            if let Some(handle) = unit.handle.take() {
                match handle.await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => error!(unit = %unit.name, "Unit error during shutdown: {}", e),
                    Err(e) => error!(unit = %unit.name, "Join error: {}", e),
                }
            }
            self.states.write().insert(unit.name.clone(), UnitState::Stopped);
        }
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn test_crashed_unit_is_restarted() {
        let (trigger, _signal) = ShutdownTrigger::new();
        let stopper = trigger.clone();
        let mut supervisor = Supervisor::new(trigger).with_check_interval(Duration::from_millis(10));
        let starts = Arc::new(AtomicU32::new(0));

        let counter = starts.clone();
        supervisor
            .register(
                "flaky",
                unit(move |mut shutdown| {
                    let counter = counter.clone();
                    async move {
                        let attempt = counter.fetch_add(1, Ordering::SeqCst);
                        if attempt < 2 {
                            return Err(SupervisorError::Unit("boom".to_string()));
                        }
                        shutdown.wait().await;
                        Ok(())
                    }
                }),
            )
            .unwrap();

        let states = supervisor.states();
        let run = tokio::spawn(async move {
            supervisor.run().await;
            supervisor
        });

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert_eq!(states.read().get("flaky"), Some(&UnitState::Running));

        stopper.trigger();
        let supervisor = run.await.unwrap();
        assert_eq!(supervisor.restarts("flaky"), Some(2));
        assert_eq!(states.read().get("flaky"), Some(&UnitState::Stopped));
    }

    #[tokio::test]
    async fn test_shutdown_joins_units() {
        let (trigger, signal) = ShutdownTrigger::new();
        let stopper = trigger.clone();
        let mut supervisor = Supervisor::new(trigger).with_check_interval(Duration::from_millis(10));

        supervisor
            .register(
                "steady",
                unit(|mut shutdown| async move {
                    shutdown.wait().await;
                    Ok(())
                }),
            )
            .unwrap();
        assert!(matches!(
            supervisor.register("steady", unit(|_| async { Ok(()) })),
            Err(SupervisorError::DuplicateUnit(_))
        ));

        let states = supervisor.states();
        let run = tokio::spawn(async move { supervisor.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.trigger();
        run.await.unwrap();

        assert!(signal.is_requested());
        assert_eq!(states.read().get("steady"), Some(&UnitState::Stopped));
    }
}
