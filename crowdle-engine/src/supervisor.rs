// Copyright (C) 2026 StarHuntingGames
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Runs a fixed set of loops as one unit.
//!
//! The set starts together and must report ready within the startup timeout.
//! The first loop to stop on its own takes the whole set down: siblings are
//! cancelled, given the grace period, then aborted, and the set is restarted
//! with backoff until the restart budget runs out.

use std::{collections::HashSet, future::Future, pin::Pin, sync::Arc, time::Duration};

use thiserror::Error;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub startup_timeout: Duration,
    pub shutdown_grace: Duration,
    pub max_restarts: u32,
    pub restart_backoff: Duration,
}

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("loops not ready within {timeout:?}: {pending:?}")]
    StartupTimeout {
        pending: Vec<String>,
        timeout: Duration,
    },
    #[error("gave up after {restarts} restarts, last failure: {last_failure}")]
    RestartsExhausted { restarts: u32, last_failure: String },
}

/// Handed to each loop when the set starts.
pub struct LoopContext {
    name: String,
    cancel: CancellationToken,
    ready: Option<mpsc::UnboundedSender<String>>,
}

impl LoopContext {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Call once the loop is subscribed and about to take work.
    pub fn ready(&mut self) {
        if let Some(ready) = self.ready.take() {
            let _ = ready.send(self.name.clone());
        }
    }
}

type LoopFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
type LoopFactory = Arc<dyn Fn(LoopContext) -> LoopFuture + Send + Sync>;

enum RunOutcome {
    Shutdown,
    Failed(String),
    StartupTimeout(Vec<String>),
}

pub struct Supervisor {
    config: SupervisorConfig,
    loops: Vec<(String, LoopFactory)>,
}

impl Supervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            config,
            loops: Vec::new(),
        }
    }

    /// `factory` is called again on every restart.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(LoopContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let factory: LoopFactory = Arc::new(move |context| -> LoopFuture { Box::pin(factory(context)) });
        self.loops.push((name.into(), factory));
        self
    }

    pub fn loop_names(&self) -> Vec<&str> {
        self.loops.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// Returns `Ok` once `shutdown` is cancelled and the loops have stopped.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(), SupervisorError> {
        let backoff = RetryPolicy::new(
            self.config.max_restarts.saturating_add(1),
            self.config.restart_backoff,
            Duration::from_secs(60),
        );
        let mut restarts = 0;
        loop {
            match self.run_once(&shutdown).await {
                RunOutcome::Shutdown => {
                    info!("supervised loops stopped");
                    return Ok(());
                }
                RunOutcome::StartupTimeout(pending) => {
                    error!(pending = ?pending, "loops failed to become ready");
                    return Err(SupervisorError::StartupTimeout {
                        pending,
                        timeout: self.config.startup_timeout,
                    });
                }
                RunOutcome::Failed(reason) => {
                    if shutdown.is_cancelled() {
                        return Ok(());
                    }
                    if restarts >= self.config.max_restarts {
                        error!(restarts, reason = %reason, "restart budget exhausted");
                        return Err(SupervisorError::RestartsExhausted {
                            restarts,
                            last_failure: reason,
                        });
                    }
                    restarts += 1;
                    let delay = backoff.delay_for(restarts);
                    warn!(
                        restart = restarts,
                        max_restarts = self.config.max_restarts,
                        delay_ms = delay.as_millis() as u64,
                        reason = %reason,
                        "restarting supervised loops"
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => return Ok(()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn run_once(&self, shutdown: &CancellationToken) -> RunOutcome {
        let cancel = shutdown.child_token();
        let (ready_tx, mut ready_rx) = mpsc::unbounded_channel();
        let mut set = JoinSet::new();
        let mut pending = HashSet::new();

        for (name, factory) in &self.loops {
            let context = LoopContext {
                name: name.clone(),
                cancel: cancel.clone(),
                ready: Some(ready_tx.clone()),
            };
            let task = factory(context);
            let name = name.clone();
            pending.insert(name.clone());
            set.spawn(async move { (name, task.await) });
        }
        drop(ready_tx);
        info!(loops = pending.len(), "supervised loops starting");

        let startup = tokio::time::sleep(self.config.startup_timeout);
        tokio::pin!(startup);
        while !pending.is_empty() {
            tokio::select! {
                Some(name) = ready_rx.recv() => {
                    debug!(name = %name, "loop ready");
                    pending.remove(&name);
                }
                Some(joined) = set.join_next() => {
                    let reason = describe(joined);
                    self.stop(&mut set, &cancel).await;
                    return RunOutcome::Failed(reason);
                }
                _ = &mut startup => {
                    self.stop(&mut set, &cancel).await;
                    let mut pending: Vec<String> = pending.into_iter().collect();
                    pending.sort();
                    return RunOutcome::StartupTimeout(pending);
                }
                _ = shutdown.cancelled() => {
                    self.stop(&mut set, &cancel).await;
                    return RunOutcome::Shutdown;
                }
            }
        }
        info!("all supervised loops ready");

        let outcome = tokio::select! {
            _ = shutdown.cancelled() => RunOutcome::Shutdown,
            Some(joined) = set.join_next() => RunOutcome::Failed(describe(joined)),
        };
        self.stop(&mut set, &cancel).await;
        outcome
    }

    async fn stop(&self, set: &mut JoinSet<(String, anyhow::Result<()>)>, cancel: &CancellationToken) {
        cancel.cancel();
        let drained = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(joined) = set.join_next().await {
                if let Ok((name, Err(error))) = joined {
                    warn!(name = %name, error = %error, "loop failed while stopping");
                }
            }
        })
        .await;
        if drained.is_err() {
            warn!(
                remaining = set.len(),
                grace_ms = self.config.shutdown_grace.as_millis() as u64,
                "loops did not stop within the grace period, aborting"
            );
            set.abort_all();
            while set.join_next().await.is_some() {}
        }
    }
}

fn describe(joined: Result<(String, anyhow::Result<()>), tokio::task::JoinError>) -> String {
    match joined {
        Ok((name, Ok(()))) => {
            warn!(name = %name, "loop exited before shutdown");
            format!("{name} exited")
        }
        Ok((name, Err(error))) => {
            error!(name = %name, error = %format!("{error:#}"), "loop failed");
            format!("{name} failed: {error:#}")
        }
        Err(error) => {
            error!(error = %error, "loop panicked or was aborted");
            format!("loop task failed: {error}")
        }
    }
}

/// Cancels `token` on Ctrl+C or SIGTERM.
pub fn spawn_shutdown_signal(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                warn!(error = %error, "failed to listen for ctrl-c");
                std::future::pending::<()>().await;
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(error) => {
                    warn!(error = %error, "failed to listen for SIGTERM");
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => info!("received ctrl-c, shutting down"),
            _ = terminate => info!("received SIGTERM, shutting down"),
        }
        token.cancel();
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config(max_restarts: u32) -> SupervisorConfig {
        SupervisorConfig {
            startup_timeout: Duration::from_millis(200),
            shutdown_grace: Duration::from_millis(100),
            max_restarts,
            restart_backoff: Duration::from_millis(1),
        }
    }

    async fn idle(mut context: LoopContext) -> anyhow::Result<()> {
        context.ready();
        context.cancel_token().cancelled().await;
        Ok(())
    }

    #[tokio::test]
    async fn ready_loops_run_until_shutdown() {
        let mut supervisor = Supervisor::new(config(0));
        supervisor.add("a", idle).add("b", idle);
        assert_eq!(supervisor.loop_names(), vec!["a", "b"]);

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            stopper.cancel();
        });
        supervisor.run(shutdown).await.unwrap();
    }

    #[tokio::test]
    async fn loop_that_never_gets_ready_fails_startup() {
        let mut supervisor = Supervisor::new(config(3));
        supervisor.add("ok", idle).add("stuck", |context: LoopContext| async move {
            context.cancel_token().cancelled().await;
            Ok(())
        });

        let error = supervisor.run(CancellationToken::new()).await.unwrap_err();
        match error {
            SupervisorError::StartupTimeout { pending, .. } => assert_eq!(pending, vec!["stuck"]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn failing_loop_cancels_siblings_and_exhausts_restarts() {
        let starts = Arc::new(AtomicU32::new(0));
        let sibling_stops = Arc::new(AtomicU32::new(0));
        let mut supervisor = Supervisor::new(config(2));
        {
            let starts = starts.clone();
            supervisor.add("flaky", move |mut context: LoopContext| {
                starts.fetch_add(1, Ordering::SeqCst);
                async move {
                    context.ready();
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Err::<(), _>(anyhow::anyhow!("broker gone"))
                }
            });
        }
        {
            let sibling_stops = sibling_stops.clone();
            supervisor.add("steady", move |context: LoopContext| {
                let sibling_stops = sibling_stops.clone();
                async move {
                    idle(context).await?;
                    sibling_stops.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            });
        }

        let error = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(
            error,
            SupervisorError::RestartsExhausted { restarts: 2, .. }
        ));
        assert_eq!(starts.load(Ordering::SeqCst), 3);
        assert_eq!(sibling_stops.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stubborn_loop_is_aborted_after_the_grace_period() {
        let mut supervisor = Supervisor::new(config(0));
        supervisor
            .add("stubborn", |mut context: LoopContext| async move {
                context.ready();
                std::future::pending::<()>().await;
                Ok::<(), anyhow::Error>(())
            })
            .add("failing", |mut context: LoopContext| async move {
                context.ready();
                Err::<(), _>(anyhow::anyhow!("boom"))
            });

        let started = tokio::time::Instant::now();
        let error = supervisor.run(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(error, SupervisorError::RestartsExhausted { restarts: 0, .. }));
        assert!(started.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn recovered_loop_keeps_running_after_one_restart() {
        let starts = Arc::new(AtomicU32::new(0));
        let mut supervisor = Supervisor::new(config(1));
        {
            let starts = starts.clone();
            supervisor.add("once", move |context: LoopContext| {
                let first = starts.fetch_add(1, Ordering::SeqCst) == 0;
                async move {
                    if first {
                        return Err(anyhow::anyhow!("cold start"));
                    }
                    idle(context).await
                }
            });
        }

        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(80)).await;
            stopper.cancel();
        });
        supervisor.run(shutdown).await.unwrap();
        assert_eq!(starts.load(Ordering::SeqCst), 2);
    }
}
