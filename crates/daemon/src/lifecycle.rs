// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon lifecycle management: startup, shutdown, recovery.

use std::fs::File;
use std::sync::Arc;
use std::time::{Duration, Instant};

use depot_core::{CancelToken, SystemClock, UuidIdGen};
use depot_engine::{
    Dispatcher, JournalMaintenance, OperationRegistry, RepositoryOps, RepositoryService,
    ReservationManager, ScheduleRunner,
};
use depot_plugins::PluginRegistry;
use depot_storage::{
    HistoryStore, Journal, RepositoryStore, ScheduleStore, StoreError, TaskStore,
};
use fs2::FileExt;
use thiserror::Error;
use tokio::net::UnixListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{ConfigError, DaemonConfig, Paths};
use crate::server::ServerContext;

/// Service with the production clock and id generator
pub type DaemonService = RepositoryService<SystemClock, UuidIdGen>;

/// How long shutdown waits for running tasks
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Daemon state during operation
pub struct Daemon {
    pub config: DaemonConfig,
    pub paths: Paths,
    // NOTE(lifetime): Held to maintain exclusive file lock; released on drop
    #[allow(dead_code)]
    lock_file: File,
    pub listener: UnixListener,
    /// Shared with every connection handler
    pub server: Arc<ServerContext<SystemClock, UuidIdGen>>,
    journal: Arc<Journal>,
    runner: JoinHandle<()>,
    maintenance: JoinHandle<()>,
    /// Stops the runner and maintenance loops
    background_stop: CancelToken,
}

impl Daemon {
    pub fn service(&self) -> &DaemonService {
        &self.server.service
    }

    /// Canceled once a client has asked the daemon to stop
    pub fn shutdown_requested(&self) -> &CancelToken {
        &self.server.shutdown
    }

    /// Shutdown the daemon gracefully
    ///
    /// Stops the background loops, refuses queued work and gives running
    /// tasks a grace period. The journal is checkpointed last, then the
    /// socket and PID files are removed.
    pub async fn shutdown(self) -> Result<(), LifecycleError> {
        info!("shutting down daemon");

        self.background_stop.cancel();
        if let Err(e) = self.runner.await {
            warn!(error = %e, "schedule runner did not stop cleanly");
        }
        if let Err(e) = self.maintenance.await {
            warn!(error = %e, "journal maintenance did not stop cleanly");
        }

        let dispatcher = self.server.service.dispatcher();
        dispatcher.shutdown();
        if !dispatcher.wait_idle(SHUTDOWN_GRACE).await {
            warn!(
                in_flight = dispatcher.in_flight(),
                "tasks still running at shutdown; they will be failed on next start"
            );
        }
        if let Err(e) = self.journal.checkpoint() {
            warn!(error = %e, "final checkpoint failed; WAL will be replayed on next start");
        }

        remove_runtime_files(&self.paths);
        info!("daemon shutdown complete");
        Ok(())
    }
}

/// Lifecycle errors
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Failed to acquire lock: daemon already running?")]
    LockFailed(#[source] std::io::Error),

    #[error("Failed to bind socket at {0}: {1}")]
    BindFailed(std::path::PathBuf, std::io::Error),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Start the daemon
pub async fn startup(config: &DaemonConfig) -> Result<Daemon, LifecycleError> {
    let paths = config.paths()?;
    match startup_inner(config, &paths).await {
        Ok(daemon) => Ok(daemon),
        Err(e) => {
            // A second daemon holding the lock must keep its files
            if !matches!(e, LifecycleError::LockFailed(_)) {
                remove_runtime_files(&paths);
            }
            Err(e)
        }
    }
}

async fn startup_inner(config: &DaemonConfig, paths: &Paths) -> Result<Daemon, LifecycleError> {
    // 1. Create state directory
    std::fs::create_dir_all(&paths.state_dir)?;

    // 2. Acquire lock file FIRST - prevents races
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&paths.lock_path)?;
    lock_file
        .try_lock_exclusive()
        .map_err(LifecycleError::LockFailed)?;

    // Write PID to lock file
    use std::io::Write;
    lock_file.set_len(0)?;
    let mut lock_file = lock_file;
    writeln!(lock_file, "{}", std::process::id())?;
    let lock_file = lock_file;

    // 3. Load state from WAL
    if let Some(parent) = paths.wal_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let journal = Arc::new(Journal::open_with(
        &paths.wal_path,
        config.journal_config(),
    )?);

    // 4. Recover tasks a previous process left unfinished
    let tasks = TaskStore::new(Arc::clone(&journal));
    let recovered = tasks.fail_unfinished(&SystemClock)?;
    if !recovered.is_empty() {
        warn!(
            count = recovered.len(),
            "failed tasks left unfinished by previous daemon"
        );
    }

    // 5. Wire stores, plugins and the engine
    let repos = RepositoryStore::new(Arc::clone(&journal));
    let schedules = ScheduleStore::new(Arc::clone(&journal));
    let plugins = PluginRegistry::noop(
        config.importer_types.iter().cloned(),
        config.distributor_types.iter().cloned(),
    );
    let ops = Arc::new(RepositoryOps::new(
        repos.clone(),
        schedules.clone(),
        HistoryStore::new(Arc::clone(&journal)),
        Arc::new(plugins),
        SystemClock,
    ));
    let mut registry = OperationRegistry::new();
    ops.register(&mut registry);
    let dispatcher = Dispatcher::new(
        tasks,
        registry,
        ReservationManager::new(),
        SystemClock,
        UuidIdGen,
        config.dispatcher_config(),
    );
    let service = Arc::new(RepositoryService::new(
        ops,
        dispatcher.clone(),
        repos,
        schedules.clone(),
        SystemClock,
        UuidIdGen,
    ));

    // 6. Remove stale socket and bind (LAST - only after all validation passes)
    if paths.socket_path.exists() {
        std::fs::remove_file(&paths.socket_path)?;
    }
    let listener = UnixListener::bind(&paths.socket_path)
        .map_err(|e| LifecycleError::BindFailed(paths.socket_path.clone(), e))?;

    // 7. Start the schedule runner and journal maintenance
    let background_stop = CancelToken::new();
    let runner = ScheduleRunner::new(schedules, dispatcher, SystemClock, config.runner_config())
        .spawn(background_stop.clone());
    let maintenance = JournalMaintenance::new(
        Arc::clone(&journal),
        SystemClock,
        config.maintenance_config(),
    )
    .spawn(background_stop.clone());

    info!(
        state_dir = %paths.state_dir.display(),
        workers = config.workers,
        "daemon started"
    );

    Ok(Daemon {
        config: config.clone(),
        paths: paths.clone(),
        lock_file,
        listener,
        server: Arc::new(ServerContext {
            service,
            start_time: Instant::now(),
            shutdown: CancelToken::new(),
            request_timeout: config.request_timeout,
        }),
        journal,
        runner,
        maintenance,
        background_stop,
    })
}

/// Remove the socket and PID files
fn remove_runtime_files(paths: &Paths) {
    for path in [&paths.socket_path, &paths.lock_path] {
        if path.exists() {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove runtime file");
            }
        }
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
