use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

use agora_core::sync::lock;
use agora_core::{AgoraError, DatabaseConfig, DatabaseDriver, SubsystemName};

use crate::supervisor::{Lifecycle, PeriodicWorker, Subsystem, WorkerSlot};

fn db_err(e: sqlx::Error) -> AgoraError {
    AgoraError::Database(e.to_string())
}

/// Driver-specific pool.
#[derive(Clone, Debug)]
pub enum DbHandle {
    /// SQLite pool.
    Sqlite(SqlitePool),
    /// PostgreSQL pool.
    Postgres(PgPool),
}

impl DbHandle {
    /// Open a pool for `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AgoraError> {
        let acquire = config.ping_interval.min(Duration::from_secs(5));
        match config.driver {
            DatabaseDriver::Sqlite => SqlitePoolOptions::new()
                .max_connections(1)
                .acquire_timeout(acquire)
                .connect(&config.connection_string)
                .await
                .map(Self::Sqlite)
                .map_err(db_err),
            DatabaseDriver::Postgres => PgPoolOptions::new()
                .max_connections(2)
                .acquire_timeout(acquire)
                .connect(&config.connection_string)
                .await
                .map(Self::Postgres)
                .map_err(db_err),
        }
    }

    /// `SELECT 1`.
    pub async fn ping(&self) -> Result<(), AgoraError> {
        let res = match self {
            Self::Sqlite(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
            Self::Postgres(p) => sqlx::query("SELECT 1").execute(p).await.map(|_| ()),
        };
        res.map_err(db_err)
    }

    /// Close every connection.
    pub async fn close(&self) {
        match self {
            Self::Sqlite(p) => p.close().await,
            Self::Postgres(p) => p.close().await,
        }
    }
}

struct Shared {
    connected: AtomicBool,
}

impl Shared {
    fn set(&self, up: bool) {
        let was = self.connected.swap(up, Ordering::AcqRel);
        if was != up {
            #[cfg(feature = "tracing")]
            tracing::info!(connected = up, "database connectivity changed");
        }
    }

    async fn ping(&self, handle: &DbHandle) {
        match handle.ping().await {
            Ok(()) => self.set(true),
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(error = %_e, "database ping failed");
                self.set(false);
            }
        }
    }
}

/// `database` subsystem: opens a pool and pings it on every interval.
///
/// A failed ping clears the connected flag but keeps the pool; the next
/// successful ping restores it.
pub struct DatabaseKeepalive {
    lifecycle: Arc<Lifecycle>,
    config: DatabaseConfig,
    shared: Arc<Shared>,
    handle: Mutex<Option<DbHandle>>,
    worker: WorkerSlot,
}

impl DatabaseKeepalive {
    /// Keepalive for `config`.
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            lifecycle: Arc::new(Lifecycle::new(SubsystemName::Database)),
            config,
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
            }),
            handle: Mutex::new(None),
            worker: WorkerSlot::default(),
        }
    }

    /// Result of the last open or ping.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// The open pool, while running.
    #[must_use]
    pub fn handle(&self) -> Option<DbHandle> {
        lock(&self.handle).clone()
    }

    /// Ping now and update the flag.
    pub async fn ping_now(&self) -> Result<bool, AgoraError> {
        let handle = self.handle().ok_or_else(|| AgoraError::not_started("database"))?;
        self.shared.ping(&handle).await;
        Ok(self.is_connected())
    }

    async fn start_inner(&self) -> Result<(), AgoraError> {
        self.config.validate()?;
        let handle = DbHandle::connect(&self.config).await?;
        handle.ping().await?;
        self.shared.set(true);
        *lock(&self.handle) = Some(handle.clone());

        let shared = Arc::clone(&self.shared);
        self.worker.put(PeriodicWorker::spawn(
            Arc::clone(&self.lifecycle),
            self.config.ping_interval,
            move || {
                let shared = Arc::clone(&shared);
                let handle = handle.clone();
                async move {
                    shared.ping(&handle).await;
                    Ok(())
                }
            },
        ));
        Ok(())
    }

    async fn stop_inner(&self) -> Result<(), AgoraError> {
        self.worker.stop().await;
        let handle = lock(&self.handle).take();
        if let Some(h) = handle {
            h.close().await;
        }
        self.shared.set(false);
        Ok(())
    }
}

#[async_trait]
impl Subsystem for DatabaseKeepalive {
    fn lifecycle(&self) -> &Lifecycle {
        &self.lifecycle
    }

    async fn start(&self) -> Result<(), AgoraError> {
        self.lifecycle.start_with(self.start_inner()).await
    }

    async fn stop(&self) -> Result<(), AgoraError> {
        self.lifecycle.stop_with(self.stop_inner()).await
    }
}
