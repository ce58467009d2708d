//! Storage gateway (spec.md §4.2): every tenant-scoped unit of work takes a
//! pooled connection, opens a transaction, sets the two session variables row
//! level security depends on, runs the caller's closure, then commits (or
//! rolls back on error). Grounded in the teacher's `shared::utils::DbPool`
//! pool-building pattern, generalized from a single global connection to one
//! gated by `TenantContext` per call.

use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use diesel::{Connection, PgConnection, RunQueryDsl};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};

use crate::config::DatabaseConfig;
use crate::error::{AppError, AppResult};
use crate::shared::TenantContext;

pub type DbPool = Pool<ConnectionManager<PgConnection>>;
pub type DbConn = PooledConnection<ConnectionManager<PgConnection>>;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[derive(Clone)]
pub struct StorageGateway {
    pool: DbPool,
}

/// Offset/limit pagination with a hard cap, matching the teacher's
/// dashboard list endpoints (`analytics::mod` query helpers).
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub limit: i64,
    pub offset: i64,
}

impl Page {
    pub const MAX_LIMIT: i64 = 200;

    pub fn new(limit: i64, offset: i64) -> Self {
        Self {
            limit: limit.clamp(1, Self::MAX_LIMIT),
            offset: offset.max(0),
        }
    }
}

impl Default for Page {
    fn default() -> Self {
        Self { limit: 50, offset: 0 }
    }
}

impl StorageGateway {
    pub fn connect(config: &DatabaseConfig) -> AppResult<Self> {
        let manager = ConnectionManager::<PgConnection>::new(&config.url);
        let pool = Pool::builder()
            .min_idle(Some(config.pool_min))
            .max_size(config.pool_max)
            .idle_timeout(Some(std::time::Duration::from_secs(config.idle_timeout_secs)))
            .connection_timeout(std::time::Duration::from_secs(config.connection_timeout_secs))
            .build(manager)
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn run_migrations(&self) -> AppResult<()> {
        let mut conn = self.pool.get()?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| AppError::StorageFailure(e.to_string()))?;
        Ok(())
    }

    /// Runs `f` inside a transaction with `app.current_team_id` /
    /// `app.current_user_role` set for the duration, so row-level security
    /// policies scope every statement `f` issues to `ctx.team_id`.
    pub fn transaction_with_context<T, F>(&self, ctx: &TenantContext, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut DbConn) -> AppResult<T>,
    {
        let mut conn = self.pool.get()?;
        conn.transaction::<T, AppError, _>(|conn| {
            set_session_vars(conn, ctx)?;
            f(conn)
        })
    }

    /// Single-statement convenience wrapper around
    /// [`transaction_with_context`] for callers that don't need to compose
    /// multiple statements atomically.
    pub fn execute_with_context<T, F>(&self, ctx: &TenantContext, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut DbConn) -> AppResult<T>,
    {
        self.transaction_with_context(ctx, f)
    }

    /// Escape hatch for raw SQL (migrations, maintenance queries) that does
    /// not carry tenant scope and therefore skips the session variables.
    pub fn execute_raw(&self, sql: &str) -> AppResult<usize> {
        let mut conn = self.pool.get()?;
        diesel::sql_query(sql)
            .execute(&mut conn)
            .map_err(AppError::from)
    }
}

fn set_session_vars(conn: &mut PgConnection, ctx: &TenantContext) -> AppResult<()> {
    diesel::sql_query("SELECT set_config('app.current_team_id', $1, true)")
        .bind::<diesel::sql_types::Text, _>(ctx.team_id.to_string())
        .execute(conn)?;
    diesel::sql_query("SELECT set_config('app.current_user_role', $1, true)")
        .bind::<diesel::sql_types::Text, _>(ctx.user_role.clone())
        .execute(conn)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_clamps_limit_to_max() {
        let page = Page::new(10_000, -5);
        assert_eq!(page.limit, Page::MAX_LIMIT);
        assert_eq!(page.offset, 0);
    }

    #[test]
    fn page_default_is_reasonable() {
        let page = Page::default();
        assert_eq!(page.limit, 50);
        assert_eq!(page.offset, 0);
    }
}
