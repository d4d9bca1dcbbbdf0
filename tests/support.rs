//! Shared setup for the `DATABASE_URL`-gated integration tests. Mirrors the
//! teacher's `tests/common/test_fixture.rs`, but connects to a database the
//! caller already has running rather than spinning up a container — these
//! tests are written to compile and pass against a real Postgres instance
//! and are skipped when `DATABASE_URL` is unset.

use sqlx::PgPool;
use uuid::Uuid;

/// Returns a connected, migrated pool, or `None` if `DATABASE_URL` isn't set
/// in the environment. Every test that needs Postgres starts with:
/// ```ignore
/// let Some(pool) = support::pool().await else { return; };
/// ```
pub async fn pool() -> Option<PgPool> {
    let url = match std::env::var("DATABASE_URL") {
        Ok(url) => url,
        Err(_) => {
            eprintln!("skipping: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPool::connect(&url).await.expect("failed to connect to DATABASE_URL");
    sqlx::migrate!("./migrations").run(&pool).await.expect("failed to run migrations");
    Some(pool)
}

/// Inserts a user/connection/calendar chain and returns their ids, the
/// minimum scaffolding every store test needs before it can touch
/// `calendar_events` or `calendar_sync_jobs`.
pub async fn seed_calendar(pool: &PgPool) -> (Uuid, Uuid, Uuid) {
    let user_id = Uuid::new_v4();
    sqlx::query("INSERT INTO users (id, email) VALUES ($1, $2)")
        .bind(user_id)
        .bind(format!("{user_id}@example.test"))
        .execute(pool)
        .await
        .unwrap();

    let connection_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO connections (id, user_id, provider, encrypted_credentials) VALUES ($1, $2, 'google', 'ciphertext')",
    )
    .bind(connection_id)
    .bind(user_id)
    .execute(pool)
    .await
    .unwrap();

    let calendar_id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO calendars (id, connection_id, external_id, display_name) VALUES ($1, $2, 'primary', 'Work')",
    )
    .bind(calendar_id)
    .bind(connection_id)
    .execute(pool)
    .await
    .unwrap();

    (user_id, connection_id, calendar_id)
}

pub async fn seed_project(pool: &PgPool, user_id: Uuid) -> Uuid {
    let project_id = Uuid::new_v4();
    sqlx::query("INSERT INTO projects (id, user_id, name) VALUES ($1, $2, 'Client Work')")
        .bind(project_id)
        .bind(user_id)
        .execute(pool)
        .await
        .unwrap();
    project_id
}
