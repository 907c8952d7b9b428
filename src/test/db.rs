//! Throwaway Postgres databases for store tests.
//!
//! Every `TestDb` is a freshly migrated database inside one shared server. The server
//! is `TEST_DATABASE_URL` when set (an admin connection string), otherwise a
//! container started once per test binary. Without either, database tests are skipped.

use sqlx::{Connection, PgConnection, PgPool};
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres as PostgresImage;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::store::PgStore;

const USER: &str = "storefront_test";
const PASSWORD: &str = "storefront_test_password";

/// `None` once startup has failed, so the remaining tests skip quickly.
static SERVER: OnceCell<Option<Server>> = OnceCell::const_new();

struct Server {
    base_url: String,
    _container: Option<ContainerAsync<PostgresImage>>,
}

async fn start_server() -> Option<Server> {
    if let Ok(url) = std::env::var("TEST_DATABASE_URL") {
        let base_url = url.rsplit_once('/').map_or(url.clone(), |(base, _)| base.to_string());
        return Some(Server { base_url, _container: None });
    }
    let started = PostgresImage::default()
        .with_user(USER)
        .with_password(PASSWORD)
        .with_db_name("storefront_test")
        .with_env_var("POSTGRES_INITDB_ARGS", "--auth-host=trust")
        .start()
        .await;
    let container = match started {
        Ok(container) => container,
        Err(err) => {
            eprintln!("skipping database tests, no Postgres available: {err}");
            return None;
        }
    };
    let port = container.get_host_port_ipv4(5432).await.ok()?;
    let host = std::env::var("TESTCONTAINERS_HOST_OVERRIDE").unwrap_or_else(|_| "localhost".to_string());
    Some(Server { base_url: format!("postgresql://{USER}:{PASSWORD}@{host}:{port}"), _container: Some(container) })
}

#[derive(Debug, Clone)]
pub struct TestDb {
    pub pool: PgPool,
}

impl TestDb {
    /// A new migrated database, or `None` when no Postgres server is reachable.
    pub async fn new() -> Option<Self> {
        let server = SERVER.get_or_init(start_server).await.as_ref()?;
        let name = format!("storefront_{}", Uuid::now_v7().simple());

        let mut admin = PgConnection::connect(&format!("{}/postgres", server.base_url))
            .await
            .expect("Failed to connect to the postgres database");
        sqlx::query(&format!("CREATE DATABASE \"{name}\""))
            .execute(&mut admin)
            .await
            .expect("Failed to create test database");
        admin.close().await.expect("Failed to close admin connection");

        let pool = PgPool::connect(&format!("{}/{name}", server.base_url))
            .await
            .expect("Failed to create pool for test database");
        PgStore::new(pool.clone()).migrate().await.expect("Failed to run migrations");
        Some(Self { pool })
    }

    pub fn store(&self) -> PgStore { PgStore::new(self.pool.clone()) }
}
