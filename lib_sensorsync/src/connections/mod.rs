/// PostgreSQL pool creation and health check.
pub mod db_postgres;
