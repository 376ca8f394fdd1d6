use sqlx::{
    postgres::{PgPool, PgPoolOptions},
    Error as SqlxError,
};
use std::time::Duration;

pub async fn setup_database(url: &str) -> Result<PgPool, SqlxError> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(10))
        .connect(url)
        .await?;

    Ok(pool)
}
