use std::env;
use std::time::Duration;

/// Process configuration, loaded once from the environment: `.env` via
/// `dotenvy`, typed fields, documented defaults.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    pub session_secret: String,
    pub session_max_age: Duration,
    pub oauth_client_id: String,
    pub oauth_client_secret: String,
    pub cors_allowed_origin: String,
    pub base_url: String,

    pub fetch_interval: Duration,
    pub fetch_max_concurrent: usize,
    pub fetch_timeout: Duration,
    pub fetch_max_size: usize,

    pub hatebu_batch_interval: Duration,
    pub hatebu_api_interval: Duration,
    pub hatebu_max_calls_per_cycle: u32,
    pub hatebu_ttl: Duration,

    pub retention_days: i64,
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgres://localhost/feedman".to_string());

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()?;
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        let session_secret = env::var("SESSION_SECRET").unwrap_or_default();
        let session_max_age = Duration::from_secs(env_u64("SESSION_MAX_AGE", 86_400)?);
        let oauth_client_id = env::var("OAUTH_CLIENT_ID").unwrap_or_default();
        let oauth_client_secret = env::var("OAUTH_CLIENT_SECRET").unwrap_or_default();
        let cors_allowed_origin =
            env::var("CORS_ALLOWED_ORIGIN").unwrap_or_else(|_| "*".to_string());
        let base_url =
            env::var("BASE_URL").unwrap_or_else(|_| "http://localhost:3000".to_string());

        let fetch_interval = Duration::from_secs(env_u64("FETCH_INTERVAL", 60)?);
        let fetch_max_concurrent = env_u64("FETCH_MAX_CONCURRENT", 10)? as usize;
        let fetch_timeout = Duration::from_secs(env_u64("FETCH_TIMEOUT", 30)?);
        let fetch_max_size = env_u64("FETCH_MAX_SIZE", 5 * 1024 * 1024)? as usize;

        let hatebu_batch_interval = Duration::from_secs(env_u64("HATEBU_BATCH_INTERVAL", 600)?);
        let hatebu_api_interval = Duration::from_secs(env_u64("HATEBU_API_INTERVAL", 5)?);
        let hatebu_max_calls_per_cycle = env_u64("HATEBU_MAX_CALLS_PER_CYCLE", 100)? as u32;
        let hatebu_ttl = Duration::from_secs(env_u64("HATEBU_TTL", 86_400)?);

        let retention_days = env_u64("RETENTION_DAYS", 180)? as i64;

        Ok(Config {
            database_url,
            host,
            port,
            session_secret,
            session_max_age,
            oauth_client_id,
            oauth_client_secret,
            cors_allowed_origin,
            base_url,
            fetch_interval,
            fetch_max_concurrent,
            fetch_timeout,
            fetch_max_size,
            hatebu_batch_interval,
            hatebu_api_interval,
            hatebu_max_calls_per_cycle,
            hatebu_ttl,
            retention_days,
        })
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, Box<dyn std::error::Error>> {
    match env::var(key) {
        Ok(v) => Ok(v.parse::<u64>()?),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u64_falls_back_to_default_when_unset() {
        std::env::remove_var("FEEDMAN_TEST_KEY_NOT_SET");
        assert_eq!(env_u64("FEEDMAN_TEST_KEY_NOT_SET", 42).unwrap(), 42);
    }
}
