use std::env;

use anyhow::Context;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub max_connections: u32,
    pub log_level: String,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let database_url = env::var("DATABASE_URL")
            .context("DATABASE_URL must be set to a production Postgres instance")?;
        let max_connections = match env::var("SCHOOLCHECKER_MAX_CONNECTIONS") {
            Ok(value) => parse_max_connections(&value)?,
            Err(_) => 5,
        };
        let log_level = env::var("SCHOOLCHECKER_LOG").unwrap_or_else(|_| "info".to_string());

        Ok(Self {
            database_url,
            max_connections,
            log_level,
        })
    }
}

fn parse_max_connections(value: &str) -> anyhow::Result<u32> {
    let parsed: u32 = value
        .trim()
        .parse()
        .with_context(|| format!("SCHOOLCHECKER_MAX_CONNECTIONS is not a number: {value}"))?;
    anyhow::ensure!(parsed > 0, "SCHOOLCHECKER_MAX_CONNECTIONS must be at least 1");
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_connections_accepts_positive_numbers() {
        assert_eq!(parse_max_connections(" 12 ").unwrap(), 12);
    }

    #[test]
    fn max_connections_rejects_zero_and_garbage() {
        assert!(parse_max_connections("0").is_err());
        assert!(parse_max_connections("lots").is_err());
    }
}
