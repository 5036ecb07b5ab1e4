use thiserror::Error;
use url::Url;

#[derive(Debug, Error)]
pub enum DsnError {
    #[error("can't parse DSN {dsn:?}: {source}")]
    Invalid {
        dsn: String,
        #[source]
        source: url::ParseError,
    },

    #[error("DSN {dsn:?} does not contain a token")]
    MissingToken { dsn: String },
}

/// Parsed data source name in the shape `scheme://token@host:port/project-id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    pub scheme: String,
    pub token: String,
    pub host: String,
    pub port: Option<u16>,
    pub project_id: Option<u32>,
}

impl Dsn {
    pub fn parse(input: &str) -> Result<Dsn, DsnError> {
        let url = Url::parse(input).map_err(|source| DsnError::Invalid {
            dsn: input.to_string(),
            source,
        })?;

        let token = url.username().to_string();
        if token.is_empty() {
            return Err(DsnError::MissingToken {
                dsn: input.to_string(),
            });
        }

        Ok(Dsn {
            scheme: url.scheme().to_string(),
            token,
            host: url.host_str().unwrap_or_default().to_string(),
            port: url.port(),
            project_id: url.path().trim_matches('/').parse().ok(),
        })
    }
}
