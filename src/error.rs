//! Error taxonomy shared by the metadata client, the resolvers and the routes.

use axum::http::StatusCode;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The transport call did not succeed (connect error, timeout, non-2xx).
    #[error("network error: {0}")]
    Network(String),

    /// The upstream answered with an error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// The response was well-formed but not the shape we expected.
    #[error("unexpected response: {0}")]
    Contract(String),

    /// Every candidate was tried and none succeeded.
    #[error("all {attempts} candidates failed")]
    Exhausted { attempts: usize },

    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl Error {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) | Error::UnsupportedProvider(_) | Error::Exhausted { .. } => {
                StatusCode::NOT_FOUND
            }
            Error::Network(_) | Error::Remote(_) | Error::Contract(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Error::Network(_) => "network_error",
            Error::Remote(_) => "remote_error",
            Error::Contract(_) => "contract_error",
            Error::Exhausted { .. } => "exhausted",
            Error::UnsupportedProvider(_) => "unsupported_provider",
            Error::InvalidInput(_) => "invalid_input",
            Error::NotFound(_) => "not_found",
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Error::Contract(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

/// Resolver internals use `anyhow`; anything that reaches a route without a
/// more specific classification is reported as an upstream failure.
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<Error>() {
            Ok(inner) => inner,
            Err(other) => match other.downcast_ref::<reqwest::Error>() {
                Some(req) if req.is_decode() => Error::Contract(format!("{other:#}")),
                Some(_) => Error::Network(format!("{other:#}")),
                None => Error::Remote(format!("{other:#}")),
            },
        }
    }
}
