use derive_more::From;

use crate::client::ApiError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, From)]
pub enum Error {
    #[from]
    Json(serde_json::Error),

    #[from]
    Io(std::io::Error),

    #[from]
    Api(ApiError),

    #[from]
    Pattern(regex::Error),

    /// A section returned content of the wrong shape for its kind
    InvalidShape { section: String, message: String },

    /// The provider could not be reached with the given credentials at all
    Access(String),

    /// A per-region client could not be constructed
    Region { region: String, message: String },

    /// Invalid collector configuration
    Config(String),
}

impl Error {
    #[must_use]
    pub fn invalid_shape(section: &str, message: impl Into<String>) -> Self {
        Self::InvalidShape {
            section: section.to_string(),
            message: message.into(),
        }
    }

    /// Contract violations point at a programming defect rather than the environment.
    #[must_use]
    pub const fn is_contract_violation(&self) -> bool {
        matches!(self, Self::InvalidShape { .. })
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, fmt: &mut core::fmt::Formatter) -> core::result::Result<(), core::fmt::Error> {
        match self {
            Self::Json(e) => write!(fmt, "JSON error: {e}"),
            Self::Io(e) => write!(fmt, "I/O error: {e}"),
            Self::Api(e) => write!(fmt, "{e}"),
            Self::Pattern(e) => write!(fmt, "invalid pattern: {e}"),
            Self::InvalidShape { section, message } => write!(fmt, "{section}: {message}"),
            Self::Access(message) => write!(fmt, "cannot access provider: {message}"),
            Self::Region { region, message } => write!(fmt, "region {region}: {message}"),
            Self::Config(message) => write!(fmt, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for Error {}
