//! Runtime environment detection.
//!
//! Single source of truth for the runtime environment, read from the
//! `PUSHID_ENV` environment variable:
//!
//! - `test` - test mode (state kept under the system temp directory)
//! - `development` or `dev` - development mode
//! - anything else or unset - production mode

/// Runtime environment for the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Production environment (default).
    Production,
    /// Development environment.
    Development,
    /// Test environment.
    Test,
}

impl Environment {
    /// Detect current environment from `PUSHID_ENV`.
    #[must_use]
    pub fn current() -> Self {
        Self::parse(std::env::var("PUSHID_ENV").ok().as_deref())
    }

    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("test") => Self::Test,
            Some("development" | "dev") => Self::Development,
            _ => Self::Production,
        }
    }

    /// Returns `true` for the test environment.
    #[must_use]
    pub fn is_test(self) -> bool {
        self == Self::Test
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Production => write!(f, "production"),
            Self::Development => write!(f, "development"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Convenience check for test mode.
#[must_use]
pub fn is_test_mode() -> bool {
    Environment::current().is_test()
}
