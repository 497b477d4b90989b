use thiserror::Error;

/// All errors that can occur in bibfetch-core.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown {kind} backend: {name} (supported: {supported})")]
    UnknownBackend {
        kind: &'static str,
        name: String,
        supported: &'static str,
    },

    #[error("BibTeX parse error at line {line}: {message}")]
    Bibtex { line: usize, message: String },

    #[error("Invalid record {0}")]
    InvalidRecord(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl CoreError {
    /// Configuration problems are reported before any network activity.
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::UnknownBackend { .. } | Self::TomlParse(_)
        )
    }
}

/// Process exit codes of the `bibfetch` binary.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    ConfigError = 2,
}

pub type Result<T> = std::result::Result<T, CoreError>;
