use thiserror::Error;

/// Exit status iptables uses for "chain already exists" and "bad rule"
pub const EXIT_STATUS_CONFLICT: i32 = 1;

/// Core error types for overlay-fw
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The iptables binary could not be found or initialized
    #[error("iptables unavailable: {0}")]
    EngineUnavailable(String),

    /// iptables command execution failed
    #[error("iptables error: {message}")]
    Iptables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Creating a custom chain failed for a reason other than it already existing
    #[error("failed to create chain {chain} in table {table}: {source}")]
    ChainCreate {
        table: String,
        chain: String,
        #[source]
        source: Box<Error>,
    },

    /// Querying rule presence failed
    #[error("failed to check rule existence: {0}")]
    ExistenceCheck(#[source] Box<Error>),

    /// Inserting or appending a rule failed
    #[error("failed to apply rule `{rule}`: {source}")]
    Apply {
        rule: String,
        #[source]
        source: Box<Error>,
    },

    /// Configuration is missing or inconsistent
    #[error("Configuration error: {0}")]
    Config(String),

    /// Privilege escalation wrapper unavailable
    #[error("Elevation error: {0}")]
    Elevation(#[from] crate::elevation::ElevationError),
}

impl Error {
    /// Whether this is iptables reporting a conflict, e.g. `-N` on an existing chain
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::Iptables {
                exit_code: Some(EXIT_STATUS_CONFLICT),
                ..
            }
        )
    }

    /// Raw backend stderr, looking through the wrapping variants
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Error::Iptables { stderr, .. } => stderr.as_deref(),
            Error::ChainCreate { source, .. } | Error::Apply { source, .. } => source.stderr(),
            Error::ExistenceCheck(source) => source.stderr(),
            _ => None,
        }
    }
}

/// Represents a translated error with helpful context
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

impl ErrorTranslation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            user_message: message.into(),
            suggestions: Vec::new(),
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestions.push(suggestion.into());
        self
    }
}

/// Database of iptables error patterns and their translations
pub struct IptablesErrorPattern;

impl IptablesErrorPattern {
    /// Matches an error message against known patterns and returns an operator-friendly translation.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();

        if lower.contains("permission denied")
            || lower.contains("operation not permitted")
            || lower.contains("you must be root")
        {
            return ErrorTranslation::new("Insufficient permissions to modify firewall rules")
                .with_suggestion("Run overlay-fw as root or with CAP_NET_ADMIN")
                .with_suggestion("Or set OVERLAY_FW_ELEVATION_METHOD=sudo for interactive use");
        }

        if lower.contains("no such file") || lower.contains("not found in path") {
            return ErrorTranslation::new("iptables is not installed or not found in PATH")
                .with_suggestion("Install iptables: sudo apt install iptables  (Debian/Ubuntu)")
                .with_suggestion("Or: sudo dnf install iptables-nft  (Fedora/RHEL)")
                .with_suggestion("Or set iptables_path in the configuration file");
        }

        if lower.contains("another app is currently holding the xtables lock")
            || lower.contains("resource temporarily unavailable")
        {
            return ErrorTranslation::new("The xtables lock is held by another process")
                .with_suggestion("Another firewall tool is modifying rules at the same time")
                .with_suggestion("The next resync will retry automatically");
        }

        if lower.contains("can't initialize") || lower.contains("table does not exist") {
            return ErrorTranslation::new("Kernel table not available")
                .with_suggestion("Load the required modules: sudo modprobe iptable_nat iptable_filter")
                .with_suggestion("Check which backend is active: iptables --version");
        }

        if lower.contains("no chain/target/match by that name") {
            return ErrorTranslation::new("Referenced chain, target or match not found")
                .with_suggestion("The custom chain may have been deleted externally")
                .with_suggestion("Check that the MASQUERADE and comment extensions are available");
        }

        if lower.contains("unknown option") && lower.contains("random-fully") {
            return ErrorTranslation::new("iptables does not support --random-fully")
                .with_suggestion("Upgrade to iptables 1.6.2 or newer");
        }

        ErrorTranslation::new(format!("Firewall error: {msg}"))
            .with_suggestion("Check the detailed error message for more information")
            .with_suggestion("Verify iptables is working: sudo iptables -t nat -S")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
