//! Error types for relay-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while parsing a single rule text entry.
///
/// [`PatternRuleSet::add`](crate::pattern::PatternRuleSet::add) logs these and
/// moves on; [`PatternRuleSet::try_add`](crate::pattern::PatternRuleSet::try_add)
/// hands them back to the caller.
#[derive(Debug, Error)]
pub enum PatternError {
    /// The text has no `CATEGORY:` prefix.
    #[error("missing category in rule '{text}'; expected CATEGORY:[NAME@]TOKEN,...")]
    MissingCategory { text: String },

    /// The text has a category but no tokens after it.
    #[error("rule '{text}' has no tokens")]
    EmptyRule { text: String },

    /// A `~`/`=` rewrite token was not closed by its third delimiter.
    #[error("unterminated '{delimiter}' rewrite token in rule '{text}'")]
    Unterminated { text: String, delimiter: char },

    /// Characters follow a closed rewrite token without a separating comma.
    #[error("unexpected input after rewrite token in rule '{text}'")]
    TrailingInput { text: String },

    /// A token is not a valid regular expression.
    #[error("invalid pattern '{pattern}': {source}")]
    InvalidRegex {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// All errors that can arise from manifest operations.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load, with the manifest path for context.
    #[error("failed to parse manifest at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None`, so `~/.relay/` cannot be located.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The manifest file did not exist at the expected path.
    #[error("manifest not found at {path}")]
    NotFound { path: PathBuf },

    /// A project has no remote and the manifest has no default remote base.
    #[error("project '{project}' has no remote and no default remote is configured")]
    MissingRemote { project: String },

    /// Two manifest entries share a name.
    #[error("project '{name}' is listed more than once")]
    DuplicateProject { name: String },
}
