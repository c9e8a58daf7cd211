use crate::action::Action;

/// The closed set of error kinds surfaced by the core. The HTTP layer
/// maps kinds to status codes; parsers rely on the match/syntax split
/// to compose alternatives.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("entry {path} does not support the {action} action")]
    UnsupportedAction { path: String, action: Action },

    #[error("no entry found at {path}")]
    NotFound { path: String },

    /// Two siblings resolved to the same cname. Either the plugin's API
    /// returns duplicate names, or the plugin needs a different slash
    /// replacer.
    #[error(
        "error listing {parent_id}: children {first_child_name} and {second_child_name} \
         have the same cname of {cname}"
    )]
    DuplicateCName {
        parent_id: String,
        first_child_name: String,
        second_child_name: String,
        cname: String,
    },

    #[error("bad request: {0}")]
    BadRequest(String),

    /// A parser alternative that does not apply to its input. Composite
    /// parsers treat this as "try the next variant".
    #[error("{0}")]
    MatchError(String),

    /// A parser alternative that applies but is malformed. Composite
    /// parsers stop and report this.
    #[error("{0}")]
    SyntaxError(String),

    #[error("{0}")]
    IncompleteOperator(String),

    #[error("{0}")]
    EmptyExpression(String),

    #[error("unknown token {0}")]
    UnknownToken(String),

    #[error("plugin error: {0}")]
    PluginError(String),

    #[error("operation was cancelled")]
    Cancelled,
}

impl Error {
    /// Short machine-readable kind, used in API error payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::UnsupportedAction { .. } => "unsupported-action",
            Error::NotFound { .. } => "not-found",
            Error::DuplicateCName { .. } => "duplicate-cname",
            Error::BadRequest(_) => "bad-request",
            Error::MatchError(_) => "match-error",
            Error::SyntaxError(_) => "syntax-error",
            Error::IncompleteOperator(_) => "incomplete-operator",
            Error::EmptyExpression(_) => "empty-expression",
            Error::UnknownToken(_) => "unknown-token",
            Error::PluginError(_) => "plugin-error",
            Error::Cancelled => "cancelled",
        }
    }

    pub fn is_match_error(&self) -> bool {
        matches!(self, Error::MatchError(_))
    }

    /// Recovers a taxonomy error from a cache-layer failure. Loader
    /// errors pass through unchanged; anything else becomes PluginError.
    pub fn from_cache(err: datastore::Error) -> Self {
        match err {
            datastore::Error::Load(shared) => match shared.downcast_ref::<Error>() {
                Some(err) => err.clone(),
                None => Error::PluginError(shared.to_string()),
            },
            datastore::Error::Cancelled => Error::Cancelled,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn unsupported(entry_id: &str, action: Action) -> Error {
    Error::UnsupportedAction {
        path: entry_id.to_string(),
        action,
    }
}
