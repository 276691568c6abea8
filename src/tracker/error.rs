use std::num::{ParseFloatError, ParseIntError};
use std::path::PathBuf;

use crate::handler::HandlerError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Probe or spec fetch failed while the container still exists.
    #[error(transparent)]
    Handler(#[from] HandlerError),

    /// Stats arrived partially populated; the partial sample was pushed.
    #[error("{source}, continuing to push stats")]
    PartialStats {
        #[source]
        source: HandlerError,
    },

    /// Custom metric collection failed; whatever was gathered was pushed.
    #[error("{message}, continuing to push custom stats")]
    CustomMetrics { message: String },

    #[error("failed to get custom metric specs: {message}")]
    CollectorSpec { message: String },

    #[error("failed to get load stat for {name:?} - path {path:?}, error {source}")]
    LoadStat {
        name: String,
        path: PathBuf,
        #[source]
        source: HandlerError,
    },

    #[error(transparent)]
    Sink(#[from] crate::sink::Error),

    #[error("derived stats not enabled for container {name:?}")]
    SummaryNotEnabled { name: String },

    #[error("failed to execute {command:?} command: {message}")]
    PsCommand { command: String, message: String },

    #[error("expected at least {expected} fields, found {found}: output: {line:?}")]
    PsFields {
        expected: usize,
        found: usize,
        line: String,
    },

    #[error("invalid {field} {value:?}: {source}")]
    PsIntField {
        field: &'static str,
        value: String,
        #[source]
        source: ParseIntError,
    },

    #[error("invalid {field} {value:?}: {source}")]
    PsFloatField {
        field: &'static str,
        value: String,
        #[source]
        source: ParseFloatError,
    },

    #[error("file {path:?} does not exist")]
    FileNotFound { path: String },
}

pub type Result<T> = std::result::Result<T, Error>;
