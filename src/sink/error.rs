#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to write stats to the time-series store: {0}")]
    WriteError(#[source] sqlx::Error),
    #[error("sink writer has shut down")]
    WriterGone,
}

pub type Result<T> = std::result::Result<T, Error>;
