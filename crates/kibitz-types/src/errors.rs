use thiserror::Error;

pub type Result<T, E = KibitzError> = std::result::Result<T, E>;

/// Unified error type covering the failure scenarios of every pipeline stage.
#[derive(Debug, Error)]
pub enum KibitzError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("corpus error: {0}")]
    Corpus(String),
    #[error("rules error: {0}")]
    Rules(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error(
        "labelled output holds {persisted} rows but the position table only has {available}; \
         reconcile the files before resuming"
    )]
    ResumeMismatch { persisted: usize, available: usize },
    #[error("operational error: {0}")]
    Ops(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
