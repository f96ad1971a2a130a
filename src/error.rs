use crate::datasource::SourceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Cache or ledger backend unreachable. Fatal for the run.
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),
    /// A stored or fetched row failed decoding. Skipped and counted.
    #[error("Malformed record {key}: {reason}")]
    MalformedRecord { key: String, reason: String },
    /// The balance source does not know this account. Excludes the account.
    #[error("Unknown cohort member: {0}")]
    UnknownCohortMember(String),
    /// An activity could not be mapped to a category. Drops that contribution.
    #[error("Activity {activity} not resolved for account {account}")]
    ActivityNotResolved { account: String, activity: String },
    /// Bad input for one account's computation. Excludes the account.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
    #[error("Not found: {0}")]
    NotFound(String),
    /// No population run has ever succeeded for the scope.
    #[error("No leaderboard materialized for {0}")]
    NotMaterialized(String),
}

impl EngineError {
    /// Whether the error aborts a population run rather than one row or account.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EngineError::StorageUnavailable(_)
                | EngineError::NotFound(_)
                | EngineError::NotMaterialized(_)
        )
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::StorageUnavailable(err.to_string())
    }
}

impl From<SourceError> for EngineError {
    fn from(err: SourceError) -> Self {
        match err {
            SourceError::Unavailable(msg) => EngineError::StorageUnavailable(msg),
            SourceError::UnknownAccount(account) => EngineError::UnknownCohortMember(account),
        }
    }
}
