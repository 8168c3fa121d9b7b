//! Job execution errors
//!
//! Handlers use these to tell the queue whether a failure is worth retrying.

use std::fmt;

#[derive(Debug)]
pub struct JobError {
    inner: anyhow::Error,
    recoverable: bool,
}

impl JobError {
    /// The job fails immediately, e.g. the provider rejected the input.
    pub fn unrecoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: false,
        }
    }

    /// The job is retried under its attempt budget.
    pub fn recoverable(err: impl Into<anyhow::Error>) -> Self {
        Self {
            inner: err.into(),
            recoverable: true,
        }
    }

    pub fn is_recoverable(&self) -> bool {
        self.recoverable
    }

    pub fn inner(&self) -> &anyhow::Error {
        &self.inner
    }
}

impl fmt::Display for JobError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl std::error::Error for JobError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

impl From<anyhow::Error> for JobError {
    fn from(err: anyhow::Error) -> Self {
        Self::recoverable(err)
    }
}

/// Whether an `anyhow` error returned by a handler should stop retries.
pub fn is_unrecoverable(err: &anyhow::Error) -> bool {
    err.downcast_ref::<JobError>()
        .map(|e| !e.is_recoverable())
        .unwrap_or(false)
}

pub trait JobResultExt<T> {
    fn unrecoverable(self) -> Result<T, JobError>;
}

impl<T, E: Into<anyhow::Error>> JobResultExt<T> for Result<T, E> {
    fn unrecoverable(self) -> Result<T, JobError> {
        self.map_err(JobError::unrecoverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unrecoverable_error() {
        let err = JobError::unrecoverable(anyhow::anyhow!("input rejected"));
        assert!(!err.is_recoverable());
        assert!(err.to_string().contains("input rejected"));
        assert!(is_unrecoverable(&err.into()));
    }

    #[test]
    fn test_plain_errors_are_recoverable() {
        let err: JobError = anyhow::anyhow!("connection reset").into();
        assert!(err.is_recoverable());
        assert!(!is_unrecoverable(&anyhow::anyhow!("connection reset")));
    }

    #[test]
    fn test_result_ext() {
        let result: Result<(), anyhow::Error> = Err(anyhow::anyhow!("bad credentials"));
        assert!(!result.unrecoverable().unwrap_err().is_recoverable());
    }
}
