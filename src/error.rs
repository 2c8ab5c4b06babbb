//! Severity-tagged errors. Hook handlers map a severity to an HTTP-like
//! status class when reporting back to the forge and to operators.

use std::fmt;

use thiserror::Error;

/// Coarse classification of a failure, mirroring HTTP status classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Bad input from a repository's configuration or a hook payload.
    Client,
    /// Missing permissions or OAuth scopes.
    Auth,
    NotFound,
    /// Everything else.
    Server,
}

impl Severity {
    pub fn status(self) -> u16 {
        match self {
            Severity::Client => 400,
            Severity::Auth => 403,
            Severity::NotFound => 404,
            Severity::Server => 500,
        }
    }

    fn is_client_class(self) -> bool {
        self.status() < 500
    }
}

#[derive(Debug, Error)]
#[error("{message}")]
pub struct TaggedError {
    pub severity: Severity,
    pub message: String,
}

impl TaggedError {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        TaggedError {
            severity,
            message: message.into(),
        }
    }
}

pub fn bad_request(message: impl Into<String>) -> anyhow::Error {
    TaggedError::new(Severity::Client, message).into()
}

pub fn forbidden(message: impl Into<String>) -> anyhow::Error {
    TaggedError::new(Severity::Auth, message).into()
}

pub fn not_found(message: impl Into<String>) -> anyhow::Error {
    TaggedError::new(Severity::NotFound, message).into()
}

/// The severity of an arbitrary error. Untagged errors promote to
/// server class.
pub fn severity(err: &anyhow::Error) -> Severity {
    if let Some(tagged) = err.downcast_ref::<TaggedError>() {
        return tagged.severity;
    }
    if let Some(multi) = err.downcast_ref::<MultiError>() {
        return multi.severity();
    }
    Severity::Server
}

/// Accumulates independent failures so that every problem in a
/// configuration file is reported at once.
#[derive(Debug, Default)]
pub struct MultiError {
    errors: Vec<anyhow::Error>,
}

impl MultiError {
    pub fn new() -> Self {
        MultiError::default()
    }

    pub fn push(&mut self, err: anyhow::Error) {
        self.errors.push(err);
    }

    pub fn push_result<T>(&mut self, result: anyhow::Result<T>) {
        if let Err(err) = result {
            self.errors.push(err);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    /// The flattened severity: the shared severity when all entries
    /// agree, client when all entries are client-class, server otherwise.
    pub fn severity(&self) -> Severity {
        let severities: Vec<Severity> = self.errors.iter().map(severity).collect();
        match severities.first() {
            None => Severity::Server,
            Some(&first) => {
                if severities.iter().all(|&s| s == first) {
                    first
                } else if severities.iter().all(|s| s.is_client_class()) {
                    Severity::Client
                } else {
                    Severity::Server
                }
            }
        }
    }

    /// `Ok(())` when no error was recorded, the accumulated error
    /// otherwise.
    pub fn into_result(self) -> anyhow::Result<()> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.into())
        }
    }
}

/// Attaches a follow-on failure to a primary error, keeping both
/// messages visible.
pub fn append(primary: anyhow::Error, secondary: anyhow::Result<()>) -> anyhow::Error {
    match secondary {
        Ok(()) => primary,
        Err(err) => {
            let mut errs = MultiError::new();
            errs.push(primary);
            errs.push(err);
            errs.into()
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        // alternate form keeps each error's cause chain visible
        if self.errors.len() == 1 {
            return write!(f, "{:#}", self.errors[0]);
        }
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, " [{err:#}]")?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}
