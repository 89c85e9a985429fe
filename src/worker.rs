//! Stable worker identity and lambda (function) naming.

use std::fmt;

/// A normalized handle identifying one backend worker.
///
/// Wraps a parsed [`url::Url`] so that two URLs which are textually
/// different but semantically identical (e.g. differing only in a default
/// port) compare equal, and so the value can serve directly as a
/// `HashMap`/`BTreeMap` key. Never mutated after construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkerUrl(url::Url);

impl WorkerUrl {
    /// Parses and normalizes a worker URL string.
    pub fn parse(raw: &str) -> Result<Self, url::ParseError> {
        Ok(Self(url::Url::parse(raw)?))
    }

    /// The host (and port, if non-default) this worker listens on, e.g.
    /// `worker1:8000`. Used as the hash-ring key and for cross-heap
    /// load propagation, which keys on host rather than full URL.
    pub fn host(&self) -> String {
        match self.0.port() {
            Some(port) => format!("{}:{port}", self.0.host_str().unwrap_or_default()),
            None => self.0.host_str().unwrap_or_default().to_string(),
        }
    }

    pub fn as_url(&self) -> &url::Url {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for WorkerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for WorkerUrl {
    type Error = url::ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

/// Opaque function identity, extracted from a request path segment.
///
/// The router never inspects or interprets the name beyond using it as a
/// map key into per-function balancer state (the pull-based idle queues).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Lambda {
    name: String,
}

impl Lambda {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Display for Lambda {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_url_equality_ignores_textual_differences() {
        let a = WorkerUrl::parse("http://worker1:8000/").unwrap();
        let b = WorkerUrl::parse("http://worker1:8000").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn worker_url_host_includes_port() {
        let u = WorkerUrl::parse("http://worker1:8000/").unwrap();
        assert_eq!(u.host(), "worker1:8000");
    }

    #[test]
    fn malformed_url_is_rejected() {
        assert!(WorkerUrl::parse("not a url").is_err());
    }

    #[test]
    fn lambda_name_roundtrip() {
        let l = Lambda::new("my-fn");
        assert_eq!(l.name(), "my-fn");
    }
}
