/// Error taxonomy per the reconciler's propagation policy: transient platform
/// errors and admin-protocol errors both requeue with backoff. Spec-validation,
/// parse, and orphan cases never reach this type — they're handled inline by
/// their callers, which emit a warning event and return `Action::await_change()`
/// directly rather than constructing an `Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Kubernetes reported error: {source}")]
    Kube {
        #[from]
        source: kube::Error,
    },

    #[error("invalid user input: {0}")]
    UserInput(String),

    /// The DB admin HTTP protocol returned an error or could not be reached.
    #[error("admin protocol error: {0}")]
    Admin(String),

    #[error("json error: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },

    #[error("http client error: {source}")]
    Http {
        #[from]
        source: reqwest::Error,
    },
}

impl Error {
    /// Event reason to use when emitting this error as a Kubernetes event,
    /// if it is the kind of error that has one.
    pub fn event_reason(&self) -> &'static str {
        match self {
            Error::Admin(_) => "FailedToUpdate",
            _ => "ReconcileError",
        }
    }
}
