use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("YamlError: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("K8s error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Failed to encode resources #{index} to JSON: {source}")]
    Encoding {
        index: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid label selector: {0}")]
    Selector(String),

    #[error("Stdio error {0}")]
    Stdio(#[from] std::io::Error),

    #[error("Error: {0}")]
    Other(String),
}

impl Error {
    pub fn metric_label(&self) -> String {
        let label = match self {
            Error::YamlError(_) => "yamlerror",
            Error::KubeError(_) => "kubeerror",
            Error::Encoding { .. } => "encoding",
            Error::Conflict(_) => "conflict",
            Error::AlreadyExists(_) => "alreadyexists",
            Error::Selector(_) => "selector",
            Error::Stdio(_) => "stdio",
            Error::Other(_) => "other",
        };
        label.to_string()
    }

    /// Maps optimistic-concurrency rejections (HTTP 409) to their own variants
    /// so callers can restart from a fresh read.
    pub fn from_kube(e: kube::Error) -> Self {
        match e {
            kube::Error::Api(ref ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Error::AlreadyExists(ae.message.clone())
            }
            kube::Error::Api(ref ae) if ae.code == 409 => Error::Conflict(ae.message.clone()),
            e => Error::KubeError(e),
        }
    }

    /// The stored object changed since it was read.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_) | Error::AlreadyExists(_))
    }

    /// Retrying without a change to the instance cannot succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Error::Encoding { .. } | Error::Selector(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod block;
pub mod context;
pub mod crsm;
pub mod document;
pub mod encoder;
pub mod predicates;
pub use context::get_client_name;
