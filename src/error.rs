use thiserror::Error;

use crate::domain::id::InstanceId;
use crate::domain::instance::InstanceState;

/// Configuration-related errors with structured variants.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },

    #[error("failed to read config file: {0}")]
    ReadFile(#[source] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[source] toml::de::Error),
}

/// A failure reported by the cloud control plane.
///
/// The provider decides whether a failure is transient (throttling, rate
/// limits, propagation delay) or permanent. Callers may additionally treat a
/// permanent "not found" as transient while racing a freshly created resource.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CloudError {
    #[error("transient cloud error {code}: {message}")]
    Transient { code: String, message: String },

    #[error("cloud error {code}: {message}")]
    Permanent { code: String, message: String },
}

impl CloudError {
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    /// The provider's error code, e.g. `InvalidInstanceID.NotFound`.
    #[must_use]
    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => code,
        }
    }

    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::Transient { message, .. } | Self::Permanent { message, .. } => message,
        }
    }

    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Whether the code names a resource that could not be found.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.code().ends_with(".NotFound")
    }
}

/// Errors raised by the cluster coordination protocol.
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error("no instance performing role '{role}'")]
    NoSuchLeader { role: String },

    #[error("{count} instances perform role '{role}', an ordinal is required")]
    AmbiguousLeader { role: String, count: usize },

    #[error("no instance with ordinal {ordinal} performing role '{role}'")]
    NoSuchOrdinal { role: String, ordinal: i64 },

    #[error("no instance {instance_id} performing role '{role}'")]
    NoSuchInstance {
        role: String,
        instance_id: InstanceId,
    },

    #[error("leader {role} was bound, not created, and cannot clone workers")]
    LeaderNotPrepared { role: String },

    #[error("node performing role '{role}' is not bound to an instance")]
    Unbound { role: String },

    #[error("node performing role '{role}' is already bound to {instance_id}")]
    AlreadyBound {
        role: String,
        instance_id: InstanceId,
    },

    #[error("worker role '{role}' requires a leader instance ID")]
    MissingLeaderBinding { role: String },

    #[error("expected instance {instance_id} to be {expected} but it is {actual}")]
    UnexpectedState {
        instance_id: InstanceId,
        expected: InstanceState,
        actual: InstanceState,
    },

    #[error("instance {instance_id} not ready after {waited_ms}ms")]
    ReadinessTimeout {
        instance_id: InstanceId,
        waited_ms: u128,
    },

    #[error("requested {requested} instances but {created} were created")]
    CreationShortfall { requested: usize, created: usize },

    #[error("operation failed on node {node}: {source}")]
    PartialBatchFailure {
        node: InstanceId,
        #[source]
        source: Box<Error>,
    },
}

/// Package substitution errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PackageError {
    #[error("invalid package name: {0}")]
    InvalidPackageName(String),
}

/// Failures of a bulk execution through the concurrency pool.
#[derive(Error, Debug)]
pub enum PoolError {
    #[error("task {index} of {total} failed: {source}")]
    TaskFailed {
        index: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("task {index} of {total} panicked: {message}")]
    TaskPanicked {
        index: usize,
        total: usize,
        message: String,
    },

    #[error("batch stopped before completion: {message}")]
    BatchAborted { message: String },
}

impl PoolError {
    /// Position of the failing item in the submitted batch.
    #[must_use]
    pub const fn index(&self) -> Option<usize> {
        match self {
            Self::TaskFailed { index, .. } | Self::TaskPanicked { index, .. } => Some(*index),
            Self::BatchAborted { .. } => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Cloud(#[from] CloudError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error(transparent)]
    Package(#[from] PackageError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
