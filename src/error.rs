use std::error::Error as StdError;
use std::fmt;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Everything that can go wrong while creating, uploading, listing or
/// committing diamonds and splits.
#[derive(Debug)]
pub enum Error {
    /// The object does not exist (yet) on the metadata store.
    NotFound { path: String },
    /// A no-overwrite write hit an existing object.
    AlreadyExists { path: String },
    RepoNotFound { repo: String },
    DiamondNotFound { repo: String, diamond_id: String },
    /// The split was expected to exist already (replayed split id).
    SplitMustExist { diamond_id: String, split_id: String },
    SplitAlreadyDone { diamond_id: String, split_id: String },
    /// Cancel or commit attempted on a diamond in a terminal state.
    DiamondTerminated { diamond_id: String, state: String },
    /// The diamond does not accept new splits or commits.
    DiamondNotReady { diamond_id: String, state: String },
    /// Two splits disagree on the content of a file and the diamond forbids conflicts.
    ForbiddenConflict { entry: String },
    NoSplitToCommit { diamond_id: String },
    BundleIdExists { bundle_id: String },
    /// Background processing was interrupted by an early exit of the consumer.
    Interrupted,
    InvalidDescriptor(String),
    InvalidPath(String),
    InvalidId(String),
    Clock(String),
    Store(object_store::Error),
    Codec(serde_yaml::Error),
    Io(std::io::Error),
    Task(tokio::task::JoinError),
}

impl Error {
    /// Missing objects are skipped by listings but fatal everywhere else.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. } | Self::Store(object_store::Error::NotFound { .. })
        )
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(
            self,
            Self::AlreadyExists { .. } | Self::Store(object_store::Error::AlreadyExists { .. })
        )
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { path } => write!(f, "not found: {path}"),
            Self::AlreadyExists { path } => write!(f, "object already exists: {path}"),
            Self::RepoNotFound { repo } => write!(f, "repo {repo} does not exist"),
            Self::DiamondNotFound { repo, diamond_id } => {
                write!(f, "diamond {diamond_id} doesn't exist for repo {repo}")
            }
            Self::SplitMustExist {
                diamond_id,
                split_id,
            } => write!(
                f,
                "split {split_id} must already exist in diamond {diamond_id}"
            ),
            Self::SplitAlreadyDone {
                diamond_id,
                split_id,
            } => write!(
                f,
                "split {split_id} in diamond {diamond_id} is already done"
            ),
            Self::DiamondTerminated { diamond_id, state } => write!(
                f,
                "diamond {diamond_id} is already terminated (state: {state})"
            ),
            Self::DiamondNotReady { diamond_id, state } => {
                write!(f, "diamond {diamond_id} is not ready (state: {state})")
            }
            Self::ForbiddenConflict { entry } => {
                write!(f, "commit given up: forbidden conflict on {entry}")
            }
            Self::NoSplitToCommit { diamond_id } => {
                write!(f, "no split to commit in diamond {diamond_id}")
            }
            Self::BundleIdExists { bundle_id } => {
                write!(f, "bundle {bundle_id} already exists")
            }
            Self::Interrupted => write!(f, "background processing interrupted"),
            Self::InvalidDescriptor(e) => write!(f, "invalid descriptor: {e}"),
            Self::InvalidPath(e) => write!(f, "invalid metadata path: {e}"),
            Self::InvalidId(e) => write!(f, "invalid id: {e}"),
            Self::Clock(e) => write!(f, "system time unavailable: {e}"),
            Self::Store(e) => write!(f, "object store error: {e}"),
            Self::Codec(e) => write!(f, "yaml codec error: {e}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Task(e) => write!(f, "background task failed: {e}"),
        }
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Codec(e) => Some(e),
            Self::Io(e) => Some(e),
            Self::Task(e) => Some(e),
            _ => None,
        }
    }
}

impl From<object_store::Error> for Error {
    fn from(err: object_store::Error) -> Self {
        match err {
            object_store::Error::NotFound { path, .. } => Self::NotFound { path },
            object_store::Error::AlreadyExists { path, .. } => Self::AlreadyExists { path },
            err => Self::Store(err),
        }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Codec(err)
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Task(err)
    }
}
