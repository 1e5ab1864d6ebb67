//! The command-level error surface: every failure carries a stable
//! machine-readable code and the name of the command that raised it.

use std::path::PathBuf;

use bstr::BString;

/// A command failure: the breadcrumb of the failing command plus the
/// underlying kind.
#[derive(Debug, thiserror::Error)]
#[error("{caller}: {source}")]
pub struct CommandError {
    /// The command that failed (e.g. `"checkout"`).
    pub caller: &'static str,
    #[source]
    pub source: ErrorKind,
}

impl CommandError {
    pub fn new(caller: &'static str, source: impl Into<ErrorKind>) -> Self {
        Self {
            caller,
            source: source.into(),
        }
    }

    /// The stable code for machine dispatch.
    pub fn code(&self) -> &'static str {
        self.source.code()
    }
}

/// The underlying failure kinds, mirroring the engine's error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum ErrorKind {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid ref name {name:?} (did you mean {suggestion:?}?)")]
    InvalidRefName { name: String, suggestion: String },

    #[error("remote {remote} has no fetch refspec configured")]
    NoRefspec { remote: String },

    #[error("invalid object id: {0}")]
    InvalidOid(String),

    #[error("ambiguous object id {value} ({count} candidates)")]
    AmbiguousOid { value: String, count: usize },

    #[error("unmerged paths: {0:?}")]
    UnmergedPaths(Vec<BString>),

    #[error("path escapes the working tree: {0}")]
    UnsafeFilepath(PathBuf),

    #[error("working tree changes would be overwritten: {0:?}")]
    CheckoutWouldClobber(Vec<BString>),

    #[error("nothing to commit")]
    EmptyCommit,

    #[error("repository has no working tree")]
    BareRepository,

    #[error("no {0} in progress")]
    NoOperationInProgress(&'static str),

    #[error(transparent)]
    Odb(#[from] gitport_odb::OdbError),

    #[error(transparent)]
    Ref(#[from] gitport_ref::RefError),

    #[error(transparent)]
    Object(#[from] gitport_object::ObjectError),

    #[error(transparent)]
    Index(#[from] gitport_index::IndexError),

    #[error(transparent)]
    Merge(#[from] gitport_merge::MergeError),

    #[error(transparent)]
    Pack(#[from] gitport_pack::PackError),

    #[error(transparent)]
    Config(#[from] gitport_config::ConfigError),

    #[error(transparent)]
    Protocol(#[from] gitport_protocol::ProtocolError),

    #[error(transparent)]
    Transport(#[from] gitport_transport::TransportError),

    #[error(transparent)]
    Loose(#[from] gitport_loose::LooseError),

    #[error(transparent)]
    Hash(#[from] gitport_hash::HashError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        use ErrorKind::*;
        match self {
            NotFound(_) => "NotFoundError",
            AlreadyExists(_) => "AlreadyExistsError",
            InvalidRefName { .. } => "InvalidRefNameError",
            NoRefspec { .. } => "NoRefspecError",
            InvalidOid(_) => "InvalidOidError",
            AmbiguousOid { .. } => "AmbiguousOidError",
            UnmergedPaths(_) => "UnmergedPathsError",
            UnsafeFilepath(_) => "UnsafeFilepathError",
            CheckoutWouldClobber(_) => "CheckoutConflictError",
            EmptyCommit => "EmptyCommitError",
            BareRepository => "BareRepositoryError",
            NoOperationInProgress(_) => "NoOperationError",
            Odb(gitport_odb::OdbError::NotFound(_))
            | Odb(gitport_odb::OdbError::PrefixNotFound(_)) => "NotFoundError",
            Odb(gitport_odb::OdbError::Ambiguous { .. }) => "AmbiguousOidError",
            Odb(_) => "CorruptError",
            Ref(gitport_ref::RefError::NotFound(_)) => "NotFoundError",
            Ref(gitport_ref::RefError::AlreadyExists(_)) => "AlreadyExistsError",
            Ref(gitport_ref::RefError::InvalidName { .. }) => "InvalidRefNameError",
            Ref(gitport_ref::RefError::SymrefDepthExceeded(_)) => "MaxDepthError",
            // A lost compare-and-set race means the caller's view of the
            // ref went stale between read and write.
            Ref(gitport_ref::RefError::CasFailed { .. }) => "IndexResetError",
            Ref(_) => "RefError",
            Object(_) => "ObjectParseError",
            Index(gitport_index::IndexError::UnmergedPaths { .. }) => "UnmergedPathsError",
            Index(_) => "IndexError",
            Merge(_) => "MergeError",
            Pack(_) => "CorruptError",
            Config(_) => "ConfigError",
            Protocol(gitport_protocol::ProtocolError::RemoteCapability { .. }) => {
                "RemoteCapabilityError"
            }
            Protocol(gitport_protocol::ProtocolError::PushRejected { .. }) => {
                "PushRejectedError"
            }
            Protocol(_) => "ProtocolError",
            Transport(gitport_transport::TransportError::SmartHttp { .. }) => "SmartHttpError",
            Transport(gitport_transport::TransportError::UnknownTransport(_)) => {
                "UnknownTransportError"
            }
            Transport(_) => "TransportError",
            Loose(_) => "CorruptError",
            Hash(_) => "InvalidOidError",
            Io(_) => "IoError",
        }
    }
}

/// Shorthand for mapping a lower-layer error into a command failure.
pub(crate) fn ctx<E: Into<ErrorKind>>(caller: &'static str) -> impl Fn(E) -> CommandError {
    move |e| CommandError::new(caller, e)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        let err = CommandError::new("tag", ErrorKind::AlreadyExists("refs/tags/v1".into()));
        assert_eq!(err.code(), "AlreadyExistsError");
        assert_eq!(err.caller, "tag");
        assert!(err.to_string().starts_with("tag: "));
    }

    #[test]
    fn nested_kinds_map_to_taxonomy_codes() {
        let err = CommandError::new(
            "push",
            gitport_protocol::ProtocolError::PushRejected {
                refname: "refs/heads/main".into(),
                reason: "non-fast-forward".into(),
            },
        );
        assert_eq!(err.code(), "PushRejectedError");

        let err = CommandError::new(
            "fetch",
            gitport_transport::TransportError::SmartHttp {
                preview: "<html>".into(),
                response: Vec::new(),
            },
        );
        assert_eq!(err.code(), "SmartHttpError");
    }
}
