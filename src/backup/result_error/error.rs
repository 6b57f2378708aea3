use crate::backup::result_error::{WithDebugObjectAndFnName, WithMsg};
use crate::backup::selection::SelectionKind;
use itertools::Itertools;
use std::fmt::Debug;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ValidationError(#[from] validator::ValidationErrors),
    #[error(transparent)]
    SerdeYml(#[from] serde_yml::Error),
    #[error("cyclic dependency")]
    CyclicDependency,
    #[error("invalid {kind} \"{selector}\"")]
    InvalidSelection {
        kind: SelectionKind,
        selector: String,
    },
    #[error("nothing selected, aborting")]
    EmptySelection,
    #[error("location \"{location}\" has invalid cron {cron:?}: {reason}")]
    InvalidCronExpression {
        location: String,
        cron: String,
        reason: String,
    },
    #[error("location \"{location}\" has unknown backend \"{backend}\"")]
    UnknownBackend { location: String, backend: String },
    #[error("location \"{location}\" depends on unknown location \"{dependency}\"")]
    UnknownDependency {
        location: String,
        dependency: String,
    },
    #[error("location \"{location}\" copies from \"{backend}\" which it does not write to")]
    InvalidCopySource { location: String, backend: String },
    #[error("volume location \"{location}\" needs exactly one volume in `from`, got {count}")]
    InvalidVolumeSource { location: String, count: usize },
    #[error("restoring \"{location}\" needs a target path")]
    MissingRestoreTarget { location: String },
    #[error("{program} exited with code {code}:\n{}", indent::indent_all_with("  ", .stderr))]
    CommandFailed {
        program: String,
        code: i32,
        stderr: String,
    },
    #[error("skipping \"{location}\" because its dependency \"{dependency}\" did not complete")]
    DependencyFailed {
        location: String,
        dependency: String,
    },
    #[error("another instance is already running (lock held on {0:?})")]
    AlreadyRunning(std::path::PathBuf),
    #[error("{}:\n{}", msg, indent::indent_all_with("  ", error.to_string()))]
    WithMsg { msg: String, error: Box<Error> },
    #[error("{:?} {} failed:\n{}", obj_debug, fn_name, indent::indent_all_with("  ", error.to_string()))]
    WithDebugObjAndFnName {
        error: Box<Error>,
        obj_debug: Box<dyn Debug + Send>,
        fn_name: String,
    },
    #[error("{}", itertools::join(.0, "\n\n"))]
    LotsOfError(Vec<Error>),
}

impl<S: Into<String>, O: Debug + Send + 'static> WithDebugObjectAndFnName<S, O> for Error {
    fn with_debug_object_and_fn_name(self, obj: O, fn_name: S) -> Self {
        Error::WithDebugObjAndFnName {
            error: Box::new(self),
            obj_debug: Box::new(obj),
            fn_name: fn_name.into(),
        }
    }
}

impl<S: Into<String>> WithMsg<S> for Error {
    fn with_msg(self, msg: S) -> Self {
        Self::WithMsg {
            msg: msg.into(),
            error: Box::new(self),
        }
    }
}

impl From<Vec<Error>> for Error {
    fn from(errors: Vec<Error>) -> Self {
        if errors.is_empty() {
            panic!("Should not create lots of errors when error is empty")
        }
        Self::LotsOfError(errors.into_iter().flat_map(|e| e.into_iter()).collect_vec())
    }
}

impl Error {
    pub fn into_iter(self) -> Box<dyn Iterator<Item = Error>> {
        match self {
            Error::LotsOfError(v) => Box::new(v.into_iter().flat_map(|e| e.into_iter())),
            e => Box::new(std::iter::once(e)),
        }
    }

    pub fn chain(self, other: Error) -> Error {
        Error::LotsOfError(self.into_iter().chain(other.into_iter()).collect_vec())
    }

    /// Strips `WithMsg` and `WithDebugObjAndFnName` wrappers.
    pub fn root(&self) -> &Error {
        match self {
            Error::WithMsg { error, .. } | Error::WithDebugObjAndFnName { error, .. } => {
                error.root()
            }
            e => e,
        }
    }
}
