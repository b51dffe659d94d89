//! Crate-level error type and its fatal-error classification

use thiserror::Error;

use crate::aligner::AlignError;
use crate::dp::DpError;
use crate::filter::FilterError;
use crate::index::IndexError;
use crate::morass::MorassError;
use crate::pack::PackError;
use crate::writer::WriteError;

/// How a failure should be reported. Per-unit extension failures never
/// surface as errors, so there is no class for them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input or settings, detected before work starts.
    Config,
    /// Temporary storage or output I/O failed mid-run.
    Resource,
    /// A broken invariant such as a corrupt spill file.
    Internal,
}

#[derive(Debug, Error)]
pub enum PalsError {
    #[error(transparent)]
    Pack(#[from] PackError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Morass(#[from] MorassError),

    #[error(transparent)]
    Filter(#[from] FilterError),

    #[error(transparent)]
    Dp(#[from] DpError),

    #[error(transparent)]
    Align(#[from] AlignError),

    #[error(transparent)]
    Write(#[from] WriteError),
}

pub type PalsResult<T> = Result<T, PalsError>;

impl ErrorKind {
    /// Classify an error from any of this crate's modules, or `None` for
    /// foreign errors.
    pub fn of(err: &(dyn std::error::Error + 'static)) -> Option<ErrorKind> {
        if let Some(e) = err.downcast_ref::<PalsError>() {
            Some(e.kind())
        } else if let Some(e) = err.downcast_ref::<AlignError>() {
            Some(align_kind(e))
        } else if let Some(e) = err.downcast_ref::<MorassError>() {
            Some(morass_kind(e))
        } else if let Some(e) = err.downcast_ref::<FilterError>() {
            Some(filter_kind(e))
        } else if let Some(e) = err.downcast_ref::<PackError>() {
            Some(pack_kind(e))
        } else if let Some(e) = err.downcast_ref::<WriteError>() {
            Some(write_kind(e))
        } else if err.is::<IndexError>() || err.is::<DpError>() {
            Some(ErrorKind::Config)
        } else {
            None
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ErrorKind::Config => "configuration error",
            ErrorKind::Resource => "resource error",
            ErrorKind::Internal => "internal error",
        }
    }
}

fn pack_kind(e: &PackError) -> ErrorKind {
    match e {
        PackError::Io(_) => ErrorKind::Resource,
        _ => ErrorKind::Config,
    }
}

fn write_kind(e: &WriteError) -> ErrorKind {
    match e {
        WriteError::Format(_) => ErrorKind::Config,
        WriteError::Io(_) => ErrorKind::Resource,
    }
}

fn morass_kind(e: &MorassError) -> ErrorKind {
    match e {
        MorassError::Io(_) | MorassError::Flush(_) => ErrorKind::Resource,
        MorassError::Config(_) => ErrorKind::Config,
        MorassError::Corrupt { .. } | MorassError::Finalised => ErrorKind::Internal,
    }
}

fn filter_kind(e: &FilterError) -> ErrorKind {
    match e {
        FilterError::InvalidParams(_) => ErrorKind::Config,
        FilterError::Unsorted { .. } => ErrorKind::Internal,
    }
}

fn align_kind(e: &AlignError) -> ErrorKind {
    match e {
        AlignError::EmptySequence(_) | AlignError::Config(_) | AlignError::Memory { .. } => ErrorKind::Config,
        AlignError::Index(_) | AlignError::Dp(_) => ErrorKind::Config,
        AlignError::Pool(_) | AlignError::Write(_) => ErrorKind::Resource,
        AlignError::NotOptimised | AlignError::NoIndex | AlignError::Poisoned => ErrorKind::Internal,
        AlignError::Morass(e) => morass_kind(e),
        AlignError::Filter(e) => filter_kind(e),
    }
}

impl PalsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PalsError::Pack(e) => pack_kind(e),
            PalsError::Index(_) | PalsError::Dp(_) => ErrorKind::Config,
            PalsError::Morass(e) => morass_kind(e),
            PalsError::Filter(e) => filter_kind(e),
            PalsError::Align(e) => align_kind(e),
            PalsError::Write(e) => write_kind(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        let corrupt = MorassError::Corrupt {
            path: "run.morass".to_string(),
            message: "truncated".to_string(),
        };
        assert_eq!(PalsError::from(corrupt).kind(), ErrorKind::Internal);

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        let nested = AlignError::Morass(MorassError::Io(io));
        assert_eq!(PalsError::from(nested).kind(), ErrorKind::Resource);

        assert_eq!(PalsError::from(IndexError::WordSize(40)).kind(), ErrorKind::Config);
        assert_eq!(
            PalsError::from(AlignError::EmptySequence("query")).kind(),
            ErrorKind::Config
        );
    }

    #[test]
    fn test_classify_boxed_errors() {
        let boxed: Box<dyn std::error::Error> = Box::new(AlignError::EmptySequence("target"));
        assert_eq!(ErrorKind::of(boxed.as_ref()), Some(ErrorKind::Config));

        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
        assert_eq!(ErrorKind::of(&MorassError::Io(io)), Some(ErrorKind::Resource));

        let foreign = std::fmt::Error;
        assert_eq!(ErrorKind::of(&foreign), None);
        assert_eq!(ErrorKind::Internal.label(), "internal error");
    }

    #[test]
    fn test_messages_pass_through() {
        let err = PalsError::from(AlignError::EmptySequence("target"));
        assert_eq!(err.to_string(), "target sequence is zero length");
    }
}
