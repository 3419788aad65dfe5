use crate::builder::BuildError;
use crate::program::MalformedAnnotation;
use crate::reg_encoder::EncodeError;
use crate::regalloc::AllocError;
use std::fmt;

/// Why a function was deliberately left alone
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum SkipReason {
    /// Name matches an exclusion pattern
    Excluded,

    /// Function has exception handlers, and those are configured to be skipped
    HasHandlers,

    /// Frame is already larger than the limit
    FrameTooLarge { size: usize, limit: usize },

    /// Function is not written against the accumulator
    NotAccumulatorBased,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Excluded => f.write_str("excluded by name"),
            SkipReason::HasHandlers => f.write_str("has exception handlers"),
            SkipReason::FrameTooLarge { size, limit } => {
                write!(f, "frame of {} registers exceeds {}", size, limit)
            }
            SkipReason::NotAccumulatorBased => f.write_str("not accumulator based"),
        }
    }
}

#[derive(Debug)]
pub enum OptimizeError {
    Skipped(SkipReason),
    Build(BuildError),
    RegAlloc(AllocError),
    Encode(EncodeError),

    /// Type annotation of the function cannot be decoded
    TypeInfo(MalformedAnnotation),

    /// Exclusion pattern is not a valid regular expression
    InvalidPattern(regex::Error),
}

impl OptimizeError {
    pub fn is_skip(&self) -> bool {
        matches!(self, OptimizeError::Skipped(_))
    }
}

impl fmt::Display for OptimizeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizeError::Skipped(reason) => write!(f, "skipped: {}", reason),
            OptimizeError::Build(err) => write!(f, "cannot build graph: {}", err),
            OptimizeError::RegAlloc(err) => write!(f, "register allocation failed: {}", err),
            OptimizeError::Encode(err) => write!(f, "register encoding failed: {}", err),
            OptimizeError::TypeInfo(err) => write!(f, "{}", err),
            OptimizeError::InvalidPattern(err) => write!(f, "invalid exclusion pattern: {}", err),
        }
    }
}

impl From<SkipReason> for OptimizeError {
    fn from(reason: SkipReason) -> OptimizeError {
        OptimizeError::Skipped(reason)
    }
}

impl From<BuildError> for OptimizeError {
    fn from(err: BuildError) -> OptimizeError {
        OptimizeError::Build(err)
    }
}

impl From<AllocError> for OptimizeError {
    fn from(err: AllocError) -> OptimizeError {
        OptimizeError::RegAlloc(err)
    }
}

impl From<EncodeError> for OptimizeError {
    fn from(err: EncodeError) -> OptimizeError {
        OptimizeError::Encode(err)
    }
}

impl From<MalformedAnnotation> for OptimizeError {
    fn from(err: MalformedAnnotation) -> OptimizeError {
        OptimizeError::TypeInfo(err)
    }
}

impl From<regex::Error> for OptimizeError {
    fn from(err: regex::Error) -> OptimizeError {
        OptimizeError::InvalidPattern(err)
    }
}
