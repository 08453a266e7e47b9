use std::path::PathBuf;

use thiserror::Error;

use crate::machine::BoardState;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a failure, used by the host to decide whether
/// the process can carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Construction,
    Realization,
    Boot,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("board '{0}' is already registered")]
    DuplicateBoard(String),

    #[error("no board named '{0}' (try -M help)")]
    UnknownBoard(String),

    #[error("invalid board descriptor '{board}': {detail}")]
    InvalidDescriptor { board: String, detail: String },

    #[error("invalid CPU type name '{0}'")]
    InvalidCpuType(String),

    #[error("CPU type '{cpu_type}' is not supported by board '{board}'")]
    UnsupportedCpuType { board: String, cpu_type: String },

    #[error("board '{board}' supports {min} to {max} CPU(s), {requested} requested")]
    InvalidCpuCount { board: String, requested: u32, min: u32, max: u32 },

    #[error("board '{board}' has no {feature}")]
    UnsupportedFeature { board: String, feature: &'static str },

    #[error("property '{0}' cannot be changed after realization")]
    AlreadyRealized(&'static str),

    #[error("{0} requires a realized core")]
    NotRealized(&'static str),

    #[error("board step requires state {expected:?}, board is {found:?}")]
    OutOfOrder { expected: BoardState, found: BoardState },

    #[error("region '{name}' at 0x{base:08X} overlaps an existing region")]
    RegionOverlap { name: String, base: usize },

    #[error("could not allocate {size} bytes for region '{name}'")]
    Construction { name: String, size: usize },

    #[error("{component}: {detail}")]
    Realization { component: &'static str, detail: String },

    #[error("guest image must be specified (use --kernel)")]
    NoImage,

    #[error("couldn't read {}: {source}", path.display())]
    ImageUnreadable { path: PathBuf, source: std::io::Error },

    #[error("malformed HEX image {}: {detail}", path.display())]
    ImageMalformed { path: PathBuf, detail: String },

    #[error("image {} is {size} bytes, limit is {limit}", path.display())]
    ImageTooLarge { path: PathBuf, size: usize, limit: usize },

    #[error("image {} writes 0x{address:08X}, outside 0x{base:08X}..0x{end:08X}", path.display())]
    ImageOutOfRange { path: PathBuf, address: usize, base: usize, end: usize },

    #[error("access to unmapped address 0x{0:08X}")]
    Unmapped(usize),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateBoard(_)
            | Error::UnknownBoard(_)
            | Error::InvalidDescriptor { .. }
            | Error::InvalidCpuType(_)
            | Error::UnsupportedCpuType { .. }
            | Error::InvalidCpuCount { .. }
            | Error::UnsupportedFeature { .. }
            | Error::AlreadyRealized(_)
            | Error::NotRealized(_)
            | Error::OutOfOrder { .. }
            | Error::RegionOverlap { .. } => ErrorKind::Configuration,
            Error::Construction { .. } => ErrorKind::Construction,
            Error::Realization { .. } => ErrorKind::Realization,
            Error::NoImage
            | Error::ImageUnreadable { .. }
            | Error::ImageMalformed { .. }
            | Error::ImageTooLarge { .. }
            | Error::ImageOutOfRange { .. }
            | Error::Unmapped(_) => ErrorKind::Boot,
        }
    }

    /// Construction and realization failures leave no usable board behind.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::Construction | ErrorKind::Realization)
    }
}
