//! Error types shared by the fat16 flash filesystem crates.

#[derive(thiserror::Error, Debug, PartialEq, Eq, Clone, Copy)]
pub enum Error {
    #[error("no such file or directory")]
    NotFound,
    #[error("file or directory already exists")]
    AlreadyExists,
    #[error("not a directory")]
    NotADirectory,
    #[error("is a directory")]
    IsADirectory,
    #[error("directory not empty")]
    NotEmpty,
    #[error("no space left on device")]
    OutOfSpace,
    #[error("too many open files")]
    TooManyOpen,
    #[error("bad file descriptor")]
    BadDescriptor,
    #[error("name too long")]
    NameTooLong,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("I/O error")]
    Io,
    #[error("device or resource busy")]
    Busy,
}

pub type Result<T> = core::result::Result<T, Error>;
