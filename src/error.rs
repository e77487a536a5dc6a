// src/error.rs

//! Error types shared by the engine and the transport.

use thiserror::Error;

/// Coarse classification of a failed command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Wrong arity, malformed number, bad range or option syntax.
    Argument,
    /// The key holds a value of another type.
    TypeMismatch,
    /// The command requires a key that does not exist.
    NotFound,
}

/// A command was rejected. State is left untouched whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CommandError {
    #[error("ERR empty command")]
    EmptyCommand,
    #[error("ERR unknown command '{0}'")]
    UnknownCommand(String),
    #[error("ERR wrong number of arguments for '{0}' command")]
    WrongArity(String),
    #[error("ERR syntax error")]
    Syntax,
    #[error("ERR value is not an integer or out of range")]
    NotInteger,
    #[error("ERR value is not a valid float")]
    NotFloat,
    #[error("ERR value is out of range, must be positive")]
    NotPositive,
    #[error("ERR min or max is not a float")]
    InvalidScoreBound,
    #[error("ERR increment or decrement would overflow")]
    Overflow,
    #[error("ERR increment would produce NaN or Infinity")]
    NonFiniteResult,
    #[error("ERR resulting score is not a number (NaN)")]
    NanScore,
    #[error("ERR hash value is not an integer")]
    HashNotInteger,
    #[error("ERR string exceeds maximum allowed size")]
    StringTooLong,
    #[error("ERR value is out of range")]
    ValueOutOfRange,
    #[error("ERR offset is out of range")]
    OffsetOutOfRange,
    #[error("ERR invalid expire time in '{0}' command")]
    InvalidExpireTime(String),
    #[error("ERR XX and NX options at the same time are not compatible")]
    ConflictingConditions,
    #[error("ERR index out of range")]
    IndexOutOfRange,
    #[error("ERR no such key")]
    NoSuchKey,
    #[error("WRONGTYPE Operation against a key holding the wrong kind of value")]
    WrongType,
}

impl CommandError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CommandError::WrongType => ErrorKind::TypeMismatch,
            CommandError::NoSuchKey => ErrorKind::NotFound,
            _ => ErrorKind::Argument,
        }
    }
}

/// The presented credential was missing, empty or wrong. The three cases are
/// deliberately indistinguishable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Unauthorized")]
pub struct AuthError;

/// Everything `Engine::execute` can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Command(#[from] CommandError),
}
