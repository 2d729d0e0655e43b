use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ModemError {
    #[error("codeword too long: {msg_len} message + {ecc_len} parity bytes")]
    CodewordOverflow { msg_len: usize, ecc_len: usize },

    #[error("Reed-Solomon decode failure")]
    DecodeFailed,

    #[error("too many errors for {0} parity bytes")]
    TooManyErrors(usize),

    #[error("no alignment offset produced a valid decode")]
    AllOffsetsFailed,

    #[error("invalid input size")]
    InvalidInputSize,

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, ModemError>;
