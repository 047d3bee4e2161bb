use std::{error::Error, fmt, io};

/// The result type used in the entire crate.
pub type Result<T> = std::result::Result<T, EngineErr>;

/// The crate's error type.
#[derive(Debug)]
pub enum EngineErr {
    Io(io::Error),
    Json(serde_json::Error),
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyData,
    InvalidFilter {
        filter: &'static str,
        value: usize,
    },
    MaxEpochsBelowStart {
        max_epochs: usize,
        epoch: usize,
    },
    EpochLengthMismatch {
        got: usize,
        expected: usize,
    },
    InvalidStateDict(&'static str),
    UnknownHandler(usize),
    InvalidDevice(String),
    XlaUnsupported,
    InvalidOptLevel(String),
    InvalidTargets(&'static str),
    MetricNotComputable {
        metric: &'static str,
        reason: &'static str,
    },
    Custom(String),
}

impl EngineErr {
    /// Builds an error out of any message, used by user supplied process functions and handlers.
    pub fn custom<S: Into<String>>(msg: S) -> Self {
        Self::Custom(msg.into())
    }
}

impl fmt::Display for EngineErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineErr::Io(e) => write!(f, "io error: {e}"),
            EngineErr::Json(e) => write!(f, "json error: {e}"),
            EngineErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(
                f,
                "There's a size mismatch in {what}, got {got} and expected {expected}"
            ),
            EngineErr::EmptyData => write!(f, "Input data has zero size"),
            EngineErr::InvalidFilter { filter, value } => write!(
                f,
                "Argument {filter} should be a positive integer, got {value}"
            ),
            EngineErr::MaxEpochsBelowStart { max_epochs, epoch } => write!(
                f,
                "Argument max_epochs should be larger than the start epoch defined in the state: {max_epochs} vs {epoch}"
            ),
            EngineErr::EpochLengthMismatch { got, expected } => write!(
                f,
                "Argument epoch_length should be same as in the state, given {got} vs {expected}"
            ),
            EngineErr::InvalidStateDict(reason) => write!(f, "invalid state dict: {reason}"),
            EngineErr::UnknownHandler(id) => {
                write!(f, "no event handler is registered with id {id}")
            }
            EngineErr::InvalidDevice(device) => write!(f, "unknown device specification '{device}'"),
            EngineErr::XlaUnsupported => {
                write!(f, "In order to run on TPU, XLA support must be available")
            }
            EngineErr::InvalidOptLevel(level) => write!(
                f,
                "unknown opt level '{level}', accepted values are O0, O1, O2 and O3"
            ),
            EngineErr::InvalidTargets(reason) => write!(f, "invalid targets: {reason}"),
            EngineErr::MetricNotComputable { metric, reason } => {
                write!(f, "{metric} can not be computed: {reason}")
            }
            EngineErr::Custom(msg) => write!(f, "{msg}"),
        }
    }
}

impl Error for EngineErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            EngineErr::Io(e) => Some(e),
            EngineErr::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for EngineErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for EngineErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Json(value)
    }
}
