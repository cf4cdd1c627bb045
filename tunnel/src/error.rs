//! Error types and result definitions for tunnel operations.
//!
//! [`TunnelError`] carries a granular [`ErrorKind`], a static description, optional dynamic
//! detail, an optional source error and the callsite where it was raised. Several errors can be
//! aggregated into one, which is how multi-block failures are reported.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for tunnel operations using [`TunnelError`] as the error type.
pub type TunnelResult<T> = Result<T, TunnelError>;

/// Detailed payload stored for single [`TunnelError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for tunnel operations.
#[derive(Debug, Clone)]
pub struct TunnelError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    Single(ErrorPayload),
    /// Multiple aggregated errors, for example one per failed block.
    Many {
        errors: Vec<TunnelError>,
        location: &'static Location<'static>,
    },
}

/// Specific kinds of errors that can occur while talking to the table service.
///
/// Every kind belongs to one [`ErrorCategory`], which is what callers usually branch on.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Transport faults
    ServiceRequestFailed,
    ServiceConnectionFailed,
    ServiceIoError,

    // Local protocol misuse
    WriterClosed,
    DuplicateCommit,
    StalePaginationMarker,
    ListingExhausted,
    SplitOrderViolated,
    ConflictingCommitMessages,
    InvalidState,

    // Remote session failures
    SessionFailed,

    // Poll loop interruption
    Interrupted,

    // Data & configuration
    ValidationError,
    ConfigError,
    SerializationError,
    DeserializationError,
    InvalidData,
    IoError,

    Unknown,

    // Used by fault-injection tests.
    #[cfg(feature = "failpoints")]
    InjectedFault,
}

/// Coarse classification of an [`ErrorKind`].
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
pub enum ErrorCategory {
    /// The remote service answered with a non-success status or could not be reached.
    TransportFault,
    /// The caller misused the protocol; detected locally without a round trip.
    ProtocolViolation,
    /// The remote session or task reported a terminal failure.
    SessionFailed,
    /// A poll wait was interrupted by a shutdown signal.
    Interrupted,
    /// Everything else: validation, configuration and data errors.
    Other,
}

impl ErrorKind {
    /// Returns the [`ErrorCategory`] this kind belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            ErrorKind::ServiceRequestFailed
            | ErrorKind::ServiceConnectionFailed
            | ErrorKind::ServiceIoError => ErrorCategory::TransportFault,
            ErrorKind::WriterClosed
            | ErrorKind::DuplicateCommit
            | ErrorKind::StalePaginationMarker
            | ErrorKind::ListingExhausted
            | ErrorKind::SplitOrderViolated
            | ErrorKind::ConflictingCommitMessages
            | ErrorKind::InvalidState => ErrorCategory::ProtocolViolation,
            ErrorKind::SessionFailed => ErrorCategory::SessionFailed,
            ErrorKind::Interrupted => ErrorCategory::Interrupted,
            #[cfg(feature = "failpoints")]
            ErrorKind::InjectedFault => ErrorCategory::TransportFault,
            _ => ErrorCategory::Other,
        }
    }
}

impl TunnelError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the list is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the category of [`TunnelError::kind`].
    pub fn category(&self) -> ErrorCategory {
        self.kind().category()
    }

    /// Returns the static description of a single error.
    pub fn description(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.description.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the detailed error information if available.
    ///
    /// For aggregated errors, returns the detail of the first error that has one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        TunnelError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for TunnelError {
    fn eq(&self, other: &TunnelError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(a, b)| a == b)
            }
            _ => false,
        }
    }
}

impl Hash for TunnelError {
    /// Hashes only the kind and static description so repeated occurrences group together.
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(&self.repr).hash(state);
        match &self.repr {
            ErrorRepr::Single(payload) => {
                payload.kind.hash(state);
                payload.description.hash(state);
            }
            ErrorRepr::Many { errors, .. } => {
                errors.len().hash(state);
                for error in errors {
                    error.hash(state);
                }
            }
        }
    }
}

impl fmt::Display for TunnelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                write_detail(payload.detail.as_deref(), f)?;
                write_backtrace(payload.backtrace.as_ref(), f)
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if errors.is_empty() {
                    return write!(f, "\n  (no inner errors provided)");
                }

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for TunnelError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

fn write_backtrace(backtrace: &Backtrace, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let rendered = backtrace.to_string();
    if rendered.trim().is_empty() {
        return Ok(());
    }

    write!(f, "\n  Backtrace:")?;
    for line in rendered.lines() {
        if line.trim().is_empty() {
            write!(f, "\n    ")?;
        } else {
            write!(f, "\n    {line}")?;
        }
    }

    Ok(())
}

fn write_detail(detail: Option<&str>, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let Some(detail) = detail else {
        return Ok(());
    };

    if detail.trim().is_empty() {
        return write!(f, "\n  Detail: <empty>");
    }

    write!(f, "\n  Detail:")?;
    for line in detail.lines() {
        write!(f, "\n    {line}")?;
    }

    Ok(())
}

/// Creates a [`TunnelError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for TunnelError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> TunnelError {
        TunnelError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`TunnelError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for TunnelError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> TunnelError {
        TunnelError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors.
///
/// A vector with exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for TunnelError
where
    E: Into<TunnelError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> TunnelError {
        let location = Location::caller();
        let mut errors: Vec<TunnelError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1 {
            if let Some(error) = errors.pop() {
                return error;
            }
        }

        TunnelError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

impl From<std::io::Error> for TunnelError {
    #[track_caller]
    fn from(err: std::io::Error) -> TunnelError {
        let detail = err.to_string();
        TunnelError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps serialization failures to [`ErrorKind::SerializationError`] and malformed payloads to
/// [`ErrorKind::DeserializationError`].
impl From<serde_json::Error> for TunnelError {
    #[track_caller]
    fn from(err: serde_json::Error) -> TunnelError {
        let (kind, description) = match err.classify() {
            serde_json::error::Category::Io => {
                (ErrorKind::SerializationError, "JSON serialization failed")
            }
            serde_json::error::Category::Syntax
            | serde_json::error::Category::Data
            | serde_json::error::Category::Eof => (
                ErrorKind::DeserializationError,
                "JSON deserialization failed",
            ),
        };

        let detail = err.to_string();
        TunnelError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Maps HTTP client failures onto the transport fault kinds.
impl From<reqwest::Error> for TunnelError {
    #[track_caller]
    fn from(err: reqwest::Error) -> TunnelError {
        let (kind, description) = if err.is_connect() || err.is_timeout() {
            (
                ErrorKind::ServiceConnectionFailed,
                "Could not reach the table service",
            )
        } else if err.is_body() || err.is_decode() {
            (
                ErrorKind::ServiceIoError,
                "Reading or writing a service body failed",
            )
        } else if err.is_builder() {
            (ErrorKind::ConfigError, "Invalid service request")
        } else {
            (ErrorKind::ServiceRequestFailed, "Service request failed")
        };

        let detail = err.to_string();
        TunnelError::from_components(
            kind,
            Cow::Borrowed(description),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<std::string::FromUtf8Error> for TunnelError {
    #[track_caller]
    fn from(err: std::string::FromUtf8Error) -> TunnelError {
        let detail = err.to_string();
        TunnelError::from_components(
            ErrorKind::InvalidData,
            Cow::Borrowed("UTF-8 string conversion failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

impl From<tunnel_config::shared::ValidationError> for TunnelError {
    #[track_caller]
    fn from(err: tunnel_config::shared::ValidationError) -> TunnelError {
        let detail = err.to_string();
        TunnelError::from_components(
            ErrorKind::ValidationError,
            Cow::Borrowed("Invalid configuration"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}
