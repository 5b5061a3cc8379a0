/// Errors that can take the whole service down.
///
/// Only startup and shutdown produce these: binding the listener,
/// building the telemetry pipeline. A failure fetching an individual key
/// never becomes an `ApplicationError`; it rides inside that key's
/// `FetchResult` status so the rest of the batch still serves.
pub enum ApplicationError {
    Io(std::io::Error),
    Otlp(opentelemetry_otlp::ExporterBuildError),
    Internal(String),
}

impl std::error::Error for ApplicationError {}

impl std::fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(io_error) => write!(f, "I/O failure during startup or shutdown: {io_error}"),
            Self::Otlp(otlp_error) => write!(f, "could not build OTLP exporter: {otlp_error}"),
            Self::Internal(message) => write!(f, "{message}"),
        }
    }
}

impl std::fmt::Debug for ApplicationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self, f)
    }
}

impl From<std::io::Error> for ApplicationError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<opentelemetry_otlp::ExporterBuildError> for ApplicationError {
    fn from(value: opentelemetry_otlp::ExporterBuildError) -> Self {
        Self::Otlp(value)
    }
}
