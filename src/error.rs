use std::error::Error;
use std::fmt;

/// Crate error type for spatial type, element and dialect operations.
#[derive(Debug)]
pub enum SpatialError {
    /// Wraps errors returned by `rusqlite`.
    Sql(rusqlite::Error),
    /// Wraps errors returned by the `wkb` crate.
    Wkb(wkb::error::WkbError),
    /// Wraps errors returned while decoding hex payloads.
    InvalidHex(hex::FromHexError),
    /// Wraps errors returned while parsing an engine URL.
    InvalidUrl(url::ParseError),
    /// A geometry type name is not one of the supported names.
    InvalidGeometryType(String),
    /// The dimension does not agree with the geometry type (or is out of range).
    InvalidDimension {
        geometry_type: Option<String>,
        dimension: u8,
    },
    /// Type options that cannot be combined.
    Configuration(String),
    /// A plugin parameter in the engine URL has an invalid value.
    InvalidPluginArgument { name: String, value: String },
    /// The URL scheme or name does not designate a supported backend.
    UnknownBackend(String),
    /// A bound value conflicts with the column it is bound to.
    Argument(String),
    /// A payload could not be converted into a shape.
    ShapeConversion(String),
    /// The column kind cannot be stored in the backend.
    UnsupportedColumnType {
        column: String,
        declared_type: String,
    },
    /// A GeoPackage table can only carry one geometry column.
    MultipleGeometryColumns { table: String },
    /// Invalid GeoPackage geometry flags byte.
    InvalidGpkgGeometryFlags(u8),
    /// GeoPackage geometry blob is too short for the fixed header.
    InvalidGpkgGeometryLength { len: usize, minimum: usize },
    /// GeoPackage geometry blob is too short for the declared envelope payload.
    InvalidGpkgGeometryEnvelope { len: usize, required: usize },
    /// A connection could not be prepared for spatial use.
    ConnectionSetup(String),
    /// A setup step was already performed on this connection.
    AlreadyInitialized(String),
}

impl SpatialError {
    /// Whether this error only says that a setup step already happened.
    pub fn is_already_initialized(&self) -> bool {
        match self {
            Self::AlreadyInitialized(_) => true,
            Self::Sql(rusqlite::Error::SqliteFailure(_, Some(message))) => {
                is_already_initialized_message(message)
            }
            _ => false,
        }
    }
}

pub(crate) fn is_already_initialized_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("already exists")
        || message.contains("already loaded")
        || message.contains("already initialized")
}

impl fmt::Display for SpatialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sql(err) => write!(f, "{err}"),
            Self::Wkb(err) => write!(f, "{err}"),
            Self::InvalidHex(err) => write!(f, "invalid hex payload: {err}"),
            Self::InvalidUrl(err) => write!(f, "invalid engine url: {err}"),
            Self::InvalidGeometryType(ty) => write!(f, "invalid geometry type: {ty}"),
            Self::InvalidDimension {
                geometry_type,
                dimension,
            } => match geometry_type {
                Some(ty) => write!(f, "invalid dimension {dimension} for geometry type {ty}"),
                None => write!(f, "invalid dimension {dimension}"),
            },
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::InvalidPluginArgument { name, value } => {
                write!(f, "invalid value for plugin argument '{name}': {value}")
            }
            Self::UnknownBackend(name) => write!(f, "unknown backend: {name}"),
            Self::Argument(msg) => write!(f, "{msg}"),
            Self::ShapeConversion(msg) => write!(f, "shape conversion failed: {msg}"),
            Self::UnsupportedColumnType {
                column,
                declared_type,
            } => write!(
                f,
                "unsupported column type for column '{column}': {declared_type}"
            ),
            Self::MultipleGeometryColumns { table } => write!(
                f,
                "only one geometry column is allowed for a table stored in a GeoPackage: {table}"
            ),
            Self::InvalidGpkgGeometryFlags(flags) => {
                write!(f, "invalid gpkg geometry flags: {flags:#04x}")
            }
            Self::InvalidGpkgGeometryLength { len, minimum } => {
                write!(
                    f,
                    "invalid gpkg geometry length: got {len} bytes, expected at least {minimum}"
                )
            }
            Self::InvalidGpkgGeometryEnvelope { len, required } => {
                write!(
                    f,
                    "invalid gpkg geometry envelope length: got {len} bytes, required {required}"
                )
            }
            Self::ConnectionSetup(msg) => write!(f, "connection setup failed: {msg}"),
            Self::AlreadyInitialized(what) => write!(f, "already initialized: {what}"),
        }
    }
}

impl Error for SpatialError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sql(err) => Some(err),
            Self::Wkb(err) => Some(err),
            Self::InvalidHex(err) => Some(err),
            Self::InvalidUrl(err) => Some(err),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SpatialError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sql(err)
    }
}

impl From<wkb::error::WkbError> for SpatialError {
    fn from(err: wkb::error::WkbError) -> Self {
        Self::Wkb(err)
    }
}

impl From<hex::FromHexError> for SpatialError {
    fn from(err: hex::FromHexError) -> Self {
        Self::InvalidHex(err)
    }
}

impl From<url::ParseError> for SpatialError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err)
    }
}

pub type Result<T> = std::result::Result<T, SpatialError>;

#[cfg(test)]
mod tests {
    use super::SpatialError;
    use rusqlite::ffi;

    fn sqlite_failure(message: &str) -> SpatialError {
        SpatialError::Sql(rusqlite::Error::SqliteFailure(
            ffi::Error::new(ffi::SQLITE_ERROR),
            Some(message.to_string()),
        ))
    }

    #[test]
    fn repeat_setup_errors_are_classified() {
        assert!(SpatialError::AlreadyInitialized("spatialite".into()).is_already_initialized());
        assert!(sqlite_failure("table gpkg_contents already exists").is_already_initialized());
        assert!(!sqlite_failure("permission denied").is_already_initialized());
        assert!(!SpatialError::ConnectionSetup("boom".into()).is_already_initialized());
    }
}
