use thiserror::Error;

#[derive(Debug, Error)]
pub enum GeoWrangleError {
    #[error("invalid EWKB: {0}")]
    InvalidEwkb(&'static str),

    #[error("geozero error: {0}")]
    Geozero(#[from] geozero::error::GeozeroError),

    #[error("geometry is not a {0}")]
    WrongType(&'static str),

    #[error("unsupported coordinate dimensions: {dimensions} (only XY is supported)")]
    UnsupportedDimensions { dimensions: &'static str },

    #[error("cannot decode {format} geometry: {reason}")]
    Decode { format: &'static str, reason: String },

    #[error("unsupported geometry encoding in column '{column}'")]
    UnsupportedFormat { column: String },

    #[error("column '{column}' mixes geometry encodings: row {row} is not {expected}")]
    HeterogeneousColumn {
        column: String,
        row: usize,
        expected: &'static str,
    },

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("unresolvable topology: {count} geometries are mutually contained")]
    UnresolvableTopology { count: usize },

    #[error("projection error: {0}")]
    Projection(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GeoWrangleError>;
