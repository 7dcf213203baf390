use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum BuildError {
    #[error("failed to load config from {path}")]
    ConfigLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config from {path}: {message}")]
    #[diagnostic(help("the config is JSON with optional // and /* */ comments"))]
    ConfigParse { path: String, message: String },

    #[error("validation error: {message}")]
    Validation { message: String },

    #[error("{context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{name}' already exists in '{parent}'")]
    #[diagnostic(help("every name within a directory must be unique"))]
    DuplicateName { name: String, parent: String },

    #[error("'{path}' is too large: {size} bytes of data, maximum is {max}")]
    PayloadTooLarge { path: String, size: usize, max: usize },

    #[error("object '{path}' does not fit its size class: {size} bytes, maximum is {max}")]
    ObjectTooLarge { path: String, size: usize, max: usize },

    #[error("failed to minify '{path}': {message}")]
    #[diagnostic(help("files named *.json or *.jsonc must contain valid JSON; pass -n to disable minification"))]
    Minify { path: String, message: String },
}
