use crate::pe_resources::ResourceError;
use crate::registry::RegistryError;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// "Not found" outcomes are never errors in this crate, they are returned as `Ok(None)`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The input (a message filename or a message template) is structurally invalid.
    MalformedInput,
    /// A located file or a registry source could not be read or parsed.
    ResourceFailure,
    /// Rendering was aborted or the output sink failed.
    Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("malformed message filename `{filename}`: {message}")]
    MalformedPath {
        filename: String,
        message: &'static str,
    },

    #[error("unsupported conversion specifier `{specifier}` at offset {offset}")]
    UnsupportedConversionSpecifier { specifier: String, offset: usize },

    #[error("malformed conversion qualifier `{qualifier}` at offset {offset}")]
    MalformedQualifier { qualifier: String, offset: usize },

    #[error("failed to read resources of `{}`: {source}", path.display())]
    Resource {
        path: PathBuf,
        #[source]
        source: ResourceError,
    },

    #[error("an I/O error has occurred while accessing `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error("failed to render message 0x{message_identifier:08x} from `{filename}`: {source}")]
    FailedToRenderMessage {
        filename: String,
        message_identifier: u32,
        #[source]
        source: Box<Error>,
    },

    #[error(
        "failed to read event 0x{event_identifier:08x} of provider {provider_guid} from `{filename}`: {source}"
    )]
    FailedToReadEventDefinition {
        filename: String,
        provider_guid: String,
        event_identifier: u32,
        #[source]
        source: Box<Error>,
    },

    #[error("writing the rendered message failed")]
    Output,

    #[error("failed to write export output: {source}")]
    WriteOutput {
        #[source]
        source: io::Error,
    },

    #[error("operation aborted")]
    Aborted,
}

impl Error {
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::MalformedPath { .. }
            | Error::UnsupportedConversionSpecifier { .. }
            | Error::MalformedQualifier { .. } => ErrorCategory::MalformedInput,
            Error::Resource { .. } | Error::Io { .. } | Error::Registry(_) => {
                ErrorCategory::ResourceFailure
            }
            Error::FailedToRenderMessage { source, .. }
            | Error::FailedToReadEventDefinition { source, .. } => source.category(),
            Error::Output | Error::WriteOutput { .. } | Error::Aborted => ErrorCategory::Fatal,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

impl From<std::fmt::Error> for Error {
    fn from(_: std::fmt::Error) -> Self {
        Error::Output
    }
}
