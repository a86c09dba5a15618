//! Offline resolution of Windows Event Log message strings.
//!
//! Given the message filenames registered for an event source (or a manifest-based provider), a
//! message identifier and the substitution strings of a record, [`MessageHandle`] locates the
//! message resource files inside a mounted Windows image, reads their `RT_MESSAGETABLE`
//! resources (following `MUI` satellites where needed) and renders the message template.
//! Message identifiers of manifest-based providers are read from their `WEVT_TEMPLATE`
//! resource.

pub use cache::{CACHE_CAPACITY, RoundRobinCache};
pub use err::{Error, ErrorCategory, Result};
pub use export::{ExportSummary, MessageExporter};
pub use message_file::{MessageFile, PeResourceReader, ResourceContainer, ResourceReader};
pub use message_handle::{
    AbortFlag, DEFAULT_MUI_LANGUAGE, DEFAULT_PREFERRED_LANGUAGE, MessageHandle,
    MessageHandleSettings,
};
pub use message_table::{MessageTable, MessageTables};
pub use mui::MuiResource;
pub use path_resolver::{DEFAULT_SYSTEM_ROOT, EntryKind, PathResolver, ResolvedPath};
pub use pe_resources::{PeResourceContainer, ResourceError, ResourceIdentifier};
pub use record::{EventRecord, message_identifier};
pub use registry::{
    EventLogType, RegistryError, RegistryLookup, RegistryReader, RegistrySnapshot, RegistryValue,
};
pub use template::{MessageTemplate, RecordStrings, format_message};
pub use wevt_manifest::{EventDefinition, ManifestProvider, WevtManifest};

pub mod cache;
pub mod err;
pub mod export;
pub mod message_file;
pub mod message_handle;
pub mod message_table;
pub mod mui;
pub mod path_resolver;
pub mod pe_resources;
pub mod record;
pub mod registry;
pub mod template;
pub mod wevt_manifest;

mod utils;

// For tests, we only initialize logging once.
#[cfg(test)]
use std::sync::Once;

#[cfg(test)]
static LOGGER_INIT: Once = Once::new();

// Rust runs the tests concurrently, so unless we synchronize logging access
// it will crash when attempting to run `cargo test` with some logging facilities.
#[cfg(test)]
pub fn ensure_env_logger_initialized() {
    use std::io::Write;

    LOGGER_INIT.call_once(|| {
        let mut builder = env_logger::Builder::from_default_env();
        builder
            .format(|buf, record| writeln!(buf, "[{}] - {}", record.level(), record.args()))
            .init();
    });
}
