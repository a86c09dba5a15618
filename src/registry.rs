//! Registry lookups of `%SystemRoot%` and message filenames.
//!
//! The binary hive format is out of scope; values are read through [`RegistryReader`]. The crate
//! ships [`RegistrySnapshot`], a JSON export of the relevant keys:
//!
//! ```json
//! {
//!   "Microsoft\\Windows NT\\CurrentVersion": { "SystemRoot": "C:\\Windows" },
//!   "ControlSet001\\Services\\Eventlog\\System\\Service Control Manager": {
//!     "EventMessageFile": "%SystemRoot%\\system32\\services.exe"
//!   }
//! }
//! ```
//!
//! Key paths are relative to the hive root (`SOFTWARE` or `SYSTEM`). `REG_SZ` values are JSON
//! strings, values stored with an ANSI codepage are written as `{ "ansi": [bytes] }`.

use crate::path_resolver::DEFAULT_SYSTEM_ROOT;
use crate::utils::decode_ansi_bytes_z;

use encoding::EncodingRef;
use hashbrown::HashMap;
use log::{debug, warn};
use serde::Deserialize;
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const CURRENT_VERSION_KEY: &str = "Microsoft\\Windows NT\\CurrentVersion";
const WINEVT_PUBLISHERS_KEY: &str = "Microsoft\\Windows\\CurrentVersion\\WINEVT\\Publishers";
const EVENTLOG_SERVICES_KEYS: [&str; 2] = [
    "ControlSet001\\Services\\Eventlog",
    "ControlSet002\\Services\\Eventlog",
];

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("failed to open registry snapshot `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse registry snapshot: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown event log type `{0}`")]
    UnknownEventLogType(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryValue {
    String(String),
    AnsiString(Vec<u8>),
}

impl RegistryValue {
    pub fn to_string_lossy(&self, ansi_codec: EncodingRef) -> String {
        match self {
            RegistryValue::String(s) => s.clone(),
            RegistryValue::AnsiString(bytes) => decode_ansi_bytes_z(bytes, ansi_codec),
        }
    }
}

/// Key/value access to a single registry hive.
pub trait RegistryReader {
    /// `Ok(None)` when either the key or the value does not exist.
    fn value(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>, RegistryError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SnapshotValue {
    String(String),
    Ansi { ansi: Vec<u8> },
    // DWORDs, binary data etc. are never looked up.
    Other(serde_json::Value),
}

fn normalize_key_path(key_path: &str) -> String {
    key_path.trim_matches('\\').to_lowercase()
}

/// A registry hive loaded from a JSON snapshot. Lookups ignore case.
#[derive(Debug, Default, Clone)]
pub struct RegistrySnapshot {
    keys: HashMap<String, HashMap<String, RegistryValue>>,
}

impl RegistrySnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self, RegistryError> {
        let raw: HashMap<String, HashMap<String, SnapshotValue>> =
            serde_json::from_reader(reader)?;

        let mut snapshot = RegistrySnapshot::new();
        for (key_path, values) in raw {
            for (value_name, value) in values {
                let value = match value {
                    SnapshotValue::String(s) => RegistryValue::String(s),
                    SnapshotValue::Ansi { ansi } => RegistryValue::AnsiString(ansi),
                    SnapshotValue::Other(_) => continue,
                };
                snapshot.insert(&key_path, &value_name, value);
            }
        }

        Ok(snapshot)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RegistryError> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|source| RegistryError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_reader(BufReader::new(file))
    }

    pub fn insert(&mut self, key_path: &str, value_name: &str, value: RegistryValue) {
        self.keys
            .entry(normalize_key_path(key_path))
            .or_default()
            .insert(value_name.to_lowercase(), value);
    }
}

impl RegistryReader for RegistrySnapshot {
    fn value(&self, key_path: &str, value_name: &str) -> Result<Option<RegistryValue>, RegistryError> {
        Ok(self
            .keys
            .get(&normalize_key_path(key_path))
            .and_then(|values| values.get(&value_name.to_lowercase()))
            .cloned())
    }
}

/// Whether `path` looks like `X:\...`.
fn is_usable_system_root(path: &str) -> bool {
    let bytes = path.as_bytes();
    bytes.len() >= 3 && bytes[1] == b':' && bytes[2] == b'\\'
}

/// Read `%SystemRoot%` from the `SOFTWARE` hive, falling back to `C:\Windows`.
pub fn system_root_from_registry(
    software: &dyn RegistryReader,
    ansi_codec: EncodingRef,
) -> Result<String, RegistryError> {
    let system_root = software
        .value(CURRENT_VERSION_KEY, "SystemRoot")?
        .map(|value| value.to_string_lossy(ansi_codec));

    match system_root {
        Some(system_root) if is_usable_system_root(&system_root) => {
            debug!("Using %SystemRoot% `{system_root}` from the registry");
            Ok(system_root)
        }
        Some(system_root) => {
            warn!("Ignoring unusable %SystemRoot% `{system_root}`, using `{DEFAULT_SYSTEM_ROOT}`");
            Ok(DEFAULT_SYSTEM_ROOT.to_string())
        }
        None => Ok(DEFAULT_SYSTEM_ROOT.to_string()),
    }
}

/// The classic event logs that have an `Eventlog` services key.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EventLogType {
    Application,
    Security,
    System,
}

impl EventLogType {
    pub fn key_name(&self) -> &'static str {
        match self {
            EventLogType::Application => "Application",
            EventLogType::Security => "Security",
            EventLogType::System => "System",
        }
    }

    /// Derive the type from an event log filename such as `System.evtx`.
    pub fn from_filename(path: impl AsRef<Path>) -> Option<Self> {
        let file_name = path.as_ref().file_name()?.to_str()?;
        let (stem, extension) = file_name.rsplit_once('.')?;
        if !extension.eq_ignore_ascii_case("evtx") {
            return None;
        }
        stem.parse().ok()
    }
}

impl FromStr for EventLogType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            EventLogType::Application,
            EventLogType::Security,
            EventLogType::System,
        ]
        .into_iter()
        .find(|t| t.key_name().eq_ignore_ascii_case(s))
        .ok_or_else(|| RegistryError::UnknownEventLogType(s.to_string()))
    }
}

impl fmt::Display for EventLogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key_name())
    }
}

/// Message filename lookups against the `SOFTWARE` and `SYSTEM` hives.
pub struct RegistryLookup {
    software: Option<Box<dyn RegistryReader>>,
    system: Option<Box<dyn RegistryReader>>,
    ansi_codec: EncodingRef,
}

impl RegistryLookup {
    pub fn new(
        software: Option<Box<dyn RegistryReader>>,
        system: Option<Box<dyn RegistryReader>>,
        ansi_codec: EncodingRef,
    ) -> Self {
        RegistryLookup {
            software,
            system,
            ansi_codec,
        }
    }

    /// `%SystemRoot%`, `None` without a `SOFTWARE` hive.
    pub fn system_root(&self) -> Result<Option<String>, RegistryError> {
        self.software
            .as_deref()
            .map(|software| system_root_from_registry(software, self.ansi_codec))
            .transpose()
    }

    fn string_value(
        &self,
        hive: &dyn RegistryReader,
        key_path: &str,
        value_name: &str,
    ) -> Result<Option<String>, RegistryError> {
        Ok(hive
            .value(key_path, value_name)?
            .map(|value| value.to_string_lossy(self.ansi_codec))
            .filter(|value| !value.is_empty()))
    }

    /// `EventMessageFile` of an event source, from `ControlSet001` then `ControlSet002`.
    pub fn event_message_files(
        &self,
        log_type: EventLogType,
        event_source: &str,
    ) -> Result<Option<String>, RegistryError> {
        let Some(system) = self.system.as_deref() else {
            return Ok(None);
        };

        for services_key in EVENTLOG_SERVICES_KEYS {
            let key_path = format!("{services_key}\\{log_type}\\{event_source}");
            if let Some(files) = self.string_value(system, &key_path, "EventMessageFile")? {
                return Ok(Some(files));
            }
        }

        Ok(None)
    }

    fn provider_value(
        &self,
        provider_guid: &str,
        value_name: &str,
    ) -> Result<Option<String>, RegistryError> {
        let Some(software) = self.software.as_deref() else {
            return Ok(None);
        };

        let key_path = format!("{WINEVT_PUBLISHERS_KEY}\\{provider_guid}");
        self.string_value(software, &key_path, value_name)
    }

    /// `MessageFileName` of a manifest-based provider.
    ///
    /// `provider_guid` is in registry form, `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`.
    pub fn provider_message_files(&self, provider_guid: &str) -> Result<Option<String>, RegistryError> {
        self.provider_value(provider_guid, "MessageFileName")
    }

    /// `ResourceFileName` of a manifest-based provider, the file holding its `WEVT_TEMPLATE`.
    pub fn provider_resource_files(&self, provider_guid: &str) -> Result<Option<String>, RegistryError> {
        self.provider_value(provider_guid, "ResourceFileName")
    }
}

impl fmt::Debug for RegistryLookup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryLookup")
            .field("software", &self.software.is_some())
            .field("system", &self.system.is_some())
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}
