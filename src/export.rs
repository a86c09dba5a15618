use crate::err::{Error, Result};
use crate::message_file::{PeResourceReader, ResourceReader};
use crate::message_handle::{AbortFlag, MessageHandle};
use crate::record::EventRecord;
use crate::registry::{EventLogType, RegistryLookup};

use log::{debug, warn};
use std::io::Write;

/// Counters of a [`MessageExporter`] run.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct ExportSummary {
    pub records: usize,
    /// Records whose message was found and rendered.
    pub messages: usize,
    /// Records without a message filename or whose message files lack the message.
    pub missing_messages: usize,
    /// Records whose message could not be rendered because of an error.
    pub failures: usize,
}

/// Writes event records together with their rendered message strings.
pub struct MessageExporter<R: ResourceReader = PeResourceReader> {
    handle: MessageHandle<R>,
    registry: RegistryLookup,
    log_type: Option<EventLogType>,
    summary: ExportSummary,
}

impl<R: ResourceReader> MessageExporter<R> {
    /// `log_type` selects the `Eventlog` services key for event sources; without it only
    /// provider (`WINEVT\Publishers`) lookups are made.
    pub fn new(
        handle: MessageHandle<R>,
        registry: RegistryLookup,
        log_type: Option<EventLogType>,
    ) -> Self {
        MessageExporter {
            handle,
            registry,
            log_type,
            summary: ExportSummary::default(),
        }
    }

    pub fn handle(&self) -> &MessageHandle<R> {
        &self.handle
    }

    pub fn abort_flag(&self) -> AbortFlag {
        self.handle.abort_flag()
    }

    pub fn summary(&self) -> ExportSummary {
        self.summary
    }

    /// The `;`-separated message filenames registered for the provider or event source of
    /// `record`.
    pub fn message_filenames(&self, record: &EventRecord) -> Result<Option<String>> {
        if let Some(guid) = &record.provider_guid {
            if let Some(files) = self.registry.provider_message_files(guid)? {
                return Ok(Some(files));
            }
        }

        match (&record.event_source, self.log_type) {
            (Some(event_source), Some(log_type)) => {
                Ok(self.registry.event_message_files(log_type, event_source)?)
            }
            _ => Ok(None),
        }
    }

    /// The `;`-separated resource filenames (`ResourceFileName`) of the provider of `record`.
    pub fn resource_filenames(&self, record: &EventRecord) -> Result<Option<String>> {
        match &record.provider_guid {
            Some(guid) => Ok(self.registry.provider_resource_files(guid)?),
            None => Ok(None),
        }
    }

    /// The identifier of the message of `record`.
    ///
    /// Manifest-based providers assign it per event in the `WEVT_TEMPLATE` of their resource file.
    /// Events it does not define, and classic event sources, use `(qualifiers << 16) | event_id`.
    pub fn message_identifier(
        &mut self,
        record: &EventRecord,
        resource_filenames: Option<&str>,
    ) -> Result<u32> {
        if let (Some(files), Some(guid)) = (resource_filenames, &record.provider_guid) {
            if let Some(message_identifier) =
                self.handle
                    .event_message_identifier(files, guid, record.event_identifier)?
            {
                return Ok(message_identifier);
            }
        }

        Ok(record.message_identifier())
    }

    fn render(
        &mut self,
        record: &EventRecord,
        resource_filenames: Option<&str>,
        message_filenames: &str,
    ) -> Result<Option<String>> {
        let message_identifier = self.message_identifier(record, resource_filenames)?;
        debug!(
            "Record {}: message identifier 0x{message_identifier:08x}",
            record.record_id
        );

        self.handle
            .render(message_filenames, message_identifier, record)
    }

    /// Write `record` and its message to `out`.
    ///
    /// Failing to render the message is logged and counted, it is not an error of the export.
    pub fn export_record<W: Write + ?Sized>(
        &mut self,
        record: &EventRecord,
        out: &mut W,
    ) -> Result<()> {
        self.summary.records += 1;

        let resource_filenames = match self.resource_filenames(record) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "Record {}: failed to look up resource filenames: {e}",
                    record.record_id
                );
                self.summary.failures += 1;
                None
            }
        };

        let message_filenames = match self.message_filenames(record) {
            Ok(files) => files,
            Err(e) => {
                warn!(
                    "Record {}: failed to look up message filenames: {e}",
                    record.record_id
                );
                self.summary.failures += 1;
                None
            }
        };

        let message = match &message_filenames {
            Some(files) => match self.render(record, resource_filenames.as_deref(), files) {
                Ok(message) => message,
                Err(Error::Aborted) => return Err(Error::Aborted),
                Err(e) => {
                    warn!("Record {}: {e}", record.record_id);
                    self.summary.failures += 1;
                    None
                }
            },
            None => {
                debug!(
                    "Record {}: no message filename for source {:?}",
                    record.record_id, record.event_source
                );
                None
            }
        };

        if message.is_some() {
            self.summary.messages += 1;
        } else {
            self.summary.missing_messages += 1;
        }

        write_record(
            out,
            record,
            resource_filenames.as_deref(),
            message_filenames.as_deref(),
            message.as_deref(),
        )
        .map_err(|source| Error::WriteOutput { source })
    }

    /// Export every record, stopping early when the abort flag is signaled.
    pub fn export_records<I, W>(&mut self, records: I, out: &mut W) -> Result<ExportSummary>
    where
        I: IntoIterator<Item = EventRecord>,
        W: Write + ?Sized,
    {
        for record in records {
            if self.handle.abort_flag().is_signaled() {
                return Err(Error::Aborted);
            }
            self.export_record(&record, out)?;
        }

        Ok(self.summary)
    }
}

fn write_record<W: Write + ?Sized>(
    out: &mut W,
    record: &EventRecord,
    resource_filenames: Option<&str>,
    message_filenames: Option<&str>,
    message: Option<&str>,
) -> std::io::Result<()> {
    writeln!(out, "Event number\t\t\t: {}", record.record_id)?;
    if !record.written_time.is_empty() {
        writeln!(out, "Written time\t\t\t: {}", record.written_time)?;
    }
    if let Some(source) = &record.event_source {
        writeln!(out, "Source name\t\t\t: {source}")?;
    }
    if let Some(guid) = &record.provider_guid {
        writeln!(out, "Provider identifier\t\t: {guid}")?;
    }
    writeln!(
        out,
        "Event identifier\t\t: 0x{:08x} ({})",
        record.event_identifier, record.event_identifier
    )?;
    if let Some(files) = resource_filenames {
        writeln!(out, "Resource filename\t\t: {files}")?;
    }
    if let Some(files) = message_filenames {
        writeln!(out, "Message filename\t\t: {files}")?;
    }
    writeln!(out, "Number of strings\t\t: {}", record.strings.len())?;
    for (index, string) in record.strings.iter().enumerate() {
        writeln!(out, "String: {}\t\t\t: {string}", index + 1)?;
    }
    if let Some(message) = message {
        writeln!(out, "Message string\t\t\t: {message}")?;
    }
    writeln!(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message_file::ResourceContainer;
    use crate::message_handle::MessageHandleSettings;
    use crate::message_table::{MessageTable, MessageTables};
    use crate::mui::MuiResource;
    use crate::pe_resources::ResourceError;
    use crate::registry::{RegistrySnapshot, RegistryValue};
    use crate::wevt_manifest::{EventDefinition, ManifestProvider, WevtManifest, normalize_guid};
    use pretty_assertions::assert_eq;
    use std::fs;
    use std::path::Path;

    #[derive(Debug)]
    struct ServicesTable;

    impl ResourceContainer for ServicesTable {
        fn message_tables(
            &self,
            _ansi_codec: encoding::EncodingRef,
        ) -> std::result::Result<Option<MessageTables>, ResourceError> {
            let mut tables = MessageTables::new();
            tables.push(
                0x0409,
                MessageTable::from_iter([(0x4000_1b7c, "The %1 service entered the %2 state.%n")]),
            );
            Ok(Some(tables))
        }

        fn mui_resource(&self) -> std::result::Result<Option<MuiResource>, ResourceError> {
            Ok(None)
        }
    }

    struct ServicesReader;

    impl ResourceReader for ServicesReader {
        fn open(&self, _path: &Path) -> std::result::Result<Box<dyn ResourceContainer>, ResourceError> {
            Ok(Box::new(ServicesTable))
        }
    }

    const EVENTLOG_GUID: &str = "{fc65ddd8-d6ef-4962-83d5-6e5cfe9ce148}";

    /// `wevtsvc.dll`: a manifest assigning event 1100 a message identifier with severity bits.
    #[derive(Debug)]
    struct EventlogResources;

    impl ResourceContainer for EventlogResources {
        fn message_tables(
            &self,
            _ansi_codec: encoding::EncodingRef,
        ) -> std::result::Result<Option<MessageTables>, ResourceError> {
            let mut tables = MessageTables::new();
            tables.push(
                0x0409,
                MessageTable::from_iter([
                    (0x0000_044c, "Unrelated message sharing the low word."),
                    (0x8000_044c, "The event logging service has shut down."),
                    (0x0000_044d, "Audit events have been dropped by the transport."),
                ]),
            );
            Ok(Some(tables))
        }

        fn mui_resource(&self) -> std::result::Result<Option<MuiResource>, ResourceError> {
            Ok(None)
        }

        fn wevt_manifest(&self) -> std::result::Result<Option<WevtManifest>, ResourceError> {
            Ok(Some(WevtManifest::from_iter([ManifestProvider {
                guid: normalize_guid(EVENTLOG_GUID),
                events: vec![EventDefinition {
                    identifier: 1100,
                    version: 0,
                    message_identifier: Some(0x8000_044c),
                }],
            }])))
        }
    }

    struct EventlogReader;

    impl ResourceReader for EventlogReader {
        fn open(&self, _path: &Path) -> std::result::Result<Box<dyn ResourceContainer>, ResourceError> {
            Ok(Box::new(EventlogResources))
        }
    }

    fn scm_record(record_id: u64, event_identifier: u32) -> EventRecord {
        EventRecord {
            record_id,
            written_time: "2019-03-14 09:21:01 UTC".to_string(),
            provider_name: Some("Service Control Manager".to_string()),
            provider_guid: None,
            event_source: Some("Service Control Manager".to_string()),
            event_identifier,
            qualifiers: Some(0x4000),
            strings: vec!["Windows Update".to_string(), "running".to_string()],
        }
    }

    fn exporter(image: &Path) -> MessageExporter<ServicesReader> {
        let system32 = image.join("Windows").join("System32");
        fs::create_dir_all(&system32).unwrap();
        fs::write(system32.join("services.exe"), b"").unwrap();

        let mut system = RegistrySnapshot::new();
        system.insert(
            "ControlSet001\\Services\\Eventlog\\System\\Service Control Manager",
            "EventMessageFile",
            RegistryValue::String("%SystemRoot%\\system32\\services.exe".to_string()),
        );

        let handle = MessageHandle::with_reader(
            MessageHandleSettings::new().resource_files_path(image),
            ServicesReader,
        );
        let registry = RegistryLookup::new(None, Some(Box::new(system)), encoding::all::WINDOWS_1252);

        MessageExporter::new(handle, registry, Some(EventLogType::System))
    }

    #[test]
    fn writes_record_with_message() {
        let image = tempfile::tempdir().unwrap();
        let mut exporter = exporter(image.path());
        let mut out = Vec::new();

        exporter.export_record(&scm_record(12, 7036), &mut out).unwrap();

        let expected = "Event number\t\t\t: 12\n\
                        Written time\t\t\t: 2019-03-14 09:21:01 UTC\n\
                        Source name\t\t\t: Service Control Manager\n\
                        Event identifier\t\t: 0x00001b7c (7036)\n\
                        Message filename\t\t: %SystemRoot%\\system32\\services.exe\n\
                        Number of strings\t\t: 2\n\
                        String: 1\t\t\t: Windows Update\n\
                        String: 2\t\t\t: running\n\
                        Message string\t\t\t: The Windows Update service entered the running state.\n\n\n";

        assert_eq!(String::from_utf8(out).unwrap(), expected);
        assert_eq!(
            exporter.summary(),
            ExportSummary {
                records: 1,
                messages: 1,
                missing_messages: 0,
                failures: 0,
            }
        );
    }

    #[test]
    fn provider_messages_use_the_manifest_message_identifier() {
        let image = tempfile::tempdir().unwrap();
        let system32 = image.path().join("Windows").join("System32");
        fs::create_dir_all(&system32).unwrap();
        fs::write(system32.join("wevtsvc.dll"), b"").unwrap();

        let publisher = format!(
            "Microsoft\\Windows\\CurrentVersion\\WINEVT\\Publishers\\{EVENTLOG_GUID}"
        );
        let mut software = RegistrySnapshot::new();
        for value_name in ["MessageFileName", "ResourceFileName"] {
            software.insert(
                &publisher,
                value_name,
                RegistryValue::String("%SystemRoot%\\system32\\wevtsvc.dll".to_string()),
            );
        }

        let handle = MessageHandle::with_reader(
            MessageHandleSettings::new().resource_files_path(image.path()),
            EventlogReader,
        );
        let registry =
            RegistryLookup::new(Some(Box::new(software)), None, encoding::all::WINDOWS_1252);
        let mut exporter = MessageExporter::new(handle, registry, None);

        let record = |record_id, event_identifier| EventRecord {
            record_id,
            written_time: "2019-03-14 09:21:01 UTC".to_string(),
            provider_name: Some("Microsoft-Windows-Eventlog".to_string()),
            provider_guid: Some(EVENTLOG_GUID.to_string()),
            event_source: Some("Microsoft-Windows-Eventlog".to_string()),
            event_identifier,
            qualifiers: None,
            strings: Vec::new(),
        };

        let resource_files = Some("%SystemRoot%\\system32\\wevtsvc.dll");
        assert_eq!(
            exporter
                .message_identifier(&record(1, 1100), resource_files)
                .unwrap(),
            0x8000_044c
        );
        assert_eq!(
            exporter
                .message_identifier(&record(1, 1101), resource_files)
                .unwrap(),
            1101
        );

        let mut out = Vec::new();
        exporter.export_record(&record(1, 1100), &mut out).unwrap();
        // Not in the manifest: the event identifier is the message identifier.
        exporter.export_record(&record(2, 1101), &mut out).unwrap();

        let out = String::from_utf8(out).unwrap();
        assert!(out.contains("Resource filename\t\t: %SystemRoot%\\system32\\wevtsvc.dll\n"));
        assert!(out.contains("Message string\t\t\t: The event logging service has shut down.\n"));
        assert!(out.contains(
            "Message string\t\t\t: Audit events have been dropped by the transport.\n"
        ));
        assert!(!out.contains("Unrelated message"));
        assert_eq!(exporter.summary().messages, 2);
        assert_eq!(exporter.summary().failures, 0);
    }

    #[test]
    fn missing_messages_are_counted_and_export_continues() {
        let image = tempfile::tempdir().unwrap();
        let mut exporter = exporter(image.path());
        let mut unknown_source = scm_record(2, 7036);
        unknown_source.event_source = Some("Unknown".to_string());

        let mut out = Vec::new();
        let summary = exporter
            .export_records(vec![scm_record(1, 7036), unknown_source, scm_record(3, 1)], &mut out)
            .unwrap();

        assert_eq!(summary.records, 3);
        assert_eq!(summary.messages, 1);
        assert_eq!(summary.missing_messages, 2);
        assert_eq!(summary.failures, 0);

        let out = String::from_utf8(out).unwrap();
        assert_eq!(out.matches("Message string").count(), 1);
        assert_eq!(out.matches("Message filename").count(), 2);
    }

    #[test]
    fn abort_stops_between_records() {
        let image = tempfile::tempdir().unwrap();
        let mut exporter = exporter(image.path());
        exporter.abort_flag().signal();

        let mut out = Vec::new();
        let err = exporter
            .export_records(vec![scm_record(1, 7036)], &mut out)
            .unwrap_err();

        assert!(matches!(err, Error::Aborted));
        assert!(out.is_empty());
        assert_eq!(exporter.summary().records, 0);
    }
}
