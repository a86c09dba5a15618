
use fixtures::*;

use evtx_message::{
    CACHE_CAPACITY, Error, ErrorCategory, MessageHandle, MessageHandleSettings, PeResourceReader,
    RegistryValue, RegistrySnapshot, ResourceContainer, ResourceError, ResourceReader,
};
use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::path::Path;
use tempfile::{TempDir, tempdir};

fn handle_for(image: &TempDir) -> MessageHandle {
    MessageHandle::new(MessageHandleSettings::new().resource_files_path(image.path()))
}

/// Counts the files opened through it.
#[derive(Debug, Default)]
struct CountingReader {
    opened: Cell<usize>,
}

impl ResourceReader for CountingReader {
    fn open(&self, path: &Path) -> Result<Box<dyn ResourceContainer>, ResourceError> {
        self.opened.set(self.opened.get() + 1);
        PeResourceReader.open(path)
    }
}

#[test]
fn test_it_renders_process_started() {
    ensure_env_logger_initialized();
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/EventCreate.exe",
        &message_dll(&[(1, "Process %1 started%n")]),
    );

    let mut handle = handle_for(&image);
    let message = handle
        .render("%SystemRoot%\\system32\\eventcreate.exe", 1, &["notepad.exe"][..])
        .unwrap();

    assert_eq!(message.as_deref(), Some("Process notepad.exe started\n"));
}

#[test]
fn test_it_falls_back_to_the_next_message_file() {
    ensure_env_logger_initialized();
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/A.dll",
        &message_dll(&[(2, "only in A")]),
    );
    write_file(
        image.path(),
        "Windows/System32/B.dll",
        &message_dll(&[(1, "Found %1 in B")]),
    );

    let mut handle = handle_for(&image);
    let files = "C:\\Windows\\System32\\Missing.dll;C:\\Windows\\System32\\A.dll;C:\\Windows\\System32\\B.dll;";

    assert_eq!(
        handle.render(files, 1, &["it"][..]).unwrap().as_deref(),
        Some("Found it in B")
    );
    assert_eq!(
        handle.render(files, 2, &["it"][..]).unwrap().as_deref(),
        Some("only in A")
    );
    assert_eq!(handle.render(files, 3, &["it"][..]).unwrap(), None);
    assert_eq!(
        handle.message_template(files, 1).unwrap().as_deref(),
        Some("Found %1 in B")
    );
}

#[test]
fn test_render_to_streams_into_the_sink() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/netevent.dll",
        &message_dll(&[(0xc000_1b58, "The %1 service%bfailed%t%2.")]),
    );

    let mut handle = handle_for(&image);
    let mut sink = String::from("> ");

    let found = handle
        .render_to(
            "%SystemRoot%\\System32\\netevent.dll",
            0xc000_1b58,
            &vec!["Spooler".to_string(), "badly".to_string()],
            &mut sink,
        )
        .unwrap();

    assert!(found);
    assert_eq!(sink, "> The Spooler service failed\tbadly.");
}

#[test]
fn test_render_to_leaves_the_sink_alone_on_malformed_templates() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/bad.dll",
        &message_dll(&[(1, "bad %1 %x")]),
    );

    let mut handle = handle_for(&image);
    let mut sink = String::from("> ");

    let err = handle
        .render_to("%SystemRoot%\\System32\\bad.dll", 1, &["value"][..], &mut sink)
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::MalformedInput);
    assert_eq!(sink, "> ");
}

#[test]
fn test_it_reads_event_message_identifiers_from_the_manifest() {
    ensure_env_logger_initialized();
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/wevtsvc.dll",
        &pe_with_resources(&[
            Resource::wevt_template(wevt_manifest(
                EVENTLOG_PROVIDER_GUID,
                &[(1100, 0x8000_044c), (1104, 0xffff_ffff)],
            )),
            Resource::message_table(
                LANG_EN_US,
                message_table(&[
                    (0x0000_044c, "Unrelated message sharing the low word."),
                    (0x8000_044c, "The event logging service has shut down."),
                ]),
            ),
        ]),
    );

    let mut handle = MessageHandle::with_reader(
        MessageHandleSettings::new().resource_files_path(image.path()),
        CountingReader::default(),
    );
    let files = "%SystemRoot%\\system32\\wevtsvc.dll";
    let guid = "{FC65DDD8-D6EF-4962-83D5-6E5CFE9CE148}";

    let message_identifier = handle.event_message_identifier(files, guid, 1100).unwrap();
    assert_eq!(message_identifier, Some(0x8000_044c));
    assert_eq!(
        handle
            .render(files, 0x8000_044c, &[""; 0][..])
            .unwrap()
            .as_deref(),
        Some("The event logging service has shut down.")
    );

    // Defined without a message, not defined, other provider.
    assert_eq!(handle.event_message_identifier(files, guid, 1104).unwrap(), None);
    assert_eq!(handle.event_message_identifier(files, guid, 1101).unwrap(), None);
    assert_eq!(
        handle
            .event_message_identifier(files, "{555908d1-a6d7-4695-8e1e-26931d2012f4}", 1100)
            .unwrap(),
        None
    );

    // The resource file and the message file are the same cached file.
    assert_eq!(handle.reader().opened.get(), 1);
}

#[test]
fn test_it_prefers_the_configured_language() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/multi.dll",
        &pe_with_resources(&[
            Resource::message_table(LANG_EN_US, message_table(&[(5, "Hello")])),
            Resource::message_table(LANG_DE_DE, message_table(&[(5, "Hallo")])),
        ]),
    );

    let files = "%SystemRoot%\\System32\\multi.dll";

    let mut english = handle_for(&image);
    assert_eq!(english.render(files, 5, &[""][..]).unwrap().as_deref(), Some("Hello"));

    let mut german = MessageHandle::new(
        MessageHandleSettings::new()
            .resource_files_path(image.path())
            .preferred_language(LANG_DE_DE),
    );
    assert_eq!(german.render(files, 5, &[""][..]).unwrap().as_deref(), Some("Hallo"));

    // No French table, the first table of the file is used.
    let mut french = MessageHandle::new(
        MessageHandleSettings::new()
            .resource_files_path(image.path())
            .preferred_language(0x040c),
    );
    assert_eq!(french.render(files, 5, &[""][..]).unwrap().as_deref(), Some("Hello"));
}

#[test]
fn test_it_promotes_to_the_mui_satellite() {
    ensure_env_logger_initialized();
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/wevtsvc.dll",
        &pe_with_resources(&[Resource::mui(mui_resource(0x11))]),
    );
    write_file(
        image.path(),
        "Windows/System32/en-US/wevtsvc.dll.mui",
        &message_dll(&[(0x0000_0064, "The event logging service is shutting down.")]),
    );

    let mut handle = MessageHandle::with_reader(
        MessageHandleSettings::new().resource_files_path(image.path()),
        CountingReader::default(),
    );
    let files = "%SystemRoot%\\System32\\wevtsvc.dll";

    for _ in 0..2 {
        assert_eq!(
            handle.render(files, 100, &[""; 0][..]).unwrap().as_deref(),
            Some("The event logging service is shutting down.")
        );
    }
    // Both the main file and the satellite stay cached.
    assert_eq!(handle.reader().opened.get(), 2);

    // The satellite does not have it either.
    assert_eq!(handle.render(files, 101, &[""; 0][..]).unwrap(), None);
}

#[test]
fn test_missing_satellite_is_not_found() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/wevtsvc.dll",
        &pe_with_resources(&[Resource::mui(mui_resource(0x11))]),
    );

    let mut handle = handle_for(&image);
    assert_eq!(
        handle
            .render("%SystemRoot%\\System32\\wevtsvc.dll", 100, &[""; 0][..])
            .unwrap(),
        None
    );
}

#[test]
fn test_seventeenth_file_evicts_the_first() {
    let image = tempdir().unwrap();
    for index in 0..=CACHE_CAPACITY {
        write_file(
            image.path(),
            &format!("Windows/System32/file{index}.dll"),
            &message_dll(&[(1, "message")]),
        );
    }

    let mut handle = MessageHandle::with_reader(
        MessageHandleSettings::new().resource_files_path(image.path()),
        CountingReader::default(),
    );
    let mut render = |index: usize| {
        handle
            .render(&format!("%SystemRoot%\\System32\\file{index}.dll"), 1, &[""; 0][..])
            .unwrap()
    };

    for index in 0..=CACHE_CAPACITY {
        assert_eq!(render(index).as_deref(), Some("message"));
    }
    assert_eq!(handle.reader().opened.get(), CACHE_CAPACITY + 1);

    // file16 went into the slot of file0.
    handle
        .render("%SystemRoot%\\System32\\file16.dll", 1, &[""; 0][..])
        .unwrap();
    assert_eq!(handle.reader().opened.get(), CACHE_CAPACITY + 1);

    handle
        .render("%SystemRoot%\\System32\\file0.dll", 1, &[""; 0][..])
        .unwrap();
    assert_eq!(handle.reader().opened.get(), CACHE_CAPACITY + 2);
}

#[test]
fn test_unsupported_escape_is_malformed_input() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "Windows/System32/bad.dll",
        &message_dll(&[(1, "Value %x")]),
    );

    let mut handle = handle_for(&image);
    let err = handle
        .render("%SystemRoot%\\System32\\bad.dll", 1, &[""][..])
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::MalformedInput);
    match err {
        Error::FailedToRenderMessage {
            filename, source, ..
        } => {
            assert_eq!(filename, "%SystemRoot%\\System32\\bad.dll");
            assert!(matches!(
                *source,
                Error::UnsupportedConversionSpecifier { .. }
            ));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_unreadable_message_file_is_a_resource_failure() {
    let image = tempdir().unwrap();
    write_file(image.path(), "Windows/System32/garbage.dll", b"not a PE file");

    let mut handle = handle_for(&image);
    let err = handle
        .render("%SystemRoot%\\System32\\garbage.dll", 1, &[""][..])
        .unwrap_err();

    assert_eq!(err.category(), ErrorCategory::ResourceFailure);
}

#[test]
fn test_system_root_from_registry_snapshot() {
    let image = tempdir().unwrap();
    write_file(
        image.path(),
        "WINNT/System32/EventCreate.exe",
        &message_dll(&[(1, "from WINNT")]),
    );

    let mut software = RegistrySnapshot::new();
    software.insert(
        "Microsoft\\Windows NT\\CurrentVersion",
        "SystemRoot",
        RegistryValue::String("C:\\WINNT".to_string()),
    );

    let mut handle = handle_for(&image);
    handle.set_system_root_from_registry(&software).unwrap();

    assert_eq!(handle.path_resolver().system_root(), "C:\\WINNT");
    assert_eq!(
        handle
            .render("%SystemRoot%\\System32\\EventCreate.exe", 1, &[""][..])
            .unwrap()
            .as_deref(),
        Some("from WINNT")
    );
}
