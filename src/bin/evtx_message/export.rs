use crate::{create_output_file, message_handle_args, message_handle_settings};

use anyhow::{Context, Result};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use evtx::EvtxParser;
use evtx_message::path_resolver::{EntryKind, find_entry_no_case};
use evtx_message::{
    EventLogType, EventRecord, MessageExporter, MessageHandle, RegistryLookup, RegistryReader,
    RegistrySnapshot,
};
use indoc::indoc;
use log::{info, warn};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

pub fn command() -> Command {
    Command::new("export")
        .about("Export the records of an event log together with their message strings")
        .long_about(indoc!(r#"
            Export the records of an event log together with their message strings.

            Message filenames are looked up in registry snapshots of the imaged system:
            - SOFTWARE: %SystemRoot% and `WINEVT\Publishers\{guid}\MessageFileName`.
            - SYSTEM: `ControlSet00X\Services\Eventlog\<log>\<source>\EventMessageFile`.

            A snapshot is a JSON document mapping key paths (relative to the hive root)
            to their values, e.g.
              { "Microsoft\\Windows NT\\CurrentVersion": { "SystemRoot": "C:\\Windows" } }

            Records whose message cannot be rendered are exported without it.
        "#))
        .arg(
            Arg::new("INPUT")
                .required(true)
                .value_name("EVTX")
                .help("The event log to export."),
        )
        .arg(
            Arg::new("software")
                .long("software")
                .value_name("PATH")
                .help("SOFTWARE registry snapshot."),
        )
        .arg(
            Arg::new("system")
                .long("system")
                .value_name("PATH")
                .help("SYSTEM registry snapshot."),
        )
        .arg(
            Arg::new("registry-directory")
                .long("registry-directory")
                .short('r')
                .value_name("DIR")
                .help("Directory containing `SOFTWARE.json` and `SYSTEM.json` (any case). Explicit --software/--system take precedence."),
        )
        .arg(
            Arg::new("event-log-type")
                .long("event-log-type")
                .short('t')
                .value_parser(PossibleValuesParser::new(["application", "security", "system"]))
                .ignore_case(true)
                .help("Event log type, used to look up event source message files. Derived from the INPUT filename when not set."),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .value_name("FILE")
                .help("Writes output to the file specified instead of stdout, errors will still be printed to stderr. \
                       Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`. \
                       Will create parent directories if needed."),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .args(message_handle_args())
}

/// The explicit snapshot path, or `<registry-directory>/<file_name>` matched ignoring case.
fn snapshot_path(
    matches: &ArgMatches,
    explicit: &str,
    file_name: &str,
) -> Result<Option<PathBuf>> {
    if let Some(path) = matches.get_one::<String>(explicit) {
        return Ok(Some(PathBuf::from(path)));
    }

    let Some(directory) = matches.get_one::<String>("registry-directory") else {
        return Ok(None);
    };
    let directory = Path::new(directory);

    let found = find_entry_no_case(directory, file_name, EntryKind::File)?;
    if found.is_none() {
        warn!("`{file_name}` not found in `{}`", directory.display());
    }

    Ok(found.map(|name| directory.join(name)))
}

fn load_snapshot(path: Option<PathBuf>) -> Result<Option<RegistrySnapshot>> {
    path.map(|path| {
        RegistrySnapshot::from_path(&path)
            .with_context(|| format!("Failed to load registry snapshot {}", path.display()))
    })
    .transpose()
}

pub fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let input = PathBuf::from(
        matches
            .get_one::<String>("INPUT")
            .context("INPUT is required")?,
    );

    let settings = message_handle_settings(matches)?;
    let ansi_codec = settings.get_ansi_codec();

    let software = load_snapshot(snapshot_path(matches, "software", "SOFTWARE.json")?)?;
    let system = load_snapshot(snapshot_path(matches, "system", "SYSTEM.json")?)?;

    let log_type = match matches.get_one::<String>("event-log-type") {
        Some(log_type) => Some(log_type.parse::<EventLogType>()?),
        None => EventLogType::from_filename(&input),
    };
    if log_type.is_none() {
        warn!(
            "Could not determine the event log type of `{}`, only provider message files are used",
            input.display()
        );
    }

    let mut handle = MessageHandle::new(settings);
    if let Some(software) = &software {
        handle.set_system_root_from_registry(software)?;
    }
    info!("Using %SystemRoot% `{}`", handle.path_resolver().system_root());

    let registry = RegistryLookup::new(
        software.map(|s| Box::new(s) as Box<dyn RegistryReader>),
        system.map(|s| Box::new(s) as Box<dyn RegistryReader>),
        ansi_codec,
    );
    let mut exporter = MessageExporter::new(handle, registry, log_type);

    let mut output: Box<dyn Write> = match matches.get_one::<String>("output-target") {
        Some(path) => {
            let prompt = !matches.get_flag("no-confirm-overwrite");
            Box::new(BufWriter::new(create_output_file(path, prompt)?))
        }
        None => Box::new(BufWriter::new(io::stdout())),
    };

    let mut parser = EvtxParser::from_path(&input)
        .with_context(|| format!("Failed to open file {}", input.display()))?;

    let records = parser
        .records_json_value()
        .filter_map(|record| match record {
            Ok(record) => Some(EventRecord::from_json(
                record.event_record_id,
                record.timestamp.to_string(),
                &record.data,
            )),
            Err(e) => {
                warn!("Failed to parse record: {e}");
                None
            }
        });

    let summary = exporter.export_records(records, &mut output)?;
    output.flush().context("Failed to flush output")?;

    info!(
        "Exported {} records: {} messages, {} missing, {} failures",
        summary.records, summary.messages, summary.missing_messages, summary.failures
    );

    Ok(ExitCode::SUCCESS)
}
