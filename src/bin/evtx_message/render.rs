use crate::{message_handle_args, message_handle_settings, parse_u32};

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use evtx_message::MessageHandle;
use indoc::indoc;
use std::io::{self, Write};
use std::process::ExitCode;

pub fn command() -> Command {
    Command::new("render")
        .about("Render a single message from its message files")
        .long_about(indoc!(r#"
            Render a single message from its message files.

            The message filenames are given the way the registry stores them
            (`EventMessageFile` / `MessageFileName`), `;`-separated, e.g.
            `%SystemRoot%\system32\EventCreate.exe`. They are resolved below
            --resource-files-path, matching every path segment case-insensitively.

            Exits with code 1 when none of the files contains the message.
        "#))
        .arg(
            Arg::new("message-files")
                .long("message-files")
                .short('m')
                .required(true)
                .value_name("FILES")
                .help("`;`-separated message filenames."),
        )
        .arg(
            Arg::new("message-id")
                .long("message-id")
                .short('i')
                .required(true)
                .value_name("ID")
                .value_parser(parse_u32)
                .help("Message identifier, `(qualifiers << 16) | event identifier`. Decimal or 0x-prefixed hexadecimal."),
        )
        .arg(
            Arg::new("string")
                .long("string")
                .short('s')
                .action(ArgAction::Append)
                .value_name("STRING")
                .help("Substitution string, `%1` is the first one passed. Can be passed multiple times."),
        )
        .arg(
            Arg::new("system-root")
                .long("system-root")
                .value_name("PATH")
                .help("Value of %SystemRoot% (and %WinDir%), defaults to `C:\\Windows`."),
        )
        .arg(
            Arg::new("template")
                .long("template")
                .action(ArgAction::SetTrue)
                .help("Print the message template without substituting any strings."),
        )
        .args(message_handle_args())
}

pub fn run(matches: &ArgMatches) -> Result<ExitCode> {
    let mut handle = MessageHandle::new(message_handle_settings(matches)?);

    if let Some(system_root) = matches.get_one::<String>("system-root") {
        handle.set_system_root(system_root.as_str());
    }

    let message_filenames = matches
        .get_one::<String>("message-files")
        .context("--message-files is required")?;
    let message_identifier = *matches
        .get_one::<u32>("message-id")
        .context("--message-id is required")?;
    let strings: Vec<&str> = matches
        .get_many::<String>("string")
        .map(|values| values.map(String::as_str).collect())
        .unwrap_or_default();

    let message = if matches.get_flag("template") {
        handle.message_template(message_filenames, message_identifier)
    } else {
        handle.render(message_filenames, message_identifier, &strings[..])
    }
    .with_context(|| format!("Failed to render message 0x{message_identifier:08x}"))?;

    let Some(message) = message else {
        eprintln!("Message 0x{message_identifier:08x} not found in `{message_filenames}`");
        return Ok(ExitCode::FAILURE);
    };

    let mut stdout = io::stdout().lock();
    stdout.write_all(message.as_bytes())?;
    if !message.ends_with('\n') {
        stdout.write_all(b"\n")?;
    }
    stdout.flush()?;

    Ok(ExitCode::SUCCESS)
}
