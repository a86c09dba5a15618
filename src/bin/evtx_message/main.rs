use anyhow::{Context, Result, bail, format_err};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use encoding::all::encodings;
use encoding::types::Encoding;
use evtx_message::MessageHandleSettings;
use log::LevelFilter;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use std::fs::{self, File};
use std::path::Path;
use std::process::ExitCode;

mod export;
mod render;

/// Parse a decimal or `0x`-prefixed hexadecimal number.
pub(crate) fn parse_u32(value: &str) -> Result<u32, String> {
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };

    parsed.map_err(|_| format!("`{value}` is not a decimal or 0x-prefixed hexadecimal number"))
}

/// Arguments configuring the message handle, shared by all subcommands.
pub(crate) fn message_handle_args() -> [Arg; 3] {
    [
        Arg::new("resource-files-path")
            .long("resource-files-path")
            .short('p')
            .value_name("DIR")
            .help("Directory the Windows image is mounted at (the directory containing `Windows`). Defaults to the working directory."),
        Arg::new("language")
            .long("language")
            .short('L')
            .value_name("LANGID")
            .value_parser(parse_u32)
            .default_value("0x0409")
            .help("Preferred language identifier of the message tables."),
        Arg::new("ansi-codec")
            .long("ansi-codec")
            .short('c')
            .value_parser(PossibleValuesParser::new(
                encodings()
                    .iter()
                    .filter(|&e| e.raw_decoder().is_ascii_compatible())
                    .map(|e| e.name()),
            ))
            .default_value(encoding::all::WINDOWS_1252.name())
            .help("Codec of ANSI encoded message strings and registry values."),
    ]
}

pub(crate) fn message_handle_settings(matches: &ArgMatches) -> Result<MessageHandleSettings> {
    let mut settings = MessageHandleSettings::new();

    if let Some(path) = matches.get_one::<String>("resource-files-path") {
        let path = Path::new(path);
        if !path.is_dir() {
            bail!("Resource files path `{}` is not a directory", path.display());
        }
        settings = settings.resource_files_path(path);
    }

    if let Some(language) = matches.get_one::<u32>("language") {
        settings = settings.preferred_language(*language);
    }

    if let Some(name) = matches.get_one::<String>("ansi-codec") {
        let ansi_codec = encodings()
            .iter()
            .find(|c| c.name() == name)
            .ok_or_else(|| format_err!("Unknown ANSI codec `{name}`"))?;
        settings = settings.ansi_codec(*ansi_codec);
    }

    Ok(settings)
}

/// If `prompt` is passed, will display a confirmation prompt before overwriting files.
pub(crate) fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
    let p = path.as_ref();

    if p.is_dir() {
        bail!(
            "There is a directory at {}, refusing to overwrite",
            p.display()
        );
    }

    if p.exists() && prompt {
        let confirmed = Confirm::new()
            .with_prompt(format!(
                "Are you sure you want to override output file at {}",
                p.display()
            ))
            .default(false)
            .interact()
            .context("Failed to write confirmation prompt to term")?;

        if !confirmed {
            bail!("Cancelled");
        }
    }

    if let Some(parent) = p.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    File::create(p).with_context(|| format!("Failed to create output file {}", p.display()))
}

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };

    if let Err(e) = TermLogger::init(
        level,
        Config::default(),
        TerminalMode::Stderr,
        ColorChoice::Auto,
    ) {
        eprintln!("Failed to initialize logging: {e}");
    }
}

fn cli() -> Command {
    Command::new("evtx_message")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Omer B. <omerbenamram@gmail.com>")
        .about("Utility to resolve Windows Event Log message strings offline")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("-v - info, -vv - debug, -vvv - trace. trace output is only available in debug builds, as it is extremely verbose"),
        )
        .subcommand(export::command())
        .subcommand(render::command())
}

fn run(matches: &ArgMatches) -> Result<ExitCode> {
    match matches.subcommand() {
        Some(("export", matches)) => export::run(matches),
        Some(("render", matches)) => render::run(matches),
        Some((name, _)) => bail!("Unknown subcommand `{name}`"),
        None => bail!("A subcommand is required"),
    }
}

fn main() -> ExitCode {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"));

    match run(&matches) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e:?}");
            ExitCode::FAILURE
        }
    }
}
