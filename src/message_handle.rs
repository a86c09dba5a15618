//! Resolution of event message strings.
//!
//! A [`MessageHandle`] turns a registry message filename list (`EventMessageFile` /
//! `MessageFileName`, `;`-separated) and a message identifier into the rendered message. Opened
//! message files are kept in two [`RoundRobinCache`]s, one for the files named by the registry and
//! one for their MUI satellites.

use crate::cache::RoundRobinCache;
use crate::err::{Error, Result};
use crate::message_file::{MessageFile, PeResourceReader, ResourceReader};
use crate::path_resolver::{PathResolver, ResolvedPath};
use crate::registry::{RegistryReader, system_root_from_registry};
use crate::template::{MessageTemplate, RecordStrings};

use encoding::EncodingRef;
use log::debug;
use std::fmt::{self, Debug, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// `en-US`
pub const DEFAULT_PREFERRED_LANGUAGE: u32 = 0x0409;

/// Satellites are always looked up in this language directory.
pub const DEFAULT_MUI_LANGUAGE: &str = "en-US";

#[derive(Clone)]
pub struct MessageHandleSettings {
    preferred_language: u32,
    resource_files_path: Option<PathBuf>,
    ansi_codec: EncodingRef,
}

impl Debug for MessageHandleSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandleSettings")
            .field("preferred_language", &self.preferred_language)
            .field("resource_files_path", &self.resource_files_path)
            .field("ansi_codec", &self.ansi_codec.name())
            .finish()
    }
}

impl PartialEq for MessageHandleSettings {
    fn eq(&self, other: &Self) -> bool {
        self.preferred_language == other.preferred_language
            && self.resource_files_path == other.resource_files_path
            && self.ansi_codec.name() == other.ansi_codec.name()
    }
}

impl Default for MessageHandleSettings {
    fn default() -> Self {
        MessageHandleSettings {
            preferred_language: DEFAULT_PREFERRED_LANGUAGE,
            resource_files_path: None,
            ansi_codec: encoding::all::WINDOWS_1252,
        }
    }
}

impl MessageHandleSettings {
    pub fn new() -> Self {
        MessageHandleSettings::default()
    }

    /// Language identifier whose message table is preferred, e.g. `0x0409`.
    pub fn preferred_language(mut self, preferred_language: u32) -> Self {
        self.preferred_language = preferred_language;
        self
    }

    /// The directory the Windows image is mounted at.
    pub fn resource_files_path(mut self, resource_files_path: impl Into<PathBuf>) -> Self {
        self.resource_files_path = Some(resource_files_path.into());
        self
    }

    /// Codepage of ANSI message table entries and registry strings.
    pub fn ansi_codec(mut self, ansi_codec: EncodingRef) -> Self {
        self.ansi_codec = ansi_codec;
        self
    }

    pub fn get_preferred_language(&self) -> u32 {
        self.preferred_language
    }

    pub fn get_resource_files_path(&self) -> Option<&Path> {
        self.resource_files_path.as_deref()
    }

    pub fn get_ansi_codec(&self) -> EncodingRef {
        self.ansi_codec
    }
}

/// Cooperative cancellation shared between a handle and whoever wants to stop it.
#[derive(Debug, Clone, Default)]
pub struct AbortFlag(Arc<AtomicBool>);

impl AbortFlag {
    pub fn new() -> Self {
        AbortFlag::default()
    }

    pub fn signal(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_signaled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

fn open_message_file<R: ResourceReader>(
    reader: &R,
    name: &str,
    path: Option<ResolvedPath>,
) -> Result<Option<MessageFile>> {
    let Some(path) = path else {
        return Ok(None);
    };

    debug!("Opening message file `{name}` at `{path}`");
    MessageFile::open(reader, name, path.into_path_buf()).map(Some)
}

pub struct MessageHandle<R: ResourceReader = PeResourceReader> {
    settings: MessageHandleSettings,
    resolver: PathResolver,
    reader: R,
    message_files: RoundRobinCache<MessageFile>,
    mui_message_files: RoundRobinCache<MessageFile>,
    abort: AbortFlag,
}

impl MessageHandle<PeResourceReader> {
    pub fn new(settings: MessageHandleSettings) -> Self {
        MessageHandle::with_reader(settings, PeResourceReader)
    }
}

impl<R: ResourceReader> MessageHandle<R> {
    pub fn with_reader(settings: MessageHandleSettings, reader: R) -> Self {
        let resolver = PathResolver::new(settings.resource_files_path.clone());

        MessageHandle {
            settings,
            resolver,
            reader,
            message_files: RoundRobinCache::new(),
            mui_message_files: RoundRobinCache::new(),
            abort: AbortFlag::new(),
        }
    }

    pub fn settings(&self) -> &MessageHandleSettings {
        &self.settings
    }

    pub fn path_resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn reader(&self) -> &R {
        &self.reader
    }

    /// Set `%SystemRoot%` (and `%WinDir%`).
    pub fn set_system_root(&mut self, system_root: impl Into<String>) {
        self.resolver.set_system_root(system_root);
    }

    pub fn set_windows_directory(&mut self, windows_directory: impl Into<String>) {
        self.resolver.set_windows_directory(windows_directory);
    }

    /// Set `%SystemRoot%` (and `%WinDir%`) from a `SOFTWARE` hive.
    pub fn set_system_root_from_registry(&mut self, software: &dyn RegistryReader) -> Result<()> {
        let system_root = system_root_from_registry(software, self.settings.ansi_codec)?;
        self.set_system_root(system_root);
        Ok(())
    }

    /// A handle to the abort flag, for signalling from elsewhere (e.g. a Ctrl-C handler).
    pub fn abort_flag(&self) -> AbortFlag {
        self.abort.clone()
    }

    pub fn signal_abort(&self) {
        self.abort.signal();
    }

    /// Render message `message_identifier` from the first of `message_filenames` that has it.
    ///
    /// `Ok(None)` when no listed file exists or none of them contains the message.
    pub fn render<S: RecordStrings + ?Sized>(
        &mut self,
        message_filenames: &str,
        message_identifier: u32,
        strings: &S,
    ) -> Result<Option<String>> {
        self.with_template(message_filenames, message_identifier, |template| {
            template.format(strings)
        })
    }

    /// Like [`MessageHandle::render`], but writes into `sink`. Returns whether a message was found.
    ///
    /// The message is rendered completely before it is written, a malformed template leaves
    /// `sink` untouched.
    pub fn render_to<S, W>(
        &mut self,
        message_filenames: &str,
        message_identifier: u32,
        strings: &S,
        sink: &mut W,
    ) -> Result<bool>
    where
        S: RecordStrings + ?Sized,
        W: Write + ?Sized,
    {
        match self.render(message_filenames, message_identifier, strings)? {
            Some(message) => {
                sink.write_str(&message)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// The unformatted template of message `message_identifier`.
    pub fn message_template(
        &mut self,
        message_filenames: &str,
        message_identifier: u32,
    ) -> Result<Option<String>> {
        self.with_template(message_filenames, message_identifier, |template| {
            Ok(template.as_str().to_string())
        })
    }

    /// Message identifier of `event_identifier` from the `WEVT_TEMPLATE` manifest of provider
    /// `provider_guid`, looked up in the first of `resource_filenames` that defines the event.
    ///
    /// `Ok(None)` when no listed file exists, has a manifest or defines the event. Resource files
    /// share the cache of message files.
    pub fn event_message_identifier(
        &mut self,
        resource_filenames: &str,
        provider_guid: &str,
        event_identifier: u32,
    ) -> Result<Option<u32>> {
        for candidate in resource_filenames.split(';').filter(|c| !c.is_empty()) {
            if self.abort.is_signaled() {
                return Err(Error::Aborted);
            }

            let resolver = &self.resolver;
            let reader = &self.reader;
            let message_identifier = self
                .message_files
                .lookup_or_try_insert_with(candidate, || {
                    open_message_file(reader, candidate, resolver.resolve(candidate)?)
                })
                .and_then(|file| match file {
                    Some(file) => file.event_message_identifier(provider_guid, event_identifier),
                    None => {
                        debug!("Resource file `{candidate}` not found");
                        Ok(None)
                    }
                })
                .map_err(|e| Error::FailedToReadEventDefinition {
                    filename: candidate.to_string(),
                    provider_guid: provider_guid.to_string(),
                    event_identifier,
                    source: Box::new(e),
                })?;

            if message_identifier.is_some() {
                return Ok(message_identifier);
            }
        }

        debug!(
            "Event {event_identifier} of provider {provider_guid} not defined in `{resource_filenames}`"
        );
        Ok(None)
    }

    fn with_template<T>(
        &mut self,
        message_filenames: &str,
        message_identifier: u32,
        mut f: impl FnMut(MessageTemplate<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        for candidate in message_filenames.split(';').filter(|c| !c.is_empty()) {
            if self.abort.is_signaled() {
                return Err(Error::Aborted);
            }

            let result = self
                .with_candidate_template(candidate, message_identifier, &mut f)
                .map_err(|e| match e {
                    Error::Aborted | Error::Output => e,
                    e => Error::FailedToRenderMessage {
                        filename: candidate.to_string(),
                        message_identifier,
                        source: Box::new(e),
                    },
                })?;

            if result.is_some() {
                return Ok(result);
            }
        }

        debug!("Message 0x{message_identifier:08x} not found in `{message_filenames}`");
        Ok(None)
    }

    fn with_candidate_template<T>(
        &mut self,
        candidate: &str,
        message_identifier: u32,
        f: &mut impl FnMut(MessageTemplate<'_>) -> Result<T>,
    ) -> Result<Option<T>> {
        let preferred_language = self.settings.preferred_language;
        let ansi_codec = self.settings.ansi_codec;
        let resolver = &self.resolver;
        let reader = &self.reader;

        let Some(file) = self
            .message_files
            .lookup_or_try_insert_with(candidate, || {
                open_message_file(reader, candidate, resolver.resolve(candidate)?)
            })?
        else {
            debug!("Message file `{candidate}` not found");
            return Ok(None);
        };

        if let Some(template) =
            file.message_template(preferred_language, message_identifier, ansi_codec)?
        {
            return f(template).map(Some);
        }

        match file.mui_resource()? {
            None => return Ok(None),
            Some(mui) if !mui.is_language_neutral_main() => debug!(
                "`{candidate}` has unsupported MUI file type 0x{:08x}, trying its satellite anyway",
                mui.file_type
            ),
            Some(_) => {}
        }

        let Some(mui_file) = self
            .mui_message_files
            .lookup_or_try_insert_with(candidate, || {
                open_message_file(
                    reader,
                    candidate,
                    resolver.resolve_mui(candidate, DEFAULT_MUI_LANGUAGE)?,
                )
            })?
        else {
            debug!("MUI satellite of `{candidate}` not found");
            return Ok(None);
        };

        match mui_file.message_template(preferred_language, message_identifier, ansi_codec)? {
            Some(template) => f(template).map(Some),
            None => Ok(None),
        }
    }
}

impl<R: ResourceReader> Debug for MessageHandle<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageHandle")
            .field("settings", &self.settings)
            .field("resolver", &self.resolver)
            .field("message_files", &self.message_files.len())
            .field("mui_message_files", &self.mui_message_files.len())
            .finish()
    }
}
