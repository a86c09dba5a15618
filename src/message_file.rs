use crate::err::{Error, Result};
use crate::message_table::{MessageTable, MessageTables};
use crate::mui::MuiResource;
use crate::pe_resources::{
    PeResourceContainer, RT_MESSAGETABLE, ResourceError, ResourceIdentifier, WEVT_TEMPLATE,
};
use crate::template::MessageTemplate;
use crate::wevt_manifest::WevtManifest;

use encoding::EncodingRef;
use log::debug;
use std::fmt::Debug;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Read access to the resources of an opened message resource file.
pub trait ResourceContainer: Debug {
    /// All `RT_MESSAGETABLE` resources, `None` when the file has none.
    fn message_tables(&self, ansi_codec: EncodingRef)
    -> std::result::Result<Option<MessageTables>, ResourceError>;

    /// The `MUI` resource, `None` when the file has none.
    fn mui_resource(&self) -> std::result::Result<Option<MuiResource>, ResourceError>;

    /// The `WEVT_TEMPLATE` manifest, `None` when the file has none.
    fn wevt_manifest(&self) -> std::result::Result<Option<WevtManifest>, ResourceError> {
        Ok(None)
    }
}

/// Opens message resource files.
pub trait ResourceReader {
    fn open(&self, path: &Path) -> std::result::Result<Box<dyn ResourceContainer>, ResourceError>;
}

/// Reads resources out of PE images.
#[derive(Debug, Default, Copy, Clone)]
pub struct PeResourceReader;

impl ResourceReader for PeResourceReader {
    fn open(&self, path: &Path) -> std::result::Result<Box<dyn ResourceContainer>, ResourceError> {
        Ok(Box::new(PeResourceContainer::open(path)?))
    }
}

impl ResourceContainer for PeResourceContainer {
    fn message_tables(
        &self,
        ansi_codec: EncodingRef,
    ) -> std::result::Result<Option<MessageTables>, ResourceError> {
        let resources = self.resources_by_type(&ResourceIdentifier::Id(RT_MESSAGETABLE))?;
        if resources.is_empty() {
            return Ok(None);
        }

        let mut tables = MessageTables::new();
        for resource in resources {
            tables.push(
                resource.lang_id,
                MessageTable::parse(&resource.data, ansi_codec)?,
            );
        }
        Ok(Some(tables))
    }

    fn mui_resource(&self) -> std::result::Result<Option<MuiResource>, ResourceError> {
        let resources = self.resources_by_type(&ResourceIdentifier::Name("MUI".to_string()))?;
        match resources.first() {
            Some(resource) => Ok(Some(MuiResource::parse(&resource.data)?)),
            None => Ok(None),
        }
    }

    fn wevt_manifest(&self) -> std::result::Result<Option<WevtManifest>, ResourceError> {
        let resources =
            self.resources_by_type(&ResourceIdentifier::Name(WEVT_TEMPLATE.to_string()))?;
        match resources.first() {
            Some(resource) => Ok(Some(WevtManifest::parse(&resource.data)?)),
            None => Ok(None),
        }
    }
}

/// A resource decoded on first use. Failures are kept too, so a corrupt resource is parsed once.
type Loaded<T> = Option<std::result::Result<T, Arc<ResourceError>>>;

fn load<'a, T>(
    slot: &'a mut Loaded<T>,
    path: &Path,
    read: impl FnOnce() -> std::result::Result<T, ResourceError>,
) -> Result<&'a T> {
    match slot.get_or_insert_with(|| read().map_err(Arc::new)) {
        Ok(value) => Ok(value),
        Err(e) => Err(Error::Resource {
            path: path.to_path_buf(),
            source: ResourceError::Previous(Arc::clone(e)),
        }),
    }
}

/// An opened message resource file.
///
/// Each resource is decoded on the first lookup and kept, or its failure is, for the lifetime of
/// the file.
#[derive(Debug)]
pub struct MessageFile {
    name: String,
    path: PathBuf,
    container: Box<dyn ResourceContainer>,
    message_tables: Loaded<MessageTables>,
    mui_resource: Loaded<Option<MuiResource>>,
    wevt_manifest: Loaded<Option<WevtManifest>>,
}

impl MessageFile {
    pub fn open<R: ResourceReader + ?Sized>(
        reader: &R,
        name: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self> {
        let path = path.into();
        let container = reader.open(&path).map_err(|source| Error::Resource {
            path: path.clone(),
            source,
        })?;

        Ok(MessageFile {
            name: name.into(),
            path,
            container,
            message_tables: None,
            mui_resource: None,
            wevt_manifest: None,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tables(&mut self, ansi_codec: EncodingRef) -> Result<&MessageTables> {
        let container = &self.container;
        let path = &self.path;

        load(&mut self.message_tables, path, || {
            let tables = container.message_tables(ansi_codec)?.unwrap_or_default();
            debug!(
                "Loaded message tables of `{}` ({} languages)",
                path.display(),
                tables.languages().count()
            );
            Ok(tables)
        })
    }

    /// Template of `message_identifier` in the language closest to `preferred_lang`.
    pub fn message_template(
        &mut self,
        preferred_lang: u32,
        message_identifier: u32,
        ansi_codec: EncodingRef,
    ) -> Result<Option<MessageTemplate<'_>>> {
        Ok(self
            .tables(ansi_codec)?
            .lookup(preferred_lang, message_identifier)
            .map(MessageTemplate::new))
    }

    pub fn mui_resource(&mut self) -> Result<Option<&MuiResource>> {
        let container = &self.container;
        load(&mut self.mui_resource, &self.path, || container.mui_resource())
            .map(Option::as_ref)
    }

    pub fn wevt_manifest(&mut self) -> Result<Option<&WevtManifest>> {
        let container = &self.container;
        load(&mut self.wevt_manifest, &self.path, || container.wevt_manifest())
            .map(Option::as_ref)
    }

    /// Message identifier of `event_identifier` in the manifest of provider `provider_guid`.
    pub fn event_message_identifier(
        &mut self,
        provider_guid: &str,
        event_identifier: u32,
    ) -> Result<Option<u32>> {
        Ok(self
            .wevt_manifest()?
            .and_then(|manifest| manifest.event_message_identifier(provider_guid, event_identifier)))
    }
}
