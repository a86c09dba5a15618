//! PE resource access for message resource files (via `goblin`).
//!
//! Message tables (`RT_MESSAGETABLE`) and MUI configuration (`MUI`) are stored as PE resources of
//! the DLL/EXE named by the registry. We use `goblin` for the PE header and section table and walk
//! the resource directory tree ourselves, bounds-checking every read.
//!
//! References:
//! - Microsoft PE/COFF specification (resource directory layout)

use crate::utils::bytes;

use goblin::pe::header;
use goblin::pe::options::ParseOptions;
use goblin::pe::resource::{ImageResourceDirectory, ResourceDataEntry, ResourceEntry};
use goblin::pe::section_table::SectionTable;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

const IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE: usize = 16;
const RESOURCE_DATA_ENTRY_SIZE: usize = 16;

/// `RT_MESSAGETABLE`
pub const RT_MESSAGETABLE: u32 = 11;

/// Name of the resource type holding the instrumentation manifest of a provider.
pub const WEVT_TEMPLATE: &str = "WEVT_TEMPLATE";

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("input is not a valid PE file: {message}")]
    InvalidPe { message: &'static str },

    #[error("malformed PE file: {message}")]
    MalformedPe { message: &'static str },

    #[error("failed to map RVA 0x{rva:08x} to a file offset")]
    UnmappedRva { rva: u32 },

    #[error("resource directory is malformed: {message}")]
    MalformedResource { message: &'static str },

    #[error("failed to decode UTF-16 resource name")]
    InvalidResourceName,

    #[error("message table is malformed: {message}")]
    MalformedMessageTable { message: &'static str },

    #[error("MUI resource is malformed: {message}")]
    MalformedMui { message: &'static str },

    #[error("WEVT_TEMPLATE manifest is malformed: {message} (offset {offset})")]
    MalformedManifest {
        message: &'static str,
        offset: usize,
    },

    /// A failed resource read, shared by every later lookup of the same resource.
    #[error(transparent)]
    Previous(Arc<ResourceError>),

    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ResourceIdentifier {
    Id(u32),
    Name(String),
}

impl ResourceIdentifier {
    fn matches(&self, other: &ResourceIdentifier) -> bool {
        match (self, other) {
            (ResourceIdentifier::Id(a), ResourceIdentifier::Id(b)) => a == b,
            // Resource type names are matched ignoring case, like `FindResource` does.
            (ResourceIdentifier::Name(a), ResourceIdentifier::Name(b)) => a.eq_ignore_ascii_case(b),
            _ => false,
        }
    }
}

/// One leaf of the resource tree: `type / name / language`.
#[derive(Debug, Clone)]
pub struct ResourceData {
    /// The second-level entry under the resource type (usually `1`).
    pub resource: ResourceIdentifier,
    /// Language identifier associated with this resource data.
    pub lang_id: u32,
    /// Raw resource bytes.
    pub data: Vec<u8>,
}

fn rva_to_file_offset(
    sections: &[SectionTable],
    file_alignment: u32,
    opts: &ParseOptions,
    rva: u32,
) -> Option<usize> {
    goblin::pe::utils::find_offset(rva as usize, sections, file_alignment, opts)
}

fn parse_image_resource_directory(
    rsrc: &[u8],
    offset: usize,
) -> Result<ImageResourceDirectory, ResourceError> {
    let header = bytes::slice(rsrc, offset, IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE).ok_or(
        ResourceError::MalformedResource {
            message: "resource directory header out of bounds",
        },
    )?;

    // The header slice is exactly 16 bytes, so the field reads below cannot fail.
    let u16_at = |off| bytes::read_u16_le(header, off).unwrap_or_default();
    let u32_at = |off| bytes::read_u32_le(header, off).unwrap_or_default();

    Ok(ImageResourceDirectory {
        characteristics: u32_at(0),
        time_date_stamp: u32_at(4),
        major_version: u16_at(8),
        minor_version: u16_at(10),
        number_of_named_entries: u16_at(12),
        number_of_id_entries: u16_at(14),
    })
}

fn parse_resource_name(rsrc: &[u8], offset: usize) -> Result<String, ResourceError> {
    let char_count =
        bytes::read_u16_le(rsrc, offset).ok_or(ResourceError::MalformedResource {
            message: "resource name length out of bounds",
        })? as usize;

    let buf = bytes::slice(rsrc, offset + 2, char_count * 2).ok_or(
        ResourceError::MalformedResource {
            message: "resource name out of bounds",
        },
    )?;

    let chars: Vec<u16> = buf
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .collect();

    String::from_utf16(&chars).map_err(|_| ResourceError::InvalidResourceName)
}

fn entry_identifier(entry: &ResourceEntry, rsrc: &[u8]) -> Result<ResourceIdentifier, ResourceError> {
    if entry.name_is_string() {
        Ok(ResourceIdentifier::Name(parse_resource_name(
            rsrc,
            entry.name_offset() as usize,
        )?))
    } else {
        Ok(ResourceIdentifier::Id(entry.name_offset()))
    }
}

fn directory_entries(rsrc: &[u8], dir_offset: usize) -> Result<Vec<ResourceEntry>, ResourceError> {
    let dir = parse_image_resource_directory(rsrc, dir_offset)?;
    let entries_offset = dir_offset
        .checked_add(IMAGE_RESOURCE_DIRECTORY_HEADER_SIZE)
        .ok_or(ResourceError::MalformedResource {
            message: "resource directory entries offset overflow",
        })?;

    let it = dir
        .next_iter(entries_offset, rsrc)
        .map_err(|_| ResourceError::MalformedResource {
            message: "resource directory entries out of bounds",
        })?;

    it.collect::<Result<Vec<_>, _>>()
        .map_err(|_| ResourceError::MalformedResource {
            message: "failed to parse resource directory entries",
        })
}

fn parse_resource_data_entry(rsrc: &[u8], offset: usize) -> Result<ResourceDataEntry, ResourceError> {
    let entry = bytes::slice(rsrc, offset, RESOURCE_DATA_ENTRY_SIZE).ok_or(
        ResourceError::MalformedResource {
            message: "resource data entry out of bounds",
        },
    )?;
    let u32_at = |off| bytes::read_u32_le(entry, off).unwrap_or_default();

    Ok(ResourceDataEntry {
        offset_to_data: u32_at(0),
        size: u32_at(4),
        code_page: u32_at(8),
        reserved: u32_at(12),
    })
}

/// An opened PE image with a located resource section.
///
/// Only the header, the section table and the resource directory are interpreted; the resource
/// bytes themselves are copied out on request.
#[derive(Debug)]
pub struct PeResourceContainer {
    bytes: Vec<u8>,
    sections: Vec<SectionTable>,
    file_alignment: u32,
    /// File range of the resource directory, `None` when the image has no resources.
    rsrc: Option<(usize, usize)>,
}

impl PeResourceContainer {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ResourceError> {
        let bytes = fs::read(path.as_ref())?;
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ResourceError> {
        // `PE::parse` eagerly parses every data directory and hard-fails on images that are
        // "valid enough" for resource access (stripped or synthetic files). The header and the
        // section table are all we need.
        let header = header::Header::parse(&bytes).map_err(|_| ResourceError::InvalidPe {
            message: "failed to parse PE via goblin",
        })?;

        let Some(optional_header) = header.optional_header else {
            return Err(ResourceError::InvalidPe {
                message: "missing optional header",
            });
        };

        let file_alignment = optional_header.windows_fields.file_alignment;

        let optional_header_offset = header.dos_header.pe_pointer as usize
            + header::SIZEOF_PE_MAGIC
            + header::SIZEOF_COFF_HEADER;
        let mut sections_offset =
            optional_header_offset + header.coff_header.size_of_optional_header as usize;
        let sections = header
            .coff_header
            .sections(&bytes, &mut sections_offset)
            .map_err(|_| ResourceError::MalformedPe {
                message: "failed to parse section headers",
            })?;

        let rsrc = match optional_header.data_directories.get_resource_table() {
            Some(table) if table.virtual_address != 0 && table.size != 0 => {
                let opts = ParseOptions::default();
                let start =
                    rva_to_file_offset(&sections, file_alignment, &opts, table.virtual_address)
                        .ok_or(ResourceError::UnmappedRva {
                            rva: table.virtual_address,
                        })?;
                let end = start.checked_add(table.size as usize).ok_or(
                    ResourceError::MalformedPe {
                        message: "resource directory overflow",
                    },
                )?;
                if end > bytes.len() {
                    return Err(ResourceError::MalformedPe {
                        message: "resource directory out of bounds",
                    });
                }
                Some((start, end))
            }
            _ => None,
        };

        Ok(PeResourceContainer {
            bytes,
            sections,
            file_alignment,
            rsrc,
        })
    }

    pub fn has_resources(&self) -> bool {
        self.rsrc.is_some()
    }

    /// Collect every `name / language` leaf stored under the resource type `resource_type`.
    ///
    /// Returns an empty vector if the image has no resources or no resources of that type.
    pub fn resources_by_type(
        &self,
        resource_type: &ResourceIdentifier,
    ) -> Result<Vec<ResourceData>, ResourceError> {
        let Some((rsrc_start, rsrc_end)) = self.rsrc else {
            return Ok(Vec::new());
        };
        let rsrc = &self.bytes[rsrc_start..rsrc_end];

        let mut type_entry = None;
        for entry in directory_entries(rsrc, 0)? {
            if entry_identifier(&entry, rsrc)?.matches(resource_type) {
                type_entry = Some(entry);
                break;
            }
        }

        let Some(type_entry) = type_entry else {
            return Ok(Vec::new());
        };
        if !type_entry.data_is_directory() {
            return Ok(Vec::new());
        }

        let opts = ParseOptions::default();
        let mut out = Vec::new();

        let type_dir_offset = type_entry.offset_to_directory() as usize;
        for resource_entry in directory_entries(rsrc, type_dir_offset)? {
            if !resource_entry.data_is_directory() {
                continue;
            }
            let resource_id = entry_identifier(&resource_entry, rsrc)?;

            let lang_dir_offset = resource_entry.offset_to_directory() as usize;
            for lang_entry in directory_entries(rsrc, lang_dir_offset)? {
                if lang_entry.name_is_string() {
                    continue;
                }
                let lang_id = lang_entry.name_offset();

                let Some(data_entry_offset) = lang_entry.offset_to_data() else {
                    continue;
                };
                let data_entry = parse_resource_data_entry(rsrc, data_entry_offset as usize)?;
                let data_rva = data_entry.offset_to_data;
                let data_size = data_entry.size as usize;
                if data_size == 0 {
                    continue;
                }

                let data_offset =
                    rva_to_file_offset(&self.sections, self.file_alignment, &opts, data_rva)
                        .ok_or(ResourceError::UnmappedRva { rva: data_rva })?;

                let data = bytes::slice(&self.bytes, data_offset, data_size)
                    .ok_or(ResourceError::MalformedPe {
                        message: "resource data out of bounds",
                    })?
                    .to_vec();

                out.push(ResourceData {
                    resource: resource_id.clone(),
                    lang_id,
                    data,
                });
            }
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_pe_input() {
        let err = PeResourceContainer::from_bytes(b"not a portable executable".to_vec())
            .expect_err("garbage must not parse");
        assert!(matches!(err, ResourceError::InvalidPe { .. }));
    }

    #[test]
    fn resource_type_names_match_ignoring_case() {
        let mui = ResourceIdentifier::Name("MUI".to_string());
        assert!(ResourceIdentifier::Name("mui".to_string()).matches(&mui));
        assert!(!ResourceIdentifier::Id(11).matches(&mui));
        assert!(ResourceIdentifier::Id(11).matches(&ResourceIdentifier::Id(RT_MESSAGETABLE)));
    }
}
