//! `RT_MESSAGETABLE` resource parsing.
//!
//! Layout (little-endian):
//!
//! ```text
//! MESSAGE_RESOURCE_DATA   { u32 NumberOfBlocks; MESSAGE_RESOURCE_BLOCK Blocks[]; }
//! MESSAGE_RESOURCE_BLOCK  { u32 LowId; u32 HighId; u32 OffsetToEntries; }
//! MESSAGE_RESOURCE_ENTRY  { u16 Length; u16 Flags; u8 Text[Length - 4]; }
//! ```
//!
//! `HighId` is inclusive and `OffsetToEntries` is relative to the start of the resource.

use crate::pe_resources::ResourceError;
use crate::utils::bytes;
use crate::utils::{decode_ansi_bytes_z, decode_utf16le_bytes_z};

use encoding::EncodingRef;
use hashbrown::HashMap;
use log::trace;

const MESSAGE_RESOURCE_BLOCK_SIZE: usize = 12;
const MESSAGE_RESOURCE_ENTRY_HEADER_SIZE: usize = 4;

const MESSAGE_RESOURCE_ANSI: u16 = 0x0000;
const MESSAGE_RESOURCE_UNICODE: u16 = 0x0001;
const MESSAGE_RESOURCE_UTF8: u16 = 0x0002;

/// Mask of the primary language part of a Windows language identifier.
pub const PRIMARY_LANGUAGE_MASK: u32 = 0x03ff;

/// The decoded message strings of a single language.
#[derive(Debug, Default, Clone)]
pub struct MessageTable {
    messages: HashMap<u32, String>,
}

impl MessageTable {
    /// Decode one `RT_MESSAGETABLE` resource blob.
    ///
    /// ANSI entries are decoded with `ansi_codec`.
    pub fn parse(data: &[u8], ansi_codec: EncodingRef) -> Result<Self, ResourceError> {
        let number_of_blocks =
            bytes::read_u32_le(data, 0).ok_or(ResourceError::MalformedMessageTable {
                message: "missing number of blocks",
            })? as usize;

        let mut messages = HashMap::new();

        for block_index in 0..number_of_blocks {
            let block_offset = 4 + block_index * MESSAGE_RESOURCE_BLOCK_SIZE;
            let block = bytes::slice(data, block_offset, MESSAGE_RESOURCE_BLOCK_SIZE).ok_or(
                ResourceError::MalformedMessageTable {
                    message: "message block out of bounds",
                },
            )?;

            let low_id = bytes::read_u32_le(block, 0).unwrap_or_default();
            let high_id = bytes::read_u32_le(block, 4).unwrap_or_default();
            let mut entry_offset = bytes::read_u32_le(block, 8).unwrap_or_default() as usize;

            if high_id < low_id {
                return Err(ResourceError::MalformedMessageTable {
                    message: "message block high identifier precedes low identifier",
                });
            }

            trace!(
                "message block {block_index}: 0x{low_id:08x}..=0x{high_id:08x} at offset {entry_offset}"
            );

            for identifier in low_id..=high_id {
                let header = bytes::slice(data, entry_offset, MESSAGE_RESOURCE_ENTRY_HEADER_SIZE)
                    .ok_or(ResourceError::MalformedMessageTable {
                        message: "message entry header out of bounds",
                    })?;
                let length = bytes::read_u16_le(header, 0).unwrap_or_default() as usize;
                let flags = bytes::read_u16_le(header, 2).unwrap_or_default();

                if length < MESSAGE_RESOURCE_ENTRY_HEADER_SIZE {
                    return Err(ResourceError::MalformedMessageTable {
                        message: "message entry length smaller than its header",
                    });
                }

                let text = bytes::slice(
                    data,
                    entry_offset + MESSAGE_RESOURCE_ENTRY_HEADER_SIZE,
                    length - MESSAGE_RESOURCE_ENTRY_HEADER_SIZE,
                )
                .ok_or(ResourceError::MalformedMessageTable {
                    message: "message entry text out of bounds",
                })?;

                let decoded = match flags {
                    MESSAGE_RESOURCE_ANSI => decode_ansi_bytes_z(text, ansi_codec),
                    MESSAGE_RESOURCE_UNICODE => decode_utf16le_bytes_z(text).map_err(|_| {
                        ResourceError::MalformedMessageTable {
                            message: "invalid UTF-16 message text",
                        }
                    })?,
                    MESSAGE_RESOURCE_UTF8 => {
                        let end = text.iter().position(|&b| b == 0).unwrap_or(text.len());
                        String::from_utf8_lossy(&text[..end]).into_owned()
                    }
                    _ => {
                        return Err(ResourceError::MalformedMessageTable {
                            message: "unsupported message entry flags",
                        });
                    }
                };

                messages.insert(identifier, decoded);
                entry_offset += length;
            }
        }

        Ok(MessageTable { messages })
    }

    pub fn get(&self, message_identifier: u32) -> Option<&str> {
        self.messages.get(&message_identifier).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(u32, S)> for MessageTable {
    fn from_iter<I: IntoIterator<Item = (u32, S)>>(iter: I) -> Self {
        MessageTable {
            messages: iter
                .into_iter()
                .map(|(identifier, text)| (identifier, text.into()))
                .collect(),
        }
    }
}

/// The message tables of one resource file, one per language it carries.
#[derive(Debug, Default, Clone)]
pub struct MessageTables {
    /// In resource directory order.
    languages: Vec<(u32, MessageTable)>,
}

impl MessageTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, lang_id: u32, table: MessageTable) {
        self.languages.push((lang_id, table));
    }

    pub fn is_empty(&self) -> bool {
        self.languages.is_empty()
    }

    pub fn languages(&self) -> impl Iterator<Item = u32> + '_ {
        self.languages.iter().map(|(lang_id, _)| *lang_id)
    }

    /// Select the table for `preferred_lang`.
    ///
    /// Exact language identifier first, then the first table with the same primary language,
    /// then the first table of the file.
    pub fn table_for_language(&self, preferred_lang: u32) -> Option<&MessageTable> {
        self.languages
            .iter()
            .find(|(lang_id, _)| *lang_id == preferred_lang)
            .or_else(|| {
                self.languages.iter().find(|(lang_id, _)| {
                    lang_id & PRIMARY_LANGUAGE_MASK == preferred_lang & PRIMARY_LANGUAGE_MASK
                })
            })
            .or_else(|| self.languages.first())
            .map(|(_, table)| table)
    }

    pub fn lookup(&self, preferred_lang: u32, message_identifier: u32) -> Option<&str> {
        self.table_for_language(preferred_lang)?
            .get(message_identifier)
    }
}
