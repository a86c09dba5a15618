//! `MUI` resource configuration.
//!
//! A language-neutral main file carries a `MUI` resource describing where its localized resources
//! live. Only the fields needed to locate the satellite are decoded.

use crate::pe_resources::ResourceError;
use crate::utils::bytes;
use crate::utils::decode_utf16le_bytes_z;

pub const MUI_SIGNATURE: u32 = 0xfecd_fecd;

/// The file is a language-neutral main file; its message tables live in a `.mui` satellite.
pub const MUI_FILE_TYPE_LANGUAGE_NEUTRAL_MAIN: u32 = 0x11;
/// The file is a `.mui` satellite.
pub const MUI_FILE_TYPE_LANGUAGE_SPECIFIC: u32 = 0x12;

const MUI_FILE_TYPE_OFFSET: usize = 16;
const MUI_LANGUAGE_OFFSET: usize = 116;
const MUI_FALLBACK_LANGUAGE_OFFSET: usize = 124;
const MUI_HEADER_SIZE: usize = 132;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuiResource {
    pub file_type: u32,
    pub language: Option<String>,
    pub fallback_language: Option<String>,
}

impl MuiResource {
    pub fn parse(data: &[u8]) -> Result<Self, ResourceError> {
        let signature = bytes::read_u32_le(data, 0).ok_or(ResourceError::MalformedMui {
            message: "missing signature",
        })?;
        if signature != MUI_SIGNATURE {
            return Err(ResourceError::MalformedMui {
                message: "unsupported signature",
            });
        }

        let file_type =
            bytes::read_u32_le(data, MUI_FILE_TYPE_OFFSET).ok_or(ResourceError::MalformedMui {
                message: "missing file type",
            })?;

        // Older resources stop right after the file type; the language names are optional.
        if data.len() < MUI_HEADER_SIZE {
            return Ok(MuiResource {
                file_type,
                language: None,
                fallback_language: None,
            });
        }

        Ok(MuiResource {
            file_type,
            language: language_name(data, MUI_LANGUAGE_OFFSET)?,
            fallback_language: language_name(data, MUI_FALLBACK_LANGUAGE_OFFSET)?,
        })
    }

    pub fn is_language_neutral_main(&self) -> bool {
        self.file_type == MUI_FILE_TYPE_LANGUAGE_NEUTRAL_MAIN
    }
}

/// Read the `(offset, size)` pair at `field_offset` and decode the UTF-16 name it points to.
fn language_name(data: &[u8], field_offset: usize) -> Result<Option<String>, ResourceError> {
    let offset = bytes::read_u32_le(data, field_offset).unwrap_or_default() as usize;
    let size = bytes::read_u32_le(data, field_offset + 4).unwrap_or_default() as usize;
    if offset == 0 || size == 0 {
        return Ok(None);
    }

    let name = bytes::slice(data, offset, size).ok_or(ResourceError::MalformedMui {
        message: "language name out of bounds",
    })?;
    let name = decode_utf16le_bytes_z(name).map_err(|_| ResourceError::MalformedMui {
        message: "invalid UTF-16 language name",
    })?;

    Ok((!name.is_empty()).then_some(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    // `MUI` resource of `fdeploy.dll`.
    const FDEPLOY_MUI: [u8; 240] = [
        205, 254, 205, 254, 240, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0, 0, 17, 0, 0, 0, 0, 0, 0, 0, 2, 0,
        0, 0, 26, 143, 14, 5, 117, 105, 8, 126, 13, 52, 84, 38, 75, 63, 119, 183, 88, 247, 216,
        48, 42, 28, 12, 12, 115, 100, 155, 217, 179, 57, 173, 215, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 136, 0, 0, 0, 42, 0, 0, 0, 184, 0, 0, 0, 4, 0,
        0, 0, 192, 0, 0, 0, 14, 0, 0, 0, 208, 0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 224,
        0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 87, 0, 69, 0, 86, 0, 84, 0, 95, 0, 84, 0, 69, 0, 77, 0,
        80, 0, 76, 0, 65, 0, 84, 0, 69, 0, 0, 0, 77, 0, 85, 0, 73, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        0, 0, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 77, 0, 85, 0, 73, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
        6, 0, 0, 0, 11, 0, 0, 0, 16, 0, 0, 0, 0, 0, 0, 0, 101, 0, 110, 0, 45, 0, 85, 0, 83, 0, 0,
        0, 0, 0, 0, 0,
    ];

    #[test]
    fn parses_language_neutral_main_file() {
        let mui = MuiResource::parse(&FDEPLOY_MUI).unwrap();

        assert!(mui.is_language_neutral_main());
        assert_eq!(mui.language, None);
        assert_eq!(mui.fallback_language.as_deref(), Some("en-US"));
    }

    #[test]
    fn short_resource_only_has_a_file_type() {
        let mui = MuiResource::parse(&FDEPLOY_MUI[..20]).unwrap();
        assert_eq!(mui.file_type, MUI_FILE_TYPE_LANGUAGE_NEUTRAL_MAIN);
        assert_eq!(mui.fallback_language, None);
    }

    #[test]
    fn rejects_bad_signature() {
        let mut data = FDEPLOY_MUI;
        data[0] = 0;
        assert!(matches!(
            MuiResource::parse(&data),
            Err(ResourceError::MalformedMui { .. })
        ));
    }
}
