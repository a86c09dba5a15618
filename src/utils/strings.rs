use encoding::DecoderTrap;
use encoding::types::EncodingRef;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum Utf16LeDecodeError {
    OddLength,
    InvalidData,
}

/// Decode a UTF-16LE byte slice until the first NUL (0x0000), if present.
pub(crate) fn decode_utf16le_bytes_z(bytes: &[u8]) -> Result<String, Utf16LeDecodeError> {
    if !bytes.len().is_multiple_of(2) {
        return Err(Utf16LeDecodeError::OddLength);
    }

    let mut units = Vec::with_capacity(bytes.len() / 2);
    for chunk in bytes.chunks_exact(2) {
        units.push(u16::from_le_bytes([chunk[0], chunk[1]]));
    }

    let end = units.iter().position(|&c| c == 0).unwrap_or(units.len());
    String::from_utf16(&units[..end]).map_err(|_| Utf16LeDecodeError::InvalidData)
}

/// Decode an ANSI (codepage) byte slice until the first NUL byte, if present.
///
/// Undecodable bytes are replaced rather than failing the whole string, since message text is
/// only ever displayed.
pub(crate) fn decode_ansi_bytes_z(bytes: &[u8], ansi_codec: EncodingRef) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    ansi_codec
        .decode(&bytes[..end], DecoderTrap::Replace)
        .unwrap_or_else(|_| String::from_utf8_lossy(&bytes[..end]).into_owned())
}
