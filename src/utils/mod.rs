pub(crate) mod bytes;
mod strings;

pub(crate) use self::strings::{decode_ansi_bytes_z, decode_utf16le_bytes_z};
