//! Event definitions of `WEVT_TEMPLATE` instrumentation manifests.
//!
//! Manifest-based providers do not use `(qualifiers << 16) | event_id` as the message identifier
//! of an event. The identifier is stored in the `CRIM` manifest embedded in the provider's
//! resource file:
//!
//! - `CRIM` header, followed by provider descriptors (GUID, offset of a `WEVT` provider);
//! - `WEVT` provider header, followed by element descriptors (offset, unknown);
//! - the `EVNT` element, holding fixed-size event definitions.
//!
//! Offsets are relative to the start of the `CRIM` blob. Only the fields needed to map an event
//! identifier to its message identifier are read; templates, channels, keywords and the other
//! elements are skipped.

use crate::pe_resources::ResourceError;
use crate::utils::bytes;

use log::trace;
use winstructs::guid::Guid;

const CRIM_HEADER_SIZE: usize = 16;
const PROVIDER_DESCRIPTOR_SIZE: usize = 20;
const WEVT_HEADER_SIZE: usize = 20;
const ELEMENT_DESCRIPTOR_SIZE: usize = 8;
const EVNT_HEADER_SIZE: usize = 16;
const EVENT_DEFINITION_SIZE: usize = 48;

/// Message identifier of events without a message.
const NO_MESSAGE: u32 = 0xffff_ffff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventDefinition {
    pub identifier: u16,
    pub version: u8,
    /// `None` when the event has no message.
    pub message_identifier: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestProvider {
    /// Normalized with [`normalize_guid`].
    pub guid: String,
    pub events: Vec<EventDefinition>,
}

/// The providers of a `WEVT_TEMPLATE` resource and their event definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WevtManifest {
    providers: Vec<ManifestProvider>,
}

/// Lowercase, without braces, so `{FC65DDD8-...}` and `fc65ddd8-...` compare equal.
pub fn normalize_guid(guid: &str) -> String {
    guid.trim()
        .trim_start_matches('{')
        .trim_end_matches('}')
        .to_ascii_lowercase()
}

fn malformed(message: &'static str, offset: usize) -> ResourceError {
    ResourceError::MalformedManifest { message, offset }
}

fn read_u32(data: &[u8], offset: usize, what: &'static str) -> Result<usize, ResourceError> {
    bytes::read_u32_le(data, offset)
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| malformed(what, offset))
}

fn expect_signature(
    data: &[u8],
    offset: usize,
    signature: &[u8; 4],
    what: &'static str,
) -> Result<(), ResourceError> {
    match bytes::read_sig(data, offset) {
        Some(found) if found == *signature => Ok(()),
        _ => Err(malformed(what, offset)),
    }
}

/// Offset of entry `index` of an array of `size`-byte entries starting at `base`.
fn entry_offset(base: usize, index: usize, size: usize) -> Option<usize> {
    index.checked_mul(size)?.checked_add(base)
}

impl WevtManifest {
    pub fn parse(data: &[u8]) -> Result<Self, ResourceError> {
        expect_signature(data, 0, b"CRIM", "missing CRIM signature")?;

        let size = read_u32(data, 4, "truncated CRIM header")?;
        if !(CRIM_HEADER_SIZE..=data.len()).contains(&size) {
            return Err(malformed("CRIM size out of bounds", 4));
        }
        let data = &data[..size];

        let provider_count = read_u32(data, 12, "truncated CRIM header")?;

        let mut providers = Vec::new();
        for index in 0..provider_count {
            let descriptor = entry_offset(CRIM_HEADER_SIZE, index, PROVIDER_DESCRIPTOR_SIZE)
                .ok_or_else(|| malformed("provider count out of bounds", 12))?;

            let guid_bytes = bytes::slice(data, descriptor, 16)
                .ok_or_else(|| malformed("truncated provider descriptor", descriptor))?;
            let guid = Guid::from_buffer(guid_bytes)
                .map_err(|_| malformed("invalid provider GUID", descriptor))?;
            let provider_offset =
                read_u32(data, descriptor + 16, "truncated provider descriptor")?;

            let events = parse_provider_events(data, provider_offset)?;
            trace!("Provider {guid} has {} event definitions", events.len());

            providers.push(ManifestProvider {
                guid: normalize_guid(&guid.to_string()),
                events,
            });
        }

        Ok(WevtManifest { providers })
    }

    pub fn providers(&self) -> &[ManifestProvider] {
        &self.providers
    }

    pub fn provider(&self, guid: &str) -> Option<&ManifestProvider> {
        let guid = normalize_guid(guid);
        self.providers.iter().find(|provider| provider.guid == guid)
    }

    /// Message identifier of the first definition of `event_identifier` by `provider_guid`.
    pub fn event_message_identifier(&self, provider_guid: &str, event_identifier: u32) -> Option<u32> {
        let identifier = u16::try_from(event_identifier).ok()?;

        self.provider(provider_guid)?
            .events
            .iter()
            .find(|event| event.identifier == identifier)?
            .message_identifier
    }
}

impl FromIterator<ManifestProvider> for WevtManifest {
    fn from_iter<I: IntoIterator<Item = ManifestProvider>>(iter: I) -> Self {
        WevtManifest {
            providers: iter.into_iter().collect(),
        }
    }
}

fn parse_provider_events(data: &[u8], offset: usize) -> Result<Vec<EventDefinition>, ResourceError> {
    expect_signature(data, offset, b"WEVT", "missing WEVT signature")?;
    let descriptor_count = read_u32(data, offset + 12, "truncated WEVT header")?;

    let mut events = Vec::new();
    for index in 0..descriptor_count {
        let descriptor = offset
            .checked_add(WEVT_HEADER_SIZE)
            .and_then(|base| entry_offset(base, index, ELEMENT_DESCRIPTOR_SIZE))
            .ok_or_else(|| malformed("element count out of bounds", offset + 12))?;
        let element_offset = read_u32(data, descriptor, "truncated element descriptor")?;

        match bytes::read_sig(data, element_offset) {
            Some(signature) if &signature == b"EVNT" => {
                events.extend(parse_events(data, element_offset)?);
            }
            Some(_) => {}
            None => return Err(malformed("element offset out of bounds", descriptor)),
        }
    }

    Ok(events)
}

fn parse_events(data: &[u8], offset: usize) -> Result<Vec<EventDefinition>, ResourceError> {
    let count = read_u32(data, offset + 8, "truncated EVNT header")?;

    let mut events = Vec::new();
    for index in 0..count {
        let event_offset = offset
            .checked_add(EVNT_HEADER_SIZE)
            .and_then(|base| entry_offset(base, index, EVENT_DEFINITION_SIZE))
            .ok_or_else(|| malformed("event count out of bounds", offset + 8))?;
        let definition = bytes::read_array::<EVENT_DEFINITION_SIZE>(data, event_offset)
            .ok_or_else(|| malformed("truncated event definition", event_offset))?;

        let message_identifier =
            u32::from_le_bytes([definition[16], definition[17], definition[18], definition[19]]);

        events.push(EventDefinition {
            identifier: u16::from_le_bytes([definition[0], definition[1]]),
            version: definition[2],
            message_identifier: (message_identifier != NO_MESSAGE).then_some(message_identifier),
        });
    }

    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const EVENTLOG_GUID: [u8; 16] = [
        0xd8, 0xdd, 0x65, 0xfc, 0xef, 0xd6, 0x62, 0x49, 0x83, 0xd5, 0x6e, 0x5c, 0xfe, 0x9c, 0xe1,
        0x48,
    ];

    /// One provider with a single `EVNT` element preceded by an element we skip.
    fn manifest(events: &[(u16, u8, u32)]) -> Vec<u8> {
        let wevt = CRIM_HEADER_SIZE + PROVIDER_DESCRIPTOR_SIZE;
        let levl = wevt + WEVT_HEADER_SIZE + 2 * ELEMENT_DESCRIPTOR_SIZE;
        let evnt = levl + 12;
        let size = evnt + EVNT_HEADER_SIZE + events.len() * EVENT_DEFINITION_SIZE;

        let mut data = Vec::new();
        data.extend_from_slice(b"CRIM");
        data.extend_from_slice(&(size as u32).to_le_bytes());
        data.extend_from_slice(&[3, 0, 1, 0]);
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&EVENTLOG_GUID);
        data.extend_from_slice(&(wevt as u32).to_le_bytes());

        data.extend_from_slice(b"WEVT");
        data.extend_from_slice(&((evnt - wevt) as u32).to_le_bytes());
        data.extend_from_slice(&NO_MESSAGE.to_le_bytes());
        data.extend_from_slice(&2u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        for element in [levl, evnt] {
            data.extend_from_slice(&(element as u32).to_le_bytes());
            data.extend_from_slice(&0u32.to_le_bytes());
        }

        data.extend_from_slice(b"LEVL");
        data.extend_from_slice(&12u32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());

        data.extend_from_slice(b"EVNT");
        data.extend_from_slice(&((size - evnt) as u32).to_le_bytes());
        data.extend_from_slice(&(events.len() as u32).to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        for (identifier, version, message_identifier) in events {
            let mut definition = [0u8; EVENT_DEFINITION_SIZE];
            definition[0..2].copy_from_slice(&identifier.to_le_bytes());
            definition[2] = *version;
            definition[16..20].copy_from_slice(&message_identifier.to_le_bytes());
            data.extend_from_slice(&definition);
        }

        assert_eq!(data.len(), size);
        data
    }

    #[test]
    fn maps_event_identifiers_to_message_identifiers() {
        let manifest = WevtManifest::parse(&manifest(&[
            (105, 0, 0xb000_0069),
            (105, 1, 0xb001_0069),
            (1100, 0, 0x8000_044c),
            (4000, 0, NO_MESSAGE),
        ]))
        .unwrap();

        assert_eq!(manifest.providers().len(), 1);
        assert_eq!(
            manifest.providers()[0].guid,
            "fc65ddd8-d6ef-4962-83d5-6e5cfe9ce148"
        );

        let guid = "{FC65DDD8-D6EF-4962-83D5-6E5CFE9CE148}";
        assert_eq!(manifest.event_message_identifier(guid, 105), Some(0xb000_0069));
        assert_eq!(
            manifest.event_message_identifier("fc65ddd8-d6ef-4962-83d5-6e5cfe9ce148", 1100),
            Some(0x8000_044c)
        );
        assert_eq!(manifest.event_message_identifier(guid, 4000), None);
        assert_eq!(manifest.event_message_identifier(guid, 1), None);
        assert_eq!(manifest.event_message_identifier(guid, 0x1_0069), None);
        assert_eq!(
            manifest.event_message_identifier("{00000000-0000-0000-0000-000000000000}", 105),
            None
        );
    }

    #[test]
    fn rejects_truncated_and_foreign_data() {
        let mut data = manifest(&[(105, 0, 0xb000_0069)]);

        let truncated = &data[..data.len() - 4];
        assert!(matches!(
            WevtManifest::parse(truncated),
            Err(ResourceError::MalformedManifest { .. })
        ));

        // Event definition array running past the end of the blob.
        let count_offset = data.len() - EVENT_DEFINITION_SIZE - 8;
        data[count_offset..count_offset + 4].copy_from_slice(&2u32.to_le_bytes());
        assert!(matches!(
            WevtManifest::parse(&data),
            Err(ResourceError::MalformedManifest {
                message: "truncated event definition",
                ..
            })
        ));

        assert!(matches!(
            WevtManifest::parse(b"MZ\x90\x00"),
            Err(ResourceError::MalformedManifest {
                message: "missing CRIM signature",
                ..
            })
        ));
    }
}
