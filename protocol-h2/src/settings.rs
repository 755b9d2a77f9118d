//! SETTINGS parameters (RFC 9113 Section 6.5).

use bytes::{Buf, BufMut};

use crate::error::H2Error;

/// Largest legal flow-control window (2^31 - 1).
pub const MAX_WINDOW_SIZE: u32 = 0x7fff_ffff;
/// Default and minimum SETTINGS_MAX_FRAME_SIZE.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16_384;
/// Upper bound for SETTINGS_MAX_FRAME_SIZE.
pub const MAX_MAX_FRAME_SIZE: u32 = 16_777_215;
/// Default SETTINGS_INITIAL_WINDOW_SIZE.
pub const DEFAULT_INITIAL_WINDOW_SIZE: u32 = 65_535;

/// Identifier of a single SETTINGS parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingId {
    HeaderTableSize,
    EnablePush,
    MaxConcurrentStreams,
    InitialWindowSize,
    MaxFrameSize,
    MaxHeaderListSize,
    /// Unknown identifiers are carried so they can be ignored explicitly.
    Unknown(u16),
}

impl SettingId {
    pub fn from_u16(id: u16) -> Self {
        match id {
            0x1 => Self::HeaderTableSize,
            0x2 => Self::EnablePush,
            0x3 => Self::MaxConcurrentStreams,
            0x4 => Self::InitialWindowSize,
            0x5 => Self::MaxFrameSize,
            0x6 => Self::MaxHeaderListSize,
            other => Self::Unknown(other),
        }
    }

    pub fn as_u16(self) -> u16 {
        match self {
            Self::HeaderTableSize => 0x1,
            Self::EnablePush => 0x2,
            Self::MaxConcurrentStreams => 0x3,
            Self::InitialWindowSize => 0x4,
            Self::MaxFrameSize => 0x5,
            Self::MaxHeaderListSize => 0x6,
            Self::Unknown(id) => id,
        }
    }
}

/// One `(identifier, value)` entry of a SETTINGS frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Setting {
    pub id: SettingId,
    pub value: u32,
}

impl Setting {
    pub fn new(id: SettingId, value: u32) -> Self {
        Self { id, value }
    }

    pub fn max_concurrent_streams(value: u32) -> Self {
        Self::new(SettingId::MaxConcurrentStreams, value)
    }

    pub fn initial_window_size(value: u32) -> Self {
        Self::new(SettingId::InitialWindowSize, value)
    }

    pub fn enable_push(enabled: bool) -> Self {
        Self::new(SettingId::EnablePush, u32::from(enabled))
    }
}

/// Encode entries as consecutive 6-byte `(u16 id, u32 value)` pairs.
pub fn encode_entries(entries: &[Setting], buf: &mut impl BufMut) {
    for entry in entries {
        buf.put_u16(entry.id.as_u16());
        buf.put_u32(entry.value);
    }
}

/// Decode a SETTINGS payload into its entries, in wire order.
pub fn decode_entries(mut payload: &[u8]) -> Result<Vec<Setting>, H2Error> {
    if !payload.len().is_multiple_of(6) {
        return Err(H2Error::frame_size("SETTINGS payload not a multiple of 6"));
    }
    let mut entries = Vec::with_capacity(payload.len() / 6);
    while payload.has_remaining() {
        let id = SettingId::from_u16(payload.get_u16());
        let value = payload.get_u32();
        entries.push(Setting { id, value });
    }
    Ok(entries)
}

/// Values in force for one side of the connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            header_table_size: 4096,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

impl Settings {
    /// Validate and apply one entry. Unknown identifiers are ignored
    /// (RFC 9113 Section 6.5.2).
    pub fn apply(&mut self, entry: Setting) -> Result<(), H2Error> {
        match entry.id {
            SettingId::HeaderTableSize => self.header_table_size = entry.value,
            SettingId::EnablePush => match entry.value {
                0 => self.enable_push = false,
                1 => self.enable_push = true,
                _ => return Err(H2Error::protocol("ENABLE_PUSH must be 0 or 1")),
            },
            SettingId::MaxConcurrentStreams => self.max_concurrent_streams = Some(entry.value),
            SettingId::InitialWindowSize => {
                if entry.value > MAX_WINDOW_SIZE {
                    return Err(H2Error::FlowControl);
                }
                self.initial_window_size = entry.value;
            }
            SettingId::MaxFrameSize => {
                if !(DEFAULT_MAX_FRAME_SIZE..=MAX_MAX_FRAME_SIZE).contains(&entry.value) {
                    return Err(H2Error::protocol("MAX_FRAME_SIZE out of range"));
                }
                self.max_frame_size = entry.value;
            }
            SettingId::MaxHeaderListSize => self.max_header_list_size = Some(entry.value),
            SettingId::Unknown(_) => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entries_survive_encoding() {
        let entries = [
            Setting::max_concurrent_streams(100),
            Setting::initial_window_size(1 << 20),
        ];
        let mut buf = Vec::new();
        encode_entries(&entries, &mut buf);
        assert_eq!(buf.len(), 12);
        assert_eq!(&buf[..6], &[0x0, 0x3, 0x0, 0x0, 0x0, 100]);
        assert_eq!(decode_entries(&buf).unwrap(), entries);
    }

    #[test]
    fn ragged_payload_is_frame_size_error() {
        let err = decode_entries(&[0, 3, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, H2Error::FrameSize(_)));
    }

    #[test]
    fn apply_validates_ranges() {
        let mut settings = Settings::default();
        assert!(settings.apply(Setting::new(SettingId::EnablePush, 2)).is_err());
        assert!(matches!(
            settings.apply(Setting::initial_window_size(MAX_WINDOW_SIZE + 1)),
            Err(H2Error::FlowControl)
        ));
        assert!(settings.apply(Setting::new(SettingId::MaxFrameSize, 100)).is_err());
        settings
            .apply(Setting::new(SettingId::MaxFrameSize, 32_768))
            .unwrap();
        assert_eq!(settings.max_frame_size, 32_768);
    }

    #[test]
    fn unknown_identifier_is_ignored() {
        let mut settings = Settings::default();
        settings
            .apply(Setting::new(SettingId::from_u16(0xff), 42))
            .unwrap();
        assert_eq!(settings, Settings::default());
    }
}
