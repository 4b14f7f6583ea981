//! SETTINGS: the parameter table, the typed [`Settings`] view, and the
//! resumable SETTINGS payload parser.
//!
//! See <https://httpwg.org/specs/rfc9113.html#SETTINGS>

use std::ops::RangeInclusive;

use tracing::debug;

use crate::{
    error::H2ConnectionError,
    frame::{Frame, RawFrameType, StreamId},
    transport::TransportParsing,
    write,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Setting {
    HeaderTableSize = 0x01,
    EnablePush = 0x02,
    MaxConcurrentStreams = 0x03,
    InitialWindowSize = 0x04,
    MaxFrameSize = 0x05,
    MaxHeaderListSize = 0x06,
}

impl Setting {
    pub const ALL: [Setting; 6] = [
        Setting::HeaderTableSize,
        Setting::EnablePush,
        Setting::MaxConcurrentStreams,
        Setting::InitialWindowSize,
        Setting::MaxFrameSize,
        Setting::MaxHeaderListSize,
    ];

    pub fn from_repr(id: u16) -> Option<Self> {
        Self::ALL.get((id as usize).wrapping_sub(1)).copied()
    }

    pub fn repr(self) -> u16 {
        self as u16
    }

    pub fn parameter(self) -> &'static SettingParameter {
        &SETTING_PARAMETERS[self as usize - 1]
    }
}

/// What to do with a value outside a parameter's range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidValuePolicy {
    /// Bring it back into range and carry on.
    Clamp,
    /// Connection error.
    Disconnect,
}

#[derive(Debug)]
pub struct SettingParameter {
    pub name: &'static str,
    pub default_value: u32,
    pub min_value: u32,
    pub max_value: u32,
    pub on_invalid: InvalidValuePolicy,
}

impl SettingParameter {
    pub fn range(&self) -> RangeInclusive<u32> {
        self.min_value..=self.max_value
    }
}

/// Indexed by setting id minus one.
pub static SETTING_PARAMETERS: [SettingParameter; 6] = [
    SettingParameter {
        name: "HEADER_TABLE_SIZE",
        default_value: 4096,
        min_value: 0,
        max_value: u32::MAX,
        on_invalid: InvalidValuePolicy::Clamp,
    },
    SettingParameter {
        name: "ENABLE_PUSH",
        default_value: 1,
        min_value: 0,
        max_value: 1,
        on_invalid: InvalidValuePolicy::Disconnect,
    },
    SettingParameter {
        name: "MAX_CONCURRENT_STREAMS",
        default_value: u32::MAX,
        min_value: 0,
        max_value: u32::MAX,
        on_invalid: InvalidValuePolicy::Disconnect,
    },
    SettingParameter {
        name: "INITIAL_WINDOW_SIZE",
        default_value: 65535,
        min_value: 0,
        max_value: Settings::MAX_INITIAL_WINDOW_SIZE,
        on_invalid: InvalidValuePolicy::Disconnect,
    },
    SettingParameter {
        name: "MAX_FRAME_SIZE",
        default_value: 1 << 14,
        min_value: 1 << 14,
        max_value: (1 << 24) - 1,
        on_invalid: InvalidValuePolicy::Disconnect,
    },
    SettingParameter {
        name: "MAX_HEADER_LIST_SIZE",
        default_value: u32::MAX,
        min_value: 0,
        max_value: u32::MAX,
        on_invalid: InvalidValuePolicy::Clamp,
    },
];

/// Raw settings values, one slot per setting id. Slot 0 is unused so ids
/// index directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettingsTable([u32; SettingsTable::SLOTS]);

impl Default for SettingsTable {
    fn default() -> Self {
        let mut table = [0; Self::SLOTS];
        for setting in Setting::ALL {
            table[setting as usize] = setting.parameter().default_value;
        }
        Self(table)
    }
}

impl SettingsTable {
    pub const SLOTS: usize = 7;

    pub fn get(&self, setting: Setting) -> u32 {
        self.0[setting as usize]
    }

    pub fn set(&mut self, setting: Setting, value: u32) {
        self.0[setting as usize] = value;
    }

    /// Every setting with its value, in id order.
    pub fn pairs(&self) -> impl Iterator<Item = (Setting, u32)> + '_ {
        Setting::ALL.into_iter().map(|s| (s, self.get(s)))
    }
}

/// Typed view of a [`SettingsTable`], with protocol defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settings {
    /// Maximum size of the HPACK dynamic table the sender's decoder uses.
    /// The initial value is 4,096 octets.
    pub header_table_size: u32,

    /// Whether server push is allowed. Any value other than 0 or 1 is a
    /// connection error of type PROTOCOL_ERROR.
    pub enable_push: bool,

    /// Maximum number of concurrent streams the sender allows. `None` is
    /// unlimited, which is the initial value.
    pub max_concurrent_streams: Option<u32>,

    /// The sender's initial window size for stream-level flow control.
    /// Values above 2^31-1 are a connection error of type
    /// FLOW_CONTROL_ERROR.
    pub initial_window_size: u32,

    /// Largest frame payload the sender is willing to receive, between
    /// 2^14 and 2^24-1 inclusive.
    pub max_frame_size: u32,

    /// Advisory limit on the uncompressed size of a field section. `None`
    /// is unlimited, which is the initial value.
    pub max_header_list_size: Option<u32>,
}

impl Default for Settings {
    fn default() -> Self {
        Self::from(&SettingsTable::default())
    }
}

impl Settings {
    pub const MAX_INITIAL_WINDOW_SIZE: u32 = (1 << 31) - 1;
}

impl From<&SettingsTable> for Settings {
    fn from(table: &SettingsTable) -> Self {
        let unlimited = |v: u32| (v != u32::MAX).then_some(v);
        Self {
            header_table_size: table.get(Setting::HeaderTableSize),
            enable_push: table.get(Setting::EnablePush) != 0,
            max_concurrent_streams: unlimited(table.get(Setting::MaxConcurrentStreams)),
            initial_window_size: table.get(Setting::InitialWindowSize),
            max_frame_size: table.get(Setting::MaxFrameSize),
            max_header_list_size: unlimited(table.get(Setting::MaxHeaderListSize)),
        }
    }
}

impl From<&Settings> for SettingsTable {
    fn from(settings: &Settings) -> Self {
        let mut table = SettingsTable::default();
        table.set(Setting::HeaderTableSize, settings.header_table_size);
        table.set(Setting::EnablePush, settings.enable_push as u32);
        table.set(
            Setting::MaxConcurrentStreams,
            settings.max_concurrent_streams.unwrap_or(u32::MAX),
        );
        table.set(Setting::InitialWindowSize, settings.initial_window_size);
        table.set(Setting::MaxFrameSize, settings.max_frame_size);
        table.set(
            Setting::MaxHeaderListSize,
            settings.max_header_list_size.unwrap_or(u32::MAX),
        );
        table
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("ENABLE_PUSH setting is supposed to be either 0 or 1, got {actual}")]
    InvalidEnablePushValue { actual: u32 },

    #[error("bad INITIAL_WINDOW_SIZE value {actual}, should be than or equal to 2^31-1")]
    InitialWindowSizeTooLarge { actual: u32 },

    #[error(
        "bad SETTINGS_MAX_FRAME_SIZE value {actual}, should be between 2^14 and 2^24-1 inclusive"
    )]
    SettingsMaxFrameSizeInvalid { actual: u32 },

    #[error("invalid value {actual} passed for {name}")]
    OutOfRange { name: &'static str, actual: u32 },
}

impl SettingsError {
    fn invalid_value(setting: Setting, actual: u32) -> Self {
        match setting {
            Setting::EnablePush => SettingsError::InvalidEnablePushValue { actual },
            Setting::InitialWindowSize => SettingsError::InitialWindowSizeTooLarge { actual },
            Setting::MaxFrameSize => SettingsError::SettingsMaxFrameSizeInvalid { actual },
            _ => SettingsError::OutOfRange {
                name: setting.parameter().name,
                actual,
            },
        }
    }
}

/// Position within the current 6-byte (id, value) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairState {
    Id0,
    Id1,
    Val0,
    Val1,
    Val2,
    Val3,
}

/// Parses one SETTINGS frame payload, fed in any number of slices.
///
/// New values are collected on a copy of the peer's settings and only
/// swapped in once the whole frame was read.
#[derive(Debug)]
pub struct SettingsParser {
    len: u32,
    state: PairState,
    is_ack: bool,
    id: u16,
    value: u32,
    incoming: SettingsTable,
}

impl SettingsParser {
    pub fn begin_frame(
        frame: &Frame,
        transport: &mut TransportParsing,
    ) -> Result<Self, H2ConnectionError> {
        transport.check_not_mid_header_block(frame)?;

        if frame.stream_id != StreamId::CONNECTION {
            return Err(H2ConnectionError::SettingsWithNonZeroStreamId {
                stream_id: frame.stream_id,
            });
        }

        let flags = frame.raw_flags();
        let is_ack = match flags {
            0x01 => {
                if frame.len != 0 {
                    return Err(H2ConnectionError::SettingsAckWithPayload { len: frame.len });
                }
                true
            }
            0 => false,
            _ => return Err(H2ConnectionError::SettingsInvalidFlags { flags }),
        };
        if frame.len % 6 != 0 {
            return Err(H2ConnectionError::SettingsInvalidLength { len: frame.len });
        }

        if is_ack {
            transport.on_settings_ack();
        }

        Ok(Self {
            len: frame.len,
            state: PairState::Id0,
            is_ack,
            id: 0,
            value: 0,
            incoming: transport.peer_settings,
        })
    }

    pub fn parse(
        &mut self,
        transport: &mut TransportParsing,
        slice: &[u8],
        is_last: bool,
    ) -> Result<(), H2ConnectionError> {
        if self.is_ack {
            return Ok(());
        }

        for &b in slice {
            self.state = match self.state {
                PairState::Id0 => {
                    self.id = (b as u16) << 8;
                    PairState::Id1
                }
                PairState::Id1 => {
                    self.id |= b as u16;
                    PairState::Val0
                }
                PairState::Val0 => {
                    self.value = (b as u32) << 24;
                    PairState::Val1
                }
                PairState::Val1 => {
                    self.value |= (b as u32) << 16;
                    PairState::Val2
                }
                PairState::Val2 => {
                    self.value |= (b as u32) << 8;
                    PairState::Val3
                }
                PairState::Val3 => {
                    self.value |= b as u32;
                    self.apply_pair(transport)?;
                    PairState::Id0
                }
            };
        }

        if is_last {
            if self.state != PairState::Id0 {
                return Err(H2ConnectionError::IncompleteFrame {
                    frame_type: RawFrameType::Settings,
                    frame_size: self.len,
                });
            }
            transport.peer_settings = self.incoming;
            transport.settings_updated = true;
            transport.queue(write::settings_ack_frame()?);
        }

        Ok(())
    }

    fn apply_pair(&mut self, transport: &mut TransportParsing) -> Result<(), H2ConnectionError> {
        let Some(setting) = Setting::from_repr(self.id) else {
            debug!(id = self.id, value = self.value, "ignoring unknown setting");
            return Ok(());
        };

        let param = setting.parameter();
        let mut value = self.value;
        if !param.range().contains(&value) {
            match param.on_invalid {
                InvalidValuePolicy::Clamp => {
                    value = value.clamp(param.min_value, param.max_value);
                }
                InvalidValuePolicy::Disconnect => {
                    debug!(name = param.name, value, "invalid setting value");
                    return Err(SettingsError::invalid_value(setting, value).into());
                }
            }
        }

        if setting == Setting::InitialWindowSize {
            let old = self.incoming.get(setting);
            if value != old {
                transport.initial_window_update += value as i64 - old as i64;
            }
        }

        self.incoming.set(setting, value);
        debug!(name = param.name, value, "got setting");
        Ok(())
    }
}
