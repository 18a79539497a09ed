//! HTTP/2 settings management
//!
//! This module implements SETTINGS parameters as defined in RFC 9113
//! Section 6.5. [`Settings`] describes what this endpoint advertises;
//! [`PeerSettings`] tracks what the peer has advertised so far.

use super::error::{Error, ErrorCode, Result};
use super::{
    DEFAULT_HEADER_TABLE_SIZE, DEFAULT_INITIAL_WINDOW_SIZE, DEFAULT_MAX_FRAME_SIZE,
    MAX_FRAME_SIZE_UPPER_BOUND, MAX_WINDOW_SIZE,
};
use std::fmt;

/// HTTP/2 settings parameters (RFC 9113 Section 6.5.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SettingsParameter {
    /// SETTINGS_HEADER_TABLE_SIZE (0x1)
    HeaderTableSize = 0x1,

    /// SETTINGS_ENABLE_PUSH (0x2)
    EnablePush = 0x2,

    /// SETTINGS_MAX_CONCURRENT_STREAMS (0x3)
    MaxConcurrentStreams = 0x3,

    /// SETTINGS_INITIAL_WINDOW_SIZE (0x4)
    /// Initial window size for stream-level flow control
    InitialWindowSize = 0x4,

    /// SETTINGS_MAX_FRAME_SIZE (0x5)
    MaxFrameSize = 0x5,

    /// SETTINGS_MAX_HEADER_LIST_SIZE (0x6)
    /// Advisory limit on the uncompressed header list
    MaxHeaderListSize = 0x6,
}

impl SettingsParameter {
    /// Convert to u16
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Create from u16; unknown identifiers yield `None`
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x1 => Some(SettingsParameter::HeaderTableSize),
            0x2 => Some(SettingsParameter::EnablePush),
            0x3 => Some(SettingsParameter::MaxConcurrentStreams),
            0x4 => Some(SettingsParameter::InitialWindowSize),
            0x5 => Some(SettingsParameter::MaxFrameSize),
            0x6 => Some(SettingsParameter::MaxHeaderListSize),
            _ => None,
        }
    }

    /// Get parameter name
    pub fn name(&self) -> &'static str {
        match self {
            SettingsParameter::HeaderTableSize => "HEADER_TABLE_SIZE",
            SettingsParameter::EnablePush => "ENABLE_PUSH",
            SettingsParameter::MaxConcurrentStreams => "MAX_CONCURRENT_STREAMS",
            SettingsParameter::InitialWindowSize => "INITIAL_WINDOW_SIZE",
            SettingsParameter::MaxFrameSize => "MAX_FRAME_SIZE",
            SettingsParameter::MaxHeaderListSize => "MAX_HEADER_LIST_SIZE",
        }
    }
}

impl fmt::Display for SettingsParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:x})", self.name(), self.as_u16())
    }
}

/// Local HTTP/2 settings
///
/// `None` means "not advertised", in which case the RFC default applies.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Settings {
    /// Header table size (default: 4096)
    pub header_table_size: Option<u32>,

    /// Maximum concurrent streams the peer may open (default: unlimited)
    pub max_concurrent_streams: Option<u32>,

    /// Initial window size (default: 65535)
    pub initial_window_size: Option<u32>,

    /// Maximum frame size (default: 16384, range: 16384-16777215)
    pub max_frame_size: Option<u32>,

    /// Maximum header list size (default: unlimited)
    pub max_header_list_size: Option<u32>,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Settings::default()
    }

    /// Get header table size (with default)
    pub fn get_header_table_size(&self) -> u32 {
        self.header_table_size.unwrap_or(DEFAULT_HEADER_TABLE_SIZE)
    }

    /// Get max concurrent streams (None = unlimited)
    pub fn get_max_concurrent_streams(&self) -> Option<u32> {
        self.max_concurrent_streams
    }

    /// Get initial window size (with default)
    pub fn get_initial_window_size(&self) -> u32 {
        self.initial_window_size.unwrap_or(DEFAULT_INITIAL_WINDOW_SIZE)
    }

    /// Get max frame size (with default)
    pub fn get_max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Get max header list size (None = unlimited)
    pub fn get_max_header_list_size(&self) -> Option<u32> {
        self.max_header_list_size
    }

    /// Validate settings values
    pub fn validate(&self) -> Result<()> {
        if let Some(initial_window_size) = self.initial_window_size {
            if initial_window_size > MAX_WINDOW_SIZE {
                return Err(Error::InvalidArgument(format!(
                    "Initial window size {} exceeds maximum (2^31-1)",
                    initial_window_size
                )));
            }
        }

        if let Some(max_frame_size) = self.max_frame_size {
            if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&max_frame_size) {
                return Err(Error::InvalidArgument(format!(
                    "Max frame size {} outside valid range (16384-16777215)",
                    max_frame_size
                )));
            }
        }

        Ok(())
    }

    /// Flattened `id, value` pairs for the client's initial SETTINGS frame
    ///
    /// MAX_CONCURRENT_STREAMS, INITIAL_WINDOW_SIZE and MAX_FRAME_SIZE are
    /// always sent, ENABLE_PUSH is always 0, and HEADER_TABLE_SIZE and
    /// MAX_HEADER_LIST_SIZE only when set to a non-default value.
    pub fn to_frame_values(&self) -> Vec<u32> {
        let mut values = Vec::with_capacity(12);
        let header_table_size = self.get_header_table_size();
        if header_table_size != DEFAULT_HEADER_TABLE_SIZE {
            values.extend([u32::from(SettingsParameter::HeaderTableSize.as_u16()), header_table_size]);
        }
        values.extend([u32::from(SettingsParameter::EnablePush.as_u16()), 0]);
        values.extend([
            u32::from(SettingsParameter::MaxConcurrentStreams.as_u16()),
            self.max_concurrent_streams.unwrap_or(MAX_WINDOW_SIZE),
        ]);
        values.extend([
            u32::from(SettingsParameter::InitialWindowSize.as_u16()),
            self.get_initial_window_size(),
        ]);
        values.extend([
            u32::from(SettingsParameter::MaxFrameSize.as_u16()),
            self.get_max_frame_size(),
        ]);
        if let Some(size) = self.max_header_list_size {
            values.extend([u32::from(SettingsParameter::MaxHeaderListSize.as_u16()), size]);
        }
        values
    }
}

/// Builder for HTTP/2 settings
#[derive(Debug, Clone, Default)]
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    /// Create a new settings builder
    pub fn new() -> Self {
        SettingsBuilder::default()
    }

    /// Set header table size
    pub fn header_table_size(mut self, size: u32) -> Self {
        self.settings.header_table_size = Some(size);
        self
    }

    /// Set max concurrent streams
    pub fn max_concurrent_streams(mut self, max: u32) -> Self {
        self.settings.max_concurrent_streams = Some(max);
        self
    }

    /// Set initial window size
    pub fn initial_window_size(mut self, size: u32) -> Self {
        self.settings.initial_window_size = Some(size);
        self
    }

    /// Set max frame size
    pub fn max_frame_size(mut self, size: u32) -> Self {
        self.settings.max_frame_size = Some(size);
        self
    }

    /// Set max header list size
    pub fn max_header_list_size(mut self, size: u32) -> Self {
        self.settings.max_header_list_size = Some(size);
        self
    }

    /// Build the settings
    pub fn build(self) -> Result<Settings> {
        self.settings.validate()?;
        Ok(self.settings)
    }
}

/// Settings most recently advertised by the peer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerSettings {
    pub header_table_size: u32,
    pub enable_push: bool,
    pub max_concurrent_streams: Option<u32>,
    pub initial_window_size: u32,
    pub max_frame_size: u32,
    pub max_header_list_size: Option<u32>,
}

impl Default for PeerSettings {
    fn default() -> Self {
        PeerSettings {
            header_table_size: DEFAULT_HEADER_TABLE_SIZE,
            enable_push: true,
            max_concurrent_streams: None,
            initial_window_size: DEFAULT_INITIAL_WINDOW_SIZE,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_header_list_size: None,
        }
    }
}

/// What changed when a SETTINGS frame was applied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SettingsChange {
    /// Shift to apply to every open stream's send window
    pub window_delta: i64,
    /// New peer maximum frame size, if it changed
    pub max_frame_size: Option<u32>,
    /// New peer header table size, if advertised
    pub header_table_size: Option<u32>,
}

impl PeerSettings {
    /// Apply the entries of one SETTINGS frame in order
    ///
    /// Values outside their RFC ranges are connection errors; unknown
    /// identifiers are ignored. On error nothing is applied.
    pub fn apply(&mut self, entries: &[(u16, u32)]) -> Result<SettingsChange> {
        let mut next = *self;
        for &(id, value) in entries {
            match SettingsParameter::from_u16(id) {
                Some(SettingsParameter::HeaderTableSize) => next.header_table_size = value,
                Some(SettingsParameter::EnablePush) => {
                    next.enable_push = match value {
                        0 => false,
                        1 => true,
                        _ => {
                            return Err(Error::connection(
                                ErrorCode::ProtocolError,
                                format!("ENABLE_PUSH must be 0 or 1, got {}", value),
                            ))
                        }
                    }
                }
                Some(SettingsParameter::MaxConcurrentStreams) => next.max_concurrent_streams = Some(value),
                Some(SettingsParameter::InitialWindowSize) => {
                    if value > MAX_WINDOW_SIZE {
                        return Err(Error::connection(
                            ErrorCode::FlowControlError,
                            format!("INITIAL_WINDOW_SIZE {} exceeds 2^31-1", value),
                        ));
                    }
                    next.initial_window_size = value;
                }
                Some(SettingsParameter::MaxFrameSize) => {
                    if !(DEFAULT_MAX_FRAME_SIZE..=MAX_FRAME_SIZE_UPPER_BOUND).contains(&value) {
                        return Err(Error::connection(
                            ErrorCode::ProtocolError,
                            format!("MAX_FRAME_SIZE {} outside 16384..=16777215", value),
                        ));
                    }
                    next.max_frame_size = value;
                }
                Some(SettingsParameter::MaxHeaderListSize) => next.max_header_list_size = Some(value),
                None => {}
            }
        }

        let change = SettingsChange {
            window_delta: i64::from(next.initial_window_size) - i64::from(self.initial_window_size),
            max_frame_size: (next.max_frame_size != self.max_frame_size).then_some(next.max_frame_size),
            header_table_size: entries
                .iter()
                .any(|(id, _)| *id == SettingsParameter::HeaderTableSize.as_u16())
                .then_some(next.header_table_size),
        };
        *self = next;
        Ok(change)
    }
}
