//! Channel numbering.
//!
//! Channels are single bytes. The numbers below are the conventional
//! assignment used by the device runtime; they are not negotiated on the
//! wire, so a [`ChannelTable`] can remap them for firmware that differs.

use std::collections::BTreeSet;

/// Controller commands (program lifecycle, locking, configuration).
pub const CONTROLLER: u8 = 0;

/// Uploader commands (remote filesystem).
pub const UPLOADER: u8 = 1;

/// Program stdout (device to host).
pub const PROGRAM_OUTPUT: u8 = 16;

/// Program stdin (host to device).
pub const PROGRAM_INPUT: u8 = 17;

/// Program stderr (device to host).
pub const PROGRAM_ERROR: u8 = 18;

/// Runtime debug log broadcast.
pub const DEBUG_LOG: u8 = 251;

/// Runtime info log broadcast.
pub const INFO_LOG: u8 = 253;

/// Runtime error log broadcast.
pub const ERROR_LOG: u8 = 255;

/// Reserved channel roles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelRole {
    Controller,
    Uploader,
    ProgramOutput,
    ProgramInput,
    ProgramError,
    DebugLog,
    InfoLog,
    ErrorLog,
}

impl ChannelRole {
    /// Every role, in table order.
    pub const ALL: [ChannelRole; 8] = [
        ChannelRole::Controller,
        ChannelRole::Uploader,
        ChannelRole::ProgramOutput,
        ChannelRole::ProgramInput,
        ChannelRole::ProgramError,
        ChannelRole::DebugLog,
        ChannelRole::InfoLog,
        ChannelRole::ErrorLog,
    ];

    /// Human-readable role name.
    pub fn name(self) -> &'static str {
        match self {
            ChannelRole::Controller => "CONTROLLER",
            ChannelRole::Uploader => "UPLOADER",
            ChannelRole::ProgramOutput => "STDOUT",
            ChannelRole::ProgramInput => "STDIN",
            ChannelRole::ProgramError => "STDERR",
            ChannelRole::DebugLog => "DEBUG",
            ChannelRole::InfoLog => "INFO",
            ChannelRole::ErrorLog => "ERROR",
        }
    }
}

/// Assignment of reserved roles to channel numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelTable {
    pub controller: u8,
    pub uploader: u8,
    pub program_output: u8,
    pub program_input: u8,
    pub program_error: u8,
    pub debug_log: u8,
    pub info_log: u8,
    pub error_log: u8,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            controller: CONTROLLER,
            uploader: UPLOADER,
            program_output: PROGRAM_OUTPUT,
            program_input: PROGRAM_INPUT,
            program_error: PROGRAM_ERROR,
            debug_log: DEBUG_LOG,
            info_log: INFO_LOG,
            error_log: ERROR_LOG,
        }
    }
}

impl ChannelTable {
    /// Channel number assigned to a role.
    pub fn channel(&self, role: ChannelRole) -> u8 {
        match role {
            ChannelRole::Controller => self.controller,
            ChannelRole::Uploader => self.uploader,
            ChannelRole::ProgramOutput => self.program_output,
            ChannelRole::ProgramInput => self.program_input,
            ChannelRole::ProgramError => self.program_error,
            ChannelRole::DebugLog => self.debug_log,
            ChannelRole::InfoLog => self.info_log,
            ChannelRole::ErrorLog => self.error_log,
        }
    }

    /// Role bound to a channel number, if any.
    pub fn role(&self, channel: u8) -> Option<ChannelRole> {
        ChannelRole::ALL
            .into_iter()
            .find(|role| self.channel(*role) == channel)
    }

    /// Human-readable name for a channel number.
    pub fn channel_name(&self, channel: u8) -> &'static str {
        self.role(channel).map_or("USER", ChannelRole::name)
    }

    /// The set of channels with an assigned role.
    pub fn active_set(&self) -> BTreeSet<u8> {
        ChannelRole::ALL
            .into_iter()
            .map(|role| self.channel(role))
            .collect()
    }
}
