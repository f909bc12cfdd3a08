//! MKHI (ME Kernel Host Interface) commands.
//!
//! Every MKHI message starts with a 4-byte [`MkhiHeader`] naming a command
//! group and a command within it.  The CSE answers with the same group and
//! command, the response bit set, and a result code which is zero on
//! success.
//!
//! Messages are laid out exactly as they travel on the wire, little-endian
//! and without padding, so they are sent and received as byte slices with
//! `zerocopy`.  The commands themselves are methods on
//! [`Heci`](crate::heci::Heci), in [`client`].

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

pub mod client;

use core::fmt;

use static_assertions::const_assert_eq;
use zerocopy::little_endian::{U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::{Error, Result};

/// Core Boot Management group
pub const GROUP_CBM: u8 = 0x00;
/// Host ME Region Flash Protection Override group
pub const GROUP_HMRFPO: u8 = 0x05;
/// Generic group
pub const GROUP_GEN: u8 = 0xff;

/// CBM: request a global, host or CSE reset
pub const CBM_GLOBAL_RESET_REQ: u8 = 0x0b;
pub const HMRFPO_ENABLE: u8 = 0x01;
pub const HMRFPO_GET_STATUS: u8 = 0x03;
/// GEN: get firmware version
pub const GEN_GET_FW_VERSION: u8 = 0x02;

/// Reset request originated from BIOS POST
pub const GR_ORIGIN_BIOS_POST: u8 = 0x02;

const COMMAND_MASK: u8 = 0x7f;
const IS_RESPONSE: u8 = 0x80;

/// MKHI message header
///
/// ```text
///  byte 0     byte 1          byte 2     byte 3
/// +----------+---+-----------+----------+--------+
/// | group id |rsp| command   | reserved | result |
/// +----------+---+-----------+----------+--------+
/// ```
#[repr(C)]
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout,
)]
pub struct MkhiHeader {
    pub group_id: u8,
    command: u8,
    reserved: u8,
    pub result: u8,
}

impl MkhiHeader {
    /// Header for a request to `command` in group `group_id`.
    pub const fn request(group_id: u8, command: u8) -> Self {
        Self {
            group_id,
            command: command & COMMAND_MASK,
            reserved: 0,
            result: 0,
        }
    }

    /// The reply the CSE sends to this request, with the given result.
    pub const fn response(&self, result: u8) -> Self {
        Self {
            group_id: self.group_id,
            command: self.command | IS_RESPONSE,
            reserved: 0,
            result,
        }
    }

    pub const fn command(&self) -> u8 {
        self.command & COMMAND_MASK
    }

    pub const fn is_response(&self) -> bool {
        self.command & IS_RESPONSE != 0
    }

    /// Check that `self` is a successful reply to `request`.
    pub fn check_reply_to(&self, request: &MkhiHeader) -> Result<()> {
        if !self.is_response()
            || self.group_id != request.group_id
            || self.command() != request.command()
        {
            return Err(Error::UnexpectedResponse);
        }
        match self.result {
            0 => Ok(()),
            result => Err(Error::CommandFailed(result)),
        }
    }
}

/// Reset kinds accepted by [`CBM_GLOBAL_RESET_REQ`]
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetType {
    /// Reset the whole platform
    Global = 0x01,
    /// Reset the host only, leaving the CSE running
    HostOnly = 0x02,
    /// Reset the CSE only.  The CSE may go down before it can reply.
    CseOnly = 0x03,
}

impl TryFrom<u8> for ResetType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0x01 => Ok(ResetType::Global),
            0x02 => Ok(ResetType::HostOnly),
            0x03 => Ok(ResetType::CseOnly),
            _ => Err(Error::InvalidResetType),
        }
    }
}

/// HMRFPO state, as reported by [`HMRFPO_GET_STATUS`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HmrfpoStatus {
    /// The CSE region is write protected
    Disabled,
    /// The override is locked until the next reset
    Locked,
    /// The CSE region may be written by the host
    Enabled,
    Unknown(u8),
}

impl From<u8> for HmrfpoStatus {
    fn from(value: u8) -> Self {
        match value {
            0 => HmrfpoStatus::Disabled,
            1 => HmrfpoStatus::Locked,
            2 => HmrfpoStatus::Enabled,
            other => HmrfpoStatus::Unknown(other),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct GlobalResetRequest {
    pub hdr: MkhiHeader,
    pub req_origin: u8,
    pub reset_type: u8,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HmrfpoEnableRequest {
    pub hdr: MkhiHeader,
    pub nonce: [U32; 2],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HmrfpoEnableResponse {
    pub hdr: MkhiHeader,
    /// Factory data area base, unused on client SKUs
    pub fct_base: U32,
    /// Factory data area length, unused on client SKUs
    pub fct_limit: U32,
    pub status: u8,
    pub padding: [u8; 3],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HmrfpoGetStatusRequest {
    pub hdr: MkhiHeader,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct HmrfpoGetStatusResponse {
    pub hdr: MkhiHeader,
    pub status: u8,
    pub reserved: [u8; 3],
}

/// Firmware version as carried on the wire
#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct WireVersion {
    pub minor: U16,
    pub major: U16,
    pub build: U16,
    pub hotfix: U16,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct FwVersionResponse {
    pub hdr: MkhiHeader,
    pub code: WireVersion,
    pub rec: WireVersion,
    pub fitc: WireVersion,
}

const_assert_eq!(core::mem::size_of::<MkhiHeader>(), 4);
const_assert_eq!(core::mem::size_of::<GlobalResetRequest>(), 6);
const_assert_eq!(core::mem::size_of::<HmrfpoEnableRequest>(), 12);
const_assert_eq!(core::mem::size_of::<HmrfpoEnableResponse>(), 16);
const_assert_eq!(core::mem::size_of::<HmrfpoGetStatusRequest>(), 4);
const_assert_eq!(core::mem::size_of::<HmrfpoGetStatusResponse>(), 8);
const_assert_eq!(core::mem::size_of::<FwVersionResponse>(), 28);

/// A firmware component version
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Version {
    pub major: u16,
    pub minor: u16,
    pub hotfix: u16,
    pub build: u16,
}

impl From<WireVersion> for Version {
    fn from(wire: WireVersion) -> Self {
        Self {
            major: wire.major.get(),
            minor: wire.minor.get(),
            hotfix: wire.hotfix.get(),
            build: wire.build.get(),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major, self.minor, self.hotfix, self.build
        )
    }
}

/// Versions of the CSE firmware components
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FwVersion {
    /// Main (RW) firmware
    pub code: Version,
    /// Recovery (RO) firmware
    pub recovery: Version,
    /// Flash image tool configuration
    pub fitc: Version,
}

impl From<FwVersionResponse> for FwVersion {
    fn from(resp: FwVersionResponse) -> Self {
        Self {
            code: resp.code.into(),
            recovery: resp.rec.into(),
            fitc: resp.fitc.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_wire_layout() {
        let hdr = MkhiHeader::request(GROUP_CBM, CBM_GLOBAL_RESET_REQ);
        assert_eq!(hdr.as_bytes(), &[0x00, 0x0b, 0x00, 0x00]);

        let resp = hdr.response(0x89);
        assert_eq!(resp.as_bytes(), &[0x00, 0x8b, 0x00, 0x89]);
        assert!(resp.is_response());
        assert_eq!(resp.command(), CBM_GLOBAL_RESET_REQ);
    }

    #[test]
    fn test_check_reply() {
        let req = MkhiHeader::request(GROUP_HMRFPO, HMRFPO_GET_STATUS);
        assert_eq!(req.response(0).check_reply_to(&req), Ok(()));
        assert_eq!(
            req.response(3).check_reply_to(&req),
            Err(Error::CommandFailed(3))
        );
        // Request echoed back without the response bit
        assert_eq!(req.check_reply_to(&req), Err(Error::UnexpectedResponse));

        let other = MkhiHeader::request(GROUP_HMRFPO, HMRFPO_ENABLE);
        assert_eq!(
            other.response(0).check_reply_to(&req),
            Err(Error::UnexpectedResponse)
        );
        let other = MkhiHeader::request(GROUP_GEN, HMRFPO_GET_STATUS);
        assert_eq!(
            other.response(0).check_reply_to(&req),
            Err(Error::UnexpectedResponse)
        );
    }

    #[test]
    fn test_reset_type_values() {
        assert_eq!(ResetType::try_from(1), Ok(ResetType::Global));
        assert_eq!(ResetType::try_from(2), Ok(ResetType::HostOnly));
        assert_eq!(ResetType::try_from(3), Ok(ResetType::CseOnly));
        for bad in [0u8, 4, 0x80, 0xff] {
            assert_eq!(ResetType::try_from(bad), Err(Error::InvalidResetType));
        }
    }

    #[test]
    fn test_global_reset_request_bytes() {
        let msg = GlobalResetRequest {
            hdr: MkhiHeader::request(GROUP_CBM, CBM_GLOBAL_RESET_REQ),
            req_origin: GR_ORIGIN_BIOS_POST,
            reset_type: ResetType::HostOnly as u8,
        };
        assert_eq!(msg.as_bytes(), &[0x00, 0x0b, 0x00, 0x00, 0x02, 0x02]);
    }

    #[test]
    fn test_hmrfpo_status_values() {
        assert_eq!(HmrfpoStatus::from(0), HmrfpoStatus::Disabled);
        assert_eq!(HmrfpoStatus::from(1), HmrfpoStatus::Locked);
        assert_eq!(HmrfpoStatus::from(2), HmrfpoStatus::Enabled);
        assert_eq!(HmrfpoStatus::from(9), HmrfpoStatus::Unknown(9));
    }

    #[test]
    fn test_fw_version_decode() {
        let mut bytes = [0u8; 28];
        bytes[..4].copy_from_slice(&[0xff, 0x82, 0x00, 0x00]);
        // code: minor 1, major 15, build 1234, hotfix 40
        bytes[4..12].copy_from_slice(&[1, 0, 15, 0, 0xd2, 0x04, 40, 0]);
        let resp = FwVersionResponse::read_from_bytes(&bytes[..]).unwrap();
        let version = FwVersion::from(resp);
        assert_eq!(
            version.code,
            Version {
                major: 15,
                minor: 1,
                hotfix: 40,
                build: 1234
            }
        );
        assert_eq!(format!("{}", version.code), "15.1.40.1234");
        assert_eq!(format!("{}", version.recovery), "0.0.0.0");
    }
}
