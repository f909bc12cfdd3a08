//! MKHI commands issued over the HECI transport.
//!
//! Each command checks the CSE is in a mode which will accept it before any
//! message is sent, and checks the reply actually answers the request before
//! interpreting it.

// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};
use zerocopy::little_endian::U32;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::heci::Heci;
use crate::io::{Clock, ConfigSpace, RegisterIo};
use crate::mkhi::{
    CBM_GLOBAL_RESET_REQ, FwVersion, FwVersionResponse, GEN_GET_FW_VERSION, GR_ORIGIN_BIOS_POST,
    GROUP_CBM, GROUP_GEN, GROUP_HMRFPO, GlobalResetRequest, HMRFPO_ENABLE, HMRFPO_GET_STATUS,
    HmrfpoEnableRequest, HmrfpoEnableResponse, HmrfpoGetStatusRequest, HmrfpoGetStatusResponse,
    HmrfpoStatus, MkhiHeader, ResetType,
};
use crate::status::{OperationMode, WorkingState};
use crate::{Error, Result};

impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Ask the CSE to perform a reset of the given kind.
    ///
    /// The channel is reset first, as reset requests often follow an
    /// exchange which left the host and CSE out of step.  A
    /// [`ResetType::CseOnly`] request is sent without waiting for a reply,
    /// as the CSE may reset itself before it can answer.
    pub fn request_reset(&mut self, reset_type: ResetType) -> Result<()> {
        debug!("Global reset (type {reset_type:?}) command");

        self.reset()?;

        let request = MkhiHeader::request(GROUP_CBM, CBM_GLOBAL_RESET_REQ);
        let msg = GlobalResetRequest {
            hdr: request,
            req_origin: GR_ORIGIN_BIOS_POST,
            reset_type: reset_type as u8,
        };

        let result = match reset_type {
            ResetType::CseOnly => {
                let (host_addr, client_addr) = (self.config.host_addr, self.config.mkhi_addr);
                self.send(msg.as_bytes(), host_addr, client_addr)
            }
            _ => self
                .mkhi_transact::<MkhiHeader>(&request, msg.as_bytes())
                .map(|_| ()),
        };

        match result {
            Ok(()) => debug!("Global reset success"),
            Err(e) => error!("Global reset failure: {e:?}"),
        }
        result
    }

    /// As [`Self::request_reset`], with the reset kind as the raw value
    /// carried in the message.
    ///
    /// Unsupported values are rejected before any hardware access.
    pub fn request_reset_raw(&mut self, reset_type: u8) -> Result<()> {
        let reset_type = ResetType::try_from(reset_type)
            .inspect_err(|_| error!("Unsupported reset type {reset_type} requested"))?;
        self.request_reset(reset_type)
    }

    /// Enable the Host ME Region Flash Protection Override, allowing the
    /// host to write the CSE region of flash.
    ///
    /// Only accepted when the CSE working state is Normal and the operation
    /// mode is Normal or Soft Temporary Disable.  Otherwise fails with
    /// [`Error::InvalidMode`] without sending anything.
    pub fn hmrfpo_enable(&mut self) -> Result<()> {
        debug!("Send HMRFPO Enable Command");

        let hfsts1 = self.hfsts1()?;
        let mode_ok = matches!(
            hfsts1.operation_mode(),
            OperationMode::Normal | OperationMode::SoftTemporaryDisable
        );
        if hfsts1.working_state() != WorkingState::Normal || !mode_ok {
            error!("ME not in required mode");
            return Err(Error::InvalidMode);
        }

        let request = MkhiHeader::request(GROUP_HMRFPO, HMRFPO_ENABLE);
        let msg = HmrfpoEnableRequest {
            hdr: request,
            nonce: [U32::new(0); 2],
        };
        let resp: HmrfpoEnableResponse = self
            .mkhi_transact(&request, msg.as_bytes())
            .inspect_err(|e| error!("HMRFPO enable failed: {e:?}"))?;

        trace!(
            "HMRFPO enabled, FCT base {:#010X} limit {:#010X}",
            resp.fct_base.get(),
            resp.fct_limit.get()
        );
        Ok(())
    }

    /// Query the HMRFPO state.
    ///
    /// Only accepted when the CSE working state is Normal.  An error means
    /// the state could not be determined.
    pub fn hmrfpo_get_status(&mut self) -> Result<HmrfpoStatus> {
        info!("Sending Get HMRFPO Status Command");

        if !self.is_working_state_normal()? {
            error!("CSE's current working state is not Normal");
            return Err(Error::InvalidMode);
        }

        let request = MkhiHeader::request(GROUP_HMRFPO, HMRFPO_GET_STATUS);
        let msg = HmrfpoGetStatusRequest { hdr: request };
        let resp: HmrfpoGetStatusResponse = self
            .mkhi_transact(&request, msg.as_bytes())
            .inspect_err(|e| error!("HMRFPO get status failed: {e:?}"))?;

        Ok(HmrfpoStatus::from(resp.status))
    }

    /// Query the CSE firmware versions.
    ///
    /// Requires working state and operation mode both Normal, and DRAM to
    /// have been initialised; the CSE does not answer before then.
    pub fn fw_version(&mut self) -> Result<FwVersion> {
        let hfsts1 = self.hfsts1()?;
        if hfsts1.working_state() != WorkingState::Normal
            || hfsts1.operation_mode() != OperationMode::Normal
        {
            debug!("Not querying FW version, CSE not in normal mode");
            return Err(Error::InvalidMode);
        }

        self.reset()?;

        let request = MkhiHeader::request(GROUP_GEN, GEN_GET_FW_VERSION);
        let resp: FwVersionResponse = self
            .mkhi_transact(&request, request.as_bytes())
            .inspect_err(|e| error!("FW version query failed: {e:?}"))?;

        let version = FwVersion::from(resp);
        debug!("ME version {}", version.code);
        Ok(version)
    }
}

// Internal functions
impl<R: RegisterIo, P: ConfigSpace, C: Clock> Heci<R, P, C> {
    /// Send `msg` to the MKHI client and receive the reply to `request`.
    ///
    /// The reply's header is checked before its length, as a failed command
    /// may be answered with the header alone.
    fn mkhi_transact<T>(&mut self, request: &MkhiHeader, msg: &[u8]) -> Result<T>
    where
        T: FromBytes + IntoBytes + KnownLayout + Immutable,
    {
        let mut resp = T::new_zeroed();
        let len = self.send_then_receive(msg, Some(resp.as_mut_bytes()))?;

        let reply = &resp.as_bytes()[..len];
        let (header, _) = MkhiHeader::read_from_prefix(reply).map_err(|_| {
            error!("{len} byte reply has no MKHI header");
            Error::ShortResponse
        })?;
        header.check_reply_to(request).inspect_err(|e| match e {
            Error::CommandFailed(result) => error!("Resp failed: {result:#04X}"),
            _ => error!("Reply {header:?} does not answer {request:?}"),
        })?;

        if len < core::mem::size_of::<T>() {
            error!("Reply too short: {len} of {} bytes", core::mem::size_of::<T>());
            return Err(Error::ShortResponse);
        }
        Ok(resp)
    }
}
