//! Call dispatch gate.
//!
//! The guest packs a [`CallRecord`] and hands it to a [`CallGate`]; the host-side
//! [`HostDispatcher`] decodes the opcode, resolves the handle to its mirror, performs the real
//! call on the host object and writes the status and out-values back into the same record. Calls
//! run synchronously on the caller's thread.

use aero_thunk_abi::{
    iid, CallRecord, DescRevision, Family, GuestPtr, Guid, HResult, Method, CALL_RECORD_BYTES,
};
use tracing::{debug, trace, warn};

use crate::error::{Result, ThunkError};
use crate::host::HostRef;
use crate::mirror::{HostMirror, HostThunk};

pub trait CallGate: Send + Sync {
    fn call(&self, record: &mut CallRecord);
}

/// Host-side handler table.
pub struct HostDispatcher {
    thunk: HostThunk,
}

impl HostDispatcher {
    pub fn new(thunk: HostThunk) -> Self {
        Self { thunk }
    }

    pub fn thunk(&self) -> &HostThunk {
        &self.thunk
    }

    /// Dispatch a call record that the guest staged in shared memory at `record`.
    pub fn call_in_memory(&self, record: GuestPtr) -> Result<()> {
        let host = self.thunk.translator().to_host(record);
        let mut raw = [0u8; CALL_RECORD_BYTES];
        self.thunk.memory().read(host, &mut raw)?;
        let mut rec = CallRecord::from_bytes(&raw)?;
        self.call(&mut rec);
        self.thunk.memory().write(host, rec.as_bytes())?;
        Ok(())
    }

    fn dispatch(&self, rec: &mut CallRecord) -> Result<()> {
        let op = rec.opcode()?;
        let mirror = self.thunk.resolve(rec.handle())?;
        if mirror.kind() != op.kind {
            return Err(ThunkError::KindMismatch {
                expected: op.kind,
                actual: mirror.kind(),
            });
        }
        trace!(?op, iface = %rec.handle(), "gate call");

        match op.method {
            Method::QueryInterface => self.query_interface(&mirror, rec),
            Method::AddRef => {
                rec.iret = mirror.current().add_ref() as u64;
                rec.set_status(HResult::S_OK);
                Ok(())
            }
            Method::Release => {
                rec.iret = mirror.current().release() as u64;
                rec.set_status(HResult::S_OK);
                Ok(())
            }
            Method::GetDevice => self.get_device(&mirror, rec),
            Method::GetDesc => self.get_desc(
                &mirror,
                mirror.current(),
                Family::D3D11,
                DescRevision::Base,
                rec,
            ),
            Method::LegacyAddRef => {
                rec.iret = legacy(&mirror)?.add_ref() as u64;
                rec.set_status(HResult::S_OK);
                Ok(())
            }
            Method::LegacyRelease => {
                rec.iret = legacy(&mirror)?.release() as u64;
                rec.set_status(HResult::S_OK);
                Ok(())
            }
            Method::LegacyGetDesc => self.get_desc(
                &mirror,
                legacy(&mirror)?,
                Family::D3D10,
                DescRevision::Base,
                rec,
            ),
            Method::LegacyGetDesc1 => self.get_desc(
                &mirror,
                legacy(&mirror)?,
                Family::D3D10,
                DescRevision::Rev1,
                rec,
            ),
        }
    }

    /// Only reached for interface ids the guest does not model. A successful host query means
    /// the wrapper is missing coverage: the interface is released and never handed out.
    fn query_interface(&self, mirror: &HostMirror, rec: &mut CallRecord) -> Result<()> {
        let mut raw = [0u8; Guid::SIZE_BYTES];
        let riid_ptr = self.thunk.translator().to_host(rec.guest_arg(0));
        self.thunk.memory().read(riid_ptr, &mut raw)?;
        let riid: Guid = bytemuck::pod_read_unaligned(&raw);

        match mirror.current().query_interface(&riid) {
            Ok(iface) => {
                warn!(
                    %riid,
                    kind = mirror.kind().name(),
                    "host returned an interface the state thunk does not know about"
                );
                self.thunk.stats_counters().inc_coverage_defects();
                iface.release();
                rec.set_status(HResult::S_OK);
            }
            Err(hr) => rec.set_status(hr),
        }
        Ok(())
    }

    fn get_device(&self, mirror: &HostMirror, rec: &mut CallRecord) -> Result<()> {
        let host = mirror.current().get_device().ok_or(ThunkError::NoDevice)?;
        let device = self
            .thunk
            .devices()
            .guest_device(host)
            .ok_or(ThunkError::NoDevice)?;
        rec.args[0] = device.to_u64();
        rec.set_status(HResult::S_OK);
        Ok(())
    }

    fn get_desc(
        &self,
        mirror: &HostMirror,
        iface: &HostRef,
        family: Family,
        revision: DescRevision,
        rec: &mut CallRecord,
    ) -> Result<()> {
        let size = mirror
            .kind()
            .desc_size(family, revision)
            .ok_or(ThunkError::NoInterface(iid::ID3D10_BLEND_STATE1, mirror.kind()))?;
        let len = rec.arg(1) as usize;
        if len != size {
            return Err(ThunkError::DescSize {
                expected: size,
                actual: len,
            });
        }
        let mut desc = vec![0u8; size];
        iface.get_desc(family, revision, &mut desc);
        let dst = self.thunk.translator().to_host(rec.guest_arg(0));
        self.thunk.memory().write(dst, &desc)?;
        rec.set_status(HResult::S_OK);
        Ok(())
    }
}

fn legacy(mirror: &HostMirror) -> Result<&HostRef> {
    mirror
        .legacy()
        .ok_or(ThunkError::LegacyUnsupported(mirror.kind()))
}

impl CallGate for HostDispatcher {
    fn call(&self, rec: &mut CallRecord) {
        self.thunk.stats_counters().inc_calls_dispatched();
        if let Err(err) = self.dispatch(rec) {
            let hr = err.hresult();
            match &err {
                ThunkError::UnknownHandle(handle) => {
                    warn!(%handle, id = rec.id, "call on unknown proxy handle")
                }
                _ => debug!(iface = %rec.handle(), id = rec.id, %err, ?hr, "gate call failed"),
            }
            rec.iret = 0;
            rec.set_status(hr);
        }
    }
}
