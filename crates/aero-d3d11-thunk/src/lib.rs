//! Cross-context thunk for the D3D11/D3D10 fixed-function state objects.
//!
//! Guest code (32-bit pointers) holds dual-identity proxies exposing an `ID3D11*State` façade and
//! an `ID3D10*State` façade for the same object; every real operation runs on the host object
//! (64-bit pointers) through a synchronous call gate. The host object's own reference count
//! drives teardown of the proxy.
//!
//! Layout:
//! - [`proxy`]: the guest-visible façades and the proxy record layout.
//! - [`gate`]: the call gate and the host-side handler table.
//! - [`mirror`]: host mirrors, the identity registry and teardown.
//! - [`private_data`]: the Get/SetPrivateData store.
//! - [`guest`]: guest context (proxy table, teardown callback, façade recovery).
//! - [`host`]: the host runtime contract.
#![forbid(unsafe_code)]

mod config;
mod error;
mod stats;

pub mod gate;
pub mod guest;
pub mod host;
pub mod mirror;
pub mod private_data;
pub mod proxy;

/// Test doubles for host objects and a wired-up guest/host pair.
///
/// This module is only available when compiling this crate's own tests, or when the `test-utils`
/// feature is enabled.
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::ThunkOptions;
pub use error::{Result, ThunkError};
pub use gate::{CallGate, HostDispatcher};
pub use guest::{GuestContext, GuestDevices};
pub use host::{DeviceRegistry, HostDeviceChild, HostRef, Unknown};
pub use mirror::{HostMirror, HostThunk, LegacyBinding, TeardownSink};
pub use private_data::{PointerWidth, PrivateStore};
pub use proxy::{D3D10StateIface, D3D11StateIface, Interface, StateProxy, PROXY_RECORD_BYTES};
pub use stats::{ThunkStats, ThunkStatsSnapshot};
