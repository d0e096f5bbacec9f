//! When uploads happen: a fixed cadence, an on-demand handle, an optional
//! run at startup, all gated by the connectivity policy.

pub mod connectivity;
pub mod scheduler;

pub use connectivity::{
    default_probe, ConnectivityGate, ConnectivityPolicy, ConnectivityProbe, StaticConnectivity,
    SysfsConnectivity,
};
pub use scheduler::{
    TriggerConfig, TriggerHandle, TriggerReason, TriggerStats, UploadCycle, UploadTrigger,
};
