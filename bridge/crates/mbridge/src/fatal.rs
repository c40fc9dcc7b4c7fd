//! Fatal termination
//!
//! Defect classes (lifecycle hazards, unhandled managed exceptions, broken
//! guard bookkeeping) end here under [`HazardPolicy::Terminate`]. Continuing
//! would leave native state that no longer matches the managed heap.
//!
//! [`HazardPolicy::Terminate`]: crate::config::HazardPolicy::Terminate

use crate::config::HazardPolicy;
use crate::error::{BridgeError, Result};
use crate::logging::{log_event, BridgeEvent};

/// Log `reason` and abort the process
pub fn terminate(reason: &str) -> ! {
    log_event(BridgeEvent::Fatal {
        reason: reason.to_string(),
    });
    log::error!("fatal: {}", reason);
    eprintln!("mbridge: fatal: {}", reason);
    std::process::abort()
}

/// Apply `policy` to a detected defect
///
/// Under `Report` the defect is returned to the caller as an error.
pub fn escalate<T>(policy: HazardPolicy, error: BridgeError) -> Result<T> {
    match policy {
        HazardPolicy::Terminate => terminate(&error.to_string()),
        HazardPolicy::Report => Err(error),
    }
}
