//! Error Module - mbridge Error Types
//!
//! Defines all error types used in mbridge.
//!
//! # Error Categories
//!
//! ## Recoverable, surfaced synchronously
//! - `Resolution` - no method or several methods match a signature
//! - `HookTooSmall` - compiled body cannot hold a redirect sequence
//! - `HookPhaseClosed` / `AlreadyHooked` - install outside the init phase or twice
//! - `TypeAlreadyDefined` / `UnknownType` / `UnknownField` / `TypeMismatch`
//!
//! ## Defect classes
//! - `UseAfterFree` - access to a collected object. Production hosts cannot
//!   detect this; only hosts that track liveness (the reference host) report it.
//! - `Lifecycle` - double construction or destruction of a bridged instance
//! - `UnhandledManagedException` - a managed exception reached native frames
//!
//! Defect classes are routed through [`HazardPolicy`](crate::config::HazardPolicy)
//! and terminate the process by default (see [`crate::fatal`]).

use crate::host::{ManagedException, ManagedObjectHandle, MethodAddress};
use thiserror::Error;

/// Method resolution failure
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolutionError {
    /// No method matches the signature
    #[error("no method matches {signature}")]
    NotFound { signature: String },

    /// More than one method matches the signature
    ///
    /// Arity-only lookups report this for same-arity overloads; a full
    /// parameter-type signature disambiguates them.
    #[error("{signature} is ambiguous: {} candidates ({})", .candidates.len(), .candidates.join(", "))]
    Ambiguous {
        signature: String,
        candidates: Vec<String>,
    },
}

/// The compiled body at `address` is physically too small to hold a redirect
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("method body at {address:#x} is {body_len} bytes, patching needs at least {required}")]
pub struct HookTooSmallError {
    pub address: usize,
    pub body_len: usize,
    pub required: usize,
}

/// Lifecycle defect on a bridged instance
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleHazard {
    /// Native constructor ran twice on the same instance
    #[error("native constructor invoked twice on {handle}")]
    DoubleConstruct { handle: ManagedObjectHandle },

    /// Native constructor ran on an instance that was already destroyed
    #[error("native constructor invoked on destroyed instance {handle}")]
    ConstructAfterDestruct { handle: ManagedObjectHandle },

    /// Native destructor ran twice on the same instance
    #[error("native destructor invoked twice on {handle}")]
    DoubleDestruct { handle: ManagedObjectHandle },
}

/// Main error type for all mbridge operations
///
/// # Examples
///
/// ```rust
/// use mbridge::error::{BridgeError, ResolutionError};
///
/// fn describe(err: &BridgeError) -> &'static str {
///     match err {
///         BridgeError::Resolution(ResolutionError::NotFound { .. }) => "missing",
///         BridgeError::Resolution(ResolutionError::Ambiguous { .. }) => "ambiguous",
///         BridgeError::HookTooSmall(_) => "unpatchable",
///         _ => "other",
///     }
/// }
/// ```
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// Signature did not resolve to exactly one method
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// Target body too small for a redirect sequence
    ///
    /// **Recovery strategy:** hook a caller of the method instead
    #[error(transparent)]
    HookTooSmall(#[from] HookTooSmallError),

    /// Double construct/destruct on a bridged instance
    ///
    /// Only returned under `HazardPolicy::Report`; the default policy aborts.
    #[error("lifecycle hazard: {0}")]
    Lifecycle(#[from] LifecycleHazard),

    /// Hook installation attempted after the initialization phase was sealed
    #[error("hook installation is closed; install hooks before finish_initialization()")]
    HookPhaseClosed,

    /// Entry point already carries a redirect
    #[error("method at {address} is already hooked")]
    AlreadyHooked { address: MethodAddress },

    /// Access to an object the collector already reclaimed
    #[error("use after free: {handle} was collected")]
    UseAfterFree { handle: ManagedObjectHandle },

    /// A managed exception is propagating through native code
    #[error("managed exception: {0}")]
    Exception(ManagedException),

    /// A managed exception reached a native frame that does not handle it
    #[error("unhandled managed exception: {0}")]
    UnhandledManagedException(ManagedException),

    /// A type with this full name was already registered
    #[error("type {name} is already defined")]
    TypeAlreadyDefined { name: String },

    /// Class or type lookup failed
    #[error("unknown type {name}")]
    UnknownType { name: String },

    /// Field lookup failed
    #[error("type {type_name} has no field {field}")]
    UnknownField { type_name: String, field: String },

    /// Non-trivial field used before the native constructor ran
    #[error("field {field} of {handle} is not constructed")]
    FieldUnconstructed {
        handle: ManagedObjectHandle,
        field: String,
    },

    /// Non-trivial field slot names a native cell that is not live
    #[error("field {field} of {handle} does not hold a live native cell")]
    DanglingNativeCell {
        handle: ManagedObjectHandle,
        field: String,
    },

    /// Value had an unexpected variant
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    /// Host runtime version has no validated layout contract
    #[error("host runtime {found} is not in the validated set [{}]", .supported.join(", "))]
    UnsupportedRuntime {
        found: String,
        supported: Vec<String>,
    },

    /// Code memory could not be read, written, or re-protected
    #[error("virtual memory error: {0}")]
    VirtualMemory(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Host runtime reported a failure
    #[error("host runtime error: {0}")]
    Host(String),

    /// Internal error - indicates a bug in mbridge
    #[error("internal error: {0}")]
    Internal(String),
}

impl BridgeError {
    /// Check if this error is recoverable
    ///
    /// Resolution and installation errors are local to the caller and leave
    /// no state behind.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BridgeError::Resolution(_)
                | BridgeError::HookTooSmall(_)
                | BridgeError::HookPhaseClosed
                | BridgeError::AlreadyHooked { .. }
                | BridgeError::TypeAlreadyDefined { .. }
                | BridgeError::UnknownType { .. }
                | BridgeError::UnknownField { .. }
                | BridgeError::TypeMismatch { .. }
                | BridgeError::Exception(_)
        )
    }

    /// Check if this error indicates a defect in the caller or in mbridge
    pub fn is_bug(&self) -> bool {
        matches!(
            self,
            BridgeError::Lifecycle(_)
                | BridgeError::UseAfterFree { .. }
                | BridgeError::DanglingNativeCell { .. }
                | BridgeError::UnhandledManagedException(_)
                | BridgeError::Internal(_)
        )
    }
}

impl From<BridgeError> for ManagedException {
    fn from(err: BridgeError) -> Self {
        match err {
            BridgeError::Exception(e) | BridgeError::UnhandledManagedException(e) => e,
            other => ManagedException::new("System.InvalidOperationException", other.to_string()),
        }
    }
}

impl From<ManagedException> for BridgeError {
    fn from(err: ManagedException) -> Self {
        BridgeError::Exception(err)
    }
}

/// Result type alias for mbridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_errors_are_distinct() {
        let missing = ResolutionError::NotFound {
            signature: "Foo::Bar/2".to_string(),
        };
        let ambiguous = ResolutionError::Ambiguous {
            signature: "Foo::Bar/2".to_string(),
            candidates: vec!["Foo::Bar(int, int)".into(), "Foo::Bar(string, int)".into()],
        };

        assert_ne!(missing, ambiguous);
        assert!(ambiguous.to_string().contains("2 candidates"));
    }

    #[test]
    fn test_classification() {
        let too_small: BridgeError = HookTooSmallError {
            address: 0x1000,
            body_len: 8,
            required: 16,
        }
        .into();
        assert!(too_small.is_recoverable());
        assert!(!too_small.is_bug());

        let hazard: BridgeError = LifecycleHazard::DoubleDestruct {
            handle: ManagedObjectHandle::from_raw(0x40),
        }
        .into();
        assert!(hazard.is_bug());
        assert!(!hazard.is_recoverable());
    }

    #[test]
    fn test_managed_exception_roundtrip_keeps_class() {
        let exc = ManagedException::new("System.ArgumentException", "bad");
        let err = BridgeError::from(exc.clone());
        assert_eq!(ManagedException::from(err), exc);

        let wrapped = ManagedException::from(BridgeError::HookPhaseClosed);
        assert_eq!(wrapped.class_name, "System.InvalidOperationException");
    }
}
