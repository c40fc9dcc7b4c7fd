//! Method Resolver - signature to compiled entry address
//!
//! Turns `(namespace, class, method, arity)` or a full typed signature into
//! the address and body size of exactly one compiled method.
//!
//! - Zero matches is [`ResolutionError::NotFound`], several is
//!   [`ResolutionError::Ambiguous`]; the two are never conflated.
//! - Successful resolutions are cached for the process lifetime, so repeated
//!   lookups are deterministic and cheap. Failures are not cached.
//!
//! A resolved address is only meaningful for the host runtime version it
//! was obtained from.

pub mod signature;

pub use signature::{normalize_type, MethodSignature, Params};

use crate::error::{ResolutionError, Result};
use crate::host::{MetadataSource, MethodAddress, MethodMetadata};
use crate::logging::{log_event, BridgeEvent};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A method that resolved to exactly one compiled body
///
/// Only the resolver creates these, so [`HookTable::install`] never sees an
/// address the host did not report.
///
/// ```compile_fail
/// use mbridge::host::{MethodAddress, MethodMetadata};
/// use mbridge::resolver::ResolvedMethod;
///
/// let forged = ResolvedMethod::new(MethodMetadata {
///     namespace: String::new(),
///     class: "Foo".into(),
///     name: "Baz".into(),
///     params: vec!["int".into()],
///     return_type: "int".into(),
///     address: MethodAddress::from_raw(0x10),
///     body_len: 64,
///     is_virtual: false,
/// });
/// ```
///
/// [`HookTable::install`]: crate::hook::HookTable::install
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMethod {
    metadata: MethodMetadata,
}

impl ResolvedMethod {
    pub(crate) fn new(metadata: MethodMetadata) -> Self {
        Self { metadata }
    }

    pub fn address(&self) -> MethodAddress {
        self.metadata.address
    }

    /// Size of the compiled body in bytes
    pub fn body_len(&self) -> usize {
        self.metadata.body_len
    }

    pub fn metadata(&self) -> &MethodMetadata {
        &self.metadata
    }

    pub fn signature(&self) -> String {
        self.metadata.display_signature()
    }
}

/// Resolution cache counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

pub struct MethodResolver {
    source: Arc<dyn MetadataSource>,
    cache: RwLock<FxHashMap<MethodSignature, ResolvedMethod>>,
    caching: bool,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MethodResolver {
    pub fn new(source: Arc<dyn MetadataSource>, caching: bool) -> Self {
        Self {
            source,
            cache: RwLock::new(FxHashMap::default()),
            caching,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Resolve by name and arity
    pub fn resolve(
        &self,
        namespace: &str,
        class: &str,
        method: &str,
        arity: usize,
    ) -> Result<ResolvedMethod> {
        self.resolve_signature(&MethodSignature::new(namespace, class, method, arity))
    }

    /// Resolve a parsed signature
    pub fn resolve_signature(&self, signature: &MethodSignature) -> Result<ResolvedMethod> {
        if self.caching {
            if let Some(hit) = self.cache.read().get(signature) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                log_event(BridgeEvent::MethodResolved {
                    signature: signature.to_string(),
                    address: hit.address().as_raw(),
                    cached: true,
                });
                return Ok(hit.clone());
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let mut candidates: Vec<MethodMetadata> = self
            .source
            .find_methods(
                &signature.namespace,
                &signature.class,
                &signature.method,
                signature.arity(),
            )
            .into_iter()
            .filter(|m| signature.matches(m))
            .collect();

        let resolved = match candidates.len() {
            0 => {
                return Err(ResolutionError::NotFound {
                    signature: signature.to_string(),
                }
                .into())
            },
            1 => ResolvedMethod::new(candidates.remove(0)),
            _ => {
                let mut names: Vec<String> =
                    candidates.iter().map(|m| m.display_signature()).collect();
                names.sort();
                return Err(ResolutionError::Ambiguous {
                    signature: signature.to_string(),
                    candidates: names,
                }
                .into());
            },
        };

        log_event(BridgeEvent::MethodResolved {
            signature: signature.to_string(),
            address: resolved.address().as_raw(),
            cached: false,
        });

        if self.caching {
            // A concurrent resolver may have won; keep the first entry
            let mut cache = self.cache.write();
            let entry = cache
                .entry(signature.clone())
                .or_insert_with(|| resolved.clone());
            return Ok(entry.clone());
        }
        Ok(resolved)
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            entries: self.cache.read().len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}
