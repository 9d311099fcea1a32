//! Per-backend function name remapping.
//!
//! Each backend starts from the defaults its dialect declares; user code can
//! append entries, either on an owned [`FunctionRegistry`] handed to a
//! compiler or on the process-wide default through
//! [`register_function_mapping`].

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock, PoisonError, RwLock};

use crate::dialect::{Backend, select_dialect};
use crate::expr::FunctionCall;

type Resolver = Arc<dyn Fn(&FunctionCall) -> String + Send + Sync>;

/// Target of a remap entry.
#[derive(Clone)]
pub enum FunctionName {
    /// Always compile under this name.
    Fixed(String),
    /// Pick the name from the call itself (argument-dependent remapping).
    Resolver(Resolver),
}

impl FunctionName {
    pub fn fixed(name: &str) -> Self {
        Self::Fixed(name.to_string())
    }

    pub fn resolver<F>(f: F) -> Self
    where
        F: Fn(&FunctionCall) -> String + Send + Sync + 'static,
    {
        Self::Resolver(Arc::new(f))
    }

    pub fn resolve(&self, call: &FunctionCall) -> String {
        match self {
            Self::Fixed(name) => name.clone(),
            Self::Resolver(f) => f(call),
        }
    }
}

impl fmt::Debug for FunctionName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(name) => f.debug_tuple("Fixed").field(name).finish(),
            Self::Resolver(_) => f.write_str("Resolver(..)"),
        }
    }
}

/// Remap tables for every backend, keyed by lower-cased generic name.
#[derive(Debug, Clone, Default)]
pub struct FunctionRegistry {
    tables: HashMap<Backend, HashMap<String, FunctionName>>,
}

impl FunctionRegistry {
    /// A registry with no remapping at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry seeded with every backend's default remap table.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        for backend in Backend::ALL {
            registry.extend(backend, select_dialect(backend).function_names());
        }
        registry
    }

    /// Add entries for `backend`; later entries win over earlier ones.
    pub fn extend<I, S>(&mut self, backend: Backend, mapping: I)
    where
        I: IntoIterator<Item = (S, FunctionName)>,
        S: AsRef<str>,
    {
        let table = self.tables.entry(backend).or_default();
        for (generic, target) in mapping {
            table.insert(generic.as_ref().to_ascii_lowercase(), target);
        }
    }

    /// Name `call` compiles to on `backend`; misses keep the generic name.
    pub fn resolve(&self, backend: Backend, call: &FunctionCall) -> String {
        self.tables
            .get(&backend)
            .and_then(|table| table.get(&call.name.to_ascii_lowercase()))
            .map(|target| target.resolve(call))
            .unwrap_or_else(|| call.name.clone())
    }
}

static DEFAULT_REGISTRY: LazyLock<RwLock<FunctionRegistry>> =
    LazyLock::new(|| RwLock::new(FunctionRegistry::with_defaults()));

/// Snapshot of the process-wide registry.
pub fn default_registry() -> FunctionRegistry {
    DEFAULT_REGISTRY
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .clone()
}

/// Append entries to the process-wide registry.
///
/// Compilers created afterwards see the new entries; compilers that already
/// exist keep their snapshot.
///
/// ```
/// use spatial_dialects::{Backend, FunctionName, register_function_mapping};
///
/// register_function_mapping(
///     Backend::SQLite,
///     [("ST_MyHelper", FunctionName::fixed("MyHelper"))],
/// );
/// ```
pub fn register_function_mapping<I, S>(backend: Backend, mapping: I)
where
    I: IntoIterator<Item = (S, FunctionName)>,
    S: AsRef<str>,
{
    let mapping: Vec<(S, FunctionName)> = mapping.into_iter().collect();
    tracing::debug!(?backend, entries = mapping.len(), "registering function mapping");
    DEFAULT_REGISTRY
        .write()
        .unwrap_or_else(PoisonError::into_inner)
        .extend(backend, mapping);
}
