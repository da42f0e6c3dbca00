//! Schema and context registries.
//!
//! The schema registry is read-mostly: registration write-locks, runs the
//! satisfiability check, and rejects statically impossible schemas; lookups
//! read-lock. The context registry maps short names to URIs process-wide.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use once_cell::sync::Lazy;
use parking_lot::RwLock;

use crate::defs;
use crate::error::{Error, Result};
use crate::eval::OpContext;
use crate::ir::Node;
use crate::sat;
use crate::schema::Schema;

/// Cross-schema definition reference (`!from(schema, def)` resolved form).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FromRef {
    pub schema: String,
    pub def: String,
    pub args: Vec<String>,
}

/// Registry of parsed schemas keyed by signature name (case-sensitive).
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: RwLock<BTreeMap<String, Arc<Schema>>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        SchemaRegistry::default()
    }

    /// Registers a schema. Duplicates are rejected; the satisfiability
    /// engine runs here and rejects impossible schemas with a cycle
    /// diagnostic.
    pub fn register(&self, schema: Schema) -> Result<()> {
        let name = schema.signature.name.clone();
        if self.schemas.read().contains_key(&name) {
            return Err(Error::reference(format!("schema {name:?} is already registered")));
        }
        sat::check_schema(&schema)?;
        for (short, uri) in &schema.context.short_to_uri {
            register_context(short, uri)?;
        }
        self.schemas.write().insert(name, Arc::new(schema));
        Ok(())
    }

    pub fn resolve_schema(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.read().get(name).cloned()
    }

    /// Resolves a definition from another schema, instantiating templates
    /// with the supplied arguments.
    pub fn resolve_definition(&self, reference: &FromRef) -> Result<Node> {
        let schema = self.resolve_schema(&reference.schema).ok_or_else(|| {
            Error::reference(format!("unknown schema {:?}", reference.schema))
        })?;
        let ctx = OpContext::for_schema(&schema, None)?;
        let expr = if reference.args.is_empty() {
            reference.def.clone()
        } else {
            format!("{}({})", reference.def, reference.args.join(","))
        };
        defs::expand_ref(&expr, &ctx)
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.read().keys().cloned().collect()
    }
}

#[derive(Debug, Default)]
struct ContextMaps {
    short_to_uri: BTreeMap<String, String>,
    uri_to_shorts: BTreeMap<String, BTreeSet<String>>,
}

static CONTEXTS: Lazy<RwLock<ContextMaps>> = Lazy::new(|| RwLock::new(ContextMaps::default()));

/// Binds a short context name to a URI. Rebinding to a different URI is an
/// error; rebinding to the same URI is a no-op.
pub fn register_context(short: &str, uri: &str) -> Result<()> {
    let mut maps = CONTEXTS.write();
    if let Some(existing) = maps.short_to_uri.get(short) {
        if existing != uri {
            return Err(Error::reference(format!(
                "context short name {short:?} already bound to {existing:?}"
            )));
        }
        return Ok(());
    }
    maps.short_to_uri.insert(short.to_string(), uri.to_string());
    maps.uri_to_shorts
        .entry(uri.to_string())
        .or_default()
        .insert(short.to_string());
    Ok(())
}

/// Resolves a short context name to its URI.
pub fn context_uri(short: &str) -> Option<String> {
    CONTEXTS.read().short_to_uri.get(short).cloned()
}

/// All short names bound to a URI, sorted.
pub fn context_shorts(uri: &str) -> Vec<String> {
    CONTEXTS
        .read()
        .uri_to_shorts
        .get(uri)
        .map(|set| set.iter().cloned().collect())
        .unwrap_or_default()
}
