//! # Tony Core Engines
//!
//! Core engines for the Tony document format: a tag-driven match/patch
//! algebra and a schema satisfiability engine, sharing one IR, one tag
//! syntax, and one definition environment.
//!
//! ## Pipeline Architecture
//!
//! ```text
//! Document / Pattern IR
//!     ↓
//! [Tag parser]            → head + args + chained rest
//!     ↓
//! [Operator registry]     → instantiated operators
//!     ↓
//! [Match/Patch driver]    → bool / patched IR
//!     ↓
//! [Diff engine]           → patch payloads in the same vocabulary
//!
//! Schema IR
//!     ↓
//! [Schema parser]         → {context, signature, tags, define, accept}
//!     ↓
//! [Satisfiability engine] → positional variables + mutexes + CDCL
//!     ↓
//! [Schema registry]       → validated, resolvable schemas
//! ```
//!
//! ## Usage
//!
//! ```rust
//! use tony::{match_nodes, Node, OpContext};
//!
//! let doc = Node::from_map(vec![("name", Node::from_string("ada"))]);
//! let pattern = Node::from_map(vec![("name", Node::from_string("a*").with_tag("!glob"))]);
//!
//! let mut ctx = OpContext::new();
//! assert!(match_nodes(&doc, &pattern, &mut ctx).unwrap());
//! ```
//!
//! ## Module Organization
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `ir` | Tagged tree IR, traversal, path queries |
//! | `tag` | Tag grammar and TagTree |
//! | `ops` | Operator registry and built-in operators |
//! | `defs` | Definition environment and instantiation |
//! | `eval` | Match/patch driver |
//! | `diff` | Structural diff producing applicable patches |
//! | `schema` | Schema parsing and registries |
//! | `sat` | Satisfiability engine and cycle diagnostics |
//! | `codec` | JSON bridge (`parse`/`encode` instantiation) |
//! | `config` | Debug-flag configuration |

pub mod codec;
pub mod config;
pub mod defs;
pub mod diff;
pub mod error;
pub mod eval;
pub mod ir;
pub mod ops;
pub mod sat;
pub mod schema;
pub mod tag;

pub use crate::diff::{diff, diff_array_by_key};
pub use crate::error::{Error, Result};
pub use crate::eval::{match_nodes, patch_nodes, validate, OpContext};
pub use crate::ir::path::{get_kpath, get_path};
pub use crate::ir::{EqOptions, Kind, Node, Value};
pub use crate::sat::check_schema;
pub use crate::schema::registry::{FromRef, SchemaRegistry};
pub use crate::schema::{parse_schema, Schema};
pub use crate::tag::{parse_tag, tag_args, Tag, TagTree};
