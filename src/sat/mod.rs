//! # Satisfiability engine
//!
//! Decides, for every definition reachable from a schema's accept
//! constraint, whether at least one concrete document can inhabit it. One
//! check subsumes contradictory constraints (string AND integer) and
//! inescapable recursion (a node type with no nullable / array /
//! alternative escape).
//!
//! Encoding: one propositional variable per (position, primitive-type)
//! pair, allocated while walking the schema IR; a mutex clause forbids two
//! primitive types at the same position; boolean operators keep their
//! children at the current position; definition references expand inline,
//! with self-references and already-visiting references contributing
//! `false`. The circuit goes to CNF by Tseitin gates and a CDCL solver
//! answers; UNSAT rejects the schema with a cycle-localized diagnostic.
//!
//! Soundness: the engine never claims UNSAT for a satisfiable schema.
//! Operators without a type projection (`!glob`, `!has-path`, ...) encode
//! as unconstrained.

pub mod depgraph;

use std::collections::{BTreeMap, BTreeSet, HashSet};

use tracing::trace;
use varisat::{ExtendFormula, Lit, Solver};

use crate::config;
use crate::defs::{self, DefValue};
use crate::error::{Error, Result};
use crate::eval::OpContext;
use crate::ir::{Kind, Node, Value};
use crate::ops;
use crate::schema::Schema;
use crate::tag::{bare_head, parse_tag, tag_args, TagTree};

/// Primitive document types carried by positional variables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Prim {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

fn prim_of(kind: Kind) -> Option<Prim> {
    match kind {
        Kind::Null => Some(Prim::Null),
        Kind::Bool => Some(Prim::Bool),
        Kind::Number => Some(Prim::Number),
        Kind::String => Some(Prim::String),
        Kind::Array => Some(Prim::Array),
        Kind::Object => Some(Prim::Object),
        Kind::Comment => None,
    }
}

struct Encoder<'a> {
    solver: Solver<'static>,
    true_lit: Lit,
    vars: BTreeMap<(String, Prim), Lit>,
    ctx: OpContext,
    tag_names: &'a BTreeSet<String>,
    /// Definition whose inhabitation is being decided.
    target: Option<&'a str>,
    /// Definitions being expanded along the current path.
    visiting: HashSet<String>,
}

impl<'a> Encoder<'a> {
    fn new(ctx: OpContext, tag_names: &'a BTreeSet<String>, target: Option<&'a str>) -> Self {
        let mut solver = Solver::new();
        let true_lit = solver.new_lit();
        solver.add_clause(&[true_lit]);
        Encoder {
            solver,
            true_lit,
            vars: BTreeMap::new(),
            ctx,
            tag_names,
            target,
            visiting: HashSet::new(),
        }
    }

    /// Variable for (position, primitive), with mutex clauses against every
    /// other primitive already allocated at the position.
    fn var(&mut self, pos: &str, prim: Prim) -> Lit {
        if let Some(lit) = self.vars.get(&(pos.to_string(), prim)) {
            return *lit;
        }
        let lit = self.solver.new_lit();
        let others: Vec<Lit> = self
            .vars
            .range((pos.to_string(), Prim::Null)..=(pos.to_string(), Prim::Object))
            .map(|(_, l)| *l)
            .collect();
        for other in others {
            self.solver.add_clause(&[!lit, !other]);
        }
        self.vars.insert((pos.to_string(), prim), lit);
        if config::debug().nullability && prim == Prim::Null {
            trace!(pos, "null variable allocated");
        }
        lit
    }

    fn and_gate(&mut self, inputs: &[Lit]) -> Lit {
        match inputs {
            [] => self.true_lit,
            [single] => *single,
            _ => {
                let gate = self.solver.new_lit();
                let mut long: Vec<Lit> = vec![gate];
                for input in inputs {
                    self.solver.add_clause(&[!gate, *input]);
                    long.push(!*input);
                }
                self.solver.add_clause(&long);
                gate
            }
        }
    }

    fn or_gate(&mut self, inputs: &[Lit]) -> Lit {
        match inputs {
            [] => !self.true_lit,
            [single] => *single,
            _ => {
                let gate = self.solver.new_lit();
                let mut long: Vec<Lit> = vec![!gate];
                for input in inputs {
                    self.solver.add_clause(&[gate, !*input]);
                    long.push(*input);
                }
                self.solver.add_clause(&long);
                gate
            }
        }
    }

    fn encode(&mut self, node: &Node, pos: &str) -> Result<Lit> {
        if config::debug().eval {
            trace!(pos, node = %node, "encode");
        }
        if !node.tag.is_empty() {
            if let Some(expr) = defs::tag_ref_expr(&node.tag) {
                return self.encode_ref(&expr, pos);
            }
            return self.encode_tagged(node, pos);
        }
        match &node.value {
            Value::Null => Ok(self.var(pos, Prim::Null)),
            Value::Bool(_) => Ok(self.var(pos, Prim::Bool)),
            Value::Int(_) | Value::Float(_) => Ok(self.var(pos, Prim::Number)),
            Value::String(s) => match defs::ref_expr(s).map(str::to_string) {
                Some(expr) => self.encode_ref(&expr, pos),
                None => Ok(self.var(pos, Prim::String)),
            },
            Value::Array(els) => {
                let mut lits = Vec::with_capacity(els.len());
                for (i, el) in els.iter().enumerate() {
                    let lit = self.encode(el, &format!("{pos}[{i}]"))?;
                    lits.push(lit);
                }
                Ok(self.and_gate(&lits))
            }
            Value::Object { .. } => {
                let entries: Vec<(String, Node)> = node
                    .entries()
                    .map(|(k, v)| (k.to_string(), v.detached()))
                    .collect();
                let mut lits = Vec::with_capacity(entries.len());
                for (key, value) in &entries {
                    let lit = self.encode(value, &format!("{pos}.{key}"))?;
                    lits.push(lit);
                }
                Ok(self.and_gate(&lits))
            }
            Value::Comment { .. } => Ok(self.true_lit),
        }
    }

    fn encode_tagged(&mut self, node: &Node, pos: &str) -> Result<Lit> {
        let (head, _args, _rest) = tag_args(&node.tag)?;
        let name = bare_head(&head);
        match name.as_str() {
            "not" => {
                let (_, child) = ops::strip_head(node)?;
                Ok(!self.encode(&child, pos)?)
            }
            "or" => {
                let (_, child) = ops::strip_head(node)?;
                match &child.value {
                    Value::Array(branches) => {
                        let mut lits = Vec::with_capacity(branches.len());
                        for branch in branches {
                            let lit = self.encode(branch, pos)?;
                            lits.push(lit);
                        }
                        Ok(self.or_gate(&lits))
                    }
                    _ => self.encode(&child, pos),
                }
            }
            "and" => {
                let (_, child) = ops::strip_head(node)?;
                match &child.value {
                    Value::Array(branches) => {
                        let mut lits = Vec::with_capacity(branches.len());
                        for branch in branches {
                            let lit = self.encode(branch, pos)?;
                            lits.push(lit);
                        }
                        Ok(self.and_gate(&lits))
                    }
                    _ => self.encode(&child, pos),
                }
            }
            "all" => {
                let (_, child) = ops::strip_head(node)?;
                // The empty collection inhabits an !all constraint; only a
                // non-null scalar exemplar projects through.
                match child.value {
                    Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) => {
                        self.encode(&child, pos)
                    }
                    _ => Ok(self.true_lit),
                }
            }
            "irtype" => {
                let (_, child) = ops::strip_head(node)?;
                match prim_of(child.kind()) {
                    Some(prim) => Ok(self.var(pos, prim)),
                    None => Ok(self.true_lit),
                }
            }
            "bracket" => {
                let (_, child) = ops::strip_head(node)?;
                self.encode(&child, pos)
            }
            "null" => Ok(self.var(pos, Prim::Null)),
            "bool" => Ok(self.var(pos, Prim::Bool)),
            "number" | "int" | "float" => Ok(self.var(pos, Prim::Number)),
            "string" => Ok(self.var(pos, Prim::String)),
            "array" => Ok(self.var(pos, Prim::Array)),
            "object" => Ok(self.var(pos, Prim::Object)),
            "sparsearray" => {
                let array = self.var(pos, Prim::Array);
                let object = self.var(pos, Prim::Object);
                Ok(self.or_gate(&[array, object]))
            }
            // Cross-schema references were validated at their own
            // registration.
            "schema" | "from" => Ok(self.true_lit),
            other => {
                if ops::lookup(other).is_some() {
                    // Registered operator without a type projection.
                    Ok(self.true_lit)
                } else if self.tag_names.contains(other) {
                    let (_, stripped) = ops::strip_head(node)?;
                    self.encode(&stripped, pos)
                } else {
                    Err(Error::reference(format!(
                        "schema references undefined operation !{other}"
                    )))
                }
            }
        }
    }

    fn encode_ref(&mut self, expr: &str, pos: &str) -> Result<Lit> {
        let (base, raw_args) = defs::parse_def_call(expr)?;
        // A reference cannot bottom out in the definition being decided or
        // in anything already on the expansion path.
        if self.target == Some(base.as_str()) || self.visiting.contains(&base) {
            return Ok(!self.true_lit);
        }
        let shadowed = matches!(self.ctx.defs.get(&base), Some(DefValue::Template { .. }));
        if !raw_args.is_empty() && !shadowed && defs::BUILTIN_CTORS.contains(&base.as_str()) {
            // Built-in constructors always have an empty or null inhabitant.
            return Ok(self.true_lit);
        }
        let expanded = defs::expand_ref(expr, &self.ctx)?;
        self.visiting.insert(base.clone());
        let lit = self.encode(&expanded, pos);
        self.visiting.remove(&base);
        lit
    }

    fn solve(&mut self, root: Lit) -> Result<bool> {
        self.solver.assume(&[root]);
        self.solver.solve().map_err(|e| Error::solver(e.to_string()))
    }
}

/// Names appearing in reference position inside tags (bracketed segments
/// and `.`-marker roots) and their arguments.
fn collect_tag_refs(tag: &str, out: &mut BTreeSet<String>) {
    fn walk(seg: &TagTree, in_ref: bool, out: &mut BTreeSet<String>) {
        let here = in_ref || seg.is_ref;
        if here {
            out.insert(seg.name.clone());
        }
        for arg in &seg.args {
            walk(arg, here, out);
        }
        if let Some(rest) = &seg.rest {
            walk(rest, in_ref, out);
        }
    }
    if let Ok(parsed) = parse_tag(tag) {
        walk(&parsed.tree, parsed.marker == '.', out);
    }
}

fn collect_call_refs(expr: &str, out: &mut BTreeSet<String>) {
    if let Ok((base, args)) = defs::parse_def_call(expr) {
        out.insert(base);
        for arg in args {
            collect_call_refs(&arg, out);
        }
    }
}

/// All candidate definition names referenced inside a node.
pub(crate) fn collect_refs(node: &Node, out: &mut BTreeSet<String>) {
    let _ = node.visit(&mut |n, is_post| {
        if is_post {
            return Ok(true);
        }
        if !n.tag.is_empty() {
            collect_tag_refs(&n.tag, out);
        }
        if let Some(expr) = n.as_str().and_then(defs::ref_expr) {
            collect_call_refs(expr, out);
        }
        Ok(true)
    });
}

/// Definitions transitively referenced from the accept constraint.
fn reachable_defs(schema: &Schema, defined: &BTreeSet<String>) -> Vec<String> {
    let bodies: BTreeMap<String, &Node> = schema
        .define
        .iter()
        .filter_map(|(key, body)| {
            defs::parse_def_name(key).ok().map(|(name, _)| (name, body))
        })
        .collect();

    let mut seen: BTreeSet<String> = BTreeSet::new();
    let mut queue: Vec<String> = Vec::new();
    if let Some(accept) = &schema.accept {
        let mut refs = BTreeSet::new();
        collect_refs(accept, &mut refs);
        queue.extend(refs.into_iter().filter(|n| defined.contains(n)));
    }
    while let Some(name) = queue.pop() {
        if !seen.insert(name.clone()) {
            continue;
        }
        if let Some(body) = bodies.get(&name) {
            let mut refs = BTreeSet::new();
            collect_refs(body, &mut refs);
            queue.extend(refs.into_iter().filter(|n| defined.contains(n) && !seen.contains(n)));
        }
    }
    seen.into_iter().collect()
}

/// Checks every definition reachable from `accept`, then `accept` itself.
/// UNSAT rejects the schema with a cycle-localized diagnostic.
pub fn check_schema(schema: &Schema) -> Result<()> {
    let Some(accept) = &schema.accept else {
        return Ok(());
    };
    let env = defs::load_env(&schema.define)?;
    let tag_names: BTreeSet<String> = schema.tags.keys().cloned().collect();
    let defined: BTreeSet<String> = schema
        .define
        .keys()
        .filter_map(|key| defs::parse_def_name(key).ok().map(|(name, _)| name))
        .collect();

    let mut base_ctx = OpContext::new();
    base_ctx.defs = env;
    base_ctx.tag_names = tag_names.clone();

    for name in reachable_defs(schema, &defined) {
        let body = match base_ctx.defs.get(&name) {
            Some(DefValue::Value(body)) => body.clone(),
            // Parameterized templates are decided at each instantiated
            // reference, where concrete arguments exist.
            Some(DefValue::Template { .. }) | None => continue,
        };
        let mut encoder = Encoder::new(base_ctx.clone(), &tag_names, Some(name.as_str()));
        let root = encoder.encode(&body, "")?;
        let satisfiable = encoder.solve(root)?;
        if config::debug().eval {
            trace!(def = %name, satisfiable, "definition checked");
        }
        if !satisfiable {
            return Err(Error::cycle(depgraph::diagnose(schema, &name)));
        }
    }

    let mut encoder = Encoder::new(base_ctx, &tag_names, None);
    let root = encoder.encode(accept, "")?;
    if !encoder.solve(root)? {
        return Err(Error::cycle(depgraph::diagnose_accept(schema)));
    }
    Ok(())
}
