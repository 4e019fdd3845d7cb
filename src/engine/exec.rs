//! Statement execution for the reference engine
//!
//! Two execution paths share the same per-clause helpers:
//!
//! - `stream`: read statements without aggregation become a lazy row
//!   iterator over an owned graph snapshot, so huge `UNWIND range(...)`
//!   results are produced one row at a time
//! - `run_clauses` + `project`: eager evaluation for write statements and
//!   aggregations, polling the cancellation token once per row

use std::collections::{BTreeMap, HashMap, HashSet};
use std::iter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::statement::{BinaryOp, Clause, Direction, Expr, NodePattern, PathPattern, ReturnItem};
use super::QueryResult;
use crate::cancel::CancellationToken;
use crate::error::{EngineError, EngineResult};
use crate::messages::Parameters;

// ============================================================================
// Graph
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub id: u64,
    pub labels: Vec<String>,
    pub properties: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relationship {
    pub id: u64,
    pub rel_type: String,
    pub start: u64,
    pub end: u64,
    pub properties: Map<String, Value>,
}

impl Relationship {
    fn touches(&self, node: u64) -> bool {
        self.start == node || self.end == node
    }
}

/// One write, replayed onto the latest committed graph at commit time.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    CreateNode(Node),
    CreateRel(Relationship),
    DeleteNode(u64),
    DeleteRel(u64),
}

#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub nodes: BTreeMap<u64, Node>,
    pub rels: BTreeMap<u64, Relationship>,
}

impl Graph {
    pub fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::CreateNode(node) => {
                self.nodes.insert(node.id, node.clone());
            }
            WriteOp::CreateRel(rel) => {
                self.rels.insert(rel.id, rel.clone());
            }
            WriteOp::DeleteNode(id) => {
                self.nodes.remove(id);
            }
            WriteOp::DeleteRel(id) => {
                self.rels.remove(id);
            }
        }
    }

    /// Commit-time consistency check of `ops` against this (already applied) graph.
    /// Deleted nodes are checked before relationship endpoints.
    pub fn validate(&self, ops: &[WriteOp]) -> EngineResult<()> {
        let mut deleted = HashSet::new();
        for op in ops {
            if let WriteOp::DeleteNode(id) = op {
                if self.rels.values().any(|r| r.touches(*id)) {
                    return Err(EngineError::ConstraintViolation(format!(
                        "Cannot delete node<{}>, because it still has relationships. \
                         To delete this node, you must first delete its relationships.",
                        id
                    )));
                }
                deleted.insert(*id);
            }
        }

        for op in ops {
            if let WriteOp::CreateRel(rel) = op {
                if !self.rels.contains_key(&rel.id) {
                    continue;
                }
                for node in [rel.start, rel.end] {
                    if !self.nodes.contains_key(&node) && !deleted.contains(&node) {
                        return Err(EngineError::ConstraintViolation(format!(
                            "Node[{}] was deleted by another transaction",
                            node
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn relationship_count(&self) -> usize {
        self.rels.len()
    }
}

/// Monotonic id source shared by every transaction of a database.
#[derive(Debug, Default)]
pub struct IdAllocator {
    next_node: AtomicU64,
    next_rel: AtomicU64,
}

impl IdAllocator {
    pub fn node(&self) -> u64 {
        self.next_node.fetch_add(1, Ordering::Relaxed)
    }

    pub fn relationship(&self) -> u64 {
        self.next_rel.fetch_add(1, Ordering::Relaxed)
    }
}

// ============================================================================
// Values and rows
// ============================================================================

/// Runtime value bound to a variable
#[derive(Debug, Clone, PartialEq)]
pub enum Val {
    Value(Value),
    Node(u64),
    Rel(u64),
}

pub type Row = HashMap<String, Val>;

type RowIter = Box<dyn Iterator<Item = EngineResult<Row>> + Send>;

fn to_json(val: &Val, graph: &Graph) -> Value {
    match val {
        Val::Value(v) => v.clone(),
        Val::Node(id) => match graph.nodes.get(id) {
            Some(node) => serde_json::json!({
                "id": node.id,
                "labels": node.labels,
                "properties": node.properties,
            }),
            None => serde_json::json!({ "id": id }),
        },
        Val::Rel(id) => match graph.rels.get(id) {
            Some(rel) => serde_json::json!({
                "id": rel.id,
                "type": rel.rel_type,
                "start": rel.start,
                "end": rel.end,
                "properties": rel.properties,
            }),
            None => serde_json::json!({ "id": id }),
        },
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "Null",
        Value::Bool(_) => "Boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "Integer",
        Value::Number(_) => "Float",
        Value::String(_) => "String",
        Value::Array(_) => "List",
        Value::Object(_) => "Map",
    }
}

fn type_mismatch(op: &str, left: &Value, right: &Value) -> EngineError {
    EngineError::Semantic(format!(
        "Cannot apply {} to {} and {}",
        op,
        type_name(left),
        type_name(right)
    ))
}

// ============================================================================
// Expression evaluation
// ============================================================================

pub fn eval(expr: &Expr, row: &Row, graph: &Graph, params: &Parameters) -> EngineResult<Val> {
    match expr {
        Expr::Literal(v) => Ok(Val::Value(v.clone())),
        Expr::List(items) => {
            let values = items
                .iter()
                .map(|e| eval_json(e, row, graph, params))
                .collect::<EngineResult<Vec<_>>>()?;
            Ok(Val::Value(Value::Array(values)))
        }
        Expr::Map(entries) => Ok(Val::Value(Value::Object(eval_properties(entries, row, graph, params)?))),
        Expr::Param(name) => params
            .get(name)
            .cloned()
            .map(Val::Value)
            .ok_or_else(|| EngineError::ParameterMissing(name.clone())),
        Expr::Variable(name) => row
            .get(name)
            .cloned()
            .ok_or_else(|| EngineError::Semantic(format!("Variable `{}` not defined", name))),
        Expr::Property(inner, key) => {
            let value = match eval(inner, row, graph, params)? {
                Val::Node(id) => graph.nodes.get(&id).and_then(|n| n.properties.get(key)).cloned(),
                Val::Rel(id) => graph.rels.get(&id).and_then(|r| r.properties.get(key)).cloned(),
                Val::Value(Value::Object(map)) => map.get(key).cloned(),
                Val::Value(Value::Null) => None,
                Val::Value(other) => {
                    return Err(EngineError::Semantic(format!(
                        "Type mismatch: expected a map but was {}",
                        type_name(&other)
                    )))
                }
            };
            Ok(Val::Value(value.unwrap_or(Value::Null)))
        }
        Expr::Negate(inner) => {
            let value = eval_json(inner, row, graph, params)?;
            arithmetic(BinaryOp::Sub, &Value::from(0), &value).map(Val::Value)
        }
        Expr::Binary(op, left, right) => {
            let left = eval_json(left, row, graph, params)?;
            let right = eval_json(right, row, graph, params)?;
            arithmetic(*op, &left, &right).map(Val::Value)
        }
        Expr::Call { name, args } => match name.as_str() {
            "range" => {
                let values: Vec<Value> = range_iter(args, row, graph, params)?.map(Value::from).collect();
                Ok(Val::Value(Value::Array(values)))
            }
            "id" => match eval(&args[0], row, graph, params)? {
                Val::Node(id) | Val::Rel(id) => Ok(Val::Value(Value::from(id))),
                Val::Value(Value::Null) => Ok(Val::Value(Value::Null)),
                Val::Value(other) => Err(EngineError::Semantic(format!(
                    "Type mismatch: expected Node or Relationship but was {}",
                    type_name(&other)
                ))),
            },
            _ => Err(EngineError::Semantic(format!(
                "Invalid use of aggregating function {}(...) in this context",
                name
            ))),
        },
        Expr::CountStar => Err(EngineError::Semantic(
            "Invalid use of aggregating function count(...) in this context".to_string(),
        )),
    }
}

fn eval_json(expr: &Expr, row: &Row, graph: &Graph, params: &Parameters) -> EngineResult<Value> {
    eval(expr, row, graph, params).map(|v| to_json(&v, graph))
}

fn eval_properties(
    entries: &[(String, Expr)],
    row: &Row,
    graph: &Graph,
    params: &Parameters,
) -> EngineResult<Map<String, Value>> {
    let mut map = Map::new();
    for (key, expr) in entries {
        let value = eval_json(expr, row, graph, params)?;
        if !value.is_null() {
            map.insert(key.clone(), value);
        }
    }
    Ok(map)
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value) -> EngineResult<Value> {
    if left.is_null() || right.is_null() {
        return Ok(Value::Null);
    }

    if op == BinaryOp::Add {
        match (left, right) {
            (Value::String(a), Value::String(b)) => return Ok(Value::from(format!("{}{}", a, b))),
            (Value::String(a), b @ Value::Number(_)) => return Ok(Value::from(format!("{}{}", a, b))),
            (a @ Value::Number(_), Value::String(b)) => return Ok(Value::from(format!("{}{}", a, b))),
            (Value::Array(a), Value::Array(b)) => {
                return Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Array(a), b) => {
                let mut list = a.clone();
                list.push(b.clone());
                return Ok(Value::Array(list));
            }
            _ => {}
        }
    }

    let symbol = match op {
        BinaryOp::Add => "+",
        BinaryOp::Sub => "-",
        BinaryOp::Mul => "*",
        BinaryOp::Div => "/",
        BinaryOp::Mod => "%",
    };

    if let (Some(a), Some(b)) = (left.as_i64(), right.as_i64()) {
        let result = match op {
            BinaryOp::Add => a.checked_add(b),
            BinaryOp::Sub => a.checked_sub(b),
            BinaryOp::Mul => a.checked_mul(b),
            BinaryOp::Div | BinaryOp::Mod if b == 0 => {
                return Err(EngineError::Arithmetic("/ by zero".to_string()))
            }
            BinaryOp::Div => a.checked_div(b),
            BinaryOp::Mod => a.checked_rem(b),
        };
        return result
            .map(Value::from)
            .ok_or_else(|| EngineError::Arithmetic("long overflow".to_string()));
    }

    if let (Some(a), Some(b)) = (left.as_f64(), right.as_f64()) {
        let result = match op {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Mod => a % b,
        };
        return Ok(Value::from(result));
    }

    Err(type_mismatch(symbol, left, right))
}

// ============================================================================
// Clause helpers
// ============================================================================

/// Lazy `range(start, end[, step])`, inclusive on both ends.
struct RangeIter {
    next: i64,
    end: i64,
    step: i64,
    done: bool,
}

impl Iterator for RangeIter {
    type Item = i64;

    fn next(&mut self) -> Option<i64> {
        if self.done || (self.step > 0 && self.next > self.end) || (self.step < 0 && self.next < self.end) {
            return None;
        }
        let value = self.next;
        match self.next.checked_add(self.step) {
            Some(next) => self.next = next,
            None => self.done = true,
        }
        Some(value)
    }
}

fn range_iter(args: &[Expr], row: &Row, graph: &Graph, params: &Parameters) -> EngineResult<RangeIter> {
    let mut bounds = Vec::with_capacity(3);
    for arg in args {
        let value = eval_json(arg, row, graph, params)?;
        let n = value.as_i64().ok_or_else(|| {
            EngineError::Semantic(format!("range() expects integer arguments, got {}", type_name(&value)))
        })?;
        bounds.push(n);
    }
    let step = bounds.get(2).copied().unwrap_or(1);
    if step == 0 {
        return Err(EngineError::Arithmetic("Step argument to range() can't be 0".to_string()));
    }
    Ok(RangeIter { next: bounds[0], end: bounds[1], step, done: false })
}

/// Values an `UNWIND` iterates over
enum UnwindValues {
    Range(RangeIter),
    List(std::vec::IntoIter<Value>),
}

impl Iterator for UnwindValues {
    type Item = Val;

    fn next(&mut self) -> Option<Val> {
        match self {
            UnwindValues::Range(range) => range.next().map(|n| Val::Value(Value::from(n))),
            UnwindValues::List(list) => list.next().map(Val::Value),
        }
    }
}

fn unwind_values(expr: &Expr, row: &Row, graph: &Graph, params: &Parameters) -> EngineResult<UnwindValues> {
    if let Expr::Call { name, args } = expr {
        if name == "range" {
            return range_iter(args, row, graph, params).map(UnwindValues::Range);
        }
    }
    let values = match eval_json(expr, row, graph, params)? {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    };
    Ok(UnwindValues::List(values.into_iter()))
}

fn node_matches(node: &Node, labels: &[String], wanted: &Map<String, Value>) -> bool {
    labels.iter().all(|l| node.labels.contains(l))
        && wanted.iter().all(|(k, v)| node.properties.get(k) == Some(v))
}

fn match_patterns(
    patterns: &[NodePattern],
    row: &Row,
    graph: &Graph,
    params: &Parameters,
) -> EngineResult<Vec<Row>> {
    let mut rows = vec![row.clone()];

    for pattern in patterns {
        let mut next = Vec::new();
        for partial in &rows {
            let wanted = eval_properties(&pattern.properties, partial, graph, params)?;
            let bound = pattern.variable.as_ref().and_then(|v| partial.get(v));

            match bound {
                Some(Val::Node(id)) => {
                    if graph.nodes.get(id).is_some_and(|n| node_matches(n, &pattern.labels, &wanted)) {
                        next.push(partial.clone());
                    }
                }
                Some(_) => {
                    return Err(EngineError::Semantic("Type mismatch: expected Node".to_string()));
                }
                None => {
                    for node in graph.nodes.values() {
                        if node_matches(node, &pattern.labels, &wanted) {
                            let mut extended = partial.clone();
                            if let Some(var) = &pattern.variable {
                                extended.insert(var.clone(), Val::Node(node.id));
                            }
                            next.push(extended);
                        }
                    }
                }
            }
        }
        rows = next;
    }

    Ok(rows)
}

// ============================================================================
// Eager execution
// ============================================================================

/// Graph access of an eager run
pub enum Store<'a> {
    Read(&'a Graph),
    Write {
        graph: &'a mut Graph,
        ops: &'a mut Vec<WriteOp>,
        ids: &'a IdAllocator,
    },
}

impl<'a> Store<'a> {
    fn graph(&self) -> &Graph {
        match self {
            Store::Read(graph) => graph,
            Store::Write { graph, .. } => graph,
        }
    }

    fn record(&mut self, op: WriteOp) -> EngineResult<()> {
        match self {
            Store::Read(_) => Err(EngineError::ReadOnlyMode),
            Store::Write { graph, ops, .. } => {
                graph.apply(&op);
                ops.push(op);
                Ok(())
            }
        }
    }

    fn ids(&self) -> EngineResult<&IdAllocator> {
        match self {
            Store::Read(_) => Err(EngineError::ReadOnlyMode),
            Store::Write { ids, .. } => Ok(*ids),
        }
    }

    fn node_for(&mut self, pattern: &NodePattern, row: &mut Row, params: &Parameters) -> EngineResult<u64> {
        if let Some(var) = &pattern.variable {
            match row.get(var) {
                Some(Val::Node(id)) => {
                    if !pattern.labels.is_empty() || !pattern.properties.is_empty() {
                        return Err(EngineError::Semantic(format!(
                            "Can't create node `{}` with labels or properties here. \
                             The variable is already declared in this context",
                            var
                        )));
                    }
                    return Ok(*id);
                }
                Some(_) => {
                    return Err(EngineError::Semantic(format!("Variable `{}` is not a node", var)));
                }
                None => {}
            }
        }

        let properties = eval_properties(&pattern.properties, row, self.graph(), params)?;
        let id = self.ids()?.node();
        self.record(WriteOp::CreateNode(Node { id, labels: pattern.labels.clone(), properties }))?;
        if let Some(var) = &pattern.variable {
            row.insert(var.clone(), Val::Node(id));
        }
        Ok(id)
    }

    fn create_path(&mut self, path: &PathPattern, row: &mut Row, params: &Parameters) -> EngineResult<()> {
        let mut current = self.node_for(&path.start, row, params)?;

        for (rel, node) in &path.steps {
            let other = self.node_for(node, row, params)?;
            let (start, end) = match rel.direction {
                Direction::Outgoing => (current, other),
                Direction::Incoming => (other, current),
            };
            let properties = eval_properties(&rel.properties, row, self.graph(), params)?;
            let id = self.ids()?.relationship();
            self.record(WriteOp::CreateRel(Relationship {
                id,
                rel_type: rel.rel_type.clone(),
                start,
                end,
                properties,
            }))?;
            if let Some(var) = &rel.variable {
                row.insert(var.clone(), Val::Rel(id));
            }
            current = other;
        }
        Ok(())
    }

    fn delete(&mut self, val: &Val, detach: bool) -> EngineResult<()> {
        match val {
            Val::Node(id) => {
                if detach {
                    let attached: Vec<u64> = self
                        .graph()
                        .rels
                        .values()
                        .filter(|r| r.touches(*id))
                        .map(|r| r.id)
                        .collect();
                    for rel in attached {
                        self.record(WriteOp::DeleteRel(rel))?;
                    }
                }
                if self.graph().nodes.contains_key(id) {
                    self.record(WriteOp::DeleteNode(*id))?;
                }
                Ok(())
            }
            Val::Rel(id) => {
                if self.graph().rels.contains_key(id) {
                    self.record(WriteOp::DeleteRel(*id))?;
                }
                Ok(())
            }
            Val::Value(Value::Null) => Ok(()),
            Val::Value(other) => Err(EngineError::Semantic(format!(
                "Expected a Node or Relationship but was {}",
                type_name(other)
            ))),
        }
    }
}

/// Evaluate every clause except a trailing RETURN.
pub fn run_clauses(
    clauses: &[Clause],
    mut rows: Vec<Row>,
    store: &mut Store<'_>,
    params: &Parameters,
    token: &CancellationToken,
) -> EngineResult<Vec<Row>> {
    for clause in clauses {
        let mut next = Vec::with_capacity(rows.len());
        match clause {
            Clause::Match(patterns) => {
                for row in &rows {
                    token.check()?;
                    next.extend(match_patterns(patterns, row, store.graph(), params)?);
                }
            }
            Clause::Unwind { expr, alias } => {
                for row in &rows {
                    for value in unwind_values(expr, row, store.graph(), params)? {
                        token.check()?;
                        let mut extended = row.clone();
                        extended.insert(alias.clone(), value);
                        next.push(extended);
                    }
                }
            }
            Clause::Create(paths) => {
                for mut row in rows {
                    token.check()?;
                    for path in paths {
                        store.create_path(path, &mut row, params)?;
                    }
                    next.push(row);
                }
            }
            Clause::Delete { detach, variables } => {
                for row in rows {
                    token.check()?;
                    for var in variables {
                        let val = row
                            .get(var)
                            .cloned()
                            .ok_or_else(|| EngineError::Semantic(format!("Variable `{}` not defined", var)))?;
                        store.delete(&val, *detach)?;
                    }
                    next.push(row);
                }
            }
            Clause::Return(_) => next = rows,
        }
        rows = next;
    }
    Ok(rows)
}

fn project_row(items: &[ReturnItem], row: &Row, graph: &Graph, params: &Parameters) -> EngineResult<Vec<Value>> {
    items.iter().map(|item| eval_json(&item.expr, row, graph, params)).collect()
}

/// Apply RETURN items to fully materialized rows, grouping when aggregating.
pub fn project(
    items: &[ReturnItem],
    rows: &[Row],
    graph: &Graph,
    params: &Parameters,
    token: &CancellationToken,
) -> EngineResult<Vec<Vec<Value>>> {
    // Update statements without RETURN produce no records
    if items.is_empty() {
        return Ok(Vec::new());
    }
    if !items.iter().any(|i| i.expr.is_aggregate()) {
        return rows
            .iter()
            .map(|row| {
                token.check()?;
                project_row(items, row, graph, params)
            })
            .collect();
    }

    let keys: Vec<&ReturnItem> = items.iter().filter(|i| !i.expr.is_aggregate()).collect();
    let aggregates: Vec<&ReturnItem> = items.iter().filter(|i| i.expr.is_aggregate()).collect();
    let mut groups: Vec<(Vec<Value>, Vec<i64>)> = Vec::new();

    for row in rows {
        token.check()?;
        let key = keys
            .iter()
            .map(|item| eval_json(&item.expr, row, graph, params))
            .collect::<EngineResult<Vec<_>>>()?;

        let found = groups.iter().position(|(k, _)| *k == key);
        let index = match found {
            Some(index) => index,
            None => {
                groups.push((key, vec![0; aggregates.len()]));
                groups.len() - 1
            }
        };

        for (slot, item) in aggregates.iter().enumerate() {
            let counted = match &item.expr {
                Expr::CountStar => true,
                Expr::Call { args, .. } => !eval_json(&args[0], row, graph, params)?.is_null(),
                _ => false,
            };
            if counted {
                groups[index].1[slot] += 1;
            }
        }
    }

    if groups.is_empty() && keys.is_empty() {
        groups.push((Vec::new(), vec![0; aggregates.len()]));
    }

    Ok(groups
        .into_iter()
        .map(|(key, counts)| {
            let mut key = key.into_iter();
            let mut counts = counts.into_iter();
            items
                .iter()
                .map(|item| {
                    if item.expr.is_aggregate() {
                        Value::from(counts.next().unwrap_or(0))
                    } else {
                        key.next().unwrap_or(Value::Null)
                    }
                })
                .collect()
        })
        .collect())
}

/// Values of the driving `UNWIND` of a periodic-commit statement
pub fn driving_values(
    expr: &Expr,
    graph: &Graph,
    params: &Parameters,
) -> EngineResult<impl Iterator<Item = Val> + Send> {
    unwind_values(expr, &Row::new(), graph, params)
}

// ============================================================================
// Lazy execution
// ============================================================================

fn stream(clauses: &[Clause], graph: &Arc<Graph>, params: &Arc<Parameters>) -> RowIter {
    let mut rows: RowIter = Box::new(iter::once(Ok(Row::new())));

    for clause in clauses {
        let graph = Arc::clone(graph);
        let params = Arc::clone(params);
        rows = match clause.clone() {
            Clause::Match(patterns) => Box::new(rows.flat_map(move |row| -> RowIter {
                match row.and_then(|row| match_patterns(&patterns, &row, &graph, &params)) {
                    Ok(matched) => Box::new(matched.into_iter().map(Ok)),
                    Err(err) => Box::new(iter::once(Err(err))),
                }
            })),
            Clause::Unwind { expr, alias } => Box::new(rows.flat_map(move |row| -> RowIter {
                let row = match row {
                    Ok(row) => row,
                    Err(err) => return Box::new(iter::once(Err(err))),
                };
                match unwind_values(&expr, &row, &graph, &params) {
                    Ok(values) => {
                        let alias = alias.clone();
                        Box::new(values.map(move |value| {
                            let mut extended = row.clone();
                            extended.insert(alias.clone(), value);
                            Ok(extended)
                        }))
                    }
                    Err(err) => Box::new(iter::once(Err(err))),
                }
            })),
            // Writes never take the lazy path; RETURN is applied per row by the result
            Clause::Create(_) | Clause::Delete { .. } | Clause::Return(_) => rows,
        };
    }
    rows
}

/// Read result producing one row per `next_row` call.
pub struct StreamingResult {
    columns: Vec<String>,
    items: Vec<ReturnItem>,
    rows: RowIter,
    graph: Arc<Graph>,
    params: Arc<Parameters>,
    token: CancellationToken,
}

impl StreamingResult {
    pub fn new(
        clauses: &[Clause],
        items: Vec<ReturnItem>,
        graph: Arc<Graph>,
        params: Parameters,
        token: CancellationToken,
    ) -> Self {
        let params = Arc::new(params);
        let rows = stream(clauses, &graph, &params);
        Self {
            columns: items.iter().map(|i| i.name.clone()).collect(),
            items,
            rows,
            graph,
            params,
            token,
        }
    }
}

impl QueryResult for StreamingResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn next_row(&mut self) -> EngineResult<Option<Vec<Value>>> {
        self.token.check()?;
        match self.rows.next() {
            None => Ok(None),
            Some(row) => {
                let row = row?;
                project_row(&self.items, &row, &self.graph, &self.params).map(Some)
            }
        }
    }
}
