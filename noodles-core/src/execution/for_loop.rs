//! For-loop Scopes
//!
//! A loop scope is the sub-graph between a [`ForLoopBegin`] marker and the
//! first matching [`ForLoopEnd`] marker reachable from it. The executor runs
//! every outermost scope to completion before it pulls any root.
//!
//! # Discovery
//!
//! Breadth-first from each begin marker along outgoing edges, feedback edges
//! included. Every node reached is part of the body until the walk hits an
//! end or meta marker, which is recorded but not expanded. A begin marker in
//! a group only stops at markers of the same group, so nested loops can be
//! told apart from their outer scope.
//!
//! # Iteration
//!
//! For each element of the begin marker's `data` input, the begin (and meta)
//! outputs are seeded, the body is marked dirty without propagation, each
//! body node is pulled in dependency order, and the value arriving at the end
//! marker's `item` input is collected. The collected list is seeded onto the
//! end marker's `data` output, and the markers are sealed so roots that
//! depend on them read the final iteration state instead of recomputing.
//!
//! A begin marker of another group inside the body starts a nested scope.
//! It runs to completion once per iteration of the enclosing scope, and only
//! scopes that are not nested are started by the executor.
//!
//! [`ForLoopBegin`]: crate::operator::ForLoopBegin
//! [`ForLoopEnd`]: crate::operator::ForLoopEnd

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use futures_util::future::{BoxFuture, FutureExt};
use indexmap::IndexSet;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::executor::Executor;
use crate::error::{EngineError, OperatorError, Result};
use crate::graph::{topological_sort, DependencyGraph, OperatorId, OperatorRole};
use crate::operator::markers::handles;
use crate::operator::{outputs, Operator};

/// One discovered loop scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ForLoopScope {
    pub begin: OperatorId,
    pub end: Option<OperatorId>,
    pub meta: Option<OperatorId>,

    /// Body nodes in discovery order.
    pub intermediates: IndexSet<OperatorId>,

    /// Body nodes in dependency order.
    pub body_order: Vec<OperatorId>,
}

impl ForLoopScope {
    /// The begin, end and meta markers of this scope.
    pub fn markers(&self) -> impl Iterator<Item = &OperatorId> {
        std::iter::once(&self.begin)
            .chain(self.end.iter())
            .chain(self.meta.iter())
    }
}

/// Find every loop scope, one per begin marker, in registration order.
pub fn discover_loop_scopes(graph: &DependencyGraph) -> Vec<ForLoopScope> {
    graph
        .operators()
        .filter(|operator| operator.core().role() == OperatorRole::LoopBegin)
        .map(|begin| discover_scope(graph, begin.as_ref()))
        .collect()
}

fn discover_scope(graph: &DependencyGraph, begin: &dyn Operator) -> ForLoopScope {
    let begin_id = begin.core().id();
    let group = begin.core().group();

    let mut end = None;
    let mut meta = None;
    let mut intermediates = IndexSet::new();
    let mut visited: HashSet<&OperatorId> = HashSet::from([begin_id]);
    let mut queue: VecDeque<&OperatorId> = graph.downstream_of(begin_id).collect();

    while let Some(id) = queue.pop_front() {
        if !visited.insert(id) {
            continue;
        }
        let Some(operator) = graph.operator(id) else {
            continue;
        };
        let core = operator.core();
        let same_group = group.is_none() || core.group() == group;

        match core.role() {
            OperatorRole::LoopEnd if same_group => {
                end.get_or_insert_with(|| id.clone());
                continue;
            }
            OperatorRole::LoopMeta if same_group => {
                meta.get_or_insert_with(|| id.clone());
                continue;
            }
            _ => {}
        }

        intermediates.insert(id.clone());
        queue.extend(graph.downstream_of(id));
    }

    let body_order = topological_sort(intermediates.iter(), graph.edges()).order;

    ForLoopScope {
        begin: begin_id.clone(),
        end,
        meta,
        intermediates,
        body_order,
    }
}

/// What a completed loop produced.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopOutcome {
    pub results: Vec<Value>,
    pub accumulator: Option<Value>,
}

/// Failure inside an iteration, before it is wrapped with the scope.
type IterationError = (usize, EngineError);

/// Runs loop scopes against an executor.
pub(crate) struct LoopRunner<'a> {
    executor: &'a Executor,
    /// Every scope discovered for this pass.
    scopes: &'a [ForLoopScope],
}

impl<'a> LoopRunner<'a> {
    pub(crate) fn new(executor: &'a Executor, scopes: &'a [ForLoopScope]) -> Self {
        Self { executor, scopes }
    }

    /// Scopes that do not run inside another scope's iterations.
    pub(crate) fn top_level(&self) -> Vec<&'a ForLoopScope> {
        self.scopes
            .iter()
            .filter(|scope| {
                !self
                    .scopes
                    .iter()
                    .any(|outer| self.nested_in(outer, &scope.begin).is_some())
            })
            .collect()
    }

    /// The scope begun by `id`, if it runs once per iteration of `outer`.
    ///
    /// A begin marker in `outer`'s body starts a nested scope when that scope
    /// has its own end marker. A scope sharing `outer`'s end marker is the
    /// unresolved topology-only case and is pulled like any body node.
    fn nested_in(&self, outer: &ForLoopScope, id: &OperatorId) -> Option<&'a ForLoopScope> {
        if !outer.intermediates.contains(id) {
            return None;
        }
        self.scopes.iter().find(|inner| {
            &inner.begin == id
                && inner.end.is_some()
                && inner.end != outer.end
                && !inner.intermediates.contains(&outer.begin)
        })
    }

    /// Run `scope` to completion.
    ///
    /// Returns `Ok(None)` for a scope without an end marker, which is
    /// skipped. Once the scope finishes its markers are sealed for the rest
    /// of the pass: on success they answer from their last seeded record, on
    /// failure with the error, so any root that depends on them fails too.
    pub(crate) fn run<'s>(
        &'s self,
        scope: &'s ForLoopScope,
        pass: u64,
    ) -> BoxFuture<'s, Result<Option<LoopOutcome>>> {
        self.run_scope(scope, pass).boxed()
    }

    async fn run_scope(&self, scope: &ForLoopScope, pass: u64) -> Result<Option<LoopOutcome>> {
        let Some(end_id) = &scope.end else {
            warn!(begin = %scope.begin, "loop scope has no end marker, skipping");
            return Ok(None);
        };

        // Nested scopes run again for every enclosing iteration
        self.executor.unseal(scope.markers());

        let begin = self.executor.require_operator(&scope.begin)?;
        let end = self.executor.require_operator(end_id)?;
        let meta = scope
            .meta
            .as_ref()
            .map(|id| self.executor.require_operator(id))
            .transpose()?;

        debug!(begin = %scope.begin, "running loop scope");
        match self.iterate(scope, &begin, &end, meta.as_ref(), pass).await {
            Ok(outcome) => {
                self.executor.seal(&scope.begin, None);
                self.executor.seal(end_id, None);
                if let (Some(meta_id), Some(_)) = (&scope.meta, &outcome.accumulator) {
                    self.executor.seal(meta_id, None);
                }
                debug!(
                    begin = %scope.begin,
                    iterations = outcome.results.len(),
                    "loop scope complete"
                );
                Ok(Some(outcome))
            }
            Err((index, source)) => {
                let err = EngineError::LoopAborted {
                    begin: scope.begin.clone(),
                    index,
                    source: Box::new(source),
                };
                for marker in scope.markers() {
                    self.executor.seal(marker, Some(err.clone()));
                }
                Err(err)
            }
        }
    }

    async fn iterate(
        &self,
        scope: &ForLoopScope,
        begin: &Arc<dyn Operator>,
        end: &Arc<dyn Operator>,
        meta: Option<&Arc<dyn Operator>>,
        pass: u64,
    ) -> std::result::Result<LoopOutcome, IterationError> {
        self.executor
            .pull_guarded(&scope.begin)
            .await
            .map_err(|err| (0, err))?;

        let items = match begin.core().input(handles::DATA).map(|field| field.value()) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => Vec::new(),
            Some(_) => {
                let err = EngineError::Operator {
                    id: scope.begin.clone(),
                    source: OperatorError::InvalidInput {
                        field: handles::DATA.to_string(),
                        expected: "an array".to_string(),
                    },
                };
                return Err((0, err));
            }
        };

        if items.is_empty() {
            end.core().seed(outputs([(handles::DATA, json!([]))]), pass);
            return Ok(LoopOutcome {
                results: Vec::new(),
                accumulator: None,
            });
        }

        let mut accumulator = match meta {
            Some(meta) => {
                self.executor
                    .pull_guarded(meta.core().id())
                    .await
                    .map_err(|err| (0, err))?;
                input_or_null(meta.as_ref(), handles::INITIAL)
            }
            None => Value::Null,
        };

        let total = items.len();
        let mut results = Vec::with_capacity(total);

        for (index, item) in items.into_iter().enumerate() {
            begin.core().seed(
                outputs([
                    (handles::ITEM, item),
                    (handles::INDEX, json!(index)),
                    (handles::TOTAL, json!(total)),
                ]),
                pass,
            );
            if let Some(meta) = meta {
                meta.core().seed(
                    outputs([
                        (handles::ACCUMULATOR, accumulator.clone()),
                        (handles::INDEX, json!(index)),
                        (handles::TOTAL, json!(total)),
                        (handles::IS_FIRST, json!(index == 0)),
                        (handles::IS_LAST, json!(index + 1 == total)),
                    ]),
                    pass,
                );
            }

            self.executor.force_dirty(&scope.intermediates);
            for id in &scope.body_order {
                let pulled = match self.nested_in(scope, id) {
                    Some(inner) => self.run(inner, pass).await.map(|_| ()),
                    None => self.executor.pull_guarded(id).await.map(|_| ()),
                };
                pulled.map_err(|err| (index, err))?;
            }

            self.executor.sync_inputs(end.core().id(), false);
            results.push(input_or_null(end.as_ref(), handles::ITEM));

            if let Some(meta) = meta {
                self.executor.sync_inputs(meta.core().id(), true);
                accumulator = input_or_null(meta.as_ref(), handles::NEXT_ACCUMULATOR);
            }
        }

        let mut record = outputs([(handles::DATA, Value::Array(results.clone()))]);
        if meta.is_some() {
            record.insert(handles::ACCUMULATOR.to_string(), accumulator.clone());
        }
        end.core().seed(record, pass);

        Ok(LoopOutcome {
            results,
            accumulator: meta.map(|_| accumulator),
        })
    }
}

fn input_or_null(operator: &dyn Operator, name: &str) -> Value {
    operator
        .core()
        .input(name)
        .map(|field| field.value())
        .unwrap_or(Value::Null)
}
