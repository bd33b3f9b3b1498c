//! Batched invocation engine.
//!
//! One call processes one inbound batch through
//! `Resolving -> Decoding -> Executing -> Encoding -> Done`; any state may
//! move to `Failed`, and the state that failed is reported as the error phase
//! in logs and metrics. The engine holds no per-batch state between calls.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use arrow::array::RecordBatch;
use fus_common::{EngineConfig, ErrorPolicy, FusError, MetricsRegistry, Result, global_metrics};
use fus_types::{TypeDescriptor, Value, describe_field};
use rayon::prelude::*;
use tracing::{debug, warn};

use crate::codec::{self, DecodedBatch, TableOutput};
use crate::context::InvocationContext;
use crate::function::{CallMode, FunctionBody, FunctionDefinition, ScalarFunction, TableFunction};
use crate::registry::FunctionRegistry;

/// Lifecycle of one batch invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocationState {
    /// Looking up the definition.
    Resolving,
    /// Validating and transposing the inbound batch.
    Decoding,
    /// Running the function body row by row.
    Executing,
    /// Building the outbound batch.
    Encoding,
    /// Outbound batch produced.
    Done,
    /// Batch rejected.
    Failed,
}

impl InvocationState {
    /// Stable lowercase label.
    pub fn as_str(&self) -> &'static str {
        match self {
            InvocationState::Resolving => "resolving",
            InvocationState::Decoding => "decoding",
            InvocationState::Executing => "executing",
            InvocationState::Encoding => "encoding",
            InvocationState::Done => "done",
            InvocationState::Failed => "failed",
        }
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row whose fault was absorbed by [`ErrorPolicy::NullOnError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowError {
    /// Input row index.
    pub row: usize,
    /// Fault message reported by the body.
    pub message: String,
}

/// Outbound batch plus the rows that were nulled on the way.
#[derive(Debug, Clone)]
pub struct InvocationOutcome {
    /// Encoded result batch.
    pub batch: RecordBatch,
    /// Faults absorbed under the lenient policy, in row order. Always empty
    /// under [`ErrorPolicy::FailFast`].
    pub row_errors: Vec<RowError>,
}

enum Produced {
    Scalar(Vec<Value>),
    Table(TableOutput),
}

/// Stateless batch executor over a frozen registry.
#[derive(Debug, Clone)]
pub struct InvocationEngine {
    registry: Arc<FunctionRegistry>,
    config: EngineConfig,
    metrics: MetricsRegistry,
}

impl InvocationEngine {
    /// Engine reporting to the process-wide metrics registry.
    pub fn new(registry: Arc<FunctionRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            metrics: global_metrics().clone(),
        }
    }

    /// Report to `metrics` instead of the global registry.
    pub fn with_metrics(mut self, metrics: MetricsRegistry) -> Self {
        self.metrics = metrics;
        self
    }

    /// Registry the engine resolves against.
    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Invoke `function` on every row of `batch`.
    pub fn invoke(&self, function: &str, batch: &RecordBatch) -> Result<RecordBatch> {
        self.invoke_with(function, batch, &InvocationContext::default())
    }

    /// [`Self::invoke`] observing the cancellation token of `ctx`.
    pub fn invoke_with(
        &self,
        function: &str,
        batch: &RecordBatch,
        ctx: &InvocationContext,
    ) -> Result<RecordBatch> {
        self.invoke_detailed(function, batch, ctx)
            .map(|outcome| outcome.batch)
    }

    /// Invoke and also report rows nulled under the lenient policy.
    pub fn invoke_detailed(
        &self,
        function: &str,
        batch: &RecordBatch,
        ctx: &InvocationContext,
    ) -> Result<InvocationOutcome> {
        let started = Instant::now();
        let mut state = InvocationState::Resolving;
        let mut kind = "unknown";
        let result = self.run(function, batch, ctx, &mut state, &mut kind);
        let request_id = ctx.request_id.as_deref().unwrap_or("-");

        match result {
            Ok(outcome) => {
                self.metrics.record_invocation(
                    function,
                    kind,
                    batch.num_rows() as u64,
                    outcome.batch.num_rows() as u64,
                    started.elapsed().as_secs_f64(),
                );
                self.metrics
                    .record_nulled_rows(function, outcome.row_errors.len() as u64);
                debug!(
                    request_id,
                    function,
                    rows_in = batch.num_rows(),
                    rows_out = outcome.batch.num_rows(),
                    nulled_rows = outcome.row_errors.len(),
                    state = %InvocationState::Done,
                    "invocation finished"
                );
                Ok(outcome)
            }
            Err(err) => {
                // Unknown names come from the caller; keep them out of metric labels.
                let label = match &err {
                    FusError::FunctionNotFound(_) => "unresolved",
                    _ => function,
                };
                self.metrics
                    .record_error(label, err.class().as_str(), state.as_str());
                debug!(
                    request_id,
                    function,
                    phase = %state,
                    state = %InvocationState::Failed,
                    error = %err,
                    "invocation failed"
                );
                Err(err)
            }
        }
    }

    fn run(
        &self,
        function: &str,
        batch: &RecordBatch,
        ctx: &InvocationContext,
        state: &mut InvocationState,
        kind: &mut &'static str,
    ) -> Result<InvocationOutcome> {
        let definition = self.resolve(function, batch)?;
        *kind = definition.kind().as_str();

        advance(state, InvocationState::Decoding, function);
        let rows = codec::decode(batch, definition.signature())?;

        advance(state, InvocationState::Executing, function);
        let mut row_errors = Vec::new();
        let produced = match definition.body() {
            FunctionBody::Scalar(body) => Produced::Scalar(self.execute_scalar(
                &definition,
                body.as_ref(),
                &rows,
                ctx,
                &mut row_errors,
            )?),
            FunctionBody::Table(body) => Produced::Table(self.execute_table(
                &definition,
                body.as_ref(),
                &rows,
                ctx,
                &mut row_errors,
            )?),
        };
        if ctx.is_cancelled() {
            return Err(FusError::Cancelled);
        }

        advance(state, InvocationState::Encoding, function);
        let batch = match produced {
            Produced::Scalar(results) => codec::encode_scalar(
                function,
                definition.signature(),
                results,
                rows.num_rows(),
            )?,
            Produced::Table(output) => codec::encode_table(
                function,
                definition.signature(),
                output,
                rows.num_rows(),
            )?,
        };

        advance(state, InvocationState::Done, function);
        Ok(InvocationOutcome { batch, row_errors })
    }

    /// Exact lookup first. A name with a single overload falls through to it
    /// so decoding can name the offending column.
    fn resolve(&self, function: &str, batch: &RecordBatch) -> Result<Arc<FunctionDefinition>> {
        let schema = batch.schema();
        if let Ok(types) = codec::input_types(&schema) {
            match self.registry.resolve(function, &types) {
                Ok(definition) => return Ok(definition),
                Err(FusError::SignatureMismatch { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        match self.registry.overloads(function) {
            [] => Err(FusError::FunctionNotFound(function.to_string())),
            [only] => Ok(Arc::clone(only)),
            _ => Err(FusError::SignatureMismatch {
                name: function.to_string(),
                inputs: schema
                    .fields()
                    .iter()
                    .map(|f| describe_field(f))
                    .collect::<Vec<_>>()
                    .join(", "),
            }),
        }
    }

    fn execute_scalar(
        &self,
        definition: &FunctionDefinition,
        body: &dyn ScalarFunction,
        rows: &DecodedBatch,
        ctx: &InvocationContext,
        row_errors: &mut Vec<RowError>,
    ) -> Result<Vec<Value>> {
        let output_type = &definition.signature().output_types()[0];
        let threshold = self.config.parallel_scalar_min_rows;
        let mut results = Vec::with_capacity(rows.num_rows());

        if threshold > 0 && rows.num_rows() >= threshold {
            let outcomes = rows
                .rows()
                .par_iter()
                .enumerate()
                .map(|(row, args)| {
                    if ctx.is_cancelled() {
                        return Err(FusError::Cancelled);
                    }
                    call_scalar(definition, body, output_type, row, args)
                })
                .collect::<Vec<_>>();
            for (row, outcome) in outcomes.into_iter().enumerate() {
                results.push(self.settle_scalar(definition, row, outcome, row_errors)?);
            }
        } else {
            for (row, args) in rows.rows().iter().enumerate() {
                if ctx.is_cancelled() {
                    return Err(FusError::Cancelled);
                }
                let outcome = call_scalar(definition, body, output_type, row, args);
                results.push(self.settle_scalar(definition, row, outcome, row_errors)?);
            }
        }
        Ok(results)
    }

    fn settle_scalar(
        &self,
        definition: &FunctionDefinition,
        row: usize,
        outcome: Result<Value>,
        row_errors: &mut Vec<RowError>,
    ) -> Result<Value> {
        match outcome {
            Err(err @ FusError::ExecutionFault { .. }) => {
                self.absorb(definition, row, err, row_errors)?;
                Ok(Value::Null)
            }
            other => other,
        }
    }

    fn execute_table(
        &self,
        definition: &FunctionDefinition,
        body: &dyn TableFunction,
        rows: &DecodedBatch,
        ctx: &InvocationContext,
        row_errors: &mut Vec<RowError>,
    ) -> Result<TableOutput> {
        let mut output = TableOutput::new(definition.signature().output_types().len());
        for (row, args) in rows.rows().iter().enumerate() {
            if ctx.is_cancelled() {
                return Err(FusError::Cancelled);
            }
            let mark = output.len();
            match expand_row(definition, body, row, args, ctx, &mut output) {
                Ok(()) => {}
                Err(err @ FusError::ExecutionFault { .. }) => {
                    output.truncate(mark);
                    self.absorb(definition, row, err, row_errors)?;
                }
                Err(err) => return Err(err),
            }
        }
        Ok(output)
    }

    /// Apply the error policy to a row fault.
    fn absorb(
        &self,
        definition: &FunctionDefinition,
        row: usize,
        err: FusError,
        row_errors: &mut Vec<RowError>,
    ) -> Result<()> {
        match self.config.error_policy {
            ErrorPolicy::FailFast => Err(err),
            ErrorPolicy::NullOnError => {
                warn!(
                    function = definition.name(),
                    row,
                    error = %err,
                    "row fault absorbed"
                );
                row_errors.push(RowError {
                    row,
                    message: err.to_string(),
                });
                Ok(())
            }
        }
    }
}

fn advance(state: &mut InvocationState, next: InvocationState, function: &str) {
    debug!(function, from = %state, to = %next, "invocation state");
    *state = next;
}

fn skips_row(definition: &FunctionDefinition, args: &[Value]) -> bool {
    definition.call_mode() == CallMode::ReturnNullOnNullInput && args.iter().any(Value::is_null)
}

fn call_scalar(
    definition: &FunctionDefinition,
    body: &dyn ScalarFunction,
    output_type: &TypeDescriptor,
    row: usize,
    args: &[Value],
) -> Result<Value> {
    if skips_row(definition, args) {
        return Ok(Value::Null);
    }
    let value = guarded(definition.name(), row, || body.call(args))?
        .map_err(|e| fault(definition.name(), row, e.to_string()))?;
    check_result(definition.name(), row, &value, output_type)?;
    Ok(value)
}

/// Drain one row's expansion into `output`.
fn expand_row(
    definition: &FunctionDefinition,
    body: &dyn TableFunction,
    row: usize,
    args: &[Value],
    ctx: &InvocationContext,
    output: &mut TableOutput,
) -> Result<()> {
    if skips_row(definition, args) {
        return Ok(());
    }
    let name = definition.name();
    let output_types = definition.signature().output_types();
    let mut tuples = guarded(name, row, || body.call(args))?
        .map_err(|e| fault(name, row, e.to_string()))?;

    loop {
        if ctx.is_cancelled() {
            return Err(FusError::Cancelled);
        }
        let Some(tuple) = guarded(name, row, || tuples.next())? else {
            return Ok(());
        };
        let tuple = tuple.map_err(|e| fault(name, row, e.to_string()))?;
        if tuple.len() != output_types.len() {
            return Err(fault(
                name,
                row,
                format!(
                    "expected {} output values, got {}",
                    output_types.len(),
                    tuple.len()
                ),
            ));
        }
        for (value, ty) in tuple.iter().zip(output_types) {
            check_result(name, row, value, ty)?;
        }
        output.push(row, tuple)?;
    }
}

/// Debug builds validate every result against its declared type; release
/// builds leave that to the encoder.
#[cfg(debug_assertions)]
fn check_result(function: &str, row: usize, value: &Value, ty: &TypeDescriptor) -> Result<()> {
    if value.matches(ty) {
        Ok(())
    } else {
        Err(FusError::ReturnTypeMismatch {
            function: function.to_string(),
            row,
            expected: ty.to_string(),
            actual: value.kind_name().to_string(),
        })
    }
}

#[cfg(not(debug_assertions))]
fn check_result(
    _function: &str,
    _row: usize,
    _value: &Value,
    _ty: &TypeDescriptor,
) -> Result<()> {
    Ok(())
}

/// Run user code, turning a panic into a row fault.
fn guarded<T>(function: &str, row: usize, f: impl FnOnce() -> T) -> Result<T> {
    panic::catch_unwind(AssertUnwindSafe(f))
        .map_err(|payload| fault(function, row, format!("panicked: {}", panic_message(&payload))))
}

fn panic_message(payload: &Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn fault(function: &str, row: usize, message: String) -> FusError {
    FusError::ExecutionFault {
        function: function.to_string(),
        row,
        message,
    }
}
