//! Arrow Flight endpoint.
//!
//! Functions are addressed by descriptor path: `[name]`, or `[name, "T1,T2"]`
//! to pick one overload by its input types. `do_exchange` streams input
//! batches through the named function and answers each with its result.

use std::pin::Pin;
use std::sync::Arc;

use arrow::array::RecordBatch;
use arrow::datatypes::{Schema, SchemaRef};
use arrow::ipc::writer::IpcWriteOptions;
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_descriptor::DescriptorType;
use arrow_flight::flight_service_server::{FlightService, FlightServiceServer};
use arrow_flight::{
    Action, ActionType, Criteria, Empty, FlightData, FlightDescriptor, FlightInfo,
    HandshakeRequest, HandshakeResponse, PollInfo, PutResult, SchemaAsIpc, SchemaResult, Ticket,
};
use async_stream::stream;
use fus_common::{ErrorClass, FusError};
use fus_execution::{
    FunctionDefinition, FunctionRegistry, InvocationContext, InvocationEngine, input_types,
};
use fus_types::{TypeDescriptor, format_type_list};
use futures::stream::{self, Stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status, Streaming};
use tracing::{debug, info, warn};

type TonicStream<T> = Pin<Box<dyn Stream<Item = Result<T, Status>> + Send + 'static>>;

/// Flight service backed by an [`InvocationEngine`].
#[derive(Clone)]
pub struct UdfFlightService {
    engine: Arc<InvocationEngine>,
    max_output_batch_rows: usize,
}

impl UdfFlightService {
    /// Serve `engine`, sending every result batch whole.
    pub fn new(engine: InvocationEngine) -> Self {
        Self {
            engine: Arc::new(engine),
            max_output_batch_rows: 0,
        }
    }

    /// Split outbound batches into chunks of at most `rows` rows; `0` disables.
    pub fn with_max_output_batch_rows(mut self, rows: usize) -> Self {
        self.max_output_batch_rows = rows;
        self
    }

    /// Wrap into the tonic service.
    pub fn into_server(self) -> FlightServiceServer<Self> {
        FlightServiceServer::new(self)
    }

    fn registry(&self) -> &FunctionRegistry {
        self.engine.registry()
    }

    fn lookup(&self, descriptor: &FlightDescriptor) -> Result<Arc<FunctionDefinition>, FusError> {
        let target = FunctionPath::parse(descriptor)?;
        match target.inputs {
            Some(inputs) => self.registry().resolve(&target.name, &inputs),
            None => match self.registry().overloads(&target.name) {
                [] => Err(FusError::FunctionNotFound(target.name)),
                [only] => Ok(Arc::clone(only)),
                overloads => Err(FusError::InvalidRequest(format!(
                    "function {} has {} overloads, add the input types to the descriptor path",
                    target.name,
                    overloads.len()
                ))),
            },
        }
    }
}

/// Function addressed by a descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FunctionPath {
    name: String,
    inputs: Option<Vec<TypeDescriptor>>,
}

impl FunctionPath {
    fn parse(descriptor: &FlightDescriptor) -> Result<Self, FusError> {
        if descriptor.r#type != DescriptorType::Path as i32 {
            return Err(FusError::InvalidRequest(
                "flight descriptor must be a path".to_string(),
            ));
        }
        match descriptor.path.as_slice() {
            [name] => Ok(Self {
                name: name.clone(),
                inputs: None,
            }),
            [name, types] => Ok(Self {
                name: name.clone(),
                inputs: Some(parse_type_list(types)?),
            }),
            path => Err(FusError::InvalidRequest(format!(
                "descriptor path must be [name] or [name, types], got {} elements",
                path.len()
            ))),
        }
    }
}

/// A batch sent under an `[name, types]` descriptor must carry exactly those
/// input types.
fn selector_mismatch(
    function: &str,
    inputs: &[TypeDescriptor],
    batch: &RecordBatch,
) -> Option<FusError> {
    match input_types(&batch.schema()) {
        Ok(actual) if actual == inputs => None,
        Ok(actual) => Some(FusError::SignatureMismatch {
            name: function.to_string(),
            inputs: format_type_list(&actual),
        }),
        Err(err) => Some(err),
    }
}

/// Split `INT, STRUCT<a INT, b INT>` on top-level commas.
fn parse_type_list(text: &str) -> Result<Vec<TypeDescriptor>, FusError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let mut types = Vec::new();
    let mut depth = 0_usize;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                types.push(TypeDescriptor::parse(&text[start..i])?);
                start = i + 1;
            }
            _ => {}
        }
    }
    types.push(TypeDescriptor::parse(&text[start..])?);
    Ok(types)
}

/// Schema advertised for a function: input fields followed by the outbound fields.
pub fn function_schema(definition: &FunctionDefinition) -> SchemaRef {
    let signature = definition.signature();
    let mut fields = signature.input_fields();
    fields.extend(
        signature
            .output_schema(definition.name())
            .fields()
            .iter()
            .map(|f| f.as_ref().clone()),
    );
    Arc::new(Schema::new(fields))
}

fn flight_info(definition: &FunctionDefinition) -> Result<FlightInfo, Status> {
    let descriptor = FlightDescriptor::new_path(vec![definition.name().to_string()]);
    let info = FlightInfo::new()
        .try_with_schema(&function_schema(definition))
        .map_err(|e| to_status(&FusError::Arrow(e)))?
        .with_descriptor(descriptor)
        .with_total_records(definition.signature().inputs().len() as i64);
    Ok(info)
}

/// gRPC status for an engine error.
pub fn to_status(err: &FusError) -> Status {
    let message = err.to_string();
    match err {
        FusError::FunctionNotFound(_) => Status::not_found(message),
        FusError::Cancelled => Status::cancelled(message),
        _ => match err.class() {
            ErrorClass::Request | ErrorClass::Registration => Status::invalid_argument(message),
            ErrorClass::Execution | ErrorClass::Internal => Status::internal(message),
        },
    }
}

fn split_rows(batch: RecordBatch, max_rows: usize) -> Vec<RecordBatch> {
    if max_rows == 0 || batch.num_rows() <= max_rows {
        return vec![batch];
    }
    (0..batch.num_rows())
        .step_by(max_rows)
        .map(|offset| batch.slice(offset, max_rows.min(batch.num_rows() - offset)))
        .collect()
}

fn request_id<T>(request: &Request<T>) -> String {
    request
        .metadata()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("{:016x}", rand::random::<u64>()))
}

#[tonic::async_trait]
impl FlightService for UdfFlightService {
    type HandshakeStream = TonicStream<HandshakeResponse>;
    type ListFlightsStream = TonicStream<FlightInfo>;
    type DoGetStream = TonicStream<FlightData>;
    type DoPutStream = TonicStream<PutResult>;
    type DoActionStream = TonicStream<arrow_flight::Result>;
    type ListActionsStream = TonicStream<ActionType>;
    type DoExchangeStream = TonicStream<FlightData>;

    async fn handshake(
        &self,
        _request: Request<Streaming<HandshakeRequest>>,
    ) -> Result<Response<Self::HandshakeStream>, Status> {
        Err(Status::unimplemented("handshake"))
    }

    async fn list_flights(
        &self,
        _request: Request<Criteria>,
    ) -> Result<Response<Self::ListFlightsStream>, Status> {
        let infos = self
            .registry()
            .definitions()
            .iter()
            .map(|definition| flight_info(definition))
            .collect::<Vec<_>>();
        Ok(Response::new(
            Box::pin(stream::iter(infos)) as Self::ListFlightsStream
        ))
    }

    async fn get_flight_info(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<FlightInfo>, Status> {
        let definition = self
            .lookup(request.get_ref())
            .map_err(|e| to_status(&e))?;
        Ok(Response::new(flight_info(&definition)?))
    }

    async fn poll_flight_info(
        &self,
        _request: Request<FlightDescriptor>,
    ) -> Result<Response<PollInfo>, Status> {
        Err(Status::unimplemented("poll_flight_info"))
    }

    async fn get_schema(
        &self,
        request: Request<FlightDescriptor>,
    ) -> Result<Response<SchemaResult>, Status> {
        let definition = self
            .lookup(request.get_ref())
            .map_err(|e| to_status(&e))?;
        let schema = function_schema(&definition);
        let result = SchemaAsIpc::new(&schema, &IpcWriteOptions::default())
            .try_into()
            .map_err(|e| to_status(&FusError::Arrow(e)))?;
        Ok(Response::new(result))
    }

    async fn do_get(
        &self,
        _request: Request<Ticket>,
    ) -> Result<Response<Self::DoGetStream>, Status> {
        Err(Status::unimplemented("do_get"))
    }

    async fn do_put(
        &self,
        _request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoPutStream>, Status> {
        Err(Status::unimplemented("do_put"))
    }

    async fn do_exchange(
        &self,
        request: Request<Streaming<FlightData>>,
    ) -> Result<Response<Self::DoExchangeStream>, Status> {
        let request_id = request_id(&request);
        let mut input = request.into_inner();
        let first = input
            .message()
            .await?
            .ok_or_else(|| Status::invalid_argument("empty exchange"))?;
        let descriptor = first
            .flight_descriptor
            .clone()
            .ok_or_else(|| Status::invalid_argument("first message must carry a descriptor"))?;
        let target = FunctionPath::parse(&descriptor).map_err(|e| to_status(&e))?;
        match &target.inputs {
            Some(inputs) => {
                self.registry()
                    .resolve(&target.name, inputs)
                    .map_err(|e| to_status(&e))?;
            }
            None if self.registry().overloads(&target.name).is_empty() => {
                return Err(to_status(&FusError::FunctionNotFound(target.name)));
            }
            None => {}
        }
        info!(request_id = %request_id, function = %target.name, "exchange started");

        let batches = FlightRecordBatchStream::new_from_flight_data(
            stream::once(async move { Ok(first) })
                .chain(input)
                .map_err(FlightError::from),
        );

        let cancel = CancellationToken::new();
        let guard = cancel.clone().drop_guard();
        let ctx = InvocationContext::with_cancellation(cancel).with_request_id(request_id);
        let engine = Arc::clone(&self.engine);
        let max_rows = self.max_output_batch_rows;
        let function = target.name;
        let selected = target.inputs;

        let results = stream! {
            // Dropping the response stream cancels the in-flight invocation.
            let _guard = guard;
            let mut batches = batches;
            while let Some(next) = batches.next().await {
                let batch = match next {
                    Ok(batch) => batch,
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                };
                if let Some(err) = selected
                    .as_deref()
                    .and_then(|inputs| selector_mismatch(&function, inputs, &batch))
                {
                    warn!(error = %err, "exchange batch rejected");
                    yield Err(FlightError::from(to_status(&err)));
                    return;
                }
                let engine = Arc::clone(&engine);
                let function = function.clone();
                let ctx = ctx.clone();
                let invoked = tokio::task::spawn_blocking(move || {
                    engine.invoke_with(&function, &batch, &ctx)
                })
                .await;
                match invoked {
                    Ok(Ok(output)) => {
                        debug!(rows = output.num_rows(), "exchange batch answered");
                        for chunk in split_rows(output, max_rows) {
                            yield Ok(chunk);
                        }
                    }
                    Ok(Err(err)) => {
                        warn!(error = %err, "exchange batch rejected");
                        yield Err(FlightError::from(to_status(&err)));
                        return;
                    }
                    Err(join) => {
                        yield Err(FlightError::ExternalError(Box::new(join)));
                        return;
                    }
                }
            }
        };

        let flight = FlightDataEncoderBuilder::new()
            .build(results)
            .map_err(Status::from);
        Ok(Response::new(Box::pin(flight) as Self::DoExchangeStream))
    }

    async fn do_action(
        &self,
        _request: Request<Action>,
    ) -> Result<Response<Self::DoActionStream>, Status> {
        Err(Status::unimplemented("do_action"))
    }

    async fn list_actions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::ListActionsStream>, Status> {
        Ok(Response::new(
            Box::pin(stream::empty()) as Self::ListActionsStream
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_list_splits_on_top_level_commas_only() {
        let types = parse_type_list("INT, STRUCT<a INT, b VARCHAR[]>,DECIMAL").unwrap();
        assert_eq!(types.len(), 3);
        assert_eq!(types[1].to_string(), "STRUCT<a INT, b VARCHAR[]>");
        assert!(parse_type_list("").unwrap().is_empty());
        assert!(matches!(
            parse_type_list("INT, WHAT"),
            Err(FusError::UnknownType(_))
        ));
    }

    #[test]
    fn descriptor_must_be_a_short_path() {
        let cmd = FlightDescriptor::new_cmd("gcd");
        assert!(matches!(
            FunctionPath::parse(&cmd),
            Err(FusError::InvalidRequest(_))
        ));
        let long = FlightDescriptor::new_path(vec!["a".into(), "INT".into(), "x".into()]);
        assert!(matches!(
            FunctionPath::parse(&long),
            Err(FusError::InvalidRequest(_))
        ));
        let typed = FlightDescriptor::new_path(vec!["gcd".into(), "INT,INT".into()]);
        assert_eq!(
            FunctionPath::parse(&typed).unwrap().inputs,
            Some(vec![TypeDescriptor::Int32, TypeDescriptor::Int32])
        );
    }

    #[test]
    fn errors_map_to_status_codes() {
        use tonic::Code;
        assert_eq!(
            to_status(&FusError::FunctionNotFound("f".into())).code(),
            Code::NotFound
        );
        assert_eq!(to_status(&FusError::Cancelled).code(), Code::Cancelled);
        assert_eq!(
            to_status(&FusError::TypeMismatch {
                column: 0,
                expected: "INT".into(),
                actual: "BIGINT".into(),
            })
            .code(),
            Code::InvalidArgument
        );
        assert_eq!(
            to_status(&FusError::ExecutionFault {
                function: "f".into(),
                row: 0,
                message: "boom".into(),
            })
            .code(),
            Code::Internal
        );
    }

    #[test]
    fn split_rows_respects_limit() {
        use arrow::array::Int32Array;
        let schema = Arc::new(Schema::new(vec![arrow::datatypes::Field::new(
            "x",
            arrow::datatypes::DataType::Int32,
            false,
        )]));
        let batch = RecordBatch::try_new(
            schema,
            vec![Arc::new(Int32Array::from((0..10).collect::<Vec<_>>()))],
        )
        .unwrap();
        let chunks = split_rows(batch.clone(), 4);
        assert_eq!(
            chunks.iter().map(RecordBatch::num_rows).collect::<Vec<_>>(),
            vec![4, 4, 2]
        );
        assert_eq!(split_rows(batch, 0).len(), 1);
    }
}
