use std::sync::Arc;

use arrow::array::{
    Array, ArrayRef, AsArray, BinaryArray, Int32Array, Int64Array, RecordBatch, StringArray,
};
use arrow::datatypes::{DataType, Field, Int32Type, Schema};
use arrow_flight::decode::FlightRecordBatchStream;
use arrow_flight::encode::FlightDataEncoderBuilder;
use arrow_flight::error::FlightError;
use arrow_flight::flight_service_client::FlightServiceClient;
use arrow_flight::{Criteria, FlightData, FlightDescriptor};
use fus_common::{EngineConfig, MetricsRegistry};
use fus_execution::{FunctionRegistry, InvocationEngine};
use fus_server::{UdfFlightService, register_demo_functions};
use futures::stream::{self, TryStreamExt};
use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tonic::transport::{Channel, Server};
use tonic::Code;

async fn start_server(max_output_batch_rows: usize) -> FlightServiceClient<Channel> {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");

    let mut registry = FunctionRegistry::new();
    let skipped = register_demo_functions(&mut registry);
    assert!(skipped.is_empty(), "{skipped:?}");
    let engine = InvocationEngine::new(Arc::new(registry), EngineConfig::default())
        .with_metrics(MetricsRegistry::new());
    let service = UdfFlightService::new(engine)
        .with_max_output_batch_rows(max_output_batch_rows);

    tokio::spawn(async move {
        Server::builder()
            .add_service(service.into_server())
            .serve_with_incoming(TcpListenerStream::new(listener))
            .await
            .expect("flight server");
    });

    FlightServiceClient::connect(format!("http://{addr}"))
        .await
        .expect("connect")
}

async fn encode(path: &[&str], batches: Vec<RecordBatch>) -> Vec<FlightData> {
    let path = path.iter().map(|p| p.to_string()).collect::<Vec<_>>();
    FlightDataEncoderBuilder::new()
        .with_flight_descriptor(Some(FlightDescriptor::new_path(path)))
        .build(stream::iter(batches.into_iter().map(Ok)))
        .try_collect::<Vec<_>>()
        .await
        .expect("encode input")
}

async fn exchange(
    client: &mut FlightServiceClient<Channel>,
    function: &str,
    batches: Vec<RecordBatch>,
) -> Result<Vec<RecordBatch>, tonic::Status> {
    exchange_path(client, &[function], batches).await
}

async fn exchange_path(
    client: &mut FlightServiceClient<Channel>,
    path: &[&str],
    batches: Vec<RecordBatch>,
) -> Result<Vec<RecordBatch>, tonic::Status> {
    let input = encode(path, batches).await;
    let response = client.do_exchange(stream::iter(input)).await?.into_inner();
    FlightRecordBatchStream::new_from_flight_data(response.map_err(FlightError::from))
        .try_collect::<Vec<_>>()
        .await
        .map_err(tonic::Status::from)
}

fn int_batch(columns: Vec<Vec<i32>>) -> RecordBatch {
    let fields = (0..columns.len())
        .map(|i| Field::new(format!("arg{i}"), DataType::Int32, true))
        .collect::<Vec<_>>();
    let arrays = columns
        .into_iter()
        .map(|c| Arc::new(Int32Array::from(c)) as ArrayRef)
        .collect();
    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays).unwrap()
}

fn ints(batch: &RecordBatch, column: usize) -> Vec<i32> {
    batch
        .column(column)
        .as_primitive::<Int32Type>()
        .values()
        .to_vec()
}

#[tokio::test]
async fn exchange_runs_scalar_function_per_batch() {
    let mut client = start_server(0).await;
    let out = exchange(
        &mut client,
        "gcd",
        vec![
            int_batch(vec![vec![12, 0], vec![18, 5]]),
            int_batch(vec![vec![35], vec![49]]),
        ],
    )
    .await
    .expect("exchange");

    assert_eq!(out.len(), 2);
    assert_eq!(ints(&out[0], 0), vec![6, 5]);
    assert_eq!(ints(&out[1], 0), vec![7]);
    assert_eq!(out[0].schema().field(0).name(), "gcd");
}

#[tokio::test]
async fn exchange_runs_table_function_with_row_index() {
    let mut client = start_server(0).await;
    let out = exchange(&mut client, "series2", vec![int_batch(vec![vec![2, 0, 1]])])
        .await
        .expect("exchange");

    assert_eq!(out.len(), 1);
    let batch = &out[0];
    let names = batch
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["row_index", "series2_0", "series2_1"]);
    assert_eq!(ints(batch, 0), vec![0, 0, 2]);
    assert_eq!(ints(batch, 1), vec![0, 1, 0]);
    let labels = batch.column(2).as_string::<i32>();
    assert_eq!(
        labels.iter().collect::<Vec<_>>(),
        vec![Some("0"), Some("1"), Some("0")]
    );
}

#[tokio::test]
async fn large_results_are_split_into_chunks() {
    let mut client = start_server(4).await;
    let out = exchange(&mut client, "series", vec![int_batch(vec![vec![10]])])
        .await
        .expect("exchange");
    assert_eq!(
        out.iter().map(RecordBatch::num_rows).collect::<Vec<_>>(),
        vec![4, 4, 2]
    );
    let values = out.iter().flat_map(|b| ints(b, 1)).collect::<Vec<_>>();
    assert_eq!(values, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn unknown_function_is_not_found() {
    let mut client = start_server(0).await;
    let status = exchange(&mut client, "nope", vec![int_batch(vec![vec![1]])])
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn type_mismatch_is_invalid_argument() {
    let mut client = start_server(0).await;
    let schema = Schema::new(vec![
        Field::new("a", DataType::Int64, true),
        Field::new("b", DataType::Int64, true),
    ]);
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![
            Arc::new(Int64Array::from(vec![1_i64])),
            Arc::new(Int64Array::from(vec![2_i64])),
        ],
    )
    .unwrap();
    let status = exchange(&mut client, "gcd", vec![batch]).await.unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("column 0"), "{}", status.message());
}

#[tokio::test]
async fn body_fault_is_internal() {
    let mut client = start_server(0).await;
    let schema = Schema::new(vec![Field::new("packet", DataType::Binary, true)]);
    let packets: Vec<&[u8]> = vec![&[0_u8; 4]];
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(BinaryArray::from(packets))],
    )
    .unwrap();
    let status = exchange(&mut client, "extract_tcp_info", vec![batch])
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::Internal);
    assert!(status.message().contains("extract_tcp_info"), "{}", status.message());
}

#[tokio::test]
async fn decimals_cross_the_wire_as_exact_text() {
    let mut client = start_server(0).await;
    let schema = Schema::new(vec![Field::new("hex", DataType::Utf8, true)]);
    let batch = RecordBatch::try_new(
        Arc::new(schema),
        vec![Arc::new(StringArray::from(vec![
            Some("ffffffffffffffffff"),
            None,
        ]))],
    )
    .unwrap();
    let out = exchange(&mut client, "hex_to_dec", vec![batch])
        .await
        .expect("exchange");
    let field = out[0].schema().field(0).clone();
    assert_eq!(
        field.metadata().get("ARROW:extension:name").map(String::as_str),
        Some("arrowudf.decimal")
    );
    let text = out[0].column(0).as_string::<i32>();
    assert_eq!(text.value(0), "4722366482869645213695");
    assert!(text.is_null(1));
}

#[tokio::test]
async fn flights_describe_registered_functions() {
    let mut client = start_server(0).await;

    let infos = client
        .list_flights(Criteria::default())
        .await
        .expect("list_flights")
        .into_inner()
        .try_collect::<Vec<_>>()
        .await
        .expect("flight infos");
    assert_eq!(infos.len(), 8);

    let info = client
        .get_flight_info(FlightDescriptor::new_path(vec!["gcd3".to_string()]))
        .await
        .expect("get_flight_info")
        .into_inner();
    assert_eq!(info.total_records, 3);
    let schema = info.try_decode_schema().expect("schema");
    assert_eq!(schema.fields().len(), 4);

    let schema_result = client
        .get_schema(FlightDescriptor::new_path(vec![
            "series".to_string(),
            "INT".to_string(),
        ]))
        .await
        .expect("get_schema")
        .into_inner();
    let schema = Schema::try_from(&schema_result).expect("decode schema");
    let names = schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .collect::<Vec<_>>();
    assert_eq!(names, vec!["arg0", "row_index", "series"]);

    let status = client
        .get_flight_info(FlightDescriptor::new_path(vec!["missing".to_string()]))
        .await
        .unwrap_err();
    assert_eq!(status.code(), Code::NotFound);
}

#[tokio::test]
async fn random_int_stays_in_range() {
    let mut client = start_server(0).await;
    let batch = RecordBatch::try_new_with_options(
        Arc::new(Schema::empty()),
        vec![],
        &arrow::array::RecordBatchOptions::new().with_row_count(Some(16)),
    )
    .unwrap();
    let out = exchange(&mut client, "random_int", vec![batch])
        .await
        .expect("exchange");
    let values = out.iter().flat_map(|b| ints(b, 0)).collect::<Vec<_>>();
    assert_eq!(values.len(), 16);
    assert!(values.iter().all(|v| (0..=100).contains(v)));
}

#[tokio::test]
async fn typed_descriptor_pins_the_input_types() {
    let mut client = start_server(0).await;

    let out = exchange_path(
        &mut client,
        &["gcd", "INT, INT"],
        vec![int_batch(vec![vec![12], vec![18]])],
    )
    .await
    .expect("exchange");
    assert_eq!(ints(&out[0], 0), vec![6]);

    let status = exchange_path(
        &mut client,
        &["gcd", "INT,INT,INT"],
        vec![int_batch(vec![vec![12], vec![18]])],
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);

    let status = exchange_path(
        &mut client,
        &["gcd", "INT,INT"],
        vec![
            int_batch(vec![vec![12], vec![18]]),
            int_batch(vec![vec![1], vec![2], vec![3]]),
        ],
    )
    .await
    .unwrap_err();
    assert_eq!(status.code(), Code::InvalidArgument);
    assert!(status.message().contains("no overload of gcd"), "{}", status.message());
}
