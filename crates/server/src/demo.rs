//! Demo function library served by the `fus-server` binary.

use std::net::Ipv4Addr;

use bigdecimal::BigDecimal;
use fus_common::{FusError, Result};
use fus_execution::{FunctionKind, FunctionRegistry, FunctionResult, TableRows};
use fus_types::Value;
use num_bigint::BigInt;
use num_traits::Zero;
use rand::Rng;
use tracing::{info, warn};

/// Register every demo function, skipping (and returning) the ones that fail.
pub fn register_demo_functions(registry: &mut FunctionRegistry) -> Vec<FusError> {
    let results: Vec<Result<()>> = vec![
        registry
            .register_scalar("random_int", &[], "INT", |_args: &[Value]| {
                Ok(Value::Int32(rand::thread_rng().gen_range(0..=100)))
            })
            .map(drop),
        registry
            .register_scalar("gcd", &["INT", "INT"], "INT", |args: &[Value]| {
                Ok(int_args(args).map_or(Value::Null, |v| Value::Int32(gcd(v[0], v[1]))))
            })
            .map(drop),
        registry
            .register_scalar("gcd3", &["INT", "INT", "INT"], "INT", |args: &[Value]| {
                Ok(int_args(args)
                    .map_or(Value::Null, |v| Value::Int32(gcd(gcd(v[0], v[1]), v[2]))))
            })
            .map(drop),
        registry
            .register_table("series", &["INT"], &["INT"], |args: &[Value]| {
                let n = args[0].as_i32().unwrap_or(0);
                Ok(Box::new((0..n).map(|i| Ok(vec![Value::Int32(i)]))) as TableRows)
            })
            .map(drop),
        registry
            .register_table("series2", &["INT"], &["INT", "VARCHAR"], |args: &[Value]| {
                let n = args[0].as_i32().unwrap_or(0);
                Ok(Box::new(
                    (0..n).map(|i| Ok(vec![Value::Int32(i), Value::VarChar(i.to_string())])),
                ) as TableRows)
            })
            .map(drop),
        registry
            .register_scalar(
                "extract_tcp_info",
                &["BYTEA"],
                "STRUCT<VARCHAR, VARCHAR, SMALLINT, SMALLINT>",
                |args: &[Value]| match args[0].as_bytes() {
                    Some(packet) => extract_tcp_info(packet),
                    None => Ok(Value::Null),
                },
            )
            .map(drop),
        registry
            .register_scalar("hex_to_dec", &["VARCHAR"], "DECIMAL", |args: &[Value]| {
                match args[0].as_str() {
                    Some(hex) => hex_to_dec(hex),
                    None => Ok(Value::Null),
                }
            })
            .map(drop),
        registry
            .register_scalar(
                "array_access",
                &["VARCHAR[]", "INT"],
                "VARCHAR",
                |args: &[Value]| match (args[0].as_array(), args[1].as_i32()) {
                    (Some(items), Some(index)) => Ok(array_access(items, index)),
                    _ => Ok(Value::Null),
                },
            )
            .map(drop),
    ];

    let errors = results
        .into_iter()
        .filter_map(|r| r.err())
        .inspect(|err| warn!(error = %err, "skipping demo function registration"))
        .collect::<Vec<_>>();
    info!(
        scalar = registry.count(FunctionKind::Scalar),
        table = registry.count(FunctionKind::Table),
        "demo functions registered"
    );
    errors
}

fn int_args(args: &[Value]) -> Option<Vec<i32>> {
    args.iter().map(Value::as_i32).collect()
}

/// Euclid; the sign follows the remainder chain.
pub fn gcd(mut x: i32, mut y: i32) -> i32 {
    while y != 0 {
        (x, y) = (y, x.wrapping_rem(y));
    }
    x
}

/// Source/destination address and port of an IPv4 + TCP packet.
///
/// Ports are carried in SMALLINT; a port above 32767 does not fit and
/// faults the row.
fn extract_tcp_info(packet: &[u8]) -> FunctionResult<Value> {
    if packet.len() < 24 {
        return Err(format!("packet too short: {} bytes, need 24", packet.len()).into());
    }
    let src_addr = Ipv4Addr::new(packet[12], packet[13], packet[14], packet[15]);
    let dst_addr = Ipv4Addr::new(packet[16], packet[17], packet[18], packet[19]);
    let src_port = u16::from_be_bytes([packet[20], packet[21]]);
    let dst_port = u16::from_be_bytes([packet[22], packet[23]]);
    Ok(Value::Struct(vec![
        Value::VarChar(src_addr.to_string()),
        Value::VarChar(dst_addr.to_string()),
        Value::Int16(smallint_port(src_port)?),
        Value::Int16(smallint_port(dst_port)?),
    ]))
}

fn smallint_port(port: u16) -> FunctionResult<i16> {
    i16::try_from(port).map_err(|_| format!("port {port} out of range for SMALLINT").into())
}

const HEX_CHUNK: usize = 16;

/// Parse hex text of any length into an exact decimal, 16 digits at a time.
///
/// Empty text is null; whitespace-only text is zero.
fn hex_to_dec(hex: &str) -> FunctionResult<Value> {
    if hex.is_empty() {
        return Ok(Value::Null);
    }
    let hex = hex.trim();
    if !hex.is_ascii() {
        return Err(format!("invalid hex digits in '{hex}'").into());
    }
    let mut acc = BigInt::zero();
    for chunk in hex.as_bytes().chunks(HEX_CHUNK) {
        let value = BigInt::parse_bytes(chunk, 16)
            .ok_or_else(|| format!("invalid hex digits in '{hex}'"))?;
        acc = (acc << (4 * chunk.len())) + value;
    }
    Ok(Value::Decimal(BigDecimal::new(acc, 0)))
}

/// 1-based element access; index 0, negative or past the end yields null.
fn array_access(items: &[Value], index: i32) -> Value {
    if index < 1 {
        return Value::Null;
    }
    items
        .get(index as usize - 1)
        .cloned()
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn gcd_matches_euclid() {
        assert_eq!(gcd(12, 18), 6);
        assert_eq!(gcd(0, 5), 5);
        assert_eq!(gcd(7, 0), 7);
    }

    #[test]
    fn hex_to_dec_spans_multiple_chunks() {
        let padded = format!("  {}1 ", "0".repeat(63));
        let value = hex_to_dec(&padded).unwrap();
        assert_eq!(value, Value::Decimal(BigDecimal::from(1)));

        let value = hex_to_dec("ffffffffffffffffff").unwrap();
        let expected = BigDecimal::from_str("4722366482869645213695").unwrap();
        assert_eq!(value, Value::Decimal(expected));

        assert!(hex_to_dec("xyz").is_err());
    }

    #[test]
    fn hex_to_dec_empty_is_null_and_blank_is_zero() {
        assert_eq!(hex_to_dec("").unwrap(), Value::Null);
        assert_eq!(hex_to_dec("   ").unwrap(), Value::Decimal(BigDecimal::zero()));
    }

    #[test]
    fn array_access_is_one_based() {
        let items = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        assert_eq!(array_access(&items, 1), Value::from("a"));
        assert_eq!(array_access(&items, 3), Value::from("c"));
        assert_eq!(array_access(&items, 0), Value::Null);
        assert_eq!(array_access(&items, 4), Value::Null);
        assert_eq!(array_access(&items, -1), Value::Null);
    }

    #[test]
    fn extract_tcp_info_reads_ipv4_and_tcp_headers() {
        let mut packet = vec![0_u8; 24];
        packet[12..16].copy_from_slice(&[192, 168, 0, 1]);
        packet[16..20].copy_from_slice(&[10, 0, 0, 7]);
        packet[20..22].copy_from_slice(&314_u16.to_be_bytes());
        packet[22..24].copy_from_slice(&80_u16.to_be_bytes());

        assert_eq!(
            extract_tcp_info(&packet).unwrap(),
            Value::Struct(vec![
                Value::from("192.168.0.1"),
                Value::from("10.0.0.7"),
                Value::Int16(314),
                Value::Int16(80),
            ])
        );
        assert!(extract_tcp_info(&packet[..20]).is_err());
    }

    #[test]
    fn extract_tcp_info_rejects_ports_above_smallint() {
        let mut packet = vec![0_u8; 24];
        packet[20..22].copy_from_slice(&40000_u16.to_be_bytes());
        packet[22..24].copy_from_slice(&443_u16.to_be_bytes());
        let err = extract_tcp_info(&packet).unwrap_err();
        assert!(err.to_string().contains("40000"), "{err}");

        packet[20..22].copy_from_slice(&32767_u16.to_be_bytes());
        assert!(extract_tcp_info(&packet).is_ok());
    }

    #[test]
    fn registers_the_whole_library() {
        let mut registry = FunctionRegistry::new();
        let errors = register_demo_functions(&mut registry);
        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(
            registry.names(),
            vec![
                "array_access",
                "extract_tcp_info",
                "gcd",
                "gcd3",
                "hex_to_dec",
                "random_int",
                "series",
                "series2",
            ]
        );
        assert_eq!(registry.count(FunctionKind::Table), 2);

        let again = register_demo_functions(&mut registry);
        assert_eq!(again.len(), 8);
        assert!(again
            .iter()
            .all(|e| matches!(e, FusError::DuplicateSignature { .. })));
    }
}
