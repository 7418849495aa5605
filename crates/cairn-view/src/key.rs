//! Order-preserving key encoding.
//!
//! Every encoded key starts with a one-character type tag, so keys of
//! different JSON types collate by type first:
//!
//! ```text
//! null  "A"
//! false "B"
//! true  "C"
//! number "D" + 16 hex digits of the order-flipped f64 bits + 4 hex residual
//! string "E" + escaped UTF-8 + "\0"
//! array  "F" + encoded elements + "\0"
//! object "G" + (encoded key string, encoded value)* + "\0"
//! ```
//!
//! A number collates first by its nearest f64. The residual is the exact
//! integer minus that f64 (zero for floats), biased by `0x8000`, so integers
//! that share an f64 still order and decode exactly. Integral values that fit
//! an `i64` or `u64` decode as integers.
//!
//! Inside strings `\0` is written as `\x01\x01` and `\x01` as `\x01\x02`, so
//! the terminator is the smallest byte that can follow any prefix. Comparing
//! two encodings byte-wise gives the same answer as comparing the keys.

use serde_json::{Map, Number, Value};

use crate::error::{ViewError, ViewResult};

const NULL: u8 = b'A';
const FALSE: u8 = b'B';
const TRUE: u8 = b'C';
const NUMBER: u8 = b'D';
const STRING: u8 = b'E';
const ARRAY: u8 = b'F';
const OBJECT: u8 = b'G';
const END: u8 = 0x00;
const ESCAPE: u8 = 0x01;

const NUMBER_DIGITS: usize = 16;
const RESIDUAL_DIGITS: usize = 4;
const RESIDUAL_BIAS: i64 = 0x8000;
/// 2^64, the bound of the integers a JSON number can carry exactly.
const INTEGER_LIMIT: f64 = 18_446_744_073_709_551_616.0;

/// Byte-comparable encoder for JSON keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyCodec;

impl KeyCodec {
    /// Encode a key.
    pub fn encode(key: &Value) -> String {
        let mut out = String::new();
        encode_into(key, &mut out, true);
        out
    }

    /// Encode a key for prefix matching.
    ///
    /// Identical to [`encode`](Self::encode) except that a top-level array
    /// or object is left open, so the result is a prefix of every key that
    /// extends it. Scalars encode exactly as they do in full.
    pub fn encode_prefix(key: &Value) -> String {
        let mut out = String::new();
        encode_into(key, &mut out, false);
        out
    }

    /// Decode an encoded key.
    pub fn decode(encoded: &str) -> ViewResult<Value> {
        let mut decoder = Decoder {
            bytes: encoded.as_bytes(),
            pos: 0,
        };
        let value = decoder.value()?;
        if decoder.pos != decoder.bytes.len() {
            return Err(decoder.error("trailing bytes"));
        }
        Ok(value)
    }
}

fn encode_into(value: &Value, out: &mut String, close: bool) {
    match value {
        Value::Null => out.push(NULL as char),
        Value::Bool(false) => out.push(FALSE as char),
        Value::Bool(true) => out.push(TRUE as char),
        Value::Number(n) => {
            let (approx, residual) = split_number(n);
            out.push(NUMBER as char);
            out.push_str(&format!(
                "{:016x}{:04x}",
                order_bits(approx),
                residual + RESIDUAL_BIAS
            ));
        }
        Value::String(s) => encode_string(s, out),
        Value::Array(items) => {
            out.push(ARRAY as char);
            for item in items {
                encode_into(item, out, true);
            }
            if close {
                out.push(END as char);
            }
        }
        Value::Object(map) => {
            out.push(OBJECT as char);
            for (name, item) in map {
                encode_string(name, out);
                encode_into(item, out, true);
            }
            if close {
                out.push(END as char);
            }
        }
    }
}

fn encode_string(s: &str, out: &mut String) {
    out.push(STRING as char);
    for c in s.chars() {
        match c {
            '\u{0}' => out.push_str("\u{1}\u{1}"),
            '\u{1}' => out.push_str("\u{1}\u{2}"),
            c => out.push(c),
        }
    }
    out.push(END as char);
}

/// Map f64 bits to a u64 whose unsigned order matches numeric order.
fn order_bits(f: f64) -> u64 {
    // -0.0 and 0.0 collate as one key.
    let f = if f == 0.0 { 0.0 } else { f };
    let bits = f.to_bits();
    if bits & (1 << 63) != 0 {
        !bits
    } else {
        bits | (1 << 63)
    }
}

fn from_order_bits(bits: u64) -> f64 {
    if bits & (1 << 63) != 0 {
        f64::from_bits(bits & !(1 << 63))
    } else {
        f64::from_bits(!bits)
    }
}

/// Nearest f64 and the exact remainder of an integer above it.
fn split_number(n: &Number) -> (f64, i64) {
    let exact = n
        .as_i64()
        .map(i128::from)
        .or_else(|| n.as_u64().map(i128::from));
    match exact {
        Some(exact) => {
            let approx = exact as f64;
            // |residual| is at most half an ulp at 2^64, i.e. 1024.
            let residual = (exact - approx as i128) as i64;
            (approx, residual)
        }
        None => (n.as_f64().unwrap_or(0.0), 0),
    }
}

fn number_value(approx: f64, residual: i64) -> Option<Value> {
    if approx.fract() == 0.0 && approx.abs() <= INTEGER_LIMIT {
        let exact = approx as i128 + i128::from(residual);
        if let Ok(n) = i64::try_from(exact) {
            return Some(Value::from(n));
        }
        if let Ok(n) = u64::try_from(exact) {
            return Some(Value::from(n));
        }
    }
    if residual != 0 {
        return None;
    }
    Number::from_f64(approx).map(Value::Number)
}

struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn error(&self, reason: &str) -> ViewError {
        ViewError::InvalidKey(format!("{reason} at byte {}", self.pos))
    }

    fn next(&mut self) -> ViewResult<u8> {
        let byte = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| self.error("unexpected end"))?;
        self.pos += 1;
        Ok(byte)
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn value(&mut self) -> ViewResult<Value> {
        match self.next()? {
            NULL => Ok(Value::Null),
            FALSE => Ok(Value::Bool(false)),
            TRUE => Ok(Value::Bool(true)),
            NUMBER => self.number(),
            STRING => self.string().map(Value::String),
            ARRAY => {
                let mut items = Vec::new();
                while self.peek() != Some(END) {
                    items.push(self.value()?);
                }
                self.pos += 1;
                Ok(Value::Array(items))
            }
            OBJECT => {
                let mut map = Map::new();
                while self.peek() != Some(END) {
                    if self.next()? != STRING {
                        return Err(self.error("object key is not a string"));
                    }
                    let name = self.string()?;
                    let item = self.value()?;
                    map.insert(name, item);
                }
                self.pos += 1;
                Ok(Value::Object(map))
            }
            _ => Err(self.error("unknown type tag")),
        }
    }

    fn number(&mut self) -> ViewResult<Value> {
        let start = self.pos;
        let bits = self.hex(NUMBER_DIGITS)?;
        let residual = self.hex(RESIDUAL_DIGITS)? as i64 - RESIDUAL_BIAS;
        number_value(from_order_bits(bits), residual).ok_or_else(|| {
            ViewError::InvalidKey(format!("unrepresentable number at byte {start}"))
        })
    }

    fn hex(&mut self, width: usize) -> ViewResult<u64> {
        let end = self.pos + width;
        let digits = self
            .bytes
            .get(self.pos..end)
            .and_then(|d| std::str::from_utf8(d).ok())
            .ok_or_else(|| self.error("truncated number"))?;
        let value = u64::from_str_radix(digits, 16).map_err(|_| self.error("bad number digits"))?;
        self.pos = end;
        Ok(value)
    }

    fn string(&mut self) -> ViewResult<String> {
        let mut raw = Vec::new();
        loop {
            match self.next()? {
                END => break,
                ESCAPE => match self.next()? {
                    0x01 => raw.push(0x00),
                    0x02 => raw.push(0x01),
                    _ => return Err(self.error("bad escape")),
                },
                byte => raw.push(byte),
            }
        }
        String::from_utf8(raw).map_err(|_| self.error("invalid UTF-8"))
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    fn roundtrip(key: Value) {
        let encoded = KeyCodec::encode(&key);
        assert_eq!(KeyCodec::decode(&encoded).unwrap(), key, "{encoded:?}");
    }

    #[test]
    fn scalars_roundtrip() {
        for key in [
            json!(null),
            json!(false),
            json!(true),
            json!(0),
            json!(-17),
            json!(42),
            json!(1.5),
            json!(-0.25),
            json!(""),
            json!("hello"),
            json!("nul\u{0}and\u{1}soh"),
            json!("ünïcödé ✓"),
        ] {
            roundtrip(key);
        }
    }

    #[test]
    fn structures_roundtrip() {
        roundtrip(json!([]));
        roundtrip(json!([1, "a", [null, true]]));
        roundtrip(json!({}));
        roundtrip(json!({"a": 1, "b": [2, {"c": "d"}]}));
    }

    #[test]
    fn integral_floats_decode_as_integers() {
        let decoded = KeyCodec::decode(&KeyCodec::encode(&json!(2.0))).unwrap();
        assert_eq!(decoded, json!(2));
    }

    #[test]
    fn integers_beyond_f64_precision_are_exact() {
        let keys = [
            json!(9_007_199_254_740_992u64),
            json!(9_007_199_254_740_993u64),
            json!(-9_007_199_254_740_993i64),
            json!(i64::MIN),
            json!(i64::MAX),
            json!(u64::MAX),
        ];
        for key in keys.clone() {
            roundtrip(key);
        }
        assert_ne!(
            KeyCodec::encode(&json!(9_007_199_254_740_992u64)),
            KeyCodec::encode(&json!(9_007_199_254_740_993u64))
        );
    }

    #[test]
    fn integers_and_floats_interleave_in_numeric_order() {
        let numbers = [
            json!(-9_007_199_254_740_993i64),
            json!(-9_007_199_254_740_992.0),
            json!(9_007_199_254_740_992.0),
            json!(9_007_199_254_740_993u64),
            json!(9_007_199_254_740_994u64),
            json!(i64::MAX),
            json!(u64::MAX),
            json!(18_446_744_073_709_551_616.0),
        ];
        for pair in numbers.windows(2) {
            assert!(
                KeyCodec::encode(&pair[0]) < KeyCodec::encode(&pair[1]),
                "{} !< {}",
                pair[0],
                pair[1]
            );
        }
        assert_eq!(
            KeyCodec::decode(&KeyCodec::encode(&json!(18_446_744_073_709_551_616.0))).unwrap(),
            json!(18_446_744_073_709_551_616.0)
        );
    }

    #[test]
    fn negative_zero_collates_with_zero() {
        assert_eq!(KeyCodec::encode(&json!(-0.0)), KeyCodec::encode(&json!(0)));
    }

    #[test]
    fn type_order() {
        let keys = [
            json!(null),
            json!(false),
            json!(true),
            json!(-1000),
            json!(3),
            json!(""),
            json!("a"),
            json!([]),
            json!({}),
        ];
        for pair in keys.windows(2) {
            assert!(
                KeyCodec::encode(&pair[0]) < KeyCodec::encode(&pair[1]),
                "{} !< {}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn numeric_order() {
        let numbers = [-1e300, -2.5, -1.0, -0.5, 0.0, 1e-9, 0.5, 1.0, 2.0, 10.0, 1e300];
        for pair in numbers.windows(2) {
            assert!(KeyCodec::encode(&json!(pair[0])) < KeyCodec::encode(&json!(pair[1])));
        }
    }

    #[test]
    fn shorter_strings_and_arrays_sort_first() {
        assert!(KeyCodec::encode(&json!("ab")) < KeyCodec::encode(&json!("abc")));
        assert!(KeyCodec::encode(&json!("a\u{0}")) > KeyCodec::encode(&json!("a")));
        assert!(KeyCodec::encode(&json!([1])) < KeyCodec::encode(&json!([1, 0])));
        assert!(KeyCodec::encode(&json!([1, 9])) < KeyCodec::encode(&json!([2])));
    }

    #[test]
    fn prefix_encoding_leaves_arrays_open() {
        let prefix = KeyCodec::encode_prefix(&json!(["name"]));
        assert!(KeyCodec::encode(&json!(["name", "alice"])).starts_with(&prefix));
        assert!(KeyCodec::encode(&json!(["name"])).starts_with(&prefix));
        assert!(!KeyCodec::encode(&json!(["names", 1])).starts_with(&prefix));
        assert_eq!(KeyCodec::encode_prefix(&json!(7)), KeyCodec::encode(&json!(7)));
    }

    #[test]
    fn malformed_keys_rejected() {
        for bad in [
            "",
            "Z",
            "D12",
            "D80000000000000000",
            "D3ff8000000000000z000",
            "D3ff80000000000008001",
            "Eabc",
            "F",
            "GD00000000000000008000\u{0}",
            "A\u{0}",
            "E\u{1}\u{9}\u{0}",
        ] {
            assert!(
                matches!(KeyCodec::decode(bad), Err(ViewError::InvalidKey(_))),
                "{bad:?}"
            );
        }
    }

    fn scalar_key() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i32>().prop_map(|n| json!(n)),
            any::<i64>().prop_map(|n| json!(n)),
            any::<u64>().prop_map(|n| json!(n)),
            (-1e6f64..1e6).prop_filter("non-integral", |f| f.fract() != 0.0).prop_map(|f| json!(f)),
            "\\PC{0,8}".prop_map(Value::String),
            "[\\x00\\x01a]{0,4}".prop_map(Value::String),
        ]
    }

    fn key() -> impl Strategy<Value = Value> {
        scalar_key().prop_recursive(3, 16, 4, |inner| {
            prop_oneof![
                proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
                proptest::collection::btree_map("[a-c]{1,2}", inner, 0..3)
                    .prop_map(|m| Value::Object(m.into_iter().collect())),
            ]
        })
    }

    /// Keys without objects, which have no natural order of their own.
    fn ordered_key() -> impl Strategy<Value = Value> {
        scalar_key().prop_recursive(3, 16, 4, |inner| {
            proptest::collection::vec(inner, 0..4).prop_map(Value::Array)
        })
    }

    fn compare(a: &Value, b: &Value) -> std::cmp::Ordering {
        use std::cmp::Ordering;
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Bool(false) => 1,
                Value::Bool(true) => 2,
                Value::Number(_) => 3,
                Value::String(_) => 4,
                Value::Array(_) => 5,
                Value::Object(_) => 6,
            }
        }
        match (a, b) {
            (Value::Number(x), Value::Number(y)) => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Array(x), Value::Array(y)) => {
                for (l, r) in x.iter().zip(y) {
                    let ord = compare(l, r);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                x.len().cmp(&y.len())
            }
            _ => rank(a).cmp(&rank(b)),
        }
    }

    proptest! {
        #[test]
        fn encode_decode_roundtrip(key in key()) {
            prop_assert_eq!(KeyCodec::decode(&KeyCodec::encode(&key)).unwrap(), key);
        }

        #[test]
        fn encoding_preserves_order(a in ordered_key(), b in ordered_key()) {
            let expected = compare(&a, &b);
            let actual = KeyCodec::encode(&a).cmp(&KeyCodec::encode(&b));
            if expected != std::cmp::Ordering::Equal {
                prop_assert_eq!(actual, expected);
            }
        }
    }
}
