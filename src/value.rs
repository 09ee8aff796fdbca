use crate::types::ObjType;
use serde::{Serialize, Serializer};
use smol_str::SmolStr;
use std::fmt;

/// A value in the document tree: a nested object or a scalar.
///
/// Readers return a `Value` together with the [`crate::OpId`] of the
/// operation which put it there; for objects that id doubles as the
/// [`crate::ObjId`] of the nested object.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Object(ObjType),
    Scalar(ScalarValue),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Scalar(ScalarValue::Str(s.into()))
    }

    pub fn int(n: i64) -> Value {
        Value::Scalar(ScalarValue::Int(n))
    }

    pub fn uint(n: u64) -> Value {
        Value::Scalar(ScalarValue::Uint(n))
    }

    pub fn counter(n: i64) -> Value {
        Value::Scalar(ScalarValue::counter(n))
    }

    pub fn timestamp(n: i64) -> Value {
        Value::Scalar(ScalarValue::Timestamp(n))
    }

    pub fn f64(n: f64) -> Value {
        Value::Scalar(ScalarValue::F64(n))
    }

    pub fn bytes(b: Vec<u8>) -> Value {
        Value::Scalar(ScalarValue::Bytes(b))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Value::Object(_))
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, Value::Scalar(_))
    }

    pub fn to_objtype(&self) -> Option<ObjType> {
        match self {
            Value::Object(o) => Some(*o),
            _ => None,
        }
    }

    pub fn to_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn into_scalar(self) -> Result<ScalarValue, Self> {
        match self {
            Value::Scalar(s) => Ok(s),
            other => Err(other),
        }
    }

    pub fn to_str(&self) -> Option<&str> {
        self.to_scalar().and_then(|s| s.to_str())
    }

    pub fn to_i64(&self) -> Option<i64> {
        self.to_scalar().and_then(|s| s.to_i64())
    }

    pub fn to_u64(&self) -> Option<u64> {
        self.to_scalar().and_then(|s| s.to_u64())
    }

    pub fn to_f64(&self) -> Option<f64> {
        self.to_scalar().and_then(|s| s.to_f64())
    }

    pub fn to_bool(&self) -> Option<bool> {
        self.to_scalar().and_then(|s| s.to_bool())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Object(o) => write!(f, "Object: {}", o),
            Value::Scalar(s) => write!(f, "Scalar: {}", s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Scalar(ScalarValue::Str(s.into()))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Scalar(ScalarValue::Str(s.into()))
    }
}

impl From<char> for Value {
    fn from(c: char) -> Self {
        Value::Scalar(ScalarValue::from(c))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Scalar(ScalarValue::Int(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Scalar(ScalarValue::Uint(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Scalar(ScalarValue::F64(n))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Scalar(ScalarValue::Boolean(b))
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Scalar(ScalarValue::Null)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Scalar(ScalarValue::Bytes(v))
    }
}

impl From<ObjType> for Value {
    fn from(o: ObjType) -> Self {
        Value::Object(o)
    }
}

impl From<ScalarValue> for Value {
    fn from(v: ScalarValue) -> Self {
        Value::Scalar(v)
    }
}

/// A CRDT counter.
///
/// Unlike a plain integer, concurrent increments from different actors merge
/// additively rather than last-writer-wins. The struct keeps the initial
/// value separately because only the initial value is serialized; increments
/// are replayed from the op log.
#[derive(Debug, Clone)]
pub struct Counter {
    pub(crate) start: i64,
    pub(crate) current: i64,
    pub(crate) increments: usize,
}

impl Counter {
    /// The current value, including all applied increments.
    pub fn value(&self) -> i64 {
        self.current
    }
}

impl Serialize for Counter {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_i64(self.start)
    }
}

impl PartialEq for Counter {
    fn eq(&self, other: &Self) -> bool {
        self.current == other.current
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.current)
    }
}

impl From<i64> for Counter {
    fn from(n: i64) -> Self {
        Counter {
            start: n,
            current: n,
            increments: 0,
        }
    }
}

impl From<&Counter> for i64 {
    fn from(val: &Counter) -> Self {
        val.current
    }
}

impl From<Counter> for i64 {
    fn from(val: Counter) -> Self {
        val.current
    }
}

/// The closed set of primitive values a document can store.
#[derive(Serialize, PartialEq, Debug, Clone)]
#[serde(untagged)]
pub enum ScalarValue {
    Bytes(Vec<u8>),
    Str(SmolStr),
    Int(i64),
    Uint(u64),
    F64(f64),
    Counter(Counter),
    Timestamp(i64),
    Boolean(bool),
    Null,
}

impl ScalarValue {
    pub fn counter(n: i64) -> ScalarValue {
        ScalarValue::Counter(n.into())
    }

    pub fn is_bytes(&self) -> bool {
        matches!(self, Self::Bytes(_))
    }

    pub fn is_str(&self) -> bool {
        matches!(self, Self::Str(_))
    }

    pub fn is_int(&self) -> bool {
        matches!(self, Self::Int(_))
    }

    pub fn is_uint(&self) -> bool {
        matches!(self, Self::Uint(_))
    }

    pub fn is_f64(&self) -> bool {
        matches!(self, Self::F64(_))
    }

    pub fn is_counter(&self) -> bool {
        matches!(self, Self::Counter(_))
    }

    pub fn is_timestamp(&self) -> bool {
        matches!(self, Self::Timestamp(_))
    }

    pub fn is_boolean(&self) -> bool {
        matches!(self, Self::Boolean(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn to_str(&self) -> Option<&str> {
        match self {
            ScalarValue::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Option<&[u8]> {
        match self {
            ScalarValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// If this value can be coerced to an i64, return the i64 value
    pub fn to_i64(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(n) => Some(*n),
            ScalarValue::Uint(n) => Some(*n as i64),
            ScalarValue::F64(n) => Some(*n as i64),
            ScalarValue::Counter(n) => Some(n.into()),
            ScalarValue::Timestamp(n) => Some(*n),
            _ => None,
        }
    }

    pub fn to_u64(&self) -> Option<u64> {
        match self {
            ScalarValue::Int(n) => Some(*n as u64),
            ScalarValue::Uint(n) => Some(*n),
            ScalarValue::F64(n) => Some(*n as u64),
            ScalarValue::Counter(n) => Some(i64::from(n) as u64),
            ScalarValue::Timestamp(n) => Some(*n as u64),
            _ => None,
        }
    }

    pub fn to_f64(&self) -> Option<f64> {
        match self {
            ScalarValue::Int(n) => Some(*n as f64),
            ScalarValue::Uint(n) => Some(*n as f64),
            ScalarValue::F64(n) => Some(*n),
            ScalarValue::Counter(n) => Some(i64::from(n) as f64),
            ScalarValue::Timestamp(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn to_bool(&self) -> Option<bool> {
        match self {
            ScalarValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

impl From<&str> for ScalarValue {
    fn from(s: &str) -> Self {
        ScalarValue::Str(s.into())
    }
}

impl From<String> for ScalarValue {
    fn from(s: String) -> Self {
        ScalarValue::Str(s.into())
    }
}

impl From<SmolStr> for ScalarValue {
    fn from(s: SmolStr) -> Self {
        ScalarValue::Str(s)
    }
}

impl From<char> for ScalarValue {
    fn from(c: char) -> Self {
        let mut buf = [0; 4];
        ScalarValue::Str(SmolStr::new(c.encode_utf8(&mut buf)))
    }
}

impl From<Vec<u8>> for ScalarValue {
    fn from(b: Vec<u8>) -> Self {
        ScalarValue::Bytes(b)
    }
}

impl From<i64> for ScalarValue {
    fn from(n: i64) -> Self {
        ScalarValue::Int(n)
    }
}

impl From<i32> for ScalarValue {
    fn from(n: i32) -> Self {
        ScalarValue::Int(n as i64)
    }
}

impl From<u64> for ScalarValue {
    fn from(n: u64) -> Self {
        ScalarValue::Uint(n)
    }
}

impl From<u32> for ScalarValue {
    fn from(n: u32) -> Self {
        ScalarValue::Uint(n.into())
    }
}

impl From<f64> for ScalarValue {
    fn from(n: f64) -> Self {
        ScalarValue::F64(n)
    }
}

impl From<bool> for ScalarValue {
    fn from(b: bool) -> Self {
        ScalarValue::Boolean(b)
    }
}

impl From<()> for ScalarValue {
    fn from(_: ()) -> Self {
        ScalarValue::Null
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Bytes(b) => write!(f, "\"{:?}\"", b),
            ScalarValue::Str(s) => write!(f, "\"{}\"", s),
            ScalarValue::Int(i) => write!(f, "{}", i),
            ScalarValue::Uint(i) => write!(f, "{}", i),
            ScalarValue::F64(n) => write!(f, "{}", n),
            ScalarValue::Counter(c) => write!(f, "Counter: {}", c),
            ScalarValue::Timestamp(i) => write!(f, "Timestamp: {}", i),
            ScalarValue::Boolean(b) => write!(f, "{}", b),
            ScalarValue::Null => write!(f, "null"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_compare_by_current_value() {
        let mut a = Counter::from(1);
        a.current = 5;
        a.increments = 3;
        let b = Counter::from(5);
        assert_eq!(
            ScalarValue::Counter(a.clone()),
            ScalarValue::Counter(b)
        );
        assert_eq!(a.value(), 5);
    }

    #[test]
    fn scalars_serialize_as_plain_json() {
        // counters serialize as their starting value
        let counter = ScalarValue::counter(3);
        assert_eq!(serde_json::to_string(&counter).unwrap(), "3");
        assert_eq!(
            serde_json::to_string(&ScalarValue::Str("hi".into())).unwrap(),
            "\"hi\""
        );
        assert_eq!(serde_json::to_string(&ScalarValue::Null).unwrap(), "null");
    }
}
