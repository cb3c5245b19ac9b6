use std::collections::BTreeMap;

/// A decoded bencode value.
///
/// Byte strings are kept as raw bytes, they are not guaranteed to be UTF-8
/// (the `pieces` field of a torrent is pure binary). Dictionary keys are
/// raw bytes too, and the [`BTreeMap`] keeps them ordered by byte value,
/// which is the order the encoder must write them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Bytes(Vec<u8>),
    Integer(i64),
    List(Vec<Value>),
    Dict(BTreeMap<Vec<u8>, Value>),
}

impl Value {
    /// Build a dictionary from `(key, value)` pairs, in any order.
    pub fn dict<K, I>(pairs: I) -> Self
    where
        K: Into<Vec<u8>>,
        I: IntoIterator<Item = (K, Value)>,
    {
        Value::Dict(pairs.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The byte string as UTF-8, if it is one.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Look up `key` if this is a dictionary.
    pub fn get(&self, key: &[u8]) -> Option<&Value> {
        self.as_dict().and_then(|d| d.get(key))
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::Bytes(value.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Value {
    fn from(value: &[u8]) -> Self {
        Self::Bytes(value.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::List(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accessors() {
        let v = Value::dict([
            ("name", Value::from("spam")),
            ("size", Value::from(3_i64)),
            ("raw", Value::from(&[0xff_u8, 0xfe][..])),
        ]);

        assert_eq!(v.get(b"name").and_then(Value::as_str), Some("spam"));
        assert_eq!(v.get(b"size").and_then(Value::as_integer), Some(3));
        assert_eq!(v.get(b"missing"), None);

        // binary strings are still strings, just not UTF-8
        let raw = v.get(b"raw").unwrap();
        assert_eq!(raw.as_bytes(), Some(&[0xff_u8, 0xfe][..]));
        assert_eq!(raw.as_str(), None);

        assert_eq!(Value::from(1_i64).as_bytes(), None);
        assert_eq!(Value::from("x").get(b"x"), None);
    }
}
