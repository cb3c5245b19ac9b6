use super::Value;

/// Encode a value into its canonical bencode form.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

/// Append the canonical encoding of `value` to `buf`.
///
/// Dictionary keys are always written sorted by their raw bytes, no matter
/// the order they were decoded or inserted in.
pub fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::List(list) => {
            buf.push(b'l');
            for v in list {
                encode_into(v, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(dict) => {
            buf.push(b'd');
            // BTreeMap<Vec<u8>, _> iterates in byte-lexicographic order
            for (k, v) in dict {
                encode_bytes(k, buf);
                encode_into(v, buf);
            }
            buf.push(b'e');
        }
    }
}

fn encode_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(b);
}
