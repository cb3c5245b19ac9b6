use std::collections::BTreeMap;

use super::Value;
use crate::error::Error;

/// Lists and dictionaries nested deeper than this are rejected, a hostile
/// buffer of `llllll...` would otherwise blow the stack.
const MAX_DEPTH: usize = 64;

/// Decode one value starting at `offset`.
///
/// Returns the value and the number of bytes it took, counted from
/// `offset`, so that the caller can keep decoding right after it.
pub fn decode(buf: &[u8], offset: usize) -> Result<(Value, usize), Error> {
    let mut pos = offset;
    let value = decode_value(buf, &mut pos, 0)?;
    Ok((value, pos - offset))
}

/// Decode a buffer that must hold exactly one value, like a `.torrent` file
/// or a tracker response.
pub fn decode_exact(buf: &[u8]) -> Result<Value, Error> {
    let (value, consumed) = decode(buf, 0)?;

    if consumed != buf.len() {
        return Err(Error::MalformedInput(format!(
            "{} trailing bytes after the value",
            buf.len() - consumed
        )));
    }

    Ok(value)
}

fn decode_value(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    if depth > MAX_DEPTH {
        return Err(Error::MalformedInput("nesting too deep".into()));
    }

    let Some(&tag) = buf.get(*pos) else {
        return Err(Error::TruncatedInput);
    };

    match tag {
        b'i' => decode_integer(buf, pos),
        b'0'..=b'9' => decode_bytes(buf, pos).map(Value::Bytes),
        b'l' => decode_list(buf, pos, depth),
        b'd' => decode_dict(buf, pos, depth),
        c => Err(Error::MalformedInput(format!(
            "unexpected byte {c:#04x} at offset {}",
            *pos
        ))),
    }
}

/// Read the ascii digits from `start` up to (not including) `delim`.
/// Returns the digits and the position of the delimiter.
fn read_until(buf: &[u8], start: usize, delim: u8) -> Result<(&[u8], usize), Error> {
    let rest = buf.get(start..).ok_or(Error::TruncatedInput)?;
    let end = rest
        .iter()
        .position(|&b| b == delim)
        .ok_or(Error::TruncatedInput)?;
    Ok((&rest[..end], start + end))
}

// i<digits>e
fn decode_integer(buf: &[u8], pos: &mut usize) -> Result<Value, Error> {
    let (digits, end) = read_until(buf, *pos + 1, b'e')?;

    let unsigned = digits.strip_prefix(b"-").unwrap_or(digits);

    if unsigned.is_empty() || !unsigned.iter().all(u8::is_ascii_digit) {
        return Err(Error::MalformedInput(format!(
            "invalid integer {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    // `i03e` and `i-0e` are both invalid, only `i0e` may start with a zero
    if unsigned[0] == b'0' && (unsigned.len() > 1 || unsigned != digits) {
        return Err(Error::MalformedInput(format!(
            "integer with leading zero {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    // already validated as ascii
    let s = std::str::from_utf8(digits)
        .map_err(|e| Error::MalformedInput(e.to_string()))?;
    let n = s.parse::<i64>().map_err(|_| {
        Error::MalformedInput(format!("integer {s} does not fit in 64 bits"))
    })?;

    *pos = end + 1;
    Ok(Value::Integer(n))
}

// <len>:<bytes>
fn decode_bytes(buf: &[u8], pos: &mut usize) -> Result<Vec<u8>, Error> {
    let (digits, colon) = read_until(buf, *pos, b':')?;

    if digits.is_empty()
        || !digits.iter().all(u8::is_ascii_digit)
        || (digits[0] == b'0' && digits.len() > 1)
    {
        return Err(Error::MalformedInput(format!(
            "invalid string length {:?}",
            String::from_utf8_lossy(digits)
        )));
    }

    let s = std::str::from_utf8(digits)
        .map_err(|e| Error::MalformedInput(e.to_string()))?;
    let len = s.parse::<usize>().map_err(|_| {
        Error::MalformedInput(format!("string length {s} is too large"))
    })?;

    let start = colon + 1;
    let end = start.checked_add(len).ok_or(Error::TruncatedInput)?;
    let bytes = buf.get(start..end).ok_or(Error::TruncatedInput)?;

    *pos = end;
    Ok(bytes.to_vec())
}

// l<values>e
fn decode_list(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    *pos += 1;
    let mut list = Vec::new();

    loop {
        match buf.get(*pos) {
            None => return Err(Error::TruncatedInput),
            Some(b'e') => break,
            Some(_) => list.push(decode_value(buf, pos, depth + 1)?),
        }
    }

    *pos += 1;
    Ok(Value::List(list))
}

// d<key><value>...e
fn decode_dict(buf: &[u8], pos: &mut usize, depth: usize) -> Result<Value, Error> {
    *pos += 1;
    let mut dict = BTreeMap::new();

    loop {
        match buf.get(*pos) {
            None => return Err(Error::TruncatedInput),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {
                let key = decode_bytes(buf, pos)?;
                let value = decode_value(buf, pos, depth + 1)?;
                dict.insert(key, value);
            }
            Some(c) => {
                return Err(Error::MalformedInput(format!(
                    "dictionary key must be a string, found {c:#04x} at offset {}",
                    *pos
                )));
            }
        }
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}
