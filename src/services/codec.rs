//! Filename transport encoding for object metadata values.
//!
//! Metadata values travel as single-line header-safe strings, so filenames are
//! percent-encoded on write and decoded on read. Both directions tolerate input
//! that is already in the target form and pass malformed input through
//! verbatim; filenames arrive from clients that may or may not have encoded
//! them already.

/// Percent-encodes `name`, with spaces as `%20`.
///
/// Input that is already in encoded form (decoding and re-encoding it
/// reproduces it exactly) is returned unchanged.
pub fn encode(name: &str) -> String {
    if let Ok(decoded) = urlencoding::decode(name) {
        if urlencoding::encode(&decoded) == name {
            return name.to_string();
        }
    }
    urlencoding::encode(name).into_owned()
}

/// Recovers the original filename from an encoded metadata value.
///
/// Only decodes when re-encoding the decoded value matches the input (with
/// `+` read as an encoded space). Plain or malformed input is returned as-is.
pub fn decode(value: &str) -> String {
    let normalized = value.replace('+', "%20");
    match urlencoding::decode(&normalized) {
        Ok(decoded) if urlencoding::encode(&decoded) == normalized.as_str() => decoded.into_owned(),
        _ => value.to_string(),
    }
}

/// Decodes a client-supplied header value that may or may not be
/// percent-encoded. `+` is literal here; malformed input is returned as-is.
pub fn decode_header(value: &str) -> String {
    match urlencoding::decode(value) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => value.to_string(),
    }
}
