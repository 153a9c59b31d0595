//! Postgres COPY text-format encoding
//!
//! The bulk-load fast path streams rows to the server in COPY text form:
//! tab-delimited fields, `\N` for NULL, and backslash escapes for the four
//! control characters that would otherwise corrupt the framing. Shared by
//! the batch writer and the merged-ID remapper (which COPYs its mapping
//! into a temp table).

/// The two-character NULL sentinel of the COPY text format
pub const NULL_SENTINEL: &str = "\\N";

/// Escape one text field for the COPY text format
///
/// Backslash, newline, carriage return, and tab are the only characters
/// COPY text treats specially.
pub fn escape_field(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
}

/// Append one row to a COPY payload, fields in declared column order
pub fn encode_row(values: &[Option<String>], out: &mut String) {
    for (i, value) in values.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        match value {
            None => out.push_str(NULL_SENTINEL),
            Some(v) => escape_field(v, out),
        }
    }
    out.push('\n');
}
