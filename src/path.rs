//! Path and binary codecs for the text-typed scripting channel

/// Replacement for `:` in raw resource names. Colons delimit path segments
/// in the backend key space, so literal colons must be escaped reversibly.
pub const COLON_REPLACEMENT: char = '§';

/// Replacement for `;` in raw resource names. Semicolons join sub-resource
/// name lists on the wire, so literal semicolons must be escaped reversibly.
pub const SEMICOLON_REPLACEMENT: char = '°';

/// Escape reserved characters in a raw segment or path.
pub fn escape_reserved(name: &str) -> String {
  name
    .replace(':', &COLON_REPLACEMENT.to_string())
    .replace(';', &SEMICOLON_REPLACEMENT.to_string())
}

/// Reverse [`escape_reserved`].
pub fn unescape_reserved(name: &str) -> String {
  name
    .replace(COLON_REPLACEMENT, ":")
    .replace(SEMICOLON_REPLACEMENT, ";")
}

/// Encode a slash-delimited path into the flat backend key form.
///
/// The root path `/` maps to the empty string; reserved characters are
/// escaped, then `/` becomes `:`. The scripts append the result to the
/// configured key prefixes.
pub fn encode_path(path: &str) -> String {
  let path = if path == "/" { "" } else { path };
  escape_reserved(path).replace('/', ":")
}

/// Decode a backend key form (or a sub-resource name) back to its external
/// representation.
pub fn decode_path(encoded: &str) -> String {
  unescape_reserved(&encoded.replace(':', "/"))
}

/// Transcode bytes into a string with one char per octet (Latin-1 range).
///
/// The scripting channel is string-typed; this 1:1 mapping is what keeps
/// binary payloads intact across it. Any non-identity transcoding here
/// corrupts stored documents.
pub fn encode_binary(bytes: &[u8]) -> String {
  bytes.iter().map(|&b| b as char).collect()
}

/// Inverse of [`encode_binary`]. Input must only contain chars in the
/// Latin-1 range, which holds for every string produced by this codec.
pub fn decode_binary(s: &str) -> Vec<u8> {
  s.chars().map(|c| c as u8).collect()
}
