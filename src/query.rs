/// Literal substitutions applied to a search phrase before it goes into the
/// `query=` parameter. No target appears in another entry's replacement.
const QUERY_ESCAPES: &[(&str, &str)] = &[
    (" ", "+"),
    ("(", "%28"),
    ("|", "%7C"),
    (")", "%29"),
    ("^", "%5E"),
    ("$", "%24"),
    ("?", "%3F"),
];

/// Encode a free-text phrase for the search endpoint.
///
/// Only the characters in `QUERY_ESCAPES` are rewritten; anything else
/// (including `%`, `&` and `#`) passes through untouched.
pub fn encode_query(raw: &str) -> String {
    QUERY_ESCAPES
        .iter()
        .fold(raw.to_string(), |query, (from, to)| query.replace(from, to))
}
