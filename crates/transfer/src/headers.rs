use std::collections::BTreeMap;

/// Response headers keyed by lower-cased field name.
pub type ParsedHeaders = BTreeMap<String, String>;

/// Parses a raw response header block (`name: value` per line).
///
/// Field names are trimmed and lower-cased, values trimmed. Repeated
/// fields are joined with `", "`. Lines without a colon are skipped.
pub fn parse_headers(raw: &str) -> ParsedHeaders {
    let mut parsed = ParsedHeaders::new();
    for line in raw.split('\n') {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        parsed
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    parsed
}
