use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashSet;

/// Matches any scheme marker this crate is willing to look at, including the
/// ones it parses (vless/vmess/trojan) and the ones it deliberately ignores
/// (ss/ssr/tuic/hysteria/hysteria2/hy2) so a blob mixing all of them still
/// splits cleanly.
static SCHEME_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(vmess|vless|trojan|ss|ssr|tuic|hysteria2?|hy2)://").unwrap()
});

/// Splits a raw text blob into an ordered, deduplicated list of URI strings.
///
/// The source text is often a concatenation of many subscription dumps: URIs
/// glued together with no separator, HTML-escaped, wrapped in backticks or
/// quotes. This normalizes line-by-line and re-splits on embedded scheme
/// markers before dedup.
pub fn extract_raw_configs(raw_text: &str) -> Vec<String> {
    let unified = raw_text.replace('\r', "\n");
    let expanded = SCHEME_MARKER.replace_all(&unified, |caps: &regex::Captures| {
        format!("\n{}", caps[0].to_lowercase())
    });

    let mut seen = HashSet::new();
    let mut result = Vec::new();

    for line in expanded.lines() {
        let item = normalize_line(line);
        if item.is_empty() || item.starts_with('#') {
            continue;
        }
        if !item.contains("://") {
            continue;
        }
        if seen.insert(item.clone()) {
            result.push(item);
        }
    }

    result
}

fn normalize_line(line: &str) -> String {
    let mut cleaned = line.trim().to_string();
    if cleaned.is_empty() {
        return cleaned;
    }

    cleaned = cleaned.trim_matches('`').to_string();
    cleaned = cleaned.trim_matches(|c| c == ' ' || c == ',').to_string();

    if cleaned.len() >= 2 {
        let first = cleaned.as_bytes()[0];
        let last = cleaned.as_bytes()[cleaned.len() - 1];
        if (first == b'\'' || first == b'"') && first == last {
            cleaned = cleaned[1..cleaned.len() - 1].to_string();
        }
    }

    cleaned = cleaned
        .replace("\\u0026", "&")
        .replace("\\u003d", "=")
        .replace("\\/", "/");
    cleaned = html_escape::decode_html_entities(&cleaned).into_owned();
    cleaned = cleaned.trim_matches('`').to_string();
    cleaned = cleaned.trim_matches(|c| c == ' ' || c == ',').to_string();

    if let Some(m) = SCHEME_MARKER.find(&cleaned) {
        cleaned = cleaned[m.start()..].to_string();
    }

    cleaned.trim().to_string()
}
