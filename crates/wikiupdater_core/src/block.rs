use std::ops::Range;

use regex::Regex;

pub type Span = Range<usize>;

/// First balanced `{{name ...}}` template in `text`.
pub fn find_template(text: &str, name: &str) -> Option<Span> {
    find_template_from(text, name, 0)
}

/// Every balanced `{{name ...}}` template in `text`, in document order.
pub fn find_templates(text: &str, name: &str) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut cursor = 0;
    while let Some(span) = find_template_from(text, name, cursor) {
        cursor = span.end;
        spans.push(span);
    }
    spans
}

fn find_template_from(text: &str, name: &str, from: usize) -> Option<Span> {
    let mut search = from;
    while let Some(offset) = text.get(search..)?.find("{{") {
        let start = search + offset;
        let after_braces = start + 2;
        if starts_with_template_name(&text[after_braces..], name)
            && let Some(end) = balanced_end(text, start)
        {
            return Some(start..end);
        }
        search = after_braces;
    }
    None
}

fn starts_with_template_name(rest: &str, name: &str) -> bool {
    let Some(tail) = rest.strip_prefix(name) else {
        return false;
    };
    match tail.chars().next() {
        None => true,
        Some(next) => next.is_whitespace() || next == '|' || next == '}',
    }
}

fn balanced_end(text: &str, start: usize) -> Option<usize> {
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut index = start;
    while index + 1 < bytes.len() {
        match (bytes[index], bytes[index + 1]) {
            (b'{', b'{') => {
                depth += 1;
                index += 2;
            }
            (b'}', b'}') => {
                depth = depth.saturating_sub(1);
                index += 2;
                if depth == 0 {
                    return Some(index);
                }
            }
            _ => index += 1,
        }
    }
    None
}

pub fn find_regex(text: &str, pattern: &Regex) -> Option<Span> {
    pattern.find(text).map(|found| found.range())
}

pub fn find_all_regex(text: &str, pattern: &Regex) -> Vec<Span> {
    pattern.find_iter(text).map(|found| found.range()).collect()
}

/// Trim surrounding whitespace off a span without leaving it.
pub fn trim_span(text: &str, span: &Span) -> Span {
    let slice = &text[span.clone()];
    let leading = slice.len() - slice.trim_start().len();
    let trailing = slice.len() - slice.trim_end().len();
    let start = span.start + leading;
    let end = (span.end - trailing).max(start);
    start..end
}

/// Value of `|key=` inside a block body, trimmed; `None` when absent or blank.
pub fn field_value(body: &str, key: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r"\|\s*{}\s*=\s*([^|\n}}]+)", regex::escape(key))).ok()?;
    pattern
        .captures(body)
        .and_then(|captures| captures.get(1))
        .map(|value| value.as_str().trim().to_string())
        .filter(|value| !value.is_empty())
}

pub fn replace_span(text: &str, span: &Span, replacement: &str) -> String {
    let mut output = String::with_capacity(text.len() - span.len() + replacement.len());
    output.push_str(&text[..span.start]);
    output.push_str(replacement);
    output.push_str(&text[span.end..]);
    output
}

/// Apply non-overlapping replacements, computed against the same `text`.
pub fn replace_spans(text: &str, mut replacements: Vec<(Span, String)>) -> String {
    replacements.sort_by_key(|(span, _)| span.start);
    let mut output = String::with_capacity(text.len());
    let mut cursor = 0;
    for (span, replacement) in replacements {
        if span.start < cursor {
            continue;
        }
        output.push_str(&text[cursor..span.start]);
        output.push_str(&replacement);
        cursor = span.end;
    }
    output.push_str(&text[cursor..]);
    output
}
