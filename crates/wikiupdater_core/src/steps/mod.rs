//! Category pipelines and the block helpers they share.

pub mod fluid;
pub mod item;
pub mod tag;
pub mod tile;
pub mod vehicle;

use anyhow::Result;

use crate::block::{Span, find_template, replace_span, replace_spans, trim_span};
use crate::fields::{FieldMap, MergePolicy, SortOrder, merge, rebuild};
use crate::fragment::encode_article_name;
use crate::orchestrator::PageContext;

pub(crate) fn txt(name: &str) -> String {
    format!("{name}.txt")
}

/// Replace `span` with the trimmed fragment unless the trimmed block already equals it.
pub(crate) fn replace_with_fragment(text: &str, span: &Span, fragment: &str) -> Option<String> {
    let span = trim_span(text, span);
    let fragment = fragment.trim();
    if &text[span.clone()] == fragment {
        return None;
    }
    Some(replace_span(text, &span, fragment))
}

/// Batch form of [`replace_with_fragment`]; every span is computed against `text`.
pub(crate) fn replace_all_with_fragments(
    text: &str,
    replacements: Vec<(Span, String)>,
) -> Option<String> {
    let pending = replacements
        .into_iter()
        .filter_map(|(span, fragment)| {
            let span = trim_span(text, &span);
            let fragment = fragment.trim();
            (&text[span.clone()] != fragment).then(|| (span, fragment.to_string()))
        })
        .collect::<Vec<_>>();
    if pending.is_empty() {
        return None;
    }
    Some(replace_spans(text, pending))
}

/// Read `{lang}/{parts..}/{encoded title}.txt`, falling back to `{identifier}.txt`.
pub(crate) fn read_infobox_fragment(
    page: &PageContext<'_>,
    parts: &[&str],
    identifier: &str,
) -> Result<Option<String>> {
    let mut by_article = parts.to_vec();
    let article = txt(&encode_article_name(page.title));
    by_article.push(&article);
    if let Some(content) = page.store.read_localized(page.language, &by_article)? {
        return Ok(Some(content));
    }

    let mut by_identifier = parts.to_vec();
    let file = txt(identifier);
    by_identifier.push(&file);
    page.store.read_localized(page.language, &by_identifier)
}

pub(crate) struct InfoboxMerge<'a> {
    pub header: &'a str,
    pub policy: MergePolicy,
    pub order: &'a SortOrder,
}

impl InfoboxMerge<'_> {
    /// Merge fragment fields into `block` and serialize; `None` when nothing differs.
    pub fn apply(&self, block: &str, fragment: &str, identifier: Option<&str>) -> Option<String> {
        self.apply_with(block, fragment, identifier, |_| false)
    }

    /// As [`InfoboxMerge::apply`], with a key-renaming pass over the merged fields.
    /// `rename` returns whether it renamed anything.
    pub fn apply_with(
        &self,
        block: &str,
        fragment: &str,
        identifier: Option<&str>,
        rename: impl FnOnce(&mut FieldMap) -> bool,
    ) -> Option<String> {
        let original = FieldMap::parse_block(block);
        let incoming = FieldMap::parse_lines(
            fragment
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty()),
        );
        let mut outcome = merge(&original, &incoming, &self.policy, identifier);
        let renamed = rename(&mut outcome.fields);
        if !outcome.changed && !renamed {
            return None;
        }
        let rebuilt = rebuild(self.header, &outcome.fields, self.order);
        (rebuilt != block).then_some(rebuilt)
    }
}

/// First `{{Navbox ...}}` replaced by `{lang}/navbox/{category}.txt`.
pub(crate) fn navbox(text: &str, page: &PageContext<'_>, category: &str) -> Result<Option<String>> {
    let Some(span) = find_template(text, "Navbox") else {
        return Ok(None);
    };
    let Some(fragment) = page
        .store
        .read_localized(page.language, &["navbox", &txt(category)])?
    else {
        return Ok(None);
    };
    Ok(replace_with_fragment(text, &span, &fragment))
}

/// Body of the section opened by `heading`, up to the next `\n==` or the end of the text.
pub(crate) fn section_span(text: &str, heading: &str) -> Option<Span> {
    let start = text.find(heading)? + heading.len();
    let end = text[start..]
        .find("\n==")
        .map_or(text.len(), |offset| start + offset);
    Some(start..end)
}


#[cfg(test)]
mod tests {
    use super::test_support::Fixture;
    use super::{navbox, replace_all_with_fragments, replace_with_fragment, section_span};

    #[test]
    fn replace_with_fragment_ignores_surrounding_whitespace() {
        let text = "a\n{{X}}\nb";
        assert_eq!(replace_with_fragment(text, &(1..7), "\n{{X}}\n\n"), None);
        assert_eq!(
            replace_with_fragment(text, &(2..7), "{{Y}}\n").as_deref(),
            Some("a\n{{Y}}\nb")
        );
    }

    #[test]
    fn batch_replacement_skips_identical_blocks() {
        let text = "{{A}} {{B}}";
        assert_eq!(
            replace_all_with_fragments(text, vec![(0..5, "{{A}}".to_string())]),
            None
        );
        assert_eq!(
            replace_all_with_fragments(
                text,
                vec![(0..5, "{{A}}".to_string()), (6..11, "{{C}}".to_string())]
            )
            .as_deref(),
            Some("{{A}} {{C}}")
        );
    }

    #[test]
    fn section_span_stops_at_next_heading() {
        let text = "==Code==\nbody\n==See also==\nx";
        let span = section_span(text, "==Code==").expect("section");
        assert_eq!(&text[span], "\nbody");
        let span = section_span(text, "==See also==").expect("section");
        assert_eq!(&text[span], "\nx");
        assert!(section_span(text, "===Breakage===").is_none());
    }

    #[test]
    fn navbox_uses_localized_category_fragment() {
        let fixture = Fixture::new();
        let text = "body\n{{Navbox items|group=Tools}}\n";
        let page = fixture.page("Axe", "en");
        assert_eq!(navbox(text, &page, "item").expect("navbox"), None);

        fixture.fragment("en/navbox/item.txt", "{{Navbox items|group=Weapons}}\n");
        assert_eq!(
            navbox(text, &page, "item").expect("navbox").as_deref(),
            Some("body\n{{Navbox items|group=Weapons}}\n")
        );
    }
}
