use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use super::{replace_all_with_fragments, replace_with_fragment, txt};
use crate::block::{find_regex, find_templates};
use crate::fragment::encode_article_name;
use crate::orchestrator::{Orchestration, PageContext, Step, run_steps};

pub const TEMPLATE_PREFIX: &str = "Template:Tag_";

static TAG_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)\{\| class="wikitable theme-blue sortable" style="text-align: center;".*?\|\}"#)
        .expect("valid tag table pattern")
});
static TAG_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*\([Tt]ag\)\s*$").expect("valid tag suffix pattern"));

const STEPS: &[Step<()>] = &[
    Step::new("Page version", page_version),
    Step::new("Tag table", tag_table),
    Step::new("Tag template", tag_template),
];

pub fn orchestrate(text: &str, page: &PageContext<'_>) -> Orchestration {
    run_steps(text, page, &(), STEPS)
}

/// Item-list file stem for a tag article title such as `Tools (tag)/fr`.
pub fn article_name(title: &str) -> Option<String> {
    let title = title.trim();
    let base = title.rsplit_once('/').map_or(title, |(base, _)| base);
    let name = TAG_SUFFIX.replace(base, "");
    let name = name.trim();
    (!name.is_empty()).then(|| encode_article_name(name))
}

fn page_version(text: &str, page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
    let stamped = format!("{{{{Page version|{}}}}}", page.game_version);
    let replacements = find_templates(text, "Page version")
        .into_iter()
        .map(|span| (span, stamped.clone()))
        .collect();
    Ok(replace_all_with_fragments(text, replacements))
}

fn tag_table(text: &str, page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
    let (Some(span), Some(article)) = (find_regex(text, &TAG_TABLE), article_name(page.title))
    else {
        return Ok(None);
    };
    let Some(fragment) = page
        .store
        .read_localized(page.language, &["tags", "item_list", &txt(&article)])?
    else {
        return Ok(None);
    };
    Ok(replace_with_fragment(text, &span, &fragment))
}

fn tag_template(text: &str, page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
    let Some(name) = page.title.strip_prefix(TEMPLATE_PREFIX) else {
        return Ok(None);
    };
    let Some(content) = page
        .store
        .read_localized(page.language, &["tags", "articles", "templates", &txt(name)])?
    else {
        return Ok(None);
    };
    Ok((content.trim() != text.trim()).then_some(content))
}

#[cfg(test)]
mod tests {
    use super::{article_name, orchestrate};
    use crate::steps::test_support::Fixture;

    const TABLE_OPEN: &str =
        "{| class=\"wikitable theme-blue sortable\" style=\"text-align: center;\"";

    #[test]
    fn article_updates_version_and_table() {
        let fixture = Fixture::new();
        fixture.fragment(
            "en/tags/item_list/Sharp_Knife.txt",
            &format!("{TABLE_OPEN}\n|Knife\n|Scalpel\n|}}\n"),
        );
        let text = format!(
            "{{{{Page version|41.78.16}}}}\nIntro\n{TABLE_OPEN}\n|Knife\n|}}\nOutro"
        );
        let result = orchestrate(&text, &fixture.page("Sharp Knife (tag)", "en"));
        assert_eq!(
            result.text,
            format!("{{{{Page version|42.12.0}}}}\nIntro\n{TABLE_OPEN}\n|Knife\n|Scalpel\n|}}\nOutro")
        );
        assert_eq!(result.processes, vec!["Page version", "Tag table"]);
        assert!(result.edited);
    }

    #[test]
    fn current_version_is_left_alone() {
        let fixture = Fixture::new();
        let text = "{{Page version|42.12.0}}\nNo table here.";
        let result = orchestrate(text, &fixture.page("Tools (tag)", "en"));
        assert!(!result.edited);
        assert!(result.processes.is_empty());
    }

    #[test]
    fn template_pages_are_replaced_when_content_differs() {
        let fixture = Fixture::new();
        fixture.fragment("en/tags/articles/templates/Knife.txt", "<includeonly>new</includeonly>\n");
        let result = orchestrate("<includeonly>old</includeonly>", &fixture.page("Template:Tag_Knife", "en"));
        assert_eq!(result.text, "<includeonly>new</includeonly>\n");
        assert_eq!(result.processes, vec!["Tag template"]);

        let same = orchestrate("\n<includeonly>new</includeonly>", &fixture.page("Template:Tag_Knife", "en"));
        assert!(!same.edited);
        assert!(same.processes.is_empty());
    }

    #[test]
    fn article_name_strips_language_and_tag_suffix() {
        assert_eq!(article_name("Sharp Knife (tag)/fr").as_deref(), Some("Sharp_Knife"));
        assert_eq!(article_name("Can Opener (Tag)").as_deref(), Some("Can_Opener"));
        assert_eq!(article_name("Who's There?").as_deref(), Some("Who%27s_There%3F"));
        assert_eq!(article_name(" (tag)"), None);
    }
}
