use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use super::{
    InfoboxMerge, navbox, read_infobox_fragment, replace_all_with_fragments,
    replace_with_fragment, txt,
};
use crate::block::{
    Span, field_value, find_all_regex, find_regex, find_template, find_templates, replace_span,
    trim_span,
};
use crate::orchestrator::{Orchestration, PageContext, Step, run_steps};
use crate::schema::item_merge_policy;

static INFOBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{Infobox\s*item[\s\S]*?\n\}\}").expect("valid item infobox pattern")
});
static TEACHED_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<!--\s*Bot flag\|TeachedRecipes\|id=([^>]+?)\s*-->")
        .expect("valid teached recipes pattern")
});
static CONTENTS_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"\{\| class="wikitable theme-red sortable mw-collapsible(?: mw-collapsed)?" id="contents-([^"]+)""#,
    )
    .expect("valid contents table pattern")
});
static EVOLVED_RECIPES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{EvolvedRecipesForItem(?:[^{}]|\{\{[^{}]*\}\})*\}\}")
        .expect("valid evolved recipes pattern")
});
static RECIPE_TEMPLATES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{(?:Crafting|Building)/sandbox(?:[^{}]|\{\{[^{}]*\}\})*\}\}")
        .expect("valid crafting template pattern")
});
static HISTORY_TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?ms)^\s*\{\{HistoryTable\|(.*?)^\s*\}\}\s*$").expect("valid history pattern")
});
static CODE_SNIP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\{\{CodeSnip[\s\S]*?^\}\}\s*$").expect("valid codesnip pattern")
});
static CODE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\|\s*code\s*=[ \t]*\r?\n([^\n]*)\n").expect("valid code name pattern")
});
static UNSAFE_FILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid sanitizer pattern"));

const CURATED_SKILL_LINK: (&str, &str) = ("[[", "]]");

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemIds {
    pub item_id: Option<String>,
}

impl ItemIds {
    pub fn from_text(text: &str) -> Self {
        let item_id =
            find_regex(text, &INFOBOX).and_then(|span| field_value(&text[span], "item_id"));
        Self { item_id }
    }
}

const STEPS: &[Step<ItemIds>] = &[
    Step::new("Infobox", infobox),
    Step::new("Body Parts", body_parts),
    Step::new("Consumables", consumables),
    Step::new("Fixing", fixing),
    Step::new("Condition", condition),
    Step::new("Teached Recipes", teached_recipes),
    Step::new("Container Contents", container_contents),
    Step::new("Crafting", crafting),
    Step::new("History", history),
    Step::new("Code", code),
    Step::new("Navbox", item_navbox),
];

pub fn orchestrate(text: &str, page: &PageContext<'_>) -> Orchestration {
    let ids = ItemIds::from_text(text);
    run_steps(text, page, &ids, STEPS)
}

fn infobox(text: &str, page: &PageContext<'_>, ids: &ItemIds) -> Result<Option<String>> {
    let (Some(span), Some(item_id)) = (find_regex(text, &INFOBOX), ids.item_id.as_deref()) else {
        return Ok(None);
    };
    let Some(fragment) = read_infobox_fragment(page, &["item", "infoboxes"], item_id)? else {
        return Ok(None);
    };
    let merger = InfoboxMerge {
        header: "Infobox item",
        policy: item_merge_policy(),
        order: &page.schemas.item,
    };
    Ok(merger
        .apply(&text[span.clone()], &fragment, Some(item_id))
        .map(|rebuilt| replace_span(text, &span, &rebuilt)))
}

/// Every `{{name ...}}` keyed by `key`, replaced from `{lang}/{dir..}/{value}.txt`.
fn keyed_templates(
    text: &str,
    page: &PageContext<'_>,
    name: &str,
    key: &str,
    dir: &[&str],
) -> Result<Option<String>> {
    let mut replacements = Vec::new();
    for span in find_templates(text, name) {
        let Some(id) = field_value(&text[span.clone()], key) else {
            continue;
        };
        let file = txt(&id);
        let mut parts = dir.to_vec();
        parts.push(&file);
        if let Some(fragment) = page.store.read_localized(page.language, &parts)? {
            replacements.push((span, fragment));
        }
    }
    Ok(replace_all_with_fragments(text, replacements))
}

fn body_parts(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    keyed_templates(text, page, "Body part", "id", &["item", "body_parts"])
}

fn fixing(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    keyed_templates(text, page, "Fixing", "fixing_id", &["fixing"])
}

fn consumables(text: &str, page: &PageContext<'_>, ids: &ItemIds) -> Result<Option<String>> {
    let (Some(span), Some(item_id)) = (find_template(text, "Consumables"), ids.item_id.as_deref())
    else {
        return Ok(None);
    };
    let fragment = page.store.read_localized_or_default(
        page.language,
        &["item", "consumable_properties", &txt(item_id)],
    )?;
    Ok(fragment.and_then(|fragment| replace_with_fragment(text, &span, &fragment)))
}

fn condition(text: &str, page: &PageContext<'_>, ids: &ItemIds) -> Result<Option<String>> {
    let (Some(span), Some(item_id)) =
        (find_template(text, "Durability weapon"), ids.item_id.as_deref())
    else {
        return Ok(None);
    };
    let Some(infobox) = page
        .store
        .read_localized_or_default(page.language, &["item", "infoboxes", &txt(item_id)])?
    else {
        return Ok(None);
    };
    let rendered = durability_template(&infobox);
    Ok(replace_with_fragment(text, &span, &rendered))
}

fn durability_template(infobox: &str) -> String {
    let value = |key: &str| {
        infobox
            .lines()
            .filter_map(|line| line.trim_start().strip_prefix('|'))
            .filter_map(|line| line.split_once('='))
            .find(|(name, _)| name.trim() == key)
            .map(|(_, value)| value.trim().to_string())
            .unwrap_or_default()
    };
    let mut skill = value("skill_type");
    let (open, close) = CURATED_SKILL_LINK;
    if let Some(linked) = skill.strip_prefix(open).and_then(|rest| rest.strip_suffix(close)) {
        skill = capitalize(linked);
    }
    format!(
        "{{{{Durability weapon|{}|{}|skill={}}}}}",
        value("condition_lower_chance"),
        value("condition_max"),
        skill
    )
}

fn capitalize(value: &str) -> String {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn teached_recipes(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    let mut replacements = Vec::new();
    let mut cursor = 0;
    while let Some(start) = TEACHED_START.captures_at(text, cursor) {
        let (Some(whole), Some(id)) = (start.get(0), start.get(1)) else {
            break;
        };
        let id = id.as_str().trim();
        let end_marker = Regex::new(&format!(
            r"<!--\s*Bot flag end\|TeachedRecipes\|id={}\s*-->",
            regex::escape(id)
        ))?;
        let Some(end) = end_marker.find_at(text, whole.end()) else {
            cursor = whole.end();
            continue;
        };
        if let Some(fragment) = page
            .store
            .read(&["recipes", "teachedrecipes", &format!("{id}_Teached.txt")])?
        {
            replacements.push((whole.start()..end.end(), fragment));
        }
        cursor = end.end();
    }
    Ok(replace_all_with_fragments(text, replacements))
}

fn container_contents(
    text: &str,
    page: &PageContext<'_>,
    _ids: &ItemIds,
) -> Result<Option<String>> {
    let Some(captures) = CONTENTS_TABLE.captures(text) else {
        return Ok(None);
    };
    let (Some(start), Some(id)) = (captures.get(0), captures.get(1)) else {
        return Ok(None);
    };
    let Some(end) = text[start.start()..].find("|}").map(|offset| start.start() + offset + 2) else {
        return Ok(None);
    };
    let file = format!("contents-{}.txt", id.as_str().trim());
    let Some(fragment) = page
        .store
        .read_localized(page.language, &["item", "container_contents", &file])?
    else {
        return Ok(None);
    };
    Ok(replace_with_fragment(text, &(start.start()..end), &fragment))
}

fn crafting(text: &str, page: &PageContext<'_>, ids: &ItemIds) -> Result<Option<String>> {
    let mut current = text.to_string();

    if let Some(item_id) = ids.item_id.as_deref()
        && let Some(span) = find_regex(&current, &EVOLVED_RECIPES)
    {
        let recipe_id = field_value(&current[span.clone()], "id").unwrap_or_else(|| item_id.to_string());
        if let Some(fragment) = page.store.read(&["evolved_recipes", &txt(&recipe_id)])?
            && let Some(updated) = replace_with_fragment(&current, &span, &fragment)
        {
            current = updated;
        }
    }

    let mut replacements = Vec::new();
    for span in find_all_regex(&current, &RECIPE_TEMPLATES) {
        let template = &current[span.clone()];
        let Some(item) = field_value(template, "item") else {
            continue;
        };
        let kind = if template.starts_with("{{Crafting") {
            "crafting"
        } else {
            "building"
        };
        if let Some(fragment) = page.store.read(&["recipes", kind, &txt(&item)])? {
            replacements.push((span, fragment));
        }
    }
    if let Some(updated) = replace_all_with_fragments(&current, replacements) {
        current = updated;
    }

    Ok((current != text).then_some(current))
}

fn history(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    let mut replacements = Vec::new();
    for captures in HISTORY_TABLE.captures_iter(text) {
        let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
            continue;
        };
        let Some(item_id) = field_value(body.as_str(), "item_id") else {
            continue;
        };
        if let Some(fragment) = page.store.read_history(&item_id)? {
            replacements.push((whole.range(), fragment));
        }
    }
    Ok(replace_all_with_fragments(text, replacements))
}

fn code(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    let mut replacements = Vec::new();
    for span in find_all_regex(text, &CODE_SNIP) {
        let span: Span = trim_span(text, &span);
        let Some(name) = codesnip_file_name(&text[span.clone()]) else {
            continue;
        };
        let fragment = page.store.read_localized(
            &page.store.default_language,
            &["item", "codesnips", &txt(&name)],
        )?;
        if let Some(fragment) = fragment {
            replacements.push((span, fragment));
        }
    }
    Ok(replace_all_with_fragments(text, replacements))
}

/// File stem for a CodeSnip: the first line after `|code=`, minus `item `, sanitized.
fn codesnip_file_name(snippet: &str) -> Option<String> {
    let raw = CODE_NAME.captures(snippet)?.get(1)?.as_str().trim();
    let name = raw.strip_prefix("item ").unwrap_or(raw).trim();
    if name.is_empty() {
        return None;
    }
    Some(UNSAFE_FILE_CHARS.replace_all(name, "_").into_owned())
}

fn item_navbox(text: &str, page: &PageContext<'_>, _ids: &ItemIds) -> Result<Option<String>> {
    navbox(text, page, "item")
}
