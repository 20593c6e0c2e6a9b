use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use super::{InfoboxMerge, navbox, replace_all_with_fragments, replace_with_fragment, section_span, txt};
use crate::block::{field_value, find_regex, find_templates, replace_span};
use crate::fields::FieldMap;
use crate::orchestrator::{Orchestration, PageContext, Step, run_steps};
use crate::schema::tile_merge_policy;

static INFOBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{Infobox\s*tile[\s\S]*?\n\}\}").expect("valid tile infobox pattern")
});
static LEGACY_IMAGE_KEY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\|image(\d*)$").expect("valid image key pattern"));
static SPRITE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""sprite":\s*"([^"]+)""#).expect("valid sprite pattern"));

/// Crafting tables: section heading, table opening line, fragment suffix.
const CRAFTING_TABLES: [(&str, &str, &str); 2] = [
    (
        "===Breakage===",
        "{| class=\"wikitable theme-red sortable\"",
        "breakage",
    ),
    ("===Dismantling===", "{| class=\"wikitable theme-red\"", "scrapping"),
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TileIds {
    /// Infobox `name` with spaces turned into underscores.
    pub name: Option<String>,
}

impl TileIds {
    pub fn from_text(text: &str) -> Self {
        let name = find_regex(text, &INFOBOX)
            .and_then(|span| field_value(&text[span], "name"))
            .map(|name| name.replace(' ', "_"));
        Self { name }
    }
}

const STEPS: &[Step<TileIds>] = &[
    Step::new("Infobox", infobox),
    Step::new("Crafting", crafting),
    Step::new("Code", code),
    Step::new("Navbox", tile_navbox),
];

pub fn orchestrate(text: &str, page: &PageContext<'_>) -> Orchestration {
    let ids = TileIds::from_text(text);
    run_steps(text, page, &ids, STEPS)
}

fn infobox(text: &str, page: &PageContext<'_>, ids: &TileIds) -> Result<Option<String>> {
    let (Some(span), Some(name)) = (find_regex(text, &INFOBOX), ids.name.as_deref()) else {
        return Ok(None);
    };
    let Some(fragment) = page
        .store
        .read_localized(page.language, &["tiles", "infoboxes", &txt(name)])?
    else {
        return Ok(None);
    };
    let merger = InfoboxMerge {
        header: "Infobox tile",
        policy: tile_merge_policy(),
        order: &page.schemas.tile,
    };
    Ok(merger
        .apply_with(&text[span.clone()], &fragment, None, rename_legacy_images)
        .map(|rebuilt| replace_span(text, &span, &rebuilt)))
}

/// `|imageN` becomes `|iconN`; true when any key was renamed.
fn rename_legacy_images(fields: &mut FieldMap) -> bool {
    let mut renamed = false;
    fields.rename_keys(|key| {
        let index = LEGACY_IMAGE_KEY.captures(key)?.get(1)?.as_str().to_string();
        renamed = true;
        Some(format!("|icon{index}"))
    });
    renamed
}

fn crafting(text: &str, page: &PageContext<'_>, ids: &TileIds) -> Result<Option<String>> {
    let Some(name) = ids.name.as_deref() else {
        return Ok(None);
    };
    let mut current = text.to_string();
    for (heading, table_start, suffix) in CRAFTING_TABLES {
        let Some(section) = section_span(&current, heading) else {
            continue;
        };
        let body = &current[section.clone()];
        let Some(start) = body.find(table_start) else {
            continue;
        };
        let Some(end) = body[start..].find("|}").map(|offset| start + offset + 2) else {
            continue;
        };
        let file = format!("{name}_{suffix}.txt");
        let Some(fragment) = page
            .store
            .read_localized(page.language, &["tiles", "crafting", &file])?
        else {
            continue;
        };
        let table = section.start + start..section.start + end;
        if let Some(updated) = replace_with_fragment(&current, &table, &fragment) {
            current = updated;
        }
    }
    Ok((current != text).then_some(current))
}

fn code(text: &str, page: &PageContext<'_>, _ids: &TileIds) -> Result<Option<String>> {
    let Some(section) = section_span(text, "==Code==") else {
        return Ok(None);
    };
    let mut replacements = Vec::new();
    for span in find_templates(&text[section.clone()], "CodeSnip") {
        let span = section.start + span.start..section.start + span.end;
        let Some(sprite) = SPRITE
            .captures(&text[span.clone()])
            .and_then(|captures| captures.get(1))
            .map(|sprite| sprite.as_str().to_string())
        else {
            continue;
        };
        if let Some(fragment) = page
            .store
            .read_localized(page.language, &["tiles", "codesnips", &txt(&sprite)])?
        {
            replacements.push((span, fragment));
        }
    }
    Ok(replace_all_with_fragments(text, replacements))
}

fn tile_navbox(text: &str, page: &PageContext<'_>, _ids: &TileIds) -> Result<Option<String>> {
    navbox(text, page, "tile")
}

#[cfg(test)]
mod tests {
    use super::{TileIds, orchestrate};
    use crate::steps::test_support::Fixture;

    #[test]
    fn infobox_keeps_page_only_keys_and_renames_images() {
        let fixture = Fixture::new();
        fixture.fragment(
            "en/tiles/infoboxes/Wooden_Crate.txt",
            "|name=Wooden Crate\n|weight=10\n|sprite_id=crate_01\n",
        );
        let text = "{{Infobox tile\n|name=Wooden Crate\n|image=Crate.png\n|notes=Curated\n|weight=8\n}}\nBody";
        let result = orchestrate(text, &fixture.page("Wooden Crate", "en"));
        assert_eq!(
            result.text,
            "{{Infobox tile\n|name=Wooden Crate\n|icon=Crate.png\n|weight=10\n|sprite_id=crate_01\n|notes=Curated\n}}\nBody"
        );
        assert_eq!(result.processes, vec!["Infobox"]);

        let again = orchestrate(&result.text, &fixture.page("Wooden Crate", "en"));
        assert!(!again.edited);
    }

    #[test]
    fn image_rename_alone_counts_as_a_change() {
        let fixture = Fixture::new();
        fixture.fragment("en/tiles/infoboxes/Sink.txt", "|name=Sink\n");
        let text = "{{Infobox tile\n|name=Sink\n|image2=Sink.png\n}}";
        let result = orchestrate(text, &fixture.page("Sink", "en"));
        assert_eq!(result.text, "{{Infobox tile\n|name=Sink\n|icon2=Sink.png\n}}");
    }

    #[test]
    fn crafting_tables_are_replaced_inside_their_sections() {
        let fixture = Fixture::new();
        fixture.fragment(
            "en/tiles/crafting/Sink_breakage.txt",
            "{| class=\"wikitable theme-red sortable\"\n|new breakage\n|}\n",
        );
        fixture.fragment(
            "en/tiles/crafting/Sink_scrapping.txt",
            "{| class=\"wikitable theme-red\"\n|new scrap\n|}",
        );
        let text = "{{Infobox tile\n|name=Sink\n}}\n==Crafting==\n===Breakage===\n{| class=\"wikitable theme-red sortable\"\n|old\n|}\n===Dismantling===\n{| class=\"wikitable theme-red\"\n|old\n|}\n==See also==\n";
        let result = orchestrate(text, &fixture.page("Sink", "en"));
        assert_eq!(
            result.text,
            "{{Infobox tile\n|name=Sink\n}}\n==Crafting==\n===Breakage===\n{| class=\"wikitable theme-red sortable\"\n|new breakage\n|}\n===Dismantling===\n{| class=\"wikitable theme-red\"\n|new scrap\n|}\n==See also==\n"
        );
        assert_eq!(result.processes, vec!["Crafting"]);
    }

    #[test]
    fn codesnips_are_keyed_by_sprite() {
        let fixture = Fixture::new();
        fixture.fragment(
            "en/tiles/codesnips/fixtures_sinks_01_0.txt",
            "{{CodeSnip|code=\n\"sprite\": \"fixtures_sinks_01_0\", \"new\": 1\n}}",
        );
        let text = "{{CodeSnip|code=\n\"sprite\": \"outside\"\n}}\n==Code==\n{{CodeSnip|code=\n\"sprite\": \"fixtures_sinks_01_0\"\n}}\n{{CodeSnip|code=\n\"sprite\": \"unknown\"\n}}\n";
        let result = orchestrate(text, &fixture.page("Sink", "en"));
        assert_eq!(
            result.text,
            "{{CodeSnip|code=\n\"sprite\": \"outside\"\n}}\n==Code==\n{{CodeSnip|code=\n\"sprite\": \"fixtures_sinks_01_0\", \"new\": 1\n}}\n{{CodeSnip|code=\n\"sprite\": \"unknown\"\n}}\n"
        );
        assert_eq!(result.processes, vec!["Code"]);
    }

    #[test]
    fn name_identifier_uses_underscores() {
        let ids = TileIds::from_text("{{Infobox tile\n|name=Wooden Crate\n}}");
        assert_eq!(ids.name.as_deref(), Some("Wooden_Crate"));
        assert_eq!(TileIds::from_text("{{Infobox item\n|name=Axe\n}}").name, None);
    }
}
