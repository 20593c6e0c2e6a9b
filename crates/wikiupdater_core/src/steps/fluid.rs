use std::sync::LazyLock;

use anyhow::Result;
use regex::Regex;

use super::{navbox, replace_with_fragment, txt};
use crate::block::find_regex;
use crate::orchestrator::{Orchestration, PageContext, Step, run_steps};

static INFOBOX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{Infobox fluid.*?\n\}\}").expect("valid fluid infobox pattern")
});
static FLUID_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)\|fluid_id=(.*?)$").expect("valid fluid id pattern"));

const STEPS: &[Step<()>] = &[
    Step::new("Infobox", infobox),
    Step::new("Navbox", fluid_navbox),
];

pub fn orchestrate(text: &str, page: &PageContext<'_>) -> Orchestration {
    run_steps(text, page, &(), STEPS)
}

/// Fluid id of an infobox block, without the `Base.` module prefix.
fn fluid_id(block: &str) -> Option<String> {
    let raw = FLUID_ID.captures(block)?.get(1)?.as_str().trim();
    let id = raw.strip_prefix("Base.").unwrap_or(raw);
    (!id.is_empty()).then(|| id.to_string())
}

fn infobox(text: &str, page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
    let Some(span) = find_regex(text, &INFOBOX) else {
        return Ok(None);
    };
    let Some(id) = fluid_id(&text[span.clone()]) else {
        return Ok(None);
    };
    let Some(fragment) = page
        .store
        .read_localized(page.language, &["fluid_infoboxes", &txt(&id)])?
    else {
        return Ok(None);
    };
    Ok(replace_with_fragment(text, &span, &fragment))
}

fn fluid_navbox(text: &str, page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
    navbox(text, page, "fluid")
}
