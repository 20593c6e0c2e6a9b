//! Per-page step pipelines.
//!
//! Every category runs a fixed list of [`Step`]s over one page text. Each
//! step sees the output of the previous one, and a step that fails or finds
//! nothing to do leaves the text alone without stopping the pipeline.

use anyhow::Result;
use tracing::debug;

use crate::categorize::Category;
use crate::fragment::FragmentStore;
use crate::schema::Schemas;
use crate::steps::{fluid, item, tag, tile, vehicle};

/// Everything a step needs besides the text itself.
#[derive(Debug, Clone, Copy)]
pub struct PageContext<'a> {
    pub store: &'a FragmentStore,
    pub schemas: &'a Schemas,
    pub language: &'a str,
    pub title: &'a str,
    pub game_version: &'a str,
}

/// Step body: `Ok(Some(text))` proposes a rewrite, `Ok(None)` leaves the page alone.
pub type StepFn<I> = fn(&str, &PageContext<'_>, &I) -> Result<Option<String>>;

pub struct Step<I> {
    pub label: &'static str,
    pub apply: StepFn<I>,
}

impl<I> Step<I> {
    pub const fn new(label: &'static str, apply: StepFn<I>) -> Self {
        Self { label, apply }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Orchestration {
    pub text: String,
    pub processes: Vec<String>,
    pub edited: bool,
}

impl Orchestration {
    pub fn unchanged(text: &str) -> Self {
        Self {
            text: text.to_string(),
            processes: Vec::new(),
            edited: false,
        }
    }
}

/// Fold `steps` over `text`, recording the label of every step whose output differs.
pub fn run_steps<I>(
    text: &str,
    page: &PageContext<'_>,
    identifiers: &I,
    steps: &[Step<I>],
) -> Orchestration {
    let mut current = text.to_string();
    let mut processes = Vec::new();

    for step in steps {
        match (step.apply)(&current, page, identifiers) {
            Ok(Some(updated)) if updated != current => {
                current = updated;
                processes.push(step.label.to_string());
            }
            Ok(_) => {}
            Err(error) => {
                debug!(title = page.title, step = step.label, "step skipped: {error:#}");
            }
        }
    }

    let edited = current != text;
    Orchestration {
        text: current,
        processes,
        edited,
    }
}

/// Run the pipeline for `category`; `None` for categories without one.
pub fn orchestrate(category: Category, text: &str, page: &PageContext<'_>) -> Option<Orchestration> {
    match category {
        Category::Item => Some(item::orchestrate(text, page)),
        Category::Tile => Some(tile::orchestrate(text, page)),
        Category::Vehicle => Some(vehicle::orchestrate(text, page)),
        Category::Fluid => Some(fluid::orchestrate(text, page)),
        Category::Tag => Some(tag::orchestrate(text, page)),
        Category::VehiclePart => None,
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use tempfile::tempdir;

    use super::{PageContext, Step, run_steps};
    use crate::fragment::FragmentStore;
    use crate::schema::Schemas;

    fn append_a(text: &str, _page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
        Ok(Some(format!("{text}a")))
    }

    fn fail(_text: &str, _page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
        bail!("fragment unreadable")
    }

    fn identity(text: &str, _page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
        Ok(Some(text.to_string()))
    }

    fn nothing(_text: &str, _page: &PageContext<'_>, _ids: &()) -> Result<Option<String>> {
        Ok(None)
    }

    #[test]
    fn failures_and_no_ops_do_not_stop_the_pipeline() {
        let temp = tempdir().expect("tempdir");
        let store = FragmentStore::new(temp.path(), temp.path(), "en");
        let schemas = Schemas::default();
        let page = PageContext {
            store: &store,
            schemas: &schemas,
            language: "en",
            title: "Axe",
            game_version: "42.0",
        };
        let steps = [
            Step::new("First", append_a),
            Step::new("Broken", fail),
            Step::new("Same", identity),
            Step::new("Skip", nothing),
            Step::new("Last", append_a),
        ];
        let result = run_steps("x", &page, &(), &steps);
        assert_eq!(result.text, "xaa");
        assert_eq!(result.processes, vec!["First", "Last"]);
        assert!(result.edited);

        let result = run_steps("x", &page, &(), &steps[1..4]);
        assert_eq!(result.text, "x");
        assert!(result.processes.is_empty());
        assert!(!result.edited);
    }
}
