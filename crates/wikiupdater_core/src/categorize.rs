//! Page categorization by infobox start markers.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use anyhow::{Context, Result, bail};
use indicatif::ProgressBar;
use rayon::ThreadPool;
use rayon::prelude::*;
use regex::Regex;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::fragment::FragmentStore;
use crate::mediawiki::WikiReadApi;
use crate::steps::tag::TEMPLATE_PREFIX;

/// Content categories in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Category {
    Item,
    Tile,
    Vehicle,
    VehiclePart,
    Fluid,
    Tag,
}

impl Category {
    pub const ALL: [Category; 6] = [
        Category::Item,
        Category::Tile,
        Category::Vehicle,
        Category::VehiclePart,
        Category::Fluid,
        Category::Tag,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Item => "item",
            Self::Tile => "tile",
            Self::Vehicle => "vehicle",
            Self::VehiclePart => "vehicle_part",
            Self::Fluid => "fluid",
            Self::Tag => "tag",
        }
    }

    /// Whether `text` carries this category's start marker.
    pub fn matches(self, text: &str) -> bool {
        match self {
            Self::Item => ITEM.is_match(text),
            Self::Tile => TILE.is_match(text),
            Self::Vehicle => VEHICLE
                .find_iter(text)
                .any(|found| !PART_TAIL.is_match(&text[found.end()..])),
            Self::VehiclePart => VEHICLE_PART.is_match(text),
            Self::Fluid => FLUID.is_match(text),
            Self::Tag => MODDING_TAGS.is_match(text),
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        let normalized = value.trim().to_ascii_lowercase().replace('-', "_");
        if normalized == "modding" {
            return Ok(Self::Tag);
        }
        match Self::ALL
            .into_iter()
            .find(|category| category.as_str() == normalized)
        {
            Some(category) => Ok(category),
            None => bail!(
                "unknown category `{value}` (expected one of: {})",
                Self::ALL.map(Category::as_str).join(", ")
            ),
        }
    }
}

/// Parse a comma-separated category list such as `item,tile`.
pub fn parse_category_list(value: &str) -> Result<Vec<Category>> {
    value
        .split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

static ITEM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{\{Infobox\s*item").expect("valid item marker"));
static TILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{\{Infobox\s*tile").expect("valid tile marker"));
static VEHICLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{\{Infobox\s*vehicle").expect("valid vehicle marker"));
static PART_TAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s+part").expect("valid vehicle part tail"));
static VEHICLE_PART: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{Infobox\s*vehicle\s+part").expect("valid vehicle part marker")
});
static FLUID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\{\{Infobox\s*fluid").expect("valid fluid marker"));
static MODDING_TAGS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\{\{Header\|Modding\|Item\s+tags").expect("valid modding tags marker")
});

pub fn categorize_text(text: &str) -> Vec<Category> {
    Category::ALL
        .into_iter()
        .filter(|category| category.matches(text))
        .collect()
}

/// Sorted page titles per category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Categorized {
    titles: BTreeMap<Category, Vec<String>>,
}

impl Categorized {
    pub fn titles(&self, category: Category) -> &[String] {
        self.titles.get(&category).map_or(&[], Vec::as_slice)
    }

    pub fn counts(&self) -> Vec<(Category, usize)> {
        Category::ALL
            .into_iter()
            .map(|category| (category, self.titles(category).len()))
            .collect()
    }

    pub fn total(&self) -> usize {
        self.titles.values().map(Vec::len).sum()
    }

    pub fn add(&mut self, category: Category, title: impl Into<String>) {
        let titles = self.titles.entry(category).or_default();
        let title = title.into();
        if let Err(index) = titles.binary_search(&title) {
            titles.insert(index, title);
        }
    }
}

/// Categorize every page on `pool`; a page may land in several categories.
pub fn categorize_pages(
    pages: &BTreeMap<String, String>,
    pool: &ThreadPool,
    progress: &ProgressBar,
) -> Categorized {
    let hits = pool.install(|| {
        pages
            .par_iter()
            .map(|(title, text)| {
                let categories = categorize_text(text);
                progress.inc(1);
                (title.as_str(), categories)
            })
            .collect::<Vec<_>>()
    });
    progress.finish_and_clear();

    let mut categorized = Categorized::default();
    for (title, categories) in hits {
        for category in categories {
            categorized.add(category, title);
        }
    }
    categorized
}

/// `Template:Tag_X` titles whose wiki text is missing or differs from the
/// `{lang}/tags/articles/templates/X.txt` fragment.
pub fn stale_tag_templates(
    store: &FragmentStore,
    language: &str,
    api: &mut dyn WikiReadApi,
) -> Result<Vec<String>> {
    let folder = store.localized_path(language, &["tags", "articles", "templates"]);
    if !folder.is_dir() {
        info!(folder = %folder.display(), "tag template folder not found");
        return Ok(Vec::new());
    }

    let mut titles = Vec::new();
    for entry in WalkDir::new(&folder)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.with_context(|| format!("failed to list {}", folder.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "txt") {
            continue;
        }
        let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let title = format!("{TEMPLATE_PREFIX}{name}");
        let current = api.fetch_page(&title)?;
        if current.is_some_and(|current| current.trim() == content.trim()) {
            debug!(title, "tag template up to date");
            continue;
        }
        titles.push(title);
    }
    Ok(titles)
}
