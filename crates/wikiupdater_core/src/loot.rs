//! Loot distribution modules: `Module:Loot/*` pages mirrored from Lua files.

use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::fragment::FragmentStore;
use crate::mediawiki::WikiWriteApi;

pub const LOOT_MODULE_PREFIX: &str = "Module:Loot/";
const INDEX_STEM: &str = "index";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LootModule {
    pub stem: String,
    pub title: String,
    pub path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LootOptions<'a> {
    pub summary_prefix: &'a str,
    pub tag: &'a str,
    pub rate_limit: Duration,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LootReport {
    /// Modules saved, or that would be saved on a dry run.
    pub updated: Vec<String>,
    pub unchanged: usize,
    pub errors: Vec<String>,
}

pub fn data_files_dir(store: &FragmentStore) -> PathBuf {
    store.localized_path(
        &store.default_language,
        &["item", "distributions", "data_files"],
    )
}

/// Lua modules to mirror: `index` first, then the rest sorted by stem.
pub fn loot_modules(store: &FragmentStore) -> Result<Vec<LootModule>> {
    let folder = data_files_dir(store);
    if !folder.is_dir() {
        return Ok(Vec::new());
    }

    let mut modules = Vec::new();
    for entry in WalkDir::new(&folder).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to list {}", folder.display()))?;
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().is_none_or(|ext| ext != "lua") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };
        modules.push(LootModule {
            stem: stem.to_string(),
            title: format!("{LOOT_MODULE_PREFIX}{stem}"),
            path: path.to_path_buf(),
        });
    }
    modules.sort_by(|left, right| {
        (left.stem != INDEX_STEM, &left.stem).cmp(&(right.stem != INDEX_STEM, &right.stem))
    });
    Ok(modules)
}

pub fn loot_summary(prefix: &str, stem: &str) -> String {
    format!("{prefix}: Update Loot {stem} module")
}

/// Save every module whose wiki text differs from its Lua file.
/// A failed module is recorded in the report and the rest still run.
pub fn sync_loot_modules<A: WikiWriteApi + ?Sized>(
    store: &FragmentStore,
    api: &mut A,
    options: &LootOptions<'_>,
    progress: &ProgressBar,
) -> Result<LootReport> {
    let modules = loot_modules(store)?;
    if modules.is_empty() {
        info!(folder = %data_files_dir(store).display(), "no loot modules found");
    }
    progress.set_length(modules.len() as u64);

    let mut report = LootReport::default();
    let mut saved_any = false;
    for module in modules {
        progress.inc(1);
        let content = fs::read_to_string(&module.path)
            .with_context(|| format!("failed to read {}", module.path.display()))?;
        let current = match api.fetch_page(&module.title) {
            Ok(current) => current,
            Err(error) => {
                warn!(title = module.title, "failed to fetch loot module: {error:#}");
                report.errors.push(format!("{}: {error:#}", module.title));
                continue;
            }
        };
        if current.as_deref() == Some(content.as_str()) {
            report.unchanged += 1;
            continue;
        }
        if options.dry_run {
            report.updated.push(module.title);
            continue;
        }

        if saved_any && !options.rate_limit.is_zero() {
            thread::sleep(options.rate_limit);
        }
        let summary = loot_summary(options.summary_prefix, &module.stem);
        match api.save_page(&module.title, &content, &summary, options.tag) {
            Ok(_) => {
                saved_any = true;
                info!(title = module.title, "loot module saved");
                report.updated.push(module.title);
            }
            Err(error) => {
                warn!(title = module.title, "failed to save loot module: {error:#}");
                report.errors.push(format!("{}: {error:#}", module.title));
            }
        }
    }
    progress.finish_and_clear();
    Ok(report)
}
