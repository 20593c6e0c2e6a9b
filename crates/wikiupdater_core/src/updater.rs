//! The update run: load pages, categorize, orchestrate, save.

use std::collections::{BTreeMap, HashMap};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use similar::TextDiff;
use tracing::{debug, info, warn};

use crate::categorize::{Categorized, Category, categorize_pages, categorize_text, stale_tag_templates};
use crate::config::UpdaterConfig;
use crate::formatter::{FORMAT_LABEL, format_wiki_text};
use crate::fragment::FragmentStore;
use crate::loot::{LootOptions, LootReport, sync_loot_modules};
use crate::mediawiki::{NS_MAIN, WikiReadApi, WikiWriteApi};
use crate::orchestrator::{PageContext, orchestrate};
use crate::progress::progress_bar;
use crate::schema::Schemas;
use crate::steps::tag::TEMPLATE_PREFIX;

/// Builds one read client per fetch batch.
pub type ClientFactory<'a> = dyn Fn() -> Result<Box<dyn WikiReadApi + Send>> + Sync + 'a;

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    /// Overrides `[updater].test_page`.
    pub test_page: Option<String>,
    pub quiet: bool,
}

/// A page whose text will be saved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingEdit {
    pub title: String,
    pub categories: Vec<Category>,
    pub original: String,
    pub text: String,
    pub processes: Vec<String>,
}

impl PendingEdit {
    pub fn summary(&self, prefix: &str) -> String {
        format!("{prefix}: {}", self.processes.join(", "))
    }

    /// Unified diff from the wiki text to the new text.
    pub fn diff(&self) -> String {
        TextDiff::from_lines(self.original.as_str(), self.text.as_str())
            .unified_diff()
            .context_radius(3)
            .header(&self.title, &format!("{} (updated)", self.title))
            .to_string()
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub pages_scanned: usize,
    pub categories: Vec<(Category, usize)>,
    pub queued: usize,
    pub saved: usize,
    pub unchanged_saves: usize,
    /// Page and loot module saves that failed; also listed in `errors`.
    pub failed_saves: usize,
    pub loot: Option<LootReport>,
    /// Edits left unsaved by a dry run.
    pub previews: Vec<PendingEdit>,
    pub errors: Vec<String>,
}

impl RunReport {
    /// `Err` when any save failed, so callers exit unsuccessfully after reporting.
    pub fn ensure_saved(&self) -> Result<()> {
        if self.failed_saves > 0 {
            bail!("{} page(s) failed to save", self.failed_saves);
        }
        Ok(())
    }
}

/// Language of a page: the `/xx` title suffix, else the default language.
pub fn page_language<'a>(title: &'a str, default_language: &'a str) -> &'a str {
    if title.starts_with("User:") {
        return default_language;
    }
    match title.rsplit_once('/') {
        Some((_, suffix)) if !suffix.is_empty() => suffix,
        _ => default_language,
    }
}

pub fn is_language_page(title: &str) -> bool {
    title.contains('/') && !title.starts_with("User:")
}

pub struct Updater<'a> {
    config: &'a UpdaterConfig,
    store: FragmentStore,
    schemas: Schemas,
    game_version: String,
    pool: ThreadPool,
}

impl<'a> Updater<'a> {
    pub fn new(config: &'a UpdaterConfig, store: FragmentStore) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(config.threads())
            .build()
            .context("failed to build worker pool")?;
        let game_version = store.game_version();
        Ok(Self {
            config,
            schemas: Schemas::with_overrides(&config.sort_order),
            store,
            game_version,
            pool,
        })
    }

    pub fn game_version(&self) -> &str {
        &self.game_version
    }

    /// Run the enabled pipeline for `category`, then the formatter when enabled.
    /// `None` when nothing would change.
    pub fn process_page(&self, category: Category, title: &str, text: &str) -> Option<PendingEdit> {
        if !self.config.orchestrators.enabled(category) {
            return None;
        }
        let page = PageContext {
            store: &self.store,
            schemas: &self.schemas,
            language: page_language(title, &self.store.default_language),
            title,
            game_version: &self.game_version,
        };
        let orchestration = orchestrate(category, text, &page)?;
        if matches!(category, Category::Fluid | Category::Tag) && !orchestration.edited {
            return None;
        }

        let mut processes = orchestration.processes;
        let mut updated = orchestration.text;
        if self.config.orchestrators.formatter {
            let formatted = format_wiki_text(&updated);
            if formatted != updated && !processes.iter().any(|label| label == FORMAT_LABEL) {
                processes.push(FORMAT_LABEL.to_string());
            }
            updated = formatted;
        }

        (updated != text).then(|| PendingEdit {
            title: title.to_string(),
            categories: vec![category],
            original: text.to_string(),
            text: updated,
            processes,
        })
    }

    /// Process one page through every category it matches, chaining edits.
    pub fn process_title(&self, title: &str, text: &str) -> Option<PendingEdit> {
        let mut categories = categorize_text(text);
        if title.starts_with(TEMPLATE_PREFIX) && !categories.contains(&Category::Tag) {
            categories.push(Category::Tag);
        }
        let mut queue = EditQueue::default();
        for category in categories {
            let current = queue.current_text(title).unwrap_or(text).to_string();
            if let Some(edit) = self.process_page(category, title, &current) {
                queue.push(edit);
            }
        }
        queue.into_edits().into_iter().next()
    }

    /// Fetch every main-namespace page (language pages filtered unless enabled).
    pub fn load_pages(
        &self,
        api: &mut dyn WikiReadApi,
        factory: &ClientFactory<'_>,
        quiet: bool,
    ) -> Result<(BTreeMap<String, String>, Vec<String>)> {
        let mut titles = api
            .get_all_pages(NS_MAIN)
            .context("failed to list main namespace pages")?;
        if !self.config.updater.language_pages {
            titles.retain(|title| !is_language_page(title));
        }
        info!(titles = titles.len(), "loading wiki pages");

        let progress = progress_bar(titles.len(), "loading", quiet)?;
        let batches = titles.chunks(self.config.batch_size()).collect::<Vec<_>>();
        let results = self.pool.install(|| {
            batches
                .par_iter()
                .map(|batch| {
                    let fetched = factory().and_then(|mut client| client.get_page_contents(batch));
                    progress.inc(batch.len() as u64);
                    (batch.first().cloned().unwrap_or_default(), fetched)
                })
                .collect::<Vec<_>>()
        });
        progress.finish_and_clear();

        let mut pages = BTreeMap::new();
        let mut errors = Vec::new();
        for (first_title, fetched) in results {
            match fetched {
                Ok(remote) => {
                    pages.extend(remote.into_iter().map(|page| (page.title, page.content)));
                }
                Err(error) => {
                    warn!(first_title, "failed to load batch: {error:#}");
                    errors.push(format!("batch starting at {first_title}: {error:#}"));
                }
            }
        }
        Ok((pages, errors))
    }

    /// Categorize loaded pages and add stale tag templates.
    pub fn categorize(
        &self,
        pages: &BTreeMap<String, String>,
        api: Option<&mut dyn WikiReadApi>,
        quiet: bool,
    ) -> Result<Categorized> {
        let progress = progress_bar(pages.len(), "categorizing", quiet)?;
        let mut categorized = categorize_pages(pages, &self.pool, &progress);
        if let Some(api) = api {
            let templates = stale_tag_templates(&self.store, &self.store.default_language, api)?;
            info!(count = templates.len(), "tag templates to update");
            for title in templates {
                categorized.add(Category::Tag, title);
            }
        }
        Ok(categorized)
    }

    /// Full run against `api`; batch fetches use clients from `factory`.
    pub fn run<A: WikiWriteApi>(
        &self,
        api: &mut A,
        factory: &ClientFactory<'_>,
        options: &RunOptions,
    ) -> Result<RunReport> {
        let mut report = RunReport::default();
        let test_page = options
            .test_page
            .clone()
            .or_else(|| self.config.updater.test_page.clone());

        let (pages, categorized) = match test_page {
            Some(title) => {
                let Some(text) = api.fetch_page(&title)? else {
                    bail!("test page `{title}` does not exist");
                };
                let is_template = title.starts_with(TEMPLATE_PREFIX);
                let pages = BTreeMap::from([(title.clone(), text)]);
                let mut categorized = self.categorize(&pages, None, options.quiet)?;
                if is_template {
                    categorized.add(Category::Tag, title);
                }
                (pages, categorized)
            }
            None => {
                let (pages, errors) = self.load_pages(&mut *api, factory, options.quiet)?;
                report.errors.extend(errors);
                let categorized = self.categorize(&pages, Some(&mut *api), options.quiet)?;
                (pages, categorized)
            }
        };
        report.pages_scanned = pages.len();
        report.categories = categorized.counts();

        if self.config.orchestrators.loot {
            let loot_options = LootOptions {
                summary_prefix: &self.config.updater.summary_prefix,
                tag: &self.config.updater.save_tag,
                rate_limit: Duration::from_secs(self.config.updater.rate_limit_secs),
                dry_run: options.dry_run,
            };
            let progress = progress_bar(0, "loot", options.quiet)?;
            let loot = sync_loot_modules(&self.store, api, &loot_options, &progress)?;
            report.failed_saves += loot.errors.len();
            report.errors.extend(loot.errors.iter().cloned());
            report.loot = Some(loot);
        }

        let mut queue = EditQueue::default();
        for category in Category::ALL {
            let titles = categorized.titles(category);
            if titles.is_empty() || !self.config.orchestrators.enabled(category) {
                continue;
            }
            let progress = progress_bar(titles.len(), category.as_str(), options.quiet)?;
            for title in titles {
                progress.inc(1);
                let text = match queue.current_text(title) {
                    Some(text) => text.to_string(),
                    None => match self.page_text(&mut *api, &pages, title) {
                        Ok(text) => text,
                        Err(error) => {
                            warn!(title, "failed to fetch page: {error:#}");
                            report.errors.push(format!("{title}: {error:#}"));
                            continue;
                        }
                    },
                };
                if let Some(edit) = self.process_page(category, title, &text) {
                    debug!(title, processes = ?edit.processes, "page queued");
                    queue.push(edit);
                }
            }
            progress.finish_and_clear();
        }

        let edits = queue.into_edits();
        report.queued = edits.len();
        info!(queued = report.queued, dry_run = options.dry_run, "update queue ready");

        if options.dry_run {
            report.previews = edits;
            return Ok(report);
        }
        self.save_edits(api, edits, &mut report, options.quiet)?;
        Ok(report)
    }

    fn page_text(
        &self,
        api: &mut dyn WikiReadApi,
        pages: &BTreeMap<String, String>,
        title: &str,
    ) -> Result<String> {
        if let Some(text) = pages.get(title) {
            return Ok(text.clone());
        }
        // Tag templates live outside the main namespace and are fetched on demand.
        Ok(api.fetch_page(title)?.unwrap_or_default())
    }

    /// Save sequentially; a failed save is reported and the queue continues.
    pub fn save_edits<A: WikiWriteApi + ?Sized>(
        &self,
        api: &mut A,
        edits: Vec<PendingEdit>,
        report: &mut RunReport,
        quiet: bool,
    ) -> Result<()> {
        let rate_limit = Duration::from_secs(self.config.updater.rate_limit_secs);
        let progress = progress_bar(edits.len(), "saving", quiet)?;
        for (index, edit) in edits.iter().enumerate() {
            if index > 0 && !rate_limit.is_zero() {
                thread::sleep(rate_limit);
            }
            progress.inc(1);
            let summary = edit.summary(&self.config.updater.summary_prefix);
            match api.save_page(&edit.title, &edit.text, &summary, &self.config.updater.save_tag) {
                Ok(result) => {
                    report.saved += 1;
                    if result.no_change {
                        report.unchanged_saves += 1;
                    }
                    info!(title = edit.title, summary, "page saved");
                }
                Err(error) => {
                    warn!(title = edit.title, "failed to save page: {error:#}");
                    report.failed_saves += 1;
                    report.errors.push(format!("{}: {error:#}", edit.title));
                }
            }
        }
        progress.finish_and_clear();
        Ok(())
    }
}

/// Pending edits in first-queued order, one per title.
#[derive(Debug, Default)]
struct EditQueue {
    edits: Vec<PendingEdit>,
    index: HashMap<String, usize>,
}

impl EditQueue {
    fn current_text(&self, title: &str) -> Option<&str> {
        self.index
            .get(title)
            .map(|&position| self.edits[position].text.as_str())
    }

    /// Queue `edit`, folding it into an earlier edit of the same page.
    fn push(&mut self, edit: PendingEdit) {
        match self.index.get(&edit.title) {
            Some(&position) => {
                let existing = &mut self.edits[position];
                existing.text = edit.text;
                existing.categories.extend(edit.categories);
                for process in edit.processes {
                    if !existing.processes.contains(&process) {
                        existing.processes.push(process);
                    }
                }
            }
            None => {
                self.index.insert(edit.title.clone(), self.edits.len());
                self.edits.push(edit);
            }
        }
    }

    fn into_edits(self) -> Vec<PendingEdit> {
        self.edits
    }
}

#[cfg(test)]
mod tests {
    use anyhow::Result;

    use super::{RunOptions, RunReport, Updater, is_language_page, page_language};
    use crate::categorize::Category;
    use crate::config::UpdaterConfig;
    use crate::fragment::FragmentStore;
    use crate::mediawiki::WikiReadApi;
    use crate::mediawiki::mock::MockApi;
    use crate::steps::test_support::write_file;

    const AXE_PAGE: &str = "{{Infobox item\n|item_id=Base.Axe\n|weight=1.5\n}}\nAn axe.";
    const AXE_FRAGMENT: &str = "|item_id=Base.Axe\n|weight=2.0\n|condition_max=10\n";

    struct Setup {
        _temp: tempfile::TempDir,
        store: FragmentStore,
        config: UpdaterConfig,
    }

    fn setup() -> Setup {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FragmentStore::new(temp.path().join("output"), temp.path().join("history"), "en");
        write_file(
            &store.localized_path("en", &["item", "infoboxes", "Base.Axe.txt"]),
            AXE_FRAGMENT,
        );
        let mut config = UpdaterConfig::default();
        config.updater.threads = 2;
        config.updater.batch_size = 2;
        Setup {
            _temp: temp,
            store,
            config,
        }
    }

    fn factory_for(pages: &[(&str, &str)]) -> impl Fn() -> Result<Box<dyn WikiReadApi + Send>> + Sync {
        let pages = pages
            .iter()
            .map(|(title, text)| ((*title).to_string(), (*text).to_string()))
            .collect::<Vec<_>>();
        move || {
            let borrowed = pages
                .iter()
                .map(|(title, text)| (title.as_str(), text.as_str()))
                .collect::<Vec<_>>();
            Ok(Box::new(MockApi::with_pages(&borrowed)) as Box<dyn WikiReadApi + Send>)
        }
    }

    #[test]
    fn language_comes_from_title_suffix() {
        assert_eq!(page_language("Axe", "en"), "en");
        assert_eq!(page_language("Axe/fr", "en"), "fr");
        assert_eq!(page_language("User:Bot/Sandbox", "en"), "en");
        assert!(is_language_page("Axe/fr"));
        assert!(!is_language_page("User:Bot/Sandbox"));
        assert!(!is_language_page("Axe"));
    }

    #[test]
    fn run_saves_changed_pages_with_summary_and_tag() {
        let setup = setup();
        let pages = [
            ("Axe", AXE_PAGE),
            ("Axe/fr", AXE_PAGE),
            ("Lore", "Nothing to see."),
        ];
        let mut api = MockApi::with_pages(&pages);
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let factory = factory_for(&pages);
        let report = updater
            .run(&mut api, &factory, &RunOptions { quiet: true, ..RunOptions::default() })
            .expect("run");

        assert_eq!(report.pages_scanned, 2);
        assert_eq!(report.queued, 1);
        assert_eq!(report.saved, 1);
        assert!(report.errors.is_empty());
        assert_eq!(api.saved.len(), 1);
        assert_eq!(api.saved[0].title, "Axe");
        assert_eq!(api.saved[0].summary, "Automated updating: Infobox");
        assert_eq!(api.saved[0].tag, "bot");
        assert_eq!(
            api.saved[0].content,
            "{{Infobox item\n|weight=2.0\n|condition_max=10\n|item_id=Base.Axe\n}}\nAn axe."
        );
    }

    #[test]
    fn dry_run_previews_without_saving() {
        let setup = setup();
        let pages = [("Axe", AXE_PAGE)];
        let mut api = MockApi::with_pages(&pages);
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let report = updater
            .run(
                &mut api,
                &factory_for(&pages),
                &RunOptions {
                    dry_run: true,
                    quiet: true,
                    ..RunOptions::default()
                },
            )
            .expect("run");
        assert!(api.saved.is_empty());
        assert_eq!(report.previews.len(), 1);
        let diff = report.previews[0].diff();
        assert!(diff.contains("-|weight=1.5"));
        assert!(diff.contains("+|weight=2.0"));
    }

    #[test]
    fn failed_batches_and_saves_are_reported() {
        let mut setup = setup();
        setup.config.updater.batch_size = 1;
        let pages = [("Axe", AXE_PAGE), ("Broken", AXE_PAGE)];
        let mut api = MockApi::with_pages(&pages);
        api.failing_titles.push("Axe".to_string());
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let failing_factory = || -> Result<Box<dyn WikiReadApi + Send>> {
            let mut client = MockApi::with_pages(&[("Axe", AXE_PAGE), ("Broken", AXE_PAGE)]);
            client.failing_titles.push("Broken".to_string());
            Ok(Box::new(client))
        };
        let report = updater
            .run(&mut api, &failing_factory, &RunOptions { quiet: true, ..RunOptions::default() })
            .expect("run");

        assert_eq!(report.pages_scanned, 1);
        assert_eq!(report.queued, 1);
        assert_eq!(report.saved, 0);
        assert_eq!(report.errors.len(), 2);
        assert!(report.errors[0].contains("Broken"));
        assert!(report.errors[1].starts_with("Axe:"));
        assert_eq!(report.failed_saves, 1);
        assert!(report.ensure_saved().is_err());
    }

    #[test]
    fn failed_single_page_save_is_an_error() {
        let setup = setup();
        let mut api = MockApi::with_pages(&[("Axe", AXE_PAGE)]);
        api.failing_titles.push("Axe".to_string());
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let edit = updater.process_title("Axe", AXE_PAGE).expect("edit");

        let mut report = RunReport::default();
        updater
            .save_edits(&mut api, vec![edit], &mut report, true)
            .expect("save loop");
        assert_eq!(report.saved, 0);
        assert_eq!(report.failed_saves, 1);
        let error = report.ensure_saved().expect_err("failed save must surface");
        assert_eq!(error.to_string(), "1 page(s) failed to save");
    }

    #[test]
    fn clean_report_passes_save_check() {
        assert!(RunReport::default().ensure_saved().is_ok());
    }

    #[test]
    fn test_page_mode_processes_only_that_page() {
        let setup = setup();
        let mut api = MockApi::with_pages(&[("User:Bot/Sandbox", AXE_PAGE), ("Axe", AXE_PAGE)]);
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let report = updater
            .run(
                &mut api,
                &factory_for(&[]),
                &RunOptions {
                    test_page: Some("User:Bot/Sandbox".to_string()),
                    quiet: true,
                    ..RunOptions::default()
                },
            )
            .expect("run");
        assert_eq!(report.pages_scanned, 1);
        assert_eq!(api.saved.len(), 1);
        assert_eq!(api.saved[0].title, "User:Bot/Sandbox");
    }

    #[test]
    fn disabled_orchestrators_queue_nothing() {
        let mut setup = setup();
        setup.config.orchestrators.item = false;
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        assert!(updater.process_page(Category::Item, "Axe", AXE_PAGE).is_none());
    }

    #[test]
    fn formatter_runs_after_orchestration() {
        let mut setup = setup();
        setup.config.orchestrators.formatter = true;
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let page = "{{Infobox item\n|item_id=Base.Axe\n|weight=1.5\n}}\n\n\nAn axe.   \n==Usage==\nSwing.";
        let edit = updater
            .process_page(Category::Item, "Axe", page)
            .expect("edit");
        assert_eq!(edit.processes, vec!["Infobox", "Format wiki text"]);
        assert_eq!(
            edit.text,
            "{{Infobox item\n|weight=2.0\n|condition_max=10\n|item_id=Base.Axe\n}}\nAn axe.\n\n==Usage==\nSwing."
        );
    }

    #[test]
    fn fluid_pages_need_an_orchestrator_edit() {
        let mut setup = setup();
        setup.config.orchestrators.formatter = true;
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let page = "{{Infobox fluid\n|fluid_id=Water\n}}\nText   ";
        assert!(updater.process_page(Category::Fluid, "Water", page).is_none());
    }

    #[test]
    fn page_in_several_categories_yields_one_edit() {
        let setup = setup();
        write_file(
            &setup.store.localized_path("en", &["tiles", "infoboxes", "Axe_Rack.txt"]),
            "|name=Axe Rack\n|weight=30\n",
        );
        let updater = Updater::new(&setup.config, setup.store.clone()).expect("updater");
        let page = "{{Infobox item\n|item_id=Base.Axe\n|weight=1.5\n}}\n{{Infobox tile\n|name=Axe Rack\n|weight=20\n}}";
        let edit = updater.process_title("Axe", page).expect("edit");
        assert_eq!(edit.categories, vec![Category::Item, Category::Tile]);
        assert_eq!(edit.processes, vec!["Infobox"]);
        assert!(edit.text.contains("|weight=2.0"));
        assert!(edit.text.contains("|weight=30"));
    }
}
