use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use wikiupdater_core::categorize::{Category, parse_category_list};
use wikiupdater_core::config::{UpdaterConfig, load_config};
use wikiupdater_core::fragment::FragmentStore;
use wikiupdater_core::loot::{LootOptions, LootReport, data_files_dir, sync_loot_modules};
use wikiupdater_core::mediawiki::{
    MediaWikiClient, MediaWikiClientConfig, WikiReadApi, WikiWriteApi, bot_credentials,
};
use wikiupdater_core::progress::progress_bar;
use wikiupdater_core::runtime::{
    PathOverrides, ResolutionContext, ResolvedPaths, resolve_config_path, resolve_paths,
};
use wikiupdater_core::steps::tag::TEMPLATE_PREFIX;
use wikiupdater_core::updater::{PendingEdit, RunOptions, RunReport, Updater};

#[derive(Debug, Parser)]
#[command(
    name = "wikiupdater",
    version,
    about = "Sync wiki articles with generated parser output"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    parser_output: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    history: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[arg(long, global = true, help = "Hide progress bars and info logs")]
    quiet: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    config: Option<PathBuf>,
    parser_output: Option<PathBuf>,
    history: Option<PathBuf>,
    diagnostics: bool,
    quiet: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            config: cli.config.clone(),
            parser_output: cli.parser_output.clone(),
            history: cli.history.clone(),
            diagnostics: cli.diagnostics,
            quiet: cli.quiet,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Update every categorized page and save the changes")]
    Run(RunArgs),
    #[command(about = "Load and categorize wiki pages without editing")]
    Categorize,
    #[command(about = "Process a single page and show the resulting diff")]
    Page(PageArgs),
    #[command(about = "Sync Module:Loot pages from distribution data files")]
    Loot(LootArgs),
    #[command(about = "Print the game version found in parser output")]
    Version,
}

#[derive(Debug, Args)]
struct RunArgs {
    #[arg(long, help = "Print diffs instead of saving")]
    dry_run: bool,
    #[arg(long, value_name = "TITLE", help = "Process only this page")]
    test_page: Option<String>,
    #[arg(long, value_name = "N", help = "Worker threads for loading and categorizing")]
    threads: Option<usize>,
    #[arg(long, value_name = "CATS", help = "Comma-separated categories to update")]
    only: Option<String>,
}

#[derive(Debug, Args)]
struct PageArgs {
    title: String,
    #[arg(long, help = "Save the page when it changes")]
    save: bool,
}

#[derive(Debug, Args)]
struct LootArgs {
    #[arg(long, help = "Report changed modules without saving")]
    dry_run: bool,
}

struct Session {
    paths: ResolvedPaths,
    config: UpdaterConfig,
}

impl Session {
    fn store(&self) -> FragmentStore {
        FragmentStore::new(
            self.paths.parser_output.clone(),
            self.paths.history.clone(),
            self.config.updater.default_language.clone(),
        )
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);
    init_tracing(runtime.quiet);

    match cli.command {
        Some(Commands::Run(args)) => run_update(&runtime, args),
        Some(Commands::Categorize) => run_categorize(&runtime),
        Some(Commands::Page(args)) => run_page(&runtime, args),
        Some(Commands::Loot(args)) => run_loot(&runtime, args),
        Some(Commands::Version) => run_version(&runtime),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn init_tracing(quiet: bool) {
    let default_level = if quiet { "warn" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_update(runtime: &RuntimeOptions, args: RunArgs) -> Result<()> {
    let mut session = load_session(runtime)?;
    if let Some(threads) = args.threads {
        session.config.updater.threads = threads;
    }
    if let Some(only) = args.only.as_deref() {
        let categories = parse_category_list(only)?;
        session.config.orchestrators.restrict_to(&categories);
    }
    print_paths(&session);

    let store = session.store();
    let updater = Updater::new(&session.config, store)?;
    let mut client = connect(&session.config, !args.dry_run)?;
    let client_config = MediaWikiClientConfig::from_config(&session.config);
    let factory = move || -> Result<Box<dyn WikiReadApi + Send>> {
        Ok(Box::new(MediaWikiClient::new(client_config.clone())?))
    };

    let report = updater.run(
        &mut client,
        &factory,
        &RunOptions {
            dry_run: args.dry_run,
            test_page: args.test_page,
            quiet: runtime.quiet,
        },
    )?;

    println!("game_version: {}", updater.game_version());
    print_report(&report);
    for edit in &report.previews {
        print_edit(edit, &session.config.updater.summary_prefix);
    }
    println!("requests: {}", client.request_count());
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", session.paths.diagnostics());
    }
    report.ensure_saved()
}

fn run_categorize(runtime: &RuntimeOptions) -> Result<()> {
    let session = load_session(runtime)?;
    print_paths(&session);

    let updater = Updater::new(&session.config, session.store())?;
    let mut client = connect(&session.config, false)?;
    let client_config = MediaWikiClientConfig::from_config(&session.config);
    let factory = move || -> Result<Box<dyn WikiReadApi + Send>> {
        Ok(Box::new(MediaWikiClient::new(client_config.clone())?))
    };

    let (pages, errors) = updater.load_pages(&mut client, &factory, runtime.quiet)?;
    let categorized = updater.categorize(&pages, Some(&mut client), runtime.quiet)?;

    println!("pages_scanned: {}", pages.len());
    for (category, count) in categorized.counts() {
        println!("{}: {count}", category.as_str());
    }
    for category in Category::ALL {
        for title in categorized.titles(category) {
            println!("{}.title: {title}", category.as_str());
        }
    }
    print_errors(&errors);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", session.paths.diagnostics());
    }
    Ok(())
}

fn run_page(runtime: &RuntimeOptions, args: PageArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let updater = Updater::new(&session.config, session.store())?;
    let mut client = connect(&session.config, args.save)?;

    let title = args.title.trim();
    if title.is_empty() {
        bail!("page requires a non-empty title");
    }
    let text = match client.fetch_page(title)? {
        Some(text) => text,
        None if title.starts_with(TEMPLATE_PREFIX) => String::new(),
        None => bail!("page `{title}` does not exist"),
    };

    println!("page: {title}");
    let Some(edit) = updater.process_title(title, &text) else {
        println!("changes: none");
        return Ok(());
    };
    print_edit(&edit, &session.config.updater.summary_prefix);

    let mut report = RunReport::default();
    if args.save {
        updater.save_edits(&mut client, vec![edit], &mut report, runtime.quiet)?;
        println!("saved: {}", report.saved);
        print_errors(&report.errors);
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", session.paths.diagnostics());
    }
    report.ensure_saved()
}

fn run_loot(runtime: &RuntimeOptions, args: LootArgs) -> Result<()> {
    let session = load_session(runtime)?;
    let store = session.store();
    let mut client = connect(&session.config, !args.dry_run)?;

    println!("data_files: {}", normalize_path(&data_files_dir(&store)));
    let options = LootOptions {
        summary_prefix: &session.config.updater.summary_prefix,
        tag: &session.config.updater.save_tag,
        rate_limit: Duration::from_secs(session.config.updater.rate_limit_secs),
        dry_run: args.dry_run,
    };
    let progress = progress_bar(0, "loot", runtime.quiet)?;
    let report = sync_loot_modules(&store, &mut client, &options, &progress)?;
    print_loot_report(&report, args.dry_run);
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", session.paths.diagnostics());
    }
    if !report.errors.is_empty() {
        bail!("{} loot module(s) failed to sync", report.errors.len());
    }
    Ok(())
}

fn run_version(runtime: &RuntimeOptions) -> Result<()> {
    let session = load_session(runtime)?;
    println!("game_version: {}", session.store().game_version());
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", session.paths.diagnostics());
    }
    Ok(())
}

fn load_session(runtime: &RuntimeOptions) -> Result<Session> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        config: runtime.config.clone(),
        parser_output: runtime.parser_output.clone(),
        history: runtime.history.clone(),
    };

    let (config_path, _) = resolve_config_path(&context, &overrides);
    if let Some(config_dir) = config_path.parent() {
        let config_env = config_dir.join(".env");
        if config_env.exists() {
            let _ = dotenvy::from_path_override(&config_env);
        }
    }

    let config = load_config(&config_path)?;
    let paths = resolve_paths(&context, &overrides, &config.paths);
    for warning in paths.warnings() {
        tracing::warn!("{warning}");
    }
    Ok(Session { paths, config })
}

fn connect(config: &UpdaterConfig, login: bool) -> Result<MediaWikiClient> {
    let mut client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    if login {
        let Some((username, password)) = bot_credentials() else {
            bail!("saving requires WIKI_BOT_USER and WIKI_BOT_PASS");
        };
        client
            .login(&username, &password)
            .with_context(|| format!("failed to log in as {username}"))?;
    }
    Ok(client)
}

fn print_paths(session: &Session) {
    println!(
        "parser_output: {}",
        normalize_path(&session.paths.parser_output)
    );
    println!("history: {}", normalize_path(&session.paths.history));
}

fn print_report(report: &RunReport) {
    println!("pages_scanned: {}", report.pages_scanned);
    for (category, count) in &report.categories {
        println!("category.{}: {count}", category.as_str());
    }
    if let Some(loot) = &report.loot {
        println!("loot.updated: {}", loot.updated.len());
        println!("loot.unchanged: {}", loot.unchanged);
    }
    println!("queued: {}", report.queued);
    println!("saved: {}", report.saved);
    if report.unchanged_saves > 0 {
        println!("saved.no_change: {}", report.unchanged_saves);
    }
    if report.failed_saves > 0 {
        println!("saved.failed: {}", report.failed_saves);
    }
    print_errors(&report.errors);
}

fn print_loot_report(report: &LootReport, dry_run: bool) {
    let label = if dry_run { "would_update" } else { "updated" };
    println!("{label}: {}", report.updated.len());
    for title in &report.updated {
        println!("  - {title}");
    }
    println!("unchanged: {}", report.unchanged);
    print_errors(&report.errors);
}

fn print_edit(edit: &PendingEdit, summary_prefix: &str) {
    println!();
    println!("title: {}", edit.title);
    println!("summary: {}", edit.summary(summary_prefix));
    print!("{}", edit.diff());
}

fn print_errors(errors: &[String]) {
    println!("errors: {}", errors.len());
    for error in errors {
        println!("  - {error}");
    }
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
