use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::config::PathsSection;

pub const DEFAULT_CONFIG_FILENAME: &str = "wikiupdater.toml";
pub const DEFAULT_PARSER_OUTPUT_DIR: &str = "output";
pub const DEFAULT_HISTORY_DIR: &str = "history/txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub config: Option<PathBuf>,
    pub parser_output: Option<PathBuf>,
    pub history: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub config_path: PathBuf,
    pub parser_output: PathBuf,
    pub history: PathBuf,
    pub config_source: ValueSource,
    pub parser_output_source: ValueSource,
    pub history_source: ValueSource,
}

impl ResolvedPaths {
    pub fn diagnostics(&self) -> String {
        format!(
            "config_path={} ({})\nparser_output={} ({})\nhistory={} ({})",
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
            normalize_for_display(&self.parser_output),
            self.parser_output_source.as_str(),
            normalize_for_display(&self.history),
            self.history_source.as_str(),
        )
    }

    /// Missing input trees are reported, not fatal: every step treats them as absent fragments.
    pub fn warnings(&self) -> Vec<String> {
        let mut warnings = Vec::new();
        if !self.parser_output.exists() {
            warnings.push(format!(
                "parser output directory {} is missing; no fragments will be found",
                normalize_for_display(&self.parser_output)
            ));
        }
        if !self.history.exists() {
            warnings.push(format!(
                "history directory {} is missing; history tables will be skipped",
                normalize_for_display(&self.history)
            ));
        }
        warnings
    }
}

pub fn resolve_config_path(context: &ResolutionContext, overrides: &PathOverrides) -> (PathBuf, ValueSource) {
    resolve_config_path_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_config_path_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.config.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = non_empty(lookup_env("WIKIUPDATER_CONFIG")) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }
    (context.cwd.join(DEFAULT_CONFIG_FILENAME), ValueSource::Default)
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &PathsSection,
) -> ResolvedPaths {
    resolve_paths_with_lookup(context, overrides, config, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    config: &PathsSection,
    lookup_env: F,
) -> ResolvedPaths
where
    F: Fn(&str) -> Option<String>,
{
    let (config_path, config_source) =
        resolve_config_path_with_lookup(context, overrides, &lookup_env);
    let (parser_output, parser_output_source) = resolve_dir(
        context,
        overrides.parser_output.as_deref(),
        lookup_env("WIKIUPDATER_PARSER_OUTPUT"),
        config.parser_output.as_deref(),
        DEFAULT_PARSER_OUTPUT_DIR,
    );
    let (history, history_source) = resolve_dir(
        context,
        overrides.history.as_deref(),
        lookup_env("WIKIUPDATER_HISTORY"),
        config.history.as_deref(),
        DEFAULT_HISTORY_DIR,
    );

    ResolvedPaths {
        config_path,
        parser_output,
        history,
        config_source,
        parser_output_source,
        history_source,
    }
}

fn resolve_dir(
    context: &ResolutionContext,
    flag: Option<&Path>,
    env_value: Option<String>,
    config_value: Option<&str>,
    default: &str,
) -> (PathBuf, ValueSource) {
    if let Some(path) = flag {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }
    if let Some(value) = non_empty(env_value) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Env);
    }
    if let Some(value) = non_empty(config_value.map(str::to_string)) {
        return (absolutize(Path::new(&value), &context.cwd), ValueSource::Config);
    }
    (context.cwd.join(default), ValueSource::Default)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::{
        PathOverrides, ResolutionContext, ValueSource, resolve_config_path_with_lookup,
        resolve_paths_with_lookup,
    };
    use crate::config::PathsSection;

    #[test]
    fn config_path_prefers_flag_over_env() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let overrides = PathOverrides {
            config: Some(PathBuf::from("flag.toml")),
            ..PathOverrides::default()
        };
        let env = HashMap::from([("WIKIUPDATER_CONFIG".to_string(), "env.toml".to_string())]);

        let (path, source) =
            resolve_config_path_with_lookup(&context, &overrides, |key| env.get(key).cloned());
        assert_eq!(path, temp.path().join("flag.toml"));
        assert_eq!(source, ValueSource::Flag);

        let (path, source) = resolve_config_path_with_lookup(
            &context,
            &PathOverrides::default(),
            |key| env.get(key).cloned(),
        );
        assert_eq!(path, temp.path().join("env.toml"));
        assert_eq!(source, ValueSource::Env);
    }

    #[test]
    fn data_paths_follow_flag_env_config_default_precedence() {
        let temp = tempdir().expect("tempdir");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let config = PathsSection {
            parser_output: Some("/data/output".to_string()),
            history: Some("from-config".to_string()),
        };
        let env = HashMap::from([(
            "WIKIUPDATER_HISTORY".to_string(),
            "/env/history".to_string(),
        )]);

        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), &config, |key| {
                env.get(key).cloned()
            });
        assert_eq!(resolved.parser_output, PathBuf::from("/data/output"));
        assert_eq!(resolved.parser_output_source, ValueSource::Config);
        assert_eq!(resolved.history, PathBuf::from("/env/history"));
        assert_eq!(resolved.history_source, ValueSource::Env);
        assert_eq!(resolved.config_source, ValueSource::Default);

        let overrides = PathOverrides {
            parser_output: Some(PathBuf::from("flag-output")),
            ..PathOverrides::default()
        };
        let resolved = resolve_paths_with_lookup(&context, &overrides, &PathsSection::default(), |_| None);
        assert_eq!(resolved.parser_output, temp.path().join("flag-output"));
        assert_eq!(resolved.parser_output_source, ValueSource::Flag);
        assert_eq!(resolved.history, temp.path().join("history/txt"));
        assert_eq!(resolved.history_source, ValueSource::Default);
    }

    #[test]
    fn diagnostics_and_warnings_describe_resolution() {
        let temp = tempdir().expect("tempdir");
        fs::create_dir_all(temp.path().join("output")).expect("create output");
        let context = ResolutionContext {
            cwd: temp.path().to_path_buf(),
        };
        let resolved =
            resolve_paths_with_lookup(&context, &PathOverrides::default(), &PathsSection::default(), |_| None);
        let diagnostics = resolved.diagnostics();
        assert!(diagnostics.contains("parser_output="));
        assert!(diagnostics.contains("(default)"));
        let warnings = resolved.warnings();
        assert_eq!(warnings.len(), 1);
        assert!(warnings[0].contains("history directory"));
    }
}
