//! Configuration file management for benchrig.
//!
//! Provides a TOML-based config file at `~/.config/benchrig/config.toml` and
//! a resolution chain: CLI flag > env var > config file > default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

use benchrig_core::suite::{Layout, PrerequisitePolicy};
use benchrig_core::{EnvEdit, Env};

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub toolchain: ToolchainSection,
    #[serde(default)]
    pub paths: PathsSection,
    #[serde(default)]
    pub env: EnvSection,
    #[serde(default)]
    pub suite: SuiteSection,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ToolchainSection {
    /// Root of the Go toolchain under test (the directory holding `bin/go`).
    pub root: Option<PathBuf>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct PathsSection {
    pub work_dir: Option<PathBuf>,
    /// Directory holding per-harness benchmark driver sources.
    pub bench_dir: Option<PathBuf>,
    pub results_dir: Option<PathBuf>,
}

/// Environment overlays applied on top of the process environment.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EnvSection {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub build: Vec<EnvEdit>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exec: Vec<EnvEdit>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct SuiteSection {
    pub on_unmet: Option<PrerequisitePolicy>,
    pub stage_timeout_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the benchrig config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/benchrig` or
/// `~/.config/benchrig`, on every platform.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("benchrig");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("benchrig")
}

/// Return the path to the config file, honoring an explicit override.
pub fn config_path(cli_path: Option<&Path>) -> PathBuf {
    match cli_path {
        Some(p) => p.to_path_buf(),
        None => config_dir().join("config.toml"),
    }
}

fn default_work_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("benchrig")
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    let config: ConfigFile = toml::from_str(&contents)
        .with_context(|| format!("failed to parse config file at {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`], but a missing file yields the default config.
fn load_config_if_present(path: &Path) -> Result<ConfigFile> {
    if !path.exists() {
        return Ok(ConfigFile::default());
    }
    load_config(path)
}

/// Serialize and write the config file, creating parent dirs as needed.
pub fn save_config(path: &Path, config: &ConfigFile) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// CLI flags that participate in resolution.
#[derive(Debug, Default)]
pub struct Overrides {
    pub toolchain_root: Option<PathBuf>,
    pub on_unmet: Option<PrerequisitePolicy>,
    pub stage_timeout_secs: Option<u64>,
}

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct BenchrigConfig {
    pub toolchain_root: PathBuf,
    pub layout: Layout,
    pub build_env: Env,
    pub exec_env: Env,
    pub policy: PrerequisitePolicy,
    pub stage_timeout: Option<Duration>,
}

impl BenchrigConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config file > default.
    ///
    /// - Toolchain root: `--toolchain-root` > `BENCHRIG_TOOLCHAIN_ROOT` > `GOROOT` > `toolchain.root` > error
    /// - Work dir: `BENCHRIG_WORK_DIR` > `paths.work_dir` > `<cache dir>/benchrig`
    /// - Bench dir: `paths.bench_dir` > `./benchmarks`
    /// - Results dir: `paths.results_dir` > `<work dir>/results`
    ///
    /// Relative paths are made absolute against the current directory.
    pub fn resolve(config_path: &Path, overrides: &Overrides) -> Result<Self> {
        let file = load_config_if_present(config_path)?;

        let toolchain_root = if let Some(ref root) = overrides.toolchain_root {
            root.clone()
        } else if let Some(root) = env_path("BENCHRIG_TOOLCHAIN_ROOT") {
            root
        } else if let Some(root) = env_path("GOROOT") {
            root
        } else if let Some(ref root) = file.toolchain.root {
            root.clone()
        } else {
            bail!(
                "toolchain root not found; pass --toolchain-root, set BENCHRIG_TOOLCHAIN_ROOT, or run `benchrig init`"
            );
        };

        let work_dir = env_path("BENCHRIG_WORK_DIR")
            .or(file.paths.work_dir)
            .unwrap_or_else(default_work_dir);
        let bench_root = file
            .paths
            .bench_dir
            .unwrap_or_else(|| PathBuf::from("benchmarks"));
        let results_dir = file
            .paths
            .results_dir
            .unwrap_or_else(|| work_dir.join("results"));

        let ambient = Env::from_process();
        let build_env = ambient.apply(&file.env.build);
        let exec_env = ambient.apply(&file.env.exec);

        let policy = overrides
            .on_unmet
            .or(file.suite.on_unmet)
            .unwrap_or_default();
        let stage_timeout = overrides
            .stage_timeout_secs
            .or(file.suite.stage_timeout_secs)
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let layout = Layout::new(&work_dir, &bench_root, &results_dir)
            .context("failed to resolve benchrig paths against the current directory")?;
        let toolchain_root = std::path::absolute(&toolchain_root)
            .with_context(|| format!("failed to resolve toolchain root {}", toolchain_root.display()))?;

        Ok(Self {
            toolchain_root,
            layout,
            build_env,
            exec_env,
            policy,
            stage_timeout,
        })
    }
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var_os(key)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn lock_env() -> std::sync::MutexGuard<'static, ()> {
        crate::test_util::lock_env()
    }

    /// Clear every variable `resolve` reads.
    fn clear_resolution_env() {
        for key in ["BENCHRIG_TOOLCHAIN_ROOT", "BENCHRIG_WORK_DIR", "GOROOT"] {
            unsafe { std::env::remove_var(key) };
        }
    }

    const SAMPLE: &str = r#"
[toolchain]
root = "/opt/go-tip"

[paths]
work_dir = "/srv/bench/work"
bench_dir = "/srv/bench/drivers"

[[env.build]]
op = "set"
key = "CGO_ENABLED"
value = "1"

[[env.exec]]
op = "set"
key = "GOMAXPROCS"
value = "8"

[suite]
on_unmet = "abort"
stage_timeout_secs = 3600
"#;

    fn write_sample(dir: &Path) -> PathBuf {
        let path = dir.join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    #[test]
    fn save_and_load_config_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("config.toml");

        let original = ConfigFile {
            toolchain: ToolchainSection {
                root: Some(PathBuf::from("/opt/go")),
            },
            env: EnvSection {
                build: vec![EnvEdit::Prefix {
                    key: "PATH".into(),
                    value: "/opt/tools/bin:".into(),
                }],
                exec: vec![],
            },
            ..ConfigFile::default()
        };
        save_config(&path, &original).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.toolchain.root, original.toolchain.root);
        assert_eq!(loaded.env.build, original.env.build);
        assert!(loaded.env.exec.is_empty());
        assert!(loaded.suite.on_unmet.is_none());
    }

    #[test]
    fn file_values_apply_when_nothing_overrides() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_sample(tmp.path());

        let cfg = BenchrigConfig::resolve(&path, &Overrides::default()).unwrap();
        assert_eq!(cfg.toolchain_root, PathBuf::from("/opt/go-tip"));
        assert_eq!(cfg.layout.work_dir, PathBuf::from("/srv/bench/work"));
        assert_eq!(cfg.layout.bench_root, PathBuf::from("/srv/bench/drivers"));
        assert_eq!(cfg.layout.results_dir, PathBuf::from("/srv/bench/work/results"));
        assert_eq!(cfg.build_env.get("CGO_ENABLED"), Some("1"));
        assert_eq!(cfg.exec_env.get("GOMAXPROCS"), Some("8"));
        assert_eq!(cfg.exec_env.get("CGO_ENABLED"), None);
        assert_eq!(cfg.policy, PrerequisitePolicy::Abort);
        assert_eq!(cfg.stage_timeout, Some(Duration::from_secs(3600)));
    }

    #[test]
    fn env_var_overrides_config_file() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_sample(tmp.path());

        unsafe { std::env::set_var("BENCHRIG_TOOLCHAIN_ROOT", "/env/go") };
        unsafe { std::env::set_var("BENCHRIG_WORK_DIR", "/env/work") };
        let cfg = BenchrigConfig::resolve(&path, &Overrides::default()).unwrap();
        clear_resolution_env();

        assert_eq!(cfg.toolchain_root, PathBuf::from("/env/go"));
        assert_eq!(cfg.layout.work_dir, PathBuf::from("/env/work"));
    }

    #[test]
    fn goroot_is_a_fallback_for_toolchain_root() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();

        unsafe { std::env::set_var("GOROOT", "/usr/lib/go") };
        let cfg = BenchrigConfig::resolve(&tmp.path().join("absent.toml"), &Overrides::default()).unwrap();
        clear_resolution_env();

        assert_eq!(cfg.toolchain_root, PathBuf::from("/usr/lib/go"));
        assert_eq!(cfg.policy, PrerequisitePolicy::Skip);
        assert_eq!(cfg.stage_timeout, None);
    }

    #[test]
    fn cli_flags_override_all() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = write_sample(tmp.path());

        unsafe { std::env::set_var("BENCHRIG_TOOLCHAIN_ROOT", "/env/go") };
        let overrides = Overrides {
            toolchain_root: Some(PathBuf::from("/cli/go")),
            on_unmet: Some(PrerequisitePolicy::Skip),
            stage_timeout_secs: Some(0),
        };
        let cfg = BenchrigConfig::resolve(&path, &overrides).unwrap();
        clear_resolution_env();

        assert_eq!(cfg.toolchain_root, PathBuf::from("/cli/go"));
        assert_eq!(cfg.policy, PrerequisitePolicy::Skip);
        assert_eq!(cfg.stage_timeout, None, "zero disables the limit");
    }

    #[test]
    fn relative_paths_resolve_against_current_dir() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[toolchain]\nroot = \"go-tip\"\n").unwrap();

        unsafe { std::env::set_var("BENCHRIG_WORK_DIR", "./work") };
        let cfg = BenchrigConfig::resolve(&path, &Overrides::default()).unwrap();
        clear_resolution_env();

        let cwd = std::env::current_dir().unwrap();
        assert_eq!(cfg.toolchain_root, cwd.join("go-tip"));
        assert!(cfg.layout.work_dir.starts_with(&cwd), "{}", cfg.layout.work_dir.display());
        assert!(cfg.layout.work_dir.ends_with("work"));
        assert_eq!(cfg.layout.bench_root, cwd.join("benchmarks"));
        assert!(cfg.layout.results_dir.is_absolute());
        assert!(cfg.layout.bin_dir("cockroachdb").is_absolute());
        assert!(cfg.layout.tmp_dir("cockroachdb").is_absolute());
        assert!(cfg.layout.bench_dir("cockroachdb").is_absolute());
    }

    #[test]
    fn missing_toolchain_root_is_an_error() {
        let _lock = lock_env();
        clear_resolution_env();
        let tmp = tempfile::TempDir::new().unwrap();

        let err = BenchrigConfig::resolve(&tmp.path().join("absent.toml"), &Overrides::default()).unwrap_err();
        assert!(err.to_string().contains("toolchain root not found"), "unexpected error: {err}");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[[env.build]]\nop = \"append\"\nkey = \"X\"\nvalue = \"y\"\n").unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("failed to parse"), "{err:#}");
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path(None);
        assert!(
            path.ends_with("benchrig/config.toml"),
            "unexpected config path: {}",
            path.display()
        );
        assert_eq!(config_path(Some(Path::new("/x.toml"))), PathBuf::from("/x.toml"));
    }
}
