//! Configuration discovery and loading

use std::path::{Path, PathBuf};

use herald_delivery::{DispatchConfig, SimulatedBackendConfig};

/// Environment variable naming the configuration file
pub const CONFIG_ENV: &str = "HERALD_CONFIG";

/// Backend used when no configuration file exists
pub const DEFAULT_BACKEND: &str = "simulated";

const DEFAULT_PATHS: [&str; 2] = ["./herald.config.ron", "/etc/herald/herald.config.ron"];

/// Where the active configuration came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    File(PathBuf),
    Defaults,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File(path) => write!(f, "{}", path.display()),
            Self::Defaults => f.write_str("built-in defaults"),
        }
    }
}

/// Find the configuration file using the following precedence:
/// 1. `explicit` (the `--config` flag), which must exist
/// 2. `HERALD_CONFIG` environment variable, which must exist
/// 3. ./herald.config.ron (current working directory)
/// 4. /etc/herald/herald.config.ron (system-wide config)
///
/// Returns `None` when nothing was requested and no default file exists.
pub fn find_config_file(explicit: Option<&Path>) -> anyhow::Result<Option<PathBuf>> {
    let env_path = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
    resolve(explicit, env_path, &DEFAULT_PATHS.map(PathBuf::from))
}

fn resolve(
    explicit: Option<&Path>,
    env_path: Option<PathBuf>,
    default_paths: &[PathBuf],
) -> anyhow::Result<Option<PathBuf>> {
    if let Some(path) = explicit {
        if path.exists() {
            return Ok(Some(path.to_path_buf()));
        }
        anyhow::bail!("Configuration file does not exist: {}", path.display());
    }

    if let Some(path) = env_path {
        if path.exists() {
            return Ok(Some(path));
        }
        anyhow::bail!(
            "{CONFIG_ENV} points to non-existent file: {}",
            path.display()
        );
    }

    Ok(default_paths.iter().find(|path| path.exists()).cloned())
}

/// Configuration used when no file is found: defaults plus one reliable backend
pub fn fallback_config() -> DispatchConfig {
    DispatchConfig {
        backends: vec![SimulatedBackendConfig::reliable(DEFAULT_BACKEND)],
        ..DispatchConfig::default()
    }
}

/// Parse and validate a RON configuration document
pub fn parse(content: &str) -> anyhow::Result<DispatchConfig> {
    let config: DispatchConfig = ron::from_str(content)?;
    config.validate()?;
    Ok(config)
}

/// Discover, read, parse and validate the configuration
pub fn load(explicit: Option<&Path>) -> anyhow::Result<(DispatchConfig, ConfigSource)> {
    let Some(path) = find_config_file(explicit)? else {
        tracing::debug!("No configuration file found, using defaults");
        return Ok((fallback_config(), ConfigSource::Defaults));
    };

    let content = std::fs::read_to_string(&path).map_err(|e| {
        anyhow::anyhow!("Failed to read config from {}: {}", path.display(), e)
    })?;
    let config = parse(&content)
        .map_err(|e| anyhow::anyhow!("Invalid config in {}: {}", path.display(), e))?;

    tracing::debug!(path = %path.display(), "Loaded configuration");
    Ok((config, ConfigSource::File(path)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    fn config_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_explicit_path_wins() {
        let explicit = config_file("()");
        let env = config_file("()");

        let found = resolve(
            Some(explicit.path()),
            Some(env.path().to_path_buf()),
            &[],
        )
        .unwrap();
        assert_eq!(found.as_deref(), Some(explicit.path()));
    }

    #[test]
    fn test_missing_explicit_or_env_path_is_an_error() {
        let missing = Path::new("/nonexistent/herald.config.ron");

        assert!(resolve(Some(missing), None, &[]).is_err());
        assert!(resolve(None, Some(missing.to_path_buf()), &[]).is_err());
    }

    #[test]
    fn test_default_paths_in_order() {
        let second = config_file("()");
        let defaults = [
            PathBuf::from("/nonexistent/herald.config.ron"),
            second.path().to_path_buf(),
        ];

        let found = resolve(None, None, &defaults).unwrap();
        assert_eq!(found.as_deref(), Some(second.path()));

        assert_eq!(resolve(None, None, &defaults[..1]).unwrap(), None);
    }

    #[test]
    fn test_load_explicit_file() {
        let file = config_file(
            r#"(
                rate_limit: (max_requests: 5, window_ms: 1000),
                backends: [(name: "primary"), (name: "backup", success_rate: 0.5)],
            )"#,
        );

        let (config, source) = load(Some(file.path())).unwrap();
        assert_eq!(source, ConfigSource::File(file.path().to_path_buf()));
        assert_eq!(config.rate_limit.max_requests, 5);
        assert_eq!(config.backends.len(), 2);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let file = config_file("(retry: (max_attempts: 0))");
        let error = load(Some(file.path())).unwrap_err();
        assert!(error.to_string().contains("retry.max_attempts"), "{error}");

        assert!(parse("(retry: [").is_err());
    }

    #[test]
    fn test_fallback_has_one_reliable_backend() {
        let config = fallback_config();
        assert_eq!(
            config.backends,
            vec![SimulatedBackendConfig::reliable(DEFAULT_BACKEND)]
        );
        assert!(config.validate().is_ok());
    }
}
