use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    crypto::keys::DEFAULT_HOST_KEY_PATH,
    error::{FlexvolError, Result},
    fetch::{ServiceCredentials, DEFAULT_REQUEST_TIMEOUT},
    paths::{VolumePaths, DEFAULT_VOLUME_ROOT},
    types::{parse_mode, FilePolicy},
    volume::TmpfsOptions,
};

const CONFIG_VERSION_V1: u32 = 1;
const DEFAULT_SECRETS_ENDPOINT: &str = "/secrets";

/// System-wide config file picked up when nothing else is selected.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/rancher/secrets-flexvol.toml";

/// Source used to select the effective config file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConfigSource {
    /// Selected via `--config` CLI flag.
    Flag,
    /// Selected via `SECRETS_FLEXVOL_CONFIG` environment variable.
    Env,
    /// The system config file exists.
    System,
    /// No config file selected.
    None,
}

/// Resolved config selection before parsing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConfigSelection {
    /// Source used for selection.
    pub source: ConfigSource,
    /// Selected path when a config file was found.
    pub path: Option<PathBuf>,
}

/// Raw TOML config file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DriverConfigFile {
    /// Schema version. Must be `1`.
    pub version: u32,
    /// Filesystem locations.
    #[serde(default)]
    pub paths: PathsConfigFile,
    /// Secret service connection.
    #[serde(default)]
    pub service: ServiceConfigFile,
    /// Per-file defaults for materialized secrets.
    #[serde(default)]
    pub defaults: DefaultsConfigFile,
    /// Staging tmpfs settings.
    #[serde(default)]
    pub tmpfs: TmpfsConfigFile,
}

/// `[paths]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PathsConfigFile {
    /// Volume root holding the staging directories.
    pub root: Option<String>,
    /// PEM private key of the host.
    pub host_key: Option<String>,
}

/// `[service]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfigFile {
    /// Base URL of the secret service. `CATTLE_URL` wins when set.
    pub url: Option<String>,
    /// Path appended to the base URL.
    pub endpoint: Option<String>,
    /// Request timeout in seconds.
    pub timeout_seconds: Option<u64>,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct DefaultsConfigFile {
    /// Octal file mode used when a descriptor leaves it empty.
    pub mode: Option<String>,
    /// Owner uid used when a descriptor leaves it empty.
    pub uid: Option<u32>,
    /// Owner gid used when a descriptor leaves it empty.
    pub gid: Option<u32>,
}

/// `[tmpfs]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TmpfsConfigFile {
    /// Options passed to the tmpfs mount.
    pub mount_options: Option<String>,
    /// Octal mode of the staging directory.
    pub dir_mode: Option<String>,
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    /// Volume root override.
    pub root: Option<PathBuf>,
    /// Host key override.
    pub host_key: Option<PathBuf>,
    /// Secret service base URL.
    pub service_url: Option<String>,
    /// Service access key.
    pub access_key: Option<String>,
    /// Service secret key.
    pub secret_key: Option<String>,
}

/// Effective secret service settings.
#[derive(Debug)]
pub struct ServiceConfig {
    /// Full URL receiving token exchanges.
    pub endpoint: String,
    /// Basic-auth credentials.
    pub credentials: ServiceCredentials,
    /// Request timeout.
    pub timeout: Duration,
}

/// Effective driver configuration.
#[derive(Debug)]
pub struct DriverConfig {
    /// Volume path layout.
    pub paths: VolumePaths,
    /// Host private key path.
    pub host_key: PathBuf,
    /// Secret service, when a URL is configured.
    pub service: Option<ServiceConfig>,
    /// Defaults for materialized files.
    pub file_policy: FilePolicy,
    /// Defaults for staging tmpfs volumes.
    pub tmpfs: TmpfsOptions,
}

impl DriverConfigFile {
    /// Loads and parses one config file.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FlexvolError::Config(format!(
                "config file does not exist: {}",
                path.display()
            )));
        }
        let raw = fs::read_to_string(path)?;
        Self::parse_from_str(&raw)
    }

    /// Parses config from TOML text.
    pub fn parse_from_str(raw: &str) -> Result<Self> {
        let parsed = toml::from_str::<Self>(raw)
            .map_err(|error| FlexvolError::Config(format!("invalid config TOML: {error}")))?;
        if parsed.version != CONFIG_VERSION_V1 {
            return Err(FlexvolError::Config(format!(
                "unsupported config version {} (expected {CONFIG_VERSION_V1})",
                parsed.version
            )));
        }
        Ok(parsed)
    }
}

impl DriverConfig {
    /// Merges an optional config file with overrides and built-in defaults.
    pub fn resolve(file: Option<DriverConfigFile>, overrides: ConfigOverrides) -> Result<Self> {
        let file = file.unwrap_or(DriverConfigFile {
            version: CONFIG_VERSION_V1,
            ..DriverConfigFile::default()
        });

        let service = resolve_service(&file.service, &overrides)?;
        let ConfigOverrides { root, host_key, .. } = overrides;

        let root = root
            .or_else(|| file.paths.root.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_VOLUME_ROOT));
        validate_absolute(&root, "paths.root")?;
        let host_key = host_key
            .or_else(|| file.paths.host_key.as_deref().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_HOST_KEY_PATH));
        let file_policy = resolve_file_policy(&file.defaults)?;
        let tmpfs = resolve_tmpfs(&file.tmpfs)?;

        Ok(Self {
            paths: VolumePaths::new(root),
            host_key,
            service,
            file_policy,
            tmpfs,
        })
    }
}

/// Resolves which config file to read, if any.
pub fn resolve_config_path(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    no_config: bool,
) -> Result<ConfigSelection> {
    resolve_config_path_with_system(explicit_path, env_path, no_config, Path::new(SYSTEM_CONFIG_PATH))
}

/// Same as [`resolve_config_path`] with an explicit system config location.
pub fn resolve_config_path_with_system(
    explicit_path: Option<&Path>,
    env_path: Option<&str>,
    no_config: bool,
    system_path: &Path,
) -> Result<ConfigSelection> {
    if no_config {
        return Ok(ConfigSelection {
            source: ConfigSource::None,
            path: None,
        });
    }

    if let Some(path) = explicit_path {
        require_regular_file(path)?;
        return Ok(ConfigSelection {
            source: ConfigSource::Flag,
            path: Some(path.to_path_buf()),
        });
    }

    if let Some(value) = env_path {
        if value.trim().is_empty() {
            return Err(FlexvolError::Config(
                "SECRETS_FLEXVOL_CONFIG cannot be empty".to_owned(),
            ));
        }
        let candidate = PathBuf::from(value);
        require_regular_file(&candidate)?;
        return Ok(ConfigSelection {
            source: ConfigSource::Env,
            path: Some(candidate),
        });
    }

    if is_regular_config_candidate(system_path) {
        return Ok(ConfigSelection {
            source: ConfigSource::System,
            path: Some(system_path.to_path_buf()),
        });
    }

    Ok(ConfigSelection {
        source: ConfigSource::None,
        path: None,
    })
}

fn resolve_service(
    raw: &ServiceConfigFile,
    overrides: &ConfigOverrides,
) -> Result<Option<ServiceConfig>> {
    let Some(base_url) = overrides
        .service_url
        .as_deref()
        .or(raw.url.as_deref())
        .map(str::trim)
        .filter(|url| !url.is_empty())
    else {
        return Ok(None);
    };
    if !is_http_url(base_url) {
        return Err(FlexvolError::Config(format!(
            "secret service url must start with http:// or https://: {base_url}"
        )));
    }

    let endpoint = raw.endpoint.as_deref().unwrap_or(DEFAULT_SECRETS_ENDPOINT);
    let timeout = match raw.timeout_seconds {
        None => DEFAULT_REQUEST_TIMEOUT,
        Some(0) => {
            return Err(FlexvolError::Config(
                "service.timeout_seconds must be greater than zero".to_owned(),
            ))
        }
        Some(seconds) => Duration::from_secs(seconds),
    };
    let credentials = ServiceCredentials::new(
        overrides.access_key.clone().unwrap_or_default(),
        overrides.secret_key.clone().unwrap_or_default(),
    );

    Ok(Some(ServiceConfig {
        endpoint: join_endpoint(base_url, endpoint),
        credentials,
        timeout,
    }))
}

fn resolve_file_policy(raw: &DefaultsConfigFile) -> Result<FilePolicy> {
    let defaults = FilePolicy::default();
    let mode = match raw.mode.as_deref() {
        Some(mode) => {
            parse_mode(mode).map_err(|error| FlexvolError::Config(format!("defaults.mode: {error}")))?
        }
        None => defaults.mode,
    };
    Ok(FilePolicy {
        mode,
        uid: raw.uid.unwrap_or(defaults.uid),
        gid: raw.gid.unwrap_or(defaults.gid),
    })
}

fn resolve_tmpfs(raw: &TmpfsConfigFile) -> Result<TmpfsOptions> {
    let defaults = TmpfsOptions::default();
    let dir_mode = match raw.dir_mode.as_deref() {
        Some(mode) => parse_mode(mode)
            .map_err(|error| FlexvolError::Config(format!("tmpfs.dir_mode: {error}")))?,
        None => defaults.dir_mode,
    };
    Ok(TmpfsOptions {
        dir_mode,
        mount_options: raw
            .mount_options
            .clone()
            .unwrap_or(defaults.mount_options),
    })
}

fn join_endpoint(base_url: &str, endpoint: &str) -> String {
    let base = base_url.trim_end_matches('/');
    let endpoint = endpoint.trim();
    if endpoint.is_empty() {
        return base.to_owned();
    }
    format!("{base}/{}", endpoint.trim_start_matches('/'))
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

fn validate_absolute(path: &Path, label: &str) -> Result<()> {
    if path.is_absolute() {
        return Ok(());
    }
    Err(FlexvolError::Config(format!(
        "{label} must be an absolute path: {}",
        path.display()
    )))
}

fn require_regular_file(path: &Path) -> Result<()> {
    if is_regular_config_candidate(path) {
        return Ok(());
    }
    Err(FlexvolError::Config(format!(
        "config file must be a regular file: {}",
        path.display()
    )))
}

fn is_regular_config_candidate(path: &Path) -> bool {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return false;
    };
    !metadata.file_type().is_symlink() && metadata.file_type().is_file()
}
