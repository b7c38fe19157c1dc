use std::path::PathBuf;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::{
    error::{FlexvolError, Result},
    types::{parse_mode, SecretName, SecretToken},
};

/// Option key carrying the one-time token.
pub const TOKEN_KEY: &str = "io.rancher.secrets.token";
/// Default tmpfs mount options for staging volumes.
pub const DEFAULT_MOUNT_OPTIONS: &str = "size=10m";
/// Default mode of the staging directory.
pub const DEFAULT_STAGING_DIR_MODE: u32 = 0o755;
const MAX_DIR_MODE: u32 = 0o7777;

/// How a staging tmpfs is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TmpfsOptions {
    /// Mode of the staging directory.
    pub dir_mode: u32,
    /// Options passed to the tmpfs mount.
    pub mount_options: String,
}

impl Default for TmpfsOptions {
    fn default() -> Self {
        Self {
            dir_mode: DEFAULT_STAGING_DIR_MODE,
            mount_options: DEFAULT_MOUNT_OPTIONS.to_owned(),
        }
    }
}

/// Typed create/attach options for one volume.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeOptions {
    /// Volume name, used as the staging directory name.
    pub name: SecretName,
    /// Staging tmpfs settings.
    pub tmpfs: TmpfsOptions,
}

/// Attach parameters split into the token and the remaining typed options.
#[derive(Debug)]
pub struct AttachRequest {
    /// One-time token, never part of the generic options.
    pub token: SecretToken,
    /// Remaining options.
    pub volume: VolumeOptions,
}

/// Delete options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DeleteOptions {
    /// Staging device to tear down, when the volume was ever attached.
    #[serde(default)]
    pub device: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ModeValue {
    Number(u32),
    Text(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VolumeOptionsWire {
    #[serde(default, alias = "volumeName")]
    name: Option<String>,
    #[serde(default)]
    mode: Option<ModeValue>,
    #[serde(default, alias = "mountOptions")]
    mount_opts: Option<String>,
}

impl VolumeOptions {
    /// Parses create options, filling tmpfs settings from `defaults`.
    pub fn parse(raw: &str, defaults: &TmpfsOptions) -> Result<Self> {
        let mut params = parse_params(raw)?;
        params.remove(TOKEN_KEY);
        Self::from_params(params, defaults)
    }

    fn from_params(params: Map<String, Value>, defaults: &TmpfsOptions) -> Result<Self> {
        let wire: VolumeOptionsWire = serde_json::from_value(Value::Object(params))
            .map_err(|error| FlexvolError::Config(format!("invalid volume options: {error}")))?;

        let raw_name = wire
            .name
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| FlexvolError::Config("volume name not given".to_owned()))?;
        let name = SecretName::new(raw_name.trim())?;

        let dir_mode = match wire.mode {
            None => defaults.dir_mode,
            Some(ModeValue::Number(mode)) if mode <= MAX_DIR_MODE => mode,
            Some(ModeValue::Number(mode)) => {
                return Err(FlexvolError::Config(format!(
                    "staging mode out of range: {mode:o}"
                )))
            }
            Some(ModeValue::Text(text)) => parse_mode(&text)
                .map_err(|error| FlexvolError::Config(error.to_string()))?,
        };
        let mount_options = wire
            .mount_opts
            .unwrap_or_else(|| defaults.mount_options.clone());

        Ok(Self {
            name,
            tmpfs: TmpfsOptions {
                dir_mode,
                mount_options,
            },
        })
    }
}

impl AttachRequest {
    /// Extracts the token first, then decodes the rest into typed options.
    pub fn parse(raw: &str, defaults: &TmpfsOptions) -> Result<Self> {
        let mut params = parse_params(raw)?;
        let token = params
            .remove(TOKEN_KEY)
            .ok_or_else(|| FlexvolError::Config("no token found".to_owned()))
            .and_then(token_from_value)?;
        let volume = VolumeOptions::from_params(params, defaults)?;
        Ok(Self { token, volume })
    }
}

impl DeleteOptions {
    /// Parses delete options.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut params = parse_params(raw)?;
        params.remove(TOKEN_KEY);
        serde_json::from_value(Value::Object(params))
            .map_err(|error| FlexvolError::Config(format!("invalid delete options: {error}")))
    }
}

/// Parses an option payload into an owned map.
///
/// Payloads quoted by the host transport arrive with escaped quotes; when the raw
/// text is not valid JSON, backslashes are stripped and parsing is retried.
fn parse_params(raw: &str) -> Result<Map<String, Value>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(Map::new());
    }
    if let Ok(params) = serde_json::from_str::<Map<String, Value>>(trimmed) {
        return Ok(params);
    }
    let unescaped = trimmed.replace('\\', "");
    serde_json::from_str::<Map<String, Value>>(unescaped.trim_matches('"'))
        .map_err(|error| FlexvolError::Config(format!("malformed options json: {error}")))
}

fn token_from_value(value: Value) -> Result<SecretToken> {
    let bytes = match value {
        Value::String(text) => text.into_bytes(),
        Value::Null => Vec::new(),
        other => serde_json::to_vec(&other)?,
    };
    if bytes.is_empty() {
        return Err(FlexvolError::Config("no token found".to_owned()));
    }
    Ok(SecretToken::new(bytes))
}

#[cfg(test)]
mod unit_tests {
    use super::{AttachRequest, DeleteOptions, TmpfsOptions, VolumeOptions};
    use crate::error::FlexvolError;

    #[test]
    fn attach_extracts_token_and_typed_options() {
        let request = AttachRequest::parse(
            r#"{"io.rancher.secrets.token":"onetime","name":"web","mountOpts":"size=1m","mode":448}"#,
            &TmpfsOptions::default(),
        )
        .unwrap();

        assert_eq!(request.token.expose(), b"onetime");
        assert_eq!(request.volume.name.as_str(), "web");
        assert_eq!(request.volume.tmpfs.mount_options, "size=1m");
        assert_eq!(request.volume.tmpfs.dir_mode, 0o700);
    }

    #[test]
    fn attach_accepts_backslash_escaped_payload() {
        let request = AttachRequest::parse(
            r#"{\"io.rancher.secrets.token\":\"onetime\",\"volumeName\":\"web\"}"#,
            &TmpfsOptions::default(),
        )
        .unwrap();

        assert_eq!(request.token.expose(), b"onetime");
        assert_eq!(request.volume.name.as_str(), "web");
        assert_eq!(request.volume.tmpfs, TmpfsOptions::default());
    }

    #[test]
    fn attach_serializes_structured_tokens() {
        let request = AttachRequest::parse(
            r#"{"io.rancher.secrets.token":{"value":"abc"},"name":"web"}"#,
            &TmpfsOptions::default(),
        )
        .unwrap();
        assert_eq!(request.token.expose(), br#"{"value":"abc"}"#);
    }

    #[test]
    fn attach_without_token_is_config_error() {
        let error = AttachRequest::parse(r#"{"name":"web"}"#, &TmpfsOptions::default()).unwrap_err();
        assert!(matches!(error, FlexvolError::Config(message) if message.contains("token")));
    }

    #[test]
    fn volume_options_require_name() {
        let error = VolumeOptions::parse(r#"{"mountOpts":"size=1m"}"#, &TmpfsOptions::default())
            .unwrap_err();
        assert!(matches!(error, FlexvolError::Config(message) if message.contains("name")));
    }

    #[test]
    fn volume_options_accept_octal_mode_text() {
        let options =
            VolumeOptions::parse(r#"{"name":"web","mode":"0750"}"#, &TmpfsOptions::default())
                .unwrap();
        assert_eq!(options.tmpfs.dir_mode, 0o750);
    }

    #[test]
    fn volume_options_reject_traversing_names() {
        let error =
            VolumeOptions::parse(r#"{"name":"../etc"}"#, &TmpfsOptions::default()).unwrap_err();
        assert!(matches!(error, FlexvolError::Validation(_)));
    }

    #[test]
    fn delete_options_without_device_are_empty() {
        assert_eq!(DeleteOptions::parse("{}").unwrap(), DeleteOptions::default());
        assert_eq!(
            DeleteOptions::parse(r#"{"device":"/tmp/vol"}"#)
                .unwrap()
                .device
                .unwrap()
                .to_str(),
            Some("/tmp/vol")
        );
    }
}
