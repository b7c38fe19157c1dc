use crate::{
    audit::AuditLog,
    config::DriverConfig,
    crypto::RsaHybridDecryptor,
    error::{FlexvolError, Result},
    fetch::{HttpSecretSource, SecretSource},
    fs_secure::ensure_private_dir,
    materialize::FileSecretSink,
    types::{SecretDescriptor, SecretRequest},
    volume::{SystemMounter, VolumeController},
};

/// Controller wired to the system mount helpers and the HTTP secret service.
pub(crate) type DriverController =
    VolumeController<SystemMounter, Box<dyn SecretSource>, RsaHybridDecryptor, FileSecretSink>;

/// Stands in for the secret service when no URL is configured.
struct UnconfiguredSource;

impl SecretSource for UnconfiguredSource {
    fn fetch(&self, _request: &SecretRequest) -> Result<Vec<SecretDescriptor>> {
        Err(FlexvolError::Config(
            "secret service url not configured (set CATTLE_URL)".to_owned(),
        ))
    }
}

pub(crate) fn controller_for_config(config: DriverConfig) -> Result<DriverController> {
    ensure_private_dir(config.paths.root())?;
    let audit_log = AuditLog::new(config.paths.audit_file())?;
    let source: Box<dyn SecretSource> = match config.service {
        Some(service) => Box::new(HttpSecretSource::new(
            service.endpoint,
            service.credentials,
            service.timeout,
        )?),
        None => Box::new(UnconfiguredSource),
    };

    Ok(VolumeController::new(
        config.paths,
        config.host_key,
        SystemMounter::new(),
        source,
        RsaHybridDecryptor,
        FileSecretSink::new(config.file_policy),
        audit_log,
    )
    .with_tmpfs_defaults(config.tmpfs))
}
