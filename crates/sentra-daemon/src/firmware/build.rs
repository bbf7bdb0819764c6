//! Firmware build orchestration.
//!
//! A build renders the device's firmware source, optionally runs an
//! external compiler, then masks the artifact with the device's key.
//! Every attempt is recorded; failures land in the build row rather than
//! bubbling out as errors.

use std::path::PathBuf;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::ServiceError;
use crate::firmware::render::{render, resolve_template, RenderContext, DEFAULT_TEMPLATE_NAME};
use crate::identity::{CertificateService, KeyService};
use crate::storage::{BuildKind, BuildStatus, CompletedBuild, Database, FirmwareBuild};
use sentra_crypto::mask::xor_mask;

const COMPILE_TIMEOUT: Duration = Duration::from_secs(600);

/// Inputs for one firmware build.
pub struct BuildRequest {
    pub device_id: String,
    pub version: String,
    pub wifi_ssid: String,
    pub wifi_password: String,
    pub template: Option<String>,
    /// When false the artifact is distributed without the XOR mask.
    pub use_masking: bool,
}

#[derive(Clone)]
pub struct FirmwareService {
    db: Database,
    keys: KeyService,
    certs: CertificateService,
    firmware_dir: PathBuf,
    compiler: Option<String>,
    broker_host: String,
}

impl FirmwareService {
    pub fn new(
        db: Database,
        keys: KeyService,
        certs: CertificateService,
        firmware_dir: PathBuf,
        compiler: Option<String>,
        broker_host: String,
    ) -> Self {
        Self {
            db,
            keys,
            certs,
            firmware_dir,
            compiler,
            broker_host,
        }
    }

    /// Run a build end to end and return the final build row.
    pub async fn build(&self, request: &BuildRequest) -> Result<FirmwareBuild, ServiceError> {
        if request.version.trim().is_empty() {
            return Err(ServiceError::Validation("version must not be empty".to_string()));
        }
        let device = self
            .db
            .get_device(&request.device_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("device {}", request.device_id)))?;

        let kind = if request.use_masking {
            BuildKind::Masked
        } else {
            BuildKind::Plain
        };
        let build_id = Uuid::new_v4().to_string();
        self.db
            .create_build(&build_id, &request.device_id, &request.version, kind)
            .await?;
        self.db.set_build_status(&build_id, BuildStatus::Building).await?;
        info!(build_id = %build_id, device_id = %request.device_id, "Firmware build started");

        match self.run_pipeline(&build_id, &device.name, request).await {
            Ok(()) => {}
            Err(err) => {
                warn!(build_id = %build_id, "Firmware build failed: {err}");
                self.db.fail_build(&build_id, &err.to_string()).await?;
            }
        }

        self.db
            .get_build(&build_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("build {build_id}")))
    }

    pub async fn get_build(&self, build_id: &str) -> Result<FirmwareBuild, ServiceError> {
        self.db
            .get_build(build_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("build {build_id}")))
    }

    pub async fn list_builds(&self, device_id: &str) -> Result<Vec<FirmwareBuild>, ServiceError> {
        Ok(self.db.list_builds_for_device(device_id).await?)
    }

    /// Path the distributable artifact for a device is served from.
    fn artifact_path(&self, device_id: &str, kind: BuildKind) -> PathBuf {
        match kind {
            BuildKind::Masked => self.firmware_dir.join(format!("{device_id}_masked.bin")),
            BuildKind::Plain => self.firmware_dir.join(format!("{device_id}_firmware.bin")),
        }
    }

    /// Distributable firmware bytes plus a download filename, from the
    /// device's latest completed build.
    pub async fn download_artifact(
        &self,
        device_id: &str,
    ) -> Result<(Vec<u8>, String), ServiceError> {
        let build = self
            .db
            .latest_completed_build(device_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("no completed build for device {device_id}"))
            })?;
        let path = build.artifact_path.ok_or_else(|| {
            ServiceError::NotFound(format!("build {} has no artifact", build.id))
        })?;
        let bytes = tokio::fs::read(&path).await?;
        let filename = PathBuf::from(&path)
            .file_name()
            .map_or_else(|| format!("{device_id}.bin"), |n| n.to_string_lossy().into_owned());
        Ok((bytes, filename))
    }

    async fn run_pipeline(
        &self,
        build_id: &str,
        device_name: &str,
        request: &BuildRequest,
    ) -> Result<(), ServiceError> {
        let template_name = request.template.as_deref().unwrap_or(DEFAULT_TEMPLATE_NAME);
        let template = resolve_template(&self.db, template_name).await?;
        let source = render(
            &template,
            &RenderContext {
                device_id: &request.device_id,
                device_name,
                wifi_ssid: &request.wifi_ssid,
                wifi_password: &request.wifi_password,
                broker_host: &self.broker_host,
                ca_cert: &self.certs.root_certificate(),
            },
        );

        let build_dir = self.firmware_dir.join(&request.device_id);
        tokio::fs::create_dir_all(&build_dir).await?;
        let source_path = build_dir.join(format!("{build_id}.ino"));
        tokio::fs::write(&source_path, source.as_bytes()).await?;
        self.db
            .set_build_source(build_id, &source_path.display().to_string())
            .await?;

        let artifact = match &self.compiler {
            Some(compiler) => {
                let out_path = build_dir.join(format!("{build_id}.bin"));
                compile(compiler, &source_path, &out_path).await?;
                tokio::fs::read(&out_path).await?
            }
            None => source.into_bytes(),
        };

        let artifact_hash = hex::encode(Sha256::digest(&artifact));
        let (output, masked_hash, key_fingerprint) = if request.use_masking {
            let key = self.keys.key_bytes(&request.device_id).await?;
            let masked = xor_mask(&artifact, &key)?;
            let key_info = self.keys.get_key(&request.device_id).await?;
            let masked_hash = hex::encode(Sha256::digest(&masked));
            (masked, Some(masked_hash), Some(key_info.key_hash))
        } else {
            (artifact, None, None)
        };

        let kind = if request.use_masking {
            BuildKind::Masked
        } else {
            BuildKind::Plain
        };
        let artifact_path = self.artifact_path(&request.device_id, kind);
        tokio::fs::write(&artifact_path, &output).await?;

        self.db
            .complete_build(
                build_id,
                &CompletedBuild {
                    artifact_path: &artifact_path.display().to_string(),
                    artifact_hash: &artifact_hash,
                    binary_size: i64::try_from(output.len()).unwrap_or(i64::MAX),
                    masked_hash: masked_hash.as_deref(),
                    key_fingerprint: key_fingerprint.as_deref(),
                },
            )
            .await?;
        info!(build_id, kind = %kind, path = %artifact_path.display(), "Firmware build completed");
        Ok(())
    }
}

/// Invoke the external compiler: `<compiler> <source> -o <output>`.
/// The configured command may carry leading arguments.
async fn compile(
    compiler: &str,
    source: &std::path::Path,
    output: &std::path::Path,
) -> Result<(), ServiceError> {
    let mut parts = compiler.split_whitespace();
    let program = parts
        .next()
        .ok_or_else(|| ServiceError::Validation("empty compiler command".to_string()))?;

    let mut command = tokio::process::Command::new(program);
    command
        .args(parts)
        .arg(source)
        .arg("-o")
        .arg(output)
        .kill_on_drop(true);

    let result = tokio::time::timeout(COMPILE_TIMEOUT, command.output())
        .await
        .map_err(|_| ServiceError::Validation("compiler timed out".to_string()))?;
    let output = result?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ServiceError::Validation(format!(
            "compiler exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::identity::{CertificateService, KeyService};
    use sentra_crypto::{CertificateAuthority, SecretStore};
    use std::sync::Arc;

    async fn test_service() -> (FirmwareService, Database, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().await.unwrap();
        db.touch_device("dev-1").await.unwrap();

        let ca = Arc::new(
            CertificateAuthority::load_or_create(&dir.path().join("certs"), "Sentra Test").unwrap(),
        );
        let secrets = Arc::new(SecretStore::new("test-master", false));
        let firmware_dir = dir.path().join("firmware");
        let keys = KeyService::new(db.clone(), Arc::clone(&secrets), firmware_dir.clone());
        let certs = CertificateService::new(db.clone(), ca, secrets);
        let service = FirmwareService::new(
            db.clone(),
            keys,
            certs,
            firmware_dir,
            None,
            "broker.test".to_string(),
        );
        (service, db, dir)
    }

    fn request() -> BuildRequest {
        BuildRequest {
            device_id: "dev-1".to_string(),
            version: "1.0.0".to_string(),
            wifi_ssid: "lab".to_string(),
            wifi_password: "hunter2".to_string(),
            template: None,
            use_masking: true,
        }
    }

    #[tokio::test]
    async fn build_without_compiler_masks_rendered_source() {
        let (service, _db, _dir) = test_service().await;
        let build = service.build(&request()).await.unwrap();
        assert_eq!(build.status, "completed");
        assert_eq!(build.build_kind, "masked");
        assert!(build.artifact_hash.is_some());
        assert!(build.binary_size.unwrap() > 0);
        assert_ne!(build.artifact_hash, build.masked_hash);

        // Unmasking the artifact with the device key restores the source.
        let (masked, filename) = service.download_artifact("dev-1").await.unwrap();
        assert_eq!(filename, "dev-1_masked.bin");
        let key = service.keys.key_bytes("dev-1").await.unwrap();
        let unmasked = xor_mask(&masked, &key).unwrap();
        let source = String::from_utf8(unmasked).unwrap();
        assert!(source.contains("\"dev-1\""));
        assert!(source.contains("broker.test"));
    }

    #[tokio::test]
    async fn plain_build_skips_masking() {
        let (service, _db, _dir) = test_service().await;
        let mut req = request();
        req.use_masking = false;
        let build = service.build(&req).await.unwrap();
        assert_eq!(build.status, "completed");
        assert_eq!(build.build_kind, "plain");
        assert!(build.masked_hash.is_none());
        assert!(build.key_fingerprint.is_none());

        let (bytes, filename) = service.download_artifact("dev-1").await.unwrap();
        assert_eq!(filename, "dev-1_firmware.bin");
        let source = String::from_utf8(bytes).unwrap();
        assert!(source.contains("\"dev-1\""));
    }

    #[tokio::test]
    async fn build_for_unknown_device_fails() {
        let (service, _db, _dir) = test_service().await;
        let mut req = request();
        req.device_id = "ghost".to_string();
        assert!(matches!(
            service.build(&req).await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn unknown_template_fails_the_build_row() {
        let (service, _db, _dir) = test_service().await;
        let mut req = request();
        req.template = Some("missing".to_string());
        let build = service.build(&req).await.unwrap();
        assert_eq!(build.status, "failed");
        assert!(build.error.unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn failing_compiler_records_failure() {
        let (mut service, _db, _dir) = test_service().await;
        service.compiler = Some("/nonexistent/compiler".to_string());
        let build = service.build(&request()).await.unwrap();
        assert_eq!(build.status, "failed");
    }

    #[tokio::test]
    async fn download_without_build_is_not_found() {
        let (service, _db, _dir) = test_service().await;
        assert!(matches!(
            service.download_artifact("dev-1").await.unwrap_err(),
            ServiceError::NotFound(_)
        ));
    }
}
