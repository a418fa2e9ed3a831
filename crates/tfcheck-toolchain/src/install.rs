//! Installs released toolchain builds from the registry.
//!
//! Downloads the archive matching the host platform, checks it against the
//! published SHA-256 listing, and unpacks it with the system `unzip`.

use crate::error::ToolchainError;
use crate::registry::{find_checksum, Platform, ReleasesClient};
use crate::{Installer, Result};
use async_trait::async_trait;
use semver::Version;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

/// Registry-backed [`Installer`].
#[derive(Debug, Clone)]
pub struct ReleaseInstaller {
    client: ReleasesClient,
    platform: Platform,
}

impl ReleaseInstaller {
    /// Installer for the host platform.
    pub fn new(client: ReleasesClient) -> Self {
        Self::for_platform(client, Platform::host())
    }

    /// Installer for an explicit platform.
    pub fn for_platform(client: ReleasesClient, platform: Platform) -> Self {
        ReleaseInstaller { client, platform }
    }
}

/// Executable file name of `product` on the host.
pub fn executable_name(product: &str) -> String {
    if cfg!(windows) {
        format!("{product}.exe")
    } else {
        product.to_string()
    }
}

/// Verify `data` against a hex SHA-256 digest.
pub fn verify_sha256(file: &str, data: &[u8], expected: &str) -> Result<()> {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let actual = hex::encode(hasher.finalize());

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(ToolchainError::ChecksumMismatch {
            file: file.to_string(),
            expected: expected.to_string(),
            actual,
        })
    }
}

/// Program used to unpack release archives.
const UNZIP: &str = "unzip";

/// Unpack a zip archive of `product` into `dir` with the `program` unzipper.
async fn unzip(program: &str, product: &str, archive: &Path, dir: &Path) -> Result<()> {
    let output = Command::new(program)
        .arg("-o")
        .arg("-q")
        .arg(archive)
        .arg("-d")
        .arg(dir)
        .output()
        .await
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::NotFound => ToolchainError::ToolMissing {
                tool: program.to_string(),
                product: product.to_string(),
            },
            _ => ToolchainError::Spawn {
                command: program.to_string(),
                source,
            },
        })?;

    if output.status.success() {
        Ok(())
    } else {
        Err(ToolchainError::CommandFailed {
            command: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

#[cfg(unix)]
async fn mark_executable(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn mark_executable(_path: &Path) -> Result<()> {
    Ok(())
}

#[async_trait]
impl Installer for ReleaseInstaller {
    async fn install(&self, product: &str, version: &Version, dir: &Path) -> Result<PathBuf> {
        info!(%product, %version, platform = %self.platform, "Installing toolchain");

        let release = self.client.release(product, version).await?;
        let build = release.build_for(&self.platform).ok_or_else(|| {
            ToolchainError::UnsupportedPlatform {
                product: product.to_string(),
                version: version.to_string(),
                os: self.platform.os.clone(),
                arch: self.platform.arch.clone(),
            }
        })?;

        let listing = self.client.shasums(&release).await?;
        let expected = find_checksum(&listing, &build.filename)
            .ok_or_else(|| ToolchainError::ChecksumMissing(build.filename.clone()))?;

        let archive_bytes = self.client.download(build).await?;
        verify_sha256(&build.filename, &archive_bytes, &expected)?;
        debug!(file = %build.filename, "Checksum verified");

        tokio::fs::create_dir_all(dir).await?;
        let archive = dir.join(&build.filename);
        tokio::fs::write(&archive, &archive_bytes).await?;
        unzip(UNZIP, product, &archive, dir).await?;
        tokio::fs::remove_file(&archive).await?;

        let exec = dir.join(executable_name(product));
        if !tokio::fs::try_exists(&exec).await? {
            return Err(ToolchainError::ExecutableMissing(exec.display().to_string()));
        }
        mark_executable(&exec).await?;

        info!(%product, %version, path = %exec.display(), "Toolchain installed");
        Ok(exec)
    }
}
