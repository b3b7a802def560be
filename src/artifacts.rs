//! Deployment artifacts on disk
//!
//! Everything a later `ssh`, `kubectl` or destroy run needs is written under
//! one output directory. Key material and documents are owner-only (0600),
//! the helper script is owner-executable (0700), and so is the directory.

use std::fs::{DirBuilder, OpenOptions, Permissions};
use std::io::Write;
use std::os::unix::fs::{DirBuilderExt, OpenOptionsExt, PermissionsExt};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::pki::{CertificateChain, KeyCertPair};
use crate::template::Document;
use crate::{Error, Result};

/// Mode of keys, certificates and documents
pub const PRIVATE_FILE_MODE: u32 = 0o600;
/// Mode of the output directory and scripts
pub const EXECUTABLE_MODE: u32 = 0o700;

/// Deployment template file name
pub const DEPLOY_DOCUMENT: &str = "cluster-deploy.json";
/// Parameters file name
pub const PARAMETERS_DOCUMENT: &str = "cluster-parameters.json";
/// Helper script file name
pub const UTIL_SCRIPT: &str = "util.sh";

/// Writes artifacts into one output directory
#[derive(Clone, Debug)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    /// Create `dir` (and parents) and set it to mode 0700, even when it
    /// already exists
    pub fn create(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        DirBuilder::new()
            .recursive(true)
            .mode(EXECUTABLE_MODE)
            .create(&dir)
            .map_err(|e| Error::io(dir.display().to_string(), e))?;
        std::fs::set_permissions(&dir, Permissions::from_mode(EXECUTABLE_MODE))
            .map_err(|e| Error::io(dir.display().to_string(), e))?;
        info!(output_directory = %dir.display(), "output directory ready");
        Ok(Self { dir })
    }

    /// Output directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `ca`, `apiserver` and `client` as `<name>.key` / `<name>.crt`
    pub fn write_certificate_chain(&self, chain: &CertificateChain) -> Result<()> {
        for (name, pair) in [
            ("ca", &chain.ca),
            ("apiserver", &chain.server),
            ("client", &chain.client),
        ] {
            self.write_key_cert_pair(name, pair)?;
        }
        Ok(())
    }

    /// `<name>.key` and `<name>.crt`
    pub fn write_key_cert_pair(&self, name: &str, pair: &KeyCertPair) -> Result<()> {
        self.write_file(
            &format!("{}.key", name),
            pair.private_key_pem.as_bytes(),
            PRIVATE_FILE_MODE,
        )?;
        self.write_file(
            &format!("{}.crt", name),
            pair.certificate_pem.as_bytes(),
            PRIVATE_FILE_MODE,
        )?;
        Ok(())
    }

    /// SSH private key as `<username>_rsa`
    pub fn write_ssh_key(&self, username: &str, private_key_pem: &str) -> Result<PathBuf> {
        self.write_file(
            &format!("{}_rsa", username),
            private_key_pem.as_bytes(),
            PRIVATE_FILE_MODE,
        )
    }

    /// JSON document, two-space indented
    pub fn write_document(&self, name: &str, document: &Document) -> Result<PathBuf> {
        let mut json = serde_json::to_vec_pretty(document).map_err(|e| {
            Error::io(
                self.dir.join(name).display().to_string(),
                std::io::Error::new(std::io::ErrorKind::InvalidData, e),
            )
        })?;
        json.push(b'\n');
        self.write_file(name, &json, PRIVATE_FILE_MODE)
    }

    /// Executable script
    pub fn write_script(&self, name: &str, contents: &str) -> Result<PathBuf> {
        self.write_file(name, contents.as_bytes(), EXECUTABLE_MODE)
    }

    fn write_file(&self, name: &str, contents: &[u8], mode: u32) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(mode)
            .open(&path)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        // `mode` above only applies to newly created files
        file.set_permissions(Permissions::from_mode(mode))
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        file.write_all(contents)
            .map_err(|e| Error::io(path.display().to_string(), e))?;
        debug!(path = %path.display(), mode = format!("{:o}", mode), "wrote artifact");
        Ok(path)
    }
}
