//! On-disk layout of the certificate store.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::certificate::Certificate;

const CERTIFICATES_DIR: &str = "certificates";
const CRLS_DIR: &str = "crls";
const OCSP_DIR: &str = "ocsp";

/// Directory tree: `certificates/<id>`, `crls/<id>/<number>`,
/// `ocsp/<id>/<serial>`.
#[derive(Debug, Clone)]
pub(crate) struct Layout {
    base: PathBuf,
}

impl Layout {
    pub fn create(base: &Path) -> io::Result<Layout> {
        let layout = Layout {
            base: base.to_path_buf(),
        };
        fs::create_dir_all(layout.certificates())?;
        fs::create_dir_all(layout.base.join(CRLS_DIR))?;
        fs::create_dir_all(layout.base.join(OCSP_DIR))?;
        Ok(layout)
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn certificates(&self) -> PathBuf {
        self.base.join(CERTIFICATES_DIR)
    }

    pub fn certificate(&self, id: &str) -> PathBuf {
        self.certificates().join(id)
    }

    pub fn crl_dir(&self, id: &str) -> PathBuf {
        self.base.join(CRLS_DIR).join(id)
    }

    pub fn ocsp_dir(&self, id: &str) -> PathBuf {
        self.base.join(OCSP_DIR).join(id)
    }
}

/// Plain files of a directory, sorted. A missing directory is empty.
pub(crate) fn read_dir_files(dir: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(dir) else {
        return Vec::new();
    };
    let mut files: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

pub(crate) fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Write `data` to `path`, creating the parent directory.
pub(crate) fn save_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

/// Every certificate found under `path`, recursing into directories.
///
/// Files may be PEM bundles or single DER certificates. Unreadable files are
/// skipped.
pub(crate) fn read_certificates(path: &Path) -> Vec<Certificate> {
    if path.is_dir() {
        let Ok(entries) = fs::read_dir(path) else {
            return Vec::new();
        };
        let mut children: Vec<PathBuf> = entries.filter_map(|e| e.ok()).map(|e| e.path()).collect();
        children.sort();
        return children.iter().flat_map(|c| read_certificates(c)).collect();
    }

    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            debug!("Skip {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    if let Some(start) = pem_start(&data) {
        match Certificate::load_pem_chain(&data[start..]) {
            Ok(certs) => certs,
            Err(e) => {
                debug!("Skip PEM {}: {}", path.display(), e);
                Vec::new()
            }
        }
    } else {
        match Certificate::from_der(&data) {
            Ok(cert) => vec![cert],
            Err(e) => {
                debug!("Skip {}: {}", path.display(), e);
                Vec::new()
            }
        }
    }
}

/// Offset of the first PEM boundary. Text before it is ignored.
fn pem_start(data: &[u8]) -> Option<usize> {
    const BEGIN: &[u8] = b"-----BEGIN";
    data.windows(BEGIN.len()).position(|w| w == BEGIN)
}

/// One mutex per file path, shared by background writers.
#[derive(Debug, Default, Clone)]
pub(crate) struct FileLocks(Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>);

impl FileLocks {
    pub fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self.0.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(path.to_path_buf()).or_default().clone()
    }
}
