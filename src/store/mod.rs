//! Process-wide repository of pinned certificates.
//!
//! Certificates are indexed by both their short and long id. Both keys point
//! at the same [`Arc`], and issuer links between stored certificates point
//! at stored instances. Pinned material is persisted as raw DER under the
//! store directory:
//!
//! ```text
//! certificates/<id>
//! crls/<id>/<crl number>
//! ocsp/<id>/<serial>
//! ```

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::thread::{self, JoinHandle};

use crate::certificate::{
    Certificate, CertificateChain, NameType, OcspResponse, RevocationList, MAX_CHAIN_DEPTH,
};
use crate::Error;

mod fs;

use self::fs::{FileLocks, Layout};

/// Notification sent to [`CertificateStore::subscribe`] receivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    /// An id was inserted or overwritten.
    Pinned(String),
    /// A background path scan finished.
    PathPinned { path: PathBuf, ids: Vec<String> },
}

/// Known certificates, their chains and revocation material.
///
/// Shared by reference between sessions and the trust store. All mutable
/// state sits behind one mutex.
pub struct CertificateStore {
    layout: Layout,
    inner: Mutex<Inner>,
    file_locks: FileLocks,
    subscribers: Mutex<Vec<mpsc::Sender<StoreEvent>>>,
}

#[derive(Default)]
struct Inner {
    certs: HashMap<String, Arc<Certificate>>,
    paths: HashMap<PathBuf, Vec<Weak<Certificate>>>,
    trusted: Vec<Arc<Certificate>>,
}

impl Inner {
    fn get(&self, id: &str) -> Option<Arc<Certificate>> {
        self.certs.get(id).cloned()
    }

    /// Distinct certificates, each once.
    fn unique(&self) -> impl Iterator<Item = &Arc<Certificate>> {
        self.certs
            .iter()
            .filter(|(key, cert)| key.as_str() == cert.id())
            .map(|(_, cert)| cert)
    }

    /// Insert `cert` and every linked ancestor under both ids.
    ///
    /// Returns the inserted ids, and whether any of them was not known
    /// before.
    fn insert_chain(&mut self, cert: &Arc<Certificate>) -> (Vec<String>, bool) {
        let mut ids = Vec::new();
        let mut new = false;
        let mut current = Some(cert.clone());
        let mut depth = 0;
        while let Some(c) = current {
            for key in [c.long_id(), c.id()] {
                match self.certs.insert(key.to_string(), c.clone()) {
                    None => new = true,
                    Some(old) if !Arc::ptr_eq(&old, &c) => carry_revocations(&old, &c),
                    Some(_) => {}
                }
                ids.push(key.to_string());
            }
            depth += 1;
            current = c
                .issuer()
                .filter(|i| !i.same_key(&c) && depth < MAX_CHAIN_DEPTH);
        }
        (ids, new)
    }

    fn remove(&mut self, cert: &Certificate) -> bool {
        let long = self.certs.remove(cert.long_id()).is_some();
        let short = self.certs.remove(cert.id()).is_some();
        long || short
    }

    /// Issuer of `cert` among the stored certificates.
    ///
    /// Tries the linked issuer, then certificates named by the declared
    /// issuer uid, then by issuer name. A candidate must have signed `cert`.
    fn find_issuer(&self, cert: &Certificate) -> Option<Arc<Certificate>> {
        let signed = |candidate: &Arc<Certificate>| {
            !candidate.same_key(cert) && cert.verify_signed_by(candidate).is_ok()
        };

        if let Some(issuer) = cert.issuer() {
            if signed(&issuer) {
                return Some(issuer);
            }
        }

        if let Some(uid) = cert.issuer_uid() {
            if let Some(found) = self.get(uid).filter(|c| signed(c)) {
                return Some(found);
            }
            if let Some(found) = self.unique().find(|c| c.uid() == uid && signed(c)) {
                return Some(found.clone());
            }
        }

        self.unique()
            .find(|c| c.name() == cert.issuer_name() && signed(c))
            .cloned()
    }

    /// Link `cert` to its issuers as far as the store allows.
    ///
    /// Runs under the store lock and never takes it again.
    fn stitch(&self, cert: &Arc<Certificate>) {
        let mut current = cert.clone();
        for _ in 0..MAX_CHAIN_DEPTH {
            if let Some(issuer) = current.issuer() {
                if issuer.same_key(&current) {
                    return;
                }
                current = issuer;
                continue;
            }
            if current.is_self_issued() {
                return;
            }
            match self.find_issuer(&current) {
                Some(issuer) => {
                    current.set_issuer(&issuer);
                    current = issuer;
                }
                None => {
                    debug!(
                        "Incomplete chain for {}: no issuer {} for {}",
                        cert.id(),
                        current.issuer_name(),
                        current.id()
                    );
                    return;
                }
            }
        }
    }
}

/// Keep what is known about the revocation status of a replaced instance.
fn carry_revocations(old: &Certificate, new: &Certificate) {
    for crl in old.revocation_lists() {
        if !new.revocation_lists().iter().any(|c| c.number() == crl.number()) {
            new.add_revocation_list(crl);
        }
    }
    if new.ocsp_response().is_none() {
        if let Some(response) = old.ocsp_response() {
            new.set_ocsp_response(response);
        }
    }
}

impl CertificateStore {
    /// Open the store rooted at `dir`, creating the layout if needed, and
    /// load every pinned certificate.
    pub fn open(dir: impl AsRef<Path>) -> Result<Arc<CertificateStore>, Error> {
        let layout = Layout::create(dir.as_ref())?;
        let store = CertificateStore {
            layout,
            inner: Mutex::new(Inner::default()),
            file_locks: FileLocks::default(),
            subscribers: Mutex::new(Vec::new()),
        };
        store.load();
        Ok(Arc::new(store))
    }

    pub fn directory(&self) -> &Path {
        self.layout.base()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn load(&self) {
        let mut loaded = Vec::new();
        for path in fs::read_dir_files(&self.layout.certificates()) {
            let Some(name) = fs::file_name(&path).map(str::to_string) else {
                continue;
            };
            let certs: Vec<Arc<Certificate>> = fs::read_certificates(&path)
                .into_iter()
                .map(Arc::new)
                .collect();

            let Some(leaf) = certs.first().cloned() else {
                warn!("Removing unreadable certificate file {}", path.display());
                remove_file(&path);
                continue;
            };
            if name != leaf.id() && name != leaf.long_id() {
                warn!(
                    "Removing certificate file {} stored under the wrong id {}",
                    path.display(),
                    leaf.long_id()
                );
                remove_file(&path);
                continue;
            }

            // A PEM bundle is stored leaf first.
            let chain = match CertificateChain::from_certificates(certs) {
                Ok(chain) => chain,
                Err(_) => continue,
            };
            loaded.push(chain);
        }

        let mut inner = self.lock();
        for chain in &loaded {
            inner.insert_chain(chain.leaf());
        }
        let all: Vec<Arc<Certificate>> = inner.unique().cloned().collect();
        for cert in &all {
            inner.stitch(cert);
        }
        drop(inner);

        for cert in &all {
            self.load_revocations(cert);
        }
        debug!(
            "Loaded {} certificates from {}",
            all.len(),
            self.layout.base().display()
        );
    }

    fn load_revocations(&self, cert: &Certificate) {
        for path in fs::read_dir_files(&self.layout.crl_dir(cert.id())) {
            match std::fs::read(&path)
                .map_err(Error::from)
                .and_then(|der| RevocationList::from_der(&der))
            {
                Ok(crl) => cert.add_revocation_list(Arc::new(crl)),
                Err(e) => warn!("Skip revocation list {}: {}", path.display(), e),
            }
        }

        let path = self.layout.ocsp_dir(cert.id()).join(cert.serial_hex());
        if !path.is_file() {
            return;
        }
        match std::fs::read(&path)
            .map_err(Error::from)
            .and_then(|der| OcspResponse::from_der(&der))
        {
            Ok(response) => {
                let status = response.status(cert.serial());
                if cert.set_ocsp_response(Arc::new(response)) {
                    debug!("OCSP status of {}: {:?}", cert.id(), status);
                }
            }
            Err(e) => warn!("Skip OCSP response {}: {}", path.display(), e),
        }
    }

    /// Short ids of every stored certificate.
    pub fn get_pinned_certificates(&self) -> Vec<String> {
        let inner = self.lock();
        let mut ids: Vec<String> = inner.unique().map(|c| c.id().to_string()).collect();
        ids.sort();
        ids
    }

    /// Certificate by short or long id, with its issuer chain linked as far
    /// as the store can.
    ///
    /// A chain that ends early is still returned.
    pub fn get_certificate(&self, id: &str) -> Option<Arc<Certificate>> {
        let inner = self.lock();
        let cert = inner.get(id)?;
        inner.stitch(&cert);
        Some(cert)
    }

    /// Link `cert`, stored or not, to its issuers known to the store.
    pub fn resolve_chain(&self, cert: &Arc<Certificate>) {
        self.lock().stitch(cert);
    }

    /// First certificate whose common name is `name`, or, unless `kind` is
    /// [`NameType::Unknown`], that carries `name` as an alternative name of
    /// that kind.
    pub fn find_certificate_by_name(&self, name: &str, kind: NameType) -> Option<Arc<Certificate>> {
        let inner = self.lock();
        let found = inner
            .unique()
            .find(|c| {
                c.name() == name
                    || (kind != NameType::Unknown
                        && c.alt_names().iter().any(|(t, n)| *t == kind && n == name))
            })
            .cloned()?;
        inner.stitch(&found);
        Some(found)
    }

    pub fn find_certificate_by_uid(&self, uid: &str) -> Option<Arc<Certificate>> {
        let inner = self.lock();
        let found = inner.unique().find(|c| c.uid() == uid).cloned()?;
        inner.stitch(&found);
        Some(found)
    }

    /// Issuer of `cert` among the stored certificates.
    pub fn find_issuer(&self, cert: &Certificate) -> Option<Arc<Certificate>> {
        self.lock().find_issuer(cert)
    }

    /// Insert `cert` and its linked ancestors under both of their ids.
    ///
    /// An id that is already known is overwritten. With `local` the leaf is
    /// written to disk, along with the revocation lists attached to the
    /// chain, provided something new was inserted. Returns the inserted ids.
    pub fn pin_certificate(&self, cert: Arc<Certificate>, local: bool) -> Vec<String> {
        let (ids, new) = {
            let mut inner = self.lock();
            let inserted = inner.insert_chain(&cert);
            inner.stitch(&cert);
            inserted
        };

        if local && new {
            let path = self.layout.certificate(cert.long_id());
            if let Err(e) = fs::save_file(&path, cert.as_der()) {
                warn!("Failed to save certificate {}: {}", cert.id(), e);
            }
            for c in CertificateChain::from_leaf(&cert).iter() {
                for crl in c.revocation_lists() {
                    self.save_revocation_list(c.id(), &crl);
                }
            }
        }

        for id in &ids {
            self.emit(StoreEvent::Pinned(id.clone()));
        }
        ids
    }

    pub fn pin_certificate_der(&self, der: &[u8], local: bool) -> Result<Vec<String>, Error> {
        let cert = Certificate::from_der(der)?;
        Ok(self.pin_certificate(Arc::new(cert), local))
    }

    /// Pin every member of `chain`.
    pub fn pin_certificate_chain(&self, chain: &CertificateChain, local: bool) -> Vec<String> {
        self.pin_certificate(chain.leaf().clone(), local)
    }

    /// Pin every certificate found under `path` on a background thread.
    ///
    /// `done` receives the short ids of the certificates found. The scan is
    /// remembered so [`CertificateStore::unpin_certificate_path`] can undo it.
    pub fn pin_certificate_path<F>(self: &Arc<Self>, path: impl Into<PathBuf>, done: F) -> JoinHandle<()>
    where
        F: FnOnce(Vec<String>) + Send + 'static,
    {
        let store = Arc::clone(self);
        let path = path.into();
        thread::spawn(move || {
            let certs: Vec<Arc<Certificate>> = fs::read_certificates(&path)
                .into_iter()
                .map(Arc::new)
                .collect();

            let ids: Vec<String> = {
                let mut inner = store.lock();
                for cert in &certs {
                    inner.insert_chain(cert);
                }
                for cert in &certs {
                    inner.stitch(cert);
                }
                inner
                    .paths
                    .entry(path.clone())
                    .or_default()
                    .extend(certs.iter().map(Arc::downgrade));
                certs.iter().map(|c| c.id().to_string()).collect()
            };

            debug!("Pinned {} certificates from {}", ids.len(), path.display());
            done(ids.clone());
            store.emit(StoreEvent::PathPinned { path, ids });
        })
    }

    /// Forget a certificate and delete its file.
    pub fn unpin_certificate(&self, id: &str) -> bool {
        let cert = {
            let mut inner = self.lock();
            let Some(cert) = inner.get(id) else {
                return false;
            };
            inner.remove(&cert);
            inner.trusted.retain(|t| !t.same_key(&cert));
            cert
        };

        for name in [cert.long_id(), cert.id()] {
            let path = self.layout.certificate(name);
            if path.exists() {
                remove_file(&path);
            }
        }
        true
    }

    /// Forget what a previous path scan added. Returns how many certificates
    /// were removed.
    pub fn unpin_certificate_path(&self, path: impl AsRef<Path>) -> usize {
        let mut inner = self.lock();
        let Some(pinned) = inner.paths.remove(path.as_ref()) else {
            return 0;
        };
        let mut removed = 0;
        for cert in pinned.iter().filter_map(Weak::upgrade) {
            let stored = inner
                .get(cert.id())
                .map(|s| Arc::ptr_eq(&s, &cert))
                .unwrap_or(false);
            if stored && inner.remove(&cert) {
                removed += 1;
            }
        }
        removed
    }

    /// Attach `crl` to the certificate `id` and persist it.
    ///
    /// When the certificate is known the list must be issued and signed by it.
    pub fn pin_revocation_list(&self, id: &str, crl: Arc<RevocationList>) -> Result<(), Error> {
        let dir_id = match self.get_certificate(id) {
            Some(cert) => {
                if !crl.is_issued_by(&cert) {
                    return Err(Error::Certificate(format!(
                        "revocation list issuer {} is not {}",
                        crl.issuer_dn(),
                        cert.subject()
                    )));
                }
                crl.verify_signed_by(&cert)?;
                cert.add_revocation_list(crl.clone());
                cert.id().to_string()
            }
            None => id.to_string(),
        };

        let path = self.layout.crl_dir(&dir_id).join(crl.file_name());
        fs::save_file(&path, crl.as_der())?;
        Ok(())
    }

    fn save_revocation_list(&self, id: &str, crl: &RevocationList) {
        let path = self.layout.crl_dir(id).join(crl.file_name());
        if let Err(e) = fs::save_file(&path, crl.as_der()) {
            warn!("Failed to save revocation list {}: {}", path.display(), e);
        }
    }

    /// Share `cert`'s cached OCSP response with the stored instance and write
    /// it to disk in the background.
    ///
    /// Returns the writer thread, or `None` when `cert` has no response.
    pub fn pin_ocsp_response(&self, cert: &Arc<Certificate>) -> Option<JoinHandle<()>> {
        let response = cert.ocsp_response()?;

        if let Some(stored) = self.lock().get(cert.id()) {
            if !Arc::ptr_eq(&stored, cert) && stored.serial() == cert.serial() {
                stored.set_ocsp_response(response.clone());
            }
        }

        let path = self.layout.ocsp_dir(cert.id()).join(cert.serial_hex());
        let lock = self.file_locks.lock_for(&path);
        debug!(
            "OCSP status of {}: {:?}",
            cert.id(),
            response.status(cert.serial())
        );
        Some(thread::spawn(move || {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = fs::save_file(&path, response.as_der()) {
                warn!("Failed to save OCSP response {}: {}", path.display(), e);
            }
        }))
    }

    /// Mark a stored certificate as a trusted issuer for session credentials.
    ///
    /// Returns false if the id is unknown or nothing changed.
    pub fn set_trusted_certificate(&self, id: &str, trusted: bool) -> bool {
        let mut inner = self.lock();
        let Some(cert) = inner.get(id) else {
            return false;
        };
        let present = inner.trusted.iter().any(|t| t.same_key(&cert));
        match (trusted, present) {
            (true, false) => inner.trusted.push(cert),
            (false, true) => inner.trusted.retain(|t| !t.same_key(&cert)),
            _ => return false,
        }
        true
    }

    pub fn trusted_certificates(&self) -> Vec<Arc<Certificate>> {
        self.lock().trusted.clone()
    }

    /// Receive [`StoreEvent`]s from now on.
    pub fn subscribe(&self) -> mpsc::Receiver<StoreEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(tx);
        rx
    }

    fn emit(&self, event: StoreEvent) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl fmt::Debug for CertificateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("CertificateStore")
            .field("dir", &self.layout.base())
            .field("certificates", &inner.unique().count())
            .field("paths", &inner.paths.len())
            .finish()
    }
}

fn remove_file(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        warn!("Failed to remove {}: {}", path.display(), e);
    }
}
