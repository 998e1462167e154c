// Upload/open orchestration.
//
// A file is identified by its content fingerprint. Known fingerprints open
// straight from the cache without touching the network; unknown ones are
// uploaded once and recorded.

use std::path::Path;

use tracing::{debug, info};

use crate::api::DocumentStore;
use crate::browser::{open_or_print, Browser};
use crate::cache::{fingerprint, CacheEntry, FileCache};
use crate::callback::Authorizer;
use crate::credential::{Credential, CredentialStore};
use crate::doctype::{self, DocumentType};
use crate::error::{OpenError, OpenResult};

/// What a successful run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Opened a previously uploaded document.
    Cached { url: String },
    /// Uploaded the file and recorded its id.
    Uploaded { url: String, document_id: String },
}

impl Outcome {
    pub fn url(&self) -> &str {
        match self {
            Outcome::Cached { url } | Outcome::Uploaded { url, .. } => url,
        }
    }
}

pub struct Launcher {
    editor_url: String,
    cache: FileCache,
    credentials: CredentialStore,
    authorizer: Box<dyn Authorizer>,
    store: Box<dyn DocumentStore>,
    browser: Box<dyn Browser>,
}

impl Launcher {
    pub fn new(
        editor_url: impl Into<String>,
        cache: FileCache,
        credentials: CredentialStore,
        authorizer: Box<dyn Authorizer>,
        store: Box<dyn DocumentStore>,
        browser: Box<dyn Browser>,
    ) -> Self {
        Self {
            editor_url: editor_url.into(),
            cache,
            credentials,
            authorizer,
            store,
            browser,
        }
    }

    /// Open `path` in the web editor, uploading it first if its content has
    /// not been seen before.
    pub fn run(&self, path: &Path) -> OpenResult<Outcome> {
        let doc_type = DocumentType::from_path(path)
            .ok_or_else(|| OpenError::UnrecognizedType(path.display().to_string()))?;

        let fp = fingerprint(path)?;
        if let Some(document_id) = self.cache.find(&fp) {
            let url = doc_type.editor_url(&self.editor_url, &document_id);
            info!(url = %url, "Opening cached document");
            open_or_print(self.browser.as_ref(), &url);
            return Ok(Outcome::Cached { url });
        }
        debug!(fingerprint = %fp, "Not in cache, uploading");

        let credential = self.credential()?;
        let title = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let document_id =
            self.store
                .upload(&credential, path, &title, doctype::content_type(path))?;

        // Validate before opening so a bad id never reaches the browser or cache.
        let entry = CacheEntry::new(fp, document_id)?;
        let url = doc_type.editor_url(&self.editor_url, &entry.document_id);
        open_or_print(self.browser.as_ref(), &url);
        self.cache.append(&entry)?;

        Ok(Outcome::Uploaded {
            url,
            document_id: entry.document_id,
        })
    }

    /// Stored credential, or a freshly authorized and saved one.
    fn credential(&self) -> OpenResult<Credential> {
        if let Some(credential) = self.credentials.load() {
            return Ok(credential);
        }
        info!("No valid credential, starting browser authorization");
        let credential = self.authorizer.authorize()?;
        self.credentials.save(&credential)?;
        Ok(credential)
    }
}
