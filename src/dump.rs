//! Read-only page store built once from a Wikipedia dump.
//!
//! Pages are cleaned at build time and stored in a `simd_r_drive` datastore:
//! a metadata record, an index of titles keyed by insertion ordinal, and one
//! record per page keyed by title. Readers never mutate the store; parallel
//! build phases open their own handle via [`DumpDb::reopen`].

use std::fs;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use simd_r_drive::storage_engine::DataStore;
use simd_r_drive::storage_engine::traits::{DataStoreReader, DataStoreWriter};
use tracing::{info, warn};

use crate::constants::dump::{
    BITCODE_PREFIX, META_KEY, PAGE_KEY_PREFIX, STORE_VERSION, TITLE_KEY_PREFIX,
};
use crate::errors::CorpusError;
use crate::types::{EntityId, PageTitle};
use crate::utils::clean_text;

/// One anchor-text link inside a page body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct Anchor {
    /// Surface text of the link.
    pub text: String,
    /// Link target title (the entity the anchor refers to).
    pub target: EntityId,
}

/// Cleaned page payload stored per title.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, bitcode::Encode, bitcode::Decode)]
pub struct DumpPage {
    /// Page title (also the store key).
    pub title: PageTitle,
    /// Cleaned body text; paragraphs separated by blank lines.
    pub text: String,
    /// Anchor-text links found in the body.
    pub links: Vec<Anchor>,
}

#[derive(Clone, Copy, Debug, bitcode::Encode, bitcode::Decode)]
struct DumpMeta {
    version: u8,
    page_count: u64,
}

/// Read-only handle over a built dump store.
pub struct DumpDb {
    store: DataStore,
    path: PathBuf,
    meta: DumpMeta,
}

impl DumpDb {
    /// Open an existing dump store and verify its metadata.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CorpusError> {
        let path = path.into();
        let store = open_store(&path)?;
        let meta_bytes = read_bytes(&store, &path, META_KEY)?.ok_or_else(|| {
            CorpusError::DumpStore {
                path: path.clone(),
                reason: "missing store metadata (not a built dump store?)".to_string(),
            }
        })?;
        let meta: DumpMeta = decode_payload(&path, &meta_bytes)?;
        if meta.version != STORE_VERSION {
            return Err(CorpusError::DumpStore {
                path,
                reason: format!(
                    "store version mismatch (expected {STORE_VERSION}, found {})",
                    meta.version
                ),
            });
        }
        Ok(Self { store, path, meta })
    }

    /// Open an independent handle on the same store file.
    ///
    /// Worker threads use this instead of sharing one handle, matching the
    /// immutable-copy-per-worker concurrency model.
    pub fn reopen(&self) -> Result<Self, CorpusError> {
        Self::open(self.path.clone())
    }

    /// Path of the underlying store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of pages recorded at build time.
    pub fn page_count(&self) -> u64 {
        self.meta.page_count
    }

    /// Enumerate page titles in insertion order.
    pub fn titles(&self) -> Result<Vec<PageTitle>, CorpusError> {
        let mut titles = Vec::with_capacity(self.meta.page_count as usize);
        for ordinal in 0..self.meta.page_count {
            let key = title_key(ordinal);
            let bytes =
                read_bytes(&self.store, &self.path, &key)?.ok_or_else(|| CorpusError::DumpStore {
                    path: self.path.clone(),
                    reason: format!("missing title index entry {ordinal}"),
                })?;
            titles.push(String::from_utf8_lossy(&bytes).into_owned());
        }
        Ok(titles)
    }

    /// Fetch the cleaned page stored under `title`.
    pub fn page(&self, title: &str) -> Result<DumpPage, CorpusError> {
        let key = page_key(title);
        let bytes = read_bytes(&self.store, &self.path, &key)?.ok_or_else(|| {
            CorpusError::DumpPage {
                title: title.to_string(),
                reason: "page not present in dump store".to_string(),
            }
        })?;
        decode_payload(&self.path, &bytes).map_err(|err| CorpusError::DumpPage {
            title: title.to_string(),
            reason: err.to_string(),
        })
    }
}

/// Write-side handle used while building a dump store.
pub struct DumpDbWriter {
    store: DataStore,
    path: PathBuf,
    count: u64,
    strip_accents: bool,
}

impl DumpDbWriter {
    /// Create a fresh store at `path`, replacing any previous file.
    pub fn create(path: impl Into<PathBuf>, strip_accents: bool) -> Result<Self, CorpusError> {
        let path = path.into();
        if path.exists() {
            fs::remove_file(&path)?;
        }
        let store = open_store(&path)?;
        Ok(Self {
            store,
            path,
            count: 0,
            strip_accents,
        })
    }

    /// Clean and append one page. Empty titles and empty cleaned bodies are
    /// rejected so they can be skipped at the call site.
    pub fn append(
        &mut self,
        title: &str,
        text: &str,
        links: Vec<Anchor>,
    ) -> Result<(), CorpusError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(CorpusError::DumpPage {
                title: String::new(),
                reason: "empty page title".to_string(),
            });
        }
        let cleaned = clean_text(text, self.strip_accents);
        if cleaned.is_empty() {
            return Err(CorpusError::DumpPage {
                title: title.to_string(),
                reason: "page body empty after cleaning".to_string(),
            });
        }
        let page = DumpPage {
            title: title.to_string(),
            text: cleaned,
            links,
        };
        write_bytes(&self.store, &self.path, &title_key(self.count), title.as_bytes())?;
        write_bytes(
            &self.store,
            &self.path,
            &page_key(title),
            &encode_payload(&page),
        )?;
        self.count += 1;
        Ok(())
    }

    /// Seal the store (writes metadata) and reopen it read-only.
    pub fn finish(self) -> Result<DumpDb, CorpusError> {
        let meta = DumpMeta {
            version: STORE_VERSION,
            page_count: self.count,
        };
        write_bytes(&self.store, &self.path, META_KEY, &encode_payload(&meta))?;
        drop(self.store);
        DumpDb::open(self.path)
    }
}

#[derive(Debug, Deserialize)]
struct RawDumpPage {
    title: String,
    text: String,
    #[serde(default)]
    links: Vec<(String, String)>,
}

/// Build a dump store from a JSON-lines dump export.
///
/// Each line carries one page as `{"title", "text", "links": [[anchor,
/// target], ...]}`. Raw wiki-markup parsing happens upstream; this reader is
/// the opaque dump-format seam. Malformed lines are logged and skipped.
pub fn build_from_jsonl(
    dump_file: &Path,
    out_file: &Path,
    strip_accents: bool,
) -> Result<DumpDb, CorpusError> {
    let reader = BufReader::new(fs::File::open(dump_file)?);
    let mut writer = DumpDbWriter::create(out_file, strip_accents)?;
    let mut skipped = 0u64;
    for (line_no, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let raw: RawDumpPage = match serde_json::from_str(&line) {
            Ok(raw) => raw,
            Err(err) => {
                warn!(line = line_no + 1, error = %err, "skipping malformed dump line");
                skipped += 1;
                continue;
            }
        };
        let links = raw
            .links
            .into_iter()
            .map(|(text, target)| Anchor { text, target })
            .collect();
        if let Err(err) = writer.append(&raw.title, &raw.text, links) {
            warn!(line = line_no + 1, error = %err, "skipping unusable dump page");
            skipped += 1;
        }
    }
    let db = writer.finish()?;
    info!(
        pages = db.page_count(),
        skipped,
        path = %db.path().display(),
        "dump store built"
    );
    Ok(db)
}

fn open_store(path: &Path) -> Result<DataStore, CorpusError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent)?;
    }
    DataStore::open(path).map_err(|err| CorpusError::DumpStore {
        path: path.to_path_buf(),
        reason: format!("store open failed: {err}"),
    })
}

fn read_bytes(store: &DataStore, path: &Path, key: &[u8]) -> Result<Option<Vec<u8>>, CorpusError> {
    store
        .read(key)
        .map_err(|err| CorpusError::DumpStore {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })
        .map(|entry| entry.map(|bytes| bytes.as_ref().to_vec()))
}

fn write_bytes(store: &DataStore, path: &Path, key: &[u8], payload: &[u8]) -> Result<(), CorpusError> {
    store.write(key, payload).map_err(|err| CorpusError::DumpStore {
        path: path.to_path_buf(),
        reason: err.to_string(),
    })?;
    Ok(())
}

fn encode_payload<T: bitcode::Encode>(value: &T) -> Vec<u8> {
    let raw = bitcode::encode(value);
    let mut out = Vec::with_capacity(1 + raw.len());
    out.push(BITCODE_PREFIX);
    out.extend_from_slice(&raw);
    out
}

fn decode_payload<T: bitcode::DecodeOwned>(
    path: &Path,
    bytes: &[u8],
) -> Result<T, CorpusError> {
    if bytes.first().copied() != Some(BITCODE_PREFIX) {
        return Err(CorpusError::DumpStore {
            path: path.to_path_buf(),
            reason: "payload missing expected prefix".to_string(),
        });
    }
    bitcode::decode(&bytes[1..]).map_err(|err| CorpusError::DumpStore {
        path: path.to_path_buf(),
        reason: format!("corrupt payload: {err}"),
    })
}

fn title_key(ordinal: u64) -> Vec<u8> {
    let suffix = ordinal.to_string();
    let mut key = Vec::with_capacity(TITLE_KEY_PREFIX.len() + suffix.len());
    key.extend_from_slice(TITLE_KEY_PREFIX);
    key.extend_from_slice(suffix.as_bytes());
    key
}

fn page_key(title: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(PAGE_KEY_PREFIX.len() + title.len());
    key.extend_from_slice(PAGE_KEY_PREFIX);
    key.extend_from_slice(title.as_bytes());
    key
}
