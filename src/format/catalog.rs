//! Registry of frame formats keyed by `(frame type, revision)`.
//!
//! Lookups tolerate revision drift: asking for a revision that is not
//! registered falls back to the latest registered revision of the same
//! frame type and logs a warning the first time each `(frame type,
//! revision)` pair is seen. Only an entirely unknown frame type is an
//! error.
//!
//! A process-wide catalog can be installed once with
//! [`FormatCatalog::install`] and is read-only afterwards.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::sync::OnceLock;

use parking_lot::Mutex;
use tracing::{debug, warn};

use super::config::CatalogConfig;
use super::frame_format::FrameFormat;
use crate::error::{MfmError, Result};

static GLOBAL_CATALOG: OnceLock<FormatCatalog> = OnceLock::new();

/// Outcome of a revision-tolerant lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatMatch<'a> {
    /// The requested revision is registered.
    Exact(&'a FrameFormat),
    /// The requested revision is unknown; the latest registered revision is used instead.
    Fallback {
        requested: u8,
        format: &'a FrameFormat,
    },
}

impl<'a> FormatMatch<'a> {
    /// The format to use, whichever way it was found.
    pub fn format(&self) -> &'a FrameFormat {
        match *self {
            FormatMatch::Exact(format) => format,
            FormatMatch::Fallback { format, .. } => format,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, FormatMatch::Fallback { .. })
    }
}

/// Registry of all known frame formats.
#[derive(Debug, Default)]
pub struct FormatCatalog {
    formats: HashMap<u16, BTreeMap<u8, FrameFormat>>,
    /// `(frame type, requested revision)` pairs already resolved by fallback.
    fallbacks: Mutex<HashSet<(u16, u8)>>,
}

impl FormatCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a catalog from a configuration document.
    pub fn from_config(config: CatalogConfig) -> Result<Self> {
        let mut catalog = Self::new();
        for format in config.formats {
            catalog.register(FrameFormat::from_config(format)?)?;
        }
        debug!(formats = catalog.len(), "Format catalog loaded");
        Ok(catalog)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Self::from_config(serde_json::from_str(json)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Self::from_config(serde_json::from_reader(reader)?)
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_reader(BufReader::new(File::open(path)?))
    }

    /// Add a format. A `(frame type, revision)` pair can only be registered once.
    pub fn register(&mut self, format: FrameFormat) -> Result<()> {
        let revisions = self.formats.entry(format.frame_type()).or_default();
        if revisions.contains_key(&format.revision()) {
            return Err(MfmError::InvalidFormat(format!(
                "format {:#06x} revision {} registered twice",
                format.frame_type(),
                format.revision()
            )));
        }
        revisions.insert(format.revision(), format);
        Ok(())
    }

    /// Number of registered `(frame type, revision)` pairs.
    pub fn len(&self) -> usize {
        self.formats.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Revision-tolerant lookup.
    ///
    /// # Example
    ///
    /// ```
    /// use mfm_codec::format::FormatCatalog;
    ///
    /// let catalog = FormatCatalog::from_json_str(r#"{ "formats": [
    ///     { "frame_type": 1, "revision": 1, "kind": "nested" },
    ///     { "frame_type": 1, "revision": 3, "kind": "nested" }
    /// ] }"#).unwrap();
    ///
    /// assert!(!catalog.find_format(1, 1).unwrap().is_fallback());
    /// let found = catalog.find_format(1, 2).unwrap();
    /// assert!(found.is_fallback());
    /// assert_eq!(found.format().revision(), 3);
    /// assert!(catalog.find_format(9, 0).is_err());
    /// ```
    pub fn find_format(&self, frame_type: u16, revision: u8) -> Result<FormatMatch<'_>> {
        let revisions = self.revisions(frame_type)?;
        if let Some(format) = revisions.get(&revision) {
            return Ok(FormatMatch::Exact(format));
        }

        let format = revisions
            .values()
            .next_back()
            .ok_or(MfmError::FormatNotFound { frame_type })?;
        if self.fallbacks.lock().insert((frame_type, revision)) {
            warn!(
                frame_type,
                requested = revision,
                used = format.revision(),
                "Format revision not registered, falling back to latest"
            );
        } else {
            debug!(
                frame_type,
                requested = revision,
                used = format.revision(),
                "Format revision fallback"
            );
        }
        Ok(FormatMatch::Fallback {
            requested: revision,
            format,
        })
    }

    /// `(frame type, requested revision)` pairs resolved by fallback so far, sorted.
    pub fn fallbacks(&self) -> Vec<(u16, u8)> {
        let mut fallbacks: Vec<_> = self.fallbacks.lock().iter().copied().collect();
        fallbacks.sort_unstable();
        fallbacks
    }

    /// Lookup without fallback.
    pub fn find_exact_format(&self, frame_type: u16, revision: u8) -> Result<&FrameFormat> {
        self.revisions(frame_type)?
            .get(&revision)
            .ok_or(MfmError::FormatRevisionNotFound {
                frame_type,
                revision,
            })
    }

    /// Highest registered revision of a frame type.
    pub fn find_latest_format(&self, frame_type: u16) -> Result<&FrameFormat> {
        self.revisions(frame_type)?
            .values()
            .next_back()
            .ok_or(MfmError::FormatNotFound { frame_type })
    }

    /// All formats, ordered by revision within each frame type.
    pub fn iter(&self) -> impl Iterator<Item = &FrameFormat> {
        self.formats.values().flat_map(BTreeMap::values)
    }

    fn revisions(&self, frame_type: u16) -> Result<&BTreeMap<u8, FrameFormat>> {
        self.formats
            .get(&frame_type)
            .ok_or(MfmError::FormatNotFound { frame_type })
    }

    /// Install the process-wide catalog. Fails if one is already installed.
    pub fn install(catalog: FormatCatalog) -> Result<&'static FormatCatalog> {
        GLOBAL_CATALOG
            .set(catalog)
            .map_err(|_| MfmError::CatalogAlreadyInstalled)?;
        Self::global()
    }

    /// The process-wide catalog.
    pub fn global() -> Result<&'static FormatCatalog> {
        GLOBAL_CATALOG.get().ok_or(MfmError::CatalogNotInstalled)
    }

    /// The process-wide catalog, installing the one built by `init` if none is installed yet.
    ///
    /// When two threads race, the first installed catalog wins and the other is dropped.
    pub fn get_or_install<F>(init: F) -> Result<&'static FormatCatalog>
    where
        F: FnOnce() -> Result<FormatCatalog>,
    {
        if let Some(catalog) = GLOBAL_CATALOG.get() {
            return Ok(catalog);
        }
        let _ = GLOBAL_CATALOG.set(init()?);
        Self::global()
    }
}
