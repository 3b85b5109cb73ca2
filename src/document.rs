//! PDF document model.
//!
//! [`PdfDocument`] holds a whole file in memory and gives access to the
//! pieces an incremental signing update needs: the header version, the
//! merged cross-reference chain and trailer, the catalog, the page tree and
//! individual objects (including objects packed in object streams).

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};
use crate::objstm::parse_object_stream;
use crate::parser::parse_indirect_at;
use crate::xref::{find_startxref, parse_xref_chain, CrossRefTable, XRefEntryType};

/// Maximum recursion depth for object resolution and page tree walks
const MAX_RECURSION_DEPTH: u32 = 100;

/// An in-memory PDF document.
///
/// # Example
///
/// ```no_run
/// use pdf_ltv_sign::document::PdfDocument;
///
/// let mut doc = PdfDocument::open("contract.pdf")?;
/// println!("PDF version: {}.{}", doc.version().0, doc.version().1);
/// let page = doc.first_page_ref()?;
/// # Ok::<(), pdf_ltv_sign::error::Error>(())
/// ```
pub struct PdfDocument {
    data: Vec<u8>,
    version: (u8, u8),
    xref: CrossRefTable,
    startxref: u64,
    object_cache: HashMap<ObjectRef, Object>,
    objstm_cache: HashMap<u32, HashMap<u32, Object>>,
}

impl std::fmt::Debug for PdfDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PdfDocument")
            .field("version", &self.version)
            .field("len", &self.data.len())
            .field("xref_entries", &self.xref.len())
            .field("startxref", &self.startxref)
            .finish_non_exhaustive()
    }
}

impl PdfDocument {
    /// Read and parse a PDF file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path.as_ref())?;
        Self::from_bytes(data)
    }

    /// Parse a PDF held in memory.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let version = parse_header(&data)?;
        let startxref = find_startxref(&data)?;
        let xref = parse_xref_chain(&data, startxref)?;

        log::debug!(
            "Opened PDF {}.{}: {} bytes, {} xref entries, startxref {}",
            version.0,
            version.1,
            data.len(),
            xref.len(),
            startxref
        );

        Ok(Self {
            data,
            version,
            xref,
            startxref,
            object_cache: HashMap::new(),
            objstm_cache: HashMap::new(),
        })
    }

    /// Raw file bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consume the document and return its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Header version (major, minor).
    pub fn version(&self) -> (u8, u8) {
        self.version
    }

    /// Offset of the newest cross-reference section.
    pub fn startxref(&self) -> u64 {
        self.startxref
    }

    /// Trailer of the newest cross-reference section.
    pub fn trailer(&self) -> &Dictionary {
        self.xref.trailer()
    }

    /// Merged cross-reference table.
    pub fn xref(&self) -> &CrossRefTable {
        &self.xref
    }

    /// Whether the document is encrypted.
    pub fn is_encrypted(&self) -> bool {
        self.trailer().contains_key("Encrypt")
    }

    /// Next unused object number, from `/Size` and the highest xref entry.
    pub fn next_object_number(&self) -> u32 {
        let size = self
            .trailer()
            .get("Size")
            .and_then(|o| o.as_integer())
            .unwrap_or(0)
            .max(0) as u32;
        size.max(self.xref.max_object_number() + 1)
    }

    /// Byte offset of an object stored directly in the file.
    pub fn object_offset(&self, obj_ref: ObjectRef) -> Option<usize> {
        self.xref
            .get(obj_ref.id)
            .filter(|e| e.entry_type == XRefEntryType::Uncompressed)
            .map(|e| e.offset as usize)
    }

    /// Load an indirect object.
    pub fn load_object(&mut self, obj_ref: ObjectRef) -> Result<Object> {
        if let Some(cached) = self.object_cache.get(&obj_ref) {
            return Ok(cached.clone());
        }

        let entry = self
            .xref
            .get(obj_ref.id)
            .cloned()
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))?;

        let object = match entry.entry_type {
            XRefEntryType::Free => return Err(Error::ObjectNotFound(obj_ref.id, obj_ref.gen)),
            XRefEntryType::Uncompressed => {
                let (found, object) = parse_indirect_at(&self.data, entry.offset as usize)?;
                if found.id != obj_ref.id {
                    return Err(Error::InvalidPdf(format!(
                        "xref points {} at object {}",
                        obj_ref, found
                    )));
                }
                object
            },
            XRefEntryType::Compressed => self.load_compressed_object(obj_ref, entry.offset as u32)?,
        };

        self.object_cache.insert(obj_ref, object.clone());
        Ok(object)
    }

    fn load_compressed_object(&mut self, obj_ref: ObjectRef, stream_num: u32) -> Result<Object> {
        if !self.objstm_cache.contains_key(&stream_num) {
            log::debug!("Loading object stream {} for object {}", stream_num, obj_ref.id);
            let stream_offset = self
                .object_offset(ObjectRef::new(stream_num, 0))
                .ok_or(Error::ObjectNotFound(stream_num, 0))?;
            let (_, stream) = parse_indirect_at(&self.data, stream_offset)?;
            let objects = parse_object_stream(&stream)?;
            self.objstm_cache.insert(stream_num, objects);
        }

        self.objstm_cache
            .get(&stream_num)
            .and_then(|objects| objects.get(&obj_ref.id))
            .cloned()
            .ok_or(Error::ObjectNotFound(obj_ref.id, obj_ref.gen))
    }

    /// Follow a reference chain to a direct object. Direct objects are returned as-is.
    pub fn resolve(&mut self, obj: &Object) -> Result<Object> {
        let mut current = obj.clone();
        for _ in 0..MAX_RECURSION_DEPTH {
            match current.as_reference() {
                Some(r) => current = self.load_object(r)?,
                None => return Ok(current),
            }
        }
        Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH))
    }

    /// Resolve a dictionary entry to a dictionary, if present.
    pub fn resolve_dict(&mut self, obj: Option<&Object>) -> Result<Option<Dictionary>> {
        match obj {
            Some(o) => match self.resolve(o)? {
                Object::Null => Ok(None),
                other => other.into_dict().map(Some),
            },
            None => Ok(None),
        }
    }

    /// Reference to the document catalog.
    pub fn catalog_ref(&self) -> Result<ObjectRef> {
        self.trailer()
            .get("Root")
            .ok_or_else(|| Error::InvalidPdf("Trailer missing /Root entry".to_string()))?
            .as_reference()
            .ok_or_else(|| Error::InvalidPdf("/Root is not a reference".to_string()))
    }

    /// Load the document catalog.
    pub fn catalog(&mut self) -> Result<Dictionary> {
        let root = self.catalog_ref()?;
        self.load_object(root)?.into_dict()
    }

    /// Effective version: the later of the header and the catalog `/Version`.
    pub fn effective_version(&mut self) -> Result<(u8, u8)> {
        let catalog = self.catalog()?;
        let declared = catalog
            .get("Version")
            .and_then(|o| o.as_name())
            .and_then(parse_version_name);
        Ok(declared.map_or(self.version, |v| v.max(self.version)))
    }

    /// Reference to the first page in document order.
    pub fn first_page_ref(&mut self) -> Result<ObjectRef> {
        let catalog = self.catalog()?;
        let pages = catalog
            .get("Pages")
            .and_then(|o| o.as_reference())
            .ok_or_else(|| Error::InvalidPdf("Catalog missing /Pages reference".to_string()))?;
        self.find_first_page(pages, 0)
    }

    fn find_first_page(&mut self, node_ref: ObjectRef, depth: u32) -> Result<ObjectRef> {
        if depth >= MAX_RECURSION_DEPTH {
            return Err(Error::RecursionLimitExceeded(MAX_RECURSION_DEPTH));
        }

        let node = self.load_object(node_ref)?.into_dict()?;
        match node.get("Type").and_then(|t| t.as_name()) {
            Some("Page") => Ok(node_ref),
            // Some writers omit /Type on intermediate nodes; /Kids decides
            Some("Pages") | None if node.contains_key("Kids") => {
                let kids = match node.get("Kids") {
                    Some(k) => self.resolve(k)?,
                    None => Object::Null,
                };
                for kid in kids.as_array().map(|a| a.as_slice()).unwrap_or_default() {
                    if let Some(kid_ref) = kid.as_reference() {
                        match self.find_first_page(kid_ref, depth + 1) {
                            Ok(page) => return Ok(page),
                            Err(Error::RecursionLimitExceeded(n)) => {
                                return Err(Error::RecursionLimitExceeded(n))
                            },
                            Err(e) => log::debug!("Skipping page tree node {}: {}", kid_ref, e),
                        }
                    }
                }
                Err(Error::InvalidPdf("Document has no pages".to_string()))
            },
            None => Ok(node_ref),
            Some(other) => Err(Error::InvalidPdf(format!("Unknown page tree node type: {}", other))),
        }
    }
}

/// Parse `%PDF-M.m` near the start of the file.
///
/// The header may be preceded by garbage; only the first 1024 bytes are searched.
pub fn parse_header(data: &[u8]) -> Result<(u8, u8)> {
    let window = &data[..data.len().min(1024)];
    let pos = window
        .windows(5)
        .position(|w| w == b"%PDF-")
        .ok_or_else(|| {
            Error::InvalidHeader(String::from_utf8_lossy(&window[..window.len().min(8)]).into_owned())
        })?;

    let version = data.get(pos + 5..pos + 8).unwrap_or_default();
    match version {
        [major, b'.', minor] if major.is_ascii_digit() && minor.is_ascii_digit() => {
            Ok((major - b'0', minor - b'0'))
        },
        _ => Err(Error::InvalidHeader(format!(
            "%PDF-{}",
            String::from_utf8_lossy(version)
        ))),
    }
}

fn parse_version_name(name: &str) -> Option<(u8, u8)> {
    let (major, minor) = name.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}
