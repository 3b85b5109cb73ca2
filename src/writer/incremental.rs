//! Incremental update writer.
//!
//! Appends new and replacement objects to an existing file, followed by a
//! classic cross-reference section and a trailer chained to the previous
//! section through `/Prev` (ISO 32000-1 section 7.5.6). The original bytes
//! are never modified.
//!
//! A classic section is written even when the base file uses
//! cross-reference streams; readers accept mixed chains.

use std::collections::{BTreeMap, HashMap};

use super::object_serializer::ObjectSerializer;
use crate::error::{Error, Result};
use crate::object::{Dictionary, Object, ObjectRef};

/// Trailer keys carried over from the base file.
const INHERITED_TRAILER_KEYS: &[&str] = &["Root", "Info", "ID"];

/// Builder for one incremental update section.
#[derive(Debug)]
pub struct IncrementalUpdate {
    prev_startxref: u64,
    next_id: u32,
    base_trailer: Dictionary,
    objects: BTreeMap<u32, Vec<u8>>,
    serializer: ObjectSerializer,
}

/// The result of [`IncrementalUpdate::write`].
#[derive(Debug)]
pub struct WrittenUpdate {
    /// Complete file: base bytes followed by the update section
    pub bytes: Vec<u8>,
    /// Absolute offset of each written object (`N 0 obj` line)
    pub offsets: HashMap<u32, usize>,
    /// Offset of the new cross-reference section
    pub startxref: usize,
}

impl IncrementalUpdate {
    /// Start an update over a base whose newest section is at `prev_startxref`.
    ///
    /// `next_id` is the first free object number in the base file.
    pub fn new(prev_startxref: u64, next_id: u32, base_trailer: &Dictionary) -> Self {
        Self {
            prev_startxref,
            next_id: next_id.max(1),
            base_trailer: base_trailer.clone(),
            objects: BTreeMap::new(),
            serializer: ObjectSerializer::compact(),
        }
    }

    /// Reserve a fresh object number.
    pub fn allocate(&mut self) -> ObjectRef {
        let id = self.next_id;
        self.next_id += 1;
        ObjectRef::new(id, 0)
    }

    /// Add or replace an object.
    pub fn put(&mut self, obj_ref: ObjectRef, object: &Object) {
        let body = self.serializer.serialize(object);
        self.put_raw(obj_ref, body);
    }

    /// Add or replace an object whose body was serialized by the caller.
    ///
    /// `body` is written verbatim between `N 0 obj` and `endobj`.
    pub fn put_raw(&mut self, obj_ref: ObjectRef, body: Vec<u8>) {
        if obj_ref.id >= self.next_id {
            self.next_id = obj_ref.id + 1;
        }
        self.objects.insert(obj_ref.id, body);
    }

    /// Number of objects in the update.
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Whether the update contains no objects.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Append the update section to `base`.
    pub fn write(self, base: &[u8]) -> Result<WrittenUpdate> {
        if self.objects.is_empty() {
            return Err(Error::InvalidPdf("incremental update has no objects".to_string()));
        }

        let mut out = Vec::with_capacity(base.len() + self.objects.values().map(|b| b.len() + 32).sum::<usize>() + 512);
        out.extend_from_slice(base);
        if !base.ends_with(b"\n") && !base.ends_with(b"\r") {
            out.push(b'\n');
        }

        let mut offsets = HashMap::with_capacity(self.objects.len());
        for (id, body) in &self.objects {
            offsets.insert(*id, out.len());
            out.extend_from_slice(format!("{} 0 obj\n", id).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\nendobj\n");
        }

        let startxref = out.len();
        out.extend_from_slice(b"xref\n");
        for (first, ids) in contiguous_runs(self.objects.keys().copied()) {
            out.extend_from_slice(format!("{} {}\n", first, ids.len()).as_bytes());
            for id in ids {
                // Each entry is exactly 20 bytes including the two-byte EOL
                out.extend_from_slice(format!("{:010} 00000 n \n", offsets[&id]).as_bytes());
            }
        }

        let mut trailer = Dictionary::new();
        for key in INHERITED_TRAILER_KEYS {
            if let Some(value) = self.base_trailer.get(*key) {
                trailer.insert((*key).to_string(), value.clone());
            }
        }
        if !trailer.contains_key("Root") {
            return Err(Error::InvalidPdf("base trailer has no /Root".to_string()));
        }
        trailer.insert("Size".to_string(), Object::Integer(self.next_id as i64));
        trailer.insert("Prev".to_string(), Object::Integer(self.prev_startxref as i64));

        out.extend_from_slice(b"trailer\n");
        self.serializer.write_object(&mut out, &Object::Dictionary(trailer));
        out.extend_from_slice(format!("\nstartxref\n{}\n%%EOF\n", startxref).as_bytes());

        log::debug!(
            "Incremental update: {} objects, xref at {}, /Prev {}",
            offsets.len(),
            startxref,
            self.prev_startxref
        );

        Ok(WrittenUpdate {
            bytes: out,
            offsets,
            startxref,
        })
    }
}

/// Group sorted object numbers into `(first, members)` runs.
fn contiguous_runs(ids: impl Iterator<Item = u32>) -> Vec<(u32, Vec<u32>)> {
    let mut runs: Vec<(u32, Vec<u32>)> = Vec::new();
    for id in ids {
        match runs.last_mut() {
            Some((first, members)) if *first + members.len() as u32 == id => members.push(id),
            _ => runs.push((id, vec![id])),
        }
    }
    runs
}
