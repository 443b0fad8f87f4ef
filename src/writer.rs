//! PDF writer
//!
//! Walks the live object graph reachable from the trailer, assigns fresh
//! output object numbers (input files may have sparse, reused, or colliding
//! numbers), and emits a complete file: body objects, optional object
//! streams, a classic xref table or cross-reference stream, and the
//! trailer. Linearized output is a two-pass write: the first pass measures
//! every offset with fixed-width placeholders, the second emits the same
//! bytes with the real values patched in.

use crate::document::Document;
use crate::error::{Error, Result};
use crate::object::{Dict, Name, Object, Value};
use crate::objgen::ObjGen;
use crate::pipeline::{FlateAction, PipelineBox, PlBuffer, PlFlate};
use crate::xref::XrefEntry;
use crate::xref_stream::{self, XrefStreamEntry};
use byteorder::{BigEndian, WriteBytesExt};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::io::Write as _;

/// Which cross-reference encoding the output carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum XrefMode {
    /// Classic `xref` table
    Table,
    /// PDF 1.5+ cross-reference stream
    Stream,
    /// Both: a classic table whose trailer points at a cross-reference
    /// stream via /XRefStm, readable by pre-1.5 consumers
    Hybrid,
}

/// What happens to object streams on output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ObjectStreamMode {
    /// Objects packed in the input stay packed, grouped as they were
    Preserve,
    /// Everything is written as a top-level object
    Disable,
    /// Pack every eligible object into generated object streams
    Generate,
}

/// What happens to stream payloads on output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StreamDataMode {
    /// Keep raw bytes and filters exactly as read
    Preserve,
    /// Decode every decodable stream and drop its filters
    Uncompress,
    /// Decode then recompress with Flate
    Compress,
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteOptions {
    pub xref_mode: XrefMode,
    pub object_stream_mode: ObjectStreamMode,
    pub stream_data_mode: StreamDataMode,
    /// Two-pass web-optimized layout
    pub linearize: bool,
    /// Deterministic /ID for reproducible output
    pub static_id: bool,
    /// Floor for the header version, e.g. "1.6"
    pub min_version: Option<String>,
    pub max_objects_per_stream: usize,
    pub compression_level: u32,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            xref_mode: XrefMode::Table,
            object_stream_mode: ObjectStreamMode::Preserve,
            stream_data_mode: StreamDataMode::Preserve,
            linearize: false,
            static_id: false,
            min_version: None,
            max_objects_per_stream: 100,
            compression_level: 6,
        }
    }
}

/// The renumbering and packing decisions for one output file
struct Plan {
    /// Reachable objects in traversal order; ids 1..=order.len()
    order: Vec<ObjGen>,
    renumber: HashMap<ObjGen, i32>,
    /// Member object -> (group index, index within group)
    packed: HashMap<ObjGen, (usize, u32)>,
    groups: Vec<Vec<ObjGen>>,
    /// New id of each group's container stream
    group_ids: Vec<i32>,
    xref_mode: XrefMode,
}

impl Plan {
    fn highest_id(&self) -> i32 {
        self.order.len() as i32 + self.groups.len() as i32
    }

    fn map(&self, og: ObjGen) -> Option<ObjGen> {
        self.renumber.get(&og).map(|id| ObjGen::new(*id, 0))
    }
}

/// Serializes one document with one set of options
pub struct Writer<'a> {
    doc: &'a Document,
    options: WriteOptions,
}

impl<'a> Writer<'a> {
    pub fn new(doc: &'a Document, options: WriteOptions) -> Self {
        Self { doc, options }
    }

    /// Produce the complete output file
    pub fn write_bytes(&self) -> Result<Vec<u8>> {
        let plan = self.plan()?;
        if self.options.linearize {
            self.write_linearized(&plan)
        } else {
            self.write_normal(&plan)
        }
    }

    /// Write the output file into a sink, returning the byte count
    pub fn write_to(&self, sink: &mut dyn std::io::Write) -> Result<u64> {
        let bytes = self.write_bytes()?;
        sink.write_all(&bytes)?;
        Ok(bytes.len() as u64)
    }

    // ------------------------------------------------------------------
    // Planning
    // ------------------------------------------------------------------

    fn plan(&self) -> Result<Plan> {
        let trailer = self.doc.trailer();
        let encrypt_og = {
            let encrypt = trailer.dict_get("Encrypt")?;
            if encrypt.is_indirect() {
                Some(encrypt.og())
            } else {
                None
            }
        };

        // reachability walk from the trailer, breadth-first
        let mut order: Vec<ObjGen> = Vec::new();
        let mut renumber: HashMap<ObjGen, i32> = HashMap::new();
        let mut queue: VecDeque<Object> = VecDeque::new();
        for key in trailer.dict_keys()? {
            if key.as_str() == "Encrypt" {
                continue;
            }
            queue.push_back(trailer.dict_get(key.as_str())?);
        }

        while let Some(obj) = queue.pop_front() {
            let og = obj.og();
            if og.is_indirect() {
                if renumber.contains_key(&og) || Some(og) == encrypt_og {
                    continue;
                }
                obj.resolve()?;
                renumber.insert(og, (order.len() + 1) as i32);
                order.push(og);
            }
            match obj.raw_value() {
                Value::Array(items) => {
                    for item in items {
                        queue.push_back(item);
                    }
                }
                Value::Dictionary(entries) => {
                    for value in entries.values() {
                        queue.push_back(value.clone());
                    }
                }
                Value::Stream(s) => {
                    for value in s.dict.values() {
                        queue.push_back(value.clone());
                    }
                }
                _ => {}
            }
        }

        // object stream packing
        let mode = if self.options.linearize {
            // linearized layout keeps every object top-level
            ObjectStreamMode::Disable
        } else {
            self.options.object_stream_mode
        };

        let mut groups: Vec<Vec<ObjGen>> = Vec::new();
        match mode {
            ObjectStreamMode::Disable => {}
            ObjectStreamMode::Generate => {
                let mut current: Vec<ObjGen> = Vec::new();
                for &og in &order {
                    if !self.eligible_for_packing(og)? {
                        continue;
                    }
                    current.push(og);
                    if current.len() >= self.options.max_objects_per_stream.max(1) {
                        groups.push(std::mem::take(&mut current));
                    }
                }
                if !current.is_empty() {
                    groups.push(current);
                }
            }
            ObjectStreamMode::Preserve => {
                // keep the input's grouping, keyed by original container
                let mut by_container: HashMap<i32, Vec<ObjGen>> = HashMap::new();
                for &og in &order {
                    if !self.eligible_for_packing(og)? {
                        continue;
                    }
                    if let Some(XrefEntry::Compressed { stream, .. }) =
                        self.doc.state().xref_entry(og)
                    {
                        by_container.entry(stream).or_default().push(og);
                    }
                }
                let mut containers: Vec<i32> = by_container.keys().copied().collect();
                containers.sort_unstable();
                for container in containers {
                    groups.push(by_container.remove(&container).unwrap_or_default());
                }
            }
        }

        let mut packed = HashMap::new();
        for (gi, members) in groups.iter().enumerate() {
            for (mi, og) in members.iter().enumerate() {
                packed.insert(*og, (gi, mi as u32));
            }
        }

        let mut next_id = order.len() as i32;
        let group_ids: Vec<i32> = groups
            .iter()
            .map(|_| {
                next_id += 1;
                next_id
            })
            .collect();

        // packed objects need a cross-reference stream; a plain table can
        // only carry them in hybrid form
        let xref_mode = if self.options.linearize {
            XrefMode::Table
        } else if groups.is_empty() || self.options.xref_mode != XrefMode::Table {
            self.options.xref_mode
        } else {
            tracing::debug!("object streams in output force a cross-reference stream");
            XrefMode::Stream
        };

        Ok(Plan {
            order,
            renumber,
            packed,
            groups,
            group_ids,
            xref_mode,
        })
    }

    /// Only non-stream objects of generation zero may be packed; the
    /// encryption dictionary never is
    fn eligible_for_packing(&self, og: ObjGen) -> Result<bool> {
        if og.r#gen != 0 {
            return Ok(false);
        }
        let obj = self.doc.get_object(og)?;
        Ok(!obj.is_stream()?)
    }

    // ------------------------------------------------------------------
    // Body serialization
    // ------------------------------------------------------------------

    fn header(&self, plan: &Plan) -> Vec<u8> {
        let version = self.output_version(plan);
        let mut out = format!("%PDF-{}\n", version).into_bytes();
        // the binary comment marks the file as non-text for transports
        out.extend_from_slice(b"%\xbf\xf7\xa2\xfe\n");
        out
    }

    fn output_version(&self, plan: &Plan) -> String {
        let mut version = self.doc.version();
        if plan.xref_mode == XrefMode::Stream && version_less_than(&version, "1.5") {
            version = "1.5".to_string();
        }
        if let Some(min) = &self.options.min_version {
            if version_less_than(&version, min) {
                version = min.clone();
            }
        }
        version
    }

    /// Serialize `og 0 obj ... endobj`, appending to out; returns the
    /// object's byte offset
    fn emit_object(&self, out: &mut Vec<u8>, plan: &Plan, og: ObjGen, new_id: i32) -> Result<u64> {
        let offset = out.len() as u64;
        let obj = self.doc.get_object(og)?;
        out.extend_from_slice(format!("{} 0 obj\n", new_id).as_bytes());
        if obj.is_stream()? {
            let body = self.serialize_stream(&obj, plan)?;
            out.extend_from_slice(&body);
        } else {
            let map = |og| plan.map(og);
            out.extend_from_slice(&obj.unparse_mapped(&map)?);
        }
        out.extend_from_slice(b"\nendobj\n");
        Ok(offset)
    }

    /// Dictionary, `stream`, payload, `endstream` for one stream object,
    /// applying the configured stream-data transformation
    fn serialize_stream(&self, obj: &Object, plan: &Plan) -> Result<Vec<u8>> {
        let filterable = obj.is_stream_filterable()?;
        let (payload, filter, parms): (Vec<u8>, Option<Object>, Option<Object>) =
            match self.options.stream_data_mode {
                StreamDataMode::Preserve => (
                    obj.raw_stream_data()?,
                    Some(obj.dict_get("Filter")?),
                    Some(obj.dict_get("DecodeParms")?),
                ),
                StreamDataMode::Uncompress if filterable => (obj.stream_data()?, None, None),
                StreamDataMode::Compress if filterable => {
                    let decoded = obj.stream_data()?;
                    (
                        self.flate_compress(&decoded)?,
                        Some(Object::name("FlateDecode")),
                        None,
                    )
                }
                // undecodable filters: preserve the original bytes verbatim
                _ => (
                    obj.raw_stream_data()?,
                    Some(obj.dict_get("Filter")?),
                    Some(obj.dict_get("DecodeParms")?),
                ),
            };

        let mut entries = obj.as_dict()?;
        entries.insert(Name::new("Length"), Object::integer(payload.len() as i64));
        entries.remove(&Name::new("Filter"));
        entries.remove(&Name::new("DecodeParms"));
        if let Some(f) = filter {
            if !f.is_null()? {
                entries.insert(Name::new("Filter"), f);
            }
        }
        if let Some(p) = parms {
            if !p.is_null()? {
                entries.insert(Name::new("DecodeParms"), p);
            }
        }

        let map = |og| plan.map(og);
        let mut out = Object::dictionary(entries).unparse_mapped(&map)?;
        out.extend_from_slice(b"\nstream\n");
        out.extend_from_slice(&payload);
        out.extend_from_slice(b"\nendstream");
        Ok(out)
    }

    /// Build one object stream: member header pairs, member bodies, and
    /// the container's stream object
    fn emit_object_stream(
        &self,
        out: &mut Vec<u8>,
        plan: &Plan,
        group: usize,
    ) -> Result<u64> {
        let members = &plan.groups[group];
        let container_id = plan.group_ids[group];

        let map = |og| plan.map(og);
        let mut header = String::new();
        let mut bodies: Vec<u8> = Vec::new();
        for og in members {
            let new_id = plan
                .renumber
                .get(og)
                .ok_or_else(|| Error::internal("packed object missing from renumber map"))?;
            header.push_str(&format!("{} {} ", new_id, bodies.len()));
            let obj = self.doc.get_object(*og)?;
            bodies.extend_from_slice(&obj.unparse_mapped(&map)?);
            bodies.push(b'\n');
        }
        let first = header.len();
        let mut payload = header.into_bytes();
        payload.extend_from_slice(&bodies);

        let compress = self.options.stream_data_mode != StreamDataMode::Uncompress;
        let (payload, filter) = if compress {
            (self.flate_compress(&payload)?, " /Filter /FlateDecode")
        } else {
            (payload, "")
        };

        let offset = out.len() as u64;
        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /ObjStm /N {} /First {} /Length {}{} >>\nstream\n",
                container_id,
                members.len(),
                first,
                payload.len(),
                filter
            )
            .as_bytes(),
        );
        out.extend_from_slice(&payload);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        Ok(offset)
    }

    fn flate_compress(&self, data: &[u8]) -> Result<Vec<u8>> {
        let buf = PlBuffer::new("compressed");
        let handle = buf.handle();
        let mut flate = PlFlate::new("deflate", Box::new(buf), FlateAction::Deflate);
        flate.set_compression_level(self.options.compression_level);
        let mut head: PipelineBox = Box::new(flate);
        head.write(data)?;
        head.finish()?;
        Ok(handle.take())
    }

    // ------------------------------------------------------------------
    // Trailer and file id
    // ------------------------------------------------------------------

    /// Output trailer entries: the input trailer minus structural keys
    /// that no longer apply, plus fresh /Size and /ID
    fn trailer_entries(&self, plan: &Plan, size: i64) -> Result<Dict> {
        let mut entries = self.doc.trailer().as_dict()?;
        for key in [
            "Size", "Prev", "XRefStm", "Encrypt", "Length", "Filter", "DecodeParms", "W",
            "Index", "Type", "ID",
        ] {
            entries.remove(&Name::new(key));
        }
        entries.insert(Name::new("Size"), Object::integer(size));
        entries.insert(Name::new("ID"), self.make_file_id(plan));
        Ok(entries)
    }

    fn file_id_digest(&self, plan: &Plan) -> [u8; 16] {
        if self.options.static_id {
            // fixed digits for reproducible output
            *b"\x31\x41\x59\x26\x53\x58\x97\x93\x23\x84\x62\x64\x33\x83\x27\x95"
        } else {
            let mut hasher = Md5::new();
            hasher.update(self.doc.state().doc_name().as_bytes());
            hasher.update(self.doc.version().as_bytes());
            hasher.update((plan.order.len() as u64).to_be_bytes());
            hasher.finalize().into()
        }
    }

    fn make_file_id(&self, plan: &Plan) -> Object {
        let digest = self.file_id_digest(plan);
        Object::array(vec![
            Object::string(digest.to_vec()),
            Object::string(digest.to_vec()),
        ])
    }

    // ------------------------------------------------------------------
    // Normal (non-linearized) output
    // ------------------------------------------------------------------

    fn write_normal(&self, plan: &Plan) -> Result<Vec<u8>> {
        let mut out = self.header(plan);
        let mut offsets: HashMap<i32, u64> = HashMap::new();

        for (i, og) in plan.order.iter().enumerate() {
            let new_id = (i + 1) as i32;
            if plan.packed.contains_key(og) {
                continue;
            }
            let offset = self.emit_object(&mut out, plan, *og, new_id)?;
            offsets.insert(new_id, offset);
        }
        for group in 0..plan.groups.len() {
            let offset = self.emit_object_stream(&mut out, plan, group)?;
            offsets.insert(plan.group_ids[group], offset);
        }

        match plan.xref_mode {
            XrefMode::Table => {
                let size = plan.highest_id() as i64 + 1;
                let xref_offset = out.len() as u64;
                out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
                out.extend_from_slice(b"0000000000 65535 f \n");
                for id in 1..=plan.highest_id() {
                    let offset = offsets.get(&id).copied().unwrap_or(0);
                    out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
                }
                let trailer = Object::dictionary(self.trailer_entries(plan, size)?);
                let map = |og| plan.map(og);
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&trailer.unparse_mapped(&map)?);
                out.extend_from_slice(
                    format!("\nstartxref\n{}\n%%EOF\n", xref_offset).as_bytes(),
                );
            }
            XrefMode::Stream => {
                let xref_id = plan.highest_id() + 1;
                let size = xref_id as i64 + 1;
                let xref_offset = out.len() as u64;

                let rows = self.xref_stream_rows(plan, &offsets, xref_offset);
                let (widths, row_data) = xref_stream::encode_entries(&rows)?;
                let payload = self.flate_compress(&row_data)?;

                let mut entries = self.trailer_entries(plan, size)?;
                add_xref_stream_keys(&mut entries, widths, payload.len());

                let map = |og| plan.map(og);
                out.extend_from_slice(format!("{} 0 obj\n", xref_id).as_bytes());
                out.extend_from_slice(&Object::dictionary(entries).unparse_mapped(&map)?);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(&payload);
                out.extend_from_slice(b"\nendstream\nendobj\n");
                out.extend_from_slice(
                    format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes(),
                );
            }
            XrefMode::Hybrid => {
                let stream_id = plan.highest_id() + 1;
                let size = stream_id as i64 + 1;

                // the cross-reference stream carries the full row set; new
                // readers load it before the table's free rows, old readers
                // never look at it
                let stream_offset = out.len() as u64;
                let rows = self.xref_stream_rows(plan, &offsets, stream_offset);
                let (widths, row_data) = xref_stream::encode_entries(&rows)?;
                let payload = self.flate_compress(&row_data)?;

                let mut stream_dict = Dict::new();
                stream_dict.insert(Name::new("Size"), Object::integer(size));
                add_xref_stream_keys(&mut stream_dict, widths, payload.len());

                let map = |og| plan.map(og);
                out.extend_from_slice(format!("{} 0 obj\n", stream_id).as_bytes());
                out.extend_from_slice(&Object::dictionary(stream_dict).unparse_mapped(&map)?);
                out.extend_from_slice(b"\nstream\n");
                out.extend_from_slice(&payload);
                out.extend_from_slice(b"\nendstream\nendobj\n");

                // classic table: packed objects show as free so pre-1.5
                // readers skip them instead of mis-seeking
                let table_offset = out.len() as u64;
                out.extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
                out.extend_from_slice(b"0000000000 65535 f \n");
                for id in 1..=stream_id {
                    let packed = plan
                        .order
                        .get(id as usize - 1)
                        .map(|og| plan.packed.contains_key(og))
                        .unwrap_or(false);
                    if packed {
                        out.extend_from_slice(b"0000000000 00000 f \n");
                    } else {
                        let offset = if id == stream_id {
                            stream_offset
                        } else {
                            offsets.get(&id).copied().unwrap_or(0)
                        };
                        out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
                    }
                }
                let mut entries = self.trailer_entries(plan, size)?;
                entries.insert(
                    Name::new("XRefStm"),
                    Object::integer(stream_offset as i64),
                );
                let trailer = Object::dictionary(entries);
                out.extend_from_slice(b"trailer\n");
                out.extend_from_slice(&trailer.unparse_mapped(&map)?);
                out.extend_from_slice(
                    format!("\nstartxref\n{}\n%%EOF\n", table_offset).as_bytes(),
                );
            }
        }
        Ok(out)
    }

    /// Full row set for a cross-reference stream: the free head, one row
    /// per content object, and the stream object itself
    fn xref_stream_rows(
        &self,
        plan: &Plan,
        offsets: &HashMap<i32, u64>,
        self_offset: u64,
    ) -> Vec<XrefStreamEntry> {
        let mut rows = vec![XrefStreamEntry {
            kind: 0,
            field2: 0,
            field3: 65535,
        }];
        for id in 1..=plan.highest_id() {
            let og = plan.order.get(id as usize - 1).copied();
            let row = match og.and_then(|og| plan.packed.get(&og)) {
                Some(&(group, index)) => XrefStreamEntry {
                    kind: 2,
                    field2: plan.group_ids[group] as u64,
                    field3: index,
                },
                None => XrefStreamEntry {
                    kind: 1,
                    field2: offsets.get(&id).copied().unwrap_or(0),
                    field3: 0,
                },
            };
            rows.push(row);
        }
        rows.push(XrefStreamEntry {
            kind: 1,
            field2: self_offset,
            field3: 0,
        });
        rows
    }

    // ------------------------------------------------------------------
    // Linearized output
    // ------------------------------------------------------------------

    fn write_linearized(&self, plan: &Plan) -> Result<Vec<u8>> {
        let split = self.split_first_page(plan)?;

        // pass one measures, pass two patches; fixed-width placeholders
        // keep both passes byte-identical in length
        let zero = LinValues::default();
        let (_, measured) = self.render_linearized(plan, &split, &zero)?;
        let (out, check) = self.render_linearized(plan, &split, &measured)?;
        if check.file_len != measured.file_len {
            return Err(Error::internal(
                "linearized output size changed between passes",
            ));
        }
        Ok(out)
    }

    /// Partition reachable objects: catalog, page tree root, first page
    /// and its direct dependencies go up front
    fn split_first_page(&self, plan: &Plan) -> Result<LinSplit> {
        let trailer = self.doc.trailer();
        let root = trailer.dict_get("Root")?;
        root.resolve()?;
        let pages = root.dict_get("Pages")?;
        pages.resolve()?;

        let mut first_part: Vec<ObjGen> = Vec::new();
        let mut push = |og: ObjGen| {
            if og.is_indirect() && !first_part.contains(&og) {
                first_part.push(og);
            }
        };
        push(root.og());
        push(pages.og());

        let mut first_page_og = ObjGen::DIRECT;
        let kids = pages.dict_get("Kids")?;
        if kids.is_array()? && kids.array_len()? > 0 {
            let first_page = kids.array_get(0)?;
            first_page.resolve()?;
            first_page_og = first_page.og();
            push(first_page_og);
            // one level of the page's own dependencies
            if first_page.is_dictionary()? {
                for key in first_page.dict_keys()? {
                    let value = first_page.dict_get(key.as_str())?;
                    if value.is_indirect() {
                        push(value.og());
                    } else if let Value::Array(items) = value.raw_value() {
                        for item in items {
                            if item.is_indirect() {
                                push(item.og());
                            }
                        }
                    }
                }
            }
        }

        let page_count = pages
            .dict_get("Count")
            .and_then(|c| c.as_int())
            .unwrap_or(1)
            .max(1);

        let first_part: Vec<ObjGen> = first_part
            .into_iter()
            .filter(|og| plan.renumber.contains_key(og))
            .collect();
        let rest: Vec<ObjGen> = plan
            .order
            .iter()
            .copied()
            .filter(|og| !first_part.contains(og))
            .collect();

        Ok(LinSplit {
            first_part,
            rest,
            first_page_og,
            page_count,
        })
    }

    fn render_linearized(
        &self,
        plan: &Plan,
        split: &LinSplit,
        values: &LinValues,
    ) -> Result<(Vec<u8>, LinValues)> {
        // ids: rest 1..=k, first part k+1..=n, lin dict n+1, hint n+2
        let k = split.rest.len() as i32;
        let n = (split.rest.len() + split.first_part.len()) as i32;
        let lin_id = n + 1;
        let hint_id = n + 2;
        let size = n as i64 + 3;

        let mut renumber: HashMap<ObjGen, i32> = HashMap::new();
        for (i, og) in split.rest.iter().enumerate() {
            renumber.insert(*og, (i + 1) as i32);
        }
        for (i, og) in split.first_part.iter().enumerate() {
            renumber.insert(*og, k + (i + 1) as i32);
        }
        let lin_plan = Plan {
            order: plan.order.clone(),
            renumber,
            packed: HashMap::new(),
            groups: Vec::new(),
            group_ids: Vec::new(),
            xref_mode: XrefMode::Table,
        };

        let first_page_id = lin_plan
            .renumber
            .get(&split.first_page_og)
            .copied()
            .unwrap_or(0);

        let mut out = self.header(&lin_plan);
        let mut offsets: HashMap<i32, u64> = HashMap::new();

        // linearization parameter dictionary, all measured values padded
        offsets.insert(lin_id, out.len() as u64);
        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Linearized 1 /L {:010} /H [ {:010} {:010} ] /O {} /E {:010} /N {} /T {:010} >>\nendobj\n",
                lin_id,
                values.file_len,
                values.hint_off,
                values.hint_len,
                first_page_id,
                values.first_page_end,
                split.page_count,
                values.t_off,
            )
            .as_bytes(),
        );

        // first xref section: first-part objects, lin dict, hint stream
        let xref1_offset = out.len() as u64;
        let first_id = k + 1;
        let first_count = hint_id - k;
        out.extend_from_slice(format!("xref\n{} {}\n", first_id, first_count).as_bytes());
        for id in first_id..=hint_id {
            let offset = values.offsets.get(&id).copied().unwrap_or(0);
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        // built by hand so /Prev can be zero-padded; a dictionary unparse
        // would change length between the measuring and patching passes
        let root_id = self
            .doc
            .trailer()
            .dict_get("Root")
            .ok()
            .and_then(|r| lin_plan.renumber.get(&r.og()).copied())
            .unwrap_or(0);
        let id_hex = hex_string(&self.file_id_digest(&lin_plan));
        out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Prev {:010} /Root {} 0 R /ID [ <{}> <{}> ] >>\n",
                size, values.xref2_off, root_id, id_hex, id_hex
            )
            .as_bytes(),
        );

        // primary hint stream
        let hint_payload = self.build_hint_payload(split, values, first_page_id);
        let hint_off = out.len() as u64;
        offsets.insert(hint_id, hint_off);
        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /S {} /Length {} >>\nstream\n",
                hint_id,
                hint_payload.len(),
                hint_payload.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&hint_payload);
        out.extend_from_slice(b"\nendstream\nendobj\n");
        let hint_len = out.len() as u64 - hint_off;

        // first-page objects
        for (i, og) in split.first_part.iter().enumerate() {
            let id = k + (i + 1) as i32;
            let offset = self.emit_object(&mut out, &lin_plan, *og, id)?;
            offsets.insert(id, offset);
        }
        let first_page_end = out.len() as u64;

        // remaining objects
        for (i, og) in split.rest.iter().enumerate() {
            let id = (i + 1) as i32;
            let offset = self.emit_object(&mut out, &lin_plan, *og, id)?;
            offsets.insert(id, offset);
        }

        // main xref section for the remaining objects
        let xref2_offset = out.len() as u64;
        let header_line = format!("xref\n0 {}\n", k + 1);
        let t_off = xref2_offset + header_line.len() as u64;
        out.extend_from_slice(header_line.as_bytes());
        out.extend_from_slice(b"0000000000 65535 f \n");
        for id in 1..=k {
            let offset = offsets.get(&id).copied().unwrap_or(0);
            out.extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        out.extend_from_slice(format!("trailer\n<< /Size {} >>\n", size).as_bytes());
        out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref1_offset).as_bytes());

        let measured = LinValues {
            file_len: out.len() as u64,
            hint_off,
            hint_len,
            first_page_end,
            xref2_off: xref2_offset,
            t_off,
            offsets,
        };
        Ok((out, measured))
    }

    /// Page offset hint table: a packed header followed by one row per
    /// page, all fields fixed width so passes stay aligned
    fn build_hint_payload(
        &self,
        split: &LinSplit,
        values: &LinValues,
        first_page_id: i32,
    ) -> Vec<u8> {
        let mut out = Vec::new();
        let first_page_loc = values
            .offsets
            .get(&first_page_id)
            .copied()
            .unwrap_or(0);
        // header: minimums and field widths
        let _ = out.write_u32::<BigEndian>(1); // least objects per page
        let _ = out.write_u32::<BigEndian>(first_page_loc as u32);
        let _ = out.write_u32::<BigEndian>(32); // bits per object-count delta
        let _ = out.write_u32::<BigEndian>(0); // least page length
        let _ = out.write_u32::<BigEndian>(32); // bits per length delta
        let _ = out.write_u32::<BigEndian>(0); // least content offset
        let _ = out.write_u32::<BigEndian>(32);
        let _ = out.write_u32::<BigEndian>(0); // least content length
        let _ = out.write_u32::<BigEndian>(32);
        let _ = out.write_u32::<BigEndian>(0); // shared reference fields
        let _ = out.write_u32::<BigEndian>(0);
        for _ in 0..split.page_count {
            let _ = out.write_u32::<BigEndian>(split.first_part.len() as u32);
            let _ = out.write_u32::<BigEndian>(values.first_page_end as u32);
        }
        out
    }
}

struct LinSplit {
    first_part: Vec<ObjGen>,
    rest: Vec<ObjGen>,
    first_page_og: ObjGen,
    page_count: i64,
}

#[derive(Default)]
struct LinValues {
    file_len: u64,
    hint_off: u64,
    hint_len: u64,
    first_page_end: u64,
    xref2_off: u64,
    t_off: u64,
    offsets: HashMap<i32, u64>,
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect()
}

/// Keys every cross-reference stream dictionary carries
fn add_xref_stream_keys(entries: &mut Dict, widths: crate::xref_stream::FieldWidths, len: usize) {
    entries.insert(Name::new("Type"), Object::name("XRef"));
    entries.insert(
        Name::new("W"),
        Object::array(vec![
            Object::integer(widths.w[0] as i64),
            Object::integer(widths.w[1] as i64),
            Object::integer(widths.w[2] as i64),
        ]),
    );
    entries.insert(Name::new("Length"), Object::integer(len as i64));
    entries.insert(Name::new("Filter"), Object::name("FlateDecode"));
}

fn version_less_than(a: &str, b: &str) -> bool {
    let parse = |v: &str| -> (i32, i32) {
        let mut parts = v.splitn(2, '.');
        let major = parts.next().and_then(|p| p.parse().ok()).unwrap_or(1);
        let minor = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
        (major, minor)
    };
    parse(a) < parse(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::test_pdf;

    fn reopen(bytes: Vec<u8>) -> Document {
        Document::open_bytes("rewritten.pdf", bytes).unwrap()
    }

    #[test]
    fn test_version_compare() {
        assert!(version_less_than("1.4", "1.5"));
        assert!(!version_less_than("1.7", "1.5"));
        assert!(!version_less_than("2.0", "1.9"));
    }

    #[test]
    fn test_round_trip_classic_table() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let writer = Writer::new(&doc, WriteOptions::default());
        let bytes = writer.write_bytes().unwrap();

        let out = reopen(bytes);
        assert!(!out.has_warnings());
        let root = out.trailer().dict_get("Root").unwrap();
        root.resolve().unwrap();
        assert_eq!(
            root.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Catalog"
        );
    }

    #[test]
    fn test_round_trip_preserves_stream_payload() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let bytes = Writer::new(&doc, WriteOptions::default()).write_bytes().unwrap();
        let out = reopen(bytes);

        let page = out.trailer().dict_get("Root").unwrap();
        page.resolve().unwrap();
        let contents = page
            .dict_get("Pages")
            .unwrap()
            .dict_get("Kids")
            .unwrap()
            .array_get(0)
            .unwrap()
            .dict_get("Contents")
            .unwrap();
        assert_eq!(contents.stream_data().unwrap(), b"BT /F1 12 Tf (Hello) Tj ET");
    }

    #[test]
    fn test_unpack_object_streams() {
        let doc =
            Document::open_bytes("objstm.pdf", test_pdf::two_page_pdf_with_object_stream())
                .unwrap();
        let mut options = WriteOptions::default();
        options.object_stream_mode = ObjectStreamMode::Disable;
        let bytes = Writer::new(&doc, options).write_bytes().unwrap();

        // the output has a classic table and no object streams
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("xref\n"));
        assert!(!text.contains("/ObjStm"));

        let out = reopen(bytes);
        let pages = out.trailer().dict_get("Root").unwrap().dict_get("Pages").unwrap();
        assert_eq!(pages.dict_get("Count").unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn test_generate_object_streams() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let mut options = WriteOptions::default();
        options.object_stream_mode = ObjectStreamMode::Generate;
        let bytes = Writer::new(&doc, options).write_bytes().unwrap();

        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("/ObjStm"));
        assert!(text.contains("/XRef"));

        let out = reopen(bytes);
        let root = out.trailer().dict_get("Root").unwrap();
        root.resolve().unwrap();
        assert_eq!(
            root.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Catalog"
        );
    }

    #[test]
    fn test_hybrid_xref_output() {
        let doc =
            Document::open_bytes("objstm.pdf", test_pdf::two_page_pdf_with_object_stream())
                .unwrap();
        let mut options = WriteOptions::default();
        options.xref_mode = XrefMode::Hybrid;
        let bytes = Writer::new(&doc, options).write_bytes().unwrap();

        // both encodings are present and linked
        let text = String::from_utf8_lossy(&bytes);
        assert!(text.contains("xref\n"));
        assert!(text.contains("/XRefStm"));
        assert!(text.contains("/ObjStm"));

        let out = reopen(bytes);
        let pages = out
            .trailer()
            .dict_get("Root")
            .unwrap()
            .dict_get("Pages")
            .unwrap();
        assert_eq!(pages.dict_get("Count").unwrap().as_int().unwrap(), 2);
        let page = pages.dict_get("Kids").unwrap().array_get(0).unwrap();
        assert_eq!(
            page.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Page"
        );
    }

    #[test]
    fn test_compress_and_uncompress_modes() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();

        let mut options = WriteOptions::default();
        options.stream_data_mode = StreamDataMode::Compress;
        let compressed = Writer::new(&doc, options).write_bytes().unwrap();
        assert!(String::from_utf8_lossy(&compressed).contains("/FlateDecode"));

        let out = reopen(compressed);
        let mut options = WriteOptions::default();
        options.stream_data_mode = StreamDataMode::Uncompress;
        let plain = Writer::new(&out, options).write_bytes().unwrap();
        assert!(!String::from_utf8_lossy(&plain).contains("/FlateDecode"));

        let final_doc = reopen(plain);
        let contents = final_doc
            .trailer()
            .dict_get("Root")
            .unwrap()
            .dict_get("Pages")
            .unwrap()
            .dict_get("Kids")
            .unwrap()
            .array_get(0)
            .unwrap()
            .dict_get("Contents")
            .unwrap();
        assert_eq!(contents.stream_data().unwrap(), b"BT /F1 12 Tf (Hello) Tj ET");
    }

    #[test]
    fn test_static_id_is_deterministic() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let mut options = WriteOptions::default();
        options.static_id = true;
        let a = Writer::new(&doc, options.clone()).write_bytes().unwrap();
        let b = Writer::new(&doc, options).write_bytes().unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_min_version_override() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let mut options = WriteOptions::default();
        options.min_version = Some("1.9".to_string());
        let bytes = Writer::new(&doc, options).write_bytes().unwrap();
        assert!(bytes.starts_with(b"%PDF-1.9"));
    }

    #[test]
    fn test_linearized_output_opens() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let mut options = WriteOptions::default();
        options.linearize = true;
        let bytes = Writer::new(&doc, options).write_bytes().unwrap();

        // the linearization dictionary leads the file
        let head = String::from_utf8_lossy(&bytes[..200.min(bytes.len())]);
        assert!(head.contains("/Linearized 1"));

        let out = reopen(bytes);
        let root = out.trailer().dict_get("Root").unwrap();
        root.resolve().unwrap();
        assert_eq!(
            root.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Catalog"
        );
    }

    #[test]
    fn test_write_to_sink() {
        let doc = Document::open_bytes("mini.pdf", test_pdf::minimal_pdf()).unwrap();
        let mut sink = Vec::new();
        let n = Writer::new(&doc, WriteOptions::default())
            .write_to(&mut sink)
            .unwrap();
        assert_eq!(n as usize, sink.len());
        assert!(sink.starts_with(b"%PDF-"));
    }
}
