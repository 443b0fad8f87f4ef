//! Synthetic PDF files for unit tests
//!
//! Builds small, structurally complete files in memory with correct byte
//! offsets, so xref loading, resolution, and recovery can be exercised
//! without binary fixtures.

use bytes::Bytes;

pub(crate) struct PdfBuilder {
    out: Vec<u8>,
    offsets: Vec<(i32, usize)>,
}

impl PdfBuilder {
    pub fn new() -> Self {
        let mut out = Vec::new();
        out.extend_from_slice(b"%PDF-1.7\n%\xbf\xf7\xa2\xfe\n");
        Self {
            out,
            offsets: Vec::new(),
        }
    }

    pub fn offset_of(&self, id: i32) -> usize {
        self.offsets
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, o)| *o)
            .unwrap_or(0)
    }

    /// Append `id 0 obj <body> endobj`
    pub fn obj(&mut self, id: i32, body: &str) -> &mut Self {
        self.offsets.push((id, self.out.len()));
        self.out
            .extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", id, body).as_bytes());
        self
    }

    /// Append a stream object with the given extra dictionary entries
    pub fn stream_obj(&mut self, id: i32, extra_dict: &str, payload: &[u8]) -> &mut Self {
        self.offsets.push((id, self.out.len()));
        self.out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Length {} {} >>\nstream\n",
                id,
                payload.len(),
                extra_dict
            )
            .as_bytes(),
        );
        self.out.extend_from_slice(payload);
        self.out.extend_from_slice(b"\nendstream\nendobj\n");
        self
    }

    /// Emit a classic xref table, trailer, and file end. `fake_offset`
    /// optionally corrupts one object's entry.
    pub fn finish_classic(
        mut self,
        root_id: i32,
        fake_offset: Option<(i32, usize)>,
    ) -> Bytes {
        let mut ids: Vec<(i32, usize)> = self.offsets.clone();
        ids.sort();
        let size = ids.last().map(|(id, _)| id + 1).unwrap_or(1);

        let xref_offset = self.out.len();
        self.out
            .extend_from_slice(format!("xref\n0 {}\n", size).as_bytes());
        self.out.extend_from_slice(b"0000000000 65535 f \n");
        for id in 1..size {
            let offset = ids
                .iter()
                .find(|(i, _)| *i == id)
                .map(|(_, o)| *o)
                .unwrap_or(0);
            let offset = match fake_offset {
                Some((fid, fo)) if fid == id => fo,
                _ => offset,
            };
            self.out
                .extend_from_slice(format!("{:010} 00000 n \n", offset).as_bytes());
        }
        self.out.extend_from_slice(
            format!(
                "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF\n",
                size, root_id, xref_offset
            )
            .as_bytes(),
        );
        Bytes::from(self.out)
    }
}

/// One page, classic xref table, one content stream
pub(crate) fn minimal_pdf() -> Bytes {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.obj(2, "<< /Type /Pages /Kids [ 3 0 R ] /Count 1 >>");
    b.obj(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [ 0 0 612 792 ] /Contents 4 0 R >>",
    );
    b.stream_obj(4, "", b"BT /F1 12 Tf (Hello) Tj ET");
    b.finish_classic(1, None)
}

/// Same file with one xref entry pointing into the void
pub(crate) fn minimal_pdf_with_corrupt_offset() -> Bytes {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.obj(2, "<< /Type /Pages /Kids [ 3 0 R ] /Count 1 >>");
    b.obj(
        3,
        "<< /Type /Page /Parent 2 0 R /MediaBox [ 0 0 612 792 ] /Contents 4 0 R >>",
    );
    b.stream_obj(4, "", b"BT /F1 12 Tf (Hello) Tj ET");
    b.finish_classic(1, Some((3, 2)))
}

/// Two pages; document objects packed in an object stream indexed by a
/// cross-reference stream
pub(crate) fn two_page_pdf_with_object_stream() -> Bytes {
    let mut b = PdfBuilder::new();

    // members of the object stream
    let members: Vec<(i32, String)> = vec![
        (1, "<< /Type /Catalog /Pages 2 0 R >>".to_string()),
        (2, "<< /Type /Pages /Kids [ 3 0 R 4 0 R ] /Count 2 >>".to_string()),
        (
            3,
            "<< /Type /Page /Parent 2 0 R /MediaBox [ 0 0 612 792 ] /Contents 6 0 R >>".to_string(),
        ),
        (
            4,
            "<< /Type /Page /Parent 2 0 R /MediaBox [ 0 0 612 792 ] /Contents 7 0 R >>".to_string(),
        ),
    ];

    let mut bodies = Vec::new();
    let mut header = String::new();
    for (id, body) in &members {
        header.push_str(&format!("{} {} ", id, bodies.len()));
        bodies.extend_from_slice(body.as_bytes());
        bodies.push(b'\n');
    }
    let first = header.len();
    let mut payload = header.into_bytes();
    payload.extend_from_slice(&bodies);

    b.stream_obj(
        5,
        &format!("/Type /ObjStm /N {} /First {}", members.len(), first),
        &payload,
    );
    b.stream_obj(6, "", b"BT (page one) Tj ET");
    b.stream_obj(7, "", b"BT (page two) Tj ET");

    // cross-reference stream: W [1 4 1], objects 0..=8
    let xref_id = 8;
    let xref_stream_offset = b.out.len();
    let mut rows: Vec<u8> = Vec::new();
    let mut push_row = |kind: u8, f2: u32, f3: u8| {
        rows.push(kind);
        rows.extend_from_slice(&f2.to_be_bytes());
        rows.push(f3);
    };
    push_row(0, 0, 0); // object 0: free
    for index in 0..members.len() {
        push_row(2, 5, index as u8); // objects 1-4 live in stream 5
    }
    for id in 5..=7 {
        push_row(1, b.offset_of(id) as u32, 0);
    }
    push_row(1, xref_stream_offset as u32, 0); // the xref stream itself

    b.offsets.push((xref_id, xref_stream_offset));
    b.out.extend_from_slice(
        format!(
            "{} 0 obj\n<< /Type /XRef /Size 9 /W [ 1 4 1 ] /Length {} /Root 1 0 R >>\nstream\n",
            xref_id,
            rows.len()
        )
        .as_bytes(),
    );
    b.out.extend_from_slice(&rows);
    b.out.extend_from_slice(b"\nendstream\nendobj\n");
    b.out.extend_from_slice(
        format!("startxref\n{}\n%%EOF\n", xref_stream_offset).as_bytes(),
    );
    Bytes::from(b.out)
}

/// A stream whose /Length is an indirect reference back to the stream
/// object itself, forcing the resolver's cycle sentinel to fire
pub(crate) fn pdf_with_length_cycle() -> Bytes {
    let mut b = PdfBuilder::new();
    b.obj(1, "<< /Type /Catalog /Pages 2 0 R >>");
    b.obj(2, "<< /Type /Pages /Kids [ 3 0 R ] /Count 1 >>");
    b.obj(3, "<< /Type /Page /Parent 2 0 R /Contents 4 0 R >>");
    {
        let payload: &[u8] = b"BT (cyclic) Tj ET";
        b.offsets.push((4, b.out.len()));
        b.out
            .extend_from_slice(b"4 0 obj\n<< /Length 4 0 R >>\nstream\n");
        b.out.extend_from_slice(payload);
        b.out.extend_from_slice(b"\nendstream\nendobj\n");
    }
    b.finish_classic(1, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Document;
    use crate::objgen::ObjGen;

    #[test]
    fn test_minimal_pdf_opens_clean() {
        let doc = Document::open_bytes("mini.pdf", minimal_pdf()).unwrap();
        assert!(!doc.has_warnings());
        assert_eq!(doc.version(), "1.7");
        let root = doc.trailer().dict_get("Root").unwrap();
        root.resolve().unwrap();
        assert_eq!(
            root.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Catalog"
        );
    }

    #[test]
    fn test_minimal_pdf_stream_data() {
        let doc = Document::open_bytes("mini.pdf", minimal_pdf()).unwrap();
        let contents = doc.get_object(ObjGen::new(4, 0)).unwrap();
        assert!(contents.is_stream().unwrap());
        assert_eq!(contents.stream_data().unwrap(), b"BT /F1 12 Tf (Hello) Tj ET");
    }

    #[test]
    fn test_object_stream_pdf_opens() {
        let doc =
            Document::open_bytes("objstm.pdf", two_page_pdf_with_object_stream()).unwrap();
        let pages = doc.get_object(ObjGen::new(2, 0)).unwrap();
        assert_eq!(pages.dict_get("Count").unwrap().as_int().unwrap(), 2);
        // members of the stream resolve and alias properly
        let page1 = doc.get_object(ObjGen::new(3, 0)).unwrap();
        assert_eq!(
            page1.dict_get("Type").unwrap().as_name().unwrap().as_str(),
            "Page"
        );
    }
}
