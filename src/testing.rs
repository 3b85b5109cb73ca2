//! Sample documents for unit tests.

use std::fmt::Write;

/// Shape of a generated sample document.
#[derive(Debug, Clone)]
pub(crate) struct SamplePdf {
    pub version: String,
    pub catalog_extra: String,
    pub page_extra: String,
    pub trailer_extra: String,
    /// Put the page under an intermediate `/Pages` node (object 5)
    pub nested_pages: bool,
    /// Write a cross-reference stream instead of a classic table
    pub xref_stream: bool,
    /// Additional `(object number, body)` pairs
    pub extra_objects: Vec<(u32, String)>,
}

impl Default for SamplePdf {
    fn default() -> Self {
        Self {
            version: "1.4".to_string(),
            catalog_extra: String::new(),
            page_extra: String::new(),
            trailer_extra: String::new(),
            nested_pages: false,
            xref_stream: false,
            extra_objects: Vec::new(),
        }
    }
}

/// Build a one-page PDF with correct offsets.
///
/// Objects: 1 catalog, 2 page tree root, 3 page, 4 content stream,
/// 5 intermediate page tree node when nested.
pub(crate) fn build_pdf(sample: &SamplePdf) -> Vec<u8> {
    let content = "BT /F1 12 Tf 72 720 Td (Hello) Tj ET";
    let page_parent = if sample.nested_pages { 5 } else { 2 };
    let root_kids = if sample.nested_pages { "5 0 R" } else { "3 0 R" };

    let mut objects: Vec<(u32, String)> = vec![
        (1, format!("<< /Type /Catalog /Pages 2 0 R {} >>", sample.catalog_extra)),
        (2, format!("<< /Type /Pages /Kids [{}] /Count 1 >>", root_kids)),
        (
            3,
            format!(
                "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 612 792] /Contents 4 0 R {} >>",
                page_parent, sample.page_extra
            ),
        ),
        (4, format!("<< /Length {} >>\nstream\n{}\nendstream", content.len(), content)),
    ];
    if sample.nested_pages {
        objects.push((5, "<< /Type /Pages /Parent 2 0 R /Kids [3 0 R] /Count 1 >>".to_string()));
    }
    objects.extend(sample.extra_objects.iter().cloned());
    objects.sort_by_key(|(num, _)| *num);

    let mut out = format!("%PDF-{}\n%\u{e2}\u{e3}\u{cf}\u{d3}\n", sample.version).into_bytes();
    let mut offsets = Vec::new();
    for (num, body) in &objects {
        offsets.push((*num, out.len()));
        out.extend_from_slice(format!("{} 0 obj\n{}\nendobj\n", num, body).as_bytes());
    }

    let max_num = objects.iter().map(|(n, _)| *n).max().unwrap_or(0);
    let xref_offset = out.len();

    if sample.xref_stream {
        let size = max_num + 2;
        let mut rows = vec![0u8, 0, 0, 0xFF];
        for num in 1..=max_num {
            match offsets.iter().find(|(n, _)| *n == num) {
                Some((_, off)) => rows.extend_from_slice(&[1, (off >> 16) as u8, (off >> 8) as u8, *off as u8]),
                None => rows.extend_from_slice(&[0, 0, 0, 0]),
            }
        }
        rows.extend_from_slice(&[
            1,
            (xref_offset >> 16) as u8,
            (xref_offset >> 8) as u8,
            xref_offset as u8,
        ]);
        out.extend_from_slice(
            format!(
                "{} 0 obj\n<< /Type /XRef /Size {} /W [1 3 0] /Root 1 0 R {} /Length {} >>\nstream\n",
                size - 1,
                size,
                sample.trailer_extra,
                rows.len()
            )
            .as_bytes(),
        );
        out.extend_from_slice(&rows);
        out.extend_from_slice(b"\nendstream\nendobj\n");
    } else {
        let mut table = format!("xref\n0 {}\n0000000000 65535 f \n", max_num + 1);
        for num in 1..=max_num {
            let line = match offsets.iter().find(|(n, _)| *n == num) {
                Some((_, off)) => format!("{:010} 00000 n \n", off),
                None => "0000000000 65535 f \n".to_string(),
            };
            table.push_str(&line);
        }
        write!(
            table,
            "trailer\n<< /Size {} /Root 1 0 R {} >>\n",
            max_num + 1,
            sample.trailer_extra
        )
        .ok();
        out.extend_from_slice(table.as_bytes());
    }

    out.extend_from_slice(format!("startxref\n{}\n%%EOF\n", xref_offset).as_bytes());
    out
}

#[test]
fn test_sample_offsets_point_at_objects() {
    let pdf = build_pdf(&SamplePdf::default());
    let text = String::from_utf8_lossy(&pdf);
    let start = text.rfind("startxref").unwrap();
    let offset: usize = text[start + 10..].lines().next().unwrap().trim().parse().unwrap();
    assert!(pdf[offset..].starts_with(b"xref"));
}
