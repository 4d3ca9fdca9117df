use crate::canvas::{Command, Page};
use crate::debug::DebugLogger;
use crate::types::{Color, Pt};
use fixed::types::I32F32;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Write};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub(crate) struct PdfOptions {
    /// Flate-compress page content streams.
    pub compress_streams: bool,
}

impl Default for PdfOptions {
    fn default() -> Self {
        Self {
            compress_streams: true,
        }
    }
}

const PDF_CATALOG_ID: usize = 1;
const PDF_PAGES_ID: usize = 2;
const PDF_RESOURCES_ID: usize = 3;

// Keep the page tree shallow but avoid huge /Kids arrays for large outputs.
const PDF_PAGE_NODE_MAX_KIDS: usize = 256;

struct PdfPageNode {
    id: usize,
    kids: Vec<usize>,
}

struct StreamFont {
    resource: String,
    obj_id: usize,
}

/// Incremental PDF writer. Pages are serialized as soon as they are added; the
/// shared resources, page tree, catalog and cross-reference table are written
/// by [`PdfStreamWriter::finish`]. A writer dropped before `finish` leaves a
/// truncated file without a trailer.
pub(crate) struct PdfStreamWriter<'a, W: Write> {
    writer: &'a mut W,
    offset: usize,
    offsets: Vec<usize>, // index by object id; 0 is the free object.
    next_id: usize,
    options: PdfOptions,
    debug: Option<Arc<DebugLogger>>,

    fonts: BTreeMap<&'static str, StreamFont>,
    next_font_resource: usize,

    gs_resources: Vec<(String, usize)>,
    gs_name_map: HashMap<(u16, u16), String>,
    next_gs_index: usize,

    page_nodes: Vec<PdfPageNode>,
    current_node: Option<PdfPageNode>,
    page_count: usize,
}

impl<'a, W: Write> PdfStreamWriter<'a, W> {
    pub(crate) fn new(
        writer: &'a mut W,
        options: PdfOptions,
        debug: Option<Arc<DebugLogger>>,
    ) -> io::Result<Self> {
        let mut offset: usize = 0;
        write_bytes(writer, b"%PDF-1.7\n", &mut offset)?;
        write_bytes(writer, b"%\xE2\xE3\xCF\xD3\n", &mut offset)?;

        Ok(Self {
            writer,
            offset,
            offsets: vec![0; PDF_RESOURCES_ID + 1],
            next_id: PDF_RESOURCES_ID + 1,
            options,
            debug,
            fonts: BTreeMap::new(),
            next_font_resource: 1,
            gs_resources: Vec::new(),
            gs_name_map: HashMap::new(),
            next_gs_index: 1,
            page_nodes: Vec::new(),
            current_node: None,
            page_count: 0,
        })
    }

    pub(crate) fn page_count(&self) -> usize {
        self.page_count
    }

    /// Serializes one page with its own MediaBox.
    pub(crate) fn add_page(&mut self, page: &Page) -> io::Result<()> {
        let parent_id = self.ensure_page_node();
        let start = self.alloc_ids(2);
        let content_id = start;
        let page_id = start + 1;

        if let Some(node) = self.current_node.as_mut() {
            node.kids.push(page_id);
        }

        let content = self.render_commands(&page.commands, page.size.height)?;
        let stream = stream_object(content.as_bytes(), self.options.compress_streams)?;
        self.write_object(content_id, &stream)?;

        let page_obj = format!(
            "<< /Type /Page /Parent {} 0 R /MediaBox [0 0 {} {}] /Resources {} 0 R /Contents {} 0 R >>",
            parent_id,
            fmt_pt(page.size.width),
            fmt_pt(page.size.height),
            PDF_RESOURCES_ID,
            content_id,
        );
        self.write_object(page_id, page_obj.as_bytes())?;

        if let Some(logger) = self.debug.as_deref() {
            logger.event(
                "pdf.page",
                json!({
                    "index": self.page_count,
                    "commands": page.commands.len(),
                    "content_bytes": content.len(),
                    "stream_bytes": stream.len(),
                }),
            );
        }
        self.page_count += 1;
        Ok(())
    }

    /// Writes the shared objects and the trailer. Returns the total byte count.
    pub(crate) fn finish(&mut self) -> io::Result<usize> {
        if let Some(node) = self.current_node.take() {
            self.page_nodes.push(node);
        }

        // 1) Fonts were allocated as pages referenced them.
        let fonts = std::mem::take(&mut self.fonts);
        for (name, font) in &fonts {
            self.write_object(font.obj_id, font_object(name).as_bytes())?;
        }

        // 2) Resources dictionary (referenced by every page).
        let mut resources = Vec::new();
        if !fonts.is_empty() {
            let entries = fonts
                .values()
                .map(|f| (f.resource.clone(), f.obj_id))
                .collect::<Vec<_>>();
            resources.push(format!("/Font {}", resource_dict(&entries)));
        }
        if !self.gs_resources.is_empty() {
            resources.push(format!(
                "/ExtGState {}",
                resource_dict(&self.gs_resources)
            ));
        }
        self.write_object(
            PDF_RESOURCES_ID,
            format!("<< {} >>", resources.join(" ")).as_bytes(),
        )?;

        // 3) Page tree nodes + root.
        let page_nodes = std::mem::take(&mut self.page_nodes);
        for node in &page_nodes {
            let body = format!(
                "<< /Type /Pages /Parent {} 0 R /Count {} /Kids [{}] >>",
                PDF_PAGES_ID,
                node.kids.len(),
                ref_list(&node.kids)
            );
            self.write_object(node.id, body.as_bytes())?;
        }
        let total_pages: usize = page_nodes.iter().map(|n| n.kids.len()).sum();
        let node_ids = page_nodes.iter().map(|n| n.id).collect::<Vec<_>>();
        self.write_object(
            PDF_PAGES_ID,
            format!(
                "<< /Type /Pages /Count {} /Kids [{}] >>",
                total_pages,
                ref_list(&node_ids)
            )
            .as_bytes(),
        )?;

        // 4) Catalog.
        self.write_object(
            PDF_CATALOG_ID,
            format!("<< /Type /Catalog /Pages {} 0 R >>", PDF_PAGES_ID).as_bytes(),
        )?;

        // 5) XRef + trailer.
        let total_objects = self.next_id.saturating_sub(1);
        let xref_start = self.offset;
        write_str(
            self.writer,
            &format!("xref\n0 {}\n", total_objects + 1),
            &mut self.offset,
        )?;
        write_bytes(self.writer, b"0000000000 65535 f \n", &mut self.offset)?;
        for id in 1..=total_objects {
            let obj_offset = self.offsets.get(id).copied().unwrap_or(0);
            write_str(
                self.writer,
                &format!("{:010} 00000 n \n", obj_offset),
                &mut self.offset,
            )?;
        }
        let trailer = format!(
            "trailer\n<< /Size {} /Root {} 0 R >>\nstartxref\n{}\n%%EOF",
            total_objects + 1,
            PDF_CATALOG_ID,
            xref_start
        );
        write_str(self.writer, &trailer, &mut self.offset)?;
        self.writer.flush()?;

        if let Some(logger) = self.debug.as_deref() {
            logger.event(
                "pdf.finish",
                json!({
                    "bytes": self.offset,
                    "pages": total_pages,
                    "fonts": fonts.len(),
                    "extgstates": self.gs_resources.len(),
                }),
            );
        }
        log::debug!(
            "pdf finished: {} pages, {} bytes",
            total_pages,
            self.offset
        );
        Ok(self.offset)
    }

    fn render_commands(&mut self, commands: &[Command], page_height: Pt) -> io::Result<String> {
        let mut out = String::new();

        for cmd in commands {
            match cmd {
                Command::SaveState => out.push_str("q\n"),
                Command::RestoreState => out.push_str("Q\n"),
                Command::SetFillColor(color) => {
                    out.push_str(&format!("{} rg\n", color_operands(*color)));
                }
                Command::SetStrokeColor(color) => {
                    out.push_str(&format!("{} RG\n", color_operands(*color)));
                }
                Command::SetLineWidth(width) => {
                    out.push_str(&format!("{} w\n", fmt_pt(*width)));
                }
                Command::SetLineCap(cap) => {
                    out.push_str(&format!("{} J\n", cap));
                }
                Command::SetLineJoin(join) => {
                    out.push_str(&format!("{} j\n", join));
                }
                Command::SetMiterLimit(limit) => {
                    out.push_str(&format!("{} M\n", fmt_pt(*limit)));
                }
                Command::SetDash { pattern, phase } => {
                    let items = pattern
                        .iter()
                        .map(|v| fmt_pt(*v))
                        .collect::<Vec<_>>()
                        .join(" ");
                    out.push_str(&format!("[{}] {} d\n", items, fmt_pt(*phase)));
                }
                Command::SetOpacity { fill, stroke } => {
                    // Quantized to 0..1000 so near-equal alphas share a resource.
                    let k = ((*fill * 1000.0).round() as i32).clamp(0, 1000) as u16;
                    let ks = ((*stroke * 1000.0).round() as i32).clamp(0, 1000) as u16;
                    let name = self.ensure_extgstate((k, ks))?;
                    out.push_str(&format!("/{} gs\n", name));
                }
                Command::MoveTo { x, y } => {
                    out.push_str(&format!("{} {} m\n", fmt_pt(*x), fmt_pt(page_height - *y)));
                }
                Command::LineTo { x, y } => {
                    out.push_str(&format!("{} {} l\n", fmt_pt(*x), fmt_pt(page_height - *y)));
                }
                Command::CurveTo {
                    x1,
                    y1,
                    x2,
                    y2,
                    x,
                    y,
                } => {
                    out.push_str(&format!(
                        "{} {} {} {} {} {} c\n",
                        fmt_pt(*x1),
                        fmt_pt(page_height - *y1),
                        fmt_pt(*x2),
                        fmt_pt(page_height - *y2),
                        fmt_pt(*x),
                        fmt_pt(page_height - *y),
                    ));
                }
                Command::ClosePath => out.push_str("h\n"),
                Command::Fill => out.push_str("f\n"),
                Command::FillEvenOdd => out.push_str("f*\n"),
                Command::Stroke => out.push_str("S\n"),
                Command::FillStroke => out.push_str("B\n"),
                Command::FillStrokeEvenOdd => out.push_str("B*\n"),
                Command::StrokeString {
                    x,
                    y,
                    font,
                    size,
                    text,
                } => {
                    let resource = self.ensure_font(font);
                    let encoded = encode_winansi_pdf_string(text);
                    if encoded.replaced > 0 {
                        if let Some(logger) = self.debug.as_deref() {
                            logger.event(
                                "pdf.winansi.lossy",
                                json!({"font": font, "replaced": encoded.replaced}),
                            );
                        }
                    }
                    out.push_str("q\nBT\n");
                    out.push_str(&format!("/{} {} Tf\n", resource, fmt_pt(*size)));
                    out.push_str("1 Tr\n");
                    out.push_str(&format!(
                        "{} {} Td\n",
                        fmt_pt(*x),
                        fmt_pt(page_height - *y)
                    ));
                    out.push_str(&format!("({}) Tj\n", encoded.text));
                    out.push_str("ET\nQ\n");
                }
                Command::StrokeRect {
                    x,
                    y,
                    width,
                    height,
                } => {
                    let draw_y = page_height - *y - *height;
                    out.push_str(&format!(
                        "{} {} {} {} re\nS\n",
                        fmt_pt(*x),
                        fmt_pt(draw_y),
                        fmt_pt(*width),
                        fmt_pt(*height)
                    ));
                }
            }
        }

        Ok(out)
    }

    fn ensure_offsets_len(&mut self, required_len: usize) {
        if self.offsets.len() < required_len {
            self.offsets.resize(required_len, 0);
        }
    }

    fn alloc_ids(&mut self, count: usize) -> usize {
        let start = self.next_id;
        self.next_id = self.next_id.saturating_add(count);
        self.ensure_offsets_len(self.next_id);
        start
    }

    fn write_object(&mut self, obj_id: usize, body: &[u8]) -> io::Result<()> {
        write_pdf_object(
            self.writer,
            &mut self.offset,
            &mut self.offsets,
            obj_id,
            body,
        )
    }

    fn ensure_page_node(&mut self) -> usize {
        let needs_new = self
            .current_node
            .as_ref()
            .map(|n| n.kids.len() >= PDF_PAGE_NODE_MAX_KIDS)
            .unwrap_or(true);
        if needs_new {
            if let Some(node) = self.current_node.take() {
                self.page_nodes.push(node);
            }
            let id = self.alloc_ids(1);
            self.current_node = Some(PdfPageNode {
                id,
                kids: Vec::with_capacity(PDF_PAGE_NODE_MAX_KIDS),
            });
        }
        self.current_node
            .as_ref()
            .map(|n| n.id)
            .unwrap_or(PDF_PAGES_ID)
    }

    fn ensure_font(&mut self, name: &'static str) -> String {
        if let Some(font) = self.fonts.get(name) {
            return font.resource.clone();
        }
        let resource = format!("F{}", self.next_font_resource);
        self.next_font_resource += 1;
        let obj_id = self.alloc_ids(1);
        self.fonts.insert(
            name,
            StreamFont {
                resource: resource.clone(),
                obj_id,
            },
        );
        resource
    }

    fn ensure_extgstate(&mut self, key: (u16, u16)) -> io::Result<String> {
        if let Some(name) = self.gs_name_map.get(&key) {
            return Ok(name.clone());
        }

        let (f, s) = key;
        let obj_id = self.alloc_ids(1);
        let name = format!("GS{}", self.next_gs_index);
        self.next_gs_index += 1;

        let obj = format!(
            "<< /Type /ExtGState /ca {} /CA {} >>",
            fmt(f as f32 / 1000.0),
            fmt(s as f32 / 1000.0)
        );
        self.write_object(obj_id, obj.as_bytes())?;
        self.gs_resources.push((name.clone(), obj_id));
        self.gs_name_map.insert(key, name.clone());
        Ok(name)
    }
}

fn flate_compress(data: &[u8]) -> io::Result<Vec<u8>> {
    use flate2::Compression;
    use flate2::write::ZlibEncoder;

    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

fn stream_object(content: &[u8], compress: bool) -> io::Result<Vec<u8>> {
    let (data, filter) = if compress {
        (flate_compress(content)?, " /Filter /FlateDecode")
    } else {
        (content.to_vec(), "")
    };
    let mut out = format!("<< /Length {}{} >>\nstream\n", data.len(), filter).into_bytes();
    out.extend_from_slice(&data);
    out.extend_from_slice(b"\nendstream");
    Ok(out)
}

fn font_object(name: &str) -> String {
    format!(
        "<< /Type /Font /Subtype /Type1 /BaseFont /{} /Encoding /WinAnsiEncoding >>",
        sanitize_font_name(name)
    )
}

fn resource_dict(entries: &[(String, usize)]) -> String {
    let items = entries
        .iter()
        .map(|(name, id)| format!("/{} {} 0 R", name, id))
        .collect::<Vec<_>>();
    format!("<< {} >>", items.join(" "))
}

fn ref_list(ids: &[usize]) -> String {
    ids.iter()
        .map(|id| format!("{} 0 R", id))
        .collect::<Vec<_>>()
        .join(" ")
}

fn sanitize_font_name(name: &str) -> String {
    let out: String = name
        .chars()
        .filter_map(|ch| match ch {
            c if c.is_ascii_alphanumeric() || c == '-' => Some(c),
            ' ' => Some('-'),
            _ => None,
        })
        .collect();
    if out.is_empty() {
        "Helvetica".to_string()
    } else {
        out
    }
}

fn write_pdf_object<W: Write>(
    writer: &mut W,
    offset: &mut usize,
    offsets: &mut [usize],
    obj_id: usize,
    body: &[u8],
) -> io::Result<()> {
    if let Some(slot) = offsets.get_mut(obj_id) {
        *slot = *offset;
    }
    write_str(writer, &format!("{} 0 obj\n", obj_id), offset)?;
    write_bytes(writer, body, offset)?;
    write_bytes(writer, b"\nendobj\n", offset)?;
    Ok(())
}

fn write_bytes<W: Write>(writer: &mut W, data: &[u8], offset: &mut usize) -> io::Result<()> {
    writer.write_all(data)?;
    *offset += data.len();
    Ok(())
}

fn write_str<W: Write>(writer: &mut W, data: &str, offset: &mut usize) -> io::Result<()> {
    write_bytes(writer, data.as_bytes(), offset)
}

struct WinAnsiEncoded {
    text: String,
    replaced: usize,
}

fn encode_winansi_pdf_string(input: &str) -> WinAnsiEncoded {
    let mut out = String::new();
    let mut replaced = 0usize;
    for ch in input.chars() {
        let byte = match ch {
            '\u{0000}'..='\u{007F}' => ch as u8,
            '\u{00A0}'..='\u{00FF}' => ch as u8,
            // cp1252 extensions
            '\u{20AC}' => 0x80,
            '\u{201A}' => 0x82,
            '\u{0192}' => 0x83,
            '\u{201E}' => 0x84,
            '\u{2026}' => 0x85,
            '\u{2020}' => 0x86,
            '\u{2021}' => 0x87,
            '\u{02C6}' => 0x88,
            '\u{2030}' => 0x89,
            '\u{0160}' => 0x8A,
            '\u{2039}' => 0x8B,
            '\u{0152}' => 0x8C,
            '\u{017D}' => 0x8E,
            '\u{2018}' => 0x91,
            '\u{2019}' => 0x92,
            '\u{201C}' => 0x93,
            '\u{201D}' => 0x94,
            '\u{2022}' => 0x95,
            '\u{2013}' => 0x96,
            '\u{2014}' => 0x97,
            '\u{02DC}' => 0x98,
            '\u{2122}' => 0x99,
            '\u{0161}' => 0x9A,
            '\u{203A}' => 0x9B,
            '\u{0153}' => 0x9C,
            '\u{017E}' => 0x9E,
            '\u{0178}' => 0x9F,
            _ => {
                replaced += 1;
                b'?'
            }
        };

        match byte {
            b'\\' => out.push_str("\\\\"),
            b'(' => out.push_str("\\("),
            b')' => out.push_str("\\)"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b if b < 0x20 || b >= 0x7f => out.push_str(&format!("\\{:03o}", b)),
            b => out.push(b as char),
        }
    }

    WinAnsiEncoded {
        text: out,
        replaced,
    }
}

fn color_operands(color: Color) -> String {
    format!(
        "{} {} {}",
        fmt(color.r.clamp(0.0, 1.0)),
        fmt(color.g.clamp(0.0, 1.0)),
        fmt(color.b.clamp(0.0, 1.0))
    )
}

fn fmt(value: f32) -> String {
    if !value.is_finite() {
        return "0".to_string();
    }
    let fixed = I32F32::from_num(value);
    let scaled = (fixed * I32F32::from_num(1000)).round();
    let milli: i64 = scaled.to_num();
    format_milli(milli)
}

fn format_milli(milli: i64) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    let sign = if milli < 0 { "-" } else { "" };
    let abs = milli.abs();
    let int_part = abs / 1000;
    let frac_part = abs % 1000;
    if frac_part == 0 {
        format!("{}{}", sign, int_part)
    } else {
        let s = format!("{}{}.{:03}", sign, int_part, frac_part);
        s.trim_end_matches('0').to_string()
    }
}

fn fmt_pt(value: Pt) -> String {
    format_milli(value.to_milli_i64())
}
