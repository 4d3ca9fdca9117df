use crate::font::{DEFAULT_FONT_ID, font_definition};
use crate::svg::PathSeg;
use rustybuzz::{Direction as HbDirection, Face as HbFace, UnicodeBuffer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use ttf_parser::GlyphId;

/// Answers "can this font draw this code point". Implementations must fail
/// closed: any lookup problem means `false`.
pub trait GlyphCoverage {
    fn covers(&self, font_id: &str, ch: char) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FontRun {
    pub font_id: &'static str,
    pub text: String,
}

/// Splits `text` into maximal runs that share one font. Each code point goes
/// to the preferred font if it covers it, else to the default font if that
/// covers it, else stays with the preferred font so nothing is dropped. Such
/// uncovered stretches are split off as runs of their own.
pub fn split_into_font_runs(
    text: &str,
    preferred: &'static str,
    coverage: &dyn GlyphCoverage,
) -> Vec<FontRun> {
    let mut runs: Vec<FontRun> = Vec::new();
    let mut current: Option<(&'static str, bool)> = None;
    let mut buf = String::new();
    let mut support_cache: HashMap<(&'static str, char), bool> = HashMap::new();
    let mut supports = |font_id: &'static str, ch: char| -> bool {
        *support_cache
            .entry((font_id, ch))
            .or_insert_with(|| coverage.covers(font_id, ch))
    };

    for ch in text.chars() {
        let chosen = if supports(preferred, ch) {
            (preferred, true)
        } else if preferred != DEFAULT_FONT_ID && supports(DEFAULT_FONT_ID, ch) {
            (DEFAULT_FONT_ID, true)
        } else {
            (preferred, false)
        };

        if current != Some(chosen) {
            if let Some((font_id, _)) = current {
                if !buf.is_empty() {
                    runs.push(FontRun {
                        font_id,
                        text: std::mem::take(&mut buf),
                    });
                }
            }
            current = Some(chosen);
        }
        buf.push(ch);
    }

    if let Some((font_id, _)) = current {
        if !buf.is_empty() {
            runs.push(FontRun { font_id, text: buf });
        }
    }
    runs
}

/// A shaped run converted to outline geometry. Coordinates are in points,
/// relative to the run's baseline origin, with y growing downwards.
#[derive(Debug, Clone)]
pub(crate) struct RunOutline {
    pub segs: Vec<PathSeg>,
    pub advance: f32,
    pub ascent: f32,
    pub line_height: f32,
}

#[derive(Debug)]
pub(crate) struct LoadedFont {
    pub(crate) id: &'static str,
    data: Vec<u8>,
}

impl LoadedFont {
    fn from_bytes(id: &'static str, data: Vec<u8>) -> Option<Self> {
        ttf_parser::Face::parse(&data, 0).ok()?;
        Some(Self { id, data })
    }

    pub(crate) fn supports_char(&self, ch: char) -> bool {
        let Ok(face) = ttf_parser::Face::parse(&self.data, 0) else {
            return false;
        };
        let symbol_subtable = select_symbol_subtable(&face);
        glyph_index_for_codepoint(&face, ch as u32, symbol_subtable).is_some()
    }

    /// Shapes `text` and collects its glyph outlines at `font_size`.
    pub(crate) fn outline_run(&self, text: &str, font_size: f32) -> Option<RunOutline> {
        if !font_size.is_finite() || font_size <= 0.0 {
            return None;
        }
        let face = ttf_parser::Face::parse(&self.data, 0).ok()?;
        let hb_face = HbFace::from_slice(&self.data, 0)?;
        let scale = font_size / face.units_per_em().max(1) as f32;

        let mut buffer = UnicodeBuffer::new();
        buffer.set_direction(detect_direction(text));
        buffer.push_str(text);
        let output = rustybuzz::shape(&hb_face, &[], buffer);
        let infos = output.glyph_infos();
        let positions = output.glyph_positions();
        if infos.is_empty() {
            return None;
        }

        let mut builder = OutlineCollector {
            segs: Vec::new(),
            scale,
            origin_x: 0.0,
            origin_y: 0.0,
        };
        let mut pen_x = 0.0f32;
        for (info, pos) in infos.iter().zip(positions.iter()) {
            builder.origin_x = pen_x + pos.x_offset as f32 * scale;
            builder.origin_y = -(pos.y_offset as f32) * scale;
            let gid = GlyphId(u16::try_from(info.glyph_id).unwrap_or(0));
            // Glyphs without contours (spaces) still advance the pen.
            let _ = face.outline_glyph(gid, &mut builder);
            pen_x += pos.x_advance as f32 * scale;
        }

        let ascent = face.ascender() as f32 * scale;
        let descent = face.descender() as f32 * scale;
        let line_gap = face.line_gap() as f32 * scale;
        Some(RunOutline {
            segs: builder.segs,
            advance: pen_x.max(0.0),
            ascent,
            line_height: (ascent - descent + line_gap).max(0.0),
        })
    }
}

struct OutlineCollector {
    segs: Vec<PathSeg>,
    scale: f32,
    origin_x: f32,
    origin_y: f32,
}

impl OutlineCollector {
    fn map(&self, x: f32, y: f32) -> (f32, f32) {
        (self.origin_x + x * self.scale, self.origin_y - y * self.scale)
    }
}

impl ttf_parser::OutlineBuilder for OutlineCollector {
    fn move_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.segs.push(PathSeg::MoveTo(x, y));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let (x, y) = self.map(x, y);
        self.segs.push(PathSeg::LineTo(x, y));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        let (x0, y0) = match self.segs.last() {
            Some(PathSeg::MoveTo(px, py))
            | Some(PathSeg::LineTo(px, py))
            | Some(PathSeg::CurveTo(_, _, _, _, px, py)) => (*px, *py),
            _ => self.map(x1, y1),
        };
        let (x1, y1) = self.map(x1, y1);
        let (x, y) = self.map(x, y);
        let c1 = (x0 + (2.0 / 3.0) * (x1 - x0), y0 + (2.0 / 3.0) * (y1 - y0));
        let c2 = (x + (2.0 / 3.0) * (x1 - x), y + (2.0 / 3.0) * (y1 - y));
        self.segs.push(PathSeg::CurveTo(c1.0, c1.1, c2.0, c2.1, x, y));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        let (x1, y1) = self.map(x1, y1);
        let (x2, y2) = self.map(x2, y2);
        let (x, y) = self.map(x, y);
        self.segs.push(PathSeg::CurveTo(x1, y1, x2, y2, x, y));
    }

    fn close(&mut self) {
        self.segs.push(PathSeg::Close);
    }
}

#[derive(Debug, Clone)]
enum FontSlot {
    Loaded(Arc<LoadedFont>),
    Unavailable,
}

/// Lazily opened font files keyed by catalog id. A key that is absent has not
/// been attempted yet; a failed attempt is remembered as `Unavailable` and never
/// retried. Concurrent first loads of the same id may both read the file; the
/// later insert wins and both results are equivalent.
#[derive(Debug, Default)]
pub struct FontStore {
    font_dir: Option<PathBuf>,
    slots: RwLock<HashMap<&'static str, FontSlot>>,
}

impl FontStore {
    pub fn new(font_dir: Option<PathBuf>) -> Self {
        Self {
            font_dir,
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn font_dir(&self) -> Option<&Path> {
        self.font_dir.as_deref()
    }

    pub(crate) fn load(&self, font_id: &str) -> Option<Arc<LoadedFont>> {
        if let Ok(slots) = self.slots.read() {
            match slots.get(font_id) {
                Some(FontSlot::Loaded(font)) => return Some(font.clone()),
                Some(FontSlot::Unavailable) => return None,
                None => {}
            }
        }

        let Some(def) = font_definition(font_id) else {
            log::warn!("font id {font_id:?} is not in the catalog");
            return None;
        };
        let slot = match self.open(def.id, def.file) {
            Ok(font) => FontSlot::Loaded(Arc::new(font)),
            Err(reason) => {
                log::warn!("font {} unavailable: {reason}", def.id);
                FontSlot::Unavailable
            }
        };
        let loaded = match &slot {
            FontSlot::Loaded(font) => Some(font.clone()),
            FontSlot::Unavailable => None,
        };
        if let Ok(mut slots) = self.slots.write() {
            slots.insert(def.id, slot);
        }
        loaded
    }

    /// True once a load for `font_id` has been attempted and failed.
    pub fn is_unavailable(&self, font_id: &str) -> bool {
        self.slots
            .read()
            .map(|slots| matches!(slots.get(font_id), Some(FontSlot::Unavailable)))
            .unwrap_or(false)
    }

    fn open(&self, id: &'static str, file: &str) -> Result<LoadedFont, String> {
        let Some(dir) = self.font_dir.as_ref() else {
            return Err("no font directory configured".to_string());
        };
        let path = dir.join(file);
        let data = fs::read(&path).map_err(|err| format!("{}: {err}", path.display()))?;
        LoadedFont::from_bytes(id, data)
            .ok_or_else(|| format!("{}: not a parseable font", path.display()))
    }
}

impl GlyphCoverage for FontStore {
    fn covers(&self, font_id: &str, ch: char) -> bool {
        self.load(font_id)
            .map(|font| font.supports_char(ch))
            .unwrap_or(false)
    }
}

fn select_symbol_subtable<'a>(
    face: &'a ttf_parser::Face<'a>,
) -> Option<ttf_parser::cmap::Subtable<'a>> {
    let cmap = face.tables().cmap?;
    let mut first = None;
    let mut symbol = None;
    for subtable in cmap.subtables {
        if subtable.is_unicode() {
            return None;
        }
        if first.is_none() {
            first = Some(subtable);
        }
        if subtable.platform_id == ttf_parser::name::PlatformId::Windows
            && subtable.encoding_id == 0
        {
            symbol = Some(subtable);
        }
    }
    symbol.or(first)
}

fn glyph_index_for_codepoint<'a>(
    face: &'a ttf_parser::Face<'a>,
    codepoint: u32,
    fallback: Option<ttf_parser::cmap::Subtable<'a>>,
) -> Option<GlyphId> {
    if let Some(ch) = char::from_u32(codepoint) {
        if let Some(id) = face.glyph_index(ch) {
            return Some(id);
        }
    }
    let subtable = fallback?;
    if let Some(id) = subtable.glyph_index(codepoint) {
        return Some(id);
    }
    subtable.glyph_index(codepoint + 0xF000)
}

fn detect_direction(text: &str) -> HbDirection {
    let rtl = text.chars().any(|ch| {
        matches!(
            ch as u32,
            0x0590..=0x08FF | 0xFB1D..=0xFDFF | 0xFE70..=0xFEFF | 0x1EE00..=0x1EEFF
        )
    });
    if rtl {
        HbDirection::RightToLeft
    } else {
        HbDirection::LeftToRight
    }
}

/// Writes the bundled test face (glyphs for space, `A`, `H` and `i`; `i` has a
/// quadratic contour) into a fresh directory under each of `files`.
#[cfg(test)]
pub(crate) fn test_font_dir(files: &[&str]) -> PathBuf {
    use std::sync::atomic::{AtomicUsize, Ordering};
    static NEXT: AtomicUsize = AtomicUsize::new(0);
    const FACE: &[u8] = include_bytes!("../testdata/sheetpress-test.ttf");

    let dir = std::env::temp_dir().join(format!(
        "sheetpress-fontdir-{}-{}",
        std::process::id(),
        NEXT.fetch_add(1, Ordering::Relaxed)
    ));
    fs::create_dir_all(&dir).expect("font dir");
    for file in files {
        fs::write(dir.join(file), FACE).expect("font file");
    }
    dir
}
