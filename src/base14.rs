// Built-in metrics for the standard PDF fonts. Used as the last measurement
// source when no font file can be loaded; text measured this way is drawn with
// the viewer's own copy of the font.

const HELVETICA: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

const HELVETICA_BOLD: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278,
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556,
    333, 333, 584, 584, 584, 611, 975,
    722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833,
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611,
    333, 278, 333, 584, 556, 333,
    556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889,
    611, 611, 611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500,
    389, 280, 389, 584,
];

const TIMES_ROMAN: [u16; 95] = [
    250, 333, 408, 500, 500, 833, 778, 180, 333, 333, 500, 564, 250, 333, 250, 278,
    500, 500, 500, 500, 500, 500, 500, 500, 500, 500,
    278, 278, 564, 564, 564, 444, 921,
    722, 667, 667, 722, 611, 556, 722, 722, 333, 389, 722, 611, 889,
    722, 722, 556, 722, 667, 556, 611, 722, 722, 944, 722, 722, 611,
    333, 278, 333, 469, 500, 333,
    444, 500, 444, 500, 444, 333, 500, 500, 278, 278, 500, 278, 778,
    500, 500, 500, 500, 333, 389, 278, 500, 500, 722, 500, 500, 444,
    480, 200, 480, 541,
];

#[derive(Debug, Clone, Copy)]
enum Widths {
    Table(&'static [u16; 95]),
    Fixed(u16),
}

/// Advance and vertical metrics of one standard font, in 1/1000 em.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuiltinMetrics {
    pub name: &'static str,
    widths: Widths,
    missing_width: u16,
    pub ascent: i16,
    pub descent: i16,
}

impl BuiltinMetrics {
    fn advance_units(&self, ch: char) -> u16 {
        match self.widths {
            Widths::Fixed(w) => w,
            Widths::Table(table) => {
                let code = ch as u32;
                if (32..=126).contains(&code) {
                    table[(code - 32) as usize]
                } else {
                    self.missing_width
                }
            }
        }
    }

    pub fn text_width(&self, text: &str, font_size: f32) -> f32 {
        let units: u32 = text.chars().map(|ch| self.advance_units(ch) as u32).sum();
        units as f32 * font_size / 1000.0
    }

    pub fn ascent(&self, font_size: f32) -> f32 {
        self.ascent as f32 * font_size / 1000.0
    }

    pub fn line_height(&self, font_size: f32) -> f32 {
        (self.ascent as i32 - self.descent as i32) as f32 * font_size / 1000.0
    }
}

const STANDARD_NAMES: [&str; 12] = [
    "Helvetica",
    "Helvetica-Bold",
    "Helvetica-Oblique",
    "Helvetica-BoldOblique",
    "Times-Roman",
    "Times-Bold",
    "Times-Italic",
    "Times-BoldItalic",
    "Courier",
    "Courier-Bold",
    "Courier-Oblique",
    "Courier-BoldOblique",
];

/// Metrics for a standard font name; anything unknown measures as Helvetica.
pub(crate) fn builtin_metrics(name: &str) -> BuiltinMetrics {
    let name = STANDARD_NAMES
        .iter()
        .copied()
        .find(|n| *n == name)
        .unwrap_or("Helvetica");
    let (widths, missing_width, ascent, descent) = match name {
        "Helvetica-Bold" | "Helvetica-BoldOblique" => {
            (Widths::Table(&HELVETICA_BOLD), 556, 718, -207)
        }
        "Times-Roman" | "Times-Italic" => (Widths::Table(&TIMES_ROMAN), 500, 683, -217),
        "Times-Bold" | "Times-BoldItalic" => (Widths::Table(&TIMES_ROMAN), 500, 676, -205),
        "Courier" | "Courier-Oblique" => (Widths::Fixed(600), 600, 629, -157),
        "Courier-Bold" | "Courier-BoldOblique" => (Widths::Fixed(600), 600, 626, -142),
        _ => (Widths::Table(&HELVETICA), 556, 718, -207),
    };
    BuiltinMetrics {
        name,
        widths,
        missing_width,
        ascent,
        descent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_widths_match_afm() {
        let m = builtin_metrics("Helvetica");
        assert!((m.text_width("Hi", 1000.0) - 944.0).abs() < 0.01);
        assert!((m.text_width(" ", 10.0) - 2.78).abs() < 1e-4);
        assert!((m.line_height(10.0) - 9.25).abs() < 1e-4);
    }

    #[test]
    fn courier_is_monospaced() {
        let m = builtin_metrics("Courier");
        assert_eq!(m.text_width("iiii", 10.0), m.text_width("WWWW", 10.0));
        assert!((m.text_width("ab", 10.0) - 12.0).abs() < 1e-4);
    }

    #[test]
    fn unknown_names_measure_as_helvetica() {
        let m = builtin_metrics("NotAFont");
        assert_eq!(m.name, "Helvetica");
        assert!((m.text_width("\u{2605}", 1000.0) - 556.0).abs() < 0.01);
    }
}
