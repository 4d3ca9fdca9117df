use std::collections::HashMap;
use std::sync::OnceLock;

/// Identifier used whenever a requested family is unknown, and the second
/// candidate in per-code-point fallback.
pub const DEFAULT_FONT_ID: &str = "NotoSans";

/// One typeface file in the bundled catalog.
#[derive(Debug, Clone, Copy)]
pub struct FontDefinition {
    pub id: &'static str,
    pub file: &'static str,
    pub aliases: &'static [&'static str],
    /// Standard PDF font used when neither this face nor the default face can
    /// be loaded from disk.
    pub builtin: &'static str,
}

/// Weight/style variants of one family. The base id is always present.
#[derive(Debug, Clone, Copy)]
struct FamilyGroup {
    base: &'static str,
    bold: Option<&'static str>,
    italic: Option<&'static str>,
    bold_italic: Option<&'static str>,
}

const fn def(
    id: &'static str,
    file: &'static str,
    builtin: &'static str,
    aliases: &'static [&'static str],
) -> FontDefinition {
    FontDefinition {
        id,
        file,
        aliases,
        builtin,
    }
}

// Order matters: the first definition claiming an alias owns it.
static CATALOG: &[FontDefinition] = &[
    def(
        "NotoSans",
        "NotoSans-Regular.ttf",
        "Helvetica",
        &["noto sans", "noto", "sans-serif", "system-ui", "default"],
    ),
    def("NotoSans-Bold", "NotoSans-Bold.ttf", "Helvetica-Bold", &[]),
    def("NotoSans-Italic", "NotoSans-Italic.ttf", "Helvetica-Oblique", &[]),
    def(
        "NotoSans-BoldItalic",
        "NotoSans-BoldItalic.ttf",
        "Helvetica-BoldOblique",
        &[],
    ),
    def(
        "Roboto",
        "Roboto-Regular.ttf",
        "Helvetica",
        &[
            "roboto",
            "arial",
            "helvetica",
            "helvetica neue",
            "inter",
            "segoe ui",
            "verdana",
            "tahoma",
        ],
    ),
    def("Roboto-Bold", "Roboto-Bold.ttf", "Helvetica-Bold", &["arial black"]),
    def("Roboto-Italic", "Roboto-Italic.ttf", "Helvetica-Oblique", &[]),
    def(
        "Roboto-BoldItalic",
        "Roboto-BoldItalic.ttf",
        "Helvetica-BoldOblique",
        &[],
    ),
    def(
        "OpenSans",
        "OpenSans-Regular.ttf",
        "Helvetica",
        &["open sans", "opensans"],
    ),
    def("OpenSans-Bold", "OpenSans-Bold.ttf", "Helvetica-Bold", &[]),
    def("OpenSans-Italic", "OpenSans-Italic.ttf", "Helvetica-Oblique", &[]),
    def("Lato", "Lato-Regular.ttf", "Helvetica", &["lato"]),
    def("Lato-Bold", "Lato-Bold.ttf", "Helvetica-Bold", &[]),
    def(
        "Montserrat",
        "Montserrat-Regular.ttf",
        "Helvetica",
        &["montserrat", "poppins", "raleway"],
    ),
    def("Montserrat-Bold", "Montserrat-Bold.ttf", "Helvetica-Bold", &[]),
    def(
        "Oswald",
        "Oswald-Regular.ttf",
        "Helvetica-Bold",
        &["oswald", "impact", "bebas neue", "anton"],
    ),
    def(
        "Merriweather",
        "Merriweather-Regular.ttf",
        "Times-Roman",
        &[
            "merriweather",
            "serif",
            "times",
            "times new roman",
            "georgia",
            "garamond",
        ],
    ),
    def("Merriweather-Bold", "Merriweather-Bold.ttf", "Times-Bold", &[]),
    def(
        "Merriweather-Italic",
        "Merriweather-Italic.ttf",
        "Times-Italic",
        &[],
    ),
    def(
        "Merriweather-BoldItalic",
        "Merriweather-BoldItalic.ttf",
        "Times-BoldItalic",
        &[],
    ),
    def(
        "PlayfairDisplay",
        "PlayfairDisplay-Regular.ttf",
        "Times-Roman",
        &["playfair display", "playfair"],
    ),
    def(
        "RobotoMono",
        "RobotoMono-Regular.ttf",
        "Courier",
        &[
            "roboto mono",
            "monospace",
            "courier",
            "courier new",
            "consolas",
            "menlo",
        ],
    ),
    def("RobotoMono-Bold", "RobotoMono-Bold.ttf", "Courier-Bold", &[]),
    def(
        "Pacifico",
        "Pacifico-Regular.ttf",
        "Times-Italic",
        &["pacifico", "cursive", "comic sans ms", "brush script mt"],
    ),
    def(
        "NotoSansSymbols2",
        "NotoSansSymbols2-Regular.ttf",
        "Helvetica",
        &["noto sans symbols", "noto sans symbols 2", "symbol"],
    ),
];

static FAMILY_GROUPS: &[FamilyGroup] = &[
    FamilyGroup {
        base: "NotoSans",
        bold: Some("NotoSans-Bold"),
        italic: Some("NotoSans-Italic"),
        bold_italic: Some("NotoSans-BoldItalic"),
    },
    FamilyGroup {
        base: "Roboto",
        bold: Some("Roboto-Bold"),
        italic: Some("Roboto-Italic"),
        bold_italic: Some("Roboto-BoldItalic"),
    },
    FamilyGroup {
        base: "OpenSans",
        bold: Some("OpenSans-Bold"),
        italic: Some("OpenSans-Italic"),
        bold_italic: None,
    },
    FamilyGroup {
        base: "Lato",
        bold: Some("Lato-Bold"),
        italic: None,
        bold_italic: None,
    },
    FamilyGroup {
        base: "Montserrat",
        bold: Some("Montserrat-Bold"),
        italic: None,
        bold_italic: None,
    },
    FamilyGroup {
        base: "Merriweather",
        bold: Some("Merriweather-Bold"),
        italic: Some("Merriweather-Italic"),
        bold_italic: Some("Merriweather-BoldItalic"),
    },
    FamilyGroup {
        base: "RobotoMono",
        bold: Some("RobotoMono-Bold"),
        italic: None,
        bold_italic: None,
    },
];

pub fn catalog() -> &'static [FontDefinition] {
    CATALOG
}

pub fn font_definition(id: &str) -> Option<&'static FontDefinition> {
    CATALOG.iter().find(|def| def.id == id)
}

fn alias_table() -> &'static HashMap<String, &'static str> {
    static TABLE: OnceLock<HashMap<String, &'static str>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut out = HashMap::new();
        for def in CATALOG {
            for key in std::iter::once(def.id).chain(def.aliases.iter().copied()) {
                let key = normalize_name(key);
                if key.is_empty() {
                    continue;
                }
                out.entry(key).or_insert(def.id);
            }
        }
        out
    })
}

fn group_of(id: &str) -> Option<&'static FamilyGroup> {
    FAMILY_GROUPS.iter().find(|g| {
        g.base == id || g.bold == Some(id) || g.italic == Some(id) || g.bold_italic == Some(id)
    })
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim()
        .trim_matches('"')
        .trim_matches('\'')
        .trim()
        .to_ascii_lowercase()
}

fn is_bold_like(weight: &str) -> bool {
    let weight = weight.trim().to_ascii_lowercase();
    if weight.contains("bold") {
        return true;
    }
    weight.parse::<f32>().map(|w| w >= 600.0).unwrap_or(false)
}

fn is_italic_like(style: &str) -> bool {
    let style = style.trim().to_ascii_lowercase();
    style.contains("italic") || style.contains("oblique")
}

/// Resolves a CSS-ish family/weight/style triple to a catalog id. Never fails:
/// unknown families land on [`DEFAULT_FONT_ID`].
pub fn resolve_font_id(family: &str, weight: &str, style: &str) -> &'static str {
    let first = family.split(',').next().unwrap_or_default();
    let key = normalize_name(first);
    let base = alias_table()
        .get(&key)
        .copied()
        .unwrap_or(DEFAULT_FONT_ID);

    let Some(group) = group_of(base) else {
        return base;
    };
    // A family naming a variant directly keeps that variant's own weight and style.
    let bold = is_bold_like(weight) || group.bold == Some(base) || group.bold_italic == Some(base);
    let italic =
        is_italic_like(style) || group.italic == Some(base) || group.bold_italic == Some(base);
    let variant = match (bold, italic) {
        (true, true) => group
            .bold_italic
            .or(group.bold)
            .or(group.italic),
        (true, false) => group.bold,
        (false, true) => group.italic,
        (false, false) => None,
    };
    variant.unwrap_or(group.base)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn variant_families_combine_with_requested_style() {
        assert_eq!(resolve_font_id("Roboto-Bold", "", "italic"), "Roboto-BoldItalic");
        assert_eq!(resolve_font_id("Roboto-Bold", "", ""), "Roboto-Bold");
        assert_eq!(resolve_font_id("Roboto-Italic", "700", ""), "Roboto-BoldItalic");
        assert_eq!(resolve_font_id("Roboto-BoldItalic", "normal", "normal"), "Roboto-BoldItalic");
    }

    #[test]
    fn aliases_are_case_and_quote_insensitive() {
        assert_eq!(resolve_font_id("Arial", "", ""), "Roboto");
        assert_eq!(resolve_font_id("'Open Sans'", "normal", "normal"), "OpenSans");
        assert_eq!(resolve_font_id("\"TIMES NEW ROMAN\"", "", ""), "Merriweather");
        assert_eq!(resolve_font_id("  roboto  ", "", ""), "Roboto");
    }

    #[test]
    fn identifiers_resolve_to_themselves() {
        for def in catalog() {
            assert_eq!(resolve_font_id(def.id, "", ""), def.id);
        }
    }

    #[test]
    fn unknown_family_falls_back_to_default() {
        assert_eq!(resolve_font_id("Wingdings Deluxe", "", ""), DEFAULT_FONT_ID);
        assert_eq!(resolve_font_id("", "", ""), DEFAULT_FONT_ID);
    }

    #[test]
    fn font_family_lists_use_first_entry() {
        assert_eq!(resolve_font_id("Lato, Arial, sans-serif", "", ""), "Lato");
    }

    #[test]
    fn weight_and_style_select_variants() {
        assert_eq!(resolve_font_id("Arial", "bold", ""), "Roboto-Bold");
        assert_eq!(resolve_font_id("Arial", "700", ""), "Roboto-Bold");
        assert_eq!(resolve_font_id("Arial", "600", ""), "Roboto-Bold");
        assert_eq!(resolve_font_id("Arial", "500", ""), "Roboto");
        assert_eq!(resolve_font_id("Arial", "", "italic"), "Roboto-Italic");
        assert_eq!(resolve_font_id("Arial", "", "oblique"), "Roboto-Italic");
        assert_eq!(resolve_font_id("Arial", "bolder", "italic"), "Roboto-BoldItalic");
    }

    #[test]
    fn missing_variants_use_most_specific_available() {
        assert_eq!(resolve_font_id("Open Sans", "bold", "italic"), "OpenSans-Bold");
        assert_eq!(resolve_font_id("Lato", "", "italic"), "Lato");
        assert_eq!(resolve_font_id("Pacifico", "bold", ""), "Pacifico");
    }

    #[test]
    fn every_variant_is_in_the_catalog() {
        for group in FAMILY_GROUPS {
            for id in [Some(group.base), group.bold, group.italic, group.bold_italic]
                .into_iter()
                .flatten()
            {
                assert!(font_definition(id).is_some(), "{id} missing from catalog");
            }
        }
    }
}
