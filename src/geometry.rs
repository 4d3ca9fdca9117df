// 2D affine geometry for embedded markup.
//
// Matrices follow the SVG convention:
//
//   | a c e |
//   | b d f |
//   | 0 0 1 |
//
// `outer.mul(inner)` applies `inner` first. A transform list such as
// `translate(5) scale(2)` therefore reads outer-to-inner from left to right, and
// an element's cumulative matrix is `root * ... * parent * element`.

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f32,
    pub b: f32,
    pub c: f32,
    pub d: f32,
    pub e: f32,
    pub f: f32,
}

impl Default for Matrix {
    fn default() -> Self {
        Self::identity()
    }
}

impl Matrix {
    pub const fn identity() -> Self {
        Self {
            a: 1.0,
            b: 0.0,
            c: 0.0,
            d: 1.0,
            e: 0.0,
            f: 0.0,
        }
    }

    pub fn new(a: f32, b: f32, c: f32, d: f32, e: f32, f: f32) -> Self {
        Self { a, b, c, d, e, f }
    }

    pub fn translate(tx: f32, ty: f32) -> Self {
        Self::new(1.0, 0.0, 0.0, 1.0, tx, ty)
    }

    pub fn scale(sx: f32, sy: f32) -> Self {
        Self::new(sx, 0.0, 0.0, sy, 0.0, 0.0)
    }

    pub fn rotate(deg: f32) -> Self {
        let rad = deg.to_radians();
        let s = libm::sinf(rad);
        let c = libm::cosf(rad);
        Self::new(c, s, -s, c, 0.0, 0.0)
    }

    pub fn skew_x(deg: f32) -> Self {
        Self::new(1.0, 0.0, libm::tanf(deg.to_radians()), 1.0, 0.0, 0.0)
    }

    pub fn skew_y(deg: f32) -> Self {
        Self::new(1.0, libm::tanf(deg.to_radians()), 0.0, 1.0, 0.0, 0.0)
    }

    /// `self * other`: `other` is applied first.
    pub fn mul(self, other: Self) -> Self {
        Self {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    pub fn compose(outer: Self, inner: Self) -> Self {
        outer.mul(inner)
    }

    pub fn apply(self, x: f32, y: f32) -> (f32, f32) {
        (
            self.a * x + self.c * y + self.e,
            self.b * x + self.d * y + self.f,
        )
    }

    /// Uniform scale approximation, `sqrt(|det|)`. Used for stroke widths.
    pub fn area_scale(self) -> f32 {
        let det = self.a * self.d - self.b * self.c;
        libm::sqrtf(det.abs())
    }

    pub fn is_finite(&self) -> bool {
        [self.a, self.b, self.c, self.d, self.e, self.f]
            .iter()
            .all(|v| v.is_finite())
    }
}

/// Independent x/y scale factors: the lengths of the matrix column vectors.
pub fn extract_scale(m: Matrix) -> (f32, f32) {
    let sx = libm::sqrtf(m.a * m.a + m.b * m.b);
    let sy = libm::sqrtf(m.c * m.c + m.d * m.d);
    (sx, sy)
}

/// Parses an SVG `transform` list. Unknown functions, bad argument counts and
/// unterminated lists degrade to identity for the affected part.
pub fn parse_transform(input: &str) -> Matrix {
    let mut out = Matrix::identity();
    let mut s = input.trim();

    while !s.is_empty() {
        let Some(open) = s.find('(') else { break };
        let name = s[..open].trim_matches(|c: char| c.is_whitespace() || c == ',');
        let Some(close) = s[open + 1..].find(')') else {
            break;
        };
        let args = parse_number_list(&s[open + 1..open + 1 + close]);

        let m = if name.eq_ignore_ascii_case("translate") {
            match args.as_slice() {
                [tx] => Matrix::translate(*tx, 0.0),
                [tx, ty] => Matrix::translate(*tx, *ty),
                _ => Matrix::identity(),
            }
        } else if name.eq_ignore_ascii_case("scale") {
            match args.as_slice() {
                [s] => Matrix::scale(*s, *s),
                [sx, sy] => Matrix::scale(*sx, *sy),
                _ => Matrix::identity(),
            }
        } else if name.eq_ignore_ascii_case("rotate") {
            match args.as_slice() {
                [deg] => Matrix::rotate(*deg),
                [deg, cx, cy] => Matrix::translate(*cx, *cy)
                    .mul(Matrix::rotate(*deg))
                    .mul(Matrix::translate(-cx, -cy)),
                _ => Matrix::identity(),
            }
        } else if name.eq_ignore_ascii_case("skewx") {
            match args.as_slice() {
                [deg] => Matrix::skew_x(*deg),
                _ => Matrix::identity(),
            }
        } else if name.eq_ignore_ascii_case("skewy") {
            match args.as_slice() {
                [deg] => Matrix::skew_y(*deg),
                _ => Matrix::identity(),
            }
        } else if name.eq_ignore_ascii_case("matrix") {
            match args.as_slice() {
                [a, b, c, d, e, f] => Matrix::new(*a, *b, *c, *d, *e, *f),
                _ => Matrix::identity(),
            }
        } else {
            Matrix::identity()
        };

        // tan(90deg) and friends.
        if m.is_finite() {
            out = out.mul(m);
        }
        s = s[open + 1 + close + 1..].trim_start();
    }

    out
}

/// Own transform of a single element (identity when absent).
pub fn element_matrix(node: roxmltree::Node<'_, '_>) -> Matrix {
    node.attribute("transform")
        .map(parse_transform)
        .unwrap_or_default()
}

/// Composes the element's own transform with every ancestor's, up to the
/// document root. The root's transform is the outermost.
pub fn cumulative_matrix(node: roxmltree::Node<'_, '_>) -> Matrix {
    node.ancestors()
        .filter(|n| n.is_element())
        .fold(Matrix::identity(), |acc, n| element_matrix(n).mul(acc))
}

fn parse_number_list(input: &str) -> Vec<f32> {
    input
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<f32>().ok().filter(|v| v.is_finite()))
        .collect::<Option<Vec<_>>>()
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: (f32, f32), b: (f32, f32)) -> bool {
        (a.0 - b.0).abs() < 1e-4 && (a.1 - b.1).abs() < 1e-4
    }

    #[test]
    fn translate_moves_origin() {
        let m = parse_transform("translate(12.5, -3)");
        assert!(close(m.apply(0.0, 0.0), (12.5, -3.0)));
        let m = parse_transform("translate(7)");
        assert!(close(m.apply(0.0, 0.0), (7.0, 0.0)));
    }

    #[test]
    fn inner_scale_then_outer_translate() {
        let m = Matrix::compose(parse_transform("translate(5,0)"), parse_transform("scale(2)"));
        assert!(close(m.apply(1.0, 0.0), (7.0, 0.0)));
    }

    #[test]
    fn transform_list_reads_outer_to_inner() {
        let m = parse_transform("translate(5,0) scale(2)");
        assert!(close(m.apply(1.0, 0.0), (7.0, 0.0)));
        let m = parse_transform("scale(2), translate(5,0)");
        assert!(close(m.apply(1.0, 0.0), (12.0, 0.0)));
    }

    #[test]
    fn rotate_about_center() {
        let m = parse_transform("rotate(90 10 10)");
        assert!(close(m.apply(20.0, 10.0), (10.0, 20.0)));
        let m = parse_transform("rotate(90)");
        assert!(close(m.apply(1.0, 0.0), (0.0, 1.0)));
    }

    #[test]
    fn skew_and_matrix_primitives() {
        let m = parse_transform("skewX(45)");
        assert!(close(m.apply(0.0, 1.0), (1.0, 1.0)));
        let m = parse_transform("skewY(45)");
        assert!(close(m.apply(1.0, 0.0), (1.0, 1.0)));
        let m = parse_transform("matrix(1 0 0 1 3 4)");
        assert!(close(m.apply(0.0, 0.0), (3.0, 4.0)));
    }

    #[test]
    fn malformed_input_is_identity() {
        for raw in [
            "",
            "banana(1,2)",
            "translate(",
            "matrix(1,2,3)",
            "scale(a,b)",
            "rotate(1,2)",
            "translate(NaN, 4)",
        ] {
            assert_eq!(parse_transform(raw), Matrix::identity(), "input {raw:?}");
        }
    }

    #[test]
    fn malformed_tail_keeps_valid_prefix() {
        let m = parse_transform("translate(3,4) scale(");
        assert!(close(m.apply(0.0, 0.0), (3.0, 4.0)));
    }

    #[test]
    fn scale_factors_are_column_norms() {
        let (sx, sy) = extract_scale(parse_transform("scale(2,3)"));
        assert!((sx - 2.0).abs() < 1e-5);
        assert!((sy - 3.0).abs() < 1e-5);
        let (sx, sy) = extract_scale(parse_transform("rotate(30) scale(4)"));
        assert!((sx - 4.0).abs() < 1e-4);
        assert!((sy - 4.0).abs() < 1e-4);
    }

    #[test]
    fn cumulative_matrix_walks_ancestors() {
        let doc = roxmltree::Document::parse(
            r#"<svg transform="translate(100,0)"><g transform="translate(5,0)"><rect id="r" transform="scale(2)"/></g></svg>"#,
        )
        .expect("valid xml");
        let rect = doc
            .descendants()
            .find(|n| n.attribute("id") == Some("r"))
            .expect("rect");
        let m = cumulative_matrix(rect);
        assert!(close(m.apply(1.0, 0.0), (107.0, 0.0)));
    }
}
