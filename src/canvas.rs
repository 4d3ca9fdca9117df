use crate::types::{Color, Pt, Size};

/// Drawing command in page space: points, origin at the top-left corner, y
/// growing downwards. The PDF writer flips y when serializing.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SaveState,
    RestoreState,
    SetFillColor(Color),
    SetStrokeColor(Color),
    SetLineWidth(Pt),
    SetLineCap(u8),
    SetLineJoin(u8),
    SetMiterLimit(Pt),
    SetDash {
        pattern: Vec<Pt>,
        phase: Pt,
    },
    // Applies both fill and stroke alpha (ca/CA). Values outside 0..1 are clamped.
    SetOpacity {
        fill: f32,
        stroke: f32,
    },
    MoveTo {
        x: Pt,
        y: Pt,
    },
    LineTo {
        x: Pt,
        y: Pt,
    },
    CurveTo {
        x1: Pt,
        y1: Pt,
        x2: Pt,
        y2: Pt,
        x: Pt,
        y: Pt,
    },
    ClosePath,
    Fill,
    FillEvenOdd,
    Stroke,
    FillStroke,
    FillStrokeEvenOdd,
    /// Text in a standard PDF font, painted in stroke-only mode. `y` is the
    /// baseline.
    StrokeString {
        x: Pt,
        y: Pt,
        font: &'static str,
        size: Pt,
        text: String,
    },
    /// Rectangle outline with the current stroke settings.
    StrokeRect {
        x: Pt,
        y: Pt,
        width: Pt,
        height: Pt,
    },
}

/// Finished command list of one sheet.
#[derive(Debug, Clone)]
pub struct Page {
    pub size: Size,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
struct GraphicsState {
    fill_color: Color,
    stroke_color: Color,
    line_width: Pt,
    line_cap: u8,
    line_join: u8,
    fill_opacity: f32,
    stroke_opacity: f32,
}

impl Default for GraphicsState {
    fn default() -> Self {
        // PDF initial graphics state.
        Self {
            fill_color: Color::BLACK,
            stroke_color: Color::BLACK,
            line_width: Pt::from_f32(1.0),
            line_cap: 0,
            line_join: 0,
            fill_opacity: 1.0,
            stroke_opacity: 1.0,
        }
    }
}

/// Position in a canvas' command list, see [`Canvas::rollback`].
#[derive(Debug, Clone)]
pub struct CanvasMark {
    len: usize,
    state: GraphicsState,
    stack: Vec<GraphicsState>,
}

pub struct Canvas {
    page_size: Size,
    commands: Vec<Command>,
    state_stack: Vec<GraphicsState>,
    current_state: GraphicsState,
}

impl Canvas {
    pub fn new(page_size: Size) -> Self {
        Self {
            page_size,
            commands: Vec::new(),
            state_stack: Vec::new(),
            current_state: GraphicsState::default(),
        }
    }

    pub fn page_size(&self) -> Size {
        self.page_size
    }

    pub fn save_state(&mut self) {
        self.state_stack.push(self.current_state.clone());
        self.commands.push(Command::SaveState);
    }

    pub fn restore_state(&mut self) {
        if let Some(state) = self.state_stack.pop() {
            self.current_state = state;
            self.commands.push(Command::RestoreState);
        }
    }

    pub fn set_fill_color(&mut self, color: Color) {
        if self.current_state.fill_color == color {
            return;
        }
        self.current_state.fill_color = color;
        self.commands.push(Command::SetFillColor(color));
    }

    pub fn set_stroke_color(&mut self, color: Color) {
        if self.current_state.stroke_color == color {
            return;
        }
        self.current_state.stroke_color = color;
        self.commands.push(Command::SetStrokeColor(color));
    }

    pub fn set_line_width(&mut self, width: Pt) {
        let width = if width < Pt::ZERO { Pt::ZERO } else { width };
        if self.current_state.line_width == width {
            return;
        }
        self.current_state.line_width = width;
        self.commands.push(Command::SetLineWidth(width));
    }

    pub fn set_line_cap(&mut self, cap: u8) {
        if self.current_state.line_cap == cap {
            return;
        }
        self.current_state.line_cap = cap;
        self.commands.push(Command::SetLineCap(cap));
    }

    pub fn set_line_join(&mut self, join: u8) {
        if self.current_state.line_join == join {
            return;
        }
        self.current_state.line_join = join;
        self.commands.push(Command::SetLineJoin(join));
    }

    pub fn set_miter_limit(&mut self, limit: Pt) {
        let limit = if limit < Pt::ZERO { Pt::ZERO } else { limit };
        self.commands.push(Command::SetMiterLimit(limit));
    }

    pub fn set_dash(&mut self, pattern: Vec<Pt>, phase: Pt) {
        self.commands.push(Command::SetDash { pattern, phase });
    }

    pub fn set_opacity(&mut self, fill: f32, stroke: f32) {
        let fill = fill.clamp(0.0, 1.0);
        let stroke = stroke.clamp(0.0, 1.0);
        if self.current_state.fill_opacity == fill && self.current_state.stroke_opacity == stroke {
            return;
        }
        self.current_state.fill_opacity = fill;
        self.current_state.stroke_opacity = stroke;
        self.commands.push(Command::SetOpacity { fill, stroke });
    }

    pub fn move_to(&mut self, x: Pt, y: Pt) {
        self.commands.push(Command::MoveTo { x, y });
    }

    pub fn line_to(&mut self, x: Pt, y: Pt) {
        self.commands.push(Command::LineTo { x, y });
    }

    pub fn curve_to(&mut self, x1: Pt, y1: Pt, x2: Pt, y2: Pt, x: Pt, y: Pt) {
        self.commands.push(Command::CurveTo {
            x1,
            y1,
            x2,
            y2,
            x,
            y,
        });
    }

    pub fn close_path(&mut self) {
        self.commands.push(Command::ClosePath);
    }

    pub fn fill(&mut self) {
        self.commands.push(Command::Fill);
    }

    pub fn fill_evenodd(&mut self) {
        self.commands.push(Command::FillEvenOdd);
    }

    pub fn stroke(&mut self) {
        self.commands.push(Command::Stroke);
    }

    pub fn fill_stroke(&mut self) {
        self.commands.push(Command::FillStroke);
    }

    pub fn fill_stroke_evenodd(&mut self) {
        self.commands.push(Command::FillStrokeEvenOdd);
    }

    pub fn stroke_string(
        &mut self,
        x: Pt,
        y: Pt,
        font: &'static str,
        size: Pt,
        text: impl Into<String>,
    ) {
        self.commands.push(Command::StrokeString {
            x,
            y,
            font,
            size,
            text: text.into(),
        });
    }

    pub fn stroke_rect(&mut self, x: Pt, y: Pt, width: Pt, height: Pt) {
        self.commands.push(Command::StrokeRect {
            x,
            y,
            width,
            height,
        });
    }

    pub fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn mark(&self) -> CanvasMark {
        CanvasMark {
            len: self.commands.len(),
            state: self.current_state.clone(),
            stack: self.state_stack.clone(),
        }
    }

    /// Discards every command recorded since `mark`, restoring the tracked
    /// graphics state with it.
    pub fn rollback(&mut self, mark: CanvasMark) {
        self.commands.truncate(mark.len);
        self.current_state = mark.state;
        self.state_stack = mark.stack;
    }

    pub fn into_page(self) -> Page {
        Page {
            size: self.page_size,
            commands: self.commands,
        }
    }
}
