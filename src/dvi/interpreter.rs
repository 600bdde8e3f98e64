//! The DVI stack machine
//!
//! One dispatch loop serves both passes. The prescan pass only moves the
//! point and hands specials to [`PrescanData`]; the render pass draws
//! glyphs and rules on a [`RenderTarget`] and collects the page's text and
//! links. Characters of virtual fonts run the same loop over the macro's
//! bytes with the virtual font's scale.
//!
//! Positions are kept in spell units, 1/65536 of a pixel at 1200 dpi. The
//! page origin sits one inch right of and below the paper corner.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace, warn};
use serde::{Deserialize, Serialize};

use super::cursor::ByteCursor;
use super::document::{DviDocument, FontDefRecord};
use super::error::DviError;
use super::opcodes::{
    BOP, BOP_PARAMS_LEN, DOWN1, DOWN4, EOP, FNT1, FNT4, FNT_DEF1, FNT_DEF4, FNT_NUM_0, FNT_NUM_63,
    NOP, POP, POST, POST_POST, PRE, PUSH, PUT1, PUT4, PUT_RULE, RIGHT1, RIGHT4, SET1, SET4,
    SET_CHAR_0, SET_CHAR_127, SET_RULE, W0, W1, W4, X0, X1, X4, XXX1, XXX4, Y0, Y1, Y4, Z0, Z1, Z4,
};
use super::page::{Hyperlink, PageContent, PixelRect, SourceLink, TextBox};
use super::prescan::PrescanData;
use super::render_target::RenderTarget;
use super::special::{self, ColorCommand, Special};
use crate::fonts::definition::{FontId, SetCharKind};
use crate::fonts::glyph::Rgb;
use crate::fonts::pool::FontPool;

/// Spell units per inch
pub const SPELL_PER_INCH: i64 = 1200 << 16;

/// Default nesting limit for virtual font characters
pub const DEFAULT_VF_RECURSION_LIMIT: u32 = 32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Registers {
    pub h: i64,
    pub v: i64,
    pub w: i64,
    pub x: i64,
    pub y: i64,
    pub z: i64,
}

impl Registers {
    /// Registers at the beginning of a page
    #[must_use]
    pub fn page_origin() -> Self {
        Self {
            h: SPELL_PER_INCH,
            v: SPELL_PER_INCH,
            ..Self::default()
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Prescan,
    Render,
}

/// How a stack left unbalanced by EOP or POP is treated
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackPolicy {
    /// Log, remember as a page warning and carry on
    Warn,
    /// Abort the page with [`DviError::StackImbalance`]
    Error,
}

#[derive(Clone, Debug, PartialEq)]
pub struct InterpreterOptions {
    pub vf_recursion_limit: u32,
    pub prescan_stack_policy: StackPolicy,
    pub render_stack_policy: StackPolicy,
    /// Record (h, v) at every BOP and EOP
    pub record_trajectory: bool,
}

impl Default for InterpreterOptions {
    fn default() -> Self {
        Self {
            vf_recursion_limit: DEFAULT_VF_RECURSION_LIMIT,
            prescan_stack_policy: StackPolicy::Warn,
            render_stack_policy: StackPolicy::Error,
            record_trajectory: false,
        }
    }
}

impl InterpreterOptions {
    fn stack_policy(&self, mode: Mode) -> StackPolicy {
        match mode {
            Mode::Prescan => self.prescan_stack_policy,
            Mode::Render => self.render_stack_policy,
        }
    }
}

/// Diagnostics of one page pass
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PageTrace {
    pub trajectory: Vec<(i64, i64)>,
    pub warnings: Vec<String>,
}

/// What rendering a page produced besides pixels
#[derive(Clone, Debug, Default)]
pub struct RenderOutput {
    pub content: PageContent,
    pub trace: PageTrace,
}

/// State of one command stream: a page, or the macro of a virtual character
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub regs: Registers,
    font: Option<FontId>,
    font_table: Arc<HashMap<u32, FontId>>,
    /// Spell units per DVI unit of this stream
    dimconv: f64,
    /// Font used for characters set before any font command
    default_font: Option<FontId>,
    /// Depth of the shared stack when this stream started
    stack_base: usize,
    is_vfmacro: bool,
}

impl ExecutionContext {
    fn for_page(document: &DviDocument) -> Self {
        Self {
            regs: Registers::page_origin(),
            font: None,
            font_table: document.font_table().clone(),
            dimconv: document.dimconv(),
            default_font: None,
            stack_base: 0,
            is_vfmacro: false,
        }
    }
}

#[derive(Debug, Default)]
struct ColorStack {
    saved: Vec<Rgb>,
    current: Rgb,
}

impl ColorStack {
    fn apply(&mut self, command: ColorCommand) {
        match command {
            ColorCommand::Push(color) => {
                self.saved.push(self.current);
                self.current = color;
            }
            ColorCommand::Pop => match self.saved.pop() {
                Some(color) => self.current = color,
                None => warn!("color pop with empty color stack"),
            },
            ColorCommand::Set(color) => self.current = color,
        }
    }
}

/// Everything one interpretation pass carries besides the current stream
pub struct RenderContext<'a> {
    mode: Mode,
    pool: &'a mut FontPool,
    options: &'a InterpreterOptions,
    stack: Vec<Registers>,
    target: Option<&'a mut dyn RenderTarget>,
    prescan: Option<&'a mut PrescanData>,
    content: PageContent,
    colors: ColorStack,
    page: usize,
    spell_per_pixel: f64,
    depth: u32,
    word_boundary: bool,
    line_boundary: bool,
    href: Option<String>,
    source: Option<(u32, String)>,
    trace: PageTrace,
}

/// Walk one page for positions and specials
pub fn prescan_page(
    document: &DviDocument,
    pool: &mut FontPool,
    options: &InterpreterOptions,
    page: usize,
    data: &mut PrescanData,
) -> Result<PageTrace, DviError> {
    let mut context = RenderContext {
        prescan: Some(data),
        ..RenderContext::new(Mode::Prescan, pool, options, page, 1200.0)
    };
    context.run_page(document)?;
    Ok(context.trace)
}

/// Prescan every page
///
/// Errors confined to one page become warnings; fatal errors abort.
pub fn prescan_document(
    document: &DviDocument,
    pool: &mut FontPool,
    options: &InterpreterOptions,
) -> Result<PrescanData, DviError> {
    let mut data = PrescanData::with_pages(document.total_pages());
    for page in 0..document.total_pages() {
        match prescan_page(document, pool, options, page, &mut data) {
            Ok(trace) => data.warnings.extend(trace.warnings),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!("Prescan of page {} failed: {e}", page + 1);
                data.warnings.push(format!("page {}: {e}", page + 1));
            }
        }
    }
    debug!(
        "Prescan done: {} source anchors, {} anchors, {} bookmarks",
        data.source_anchors.len(),
        data.anchors.len(),
        data.bookmarks.len()
    );
    Ok(data)
}

/// Draw page `page` at `dpi` onto `target`
pub fn render_page(
    document: &DviDocument,
    pool: &mut FontPool,
    options: &InterpreterOptions,
    page: usize,
    dpi: f64,
    target: &mut dyn RenderTarget,
) -> Result<RenderOutput, DviError> {
    let mut context = RenderContext {
        target: Some(target),
        ..RenderContext::new(Mode::Render, pool, options, page, dpi)
    };
    context.run_page(document)?;
    Ok(RenderOutput {
        content: context.content,
        trace: context.trace,
    })
}

impl<'a> RenderContext<'a> {
    fn new(
        mode: Mode,
        pool: &'a mut FontPool,
        options: &'a InterpreterOptions,
        page: usize,
        dpi: f64,
    ) -> Self {
        Self {
            mode,
            pool,
            options,
            stack: Vec::new(),
            target: None,
            prescan: None,
            content: PageContent::default(),
            colors: ColorStack::default(),
            page,
            spell_per_pixel: 65536.0 * 1200.0 / dpi,
            depth: 0,
            word_boundary: false,
            line_boundary: false,
            href: None,
            source: None,
            trace: PageTrace::default(),
        }
    }

    fn run_page(&mut self, document: &DviDocument) -> Result<(), DviError> {
        let (start, end) = document
            .page_range(self.page)
            .ok_or(DviError::PageOutOfRange {
                page: self.page,
                total: document.total_pages(),
            })?;
        let mut context = ExecutionContext::for_page(document);
        let finished = self.execute(document.data(), start, end, &mut context)?;
        if !finished {
            return Err(DviError::malformed(format!(
                "page {} ends without EOP",
                self.page + 1
            )));
        }
        Ok(())
    }

    /// Run `data[start..end]`; returns true when the stream ended with EOP
    fn execute(
        &mut self,
        data: &[u8],
        start: usize,
        end: usize,
        ctx: &mut ExecutionContext,
    ) -> Result<bool, DviError> {
        let mut cursor = ByteCursor::with_window(data, start, end);
        while !cursor.at_end() {
            let offset = cursor.pos();
            let op = cursor.read_u8()?;
            trace!("{offset}: op {op}");
            match op {
                SET_CHAR_0..=SET_CHAR_127 => self.set_char(ctx, u32::from(op), true)?,
                SET1..=SET4 => {
                    let ch = cursor.read_uint(usize::from(op - SET1 + 1))?;
                    self.set_char(ctx, ch, true)?;
                }
                SET_RULE | PUT_RULE => {
                    let height = cursor.read_i32()?;
                    let width = cursor.read_i32()?;
                    self.draw_rule(ctx, height, width);
                    if op == SET_RULE {
                        ctx.regs.h = ctx.regs.h.saturating_add((ctx.dimconv * f64::from(width)) as i64);
                    }
                }
                PUT1..=PUT4 => {
                    let ch = cursor.read_uint(usize::from(op - PUT1 + 1))?;
                    self.set_char(ctx, ch, false)?;
                }
                NOP => {}
                BOP | EOP if ctx.is_vfmacro => {
                    return Err(DviError::IllegalCommand { opcode: op, offset });
                }
                BOP => {
                    cursor.skip(BOP_PARAMS_LEN)?;
                    ctx.regs = Registers::page_origin();
                    self.stack.clear();
                    self.colors = ColorStack::default();
                    self.record_position(ctx);
                }
                EOP => {
                    let left = self.stack.len().saturating_sub(ctx.stack_base);
                    if left > 0 {
                        self.stack_defect(format!(
                            "{left} PUSH without POP at end of page {}",
                            self.page + 1
                        ))?;
                    }
                    self.record_position(ctx);
                    return Ok(true);
                }
                PUSH => self.stack.push(ctx.regs),
                POP => {
                    if self.stack.len() > ctx.stack_base {
                        if let Some(regs) = self.stack.pop() {
                            ctx.regs = regs;
                        }
                    } else {
                        self.stack_defect(format!(
                            "POP with empty stack at offset {offset} on page {}",
                            self.page + 1
                        ))?;
                    }
                }
                RIGHT1..=RIGHT4 => {
                    let a = cursor.read_int(usize::from(op - RIGHT1 + 1))?;
                    let delta = (ctx.dimconv * f64::from(a)) as i64;
                    self.move_right(ctx, delta);
                }
                W0 => {
                    let w = ctx.regs.w;
                    self.move_right(ctx, w);
                }
                W1..=W4 => {
                    let a = cursor.read_int(usize::from(op - W0))?;
                    let w = (ctx.dimconv * f64::from(a)) as i64;
                    ctx.regs.w = w;
                    self.move_right(ctx, w);
                }
                X0 => {
                    let x = ctx.regs.x;
                    self.move_right(ctx, x);
                }
                X1..=X4 => {
                    let a = cursor.read_int(usize::from(op - X0))?;
                    let x = (ctx.dimconv * f64::from(a)) as i64;
                    ctx.regs.x = x;
                    self.move_right(ctx, x);
                }
                DOWN1..=DOWN4 => {
                    let a = cursor.read_int(usize::from(op - DOWN1 + 1))?;
                    let delta = (ctx.dimconv * f64::from(a)) as i64;
                    self.move_down(ctx, delta);
                }
                Y0 => {
                    let y = ctx.regs.y;
                    self.move_down(ctx, y);
                }
                Y1..=Y4 => {
                    let a = cursor.read_int(usize::from(op - Y0))?;
                    let y = (ctx.dimconv * f64::from(a)) as i64;
                    ctx.regs.y = y;
                    self.move_down(ctx, y);
                }
                Z0 => {
                    let z = ctx.regs.z;
                    self.move_down(ctx, z);
                }
                Z1..=Z4 => {
                    let a = cursor.read_int(usize::from(op - Z0))?;
                    let z = (ctx.dimconv * f64::from(a)) as i64;
                    ctx.regs.z = z;
                    self.move_down(ctx, z);
                }
                FNT_NUM_0..=FNT_NUM_63 => select_font(ctx, u32::from(op - FNT_NUM_0))?,
                FNT1..=FNT4 => {
                    let number = cursor.read_uint(usize::from(op - FNT1 + 1))?;
                    select_font(ctx, number)?;
                }
                XXX1..=XXX4 => {
                    let len = cursor.read_uint(usize::from(op - XXX1 + 1))? as usize;
                    let bytes = cursor.take(len)?;
                    self.special(ctx, &String::from_utf8_lossy(bytes));
                }
                FNT_DEF1..=FNT_DEF4 => {
                    // already known from the postamble
                    FontDefRecord::read(&mut cursor, op)?;
                }
                PRE | POST | POST_POST => {
                    return Err(DviError::IllegalCommand { opcode: op, offset });
                }
                _ => return Err(DviError::UnknownOpcode { opcode: op, offset }),
            }
        }
        Ok(false)
    }

    fn stack_defect(&mut self, message: String) -> Result<(), DviError> {
        match self.options.stack_policy(self.mode) {
            StackPolicy::Warn => {
                warn!("{message}");
                self.trace.warnings.push(message);
                Ok(())
            }
            StackPolicy::Error => Err(DviError::StackImbalance(message)),
        }
    }

    fn record_position(&mut self, ctx: &ExecutionContext) {
        if self.options.record_trajectory && !ctx.is_vfmacro {
            self.trace.trajectory.push((ctx.regs.h, ctx.regs.v));
        }
    }

    /// A third of an em of the current font, in spell units
    fn thin_space(&self, ctx: &ExecutionContext) -> Option<f64> {
        let font = self.pool.font(ctx.font?)?;
        Some(ctx.dimconv * f64::from(font.scaled_size) / 6.0)
    }

    fn move_right(&mut self, ctx: &mut ExecutionContext, delta: i64) {
        ctx.regs.h = ctx.regs.h.saturating_add(delta);
        if self.mode == Mode::Render && !ctx.is_vfmacro {
            if let Some(space) = self.thin_space(ctx) {
                let delta = delta as f64;
                if delta >= space || delta <= -4.0 * space {
                    self.word_boundary = true;
                }
            }
        }
    }

    fn move_down(&mut self, ctx: &mut ExecutionContext, delta: i64) {
        ctx.regs.v = ctx.regs.v.saturating_add(delta);
        if self.mode == Mode::Render && !ctx.is_vfmacro {
            if let Some(space) = self.thin_space(ctx) {
                if (delta as f64).abs() >= 10.0 * space {
                    self.line_boundary = true;
                }
            }
        }
    }

    fn to_pixel(&self, spell: i64) -> i32 {
        (spell as f64 / self.spell_per_pixel) as i32
    }

    fn draw_rule(&mut self, ctx: &ExecutionContext, height: i32, width: i32) {
        if self.mode != Mode::Render || height <= 0 || width <= 0 {
            return;
        }
        let round_up = |dvi: i32| {
            let spell = (ctx.dimconv * f64::from(dvi)) as i64;
            (spell as f64 / self.spell_per_pixel).ceil().max(1.0) as u32
        };
        let (width_px, height_px) = (round_up(width), round_up(height));
        let x = self.to_pixel(ctx.regs.h);
        let y = self
            .to_pixel(ctx.regs.v)
            .saturating_sub(height_px as i32)
            .saturating_add(1);
        let color = self.colors.current;
        if let Some(target) = self.target.as_deref_mut() {
            target.fill_rect(x, y, width_px, height_px, color);
        }
    }

    fn set_char(&mut self, ctx: &mut ExecutionContext, ch: u32, advance: bool) -> Result<(), DviError> {
        let id = ctx
            .font
            .or(ctx.default_font)
            .ok_or(DviError::NoFontSelected)?;
        let Ok(ch) = u8::try_from(ch) else {
            warn!("Character code {ch} out of range, skipped");
            return Ok(());
        };
        let kind = self.pool.font(id).map_or(SetCharKind::Empty, |f| f.set_char());
        match kind {
            SetCharKind::Empty => Ok(()),
            SetCharKind::Regular => {
                self.set_regular_char(ctx, id, ch, advance);
                Ok(())
            }
            SetCharKind::Virtual => self.set_virtual_char(ctx, id, ch, advance),
        }
    }

    fn set_regular_char(&mut self, ctx: &mut ExecutionContext, id: FontId, ch: u8, advance: bool) {
        let render = self.mode == Mode::Render;
        let color = self.colors.current;
        let (px, py) = (self.to_pixel(ctx.regs.h), self.to_pixel(ctx.regs.v));
        let Some(font) = self.pool.font_mut(id) else {
            return;
        };
        let dimconv = font.dimconv();
        let Some(glyph) = font.get_glyph(ch, render, color) else {
            return;
        };
        let advance_spell = (dimconv * f64::from(glyph.advance) + 0.5) as i64;
        let mut drawn = None;
        if render {
            if let Some(bitmap) = glyph.bitmap.as_ref().filter(|b| !b.is_empty()) {
                let rect = PixelRect {
                    x: px.saturating_sub(glyph.x2),
                    y: py.saturating_sub(glyph.y2),
                    width: bitmap.width(),
                    height: bitmap.height(),
                };
                if let Some(target) = self.target.as_deref_mut() {
                    target.draw_glyph(rect.x, rect.y, bitmap);
                }
                drawn = Some(rect);
            }
        }
        if let Some(rect) = drawn.filter(|_| !ctx.is_vfmacro) {
            self.record_glyph(rect, ch);
        }
        if advance {
            ctx.regs.h = ctx.regs.h.saturating_add(advance_spell);
        }
    }

    fn set_virtual_char(
        &mut self,
        ctx: &mut ExecutionContext,
        id: FontId,
        ch: u8,
        advance: bool,
    ) -> Result<(), DviError> {
        let Some(font) = self.pool.font(id) else {
            return Ok(());
        };
        let Some(macros) = font.macros().cloned() else {
            return Ok(());
        };
        let Some(m) = macros.get(ch) else {
            debug!("{} has no character {ch}", font.name);
            return Ok(());
        };
        let dimconv = font.dimconv();
        let advance_spell = (dimconv * f64::from(m.advance) + 0.5) as i64;

        // Prescan only needs the advance width
        if self.mode == Mode::Render {
            if self.depth >= self.options.vf_recursion_limit {
                return Err(DviError::RecursionLimitExceeded(self.options.vf_recursion_limit));
            }
            let mut inner = ExecutionContext {
                regs: Registers {
                    h: ctx.regs.h,
                    v: ctx.regs.v,
                    ..Registers::default()
                },
                font: None,
                font_table: font.vf_table().clone(),
                dimconv,
                default_font: font.first_font(),
                stack_base: self.stack.len(),
                is_vfmacro: true,
            };
            let bytes = macros.bytes(m);
            self.depth += 1;
            let result = self.execute(bytes, 0, bytes.len(), &mut inner);
            self.depth -= 1;
            self.stack.truncate(inner.stack_base);
            result?;
        }
        if advance {
            ctx.regs.h = ctx.regs.h.saturating_add(advance_spell);
        }
        Ok(())
    }

    fn record_glyph(&mut self, rect: PixelRect, ch: u8) {
        if self.line_boundary {
            self.content.append_separator('\n');
        } else if self.word_boundary {
            self.content.append_separator(' ');
        }
        self.line_boundary = false;
        self.word_boundary = false;
        self.content.text_boxes.push(TextBox {
            rect,
            text: char::from(ch).to_string(),
        });

        if let Some(target) = &self.href {
            match self.content.hyperlinks.last_mut() {
                Some(last) if last.target == *target && last.rect.same_line(&rect) => {
                    last.rect = last.rect.union(&rect);
                }
                _ => self.content.hyperlinks.push(Hyperlink {
                    rect,
                    target: target.clone(),
                }),
            }
        }
        if let Some((line, file)) = &self.source {
            match self.content.source_links.last_mut() {
                Some(last)
                    if last.line == *line && last.file == *file && last.rect.same_line(&rect) =>
                {
                    last.rect = last.rect.union(&rect);
                }
                _ => self.content.source_links.push(SourceLink {
                    rect,
                    line: *line,
                    file: file.clone(),
                }),
            }
        }
    }

    fn special(&mut self, ctx: &ExecutionContext, text: &str) {
        match self.mode {
            Mode::Prescan => {
                if let Some(data) = self.prescan.as_deref_mut().filter(|_| !ctx.is_vfmacro) {
                    data.record_special(text, self.page, ctx.regs.h, ctx.regs.v);
                }
            }
            Mode::Render => match special::classify(text) {
                Special::Color(command) => self.colors.apply(command),
                _ if ctx.is_vfmacro => {}
                Special::HtmlHref(target) => self.href = Some(target.to_string()),
                Special::HtmlAnchorEnd => self.href = None,
                Special::Source { line, file } => self.source = Some((line, file.to_string())),
                _ => {}
            },
        }
    }
}

fn select_font(ctx: &mut ExecutionContext, number: u32) -> Result<(), DviError> {
    let id = ctx
        .font_table
        .get(&number)
        .copied()
        .ok_or(DviError::FontNotDefined(number))?;
    ctx.font = Some(id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dvi::render_target::{DrawOp, RecordingTarget};
    use crate::test_utils::{install_font, test_pool, DviBuilder, TfmBuilder, VfBuilder};
    use tempfile::TempDir;

    fn tracing() -> InterpreterOptions {
        InterpreterOptions {
            record_trajectory: true,
            ..InterpreterOptions::default()
        }
    }

    /// cmr10 as a TFM font: 'A' half an em wide, 'B' a quarter
    fn cmr10_tfm() -> Vec<u8> {
        TfmBuilder::new(65, 66)
            .widths(&[0.0, 0.5, 0.25])
            .heights(&[0.0, 0.7])
            .char_info(65, 1, 1)
            .char_info(66, 2, 1)
            .build()
    }

    fn load(data: Vec<u8>, dir: &TempDir) -> (DviDocument, FontPool) {
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        for id in doc.font_table().values() {
            if pool.font(*id).unwrap().name == "cmr10" {
                install_font(&mut pool, *id, dir.path(), "cmr10.tfm", &cmr10_tfm());
            }
        }
        (doc, pool)
    }

    fn font_dimconv(pool: &FontPool, doc: &DviDocument) -> f64 {
        pool.font(doc.font_table()[&0]).unwrap().dimconv()
    }

    #[test]
    fn set_char_advances_by_scaled_width() {
        let dir = tempfile::tempdir().unwrap();
        let data = DviBuilder::new()
            .font(0, "cmr10", 0, 10 << 16, 10 << 16)
            .page(|p| p.fnt_num(0).set_char(b'A').put_char(b'B'))
            .build();
        let (doc, mut pool) = load(data, &dir);
        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &tracing(), 0, 100.0, &mut target).unwrap();
        let advance = (font_dimconv(&pool, &doc) * f64::from(1 << 19) + 0.5) as i64;
        assert_eq!(
            out.trace.trajectory,
            vec![
                (SPELL_PER_INCH, SPELL_PER_INCH),
                (SPELL_PER_INCH + advance, SPELL_PER_INCH)
            ]
        );
        assert_eq!(target.glyphs().count(), 2);
        assert_eq!(out.content.text(), "AB");
    }

    #[test]
    fn prescan_and_render_trajectories_agree() {
        let dir = tempfile::tempdir().unwrap();
        let data = DviBuilder::new()
            .font(0, "cmr10", 0, 10 << 16, 10 << 16)
            .page(|p| {
                p.fnt_num(0)
                    .push()
                    .right(3 << 16)
                    .set_char(b'A')
                    .pop()
                    .down(12 << 16)
                    .w(1 << 16)
                    .w0()
                    .set_rule(1 << 16, 5 << 16)
                    .set_char(b'B')
            })
            .page(|p| p.fnt_num(0).x(2 << 16).z(-(4 << 16)).set_char(b'A'))
            .build();
        let (doc, mut pool) = load(data, &dir);
        let options = tracing();
        for page in 0..2 {
            let mut data = PrescanData::with_pages(2);
            let prescan = prescan_page(&doc, &mut pool, &options, page, &mut data).unwrap();
            let mut target = RecordingTarget::new();
            let render = render_page(&doc, &mut pool, &options, page, 150.0, &mut target).unwrap();
            assert_eq!(prescan.trajectory, render.trace.trajectory);
            assert_eq!(prescan.trajectory.len(), 2);
        }
    }

    #[test]
    fn positions_saturate_at_the_edge_of_the_register_range() {
        // one unit is a centimeter, so 200 moves of i32::MAX leave the i64 range
        let data = DviBuilder::new()
            .units(100_000, 1)
            .page(|p| {
                let mut p = p.w(i32::MAX).y(i32::MIN);
                for _ in 0..200 {
                    p = p.right(i32::MAX).w0().y0();
                }
                p.set_rule(1, i32::MAX).x(i32::MAX).z(1)
            })
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let options = tracing();

        let mut data = PrescanData::with_pages(1);
        let prescan = prescan_page(&doc, &mut pool, &options, 0, &mut data).unwrap();
        let last = *prescan.trajectory.last().unwrap();
        assert_eq!(last.0, i64::MAX);
        assert!(last.1 < i64::MIN / 2);
        assert!(prescan_document(&doc, &mut pool, &options).is_ok());

        let mut target = RecordingTarget::new();
        let render = render_page(&doc, &mut pool, &options, 0, 100.0, &mut target).unwrap();
        assert_eq!(render.trace.trajectory, prescan.trajectory);
    }

    #[test]
    fn unbalanced_pop_depends_on_mode() {
        let data = DviBuilder::new().page(|p| p.push().pop().pop()).build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let options = InterpreterOptions::default();

        let mut target = RecordingTarget::new();
        let err = render_page(&doc, &mut pool, &options, 0, 100.0, &mut target).unwrap_err();
        assert!(matches!(err, DviError::StackImbalance(_)));

        let mut data = PrescanData::with_pages(1);
        let trace = prescan_page(&doc, &mut pool, &options, 0, &mut data).unwrap();
        assert_eq!(trace.warnings.len(), 1);
    }

    #[test]
    fn push_left_open_at_eop() {
        let data = DviBuilder::new().page(|p| p.push()).build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let options = InterpreterOptions {
            render_stack_policy: StackPolicy::Warn,
            ..InterpreterOptions::default()
        };
        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &options, 0, 100.0, &mut target).unwrap();
        assert_eq!(out.trace.warnings.len(), 1);
    }

    #[test]
    fn postamble_inside_page_is_fatal() {
        let data = DviBuilder::new().page(|p| p.raw(&[POST])).build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let mut target = RecordingTarget::new();
        let err = render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
            .unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            prescan_document(&doc, &mut pool, &InterpreterOptions::default()),
            Err(DviError::IllegalCommand { opcode: POST, .. })
        ));
    }

    #[test]
    fn unknown_opcode_and_undefined_font_are_page_errors() {
        let data = DviBuilder::new()
            .page(|p| p.raw(&[250]))
            .page(|p| p.fnt_num(7))
            .page(|p| p.nop())
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let options = InterpreterOptions::default();
        let mut target = RecordingTarget::new();
        assert!(matches!(
            render_page(&doc, &mut pool, &options, 0, 100.0, &mut target),
            Err(DviError::UnknownOpcode { opcode: 250, .. })
        ));
        assert!(matches!(
            render_page(&doc, &mut pool, &options, 1, 100.0, &mut target),
            Err(DviError::FontNotDefined(7))
        ));
        let data = prescan_document(&doc, &mut pool, &options).unwrap();
        assert_eq!(data.warnings.len(), 2);
    }

    #[test]
    fn char_without_font_is_an_error() {
        let data = DviBuilder::new().page(|p| p.set_char(b'A')).build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let mut target = RecordingTarget::new();
        let err = render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
            .unwrap_err();
        assert!(matches!(err, DviError::NoFontSelected));
    }

    #[test]
    fn empty_font_draws_nothing_and_stays_put() {
        let data = DviBuilder::new()
            .font(0, "missing", 0, 10 << 16, 10 << 16)
            .page(|p| p.fnt_num(0).set_char(b'A'))
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &tracing(), 0, 100.0, &mut target).unwrap();
        assert!(target.ops.is_empty());
        assert_eq!(out.trace.trajectory[1], (SPELL_PER_INCH, SPELL_PER_INCH));
    }

    #[test]
    fn rules_round_up_and_sit_on_the_baseline() {
        let data = DviBuilder::new()
            .page(|p| p.set_rule(1, 1 << 16).put_rule(-5, 1 << 16))
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let mut target = RecordingTarget::new();
        render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 72.27, &mut target).unwrap();
        // at 72.27 dpi one point is one pixel; one inch is 72 pixels
        let rects: Vec<_> = target.rects().cloned().collect();
        assert_eq!(
            rects,
            vec![DrawOp::Rect {
                x: 72,
                y: 72,
                width: 1,
                height: 1,
                color: Rgb::BLACK
            }]
        );
    }

    #[test]
    fn color_specials_apply_to_rules() {
        let data = DviBuilder::new()
            .page(|p| {
                p.special("color push rgb 1 0 0")
                    .put_rule(1 << 16, 1 << 16)
                    .special("color pop")
                    .put_rule(1 << 16, 1 << 16)
            })
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let mut target = RecordingTarget::new();
        render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target).unwrap();
        let colors: Vec<_> = target
            .rects()
            .map(|op| match op {
                DrawOp::Rect { color, .. } => *color,
                DrawOp::Glyph { .. } => unreachable!(),
            })
            .collect();
        assert_eq!(colors, vec![Rgb::new(0xFF, 0, 0), Rgb::BLACK]);
    }

    #[test]
    fn word_and_line_boundaries_become_separators() {
        let dir = tempfile::tempdir().unwrap();
        let data = DviBuilder::new()
            .font(0, "cmr10", 0, 10 << 16, 10 << 16)
            .page(|p| {
                p.fnt_num(0)
                    .set_char(b'A')
                    .right(1 << 16)
                    .set_char(b'B')
                    .right(4 << 16)
                    .set_char(b'A')
                    .down(20 << 16)
                    .set_char(b'B')
            })
            .build();
        let (doc, mut pool) = load(data, &dir);
        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
            .unwrap();
        assert_eq!(out.content.text(), "AB A\nB");
    }

    #[test]
    fn links_follow_href_specials() {
        let dir = tempfile::tempdir().unwrap();
        let data = DviBuilder::new()
            .font(0, "cmr10", 0, 10 << 16, 10 << 16)
            .page(|p| {
                p.fnt_num(0)
                    .special("html:<A href=\"#intro\">")
                    .set_char(b'A')
                    .set_char(b'B')
                    .special("html:</A>")
                    .set_char(b'A')
                    .special("src:7 doc.tex")
                    .set_char(b'B')
            })
            .build();
        let (doc, mut pool) = load(data, &dir);
        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
            .unwrap();
        assert_eq!(out.content.hyperlinks.len(), 1);
        let link = &out.content.hyperlinks[0];
        assert_eq!(link.target, "#intro");
        let first = out.content.text_boxes[0].rect;
        let second = out.content.text_boxes[1].rect;
        assert_eq!(link.rect, first.union(&second));
        assert_eq!(out.content.source_links.len(), 1);
        assert_eq!(out.content.source_links[0].line, 7);
        assert_eq!(out.content.source_links[0].file, "doc.tex");
    }

    #[test]
    fn prescan_records_source_anchor_with_v() {
        let data = DviBuilder::new()
            .page(|p| p.nop())
            .page(|p| p.down(100).special("src:42 foo.tex"))
            .page(|p| p.nop())
            .build();
        let mut pool = test_pool();
        let doc = DviDocument::parse(data, &mut pool).unwrap();
        let data = prescan_document(&doc, &mut pool, &InterpreterOptions::default()).unwrap();
        assert_eq!(data.source_anchors.len(), 1);
        let anchor = &data.source_anchors[0];
        assert_eq!((anchor.line, anchor.file.as_str(), anchor.page), (42, "foo.tex", 1));
        assert_eq!(anchor.v, SPELL_PER_INCH + (doc.dimconv() * 100.0) as i64);
    }

    fn load_virtual(dir: &TempDir, packet: &[u8], vf_width: i32) -> (DviDocument, FontPool) {
        let data = DviBuilder::new()
            .font(0, "vcmr", 0, 10 << 16, 10 << 16)
            .page(|p| p.fnt_num(0).set_char(b'A'))
            .build();
        let (doc, mut pool) = load(data, dir);
        let vf = VfBuilder::new()
            .font_def(0, "cmr10", 1 << 20, 10 << 20)
            .font_def(1, "vcmr", 1 << 20, 10 << 20)
            .char_packet(u32::from(b'A'), vf_width, packet)
            .build();
        let vf_id = doc.font_table()[&0];
        install_font(&mut pool, vf_id, dir.path(), "vcmr.vf", &vf);
        let sub = pool
            .ids()
            .find(|id| pool.font(*id).unwrap().name == "cmr10")
            .unwrap();
        install_font(&mut pool, sub, dir.path(), "cmr10.tfm", &cmr10_tfm());
        (doc, pool)
    }

    #[test]
    fn virtual_char_advances_by_macro_width() {
        let dir = tempfile::tempdir().unwrap();
        let vf_width = 3 << 18;
        let (doc, mut pool) = load_virtual(&dir, &[b'B'], vf_width);
        let expected = (font_dimconv(&pool, &doc) * f64::from(vf_width) + 0.5) as i64;
        let options = tracing();

        let mut target = RecordingTarget::new();
        let out = render_page(&doc, &mut pool, &options, 0, 100.0, &mut target).unwrap();
        assert_eq!(out.trace.trajectory[1].0, SPELL_PER_INCH + expected);
        assert_eq!(target.glyphs().count(), 1);
        // glyphs set inside macros are not page text
        assert!(out.content.text_boxes.is_empty());

        let mut data = PrescanData::with_pages(1);
        let prescan = prescan_page(&doc, &mut pool, &options, 0, &mut data).unwrap();
        assert_eq!(prescan.trajectory, out.trace.trajectory);
    }

    #[test]
    fn macro_stack_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let (doc, mut pool) = load_virtual(&dir, &[POP, b'B'], 1 << 20);
        let mut target = RecordingTarget::new();
        let err = render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
            .unwrap_err();
        assert!(matches!(err, DviError::StackImbalance(_)));
    }

    #[test]
    fn page_boundaries_inside_a_macro_are_illegal() {
        for op in [BOP, EOP] {
            let dir = tempfile::tempdir().unwrap();
            let (doc, mut pool) = load_virtual(&dir, &[PUSH, op, POP], 1 << 20);
            let mut target = RecordingTarget::new();
            let err =
                render_page(&doc, &mut pool, &InterpreterOptions::default(), 0, 100.0, &mut target)
                    .unwrap_err();
            assert!(matches!(err, DviError::IllegalCommand { opcode, .. } if opcode == op));
            assert!(err.is_fatal());
        }
    }

    #[test]
    fn self_referencing_virtual_font_hits_the_limit() {
        let dir = tempfile::tempdir().unwrap();
        // select local font 1, the virtual font itself, and set 'A' again
        let (doc, mut pool) = load_virtual(&dir, &[FNT_NUM_0 + 1, b'A'], 1 << 20);
        let options = InterpreterOptions {
            vf_recursion_limit: 5,
            ..InterpreterOptions::default()
        };
        let mut target = RecordingTarget::new();
        let err = render_page(&doc, &mut pool, &options, 0, 100.0, &mut target).unwrap_err();
        assert!(matches!(err, DviError::RecursionLimitExceeded(5)));
    }
}
