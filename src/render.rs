use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use cairo::{Context as CairoContext, Format, ImageSurface, LineCap, PdfSurface, SvgSurface};
use log::{debug, warn};
use pango::FontDescription;
use pangocairo::functions as pangocairo;

use crate::paper::{mm_to_pt, PaperSize};
use crate::palette::{Rgb, Shape};
use crate::plot::{Legend, LegendKey, TreePlot};

const FONT_FAMILY: &str = "Liberation Sans";
const PAGE_MARGIN_MM: f64 = 10.0;
const TITLE_FONT_PT: f64 = 14.0;
const LEGEND_TITLE_FONT_PT: f64 = 9.0;
const LEGEND_TEXT_FONT_PT: f64 = 8.0;
const LEGEND_ROW_GAP_PT: f64 = 3.0;
const LEGEND_BLOCK_GAP_PT: f64 = 12.0;
const SECTION_GAP_PT: f64 = 12.0;
const LABEL_GAP_PT: f64 = 2.0;
const BRANCH_LINE_WIDTH: f64 = 0.5;
const CLADE_BAR_WIDTH: f64 = 1.0;
// Fraction of a row the clade bar extends past its first and last tip.
const CLADE_BAR_OVERHANG: f64 = 0.4;
const PNG_DPI: f64 = 150.0;
const BRANCH_COLOR: (f64, f64, f64) = (0x33 as f64 / 255.0, 0x33 as f64 / 255.0, 0x33 as f64 / 255.0);
const BRANCH_LABEL_COLOR: (f64, f64, f64) = (0x6A as f64 / 255.0, 0x6A as f64 / 255.0, 0x6A as f64 / 255.0);
const TEXT_COLOR: (f64, f64, f64) = (0.0, 0.0, 0.0);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Pdf,
    Svg,
    Png,
}

impl OutputFormat {
    /// Pick the surface from the output extension; anything unrecognized is PDF.
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase());
        match extension.as_deref() {
            Some("svg") => OutputFormat::Svg,
            Some("png") => OutputFormat::Png,
            Some("pdf") => OutputFormat::Pdf,
            _ => {
                warn!("Output {:?} has no .pdf/.svg/.png extension; writing PDF", path);
                OutputFormat::Pdf
            }
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Point {
    x: f64,
    y: f64,
}

/// Page region in points.
#[derive(Clone, Copy, Debug)]
struct Area {
    x0: f64,
    y0: f64,
    width: f64,
    height: f64,
}

/// Maps tree units and tip rows onto the tree area.
#[derive(Clone, Copy, Debug)]
struct Transform {
    x0: f64,
    y0: f64,
    scale_x: f64,
    row_pitch: f64,
}

impl Transform {
    fn map_point(&self, x: f64, row: f64) -> Point {
        Point {
            x: self.x0 + x * self.scale_x,
            y: self.row_y(row),
        }
    }

    fn row_y(&self, row: f64) -> f64 {
        self.y0 + (row + 0.5) * self.row_pitch
    }
}

/// Write the plot to `output` on a page of `paper` size.
///
/// A partially written file is removed when drawing fails, unless it existed beforehand.
pub fn render_plot(output: &Path, paper: PaperSize, plot: &TreePlot) -> Result<()> {
    let format = OutputFormat::from_path(output);
    let width = paper.width_pt();
    let height = paper.height_pt();
    debug!("Rendering {:?} page of {:.1}x{:.1} pt", format, width, height);

    let existed = output.exists();
    let draw = |ctx: &CairoContext| draw_plot(ctx, width, height, plot);
    let result = match format {
        OutputFormat::Pdf => render_pdf(output, width, height, draw),
        OutputFormat::Svg => render_svg(output, width, height, draw),
        OutputFormat::Png => render_png(output, width, height, draw),
    };
    if result.is_err() {
        discard_partial_output(output, existed);
    }
    result
}

/// Remove an output file this run created; a file that was already there is left alone.
fn discard_partial_output(output: &Path, existed_before: bool) {
    if existed_before {
        warn!("{:?} existed before rendering and may now be incomplete", output);
        return;
    }
    if !output.exists() {
        return;
    }
    if let Err(err) = fs::remove_file(output) {
        warn!("Failed to remove partial output {:?}: {}", output, err);
    }
}

fn setup_context(ctx: &CairoContext) -> Result<()> {
    ctx.set_source_rgb(1.0, 1.0, 1.0);
    ctx.paint()?;
    ctx.set_source_rgb(BRANCH_COLOR.0, BRANCH_COLOR.1, BRANCH_COLOR.2);
    ctx.set_line_width(BRANCH_LINE_WIDTH);
    ctx.set_line_cap(LineCap::Square);
    Ok(())
}

fn render_pdf<F>(path: &Path, width: f64, height: f64, render: F) -> Result<()>
where
    F: FnOnce(&CairoContext) -> Result<()>,
{
    let surface =
        PdfSurface::new(width, height, path).context("Failed to create PDF surface")?;
    let ctx = CairoContext::new(&surface).context("Failed to create Cairo context")?;
    setup_context(&ctx)?;
    render(&ctx)?;
    surface.finish();
    Ok(())
}

fn render_svg<F>(path: &Path, width: f64, height: f64, render: F) -> Result<()>
where
    F: FnOnce(&CairoContext) -> Result<()>,
{
    let surface = SvgSurface::new(width, height, Some(path))
        .context("Failed to create SVG surface")?;
    let ctx = CairoContext::new(&surface).context("Failed to create Cairo context")?;
    setup_context(&ctx)?;
    render(&ctx)?;
    surface.finish();
    Ok(())
}

fn render_png<F>(path: &Path, width: f64, height: f64, render: F) -> Result<()>
where
    F: FnOnce(&CairoContext) -> Result<()>,
{
    let scale = PNG_DPI / 72.0;
    let surface = ImageSurface::create(
        Format::ARgb32,
        (width * scale).ceil() as i32,
        (height * scale).ceil() as i32,
    )
    .context("Failed to create image surface")?;
    let ctx = CairoContext::new(&surface).context("Failed to create Cairo context")?;
    ctx.scale(scale, scale);
    setup_context(&ctx)?;
    render(&ctx)?;
    drop(ctx);

    let mut file = fs::File::create(path).context("Failed to create PNG file")?;
    surface
        .write_to_png(&mut file)
        .context("Failed to write PNG")?;
    Ok(())
}

fn draw_plot(ctx: &CairoContext, page_width: f64, page_height: f64, plot: &TreePlot) -> Result<()> {
    let margin = mm_to_pt(PAGE_MARGIN_MM);
    let tip_font = mm_to_pt(plot.sizes.tip_label);
    let branch_font = mm_to_pt(plot.sizes.branch_label);
    let point_size = mm_to_pt(plot.sizes.tip_point);
    let legend_glyph = mm_to_pt(plot.sizes.legend_glyph).max(LEGEND_TEXT_FONT_PT);

    let (_, title_height) = draw_text_left_top(ctx, margin, margin, &plot.title, TITLE_FONT_PT, true, None)?;

    let legend_width = plot
        .legends
        .iter()
        .map(|legend| legend_width(ctx, legend, legend_glyph))
        .fold(0.0, f64::max);
    let top = margin + title_height + SECTION_GAP_PT;
    let legend_x = page_width - margin - legend_width;
    let tree_area = Area {
        x0: margin,
        y0: top,
        width: (legend_x - SECTION_GAP_PT - margin).max(1.0),
        height: (page_height - margin - top).max(1.0),
    };

    let transform = tree_transform(ctx, plot, tree_area, tip_font, point_size);
    draw_branches(ctx, plot, &transform)?;
    draw_branch_labels(ctx, plot, &transform, branch_font)?;
    draw_tips(ctx, plot, &transform, tip_font, point_size)?;
    draw_clade_brackets(ctx, plot, &transform, tip_font)?;

    let mut legend_y = top;
    for legend in &plot.legends {
        legend_y = draw_legend(ctx, legend, legend_x, legend_y, legend_glyph)? + LEGEND_BLOCK_GAP_PT;
    }
    Ok(())
}

/// Fit the tree, its tip labels and clade labels into `area`.
fn tree_transform(
    ctx: &CairoContext,
    plot: &TreePlot,
    area: Area,
    tip_font: f64,
    point_size: f64,
) -> Transform {
    let mut extents = vec![(plot.layout.width(), 0.0)];
    for tip in &plot.tips {
        let text = measure_text(ctx, &tip.label, tip_font, false).0;
        extents.push((plot.layout.x[tip.node], point_size / 2.0 + LABEL_GAP_PT + text));
    }
    for bracket in &plot.clades {
        let text = measure_text(ctx, &bracket.name, tip_font, false).0;
        extents.push((bracket.x, CLADE_BAR_WIDTH + LABEL_GAP_PT + text));
    }
    Transform {
        x0: area.x0,
        y0: area.y0,
        scale_x: horizontal_scale(area.width, &extents),
        row_pitch: area.height / plot.layout.tip_count.max(1) as f64,
    }
}

/// Largest scale at which every `(data_x, trailing_width)` item ends inside `available`.
fn horizontal_scale(available: f64, extents: &[(f64, f64)]) -> f64 {
    extents
        .iter()
        .filter(|(data_x, _)| *data_x > 0.0)
        .map(|(data_x, trailing)| ((available - trailing) / data_x).max(f64::EPSILON))
        .fold(None, |best: Option<f64>, scale| Some(best.map_or(scale, |b| b.min(scale))))
        .unwrap_or(available)
}

fn draw_branches(ctx: &CairoContext, plot: &TreePlot, transform: &Transform) -> Result<()> {
    ctx.set_source_rgb(BRANCH_COLOR.0, BRANCH_COLOR.1, BRANCH_COLOR.2);
    ctx.set_line_width(BRANCH_LINE_WIDTH);
    let layout = &plot.layout;
    for (id, node) in plot.tree.nodes.iter().enumerate() {
        if let Some(parent) = node.parent {
            let start = transform.map_point(layout.x[parent], layout.y[id]);
            let end = transform.map_point(layout.x[id], layout.y[id]);
            ctx.move_to(start.x, start.y);
            ctx.line_to(end.x, end.y);
        }
        if node.children.len() > 1 {
            let rows = node.children.iter().map(|&child| layout.y[child]);
            let min_row = rows.clone().fold(f64::INFINITY, f64::min);
            let max_row = rows.fold(f64::NEG_INFINITY, f64::max);
            let top = transform.map_point(layout.x[id], min_row);
            let bottom = transform.map_point(layout.x[id], max_row);
            ctx.move_to(top.x, top.y);
            ctx.line_to(bottom.x, bottom.y);
        }
    }
    ctx.stroke()?;
    Ok(())
}

fn draw_branch_labels(
    ctx: &CairoContext,
    plot: &TreePlot,
    transform: &Transform,
    font_pt: f64,
) -> Result<()> {
    let color = Some(BRANCH_LABEL_COLOR);
    for label in &plot.branch_labels {
        let anchor = transform.map_point(label.x, label.row);
        let (width, height) = measure_text(ctx, &label.text, font_pt, false);
        draw_text_left_top(
            ctx,
            anchor.x - width / 2.0,
            anchor.y - height - BRANCH_LINE_WIDTH,
            &label.text,
            font_pt,
            false,
            color,
        )?;
    }
    Ok(())
}

fn draw_tips(
    ctx: &CairoContext,
    plot: &TreePlot,
    transform: &Transform,
    font_pt: f64,
    point_size: f64,
) -> Result<()> {
    for tip in &plot.tips {
        let center = transform.map_point(plot.layout.x[tip.node], plot.layout.y[tip.node]);
        if let Some((color, shape)) = tip.marker {
            draw_marker(ctx, center, point_size, shape, color)?;
        }
        let x = center.x + point_size / 2.0 + LABEL_GAP_PT;
        let color = tip.label_color;
        draw_text_left_middle(ctx, x, center.y, &tip.label, font_pt, Some((color.r, color.g, color.b)))?;
    }
    Ok(())
}

fn draw_clade_brackets(
    ctx: &CairoContext,
    plot: &TreePlot,
    transform: &Transform,
    font_pt: f64,
) -> Result<()> {
    let overhang = transform.row_pitch * CLADE_BAR_OVERHANG;
    for bracket in &plot.clades {
        let top = transform.map_point(bracket.x, bracket.min_row);
        let bottom = transform.map_point(bracket.x, bracket.max_row);
        ctx.set_source_rgb(TEXT_COLOR.0, TEXT_COLOR.1, TEXT_COLOR.2);
        ctx.set_line_width(CLADE_BAR_WIDTH);
        ctx.set_line_cap(LineCap::Butt);
        ctx.move_to(top.x, top.y - overhang);
        ctx.line_to(bottom.x, bottom.y + overhang);
        ctx.stroke()?;
        ctx.set_line_cap(LineCap::Square);

        let middle = (top.y + bottom.y) / 2.0;
        draw_text_left_middle(
            ctx,
            top.x + CLADE_BAR_WIDTH + LABEL_GAP_PT,
            middle,
            &bracket.name,
            font_pt,
            None,
        )?;
    }
    Ok(())
}

fn legend_width(ctx: &CairoContext, legend: &Legend, glyph: f64) -> f64 {
    let title = measure_text(ctx, &legend.title, LEGEND_TITLE_FONT_PT, true).0;
    legend
        .entries
        .iter()
        .map(|entry| glyph + LABEL_GAP_PT + measure_text(ctx, &entry.label, LEGEND_TEXT_FONT_PT, false).0)
        .fold(title, f64::max)
}

/// Draw a legend block and return the y coordinate below it.
fn draw_legend(ctx: &CairoContext, legend: &Legend, x: f64, y: f64, glyph: f64) -> Result<f64> {
    let (_, title_height) = draw_text_left_top(ctx, x, y, &legend.title, LEGEND_TITLE_FONT_PT, true, None)?;
    let mut row_top = y + title_height + LEGEND_ROW_GAP_PT;
    for entry in &legend.entries {
        let center = Point {
            x: x + glyph / 2.0,
            y: row_top + glyph / 2.0,
        };
        match entry.key {
            LegendKey::Swatch(color) => {
                ctx.rectangle(x, row_top, glyph, glyph);
                ctx.set_source_rgba(color.r, color.g, color.b, color.a);
                ctx.fill()?;
            }
            LegendKey::Marker(color, shape) => draw_marker(ctx, center, glyph * 0.8, shape, color)?,
        }
        draw_text_left_middle(
            ctx,
            x + glyph + LABEL_GAP_PT,
            center.y,
            &entry.label,
            LEGEND_TEXT_FONT_PT,
            None,
        )?;
        row_top += glyph + LEGEND_ROW_GAP_PT;
    }
    Ok(row_top)
}

fn draw_marker(ctx: &CairoContext, center: Point, size: f64, shape: Shape, color: Rgb) -> Result<()> {
    let r = (size / 2.0).max(0.25);
    ctx.new_path();
    match shape {
        Shape::Circle | Shape::OpenCircle => {
            ctx.arc(center.x, center.y, r, 0.0, std::f64::consts::TAU);
        }
        Shape::Square | Shape::OpenSquare => {
            ctx.rectangle(center.x - r, center.y - r, 2.0 * r, 2.0 * r);
        }
        Shape::Triangle | Shape::OpenTriangle => {
            path_polygon(
                ctx,
                &[(0.0, -r), (r, 0.75 * r), (-r, 0.75 * r)],
                center,
            );
        }
        Shape::TriangleDown => {
            path_polygon(ctx, &[(0.0, r), (r, -0.75 * r), (-r, -0.75 * r)], center);
        }
        Shape::Diamond | Shape::OpenDiamond => {
            path_polygon(ctx, &[(0.0, -r), (r, 0.0), (0.0, r), (-r, 0.0)], center);
        }
        Shape::Plus => {
            ctx.move_to(center.x - r, center.y);
            ctx.line_to(center.x + r, center.y);
            ctx.move_to(center.x, center.y - r);
            ctx.line_to(center.x, center.y + r);
        }
        Shape::Cross => {
            ctx.move_to(center.x - r, center.y - r);
            ctx.line_to(center.x + r, center.y + r);
            ctx.move_to(center.x - r, center.y + r);
            ctx.line_to(center.x + r, center.y - r);
        }
    }
    ctx.set_source_rgba(color.r, color.g, color.b, color.a);
    if shape.is_filled() {
        ctx.fill()?;
    } else {
        ctx.set_line_width((r * 0.3).max(0.3));
        ctx.stroke()?;
    }
    Ok(())
}

fn path_polygon(ctx: &CairoContext, points: &[(f64, f64)], center: Point) {
    for (index, (dx, dy)) in points.iter().enumerate() {
        if index == 0 {
            ctx.move_to(center.x + dx, center.y + dy);
        } else {
            ctx.line_to(center.x + dx, center.y + dy);
        }
    }
    ctx.close_path();
}

fn text_layout(ctx: &CairoContext, text: &str, font_pt: f64, bold: bool) -> pango::Layout {
    let layout = pangocairo::create_layout(ctx);
    let mut font_desc = FontDescription::from_string(FONT_FAMILY);
    if bold {
        font_desc.set_weight(pango::Weight::Bold);
    }
    font_desc.set_absolute_size(font_pt * pango::SCALE as f64);
    layout.set_font_description(Some(&font_desc));
    layout.set_text(text);
    layout
}

/// Logical width and height of `text` in points.
fn measure_text(ctx: &CairoContext, text: &str, font_pt: f64, bold: bool) -> (f64, f64) {
    let layout = text_layout(ctx, text, font_pt, bold);
    let (width, height) = layout.size();
    (
        width as f64 / pango::SCALE as f64,
        height as f64 / pango::SCALE as f64,
    )
}

/// Draw text with its top-left corner at (x, y); returns the text extent.
fn draw_text_left_top(
    ctx: &CairoContext,
    x: f64,
    y: f64,
    text: &str,
    font_pt: f64,
    bold: bool,
    color: Option<(f64, f64, f64)>,
) -> Result<(f64, f64)> {
    if text.trim().is_empty() {
        return Ok((0.0, 0.0));
    }
    let layout = text_layout(ctx, text, font_pt, bold);
    let (width, height) = layout.size();
    let color = color.unwrap_or(TEXT_COLOR);
    ctx.set_source_rgb(color.0, color.1, color.2);
    ctx.move_to(x, y);
    pangocairo::show_layout(ctx, &layout);
    ctx.new_path();
    Ok((
        width as f64 / pango::SCALE as f64,
        height as f64 / pango::SCALE as f64,
    ))
}

/// Draw text starting at `x`, vertically centered on `y_middle`.
fn draw_text_left_middle(
    ctx: &CairoContext,
    x: f64,
    y_middle: f64,
    text: &str,
    font_pt: f64,
    color: Option<(f64, f64, f64)>,
) -> Result<()> {
    let height = measure_text(ctx, text, font_pt, false).1;
    draw_text_left_top(ctx, x, y_middle - height / 2.0, text, font_pt, false, color)?;
    Ok(())
}
