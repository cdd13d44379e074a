//! Model comparison bar chart, rendered to SVG.

use super::aggregate::ModelBar;
use crate::error::{BenchError, Result};
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};
use std::fs;
use std::path::Path;

const WIDTH: u32 = 1400;
const HEIGHT: u32 = 900;
const TITLE_HEIGHT: u32 = 130;
const CAPTION_HEIGHT: u32 = 50;
const BAR_COLOR: RGBColor = RGBColor(0x4C, 0x72, 0xB0);

/// Vertical distance between the two lines of a value label, in percent.
const LABEL_LINE: f64 = 4.5;

/// Text around the chart.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotLabels {
    pub title: Vec<String>,
    pub caption: String,
}

fn plot_error(err: impl std::fmt::Display) -> BenchError {
    BenchError::Plot(err.to_string())
}

/// Draw one bar per model with its error bar and value label.
pub fn render_comparison(bars: &[ModelBar], labels: &PlotLabels, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| BenchError::io(parent, e))?;
    }

    let root = SVGBackend::new(path, (WIDTH, HEIGHT)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_error)?;

    let (title_area, rest) = root.split_vertically(TITLE_HEIGHT);
    let (chart_area, caption_area) = rest.split_vertically(HEIGHT - TITLE_HEIGHT - CAPTION_HEIGHT);

    let title_style = TextStyle::from(("sans-serif", 26).into_font().style(FontStyle::Bold))
        .pos(Pos::new(HPos::Center, VPos::Top));
    for (i, line) in labels.title.iter().enumerate() {
        title_area
            .draw_text(line, &title_style, ((WIDTH / 2) as i32, 15 + 36 * i as i32))
            .map_err(plot_error)?;
    }

    let caption_style = TextStyle::from(("sans-serif", 18).into_font().style(FontStyle::Italic))
        .pos(Pos::new(HPos::Center, VPos::Center));
    caption_area
        .draw_text(
            &labels.caption,
            &caption_style,
            ((WIDTH / 2) as i32, (CAPTION_HEIGHT / 2) as i32),
        )
        .map_err(plot_error)?;

    let count = bars.len().max(1) as i32;
    let mut chart = ChartBuilder::on(&chart_area)
        .margin(20)
        .x_label_area_size(90)
        .y_label_area_size(80)
        .build_cartesian_2d((0..count).into_segmented(), 0f64..100f64)
        .map_err(plot_error)?;

    let names: Vec<&str> = bars.iter().map(|b| b.display_name.as_str()).collect();
    let x_label = |value: &SegmentValue<i32>| match value {
        SegmentValue::CenterOf(i) => names.get(*i as usize).copied().unwrap_or("").to_string(),
        _ => String::new(),
    };

    chart
        .configure_mesh()
        .disable_x_mesh()
        .x_labels(bars.len().max(1))
        .x_label_formatter(&x_label)
        .x_label_style(("sans-serif", 16))
        .y_label_style(("sans-serif", 16))
        .y_desc("Score (%)")
        .x_desc("Candidate Model")
        .axis_desc_style(("sans-serif", 20).into_font().style(FontStyle::Bold))
        .draw()
        .map_err(plot_error)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, bar)| {
            let i = i as i32;
            let mut rect = Rectangle::new(
                [
                    (SegmentValue::Exact(i), 0.0),
                    (SegmentValue::Exact(i + 1), bar.average_percentage.clamp(0.0, 100.0)),
                ],
                BAR_COLOR.mix(0.85).filled(),
            );
            rect.set_margin(0, 0, 40, 40);
            rect
        }))
        .map_err(plot_error)?;

    chart
        .draw_series(bars.iter().enumerate().map(|(i, bar)| {
            let avg = bar.average_percentage;
            let std = bar.std_dev_percentage;
            ErrorBar::new_vertical(
                SegmentValue::CenterOf(i as i32),
                (avg - std).max(0.0),
                avg,
                (avg + std).min(100.0),
                BLACK.stroke_width(2),
                20,
            )
        }))
        .map_err(plot_error)?;

    chart
        .draw_series(
            bars.iter()
                .enumerate()
                .flat_map(|(i, bar)| value_label(i as i32, bar)),
        )
        .map_err(plot_error)?;

    root.present().map_err(plot_error)?;
    Ok(())
}

/// `{avg:.1}%` over `(±{std:.1})`, above the error bar, or inside the bar
/// when there is no room above.
fn value_label(i: i32, bar: &ModelBar) -> [Text<'static, (SegmentValue<i32>, f64), String>; 2] {
    let avg = bar.average_percentage;
    let std = bar.std_dev_percentage;
    let above = avg + std + 2.0;

    let (color, vpos, upper_y, lower_y) = if above < 95.0 {
        (&BLACK, VPos::Bottom, above + LABEL_LINE, above)
    } else {
        (&WHITE, VPos::Top, avg - 2.0, avg - 2.0 - LABEL_LINE)
    };

    let style = TextStyle::from(("sans-serif", 18).into_font().style(FontStyle::Bold))
        .color(color)
        .pos(Pos::new(HPos::Center, vpos));

    [
        Text::new(
            format!("{:.1}%", avg),
            (SegmentValue::CenterOf(i), upper_y),
            style.clone(),
        ),
        Text::new(format!("(±{:.1})", std), (SegmentValue::CenterOf(i), lower_y), style),
    ]
}
