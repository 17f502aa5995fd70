//! Charts for the PDF report.
//!
//! Shapes are drawn as SVG; text is collected separately as [`ChartLabel`]s
//! so the PDF writer can typeset it with its own fonts. Every chart returns
//! `Ok(None)` when there is not enough data to draw it and the caller renders
//! a placeholder instead.

use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, VPos};
use plotters_backend::{
    BackendColor, BackendCoord, BackendStyle, BackendTextStyle, DrawingErrorKind,
};

use crate::analyzers::types::{
    BreakdownEntry, DailyObservation, ForecastPoint, HourlyUsage, PointKind, TrendPoint,
};

pub const CHART_WIDTH: u32 = 800;
pub const CHART_HEIGHT: u32 = 420;

type ChartResult = Result<Option<Chart>, Box<dyn std::error::Error>>;

const PRIMARY: RGBColor = RGBColor(33, 150, 243);
const ACCENT: RGBColor = RGBColor(255, 152, 0);
const ALERT: RGBColor = RGBColor(229, 57, 53);
const MUTED: RGBColor = RGBColor(158, 158, 158);

const SLICE_COLORS: [RGBColor; 7] = [
    RGBColor(33, 150, 243),
    RGBColor(255, 152, 0),
    RGBColor(76, 175, 80),
    RGBColor(156, 39, 176),
    RGBColor(0, 188, 212),
    RGBColor(255, 193, 7),
    RGBColor(158, 158, 158),
];

/// Devices shown individually in the donut; the rest are merged into "Other".
const MAX_SLICES: usize = 6;

/// A piece of chart text, positioned in chart pixels (origin top left).
#[derive(Debug, Clone, PartialEq)]
pub struct ChartLabel {
    pub text: String,
    /// Start of the baseline.
    pub x: f64,
    pub y: f64,
    /// Font size in pixels.
    pub size: f64,
    /// Counter-clockwise rotation in degrees.
    pub angle: f64,
    pub bold: bool,
    pub color: (u8, u8, u8),
}

impl ChartLabel {
    fn place<S: BackendTextStyle>(text: &str, style: &S, pos: BackendCoord, width: f64) -> Self {
        // plotters writes SVG font sizes as size / 1.24
        let size = style.size() / 1.24;
        let angle = match style.transform() {
            FontTransform::None => 0.0,
            FontTransform::Rotate90 => -90.0,
            FontTransform::Rotate180 => 180.0,
            FontTransform::Rotate270 => 90.0,
        };
        let anchor = style.anchor();
        let shift = match anchor.h_pos {
            HPos::Left => 0.0,
            HPos::Center => width / 2.0,
            HPos::Right => width,
        };
        let drop = match anchor.v_pos {
            VPos::Top => 0.76 * size,
            VPos::Center => 0.25 * size,
            VPos::Bottom => -0.25 * size,
        };

        // Pixel y grows downwards: text runs along (cos, -sin) and its
        // baseline sits along (sin, cos) from the anchor.
        let (sin, cos) = f64::to_radians(angle).sin_cos();
        let color = style.color();
        Self {
            text: text.to_string(),
            x: f64::from(pos.0) - shift * cos + drop * sin,
            y: f64::from(pos.1) + shift * sin + drop * cos,
            size,
            angle,
            bold: matches!(style.style(), FontStyle::Bold),
            color: color.rgb,
        }
    }
}

/// Shape-only SVG plus the text to typeset over it.
#[derive(Debug, Clone)]
pub struct Chart {
    pub svg: String,
    pub labels: Vec<ChartLabel>,
}

impl Chart {
    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(|l| l.text.as_str())
    }
}

/// SVG backend that keeps text out of the SVG and records it as labels.
struct LabelledSvg<'a> {
    svg: SVGBackend<'a>,
    labels: &'a mut Vec<ChartLabel>,
}

type BackendResult = Result<(), DrawingErrorKind<std::io::Error>>;

impl DrawingBackend for LabelledSvg<'_> {
    type ErrorType = std::io::Error;

    fn get_size(&self) -> (u32, u32) {
        self.svg.get_size()
    }

    fn ensure_prepared(&mut self) -> BackendResult {
        self.svg.ensure_prepared()
    }

    fn present(&mut self) -> BackendResult {
        self.svg.present()
    }

    fn draw_pixel(&mut self, point: BackendCoord, color: BackendColor) -> BackendResult {
        self.svg.draw_pixel(point, color)
    }

    fn draw_line<S: BackendStyle>(
        &mut self,
        from: BackendCoord,
        to: BackendCoord,
        style: &S,
    ) -> BackendResult {
        self.svg.draw_line(from, to, style)
    }

    fn draw_rect<S: BackendStyle>(
        &mut self,
        upper_left: BackendCoord,
        bottom_right: BackendCoord,
        style: &S,
        fill: bool,
    ) -> BackendResult {
        self.svg.draw_rect(upper_left, bottom_right, style, fill)
    }

    fn draw_path<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        path: I,
        style: &S,
    ) -> BackendResult {
        self.svg.draw_path(path, style)
    }

    fn draw_circle<S: BackendStyle>(
        &mut self,
        center: BackendCoord,
        radius: u32,
        style: &S,
        fill: bool,
    ) -> BackendResult {
        self.svg.draw_circle(center, radius, style, fill)
    }

    fn fill_polygon<S: BackendStyle, I: IntoIterator<Item = BackendCoord>>(
        &mut self,
        vert: I,
        style: &S,
    ) -> BackendResult {
        self.svg.fill_polygon(vert, style)
    }

    fn draw_text<TStyle: BackendTextStyle>(
        &mut self,
        text: &str,
        style: &TStyle,
        pos: BackendCoord,
    ) -> BackendResult {
        if style.color().alpha == 0.0 || text.trim().is_empty() {
            return Ok(());
        }
        let ((min_x, _), (max_x, _)) = style
            .layout_box(text)
            .map_err(|e| DrawingErrorKind::FontError(Box::new(e)))?;
        self.labels
            .push(ChartLabel::place(text, style, pos, f64::from(max_x - min_x)));
        Ok(())
    }

    fn blit_bitmap(&mut self, pos: BackendCoord, size: (u32, u32), src: &[u8]) -> BackendResult {
        self.svg.blit_bitmap(pos, size, src)
    }
}

fn canvas<'a>(
    svg: &'a mut String,
    labels: &'a mut Vec<ChartLabel>,
) -> DrawingArea<LabelledSvg<'a>, Shift> {
    LabelledSvg {
        svg: SVGBackend::with_string(svg, (CHART_WIDTH, CHART_HEIGHT)),
        labels,
    }
    .into_drawing_area()
}

fn y_ceiling(max: f64) -> f64 {
    if max > 0.0 { max * 1.1 } else { 1.0 }
}

/// Consumption per trend bucket.
pub fn trend_chart(points: &[TrendPoint]) -> ChartResult {
    if points.len() < 2 {
        return Ok(None);
    }

    let mut svg = String::new();
    let mut labels = Vec::new();
    {
        let root = canvas(&mut svg, &mut labels);
        root.fill(&WHITE)?;

        let n = points.len() as i32;
        let y_max = y_ceiling(points.iter().map(|p| p.energy).fold(0.0, f64::max));

        let mut chart = ChartBuilder::on(&root)
            .caption("Energy consumption trend", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0..n - 1, 0.0..y_max)?;

        let label_for = |idx: &i32| {
            points
                .get(*idx as usize)
                .map(|p| p.label.clone())
                .unwrap_or_default()
        };
        chart
            .configure_mesh()
            .y_desc("kWh")
            .x_labels(8)
            .y_labels(8)
            .x_label_formatter(&label_for)
            .draw()?;

        chart.draw_series(LineSeries::new(
            points.iter().enumerate().map(|(i, p)| (i as i32, p.energy)),
            plotters::style::Color::stroke_width(&PRIMARY, 2),
        ))?;
        chart.draw_series(
            points
                .iter()
                .enumerate()
                .map(|(i, p)| Circle::new((i as i32, p.energy), 3, PRIMARY.filled())),
        )?;

        root.present()?;
    }

    Ok(Some(Chart { svg, labels }))
}

/// Share of energy per device as a donut.
pub fn device_donut_chart(devices: &[BreakdownEntry]) -> ChartResult {
    let total: f64 = devices.iter().map(|d| d.energy).sum();
    if devices.is_empty() || total <= 0.0 {
        return Ok(None);
    }

    let mut slices: Vec<(String, f64)> = devices
        .iter()
        .take(MAX_SLICES)
        .map(|d| (d.label.clone(), d.energy))
        .collect();
    let rest: f64 = devices.iter().skip(MAX_SLICES).map(|d| d.energy).sum();
    if rest > 0.0 {
        slices.push(("Other".to_string(), rest));
    }

    let mut svg = String::new();
    let mut labels = Vec::new();
    {
        let root = canvas(&mut svg, &mut labels);
        root.fill(&WHITE)?;
        let area = root.titled("Energy by device", ("sans-serif", 20))?;

        let (width, height) = area.dim_in_pixel();
        let center = (width as i32 / 3, height as i32 / 2);
        let outer = f64::from(height.min(width)) * 0.42;
        let inner = outer * 0.55;

        let point_at = |angle: f64, radius: f64| {
            (
                center.0 + (radius * angle.cos()).round() as i32,
                center.1 + (radius * angle.sin()).round() as i32,
            )
        };

        let mut start = -std::f64::consts::FRAC_PI_2;
        for (idx, (_, energy)) in slices.iter().enumerate() {
            let sweep = energy / total * std::f64::consts::TAU;
            let steps = ((sweep / 0.05).ceil() as usize).max(2);
            let mut outline: Vec<(i32, i32)> = (0..=steps)
                .map(|s| point_at(start + sweep * s as f64 / steps as f64, outer))
                .collect();
            outline.extend(
                (0..=steps)
                    .rev()
                    .map(|s| point_at(start + sweep * s as f64 / steps as f64, inner)),
            );
            area.draw(&Polygon::new(
                outline,
                SLICE_COLORS[idx % SLICE_COLORS.len()].filled(),
            ))?;
            start += sweep;
        }

        let legend_x = (width as i32 * 2) / 3 - 20;
        for (idx, (label, energy)) in slices.iter().enumerate() {
            let y = 40 + idx as i32 * 28;
            area.draw(&Rectangle::new(
                [(legend_x, y), (legend_x + 14, y + 14)],
                SLICE_COLORS[idx % SLICE_COLORS.len()].filled(),
            ))?;
            area.draw(&Text::new(
                format!("{label} ({:.1}%)", energy / total * 100.0),
                (legend_x + 22, y),
                ("sans-serif", 14).into_font(),
            ))?;
        }

        root.present()?;
    }

    Ok(Some(Chart { svg, labels }))
}

/// Hour-of-day histogram with the top three hours highlighted.
pub fn hourly_chart(hourly: &[HourlyUsage], peak_hours: &[u32]) -> ChartResult {
    let max = hourly.iter().map(|h| h.energy).fold(0.0, f64::max);
    if max <= 0.0 {
        return Ok(None);
    }

    let mut svg = String::new();
    let mut labels = Vec::new();
    {
        let root = canvas(&mut svg, &mut labels);
        root.fill(&WHITE)?;

        let mut chart = ChartBuilder::on(&root)
            .caption("Usage by hour of day", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0..24, 0.0..y_ceiling(max))?;

        chart
            .configure_mesh()
            .x_desc("Hour")
            .y_desc("kWh")
            .x_labels(12)
            .x_label_formatter(&|h| format!("{h:02}"))
            .draw()?;

        chart.draw_series(hourly.iter().map(|slot| {
            let hour = slot.hour as i32;
            let color = if peak_hours.contains(&slot.hour) { ACCENT } else { PRIMARY };
            Rectangle::new([(hour, 0.0), (hour + 1, slot.energy)], color.filled())
        }))?;

        root.present()?;
    }

    Ok(Some(Chart { svg, labels }))
}

/// Daily device totals, anomalies drawn larger in red.
pub fn anomaly_chart(observations: &[DailyObservation]) -> ChartResult {
    let (Some(first), Some(last)) = (
        observations.iter().map(|o| o.date).min(),
        observations.iter().map(|o| o.date).max(),
    ) else {
        return Ok(None);
    };

    let mut svg = String::new();
    let mut labels = Vec::new();
    {
        let root = canvas(&mut svg, &mut labels);
        root.fill(&WHITE)?;

        let span = ((last - first).num_days() as i32).max(1);
        let y_max = y_ceiling(observations.iter().map(|o| o.energy).fold(0.0, f64::max));

        let mut chart = ChartBuilder::on(&root)
            .caption("Daily consumption and anomalies", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0..span, 0.0..y_max)?;

        chart
            .configure_mesh()
            .y_desc("kWh per day")
            .x_labels(8)
            .x_label_formatter(&|d| {
                (first + chrono::Duration::days(i64::from(*d)))
                    .format("%m-%d")
                    .to_string()
            })
            .draw()?;

        let x_of = |o: &DailyObservation| (o.date - first).num_days() as i32;
        chart.draw_series(
            observations
                .iter()
                .filter(|o| !o.is_anomaly)
                .map(|o| Circle::new((x_of(o), o.energy), 3, MUTED.filled())),
        )?;
        chart.draw_series(
            observations
                .iter()
                .filter(|o| o.is_anomaly)
                .map(|o| Circle::new((x_of(o), o.energy), 6, ALERT.filled())),
        )?;

        root.present()?;
    }

    Ok(Some(Chart { svg, labels }))
}

/// Historical daily totals followed by the projected days.
pub fn forecast_chart(points: &[ForecastPoint]) -> ChartResult {
    let Some(first) = points.first().map(|p| p.date) else {
        return Ok(None);
    };
    if !points.iter().any(|p| p.kind == PointKind::Forecast) {
        return Ok(None);
    }

    let mut svg = String::new();
    let mut labels = Vec::new();
    {
        let root = canvas(&mut svg, &mut labels);
        root.fill(&WHITE)?;

        let x_of = |p: &ForecastPoint| (p.date - first).num_days() as i32;
        let span = points.last().map_or(1, x_of).max(1);
        let y_max = y_ceiling(points.iter().map(|p| p.value).fold(0.0, f64::max));

        let mut chart = ChartBuilder::on(&root)
            .caption("Usage forecast", ("sans-serif", 20))
            .margin(15)
            .x_label_area_size(40)
            .y_label_area_size(60)
            .build_cartesian_2d(0..span, 0.0..y_max)?;

        chart
            .configure_mesh()
            .y_desc("kWh per day")
            .x_labels(8)
            .x_label_formatter(&|d| {
                (first + chrono::Duration::days(i64::from(*d)))
                    .format("%m-%d")
                    .to_string()
            })
            .draw()?;

        let historical: Vec<(i32, f64)> = points
            .iter()
            .filter(|p| p.kind == PointKind::Historical)
            .map(|p| (x_of(p), p.value))
            .collect();
        // Start the projection at the last observed day so the lines join.
        let projected: Vec<(i32, f64)> = historical
            .last()
            .copied()
            .into_iter()
            .chain(
                points
                    .iter()
                    .filter(|p| p.kind == PointKind::Forecast)
                    .map(|p| (x_of(p), p.value)),
            )
            .collect();

        chart
            .draw_series(LineSeries::new(historical, plotters::style::Color::stroke_width(&PRIMARY, 2)))?
            .label("Historical")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], plotters::style::Color::stroke_width(&PRIMARY, 2)));
        chart
            .draw_series(LineSeries::new(projected, plotters::style::Color::stroke_width(&ACCENT, 2)))?
            .label("Forecast")
            .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], plotters::style::Color::stroke_width(&ACCENT, 2)));

        chart
            .configure_series_labels()
            .background_style(&WHITE.mix(0.8))
            .border_style(&BLACK)
            .draw()?;

        root.present()?;
    }

    Ok(Some(Chart { svg, labels }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::sample_content;

    fn all_charts() -> Vec<Chart> {
        let content = sample_content();
        let analysis = &content.analysis;
        let agg = &analysis.aggregation;
        let peaks: Vec<u32> = agg.peak_hours(3).iter().map(|h| h.hour).collect();

        vec![
            trend_chart(&agg.trend).unwrap().unwrap(),
            device_donut_chart(&agg.devices).unwrap().unwrap(),
            hourly_chart(&agg.hourly, &peaks).unwrap().unwrap(),
            anomaly_chart(&analysis.anomalies.observations)
                .unwrap()
                .unwrap(),
            forecast_chart(&analysis.forecast.points).unwrap().unwrap(),
        ]
    }

    #[test]
    fn test_charts_render_shapes_without_svg_text() {
        for chart in all_charts() {
            assert!(chart.svg.starts_with("<svg"));
            assert!(chart.svg.trim_end().ends_with("</svg>"));
            assert!(!chart.svg.contains("<text"));
            assert!(!chart.labels.is_empty());
        }
    }

    #[test]
    fn test_labels_carry_titles_axes_and_legends() {
        let charts = all_charts();
        let texts = |idx: usize| charts[idx].texts().map(str::to_string).collect::<Vec<_>>();

        let trend = texts(0);
        assert!(trend.iter().any(|t| t == "Energy consumption trend"));
        assert!(trend.iter().any(|t| t == "kWh"));
        assert!(trend.iter().any(|t| t.starts_with("2024-03-")));

        let donut = texts(1);
        assert!(donut.iter().any(|t| t.starts_with("Device 1 (")));
        assert!(donut.iter().any(|t| t.starts_with("Device 2 (")));

        assert!(texts(2).iter().any(|t| t == "Hour"));
        assert!(texts(4).iter().any(|t| t == "Forecast"));
        assert!(texts(4).iter().any(|t| t == "Historical"));
    }

    #[test]
    fn test_labels_stay_on_the_canvas() {
        for chart in all_charts() {
            for label in &chart.labels {
                let slack = label.size;
                assert!(label.size > 0.0, "{label:?}");
                assert!((-slack..=f64::from(CHART_WIDTH) + slack).contains(&label.x), "{label:?}");
                assert!((-slack..=f64::from(CHART_HEIGHT) + slack).contains(&label.y), "{label:?}");
            }
        }
    }

    #[test]
    fn test_vertical_axis_title_is_rotated() {
        let chart = all_charts().remove(0);
        let kwh = chart.labels.iter().find(|l| l.text == "kWh").unwrap();
        assert_eq!(kwh.angle, 90.0);
        let caption = chart
            .labels
            .iter()
            .find(|l| l.text == "Energy consumption trend")
            .unwrap();
        assert_eq!(caption.angle, 0.0);
    }

    #[test]
    fn test_insufficient_data_yields_none() {
        assert!(trend_chart(&[]).unwrap().is_none());
        assert!(device_donut_chart(&[]).unwrap().is_none());
        let zeros: Vec<HourlyUsage> = (0..24)
            .map(|hour| HourlyUsage { hour, energy: 0.0 })
            .collect();
        assert!(hourly_chart(&zeros, &[]).unwrap().is_none());
        assert!(anomaly_chart(&[]).unwrap().is_none());
        assert!(forecast_chart(&[]).unwrap().is_none());
    }
}
