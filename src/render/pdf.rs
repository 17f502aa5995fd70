//! PDF report layout.
//!
//! Pages, in order: summary, trend, device breakdown, hourly pattern,
//! anomalies, forecast, recommendations. The anomaly page is left out when
//! nothing was flagged and the forecast page when no forecast was produced.
//! Charts that cannot be drawn are replaced by a one-line placeholder.

use printpdf::{
    BuiltinFont, Color, IndirectFontRef, Mm, PdfDocument, PdfDocumentReference,
    PdfLayerReference, Pt, Rgb, Svg, SvgTransform, TextMatrix,
};
use std::fs::File;
use std::io::BufWriter;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{ReportError, Result};
use crate::render::charts::{self, CHART_HEIGHT, CHART_WIDTH, Chart};
use crate::render::{ReportContent, narrative, num};

const PAGE_WIDTH: f32 = 210.0;
const PAGE_HEIGHT: f32 = 297.0;
const MARGIN: f32 = 18.0;
const TOP: f32 = PAGE_HEIGHT - 20.0;
const BOTTOM: f32 = 20.0;
const WRAP_COLUMNS: usize = 92;
const PT_PER_MM: f32 = 72.0 / 25.4;

type Drawn = std::result::Result<Option<Chart>, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Summary,
    Trend,
    Devices,
    Hourly,
    Anomalies,
    Forecast,
    Recommendations,
}

/// Pages the report will contain for `content`.
pub fn plan_pages(content: &ReportContent) -> Vec<Page> {
    let mut pages = vec![Page::Summary, Page::Trend, Page::Devices, Page::Hourly];
    if !content.analysis.anomalies.is_empty() {
        pages.push(Page::Anomalies);
    }
    if !content.analysis.forecast.is_empty() {
        pages.push(Page::Forecast);
    }
    pages.push(Page::Recommendations);
    pages
}

fn render_err(e: impl std::fmt::Debug) -> ReportError {
    ReportError::Render(format!("pdf: {e:?}"))
}

/// Builtin PDF fonts only cover Latin-1; keep text plain ASCII.
fn ascii(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii() && !c.is_ascii_control() { c } else { '?' })
        .collect()
}

fn wrap(text: &str, columns: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    for word in text.split_whitespace() {
        if !current.is_empty() && current.len() + word.len() + 1 > columns {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(word);
    }
    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

/// Runs a chart function, turning errors and panics into a message.
fn draw(
    chart: impl FnOnce() -> std::result::Result<Option<Chart>, Box<dyn std::error::Error>>,
) -> Drawn {
    match panic::catch_unwind(AssertUnwindSafe(chart)) {
        Ok(Ok(chart)) => Ok(chart),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err("chart renderer panicked".to_string()),
    }
}

struct Layout {
    doc: PdfDocumentReference,
    layer: PdfLayerReference,
    regular: IndirectFontRef,
    bold: IndirectFontRef,
    cursor: f32,
}

impl Layout {
    fn new(title: &str) -> Result<Self> {
        let (doc, page, layer) =
            PdfDocument::new(ascii(title), Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        let regular = doc
            .add_builtin_font(BuiltinFont::Helvetica)
            .map_err(render_err)?;
        let bold = doc
            .add_builtin_font(BuiltinFont::HelveticaBold)
            .map_err(render_err)?;
        let layer = doc.get_page(page).get_layer(layer);
        Ok(Self {
            doc,
            layer,
            regular,
            bold,
            cursor: TOP,
        })
    }

    fn new_page(&mut self) {
        let (page, layer) = self
            .doc
            .add_page(Mm(PAGE_WIDTH), Mm(PAGE_HEIGHT), "Layer 1");
        self.layer = self.doc.get_page(page).get_layer(layer);
        self.cursor = TOP;
    }

    fn reserve(&mut self, height: f32) {
        if self.cursor - height < BOTTOM {
            self.new_page();
        }
    }

    fn title(&mut self, text: &str) {
        self.reserve(12.0);
        self.cursor -= 10.0;
        self.layer
            .use_text(ascii(text), 22.0, Mm(MARGIN), Mm(self.cursor), &self.bold);
        self.cursor -= 4.0;
    }

    fn heading(&mut self, text: &str) {
        self.reserve(14.0);
        self.cursor -= 9.0;
        self.layer
            .use_text(ascii(text), 15.0, Mm(MARGIN), Mm(self.cursor), &self.bold);
        self.cursor -= 3.0;
    }

    fn line(&mut self, text: &str) {
        self.reserve(6.0);
        self.cursor -= 5.5;
        self.layer
            .use_text(ascii(text), 10.5, Mm(MARGIN), Mm(self.cursor), &self.regular);
    }

    fn paragraph(&mut self, text: &str) {
        for line in wrap(text, WRAP_COLUMNS) {
            self.line(&line);
        }
    }

    fn gap(&mut self) {
        self.cursor -= 4.0;
    }

    fn chart(&mut self, name: &str, drawn: Drawn) {
        let parsed = match drawn {
            Ok(Some(chart)) => Svg::parse(&chart.svg)
                .map(|svg| (svg, chart.labels))
                .map_err(|e| format!("{e:?}")),
            Ok(None) => {
                self.line(&format!("{name}: not enough data to chart."));
                return;
            }
            Err(e) => Err(e),
        };

        let (svg, labels) = match parsed {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(chart = name, error = %e, "Chart could not be drawn");
                self.line(&format!("{name}: chart unavailable."));
                return;
            }
        };

        let width_mm = PAGE_WIDTH - 2.0 * MARGIN;
        let px_per_mm = CHART_WIDTH as f32 / width_mm;
        let height_mm = CHART_HEIGHT as f32 / px_per_mm;

        self.reserve(height_mm + 2.0);
        self.cursor -= height_mm + 2.0;
        let bottom = self.cursor;
        svg.into_xobject(&self.layer).add_to_layer(
            &self.layer,
            SvgTransform {
                translate_x: Some(Mm(MARGIN).into()),
                translate_y: Some(Mm(bottom).into()),
                dpi: Some(px_per_mm * 25.4),
                ..Default::default()
            },
        );

        self.layer.save_graphics_state();
        for label in &labels {
            let x = Mm(MARGIN + label.x as f32 / px_per_mm);
            let y = Mm(bottom + (CHART_HEIGHT as f32 - label.y as f32) / px_per_mm);
            let font = if label.bold { &self.bold } else { &self.regular };
            let (r, g, b) = label.color;

            self.layer.set_fill_color(Color::Rgb(Rgb::new(
                f32::from(r) / 255.0,
                f32::from(g) / 255.0,
                f32::from(b) / 255.0,
                None,
            )));
            self.layer.begin_text_section();
            self.layer
                .set_font(font, label.size as f32 / px_per_mm * PT_PER_MM);
            self.layer.set_text_matrix(TextMatrix::TranslateRotate(
                Pt::from(x),
                Pt::from(y),
                label.angle as f32,
            ));
            self.layer.write_text(ascii(&label.text), font);
            self.layer.end_text_section();
        }
        self.layer.restore_graphics_state();
    }

    fn save(self, path: &Path) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.doc.save(&mut writer).map_err(render_err)
    }
}

pub fn write_pdf(content: &ReportContent, path: &Path) -> Result<()> {
    let pages = plan_pages(content);
    debug!(path = %path.display(), ?pages, "Writing PDF report");

    let mut layout = Layout::new(&content.title)?;
    for (idx, page) in pages.iter().enumerate() {
        if idx > 0 {
            layout.new_page();
        }
        match page {
            Page::Summary => summary_page(&mut layout, content),
            Page::Trend => trend_page(&mut layout, content),
            Page::Devices => devices_page(&mut layout, content),
            Page::Hourly => hourly_page(&mut layout, content),
            Page::Anomalies => anomaly_page(&mut layout, content),
            Page::Forecast => forecast_page(&mut layout, content),
            Page::Recommendations => recommendations_page(&mut layout, content),
        }
    }

    layout.save(path)
}

fn summary_page(layout: &mut Layout, content: &ReportContent) {
    let agg = &content.analysis.aggregation;

    layout.title(&content.title);
    layout.line(&format!("Prepared for: {}", content.prepared_for()));
    layout.line(&format!("Period: {}", content.period_label()));
    layout.line(&format!(
        "Generated: {}",
        content.generated_at.format("%Y-%m-%d %H:%M UTC")
    ));

    layout.heading("Summary");
    layout.line(&format!("Total energy: {} kWh", num(agg.total_energy)));
    layout.line(&format!(
        "Estimated cost: {} {}",
        num(agg.total_cost),
        content.currency
    ));
    layout.line(&format!("Records analysed: {}", agg.record_count));
    layout.line(&format!("Devices: {}", agg.devices.len()));
    if let Some(top) = agg.top_device() {
        layout.line(&format!(
            "Largest consumer: {} ({:.1}%)",
            top.label, top.percentage
        ));
    }
    let peaks: Vec<String> = agg
        .peak_hours(3)
        .iter()
        .filter(|h| h.energy > 0.0)
        .map(|h| format!("{:02}:00", h.hour))
        .collect();
    if !peaks.is_empty() {
        layout.line(&format!("Peak hours: {}", peaks.join(", ")));
    }
    for message in [
        content.analysis.anomalies.message(),
        content.analysis.forecast.message(),
    ]
    .into_iter()
    .flatten()
    {
        layout.paragraph(&format!("Note: {message}"));
    }
}

fn trend_page(layout: &mut Layout, content: &ReportContent) {
    let agg = &content.analysis.aggregation;

    layout.heading("Consumption trend");
    layout.chart("Trend", draw(|| charts::trend_chart(&agg.trend)));
    layout.gap();
    layout.paragraph(&narrative::trend(agg));
}

fn devices_page(layout: &mut Layout, content: &ReportContent) {
    let agg = &content.analysis.aggregation;
    let currency = &content.currency;

    layout.heading("Device breakdown");
    layout.chart(
        "Device breakdown",
        draw(|| charts::device_donut_chart(&agg.devices)),
    );
    layout.gap();
    for entry in &agg.devices {
        layout.line(&format!(
            "{} ({}): {} kWh, {:.1}%, {} {currency}",
            entry.label,
            entry.key,
            num(entry.energy),
            entry.percentage,
            num(entry.cost)
        ));
    }

    if !agg.locations.is_empty() {
        layout.heading("Locations");
        for entry in &agg.locations {
            layout.line(&format!(
                "{}: {} kWh, {:.1}%, {} {currency}",
                entry.label,
                num(entry.energy),
                entry.percentage,
                num(entry.cost)
            ));
        }
    }
}

fn hourly_page(layout: &mut Layout, content: &ReportContent) {
    let agg = &content.analysis.aggregation;
    let peaks: Vec<u32> = agg.peak_hours(3).iter().map(|h| h.hour).collect();

    layout.heading("Hourly pattern");
    layout.chart(
        "Hourly pattern",
        draw(|| charts::hourly_chart(&agg.hourly, &peaks)),
    );
    layout.gap();
    layout.paragraph(&narrative::hourly(agg));
}

fn anomaly_page(layout: &mut Layout, content: &ReportContent) {
    let anomalies = &content.analysis.anomalies;

    layout.heading("Unusual consumption");
    layout.chart(
        "Anomalies",
        draw(|| charts::anomaly_chart(&anomalies.observations)),
    );
    layout.gap();
    layout.paragraph(&narrative::anomalies(anomalies, |id| {
        content.device_label(id).to_string()
    }));
    layout.gap();
    for anomaly in &anomalies.anomalies {
        layout.line(&format!(
            "{}  {}: {} kWh (threshold {} kWh, {} severity)",
            anomaly.date,
            content.device_label(&anomaly.device_id),
            num(anomaly.observed),
            num(anomaly.threshold),
            anomaly.severity
        ));
    }
}

fn forecast_page(layout: &mut Layout, content: &ReportContent) {
    let forecast = &content.analysis.forecast;

    layout.heading("Forecast");
    layout.chart("Forecast", draw(|| charts::forecast_chart(&forecast.points)));
    layout.gap();
    layout.paragraph(&narrative::forecast(forecast, &content.currency));
    layout.gap();
    for point in forecast.forecast_points() {
        layout.line(&format!("{}: {} kWh", point.date, num(point.value)));
    }
}

fn recommendations_page(layout: &mut Layout, content: &ReportContent) {
    layout.heading("Recommendations");
    for tip in &content.analysis.recommendations {
        layout.paragraph(&format!("- {tip}"));
        layout.gap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::test_support::sample_content;
    use printpdf::lopdf;

    /// All text shown in the document, whitespace collapsed.
    fn pdf_text(path: &Path) -> String {
        let doc = lopdf::Document::load(path).unwrap();
        let pages: Vec<u32> = doc.get_pages().keys().copied().collect();
        let text = doc.extract_text(&pages).unwrap();
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    #[test]
    fn test_plan_includes_optional_pages() {
        let content = sample_content();
        assert_eq!(
            plan_pages(&content),
            vec![
                Page::Summary,
                Page::Trend,
                Page::Devices,
                Page::Hourly,
                Page::Anomalies,
                Page::Forecast,
                Page::Recommendations
            ]
        );
    }

    #[test]
    fn test_plan_skips_empty_sections() {
        let mut content = sample_content();
        content.analysis.anomalies.anomalies.clear();
        content.analysis.forecast.points.clear();
        assert_eq!(
            plan_pages(&content),
            vec![
                Page::Summary,
                Page::Trend,
                Page::Devices,
                Page::Hourly,
                Page::Recommendations
            ]
        );
    }

    #[test]
    fn test_write_pdf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        write_pdf(&sample_content(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn test_chart_text_is_typeset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        write_pdf(&sample_content(), &path).unwrap();

        let text = pdf_text(&path);
        for expected in [
            "Energy consumption trend",
            "Energy by device",
            "Usage by hour of day",
            "Daily consumption and anomalies",
            "Usage forecast",
            "kWh per day",
            "Historical",
            "Device 1 (",
        ] {
            assert!(text.contains(expected), "missing {expected:?} in: {text}");
        }
    }

    #[test]
    fn test_pages_carry_narratives_and_device_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.pdf");
        write_pdf(&sample_content(), &path).unwrap();

        let text = pdf_text(&path);
        assert!(text.contains("The largest change from one day to the next"));
        assert!(text.contains("The busiest hours were 19:00"));
        assert!(text.contains("Device 1 (ac-01):"));
        assert!(text.contains("Using the moving average method"));
    }

    #[test]
    fn test_wrap() {
        let lines = wrap("one two three four", 9);
        assert_eq!(lines, vec!["one two", "three", "four"]);
        assert!(wrap("", 10).is_empty());
    }

    #[test]
    fn test_chart_failures_become_messages() {
        assert!(matches!(draw(|| Ok(None)), Ok(None)));
        assert!(draw(|| Err("boom".into())).is_err());
        assert!(draw(|| panic!("bad chart")).is_err());
    }
}
