//! Signal plot rendering.
//!
//! Renders one PNG per recording with three stacked panels: raw and cleaned
//! signal with breath peaks, instantaneous rate, and amplitude.

use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};
use plotters::prelude::*;
use std::io::Cursor;
use thiserror::Error;

use crate::rsp::ProcessedSignal;

#[derive(Clone, Debug)]
pub struct PlotStyle {
    pub width: u32,
    pub height: u32,
    pub background: RGBColor,
}

impl Default for PlotStyle {
    fn default() -> Self {
        Self {
            width: 1200,
            height: 900,
            background: WHITE,
        }
    }
}

#[derive(Debug, Error)]
pub enum PlotError {
    #[error("failed to render plot: {0}")]
    Render(String),
}

impl<E: std::error::Error + Send + Sync + 'static> From<plotters::drawing::DrawingAreaErrorKind<E>>
    for PlotError
{
    fn from(value: plotters::drawing::DrawingAreaErrorKind<E>) -> Self {
        PlotError::Render(format!("{value:?}"))
    }
}

impl From<image::ImageError> for PlotError {
    fn from(value: image::ImageError) -> Self {
        PlotError::Render(value.to_string())
    }
}

/// Render the processed signal as a PNG image.
pub fn render_signals_png(sig: &ProcessedSignal, style: &PlotStyle) -> Result<Vec<u8>, PlotError> {
    if sig.is_empty() {
        return Err(PlotError::Render("signal has no samples".into()));
    }

    // Keep roughly a few points per pixel; full traces can run to millions
    // of samples.
    let stride = (sig.len() / (style.width as usize * 4)).max(1);
    let secs = |i: usize| i as f32 / sig.sample_rate as f32;

    let mut buffer = vec![0u8; (style.width * style.height * 3) as usize];
    {
        let root = BitMapBackend::with_buffer(&mut buffer, (style.width, style.height))
            .into_drawing_area();
        root.fill(&style.background)?;
        let panels = root.split_evenly((3, 1));

        // Panel 1: raw + cleaned signal with peak markers.
        {
            let (y_min, y_max) = series_bounds(&sig.raw, &sig.clean);
            let mut chart = ChartBuilder::on(&panels[0])
                .margin(10)
                .caption("Respiration", ("sans-serif", 18))
                .set_label_area_size(LabelAreaPosition::Left, 50)
                .set_label_area_size(LabelAreaPosition::Bottom, 25)
                .build_cartesian_2d(0f32..secs(sig.len()), y_min..y_max)?;
            chart.configure_mesh().light_line_style(BLACK.mix(0.1)).draw()?;

            chart
                .draw_series(LineSeries::new(
                    sig.raw.iter().step_by(stride).enumerate().map(|(i, &v)| (secs(i * stride), v as f32)),
                    BLACK.mix(0.3),
                ))?
                .label("raw");
            chart
                .draw_series(LineSeries::new(
                    sig.clean.iter().step_by(stride).enumerate().map(|(i, &v)| (secs(i * stride), v as f32)),
                    &BLUE,
                ))?
                .label("clean");
            chart.draw_series(
                sig.peaks
                    .iter()
                    .map(|&p| Circle::new((secs(p), sig.clean[p] as f32), 2, RED.filled())),
            )?;
        }

        draw_series_panel(&panels[1], "Rate (breaths/min)", &sig.rate, stride, sig.sample_rate, &GREEN)?;
        draw_series_panel(&panels[2], "Amplitude", &sig.amplitude, stride, sig.sample_rate, &MAGENTA)?;

        root.present()?;
    }

    encode_png(&buffer, style.width, style.height)
}

fn draw_series_panel(
    area: &DrawingArea<BitMapBackend, plotters::coord::Shift>,
    caption: &str,
    series: &[f64],
    stride: usize,
    sample_rate: f64,
    color: &RGBColor,
) -> Result<(), PlotError> {
    let y_min = series.iter().cloned().fold(f64::MAX, f64::min) as f32;
    let y_max = series.iter().cloned().fold(f64::MIN, f64::max) as f32;
    let (y_min, y_max) = pad_bounds(y_min, y_max);

    let mut chart = ChartBuilder::on(area)
        .margin(10)
        .caption(caption, ("sans-serif", 18))
        .set_label_area_size(LabelAreaPosition::Left, 50)
        .set_label_area_size(LabelAreaPosition::Bottom, 25)
        .build_cartesian_2d(0f32..(series.len() as f32 / sample_rate as f32), y_min..y_max)?;
    chart.configure_mesh().light_line_style(BLACK.mix(0.1)).draw()?;

    chart.draw_series(LineSeries::new(
        series
            .iter()
            .step_by(stride)
            .enumerate()
            .map(|(i, &v)| ((i * stride) as f32 / sample_rate as f32, v as f32)),
        color,
    ))?;

    Ok(())
}

fn series_bounds(a: &[f64], b: &[f64]) -> (f32, f32) {
    let min = a
        .iter()
        .chain(b.iter())
        .cloned()
        .fold(f64::MAX, f64::min) as f32;
    let max = a
        .iter()
        .chain(b.iter())
        .cloned()
        .fold(f64::MIN, f64::max) as f32;
    pad_bounds(min, max)
}

fn pad_bounds(min: f32, max: f32) -> (f32, f32) {
    if (max - min).abs() < f32::EPSILON {
        (min - 1.0, max + 1.0)
    } else {
        let pad = (max - min) * 0.05;
        (min - pad, max + pad)
    }
}

fn encode_png(buffer: &[u8], width: u32, height: u32) -> Result<Vec<u8>, PlotError> {
    let image = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, buffer.to_vec())
        .ok_or_else(|| PlotError::Render("failed to allocate image buffer".into()))?;
    let mut output = Vec::new();
    let dynamic = DynamicImage::ImageRgb8(image);
    dynamic.write_to(&mut Cursor::new(&mut output), ImageFormat::Png)?;
    Ok(output)
}
