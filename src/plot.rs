//! Predicted-vs-actual charts and the sinks that publish them
//!
//! A chart compares the final timestep of every validation sequence with the model's
//! prediction for that timestep. Actual values are drawn in red, predictions in blue.

use std::{
    error::Error,
    fs,
    path::{Path, PathBuf},
};

use plotters::{
    chart::ChartBuilder,
    prelude::{BitMapBackend, Circle, IntoDrawingArea, PathElement},
    series::LineSeries,
    style::{BLUE, Color, RED, WHITE},
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    preprocess::NormalizedDataset,
    tensor::{DataError, PackedTensor},
};

/// Errors for building and publishing charts
#[derive(Debug, Error)]
pub enum PlotError {
    #[error("Predictions of shape {predicted:?} do not match the actual data {actual:?}")]
    ShapeMismatch {
        actual: (usize, usize, usize),
        predicted: (usize, usize, usize),
    },
    #[error(transparent)]
    Data(#[from] DataError),
    #[error("Plotly credentials are missing (set PLOTLY_USERNAME and PLOTLY_API_KEY)")]
    MissingCredentials,
    #[error("Request to the charting service failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Charting service rejected the chart: {0}")]
    Service(String),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("Failed to render chart: {0}")]
    Render(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// One named x/y series
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trace {
    pub x: Vec<usize>,
    pub y: Vec<f32>,
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
}

impl Trace {
    pub fn scatter(name: &str, y: Vec<f32>) -> Self {
        Self {
            x: (0..y.len()).collect(),
            y,
            kind: "scatter".to_string(),
            name: name.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Axis {
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Layout {
    pub title: String,
    pub xaxis: Axis,
    pub yaxis: Axis,
}

/// What the charting service does when a chart with the same filename exists
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileOpt {
    Overwrite,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub traces: Vec<Trace>,
    pub layout: Layout,
    /// Chart identifier at the destination
    pub filename: String,
    pub fileopt: FileOpt,
}

/// Builds the `Actual` and `Predicted` last-timestep series for one model
pub fn build_chart(
    actual: &NormalizedDataset,
    predicted: &PackedTensor,
    filename: &str,
) -> Result<Chart, PlotError> {
    let actual = actual.pack()?;
    if actual.shape() != predicted.shape() {
        return Err(PlotError::ShapeMismatch {
            actual: actual.shape(),
            predicted: predicted.shape(),
        });
    }
    Ok(Chart {
        traces: vec![
            Trace::scatter("Actual", actual.last_timestep()),
            Trace::scatter("Predicted", predicted.last_timestep()),
        ],
        layout: Layout {
            title: "Actual vs Predicted".to_string(),
            xaxis: Axis {
                title: "Sequence Index".to_string(),
            },
            yaxis: Axis {
                title: "Value".to_string(),
            },
        },
        filename: filename.to_string(),
        fileopt: FileOpt::Overwrite,
    })
}

/// Destination for finished charts
pub trait ChartSink {
    /// Publishes the chart, returning where it can be found (a URL or a path)
    fn publish(&self, chart: &Chart) -> Result<String, PlotError>;
}

/// Renders charts to `<output_dir>/<filename>.png`
pub struct BitmapSink {
    output_dir: PathBuf,
}

impl BitmapSink {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }
}

impl ChartSink for BitmapSink {
    fn publish(&self, chart: &Chart) -> Result<String, PlotError> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(format!("{}.png", chart.filename));
        draw_chart(chart, &path).map_err(|e| PlotError::Render(e.to_string()))?;
        log::info!("Chart has been saved to '{}'.", path.display());
        Ok(path.display().to_string())
    }
}

fn draw_chart(chart: &Chart, path: &Path) -> Result<(), Box<dyn Error>> {
    let root_area = BitMapBackend::new(path, (640, 480)).into_drawing_area();
    root_area.fill(&WHITE)?;

    let n_points = chart.traces.iter().map(|t| t.x.len()).max().unwrap_or(0);
    let (y_min, y_max) = chart
        .traces
        .iter()
        .flat_map(|t| t.y.iter().copied())
        .filter(|y| y.is_finite())
        .fold((0.0f32, 1.0f32), |(lo, hi), y| (lo.min(y), hi.max(y)));
    let pad = (y_max - y_min) * 0.05;

    let mut ctx = ChartBuilder::on(&root_area)
        .caption(&chart.layout.title, ("sans-serif", 30))
        .margin(20)
        .x_label_area_size(40)
        .y_label_area_size(50)
        .build_cartesian_2d(
            -0.5f32..(n_points as f32 - 0.5).max(0.5),
            (y_min - pad)..(y_max + pad),
        )?;

    ctx.configure_mesh()
        .x_desc(&chart.layout.xaxis.title)
        .y_desc(&chart.layout.yaxis.title)
        .draw()?;

    for (trace, color) in chart.traces.iter().zip([RED, BLUE].into_iter().cycle()) {
        let points = trace
            .x
            .iter()
            .zip(trace.y.iter())
            .map(|(&x, &y)| (x as f32, y))
            .collect::<Vec<_>>();
        ctx.draw_series(LineSeries::new(points.clone(), &color))?
            .label(trace.name.as_str())
            .legend(move |(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], &color));
        ctx.draw_series(points.into_iter().map(|p| Circle::new(p, 3, color.filled())))?;
    }

    ctx.configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .draw()?;
    root_area.present()?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::preprocess::normalize;

    /// Keeps every published chart in memory
    #[derive(Default)]
    pub(crate) struct RecordingSink {
        pub(crate) charts: RefCell<Vec<Chart>>,
    }

    impl ChartSink for RecordingSink {
        fn publish(&self, chart: &Chart) -> Result<String, PlotError> {
            self.charts.borrow_mut().push(chart.clone());
            Ok(format!("memory://{}", chart.filename))
        }
    }

    fn actual() -> NormalizedDataset {
        normalize(&[vec![0.0, 1.0, 2.0], vec![1.0, 2.0, 4.0]]).unwrap()
    }

    #[test]
    fn test_build_chart() {
        let predicted = PackedTensor::pack(&[vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.9]]).unwrap();
        let chart = build_chart(&actual(), &predicted, "lstm-plot-model1").unwrap();

        assert_eq!(chart.traces.len(), 2);
        assert_eq!(chart.traces[0].name, "Actual");
        assert_eq!(chart.traces[0].x, vec![0, 1]);
        assert_eq!(chart.traces[0].y, vec![0.5, 1.0]);
        assert_eq!(chart.traces[1].name, "Predicted");
        assert_eq!(chart.traces[1].y, vec![0.3, 0.9]);
        assert_eq!(chart.layout.title, "Actual vs Predicted");
        assert_eq!(chart.layout.xaxis.title, "Sequence Index");
        assert_eq!(chart.filename, "lstm-plot-model1");
        assert_eq!(chart.fileopt, FileOpt::Overwrite);
    }

    #[test]
    fn test_build_chart_rejects_shape_mismatch() {
        let predicted = PackedTensor::pack(&[vec![0.1, 0.2, 0.3]]).unwrap();
        let err = build_chart(&actual(), &predicted, "x").unwrap_err();
        assert!(matches!(
            err,
            PlotError::ShapeMismatch {
                actual: (2, 3, 1),
                predicted: (1, 3, 1)
            }
        ));
    }

    #[test]
    fn test_trace_serialization() {
        let trace = Trace::scatter("Actual", vec![0.5]);
        let json = serde_json::to_value(&trace).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"x": [0], "y": [0.5], "type": "scatter", "name": "Actual"})
        );
        assert_eq!(
            serde_json::to_value(FileOpt::Overwrite).unwrap(),
            serde_json::json!("overwrite")
        );
    }

    #[test]
    fn test_bitmap_sink() {
        let dir = tempfile::tempdir().unwrap();
        let predicted = PackedTensor::pack(&[vec![0.1, 0.2, 0.3], vec![0.4, 0.5, 0.9]]).unwrap();
        let chart = build_chart(&actual(), &predicted, "bitmap").unwrap();
        let sink = BitmapSink::new(dir.path().join("charts"));
        match sink.publish(&chart) {
            Ok(path) => {
                assert!(path.ends_with("bitmap.png"));
                assert!(Path::new(&path).exists());
            }
            // headless machines may have no font for the caption
            Err(PlotError::Render(e)) => eprintln!("skipping bitmap check: {}", e),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
}
