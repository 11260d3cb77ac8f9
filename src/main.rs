//! Trains the two LSTM variants on the ramp fixtures and charts their validation predictions
//!
//! # Usage
//! Runnable via
//! ```sh
//! cargo run -- -h
//! PLOTLY_USERNAME=... PLOTLY_API_KEY=... cargo run
//! cargo run -- --sink bitmap --output-dir output
//! ```

use std::process::ExitCode;

use lstm_compare::{
    model::{ModelConfig, Preset},
    pipeline::{RunConfig, run},
    plot::{BitmapSink, ChartSink},
    plotly::{Credentials, DEFAULT_ENDPOINT, PlotlyClient},
    preprocess::ScalingMode,
    train::{EarlyStopping, FitOptions},
};

use clap::{Parser, ValueEnum};

#[derive(Debug, ValueEnum, Clone, Copy, PartialEq, Eq)]
enum SinkKind {
    Plotly,
    Bitmap,
}

#[derive(Parser)]
struct Args {
    /// Model presets to train, in order
    #[clap(long, value_delimiter = ',', default_values_t = [Preset::Wide, Preset::Compact])]
    variants: Vec<Preset>,
    #[clap(short, long, default_value_t = 150)]
    epochs: usize,
    #[clap(short, long, default_value_t = 32)]
    batch_size: usize,
    #[clap(long, default_value_t = 10)]
    patience: usize,
    #[clap(long, default_value_t = 0.0)]
    min_delta: f32,
    #[clap(long, default_value_t = false)]
    no_early_stopping: bool,
    #[clap(long, value_enum, default_value_t = ScalingMode::Independent)]
    scaling: ScalingMode,
    #[clap(long, value_enum, default_value_t = SinkKind::Plotly)]
    sink: SinkKind,
    /// Directory for the bitmap sink
    #[clap(short, long, default_value_t = format!("output"))]
    output_dir: String,
    #[clap(long, default_value_t = format!("lstm-plot"))]
    plot_prefix: String,
    /// Overrides the preset seeds; variant `i` is seeded with `seed + i`
    #[clap(long)]
    seed: Option<u64>,
    #[clap(long, env = "PLOTLY_USERNAME")]
    plotly_username: Option<String>,
    #[clap(long, env = "PLOTLY_API_KEY", hide_env_values = true)]
    plotly_api_key: Option<String>,
    #[clap(long, default_value_t = DEFAULT_ENDPOINT.to_string())]
    plotly_url: String,
}

impl Args {
    fn run_config(&self) -> RunConfig {
        let variants = self
            .variants
            .iter()
            .enumerate()
            .map(|(i, &preset)| {
                let mut config = ModelConfig::from(preset);
                if let Some(seed) = self.seed {
                    config.seed = seed.wrapping_add(i as u64);
                }
                config
            })
            .collect();
        let early_stopping =
            (!self.no_early_stopping).then(|| EarlyStopping::new(self.patience, self.min_delta));
        RunConfig {
            variants,
            fit: FitOptions {
                epochs: self.epochs,
                batch_size: self.batch_size,
                early_stopping,
                ..FitOptions::default()
            },
            scaling: self.scaling,
            plot_prefix: self.plot_prefix.clone(),
            ..RunConfig::default()
        }
    }

    fn sink(&self) -> Result<Box<dyn ChartSink>, Box<dyn std::error::Error>> {
        match self.sink {
            SinkKind::Bitmap => Ok(Box::new(BitmapSink::new(&self.output_dir))),
            SinkKind::Plotly => {
                let credentials = match (&self.plotly_username, &self.plotly_api_key) {
                    (Some(username), Some(api_key)) => Some(Credentials {
                        username: username.clone(),
                        api_key: api_key.clone(),
                    }),
                    _ => {
                        log::warn!("no plotly credentials given, charts will not be published");
                        None
                    }
                };
                Ok(Box::new(
                    PlotlyClient::new(credentials)?.with_endpoint(&self.plotly_url),
                ))
            }
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let sink = match args.sink() {
        Ok(sink) => sink,
        Err(e) => {
            log::error!("failed to set up chart sink: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(&args.run_config(), sink.as_ref()) {
        Ok(report) => {
            for variant in &report.variants {
                match &variant.chart {
                    Ok(location) => log::info!("{}: {} -> {}", variant.name, variant.history, location),
                    Err(e) => log::info!("{}: {} (no chart: {})", variant.name, variant.history, e),
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}
