//! Client for the plotly chart-rendering endpoint
//!
//! Charts are sent as a form-encoded POST to `clientresp`: the traces go in `args` and the
//! filename, overwrite policy and layout in `kwargs`, both as JSON strings.

use std::time::Duration;

use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

use crate::plot::{Chart, ChartSink, FileOpt, Layout, PlotError};

pub const DEFAULT_ENDPOINT: &str = "https://plot.ly/clientresp";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub api_key: String,
}

#[derive(Serialize)]
struct GraphOptions<'a> {
    filename: &'a str,
    fileopt: FileOpt,
    layout: &'a Layout,
    world_readable: bool,
}

/// Body returned by the endpoint; `error` is empty on success
#[derive(Debug, Default, Deserialize)]
struct ClientResponse {
    #[serde(default)]
    url: String,
    #[serde(default)]
    error: String,
    #[serde(default)]
    warning: String,
}

pub struct PlotlyClient {
    client: Client,
    endpoint: String,
    credentials: Option<Credentials>,
}

impl PlotlyClient {
    pub fn new(credentials: Option<Credentials>) -> Result<Self, PlotError> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            credentials,
        })
    }

    /// Sends charts somewhere other than the public endpoint
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    fn form(&self, chart: &Chart, credentials: &Credentials) -> Result<Vec<(&'static str, String)>, PlotError> {
        let options = GraphOptions {
            filename: &chart.filename,
            fileopt: chart.fileopt,
            layout: &chart.layout,
            world_readable: true,
        };
        Ok(vec![
            ("platform", "rust".to_string()),
            ("version", env!("CARGO_PKG_VERSION").to_string()),
            ("args", serde_json::to_string(&chart.traces)?),
            ("un", credentials.username.clone()),
            ("key", credentials.api_key.clone()),
            ("origin", "plot".to_string()),
            ("kwargs", serde_json::to_string(&options)?),
        ])
    }
}

fn parse_response(response: ClientResponse) -> Result<String, PlotError> {
    if !response.error.is_empty() {
        return Err(PlotError::Service(response.error));
    }
    if !response.warning.is_empty() {
        log::warn!("plotly: {}", response.warning);
    }
    if response.url.is_empty() {
        return Err(PlotError::Service("response did not contain a chart url".to_string()));
    }
    Ok(response.url)
}

impl ChartSink for PlotlyClient {
    fn publish(&self, chart: &Chart) -> Result<String, PlotError> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(PlotError::MissingCredentials)?;
        let form = self.form(chart, credentials)?;

        let response = self.client.post(&self.endpoint).form(&form).send()?;
        let status = response.status();
        let body = response.text()?;
        let url = match serde_json::from_str::<ClientResponse>(&body) {
            Ok(parsed) => parse_response(parsed)?,
            Err(_) if !status.is_success() => {
                return Err(PlotError::Service(format!("{}: {}", status, body.trim())));
            }
            Err(e) => return Err(e.into()),
        };
        log::info!("Plotly chart URL: {}", url);
        Ok(url)
    }
}
