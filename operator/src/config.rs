use crate::{Error, Result};
use clap::{Parser, ValueEnum};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::Selector;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Parameters {
    /// Label selector (YAML or JSON) an instance must match to be reconciled
    #[arg(long, env = "CRSM_SELECTOR", value_name = "SELECTOR")]
    pub selector: Option<String>,

    /// Label selector (YAML or JSON) the namespace of an instance must match
    #[arg(long, env = "CRSM_NAMESPACE_SELECTOR", value_name = "SELECTOR")]
    pub namespace_selector: Option<String>,

    /// Address of the metrics and health endpoints
    #[arg(short, long, env = "CRSM_BIND", value_name = "ADDRESS", default_value = "0.0.0.0:9000")]
    pub bind: String,

    /// Attempts of a reconciliation running into write conflicts
    #[arg(long, env = "CRSM_MAX_ATTEMPTS", value_name = "COUNT", default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: u32,

    /// Format of the log lines
    #[arg(long, env = "CRSM_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl Parameters {
    pub fn selector(&self) -> Result<Option<Selector>> {
        parse_selector(self.selector.as_deref())
    }

    pub fn namespace_selector(&self) -> Result<Option<Selector>> {
        parse_selector(self.namespace_selector.as_deref())
    }
}

/// Parses a `LabelSelector` written as YAML or JSON, blank means unset
pub fn parse_selector(raw: Option<&str>) -> Result<Option<Selector>> {
    let Some(raw) = raw.filter(|r| !r.trim().is_empty()) else {
        return Ok(None);
    };
    let selector: LabelSelector =
        serde_yaml::from_str(raw).map_err(|e| Error::Selector(format!("{raw}: {e}")))?;
    Selector::try_from(selector)
        .map(Some)
        .map_err(|e| Error::Selector(format!("{raw}: {e}")))
}
