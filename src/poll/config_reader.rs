use crate::poll::*;

use poll_flow::builder::Builder;
use serde::{Deserialize, Serialize};

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OptionEntry {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreSource {
    pub provider: String,
    #[serde(rename = "spreadsheetId")]
    pub spreadsheet_id: Option<String>,
    pub range: Option<String>,
    #[serde(rename = "credentialsPath")]
    pub credentials_path: Option<String>,
    #[serde(rename = "accessToken")]
    pub access_token: Option<String>,
    /// Overrides `https://sheets.googleapis.com`.
    #[serde(rename = "apiBaseUrl")]
    pub api_base_url: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    pub title: String,
    pub options: Vec<OptionEntry>,
    #[serde(rename = "cooldownSeconds")]
    pub cooldown_seconds: Option<u64>,
    #[serde(rename = "shareUrl")]
    pub share_url: Option<String>,
    #[serde(rename = "bindAddress")]
    pub bind_address: Option<String>,
    pub store: StoreSource,
}

pub fn read_config(path: &str) -> PollResult<PollConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: PollConfig =
        serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu { path })?;
    debug!("read_config: {:?}", config.options);
    Ok(config)
}

/// Validates the options and rules of the configuration.
pub fn build_poll(config: &PollConfig) -> PollResult<Poll> {
    let rules = PollRules {
        cooldown_seconds: config
            .cooldown_seconds
            .unwrap_or(PollRules::DEFAULT_RULES.cooldown_seconds),
    };
    let mut builder = Builder::new(&rules).context(InvalidPollSnafu {})?;
    for o in config.options.iter() {
        builder = builder
            .option(&o.name, o.description.as_deref().unwrap_or(""))
            .context(InvalidPollSnafu {})?;
    }
    builder.build().context(InvalidPollSnafu {})
}
