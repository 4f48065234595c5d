use anyhow::Result;
use config::Config;

const DEFAULT_SECURITY_PARAMETER: u64 = 290;
const DEFAULT_OUTPUT_QUEUE_DEPTH: usize = 64;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct FrontierConfig {
    /// Finality depth k
    #[serde(default = "default_security_parameter")]
    pub security_parameter: u64,
    /// Depth of the queues feeding the frontier processor
    #[serde(default = "default_output_queue_depth")]
    pub output_queue_depth: usize,
}

fn default_security_parameter() -> u64 {
    DEFAULT_SECURITY_PARAMETER
}

fn default_output_queue_depth() -> usize {
    DEFAULT_OUTPUT_QUEUE_DEPTH
}

impl Default for FrontierConfig {
    fn default() -> Self {
        Self {
            security_parameter: DEFAULT_SECURITY_PARAMETER,
            output_queue_depth: DEFAULT_OUTPUT_QUEUE_DEPTH,
        }
    }
}

impl FrontierConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder().add_source(config.clone()).build()?;
        Ok(full_config.try_deserialize()?)
    }
}
