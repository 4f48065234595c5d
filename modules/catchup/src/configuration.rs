use anyhow::Result;
use config::Config;

const DEFAULT_NUM_PEERS: usize = 8;
const DEFAULT_JOB_QUEUE_DEPTH: usize = 64;
const DEFAULT_MAX_CONCURRENT_JOBS: usize = 32;

#[derive(Clone, Debug, serde::Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct CatchupConfig {
    /// Peers probed per job before giving up
    #[serde(default = "default_num_peers")]
    pub num_peers: usize,
    #[serde(default = "default_job_queue_depth")]
    pub job_queue_depth: usize,
    /// Jobs processed at once; the queue is not read while saturated
    #[serde(default = "default_max_concurrent_jobs")]
    pub max_concurrent_jobs: usize,
}

fn default_num_peers() -> usize {
    DEFAULT_NUM_PEERS
}

fn default_job_queue_depth() -> usize {
    DEFAULT_JOB_QUEUE_DEPTH
}

fn default_max_concurrent_jobs() -> usize {
    DEFAULT_MAX_CONCURRENT_JOBS
}

impl Default for CatchupConfig {
    fn default() -> Self {
        Self {
            num_peers: DEFAULT_NUM_PEERS,
            job_queue_depth: DEFAULT_JOB_QUEUE_DEPTH,
            max_concurrent_jobs: DEFAULT_MAX_CONCURRENT_JOBS,
        }
    }
}

impl CatchupConfig {
    pub fn try_load(config: &Config) -> Result<Self> {
        let full_config = Config::builder().add_source(config.clone()).build()?;
        Ok(full_config.try_deserialize()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let empty = Config::builder().build().unwrap();
        assert_eq!(CatchupConfig::try_load(&empty).unwrap(), CatchupConfig::default());

        let config = Config::builder()
            .set_override("num-peers", 3)
            .unwrap()
            .set_override("max-concurrent-jobs", 1)
            .unwrap()
            .build()
            .unwrap();
        let loaded = CatchupConfig::try_load(&config).unwrap();
        assert_eq!(loaded.num_peers, 3);
        assert_eq!(loaded.max_concurrent_jobs, 1);
        assert_eq!(loaded.job_queue_depth, DEFAULT_JOB_QUEUE_DEPTH);
    }
}
