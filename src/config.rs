use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub data_dir: PathBuf,
    pub save_poll_secs: u64,
    pub learner_idle_secs: u64,
}

impl Config {
    pub fn from_env() -> Self {
        let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let data_dir = std::env::var("DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data/learners"));

        let save_poll_secs = std::env::var("SAVE_POLL_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .filter(|v| *v > 0)
            .unwrap_or(30);

        let learner_idle_secs = std::env::var("LEARNER_IDLE_SECS")
            .ok()
            .and_then(|value| value.parse::<u64>().ok())
            .unwrap_or(3600);

        Self {
            log_level,
            data_dir,
            save_poll_secs,
            learner_idle_secs,
        }
    }
}
