//! Command line surface of the hub agent

use clap::Parser;
use infrastructure::HubConfig;

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Directory holding `default.toml` and the optional `{RUN_MODE}.toml`
    #[arg(long)]
    pub config_dir: Option<String>,

    /// Override device sync interval
    #[arg(long)]
    pub sync_interval_ms: Option<u64>,

    /// Override sensor sync interval
    #[arg(long)]
    pub sensors_sync_interval_secs: Option<u64>,
}

impl Args {
    /// Explicit flag, else `crates/hub-agent/config` when run from the workspace, else `config`
    pub fn config_dir(&self) -> String {
        if let Some(dir) = &self.config_dir {
            return dir.clone();
        }
        let dev_base = "crates/hub-agent";
        if std::path::Path::new(dev_base).exists() {
            format!("{}/config", dev_base)
        } else {
            "config".to_string()
        }
    }

    /// Apply CLI overrides on top of the loaded configuration
    pub fn apply(&self, config: &mut HubConfig) {
        if let Some(ms) = self.sync_interval_ms.filter(|ms| *ms > 0) {
            config.sync_interval_ms = ms;
        }
        if let Some(secs) = self.sensors_sync_interval_secs.filter(|secs| *secs > 0) {
            config.sensors_sync_interval_secs = secs;
        }
    }
}
