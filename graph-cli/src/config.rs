use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigLoad {
    version: u8,

    /// The prompt shown in interactive mode.
    pub prompt: Option<String>,

    /// Show timing stats after executing commands.
    /// Only works with non-interactive mode.
    pub show_stats: Option<bool>,

    /// The worker id this shell's storage claims in addresses.
    pub worker_id: Option<u16>,

    /// Run a garbage collection sweep every N commands. 0 disables it.
    pub gc_every: Option<u64>,
}

impl Default for ConfigLoad {
    fn default() -> Self {
        ConfigLoad {
            version: 0,
            prompt: Some("graphcli".to_string()),
            show_stats: Some(false),
            worker_id: Some(0),
            gc_every: Some(0),
        }
    }
}

impl ConfigLoad {
    pub fn terminal_update(&mut self) {
        self.show_stats = Some(true);
    }

    pub fn worker_id(&self) -> u16 {
        self.worker_id.unwrap_or(0)
    }

    pub fn gc_every(&self) -> u64 {
        self.gc_every.unwrap_or(0)
    }
}
