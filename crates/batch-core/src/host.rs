/// An execution host as the master sees it: just enough to match jobs
/// against free slot capacity. Per-core binding state is owned by the
/// host daemon running on that host, not by the master's inventory.
#[derive(Debug, Clone)]
pub struct Host {
    pub name: String,
    pub num_cores: u32,
    pub used_slots: u32,
}

impl Host {
    pub fn new(name: impl Into<String>, num_cores: u32) -> Self {
        Host { name: name.into(), num_cores, used_slots: 0 }
    }

    pub fn free_slots(&self) -> u32 {
        self.num_cores.saturating_sub(self.used_slots)
    }
}
