/// A scheduling queue: priority, victim ordering for preemption, and the
/// aggregate counters the master keeps per queue.
#[derive(Debug, Clone)]
pub struct Queue {
    pub name: String,
    pub priority: i32,
    /// Lower-priority queues this queue may draw preemption victims from,
    /// in configured order.
    pub preemptable: Vec<String>,
    pub resource_requirement: Option<String>,
    /// Fallback resource names consulted by resource-driven preemption
    /// when the pending job itself named none.
    pub rusage_resources: Vec<String>,
    pub num_run: u32,
    pub num_pend: u32,
    pub num_susp: u32,
}

impl Queue {
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Queue {
            name: name.into(),
            priority,
            preemptable: Vec::new(),
            resource_requirement: None,
            rusage_resources: Vec::new(),
            num_run: 0,
            num_pend: 0,
            num_susp: 0,
        }
    }

    pub fn is_preemptive(&self) -> bool {
        !self.preemptable.is_empty()
    }
}
