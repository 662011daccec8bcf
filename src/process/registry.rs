//! Insertion-ordered process registry.

use std::collections::HashMap;

use crate::remote::CommandOutput;

use super::Process;

/// Job-name keyed registry that remembers submission order.
///
/// Resubmitting an existing job name replaces the stored process but keeps
/// its original position, so replay order always reflects first submission.
#[derive(Clone, Debug, Default)]
pub struct ProcessRegistry {
    order: Vec<String>,
    entries: HashMap<String, Process>,
}

impl ProcessRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `process` under its job name, discarding any previous entry.
    pub fn submit(&mut self, process: Process) {
        let job_name = process.job_name().to_owned();
        if self.entries.insert(job_name.clone(), process).is_none() {
            self.order.push(job_name);
        }
    }

    /// Records the result of a pending process. Returns `false` when the job
    /// is unknown or already completed.
    pub fn complete(&mut self, job_name: &str, output: CommandOutput) -> bool {
        self.entries
            .get_mut(job_name)
            .is_some_and(|process| process.complete(output))
    }

    /// Removes and returns the process stored under `job_name`.
    pub fn pop(&mut self, job_name: &str) -> Option<Process> {
        let process = self.entries.remove(job_name)?;
        self.order.retain(|name| name != job_name);
        Some(process)
    }

    /// Returns the process stored under `job_name`.
    #[must_use]
    pub fn get(&self, job_name: &str) -> Option<&Process> {
        self.entries.get(job_name)
    }

    /// Returns `true` when a process is stored under `job_name`.
    #[must_use]
    pub fn contains(&self, job_name: &str) -> bool {
        self.entries.contains_key(job_name)
    }

    /// Job names in submission order.
    pub fn job_names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Removes every process, returning them in submission order.
    pub fn drain(&mut self) -> Vec<Process> {
        let order = std::mem::take(&mut self.order);
        order
            .into_iter()
            .filter_map(|name| self.entries.remove(&name))
            .collect()
    }

    /// Number of tracked processes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Returns `true` when nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
