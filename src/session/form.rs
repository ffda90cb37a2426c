use crate::models::{AgentConfig, VariableList};

/// Current editor values plus the last saved baseline.
#[derive(Debug, Clone)]
pub struct AgentForm {
    current: AgentConfig,
    baseline: AgentConfig,
}

impl AgentForm {
    pub fn new(agent: AgentConfig) -> Self {
        Self { current: agent.clone(), baseline: agent }
    }

    pub fn current(&self) -> &AgentConfig {
        &self.current
    }

    pub fn is_dirty(&self) -> bool {
        self.current != self.baseline
    }

    pub fn edit(&mut self, f: impl FnOnce(&mut AgentConfig)) {
        f(&mut self.current);
    }

    /// Replaces every field; the persisted id stays with the form.
    pub fn replace(&mut self, mut agent: AgentConfig) {
        if agent.id.is_none() {
            agent.id = self.current.id.clone();
        }
        self.current = agent;
    }

    pub fn variables_mut(&mut self) -> &mut VariableList {
        &mut self.current.variables
    }

    /// Records a completed save of `submitted`, as returned by the store.
    ///
    /// Edits made while the save was in flight survive and keep the form dirty.
    pub fn commit(&mut self, submitted: &AgentConfig, saved: AgentConfig) {
        if self.current == *submitted {
            self.current = saved.clone();
        } else if self.current.id.is_none() {
            self.current.id = saved.id.clone();
        }
        self.baseline = saved;
    }
}
