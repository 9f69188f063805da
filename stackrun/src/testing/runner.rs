//! Canned command runner.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};

use crate::engine::{CommandOutput, CommandRunner, Invocation};
use crate::errors::HarnessResult;

/// [`CommandRunner`] answering by engine subcommand.
///
/// Queued responses are consumed first, then the standing response for the
/// subcommand, then a default success (`{}` on stdout for `output` and `show`).
#[derive(Debug, Default)]
pub struct ScriptedRunner {
    queued: Mutex<HashMap<String, VecDeque<CommandOutput>>>,
    standing: HashMap<String, CommandOutput>,
    invocations: Mutex<Vec<Invocation>>,
}

impl ScriptedRunner {
    /// Creates a runner where every command succeeds.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a one-shot response for `subcommand`.
    #[must_use]
    pub fn then(self, subcommand: impl Into<String>, output: CommandOutput) -> Self {
        self.queued
            .lock()
            .entry(subcommand.into())
            .or_default()
            .push_back(output);
        self
    }

    /// Sets the response for `subcommand` once its queue is empty.
    #[must_use]
    pub fn always(mut self, subcommand: impl Into<String>, output: CommandOutput) -> Self {
        self.standing.insert(subcommand.into(), output);
        self
    }

    /// Every invocation received, in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().clone()
    }

    /// Subcommands received, in order.
    #[must_use]
    pub fn subcommands(&self) -> Vec<String> {
        self.invocations
            .lock()
            .iter()
            .filter_map(|inv| inv.subcommand().map(String::from))
            .collect()
    }

    /// Number of invocations of `subcommand`.
    #[must_use]
    pub fn count(&self, subcommand: &str) -> usize {
        self.invocations
            .lock()
            .iter()
            .filter(|inv| inv.subcommand() == Some(subcommand))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, invocation: &Invocation) -> HarnessResult<CommandOutput> {
        self.invocations.lock().push(invocation.clone());
        let sub = invocation.subcommand().unwrap_or_default().to_string();

        if let Some(output) = self.queued.lock().get_mut(&sub).and_then(VecDeque::pop_front) {
            return Ok(output);
        }
        if let Some(output) = self.standing.get(&sub) {
            return Ok(output.clone());
        }
        Ok(match sub.as_str() {
            "output" | "show" => CommandOutput::ok("{}"),
            _ => CommandOutput::ok(""),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;

    fn invocation(sub: &str) -> Invocation {
        Invocation {
            program: "terraform".to_string(),
            args: vec![sub.to_string()],
            cwd: std::env::temp_dir(),
            env: BTreeMap::new(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn test_queue_then_standing_then_default() {
        let runner = ScriptedRunner::new()
            .then("apply", CommandOutput::failed(1, "Throttling"))
            .always("apply", CommandOutput::ok("Apply complete!"));

        assert!(!runner.run(&invocation("apply")).await.unwrap().success());
        assert_eq!(runner.run(&invocation("apply")).await.unwrap().stdout, "Apply complete!");
        assert_eq!(runner.run(&invocation("output")).await.unwrap().stdout, "{}");
        assert_eq!(runner.count("apply"), 2);
        assert_eq!(runner.subcommands(), vec!["apply", "apply", "output"]);
    }
}
