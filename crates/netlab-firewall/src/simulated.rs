//! In-memory iptables for tests and dry runs.
//!
//! [`SimulatedIptables`] interprets the subset of iptables the engine emits
//! (`-S`, `-N`, `-X`, `-F`, `-I`, `-A`, `-C`, `-D`) against an in-memory
//! table, with the same exit-code conventions as the real tool: 0 on
//! success, 1 when a chain or rule does not exist, 2 on bad arguments.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use netlab_core::{CommandExecutor, CoreError, ExecOutput};

use crate::command::FORWARD_HOOK;

const NO_SUCH_CHAIN: &str = "iptables: No chain/target/match by that name.";
const BAD_RULE: &str = "iptables: Bad rule (does a matching rule exist in that chain?).";

#[derive(Debug)]
struct TableState {
    available: bool,
    chains: BTreeMap<String, Vec<String>>,
    commands: Vec<String>,
    failures: Vec<(String, i64)>,
}

/// A command executor that emulates iptables.
#[derive(Debug)]
pub struct SimulatedIptables {
    state: Mutex<TableState>,
}

impl Default for SimulatedIptables {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedIptables {
    /// Creates a table holding only the forwarding hook chain.
    pub fn new() -> Self {
        let mut chains = BTreeMap::new();
        chains.insert(FORWARD_HOOK.to_string(), vec!["-j RETURN".to_string()]);
        Self {
            state: Mutex::new(TableState {
                available: true,
                chains,
                commands: Vec::new(),
                failures: Vec::new(),
            }),
        }
    }

    /// Makes the endpoint (un)available.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Makes every command starting with `prefix` exit with `exit_code`.
    pub fn fail_with(&self, prefix: impl Into<String>, exit_code: i64) {
        self.lock().failures.push((prefix.into(), exit_code));
    }

    /// Appends a raw rule body, bypassing the engine.
    pub fn inject(&self, chain: &str, body: &str) {
        self.lock()
            .chains
            .entry(chain.to_string())
            .or_default()
            .push(body.to_string());
    }

    /// Returns true if `chain` exists.
    pub fn has_chain(&self, chain: &str) -> bool {
        self.lock().chains.contains_key(chain)
    }

    /// Returns the rule bodies of `chain`, in order.
    pub fn rules(&self, chain: &str) -> Vec<String> {
        self.lock().chains.get(chain).cloned().unwrap_or_default()
    }

    /// Returns every command run so far.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Runs `command` against the table, ignoring availability.
    ///
    /// Lets another fake (such as an in-memory container engine) route the
    /// commands it receives here.
    pub fn execute(&self, command: &str) -> ExecOutput {
        let mut state = self.lock();
        state.commands.push(command.to_string());
        state.execute(command)
    }

    fn lock(&self) -> MutexGuard<'_, TableState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TableState {
    fn execute(&mut self, command: &str) -> ExecOutput {
        let failure = self
            .failures
            .iter()
            .find(|(prefix, _)| command.starts_with(prefix.as_str()));
        if let Some((_, code)) = failure {
            return ExecOutput::new("", "simulated failure", *code);
        }

        let tokens: Vec<&str> = command.split_whitespace().collect();
        match tokens.as_slice() {
            ["iptables", "-S", chain] => self.list(chain),
            ["iptables", "-N", chain] => {
                if self.chains.contains_key(*chain) {
                    return ExecOutput::new("", "iptables: Chain already exists.", 1);
                }
                self.chains.insert(chain.to_string(), Vec::new());
                ExecOutput::ok()
            }
            ["iptables", "-F", chain] => match self.chains.get_mut(*chain) {
                Some(rules) => {
                    rules.clear();
                    ExecOutput::ok()
                }
                None => ExecOutput::new("", NO_SUCH_CHAIN, 1),
            },
            ["iptables", "-X", chain] => self.delete_chain(chain),
            ["iptables", op @ ("-I" | "-A" | "-C" | "-D"), chain, body @ ..]
                if !body.is_empty() =>
            {
                self.rule(op, chain, &body.join(" "))
            }
            ["iptables", ..] => ExecOutput::new("", "iptables: Bad argument.", 2),
            _ => ExecOutput::new("", "command not found", 127),
        }
    }

    fn list(&self, chain: &str) -> ExecOutput {
        let Some(rules) = self.chains.get(chain) else {
            return ExecOutput::new("", NO_SUCH_CHAIN, 1);
        };
        let mut out = format!("-N {}\n", chain);
        for body in rules {
            out.push_str(&format!("-A {} {}\n", chain, body));
        }
        ExecOutput::new(out, "", 0)
    }

    fn delete_chain(&mut self, chain: &str) -> ExecOutput {
        match self.chains.get(chain) {
            None => return ExecOutput::new("", NO_SUCH_CHAIN, 1),
            Some(rules) if !rules.is_empty() => {
                return ExecOutput::new("", "iptables: Directory not empty.", 1)
            }
            Some(_) => {}
        }
        let jump = format!("-j {}", chain);
        if self.chains.values().flatten().any(|body| *body == jump) {
            return ExecOutput::new("", "iptables: Too many links.", 1);
        }
        self.chains.remove(chain);
        ExecOutput::ok()
    }

    fn rule(&mut self, op: &str, chain: &str, body: &str) -> ExecOutput {
        let Some(rules) = self.chains.get_mut(chain) else {
            return ExecOutput::new("", NO_SUCH_CHAIN, 1);
        };
        let position = rules.iter().position(|existing| existing == body);

        match (op, position) {
            ("-I", _) => rules.insert(0, body.to_string()),
            ("-A", _) => rules.push(body.to_string()),
            ("-C", Some(_)) => {}
            ("-D", Some(index)) => {
                rules.remove(index);
            }
            _ => return ExecOutput::new("", BAD_RULE, 1),
        }
        ExecOutput::ok()
    }
}

#[async_trait]
impl CommandExecutor for SimulatedIptables {
    async fn is_available(&self) -> netlab_core::Result<bool> {
        Ok(self.lock().available)
    }

    async fn run(&self, command: &str) -> netlab_core::Result<ExecOutput> {
        let mut state = self.lock();
        if !state.available {
            return Err(CoreError::executor(command, "endpoint is not running"));
        }
        state.commands.push(command.to_string());
        Ok(state.execute(command))
    }
}
