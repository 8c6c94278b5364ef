//! The firewall rule engine.
//!
//! The engine owns one dedicated chain. Bringing it up creates the chain,
//! hooks it into the forwarding chain, flushes it and appends the baseline
//! rules. Mutations are checked against the live chain first, so every
//! operation can be repeated safely. Lines in the chain that do not follow
//! the managed grammar are reported as unmanaged and never touched.

use ipnet::Ipv4Net;
use netlab_core::{CommandExecutor, ExecOutput, IpPool};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::command::{IptablesCommand, RuleOp};
use crate::error::{FirewallError, Result};
use crate::rule::{parse_network, BaselineRule, Endpoint, Rule, RuleAction};

/// Outcome of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleCheck {
    /// A literal matching rule is present.
    Present,
    /// No matching rule.
    Absent,
}

/// One rule considered by a mutation, mirror included.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleChange {
    /// The rule.
    pub rule: Rule,
    /// Whether the live chain was changed for it.
    pub applied: bool,
}

/// The live contents of the managed chain, in install order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainListing {
    /// Lines that follow the managed grammar.
    pub rules: Vec<Rule>,
    /// Lines that do not, verbatim.
    pub unmanaged: Vec<String>,
}

impl ChainListing {
    /// Parses `iptables -S <chain>` output.
    pub fn parse(output: &str, chain: &str, pool: &IpPool) -> Self {
        let mut listing = Self::default();

        for line in output.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let tokens: Vec<&str> = line.split_whitespace().collect();
            if is_declaration(&tokens, chain) {
                continue;
            }
            match parse_rule_line(&tokens, chain, pool) {
                Some(rule) => listing.rules.push(rule),
                None => listing.unmanaged.push(line.to_string()),
            }
        }

        listing
    }

    /// Returns true if nothing is in the chain.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty() && self.unmanaged.is_empty()
    }
}

fn is_declaration(tokens: &[&str], chain: &str) -> bool {
    matches!(
        tokens,
        [flag, name] if flag.eq_ignore_ascii_case("-N") && name.eq_ignore_ascii_case(chain)
    )
}

/// Matches `-A <chain> -s <src> -d <dst> -j <ACCEPT|DROP>` exactly.
fn parse_rule_line(tokens: &[&str], chain: &str, pool: &IpPool) -> Option<Rule> {
    let [append, name, s, source, d, target, j, action] = tokens else {
        return None;
    };
    let keywords_match = append.eq_ignore_ascii_case("-A")
        && name.eq_ignore_ascii_case(chain)
        && s.eq_ignore_ascii_case("-s")
        && d.eq_ignore_ascii_case("-d")
        && j.eq_ignore_ascii_case("-j");
    if !keywords_match {
        return None;
    }

    let action = RuleAction::from_target(action)?;
    let source = Endpoint::from_network(parse_network(source)?, pool);
    let target = Endpoint::from_network(parse_network(target)?, pool);
    Some(Rule::new(source, target, action))
}

/// Manages the dedicated chain through a command executor.
pub struct FirewallEngine<'a> {
    executor: &'a dyn CommandExecutor,
    pool: &'a IpPool,
    commands: IptablesCommand,
}

impl<'a> FirewallEngine<'a> {
    /// Creates an engine for the default managed chain.
    pub fn new(executor: &'a dyn CommandExecutor, pool: &'a IpPool) -> Self {
        Self {
            executor,
            pool,
            commands: IptablesCommand::default(),
        }
    }

    /// Creates and hooks the chain, then replaces its contents with `baseline`.
    pub async fn up(&self, baseline: &[BaselineRule]) -> Result<()> {
        self.ensure_available().await?;

        let rules: Vec<Rule> = baseline
            .iter()
            .flat_map(|b| b.rule.expand(b.one_way))
            .collect();
        let resolved = self.resolve_all(&rules)?;

        if self.chain_exists().await? {
            info!(chain = %self.commands.chain(), "Firewall chain already exists");
        } else {
            self.run_checked(&self.commands.create_chain()).await?;
            info!(chain = %self.commands.chain(), "Created firewall chain");
        }

        match self.check(&self.commands.jump(RuleOp::Check)).await? {
            RuleCheck::Present => debug!(chain = %self.commands.chain(), "Chain already hooked"),
            RuleCheck::Absent => {
                self.run_checked(&self.commands.jump(RuleOp::Insert)).await?;
                info!(chain = %self.commands.chain(), "Hooked chain into forwarding");
            }
        }

        self.run_checked(&self.commands.flush()).await?;

        for (rule, (source, target)) in rules.iter().zip(resolved) {
            self.apply(RuleOp::Append, rule, source, target).await?;
        }

        info!(
            chain = %self.commands.chain(),
            rules = rules.len(),
            "Firewall chain is up"
        );
        Ok(())
    }

    /// Flushes, unhooks and deletes the chain.
    pub async fn down(&self) -> Result<()> {
        self.ensure_available().await?;

        if !self.chain_exists().await? {
            info!(chain = %self.commands.chain(), "Firewall chain already absent");
            return Ok(());
        }

        self.run_checked(&self.commands.flush()).await?;
        while self.check(&self.commands.jump(RuleOp::Check)).await? == RuleCheck::Present {
            self.run_checked(&self.commands.jump(RuleOp::Delete)).await?;
        }
        self.run_checked(&self.commands.delete_chain()).await?;

        info!(chain = %self.commands.chain(), "Removed firewall chain");
        Ok(())
    }

    /// Inserts `rule` (and its mirror unless `one_way`) at the head of the chain.
    pub async fn insert(&self, rule: &Rule, one_way: bool) -> Result<Vec<RuleChange>> {
        self.mutate(RuleOp::Insert, rule, one_way).await
    }

    /// Appends `rule` (and its mirror unless `one_way`) at the tail of the chain.
    pub async fn append(&self, rule: &Rule, one_way: bool) -> Result<Vec<RuleChange>> {
        self.mutate(RuleOp::Append, rule, one_way).await
    }

    /// Deletes `rule` (and its mirror unless `one_way`) from the chain.
    pub async fn delete(&self, rule: &Rule, one_way: bool) -> Result<Vec<RuleChange>> {
        self.mutate(RuleOp::Delete, rule, one_way).await
    }

    /// Reads the live chain back into rules.
    ///
    /// An absent chain lists as empty.
    pub async fn list(&self) -> Result<ChainListing> {
        self.ensure_available().await?;

        let command = self.commands.list();
        let output = self.executor.run(&command).await?;
        match output.exit_code {
            0 => Ok(ChainListing::parse(
                &output.stdout,
                self.commands.chain(),
                self.pool,
            )),
            1 => Ok(ChainListing::default()),
            code => Err(FirewallError::command_failed(
                command,
                code,
                output.combined_output(),
            )),
        }
    }

    /// Returns true if the chain exists.
    pub async fn chain_exists(&self) -> Result<bool> {
        Ok(self.check(&self.commands.list()).await? == RuleCheck::Present)
    }

    /// Checks whether `rule` is present, without mirroring.
    pub async fn contains(&self, rule: &Rule) -> Result<RuleCheck> {
        let (source, target) = self.resolve(rule)?;
        self.check(&self.commands.rule(RuleOp::Check, source, target, rule.action))
            .await
    }

    async fn mutate(&self, op: RuleOp, rule: &Rule, one_way: bool) -> Result<Vec<RuleChange>> {
        self.ensure_available().await?;

        let rules = rule.expand(one_way);
        let resolved = self.resolve_all(&rules)?;

        let mut changes = Vec::with_capacity(rules.len());
        for (rule, (source, target)) in rules.into_iter().zip(resolved) {
            let applied = self.apply(op, &rule, source, target).await?;
            changes.push(RuleChange { rule, applied });
        }
        Ok(changes)
    }

    /// Applies one already-resolved rule after checking the live chain.
    async fn apply(
        &self,
        op: RuleOp,
        rule: &Rule,
        source: Ipv4Net,
        target: Ipv4Net,
    ) -> Result<bool> {
        let check = self
            .check(&self.commands.rule(RuleOp::Check, source, target, rule.action))
            .await?;

        match (op, check) {
            (RuleOp::Delete, RuleCheck::Absent) => {
                info!(rule = %rule, "Rule not found");
                Ok(false)
            }
            (RuleOp::Insert | RuleOp::Append, RuleCheck::Present) => {
                info!(rule = %rule, "Rule already exists");
                Ok(false)
            }
            (RuleOp::Check, _) => Ok(false),
            (op, _) => {
                self.run_checked(&self.commands.rule(op, source, target, rule.action))
                    .await?;
                match op {
                    RuleOp::Insert => info!(rule = %rule, "Inserted rule"),
                    RuleOp::Append => info!(rule = %rule, "Appended rule"),
                    _ => info!(rule = %rule, "Deleted rule"),
                }
                Ok(true)
            }
        }
    }

    fn resolve(&self, rule: &Rule) -> Result<(Ipv4Net, Ipv4Net)> {
        Ok((rule.source.resolve(self.pool)?, rule.target.resolve(self.pool)?))
    }

    fn resolve_all(&self, rules: &[Rule]) -> Result<Vec<(Ipv4Net, Ipv4Net)>> {
        rules.iter().map(|rule| self.resolve(rule)).collect()
    }

    async fn ensure_available(&self) -> Result<()> {
        if self.executor.is_available().await? {
            Ok(())
        } else {
            Err(FirewallError::EndpointUnavailable)
        }
    }

    /// Exit code 0 means present, 1 absent, anything else is an error.
    async fn check(&self, command: &str) -> Result<RuleCheck> {
        let output = self.executor.run(command).await?;
        match output.exit_code {
            0 => Ok(RuleCheck::Present),
            1 => Ok(RuleCheck::Absent),
            code => Err(FirewallError::command_failed(
                command,
                code,
                output.combined_output(),
            )),
        }
    }

    async fn run_checked(&self, command: &str) -> Result<ExecOutput> {
        debug!(command = %command, "Running firewall command");
        let output = self.executor.run(command).await?;
        if output.success() {
            Ok(output)
        } else {
            Err(FirewallError::command_failed(
                command,
                output.exit_code,
                output.combined_output(),
            ))
        }
    }
}
