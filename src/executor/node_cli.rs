//! Node command-line front end.
//!
//! Commands render as `azure storage <container|blob> lease <action>`
//! invocations with `--json`.  Successful output is a JSON object,
//! `{"id": "..."}` or `{"time": n}`; failures are `error:` lines on
//! stderr, the first of which carries the message.

use anyhow::{anyhow, bail};
use serde::{Deserialize, Serialize};

use super::{CommandExecutor, CommandOutput, ExecutionContext, LeaseCommand, LeaseFields, LeaseOutcome};
use crate::errors::LeaseError;
use crate::storage::backend::ResourceKind;

const ERROR_PREFIX: &str = "error:";

#[derive(Debug, Default, Serialize, Deserialize)]
struct JsonLease {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time: Option<u64>,
}

pub struct NodeCliExecutor {
    ctx: ExecutionContext,
}

impl NodeCliExecutor {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }
}

impl CommandExecutor for NodeCliExecutor {
    fn name(&self) -> &'static str {
        "node-cli"
    }

    fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn command_line(&self, command: &LeaseCommand) -> String {
        let resource = command.resource();
        let noun = match resource.kind() {
            ResourceKind::Container => "container",
            ResourceKind::Blob => "blob",
        };
        let mut args = vec![
            format!("azure storage {noun} lease {}", command.action()),
            format!("--container {}", resource.container),
        ];
        if let Some(blob) = &resource.blob {
            args.push(format!("--blob {blob}"));
        }
        if let Some(snapshot) = &resource.snapshot {
            args.push(format!("--snapshot {snapshot}"));
        }
        match command {
            LeaseCommand::Acquire {
                proposed_id,
                duration,
                ..
            } => {
                if let Some(secs) = duration {
                    args.push(format!("--duration {secs}"));
                }
                if let Some(id) = proposed_id {
                    args.push(format!("--proposed-id {id}"));
                }
            }
            LeaseCommand::Renew { lease_id, .. } | LeaseCommand::Release { lease_id, .. } => {
                args.push(format!("--lease {lease_id}"));
            }
            LeaseCommand::Change {
                lease_id,
                proposed_id,
                ..
            } => {
                args.push(format!("--lease {lease_id}"));
                args.push(format!("--proposed-id {proposed_id}"));
            }
            LeaseCommand::Break { break_period, .. } => {
                if let Some(secs) = break_period {
                    args.push(format!("--period {secs}"));
                }
            }
        }
        args.push("--json".to_string());
        args.join(" ")
    }

    fn render_success(&self, _command: &LeaseCommand, outcome: &LeaseOutcome) -> String {
        let body = match outcome {
            LeaseOutcome::Id(id) => JsonLease {
                id: Some(id.to_string()),
                time: None,
            },
            LeaseOutcome::Time(secs) => JsonLease {
                id: None,
                time: Some(*secs),
            },
            LeaseOutcome::Released => return String::new(),
        };
        // Serializing a struct of strings and integers cannot fail.
        serde_json::to_string_pretty(&body).unwrap_or_default() + "\n"
    }

    fn render_failure(&self, command: &LeaseCommand, error: &LeaseError) -> String {
        format!(
            "{ERROR_PREFIX}   {error}\n\
             {ERROR_PREFIX}   Error information has been recorded to azure.err\n\
             {ERROR_PREFIX}   storage {} lease {} command failed\n",
            command.resource().kind(),
            command.action()
        )
    }

    fn parse_output(&self, output: &CommandOutput) -> anyhow::Result<LeaseFields> {
        if !output.success {
            let message = output
                .stderr
                .lines()
                .find_map(|line| line.strip_prefix(ERROR_PREFIX))
                .map(str::trim)
                .ok_or_else(|| anyhow!("unrecognised CLI error output"))?;
            bail!("{message}");
        }

        let stdout = output.stdout.trim();
        if stdout.is_empty() {
            return Ok(LeaseFields::default());
        }
        let parsed: JsonLease = serde_json::from_str(stdout)?;
        Ok(LeaseFields {
            id: parsed.id,
            time: parsed.time,
        })
    }
}
