//! PowerShell front end.
//!
//! Commands render as a single `Invoke-StorageLease` cmdlet call.
//! Successful output is a `Format-List` record:
//!
//! ```text
//!
//! LeaseId : 0f8fad5b-d9cb-469f-a165-70867728950e
//!
//! ```
//!
//! and failures are PowerShell error records whose
//! `FullyQualifiedErrorId` carries the error code:
//!
//! ```text
//! Invoke-StorageLease : There is already a lease present.
//!     + CategoryInfo          : InvalidOperation: (/c/b) [Invoke-StorageLease], LeaseException
//!     + FullyQualifiedErrorId : LeaseAlreadyPresent,Invoke-StorageLease
//! ```

use anyhow::{anyhow, bail};

use super::{CommandExecutor, CommandOutput, ExecutionContext, LeaseCommand, LeaseFields, LeaseOutcome};
use crate::errors::LeaseError;
use crate::storage::backend::ResourceRef;

const CMDLET: &str = "Invoke-StorageLease";

pub struct PowerShellExecutor {
    ctx: ExecutionContext,
}

impl PowerShellExecutor {
    pub fn new(ctx: ExecutionContext) -> Self {
        Self { ctx }
    }
}

fn target_args(resource: &ResourceRef) -> String {
    let mut args = format!("-Container '{}'", resource.container);
    if let Some(blob) = &resource.blob {
        args.push_str(&format!(" -Blob '{blob}'"));
    }
    if let Some(snapshot) = &resource.snapshot {
        args.push_str(&format!(" -SnapshotTime '{snapshot}'"));
    }
    args
}

fn action_name(command: &LeaseCommand) -> &'static str {
    match command {
        LeaseCommand::Acquire { .. } => "Acquire",
        LeaseCommand::Renew { .. } => "Renew",
        LeaseCommand::Change { .. } => "Change",
        LeaseCommand::Release { .. } => "Release",
        LeaseCommand::Break { .. } => "Break",
    }
}

/// Split a `Name : Value` list line.
fn list_entry(line: &str) -> Option<(&str, &str)> {
    let (name, value) = line.split_once(':')?;
    Some((name.trim(), value.trim()))
}

impl CommandExecutor for PowerShellExecutor {
    fn name(&self) -> &'static str {
        "powershell"
    }

    fn context(&self) -> &ExecutionContext {
        &self.ctx
    }

    fn command_line(&self, command: &LeaseCommand) -> String {
        let mut line = format!(
            "{CMDLET} {} -Action {}",
            target_args(command.resource()),
            action_name(command)
        );
        match command {
            LeaseCommand::Acquire {
                proposed_id,
                duration,
                ..
            } => {
                if let Some(id) = proposed_id {
                    line.push_str(&format!(" -ProposedLeaseId '{id}'"));
                }
                if let Some(secs) = duration {
                    line.push_str(&format!(" -Duration {secs}"));
                }
            }
            LeaseCommand::Renew { lease_id, .. } | LeaseCommand::Release { lease_id, .. } => {
                line.push_str(&format!(" -LeaseId '{lease_id}'"));
            }
            LeaseCommand::Change {
                lease_id,
                proposed_id,
                ..
            } => {
                line.push_str(&format!(
                    " -LeaseId '{lease_id}' -ProposedLeaseId '{proposed_id}'"
                ));
            }
            LeaseCommand::Break { break_period, .. } => {
                if let Some(secs) = break_period {
                    line.push_str(&format!(" -BreakPeriod {secs}"));
                }
            }
        }
        line
    }

    fn render_success(&self, _command: &LeaseCommand, outcome: &LeaseOutcome) -> String {
        match outcome {
            LeaseOutcome::Id(id) => format!("\nLeaseId : {id}\n\n"),
            LeaseOutcome::Time(secs) => format!("\nLeaseTime : {secs}\n\n"),
            LeaseOutcome::Released => String::new(),
        }
    }

    fn render_failure(&self, command: &LeaseCommand, error: &LeaseError) -> String {
        format!(
            "{CMDLET} : {message}\n\
             At line:1 char:1\n\
             + {invocation}\n\
             \x20   + CategoryInfo          : InvalidOperation: ({resource}) [{CMDLET}], LeaseException\n\
             \x20   + FullyQualifiedErrorId : {code},{CMDLET}\n",
            message = error,
            invocation = self.command_line(command),
            resource = command.resource(),
            code = error.code(),
        )
    }

    fn parse_output(&self, output: &CommandOutput) -> anyhow::Result<LeaseFields> {
        if !output.success {
            let prefix = format!("{CMDLET} : ");
            let message = output
                .stderr
                .lines()
                .find_map(|line| line.strip_prefix(prefix.as_str()))
                .ok_or_else(|| anyhow!("unrecognised PowerShell error output"))?;
            let code = output
                .stderr
                .lines()
                .filter_map(|line| list_entry(line.trim_start().trim_start_matches("+ ")))
                .find(|(name, _)| *name == "FullyQualifiedErrorId")
                .and_then(|(_, value)| value.split(',').next())
                .unwrap_or("Unknown");
            bail!("{code}: {message}");
        }

        let mut fields = LeaseFields::default();
        for (name, value) in output.stdout.lines().filter_map(list_entry) {
            match name {
                "LeaseId" => fields.id = Some(value.to_string()),
                "LeaseTime" => fields.time = Some(value.parse()?),
                _ => {}
            }
        }
        Ok(fields)
    }
}
