//! Command-line front ends for lease operations.
//!
//! A [`CommandExecutor`] takes a [`LeaseCommand`], runs it against an
//! injected [`LeaseManager`] with a fixed credential, and renders the
//! result the way a particular command-line tool prints it.  Each
//! executor can also parse its own output back into [`LeaseFields`], so
//! the same scenario can be driven through any front end and checked
//! against the same expectations.
//!
//! Two front ends exist:
//!
//! - [`powershell::PowerShellExecutor`] prints `Format-List` records and
//!   PowerShell error records;
//! - [`node_cli::NodeCliExecutor`] prints JSON and `error:` lines.

pub mod node_cli;
pub mod powershell;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tracing::debug;

use crate::auth::Credential;
use crate::errors::LeaseError;
use crate::lease::{LeaseId, LeaseManager};
use crate::storage::backend::ResourceRef;

// ── Commands and output ─────────────────────────────────────────────

/// A lease operation as typed on a command line.  Lease IDs are kept as
/// raw strings; validation happens in the manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseCommand {
    Acquire {
        resource: ResourceRef,
        proposed_id: Option<String>,
        duration: Option<i64>,
    },
    Renew {
        resource: ResourceRef,
        lease_id: String,
    },
    Change {
        resource: ResourceRef,
        lease_id: String,
        proposed_id: String,
    },
    Release {
        resource: ResourceRef,
        lease_id: String,
    },
    Break {
        resource: ResourceRef,
        break_period: Option<i64>,
    },
}

impl LeaseCommand {
    pub fn resource(&self) -> &ResourceRef {
        match self {
            LeaseCommand::Acquire { resource, .. }
            | LeaseCommand::Renew { resource, .. }
            | LeaseCommand::Change { resource, .. }
            | LeaseCommand::Release { resource, .. }
            | LeaseCommand::Break { resource, .. } => resource,
        }
    }

    /// Lower-case action name (`acquire`, `renew`, ...).
    pub fn action(&self) -> &'static str {
        match self {
            LeaseCommand::Acquire { .. } => "acquire",
            LeaseCommand::Renew { .. } => "renew",
            LeaseCommand::Change { .. } => "change",
            LeaseCommand::Release { .. } => "release",
            LeaseCommand::Break { .. } => "break",
        }
    }
}

/// What a command printed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Structured fields recovered from successful output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaseFields {
    /// Lease ID printed by acquire, renew and change.
    pub id: Option<String>,
    /// Remaining seconds printed by break.
    pub time: Option<u64>,
}

/// Result of a lease command before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseOutcome {
    Id(LeaseId),
    Time(u64),
    Released,
}

/// The manager and identity every command runs with.
#[derive(Clone)]
pub struct ExecutionContext {
    pub manager: Arc<LeaseManager>,
    pub credential: Credential,
}

impl ExecutionContext {
    pub fn new(manager: Arc<LeaseManager>, credential: Credential) -> Self {
        Self {
            manager,
            credential,
        }
    }
}

/// Run a command against the manager.
pub async fn dispatch(
    ctx: &ExecutionContext,
    command: &LeaseCommand,
) -> Result<LeaseOutcome, LeaseError> {
    let manager = &ctx.manager;
    let credential = &ctx.credential;
    match command {
        LeaseCommand::Acquire {
            resource,
            proposed_id,
            duration,
        } => manager
            .acquire(credential, resource, proposed_id.as_deref(), *duration)
            .await
            .map(|grant| LeaseOutcome::Id(grant.lease_id)),
        LeaseCommand::Renew { resource, lease_id } => manager
            .renew(credential, resource, lease_id)
            .await
            .map(|grant| LeaseOutcome::Id(grant.lease_id)),
        LeaseCommand::Change {
            resource,
            lease_id,
            proposed_id,
        } => manager
            .change(credential, resource, lease_id, proposed_id)
            .await
            .map(|grant| LeaseOutcome::Id(grant.lease_id)),
        LeaseCommand::Release { resource, lease_id } => manager
            .release(credential, resource, lease_id)
            .await
            .map(|()| LeaseOutcome::Released),
        LeaseCommand::Break {
            resource,
            break_period,
        } => manager
            .break_lease(credential, resource, *break_period)
            .await
            .map(|outcome| LeaseOutcome::Time(outcome.remaining_secs)),
    }
}

// ── Trait ───────────────────────────────────────────────────────────

/// A command-line front end over the lease manager.
pub trait CommandExecutor: Send + Sync {
    /// Short tool name used in logs.
    fn name(&self) -> &'static str;

    /// The manager and credential this executor runs with.
    fn context(&self) -> &ExecutionContext;

    /// The command line the tool would be invoked with.
    fn command_line(&self, command: &LeaseCommand) -> String;

    /// Render a successful outcome as the tool prints it to stdout.
    fn render_success(&self, command: &LeaseCommand, outcome: &LeaseOutcome) -> String;

    /// Render a failure as the tool prints it to stderr.
    fn render_failure(&self, command: &LeaseCommand, error: &LeaseError) -> String;

    /// Recover the lease fields from this tool's output.  Failed output
    /// becomes an error carrying the tool's message.
    fn parse_output(&self, output: &CommandOutput) -> anyhow::Result<LeaseFields>;

    /// Run `command` and capture what the tool prints.
    fn execute<'a>(
        &'a self,
        command: &'a LeaseCommand,
    ) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + 'a>> {
        Box::pin(async move {
            debug!("{} > {}", self.name(), self.command_line(command));
            match dispatch(self.context(), command).await {
                Ok(outcome) => CommandOutput {
                    success: true,
                    stdout: self.render_success(command, &outcome),
                    stderr: String::new(),
                },
                Err(error) => CommandOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: self.render_failure(command, &error),
                },
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::node_cli::NodeCliExecutor;
    use super::powershell::PowerShellExecutor;
    use super::*;
    use crate::auth::{Permissions, SasScope, ServiceSas};
    use crate::clock::ManualClock;
    use crate::lease::LeasePolicy;
    use crate::storage::backend::{Metadata, StorageBackend};
    use crate::storage::memory::MemoryBackend;
    use chrono::{DateTime, Duration, TimeZone, Utc};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 7, 1, 0, 0, 0).unwrap()
    }

    async fn manager() -> (Arc<ManualClock>, Arc<LeaseManager>) {
        let backend = Arc::new(MemoryBackend::new());
        backend
            .create_container("c", Metadata::new(), t0())
            .await
            .unwrap();
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = LeaseManager::new(backend, clock.clone(), LeasePolicy::default());
        (clock, Arc::new(manager))
    }

    fn owner() -> Credential {
        Credential::AccountKey {
            account: "devstoreaccount1".to_string(),
        }
    }

    fn executors(ctx: ExecutionContext) -> Vec<Box<dyn CommandExecutor>> {
        vec![
            Box::new(PowerShellExecutor::new(ctx.clone())),
            Box::new(NodeCliExecutor::new(ctx)),
        ]
    }

    fn container() -> ResourceRef {
        ResourceRef::container("c")
    }

    /// Acquire, change, break and reacquire through one front end.
    async fn lifecycle(executor: &dyn CommandExecutor, clock: &ManualClock) {
        let acquired = executor
            .execute(&LeaseCommand::Acquire {
                resource: container(),
                proposed_id: None,
                duration: Some(30),
            })
            .await;
        assert!(acquired.success, "{}: {}", executor.name(), acquired.stderr);
        let first = executor.parse_output(&acquired).unwrap().id.unwrap();

        let second = LeaseId::generate().to_string();
        let changed = executor
            .execute(&LeaseCommand::Change {
                resource: container(),
                lease_id: first.clone(),
                proposed_id: second.clone(),
            })
            .await;
        assert_eq!(
            executor.parse_output(&changed).unwrap().id.as_deref(),
            Some(second.as_str())
        );

        let stale = executor
            .execute(&LeaseCommand::Renew {
                resource: container(),
                lease_id: first,
            })
            .await;
        assert!(!stale.success);
        let err = executor.parse_output(&stale).unwrap_err().to_string();
        assert!(err.contains("did not match"), "{}: {err}", executor.name());

        let broken = executor
            .execute(&LeaseCommand::Break {
                resource: container(),
                break_period: Some(10),
            })
            .await;
        let remaining = executor.parse_output(&broken).unwrap().time.unwrap();
        assert_eq!(remaining, 10);

        clock.advance_secs(remaining as i64 + 1);
        let reacquired = executor
            .execute(&LeaseCommand::Acquire {
                resource: container(),
                proposed_id: None,
                duration: None,
            })
            .await;
        let third = executor.parse_output(&reacquired).unwrap().id.unwrap();
        assert_ne!(third, second);

        let released = executor
            .execute(&LeaseCommand::Release {
                resource: container(),
                lease_id: third,
            })
            .await;
        assert!(released.success);
        assert_eq!(executor.parse_output(&released).unwrap(), LeaseFields::default());
    }

    #[tokio::test]
    async fn test_lifecycle_through_every_executor() {
        for index in 0..2 {
            // A fresh manager per front end so leases do not collide.
            let (clock, manager) = manager().await;
            let executor = executors(ExecutionContext::new(manager, owner())).remove(index);
            lifecycle(executor.as_ref(), &clock).await;
        }
    }

    #[tokio::test]
    async fn test_invalid_proposed_id_through_every_executor() {
        let (_clock, manager) = manager().await;
        for executor in executors(ExecutionContext::new(manager.clone(), owner())) {
            let output = executor
                .execute(&LeaseCommand::Acquire {
                    resource: container(),
                    proposed_id: Some("abcefggdfdsfsdsddsdds".to_string()),
                    duration: None,
                })
                .await;
            assert!(!output.success);
            let err = executor.parse_output(&output).unwrap_err().to_string();
            assert!(err.contains("not in the correct format"), "{err}");
        }
        let props = manager
            .properties(&owner(), &container())
            .await
            .unwrap();
        assert_eq!(props.state, crate::lease::LeaseState::Available);
    }

    #[tokio::test]
    async fn test_read_list_token_through_every_executor() {
        let (_clock, manager) = manager().await;
        manager
            .acquire(&owner(), &container(), None, None)
            .await
            .unwrap();
        let reader = Credential::ServiceSas(ServiceSas {
            scope: SasScope::Container("c".to_string()),
            permissions: Permissions::parse("rl").unwrap(),
            start: None,
            expiry: t0() + Duration::hours(1),
        });
        for executor in executors(ExecutionContext::new(manager.clone(), reader.clone())) {
            let output = executor
                .execute(&LeaseCommand::Break {
                    resource: container(),
                    break_period: Some(0),
                })
                .await;
            assert!(!output.success);
            let err = executor.parse_output(&output).unwrap_err().to_string();
            assert!(err.contains("not authorized"), "{err}");
        }
    }

    #[test]
    fn test_command_accessors() {
        let command = LeaseCommand::Break {
            resource: container(),
            break_period: None,
        };
        assert_eq!(command.action(), "break");
        assert_eq!(command.resource(), &container());
    }
}
