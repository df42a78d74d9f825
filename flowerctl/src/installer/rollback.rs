//! Ledger of applied install steps, undone in strict reverse order

use tracing::{info, warn};

use super::report::{Outcome, Report};
use crate::auth::htpasswd::{self, CredentialsChange};
use crate::context::HostContext;
use crate::deploy::venv::{self, AppChange};
use crate::proxy::{self, SiteChange};
use crate::service::{self, ServiceChange};

/// One applied step with the state needed to undo it
#[derive(Debug)]
pub enum AppliedStep {
    App(AppChange),
    Site(SiteChange),
    Credentials(CredentialsChange),
    Service(ServiceChange),
}

impl AppliedStep {
    fn name(&self) -> &'static str {
        match self {
            AppliedStep::App(_) => "app",
            AppliedStep::Site(_) => "proxy",
            AppliedStep::Credentials(_) => "auth",
            AppliedStep::Service(_) => "service",
        }
    }

    async fn undo(&self, ctx: &HostContext) -> Result<String, String> {
        match self {
            AppliedStep::App(change) => {
                venv::rollback(change).await.map_err(|e| e.to_string())?;
                Ok(if change.created_dir {
                    format!("removed {:?}", change.app_dir)
                } else if change.created_venv {
                    "removed virtualenv".to_string()
                } else {
                    "nothing to undo".to_string()
                })
            }
            AppliedStep::Site(change) => {
                proxy::rollback(ctx, change).await.map_err(|e| e.to_string())?;
                Ok(match (change.changed, &change.snapshot.previous_content) {
                    (false, _) => "nothing to undo".to_string(),
                    (true, Some(_)) => "previous site restored".to_string(),
                    (true, None) => "site removed".to_string(),
                })
            }
            AppliedStep::Credentials(change) => {
                htpasswd::restore_credentials(ctx, change)
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(match (change.changed, &change.previous) {
                    (false, _) => "nothing to undo".to_string(),
                    (true, Some(_)) => "previous credentials restored".to_string(),
                    (true, None) => "credentials removed".to_string(),
                })
            }
            AppliedStep::Service(change) => {
                service::rollback(ctx, change).await.map_err(|e| e.to_string())?;
                Ok(if change.previous.is_some() {
                    "previous unit restored".to_string()
                } else {
                    "unit removed".to_string()
                })
            }
        }
    }
}

/// Steps applied during one install run
#[derive(Debug, Default)]
pub struct RollbackLedger {
    steps: Vec<AppliedStep>,
}

impl RollbackLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, step: AppliedStep) {
        self.steps.push(step);
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Undo every step, last applied first. Keeps going past failures and
    /// returns whether every action succeeded.
    pub async fn unwind(self, ctx: &HostContext, report: &mut Report) -> bool {
        let mut complete = true;
        for step in self.steps.iter().rev() {
            match step.undo(ctx).await {
                Ok(detail) => {
                    info!("Rolled back {}: {}", step.name(), detail);
                    report.rollback_action(step.name(), Outcome::Changed, detail);
                }
                Err(e) => {
                    warn!("Rollback of {} failed: {}", step.name(), e);
                    report.rollback_action(step.name(), Outcome::Failed, e);
                    complete = false;
                }
            }
        }
        complete
    }
}
