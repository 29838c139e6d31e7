//! Schema version, payload size, and task allowlist enforcement.
use async_trait::async_trait;

use dotcelery_conf::SecurityConf;
use dotcelery_errors::SecurityViolation;
use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;

/// Canonical order of the built-in `SecurityValidation` filter.
pub const ORDER: i32 = -2000;

/// Rejects deliveries that violate the configured `security.*` policy before any handler runs.
///
/// A violation is surfaced as an error (`SecurityViolation`), not a short-circuit: it is
/// classified as a terminal `Rejected` outcome with security metadata, which the
/// executor produces by catching this specific error type out of the pre-phase.
pub struct SecurityValidationFilter {
    conf: SecurityConf,
}

impl SecurityValidationFilter {
    pub fn new(conf: SecurityConf) -> Self {
        SecurityValidationFilter { conf }
    }
}

#[async_trait]
impl Filter for SecurityValidationFilter {
    fn name(&self) -> &str {
        "SecurityValidation"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        if let Some(max_version) = self.conf.max_allowed_schema_version {
            if ctx.schema_version > max_version {
                return Err(SecurityViolation {
                    task_id: ctx.task.task_id.clone(),
                    reason: format!(
                        "schema version {} exceeds maximum allowed {}",
                        ctx.schema_version, max_version
                    ),
                    metadata: serde_json::json!({"schemaVersion": ctx.schema_version, "maxAllowed": max_version}),
                }
                .into());
            }
        }

        if let Some(max_bytes) = self.conf.max_payload_size_bytes {
            if ctx.args.len() as u64 > max_bytes {
                return Err(SecurityViolation {
                    task_id: ctx.task.task_id.clone(),
                    reason: format!("payload size {} exceeds maximum {}", ctx.args.len(), max_bytes),
                    metadata: serde_json::json!({"payloadSize": ctx.args.len(), "maxAllowed": max_bytes}),
                }
                .into());
            }
        }

        if self.conf.enforce_task_allowlist
            && !self.conf.allowed_task_names.iter().any(|name| name == &ctx.task.task_name)
        {
            return Err(SecurityViolation {
                task_id: ctx.task.task_id.clone(),
                reason: format!("task '{}' is not in the configured allowlist", ctx.task.task_name),
                metadata: serde_json::json!({"task": ctx.task.task_name}),
            }
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_model::TaskMessage;
    use dotcelery_registry::fixture_task_context;

    use super::*;

    fn message() -> TaskMessage {
        TaskMessage::builder("demo.task", "default").finish().unwrap()
    }

    #[tokio::test]
    async fn rejects_payloads_over_the_configured_limit() {
        let filter = SecurityValidationFilter::new(SecurityConf {
            max_payload_size_bytes: Some(4),
            ..Default::default()
        });
        let message = message();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"too-big-payload", 1);
        let error = filter.on_executing(&mut ctx).await.unwrap_err();
        assert!(error.is::<SecurityViolation>());
    }

    #[tokio::test]
    async fn rejects_tasks_outside_the_allowlist() {
        let filter = SecurityValidationFilter::new(SecurityConf {
            enforce_task_allowlist: true,
            allowed_task_names: vec!["other.task".into()],
            ..Default::default()
        });
        let message = message();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"", 1);
        let error = filter.on_executing(&mut ctx).await.unwrap_err();
        assert!(error.is::<SecurityViolation>());
    }

    #[tokio::test]
    async fn admits_compliant_deliveries() {
        let filter = SecurityValidationFilter::new(SecurityConf::default());
        let message = message();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"{}", 1);
        filter.on_executing(&mut ctx).await.unwrap();
    }
}
