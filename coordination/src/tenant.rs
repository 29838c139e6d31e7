//! Attaches tenant scoping information to the per-invocation properties bag.
use async_trait::async_trait;

use dotcelery_filters::Filter;
use dotcelery_filters::FilterContext;

/// Canonical order of the built-in `TenantContext` filter.
pub const ORDER: i32 = -2000;

const TENANT_PROPERTY: &str = "tenant_id";

/// Publishes the envelope's `tenantId` into the shared properties bag so downstream filters
/// (and, indirectly, handlers reading `ctx.properties`-derived state) see it without reaching
/// back into the raw envelope.
pub struct TenantContextFilter;

#[async_trait]
impl Filter for TenantContextFilter {
    fn name(&self) -> &str {
        "TenantContext"
    }

    fn order(&self) -> i32 {
        ORDER
    }

    async fn on_executing(&self, ctx: &mut FilterContext<'_>) -> anyhow::Result<()> {
        if let Some(tenant_id) = &ctx.task.tenant_id {
            ctx.properties
                .insert(TENANT_PROPERTY.to_string(), serde_json::json!(tenant_id));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use dotcelery_model::TaskMessage;
    use dotcelery_registry::fixture_task_context;

    use super::*;

    #[tokio::test]
    async fn attaches_tenant_id_when_present() {
        let message = TaskMessage::builder("demo.task", "default")
            .tenant_id("tenant-1")
            .finish()
            .unwrap();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"", 1);
        TenantContextFilter.on_executing(&mut ctx).await.unwrap();
        assert_eq!(ctx.properties.get(TENANT_PROPERTY), Some(&serde_json::json!("tenant-1")));
    }

    #[tokio::test]
    async fn no_op_without_a_tenant() {
        let message = TaskMessage::builder("demo.task", "default").finish().unwrap();
        let task = fixture_task_context(&message);
        let mut ctx = FilterContext::new(&task, b"", 1);
        TenantContextFilter.on_executing(&mut ctx).await.unwrap();
        assert!(ctx.properties.is_empty());
    }
}
