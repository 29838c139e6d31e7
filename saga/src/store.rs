//! Persistence for [`Saga`] records.
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;

use dotcelery_model::Saga;

#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn insert(&self, saga: Saga) -> Result<()>;
    async fn get(&self, id: &str) -> Result<Option<Saga>>;
    async fn update(&self, saga: Saga) -> Result<()>;

    /// Look up the saga currently waiting on a given `taskId`, used to route completion
    /// signals back to the step that issued them.
    async fn find_by_task_id(&self, task_id: &str) -> Result<Option<Saga>>;
}

/// A shared, cheaply cloneable handle to a [`SagaStore`] implementation.
#[derive(Clone)]
pub struct SagaStoreHandle(Arc<dyn SagaStore>);

impl SagaStoreHandle {
    pub fn new(store: impl SagaStore + 'static) -> Self {
        SagaStoreHandle(Arc::new(store))
    }

    pub async fn insert(&self, saga: Saga) -> Result<()> {
        self.0.insert(saga).await
    }

    pub async fn get(&self, id: &str) -> Result<Option<Saga>> {
        self.0.get(id).await
    }

    pub async fn update(&self, saga: Saga) -> Result<()> {
        self.0.update(saga).await
    }

    pub async fn find_by_task_id(&self, task_id: &str) -> Result<Option<Saga>> {
        self.0.find_by_task_id(task_id).await
    }
}

/// In-memory [`SagaStore`], the required test/local-dev variant.
#[derive(Default)]
pub struct MemorySagaStore(Mutex<HashMap<String, Saga>>);

#[async_trait]
impl SagaStore for MemorySagaStore {
    async fn insert(&self, saga: Saga) -> Result<()> {
        self.0.lock().unwrap().insert(saga.id.clone(), saga);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<Saga>> {
        Ok(self.0.lock().unwrap().get(id).cloned())
    }

    async fn update(&self, saga: Saga) -> Result<()> {
        self.0.lock().unwrap().insert(saga.id.clone(), saga);
        Ok(())
    }

    async fn find_by_task_id(&self, task_id: &str) -> Result<Option<Saga>> {
        Ok(self
            .0
            .lock()
            .unwrap()
            .values()
            .find(|saga| {
                saga.steps
                    .iter()
                    .any(|step| step.execute_task_id.as_deref() == Some(task_id) || step.compensate_task_id.as_deref() == Some(task_id))
            })
            .cloned())
    }
}
