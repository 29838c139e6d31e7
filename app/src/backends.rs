//! Resolves a [`BackendConf`] into a concrete broker or result backend instance.
//!
//! Only the in-memory reference implementations ship with this crate; any other
//! `backend` id is reported as an unsupported-backend error rather than silently defaulting.
use std::sync::Arc;

use anyhow::bail;
use anyhow::Result;

use dotcelery_conf::BackendConf;
use dotcelery_memory::MemoryBroker;
use dotcelery_memory::MemoryResultBackend;
use dotcelery_model::Broker;
use dotcelery_model::ResultBackend;

pub fn broker(conf: &BackendConf) -> Result<Arc<dyn Broker>> {
    match conf.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryBroker::new())),
        other => bail!("unsupported broker backend '{other}'"),
    }
}

pub fn result_backend(conf: &BackendConf) -> Result<Arc<dyn ResultBackend>> {
    match conf.backend.as_str() {
        "memory" => Ok(Arc::new(MemoryResultBackend::new())),
        other => bail!("unsupported result backend '{other}'"),
    }
}
