//! Workflow definition loading
//!
//! [`WorkflowLoader`] parses workflow definition files (Galaxy `.ga` JSON),
//! imports them into the execution service and keeps one imported copy per
//! (file, name) pair. Runners share that copy and release it when done; the
//! last holder deletes it remotely.

use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;

use crate::common::{Error, Result};
use crate::service::{ExecutionService, ToolInfo, WorkflowHandle};

/// Prefix of every workflow name imported by the tester
pub const WORKFLOW_NAME_PREFIX: &str = "WorkflowTest_";

/// Step types that declare workflow inputs
const INPUT_STEP_TYPES: &[&str] = &["data_input", "data_collection_input", "parameter_input"];

/// One step of a workflow definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkflowStep {
    pub id: String,
    pub step_type: String,
    pub label: Option<String>,
    pub tool_id: Option<String>,
    pub tool_version: Option<String>,
}

impl WorkflowStep {
    pub fn is_input(&self) -> bool {
        INPUT_STEP_TYPES.contains(&self.step_type.as_str())
    }

    /// The tool this step runs, if it is a tool step
    pub fn tool(&self) -> Option<ToolInfo> {
        self.tool_id.as_ref().map(|id| ToolInfo {
            id: id.clone(),
            version: self.tool_version.clone().unwrap_or_default(),
        })
    }
}

/// A parsed workflow definition
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub steps: Vec<WorkflowStep>,
    raw: Value,
}

impl WorkflowDefinition {
    /// Read and parse a definition file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        let value: Value = serde_json::from_str(&content)
            .map_err(|e| Error::config_parse(path, format!("invalid workflow JSON: {}", e)))?;
        Self::from_json(value).map_err(|e| match e {
            Error::Config(message) => Error::config_parse(path, message),
            other => other,
        })
    }

    /// Build a definition from its JSON form
    pub fn from_json(raw: Value) -> Result<Self> {
        let obj = raw
            .as_object()
            .ok_or_else(|| Error::Config("workflow definition must be a JSON object".into()))?;

        let name = obj
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or("workflow")
            .to_string();

        let mut steps = Vec::new();
        if let Some(map) = obj.get("steps").and_then(Value::as_object) {
            for (key, step) in map {
                steps.push(parse_step(key, step)?);
            }
        }
        // JSON object keys are step indexes; order them numerically
        steps.sort_by_key(|s| (s.id.parse::<u64>().unwrap_or(u64::MAX), s.id.clone()));

        Ok(Self { name, steps, raw })
    }

    /// Labels of the input steps, in step order
    pub fn input_labels(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.is_input())
            .filter_map(|s| s.label.as_deref())
            .collect()
    }

    /// Distinct tools referenced by the steps
    pub fn tools(&self) -> Vec<ToolInfo> {
        self.steps
            .iter()
            .filter_map(WorkflowStep::tool)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// The definition as read from disk
    pub fn raw(&self) -> &Value {
        &self.raw
    }
}

fn parse_step(key: &str, step: &Value) -> Result<WorkflowStep> {
    let obj = step
        .as_object()
        .ok_or_else(|| Error::Config(format!("step {} is not an object", key)))?;
    let text = |field: &str| obj.get(field).and_then(Value::as_str).map(str::to_string);

    let id = match obj.get("id") {
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::String(s)) => s.clone(),
        _ => key.to_string(),
    };
    // Input steps carry their label either directly or as the first input name
    let label = text("label").or_else(|| {
        obj.get("inputs")
            .and_then(Value::as_array)
            .and_then(|inputs| inputs.first())
            .and_then(|input| input.get("name"))
            .and_then(Value::as_str)
            .map(str::to_string)
    });

    Ok(WorkflowStep {
        id,
        step_type: text("type").unwrap_or_else(|| "tool".to_string()),
        label,
        tool_id: text("tool_id"),
        tool_version: text("tool_version"),
    })
}

/// A workflow imported into the execution service
#[derive(Debug, Clone)]
pub struct LoadedWorkflow {
    pub handle: WorkflowHandle,
    pub definition: Arc<WorkflowDefinition>,
}

type CacheKey = (PathBuf, Option<String>);

struct CacheEntry {
    loaded: LoadedWorkflow,
    holders: usize,
}

/// Imports workflow definitions and shares the imported copies
pub struct WorkflowLoader {
    service: Arc<dyn ExecutionService>,
    cache: Mutex<HashMap<CacheKey, CacheEntry>>,
}

impl WorkflowLoader {
    pub fn new(service: Arc<dyn ExecutionService>) -> Self {
        Self {
            service,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Import (or reuse) the workflow at `path`
    ///
    /// The imported name is `WorkflowTest_<name>`, where `name` is
    /// `name_override` or the name inside the definition. Every successful
    /// call must be balanced by a [`release`](Self::release).
    pub async fn load(&self, path: &Path, name_override: Option<&str>) -> Result<LoadedWorkflow> {
        let canonical = path
            .canonicalize()
            .map_err(|_| Error::NotFound(path.to_path_buf()))?;
        let key = (canonical, name_override.map(str::to_string));

        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.get_mut(&key) {
            entry.holders += 1;
            tracing::debug!(
                "Reusing workflow {} ({} holders)",
                entry.loaded.handle,
                entry.holders
            );
            return Ok(entry.loaded.clone());
        }

        let definition = WorkflowDefinition::load(&key.0)?;
        let name = format!(
            "{}{}",
            WORKFLOW_NAME_PREFIX,
            name_override.unwrap_or(&definition.name)
        );
        let handle = self.service.import_workflow(definition.raw(), &name).await?;
        tracing::debug!("Workflow '{}' imported as {}", name, handle);

        let loaded = LoadedWorkflow {
            handle,
            definition: Arc::new(definition),
        };
        cache.insert(
            key,
            CacheEntry {
                loaded: loaded.clone(),
                holders: 1,
            },
        );
        Ok(loaded)
    }

    /// Drop one holder; the last one deletes the workflow remotely
    pub async fn release(&self, handle: &WorkflowHandle) -> Result<()> {
        let mut cache = self.cache.lock().await;
        let Some(key) = find_key(&cache, handle) else {
            return Ok(());
        };

        let remaining = match cache.get_mut(&key) {
            Some(entry) => {
                entry.holders = entry.holders.saturating_sub(1);
                entry.holders
            }
            None => return Ok(()),
        };
        if remaining > 0 {
            return Ok(());
        }

        cache.remove(&key);
        self.service.delete_workflow(handle).await?;
        tracing::debug!("Workflow {} unloaded", handle);
        Ok(())
    }

    /// Delete the workflow remotely regardless of holders
    pub async fn unload(&self, handle: &WorkflowHandle) -> Result<()> {
        let mut cache = self.cache.lock().await;
        if let Some(key) = find_key(&cache, handle) {
            cache.remove(&key);
        }
        self.service.delete_workflow(handle).await?;
        tracing::debug!("Workflow {} unloaded", handle);
        Ok(())
    }

    /// Delete every cached workflow; returns the first failure
    pub async fn unload_all(&self) -> Result<()> {
        let entries: Vec<CacheEntry> = {
            let mut cache = self.cache.lock().await;
            cache.drain().map(|(_, entry)| entry).collect()
        };

        let mut first_error = None;
        for entry in entries {
            if let Err(e) = self.service.delete_workflow(&entry.loaded.handle).await {
                tracing::warn!("Failed to unload workflow {}: {}", entry.loaded.handle, e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Number of workflows currently imported through this loader
    pub async fn loaded_count(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn find_key(cache: &HashMap<CacheKey, CacheEntry>, handle: &WorkflowHandle) -> Option<CacheKey> {
    cache
        .iter()
        .find(|(_, entry)| &entry.loaded.handle == handle)
        .map(|(key, _)| key.clone())
}
