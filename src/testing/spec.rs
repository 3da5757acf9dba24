//! Test suite configuration types
//!
//! Typed form of a workflow test suite file. Suite files are YAML (JSON is
//! accepted too, being a YAML subset):
//!
//! ```yaml
//! galaxy_url: http://localhost:8080
//! output_folder: results
//! enable_logger: true
//! workflows:
//!   change_case:
//!     file: change_case/workflow.ga
//!     inputs:
//!       InputText: change_case/input
//!     params:
//!       3: { orthoI: "NA" }
//!     expected:
//!       OutputText:
//!         file: change_case/expected_output
//!         comparator: default
//! ```

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::common::config::default_output_folder;
use crate::common::paths::resolve;
use crate::common::{Error, Result};
use crate::service::ParamBindings;

use super::comparators::ComparatorRegistry;
use super::loader::WorkflowDefinition;

/// Run flags that cascade: call argument > case > suite > built-in (`false`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_logger: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_debug: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_cleanup: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_assertions: Option<bool>,
}

impl RunOptions {
    /// Keep the values set here, take the rest from `fallback`
    pub fn or(&self, fallback: &RunOptions) -> RunOptions {
        RunOptions {
            enable_logger: self.enable_logger.or(fallback.enable_logger),
            enable_debug: self.enable_debug.or(fallback.enable_debug),
            disable_cleanup: self.disable_cleanup.or(fallback.disable_cleanup),
            disable_assertions: self.disable_assertions.or(fallback.disable_assertions),
        }
    }

    /// Apply the built-in defaults
    pub fn resolve(&self) -> EffectiveOptions {
        EffectiveOptions {
            enable_logger: self.enable_logger.unwrap_or(false),
            enable_debug: self.enable_debug.unwrap_or(false),
            disable_cleanup: self.disable_cleanup.unwrap_or(false),
            disable_assertions: self.disable_assertions.unwrap_or(false),
        }
    }
}

/// Fully resolved run flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EffectiveOptions {
    pub enable_logger: bool,
    pub enable_debug: bool,
    pub disable_cleanup: bool,
    pub disable_assertions: bool,
}

/// Files bound to one workflow input label
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputBinding {
    /// Uploaded in this order
    pub files: Vec<PathBuf>,
    /// Datatype hint passed to the upload (e.g. "tabular")
    pub file_type: Option<String>,
}

/// An expected output and how to compare it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedOutput {
    pub file: PathBuf,
    /// Registry key; `None` selects the default line diff
    pub comparator: Option<String>,
}

/// On-disk format of a suite file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Yaml,
    Json,
}

impl ConfigFormat {
    /// JSON for `.json` files, YAML otherwise
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Yaml,
        }
    }
}

/// One configured workflow test
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseSpec {
    pub name: String,
    /// Base for relative workflow, input and expected paths
    pub base_path: PathBuf,
    /// Workflow definition file, relative to `base_path`
    pub workflow_file: PathBuf,
    pub inputs: BTreeMap<String, InputBinding>,
    pub params: ParamBindings,
    pub expected: BTreeMap<String, ExpectedOutput>,
    pub output_folder: PathBuf,
    pub options: RunOptions,
}

impl TestCaseSpec {
    /// Create an empty case; outputs default to `results/<name>`
    pub fn new(name: impl Into<String>, base_path: impl Into<PathBuf>, workflow_file: impl Into<PathBuf>) -> Self {
        let name = name.into();
        let output_folder = PathBuf::from(default_output_folder()).join(&name);
        Self {
            name,
            base_path: base_path.into(),
            workflow_file: workflow_file.into(),
            inputs: BTreeMap::new(),
            params: ParamBindings::new(),
            expected: BTreeMap::new(),
            output_folder,
            options: RunOptions::default(),
        }
    }

    pub fn with_input(mut self, label: &str, files: &[&str], file_type: Option<&str>) -> Self {
        self.add_input(label, files, file_type);
        self
    }

    pub fn with_param(mut self, step: &str, name: &str, value: serde_json::Value) -> Self {
        self.add_param(step, name, value);
        self
    }

    pub fn with_expected(mut self, name: &str, file: &str, comparator: Option<&str>) -> Self {
        self.add_expected(name, file, comparator);
        self
    }

    /// Bind files to an input label, replacing any previous binding
    pub fn add_input(&mut self, label: &str, files: &[&str], file_type: Option<&str>) {
        self.inputs.insert(
            label.to_string(),
            InputBinding {
                files: files.iter().map(PathBuf::from).collect(),
                file_type: file_type.map(str::to_string),
            },
        );
    }

    pub fn remove_input(&mut self, label: &str) -> Option<InputBinding> {
        self.inputs.remove(label)
    }

    pub fn input(&self, label: &str) -> Option<&InputBinding> {
        self.inputs.get(label)
    }

    pub fn add_param(&mut self, step: &str, name: &str, value: serde_json::Value) {
        self.params
            .entry(step.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Remove one parameter; a step left without parameters is dropped
    pub fn remove_param(&mut self, step: &str, name: &str) -> Option<serde_json::Value> {
        let values = self.params.get_mut(step)?;
        let removed = values.remove(name);
        if values.is_empty() {
            self.params.remove(step);
        }
        removed
    }

    /// Parameters of one workflow step
    pub fn step_params(&self, step: &str) -> Option<&BTreeMap<String, serde_json::Value>> {
        self.params.get(step)
    }

    pub fn param(&self, step: &str, name: &str) -> Option<&serde_json::Value> {
        self.params.get(step)?.get(name)
    }

    pub fn add_expected(&mut self, name: &str, file: &str, comparator: Option<&str>) {
        self.expected.insert(
            name.to_string(),
            ExpectedOutput {
                file: PathBuf::from(file),
                comparator: comparator.map(str::to_string),
            },
        );
    }

    pub fn remove_expected(&mut self, name: &str) -> Option<ExpectedOutput> {
        self.expected.remove(name)
    }

    pub fn expected_output(&self, name: &str) -> Option<&ExpectedOutput> {
        self.expected.get(name)
    }

    /// Write this case as a one-case suite file
    ///
    /// The suite base and output folders are the case's parent folders, so
    /// loading the file back yields the same case.
    pub fn save(&self, path: &Path, format: ConfigFormat) -> Result<()> {
        let mut suite = TestSuiteSpec::new(self.name.clone());
        suite.base_path = self.base_path.clone();
        suite.output_folder = self
            .output_folder
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        suite.add_case(self.clone())?;
        suite.save(path, format)
    }

    pub fn with_output_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.output_folder = folder.into();
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Absolute (or cwd-relative) path of the workflow definition
    pub fn workflow_path(&self) -> PathBuf {
        resolve(&self.base_path, &self.workflow_file)
    }

    /// Problems that can be found without contacting the server
    pub fn validate(&self, comparators: &ComparatorRegistry) -> Vec<String> {
        let mut problems = Vec::new();
        if self.inputs.is_empty() {
            problems.push("no inputs configured".to_string());
        }
        if self.expected.is_empty() {
            problems.push("no expected outputs configured".to_string());
        }

        if let Err(e) = WorkflowDefinition::load(&self.workflow_path()) {
            problems.push(e.to_string());
        }
        for (label, input) in &self.inputs {
            for file in &input.files {
                let path = resolve(&self.base_path, file);
                if !path.is_file() {
                    problems.push(format!("input '{}': file not found: {}", label, path.display()));
                }
            }
        }
        for (name, expected) in &self.expected {
            if let Err(e) = comparators.resolve(expected.comparator.as_deref()) {
                problems.push(format!("output '{}': {}", name, e));
            }
            let path = resolve(&self.base_path, &expected.file);
            if !path.is_file() {
                problems.push(format!("output '{}': file not found: {}", name, path.display()));
            }
        }
        problems
    }
}

/// Connection settings for the execution service
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
    pub url: Option<String>,
    pub api_key: Option<String>,
}

/// A named collection of test cases in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct TestSuiteSpec {
    pub name: String,
    pub server: ServerConfig,
    pub base_path: PathBuf,
    pub output_folder: PathBuf,
    pub defaults: RunOptions,
    cases: Vec<TestCaseSpec>,
}

impl TestSuiteSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: ServerConfig::default(),
            base_path: PathBuf::from("."),
            output_folder: PathBuf::from(default_output_folder()),
            defaults: RunOptions::default(),
            cases: Vec::new(),
        }
    }

    /// Add a case; names must be unique
    pub fn add_case(&mut self, case: TestCaseSpec) -> Result<()> {
        if self.case(&case.name).is_some() {
            return Err(Error::Config(format!(
                "Duplicate workflow test name '{}'",
                case.name
            )));
        }
        self.cases.push(case);
        Ok(())
    }

    pub fn remove_case(&mut self, name: &str) -> Option<TestCaseSpec> {
        let idx = self.cases.iter().position(|c| c.name == name)?;
        Some(self.cases.remove(idx))
    }

    pub fn cases(&self) -> &[TestCaseSpec] {
        &self.cases
    }

    pub fn case(&self, name: &str) -> Option<&TestCaseSpec> {
        self.cases.iter().find(|c| c.name == name)
    }

    /// Render the suite in the suite file format
    ///
    /// Case paths are written relative to the suite folders where possible.
    pub fn to_config_string(&self, format: ConfigFormat) -> Result<String> {
        let mut workflows = serde_yaml::Mapping::new();
        for case in &self.cases {
            let raw = CaseFile::from_spec(case, &self.base_path, &self.output_folder);
            let value = serde_yaml::to_value(raw).map_err(|e| Error::Config(e.to_string()))?;
            workflows.insert(serde_yaml::Value::String(case.name.clone()), value);
        }
        let file = SuiteFile {
            galaxy_url: self.server.url.clone(),
            galaxy_api_key: self.server.api_key.clone(),
            base_path: Some(self.base_path.clone()),
            output_folder: Some(self.output_folder.clone()),
            options: self.defaults.clone(),
            workflows,
        };

        match format {
            ConfigFormat::Yaml => serde_yaml::to_string(&file).map_err(|e| Error::Config(e.to_string())),
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(&file)?),
        }
    }

    /// Write the suite to a YAML or JSON file
    pub fn save(&self, path: &Path, format: ConfigFormat) -> Result<()> {
        let content = self.to_config_string(format)?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, content)?;
        tracing::debug!("Saved suite '{}' to {}", self.name, path.display());
        Ok(())
    }

    /// Load a suite from a YAML or JSON file
    ///
    /// `output_folder` overrides the folder configured in the file.
    pub fn load(path: &Path, output_folder: Option<&Path>) -> Result<Self> {
        Self::load_with_default(path, output_folder, Path::new(&default_output_folder()))
    }

    /// Like [`load`](Self::load), with the folder used when neither the
    /// override nor the file names one
    pub fn load_with_default(
        path: &Path,
        output_folder: Option<&Path>,
        default_output: &Path,
    ) -> Result<Self> {
        if !path.is_file() {
            return Err(Error::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let config_dir = path
            .canonicalize()
            .ok()
            .and_then(|p| p.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."));
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "workflow-tests".to_string());

        Self::parse_with_default(&content, &config_dir, &name, output_folder, default_output)
            .map_err(|e| match e {
                Error::Config(message) => Error::config_parse(path, message),
                other => other,
            })
    }

    /// Parse suite content; relative paths resolve against `config_dir`
    pub fn parse(
        content: &str,
        config_dir: &Path,
        name: &str,
        output_folder: Option<&Path>,
    ) -> Result<Self> {
        Self::parse_with_default(
            content,
            config_dir,
            name,
            output_folder,
            Path::new(&default_output_folder()),
        )
    }

    fn parse_with_default(
        content: &str,
        config_dir: &Path,
        name: &str,
        output_folder: Option<&Path>,
        default_output: &Path,
    ) -> Result<Self> {
        let file: SuiteFile =
            serde_yaml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;

        let base_path = match &file.base_path {
            Some(p) => resolve(config_dir, p),
            None => config_dir.to_path_buf(),
        };
        let output_folder = output_folder
            .map(Path::to_path_buf)
            .or(file.output_folder.clone())
            .unwrap_or_else(|| default_output.to_path_buf());

        let mut suite = TestSuiteSpec {
            name: name.to_string(),
            server: ServerConfig {
                url: file.galaxy_url,
                api_key: file.galaxy_api_key,
            },
            base_path,
            output_folder,
            defaults: file.options,
            cases: Vec::new(),
        };

        if file.workflows.is_empty() {
            return Err(Error::Config("No workflows defined".to_string()));
        }

        for (key, value) in file.workflows {
            let case_name = scalar_to_string(&key)?;
            let raw: CaseFile = serde_yaml::from_value(value)
                .map_err(|e| Error::Config(format!("workflow '{}': {}", case_name, e)))?;
            let case = raw.into_spec(&case_name, &suite.base_path, &suite.output_folder)?;
            suite.add_case(case)?;
        }

        Ok(suite)
    }
}

#[derive(Serialize, Deserialize)]
struct SuiteFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    galaxy_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    galaxy_api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_folder: Option<PathBuf>,
    #[serde(flatten)]
    options: RunOptions,
    #[serde(default)]
    workflows: serde_yaml::Mapping,
}

#[derive(Serialize, Deserialize)]
struct CaseFile {
    file: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_path: Option<PathBuf>,
    #[serde(default)]
    inputs: BTreeMap<String, InputEntry>,
    #[serde(default, skip_serializing_if = "serde_yaml::Mapping::is_empty")]
    params: serde_yaml::Mapping,
    #[serde(default)]
    expected: BTreeMap<String, ExpectedEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    output_folder: Option<PathBuf>,
    #[serde(flatten)]
    options: RunOptions,
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum FileList {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl FileList {
    fn into_vec(self) -> Vec<PathBuf> {
        match self {
            FileList::One(p) => vec![p],
            FileList::Many(v) => v,
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum InputEntry {
    Files(FileList),
    Detailed {
        file: FileList,
        #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
        file_type: Option<String>,
    },
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum ExpectedEntry {
    File(PathBuf),
    Detailed {
        file: PathBuf,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        comparator: Option<String>,
    },
}

impl FileList {
    fn from_vec(mut files: Vec<PathBuf>) -> Self {
        if files.len() == 1 {
            FileList::One(files.remove(0))
        } else {
            FileList::Many(files)
        }
    }
}

/// `path` relative to `base`, `None` when they are the same folder
fn relative_to(path: &Path, base: &Path) -> Option<PathBuf> {
    match path.strip_prefix(base) {
        Ok(rel) if rel.as_os_str().is_empty() => None,
        Ok(rel) => Some(rel.to_path_buf()),
        Err(_) => Some(path.to_path_buf()),
    }
}

impl CaseFile {
    fn from_spec(case: &TestCaseSpec, suite_base: &Path, suite_output: &Path) -> Self {
        let output_folder = match relative_to(&case.output_folder, suite_output) {
            Some(rel) if rel == Path::new(&case.name) => None,
            Some(rel) => Some(rel),
            // the suite output folder itself
            None => Some(PathBuf::from(".")),
        };

        let inputs = case
            .inputs
            .iter()
            .map(|(label, input)| {
                let files = FileList::from_vec(input.files.clone());
                let entry = match &input.file_type {
                    Some(file_type) => InputEntry::Detailed {
                        file: files,
                        file_type: Some(file_type.clone()),
                    },
                    None => InputEntry::Files(files),
                };
                (label.clone(), entry)
            })
            .collect();

        let expected = case
            .expected
            .iter()
            .map(|(name, output)| {
                let entry = match &output.comparator {
                    Some(comparator) => ExpectedEntry::Detailed {
                        file: output.file.clone(),
                        comparator: Some(comparator.clone()),
                    },
                    None => ExpectedEntry::File(output.file.clone()),
                };
                (name.clone(), entry)
            })
            .collect();

        let mut params = serde_yaml::Mapping::new();
        for (step, values) in &case.params {
            let mut step_values = serde_yaml::Mapping::new();
            for (name, value) in values {
                step_values.insert(serde_yaml::Value::String(name.clone()), json_to_yaml(value));
            }
            params.insert(
                serde_yaml::Value::String(step.clone()),
                serde_yaml::Value::Mapping(step_values),
            );
        }

        CaseFile {
            file: case.workflow_file.clone(),
            base_path: relative_to(&case.base_path, suite_base),
            inputs,
            params,
            expected,
            output_folder,
            options: case.options.clone(),
        }
    }

    fn into_spec(self, name: &str, suite_base: &Path, suite_output: &Path) -> Result<TestCaseSpec> {
        let base_path = match &self.base_path {
            Some(p) => resolve(suite_base, p),
            None => suite_base.to_path_buf(),
        };
        let output_folder = suite_output.join(
            self.output_folder
                .clone()
                .unwrap_or_else(|| PathBuf::from(name)),
        );

        let inputs = self
            .inputs
            .into_iter()
            .map(|(label, entry)| {
                let binding = match entry {
                    InputEntry::Files(files) => InputBinding {
                        files: files.into_vec(),
                        file_type: None,
                    },
                    InputEntry::Detailed { file, file_type } => InputBinding {
                        files: file.into_vec(),
                        file_type,
                    },
                };
                (label, binding)
            })
            .collect();

        let expected = self
            .expected
            .into_iter()
            .map(|(output, entry)| {
                let expected = match entry {
                    ExpectedEntry::File(file) => ExpectedOutput {
                        file,
                        comparator: None,
                    },
                    ExpectedEntry::Detailed { file, comparator } => {
                        ExpectedOutput { file, comparator }
                    }
                };
                (output, expected)
            })
            .collect();

        let mut params = ParamBindings::new();
        for (step, values) in self.params {
            let step = scalar_to_string(&step)?;
            let values: BTreeMap<String, serde_yaml::Value> = serde_yaml::from_value(values)
                .map_err(|e| Error::Config(format!("workflow '{}', step {}: {}", name, step, e)))?;
            let entry = params.entry(step).or_default();
            for (param, value) in values {
                entry.insert(param, serde_json::to_value(value)?);
            }
        }

        Ok(TestCaseSpec {
            name: name.to_string(),
            base_path,
            workflow_file: self.file,
            inputs,
            params,
            expected,
            output_folder,
            options: self.options,
        })
    }
}

fn json_to_yaml(value: &serde_json::Value) -> serde_yaml::Value {
    use serde_json::Value as Json;
    use serde_yaml::Value as Yaml;

    match value {
        Json::Null => Yaml::Null,
        Json::Bool(b) => Yaml::Bool(*b),
        Json::Number(n) => {
            if let Some(i) = n.as_i64() {
                Yaml::Number(i.into())
            } else if let Some(u) = n.as_u64() {
                Yaml::Number(u.into())
            } else {
                Yaml::Number(n.as_f64().unwrap_or_default().into())
            }
        }
        Json::String(s) => Yaml::String(s.clone()),
        Json::Array(items) => Yaml::Sequence(items.iter().map(json_to_yaml).collect()),
        Json::Object(map) => Yaml::Mapping(
            map.iter()
                .map(|(k, v)| (Yaml::String(k.clone()), json_to_yaml(v)))
                .collect(),
        ),
    }
}

/// Mapping keys may be strings or numbers (step indexes)
fn scalar_to_string(value: &serde_yaml::Value) -> Result<String> {
    match value {
        serde_yaml::Value::String(s) => Ok(s.clone()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        other => Err(Error::Config(format!("Invalid key: {:?}", other))),
    }
}
