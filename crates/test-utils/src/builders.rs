#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ffapipe::config::{
    ConfigFile, PipelineSection, RawConfigFile, SearchConfig, SourcesSection, StageConfig,
};
use ffapipe::types::Idempotence;

/// Builder for pipeline configs.
///
/// `build()` goes through validation like a loaded file does; `to_toml()`
/// renders the same config as a file for tests that drive the CLI entry
/// points.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(output_root: impl Into<PathBuf>) -> Self {
        Self {
            config: RawConfigFile {
                pipeline: PipelineSection {
                    output_root: output_root.into(),
                    workers: 1,
                    retry_budget: 2,
                    nodes: Vec::new(),
                },
                sources: SourcesSection::default(),
                searches: Vec::new(),
                stages: Vec::new(),
            },
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.config.pipeline.workers = workers;
        self
    }

    pub fn retry_budget(mut self, budget: u32) -> Self {
        self.config.pipeline.retry_budget = budget;
        self
    }

    pub fn nodes(mut self, nodes: &[&str]) -> Self {
        self.config.pipeline.nodes = nodes.iter().map(|n| n.to_string()).collect();
        self
    }

    /// Glob `pattern` under `root` for sources.
    pub fn source_glob(mut self, root: impl AsRef<Path>, pattern: &str) -> Self {
        self.config.sources.root = Some(root.as_ref().to_path_buf());
        self.config.sources.patterns.push(pattern.to_string());
        self
    }

    pub fn prefer(mut self, extensions: &[&str]) -> Self {
        self.config.sources.prefer = extensions.iter().map(|e| e.to_string()).collect();
        self
    }

    pub fn search(mut self, name: &str, params: &[(&str, &str)]) -> Self {
        self.config.searches.push(SearchConfig {
            name: name.to_string(),
            params: params
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<BTreeMap<_, _>>(),
        });
        self
    }

    pub fn stage(mut self, stage: StageConfig) -> Self {
        self.config.stages.push(stage);
        self
    }

    /// Convenience: stages named `names`, each producing `<name>.out`.
    pub fn simple_stages(mut self, names: &[&str]) -> Self {
        for name in names {
            self.config
                .stages
                .push(StageConfigBuilder::new(name).output(&format!("{name}.out")).build());
        }
        self
    }

    pub fn raw(&self) -> &RawConfigFile {
        &self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    pub fn to_toml(&self) -> String {
        let c = &self.config;
        let mut out = String::new();
        out.push_str("[pipeline]\n");
        out.push_str(&format!("output_root = {}\n", quote_path(&c.pipeline.output_root)));
        out.push_str(&format!("workers = {}\n", c.pipeline.workers));
        out.push_str(&format!("retry_budget = {}\n", c.pipeline.retry_budget));
        out.push_str(&format!("nodes = {}\n", quote_list(&c.pipeline.nodes)));

        out.push_str("\n[sources]\n");
        if let Some(root) = &c.sources.root {
            out.push_str(&format!("root = {}\n", quote_path(root)));
        }
        out.push_str(&format!("patterns = {}\n", quote_list(&c.sources.patterns)));
        out.push_str(&format!("exclude = {}\n", quote_list(&c.sources.exclude)));
        out.push_str(&format!("prefer = {}\n", quote_list(&c.sources.prefer)));

        for search in &c.searches {
            out.push_str("\n[[search]]\n");
            out.push_str(&format!("name = {}\n", quote(&search.name)));
            out.push_str("[search.params]\n");
            for (k, v) in &search.params {
                out.push_str(&format!("{} = {}\n", quote(k), quote(v)));
            }
        }

        for stage in &c.stages {
            out.push_str("\n[[stage]]\n");
            out.push_str(&format!("name = {}\n", quote(&stage.name)));
            out.push_str(&format!("program = {}\n", quote(&stage.program)));
            out.push_str(&format!("args = {}\n", quote_list(&stage.args)));
            out.push_str(&format!("outputs = {}\n", quote_list(&stage.outputs)));
            out.push_str(&format!("retryable = {}\n", stage.retryable));
            let idempotence = match stage.idempotence {
                Idempotence::Rerun => "rerun",
                Idempotence::Clear => "clear",
            };
            out.push_str(&format!("idempotence = \"{idempotence}\"\n"));
            out.push_str(&format!("checksum = {}\n", stage.checksum));
        }
        out
    }

    /// Write the config to `path` and return the path.
    pub fn write_to(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref().to_path_buf();
        std::fs::write(&path, self.to_toml()).expect("writing config file");
        path
    }
}

fn quote(s: &str) -> String {
    toml::Value::String(s.to_string()).to_string()
}

fn quote_path(p: &Path) -> String {
    quote(&p.to_string_lossy())
}

fn quote_list(items: &[String]) -> String {
    let quoted: Vec<String> = items.iter().map(|s| quote(s)).collect();
    format!("[{}]", quoted.join(", "))
}

/// Builder for `StageConfig`.
pub struct StageConfigBuilder {
    stage: StageConfig,
}

impl StageConfigBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            stage: StageConfig {
                name: name.to_string(),
                program: format!("{name}-tool"),
                args: vec!["{prev_dir}".to_string()],
                outputs: Vec::new(),
                retryable: true,
                idempotence: Idempotence::Rerun,
                checksum: false,
            },
        }
    }

    pub fn program(mut self, program: &str) -> Self {
        self.stage.program = program.to_string();
        self
    }

    pub fn args(mut self, args: &[&str]) -> Self {
        self.stage.args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn output(mut self, pattern: &str) -> Self {
        self.stage.outputs.push(pattern.to_string());
        self
    }

    pub fn retryable(mut self, val: bool) -> Self {
        self.stage.retryable = val;
        self
    }

    pub fn clear_before_run(mut self) -> Self {
        self.stage.idempotence = Idempotence::Clear;
        self
    }

    pub fn checksum(mut self, val: bool) -> Self {
        self.stage.checksum = val;
        self
    }

    pub fn build(self) -> StageConfig {
        self.stage
    }
}
