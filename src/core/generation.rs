use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tera::{Context, Tera};
use tracing::debug;

use crate::error::{Result, TrailError};
use super::intent::LearningIntent;
use super::relationships::CompositeAnalysis;
use super::traceability::{ArtifactKind, CodeEvidence};

const BASE_TEMPLATE: &str = r#"# {{ title }}

> Goal: {{ intent.goal }}

{% block body %}{% endblock body %}
## Evidence
{% for item in evidence %}
### {{ item.file_path }}:{{ item.line_start }}-{{ item.line_end }}

{{ item.context }}

```
{{ item.snippet }}
```
{% endfor %}"#;

const EXPLANATION_TEMPLATE: &str = r#"{% extends "base.md" %}{% block body %}{% for fact in facts %}- {{ fact }}
{% endfor %}{% endblock body %}"#;

const DATA_FLOW_TEMPLATE: &str = r#"{% extends "base.md" %}{% block body %}Data moves through {{ facts | length }} step(s):

{% for fact in facts %}{{ loop.index }}. {{ fact }}
{% endfor %}{% endblock body %}"#;

const EXECUTION_PATH_TEMPLATE: &str = r#"{% extends "base.md" %}{% block body %}Follow the calls in order:

{% for fact in facts %}{{ loop.index }}. {{ fact }}
{% endfor %}{% endblock body %}"#;

const PATTERN_TEMPLATE: &str = r#"{% extends "base.md" %}{% block body %}{% for fact in facts %}{{ fact }}
{% endfor %}{% endblock body %}"#;

/// Everything a generator gets to write one artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub title: String,
    pub intent: LearningIntent,
    pub facts: Vec<String>,
    pub evidence: Vec<CodeEvidence>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedArtifact {
    pub artifact_id: String,
    pub kind: ArtifactKind,
    pub title: String,
    pub content: String,
    pub evidence: Vec<CodeEvidence>,
}

/// Produces human-readable artifact text from evidence
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    fn generator_name(&self) -> &str;
}

/// Markdown generator backed by tera templates, one per artifact kind
pub struct TemplateGenerator {
    tera: Tera,
}

impl TemplateGenerator {
    pub fn new() -> Result<Self> {
        let mut tera = Tera::default();
        tera.add_raw_templates(vec![
            ("base.md", BASE_TEMPLATE),
            ("explanation.md", EXPLANATION_TEMPLATE),
            ("data_flow.md", DATA_FLOW_TEMPLATE),
            ("execution_path.md", EXECUTION_PATH_TEMPLATE),
            ("pattern.md", PATTERN_TEMPLATE),
        ])?;
        Ok(Self { tera })
    }

    /// Built-in templates, overridden by any `<name>.md.tera` file in `dir`
    pub fn with_template_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let mut generator = Self::new()?;
        let entries = std::fs::read_dir(dir.as_ref())
            .map_err(|e| TrailError::Generation(format!("Cannot read {}: {}", dir.as_ref().display(), e)))?;

        let mut overrides = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(name) = file_name.strip_suffix(".tera") {
                overrides.push((path.clone(), Some(name.to_string())));
            }
        }

        debug!("Loading {} template overrides", overrides.len());
        generator.tera.add_template_files(overrides)?;
        Ok(generator)
    }

    fn template_for(&self, kind: ArtifactKind) -> String {
        let name = format!("{}.md", kind.as_str());
        if self.tera.get_template_names().any(|t| t == name) {
            name
        } else {
            "explanation.md".to_string()
        }
    }
}

#[async_trait]
impl ContentGenerator for TemplateGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        let context = Context::from_serialize(request)?;
        Ok(self.tera.render(&self.template_for(request.kind), &context)?)
    }

    fn generator_name(&self) -> &str {
        "template"
    }
}

/// One request per data flow, execution path and pattern of the analysis
pub fn plan_artifacts(analysis: &CompositeAnalysis, intent: &LearningIntent) -> Vec<GenerationRequest> {
    let mut requests = Vec::new();

    for flow in &analysis.data_flows {
        let facts = flow
            .hops
            .iter()
            .map(|hop| format!("{} {} {}", hop.from, hop.kind, hop.to))
            .collect();
        requests.push(GenerationRequest {
            artifact_id: flow.id.clone(),
            kind: ArtifactKind::DataFlow,
            title: flow.description.clone(),
            intent: intent.clone(),
            facts,
            evidence: analysis.evidence_for_flow(flow),
        });
    }

    for path in &analysis.execution_paths {
        requests.push(GenerationRequest {
            artifact_id: path.id.clone(),
            kind: ArtifactKind::ExecutionPath,
            title: format!("Execution path from {}", path.entry),
            intent: intent.clone(),
            facts: path
                .steps
                .iter()
                .map(|step| format!("`{}` in {} (line {}): {}", step.symbol, step.file, step.line, step.description))
                .collect(),
            evidence: analysis.evidence_for_path(path),
        });
    }

    for pattern in &analysis.patterns {
        requests.push(GenerationRequest {
            artifact_id: pattern.id.clone(),
            kind: ArtifactKind::Pattern,
            title: format!("The {} pattern", pattern.kind),
            intent: intent.clone(),
            facts: vec![pattern.detail.clone()],
            evidence: analysis.evidence_for_pattern(pattern),
        });
    }

    requests
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_fs::prelude::*;
    use predicates::prelude::*;

    fn request(kind: ArtifactKind) -> GenerationRequest {
        GenerationRequest {
            artifact_id: "flow-1234abcd".to_string(),
            kind,
            title: "a.py passes payload to process in b.py".to_string(),
            intent: LearningIntent::new("how data gets processed", &["process"], &[]),
            facts: vec!["a.py calls b.py".to_string()],
            evidence: vec![CodeEvidence::new("a.py", 3, 3, "    return b.process(payload)", "Data leaves a.py")],
        }
    }

    #[tokio::test]
    async fn test_renders_builtin_templates() {
        let generator = TemplateGenerator::new().unwrap();
        let content = generator.generate(&request(ArtifactKind::DataFlow)).await.unwrap();

        assert!(content.starts_with("# a.py passes payload to process in b.py"));
        assert!(content.contains("1. a.py calls b.py"));
        assert!(content.contains("### a.py:3-3"));
        assert!(content.contains("    return b.process(payload)"));

        // Kinds without a dedicated template fall back to the explanation layout
        let diagram = generator.generate(&request(ArtifactKind::Diagram)).await.unwrap();
        assert!(diagram.contains("- a.py calls b.py"));
    }

    #[tokio::test]
    async fn test_template_dir_overrides() {
        let temp = assert_fs::TempDir::new().unwrap();
        temp.child("pattern.md.tera")
            .write_str("PATTERN {{ title }} ({{ evidence | length }} anchors)")
            .unwrap();
        temp.child("README.txt").write_str("ignored").unwrap();

        let generator = TemplateGenerator::with_template_dir(temp.path()).unwrap();
        let content = generator.generate(&request(ArtifactKind::Pattern)).await.unwrap();

        let expected = predicate::str::starts_with("PATTERN a.py passes").and(predicate::str::ends_with("(1 anchors)"));
        assert!(expected.eval(&content));
        assert_eq!(generator.generator_name(), "template");
    }
}
