// Assessment catalog: what each assessment is marked against

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use marker_common::types::TestCase;
use marker_common::{AssessmentId, Language};
use serde::Deserialize;

/// Marking definition for one assessment
#[derive(Debug, Clone, Deserialize)]
pub struct AssessmentSpec {
    pub id: AssessmentId,
    #[serde(default)]
    pub name: String,
    pub language: Language,
    /// File read from a submission directory
    pub source_file: String,
    /// Per-test execution limit
    #[serde(default = "default_time_limit")]
    pub time_limit_ms: u64,
    pub test_cases: Vec<TestCase>,
}

fn default_time_limit() -> u64 {
    5000
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    assessments: Vec<AssessmentSpec>,
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentCatalog {
    assessments: HashMap<AssessmentId, AssessmentSpec>,
}

impl AssessmentCatalog {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read assessment catalog {}", path.display()))?;
        Self::from_json(&raw)
            .with_context(|| format!("Invalid assessment catalog {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw)?;
        Self::from_specs(file.assessments)
    }

    pub fn from_specs(specs: Vec<AssessmentSpec>) -> Result<Self> {
        let mut assessments = HashMap::new();
        for spec in specs {
            if spec.source_file.trim().is_empty() {
                bail!("assessment {} has no source_file", spec.id);
            }
            let id = spec.id;
            if assessments.insert(id, spec).is_some() {
                bail!("assessment {} is defined twice", id);
            }
        }
        Ok(Self { assessments })
    }

    pub fn get(&self, id: AssessmentId) -> Option<&AssessmentSpec> {
        self.assessments.get(&id)
    }

    pub fn len(&self) -> usize {
        self.assessments.len()
    }
}
