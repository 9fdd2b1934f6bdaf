//! Validate recommendation objects as the write path would

use admission_lib::{
    admission::defaulting_edits, patch::Edit, validator::validate, FeatureGates,
    VerticalRecommendation,
};
use anyhow::{bail, Result};
use serde::Serialize;
use std::path::Path;

use crate::inputs::load_list;
use crate::output::{
    print_error, print_info, print_json, print_success, print_warning, OutputFormat,
};

/// Outcome for one recommendation object
#[derive(Debug, Serialize)]
pub struct Verdict {
    pub name: String,
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub defaults: Vec<Edit>,
}

pub fn check(
    recommendations: &[VerticalRecommendation],
    create: bool,
    features: &FeatureGates,
) -> Vec<Verdict> {
    recommendations
        .iter()
        .map(|rec| match validate(rec, create, features) {
            Ok(()) => Verdict {
                name: rec.name().to_string(),
                valid: true,
                error: None,
                defaults: defaulting_edits(rec),
            },
            Err(e) => Verdict {
                name: rec.name().to_string(),
                valid: false,
                error: Some(e.to_string()),
                defaults: Vec::new(),
            },
        })
        .collect()
}

/// Run the `validate` command
pub fn run(path: &Path, create: bool, features: &FeatureGates, format: OutputFormat) -> Result<()> {
    let recommendations: Vec<VerticalRecommendation> = load_list(path)?;
    if recommendations.is_empty() {
        print_warning(&format!("No recommendation objects in {}", path.display()));
        return Ok(());
    }
    let verdicts = check(&recommendations, create, features);

    match format {
        OutputFormat::Json => print_json(&verdicts),
        OutputFormat::Table => {
            for verdict in &verdicts {
                match &verdict.error {
                    None => print_success(&format!("{} is valid", verdict.name)),
                    Some(error) => print_error(&format!("{}: {}", verdict.name, error)),
                }
                for edit in &verdict.defaults {
                    print_info(&format!("{} would be defaulted at {}", verdict.name, edit.path));
                }
            }
        }
    }

    let failed = verdicts.iter().filter(|v| !v.valid).count();
    if failed > 0 {
        bail!("{} of {} recommendations failed validation", failed, verdicts.len());
    }
    Ok(())
}
