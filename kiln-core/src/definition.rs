//! Pipeline definition parser
//!
//! Parses the `.kiln.yml` file found at the root of a checkout:
//!
//! ```yaml
//! name: build
//! image: alpine:3.20
//! jobs:
//!   test:
//!     - ["cargo build", "cargo test"]
//!     - echo done
//! ```
//!
//! Each job is an ordered list of steps and each step an ordered list of
//! shell commands. A bare string is a one-command step. Jobs keep the order
//! they have in the document.

use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// File name of the pipeline definition, relative to the checkout root
pub const DEFINITION_FILE: &str = ".kiln.yml";

/// Largest definition file the runner will read
pub const MAX_DEFINITION_BYTES: u64 = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Parsed pipeline definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineDefinition {
    pub name: String,
    /// Base container image every command runs in
    pub image: String,
    pub jobs: Vec<JobDefinition>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobDefinition {
    pub name: String,
    pub steps: Vec<Vec<String>>,
}

impl PipelineDefinition {
    /// All commands of the run in execution order
    pub fn commands(&self) -> impl Iterator<Item = &str> {
        self.jobs
            .iter()
            .flat_map(|job| job.steps.iter())
            .flat_map(|step| step.iter())
            .map(String::as_str)
    }
}

#[derive(Deserialize)]
struct RawDefinition {
    name: String,
    image: String,
    #[serde(default)]
    jobs: Mapping,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawStep {
    Single(String),
    Sequence(Vec<String>),
}

/// Parse a pipeline definition from YAML source
///
/// # Errors
/// Returns an error if:
/// - The YAML is malformed or `name`/`image` are missing
/// - `image` starts with `-` or contains whitespace
/// - A job name is not a string or a job is not a list of steps
/// - The definition contains no command at all, or an empty command
pub fn parse_definition(source: &str) -> Result<PipelineDefinition, DefinitionError> {
    let raw: RawDefinition = serde_yaml::from_str(source)?;

    if raw.name.trim().is_empty() {
        return Err(DefinitionError::Invalid(
            "Pipeline 'name' cannot be empty".to_string(),
        ));
    }

    if raw.image.trim().is_empty() {
        return Err(DefinitionError::Invalid(
            "Pipeline 'image' cannot be empty".to_string(),
        ));
    }

    // The image reference ends up on the container runtime's command line
    if raw.image.starts_with('-') || raw.image.chars().any(char::is_whitespace) {
        return Err(DefinitionError::Invalid(format!(
            "Pipeline 'image' is not a valid image reference: {:?}",
            raw.image
        )));
    }

    let jobs = parse_jobs(raw.jobs)?;

    let definition = PipelineDefinition {
        name: raw.name,
        image: raw.image,
        jobs,
    };

    if definition.commands().next().is_none() {
        return Err(DefinitionError::Invalid(
            "Pipeline must declare at least one command".to_string(),
        ));
    }

    Ok(definition)
}

fn parse_jobs(mapping: Mapping) -> Result<Vec<JobDefinition>, DefinitionError> {
    let mut jobs = Vec::with_capacity(mapping.len());

    for (key, value) in mapping {
        let name = match key {
            Value::String(name) => name,
            other => {
                return Err(DefinitionError::Invalid(format!(
                    "Job names must be strings, found {:?}",
                    other
                )));
            }
        };

        let raw_steps: Vec<RawStep> = serde_yaml::from_value(value).map_err(|e| {
            DefinitionError::Invalid(format!("Job '{}' must be a list of steps: {}", name, e))
        })?;

        let steps = raw_steps
            .into_iter()
            .map(|step| match step {
                RawStep::Single(cmd) => vec![cmd],
                RawStep::Sequence(cmds) => cmds,
            })
            .collect::<Vec<_>>();

        if steps.iter().flatten().any(|cmd| cmd.trim().is_empty()) {
            return Err(DefinitionError::Invalid(format!(
                "Job '{}' contains an empty command",
                name
            )));
        }

        jobs.push(JobDefinition { name, steps });
    }

    Ok(jobs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_definition() {
        let source = r#"
name: hello
image: alpine
jobs:
  greet:
    - ["echo hello"]
"#;

        let definition = parse_definition(source).unwrap();
        assert_eq!(definition.name, "hello");
        assert_eq!(definition.image, "alpine");
        assert_eq!(definition.jobs.len(), 1);
        assert_eq!(definition.commands().collect::<Vec<_>>(), vec!["echo hello"]);
    }

    #[test]
    fn test_jobs_keep_document_order() {
        let source = r#"
name: ordered
image: alpine
jobs:
  zeta:
    - echo z
  alpha:
    - ["echo a1", "echo a2"]
    - echo a3
"#;

        let definition = parse_definition(source).unwrap();
        let names: Vec<_> = definition.jobs.iter().map(|j| j.name.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(
            definition.commands().collect::<Vec<_>>(),
            vec!["echo z", "echo a1", "echo a2", "echo a3"]
        );
    }

    #[test]
    fn test_missing_image_rejected() {
        let source = "name: x\njobs:\n  a:\n    - echo a\n";
        assert!(matches!(
            parse_definition(source),
            Err(DefinitionError::Yaml(_))
        ));
    }

    #[test]
    fn test_no_commands_rejected() {
        let source = "name: x\nimage: alpine\n";
        assert!(matches!(
            parse_definition(source),
            Err(DefinitionError::Invalid(_))
        ));
    }

    #[test]
    fn test_job_must_be_list() {
        let source = "name: x\nimage: alpine\njobs:\n  a: 42\n";
        assert!(matches!(
            parse_definition(source),
            Err(DefinitionError::Invalid(_))
        ));
    }

    #[test]
    fn test_empty_command_rejected() {
        let source = "name: x\nimage: alpine\njobs:\n  a:\n    - [\"echo a\", \"  \"]\n";
        assert!(matches!(
            parse_definition(source),
            Err(DefinitionError::Invalid(_))
        ));
    }

    #[test]
    fn test_malformed_yaml_rejected() {
        assert!(parse_definition("name: [unterminated").is_err());
    }

    #[test]
    fn test_option_like_image_rejected() {
        for image in ["--privileged", "-v/:/host", "alpine --rm"] {
            let source = format!(
                "name: x\nimage: \"{}\"\njobs:\n  b:\n    - echo hi\n",
                image
            );
            let err = parse_definition(&source).unwrap_err();
            assert!(
                matches!(err, DefinitionError::Invalid(ref msg) if msg.contains("image")),
                "{} should be rejected",
                image
            );
        }
    }

    #[test]
    fn test_registry_image_accepted() {
        let source = "name: x\nimage: registry.example.com:5000/team/build-env:1.2\njobs:\n  b:\n    - echo hi\n";
        let definition = parse_definition(source).unwrap();
        assert_eq!(definition.image, "registry.example.com:5000/team/build-env:1.2");
    }
}
