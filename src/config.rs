//! Configuration for the mock resolver.
//!
//! Defines the definition record schema and resolver settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::path::{compile_path, CompileOptions};

/// Main configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct MockHttpConfig {
    /// Directories holding one definition per YAML file
    #[serde(default)]
    pub definition_dirs: Vec<PathBuf>,

    /// Inline definitions
    #[serde(default)]
    pub definitions: Vec<DefinitionSpec>,

    /// Global settings
    #[serde(default)]
    pub settings: Settings,
}

impl MockHttpConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (i, definition) in self.definitions.iter().enumerate() {
            definition
                .validate(self.settings.case_sensitive_paths)
                .map_err(|e| anyhow::anyhow!("Definition {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A single mock definition as it appears in a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSpec {
    /// Upstream host this definition mocks
    pub host: String,

    /// Path template (`/users/:id`, `/files/*path`)
    pub path: String,

    /// HTTP method
    pub method: String,

    /// Free-text description
    #[serde(default)]
    pub desc: String,

    /// Candidate responses in declaration order
    #[serde(default)]
    pub responses: Vec<ResponseSpec>,
}

impl DefinitionSpec {
    /// Validate the definition record.
    pub fn validate(&self, case_sensitive: bool) -> anyhow::Result<()> {
        if self.host.trim().is_empty() {
            anyhow::bail!("host cannot be empty");
        }
        if self.path.is_empty() {
            anyhow::bail!("path cannot be empty");
        }
        http::Method::from_bytes(self.method.trim().to_uppercase().as_bytes())
            .map_err(|_| anyhow::anyhow!("Invalid method: {}", self.method))?;
        compile_path(&self.path, CompileOptions::new().case_sensitive(case_sensitive))?;
        for (i, response) in self.responses.iter().enumerate() {
            response
                .validate()
                .map_err(|e| anyhow::anyhow!("response {}: {}", i, e))?;
        }
        Ok(())
    }
}

/// A candidate response as it appears in a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    /// Response headers, names kept as declared
    #[serde(default)]
    pub response_headers: BTreeMap<String, String>,

    /// Response body (template source when `enable_template` is set)
    #[serde(default)]
    pub response_body: String,

    /// HTTP status code
    #[serde(default = "default_status")]
    pub status_code: u16,

    /// Render the body as a template
    #[serde(default)]
    pub enable_template: bool,

    /// Delay in milliseconds the caller should wait before replying
    #[serde(default)]
    pub delay: u64,

    /// Rule expressions; all must hold for this response to be chosen
    #[serde(default)]
    pub rules: Vec<String>,
}

fn default_status() -> u16 {
    200
}

impl ResponseSpec {
    /// Validate the response record.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.status_code < 100 || self.status_code > 599 {
            anyhow::bail!("Invalid status code: {}", self.status_code);
        }
        Ok(())
    }
}

impl Default for ResponseSpec {
    fn default() -> Self {
        Self {
            response_headers: BTreeMap::new(),
            response_body: String::new(),
            status_code: default_status(),
            enable_template: false,
            delay: 0,
            rules: Vec::new(),
        }
    }
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    /// Compile path templates case-sensitively
    #[serde(default = "default_true")]
    pub case_sensitive_paths: bool,

    /// Log matched definitions
    #[serde(default = "default_true")]
    pub log_matches: bool,

    /// Log requests that fell through to the upstream
    #[serde(default = "default_true")]
    pub log_unmatched: bool,

    /// Forward to the upstream when resolution fails with a hard error
    #[serde(default = "default_true")]
    pub passthrough_on_error: bool,

    /// Minimum simulated latency for mocked calls (ms)
    #[serde(default)]
    pub latency_ms: u64,
}

fn default_true() -> bool {
    true
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            case_sensitive_paths: true,
            log_matches: true,
            log_unmatched: true,
            passthrough_on_error: true,
            latency_ms: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_definition_record() {
        let yaml = r#"
host: marketplace.com
path: /check-price
method: POST
desc: Testing Marketplace Price Endpoint
responses:
  - response_headers:
      Content-Type: application/json
    response_body: "{\"user_name\": \"Mocker\", \"price\": 1000}"
    status_code: 200
  - response_headers:
      Content-Type: application/json
    response_body: "{\"user_name\": \"William\", \"price\": 2000}"
    delay: 1000
    status_code: 488
    enable_template: false
    rules:
      - body.name == "William"
"#;
        let definition: DefinitionSpec = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(definition.host, "marketplace.com");
        assert_eq!(definition.responses.len(), 2);
        assert!(definition.responses[0].rules.is_empty());
        assert_eq!(definition.responses[1].delay, 1000);
        assert_eq!(definition.responses[1].status_code, 488);
        assert_eq!(
            definition.responses[1].response_headers.get("Content-Type"),
            Some(&"application/json".to_string())
        );
        assert!(definition.validate(true).is_ok());
    }

    #[test]
    fn test_response_defaults() {
        let yaml = r#"
host: example.com
path: /hello
method: get
responses:
  - response_body: hi
"#;
        let definition: DefinitionSpec = serde_yaml::from_str(yaml).unwrap();
        let response = &definition.responses[0];
        assert_eq!(response.status_code, 200);
        assert_eq!(response.delay, 0);
        assert!(!response.enable_template);
        assert!(response.response_headers.is_empty());
        assert!(definition.validate(true).is_ok());
    }

    #[test]
    fn test_parse_config_file_layout() {
        let yaml = r#"
definition_dirs:
  - ./mock-data
definitions:
  - host: example.com
    path: /users/:id
    method: GET
    responses:
      - status_code: 200
        enable_template: true
        response_body: "user {{id}}"
settings:
  case_sensitive_paths: false
  latency_ms: 5
"#;
        let config: MockHttpConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.definition_dirs, vec![PathBuf::from("./mock-data")]);
        assert_eq!(config.definitions.len(), 1);
        assert!(!config.settings.case_sensitive_paths);
        assert!(config.settings.passthrough_on_error);
        assert_eq!(config.settings.latency_ms, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_settings() {
        let yaml = r#"
settings:
  passthrough_unmatched: true
"#;
        assert!(serde_yaml::from_str::<MockHttpConfig>(yaml).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_records() {
        let mut definition = DefinitionSpec {
            host: "example.com".to_string(),
            path: "/files/*rest/more".to_string(),
            method: "GET".to_string(),
            desc: String::new(),
            responses: vec![ResponseSpec::default()],
        };
        assert!(definition.validate(true).is_err());

        definition.path = "/files/*rest".to_string();
        assert!(definition.validate(true).is_ok());

        definition.responses[0].status_code = 42;
        assert!(definition.validate(true).is_err());

        definition.responses[0].status_code = 200;
        definition.method = "GE T".to_string();
        assert!(definition.validate(true).is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mockhttp.yaml");
        std::fs::write(
            &path,
            "definitions:\n  - host: a.com\n    path: /x\n    method: GET\n",
        )
        .unwrap();
        let config = MockHttpConfig::from_file(&path).unwrap();
        assert_eq!(config.definitions[0].path, "/x");
    }
}
