//! Container-stack tool: `docker compose` invocation and compose document
//! parsing.

use std::collections::BTreeMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use log::debug;
use serde_yaml::Value;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::{LifecycleError, Result};

#[async_trait::async_trait]
pub trait ComposeTool: Send + Sync {
    /// Bring the stack defined at `compose_path` up, returning captured output
    async fn up(&self, compose_path: &Path) -> Result<String>;
    /// Tear the stack defined at `compose_path` down
    async fn down(&self, compose_path: &Path) -> Result<String>;
    /// Run a command inside a running container
    async fn exec(&self, container: &str, args: &[String]) -> Result<String>;
}

/// Drives the `docker` CLI. Every invocation is bounded by `timeout`; an
/// expired call kills the child and surfaces as [`LifecycleError::Timeout`].
#[derive(Debug, Clone)]
pub struct DockerCompose {
    binary: String,
    timeout: Duration,
}

impl DockerCompose {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            timeout,
        }
    }

    async fn run(&self, operation: &str, args: &[String]) -> Result<String> {
        debug!("Running {} {}", self.binary, args.join(" "));

        let child = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let output = match timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                return Err(LifecycleError::Timeout {
                    operation: operation.to_string(),
                    seconds: self.timeout.as_secs(),
                })
            }
        };

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        if output.status.success() {
            Ok(captured)
        } else {
            Err(LifecycleError::Command {
                operation: operation.to_string(),
                output: captured,
                message: output.status.to_string(),
            })
        }
    }

    fn compose_args(compose_path: &Path, command: &[&str]) -> Vec<String> {
        let mut args = vec![
            "compose".to_string(),
            "-f".to_string(),
            compose_path.to_string_lossy().into_owned(),
        ];
        args.extend(command.iter().map(|s| s.to_string()));
        args
    }
}

#[async_trait::async_trait]
impl ComposeTool for DockerCompose {
    async fn up(&self, compose_path: &Path) -> Result<String> {
        self.run("compose up", &Self::compose_args(compose_path, &["up", "-d"]))
            .await
    }

    async fn down(&self, compose_path: &Path) -> Result<String> {
        self.run("compose down", &Self::compose_args(compose_path, &["down"]))
            .await
    }

    async fn exec(&self, container: &str, args: &[String]) -> Result<String> {
        let mut full = vec!["exec".to_string(), "-i".to_string(), container.to_string()];
        full.extend(args.iter().cloned());
        self.run("container exec", &full).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeService {
    pub name: String,
    pub container_name: String,
}

/// The part of a compose document the orchestrator relies on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComposeProject {
    pub services: Vec<ComposeService>,
}

impl ComposeProject {
    /// Parse a compose document after interpolating `env` into it.
    pub fn parse(text: &str, env: &BTreeMap<String, String>) -> Result<Self> {
        let text = interpolate(text, env);
        let document: Value =
            serde_yaml::from_str(&text).map_err(|e| LifecycleError::MalformedDocument {
                field: "document".to_string(),
                expected: format!("a YAML mapping ({e})"),
            })?;

        let services = document
            .get("services")
            .and_then(Value::as_mapping)
            .ok_or_else(|| LifecycleError::MalformedDocument {
                field: "services".to_string(),
                expected: "a mapping of service definitions".to_string(),
            })?;

        let mut parsed = Vec::with_capacity(services.len());
        for (name, definition) in services {
            let name = name
                .as_str()
                .ok_or_else(|| LifecycleError::MalformedDocument {
                    field: "services".to_string(),
                    expected: "string service names".to_string(),
                })?
                .to_string();
            let container_name = definition
                .get("container_name")
                .and_then(Value::as_str)
                .ok_or_else(|| LifecycleError::MalformedDocument {
                    field: format!("services.{name}.container_name"),
                    expected: "a string".to_string(),
                })?
                .to_string();
            parsed.push(ComposeService {
                name,
                container_name,
            });
        }

        Ok(Self { services: parsed })
    }

    /// The single service of the stack. Documents declaring several
    /// services are rejected rather than picking one arbitrarily.
    pub fn primary_service(&self) -> Result<&ComposeService> {
        match self.services.as_slice() {
            [service] => Ok(service),
            [] => Err(LifecycleError::MalformedDocument {
                field: "services".to_string(),
                expected: "exactly one service".to_string(),
            }),
            many => Err(LifecycleError::MultipleServices {
                services: many.iter().map(|s| s.name.clone()).collect(),
            }),
        }
    }

    pub fn container_names(&self) -> Vec<String> {
        self.services
            .iter()
            .map(|s| s.container_name.clone())
            .collect()
    }
}

/// Compose-style variable interpolation: `$$`, `$VAR`, `${VAR}`,
/// `${VAR:-default}` and `${VAR-default}`. Unknown variables become empty.
pub fn interpolate(text: &str, env: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            out.push(c);
            continue;
        }
        match chars.peek() {
            Some('$') => {
                chars.next();
                out.push('$');
            }
            Some('{') => {
                chars.next();
                let mut expr = String::new();
                let mut closed = false;
                for c in chars.by_ref() {
                    if c == '}' {
                        closed = true;
                        break;
                    }
                    expr.push(c);
                }
                if !closed {
                    out.push_str("${");
                    out.push_str(&expr);
                    continue;
                }
                out.push_str(&resolve(&expr, env));
            }
            Some(c) if c.is_ascii_alphabetic() || *c == '_' => {
                let mut name = String::new();
                while let Some(c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || *c == '_' {
                        name.push(*c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(env.get(&name).map(String::as_str).unwrap_or(""));
            }
            _ => out.push('$'),
        }
    }

    out
}

fn resolve(expr: &str, env: &BTreeMap<String, String>) -> String {
    if let Some((name, default)) = expr.split_once(":-") {
        return match env.get(name) {
            Some(value) if !value.is_empty() => value.clone(),
            _ => default.to_string(),
        };
    }
    if let Some((name, default)) = expr.split_once('-') {
        return env
            .get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string());
    }
    env.get(expr).cloned().unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_interpolate() {
        let vars = env(&[("NAME", "blog"), ("EMPTY", "")]);
        assert_eq!(interpolate("${NAME}-app", &vars), "blog-app");
        assert_eq!(interpolate("$NAME.db", &vars), "blog.db");
        assert_eq!(interpolate("${MISSING:-fallback}", &vars), "fallback");
        assert_eq!(interpolate("${EMPTY:-fallback}", &vars), "fallback");
        assert_eq!(interpolate("${EMPTY-fallback}", &vars), "");
        assert_eq!(interpolate("cost $$5", &vars), "cost $5");
    }

    #[test]
    fn test_parse_single_service() {
        let text = r#"
services:
  mysql:
    image: mysql:8.0
    container_name: ${CONTAINER_NAME}
    ports:
      - "${PANEL_APP_PORT_HTTP}:3306"
"#;
        let project = ComposeProject::parse(text, &env(&[("CONTAINER_NAME", "1Panel-mysql")])).unwrap();
        let service = project.primary_service().unwrap();
        assert_eq!(service.name, "mysql");
        assert_eq!(service.container_name, "1Panel-mysql");
    }

    #[test]
    fn test_multiple_services_rejected() {
        let text = r#"
services:
  web:
    container_name: web
  cache:
    container_name: cache
"#;
        let project = ComposeProject::parse(text, &BTreeMap::new()).unwrap();
        assert_eq!(project.container_names().len(), 2);
        match project.primary_service() {
            Err(LifecycleError::MultipleServices { services }) => assert_eq!(services.len(), 2),
            other => panic!("expected MultipleServices, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_slow_command_times_out() {
        let tool = DockerCompose::new("sleep", Duration::from_millis(200));
        match tool.run("compose up", &["5".to_string()]).await {
            Err(LifecycleError::Timeout { operation, seconds }) => {
                assert_eq!(operation, "compose up");
                assert_eq!(seconds, 0);
            }
            other => panic!("expected Timeout, got {:?}", other),
        }

        // A fast failure is a command error, not a timeout
        let tool = DockerCompose::new("false", Duration::from_secs(5));
        assert!(matches!(
            tool.run("compose down", &[]).await,
            Err(LifecycleError::Command { .. })
        ));
    }

    #[test]
    fn test_malformed_documents() {
        match ComposeProject::parse("version: '3'\n", &BTreeMap::new()) {
            Err(LifecycleError::MalformedDocument { field, .. }) => assert_eq!(field, "services"),
            other => panic!("expected MalformedDocument, got {:?}", other),
        }
        match ComposeProject::parse("services:\n  web:\n    image: nginx\n", &BTreeMap::new()) {
            Err(LifecycleError::MalformedDocument { field, .. }) => {
                assert_eq!(field, "services.web.container_name")
            }
            other => panic!("expected MalformedDocument, got {:?}", other),
        }
    }
}
