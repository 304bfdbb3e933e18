use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Output, Stdio};

use anyhow::Context;
use tokio::process::Command;

use crate::fleet::{Fleet, FleetResult, OperationHandle, OperationStatus, PowerState, Resource};

/// Configuration of the Google Compute Engine backend.
#[derive(Clone, Debug)]
pub struct GcloudConfig {
    pub project: String,
    pub zone: String,
    pub machine_type: String,
    pub image_family: String,
    /// Label key attached to created instances, and expected on listed ones.
    pub label: String,
}

/// Fleet backend driving Google Compute Engine through the `gcloud` CLI.
///
/// `start` and `create` pass `--async` and hand back the operation name;
/// `poll` resolves it with `gcloud compute operations describe`.
pub struct GcloudFleet {
    gcloud_path: PathBuf,
    config: GcloudConfig,
}

impl GcloudFleet {
    pub fn new(config: GcloudConfig) -> anyhow::Result<Self> {
        let gcloud_path = which::which("gcloud")
            .context("Cannot find the gcloud binary, is the Google Cloud SDK installed?")?;
        Ok(Self {
            gcloud_path,
            config,
        })
    }
}

impl Fleet for GcloudFleet {
    fn list(&self, label: &str) -> Pin<Box<dyn Future<Output = FleetResult<Vec<Resource>>>>> {
        let filter = format!("labels.{label}:*");
        let arguments = [
            "compute",
            "instances",
            "list",
            "--filter",
            &filter,
            "--zones",
            &self.config.zone,
            "--project",
            &self.config.project,
            "--format",
            "json",
        ];
        log::debug!("Running gcloud command `{}`", arguments.join(" "));
        let mut command = create_command(&self.gcloud_path, &arguments);

        Box::pin(async move {
            let output = command
                .output()
                .await
                .context("gcloud instances list start failed")?;
            let output =
                check_command_output(output).context("gcloud instances list failed")?;
            parse_instance_list(&output.stdout)
        })
    }

    fn start(
        &mut self,
        resource: &Resource,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>> {
        let arguments = [
            "compute",
            "instances",
            "start",
            &resource.name,
            "--zone",
            &self.config.zone,
            "--project",
            &self.config.project,
            "--async",
            "--format",
            "json",
        ];
        log::debug!("Running gcloud command `{}`", arguments.join(" "));
        let mut command = create_command(&self.gcloud_path, &arguments);
        let name = resource.name.clone();

        Box::pin(async move {
            let output = command
                .output()
                .await
                .context("gcloud instances start failed")?;
            let output = check_command_output(output)
                .with_context(|| format!("Cannot start instance {name}"))?;
            parse_operation_name(&output.stdout)
        })
    }

    fn create(
        &mut self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationHandle>>>> {
        let labels = format!("{}=true", self.config.label);
        let arguments = [
            "compute",
            "instances",
            "create",
            name,
            "--zone",
            &self.config.zone,
            "--project",
            &self.config.project,
            "--machine-type",
            &self.config.machine_type,
            "--image-family",
            &self.config.image_family,
            "--labels",
            &labels,
            "--async",
            "--format",
            "json",
        ];
        log::debug!("Running gcloud command `{}`", arguments.join(" "));
        let mut command = create_command(&self.gcloud_path, &arguments);
        let name = name.to_string();

        Box::pin(async move {
            let output = command
                .output()
                .await
                .context("gcloud instances create start failed")?;
            let output = check_command_output(output)
                .with_context(|| format!("Cannot create instance {name}"))?;
            parse_operation_name(&output.stdout)
        })
    }

    fn poll(
        &self,
        handle: &OperationHandle,
    ) -> Pin<Box<dyn Future<Output = FleetResult<OperationStatus>>>> {
        let arguments = [
            "compute",
            "operations",
            "describe",
            &handle.0,
            "--zone",
            &self.config.zone,
            "--project",
            &self.config.project,
            "--format",
            "json",
        ];
        log::debug!("Running gcloud command `{}`", arguments.join(" "));
        let mut command = create_command(&self.gcloud_path, &arguments);
        let handle = handle.clone();

        Box::pin(async move {
            let output = command
                .output()
                .await
                .context("gcloud operations describe start failed")?;
            let output = check_command_output(output)
                .with_context(|| format!("Cannot poll operation {handle}"))?;
            let value: serde_json::Value = serde_json::from_slice(&output.stdout)
                .context("Cannot parse gcloud operation JSON")?;
            parse_operation_status(&value)
        })
    }
}

fn create_command(program: &Path, arguments: &[&str]) -> Command {
    let mut command = Command::new(program);
    command.args(arguments);
    command.stdin(Stdio::null());
    command
}

fn check_command_output(output: Output) -> FleetResult<Output> {
    if !output.status.success() {
        return Err(anyhow::anyhow!(
            "gcloud exited with code {}\nStderr: {}\nStdout: {}",
            output.status.code().unwrap_or(-1),
            String::from_utf8_lossy(&output.stderr).trim(),
            String::from_utf8_lossy(&output.stdout).trim()
        ));
    }
    Ok(output)
}

fn parse_instance_list(stdout: &[u8]) -> FleetResult<Vec<Resource>> {
    let value: serde_json::Value =
        serde_json::from_slice(stdout).context("Cannot parse gcloud instance list JSON")?;
    let items = value
        .as_array()
        .ok_or_else(|| anyhow::anyhow!("Expected a JSON array of instances"))?;
    items.iter().map(parse_instance).collect()
}

fn parse_instance(value: &serde_json::Value) -> FleetResult<Resource> {
    let id = get_json_str(&value["id"], "Instance id")?.to_string();
    let name = get_json_str(&value["name"], "Instance name")?.to_string();
    let power_state = match get_json_str(&value["status"], "Instance status")? {
        "RUNNING" => PowerState::Running,
        "TERMINATED" => PowerState::Terminated,
        _ => PowerState::Other,
    };
    Ok(Resource {
        id,
        name,
        power_state,
    })
}

/// Parses the operation resource printed by an `--async` mutation.
/// Depending on the gcloud version it is either a single object or a
/// one-element array.
fn parse_operation_name(stdout: &[u8]) -> FleetResult<OperationHandle> {
    let value: serde_json::Value =
        serde_json::from_slice(stdout).context("Cannot parse gcloud operation JSON")?;
    let operation = match value.as_array() {
        Some(items) => items
            .first()
            .ok_or_else(|| anyhow::anyhow!("gcloud returned no operation"))?,
        None => &value,
    };
    let name = get_json_str(&operation["name"], "Operation name")?;
    Ok(OperationHandle(name.to_string()))
}

fn parse_operation_status(value: &serde_json::Value) -> FleetResult<OperationStatus> {
    let status = match get_json_str(&value["status"], "Operation status")? {
        "PENDING" | "RUNNING" => OperationStatus::Pending,
        "DONE" => {
            let error = value["error"]["errors"]
                .as_array()
                .map(|errors| {
                    errors
                        .iter()
                        .filter_map(|e| e["message"].as_str())
                        .collect::<Vec<_>>()
                        .join("; ")
                })
                .filter(|message| !message.is_empty());
            OperationStatus::Done { error }
        }
        status => anyhow::bail!("Unknown operation status {}", status),
    };
    Ok(status)
}

fn get_json_str<'a>(value: &'a serde_json::Value, context: &str) -> FleetResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("JSON key {} not found", context))
}

#[cfg(test)]
mod tests {
    use crate::fleet::gcloud::{parse_instance_list, parse_operation_name, parse_operation_status};
    use crate::fleet::{OperationStatus, PowerState};

    #[test]
    fn parse_instances() {
        let data = r#"[
            {"id": "633", "name": "deepdrive-eval-1", "status": "RUNNING"},
            {"id": "634", "name": "deepdrive-eval-2", "status": "TERMINATED"},
            {"id": "635", "name": "deepdrive-eval-3", "status": "STAGING"}
        ]"#;
        let resources = parse_instance_list(data.as_bytes()).unwrap();
        assert_eq!(resources.len(), 3);
        assert_eq!(resources[0].name, "deepdrive-eval-1");
        assert_eq!(resources[0].power_state, PowerState::Running);
        assert_eq!(resources[1].power_state, PowerState::Terminated);
        assert_eq!(resources[2].power_state, PowerState::Other);
    }

    #[test]
    fn parse_empty_instance_list() {
        assert!(parse_instance_list(b"[]").unwrap().is_empty());
    }

    #[test]
    fn parse_instance_without_name() {
        let data = r#"[{"id": "633", "status": "RUNNING"}]"#;
        assert!(parse_instance_list(data.as_bytes()).is_err());
    }

    #[test]
    fn parse_operation_from_array() {
        let data = r#"[{"name": "operation-163-a1", "status": "RUNNING"}]"#;
        let handle = parse_operation_name(data.as_bytes()).unwrap();
        assert_eq!(handle.0, "operation-163-a1");
    }

    #[test]
    fn parse_operation_from_object() {
        let data = r#"{"name": "operation-163-a1", "status": "PENDING"}"#;
        let handle = parse_operation_name(data.as_bytes()).unwrap();
        assert_eq!(handle.0, "operation-163-a1");
    }

    #[test]
    fn parse_pending_operation() {
        let value = serde_json::json!({"name": "operation-1", "status": "RUNNING"});
        assert_eq!(
            parse_operation_status(&value).unwrap(),
            OperationStatus::Pending
        );
    }

    #[test]
    fn parse_finished_operation() {
        let value = serde_json::json!({"name": "operation-1", "status": "DONE"});
        assert_eq!(
            parse_operation_status(&value).unwrap(),
            OperationStatus::Done { error: None }
        );
    }

    #[test]
    fn parse_failed_operation() {
        let value = serde_json::json!({
            "name": "operation-1",
            "status": "DONE",
            "error": {"errors": [
                {"code": "QUOTA_EXCEEDED", "message": "Quota 'CPUS' exceeded"},
                {"code": "ZONE_RESOURCE_POOL_EXHAUSTED", "message": "Zone exhausted"}
            ]}
        });
        assert_eq!(
            parse_operation_status(&value).unwrap(),
            OperationStatus::Done {
                error: Some("Quota 'CPUS' exceeded; Zone exhausted".to_string())
            }
        );
    }

    #[test]
    fn parse_unknown_operation_status() {
        let value = serde_json::json!({"name": "operation-1", "status": "MYSTERIOUS"});
        assert!(parse_operation_status(&value).is_err());
    }
}
