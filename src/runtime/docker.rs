use std::path::Path;

use super::{CommandOutput, ContainerRuntime, RunSpec, RuntimeError, exec, tool_available};

/// Drives the docker CLI.
#[derive(Debug, Clone)]
pub struct DockerCli {
    program: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self::new("docker")
    }
}

impl DockerCli {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn build_args(context_dir: &Path, image: &str, build_args: &[String]) -> Vec<String> {
        let mut args = vec!["image".to_string(), "build".to_string()];
        for arg in build_args {
            args.push("--build-arg".to_string());
            args.push(arg.clone());
        }
        args.push("-t".to_string());
        args.push(image.to_string());
        args.push(context_dir.display().to_string());
        args
    }

    fn run_args(spec: RunSpec<'_>) -> Vec<String> {
        let mut args = vec![
            "container".to_string(),
            "run".to_string(),
            "--name".to_string(),
            spec.container.to_string(),
        ];
        if spec.remove_after_run {
            args.push("--rm".to_string());
        }
        args.push(spec.image.to_string());
        args.extend(spec.args.iter().cloned());
        args
    }

    async fn docker(&self, args: &[&str]) -> Result<CommandOutput, RuntimeError> {
        exec(&self.program, args).await
    }

    async fn docker_owned(&self, args: &[String]) -> Result<CommandOutput, RuntimeError> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        self.docker(&args).await
    }
}

impl ContainerRuntime for DockerCli {
    async fn missing_tools(&self) -> Vec<String> {
        if tool_available(&self.program).await {
            Vec::new()
        } else {
            vec![format!("{} is not installed", self.program)]
        }
    }

    async fn build_image(
        &self,
        context_dir: &Path,
        image: &str,
        build_args: &[String],
    ) -> Result<CommandOutput, RuntimeError> {
        tracing::info!(image, "Building container image");
        self.docker_owned(&Self::build_args(context_dir, image, build_args))
            .await
    }

    async fn run_container(&self, spec: RunSpec<'_>) -> Result<CommandOutput, RuntimeError> {
        tracing::info!(image = spec.image, container = spec.container, "Running job container");
        self.docker_owned(&Self::run_args(spec)).await
    }

    async fn prune_system(&self) -> Result<CommandOutput, RuntimeError> {
        self.docker(&["system", "prune", "-f"]).await
    }

    async fn prune_images(&self) -> Result<CommandOutput, RuntimeError> {
        self.docker(&["image", "prune", "-f"]).await
    }

    async fn container_exists(&self, container: &str) -> Result<bool, RuntimeError> {
        let output = self.docker(&["container", "inspect", container]).await?;
        Ok(output.success())
    }

    async fn remove_container(&self, container: &str) -> Result<CommandOutput, RuntimeError> {
        self.docker(&["container", "rm", "-f", container]).await
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        let output = self.docker(&["image", "inspect", image]).await?;
        Ok(output.success())
    }

    async fn remove_image(&self, image: &str) -> Result<CommandOutput, RuntimeError> {
        self.docker(&["image", "rm", "-f", image]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_args_forward_each_pair_verbatim() {
        let args = DockerCli::build_args(
            Path::new("/data/job1/files"),
            "job1-42",
            &["A=1".to_string(), "B_C=two".to_string()],
        );
        assert_eq!(
            args,
            vec![
                "image",
                "build",
                "--build-arg",
                "A=1",
                "--build-arg",
                "B_C=two",
                "-t",
                "job1-42",
                "/data/job1/files"
            ]
        );
    }

    #[test]
    fn run_args_place_runtime_args_after_image() {
        let runtime_args = vec!["--fail".to_string(), "fast".to_string()];
        let args = DockerCli::run_args(RunSpec {
            image: "job1-42",
            container: "bounty-job1-42",
            remove_after_run: true,
            args: &runtime_args,
        });
        assert_eq!(
            args,
            vec![
                "container",
                "run",
                "--name",
                "bounty-job1-42",
                "--rm",
                "job1-42",
                "--fail",
                "fast"
            ]
        );
    }

    #[test]
    fn run_args_without_remove_flag() {
        let args = DockerCli::run_args(RunSpec {
            image: "img",
            container: "ctr",
            remove_after_run: false,
            args: &[],
        });
        assert!(!args.contains(&"--rm".to_string()));
    }

    #[tokio::test]
    async fn missing_binary_is_reported() {
        let docker = DockerCli::new("definitely-not-docker-xyz");
        let missing = docker.missing_tools().await;
        assert_eq!(missing, vec!["definitely-not-docker-xyz is not installed"]);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_as_error() {
        let docker = DockerCli::new("definitely-not-docker-xyz");
        assert!(docker.image_exists("img").await.is_err());
    }
}
