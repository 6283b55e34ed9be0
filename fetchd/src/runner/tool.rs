//! External tool invocations.
//!
//! The adapter supervises anything that accepts an argument list, an
//! environment and a working directory, and streams text output. Each tool
//! family implements [`ToolCommand`]; swapping tools never touches the
//! scheduler or the hub.

use std::path::PathBuf;

use tokio::process::Command;

use crate::config::ToolConfig;
use crate::job::JobRequest;

/// A family of external tools the adapter can run.
pub trait ToolCommand: Send + Sync {
    /// Tool name for logs and outcome summaries.
    fn name(&self) -> &str;

    /// Build the full invocation for one job.
    ///
    /// Arguments are a discrete argv list; request values are never
    /// concatenated into a shell string.
    fn build(&self, request: &JobRequest) -> Command;

    /// Where the tool writes artifacts for this job, if known.
    fn destination(&self, request: &JobRequest) -> Option<PathBuf>;
}

/// The default acquisition tool: a gamdl-compatible downloader CLI.
pub struct GrabberTool {
    config: ToolConfig,
}

impl GrabberTool {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn args(&self, request: &JobRequest) -> Vec<String> {
        let mut args = vec![
            "--cookies-path".to_string(),
            self.config.cookies_path.display().to_string(),
            "--output-path".to_string(),
            self.config.output_dir.display().to_string(),
        ];
        if let Some(decrypt) = &self.config.decrypt_tool_path {
            args.push("--mp4decrypt-path".to_string());
            args.push(decrypt.display().to_string());
        }
        if let Some(codec) = &request.options.codec {
            args.push("--codec-song".to_string());
            args.push(codec.clone());
        }
        if let Some(template) = &request.options.output_template {
            args.push("--template-folder-album".to_string());
            args.push(template.clone());
        }
        args.extend(request.options.extra_args.iter().cloned());
        args.push(request.target.clone());
        args
    }
}

impl ToolCommand for GrabberTool {
    fn name(&self) -> &str {
        &self.config.binary
    }

    fn build(&self, request: &JobRequest) -> Command {
        let mut cmd = process_utils::tokio_command(&self.config.binary);
        cmd.args(self.args(request));
        cmd.env("TERM", &self.config.term);
        cmd.current_dir(&self.config.output_dir);
        cmd
    }

    fn destination(&self, _request: &JobRequest) -> Option<PathBuf> {
        Some(self.config.output_dir.clone())
    }
}
