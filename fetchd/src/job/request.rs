//! Client-supplied job parameters and their validation.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Options controlling how the external tool is invoked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchOptions {
    /// Output container/codec hint forwarded to the tool (e.g. "aac").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    /// Filename template relative to the output directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_template: Option<String>,
    /// Additional tool flags, passed through as discrete argv entries.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
    /// Admission priority; higher runs earlier, FIFO within a priority.
    #[serde(default)]
    pub priority: i32,
}

/// A validated job submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRequest {
    /// The content URL handed to the acquisition tool.
    pub target: String,
    #[serde(default)]
    pub options: FetchOptions,
}

impl JobRequest {
    /// Validate a submission before a job record is created.
    ///
    /// Arguments are always passed to the tool as a discrete list, so
    /// validation only has to reject values that would corrupt the argv
    /// or escape the output directory, not shell metacharacters.
    pub fn validate(&self) -> Result<()> {
        let target = self.target.trim();
        if target.is_empty() {
            return Err(Error::invalid_request("target must not be empty"));
        }
        if !target.starts_with("http://") && !target.starts_with("https://") {
            return Err(Error::invalid_request(
                "target must be an http(s) URL",
            ));
        }
        if target.chars().any(|c| c.is_control() || c.is_whitespace()) {
            return Err(Error::invalid_request(
                "target must not contain whitespace or control characters",
            ));
        }

        if let Some(template) = &self.options.output_template {
            if template.split(['/', '\\']).any(|part| part == "..") {
                return Err(Error::invalid_request(
                    "output_template must not traverse outside the output directory",
                ));
            }
            if template.starts_with('/') {
                return Err(Error::invalid_request(
                    "output_template must be relative",
                ));
            }
        }

        for arg in &self.options.extra_args {
            if arg.chars().any(|c| c == '\0' || c == '\n' || c == '\r') {
                return Err(Error::invalid_request(
                    "extra_args must not contain control characters",
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(target: &str) -> JobRequest {
        JobRequest {
            target: target.to_string(),
            options: FetchOptions::default(),
        }
    }

    #[test]
    fn accepts_plain_https_url() {
        assert!(request("https://music.example.com/album/42").validate().is_ok());
    }

    #[test]
    fn rejects_empty_and_non_http_targets() {
        assert!(request("").validate().is_err());
        assert!(request("   ").validate().is_err());
        assert!(request("ftp://example.com/x").validate().is_err());
        assert!(request("file:///etc/passwd").validate().is_err());
    }

    #[test]
    fn rejects_embedded_whitespace() {
        assert!(request("https://example.com/a b").validate().is_err());
        assert!(request("https://example.com/a\nb").validate().is_err());
    }

    #[test]
    fn rejects_traversal_in_output_template() {
        let mut req = request("https://example.com/a");
        req.options.output_template = Some("../outside/{title}".to_string());
        assert!(req.validate().is_err());

        req.options.output_template = Some("/absolute/{title}".to_string());
        assert!(req.validate().is_err());

        req.options.output_template = Some("albums/{artist}/{title}".to_string());
        assert!(req.validate().is_ok());
    }

    #[test]
    fn extra_args_survive_as_discrete_values() {
        let mut req = request("https://example.com/a");
        // Shell metacharacters are fine as argv entries.
        req.options.extra_args = vec!["--label".to_string(), "a;b&&c".to_string()];
        assert!(req.validate().is_ok());

        req.options.extra_args = vec!["--label\nX".to_string()];
        assert!(req.validate().is_err());
    }
}
