use std::process::Stdio;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;

use crate::process::encoder::{EncoderConfig, version_args};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthReport {
    pub available: bool,
    pub program: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    fn unavailable(program: &str, error: String) -> Self {
        Self {
            available: false,
            program: program.to_string(),
            version: None,
            error: Some(error),
        }
    }
}

/// Runs `<program> -version` and checks that an ffmpeg build answered.
pub async fn check_encoder(encoder: &EncoderConfig) -> HealthReport {
    let mut command = Command::new(&encoder.program);
    command
        .args(encoder.command_args(version_args()))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(PROBE_TIMEOUT, command.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => return HealthReport::unavailable(&encoder.program, e.to_string()),
        Err(_) => {
            return HealthReport::unavailable(
                &encoder.program,
                format!("no answer within {}s", PROBE_TIMEOUT.as_secs()),
            );
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    if !output.status.success() || !stdout.contains("ffmpeg version") {
        return HealthReport::unavailable(
            &encoder.program,
            format!("unexpected answer ({})", output.status),
        );
    }

    HealthReport {
        available: true,
        program: encoder.program.clone(),
        version: stdout.lines().next().map(|l| l.trim().to_string()),
        error: None,
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn shell(script: &str) -> EncoderConfig {
        EncoderConfig {
            program: "/bin/sh".into(),
            leading_args: vec!["-c".into(), script.into(), "probe".into()],
            ..EncoderConfig::default()
        }
    }

    #[tokio::test]
    async fn version_banner_means_available() {
        let report = check_encoder(&shell("echo 'ffmpeg version 6.1 Copyright'; echo more")).await;
        assert!(report.available);
        assert_eq!(report.version.as_deref(), Some("ffmpeg version 6.1 Copyright"));
    }

    #[tokio::test]
    async fn other_output_is_unavailable() {
        let report = check_encoder(&shell("echo hello")).await;
        assert!(!report.available);
        assert!(report.error.is_some());
    }

    #[tokio::test]
    async fn missing_binary_is_unavailable() {
        let report = check_encoder(&EncoderConfig {
            program: "/nonexistent/ffmpeg".into(),
            ..EncoderConfig::default()
        })
        .await;
        assert!(!report.available);
    }
}
