use std::path::PathBuf;

use crate::config::CaptureSettings;
use crate::core::error::{CaptureError, CaptureResult};
use crate::core::timestamp::file_stamp_now;
use crate::display::{self, DisplayProvider};
use crate::process::encoder::screenshot_args;
use crate::process::supervisor::Supervisor;

/// Grabs a single frame into `<save_dir>/screenshot_<stamp>.png`.
pub async fn take_screenshot(
    supervisor: &Supervisor,
    displays: &dyn DisplayProvider,
    capture: &CaptureSettings,
) -> CaptureResult<PathBuf> {
    tokio::fs::create_dir_all(&capture.save_dir)
        .await
        .map_err(|e| CaptureError::output(&capture.save_dir, e))?;

    let path = capture
        .save_dir
        .join(format!("screenshot_{}.png", file_stamp_now()));
    let geometry = display::resolve(displays, &capture.screen_id);
    if geometry.is_none() && !capture.screen_id.trim().is_empty() {
        log::warn!(
            "[screenshot] display '{}' not found, capturing the whole desktop",
            capture.screen_id
        );
    }
    let args = screenshot_args(supervisor.encoder(), geometry, &path);

    let exit = supervisor.run_to_exit("screenshot", args).await?;
    let exists = tokio::fs::try_exists(&path).await.unwrap_or(false);

    if exit.success() && exists {
        log::info!("[screenshot] saved {}", path.display());
        return Ok(path);
    }

    if exists {
        let _ = tokio::fs::remove_file(&path).await;
    }
    Err(CaptureError::job_invalid(
        &path,
        format!("screenshot failed with {}", exit),
    ))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::display::StaticDisplays;
    use crate::testing::FakeEncoder;

    #[tokio::test]
    async fn unknown_display_falls_back_to_whole_desktop() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = FakeEncoder::default()
            .encoder_config(dir.path(), Duration::from_secs(2))
            .unwrap();
        let supervisor = Supervisor::new(encoder);
        let capture = CaptureSettings {
            screen_id: "missing".to_string(),
            save_dir: dir.path().join("shots"),
            ..CaptureSettings::default()
        };

        let path = take_screenshot(&supervisor, &StaticDisplays::default(), &capture)
            .await
            .unwrap();
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".png"));
    }
}
