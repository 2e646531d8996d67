//! Access to the operating system's URL handlers.
//!
//! The redirect flow hands the resolved URL to whatever application the
//! system registered for it, much like clicking a link would. The same port
//! is used to probe whether a platform's native app is present.

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;

use crate::{
    error::{Error, Result},
    platform::NativeApp,
};

#[async_trait]
pub trait Shell: Send + Sync {
    /// Asks the operating system to open `url` in its registered handler.
    async fn open_url(&self, url: &str) -> Result<()>;

    /// Returns whether a handler for the app's URL scheme is registered.
    ///
    /// Systems without a way to probe report `false`.
    async fn is_app_installed(&self, app: &NativeApp) -> Result<bool>;
}

/// Opens URLs through the desktop's launcher utility.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemShell;

impl SystemShell {
    fn launcher(url: &str) -> Command {
        #[cfg(target_os = "macos")]
        {
            let mut command = Command::new("open");
            command.arg(url);
            command
        }

        #[cfg(target_os = "windows")]
        {
            // The empty argument is the window title `start` expects first.
            let mut command = Command::new("cmd");
            command.args(["/C", "start", "", url]);
            command
        }

        #[cfg(not(any(target_os = "macos", target_os = "windows")))]
        {
            let mut command = Command::new("xdg-open");
            command.arg(url);
            command
        }
    }
}

#[async_trait]
impl Shell for SystemShell {
    async fn open_url(&self, url: &str) -> Result<()> {
        let status = Self::launcher(url)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::unavailable(format!(
                "url handler exited with {status}"
            )))
        }
    }

    #[cfg(all(unix, not(target_os = "macos")))]
    async fn is_app_installed(&self, app: &NativeApp) -> Result<bool> {
        let output = Command::new("xdg-mime")
            .args(["query", "default"])
            .arg(format!("x-scheme-handler/{}", app.url_scheme))
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .await?;

        Ok(output.status.success() && !output.stdout.trim_ascii().is_empty())
    }

    #[cfg(not(all(unix, not(target_os = "macos"))))]
    async fn is_app_installed(&self, _app: &NativeApp) -> Result<bool> {
        Ok(false)
    }
}

/// Logs URLs instead of opening them.
#[derive(Clone, Copy, Debug, Default)]
pub struct DryRunShell;

#[async_trait]
impl Shell for DryRunShell {
    async fn open_url(&self, url: &str) -> Result<()> {
        info!("would open {url}");
        Ok(())
    }

    async fn is_app_installed(&self, _app: &NativeApp) -> Result<bool> {
        Ok(false)
    }
}
