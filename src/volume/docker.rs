/*!
 * Docker CLI backed volume store and gateway
 *
 * Volume bytes never touch a running container: a helper container is
 * created (not started) with the volume mounted, and `docker cp` streams the
 * mount point out of it or into it as tar. The helper is removed afterwards.
 */

use std::io::Read;
use std::process::{Child, Command, Output, Stdio};
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::{Bridge, ExportSession, ImportSession, Scoped, VolumeGateway, VolumeStore};
use crate::config::DockerConfig;
use crate::error::{BackupError, Result};

/// Talks to the Docker daemon through its CLI
#[derive(Debug, Clone)]
pub struct DockerCli {
    config: DockerConfig,
}

impl DockerCli {
    pub fn new(config: DockerConfig) -> Self {
        Self { config }
    }

    /// Whether `docker version` succeeds
    pub fn is_available(&self) -> bool {
        run_checked(&self.config.binary, &["version"]).is_ok()
    }

    fn mount(&self, volume: &str) -> String {
        format!("{}:{}", volume, self.config.mount_point)
    }

    /// Run a command in a throwaway helper container with the volume mounted
    fn run_helper(&self, volume: &str, command: &[&str]) -> Result<Output> {
        let mount = self.mount(volume);
        let mut args = vec![
            "run",
            "--rm",
            "-v",
            mount.as_str(),
            self.config.helper_image.as_str(),
        ];
        args.extend_from_slice(command);
        run_checked(&self.config.binary, &args)
    }

    /// Create the never-started helper container that holds the mount
    fn create_context(&self, volume: &str) -> Result<Scoped<String>> {
        let binary = self.config.binary.clone();
        let mount = self.mount(volume);
        Scoped::acquire(
            || {
                let output = run_checked(
                    &self.config.binary,
                    &[
                        "create",
                        "-v",
                        mount.as_str(),
                        self.config.helper_image.as_str(),
                        "true",
                    ],
                )?;
                let id = String::from_utf8_lossy(&output.stdout).trim().to_string();
                if id.is_empty() {
                    return Err(BackupError::Subprocess {
                        command: render(&self.config.binary, &["create"]),
                        status: "no container id".to_string(),
                        output: String::from_utf8_lossy(&output.stderr).into_owned(),
                    });
                }
                debug!("Created helper container {} for {}", id, mount);
                Ok(id)
            },
            move |id: &String| run_checked(&binary, &["rm", id.as_str()]).map(|_| ()),
        )
    }

    fn spawn_cp(&self, args: &[&str], stdin: Stdio, stdout: Stdio) -> Result<(String, Child)> {
        let command = render(&self.config.binary, args);
        debug!("Spawning `{}`", command);
        let child = Command::new(&self.config.binary)
            .args(args)
            .stdin(stdin)
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| spawn_failure(&command, e))?;
        Ok((command, child))
    }
}

impl VolumeStore for DockerCli {
    fn exists(&self, name: &str) -> Result<bool> {
        let output = run(&self.config.binary, &["volume", "inspect", name])?;
        Ok(output.status.success())
    }

    fn create(&self, name: &str) -> Result<()> {
        run_checked(&self.config.binary, &["volume", "create", name])?;
        info!("Created volume {}", name);
        Ok(())
    }

    fn clear(&self, name: &str) -> Result<()> {
        let mp = &self.config.mount_point;
        // The globs cover regular, dot and dot-dot-prefixed names
        let script = format!(
            "rm -rf {mp}/* {mp}/..?* {mp}/.[!.]* 2>/dev/null || true",
            mp = mp
        );
        self.run_helper(name, &["sh", "-c", script.as_str()])?;
        Ok(())
    }

    fn is_empty(&self, name: &str) -> Result<bool> {
        let output = self.run_helper(name, &["ls", "-A", self.config.mount_point.as_str()])?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    fn estimate_size(&self, name: &str) -> u64 {
        let script = format!("du -sb {} | cut -f1", self.config.mount_point);
        match self.run_helper(name, &["sh", "-c", script.as_str()]) {
            Ok(output) => String::from_utf8_lossy(&output.stdout)
                .trim()
                .parse()
                .unwrap_or(0),
            Err(e) => {
                debug!("Size probe for {} failed: {}", name, e);
                0
            }
        }
    }

    fn preflight(&self) -> Result<()> {
        run_checked(&self.config.binary, &["version"]).map(|_| ())
    }
}

impl VolumeGateway for DockerCli {
    fn export(&self, volume: &str) -> Result<ExportSession> {
        let scope = self.create_context(volume)?;
        let source = format!("{}:{}/.", scope.handle(), self.config.mount_point);
        let (command, mut child) =
            self.spawn_cp(&["cp", source.as_str(), "-"], Stdio::null(), Stdio::piped())?;

        let stdout = match child.stdout.take() {
            Some(stdout) => stdout,
            None => {
                return Err(BackupError::Subprocess {
                    command,
                    status: "stdout not captured".to_string(),
                    output: String::new(),
                })
            }
        };

        let bridge = ChildBridge::new(command, child);
        Ok(ExportSession::new(Box::new(stdout), Box::new(bridge), scope))
    }

    fn import(&self, volume: &str) -> Result<ImportSession> {
        let scope = self.create_context(volume)?;
        let target = format!("{}:{}/", scope.handle(), self.config.mount_point);
        let (command, mut child) =
            self.spawn_cp(&["cp", "-", target.as_str()], Stdio::piped(), Stdio::null())?;

        let stdin = match child.stdin.take() {
            Some(stdin) => stdin,
            None => {
                return Err(BackupError::Subprocess {
                    command,
                    status: "stdin not captured".to_string(),
                    output: String::new(),
                })
            }
        };

        let bridge = ChildBridge::new(command, child);
        Ok(ImportSession::new(Box::new(stdin), Box::new(bridge), scope))
    }
}

/// A `docker cp` process plus a thread collecting its stderr
struct ChildBridge {
    command: String,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
}

impl ChildBridge {
    fn new(command: String, mut child: Child) -> Self {
        let stderr = child.stderr.take().map(|mut pipe| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = pipe.read_to_end(&mut buf);
                String::from_utf8_lossy(&buf).into_owned()
            })
        });
        Self {
            command,
            child: Some(child),
            stderr,
        }
    }
}

impl Bridge for ChildBridge {
    fn wait(mut self: Box<Self>) -> Result<()> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        let status = child.wait().map_err(|e| BackupError::Subprocess {
            command: self.command.clone(),
            status: "wait failed".to_string(),
            output: e.to_string(),
        })?;
        let output = self
            .stderr
            .take()
            .and_then(|handle| handle.join().ok())
            .unwrap_or_default();

        if status.success() {
            debug!("`{}` completed", self.command);
            Ok(())
        } else {
            Err(BackupError::Subprocess {
                command: self.command.clone(),
                status: status.to_string(),
                output,
            })
        }
    }
}

impl Drop for ChildBridge {
    fn drop(&mut self) {
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

fn render(binary: &str, args: &[&str]) -> String {
    let mut command = binary.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

fn spawn_failure(command: &str, e: std::io::Error) -> BackupError {
    BackupError::Subprocess {
        command: command.to_string(),
        status: "failed to start".to_string(),
        output: e.to_string(),
    }
}

/// Run to completion; a non-zero exit is not an error here
fn run(binary: &str, args: &[&str]) -> Result<Output> {
    Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| spawn_failure(&render(binary, args), e))
}

/// Run to completion; a non-zero exit becomes a subprocess error
fn run_checked(binary: &str, args: &[&str]) -> Result<Output> {
    let output = run(binary, args)?;
    if output.status.success() {
        Ok(output)
    } else {
        Err(BackupError::Subprocess {
            command: render(binary, args),
            status: output.status.to_string(),
            output: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}
