//! Install-on-demand for the fallback compression library.
//!
//! The library tier refuses to fail just because a Python package is
//! missing. Before giving up it works through a fixed ladder: is the
//! library already importable, can the package manager install it, can the
//! package manager itself be bootstrapped (in-process first, then by
//! downloading the official install script). Every rung is judged by
//! observable effects, so "installed" always means "actually imports now".

use crate::python::PythonRuntime;
use crate::{DuffelError, Result};
use std::io::Write;
use std::process::Command;
use std::time::Duration;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Well-known location of the package-manager install script, fetched only
/// when no manager is otherwise reachable.
const PIP_BOOTSTRAP_URL: &str = "https://bootstrap.pypa.io/get-pip.py";

/// Bound on the bootstrap download; subprocesses run unbounded.
const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

/// Terminal verdict of [`DependencyInstaller::ensure_available`] for this
/// run. `Unavailable` is not retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    Unavailable,
}

impl Availability {
    pub fn is_available(self) -> bool {
        matches!(self, Availability::Available)
    }
}

pub struct DependencyInstaller<'a> {
    python: &'a PythonRuntime,
    pip_program: String,
    bootstrap_url: String,
}

impl<'a> DependencyInstaller<'a> {
    pub fn new(python: &'a PythonRuntime) -> Self {
        Self {
            python,
            pip_program: "pip".to_string(),
            bootstrap_url: PIP_BOOTSTRAP_URL.to_string(),
        }
    }

    /// Substitute the standalone `pip` executable. Used by tests.
    pub fn with_pip_program(mut self, program: impl Into<String>) -> Self {
        self.pip_program = program.into();
        self
    }

    /// Point the bootstrap fetch somewhere else. Used by tests.
    pub fn with_bootstrap_url(mut self, url: impl Into<String>) -> Self {
        self.bootstrap_url = url.into();
        self
    }

    /// Make `library` importable, installing it (and, if need be, the
    /// package manager itself) on demand.
    ///
    /// Once a package manager is confirmed reachable, its install verdict
    /// is final; bootstrapping only happens when no manager responded at
    /// all.
    pub fn ensure_available(&self, library: &str) -> Availability {
        if self.python.probe_import(library) {
            debug!("`{library}` already importable");
            return Availability::Available;
        }
        info!("`{library}` not importable, attempting installation");

        if self.manager_responds() {
            return self.install_via_manager(library);
        }
        warn!("pip not reachable, bootstrapping a package manager");

        if self.bootstrap_with_ensurepip() {
            return self.install_via_manager(library);
        }
        if self.bootstrap_with_script() {
            return self.install_via_manager(library);
        }

        warn!("all bootstrap paths exhausted");
        Availability::Unavailable
    }

    /// `python -m pip --version`: is a package manager invocable at all?
    fn manager_responds(&self) -> bool {
        match self.python.run_module("pip", &["--version"]) {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("pip probe failed to spawn: {e}");
                false
            }
        }
    }

    /// Try the module form, then the standalone executable. An install only
    /// counts when the library imports afterwards, not merely because an
    /// installer exited cleanly.
    fn install_via_manager(&self, library: &str) -> Availability {
        match self.python.run_module("pip", &["install", library]) {
            Ok(output) if output.status.success() => {
                if self.python.probe_import(library) {
                    info!("installed `{library}` via module-form pip");
                    return Availability::Available;
                }
                warn!("module-form pip succeeded but `{library}` still does not import");
            }
            Ok(output) => warn!(
                "module-form pip install failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("module-form pip failed to spawn: {e}"),
        }

        let direct = Command::new(&self.pip_program)
            .args(["install", library])
            .output();
        match direct {
            Ok(output) if output.status.success() => {
                if self.python.probe_import(library) {
                    info!("installed `{library}` via the pip executable");
                    return Availability::Available;
                }
                warn!("pip executable succeeded but `{library}` still does not import");
            }
            Ok(output) => warn!(
                "pip executable install failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            ),
            Err(e) => warn!("pip executable not runnable: {e}"),
        }
        Availability::Unavailable
    }

    /// The runtime's built-in bootstrapper.
    fn bootstrap_with_ensurepip(&self) -> bool {
        info!("bootstrapping pip via ensurepip");
        match self.python.run_module("ensurepip", &["--upgrade"]) {
            Ok(output) if output.status.success() => true,
            Ok(output) => {
                warn!(
                    "ensurepip failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("ensurepip failed to spawn: {e}");
                false
            }
        }
    }

    /// Download the install script and run it. The script lands in a named
    /// temporary file whose guard removes it on every exit path, success or
    /// not.
    fn bootstrap_with_script(&self) -> bool {
        info!(
            "fetching the pip install script from {}",
            self.bootstrap_url
        );
        let script = match self.fetch_bootstrap_script() {
            Ok(script) => script,
            Err(e) => {
                warn!("bootstrap fetch failed: {e}");
                return false;
            }
        };
        match self.python.run_script(script.path(), &[]) {
            Ok(output) if output.status.success() => {
                info!("pip install script succeeded");
                true
            }
            Ok(output) => {
                warn!(
                    "pip install script failed: {}",
                    String::from_utf8_lossy(&output.stderr).trim()
                );
                false
            }
            Err(e) => {
                warn!("pip install script failed to spawn: {e}");
                false
            }
        }
    }

    fn fetch_bootstrap_script(&self) -> Result<NamedTempFile> {
        let client = reqwest::blocking::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .build()
            .map_err(|e| DuffelError::Bootstrap(e.to_string()))?;
        let response = client
            .get(self.bootstrap_url.as_str())
            .send()
            .map_err(|e| DuffelError::Bootstrap(e.to_string()))?;
        if !response.status().is_success() {
            return Err(DuffelError::Bootstrap(format!(
                "endpoint returned {}",
                response.status()
            )));
        }
        let body = response
            .bytes()
            .map_err(|e| DuffelError::Bootstrap(e.to_string()))?;

        let mut script = tempfile::Builder::new()
            .prefix("pip-bootstrap-")
            .suffix(".py")
            .tempfile()?;
        script.write_all(&body)?;
        script.flush()?;
        Ok(script)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;
    use std::os::unix::fs::PermissionsExt;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    fn write_stub(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
        path
    }

    fn log_lines(log: &Path) -> Vec<String> {
        std::fs::read_to_string(log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    /// A pip executable stub that always refuses, so no test can touch the
    /// real package manager.
    fn failing_pip(dir: &Path) -> PathBuf {
        write_stub(dir, "pip", "#!/bin/sh\nexit 1\n")
    }

    #[test]
    fn importable_library_needs_no_install() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let stub = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-c import py7zr") exit 0 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display()
            ),
        );

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap());

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Available
        );
        // Only the import probe ran; no installer was spawned.
        assert_eq!(log_lines(&log), vec!["-c import py7zr"]);
    }

    #[test]
    fn module_form_install_is_verified_by_reimport() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let marker = temp.path().join("installed");
        let stub = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-c import py7zr") [ -f "{marker}" ] && exit 0 || exit 1 ;;
  "-m pip --version") exit 0 ;;
  "-m pip install py7zr") touch "{marker}"; exit 0 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display(),
                marker = marker.display()
            ),
        );

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap());

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Available
        );
        assert!(marker.exists());
        assert_eq!(
            log_lines(&log),
            vec![
                "-c import py7zr",
                "-m pip --version",
                "-m pip install py7zr",
                "-c import py7zr",
            ]
        );
    }

    #[test]
    fn direct_form_runs_when_the_module_form_fails() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let marker = temp.path().join("installed");
        let python = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-c import py7zr") [ -f "{marker}" ] && exit 0 || exit 1 ;;
  "-m pip --version") exit 0 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display(),
                marker = marker.display()
            ),
        );
        let pip = write_stub(
            temp.path(),
            "pip",
            &format!(
                r#"#!/bin/sh
case "$*" in
  "install py7zr") touch "{marker}"; exit 0 ;;
  *) exit 1 ;;
esac
"#,
                marker = marker.display()
            ),
        );

        let runtime = PythonRuntime::with_program(python.to_str().unwrap());
        let installer =
            DependencyInstaller::new(&runtime).with_pip_program(pip.to_str().unwrap());

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Available
        );
        assert!(marker.exists());
    }

    #[test]
    fn reachable_manager_that_cannot_install_is_terminal() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let stub = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-m pip --version") exit 0 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display()
            ),
        );

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap());

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Unavailable
        );
        // The manager answered, so no bootstrap path may run.
        assert!(log_lines(&log)
            .iter()
            .all(|line| !line.contains("ensurepip")));
    }

    #[test]
    fn ensurepip_bootstrap_unlocks_the_manager() {
        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let pip_ready = temp.path().join("pip-ready");
        let marker = temp.path().join("installed");
        let stub = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-c import py7zr") [ -f "{marker}" ] && exit 0 || exit 1 ;;
  "-m pip --version") [ -f "{ready}" ] && exit 0 || exit 1 ;;
  "-m ensurepip --upgrade") touch "{ready}"; exit 0 ;;
  "-m pip install py7zr") [ -f "{ready}" ] && touch "{marker}" && exit 0 || exit 1 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display(),
                ready = pip_ready.display(),
                marker = marker.display()
            ),
        );

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap());

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Available
        );
        assert_eq!(
            log_lines(&log),
            vec![
                "-c import py7zr",
                "-m pip --version",
                "-m ensurepip --upgrade",
                "-m pip install py7zr",
                "-c import py7zr",
            ]
        );
    }

    #[test]
    fn bootstrap_script_is_fetched_run_and_removed() {
        // One-shot HTTP server standing in for the bootstrap endpoint.
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = std::thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 2048];
            let _ = stream.read(&mut buf);
            let body = "print('bootstrap')";
            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                body.len(),
                body
            );
            std::io::Write::write_all(&mut stream, response.as_bytes()).unwrap();
        });

        let temp = TempDir::new().unwrap();
        let log = temp.path().join("log");
        let pip_ready = temp.path().join("pip-ready");
        let marker = temp.path().join("installed");
        let stub = write_stub(
            temp.path(),
            "py",
            &format!(
                r#"#!/bin/sh
echo "$*" >> "{log}"
case "$*" in
  "-c import py7zr") [ -f "{marker}" ] && exit 0 || exit 1 ;;
  "-m pip --version") [ -f "{ready}" ] && exit 0 || exit 1 ;;
  "-m ensurepip --upgrade") exit 1 ;;
  *pip-bootstrap-*) touch "{ready}"; exit 0 ;;
  "-m pip install py7zr") [ -f "{ready}" ] && touch "{marker}" && exit 0 || exit 1 ;;
  *) exit 1 ;;
esac
"#,
                log = log.display(),
                ready = pip_ready.display(),
                marker = marker.display()
            ),
        );

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap())
            .with_bootstrap_url(format!("http://{addr}/get-pip.py"));

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Available
        );
        server.join().unwrap();

        // The downloaded script ran from a temp file that must be gone now.
        let lines = log_lines(&log);
        let script_line = lines
            .iter()
            .find(|line| line.contains("pip-bootstrap-"))
            .expect("the downloaded script was run");
        assert!(!Path::new(script_line).exists());
    }

    #[test]
    fn unreachable_bootstrap_endpoint_ends_unavailable() {
        let temp = TempDir::new().unwrap();
        // Everything fails: no import, no pip, no ensurepip.
        let stub = write_stub(temp.path(), "py", "#!/bin/sh\nexit 1\n");

        let runtime = PythonRuntime::with_program(stub.to_str().unwrap());
        let installer = DependencyInstaller::new(&runtime)
            .with_pip_program(failing_pip(temp.path()).to_str().unwrap())
            .with_bootstrap_url("http://127.0.0.1:9/get-pip.py");

        assert_eq!(
            installer.ensure_available("py7zr"),
            Availability::Unavailable
        );
    }
}
