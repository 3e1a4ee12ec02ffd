//! Thin wrapper over a system Python interpreter.
//!
//! The library archival tier leans on the Python ecosystem for its 7z
//! support, the same way the primary tier leans on the external `7z`
//! binary. Every interaction funnels through `Command` with captured
//! output; exit status is the verdict and stderr is the diagnostic.

use crate::{DuffelError, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Command, Output, Stdio};
use tracing::debug;

/// Interpreter names probed, in order, when discovering.
const INTERPRETER_CANDIDATES: &[&str] = &["python3", "python"];

pub struct PythonRuntime {
    program: String,
}

impl PythonRuntime {
    /// Find a usable interpreter on PATH, preferring `python3`.
    pub fn discover() -> Result<Self> {
        for candidate in INTERPRETER_CANDIDATES {
            let probe = Command::new(candidate).arg("--version").output();
            if let Ok(output) = probe {
                if output.status.success() {
                    debug!("using interpreter `{candidate}`");
                    return Ok(Self {
                        program: candidate.to_string(),
                    });
                }
            }
        }
        Err(DuffelError::InterpreterMissing)
    }

    /// Use a specific interpreter binary. Tests point this at stub scripts.
    pub fn with_program(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// `python -c "import <module>"`, exit status as the verdict.
    pub fn probe_import(&self, module: &str) -> bool {
        let result = Command::new(&self.program)
            .arg("-c")
            .arg(format!("import {module}"))
            .output();
        match result {
            Ok(output) => output.status.success(),
            Err(e) => {
                debug!("import probe for `{module}` failed to spawn: {e}");
                false
            }
        }
    }

    /// `python -m <module> <args...>`. Nonzero exit still comes back as
    /// `Ok`; callers read the status themselves.
    pub fn run_module(&self, module: &str, args: &[&str]) -> std::io::Result<Output> {
        debug!("running {} -m {} {:?}", self.program, module, args);
        Command::new(&self.program)
            .arg("-m")
            .arg(module)
            .args(args)
            .output()
    }

    /// `python <script> <args...>` for scripts on disk.
    pub fn run_script(&self, script: &Path, args: &[&str]) -> std::io::Result<Output> {
        debug!("running {} {} {:?}", self.program, script.display(), args);
        Command::new(&self.program).arg(script).args(args).output()
    }

    /// `python -c <code> <args...>`, feeding `stdin` to the child. Used for
    /// helper programs that read their work list from standard input.
    pub fn run_code_with_stdin(
        &self,
        code: &str,
        args: &[&str],
        stdin: &[u8],
    ) -> std::io::Result<Output> {
        let mut child = Command::new(&self.program)
            .arg("-c")
            .arg(code)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        if let Some(mut handle) = child.stdin.take() {
            if let Err(e) = handle.write_all(stdin) {
                // The child may have exited already; its own stderr is the
                // better diagnostic, so keep going and collect it.
                debug!("stdin write to helper ended early: {e}");
            }
        }
        child.wait_with_output()
    }
}
