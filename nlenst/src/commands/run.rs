//! Run command implementation.
//!
//! Launches a target binary under the NumaLens preload runtime, with the
//! `NUMAPERF_*` environment assembled from command-line flags.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Instant;

use tracing::{debug, info};

use crate::error::{NlenstError, Result};

/// Name of the preload runtime library.
const RUNTIME_LIB: &str = "libnlens.so";

/// Arguments for the run command.
#[derive(Debug, Clone, Default)]
pub struct RunArgs {
    /// Enable verbose output.
    pub verbose: bool,
    /// Explicit path to the preload runtime library.
    pub runtime: Option<PathBuf>,
    /// Foreign accesses before a page escalates.
    pub page_threshold: Option<u64>,
    /// Writer transitions before a cache line escalates.
    pub cache_threshold: Option<u32>,
    /// Objects kept in the final report.
    pub top_objects: Option<usize>,
    /// Cache lines reported per object.
    pub top_cache_lines: Option<usize>,
    /// Emit the report as JSON.
    pub json: bool,
    /// File descriptor the report is written to.
    pub report_fd: Option<i32>,
    /// The target binary and its arguments.
    pub command: Vec<String>,
}

/// Run command handler.
pub struct RunCommand {
    args: RunArgs,
}

impl RunCommand {
    /// Create a new RunCommand.
    pub fn new(args: RunArgs) -> Self {
        Self { args }
    }

    /// Execute the command, returning the target's exit code.
    pub fn run(&self) -> Result<i32> {
        self.validate()?;
        let runtime = self.locate_runtime()?;
        let env = self.assemble_env(&runtime)?;

        let start_time = Instant::now();
        let status = self.launch(&env)?;
        let code = exit_code(status);

        if self.args.verbose {
            info!(
                "target exited with code {} after {:.2}s",
                code,
                start_time.elapsed().as_secs_f64()
            );
        }
        Ok(code)
    }

    /// Validate the command line before touching the filesystem.
    fn validate(&self) -> Result<()> {
        if self.args.command.is_empty() {
            return Err(NlenstError::Validation(
                "no target command given".to_string(),
            ));
        }
        if self.args.page_threshold == Some(0) {
            return Err(NlenstError::Validation(
                "page threshold must be > 0".to_string(),
            ));
        }
        if self.args.cache_threshold == Some(0) {
            return Err(NlenstError::Validation(
                "cache threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Find the preload runtime library.
    ///
    /// Resolution order: explicit `--runtime` flag, the `NLENST_RUNTIME`
    /// environment variable, then `libnlens.so` next to the nlenst binary.
    fn locate_runtime(&self) -> Result<PathBuf> {
        if let Some(path) = &self.args.runtime {
            return check_runtime_path(path);
        }

        if let Ok(path) = std::env::var("NLENST_RUNTIME") {
            return check_runtime_path(Path::new(&path));
        }

        if let Ok(exe) = std::env::current_exe() {
            if let Some(dir) = exe.parent() {
                let sibling = dir.join(RUNTIME_LIB);
                if sibling.exists() {
                    return Ok(sibling);
                }
            }
        }

        Err(NlenstError::Config(format!(
            "{RUNTIME_LIB} not found; pass --runtime or set NLENST_RUNTIME"
        )))
    }

    /// Assemble the environment for the target process.
    fn assemble_env(&self, runtime: &Path) -> Result<Vec<(String, String)>> {
        let mut env = Vec::new();

        // Preserve an existing LD_PRELOAD chain behind the runtime
        let preload = match std::env::var("LD_PRELOAD") {
            Ok(existing) if !existing.is_empty() => {
                format!("{}:{existing}", runtime.display())
            }
            _ => runtime.display().to_string(),
        };
        env.push(("LD_PRELOAD".to_string(), preload));

        if let Some(threshold) = self.args.page_threshold {
            env.push((
                "NUMAPERF_PAGE_DETAIL_THRESHOLD".to_string(),
                threshold.to_string(),
            ));
        }
        if let Some(threshold) = self.args.cache_threshold {
            env.push((
                "NUMAPERF_CACHE_DETAIL_THRESHOLD".to_string(),
                threshold.to_string(),
            ));
        }
        if let Some(count) = self.args.top_objects {
            env.push(("NUMAPERF_TOP_OBJECTS".to_string(), count.to_string()));
        }
        if let Some(count) = self.args.top_cache_lines {
            env.push(("NUMAPERF_TOP_CACHELINES".to_string(), count.to_string()));
        }
        if self.args.json {
            env.push(("NUMAPERF_JSON".to_string(), "1".to_string()));
        }
        if let Some(fd) = self.args.report_fd {
            env.push(("NUMAPERF_REPORT_FD".to_string(), fd.to_string()));
        }
        if self.args.verbose {
            env.push(("NUMAPERF_VERBOSE".to_string(), "1".to_string()));
        }

        Ok(env)
    }

    /// Spawn the target and wait for it.
    fn launch(&self, env: &[(String, String)]) -> Result<std::process::ExitStatus> {
        let binary = &self.args.command[0];
        debug!("launching {binary} with {} profiler variables", env.len());

        let mut command = Command::new(binary);
        command.args(&self.args.command[1..]);
        for (key, value) in env {
            command.env(key, value);
        }

        command
            .status()
            .map_err(|err| NlenstError::Launch(format!("{binary}: {err}")))
    }
}

/// Translate an exit status into a shell-style code.
fn exit_code(status: std::process::ExitStatus) -> i32 {
    match status.code() {
        Some(code) => code,
        // Killed by a signal; mirror the shell convention
        None => {
            #[cfg(unix)]
            {
                use std::os::unix::process::ExitStatusExt;
                if let Some(signal) = status.signal() {
                    return 128 + signal;
                }
            }
            1
        }
    }
}

fn check_runtime_path(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        Ok(path.to_path_buf())
    } else {
        Err(NlenstError::Config(format!(
            "runtime library not found: {}",
            path.display()
        )))
    }
}

/// Run the run command.
pub fn run_launch(args: RunArgs) -> Result<i32> {
    let command = RunCommand::new(args);
    command.run()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args_with_command() -> RunArgs {
        RunArgs {
            command: vec!["/bin/true".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_validate_rejects_empty_command() {
        let command = RunCommand::new(RunArgs::default());
        assert!(matches!(
            command.validate(),
            Err(NlenstError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_thresholds() {
        let command = RunCommand::new(RunArgs {
            page_threshold: Some(0),
            ..args_with_command()
        });
        assert!(command.validate().is_err());

        let command = RunCommand::new(RunArgs {
            cache_threshold: Some(0),
            ..args_with_command()
        });
        assert!(command.validate().is_err());
    }

    #[test]
    fn test_assemble_env_minimal() {
        let command = RunCommand::new(args_with_command());
        let env = command.assemble_env(Path::new("/opt/libnlens.so")).unwrap();

        let preload = env.iter().find(|(k, _)| k == "LD_PRELOAD").unwrap();
        assert!(preload.1.contains("/opt/libnlens.so"));
        // Nothing else is forced on the target
        assert!(!env.iter().any(|(k, _)| k == "NUMAPERF_JSON"));
    }

    #[test]
    fn test_assemble_env_full() {
        let command = RunCommand::new(RunArgs {
            page_threshold: Some(500),
            cache_threshold: Some(64),
            top_objects: Some(30),
            top_cache_lines: Some(10),
            json: true,
            report_fd: Some(7),
            verbose: true,
            ..args_with_command()
        });
        let env = command.assemble_env(Path::new("/opt/libnlens.so")).unwrap();

        let get = |key: &str| {
            env.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };
        assert_eq!(get("NUMAPERF_PAGE_DETAIL_THRESHOLD"), Some("500"));
        assert_eq!(get("NUMAPERF_CACHE_DETAIL_THRESHOLD"), Some("64"));
        assert_eq!(get("NUMAPERF_TOP_OBJECTS"), Some("30"));
        assert_eq!(get("NUMAPERF_TOP_CACHELINES"), Some("10"));
        assert_eq!(get("NUMAPERF_JSON"), Some("1"));
        assert_eq!(get("NUMAPERF_REPORT_FD"), Some("7"));
        assert_eq!(get("NUMAPERF_VERBOSE"), Some("1"));
    }

    #[test]
    fn test_locate_runtime_rejects_missing_explicit_path() {
        let command = RunCommand::new(RunArgs {
            runtime: Some(PathBuf::from("/nonexistent/libnlens.so")),
            ..args_with_command()
        });
        assert!(matches!(
            command.locate_runtime(),
            Err(NlenstError::Config(_))
        ));
    }

    #[test]
    fn test_locate_runtime_accepts_existing_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let lib = dir.path().join(RUNTIME_LIB);
        std::fs::write(&lib, b"").unwrap();

        let command = RunCommand::new(RunArgs {
            runtime: Some(lib.clone()),
            ..args_with_command()
        });
        assert_eq!(command.locate_runtime().unwrap(), lib);
    }
}
