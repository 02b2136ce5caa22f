//! Command value objects
//!
//! Master and worker invocations are built once per run as [`CommandSpec`]s
//! (program + argument vector). They only become text at an execution
//! boundary: [`CommandSpec::to_shell_string`] for the remote shell,
//! [`CommandSpec::to_command`] for the local child process.

use crate::config::InferenceConfig;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// A program and its arguments
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Append one argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Append several arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Prefix with `nice -n <niceness>`
    pub fn niced(self, niceness: i32) -> Self {
        let mut args = vec!["-n".to_string(), niceness.to_string(), self.program];
        args.extend(self.args);
        Self {
            program: "nice".to_string(),
            args,
        }
    }

    /// POSIX-shell-escaped command line for remote execution
    pub fn to_shell_string(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| {
                if part.is_empty() {
                    "''".to_string()
                } else {
                    shellwords::escape(part)
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Local child process for this command (stdout piped by the caller)
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args);
        cmd
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_shell_string())
    }
}

/// Scheduling priority used for both master and workers
const NICENESS: i32 = -20;

/// Worker launch command: `worker --port <port> --nthreads <threads>`
pub fn worker_command(inference: &InferenceConfig) -> CommandSpec {
    let cmd = CommandSpec::new(inference.worker_binary.display().to_string()).args([
        "worker".to_string(),
        "--port".to_string(),
        inference.worker_port.to_string(),
        "--nthreads".to_string(),
        inference.threads.to_string(),
    ]);

    if inference.nice {
        cmd.niced(NICENESS)
    } else {
        cmd
    }
}

/// Master inference command, with `--workers host:port ...` when workers are configured
pub fn master_command(inference: &InferenceConfig, workers: &[String]) -> CommandSpec {
    let model_path: PathBuf = inference.model_dir.join(format!("{}.bin", inference.model));
    let tokenizer_path: PathBuf = inference.model_dir.join("tokenizer.bin");

    let mut cmd = CommandSpec::new(inference.master_binary.display().to_string()).args([
        "inference".to_string(),
        "--model".to_string(),
        model_path.display().to_string(),
        "--tokenizer".to_string(),
        tokenizer_path.display().to_string(),
        "--weights-float-type".to_string(),
        inference.weights_float_type.clone(),
        "--buffer-float-type".to_string(),
        inference.buffer_float_type.clone(),
        "--prompt".to_string(),
        inference.prompt.clone(),
        "--steps".to_string(),
        inference.steps.to_string(),
        "--nthreads".to_string(),
        inference.threads.to_string(),
    ]);

    if !workers.is_empty() {
        cmd = cmd.arg("--workers").args(
            workers
                .iter()
                .map(|host| format!("{}:{}", host, inference.worker_port)),
        );
    }

    if inference.nice {
        cmd.niced(NICENESS)
    } else {
        cmd
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_command_default() {
        let cmd = worker_command(&InferenceConfig::default());
        assert_eq!(
            cmd.to_shell_string(),
            "nice -n -20 /root/distributed-llama/main worker --port 9998 --nthreads 4"
        );
    }

    #[test]
    fn test_master_command_local_only() {
        let cmd = master_command(&InferenceConfig::default(), &[]);
        assert_eq!(cmd.program, "nice");
        assert!(!cmd.args.contains(&"--workers".to_string()));
        assert!(cmd.args.contains(&"./model/dllama_llama-2-7b_q40.bin".to_string()));
        assert!(cmd.args.contains(&"Hello world".to_string()));
    }

    #[test]
    fn test_master_command_with_workers() {
        let mut inference = InferenceConfig::default();
        inference.nice = false;
        let workers = vec!["192.168.6.1".to_string(), "192.168.6.2".to_string()];
        let cmd = master_command(&inference, &workers);

        assert_eq!(cmd.program, "./main");
        let tail: Vec<&str> = cmd.args.iter().rev().take(3).rev().map(String::as_str).collect();
        assert_eq!(tail, vec!["--workers", "192.168.6.1:9998", "192.168.6.2:9998"]);
    }

    #[test]
    fn test_shell_string_escapes_arguments() {
        let cmd = CommandSpec::new("./main").args(["--prompt", "Hello world", ""]);
        assert_eq!(cmd.to_shell_string(), "./main --prompt Hello\\ world ''");
    }

    #[test]
    fn test_niced_wraps_program() {
        let cmd = CommandSpec::new("echo").arg("hi").niced(5);
        assert_eq!(cmd.program, "nice");
        assert_eq!(cmd.args, vec!["-n", "5", "echo", "hi"]);
    }
}
