//! Remote command execution over SSH, optionally inside a container
//! sandbox, with exit codes preserved so failures can be classified.

use std::ffi::OsString;
use std::net::IpAddr;

use shell_escape::unix::escape;

mod config;
mod types;
mod util;

pub use config::{DEFAULT_SSH_PORT, RemoteError, SshConfig};
pub use types::{CommandOutput, CommandRunner, ProcessCommandRunner};
pub use util::expand_tilde;

/// Exit code `ssh` reports when the connection itself fails.
pub const CONNECTION_LOST_EXIT_CODE: i32 = 255;

/// Address of a reachable instance.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct SshTarget {
    /// Public address of the instance.
    pub host: IpAddr,
    /// TCP port for SSH.
    pub port: u16,
}

/// Runs commands on instances through the system `ssh` client.
#[derive(Clone, Debug)]
pub struct RemoteShell<R: CommandRunner> {
    config: SshConfig,
    runner: R,
}

impl<R: CommandRunner> RemoteShell<R> {
    /// Creates a new shell using the provided runner and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RemoteError::InvalidConfig`] when validation fails.
    pub fn new(config: SshConfig, runner: R) -> Result<Self, RemoteError> {
        config.validate()?;
        Ok(Self { config, runner })
    }

    /// Returns a reference to the underlying configuration.
    #[must_use]
    pub const fn config(&self) -> &SshConfig {
        &self.config
    }

    /// Builds the target for `host` using the configured port.
    #[must_use]
    pub const fn target(&self, host: IpAddr) -> SshTarget {
        SshTarget {
            host,
            port: self.config.ssh_port,
        }
    }

    /// Executes `remote_command` on `target`, wrapping it in the sandbox image
    /// when one is given.
    ///
    /// # Errors
    ///
    /// Propagates any failure to spawn the SSH client. A non-zero remote exit
    /// code is not an error; it is reported in the returned output.
    pub fn execute(
        &self,
        target: SshTarget,
        remote_command: &str,
        sandbox_image: Option<&str>,
    ) -> Result<CommandOutput, RemoteError> {
        let command = sandboxed_command(remote_command, sandbox_image);
        let args = self.build_ssh_args(target, &command);
        self.runner.run(&self.config.ssh_bin, &args)
    }

    fn build_ssh_args(&self, target: SshTarget, remote_command: &str) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(target.port.to_string()),
        ];

        if let Some(ref identity_file) = self.config.ssh_identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        if self.config.ssh_batch_mode {
            args.push(OsString::from("-o"));
            args.push(OsString::from("BatchMode=yes"));
        }

        if !self.config.ssh_strict_host_key_checking {
            args.push(OsString::from("-o"));
            args.push(OsString::from("StrictHostKeyChecking=no"));
        }

        if !self.config.ssh_known_hosts_file.trim().is_empty() {
            args.push(OsString::from("-o"));
            args.push(OsString::from(format!(
                "UserKnownHostsFile={}",
                self.config.ssh_known_hosts_file
            )));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            self.config.ssh_user, target.host
        )));
        args.push(OsString::from(remote_command));
        args
    }
}

/// Wraps `command` so it runs inside `image` on the remote host.
///
/// Without an image the command is returned unchanged.
#[must_use]
pub fn sandboxed_command(command: &str, image: Option<&str>) -> String {
    let Some(container) = image else {
        return command.to_owned();
    };
    let escaped_image = escape(container.into());
    let escaped_command = escape(command.into());
    format!("sudo docker run --rm --entrypoint /bin/bash {escaped_image} -c {escaped_command}")
}
