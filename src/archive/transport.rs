//! Trait abstraction for remote archive transfers to enable testing

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::process::Command;
use tracing::debug;

use crate::config::ArchiveConfig;
use crate::error::{ArchiverError, Result};

/// Longest SSH identification line we accept (RFC 4253 caps it at 255)
const MAX_BANNER_LEN: usize = 255;

/// Remote listing and file-transfer operations against the archive host
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArchiveTransport: Send + Sync {
    /// Open a session far enough to prove the host answers; runs no command
    async fn handshake(&self) -> Result<()>;

    /// File names (not paths) directly inside `remote_dir`
    async fn list(&self, remote_dir: &str) -> Result<Vec<String>>;

    /// Copy one remote file into `local_dir`, returning the local path
    async fn fetch_one(&self, remote_path: &str, local_dir: &Path) -> Result<PathBuf>;

    /// Copy all `local_files` into `remote_dir` as one batch
    ///
    /// `Ok` means the whole batch transferred.
    async fn upload(&self, local_files: &[PathBuf], remote_dir: &str) -> Result<()>;
}

/// Transport built on the system `ssh` and `scp` clients
///
/// Authentication is whatever the local SSH agent/keys provide; `BatchMode`
/// keeps the clients from ever prompting.
///
/// Remote paths go through the remote shell for `ssh` commands and for legacy
/// `scp` (`-O`), so they are shell-quoted there. In SFTP mode `scp` takes them
/// literally and they are passed as-is.
#[derive(Debug, Clone)]
pub struct SshTransport {
    host: String,
    user: String,
    port: u16,
    connect_timeout_s: u64,
    legacy_scp: bool,
}

impl SshTransport {
    pub fn new(host: &str, user: &str, port: u16, connect_timeout_s: u64) -> Self {
        Self {
            host: host.to_string(),
            user: user.to_string(),
            port,
            connect_timeout_s: connect_timeout_s.max(1),
            legacy_scp: true,
        }
    }

    /// Use the legacy scp protocol (`-O`), or SFTP mode when `false`
    ///
    /// OpenSSH clients before 9.0 reject `-O` but speak the legacy protocol
    /// anyway; leave this on unless the client is new and the host is SFTP-only.
    pub fn with_legacy_scp(mut self, legacy: bool) -> Self {
        self.legacy_scp = legacy;
        self
    }

    pub fn from_config(config: &ArchiveConfig) -> Self {
        Self::new(
            &config.host,
            &config.user,
            config.port,
            config.timeout().as_secs(),
        )
        .with_legacy_scp(config.legacy_scp)
    }

    fn target(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_s),
        ]
    }

    fn ssh(&self) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p").arg(self.port.to_string()).args(self.common_options());
        cmd
    }

    fn scp(&self) -> Command {
        let mut cmd = Command::new("scp");
        if self.legacy_scp {
            cmd.arg("-O");
        }
        cmd.arg("-P").arg(self.port.to_string()).args(self.common_options());
        cmd
    }

    /// `user@host:path` with the path quoted as the remote side expects
    fn remote_spec(&self, remote_path: &str) -> String {
        if self.legacy_scp {
            format!("{}:{}", self.target(), shell_quote(remote_path))
        } else {
            format!("{}:{}", self.target(), remote_path)
        }
    }

    fn fetch_command(&self, remote_path: &str, local_path: &Path) -> Command {
        let mut cmd = self.scp();
        cmd.arg(self.remote_spec(remote_path)).arg(local_path);
        cmd
    }

    fn upload_command(&self, local_files: &[PathBuf], remote_dir: &str) -> Command {
        let mut cmd = self.scp();
        cmd.args(local_files)
            .arg(self.remote_spec(&format!("{}/", remote_dir.trim_end_matches('/'))));
        cmd
    }
}

/// Run a prepared command, mapping a non-zero exit to `Remote`
async fn run(mut cmd: Command, what: &str) -> Result<Output> {
    let output = cmd
        .stdin(Stdio::null())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| ArchiverError::Remote(format!("{}: failed to spawn: {}", what, e)))?;

    if !output.status.success() {
        return Err(ArchiverError::Remote(format!(
            "{} exited with {}: {}",
            what,
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }

    Ok(output)
}

/// Quote for the remote POSIX shell
fn shell_quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

#[async_trait]
impl ArchiveTransport for SshTransport {
    async fn handshake(&self) -> Result<()> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;

        // The server speaks first with "SSH-protoversion-softwareversion"
        let mut banner = Vec::with_capacity(64);
        let mut byte = [0u8; 1];
        while banner.len() < MAX_BANNER_LEN {
            if stream.read(&mut byte).await? == 0 {
                break;
            }
            if byte[0] == b'\n' {
                break;
            }
            banner.push(byte[0]);
        }

        let banner = String::from_utf8_lossy(&banner);
        if banner.starts_with("SSH-") {
            debug!("{} answered with {}", self.host, banner.trim_end());
            Ok(())
        } else {
            Err(ArchiverError::Remote(format!(
                "{}:{} did not send an SSH banner",
                self.host, self.port
            )))
        }
    }

    async fn list(&self, remote_dir: &str) -> Result<Vec<String>> {
        let mut cmd = self.ssh();
        cmd.arg(self.target())
            .arg(format!("ls -1 -- {}", shell_quote(remote_dir)));

        let output = run(cmd, "ssh ls").await?;
        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn fetch_one(&self, remote_path: &str, local_dir: &Path) -> Result<PathBuf> {
        let file_name = Path::new(remote_path)
            .file_name()
            .ok_or_else(|| ArchiverError::Remote(format!("{} has no file name", remote_path)))?;
        let local_path = local_dir.join(file_name);

        run(self.fetch_command(remote_path, &local_path), "scp fetch").await?;
        Ok(local_path)
    }

    async fn upload(&self, local_files: &[PathBuf], remote_dir: &str) -> Result<()> {
        run(self.upload_command(local_files, remote_dir), "scp upload").await?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/home/pi/records"), "'/home/pi/records'");
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_from_config() {
        let config = ArchiveConfig::default();
        let transport = SshTransport::from_config(&config);
        assert_eq!(transport.target(), "pi@archive.local");
        assert_eq!(transport.port, 22);
        assert_eq!(transport.connect_timeout_s, 10);
    }

    fn args(cmd: &Command) -> Vec<String> {
        cmd.as_std()
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_scp_quotes_remote_paths_like_ssh() {
        let transport = SshTransport::new("nas", "pi", 2222, 5);

        let fetch = args(&transport.fetch_command("/srv/my records/record.20240101000000.json", Path::new("/tmp/in")));
        assert_eq!(fetch[0], "-O");
        assert_eq!(&fetch[1..3], &["-P", "2222"]);
        assert_eq!(fetch[fetch.len() - 2], "pi@nas:'/srv/my records/record.20240101000000.json'");
        assert_eq!(fetch[fetch.len() - 1], "/tmp/in");

        let files = vec![PathBuf::from("/out/a.json"), PathBuf::from("/out/b.json")];
        let upload = args(&transport.upload_command(&files, "/srv/my records/"));
        assert_eq!(upload.last().unwrap(), "pi@nas:'/srv/my records/'");
        assert!(upload.contains(&"/out/a.json".to_string()));
    }

    #[test]
    fn test_sftp_mode_passes_paths_literally() {
        let transport = SshTransport::new("nas", "pi", 22, 5).with_legacy_scp(false);

        let upload = args(&transport.upload_command(&[PathBuf::from("/out/a.json")], "/srv/my records"));
        assert!(!upload.contains(&"-O".to_string()));
        assert_eq!(upload.last().unwrap(), "pi@nas:/srv/my records/");
    }

    #[test]
    fn test_connect_timeout_is_at_least_one_second() {
        let transport = SshTransport::new("host", "user", 22, 0);
        assert_eq!(transport.connect_timeout_s, 1);
    }

    #[tokio::test]
    async fn test_handshake_accepts_ssh_banner() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"SSH-2.0-OpenSSH_9.6\r\n").await.unwrap();
        });

        let transport = SshTransport::new("127.0.0.1", "pi", port, 1);
        assert!(transport.handshake().await.is_ok());
    }

    #[tokio::test]
    async fn test_handshake_rejects_non_ssh_service() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            socket.write_all(b"HTTP/1.1 400 Bad Request\r\n").await.unwrap();
        });

        let transport = SshTransport::new("127.0.0.1", "pi", port, 1);
        match transport.handshake().await {
            Err(ArchiverError::Remote(msg)) => assert!(msg.contains("SSH banner")),
            other => panic!("Expected Remote error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_handshake_connection_refused() {
        // Bind then drop to get a port nobody listens on
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let transport = SshTransport::new("127.0.0.1", "pi", port, 1);
        assert!(matches!(transport.handshake().await, Err(ArchiverError::Io(_))));
    }
}
