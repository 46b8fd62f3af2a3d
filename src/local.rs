//! Local execution provider.
//!
//! Runs commands in the container this sidecar itself lives in, which is
//! the common deployment model: the daemon is injected next to the tooling
//! container and "remote" execution is a local spawn. TTY sessions go
//! through a PTY with blocking reader/writer threads; non-TTY process
//! invocations use piped standard streams.

use bytes::Bytes;
use portable_pty::{native_pty_system, CommandBuilder, PtySize};
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};

use crate::remote::{
    ContainerRef, ContainerResolver, Credential, ExecChannels, LaunchError, LaunchSpec,
    RemoteExecutor, ResolveError, Termination, BINDING_CHANNEL_CAPACITY,
};

/// Container name under which the local target is listed.
pub const LOCAL_CONTAINER_NAME: &str = "local";

pub struct LocalExecutor {
    pod_name: String,
}

impl LocalExecutor {
    pub fn new() -> Self {
        let pod_name = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string());
        Self { pod_name }
    }

    fn local_ref(&self) -> ContainerRef {
        ContainerRef {
            pod_name: self.pod_name.clone(),
            container_name: LOCAL_CONTAINER_NAME.to_string(),
        }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl RemoteExecutor for LocalExecutor {
    async fn launch(
        &self,
        spec: &LaunchSpec,
        _credential: &Credential,
    ) -> Result<ExecChannels, LaunchError> {
        if spec.tty {
            launch_pty(spec)
        } else {
            launch_process(spec)
        }
    }
}

#[async_trait::async_trait]
impl ContainerResolver for LocalExecutor {
    async fn list(&self, _credential: &Credential) -> Result<Vec<ContainerRef>, ResolveError> {
        Ok(vec![self.local_ref()])
    }

    async fn resolve(
        &self,
        _credential: &Credential,
        container_name: &str,
    ) -> Result<ContainerRef, ResolveError> {
        if container_name.is_empty() || container_name == LOCAL_CONTAINER_NAME {
            Ok(self.local_ref())
        } else {
            Err(ResolveError::NotFound(container_name.to_string()))
        }
    }
}

fn shell_fallback() -> String {
    std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())
}

/// Spawn a TTY-backed command. Reader and writer run on blocking threads
/// (PTY I/O is synchronous); resize requests are applied to the PTY master
/// from an async task.
fn launch_pty(spec: &LaunchSpec) -> Result<ExecChannels, LaunchError> {
    let pty_system = native_pty_system();
    let pair = pty_system
        .openpty(PtySize {
            rows: spec.term_size.rows,
            cols: spec.term_size.cols,
            pixel_width: 0,
            pixel_height: 0,
        })
        .map_err(|e| LaunchError::Launch(format!("failed to open pty: {e}")))?;

    let mut cmd = if spec.command.is_empty() {
        CommandBuilder::new(shell_fallback())
    } else {
        let mut cmd = CommandBuilder::new(&spec.command[0]);
        cmd.args(&spec.command[1..]);
        cmd
    };
    cmd.env(
        "TERM",
        std::env::var("TERM").unwrap_or_else(|_| "xterm-256color".to_string()),
    );
    if let Some(ref dir) = spec.working_dir {
        cmd.cwd(dir);
    }

    let mut child = pair
        .slave
        .spawn_command(cmd)
        .map_err(|e| LaunchError::Launch(format!("failed to spawn command: {e}")))?;
    drop(pair.slave);

    let reader = pair
        .master
        .try_clone_reader()
        .map_err(|e| LaunchError::Launch(format!("failed to clone pty reader: {e}")))?;
    let writer = pair
        .master
        .take_writer()
        .map_err(|e| LaunchError::Launch(format!("failed to take pty writer: {e}")))?;
    let master = pair.master;

    let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(BINDING_CHANNEL_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel::<Bytes>(BINDING_CHANNEL_CAPACITY);
    let (resize_tx, mut resize_rx) = mpsc::channel::<crate::remote::TermSize>(8);
    let (termination_tx, termination_rx) = oneshot::channel::<Termination>();

    // PTY reader: EOF (or EIO) after the child exits ends the loop. The
    // reader-done signal gates the termination send so viewers always see
    // the full output tail before the exit event.
    let (reader_done_tx, reader_done_rx) = oneshot::channel::<()>();
    tokio::task::spawn_blocking(move || {
        use std::io::Read;
        let mut reader = reader;
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if output_tx
                        .blocking_send(Bytes::copy_from_slice(&buf[..n]))
                        .is_err()
                    {
                        break;
                    }
                }
            }
        }
        let _ = reader_done_tx.send(());
    });

    // PTY writer. Exits when the input channel closes or the write fails
    // (EIO once the child is gone).
    tokio::task::spawn_blocking(move || {
        use std::io::Write;
        let mut writer = writer;
        while let Some(data) = input_rx.blocking_recv() {
            if writer.write_all(&data).is_err() {
                break;
            }
            let _ = writer.flush();
        }
    });

    // Child exit monitor.
    let (wait_tx, wait_rx) = oneshot::channel::<Termination>();
    tokio::task::spawn_blocking(move || {
        let termination = match child.wait() {
            Ok(status) => Termination::Exited(status.exit_code() as i32),
            Err(e) => Termination::Failed(format!("wait failed: {e}")),
        };
        let _ = wait_tx.send(termination);
    });

    // Resize loop and termination gate. Owning `master` here keeps the PTY
    // controlling side alive until the session ends.
    tokio::spawn(async move {
        let mut wait_rx = wait_rx;
        let termination = loop {
            tokio::select! {
                size = resize_rx.recv() => {
                    match size {
                        Some(size) => {
                            if let Err(e) = master.resize(PtySize {
                                rows: size.rows,
                                cols: size.cols,
                                pixel_width: 0,
                                pixel_height: 0,
                            }) {
                                tracing::warn!(error = %e, "pty resize failed");
                            }
                        }
                        None => {
                            // Session side gone; just wait for the child.
                            break (&mut wait_rx)
                                .await
                                .unwrap_or(Termination::Failed("exit monitor dropped".into()));
                        }
                    }
                }
                result = &mut wait_rx => {
                    break result.unwrap_or(Termination::Failed("exit monitor dropped".into()));
                }
            }
        };
        // Let the reader flush the output tail before reporting the exit.
        let _ = reader_done_rx.await;
        let _ = termination_tx.send(termination);
    });

    Ok(ExecChannels {
        input: input_tx,
        output: output_rx,
        resize: resize_tx,
        termination: termination_rx,
    })
}

/// Spawn a non-TTY process with piped standard streams. stdout and stderr
/// are merged into the output channel; exit is reported only after both
/// streams reach EOF so the tail is never lost.
fn launch_process(spec: &LaunchSpec) -> Result<ExecChannels, LaunchError> {
    if spec.command.is_empty() {
        return Err(LaunchError::Launch("empty command".into()));
    }

    let mut cmd = tokio::process::Command::new(&spec.command[0]);
    cmd.args(&spec.command[1..])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped());
    if let Some(ref dir) = spec.working_dir {
        cmd.current_dir(dir);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| LaunchError::Launch(format!("failed to spawn command: {e}")))?;

    let mut stdin = child.stdin.take();
    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| LaunchError::Launch("child stdout unavailable".into()))?;
    let mut stderr = child
        .stderr
        .take()
        .ok_or_else(|| LaunchError::Launch("child stderr unavailable".into()))?;

    let (input_tx, mut input_rx) = mpsc::channel::<Bytes>(BINDING_CHANNEL_CAPACITY);
    let (output_tx, output_rx) = mpsc::channel::<Bytes>(BINDING_CHANNEL_CAPACITY);
    let (resize_tx, mut resize_rx) = mpsc::channel::<crate::remote::TermSize>(8);
    let (termination_tx, termination_rx) = oneshot::channel::<Termination>();

    // Input pump.
    tokio::spawn(async move {
        while let Some(data) = input_rx.recv().await {
            let Some(ref mut sink) = stdin else { break };
            if sink.write_all(&data).await.is_err() {
                break;
            }
            let _ = sink.flush().await;
        }
    });

    // Resize requests are meaningless without a TTY; drain and drop them.
    tokio::spawn(async move { while resize_rx.recv().await.is_some() {} });

    let out_tx = output_tx.clone();
    let stdout_pump = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stdout.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if out_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });
    let stderr_pump = tokio::spawn(async move {
        let mut buf = [0u8; 4096];
        loop {
            match stderr.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if output_tx.send(Bytes::copy_from_slice(&buf[..n])).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    tokio::spawn(async move {
        let _ = stdout_pump.await;
        let _ = stderr_pump.await;
        let termination = match child.wait().await {
            Ok(status) => Termination::Exited(status.code().unwrap_or(-1)),
            Err(e) => Termination::Failed(format!("wait failed: {e}")),
        };
        let _ = termination_tx.send(termination);
    });

    Ok(ExecChannels {
        input: input_tx,
        output: output_rx,
        resize: resize_tx,
        termination: termination_rx,
    })
}
