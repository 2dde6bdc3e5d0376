//! Client for the external rollup proof generator.
//!
//! The generator is one long-running child process. Requests are the
//! serialized rollup witness, framed with a little-endian u32 length
//! prefix; responses are a status byte (0 = ok) followed by the proof
//! bytes. Requests are serialized: the circuit prover handles one witness
//! at a time.
//!
//! Proving failure is an expected outcome, not an error: `create_proof`
//! resolves to `None` and the aggregator drops the batch. Cancellation
//! aborts the in-flight exchange and makes every later call return `None`.

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use zkra_common::Rollup;

/// Response status byte for a successful proof.
const STATUS_OK: u8 = 0;

/// Errors raised while starting the prover child.
#[derive(Debug, Error)]
pub enum ProverError {
    #[error("failed to spawn prover: {0}")]
    Spawn(String),
}

/// Asynchronous proof generation seam.
#[async_trait]
pub trait Prover: Send + Sync {
    /// Prove a rollup witness. `None` means the prover failed or was
    /// cancelled; the caller drops the batch.
    async fn create_proof(&self, rollup: &Rollup) -> Option<Vec<u8>>;

    /// Abort in-flight work; all future calls return `None`.
    fn cancel(&self);
}

struct ProverIo {
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Client over a persistent prover child process.
pub struct ProofGenerator {
    io: tokio::sync::Mutex<ProverIo>,
    child: std::sync::Mutex<Option<Child>>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl ProofGenerator {
    /// Spawn the prover child with piped stdio.
    pub fn spawn(program: &str, args: &[String]) -> Result<Self, ProverError> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ProverError::Spawn(format!("{program}: {e}")))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ProverError::Spawn("prover stdin not piped".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ProverError::Spawn("prover stdout not piped".into()))?;

        info!(program, "spawned proof generator");
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Ok(Self {
            io: tokio::sync::Mutex::new(ProverIo {
                stdin,
                stdout: BufReader::new(stdout),
            }),
            child: std::sync::Mutex::new(Some(child)),
            cancel_tx,
            cancel_rx,
        })
    }
}

#[async_trait]
impl Prover for ProofGenerator {
    async fn create_proof(&self, rollup: &Rollup) -> Option<Vec<u8>> {
        if *self.cancel_rx.borrow() {
            return None;
        }
        let request = rollup.to_bytes();
        let mut cancel = self.cancel_rx.clone();

        let mut io = tokio::select! {
            guard = self.io.lock() => guard,
            _ = cancel.changed() => return None,
        };

        let exchange = async {
            io.stdin.write_u32_le(request.len() as u32).await?;
            io.stdin.write_all(&request).await?;
            io.stdin.flush().await?;

            let len = io.stdout.read_u32_le().await? as usize;
            let mut response = vec![0u8; len];
            io.stdout.read_exact(&mut response).await?;
            Ok::<_, std::io::Error>(response)
        };

        tokio::select! {
            result = exchange => match result {
                Ok(response) if response.first() == Some(&STATUS_OK) => {
                    debug!(rollup_id = rollup.rollup_id, bytes = response.len() - 1, "proof ready");
                    Some(response[1..].to_vec())
                }
                Ok(_) => {
                    warn!(rollup_id = rollup.rollup_id, "prover reported failure");
                    None
                }
                Err(e) => {
                    warn!(rollup_id = rollup.rollup_id, "prover io error: {e}");
                    None
                }
            },
            _ = cancel.changed() => None,
        }
    }

    fn cancel(&self) {
        let _ = self.cancel_tx.send(true);
        if let Ok(mut guard) = self.child.lock() {
            if let Some(child) = guard.as_mut() {
                let _ = child.start_kill();
            }
        }
        info!("proof generator cancelled");
    }
}
