//! Line reading logic for subprocess transport

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};

use crate::error::{ClaudeError, Result};

use super::transport::SubprocessTransport;

impl SubprocessTransport {
    /// Read lines from the subprocess output
    ///
    /// This method spawns a background task that frames stdout into lines.
    /// Blank lines are dropped. The receiver closes at end of stream.
    ///
    /// # Returns
    /// A receiver that yields raw lines or errors
    pub(super) fn read_lines_impl(&mut self) -> mpsc::UnboundedReceiver<Result<String>> {
        let (tx, rx) = mpsc::unbounded_channel();

        let stdout = self.stdout.take();
        let max_buffer_size = self.options.max_buffer_size;
        let key = self.key.clone();

        let task = tokio::spawn(async move {
            let Some(stdout) = stdout else {
                let _ = tx.send(Err(ClaudeError::connection(
                    "Not connected - stdout not available",
                )));
                return;
            };

            let mut lines =
                FramedRead::new(stdout, LinesCodec::new_with_max_length(max_buffer_size));

            while let Some(next) = lines.next().await {
                match next {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        if tx.send(Ok(line)).is_err() {
                            // Receiver dropped, stop reading
                            break;
                        }
                    }
                    Err(LinesCodecError::MaxLineLengthExceeded) => {
                        log::warn!(
                            "[{}] stdout line exceeded maximum buffer size of {} bytes",
                            key,
                            max_buffer_size
                        );
                        let _ = tx.send(Err(ClaudeError::transport(format!(
                            "Line exceeded maximum buffer size of {max_buffer_size} bytes"
                        ))));
                        break;
                    }
                    Err(LinesCodecError::Io(e)) => {
                        let _ = tx.send(Err(ClaudeError::Io(e)));
                        break;
                    }
                }
            }

            log::debug!("[{}] stdout reached end of stream", key);
        });

        // Store task handle for cleanup
        self.reader_task = Some(task);

        rx
    }
}
