use std::collections::VecDeque;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone)]
pub struct OutputLine {
    pub stream: StreamKind,
    pub text: String,
}

/// Forwards every non-empty line of `stream` until EOF. `\r` is treated as a
/// line break too, since both tools redraw progress in place.
pub fn spawn_output_reader<R>(stream: R, tx: mpsc::UnboundedSender<OutputLine>, kind: StreamKind)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut reader = BufReader::new(stream);
        let mut buf = Vec::with_capacity(4096);

        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let raw = String::from_utf8_lossy(&buf);
                    for piece in raw.split('\r') {
                        let text = piece.trim_end_matches('\n').trim();
                        if text.is_empty() {
                            continue;
                        }
                        let _ = tx.send(OutputLine {
                            stream: kind,
                            text: text.to_string(),
                        });
                    }
                }
                Err(err) => {
                    let _ = tx.send(OutputLine {
                        stream: kind,
                        text: format!("[read error] {err}"),
                    });
                    break;
                }
            }
        }
    });
}

/// Last `cap` lines of a stream, for error reporting.
#[derive(Debug)]
pub struct LineTail {
    lines: VecDeque<String>,
    cap: usize,
}

impl LineTail {
    pub fn new(cap: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(cap),
            cap: cap.max(1),
        }
    }

    pub fn push(&mut self, line: &str) {
        if self.lines.len() == self.cap {
            self.lines.pop_front();
        }
        self.lines.push_back(line.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn joined(&self) -> String {
        self.lines.iter().cloned().collect::<Vec<_>>().join("\n")
    }
}
