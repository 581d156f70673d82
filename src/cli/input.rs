//! Line editing runs on a blocking thread so the runtime stays free to
//! stream replies.
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    Line(String),
    Interrupted,
    Eof,
    Failed(String),
}

pub trait LineSource {
    fn read_line(&mut self, prompt: &str) -> Input;
}

impl LineSource for DefaultEditor {
    fn read_line(&mut self, prompt: &str) -> Input {
        match self.readline(prompt) {
            Ok(line) => {
                if !line.trim().is_empty() {
                    let _ = self.add_history_entry(line.as_str());
                }
                Input::Line(line)
            }
            Err(ReadlineError::Interrupted) => Input::Interrupted,
            Err(ReadlineError::Eof) => Input::Eof,
            Err(err) => Input::Failed(err.to_string()),
        }
    }
}

/// Reads one line per call to `next`. The prompt is only shown when
/// asked for, never while a reply is printing.
pub struct Prompter {
    ready: mpsc::Sender<()>,
    lines: mpsc::Receiver<Input>,
}

impl Prompter {
    /// `make` runs on the blocking thread, so the source itself
    /// doesn't have to be `Send`.
    pub fn spawn<S, F>(prompt: &'static str, make: F) -> Self
    where
        S: LineSource,
        F: FnOnce() -> Result<S, String> + Send + 'static,
    {
        let (ready_tx, mut ready_rx) = mpsc::channel::<()>(1);
        let (line_tx, line_rx) = mpsc::channel(1);

        tokio::task::spawn_blocking(move || {
            let mut source = match make() {
                Ok(source) => source,
                Err(e) => {
                    let _ = line_tx.blocking_send(Input::Failed(e));
                    return;
                }
            };
            while ready_rx.blocking_recv().is_some() {
                if line_tx.blocking_send(source.read_line(prompt)).is_err() {
                    break;
                }
            }
        });

        Self {
            ready: ready_tx,
            lines: line_rx,
        }
    }

    pub async fn next(&mut self) -> Input {
        // A reader that already stopped may still have a line queued
        let _ = self.ready.send(()).await;
        self.lines.recv().await.unwrap_or(Input::Eof)
    }
}
