//! The per-submission execution pipeline.
//!
//! One submission flows through four phases: stage the source into the
//! container as a single-entry tar archive, compile it with output captured,
//! launch it with stdin/stdout/stderr attached, and bridge the attached
//! duplex stream to the session queues. The bridge is two cooperating
//! futures: the output pump forwards demultiplexed frames to the session's
//! output queue in arrival order, and the input pump drains caller-supplied
//! lines into the program's stdin. Both are joined (never detached) so the
//! driver's deadline cancels every suspension point by drop.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bollard::container::LogOutput;
use bollard::errors::Error as DockerError;
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SOURCE_FILE;
use crate::errors::ExecError;
use crate::sandbox::Sandbox;
use crate::session::{Session, SessionPipes};
use crate::types::{InputOperation, ProgramOutput};

/// Output suffixes that look like an interactive prompt.
const PROMPT_SUFFIXES: [&str; 6] = ["input", "enter", "type", "?", ">", ":"];

/// Drives compile and run execs against the shared sandbox.
#[derive(Clone)]
pub struct Executor {
    sandbox: Arc<Sandbox>,
    work_dir: String,
}

impl Executor {
    pub fn new(sandbox: Arc<Sandbox>) -> Self {
        let work_dir = sandbox.config().work_dir.clone();
        Self { sandbox, work_dir }
    }

    fn source_path(&self) -> String {
        format!("{}/{}", self.work_dir, SOURCE_FILE)
    }

    /// Stage the source and compile it. Non-zero compiler exit surfaces the
    /// captured stderr verbatim.
    pub async fn compile(&self, code: &str) -> Result<(), ExecError> {
        self.stage(code).await?;

        let exec_id = self
            .sandbox
            .create_exec(
                vec![
                    "go".to_string(),
                    "build".to_string(),
                    "-o".to_string(),
                    "/dev/null".to_string(),
                    self.source_path(),
                ],
                false,
            )
            .await
            .map_err(|err| ExecError::CompileIo(err.to_string()))?;

        let (mut output, _input) = self
            .sandbox
            .attach_exec(&exec_id)
            .await
            .map_err(|err| ExecError::CompileIo(err.to_string()))?;

        let mut stdout = String::new();
        let mut stderr = String::new();
        while let Some(frame) = output.next().await {
            match frame.map_err(|err| ExecError::CompileIo(err.to_string()))? {
                LogOutput::StdErr { message } => {
                    stderr.push_str(&String::from_utf8_lossy(&message));
                }
                other => stdout.push_str(&String::from_utf8_lossy(&other.into_bytes())),
            }
        }

        let status = self
            .sandbox
            .inspect_exec(&exec_id)
            .await
            .map_err(|err| ExecError::CompileIo(err.to_string()))?;
        if status.exit_code != 0 {
            return Err(ExecError::Compile(stderr));
        }
        log::debug!("compile ok ({} bytes of build output)", stdout.len());
        Ok(())
    }

    /// Write the source to a host temp file, pack it into a single-entry tar
    /// archive, and copy it into the container working directory.
    async fn stage(&self, code: &str) -> Result<(), ExecError> {
        let staging = tempfile::Builder::new()
            .prefix("gopad-")
            .tempdir()
            .map_err(|err| ExecError::Staging(format!("failed to create temp directory: {err}")))?;

        let source_path = staging.path().join(SOURCE_FILE);
        tokio::fs::write(&source_path, code)
            .await
            .map_err(|err| ExecError::Staging(format!("failed to write code to file: {err}")))?;
        let contents = tokio::fs::read(&source_path)
            .await
            .map_err(|err| ExecError::Staging(format!("failed to read staged file: {err}")))?;

        let archive = build_archive(&contents)
            .map_err(|err| ExecError::Staging(format!("failed to build archive: {err}")))?;
        self.sandbox
            .copy_in(&self.work_dir, archive)
            .await
            .map_err(|err| ExecError::Staging(format!("failed to copy code to container: {err}")))?;
        Ok(())
    }

    /// Launch the staged program and couple its duplex stream to the session
    /// queues until the program exits, the stream fails, or the session is
    /// closed.
    pub async fn run(&self, session: &Session, pipes: &mut SessionPipes) -> Result<(), ExecError> {
        let exec_id = self
            .sandbox
            .create_exec(
                vec!["go".to_string(), "run".to_string(), self.source_path()],
                true,
            )
            .await
            .map_err(|err| ExecError::RunIo(err.to_string()))?;

        let (output, input) = self
            .sandbox
            .attach_exec(&exec_id)
            .await
            .map_err(|err| ExecError::RunIo(err.to_string()))?;

        let output_done = CancellationToken::new();
        tokio::join!(
            Self::pump_output(output, pipes.output_tx.clone(), session, output_done.clone()),
            Self::pump_input(input, &mut pipes.input_rx, session, output_done),
        );
        Ok(())
    }

    /// Forward demultiplexed frames to the output queue in arrival order.
    ///
    /// Emits exactly one terminal record: the plain terminator on EOF, or an
    /// error record if the stream fails. Aborts silently when the session's
    /// `done` signal fires. Signals `output_done` on every exit path.
    async fn pump_output<S>(
        mut frames: S,
        output_tx: mpsc::Sender<ProgramOutput>,
        session: &Session,
        output_done: CancellationToken,
    ) where
        S: Stream<Item = Result<LogOutput, DockerError>> + Unpin,
    {
        let _signal_input = output_done.drop_guard();

        loop {
            let frame = tokio::select! {
                biased;
                _ = session.done().cancelled() => return,
                frame = frames.next() => frame,
            };

            let record = match frame {
                None => {
                    Self::emit(&output_tx, session, ProgramOutput::terminator()).await;
                    return;
                }
                Some(Err(err)) => {
                    let record = ProgramOutput::fatal(format!("error reading output: {err}"));
                    Self::emit(&output_tx, session, record).await;
                    return;
                }
                Some(Ok(LogOutput::StdErr { message })) => {
                    ProgramOutput::stderr(String::from_utf8_lossy(&message))
                }
                // Stdin echo and console frames count as stdout.
                Some(Ok(other)) => {
                    let text = String::from_utf8_lossy(&other.into_bytes()).into_owned();
                    let waiting = waiting_for_input(&text, session.input_ops());
                    ProgramOutput::stdout(text, waiting)
                }
            };

            if !Self::emit(&output_tx, session, record).await {
                return;
            }
        }
    }

    /// Send a record unless the session terminates first. Returns whether the
    /// pump should keep going.
    async fn emit(
        output_tx: &mpsc::Sender<ProgramOutput>,
        session: &Session,
        record: ProgramOutput,
    ) -> bool {
        tokio::select! {
            biased;
            _ = session.done().cancelled() => false,
            sent = output_tx.send(record) => sent.is_ok(),
        }
    }

    /// Drain caller-supplied lines into the program's stdin, one trailing
    /// newline per line. Terminates when the queue closes, the session is
    /// closed, or the output side has finished. Write failures end the pump
    /// without emitting a record — the output pump owns the terminal record.
    async fn pump_input<W>(
        mut stdin: W,
        input_rx: &mut mpsc::Receiver<String>,
        session: &Session,
        output_done: CancellationToken,
    ) where
        W: AsyncWrite + Unpin,
    {
        loop {
            let line = tokio::select! {
                biased;
                _ = session.done().cancelled() => return,
                _ = output_done.cancelled() => return,
                line = input_rx.recv() => match line {
                    Some(line) => line,
                    None => return,
                },
            };

            if let Err(err) = write_line(&mut stdin, &line).await {
                log::warn!("failed to write input to program: {}", err);
                return;
            }
        }
    }

    /// Format source with `gofmt` inside the sandbox, feeding it over the
    /// exec's stdin and collecting the formatted result from stdout.
    pub async fn format(&self, code: &str) -> Result<String, ExecError> {
        let exec_id = self
            .sandbox
            .create_exec(vec!["gofmt".to_string()], true)
            .await
            .map_err(|err| ExecError::Format(err.to_string()))?;

        let (mut output, mut input) = self
            .sandbox
            .attach_exec(&exec_id)
            .await
            .map_err(|err| ExecError::Format(err.to_string()))?;

        input
            .write_all(code.as_bytes())
            .await
            .map_err(|err| ExecError::Format(err.to_string()))?;
        input
            .shutdown()
            .await
            .map_err(|err| ExecError::Format(err.to_string()))?;
        drop(input);

        let mut formatted = String::new();
        let mut errors = String::new();
        while let Some(frame) = output.next().await {
            match frame.map_err(|err| ExecError::Format(err.to_string()))? {
                LogOutput::StdErr { message } => {
                    errors.push_str(&String::from_utf8_lossy(&message));
                }
                other => formatted.push_str(&String::from_utf8_lossy(&other.into_bytes())),
            }
        }

        let status = self
            .sandbox
            .inspect_exec(&exec_id)
            .await
            .map_err(|err| ExecError::Format(err.to_string()))?;
        if status.exit_code != 0 {
            return Err(ExecError::Format(errors));
        }
        Ok(formatted)
    }
}

async fn write_line<W: AsyncWrite + Unpin>(stdin: &mut W, line: &str) -> std::io::Result<()> {
    stdin.write_all(line.as_bytes()).await?;
    stdin.write_all(b"\n").await?;
    stdin.flush().await
}

/// Guess whether the program is blocked on stdin.
///
/// True only when the gate found input operations AND the latest output
/// either ends with a prompt-like suffix or was cut off mid-line. Advisory
/// UI data; pipeline correctness never depends on it.
pub(crate) fn waiting_for_input(output: &str, input_ops: &[InputOperation]) -> bool {
    if input_ops.is_empty() {
        return false;
    }

    let trimmed = output.trim().to_lowercase();
    if PROMPT_SUFFIXES.iter().any(|suffix| trimmed.ends_with(suffix)) {
        return true;
    }

    match output.as_bytes().last() {
        Some(&last) => last != b'\n' && last != b'\r',
        None => false,
    }
}

/// Pack the staged source into a tar archive with a single fixed-name entry.
fn build_archive(contents: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_path(SOURCE_FILE)?;
    header.set_size(contents.len() as u64);
    header.set_mode(0o600);
    header.set_mtime(
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_secs())
            .unwrap_or(0),
    );
    header.set_cksum();
    builder.append(&header, contents)?;
    builder.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures_util::stream;
    use std::io::Read;
    use tokio::io::AsyncReadExt;

    fn sample_op() -> InputOperation {
        InputOperation {
            line: 1,
            kind: "fmt.Scanln".to_string(),
            package: "fmt".to_string(),
        }
    }

    fn stdout_frame(text: &str) -> Result<LogOutput, DockerError> {
        Ok(LogOutput::StdOut {
            message: Bytes::copy_from_slice(text.as_bytes()),
        })
    }

    fn stderr_frame(text: &str) -> Result<LogOutput, DockerError> {
        Ok(LogOutput::StdErr {
            message: Bytes::copy_from_slice(text.as_bytes()),
        })
    }

    async fn pump_to_records(
        frames: Vec<Result<LogOutput, DockerError>>,
        session: &Session,
    ) -> Vec<ProgramOutput> {
        let (tx, mut rx) = mpsc::channel(1);
        let collector = tokio::spawn(async move {
            let mut records = Vec::new();
            while let Some(record) = rx.recv().await {
                records.push(record);
            }
            records
        });
        Executor::pump_output(stream::iter(frames), tx, session, CancellationToken::new()).await;
        collector.await.unwrap()
    }

    #[test]
    fn heuristic_is_silent_without_input_ops() {
        assert!(!waiting_for_input("Enter your name: ", &[]));
        assert!(!waiting_for_input("partial", &[]));
    }

    #[test]
    fn heuristic_matches_prompt_suffixes() {
        let ops = [sample_op()];
        assert!(waiting_for_input("Enter your name: ", &ops));
        assert!(waiting_for_input("name? ", &ops));
        assert!(waiting_for_input("> ", &ops));
        // The suffix check runs on the trimmed text, so a newline after the
        // prompt does not defeat it.
        assert!(waiting_for_input("Type something:\n", &ops));
    }

    #[test]
    fn heuristic_flags_output_cut_off_mid_line() {
        let ops = [sample_op()];
        assert!(waiting_for_input("partial", &ops));
        assert!(!waiting_for_input("complete line\n", &ops));
        assert!(!waiting_for_input("complete line\r", &ops));
        assert!(!waiting_for_input("", &ops));
    }

    #[test]
    fn archive_has_single_fixed_entry() {
        let archive = build_archive(b"package main\n").unwrap();
        let mut reader = tar::Archive::new(archive.as_slice());
        let mut entries = reader.entries().unwrap();

        let mut entry = entries.next().unwrap().unwrap();
        assert_eq!(entry.path().unwrap().to_str(), Some(SOURCE_FILE));
        assert_eq!(entry.header().mode().unwrap(), 0o600);
        let mut contents = String::new();
        entry.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "package main\n");

        assert!(entries.next().is_none());
    }

    #[tokio::test]
    async fn pump_output_preserves_frame_order_and_content() {
        let (session, _pipes) = Session::new();
        let frames = vec![
            stdout_frame("hel"),
            stderr_frame("oops"),
            stdout_frame("lo\n"),
        ];
        let records = pump_to_records(frames, &session).await;

        assert_eq!(records.len(), 4);
        assert_eq!(records[0], ProgramOutput::stdout("hel", false));
        assert_eq!(records[1], ProgramOutput::stderr("oops"));
        assert_eq!(records[2], ProgramOutput::stdout("lo\n", false));
        assert_eq!(records[3], ProgramOutput::terminator());

        // Demultiplex law: concatenating the fields reproduces each stream.
        let stdout: String = records
            .iter()
            .filter_map(|r| r.output.clone())
            .collect();
        let stderr: String = records
            .iter()
            .filter_map(|r| r.error.clone())
            .collect();
        assert_eq!(stdout, "hello\n");
        assert_eq!(stderr, "oops");

        // Exactly one terminal record, and it is last.
        assert_eq!(records.iter().filter(|r| r.done).count(), 1);
    }

    #[tokio::test]
    async fn pump_output_treats_stdin_echo_as_stdout() {
        let (session, _pipes) = Session::new();
        let frames = vec![Ok(LogOutput::StdIn {
            message: Bytes::from_static(b"echoed\n"),
        })];
        let records = pump_to_records(frames, &session).await;
        assert_eq!(records[0], ProgramOutput::stdout("echoed\n", false));
    }

    #[tokio::test]
    async fn pump_output_applies_heuristic_to_stdout_only() {
        let (session, _pipes) = Session::new();
        session.set_input_ops(vec![sample_op()]);
        let frames = vec![stdout_frame("name? "), stderr_frame("partial")];
        let records = pump_to_records(frames, &session).await;

        assert!(records[0].waiting_for_input);
        // Stderr never signals waiting-for-input, even when cut off.
        assert!(!records[1].waiting_for_input);
    }

    #[tokio::test]
    async fn pump_output_converts_stream_error_to_terminal_record() {
        let (session, _pipes) = Session::new();
        let frames = vec![
            stdout_frame("partial"),
            Err(DockerError::DockerResponseServerError {
                status_code: 500,
                message: "connection reset".to_string(),
            }),
        ];
        let records = pump_to_records(frames, &session).await;

        assert_eq!(records.len(), 2);
        assert!(records[1].done);
        assert!(records[1]
            .error
            .as_deref()
            .unwrap()
            .starts_with("error reading output:"));
    }

    #[tokio::test]
    async fn pump_output_aborts_when_session_closes() {
        let (session, _pipes) = Session::new();
        session.close();
        let records = pump_to_records(vec![stdout_frame("never seen")], &session).await;
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn pump_output_signals_completion_token() {
        let (session, _pipes) = Session::new();
        let (tx, mut rx) = mpsc::channel(1);
        let drain = tokio::spawn(async move { while rx.recv().await.is_some() {} });
        let output_done = CancellationToken::new();
        let frames = Vec::<Result<LogOutput, DockerError>>::new();
        Executor::pump_output(stream::iter(frames), tx, &session, output_done.clone()).await;
        assert!(output_done.is_cancelled());
        drain.await.unwrap();
    }

    #[tokio::test]
    async fn pump_input_writes_lines_with_trailing_newline() {
        let (session, _pipes) = Session::new();
        let (tx, mut rx) = mpsc::channel::<String>(1);
        let (stdin, mut sink) = tokio::io::duplex(64);

        tx.send("alex".to_string()).await.unwrap();
        drop(tx);
        Executor::pump_input(stdin, &mut rx, &session, CancellationToken::new()).await;

        let mut written = String::new();
        sink.read_to_string(&mut written).await.unwrap();
        assert_eq!(written, "alex\n");
    }

    #[tokio::test]
    async fn pump_input_stops_when_output_finishes() {
        let (session, _pipes) = Session::new();
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let (stdin, _sink) = tokio::io::duplex(64);
        let output_done = CancellationToken::new();
        output_done.cancel();
        // Returns immediately despite the live sender.
        Executor::pump_input(stdin, &mut rx, &session, output_done).await;
    }

    #[tokio::test]
    async fn pump_input_stops_when_session_closes() {
        let (session, _pipes) = Session::new();
        session.close();
        let (_tx, mut rx) = mpsc::channel::<String>(1);
        let (stdin, _sink) = tokio::io::duplex(64);
        Executor::pump_input(stdin, &mut rx, &session, CancellationToken::new()).await;
    }
}
