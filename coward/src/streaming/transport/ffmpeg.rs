//! ffmpeg transcoder and the FFMPEG_PIPE (UDP) transport.

use std::io;
use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{CHUNK_BYTES, TransportWorker, terminate_child};
use crate::ErrorKind;
use crate::streaming::events::EventEmitter;
use crate::streaming::resolver::{StreamHandle, StreamReader};

/// Reads an async stream and yields text records delimited by `\n` or `\r`.
///
/// ffmpeg rewrites its progress line with `\r`, which line-based readers
/// would only surface once the process exits.
pub struct OutputRecordReader<R> {
    reader: BufReader<R>,
    pending: Vec<u8>,
    scratch: [u8; 4096],
}

impl<R> OutputRecordReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(reader: R) -> Self {
        Self {
            reader: BufReader::new(reader),
            pending: Vec::new(),
            scratch: [0u8; 4096],
        }
    }

    pub async fn next_record(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(idx) = self.pending.iter().position(|b| matches!(b, b'\n' | b'\r')) {
                let record: Vec<u8> = self.pending.drain(..idx).collect();
                let delimiters = self
                    .pending
                    .iter()
                    .take_while(|b| matches!(b, b'\n' | b'\r'))
                    .count();
                self.pending.drain(..delimiters);

                let record = String::from_utf8_lossy(&record).trim().to_string();
                if !record.is_empty() {
                    return Ok(Some(record));
                }
                continue;
            }

            let n = tokio::io::AsyncReadExt::read(&mut self.reader, &mut self.scratch).await?;
            if n == 0 {
                let record = String::from_utf8_lossy(&self.pending).trim().to_string();
                self.pending.clear();
                return Ok((!record.is_empty()).then_some(record));
            }
            self.pending.extend_from_slice(&self.scratch[..n]);
        }
    }
}

/// Whether `line` is an ffmpeg progress report (`frame=... size=... time=...`).
pub fn is_progress_line(line: &str) -> bool {
    line.starts_with("frame=") || (line.starts_with("size=") && line.contains("time="))
}

/// Where the transcoder reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeInput {
    Url(String),
    /// Bytes piped to the transcoder's stdin.
    Stdin,
}

impl TranscodeInput {
    /// Read the source URL directly when the plugin exposes one.
    pub fn for_handle(handle: &StreamHandle) -> Self {
        match handle.source_url() {
            "" => Self::Stdin,
            url => Self::Url(url.to_string()),
        }
    }
}

/// What the transcoder produces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutput {
    /// Fragmented MP4 on stdout, streams copied.
    FragmentedMp4,
    /// MPEG-TS over UDP, video copied and audio re-encoded to AAC.
    MpegTsUdp { host: String, port: u16 },
}

impl TranscodeOutput {
    pub fn url(&self) -> Option<String> {
        match self {
            Self::FragmentedMp4 => None,
            Self::MpegTsUdp { host, port } => Some(format!("udp://{host}:{port}")),
        }
    }
}

/// Builds and launches ffmpeg.
#[derive(Debug, Clone)]
pub struct Transcoder {
    binary: String,
}

impl Transcoder {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    pub fn build_args(input: &TranscodeInput, output: &TranscodeOutput) -> Vec<String> {
        let mut args: Vec<String> = ["-hide_banner", "-nostdin", "-loglevel", "info"]
            .into_iter()
            .map(String::from)
            .collect();
        if matches!(input, TranscodeInput::Stdin) {
            // -nostdin would stop ffmpeg from reading its input pipe.
            args.retain(|a| a != "-nostdin");
        }

        let source = match input {
            TranscodeInput::Url(url) => url.clone(),
            TranscodeInput::Stdin => "pipe:0".to_string(),
        };
        args.extend(["-i".to_string(), source]);

        match output {
            TranscodeOutput::FragmentedMp4 => args.extend(
                [
                    "-c:v",
                    "copy",
                    "-c:a",
                    "copy",
                    "-movflags",
                    "frag_keyframe+empty_moov+default_base_moof",
                    "-f",
                    "mp4",
                    "pipe:1",
                ]
                .map(String::from),
            ),
            TranscodeOutput::MpegTsUdp { .. } => {
                args.extend(["-c:v", "copy", "-c:a", "aac", "-f", "mpegts"].map(String::from));
                args.extend(output.url());
            }
        }
        args
    }

    /// Launch ffmpeg. stdout is piped only for [`TranscodeOutput::FragmentedMp4`].
    pub fn spawn(
        &self,
        input: &TranscodeInput,
        output: &TranscodeOutput,
    ) -> Result<Child, ErrorKind> {
        let args = Self::build_args(input, output);
        debug!(binary = %self.binary, ?args, "Launching transcoder");

        let mut cmd = process_utils::tokio_command(&self.binary);
        cmd.args(&args)
            .env("LC_ALL", "C")
            .stdin(match input {
                TranscodeInput::Stdin => Stdio::piped(),
                TranscodeInput::Url(_) => Stdio::null(),
            })
            .stdout(match output {
                TranscodeOutput::FragmentedMp4 => Stdio::piped(),
                TranscodeOutput::MpegTsUdp { .. } => Stdio::null(),
            })
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        cmd.spawn().map_err(|e| {
            warn!(binary = %self.binary, error = %e, "Failed to launch transcoder");
            ErrorKind::PluginTransient
        })
    }
}

/// Copy the opened stream into the transcoder's stdin until EOF or stop.
pub(super) async fn pump_stdin(mut reader: StreamReader, mut stdin: ChildStdin, stop: CancellationToken) {
    let mut buf = vec![0u8; CHUNK_BYTES];
    loop {
        let n = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            read = reader.read_chunk(&mut buf) => match read {
                Ok(0) | Err(_) => break,
                Ok(n) => n,
            },
        };
        if stdin.write_all(&buf[..n]).await.is_err() {
            break;
        }
    }
    reader.close();
    let _ = stdin.shutdown().await;
}

/// Log ffmpeg stderr; report the first progress line through `on_progress`, if given.
pub(super) async fn watch_stderr<R>(
    stderr: R,
    page_url: String,
    mut on_progress: Option<tokio::sync::oneshot::Sender<()>>,
) where
    R: AsyncRead + Unpin,
{
    let mut records = OutputRecordReader::new(stderr);
    loop {
        match records.next_record().await {
            Ok(Some(line)) => {
                if is_progress_line(&line) {
                    if let Some(tx) = on_progress.take() {
                        let _ = tx.send(());
                    }
                    trace!(page_url = %page_url, progress = %line, "Transcoder progress");
                } else if line.contains("Error") || line.contains("error") {
                    warn!(page_url = %page_url, "Transcoder: {line}");
                } else {
                    trace!(page_url = %page_url, "Transcoder: {line}");
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(page_url = %page_url, error = %e, "Transcoder stderr closed");
                break;
            }
        }
    }
}

/// FFMPEG_PIPE: transcode to MPEG-TS on a UDP endpoint the embedded player opens.
#[derive(Debug)]
pub struct FfmpegPipe {
    transcoder: Transcoder,
    output: TranscodeOutput,
    pub(super) worker: TransportWorker,
}

impl FfmpegPipe {
    pub fn new(transcoder: Transcoder, host: impl Into<String>, port: u16, grace: Duration) -> Self {
        Self {
            transcoder,
            output: TranscodeOutput::MpegTsUdp {
                host: host.into(),
                port,
            },
            worker: TransportWorker::new(grace),
        }
    }

    pub fn output_url(&self) -> String {
        self.output.url().unwrap_or_default()
    }

    pub(super) async fn start(&mut self, handle: StreamHandle, events: EventEmitter) -> Result<(), ErrorKind> {
        let input = TranscodeInput::for_handle(&handle);
        let reader = match input {
            TranscodeInput::Stdin => Some(handle.open().await?),
            TranscodeInput::Url(_) => None,
        };

        let mut child = self.transcoder.spawn(&input, &self.output)?;
        self.worker.track(child.id());

        let stop = self.worker.stop_token();
        if let (Some(reader), Some(stdin)) = (reader, child.stdin.take()) {
            tokio::spawn(pump_stdin(reader, stdin, stop.clone()));
        }
        let (progress_tx, progress_rx) = tokio::sync::oneshot::channel();
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(watch_stderr(stderr, events.page_url().to_string(), Some(progress_tx)));
        }

        info!(page_url = events.page_url(), output = %self.output_url(), "Transcoder started");
        self.worker.spawn(supervise_transcoder(child, progress_rx, events, stop));
        Ok(())
    }

    pub(super) async fn stop(&mut self) {
        self.worker.shutdown().await;
    }
}

/// Wait for the transcoder; report start on first progress and close on exit.
async fn supervise_transcoder(
    mut child: Child,
    progress: tokio::sync::oneshot::Receiver<()>,
    events: EventEmitter,
    stop: CancellationToken,
) {
    events.buffering_started().await;

    let progress = async move {
        if progress.await.is_err() {
            // No progress line will ever arrive; the exit decides.
            std::future::pending::<()>().await;
        }
    };
    tokio::pin!(progress);

    let mut started = false;
    let status = loop {
        tokio::select! {
            biased;
            _ = stop.cancelled() => {
                terminate_child(&mut child).await;
                return;
            }
            status = child.wait() => break status,
            _ = &mut progress, if !started => {
                started = true;
                events.stream_started(None).await;
            }
        }
    };

    match status {
        Ok(status) if status.success() || started => {
            debug!(page_url = events.page_url(), %status, "Transcoder exited");
            events.closed(status.success()).await;
        }
        Ok(status) => {
            warn!(page_url = events.page_url(), %status, "Transcoder failed before streaming");
            events.stream_error(ErrorKind::PluginTransient).await;
        }
        Err(e) => {
            warn!(page_url = events.page_url(), error = %e, "Failed to wait for transcoder");
            events.stream_error(ErrorKind::ChildExited).await;
        }
    }
}
