/*!
Turn a captured recording into a portable video through an external encoder.

Encoding is attempted with a hardware encoder first, then in software. If both fail the raw
capture is copied next to the requested output so nothing recorded is ever lost.

[ExportJob::poll] never blocks, so it can be driven from the render tick.
*/

use std::{
    fmt::Display,
    path::{Path, PathBuf},
    process::{Child, Command, Stdio},
    time::Duration,
};

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ExportError {
    MissingInput(PathBuf),
    /// Every stage failed, including the raw copy. Contains one message per stage.
    AllStagesFailed(Vec<String>),
}

impl Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingInput(p) => write!(f, "Recording not found: {}", p.display()),
            Self::AllStagesFailed(v) => write!(f, "Export failed: {}", v.join("; ")),
        }
    }
}

impl std::error::Error for ExportError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Hardware,
    Software,
    /// Save the capture as-is.
    RawCopy,
}

impl Stage {
    fn next(self) -> Option<Self> {
        match self {
            Self::Hardware => Some(Self::Software),
            Self::Software => Some(Self::RawCopy),
            Self::RawCopy => None,
        }
    }
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Hardware => "hardware encode",
            Self::Software => "software encode",
            Self::RawCopy => "raw copy",
        })
    }
}

/// A running encode.
pub trait Encode {
    /// `None` while still running.
    fn poll(&mut self) -> Option<Result<(), String>>;
}

/// Something that can start an encode for the [Stage::Hardware] and [Stage::Software] stages.
pub trait Transcoder {
    fn spawn(&mut self, stage: Stage, input: &Path, output: &Path) -> Result<Box<dyn Encode>, String>;
}

/// The `ffmpeg` executable on `PATH`, or wherever `program` points.
#[derive(Debug, Clone)]
pub struct Ffmpeg {
    pub program: PathBuf,
    pub hardware_encoder: String,
}

impl Default for Ffmpeg {
    fn default() -> Self {
        let hardware_encoder = if cfg!(target_os = "macos") {
            "h264_videotoolbox"
        } else {
            "h264_nvenc"
        };

        Self {
            program: PathBuf::from("ffmpeg"),
            hardware_encoder: hardware_encoder.to_string(),
        }
    }
}

impl Ffmpeg {
    fn args(&self, hardware: bool, input: &Path, output: &Path) -> Vec<String> {
        let mut args = vec![
            "-y".to_string(),
            "-i".to_string(),
            input.to_string_lossy().to_string(),
        ];

        if hardware {
            args.extend(["-c:v".to_string(), self.hardware_encoder.clone()]);
        } else {
            args.extend(["-c:v", "libx264", "-preset", "veryfast", "-crf", "23"].map(String::from));
        }
        args.extend(["-c:a".to_string(), "aac".to_string()]);
        args.push(output.to_string_lossy().to_string());

        args
    }
}

struct FfmpegProcess(Child);

impl Encode for FfmpegProcess {
    fn poll(&mut self) -> Option<Result<(), String>> {
        match self.0.try_wait() {
            Ok(None) => None,
            Ok(Some(status)) if status.success() => Some(Ok(())),
            Ok(Some(status)) => Some(Err(format!("ffmpeg exited with {status}"))),
            Err(e) => Some(Err(e.to_string())),
        }
    }
}

impl Transcoder for Ffmpeg {
    fn spawn(&mut self, stage: Stage, input: &Path, output: &Path) -> Result<Box<dyn Encode>, String> {
        let hardware = match stage {
            Stage::Hardware => true,
            Stage::Software => false,
            Stage::RawCopy => return Err("raw copies are not transcoded".into()),
        };
        let args = self.args(hardware, input, output);
        debug!("Running {} {}", self.program.display(), args.join(" "));

        let child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| format!("Unable to run {}: {e}", self.program.display()))?;

        Ok(Box::new(FfmpegProcess(child)))
    }
}

/// `avatar-recording-<timestamp>.mp4`
pub fn default_output_name(time: DateTime<Utc>) -> String {
    format!("avatar-recording-{}.mp4", time.format("%Y%m%d-%H%M%S"))
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExportStatus {
    Running(Stage),
    Finished { path: PathBuf, stage: Stage },
}

pub struct ExportJob {
    transcoder: Box<dyn Transcoder>,
    input: PathBuf,
    output: PathBuf,

    stage: Stage,
    running: Option<Box<dyn Encode>>,
    failures: Vec<String>,
    finished: Option<ExportStatus>,
}

impl std::fmt::Debug for ExportJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportJob")
            .field("input", &self.input)
            .field("output", &self.output)
            .field("stage", &self.stage)
            .field("failures", &self.failures)
            .finish()
    }
}

impl ExportJob {
    pub fn new(
        transcoder: Box<dyn Transcoder>,
        input: impl Into<PathBuf>,
        output: impl Into<PathBuf>,
    ) -> Result<Self, ExportError> {
        let input = input.into();
        if !input.is_file() {
            return Err(ExportError::MissingInput(input));
        }

        Ok(Self {
            transcoder,
            input,
            output: output.into(),

            stage: Stage::Hardware,
            running: None,
            failures: vec![],
            finished: None,
        })
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Messages from the stages that failed so far.
    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    /// Advance the job without blocking.
    pub fn poll(&mut self) -> Result<ExportStatus, ExportError> {
        if let Some(status) = &self.finished {
            return Ok(status.clone());
        }

        loop {
            if self.stage == Stage::RawCopy {
                return self.raw_copy();
            }

            match self.running.as_mut() {
                Some(encode) => match encode.poll() {
                    None => return Ok(ExportStatus::Running(self.stage)),
                    Some(Ok(())) => {
                        info!("Exported {} using {}", self.output.display(), self.stage);
                        return Ok(self.finish(self.output.clone()));
                    }
                    Some(Err(e)) => self.fail(e),
                },
                None => match self.transcoder.spawn(self.stage, &self.input, &self.output) {
                    Ok(encode) => self.running = Some(encode),
                    Err(e) => self.fail(e),
                },
            }
        }
    }

    /// Poll until done, sleeping `interval` in between.
    pub fn wait(&mut self, interval: Duration) -> Result<ExportStatus, ExportError> {
        loop {
            match self.poll()? {
                ExportStatus::Running(_) => std::thread::sleep(interval),
                status => return Ok(status),
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!("Export {} failed: {message}", self.stage);

        self.failures.push(format!("{}: {message}", self.stage));
        self.running = None;
        if let Some(next) = self.stage.next() {
            self.stage = next;
        }
    }

    fn raw_copy(&mut self) -> Result<ExportStatus, ExportError> {
        let extension = self
            .input
            .extension()
            .map(|v| v.to_os_string())
            .unwrap_or_else(|| "webm".into());
        let path = self.output.with_extension(extension);

        // Copying a file onto itself truncates it
        if same_file(&self.input, &path) {
            warn!("Keeping unconverted recording at {}", path.display());
            return Ok(self.finish(self.input.clone()));
        }

        match std::fs::copy(&self.input, &path) {
            Ok(_) => {
                warn!("Saved unconverted recording to {}", path.display());
                Ok(self.finish(path))
            }
            Err(e) => {
                self.failures.push(format!("{}: {e}", self.stage));
                error!("Unable to save recording {}", self.input.display());

                Err(ExportError::AllStagesFailed(self.failures.clone()))
            }
        }
    }

    fn finish(&mut self, path: PathBuf) -> ExportStatus {
        let status = ExportStatus::Finished {
            path,
            stage: self.stage,
        };
        self.finished = Some(status.clone());

        status
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}
