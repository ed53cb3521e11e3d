use std::{
    fmt::Display,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use argh::FromArgs;
use log::{error, info};
use serde::Serialize;

use crate::{
    config::{ConfigError, PipelineConfig},
    export::{self, ExportError, ExportJob, ExportStatus, Ffmpeg},
    logger,
    model::Emotion,
    puppets::{import::ImportError, mesh::Model, puppet_2d::Puppet2d, puppet_3d::Puppet3d},
    session::{self, Recording, SessionError},
};

const CUSTOM_PREFIX: &str = "custom:";

#[derive(Debug)]
pub enum CliError {
    ParseFailure(argh::EarlyExit),
    UnknownEncoder { input: String },
    Config(ConfigError),
    Session(SessionError),
    Import(ImportError),
    Export(ExportError),
    Output { path: PathBuf, error: String },
}

impl Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ParseFailure(e) => write!(f, "{e:?}"),
            Self::UnknownEncoder { input } => write!(f, "Unknown encoder: {input}"),
            Self::Config(e) => write!(f, "{e}"),
            Self::Session(e) => write!(f, "{e}"),
            Self::Import(e) => write!(f, "{e}"),
            Self::Export(e) => write!(f, "{e}"),
            Self::Output { path, error } => {
                write!(f, "Unable to write {}: {error}", path.display())
            }
        }
    }
}

impl std::error::Error for CliError {}

/// avatar command line interface
#[derive(Debug, FromArgs)]
pub struct Args {
    /// enable verbose logging, overridden by "quiet" if passed
    #[argh(switch, short = 'v', long = "verbose")]
    verbose: bool,
    /// disable all logging, overrides verbose
    #[argh(switch, short = 'q', long = "quiet")]
    quiet: bool,
    #[argh(subcommand)]
    commands: Option<Commands>,
}

impl Args {
    /// Parse some `args`, not including the program name.
    pub fn parse(args: &[&str]) -> Result<Self, CliError> {
        Self::from_args(&[env!("CARGO_PKG_NAME")], args).map_err(CliError::ParseFailure)
    }

    pub fn log_level(&self) -> log::LevelFilter {
        logger::level_for(self.verbose, self.quiet)
    }

    /// Run the selected command. Without one there is nothing to do.
    pub fn run(&self) -> Result<(), CliError> {
        match &self.commands {
            Some(Commands::Replay(c)) => c.run(),
            Some(Commands::InspectModel(c)) => c.run(),
            Some(Commands::Export(c)) => c.run(),
            None => {
                info!("No command given, see --help");
                Ok(())
            }
        }
    }
}

#[derive(Debug, FromArgs)]
#[argh(subcommand)]
pub enum Commands {
    Replay(ReplayCommand),
    InspectModel(InspectModelCommand),
    Export(ExportCommand),
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), CliError> {
    let output = |error: String| CliError::Output {
        path: path.to_path_buf(),
        error,
    };
    let data = serde_json::to_vec_pretty(value).map_err(|e| output(e.to_string()))?;

    std::fs::write(path, data).map_err(|e| output(e.to_string()))
}

/// Run a recorded session through the pipeline and the 2D puppet
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "replay")]
pub struct ReplayCommand {
    /// path to the recorded session
    #[argh(positional)]
    session: PathBuf,
    /// pipeline configuration to use instead of the defaults
    #[argh(option)]
    config: Option<PathBuf>,
    /// force an emotion for every frame
    #[argh(option)]
    emotion: Option<Emotion>,
    /// write the produced avatar states here as JSON
    #[argh(option)]
    output: Option<PathBuf>,
}

impl ReplayCommand {
    fn run(&self) -> Result<(), CliError> {
        let config = match &self.config {
            Some(path) => PipelineConfig::load(path).map_err(CliError::Config)?,
            None => PipelineConfig::default(),
        };

        let mut recording = Recording::load(&self.session).map_err(CliError::Session)?;
        if let Some(emotion) = self.emotion {
            recording.frames.iter_mut().for_each(|f| f.emotion = emotion);
        }

        let mut puppet = Puppet2d::new(Default::default(), 640.0, 480.0);
        let summary = session::replay(&recording, &config, &mut puppet);

        println!("frames: {}", summary.frames);
        println!(
            "fps: {}",
            summary.fps.map(|v| v.to_string()).unwrap_or("-".into())
        );
        for (viseme, count) in &summary.visemes {
            println!("{viseme}: {count}");
        }

        if let Some(path) = &self.output {
            write_json(path, &summary.states)?;
            info!("Wrote {} states to {}", summary.states.len(), path.display());
        }

        Ok(())
    }
}

/// Load a mesh dump and report how it would be animated
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "inspect-model")]
pub struct InspectModelCommand {
    /// path to the model, as JSON
    #[argh(positional)]
    model_path: PathBuf,
    /// print the report as JSON
    #[argh(switch)]
    json: bool,
}

impl InspectModelCommand {
    fn run(&self) -> Result<(), CliError> {
        let model = Model::from_json_file(&self.model_path).map_err(CliError::Import)?;
        let vertices = model.vertex_count();
        let puppet = Puppet3d::new(model);
        let report = puppet.load_report();

        if self.json {
            let data = serde_json::to_string_pretty(&report).map_err(|e| CliError::Output {
                path: PathBuf::from("<stdout>"),
                error: e.to_string(),
            })?;
            println!("{data}");

            return Ok(());
        }

        println!("vertices: {vertices}");
        println!(
            "target mesh: {}",
            report.target_mesh.as_deref().unwrap_or("-")
        );
        println!("jaw bone: {}", report.jaw_bone.as_deref().unwrap_or("-"));
        println!("strategy: {:?}", report.strategy);

        match puppet.landmarks() {
            Some(v) => {
                println!("mouth vertices: {}", v.mouth_vertices.len());
                println!("jaw vertices: {}", v.jaw_vertices.len());
                println!(
                    "eye vertices: {} / {}",
                    v.left_eye_vertices.len(),
                    v.right_eye_vertices.len()
                );
                println!("nose vertices: {}", v.nose_vertices.len());
            }
            None => println!("no landmarks detected"),
        }

        Ok(())
    }
}

/// Convert a captured recording to mp4
#[derive(Debug, FromArgs)]
#[argh(subcommand, name = "export")]
pub struct ExportCommand {
    /// path to the captured recording
    #[argh(positional)]
    recording: PathBuf,
    /// output path, defaults to a timestamped name in the current directory
    #[argh(option)]
    output: Option<PathBuf>,
    /// hardware encoder to try first
    #[argh(option)]
    encoder: Option<Encoder>,
}

impl ExportCommand {
    fn run(&self) -> Result<(), CliError> {
        let output = self
            .output
            .clone()
            .unwrap_or_else(|| PathBuf::from(export::default_output_name(chrono::Utc::now())));

        let mut ffmpeg = Ffmpeg::default();
        if let Some(encoder) = &self.encoder {
            ffmpeg.hardware_encoder = encoder.as_ref().to_string();
        }

        let mut job =
            ExportJob::new(Box::new(ffmpeg), &self.recording, output).map_err(CliError::Export)?;

        match job.wait(Duration::from_millis(100)) {
            Ok(ExportStatus::Finished { path, stage }) => {
                println!("{} ({stage})", path.display());
                Ok(())
            }
            Ok(ExportStatus::Running(_)) => Ok(()),
            Err(e) => {
                error!("{e}");
                Err(CliError::Export(e))
            }
        }
    }
}

#[derive(Debug, PartialEq)]
pub enum Encoder {
    VideoToolbox,
    Nvenc,
    Vaapi,
    Qsv,
    Custom(String),
}

impl FromStr for Encoder {
    type Err = CliError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "videotoolbox" | "vt" => Ok(Self::VideoToolbox),
            "nvenc" | "nvidia" => Ok(Self::Nvenc),
            "vaapi" => Ok(Self::Vaapi),
            "qsv" | "quicksync" => Ok(Self::Qsv),
            _ => {
                if let Some(v) = s.strip_prefix(CUSTOM_PREFIX) {
                    if !v.is_empty() {
                        return Ok(Self::Custom(v.to_string()));
                    }
                }

                Err(CliError::UnknownEncoder {
                    input: s.to_string(),
                })
            }
        }
    }
}

impl AsRef<str> for Encoder {
    fn as_ref(&self) -> &str {
        match self {
            Encoder::VideoToolbox => "h264_videotoolbox",
            Encoder::Nvenc => "h264_nvenc",
            Encoder::Vaapi => "h264_vaapi",
            Encoder::Qsv => "h264_qsv",
            Encoder::Custom(v) => v.as_str(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse() {
        let args = Args::parse(&["--verbose"]).unwrap();

        assert_eq!(args.verbose, true);
        assert_eq!(args.quiet, false);
        assert_eq!(args.log_level(), log::LevelFilter::Debug);
    }

    #[test]
    fn empty() {
        let args = Args::from_args(&["avatar"], &[]).unwrap();

        assert_eq!(args.verbose, false);
        assert_eq!(args.quiet, false);
        assert!(args.commands.is_none());
        assert!(args.run().is_ok());
    }

    #[test]
    fn no_command_quiet_verbose() {
        let args = Args::from_args(&["avatar"], &["--quiet", "--verbose"]).unwrap();

        assert_eq!(args.verbose, true);
        assert_eq!(args.quiet, true);
        assert_eq!(args.log_level(), log::LevelFilter::Off);
    }

    #[test]
    fn parse_failure() {
        assert!(matches!(
            Args::parse(&["--nope"]),
            Err(CliError::ParseFailure(_))
        ));
    }

    mod replay {
        use super::*;

        #[test]
        fn session_only() {
            let args = Args::from_args(&["avatar"], &["replay", "session.json"]).unwrap();

            match args.commands.unwrap() {
                Commands::Replay(v) => {
                    assert_eq!(v.session, PathBuf::from("session.json"));
                    assert!(v.config.is_none());
                    assert!(v.emotion.is_none());
                    assert!(v.output.is_none());
                }
                _ => assert!(false),
            }
        }

        #[test]
        fn all_options() {
            let args = Args::from_args(
                &["avatar"],
                &[
                    "replay",
                    "session.json",
                    "--config",
                    "config.json",
                    "--emotion",
                    "HaPpY",
                    "--output",
                    "states.json",
                ],
            )
            .unwrap();

            match args.commands.unwrap() {
                Commands::Replay(v) => {
                    assert_eq!(v.config.unwrap(), PathBuf::from("config.json"));
                    assert_eq!(v.emotion.unwrap(), Emotion::Happy);
                    assert_eq!(v.output.unwrap(), PathBuf::from("states.json"));
                }
                _ => assert!(false),
            }
        }

        #[test]
        fn unknown_emotion() {
            let args = Args::from_args(
                &["avatar"],
                &["replay", "session.json", "--emotion", "grumpy"],
            );

            assert!(args.is_err());
        }

        #[test]
        fn missing_session() {
            let args = Args::from_args(&["avatar"], &["replay"]);

            assert!(args.is_err());
        }

        #[test]
        fn missing_file_is_reported() {
            let args =
                Args::from_args(&["avatar"], &["replay", "/definitely/not/here.json"]).unwrap();

            assert!(matches!(args.run(), Err(CliError::Session(_))));
        }
    }

    mod inspect_model {
        use super::*;

        #[test]
        fn model_path_only() {
            let args = Args::from_args(&["avatar"], &["inspect-model", "./head.json"]).unwrap();

            match args.commands.unwrap() {
                Commands::InspectModel(v) => {
                    assert_eq!(v.model_path, PathBuf::from("./head.json"));
                    assert!(!v.json);
                }
                _ => assert!(false),
            }
        }

        #[test]
        fn json_switch() {
            let args =
                Args::from_args(&["avatar"], &["inspect-model", "./head.json", "--json"]).unwrap();

            match args.commands.unwrap() {
                Commands::InspectModel(v) => assert!(v.json),
                _ => assert!(false),
            }
        }

        #[test]
        fn missing_model_is_reported() {
            let args = Args::from_args(&["avatar"], &["inspect-model", "./head.blend"]).unwrap();

            assert!(matches!(args.run(), Err(CliError::Import(_))));
        }
    }

    mod export {
        use super::*;

        #[test]
        fn recording_only() {
            let args = Args::from_args(&["avatar"], &["export", "take.webm"]).unwrap();

            match args.commands.unwrap() {
                Commands::Export(v) => {
                    assert_eq!(v.recording, PathBuf::from("take.webm"));
                    assert!(v.output.is_none());
                    assert!(v.encoder.is_none());
                }
                _ => assert!(false),
            }
        }

        #[test]
        fn encoder_abbreviated_name() {
            let args =
                Args::from_args(&["avatar"], &["export", "take.webm", "--encoder", "VT"]).unwrap();

            match args.commands.unwrap() {
                Commands::Export(v) => assert_eq!(v.encoder.unwrap(), Encoder::VideoToolbox),
                _ => assert!(false),
            }
        }

        #[test]
        fn custom_encoder() {
            let args = Args::from_args(
                &["avatar"],
                &["export", "take.webm", "--encoder", "custom:h264_amf"],
            )
            .unwrap();

            match args.commands.unwrap() {
                Commands::Export(v) => {
                    let encoder = v.encoder.unwrap();
                    assert_eq!(encoder, Encoder::Custom("h264_amf".to_string()));
                    assert_eq!(encoder.as_ref(), "h264_amf");
                }
                _ => assert!(false),
            }
        }

        #[test]
        fn empty_custom_encoder_name() {
            let args =
                Args::from_args(&["avatar"], &["export", "take.webm", "--encoder", "custom:"]);

            assert!(args.is_err());
        }

        #[test]
        fn missing_recording_is_reported() {
            let args =
                Args::from_args(&["avatar"], &["export", "/definitely/not/here.webm"]).unwrap();

            assert!(matches!(
                args.run(),
                Err(CliError::Export(ExportError::MissingInput(_)))
            ));
        }
    }
}
