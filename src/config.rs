//! Recorder startup configuration
//!
//! Options come from `--key=value` / `--flag` command line arguments and,
//! optionally, a YAML file named by `--config=<file>` whose keys are the same
//! option names. Command line values override file values.
//!
//! ```rust
//! use shmrec::config::RecorderConfig;
//!
//! let args = ["--cid=111", "--name=video0.i420", "--width=640", "--height=480", "--qpmax=90"];
//! let config = RecorderConfig::from_args(args.iter().map(|s| s.to_string())).unwrap();
//! let encoder = config.encoder_config().unwrap();
//! assert_eq!(encoder.qp_max, 51);
//! ```

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::sink::RecordingNaming;
use crate::types::{EncoderConfig, FrameGeometry};
use crate::{RecorderError, Result};

/// Usage text printed when startup inputs are missing or malformed.
pub const USAGE: &str = "\
Attaches to an I420 frame region, encodes each frame and records the output.

Usage: shmrec --cid=<session> --name=<region> --width=<width> --height=<height> [options]

  --cid:                session id; selects the control channel group 225.0.0.<cid>
  --id:                 sender stamp when running several instances (default: 0)
  --name:               name of the frame region; a path, else looked up under /dev/shm
  --rec:                name of the recording file (default: YYYY-MM-DD_HHMMSS.rec)
  --recsuffix:          additional suffix to add to the recording file name
  --output-dir:         directory for auto-named recordings (default: working directory)
  --remote:             wait for remote start/stop commands instead of recording at once
  --width, --height:    frame size, both even
  --gop:                length of group of pictures (default: 1)
  --bitrate:            target bitrate in kbit/s (default: 8000)
  --ip-period:          0 (I frames only) | 1 (I and P) | N (I, P and N-1 B frames) (default: 1)
  --init-qp:            initial quantizer (default: 26)
  --qpmin, --qpmax:     quantizer bounds within 0..=51 (default: 0, 51)
  --disable-frame-skip: 0 | 1 (default: 1)
  --diff-qp-ip:         quantizer difference between adjacent I/P (default: 0)
  --diff-qp-ib:         quantizer difference between adjacent I/B (default: 0)
  --num-ref-frame:      number of reference frames (default: 1)
  --rc-mode:            0: none, 1: CBR, 2: VBR, 3: VCM, 4: CQP (default: 4)
  --reference-mode:     0: previous and key frame, 1: rolling history (default: 0)
  --fps:                frame rate (default: 30)
  --encoder:            synthetic | openh264
  --synthetic-size:     bytes per frame from the synthetic encoder (default: 1024)
  --loop:               replay a frame file from the start when it ends
  --config:             YAML file with any of the options above
  --verbose:            report per-frame latency

Example: shmrec --cid=111 --name=video0.i420 --width=640 --height=480 --verbose";

/// Which encoder backend the binary drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncoderBackend {
    Synthetic,
    #[serde(rename = "openh264")]
    OpenH264,
}

impl Default for EncoderBackend {
    fn default() -> Self {
        if cfg!(feature = "openh264") { EncoderBackend::OpenH264 } else { EncoderBackend::Synthetic }
    }
}

/// Raw encoder tunables as given; clamped when the [`EncoderConfig`] is built
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EncoderTunables {
    pub gop: Option<i64>,
    pub bitrate: Option<i64>,
    pub ip_period: Option<i64>,
    pub init_qp: Option<i64>,
    pub qpmin: Option<i64>,
    pub qpmax: Option<i64>,
    pub disable_frame_skip: Option<i64>,
    pub diff_qp_ip: Option<i64>,
    pub diff_qp_ib: Option<i64>,
    pub num_ref_frame: Option<i64>,
    pub rc_mode: Option<i64>,
    pub reference_mode: Option<i64>,
    pub fps: Option<i64>,
}

/// Everything the recorder needs to start
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RecorderConfig {
    pub name: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub cid: Option<u16>,
    /// Sender stamp written into every record
    pub id: u32,
    pub rec: Option<String>,
    pub recsuffix: String,
    pub output_dir: Option<PathBuf>,
    pub remote: bool,
    pub verbose: bool,
    pub encoder: EncoderBackend,
    /// Bytes per frame produced by the synthetic backend
    pub synthetic_size: usize,
    #[serde(rename = "loop")]
    pub looping: bool,
    #[serde(flatten)]
    pub tunables: EncoderTunables,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            name: None,
            width: None,
            height: None,
            cid: None,
            id: 0,
            rec: None,
            recsuffix: String::new(),
            output_dir: None,
            remote: false,
            verbose: false,
            encoder: EncoderBackend::default(),
            synthetic_size: 1024,
            looping: false,
            tunables: EncoderTunables::default(),
        }
    }
}

impl RecorderConfig {
    /// Build a configuration from command line arguments (program name excluded)
    /// and validate it.
    pub fn from_args<I>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let options = parse_options(args)?;

        let mut config = match options.iter().find(|(key, _)| key == "config") {
            Some((_, Some(path))) => Self::from_yaml_file(path)?,
            Some((_, None)) => {
                return Err(RecorderError::invalid_input("config", "", "expects a file path"));
            }
            None => Self::default(),
        };

        for (key, value) in &options {
            config.set(key, value.as_deref())?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Load options from a YAML file without validating them.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| RecorderError::ConfigFile {
            path: path.to_path_buf(),
            details: e.to_string(),
        })?;
        debug!(path = %path.display(), "Loaded configuration file");
        Self::from_yaml_str(&text, path)
    }

    fn from_yaml_str(text: &str, path: &Path) -> Result<Self> {
        serde_yaml_ng::from_str(text).map_err(|e| RecorderError::ConfigFile {
            path: path.to_path_buf(),
            details: e.to_string(),
        })
    }

    /// Apply one `--key[=value]` option.
    pub fn set(&mut self, key: &str, value: Option<&str>) -> Result<()> {
        match key {
            "config" => {}
            "name" => self.name = Some(required(key, value)?.to_string()),
            "width" => self.width = Some(parse_number(key, value)?),
            "height" => self.height = Some(parse_number(key, value)?),
            "cid" => self.cid = Some(parse_number(key, value)?),
            "id" => self.id = parse_number(key, value)?,
            "rec" => self.rec = value.filter(|v| !v.is_empty()).map(str::to_string),
            "recsuffix" => self.recsuffix = value.unwrap_or_default().to_string(),
            "output-dir" => self.output_dir = Some(PathBuf::from(required(key, value)?)),
            "remote" => self.remote = parse_flag(key, value)?,
            "verbose" => self.verbose = parse_flag(key, value)?,
            "loop" => self.looping = parse_flag(key, value)?,
            "synthetic-size" => self.synthetic_size = parse_number(key, value)?,
            "encoder" => {
                self.encoder = match required(key, value)? {
                    "synthetic" => EncoderBackend::Synthetic,
                    "openh264" => EncoderBackend::OpenH264,
                    other => {
                        return Err(RecorderError::invalid_input(
                            key,
                            other,
                            "expected synthetic or openh264",
                        ));
                    }
                }
            }
            "gop" => self.tunables.gop = Some(parse_number(key, value)?),
            "bitrate" => self.tunables.bitrate = Some(parse_number(key, value)?),
            "ip-period" => self.tunables.ip_period = Some(parse_number(key, value)?),
            "init-qp" => self.tunables.init_qp = Some(parse_number(key, value)?),
            "qpmin" => self.tunables.qpmin = Some(parse_number(key, value)?),
            "qpmax" => self.tunables.qpmax = Some(parse_number(key, value)?),
            "disable-frame-skip" => {
                self.tunables.disable_frame_skip = Some(parse_number(key, value)?)
            }
            "diff-qp-ip" => self.tunables.diff_qp_ip = Some(parse_number(key, value)?),
            "diff-qp-ib" => self.tunables.diff_qp_ib = Some(parse_number(key, value)?),
            "num-ref-frame" => self.tunables.num_ref_frame = Some(parse_number(key, value)?),
            "rc-mode" => self.tunables.rc_mode = Some(parse_number(key, value)?),
            "reference-mode" => self.tunables.reference_mode = Some(parse_number(key, value)?),
            "fps" => self.tunables.fps = Some(parse_number(key, value)?),
            unknown => warn!("Ignoring unknown option --{}", unknown),
        }
        Ok(())
    }

    /// Check that the required inputs are present and consistent.
    pub fn validate(&self) -> Result<()> {
        if self.name.as_deref().is_none_or(str::is_empty) {
            return Err(RecorderError::missing_input("name"));
        }
        self.geometry()?;
        let cid = self.cid.ok_or_else(|| RecorderError::missing_input("cid"))?;

        if self.remote {
            if cid == 0 {
                return Err(RecorderError::RemoteMisconfigured {
                    reason: "--remote specified but no --cid provided".to_string(),
                });
            }
            self.control_group()?;
        }
        Ok(())
    }

    pub fn geometry(&self) -> Result<FrameGeometry> {
        let width = self.width.ok_or_else(|| RecorderError::missing_input("width"))?;
        let height = self.height.ok_or_else(|| RecorderError::missing_input("height"))?;
        FrameGeometry::i420(width, height)
    }

    /// Last octet of the control channel's multicast group
    pub fn control_group(&self) -> Result<u8> {
        let cid = self.cid.ok_or_else(|| RecorderError::missing_input("cid"))?;
        u8::try_from(cid).ok().filter(|c| (1..=254).contains(c)).ok_or_else(|| {
            RecorderError::RemoteMisconfigured {
                reason: format!("cid {} does not map to a multicast group (1..=254)", cid),
            }
        })
    }

    /// Clamped encoder parameters.
    pub fn encoder_config(&self) -> Result<EncoderConfig> {
        let t = &self.tunables;
        let mut config = EncoderConfig::new(self.geometry()?);
        if let Some(v) = t.fps {
            config = config.fps(v);
        }
        if let Some(v) = t.gop {
            config = config.gop(v);
        }
        if let Some(v) = t.bitrate {
            config = config.bitrate_kbps(v);
        }
        if let Some(v) = t.ip_period {
            config = config.ip_period(v);
        }
        if let Some(v) = t.init_qp {
            config = config.init_qp(v);
        }
        if let Some(v) = t.qpmin {
            config = config.qp_min(v);
        }
        if let Some(v) = t.qpmax {
            config = config.qp_max(v);
        }
        if let Some(v) = t.disable_frame_skip {
            config = config.disable_frame_skip(v);
        }
        if let Some(v) = t.diff_qp_ip {
            config = config.diff_qp_ip(v);
        }
        if let Some(v) = t.diff_qp_ib {
            config = config.diff_qp_ib(v);
        }
        if let Some(v) = t.num_ref_frame {
            config = config.num_ref_frames(v);
        }
        if let Some(v) = t.rc_mode {
            config = config.rc_mode(v);
        }
        if let Some(v) = t.reference_mode {
            config = config.reference_mode(v);
        }
        Ok(config)
    }

    /// File naming for rotations
    pub fn naming(&self) -> RecordingNaming {
        RecordingNaming {
            explicit: self.rec.clone(),
            suffix: self.recsuffix.clone(),
            dir: self.output_dir.clone(),
        }
    }
}

/// Split `--key=value` and `--flag` arguments, keeping their order.
fn parse_options<I>(args: I) -> Result<Vec<(String, Option<String>)>>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .map(|arg| {
            let Some(option) = arg.strip_prefix("--").filter(|o| !o.is_empty()) else {
                return Err(RecorderError::invalid_input("argument", arg.as_str(), "expected --key=value"));
            };
            Ok(match option.split_once('=') {
                Some((key, value)) => (key.to_string(), Some(value.to_string())),
                None => (option.to_string(), None),
            })
        })
        .collect()
}

fn required<'a>(key: &str, value: Option<&'a str>) -> Result<&'a str> {
    value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| RecorderError::invalid_input(key, "", "expects a value"))
}

fn parse_number<T: std::str::FromStr>(key: &str, value: Option<&str>) -> Result<T> {
    let raw = required(key, value)?;
    raw.trim()
        .parse()
        .map_err(|_| RecorderError::invalid_input(key, raw, "not a number in range"))
}

fn parse_flag(key: &str, value: Option<&str>) -> Result<bool> {
    match value.map(str::trim) {
        None | Some("") | Some("1") | Some("true") => Ok(true),
        Some("0") | Some("false") => Ok(false),
        Some(other) => Err(RecorderError::invalid_input(key, other, "expected a flag")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{RateControlMode, ReferenceMode};
    use proptest::prelude::*;
    use std::io::Write;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn base() -> Vec<String> {
        args(&["--cid=111", "--name=video0.i420", "--width=640", "--height=480"])
    }

    #[test]
    fn defaults_follow_the_recorder_conventions() {
        let config = RecorderConfig::from_args(base()).unwrap();
        assert!(!config.remote);
        assert_eq!(config.id, 0);

        let encoder = config.encoder_config().unwrap();
        assert_eq!(encoder.gop, 1);
        assert_eq!(encoder.bitrate, 8000 * 1024);
        assert_eq!(encoder.ip_period, 1);
        assert_eq!(encoder.init_qp, 26);
        assert_eq!((encoder.qp_min, encoder.qp_max), (0, 51));
        assert!(encoder.disable_frame_skip);
        assert_eq!(encoder.rc_mode, RateControlMode::ConstantQuantizer);
        assert_eq!(encoder.reference_mode, ReferenceMode::PreviousAndKey);
        assert_eq!(encoder.fps, 30);
    }

    #[test]
    fn required_inputs_are_enforced() {
        for missing in ["--cid", "--name", "--width", "--height"] {
            let partial: Vec<String> = base().into_iter().filter(|a| !a.starts_with(missing)).collect();
            let err = RecorderConfig::from_args(partial).unwrap_err();
            assert!(matches!(err, RecorderError::MissingInput { .. }), "{missing}: {err:?}");
        }
    }

    #[test]
    fn odd_or_garbage_dimensions_are_rejected() {
        let mut odd = base();
        odd.push("--width=641".into());
        assert!(matches!(RecorderConfig::from_args(odd), Err(RecorderError::InvalidInput { .. })));

        let mut garbage = base();
        garbage.push("--height=tall".into());
        assert!(matches!(RecorderConfig::from_args(garbage), Err(RecorderError::InvalidInput { .. })));
    }

    #[test]
    fn remote_needs_a_session() {
        let list = args(&["--cid=0", "--name=v", "--width=2", "--height=2", "--remote"]);
        let err = RecorderConfig::from_args(list).unwrap_err();
        assert!(matches!(err, RecorderError::RemoteMisconfigured { .. }));
        assert_eq!(err.severity(), crate::ErrorSeverity::FatalSetup);

        let list = args(&["--cid=300", "--name=v", "--width=2", "--height=2", "--remote"]);
        assert!(RecorderConfig::from_args(list).is_err());
    }

    #[test]
    fn naming_uses_rec_and_suffix() {
        let mut list = base();
        list.extend(args(&["--rec=drive.rec", "--recsuffix=-front"]));
        let naming = RecorderConfig::from_args(list).unwrap().naming();
        assert_eq!(naming.next_path(), PathBuf::from("drive.rec-front"));
    }

    #[test]
    fn command_line_overrides_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name: from-file\nwidth: 320\nheight: 240\ncid: 7\ngop: 10\nverbose: true\nloop: true").unwrap();

        let list = vec![
            format!("--config={}", file.path().display()),
            "--width=640".to_string(),
            "--height=480".to_string(),
        ];
        let config = RecorderConfig::from_args(list).unwrap();
        assert_eq!(config.name.as_deref(), Some("from-file"));
        assert_eq!((config.width, config.height), (Some(640), Some(480)));
        assert_eq!(config.cid, Some(7));
        assert!(config.verbose);
        assert!(config.looping);
        assert_eq!(config.encoder_config().unwrap().gop, 10);
    }

    #[test]
    fn broken_config_file_is_reported() {
        let err = RecorderConfig::from_args(args(&["--config=/nonexistent/shmrec.yaml"])).unwrap_err();
        assert!(matches!(err, RecorderError::ConfigFile { .. }));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "width: [not, a, number]").unwrap();
        let err = RecorderConfig::from_yaml_file(file.path()).unwrap_err();
        assert!(matches!(err, RecorderError::ConfigFile { .. }));
    }

    #[test]
    fn positional_arguments_are_rejected() {
        assert!(RecorderConfig::from_args(args(&["video0"])).is_err());
    }

    #[test]
    fn unknown_options_are_ignored() {
        let mut list = base();
        list.push("--crop=1".into());
        assert!(RecorderConfig::from_args(list).is_ok());
    }

    proptest! {
        #[test]
        fn quantizers_clamp_independently(qpmin in -1000i64..1000, qpmax in -1000i64..1000) {
            let mut list = base();
            list.push(format!("--qpmin={}", qpmin));
            list.push(format!("--qpmax={}", qpmax));
            let encoder = RecorderConfig::from_args(list).unwrap().encoder_config().unwrap();
            prop_assert_eq!(encoder.qp_min, qpmin.clamp(0, 51) as u32);
            prop_assert_eq!(encoder.qp_max, qpmax.clamp(0, 51) as u32);
        }
    }
}
