//! Encoder invocation
//!
//! Builds the argument vector for the external encoder from the input source
//! descriptors and the stream target. Nothing here spawns a process.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fmt;

use crate::playlist::{InputSource, InputSources};

/// Silent stereo source used when no audio is available
pub const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

const LOOPED_FILE_FLAGS: &[&str] = &["-stream_loop", "-1"];
const CONCAT_LIST_FLAGS: &[&str] = &["-f", "concat", "-safe", "0"];
const SILENT_AUDIO_FLAGS: &[&str] = &["-f", "lavfi"];

/// Codec parameters for the encoder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub video_codec: String,
    pub preset: String,
    pub video_bitrate_kbps: u32,
    pub bufsize_kbps: u32,
    pub pix_fmt: String,
    /// GOP length in frames
    pub keyframe_interval: u32,
    pub audio_codec: String,
    pub audio_bitrate_kbps: u32,
    pub audio_sample_rate: u32,
    pub output_format: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            video_codec: "libx264".to_string(),
            preset: "veryfast".to_string(),
            video_bitrate_kbps: 4500,
            bufsize_kbps: 9000,
            pix_fmt: "yuv420p".to_string(),
            keyframe_interval: 60,
            audio_codec: "aac".to_string(),
            audio_bitrate_kbps: 128,
            audio_sample_rate: 44100,
            output_format: "flv".to_string(),
        }
    }
}

/// Ingestion endpoint plus secret stream key
///
/// `Debug` and [`StreamTarget::redacted`] never show the key.
#[derive(Clone)]
pub struct StreamTarget {
    endpoint: String,
    key: String,
}

impl StreamTarget {
    pub fn new(endpoint: impl Into<String>, key: impl Into<String>) -> Self {
        let endpoint = endpoint.into();
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            key: key.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Full destination URL; only ever handed to the encoder
    pub fn url(&self) -> String {
        format!("{}/{}", self.endpoint, self.key)
    }

    pub fn redacted(&self) -> String {
        format!("{}/****", self.endpoint)
    }
}

impl fmt::Debug for StreamTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamTarget")
            .field("endpoint", &self.endpoint)
            .field("key", &"****")
            .finish()
    }
}

/// Full encoder invocation (program excluded)
#[derive(Clone)]
pub struct EncoderCommand {
    args: Vec<OsString>,
    redacted: String,
}

impl EncoderCommand {
    pub fn build(settings: &EncoderSettings, inputs: &InputSources, target: &StreamTarget) -> Self {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-re".into()];
        push_input(&mut args, &inputs.video);
        push_input(&mut args, &inputs.audio);

        let video_bitrate = format!("{}k", settings.video_bitrate_kbps);
        let codec_args: [&str; 24] = [
            "-c:v",
            settings.video_codec.as_str(),
            "-preset",
            settings.preset.as_str(),
            "-b:v",
            video_bitrate.as_str(),
            "-maxrate",
            video_bitrate.as_str(),
            "-bufsize",
            &format!("{}k", settings.bufsize_kbps),
            "-pix_fmt",
            settings.pix_fmt.as_str(),
            "-g",
            &settings.keyframe_interval.to_string(),
            "-c:a",
            settings.audio_codec.as_str(),
            "-b:a",
            &format!("{}k", settings.audio_bitrate_kbps),
            "-ar",
            &settings.audio_sample_rate.to_string(),
            "-map",
            "0:v:0",
            "-map",
            "1:a:0",
        ];
        args.extend(codec_args.iter().map(OsString::from));

        if ends_with_shortest_input(inputs) {
            args.push("-shortest".into());
        }

        args.push("-f".into());
        args.push(settings.output_format.clone().into());

        let redacted = render(&args, &target.redacted());
        args.push(target.url().into());

        Self { args, redacted }
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Command line with the stream key masked, safe to log
    pub fn redacted(&self) -> &str {
        &self.redacted
    }
}

impl fmt::Debug for EncoderCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncoderCommand").field(&self.redacted).finish()
    }
}

/// Finite lists end the whole stream when the first of them runs out
fn ends_with_shortest_input(inputs: &InputSources) -> bool {
    inputs.audio == InputSource::SilentAudio
        || matches!(inputs.video, InputSource::ConcatList(_))
        || matches!(inputs.audio, InputSource::ConcatList(_))
}

fn push_input(args: &mut Vec<OsString>, source: &InputSource) {
    let (flags, input): (&[&str], OsString) = match source {
        InputSource::LoopedFile(path) => (LOOPED_FILE_FLAGS, path.into()),
        InputSource::ConcatList(path) => (CONCAT_LIST_FLAGS, path.into()),
        InputSource::SilentAudio => (SILENT_AUDIO_FLAGS, SILENT_AUDIO_SOURCE.into()),
    };
    args.extend(flags.iter().map(OsString::from));
    args.push("-i".into());
    args.push(input);
}

fn render(args: &[OsString], destination: &str) -> String {
    let mut out: Vec<String> = args.iter().map(|a| a.to_string_lossy().into_owned()).collect();
    out.push(destination.to_string());
    out.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn strings(cmd: &EncoderCommand) -> Vec<String> {
        cmd.args()
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    fn target() -> StreamTarget {
        StreamTarget::new("rtmp://ingest.example/live2", "XYZ")
    }

    #[test]
    fn test_rotation_with_silent_audio() {
        let inputs = InputSources {
            video: InputSource::ConcatList(PathBuf::from("/root/playlists/s-video.txt")),
            audio: InputSource::SilentAudio,
        };
        let cmd = EncoderCommand::build(&EncoderSettings::default(), &inputs, &target());
        let args = strings(&cmd);

        assert_eq!(
            &args[..13],
            &[
                "-hide_banner",
                "-re",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/root/playlists/s-video.txt",
                "-f",
                "lavfi",
                "-i",
                SILENT_AUDIO_SOURCE,
                "-c:v",
            ]
        );
        assert!(args.contains(&"-shortest".to_string()));
        assert_eq!(args.last().unwrap(), "rtmp://ingest.example/live2/XYZ");
        assert!(args.last().unwrap().ends_with("/XYZ"));
    }

    #[test]
    fn test_rotation_with_audio_list_ends_at_shortest() {
        let inputs = InputSources {
            video: InputSource::ConcatList(PathBuf::from("/root/playlists/s-video.txt")),
            audio: InputSource::ConcatList(PathBuf::from("/root/playlists/s-audio.txt")),
        };
        let args = strings(&EncoderCommand::build(
            &EncoderSettings::default(),
            &inputs,
            &target(),
        ));

        assert_eq!(
            &args[2..14],
            &[
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/root/playlists/s-video.txt",
                "-f",
                "concat",
                "-safe",
                "0",
                "-i",
                "/root/playlists/s-audio.txt",
            ]
        );
        let shortest = args.iter().position(|a| a == "-shortest").unwrap();
        let format = args.iter().rposition(|a| a == "-f").unwrap();
        assert!(shortest < format);
    }

    #[test]
    fn test_looped_files_without_shortest() {
        let inputs = InputSources {
            video: InputSource::LoopedFile(PathBuf::from("/m/a.mp4")),
            audio: InputSource::LoopedFile(PathBuf::from("/m/s.mp3")),
        };
        let args = strings(&EncoderCommand::build(
            &EncoderSettings::default(),
            &inputs,
            &target(),
        ));

        assert_eq!(
            &args[2..10],
            &["-stream_loop", "-1", "-i", "/m/a.mp4", "-stream_loop", "-1", "-i", "/m/s.mp3"]
        );
        assert!(!args.contains(&"-shortest".to_string()));
    }

    #[test]
    fn test_codec_values_follow_settings() {
        let settings = EncoderSettings {
            video_bitrate_kbps: 3000,
            ..EncoderSettings::default()
        };
        let inputs = InputSources {
            video: InputSource::LoopedFile(PathBuf::from("/m/a.mp4")),
            audio: InputSource::SilentAudio,
        };
        let args = strings(&EncoderCommand::build(&settings, &inputs, &target()));
        let joined = args.join(" ");

        assert!(joined.contains("-c:v libx264 -preset veryfast -b:v 3000k -maxrate 3000k"));
        assert!(joined.contains("-bufsize 9000k -pix_fmt yuv420p -g 60"));
        assert!(joined.contains("-c:a aac -b:a 128k -ar 44100 -map 0:v:0 -map 1:a:0"));
        assert!(joined.contains("-f flv rtmp://"));
    }

    #[test]
    fn test_redaction_hides_key() {
        let target = StreamTarget::new("rtmp://ingest.example/live2/", "secret-key");
        assert_eq!(target.url(), "rtmp://ingest.example/live2/secret-key");
        assert_eq!(target.redacted(), "rtmp://ingest.example/live2/****");
        assert!(!format!("{:?}", target).contains("secret-key"));

        let inputs = InputSources {
            video: InputSource::LoopedFile(PathBuf::from("/m/a.mp4")),
            audio: InputSource::SilentAudio,
        };
        let cmd = EncoderCommand::build(&EncoderSettings::default(), &inputs, &target);
        assert!(!cmd.redacted().contains("secret-key"));
        assert!(cmd.redacted().ends_with("/****"));
        assert!(!format!("{:?}", cmd).contains("secret-key"));
    }
}
