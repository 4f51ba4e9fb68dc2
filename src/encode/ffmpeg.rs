use anyhow::{Context, Result};
use std::io::Write;
use std::path::Path;
use std::process::{Child, Command, Stdio};

/// Video-only settings for the rawvideo pipe.
pub struct EncoderSettings<'a> {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub codec: &'a str,
    pub pix_fmt: &'a str,
    pub crf: u32,
    pub bitrate: Option<&'a str>,
}

pub struct FfmpegEncoder {
    child: Child,
    frame_bytes: usize,
}

fn build_args(output_path: &Path, settings: &EncoderSettings<'_>) -> Vec<String> {
    let mut args = vec![
        "-y".to_string(),
        "-f".into(), "rawvideo".into(),
        "-pixel_format".into(), "rgba".into(),
        "-video_size".into(), format!("{}x{}", settings.width, settings.height),
        "-framerate".into(), settings.fps.to_string(),
        "-i".into(), "pipe:0".into(),
        "-c:v".into(), settings.codec.to_string(),
        "-pix_fmt".into(), settings.pix_fmt.to_string(),
    ];

    if let Some(br) = settings.bitrate {
        args.extend(["-b:v".to_string(), br.to_string()]);
    } else {
        args.extend(["-crf".to_string(), settings.crf.to_string()]);
        args.extend(["-preset".to_string(), "medium".to_string()]);
    }

    args.push(output_path.to_string_lossy().into_owned());
    args
}

impl FfmpegEncoder {
    pub fn new(output_path: &Path, settings: &EncoderSettings<'_>) -> Result<Self> {
        let args = build_args(output_path, settings);

        let child = Command::new("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("Failed to spawn ffmpeg. Is ffmpeg installed?")?;

        log::info!(
            "FFmpeg encoder started: {}x{} @ {}fps, codec={}",
            settings.width,
            settings.height,
            settings.fps,
            settings.codec
        );

        Ok(Self {
            child,
            frame_bytes: settings.width as usize * settings.height as usize * 4,
        })
    }

    pub fn write_frame(&mut self, rgba_pixels: &[u8]) -> Result<()> {
        if rgba_pixels.len() != self.frame_bytes {
            anyhow::bail!(
                "Frame is {} bytes, expected {}",
                rgba_pixels.len(),
                self.frame_bytes
            );
        }
        let stdin = self.child.stdin.as_mut().context("FFmpeg stdin not available")?;
        stdin.write_all(rgba_pixels).context("Failed to write frame to ffmpeg")?;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        // Close stdin to signal EOF
        drop(self.child.stdin.take());

        let output = self.child.wait_with_output().context("Failed to wait for ffmpeg")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("FFmpeg exited with error:\n{}", stderr);
        }

        log::info!("FFmpeg encoding complete");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(bitrate: Option<&str>) -> EncoderSettings<'_> {
        EncoderSettings {
            width: 640,
            height: 360,
            fps: 25,
            codec: "libx264",
            pix_fmt: "yuv420p",
            crf: 20,
            bitrate,
        }
    }

    #[test]
    fn crf_mode_args() {
        let args = build_args(Path::new("out.mp4"), &settings(None));
        assert!(args.windows(2).any(|w| w == ["-video_size", "640x360"]));
        assert!(args.windows(2).any(|w| w == ["-crf", "20"]));
        assert_eq!(args.last().map(String::as_str), Some("out.mp4"));
        assert!(!args.iter().any(|a| a == "-c:a"));
    }

    #[test]
    fn bitrate_replaces_crf() {
        let args = build_args(Path::new("out.mp4"), &settings(Some("5M")));
        assert!(args.windows(2).any(|w| w == ["-b:v", "5M"]));
        assert!(!args.iter().any(|a| a == "-crf"));
    }
}
