//! OCR backend
//!
//! Text recognition is delegated to the Tesseract command line tool. The
//! image goes in over stdin as PNG and the text comes back on stdout.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use image::{GrayImage, ImageFormat};
use once_cell::sync::OnceCell;

use super::VisionError;
use crate::process::{run_bounded, ProcessError};

/// Upper bound of one Tesseract invocation
pub const OCR_TIMEOUT: Duration = Duration::from_secs(15);

/// Usual Windows install locations, tried after `TESSERACT_CMD`
pub const INSTALL_CANDIDATES: [&str; 2] = [
    r"C:\Program Files\Tesseract-OCR\tesseract.exe",
    r"C:\Program Files (x86)\Tesseract-OCR\tesseract.exe",
];

/// Characters that can appear in a resource amount
pub const AMOUNT_CHARS: &str = "0123456789kKmM.,";

/// Characters of a victory panel amount
pub const LOOT_CHARS: &str = "0123456789.,";

/// Characters of a troop count badge
pub const DIGITS: &str = "0123456789";

/// Tesseract page segmentation mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSegMode {
    /// A uniform block of text
    Block = 6,
    /// A single text line
    SingleLine = 7,
}

/// Per-call recognition options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrOptions {
    pub psm: PageSegMode,
    /// Restrict output to these characters
    pub allowlist: Option<&'static str>,
}

impl OcrOptions {
    pub const fn block(allowlist: Option<&'static str>) -> Self {
        Self {
            psm: PageSegMode::Block,
            allowlist,
        }
    }

    pub const fn line(allowlist: Option<&'static str>) -> Self {
        Self {
            psm: PageSegMode::SingleLine,
            allowlist,
        }
    }
}

/// Something that turns a prepared image into text
pub trait TextRecognizer: Send + Sync {
    /// Check that the engine can run at all
    fn probe(&self) -> Result<(), VisionError>;

    /// Recognize the text in a binarized image
    fn recognize(&self, image: &GrayImage, options: &OcrOptions) -> Result<String, VisionError>;
}

/// Tesseract CLI engine
pub struct Tesseract {
    command: PathBuf,
    timeout: Duration,
    version: OnceCell<Option<String>>,
}

impl Tesseract {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            timeout: OCR_TIMEOUT,
            version: OnceCell::new(),
        }
    }

    /// Use `TESSERACT_CMD` if set, then the first usual install location
    /// that exists, then `tesseract` from `PATH`
    pub fn discover() -> Self {
        let from_env = std::env::var("TESSERACT_CMD").ok();
        Self::new(pick_command(from_env.as_deref(), |path| path.is_file()))
    }

    /// Engine version, probed once and cached
    pub fn version(&self) -> Option<&str> {
        self.version
            .get_or_init(|| {
                let output =
                    run_bounded(Command::new(&self.command).arg("--version"), None, self.timeout)
                        .ok()?;
                if !output.success {
                    return None;
                }
                // Older builds print the banner on stderr
                let text = if output.stdout.is_empty() {
                    output.stderr
                } else {
                    output.stdout
                };
                let banner = String::from_utf8_lossy(&text);
                Some(banner.lines().next().unwrap_or_default().trim().to_string())
            })
            .as_deref()
    }

    fn unavailable(&self) -> VisionError {
        VisionError::EngineUnavailable(format!(
            "{} not found; install Tesseract or set TESSERACT_CMD",
            self.command.display()
        ))
    }
}

impl TextRecognizer for Tesseract {
    fn probe(&self) -> Result<(), VisionError> {
        match self.version() {
            Some(_) => Ok(()),
            None => Err(self.unavailable()),
        }
    }

    fn recognize(&self, image: &GrayImage, options: &OcrOptions) -> Result<String, VisionError> {
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| VisionError::Ocr(e.to_string()))?;

        let psm = (options.psm as u8).to_string();
        let mut command = Command::new(&self.command);
        command.args(["stdin", "stdout", "--psm", psm.as_str()]);
        if let Some(chars) = options.allowlist {
            command.arg("-c").arg(format!("tessedit_char_whitelist={chars}"));
        }

        let output = run_bounded(&mut command, Some(png), self.timeout).map_err(|e| match e {
            ProcessError::Io(e) if e.kind() == std::io::ErrorKind::NotFound => self.unavailable(),
            ProcessError::Io(e) => VisionError::Ocr(e.to_string()),
            ProcessError::TimedOut(timeout) => {
                VisionError::Ocr(format!("tesseract did not finish within {timeout:?}"))
            }
        })?;
        if !output.success {
            return Err(VisionError::Ocr(
                String::from_utf8_lossy(&output.stderr).trim().to_string(),
            ));
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Choose the engine command: an explicit setting wins, then the first
/// install candidate that `exists`, then the bare name
fn pick_command(explicit: Option<&str>, exists: impl Fn(&Path) -> bool) -> PathBuf {
    if let Some(cmd) = explicit.map(str::trim).filter(|cmd| !cmd.is_empty()) {
        return PathBuf::from(cmd);
    }
    INSTALL_CANDIDATES
        .iter()
        .map(PathBuf::from)
        .find(|candidate| exists(candidate.as_path()))
        .unwrap_or_else(|| PathBuf::from("tesseract"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_psm_values() {
        assert_eq!(PageSegMode::Block as u8, 6);
        assert_eq!(PageSegMode::SingleLine as u8, 7);
    }

    #[test]
    fn test_missing_engine_is_reported_as_unavailable() {
        let engine = Tesseract::new("/nonexistent/tesseract-binary");
        assert!(matches!(engine.probe(), Err(VisionError::EngineUnavailable(_))));

        let image = GrayImage::new(4, 4);
        let result = engine.recognize(&image, &OcrOptions::block(Some(DIGITS)));
        assert!(matches!(result, Err(VisionError::EngineUnavailable(_))));
    }

    #[test]
    fn test_command_discovery_order() {
        let nothing_installed = |_: &Path| false;
        let everything_installed = |_: &Path| true;

        assert_eq!(
            pick_command(Some("/opt/ocr/tesseract"), everything_installed),
            PathBuf::from("/opt/ocr/tesseract")
        );
        assert_eq!(
            pick_command(Some("  "), everything_installed),
            PathBuf::from(INSTALL_CANDIDATES[0])
        );
        assert_eq!(
            pick_command(None, |path: &Path| path == Path::new(INSTALL_CANDIDATES[1])),
            PathBuf::from(INSTALL_CANDIDATES[1])
        );
        assert_eq!(pick_command(None, nothing_installed), PathBuf::from("tesseract"));
    }

    #[test]
    fn test_option_constructors() {
        let opts = OcrOptions::line(None);
        assert_eq!(opts.psm, PageSegMode::SingleLine);
        assert!(opts.allowlist.is_none());
        assert_eq!(OcrOptions::block(Some(LOOT_CHARS)).allowlist, Some(LOOT_CHARS));
    }
}
