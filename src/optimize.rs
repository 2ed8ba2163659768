//! Lossless recompression through external tools.
//!
//! Derived JPEG/PNG/GIF images can be piped through whichever of a fixed
//! set of command-line compressors happen to be installed (`jpegtran`,
//! `jpegoptim`, `gifsicle`, `pngcrush`, `optipng`, `advpng`). The pass is
//! strictly best-effort: missing tools are skipped, failing tools are
//! recorded and skipped, and the image's bytes are only replaced when at
//! least one tool succeeded *and* the result is actually smaller.
//!
//! Availability is probed once per process through [`ToolRegistry::shared`].
//! Tests (and forking servers that want to probe before forking) can use a
//! private registry with injected availability instead.

use crate::errors::Result;
use crate::formats::Format;
use crate::wrapper::DerivedImage;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex, OnceLock};

/// The external compressors the pass knows how to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tool {
    Jpegtran,
    Jpegoptim,
    Gifsicle,
    Pngcrush,
    Optipng,
    Advpng,
}

impl Tool {
    pub const ALL: [Tool; 6] = [
        Tool::Jpegtran,
        Tool::Jpegoptim,
        Tool::Gifsicle,
        Tool::Pngcrush,
        Tool::Optipng,
        Tool::Advpng,
    ];

    pub fn binary(self) -> &'static str {
        match self {
            Tool::Jpegtran => "jpegtran",
            Tool::Jpegoptim => "jpegoptim",
            Tool::Gifsicle => "gifsicle",
            Tool::Pngcrush => "pngcrush",
            Tool::Optipng => "optipng",
            Tool::Advpng => "advpng",
        }
    }

    /// The tool sequence for a format, in invocation order.
    pub fn chain_for(format: Format) -> &'static [Tool] {
        match format {
            Format::Jpeg => &[Tool::Jpegtran, Tool::Jpegoptim],
            Format::Gif => &[Tool::Gifsicle],
            Format::Png => &[Tool::Pngcrush, Tool::Optipng, Tool::Advpng],
            Format::Pdf => &[],
        }
    }

    /// Tools that rewrite their input file rather than writing to a
    /// separate output path.
    fn in_place(self) -> bool {
        matches!(self, Tool::Jpegoptim | Tool::Advpng)
    }

    fn command(self, input: &Path, output: &Path) -> Command {
        let mut cmd = Command::new(self.binary());
        match self {
            Tool::Jpegtran => {
                cmd.arg("-copy")
                    .arg("all")
                    .arg("-optimize")
                    .arg("-progressive")
                    .arg("-outfile")
                    .arg(output)
                    .arg(input);
            }
            Tool::Jpegoptim => {
                cmd.arg("--strip-all").arg("-q").arg(input);
            }
            Tool::Gifsicle => {
                cmd.arg("-O3").arg(input).arg("--output").arg(output);
            }
            Tool::Pngcrush => {
                cmd.arg("-rem")
                    .arg("alla")
                    .arg("-nofilecheck")
                    .arg("-bail")
                    .arg("-blacken")
                    .arg("-reduce")
                    .arg(input)
                    .arg(output);
            }
            Tool::Optipng => {
                cmd.arg("-i0").arg("-o3").arg("-out").arg(output).arg("--").arg(input);
            }
            Tool::Advpng => {
                cmd.arg("-4").arg("-z").arg(input);
            }
        }
        cmd
    }
}

/// Availability cache for the external tools.
///
/// Detection spawns each binary once with `--help`; a spawn failure of the
/// "no such binary" kind means unavailable, anything that ran means
/// available. The process-wide instance behind [`ToolRegistry::shared`] is
/// probed lazily on first use; [`force_redetect`](Self::force_redetect)
/// re-probes and [`set_available`](Self::set_available) injects known
/// state without probing at all.
#[derive(Debug, Default)]
pub struct ToolRegistry {
    availability: HashMap<Tool, bool>,
    detected: bool,
}

impl ToolRegistry {
    /// An empty registry that will probe on first use.
    pub fn new() -> ToolRegistry {
        ToolRegistry::default()
    }

    /// A registry with fully injected availability; never probes.
    pub fn with_availability(availability: HashMap<Tool, bool>) -> ToolRegistry {
        ToolRegistry {
            availability,
            detected: true,
        }
    }

    /// The process-wide registry.
    pub fn shared() -> Arc<Mutex<ToolRegistry>> {
        static SHARED: OnceLock<Arc<Mutex<ToolRegistry>>> = OnceLock::new();
        SHARED
            .get_or_init(|| Arc::new(Mutex::new(ToolRegistry::new())))
            .clone()
    }

    pub fn ensure_detected(&mut self) {
        if !self.detected {
            self.force_redetect();
        }
    }

    /// Probe every tool now, replacing any previous state.
    pub fn force_redetect(&mut self) {
        for tool in Tool::ALL {
            let available = probe(tool);
            log::debug!(
                "optimizer tool {}: {}",
                tool.binary(),
                if available { "available" } else { "unavailable" }
            );
            self.availability.insert(tool, available);
        }
        self.detected = true;
    }

    pub fn is_available(&self, tool: Tool) -> bool {
        self.availability.get(&tool).copied().unwrap_or(false)
    }

    /// Inject availability for one tool, suppressing future probing.
    pub fn set_available(&mut self, tool: Tool, available: bool) {
        self.availability.insert(tool, available);
        self.detected = true;
    }
}

fn probe(tool: Tool) -> bool {
    Command::new(tool.binary())
        .arg("--help")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .is_ok()
}

/// Drives the per-format tool chain over derived images.
#[derive(Clone)]
pub struct Optimizer {
    registry: Arc<Mutex<ToolRegistry>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer {
            registry: ToolRegistry::shared(),
        }
    }
}

impl Optimizer {
    /// An optimizer backed by the process-wide registry.
    pub fn new() -> Optimizer {
        Optimizer::default()
    }

    /// An optimizer backed by a private registry (tests, pre-fork probing).
    pub fn with_registry(registry: Arc<Mutex<ToolRegistry>>) -> Optimizer {
        Optimizer { registry }
    }

    /// Run the tool chain over `image`, replacing its bytes when the result
    /// is smaller. Tool failures are recorded on the image, never raised;
    /// only scratch-file I/O can error.
    pub fn optimize(&self, image: &mut DerivedImage) -> Result<()> {
        let chain = Tool::chain_for(image.format());
        if chain.is_empty() {
            return Ok(());
        }

        let available: Vec<Tool> = {
            let mut registry = self
                .registry
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            registry.ensure_detected();
            chain
                .iter()
                .copied()
                .filter(|tool| registry.is_available(*tool))
                .collect()
        };

        if available.is_empty() {
            log::debug!(
                "no optimizer tools available for {}",
                image.format().standardized()
            );
            image.record_optimization(Vec::new(), None);
            return Ok(());
        }

        let scratch = tempfile::tempdir()?;
        let extension = image.format().standardized();
        let mut current = scratch.path().join(format!("input.{extension}"));
        std::fs::write(&current, image.bytes())?;
        let original_len = image.len();

        let mut outcomes = Vec::new();
        let mut any_success = false;
        for (step, tool) in available.into_iter().enumerate() {
            let output = if tool.in_place() {
                current.clone()
            } else {
                scratch.path().join(format!("step-{step}.{extension}"))
            };

            let status = tool
                .command(&current, &output)
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status();

            match status {
                Ok(status) if status.success() => {
                    outcomes.push((tool.binary().to_string(), true));
                    any_success = true;
                    current = output;
                }
                Ok(status) => {
                    log::warn!("{} exited with {status}; skipping", tool.binary());
                    outcomes.push((tool.binary().to_string(), false));
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    log::warn!("{} disappeared after detection; skipping", tool.binary());
                    outcomes.push((tool.binary().to_string(), false));
                }
                Err(err) => {
                    log::warn!("{} failed to spawn ({err}); skipping", tool.binary());
                    outcomes.push((tool.binary().to_string(), false));
                }
            }
        }

        let replacement = if any_success {
            let optimized = std::fs::read(&current)?;
            if !optimized.is_empty() && (optimized.len() as u64) < original_len {
                Some(optimized)
            } else {
                None
            }
        } else {
            None
        };

        if let Some(ref bytes) = replacement {
            log::debug!(
                "optimized {} bytes down to {}",
                original_len,
                bytes.len()
            );
        }
        image.record_optimization(outcomes, replacement);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none_available() -> Optimizer {
        let map = Tool::ALL.iter().map(|tool| (*tool, false)).collect();
        Optimizer::with_registry(Arc::new(Mutex::new(ToolRegistry::with_availability(map))))
    }

    #[test]
    fn chains_cover_the_three_optimizable_formats() {
        assert_eq!(Tool::chain_for(Format::Jpeg), &[Tool::Jpegtran, Tool::Jpegoptim]);
        assert_eq!(Tool::chain_for(Format::Gif), &[Tool::Gifsicle]);
        assert_eq!(
            Tool::chain_for(Format::Png),
            &[Tool::Pngcrush, Tool::Optipng, Tool::Advpng]
        );
        assert!(Tool::chain_for(Format::Pdf).is_empty());
    }

    #[test]
    fn pdf_is_left_untouched() {
        let mut image = DerivedImage::from_parts(vec![1, 2, 3], Format::Pdf, None);
        none_available().optimize(&mut image).unwrap();
        // not even marked: the format is outside the optimizer's scope
        assert_eq!(image.is_optimized(), None);
    }

    #[test]
    fn no_tools_available_marks_unoptimized() {
        let mut image = DerivedImage::from_parts(vec![1, 2, 3], Format::Jpeg, None);
        none_available().optimize(&mut image).unwrap();
        assert_eq!(image.is_optimized(), Some(false));
        assert!(image.optimizations().is_empty());
        assert_eq!(image.bytes(), &[1, 2, 3]);
    }

    #[test]
    fn injected_availability_is_not_probed() {
        let registry = ToolRegistry::with_availability(
            [(Tool::Jpegtran, true)].into_iter().collect(),
        );
        assert!(registry.is_available(Tool::Jpegtran));
        // everything not injected defaults to unavailable
        assert!(!registry.is_available(Tool::Jpegoptim));
    }

    #[test]
    fn set_available_suppresses_detection() {
        let mut registry = ToolRegistry::new();
        registry.set_available(Tool::Gifsicle, true);
        registry.ensure_detected();
        assert!(registry.is_available(Tool::Gifsicle));
    }

    #[test]
    fn jpegtran_command_shape() {
        let cmd = Tool::Jpegtran.command(Path::new("in.jpg"), Path::new("out.jpg"));
        let args: Vec<_> = cmd.get_args().map(|a| a.to_string_lossy().to_string()).collect();
        assert_eq!(
            args,
            ["-copy", "all", "-optimize", "-progressive", "-outfile", "out.jpg", "in.jpg"]
        );
    }

    #[test]
    fn in_place_tools() {
        assert!(Tool::Jpegoptim.in_place());
        assert!(Tool::Advpng.in_place());
        assert!(!Tool::Jpegtran.in_place());
    }
}
