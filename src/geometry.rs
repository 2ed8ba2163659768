//! Pure geometry: constraint methods and dimension resolution.
//!
//! All functions here are pure and testable without any I/O or pixels.
//! Given a source size, a target box, and a constraint method, [`resolve`]
//! produces the final dimensions plus an optional centered crop. Resolution
//! only ever shrinks; methods whose scale factor is capped at 1.0 degrade
//! to the identity when the source already fits.
//!
//! All divisions are floating point and final pixel dimensions are
//! truncated (not rounded) to integers.

use crate::errors::{ImageError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// How a target box constrains the source dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ConstraintMethod {
    /// Scale uniformly so the result fits inside the box. No crop.
    FitWithin,
    /// Scale uniformly so the result covers the box, then center-crop to
    /// exactly the box.
    FitWithinCropTo,
    /// Force the target width (when shrinking); height follows the same
    /// proportion. No crop.
    FitWithinEnsureWidth,
    /// Force the target height (when shrinking); width follows. No crop.
    FitWithinEnsureHeight,
    /// Scale uniformly so the result is at least as large as the box on
    /// both axes, without ever upscaling. No crop.
    SmallestEnsureMinimum,
    /// The box must be an exact uniform scale of the source, else error.
    ExactProportion,
    /// The box must equal the source exactly, else error. Used to re-encode
    /// without geometry change.
    ExactNoResize,
    /// Skip geometry entirely; no target box required.
    PassthroughNoResize,
}

impl ConstraintMethod {
    /// Parse the wire token (e.g. `"fit-within:crop-to"`).
    pub fn parse(token: &str) -> Result<ConstraintMethod> {
        match token {
            "fit-within" => Ok(ConstraintMethod::FitWithin),
            "fit-within:crop-to" => Ok(ConstraintMethod::FitWithinCropTo),
            "fit-within:ensure-width" => Ok(ConstraintMethod::FitWithinEnsureWidth),
            "fit-within:ensure-height" => Ok(ConstraintMethod::FitWithinEnsureHeight),
            "smallest:ensure-minimum" => Ok(ConstraintMethod::SmallestEnsureMinimum),
            "exact:proportion" => Ok(ConstraintMethod::ExactProportion),
            "exact:no-resize" => Ok(ConstraintMethod::ExactNoResize),
            "passthrough:no-resize" => Ok(ConstraintMethod::PassthroughNoResize),
            other => Err(ImageError::Resize(format!(
                "invalid constraint method `{other}`"
            ))),
        }
    }

    pub fn token(self) -> &'static str {
        match self {
            ConstraintMethod::FitWithin => "fit-within",
            ConstraintMethod::FitWithinCropTo => "fit-within:crop-to",
            ConstraintMethod::FitWithinEnsureWidth => "fit-within:ensure-width",
            ConstraintMethod::FitWithinEnsureHeight => "fit-within:ensure-height",
            ConstraintMethod::SmallestEnsureMinimum => "smallest:ensure-minimum",
            ConstraintMethod::ExactProportion => "exact:proportion",
            ConstraintMethod::ExactNoResize => "exact:no-resize",
            ConstraintMethod::PassthroughNoResize => "passthrough:no-resize",
        }
    }

    /// Whether the method needs a target box (all except passthrough).
    pub fn requires_box(self) -> bool {
        !matches!(self, ConstraintMethod::PassthroughNoResize)
    }
}

impl fmt::Display for ConstraintMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl TryFrom<String> for ConstraintMethod {
    type Error = ImageError;

    fn try_from(value: String) -> Result<Self> {
        ConstraintMethod::parse(&value)
    }
}

impl From<ConstraintMethod> for String {
    fn from(method: ConstraintMethod) -> String {
        method.token().to_string()
    }
}

/// A crop window in pixel coordinates: left/top inclusive, right/bottom
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl CropBox {
    pub fn width(self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(self) -> u32 {
        self.y1 - self.y0
    }
}

/// Result of resolving a constraint method against a source size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    /// Scaled width, before any crop.
    pub width: u32,
    /// Scaled height, before any crop.
    pub height: u32,
    /// Centered crop to apply after scaling, if the method calls for one.
    pub crop: Option<CropBox>,
}

impl Resolution {
    fn identity(source: (u32, u32)) -> Resolution {
        Resolution {
            width: source.0,
            height: source.1,
            crop: None,
        }
    }

    /// Whether the scale step is a no-op against the given source.
    pub fn is_identity_scale(&self, source: (u32, u32)) -> bool {
        (self.width, self.height) == source
    }

    /// Dimensions after the crop (equal to width/height when no crop).
    pub fn final_size(&self) -> (u32, u32) {
        match self.crop {
            Some(crop) => (crop.width(), crop.height()),
            None => (self.width, self.height),
        }
    }
}

/// Resolve `source` dimensions against a `target` box under `method`.
///
/// # Examples
/// ```
/// # use thumbsmith::geometry::{resolve, ConstraintMethod};
/// let r = resolve((1200, 1600), (120, 120), ConstraintMethod::FitWithin).unwrap();
/// assert_eq!((r.width, r.height), (90, 120));
/// ```
pub fn resolve(
    source: (u32, u32),
    target: (u32, u32),
    method: ConstraintMethod,
) -> Result<Resolution> {
    let (i_w, i_h) = source;
    let (t_w, t_h) = target;

    match method {
        ConstraintMethod::PassthroughNoResize => Ok(Resolution::identity(source)),

        ConstraintMethod::FitWithin => {
            let (proportion_w, proportion_h) = capped_proportions(source, target);
            // peg to the smaller proportion so the whole image fits
            let proportion = proportion_w.min(proportion_h);
            Ok(Resolution {
                width: scale(i_w, proportion),
                height: scale(i_h, proportion),
                crop: None,
            })
        }

        ConstraintMethod::FitWithinCropTo => {
            let (proportion_w, proportion_h) = capped_proportions(source, target);
            // peg to the larger proportion so the box is covered, then crop
            let proportion = proportion_w.max(proportion_h);
            let scaled_w = scale(i_w, proportion);
            let scaled_h = scale(i_h, proportion);

            let crop = if (scaled_w, scaled_h) != (t_w, t_h) {
                // Centered via truncating division, which can bias the
                // window up to one pixel toward the top-left on odd
                // remainders.
                let (mut x0, mut y0, mut x1, mut y1) = (0, 0, scaled_w, scaled_h);
                if scaled_w > t_w {
                    x0 = (scaled_w - t_w) / 2;
                    x1 = x0 + t_w;
                }
                if scaled_h > t_h {
                    y0 = (scaled_h - t_h) / 2;
                    y1 = y0 + t_h;
                }
                Some(CropBox { x0, y0, x1, y1 })
            } else {
                None
            };

            Ok(Resolution {
                width: scaled_w,
                height: scaled_h,
                crop,
            })
        }

        ConstraintMethod::FitWithinEnsureWidth => {
            if t_w < i_w {
                let proportion = f64::from(t_w) / f64::from(i_w);
                Ok(Resolution {
                    width: t_w,
                    height: scale(i_h, proportion),
                    crop: None,
                })
            } else {
                Ok(Resolution::identity(source))
            }
        }

        ConstraintMethod::FitWithinEnsureHeight => {
            if t_h < i_h {
                let proportion = f64::from(t_h) / f64::from(i_h);
                Ok(Resolution {
                    width: scale(i_w, proportion),
                    height: t_h,
                    crop: None,
                })
            } else {
                Ok(Resolution::identity(source))
            }
        }

        ConstraintMethod::SmallestEnsureMinimum => {
            let proportion_w = f64::from(t_w) / f64::from(i_w);
            let proportion_h = f64::from(t_h) / f64::from(i_h);
            if proportion_w > 1.0 || proportion_h > 1.0 {
                // the box exceeds the source on some axis; never upscale
                return Ok(Resolution::identity(source));
            }
            // peg to the larger proportion so both axes stay at or above
            // the box
            let proportion = proportion_w.max(proportion_h);
            Ok(Resolution {
                width: scale(i_w, proportion),
                height: scale(i_h, proportion),
                crop: None,
            })
        }

        ConstraintMethod::ExactProportion => {
            let (proportion_w, proportion_h) = capped_proportions(source, target);
            if proportion_w != proportion_h {
                return Err(ImageError::Resize(format!(
                    "{i_w}x{i_h} cannot be scaled exactly to {t_w}x{t_h}"
                )));
            }
            Ok(Resolution {
                width: t_w,
                height: t_h,
                crop: None,
            })
        }

        ConstraintMethod::ExactNoResize => {
            if (i_w, i_h) != (t_w, t_h) {
                return Err(ImageError::Resize(format!(
                    "source is {i_w}x{i_h}, not the exact {t_w}x{t_h}"
                )));
            }
            Ok(Resolution::identity(source))
        }
    }
}

/// Per-axis proportions, each capped at 1.0 (shrink only).
fn capped_proportions(source: (u32, u32), target: (u32, u32)) -> (f64, f64) {
    let (i_w, i_h) = source;
    let (t_w, t_h) = target;
    let proportion_w = if t_w < i_w {
        f64::from(t_w) / f64::from(i_w)
    } else {
        1.0
    };
    let proportion_h = if t_h < i_h {
        f64::from(t_h) / f64::from(i_h)
    } else {
        1.0
    };
    (proportion_w, proportion_h)
}

/// Apply a proportion to an axis, truncating to whole pixels.
fn scale(axis: u32, proportion: f64) -> u32 {
    (f64::from(axis) * proportion) as u32
}
