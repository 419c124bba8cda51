use garde::Validate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Backend selector: which upscaler processes a job.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case", ascii_case_insensitive)]
pub enum Backend {
    /// Deterministic resampling pipeline.
    Fast,
    /// Pre-trained super-resolution model (fixed 4× output).
    Model,
}

/// Supported enlargement factors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum ScaleFactor {
    X2,
    X4,
    X8,
}

impl ScaleFactor {
    pub const ALL: [ScaleFactor; 3] = [ScaleFactor::X2, ScaleFactor::X4, ScaleFactor::X8];

    pub fn get(self) -> u32 {
        match self {
            ScaleFactor::X2 => 2,
            ScaleFactor::X4 => 4,
            ScaleFactor::X8 => 8,
        }
    }
}

impl TryFrom<u32> for ScaleFactor {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            2 => Ok(ScaleFactor::X2),
            4 => Ok(ScaleFactor::X4),
            8 => Ok(ScaleFactor::X8),
            other => Err(ValidationError(format!(
                "factor must be 2, 4, or 8 (got {other})"
            ))),
        }
    }
}

impl From<ScaleFactor> for u32 {
    fn from(factor: ScaleFactor) -> Self {
        factor.get()
    }
}

impl std::fmt::Display for ScaleFactor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x", self.get())
    }
}

/// Validated upscale options attached to every job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpscaleOptions {
    pub factor: ScaleFactor,
    pub denoise: bool,
    pub backend: Backend,
}

impl Default for UpscaleOptions {
    fn default() -> Self {
        Self {
            factor: ScaleFactor::X2,
            denoise: false,
            backend: Backend::Fast,
        }
    }
}

/// Raw submit parameters, as received from multipart text fields or the query string.
///
/// Both sources go through [`UpscaleForm::apply_field`], so they accept the
/// same spellings.
#[derive(Debug, Default, Clone, Validate)]
pub struct UpscaleForm {
    #[garde(custom(supported_factor))]
    pub factor: Option<u32>,

    #[garde(skip)]
    pub denoise: Option<bool>,

    #[garde(skip)]
    pub use_tfhub: Option<bool>,

    #[garde(skip)]
    pub backend: Option<Backend>,
}

fn supported_factor(value: &Option<u32>, _ctx: &()) -> garde::Result {
    match value {
        Some(factor) if ScaleFactor::try_from(*factor).is_err() => {
            Err(garde::Error::new("must be 2, 4, or 8"))
        }
        _ => Ok(()),
    }
}

impl UpscaleForm {
    /// Apply a single multipart text field. Unknown names are ignored.
    pub fn apply_field(&mut self, name: &str, value: &str) -> Result<(), ValidationError> {
        let value = value.trim();
        match name {
            "factor" => {
                let factor = value
                    .parse::<u32>()
                    .map_err(|_| ValidationError(format!("factor is not a number: {value:?}")))?;
                self.factor = Some(factor);
            }
            "denoise" => self.denoise = Some(parse_flag("denoise", value)?),
            "use_tfhub" => self.use_tfhub = Some(parse_flag("use_tfhub", value)?),
            "backend" => {
                let backend = value
                    .parse::<Backend>()
                    .map_err(|_| ValidationError(format!("unknown backend: {value:?}")))?;
                self.backend = Some(backend);
            }
            _ => {}
        }
        Ok(())
    }

    /// Build a form from key/value pairs such as a decoded query string.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self, ValidationError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut form = Self::default();
        for (name, value) in pairs {
            form.apply_field(name.as_ref(), value.as_ref())?;
        }
        Ok(form)
    }

    /// Fill fields not set on `self` from `fallback` (multipart wins over query).
    pub fn or(self, fallback: UpscaleForm) -> UpscaleForm {
        UpscaleForm {
            factor: self.factor.or(fallback.factor),
            denoise: self.denoise.or(fallback.denoise),
            use_tfhub: self.use_tfhub.or(fallback.use_tfhub),
            backend: self.backend.or(fallback.backend),
        }
    }

    pub fn into_options(self) -> Result<UpscaleOptions, ValidationError> {
        self.validate()
            .map_err(|report| ValidationError(report.to_string()))?;

        let backend = match (self.backend, self.use_tfhub) {
            (Some(Backend::Fast), Some(true)) => {
                return Err(ValidationError(
                    "use_tfhub=true conflicts with backend=fast".to_string(),
                ))
            }
            (Some(backend), _) => backend,
            (None, Some(true)) => Backend::Model,
            (None, _) => Backend::Fast,
        };

        let defaults = UpscaleOptions::default();
        let factor = match self.factor {
            Some(raw) => ScaleFactor::try_from(raw)?,
            None => defaults.factor,
        };

        Ok(UpscaleOptions {
            factor,
            denoise: self.denoise.unwrap_or(defaults.denoise),
            backend,
        })
    }
}

fn parse_flag(name: &str, value: &str) -> Result<bool, ValidationError> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "1" | "on" | "yes" => Ok(true),
        "false" | "0" | "off" | "no" | "" => Ok(false),
        _ => Err(ValidationError(format!("{name} must be a boolean (got {value:?})"))),
    }
}

/// Malformed submit parameters; rejected before any job exists.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ValidationError(pub String);
