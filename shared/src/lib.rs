use derive_more::Display;
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{AsRefStr, EnumCount, EnumIter, EnumString, IntoStaticStr};

/// Diagnostic categories, in the order the classifier emits its scores.
///
/// The `serialize` strings are the wire labels used by strum's string
/// conversions, `Display` and serde alike.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    EnumCount,
    EnumString,
    AsRefStr,
    IntoStaticStr,
    strum_macros::Display,
)]
#[serde(into = "&'static str", try_from = "String")]
pub enum LesionClass {
    #[strum(serialize = "Melanocytic nevi")]
    MelanocyticNevi,
    #[strum(serialize = "Melanoma")]
    Melanoma,
    #[strum(serialize = "Benign keratosis-like lesions")]
    BenignKeratosis,
    #[strum(serialize = "Basal cell carcinoma")]
    BasalCellCarcinoma,
    #[strum(serialize = "Actinic keratoses")]
    ActinicKeratoses,
    #[strum(serialize = "Vascular lesions")]
    VascularLesions,
    #[strum(serialize = "Dermatofibroma")]
    Dermatofibroma,
}

impl TryFrom<String> for LesionClass {
    type Error = strum::ParseError;

    fn try_from(label: String) -> Result<Self, Self::Error> {
        label.parse()
    }
}

impl LesionClass {
    pub fn from_index(index: usize) -> Option<Self> {
        Self::iter().nth(index)
    }

    pub fn label(&self) -> &'static str {
        (*self).into()
    }

    pub fn description(&self) -> &'static str {
        match self {
            LesionClass::MelanocyticNevi => "Common moles, usually harmless growths on the skin.",
            LesionClass::Melanoma => "A serious form of skin cancer that develops in melanocytes.",
            LesionClass::BenignKeratosis => {
                "Non-cancerous skin growths that appear as waxy brown, black or tan growths."
            }
            LesionClass::BasalCellCarcinoma => {
                "The most common type of skin cancer, usually developing on sun-exposed areas."
            }
            LesionClass::ActinicKeratoses => {
                "Rough, scaly patches on the skin caused by years of sun exposure."
            }
            LesionClass::VascularLesions => {
                "Abnormalities of blood vessels visible on the skin surface."
            }
            LesionClass::Dermatofibroma => {
                "Common benign skin growths that often appear as small, firm bumps on the skin."
            }
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AnalyzeRequest {
    #[serde(default)]
    pub filename: Option<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct AnalysisResult {
    pub classification: LesionClass,
    pub confidence: f32,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Display)]
#[display(fmt = "{}", error)]
pub struct ErrorResponse {
    pub error: String,
}
