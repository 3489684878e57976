//! Output head descriptors, input modality, and database selectors.

use crate::ContractError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Databases the segmentation stage exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Database {
    Cca,
    Bulb,
}

impl Database {
    pub fn as_str(&self) -> &'static str {
        match self {
            Database::Cca => "CCA",
            Database::Bulb => "BULB",
        }
    }

    /// Whether the export carries an averaged IMT measurement alongside
    /// the maximum.
    pub fn has_avg_measurement(&self) -> bool {
        matches!(self, Database::Cca)
    }
}

impl fmt::Display for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Database {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CCA" | "cca" => Ok(Database::Cca),
            "BULB" | "bulb" => Ok(Database::Bulb),
            other => Err(ContractError::UnknownDatabase(other.to_string())),
        }
    }
}

/// Which table column(s) feed the network input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InputKind {
    /// Ultrasound frame only.
    Image,
    /// Segmentation mask only.
    Mask,
    /// Frame and mask depth-stacked into a two-channel input.
    ImageAndMask,
}

impl InputKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputKind::Image => "img",
            InputKind::Mask => "mask",
            InputKind::ImageAndMask => "img_and_mask",
        }
    }

    /// Channel count of the assembled input.
    pub fn channels(&self) -> usize {
        match self {
            InputKind::ImageAndMask => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for InputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InputKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "img" => Ok(InputKind::Image),
            "mask" => Ok(InputKind::Mask),
            "img_and_mask" => Ok(InputKind::ImageAndMask),
            other => Err(ContractError::UnknownModality(other.to_string())),
        }
    }
}

/// Loss assigned to a head. The loss also fixes the head kind: BCE
/// variants imply a sigmoid output, the rest a raw regression output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossKind {
    Mse,
    Mae,
    Bce,
    WeightedBce,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            LossKind::Mse => "mse",
            LossKind::Mae => "mae",
            LossKind::Bce => "bce",
            LossKind::WeightedBce => "weighted_bce",
        }
    }

    pub fn head_kind(&self) -> HeadKind {
        match self {
            LossKind::Mse | LossKind::Mae => HeadKind::Regression,
            LossKind::Bce | LossKind::WeightedBce => HeadKind::Binary,
        }
    }
}

impl FromStr for LossKind {
    type Err = ContractError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mse" => Ok(LossKind::Mse),
            "mae" => Ok(LossKind::Mae),
            "bce" => Ok(LossKind::Bce),
            "weighted_bce" => Ok(LossKind::WeightedBce),
            other => Err(ContractError::UnknownLoss(other.to_string())),
        }
    }
}

/// Output activation family of a head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HeadKind {
    /// Raw linear output.
    Regression,
    /// Sigmoid output in [0, 1].
    Binary,
}

/// One model output head: name, enablement, loss, and the weight it
/// contributes to the combined training loss. Declaration order is the
/// order heads appear in model outputs, logs, and prediction columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeadSpec {
    pub name: String,
    pub predict: bool,
    pub loss: LossKind,
    pub weight: f64,
}

impl HeadSpec {
    pub fn new(name: &str, predict: bool, loss: LossKind, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            predict,
            loss,
            weight,
        }
    }

    pub fn kind(&self) -> HeadKind {
        self.loss.head_kind()
    }

    /// Head name with the measurement prefix stripped, as used in
    /// experiment identifiers.
    pub fn short_name(&self) -> &str {
        self.name.strip_prefix("imt_").unwrap_or(&self.name)
    }
}

/// The standard head set: both IMT measurements plus the optional
/// plaque classifier.
pub fn default_heads(predict_plaque: bool) -> Vec<HeadSpec> {
    vec![
        HeadSpec::new("imt_max", true, LossKind::Mse, 1.0),
        HeadSpec::new("imt_avg", true, LossKind::Mse, 1.0),
        HeadSpec::new("plaque", predict_plaque, LossKind::WeightedBce, 0.5),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modality_parse_roundtrip() {
        for kind in [InputKind::Image, InputKind::Mask, InputKind::ImageAndMask] {
            assert_eq!(kind.as_str().parse::<InputKind>().unwrap(), kind);
        }
        assert!("pointcloud".parse::<InputKind>().is_err());
    }

    #[test]
    fn modality_channels() {
        assert_eq!(InputKind::Image.channels(), 1);
        assert_eq!(InputKind::Mask.channels(), 1);
        assert_eq!(InputKind::ImageAndMask.channels(), 2);
    }

    #[test]
    fn database_parse() {
        assert_eq!("CCA".parse::<Database>().unwrap(), Database::Cca);
        assert_eq!("bulb".parse::<Database>().unwrap(), Database::Bulb);
        assert!("ICA".parse::<Database>().is_err());
        assert!(Database::Cca.has_avg_measurement());
        assert!(!Database::Bulb.has_avg_measurement());
    }

    #[test]
    fn loss_fixes_head_kind() {
        assert_eq!(LossKind::Mse.head_kind(), HeadKind::Regression);
        assert_eq!(LossKind::Mae.head_kind(), HeadKind::Regression);
        assert_eq!(LossKind::Bce.head_kind(), HeadKind::Binary);
        assert_eq!(LossKind::WeightedBce.head_kind(), HeadKind::Binary);
    }

    #[test]
    fn default_heads_order_and_weights() {
        let heads = default_heads(true);
        let names: Vec<&str> = heads.iter().map(|h| h.name.as_str()).collect();
        assert_eq!(names, ["imt_max", "imt_avg", "plaque"]);
        assert!(heads.iter().all(|h| h.predict));
        assert_eq!(heads[2].weight, 0.5);
        assert_eq!(heads[2].loss, LossKind::WeightedBce);

        let heads = default_heads(false);
        assert!(!heads[2].predict);
    }

    #[test]
    fn short_name_strips_measurement_prefix() {
        assert_eq!(default_heads(true)[0].short_name(), "max");
        assert_eq!(default_heads(true)[2].short_name(), "plaque");
    }
}
