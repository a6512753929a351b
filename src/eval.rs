use rand::{thread_rng, Rng};

use crate::{
    error::ValidationError,
    rules::match_rules,
    sharder::{bucket_hash, is_in_bucket},
    toggle::{Branch, FeatureDefinition, OnOffDefinition, PercentageDefinition, Stickiness, Toggle, ToggleType},
    Attributes,
};

impl Toggle {
    /// Evaluate whether the toggle is on for the given attributes.
    ///
    /// Disabled and deleted toggles are always off. Otherwise the base outcome comes from the
    /// toggle kind, then `on.rules` may force the toggle on and `off.rules` may force it off.
    pub fn eval(&self, attributes: Option<&Attributes>) -> Result<bool, ValidationError> {
        if !self.enabled || self.deleted_at.is_some() {
            return Ok(false);
        }

        match (self.toggle_type, &self.feature_definition) {
            (ToggleType::OnOff, Some(FeatureDefinition::OnOff(definition))) => {
                definition.eval(&self.name, attributes)
            }
            (ToggleType::Percentage, Some(FeatureDefinition::Percentage(definition))) => {
                definition.eval(&self.name, attributes)
            }
            (ToggleType::OnOff | ToggleType::Percentage, _) => Err(invalid_toggle(&self.name)),
        }
    }
}

impl OnOffDefinition {
    fn eval(&self, name: &str, attributes: Option<&Attributes>) -> Result<bool, ValidationError> {
        let (Some(on), Some(off)) = (&self.on, &self.off) else {
            return Err(invalid_toggle(name));
        };

        let valid_weight = |weight: i32| weight == 0 || weight == 100;
        if !valid_weight(on.weight) || !valid_weight(off.weight) || on.weight + off.weight != 100 {
            return Err(ValidationError::InvalidWeights {
                toggle: name.to_owned(),
            });
        }

        apply_overrides(name, on.weight == 100, on, off, attributes)
    }
}

impl PercentageDefinition {
    fn eval(&self, name: &str, attributes: Option<&Attributes>) -> Result<bool, ValidationError> {
        let (Some(on), Some(off), Some(stickiness)) = (&self.on, &self.off, &self.stickiness) else {
            return Err(invalid_toggle(name));
        };

        let in_range = |weight: i32| (0..=100).contains(&weight);
        if !in_range(on.weight) || !in_range(off.weight) || on.weight + off.weight != 100 {
            return Err(ValidationError::InvalidWeights {
                toggle: name.to_owned(),
            });
        }

        let is_on = match stickiness {
            Stickiness::Random => thread_rng().gen_range(0.0..100.0) < f64::from(on.weight),
            Stickiness::Keys { keys } => {
                let hash = bucket_hash(name, keys, &self.salt, attributes)?;
                is_in_bucket(hash, on.weight)
            }
        };

        apply_overrides(name, is_on, on, off, attributes)
    }
}

/// Apply the allow-list of `on` and then the deny-list of `off`.
///
/// The deny-list is only consulted when the toggle would otherwise be on.
fn apply_overrides(
    name: &str,
    mut is_on: bool,
    on: &Branch,
    off: &Branch,
    attributes: Option<&Attributes>,
) -> Result<bool, ValidationError> {
    if !is_on {
        is_on = match_rules(name, &on.rules, attributes)?;
    }
    if is_on {
        is_on = !match_rules(name, &off.rules, attributes)?;
    }
    Ok(is_on)
}

fn invalid_toggle(name: &str) -> ValidationError {
    ValidationError::InvalidToggle {
        toggle: name.to_owned(),
    }
}
